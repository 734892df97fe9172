pub mod frame;

use bitflags::bitflags;
pub use frame::*;
pub use imu_traits::{
    DriverSettings, FusionOptions, ImuBackend, ImuDriver, ImuError, ImuFrequency, ImuSample,
    ImuType, Quaternion, Vector3,
};
use std::io::{self, Read, Write};
use std::sync::{mpsc, Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

pub trait FrequencyToByte {
    fn to_byte(&self) -> u8;
}

impl FrequencyToByte for ImuFrequency {
    fn to_byte(&self) -> u8 {
        match self {
            ImuFrequency::Hz0_2 => 0x01,
            ImuFrequency::Hz0_5 => 0x02,
            ImuFrequency::Hz1 => 0x03,
            ImuFrequency::Hz2 => 0x04,
            ImuFrequency::Hz5 => 0x05,
            ImuFrequency::Hz10 => 0x06,
            ImuFrequency::Hz20 => 0x07,
            ImuFrequency::Hz50 => 0x08,
            ImuFrequency::Hz100 => 0x09,
            ImuFrequency::Hz200 => 0x0B,
            ImuFrequency::Single => 0x0C,
            ImuFrequency::None => 0x0D,
        }
    }
}

bitflags! {
    /// Output content register (RSW): which packet types the device streams.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputContent: u16 {
        const TIME = 0x0001;
        const ACC = 0x0002;
        const GYRO = 0x0004;
        const ANGLE = 0x0008;
        const MAG = 0x0010;
        const QUATERNION = 0x0200;
    }
}

impl OutputContent {
    /// Content needed to serve the given fusion options. Angle and quaternion
    /// output always stay on since they carry the fused pose.
    pub fn for_options(options: &FusionOptions) -> Self {
        let mut content = OutputContent::ANGLE | OutputContent::QUATERNION;
        content.set(OutputContent::ACC, options.accel_enable);
        content.set(OutputContent::GYRO, options.gyro_enable);
        content.set(OutputContent::MAG, options.compass_enable);
        content
    }
}

mod register {
    pub const SAVE: u8 = 0x00;
    pub const RSW: u8 = 0x02;
    pub const RRATE: u8 = 0x03;
    pub const AXIS6: u8 = 0x24;
    pub const KEY: u8 = 0x69;
}

fn command(register: u8, value: u16) -> [u8; 5] {
    let [low, high] = value.to_le_bytes();
    [0xFF, 0xAA, register, low, high]
}

/// Low-level serial connection. Owned by the reader thread.
pub struct IMU {
    port: Box<dyn serialport::SerialPort>,
    frame_parser: FrameParser,
}

impl IMU {
    pub fn new(interface: &str, baud_rate: u32) -> Result<Self, ImuError> {
        let port = serialport::new(interface, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;

        Ok(IMU {
            port,
            frame_parser: FrameParser::new(Some(512)),
        })
    }

    /// Waits until one valid packet arrives or `timeout` passes.
    pub fn probe(&mut self, timeout: Duration) -> Result<bool, ImuError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.read_data() {
                Ok(frames) if !frames.is_empty() => return Ok(true),
                Ok(_) => {}
                Err(ImuError::InvalidPacket(e)) => debug!("Probe saw corrupt data: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    pub fn initialize(&mut self, options: &FusionOptions) -> Result<(), ImuError> {
        let algorithm = if options.compass_enable { 0x00 } else { 0x01 };
        let content = OutputContent::for_options(options);

        self.write_command(&command(register::KEY, 0xB588))?; // Unlock
        self.write_command(&command(register::AXIS6, algorithm))?;
        self.write_command(&command(register::RSW, content.bits()))?;
        self.write_command(&command(register::SAVE, 0x0000))?;

        if !options.gyro_enable {
            warn!("Gyro output disabled; on-board fusion still integrates it");
        }
        if options.slerp_power != FusionOptions::default().slerp_power {
            warn!(
                "Slerp power {} ignored: fusion gain is fixed in device firmware",
                options.slerp_power
            );
        }
        if let Some(frequency) = options.frequency {
            self.set_frequency(frequency)?;
        }
        Ok(())
    }

    fn write_command(&mut self, command: &[u8]) -> Result<(), ImuError> {
        self.port
            .write_all(command)
            .map_err(|e| ImuError::WriteError(format!("Failed to write command: {}", e)))?;
        // The device drops commands sent back-to-back.
        thread::sleep(Duration::from_millis(30));
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency: ImuFrequency) -> Result<(), ImuError> {
        self.write_command(&command(register::RRATE, frequency.to_byte() as u16))
    }

    pub fn read_data(&mut self) -> Result<Vec<ReadFrame>, ImuError> {
        let mut buffer = [0u8; 1024];
        match self.port.read(&mut buffer) {
            Ok(0) => Ok(vec![]),
            Ok(n) => self.frame_parser.parse(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(vec![]),
            Err(e) => Err(ImuError::ReadError(format!("Failed to read data: {}", e))),
        }
    }
}

#[derive(Debug, Default)]
struct SharedState {
    /// Channels seen so far in the current output cycle.
    pending: ImuSample,
    /// Last complete cycle.
    sample: ImuSample,
    fresh: bool,
    last_error: Option<String>,
    alive: bool,
}

impl SharedState {
    fn apply(&mut self, frame: ReadFrame) {
        match frame {
            ReadFrame::Acceleration { x, y, z, temp } => {
                self.pending.accelerometer = Some(Vector3 { x, y, z });
                self.pending.temperature = Some(temp);
            }
            ReadFrame::Gyro { x, y, z, voltage: _ } => {
                self.pending.gyroscope = Some(Vector3 { x, y, z });
            }
            ReadFrame::Angle { roll, pitch, yaw, version: _ } => {
                self.pending.euler = Some(Vector3 { x: roll, y: pitch, z: yaw });
            }
            ReadFrame::Magnetometer { x, y, z, temp: _ } => {
                self.pending.magnetometer = Some(Vector3 { x, y, z });
            }
            ReadFrame::Quaternion { w, x, y, z } => {
                // The quaternion closes each output cycle. Channels the device
                // stopped sending do not carry over into the next one.
                self.pending.quaternion = Some(Quaternion { w, x, y, z });
                self.pending.fusion_valid = true;
                self.sample = self.pending;
                self.pending = ImuSample::default();
                self.fresh = true;
            }
            ReadFrame::Other { .. } => (),
        }
    }

    /// Drops a half-assembled cycle, e.g. after the output content changed.
    fn restart_cycle(&mut self) {
        self.pending = ImuSample::default();
    }
}

#[derive(Debug)]
pub enum DriverCommand {
    Configure(FusionOptions, mpsc::Sender<Result<(), ImuError>>),
    Stop,
}

/// Opens Hiwonder devices on a serial port.
#[derive(Debug, Clone)]
pub struct HiwonderBackend {
    probe_timeout: Duration,
}

impl Default for HiwonderBackend {
    fn default() -> Self {
        HiwonderBackend {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl HiwonderBackend {
    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        HiwonderBackend { probe_timeout }
    }
}

impl ImuBackend for HiwonderBackend {
    type Driver = HiwonderDriver;

    fn create_imu(&self, settings: &DriverSettings) -> Result<Option<HiwonderDriver>, ImuError> {
        let mut imu = match IMU::new(&settings.device, settings.baud_rate) {
            Ok(imu) => imu,
            Err(e) => {
                warn!("Could not open {}: {}", settings.device, e);
                return Ok(None);
            }
        };

        if !imu.probe(self.probe_timeout)? {
            warn!(
                "No packets from {} at {} baud within {:?}",
                settings.device, settings.baud_rate, self.probe_timeout
            );
            return Ok(None);
        }

        info!("Hiwonder IMU answering on {}", settings.device);
        Ok(Some(HiwonderDriver::spawn(imu)))
    }
}

/// Background-thread reader. The thread owns the serial port and keeps the
/// newest sample in shared state, so `latest_sample` never touches the port.
pub struct HiwonderDriver {
    state: Arc<RwLock<SharedState>>,
    command_tx: mpsc::Sender<DriverCommand>,
    running: Arc<RwLock<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl HiwonderDriver {
    fn spawn(imu: IMU) -> Self {
        let state = Arc::new(RwLock::new(SharedState {
            alive: true,
            ..SharedState::default()
        }));
        let running = Arc::new(RwLock::new(true));
        let (command_tx, command_rx) = mpsc::channel();

        let thread = {
            let state = Arc::clone(&state);
            let running = Arc::clone(&running);
            thread::spawn(move || reader_loop(imu, state, running, command_rx))
        };

        HiwonderDriver {
            state,
            command_tx,
            running,
            thread: Some(thread),
        }
    }

    pub fn set_frequency(&mut self, frequency: ImuFrequency) -> Result<(), ImuError> {
        let options = FusionOptions {
            frequency: Some(frequency),
            ..FusionOptions::default()
        };
        self.configure(&options)
    }
}

fn reader_loop(
    mut imu: IMU,
    state: Arc<RwLock<SharedState>>,
    running: Arc<RwLock<bool>>,
    command_rx: mpsc::Receiver<DriverCommand>,
) {
    debug!("Hiwonder reading thread started");
    while let Ok(guard) = running.read() {
        if !*guard {
            break;
        }
        drop(guard);

        match command_rx.try_recv() {
            Ok(DriverCommand::Configure(options, reply)) => {
                let result = imu.initialize(&options);
                if let Ok(mut shared) = state.write() {
                    shared.restart_cycle();
                }
                let _ = reply.send(result);
            }
            Ok(DriverCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let result = imu.read_data();
        match state.write() {
            Ok(mut shared) => match result {
                Ok(frames) => frames.into_iter().for_each(|f| shared.apply(f)),
                Err(e) => shared.last_error = Some(e.to_string()),
            },
            Err(_) => {
                error!("Hiwonder shared state poisoned, stopping reader");
                break;
            }
        }

        // Max output rate is 200 Hz, so 5 ms keeps up without spinning.
        thread::sleep(Duration::from_millis(5));
    }

    if let Ok(mut shared) = state.write() {
        shared.alive = false;
    }
    debug!("Hiwonder reading thread exiting");
}

impl ImuDriver for HiwonderDriver {
    fn imu_type(&self) -> ImuType {
        ImuType::Hiwonder
    }

    fn configure(&mut self, options: &FusionOptions) -> Result<(), ImuError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.command_tx
            .send(DriverCommand::Configure(*options, reply_tx))?;
        reply_rx.recv_timeout(COMMAND_TIMEOUT).map_err(|e| {
            ImuError::ConfigurationError(format!("No reply from reader thread: {}", e))
        })?
    }

    fn latest_sample(&mut self) -> Result<Option<ImuSample>, ImuError> {
        let mut shared = self.state.write()?;
        if let Some(e) = shared.last_error.take() {
            return Err(ImuError::ReadError(e));
        }
        if !shared.alive {
            return Err(ImuError::DeviceError("Reader thread stopped".to_string()));
        }
        if !shared.fresh {
            return Ok(None);
        }
        shared.fresh = false;
        Ok(Some(shared.sample))
    }

    fn close(&mut self) -> Result<(), ImuError> {
        if let Ok(mut running) = self.running.write() {
            *running = false;
        }
        let _ = self.command_tx.send(DriverCommand::Stop);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| ImuError::Other("Reader thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for HiwonderDriver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_are_little_endian() {
        assert_eq!(command(register::KEY, 0xB588), [0xFF, 0xAA, 0x69, 0x88, 0xB5]);
        assert_eq!(command(register::RRATE, 0x09), [0xFF, 0xAA, 0x03, 0x09, 0x00]);
    }

    #[test]
    fn output_content_follows_enabled_channels() {
        let all = OutputContent::for_options(&FusionOptions::default());
        assert_eq!(all.bits(), 0x0002 | 0x0004 | 0x0008 | 0x0010 | 0x0200);

        let no_compass = OutputContent::for_options(&FusionOptions {
            compass_enable: false,
            accel_enable: false,
            ..FusionOptions::default()
        });
        assert!(!no_compass.contains(OutputContent::MAG));
        assert!(!no_compass.contains(OutputContent::ACC));
        assert!(no_compass.contains(OutputContent::QUATERNION | OutputContent::GYRO));
    }

    #[test]
    fn quaternion_frame_marks_sample_fresh() {
        let mut state = SharedState::default();
        state.apply(ReadFrame::Gyro { x: 1.0, y: 2.0, z: 3.0, voltage: 3.3 });
        assert!(!state.fresh);
        assert_eq!(state.sample.gyroscope, None);

        state.apply(ReadFrame::Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 });
        assert!(state.fresh);
        assert!(state.sample.fusion_valid);
        assert_eq!(state.sample.quaternion, Some(Quaternion::IDENTITY));
        assert_eq!(state.sample.gyroscope, Some(Vector3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn disabled_channels_do_not_linger() {
        let mut state = SharedState::default();
        state.apply(ReadFrame::Acceleration { x: 0.0, y: 0.0, z: 1.0, temp: 25.0 });
        state.apply(ReadFrame::Magnetometer { x: 0.3, y: 0.0, z: 0.1, temp: 25.0 });
        state.apply(ReadFrame::Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 });
        assert!(state.sample.accelerometer.is_some());
        assert!(state.sample.magnetometer.is_some());

        // Next cycle only carries the quaternion.
        state.apply(ReadFrame::Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 });
        assert_eq!(state.sample.accelerometer, None);
        assert_eq!(state.sample.magnetometer, None);
        assert_eq!(state.sample.temperature, None);
    }

    #[test]
    fn reconfiguring_drops_the_partial_cycle() {
        let mut state = SharedState::default();
        state.apply(ReadFrame::Gyro { x: 1.0, y: 2.0, z: 3.0, voltage: 3.3 });
        state.restart_cycle();
        state.apply(ReadFrame::Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 });
        assert_eq!(state.sample.gyroscope, None);
        assert!(state.fresh);
    }

    #[test]
    fn missing_port_is_no_device() {
        let backend = HiwonderBackend::with_probe_timeout(Duration::from_millis(10));
        let settings = DriverSettings {
            device: "/dev/this-port-does-not-exist".to_string(),
            baud_rate: 9600,
        };
        assert!(backend.create_imu(&settings).unwrap().is_none());
    }
}
