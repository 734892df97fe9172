use log::debug;
use std::error::Error as StdError;
use std::fmt;
use std::sync::mpsc;
use strum_macros::{Display, EnumString};

// --- Basic Types ---
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    pub fn scale(&self, k: f32) -> Self {
        Vector3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector3(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

/// Orientation quaternion in WXYZ order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Quaternion { w, x, y, z }
    }

    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Returns the unit quaternion pointing the same way, or `None` when the
    /// quaternion has no usable direction (zero or non-finite).
    pub fn normalized(&self) -> Option<Quaternion> {
        if !self.is_finite() {
            return None;
        }
        let n = self.norm();
        if n <= f32::EPSILON {
            return None;
        }
        Some(Quaternion::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotates `v` by this quaternion. Assumes a unit quaternion.
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        // t = 2 * (q_vec x v); v' = v + w * t + q_vec x t
        let (qx, qy, qz) = (self.x, self.y, self.z);
        let tx = 2.0 * (qy * v.z - qz * v.y);
        let ty = 2.0 * (qz * v.x - qx * v.z);
        let tz = 2.0 * (qx * v.y - qy * v.x);
        Vector3 {
            x: v.x + self.w * tx + (qy * tz - qz * ty),
            y: v.y + self.w * ty + (qz * tx - qx * tz),
            z: v.z + self.w * tz + (qx * ty - qy * tx),
        }
    }
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quaternion(w={}, x={}, y={}, z={})", self.w, self.x, self.y, self.z)
    }
}

// --- Driver Sample ---

/// One fused sample as reported by a driver, in the driver's native units.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuSample {
    /// Fused orientation as a unit quaternion (WXYZ order)
    pub quaternion: Option<Quaternion>,
    /// Acceleration including gravity (g)
    pub accelerometer: Option<Vector3>,
    /// Angular velocity (deg/s)
    pub gyroscope: Option<Vector3>,
    /// Magnetic field vector (micro Tesla, µT)
    pub magnetometer: Option<Vector3>,
    /// Orientation as Euler angles, roll/pitch/yaw (deg)
    pub euler: Option<Vector3>,
    /// Temperature (°C)
    pub temperature: Option<f32>,
    /// Whether the driver considers the fused pose trustworthy
    pub fusion_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ImuType {
    /// No compatible hardware answered.
    Null,
    Hiwonder,
    Simulated,
}

// --- Output Frequency ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ImuFrequency {
    #[strum(serialize = "0.2hz")]
    Hz0_2,
    #[strum(serialize = "0.5hz")]
    Hz0_5,
    #[strum(serialize = "1hz")]
    Hz1,
    #[strum(serialize = "2hz")]
    Hz2,
    #[strum(serialize = "5hz")]
    Hz5,
    #[strum(serialize = "10hz")]
    Hz10,
    #[strum(serialize = "20hz")]
    Hz20,
    #[strum(serialize = "50hz")]
    Hz50,
    #[strum(serialize = "100hz")]
    Hz100,
    #[strum(serialize = "200hz")]
    Hz200,
    #[strum(serialize = "single")]
    Single,
    #[strum(serialize = "none")]
    None,
}

impl ImuFrequency {
    /// Streaming frequencies, slowest first.
    pub const STREAMING: [ImuFrequency; 10] = [
        ImuFrequency::Hz0_2,
        ImuFrequency::Hz0_5,
        ImuFrequency::Hz1,
        ImuFrequency::Hz2,
        ImuFrequency::Hz5,
        ImuFrequency::Hz10,
        ImuFrequency::Hz20,
        ImuFrequency::Hz50,
        ImuFrequency::Hz100,
        ImuFrequency::Hz200,
    ];

    /// Streaming rate in Hz. `Single` and `None` do not stream.
    pub fn hz(&self) -> Option<f32> {
        match self {
            ImuFrequency::Hz0_2 => Some(0.2),
            ImuFrequency::Hz0_5 => Some(0.5),
            ImuFrequency::Hz1 => Some(1.0),
            ImuFrequency::Hz2 => Some(2.0),
            ImuFrequency::Hz5 => Some(5.0),
            ImuFrequency::Hz10 => Some(10.0),
            ImuFrequency::Hz20 => Some(20.0),
            ImuFrequency::Hz50 => Some(50.0),
            ImuFrequency::Hz100 => Some(100.0),
            ImuFrequency::Hz200 => Some(200.0),
            ImuFrequency::Single | ImuFrequency::None => None,
        }
    }

    /// Slowest streaming frequency that keeps up with `rate_hz` polls per second.
    pub fn at_least(rate_hz: f32) -> ImuFrequency {
        let picked = ImuFrequency::STREAMING
            .into_iter()
            .find(|f| f.hz().is_some_and(|hz| hz >= rate_hz))
            .unwrap_or(ImuFrequency::Hz200);
        debug!("Poll rate {} Hz maps to device frequency {}", rate_hz, picked);
        picked
    }
}

// --- Driver Configuration ---

/// Parameters used to find and open a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub device: String,
    pub baud_rate: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// Fusion channel selection and tuning applied once after the device is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOptions {
    pub gyro_enable: bool,
    pub accel_enable: bool,
    pub compass_enable: bool,
    /// Fraction of the accel/compass correction applied per fusion step.
    pub slerp_power: f32,
    pub frequency: Option<ImuFrequency>,
}

impl Default for FusionOptions {
    fn default() -> Self {
        FusionOptions {
            gyro_enable: true,
            accel_enable: true,
            compass_enable: true,
            slerp_power: 0.02,
            frequency: None,
        }
    }
}

// --- Standard Error Type ---
#[derive(Debug)]
pub enum ImuError {
    /// Error originating from the underlying device communication (I2C, Serial, CAN)
    DeviceError(String),
    /// Error reading data from the device or internal state
    ReadError(String),
    /// Error writing commands or configuration to the device
    WriteError(String),
    /// Error during device configuration or setup
    ConfigurationError(String),
    /// A packet from the device failed to decode
    InvalidPacket(String),
    /// Error related to multithreading locks (e.g., poisoned)
    LockError(String),
    /// Error sending a command to the reader thread
    CommandSendError(String),
    /// Functionality not supported by this specific IMU implementation
    NotSupported(String),
    /// Catch-all for other errors
    Other(String),
}

impl fmt::Display for ImuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImuError::DeviceError(s) => write!(f, "Device error: {}", s),
            ImuError::ReadError(s) => write!(f, "Read error: {}", s),
            ImuError::WriteError(s) => write!(f, "Write error: {}", s),
            ImuError::ConfigurationError(s) => write!(f, "Configuration error: {}", s),
            ImuError::InvalidPacket(s) => write!(f, "Invalid packet: {}", s),
            ImuError::LockError(s) => write!(f, "Lock error: {}", s),
            ImuError::CommandSendError(s) => write!(f, "Command send error: {}", s),
            ImuError::NotSupported(s) => write!(f, "Not supported: {}", s),
            ImuError::Other(s) => write!(f, "Other IMU error: {}", s),
        }
    }
}

impl StdError for ImuError {}

impl From<std::io::Error> for ImuError {
    fn from(err: std::io::Error) -> Self {
        ImuError::DeviceError(err.to_string())
    }
}

impl From<serialport::Error> for ImuError {
    fn from(err: serialport::Error) -> Self {
        ImuError::DeviceError(format!("Serial port error: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ImuError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ImuError::LockError(format!("Lock poisoned: {}", err))
    }
}

impl<T> From<mpsc::SendError<T>> for ImuError {
    fn from(err: mpsc::SendError<T>) -> Self {
        ImuError::CommandSendError(format!("Failed to send command: {}", err))
    }
}

// --- Driver Boundary ---

/// Creates drivers. `Ok(None)` means nothing compatible answered at the
/// configured location; `Err` means the attempt itself failed.
pub trait ImuBackend {
    type Driver: ImuDriver;

    fn create_imu(&self, settings: &DriverSettings) -> Result<Option<Self::Driver>, ImuError>;
}

/// A live connection to one fused IMU.
pub trait ImuDriver {
    fn imu_type(&self) -> ImuType;

    /// Enables fusion channels and applies tuning. Called once before polling.
    fn configure(&mut self, options: &FusionOptions) -> Result<(), ImuError>;

    /// Returns the newest sample not yet handed out, or `Ok(None)` when the
    /// driver has nothing new. Must return within a bounded time.
    fn latest_sample(&mut self) -> Result<Option<ImuSample>, ImuError>;

    /// Releases the device. Calling it more than once is harmless.
    fn close(&mut self) -> Result<(), ImuError>;
}
