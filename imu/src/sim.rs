//! In-process IMU that spins slowly about z. Lets the node run without
//! hardware.

use imu_traits::{
    DriverSettings, FusionOptions, ImuBackend, ImuDriver, ImuError, ImuSample, ImuType,
    Quaternion, Vector3,
};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    present: bool,
    sample_interval: Duration,
    yaw_rate_dps: f32,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        SimulatedBackend {
            present: true,
            sample_interval: Duration::from_millis(5),
            yaw_rate_dps: 10.0,
        }
    }
}

impl SimulatedBackend {
    /// A backend where no device ever answers.
    pub fn absent() -> Self {
        SimulatedBackend {
            present: false,
            ..SimulatedBackend::default()
        }
    }

    pub fn with_sample_interval(mut self, sample_interval: Duration) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    pub fn with_yaw_rate(mut self, yaw_rate_dps: f32) -> Self {
        self.yaw_rate_dps = yaw_rate_dps;
        self
    }
}

impl ImuBackend for SimulatedBackend {
    type Driver = SimulatedImu;

    fn create_imu(&self, settings: &DriverSettings) -> Result<Option<SimulatedImu>, ImuError> {
        if !self.present {
            return Ok(None);
        }
        debug!("Simulating IMU in place of {}", settings.device);
        Ok(Some(SimulatedImu {
            sample_interval: self.sample_interval,
            yaw_rate_dps: self.yaw_rate_dps,
            options: FusionOptions::default(),
            last_sample: None,
            samples: 0,
            closed: false,
        }))
    }
}

pub struct SimulatedImu {
    sample_interval: Duration,
    yaw_rate_dps: f32,
    options: FusionOptions,
    last_sample: Option<Instant>,
    samples: u64,
    closed: bool,
}

impl SimulatedImu {
    pub fn options(&self) -> &FusionOptions {
        &self.options
    }

    /// Sample `n` of the sequence. Yaw advances by one interval per sample.
    fn sample(&self, n: u64) -> ImuSample {
        let yaw = (self.yaw_rate_dps * self.sample_interval.as_secs_f32() * n as f32).to_radians();
        let half = yaw / 2.0;
        ImuSample {
            quaternion: Some(Quaternion::new(half.cos(), 0.0, 0.0, half.sin())),
            accelerometer: self
                .options
                .accel_enable
                .then_some(Vector3::new(0.0, 0.0, 1.0)),
            gyroscope: self
                .options
                .gyro_enable
                .then_some(Vector3::new(0.0, 0.0, self.yaw_rate_dps)),
            magnetometer: None,
            euler: Some(Vector3::new(0.0, 0.0, yaw.to_degrees())),
            temperature: Some(25.0),
            fusion_valid: true,
        }
    }
}

impl ImuDriver for SimulatedImu {
    fn imu_type(&self) -> ImuType {
        ImuType::Simulated
    }

    fn configure(&mut self, options: &FusionOptions) -> Result<(), ImuError> {
        if !(0.0..=1.0).contains(&options.slerp_power) {
            return Err(ImuError::ConfigurationError(format!(
                "slerp power must be within 0..=1, got {}",
                options.slerp_power
            )));
        }
        self.options = *options;
        Ok(())
    }

    fn latest_sample(&mut self) -> Result<Option<ImuSample>, ImuError> {
        if self.closed {
            return Err(ImuError::DeviceError("Simulated IMU closed".to_string()));
        }
        let now = Instant::now();
        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.sample_interval {
                return Ok(None);
            }
        }
        self.last_sample = Some(now);
        let sample = self.sample(self.samples);
        self.samples += 1;
        Ok(Some(sample))
    }

    fn close(&mut self) -> Result<(), ImuError> {
        self.closed = true;
        Ok(())
    }
}
