use crate::error::InitError;
use clap::{Args, ValueEnum};
use imu_traits::{DriverSettings, FusionOptions, ImuFrequency};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// Hiwonder/WitMotion serial IMU
    Hiwonder,
    /// Deterministic in-process IMU, no hardware needed
    Sim,
}

/// Startup parameters for the node.
#[derive(Debug, Clone, Args)]
pub struct NodeConfig {
    /// Serial device the IMU is attached to
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub device: String,

    #[arg(long, default_value_t = 9600)]
    pub baud_rate: u32,

    /// Frame id stamped on published readings
    #[arg(long, default_value = "imu")]
    pub frame_id: String,

    /// Parent frame for the broadcast transform
    #[arg(long, default_value = "odom")]
    pub parent_frame_id: String,

    /// Poll rate in Hz
    #[arg(long, default_value_t = 100.0)]
    pub rate: f64,

    /// Fusion smoothing: share of the accel/compass correction applied per step
    #[arg(long, default_value_t = 0.02)]
    pub slerp_power: f32,

    #[arg(long)]
    pub no_gyro: bool,

    #[arg(long)]
    pub no_accel: bool,

    #[arg(long)]
    pub no_compass: bool,

    /// Device output frequency, e.g. "100hz". Defaults to the slowest one
    /// that keeps up with --rate.
    #[arg(long)]
    pub frequency: Option<ImuFrequency>,

    /// Consecutive driver faults between escalated error reports
    #[arg(long, default_value_t = 10)]
    pub fault_threshold: u32,

    /// Also publish the orientation as a parent -> imu transform
    #[arg(long)]
    pub broadcast_tf: bool,

    /// Append readings to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Stop after this many seconds instead of running until killed
    #[arg(long)]
    pub duration_secs: Option<f64>,

    #[arg(long, value_enum, default_value_t = DriverKind::Hiwonder)]
    pub driver: DriverKind,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            frame_id: "imu".to_string(),
            parent_frame_id: "odom".to_string(),
            rate: 100.0,
            slerp_power: 0.02,
            no_gyro: false,
            no_accel: false,
            no_compass: false,
            frequency: None,
            fault_threshold: 10,
            broadcast_tf: false,
            csv: None,
            duration_secs: None,
            driver: DriverKind::Hiwonder,
        }
    }
}

impl NodeConfig {
    /// Tick period derived from `rate`.
    pub fn period(&self) -> Result<Duration, InitError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(InitError::InvalidConfig(format!(
                "rate must be a positive number of Hz, got {}",
                self.rate
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.rate)
            .map_err(|e| InitError::InvalidConfig(format!("rate {} Hz: {}", self.rate, e)))
    }

    pub fn run_limit(&self) -> Result<Option<Duration>, InitError> {
        self.duration_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|e| {
                    InitError::InvalidConfig(format!("duration {} s: {}", secs, e))
                })
            })
            .transpose()
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            device: self.device.clone(),
            baud_rate: self.baud_rate,
        }
    }

    pub fn fusion_options(&self) -> FusionOptions {
        FusionOptions {
            gyro_enable: !self.no_gyro,
            accel_enable: !self.no_accel,
            compass_enable: !self.no_compass,
            slerp_power: self.slerp_power,
            frequency: Some(
                self.frequency
                    .unwrap_or_else(|| ImuFrequency::at_least(self.rate as f32)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: NodeConfig,
    }

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = Cli::parse_from(["imu_node"]).config;
        let default = NodeConfig::default();
        assert_eq!(parsed.device, default.device);
        assert_eq!(parsed.rate, default.rate);
        assert_eq!(parsed.frame_id, default.frame_id);
        assert_eq!(parsed.parent_frame_id, default.parent_frame_id);
        assert_eq!(parsed.fusion_options(), default.fusion_options());
        assert_eq!(parsed.driver, DriverKind::Hiwonder);
        assert_eq!(parsed.fusion_options().frequency, Some(ImuFrequency::Hz100));
    }

    #[test]
    fn period_follows_rate() {
        let config = NodeConfig::default();
        assert_eq!(config.period().unwrap(), Duration::from_millis(10));

        let config = NodeConfig { rate: 2.0, ..NodeConfig::default() };
        assert_eq!(config.period().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_unusable_rates() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = NodeConfig { rate, ..NodeConfig::default() };
            assert!(matches!(config.period(), Err(InitError::InvalidConfig(_))));
        }
    }

    #[test]
    fn flags_map_to_fusion_options() {
        let config = Cli::parse_from([
            "imu_node",
            "--no-compass",
            "--slerp-power",
            "0.5",
            "--frequency",
            "50hz",
            "--driver",
            "sim",
        ])
        .config;
        let options = config.fusion_options();
        assert!(options.gyro_enable);
        assert!(options.accel_enable);
        assert!(!options.compass_enable);
        assert_eq!(options.slerp_power, 0.5);
        assert_eq!(options.frequency, Some(ImuFrequency::Hz50));
        assert_eq!(config.driver, DriverKind::Sim);
    }
}
