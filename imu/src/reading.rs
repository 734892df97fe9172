use imu_traits::{ImuSample, Quaternion, Vector3};
use std::time::Duration;

pub const STANDARD_GRAVITY: f32 = 9.80665;

/// A normalized sample, stamped by the poll loop.
///
/// When `valid` is false the numeric fields carry no meaning and the reading
/// must not leave the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// Monotonic time since the poll loop started.
    pub timestamp: Duration,
    /// Unit orientation quaternion (WXYZ).
    pub orientation: Quaternion,
    /// Acceleration including gravity (m/s²)
    pub linear_acceleration: Option<Vector3>,
    /// Angular velocity (rad/s)
    pub angular_velocity: Option<Vector3>,
    pub valid: bool,
}

impl ImuReading {
    /// Converts a driver sample into publishing units. The reading is valid
    /// only if the driver vouched for the fused pose and it normalizes.
    pub fn from_sample(sample: &ImuSample, timestamp: Duration) -> Self {
        let orientation = if sample.fusion_valid {
            sample.quaternion.and_then(|q| q.normalized())
        } else {
            None
        };

        match orientation {
            Some(orientation) => ImuReading {
                timestamp,
                orientation,
                linear_acceleration: sample
                    .accelerometer
                    .filter(Vector3::is_finite)
                    .map(|a| a.scale(STANDARD_GRAVITY)),
                angular_velocity: sample
                    .gyroscope
                    .filter(Vector3::is_finite)
                    .map(|g| g.scale(std::f32::consts::PI / 180.0)),
                valid: true,
            },
            None => ImuReading::invalid(timestamp),
        }
    }

    pub fn invalid(timestamp: Duration) -> Self {
        ImuReading {
            timestamp,
            orientation: Quaternion::IDENTITY,
            linear_acceleration: None,
            angular_velocity: None,
            valid: false,
        }
    }

    pub fn publishable(&self) -> Option<&ImuReading> {
        self.valid.then_some(self)
    }
}
