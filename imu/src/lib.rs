//! Periodic IMU polling.
//!
//! A [`SensorPollLoop`] owns one configured driver, asks it for the newest
//! fused sample once per tick and hands valid readings to a [`Publisher`].
//! Read failures never leave the loop; they are counted and logged.

pub mod config;
pub mod error;
pub mod poll;
pub mod publish;
pub mod reading;
pub mod sim;
pub mod transform;

pub use config::{DriverKind, NodeConfig};
pub use error::{InitError, PublishError, ReadError};
pub use poll::{DriverHandle, ErrorCounter, PollStats, RunFlag, SensorPollLoop, TickOutcome};
pub use publish::{CsvPublisher, Fanout, LogPublisher, Publisher};
pub use reading::ImuReading;
pub use transform::{projected_gravity, ImuTransform, TransformPublisher, TransformSink};

// --- Re-export the driver boundary ---
pub use imu_traits::{
    DriverSettings, FusionOptions, ImuBackend, ImuDriver, ImuError, ImuFrequency, ImuSample,
    ImuType, Quaternion, Vector3,
};

pub use hiwonder::{HiwonderBackend, HiwonderDriver};
pub use sim::{SimulatedBackend, SimulatedImu};
