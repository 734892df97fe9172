use imu_traits::ImuError;
use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Fatal startup failures. Nothing is polled after one of these.
#[derive(Debug)]
pub enum InitError {
    /// No compatible hardware answered at the configured device.
    NoDeviceFound { device: String },
    /// The driver failed while looking for the device.
    Driver(ImuError),
    /// A device was found but rejected the fusion configuration.
    Configuration(ImuError),
    /// A startup parameter is unusable.
    InvalidConfig(String),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::NoDeviceFound { device } => write!(f, "No IMU found on {}", device),
            InitError::Driver(e) => write!(f, "Driver failed during startup: {}", e),
            InitError::Configuration(e) => write!(f, "Failed to configure IMU: {}", e),
            InitError::InvalidConfig(s) => write!(f, "Invalid configuration: {}", s),
        }
    }
}

impl StdError for InitError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            InitError::Driver(e) | InitError::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

/// Per-tick read failures. Absorbed by the poll loop.
#[derive(Debug)]
pub enum ReadError {
    /// Nothing new since the last poll.
    NotReady,
    /// The driver reported a lower-level failure.
    DriverFault(ImuError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::NotReady => write!(f, "No new sample available"),
            ReadError::DriverFault(e) => write!(f, "Driver fault: {}", e),
        }
    }
}

impl StdError for ReadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ReadError::DriverFault(e) => Some(e),
            ReadError::NotReady => None,
        }
    }
}

impl From<ImuError> for ReadError {
    fn from(err: ImuError) -> Self {
        ReadError::DriverFault(err)
    }
}

#[derive(Debug)]
pub enum PublishError {
    Io(io::Error),
    /// A downstream sink refused the message.
    Sink(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Io(e) => write!(f, "I/O error while publishing: {}", e),
            PublishError::Sink(s) => write!(f, "Sink rejected message: {}", s),
        }
    }
}

impl StdError for PublishError {}

impl From<io::Error> for PublishError {
    fn from(err: io::Error) -> Self {
        PublishError::Io(err)
    }
}
