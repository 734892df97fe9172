use crate::error::PublishError;
use crate::publish::Publisher;
use crate::reading::ImuReading;
use imu_traits::{Quaternion, Vector3};
use nalgebra::{UnitQuaternion, Vector3 as NVector3};
use std::time::Duration;

fn to_unit(q: &Quaternion) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_unit(q: &UnitQuaternion<f32>) -> Quaternion {
    Quaternion::new(q.w, q.i, q.j, q.k)
}

/// Gravity direction (+Z up) expressed in the sensor frame.
pub fn projected_gravity(orientation: &Quaternion) -> Vector3 {
    let g = to_unit(orientation).inverse() * NVector3::z();
    Vector3::new(g.x, g.y, g.z)
}

/// Pose of the IMU frame relative to its parent. Translation is always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuTransform {
    pub parent_frame: String,
    pub child_frame: String,
    pub stamp: Duration,
    pub translation: Vector3,
    pub rotation: Quaternion,
}

impl ImuTransform {
    pub fn from_reading(reading: &ImuReading, parent_frame: &str, child_frame: &str) -> Self {
        ImuTransform {
            parent_frame: parent_frame.to_string(),
            child_frame: child_frame.to_string(),
            stamp: reading.timestamp,
            translation: Vector3::default(),
            rotation: reading.orientation,
        }
    }

    /// Builds the rotation from yaw, pitch and roll in degrees
    /// (roll about x, pitch about y, yaw about z).
    pub fn from_ypr_degrees(
        ypr: [f32; 3],
        stamp: Duration,
        parent_frame: &str,
        child_frame: &str,
    ) -> Self {
        let [yaw, pitch, roll] = ypr.map(f32::to_radians);
        let rotation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        ImuTransform {
            parent_frame: parent_frame.to_string(),
            child_frame: child_frame.to_string(),
            stamp,
            translation: Vector3::default(),
            rotation: from_unit(&rotation),
        }
    }

    /// Yaw, pitch, roll in degrees.
    pub fn ypr_degrees(&self) -> [f32; 3] {
        let (roll, pitch, yaw) = to_unit(&self.rotation).euler_angles();
        [yaw, pitch, roll].map(f32::to_degrees)
    }
}

/// Receives transforms, e.g. a transform-tree broadcaster.
pub trait TransformSink {
    fn send_transform(&mut self, transform: ImuTransform) -> Result<(), PublishError>;
}

impl<F> TransformSink for F
where
    F: FnMut(ImuTransform),
{
    fn send_transform(&mut self, transform: ImuTransform) -> Result<(), PublishError> {
        self(transform);
        Ok(())
    }
}

/// Turns each reading into a parent -> child transform.
pub struct TransformPublisher<S: TransformSink> {
    parent_frame: String,
    child_frame: String,
    sink: S,
}

impl<S: TransformSink> TransformPublisher<S> {
    pub fn new(parent_frame: impl Into<String>, child_frame: impl Into<String>, sink: S) -> Self {
        TransformPublisher {
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
            sink,
        }
    }
}

impl<S: TransformSink> Publisher for TransformPublisher<S> {
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError> {
        let transform = ImuTransform::from_reading(reading, &self.parent_frame, &self.child_frame);
        self.sink.send_transform(transform)
    }
}
