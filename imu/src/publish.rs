use crate::error::PublishError;
use crate::reading::ImuReading;
use crate::transform::projected_gravity;
use imu_traits::Vector3;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Downstream consumer of valid readings. Called once per successful tick.
pub trait Publisher {
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError>;
}

impl<F> Publisher for F
where
    F: FnMut(&ImuReading),
{
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError> {
        self(reading);
        Ok(())
    }
}

/// Writes every reading to the log, tagged with its frame id.
pub struct LogPublisher {
    frame_id: String,
}

impl LogPublisher {
    pub fn new(frame_id: impl Into<String>) -> Self {
        LogPublisher {
            frame_id: frame_id.into(),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError> {
        let q = reading.orientation;
        let gravity = projected_gravity(&q);
        info!(
            frame_id = %self.frame_id,
            stamp = reading.timestamp.as_secs_f64(),
            "orientation: w={:.4} x={:.4} y={:.4} z={:.4} gravity: x={:.3} y={:.3} z={:.3}",
            q.w, q.x, q.y, q.z, gravity.x, gravity.y, gravity.z
        );
        Ok(())
    }
}

pub const CSV_HEADER: &str = "timestamp,quat_w,quat_x,quat_y,quat_z,\
                              lin_acc_x,lin_acc_y,lin_acc_z,\
                              ang_vel_x,ang_vel_y,ang_vel_z";

/// One CSV row per reading. Absent vectors leave their cells empty.
pub struct CsvPublisher<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvPublisher<W> {
    pub fn new(out: W) -> Self {
        CsvPublisher {
            out,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl CsvPublisher<File> {
    /// Appends to `path`, creating it if needed. A file that already holds
    /// rows keeps its header and gets no second one.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::options().create(true).append(true).open(path)?;
        let header_written = file.metadata()?.len() > 0;
        Ok(CsvPublisher {
            out: file,
            header_written,
        })
    }
}

fn vector_cells(v: Option<Vector3>) -> String {
    match v {
        Some(v) => format!("{:.6},{:.6},{:.6}", v.x, v.y, v.z),
        None => ",,".to_string(),
    }
}

impl<W: Write> Publisher for CsvPublisher<W> {
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError> {
        if !self.header_written {
            writeln!(self.out, "{}", CSV_HEADER)?;
            self.header_written = true;
        }
        let q = reading.orientation;
        writeln!(
            self.out,
            "{:.6},{:.6},{:.6},{:.6},{:.6},{},{}",
            reading.timestamp.as_secs_f64(),
            q.w,
            q.x,
            q.y,
            q.z,
            vector_cells(reading.linear_acceleration),
            vector_cells(reading.angular_velocity),
        )?;
        self.out.flush()?;
        Ok(())
    }
}

/// Forwards each reading to every target in order. All targets run even
/// when one fails; the first error is reported.
#[derive(Default)]
pub struct Fanout {
    targets: Vec<Box<dyn Publisher>>,
}

impl Fanout {
    pub fn new() -> Self {
        Fanout::default()
    }

    pub fn with(mut self, target: impl Publisher + 'static) -> Self {
        self.push(target);
        self
    }

    pub fn push(&mut self, target: impl Publisher + 'static) {
        self.targets.push(Box::new(target));
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Publisher for Fanout {
    fn publish(&mut self, reading: &ImuReading) -> Result<(), PublishError> {
        let mut result = Ok(());
        for target in &mut self.targets {
            let outcome = target.publish(reading);
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imu_traits::Quaternion;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    fn reading() -> ImuReading {
        ImuReading {
            timestamp: Duration::from_millis(1500),
            orientation: Quaternion::IDENTITY,
            linear_acceleration: Some(Vector3::new(0.0, 0.0, 9.5)),
            angular_velocity: None,
            valid: true,
        }
    }

    struct Failing;

    impl Publisher for Failing {
        fn publish(&mut self, _reading: &ImuReading) -> Result<(), PublishError> {
            Err(PublishError::Sink("down".to_string()))
        }
    }

    #[test]
    fn csv_writes_header_once() {
        let mut csv = CsvPublisher::new(Vec::new());
        csv.publish(&reading()).unwrap();
        csv.publish(&reading()).unwrap();

        let text = String::from_utf8(csv.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "1.500000,1.000000,0.000000,0.000000,0.000000,0.000000,0.000000,9.500000,,,"
        );
        assert_eq!(lines[1].split(',').count(), CSV_HEADER.split(',').count());
    }

    #[test]
    fn reopened_csv_file_gets_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu.csv");

        for _ in 0..2 {
            let mut csv = CsvPublisher::append(&path).unwrap();
            csv.publish(&reading()).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1..].iter().all(|l| l.starts_with("1.500000,")));
    }

    #[test]
    fn fanout_runs_every_target_and_reports_first_error() {
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let mut fanout = Fanout::new()
            .with(Failing)
            .with(move |_: &ImuReading| counter.set(counter.get() + 1));
        assert_eq!(fanout.len(), 2);

        assert!(matches!(
            fanout.publish(&reading()),
            Err(PublishError::Sink(_))
        ));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn publishes_through_trait_object() {
        let mut boxed: Box<dyn Publisher> = Box::new(LogPublisher::new("imu"));
        assert!(boxed.publish(&reading()).is_ok());
    }
}
