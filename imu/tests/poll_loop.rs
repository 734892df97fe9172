use imu_node::{
    DriverHandle, DriverSettings, FusionOptions, ImuBackend, ImuDriver, ImuError, ImuReading,
    ImuSample, ImuType, InitError, NodeConfig, Quaternion, RunFlag, SensorPollLoop,
    SimulatedBackend, TickOutcome,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Step {
    Good,
    Invalid,
    NotReady,
    Fault,
}

#[derive(Debug, Default)]
struct Log {
    created: u32,
    configured: u32,
    closed: u32,
}

struct StubDriver {
    kind: ImuType,
    steps: VecDeque<Step>,
    fail_configure: bool,
    log: Rc<RefCell<Log>>,
}

impl ImuDriver for StubDriver {
    fn imu_type(&self) -> ImuType {
        self.kind
    }

    fn configure(&mut self, _options: &FusionOptions) -> Result<(), ImuError> {
        self.log.borrow_mut().configured += 1;
        if self.fail_configure {
            return Err(ImuError::ConfigurationError("rejected".to_string()));
        }
        Ok(())
    }

    fn latest_sample(&mut self) -> Result<Option<ImuSample>, ImuError> {
        match self.steps.pop_front().unwrap_or(Step::NotReady) {
            Step::Good => Ok(Some(ImuSample {
                quaternion: Some(Quaternion::new(0.0, 0.0, 0.0, 1.0)),
                fusion_valid: true,
                ..ImuSample::default()
            })),
            Step::Invalid => Ok(Some(ImuSample {
                quaternion: Some(Quaternion::new(0.0, 0.0, 0.0, 1.0)),
                fusion_valid: false,
                ..ImuSample::default()
            })),
            Step::NotReady => Ok(None),
            Step::Fault => Err(ImuError::ReadError("i/o".to_string())),
        }
    }

    fn close(&mut self) -> Result<(), ImuError> {
        self.log.borrow_mut().closed += 1;
        Ok(())
    }
}

struct StubBackend {
    present: bool,
    kind: ImuType,
    fail_configure: bool,
    steps: Vec<Step>,
    log: Rc<RefCell<Log>>,
}

impl StubBackend {
    fn new(steps: Vec<Step>) -> Self {
        StubBackend {
            present: true,
            kind: ImuType::Simulated,
            fail_configure: false,
            steps,
            log: Rc::new(RefCell::new(Log::default())),
        }
    }
}

impl ImuBackend for StubBackend {
    type Driver = StubDriver;

    fn create_imu(&self, _settings: &DriverSettings) -> Result<Option<StubDriver>, ImuError> {
        if !self.present {
            return Ok(None);
        }
        self.log.borrow_mut().created += 1;
        Ok(Some(StubDriver {
            kind: self.kind,
            steps: self.steps.iter().copied().collect(),
            fail_configure: self.fail_configure,
            log: Rc::clone(&self.log),
        }))
    }
}

fn config() -> NodeConfig {
    NodeConfig {
        rate: 1000.0,
        fault_threshold: 3,
        ..NodeConfig::default()
    }
}

#[test]
fn three_faults_then_success() {
    let backend = StubBackend::new(vec![Step::Fault, Step::Fault, Step::Fault, Step::Good]);
    let mut poll = SensorPollLoop::initialize(&backend, &config()).unwrap();

    let mut published = Vec::new();
    let mut counts = Vec::new();
    for tick in 1..=4 {
        poll.tick(&mut |r: &ImuReading| published.push((tick, *r)));
        counts.push(poll.error_count());
    }

    assert_eq!(counts, vec![1, 2, 3, 0]);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, 4);
    assert!(published[0].1.valid);
}

#[test]
fn not_ready_never_publishes() {
    let backend = StubBackend::new(vec![]);
    let mut poll = SensorPollLoop::initialize(&backend, &config()).unwrap();

    let mut calls = 0;
    for _ in 0..50 {
        assert_eq!(poll.tick(&mut |_: &ImuReading| calls += 1), TickOutcome::NotReady);
    }
    assert_eq!(calls, 0);
    assert_eq!(poll.error_count(), 0);
}

#[test]
fn invalid_readings_never_reach_the_publisher() {
    let backend = StubBackend::new(vec![Step::Invalid, Step::Good, Step::Invalid]);
    let mut poll = SensorPollLoop::initialize(&backend, &config()).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        poll.tick(&mut |r: &ImuReading| seen.push(r.valid));
    }
    assert_eq!(seen, vec![true]);
    assert_eq!(poll.stats().invalid, 2);
}

#[test]
fn publish_count_matches_successful_polls() {
    let steps = vec![
        Step::Good,
        Step::NotReady,
        Step::Fault,
        Step::Good,
        Step::Invalid,
        Step::Fault,
        Step::Fault,
        Step::Good,
    ];
    let expected_counts = [0, 0, 1, 0, 0, 1, 2, 0];
    let backend = StubBackend::new(steps.clone());
    let mut poll = SensorPollLoop::initialize(&backend, &config()).unwrap();

    let mut calls = 0;
    for expected in expected_counts {
        poll.tick(&mut |_: &ImuReading| calls += 1);
        assert_eq!(poll.error_count(), expected);
    }
    let good = steps.iter().filter(|s| matches!(s, Step::Good)).count();
    assert_eq!(calls, good);
}

#[test]
fn missing_device_reports_no_device_found() {
    let mut backend = StubBackend::new(vec![Step::Good]);
    backend.present = false;

    match SensorPollLoop::initialize(&backend, &config()) {
        Err(InitError::NoDeviceFound { device }) => assert_eq!(device, "/dev/ttyACM0"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("initialize must fail without a device"),
    }
    assert_eq!(backend.log.borrow().created, 0);
}

#[test]
fn null_imu_type_is_no_device_and_is_released() {
    let mut backend = StubBackend::new(vec![Step::Good]);
    backend.kind = ImuType::Null;

    let result = DriverHandle::open(&backend, &DriverSettings::default(), &FusionOptions::default());
    assert!(matches!(result, Err(InitError::NoDeviceFound { .. })));
    let log = backend.log.borrow();
    assert_eq!(log.created, 1);
    assert_eq!(log.configured, 0);
    assert_eq!(log.closed, 1);
}

#[test]
fn rejected_configuration_releases_the_driver() {
    let mut backend = StubBackend::new(vec![Step::Good]);
    backend.fail_configure = true;

    let result = SensorPollLoop::initialize(&backend, &config());
    assert!(matches!(result, Err(InitError::Configuration(_))));
    assert_eq!(backend.log.borrow().closed, 1);
}

#[test]
fn invalid_rate_fails_before_touching_hardware() {
    let backend = StubBackend::new(vec![]);
    let bad = NodeConfig {
        rate: 0.0,
        ..NodeConfig::default()
    };

    assert!(matches!(
        SensorPollLoop::initialize(&backend, &bad),
        Err(InitError::InvalidConfig(_))
    ));
    assert_eq!(backend.log.borrow().created, 0);
}

#[test]
fn run_releases_driver_once_on_stop() {
    let backend = StubBackend::new(vec![Step::Good; 10]);
    let poll = SensorPollLoop::initialize(&backend, &config()).unwrap();
    let flag = RunFlag::new();
    let stopper = flag.clone();

    let mut published = 0;
    let stats = poll.run(
        &mut |_: &ImuReading| {
            published += 1;
            if published == 3 {
                stopper.stop();
            }
        },
        &flag,
    );

    assert_eq!(stats.published, 3);
    assert_eq!(stats.ticks, 3);
    assert_eq!(backend.log.borrow().closed, 1);
}

#[test]
fn simulated_backend_runs_end_to_end() {
    let backend = SimulatedBackend::default().with_sample_interval(Duration::from_millis(1));
    let poll = SensorPollLoop::initialize(&backend, &config()).unwrap();
    let flag = RunFlag::new();
    let stopper = flag.clone();

    let mut stamps = Vec::new();
    let stats = poll.run(
        &mut |r: &ImuReading| {
            stamps.push(r.timestamp);
            if stamps.len() == 5 {
                stopper.stop();
            }
        },
        &flag,
    );

    assert_eq!(stats.published, 5);
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn simulated_absent_device_is_fatal() {
    let result = SensorPollLoop::initialize(&SimulatedBackend::absent(), &config());
    assert!(matches!(result, Err(InitError::NoDeviceFound { .. })));
}
