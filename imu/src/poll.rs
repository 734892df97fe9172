use crate::config::NodeConfig;
use crate::error::{InitError, ReadError};
use crate::publish::Publisher;
use crate::reading::ImuReading;
use imu_traits::{DriverSettings, FusionOptions, ImuBackend, ImuDriver, ImuType};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sole owner of a configured driver. Closing happens exactly once, either
/// through [`DriverHandle::close`] or on drop.
pub struct DriverHandle<D: ImuDriver> {
    driver: D,
    closed: bool,
}

impl<D: ImuDriver> DriverHandle<D> {
    /// Creates and configures a driver. Either the returned handle is ready
    /// to poll or the device has already been released.
    pub fn open<B>(
        backend: &B,
        settings: &DriverSettings,
        options: &FusionOptions,
    ) -> Result<Self, InitError>
    where
        B: ImuBackend<Driver = D>,
    {
        let driver = backend
            .create_imu(settings)
            .map_err(InitError::Driver)?
            .ok_or_else(|| InitError::NoDeviceFound {
                device: settings.device.clone(),
            })?;

        let mut handle = DriverHandle { driver, closed: false };
        if handle.driver.imu_type() == ImuType::Null {
            return Err(InitError::NoDeviceFound {
                device: settings.device.clone(),
            });
        }

        handle
            .driver
            .configure(options)
            .map_err(InitError::Configuration)?;

        info!(
            "Opened {} IMU on {} (gyro={}, accel={}, compass={}, slerp={})",
            handle.driver.imu_type(),
            settings.device,
            options.gyro_enable,
            options.accel_enable,
            options.compass_enable,
            options.slerp_power
        );
        Ok(handle)
    }

    pub fn imu_type(&self) -> ImuType {
        self.driver.imu_type()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.driver.close() {
            Ok(()) => debug!("IMU driver closed"),
            Err(e) => warn!("Error while closing IMU driver: {}", e),
        }
    }
}

impl<D: ImuDriver> Drop for DriverHandle<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Consecutive driver faults since the last successful read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounter {
    consecutive: u32,
}

impl ErrorCounter {
    pub fn get(&self) -> u32 {
        self.consecutive
    }

    pub fn record_fault(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    /// The publisher failed. The reading itself was good.
    PublishFailed,
    NotReady,
    /// The driver produced a sample that did not normalize.
    Invalid,
    Fault { consecutive: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub published: u64,
    pub publish_errors: u64,
    pub not_ready: u64,
    pub invalid: u64,
    pub faults: u64,
    pub missed_deadlines: u64,
    pub elapsed: Duration,
}

/// Shared stop request. Checked between ticks.
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<RwLock<bool>>,
}

impl Default for RunFlag {
    fn default() -> Self {
        RunFlag {
            running: Arc::new(RwLock::new(true)),
        }
    }
}

impl RunFlag {
    pub fn new() -> Self {
        RunFlag::default()
    }

    pub fn stop(&self) {
        match self.running.write() {
            Ok(mut running) => *running = false,
            // A poisoned flag reads as stopped, see `is_running`.
            Err(_) => error!("Run flag poisoned"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.read().map(|guard| *guard).unwrap_or(false)
    }
}

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Published readings per second over fixed reporting windows.
#[derive(Debug, Clone, Copy)]
struct RateMeter {
    window: Duration,
    window_start: Instant,
    published_at_start: u64,
}

impl RateMeter {
    fn new(window: Duration, now: Instant, published: u64) -> Self {
        RateMeter {
            window,
            window_start: now,
            published_at_start: published,
        }
    }

    /// Returns the rate once a window has passed, then starts the next one.
    fn sample(&mut self, now: Instant, published: u64) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let count = published.saturating_sub(self.published_at_start);
        let rate = count as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.published_at_start = published;
        Some(rate)
    }
}

/// Polls one driver at a fixed period and hands valid readings to a publisher.
pub struct SensorPollLoop<D: ImuDriver> {
    handle: DriverHandle<D>,
    errors: ErrorCounter,
    stats: PollStats,
    fault_threshold: u32,
    period: Duration,
    started: Instant,
}

impl<D: ImuDriver> SensorPollLoop<D> {
    /// Opens the device described by `config` and builds a loop around it.
    pub fn initialize<B>(backend: &B, config: &NodeConfig) -> Result<Self, InitError>
    where
        B: ImuBackend<Driver = D>,
    {
        // Validate before touching hardware.
        config.period()?;
        let handle = DriverHandle::open(
            backend,
            &config.driver_settings(),
            &config.fusion_options(),
        )?;
        SensorPollLoop::new(handle, config)
    }

    pub fn new(handle: DriverHandle<D>, config: &NodeConfig) -> Result<Self, InitError> {
        Ok(SensorPollLoop {
            handle,
            errors: ErrorCounter::default(),
            stats: PollStats::default(),
            fault_threshold: config.fault_threshold.max(1),
            period: config.period()?,
            started: Instant::now(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn error_count(&self) -> u32 {
        self.errors.get()
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            elapsed: self.started.elapsed(),
            ..self.stats
        }
    }

    pub fn handle(&self) -> &DriverHandle<D> {
        &self.handle
    }

    /// Requests one fused sample from the driver. `Ok` can still carry a
    /// reading with `valid == false`; only valid readings count as a success.
    pub fn poll_once(&mut self) -> Result<ImuReading, ReadError> {
        let sample = self
            .handle
            .driver_mut()
            .latest_sample()?
            .ok_or(ReadError::NotReady)?;
        Ok(ImuReading::from_sample(&sample, self.started.elapsed()))
    }

    /// One unit of periodic work. Never fails: read errors only move the
    /// error counter and the log.
    pub fn tick<P: Publisher + ?Sized>(&mut self, publisher: &mut P) -> TickOutcome {
        self.stats.ticks += 1;
        match self.poll_once() {
            Ok(reading) => match reading.publishable() {
                Some(reading) => {
                    self.errors.reset();
                    match publisher.publish(reading) {
                        Ok(()) => {
                            self.stats.published += 1;
                            TickOutcome::Published
                        }
                        Err(e) => {
                            self.stats.publish_errors += 1;
                            warn!("Failed to publish IMU reading: {}", e);
                            TickOutcome::PublishFailed
                        }
                    }
                }
                None => {
                    self.stats.invalid += 1;
                    debug!("Skipping invalid IMU sample");
                    TickOutcome::Invalid
                }
            },
            Err(ReadError::NotReady) => {
                self.stats.not_ready += 1;
                TickOutcome::NotReady
            }
            Err(ReadError::DriverFault(e)) => {
                self.stats.faults += 1;
                let consecutive = self.errors.record_fault();
                if consecutive % self.fault_threshold == 0 {
                    error!(
                        "IMU read failed {} times in a row, last error: {}",
                        consecutive, e
                    );
                } else {
                    warn!("IMU read failed ({} in a row): {}", consecutive, e);
                }
                TickOutcome::Fault { consecutive }
            }
        }
    }

    /// Ticks at the configured period until `run_flag` is cleared, then
    /// releases the driver. The flag is only checked between ticks.
    pub fn run<P: Publisher + ?Sized>(mut self, publisher: &mut P, run_flag: &RunFlag) -> PollStats {
        info!("Polling IMU every {:?}", self.period);
        let mut next_time = Instant::now();
        let mut rate = RateMeter::new(RATE_WINDOW, next_time, self.stats.published);

        while run_flag.is_running() {
            self.tick(publisher);
            if let Some(hz) = rate.sample(Instant::now(), self.stats.published) {
                debug!(
                    "{:.1} samples/s, {} faults in a row, {} missed deadlines",
                    hz,
                    self.errors.get(),
                    self.stats.missed_deadlines
                );
            }

            next_time += self.period;
            let now = Instant::now();
            if next_time > now {
                thread::sleep(next_time - now);
            } else {
                self.stats.missed_deadlines += 1;
                debug!("Missed tick deadline by {:?}", now - next_time);
                // Skip the backlog instead of bursting to catch up.
                next_time = now;
            }
        }

        let stats = self.stats();
        self.handle.close();
        info!(
            "Stopped after {} ticks: {} published, {} not ready, {} invalid, {} faults",
            stats.ticks, stats.published, stats.not_ready, stats.invalid, stats.faults
        );
        stats
    }
}
