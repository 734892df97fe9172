use clap::Parser;
use imu_node::{
    CsvPublisher, DriverKind, Fanout, HiwonderBackend, ImuBackend, ImuTransform, LogPublisher,
    NodeConfig, PollStats, RunFlag, SensorPollLoop, SimulatedBackend, TransformPublisher,
};
use std::error::Error;
use std::fs::File;
use std::process::ExitCode;
use std::thread;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imu_node", about = "Poll a fused IMU and publish its orientation")]
struct Cli {
    #[command(flatten)]
    config: NodeConfig,
}

fn build_publisher(config: &NodeConfig) -> Result<Fanout, Box<dyn Error>> {
    let mut publisher = Fanout::new().with(LogPublisher::new(config.frame_id.clone()));

    if let Some(path) = &config.csv {
        info!("Writing readings to {}", path.display());
        publisher.push(CsvPublisher::<File>::append(path)?);
    }

    if config.broadcast_tf {
        publisher.push(TransformPublisher::new(
            config.parent_frame_id.clone(),
            config.frame_id.clone(),
            |tf: ImuTransform| {
                let [yaw, pitch, roll] = tf.ypr_degrees();
                debug!(
                    "tf {} -> {}: yaw={:.2} pitch={:.2} roll={:.2}",
                    tf.parent_frame, tf.child_frame, yaw, pitch, roll
                );
            },
        ));
    }

    Ok(publisher)
}

fn run_with<B: ImuBackend>(backend: &B, config: &NodeConfig) -> Result<PollStats, Box<dyn Error>> {
    let run_limit = config.run_limit()?;
    let poll_loop = SensorPollLoop::initialize(backend, config)?;
    // Dropping `poll_loop` on error releases the device.
    let mut publisher = build_publisher(config)?;

    let run_flag = RunFlag::new();
    {
        // SIGINT and SIGTERM; the tick in flight finishes first.
        let stopper = run_flag.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            stopper.stop();
        })?;
    }
    if let Some(limit) = run_limit {
        let stopper = run_flag.clone();
        thread::spawn(move || {
            thread::sleep(limit);
            stopper.stop();
        });
    }

    Ok(poll_loop.run(&mut publisher, &run_flag))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Initializing");

    let result = match cli.config.driver {
        DriverKind::Hiwonder => run_with(&HiwonderBackend::default(), &cli.config),
        DriverKind::Sim => run_with(&SimulatedBackend::default(), &cli.config),
    };

    match result {
        Ok(stats) => {
            info!(
                "Done: {} readings published in {:.1}s, {} missed deadlines",
                stats.published,
                stats.elapsed.as_secs_f64(),
                stats.missed_deadlines
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
