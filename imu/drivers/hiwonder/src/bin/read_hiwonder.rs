use clap::Parser;
use hiwonder::{
    DriverSettings, FusionOptions, HiwonderBackend, ImuBackend, ImuDriver, ImuFrequency, Vector3,
};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Print fused samples from a Hiwonder IMU")]
struct Args {
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(long, default_value_t = 230400)]
    baud_rate: u32,

    #[arg(long, default_value = "200hz")]
    frequency: ImuFrequency,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = DriverSettings {
        device: args.port.clone(),
        baud_rate: args.baud_rate,
    };

    let mut driver = HiwonderBackend::default()
        .create_imu(&settings)?
        .ok_or_else(|| format!("No Hiwonder IMU found on {}", args.port))?;

    driver.configure(&FusionOptions {
        frequency: Some(args.frequency),
        ..FusionOptions::default()
    })?;
    info!("Set frequency to {}", args.frequency);

    loop {
        match driver.latest_sample() {
            Ok(Some(sample)) => {
                let accel = sample.accelerometer.unwrap_or_default();
                let gyro = sample.gyroscope.unwrap_or_default();
                let angle = sample.euler.unwrap_or_default();
                let quaternion = sample.quaternion.unwrap_or_default();

                // Computes projected gravity from the quaternion.
                let gravity = quaternion.conjugate().rotate(Vector3::new(0.0, 0.0, -1.0));

                println!(
                    "acc:   x: {: >10.3} y: {: >10.3} z: {: >10.3}\n\
                     gyro:  x: {: >10.3} y: {: >10.3} z: {: >10.3}\n\
                     angle: x: {: >10.3} y: {: >10.3} z: {: >10.3}\n\
                     quaternion: w: {: >10.3} x: {: >10.3} y: {: >10.3} z: {: >10.3}\n\
                     temp:  {: >10.3}\n\
                     gravity: x: {: >10.3} y: {: >10.3} z: {: >10.3}\n",
                    accel.x,
                    accel.y,
                    accel.z,
                    gyro.x,
                    gyro.y,
                    gyro.z,
                    angle.x,
                    angle.y,
                    angle.z,
                    quaternion.w,
                    quaternion.x,
                    quaternion.y,
                    quaternion.z,
                    sample.temperature.unwrap_or(0.0),
                    gravity.x,
                    gravity.y,
                    gravity.z,
                );
            }
            Ok(None) => {}
            Err(e) => error!("Error reading from IMU: {}", e),
        }

        thread::sleep(Duration::from_millis(10));
    }
}
