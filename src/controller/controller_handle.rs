use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PollConfig, SensorBackend};
use crate::controller::poll_loop::{DirectionReport, PollError, PollLoop, Sampling};
use crate::controller::sensor::{
    GamepadJoystick, IndicatorColor, JoystickSensor, SensorError, UnitJoystick,
};
use crate::controller::stabilizer::{DirectionStabilizer, SettingsError};

// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Sensor error: {0}")]
    SensorError(#[from] SensorError),

    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),

    #[error("Poll loop error: {0}")]
    PollError(#[from] PollError),
}

// Public handle for the complete joystick pipeline
pub struct ControllerHandle {
    poll_loop: PollLoop<Sampling>,
    poll: PollConfig,
}

impl ControllerHandle {
    // Open the configured backend and bring it up
    pub async fn create(
        config: &Config,
    ) -> Result<(Self, mpsc::Receiver<DirectionReport>), ControllerError> {
        info!("Initializing joystick with backend {:?}", config.sensor.backend);

        let sensor: Box<dyn JoystickSensor> = match config.sensor.backend {
            SensorBackend::I2c => Box::new(UnitJoystick::open(
                config.sensor.i2c_bus,
                config.sensor.i2c_address,
            )?),
            SensorBackend::Gamepad => Box::new(GamepadJoystick::open()?),
        };

        Self::with_sensor(sensor, config).await
    }

    pub async fn with_sensor(
        mut sensor: Box<dyn JoystickSensor>,
        config: &Config,
    ) -> Result<(Self, mpsc::Receiver<DirectionReport>), ControllerError> {
        let stabilizer = DirectionStabilizer::new(config.stabilizer.clone())?;

        log_versions(sensor.as_mut());

        // Green flash signals a successful start
        info!("Joystick {} initialized successfully", sensor.name());
        sensor.set_indicator(IndicatorColor::Green)?;
        tokio::time::sleep(config.indicator.startup_flash()).await;
        sensor.set_indicator(IndicatorColor::Off)?;

        let (report_sender, report_receiver) =
            mpsc::channel(config.poll.report_channel_capacity);
        debug!(
            "Created report channel with capacity {}",
            config.poll.report_channel_capacity
        );

        let poll_loop = PollLoop::create(
            sensor,
            stabilizer,
            config.indicator.active_color,
            report_sender,
        );

        Ok((
            Self {
                poll_loop,
                poll: config.poll.clone(),
            },
            report_receiver,
        ))
    }

    // Runs until cancelled; the loop owns all stabilizer state
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        match self.poll_loop.run(self.poll.loop_delay(), cancel).await {
            Ok(_) => {
                info!("Joystick poll loop finished");
                Ok(())
            }
            Err(e) => {
                error!("Joystick poll loop terminated with error: {}", e);
                Err(e.into())
            }
        }
    }
}

fn log_versions(sensor: &mut dyn JoystickSensor) {
    match (sensor.bootloader_version(), sensor.firmware_version()) {
        (Ok(Some(bootloader)), Ok(Some(firmware))) => {
            info!(
                "Bootloader version: {}, Firmware version: {}",
                bootloader, firmware
            );
        }
        (Ok(None), Ok(None)) => debug!("{} does not report versions", sensor.name()),
        (bootloader, firmware) => {
            warn!(
                "Could not read versions: bootloader={:?}, firmware={:?}",
                bootloader, firmware
            );
        }
    }
}
