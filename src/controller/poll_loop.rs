use chrono::{DateTime, Local};
use statum::{machine, state};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::direction::{DirectionCode, RawSample};
use crate::controller::sensor::{IndicatorColor, JoystickSensor, SensorError};
use crate::controller::stabilizer::{ActivityEdge, DirectionStabilizer, StepOutcome};

// One line for the reporter
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionReport {
    pub direction: DirectionCode,
    pub timestamp: DateTime<Local>,
}

// Poll loop errors
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Report channel closed")]
    ReportChannelClosed,

    #[error("Missing state data: {0}")]
    MissingStateData(String),
}

// Define poll loop states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum PollState {
    Sampling,
    Filtering(RawSample),
    Publishing(StepOutcome),
}

#[machine]
#[derive(Debug)]
pub struct PollLoop<S: PollState> {
    // Joystick the samples come from, also drives the LED
    sensor: Box<dyn JoystickSensor>,

    // Only owner of the debounce state
    stabilizer: DirectionStabilizer,

    // Colour shown while an operation is active
    active_color: IndicatorColor,

    // Channel to the line reporter
    report_sender: mpsc::Sender<DirectionReport>,
}

// Implementation of methods available in all states
impl<S: PollState> PollLoop<S> {
    pub fn stabilizer(&self) -> &DirectionStabilizer {
        &self.stabilizer
    }

    fn set_indicator(&mut self, color: IndicatorColor) {
        if let Err(e) = self.sensor.set_indicator(color) {
            warn!("Failed to set indicator to {:?}: {}", color, e);
        }
    }
}

// Implementation for Sampling state
impl PollLoop<Sampling> {
    pub fn create(
        sensor: Box<dyn JoystickSensor>,
        stabilizer: DirectionStabilizer,
        active_color: IndicatorColor,
        report_sender: mpsc::Sender<DirectionReport>,
    ) -> Self {
        debug!("Creating poll loop for {}", sensor.name());
        Self::new(sensor, stabilizer, active_color, report_sender)
    }

    pub fn read_sample(&mut self) -> Result<RawSample, SensorError> {
        self.sensor.sample()
    }

    pub fn begin_filtering(self, sample: RawSample) -> PollLoop<Filtering> {
        debug!("Sampled {:?}", sample);
        self.transition_with(sample)
    }

    // A failed read skips the tick, the stabilizer only ever sees real samples
    pub fn run_cycle(mut self, now: Instant) -> Result<PollLoop<Sampling>, PollError> {
        match self.read_sample() {
            Ok(sample) => self.begin_filtering(sample).filter(now)?.publish(),
            Err(e) => {
                error!("Failed to read joystick, skipping tick: {}", e);
                Ok(self)
            }
        }
    }

    /// Polls every `interval` until `cancel` fires, then switches the
    /// indicator off.
    pub async fn run(
        self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<PollLoop<Sampling>, PollError> {
        info!("Starting poll loop with {}ms interval", interval.as_millis());

        let mut interval_timer = tokio::time::interval(interval);
        interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut machine = self;

        // Stats for performance monitoring
        let mut cycles: u64 = 0;
        let mut changes: u64 = 0;
        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(30);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Poll loop cancelled after {} cycles", cycles);
                    break;
                }
                _ = interval_timer.tick() => {
                    let emitted_before = machine.stabilizer.last_emitted();
                    machine = machine.run_cycle(Instant::now())?;
                    cycles += 1;
                    if machine.stabilizer.last_emitted() != emitted_before {
                        changes += 1;
                    }

                    let now = Local::now();
                    if now - last_stats_time > stats_interval {
                        info!(
                            "Poll loop stats: {} cycles, {} direction changes in {} seconds",
                            cycles,
                            changes,
                            (now - last_stats_time).num_seconds()
                        );
                        cycles = 0;
                        changes = 0;
                        last_stats_time = now;
                    }
                }
            }
        }

        machine.set_indicator(IndicatorColor::Off);
        Ok(machine)
    }
}

// Implementation for Filtering state
impl PollLoop<Filtering> {
    pub fn filter(mut self, now: Instant) -> Result<PollLoop<Publishing>, PollError> {
        let sample = match self.get_state_data() {
            Some(sample) => *sample,
            None => {
                return Err(PollError::MissingStateData(
                    "no sample in filtering state".to_string(),
                ))
            }
        };

        let outcome = self.stabilizer.step(sample, now);
        debug!("Stabilizer outcome: {:?}", outcome);

        Ok(self.transition_with(outcome))
    }
}

// Implementation for Publishing state
impl PollLoop<Publishing> {
    pub fn publish(mut self) -> Result<PollLoop<Sampling>, PollError> {
        let outcome = match self.get_state_data() {
            Some(outcome) => *outcome,
            None => {
                return Err(PollError::MissingStateData(
                    "no outcome in publishing state".to_string(),
                ))
            }
        };

        match outcome.edge {
            Some(ActivityEdge::Started) => {
                info!("Operation started: {}", outcome.tick.raw);
                let color = self.active_color;
                self.set_indicator(color);
            }
            Some(ActivityEdge::Ended) => {
                info!("Operation ended, joystick back at center");
                self.set_indicator(IndicatorColor::Off);
            }
            None => {}
        }

        if let Some(direction) = outcome.report {
            let report = DirectionReport {
                direction,
                timestamp: Local::now(),
            };
            match self.report_sender.try_send(report) {
                Ok(_) => debug!("Report sent: {}", direction),
                Err(mpsc::error::TrySendError::Full(report)) => {
                    warn!("Report channel full, dropping {:?}", report);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!("Report channel closed");
                    return Err(PollError::ReportChannelClosed);
                }
            }
        }

        Ok(self.transition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::stabilizer::StabilizerSettings;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    // Replays a fixed script, repeating the last sample once it runs out
    #[derive(Debug)]
    struct ScriptedSensor {
        script: VecDeque<Option<RawSample>>,
        current: RawSample,
        indicator: Arc<Mutex<Vec<IndicatorColor>>>,
    }

    impl ScriptedSensor {
        fn new(script: Vec<Option<RawSample>>) -> (Self, Arc<Mutex<Vec<IndicatorColor>>>) {
            let indicator = Arc::new(Mutex::new(Vec::new()));
            let sensor = Self {
                script: script.into(),
                current: RawSample::default(),
                indicator: indicator.clone(),
            };
            (sensor, indicator)
        }
    }

    impl JoystickSensor for ScriptedSensor {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn read_button(&mut self) -> Result<bool, SensorError> {
            Ok(self.current.button_pressed)
        }

        fn read_axis_offsets(&mut self) -> Result<(i16, i16), SensorError> {
            Ok((self.current.offset_x, self.current.offset_y))
        }

        fn set_indicator(&mut self, color: IndicatorColor) -> Result<(), SensorError> {
            self.indicator.lock().unwrap().push(color);
            Ok(())
        }

        fn sample(&mut self) -> Result<RawSample, SensorError> {
            match self.script.pop_front() {
                Some(Some(sample)) => {
                    self.current = sample;
                    Ok(sample)
                }
                Some(None) => Err(SensorError::Bus("scripted failure".to_string())),
                None => Ok(self.current),
            }
        }
    }

    const UP: RawSample = RawSample {
        offset_x: 0,
        offset_y: -2000,
        button_pressed: false,
    };
    const CENTER: RawSample = RawSample {
        offset_x: 0,
        offset_y: 0,
        button_pressed: false,
    };

    fn poll_loop(
        script: Vec<Option<RawSample>>,
        capacity: usize,
    ) -> (
        PollLoop<Sampling>,
        mpsc::Receiver<DirectionReport>,
        Arc<Mutex<Vec<IndicatorColor>>>,
    ) {
        let (sensor, indicator) = ScriptedSensor::new(script);
        let stabilizer = DirectionStabilizer::new(StabilizerSettings::default()).unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        let machine = PollLoop::create(Box::new(sensor), stabilizer, IndicatorColor::Blue, tx);
        (machine, rx, indicator)
    }

    fn drive(mut machine: PollLoop<Sampling>, ticks: u64) -> PollLoop<Sampling> {
        let start = Instant::now();
        for tick in 0..ticks {
            machine = machine
                .run_cycle(start + Duration::from_millis(tick * 20))
                .unwrap();
        }
        machine
    }

    fn drain(rx: &mut mpsc::Receiver<DirectionReport>) -> Vec<DirectionCode> {
        let mut out = Vec::new();
        while let Ok(report) = rx.try_recv() {
            out.push(report.direction);
        }
        out
    }

    #[test]
    fn gesture_lights_indicator_once_and_reports_once() {
        let mut script = vec![Some(UP); 6];
        script.extend(vec![Some(CENTER); 6]);
        let (machine, mut rx, indicator) = poll_loop(script, 16);

        let machine = drive(machine, 12);

        assert_eq!(*indicator.lock().unwrap(), [IndicatorColor::Blue, IndicatorColor::Off]);
        assert_eq!(drain(&mut rx), [DirectionCode::Up]);
        assert!(!machine.stabilizer().is_active());
    }

    #[test]
    fn held_direction_repeats_on_heartbeat() {
        let (machine, mut rx, indicator) = poll_loop(vec![Some(UP)], 64);

        // 50 ticks of 20ms with the default 100ms interval
        drive(machine, 50);

        let reports = drain(&mut rx);
        assert!(reports.len() > 1 && reports.len() < 50, "{reports:?}");
        assert!(reports.iter().all(|d| *d == DirectionCode::Up));
        assert_eq!(*indicator.lock().unwrap(), [IndicatorColor::Blue]);
    }

    #[test]
    fn failed_read_skips_tick_without_touching_state() {
        let script = vec![Some(UP), Some(UP), Some(UP), Some(UP), None];
        let (machine, _rx, _indicator) = poll_loop(script, 16);

        let machine = drive(machine, 4);
        assert_eq!(machine.stabilizer().stable_count(), 3);

        let machine = drive(machine, 1);
        assert_eq!(machine.stabilizer().stable_count(), 3);
        assert!(machine.stabilizer().is_active());
    }

    #[test]
    fn full_channel_drops_reports_instead_of_failing() {
        let script = vec![
            Some(UP),
            Some(UP),
            Some(UP),
            Some(UP),
            Some(CENTER),
            Some(CENTER),
            Some(CENTER),
            Some(CENTER),
            Some(CENTER),
            Some(UP),
            Some(UP),
            Some(UP),
        ];
        let (machine, mut rx, _indicator) = poll_loop(script, 1);

        drive(machine, 12);
        assert_eq!(drain(&mut rx), [DirectionCode::Up]);
    }

    #[test]
    fn closed_channel_stops_the_loop() {
        let (machine, rx, _indicator) = poll_loop(vec![Some(UP)], 4);
        drop(rx);

        let mut machine = drive(machine, 3);
        let now = Instant::now();
        let result = loop {
            match machine.run_cycle(now) {
                Ok(next) => machine = next,
                Err(e) => break e,
            }
        };
        assert!(matches!(result, PollError::ReportChannelClosed));
    }

    #[tokio::test]
    async fn run_stops_on_cancel_and_turns_indicator_off() {
        let (machine, mut rx, indicator) = poll_loop(vec![Some(UP)], 256);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let (result, _) = tokio::join!(
            machine.run(Duration::from_millis(1), cancel),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            }
        );

        assert!(result.is_ok());
        assert!(drain(&mut rx).contains(&DirectionCode::Up));
        let indicator = indicator.lock().unwrap();
        assert_eq!(indicator.first(), Some(&IndicatorColor::Blue));
        assert_eq!(indicator.last(), Some(&IndicatorColor::Off));
    }
}
