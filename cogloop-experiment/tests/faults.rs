use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cogloop_core::{
    ConfigError, DeviceError, Display, DisplayError, Graphics, LoopKind, ParameterSet, Stimulus,
    TrialStatus,
};
use cogloop_experiment::{
    Blueprint, Conditions, Constant, Device, DeviceRegistry, Experiment, LoopFault, MemoryWriter,
    Session, SessionConfig, SessionError, StateTable,
};
use serde_json::json;

const RESPOND: &str = "respond";

struct SleepDisplay {
    presented: Arc<AtomicUsize>,
}

impl Display for SleepDisplay {
    fn refresh_interval(&self) -> Duration {
        Duration::from_millis(2)
    }

    fn draw(&mut self, _name: &str, _stimulus: &Stimulus) -> Result<(), DisplayError> {
        Ok(())
    }

    fn present(&mut self) -> Result<Duration, DisplayError> {
        thread::sleep(self.refresh_interval());
        self.presented.fetch_add(1, Ordering::Relaxed);
        Ok(self.refresh_interval())
    }
}

/// Answers only on replayed trials; the graphics side passes straight through.
struct ReplayOnly;

impl Experiment for ReplayOnly {
    fn name(&self) -> &str {
        "replay"
    }

    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError> {
        blueprint.fast.add(RESPOND)?.hold().body(|ctx| {
            if ctx.trial().replayed {
                ctx.capture_response(json!("late"));
            }
            ctx.move_on();
            Ok(())
        });
        blueprint.graphics.add(RESPOND)?;
        blueprint.fast.begin_with(RESPOND)?;
        blueprint.graphics.begin_with(RESPOND)
    }
}

/// Graphics body panics on the first trial.
struct PanicsInGraphics;

fn graphics_panics(table: &mut StateTable<Graphics>) -> Result<(), ConfigError> {
    table.add(RESPOND)?.body(|ctx| {
        if ctx.trial().id == 1 {
            panic!("stimulus table corrupt");
        }
        Ok(())
    });
    table.begin_with(RESPOND)
}

impl Experiment for PanicsInGraphics {
    fn name(&self) -> &str {
        "panics"
    }

    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError> {
        blueprint.fast.add(RESPOND)?.hold();
        blueprint.fast.begin_with(RESPOND)?;
        graphics_panics(&mut blueprint.graphics)
    }
}

/// Required device whose polling fails once the trial runs.
struct LosesConnection {
    closes: Arc<AtomicUsize>,
}

impl Device for LosesConnection {
    fn start_trial(&mut self, _trial_id: u64, _parameters: &ParameterSet) -> Result<(), DeviceError> {
        Ok(())
    }

    fn stop_trial(&mut self, _trial_id: u64, _is_valid: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::failed("tracker", "poll", "connection lost"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct PollFails {
    closes: Arc<AtomicUsize>,
}

impl Experiment for PollFails {
    fn name(&self) -> &str {
        "pollfails"
    }

    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError> {
        // Would wait forever without the abort.
        blueprint.fast.add(RESPOND)?.hold();
        blueprint.graphics.add(RESPOND)?.hold();
        blueprint.fast.begin_with(RESPOND)?;
        blueprint.graphics.begin_with(RESPOND)
    }

    fn init_devices(
        &self,
        _config: &SessionConfig,
        devices: &mut DeviceRegistry,
    ) -> Result<(), DeviceError> {
        let device = LosesConnection {
            closes: Arc::clone(&self.closes),
        };
        devices.register("tracker", Box::new(device), true)
    }
}

fn config(replay_invalid: bool) -> SessionConfig {
    let mut durations = BTreeMap::new();
    durations.insert("idle".to_string(), Some(0.0));
    SessionConfig {
        participant: "p01".into(),
        experiment: "faults".into(),
        durations,
        replay_invalid,
        ..SessionConfig::default()
    }
}

fn two_trials() -> Box<Constant> {
    let mut factors = BTreeMap::new();
    factors.insert("side".to_string(), vec![json!("left"), json!("right")]);
    Box::new(Constant::new(&Conditions {
        factors,
        repetition: 1,
        randomize: false,
    }))
}

fn run(
    config: SessionConfig,
    experiment: impl Experiment + 'static,
) -> (Result<cogloop_experiment::SessionSummary, SessionError>, MemoryWriter, usize) {
    let writer = MemoryWriter::new();
    let presented = Arc::new(AtomicUsize::new(0));
    let display = SleepDisplay {
        presented: Arc::clone(&presented),
    };
    let session = Session::new(
        config,
        Arc::new(experiment),
        two_trials(),
        Box::new(display),
        Box::new(writer.clone()),
    )
    .unwrap();
    let result = session.run();
    (result, writer, presented.load(Ordering::Relaxed))
}

#[test]
fn invalid_trials_are_replayed_after_the_regular_list() {
    let (result, writer, frames) = run(config(true), ReplayOnly);
    let summary = result.unwrap();
    assert_eq!(summary.trials, 4);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.replayed, 2);
    assert!(frames > 0);

    let records = writer.records();
    let statuses: Vec<_> = records.iter().map(|r| (r.id, r.status, r.replayed)).collect();
    assert_eq!(
        statuses,
        [
            (1, TrialStatus::Invalidated, false),
            (2, TrialStatus::Invalidated, false),
            (3, TrialStatus::Completed, true),
            (4, TrialStatus::Completed, true),
        ]
    );
    assert_eq!(records[2].parameters["side"], json!("left"));
}

#[test]
fn without_replay_invalid_trials_stay_invalid() {
    let (result, writer, _) = run(config(false), ReplayOnly);
    let summary = result.unwrap();
    assert_eq!(summary.trials, 2);
    assert_eq!(summary.invalidated, 2);
    assert_eq!(writer.records().len(), 2);
}

#[test]
fn panic_in_a_body_ends_the_session_with_a_loop_fault() {
    let (result, writer, _) = run(config(true), PanicsInGraphics);
    match result {
        Err(SessionError::Loop {
            trial: 1,
            fault: LoopFault::Panicked(LoopKind::Graphics, message),
        }) => assert!(message.contains("stimulus table corrupt")),
        other => panic!("unexpected result: {other:?}"),
    }

    // The faulted trial is still persisted, and never replayed.
    let records = writer.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TrialStatus::Invalidated);
    assert!(records[0].timestamps.contains_key("fast.end"));
    assert!(records[0].timestamps.contains_key("graphics.end"));
}

#[test]
fn required_device_lost_mid_trial_aborts_only_that_trial() {
    let closes = Arc::new(AtomicUsize::new(0));
    let experiment = PollFails {
        closes: Arc::clone(&closes),
    };
    let (result, writer, _) = run(config(false), experiment);
    let summary = result.unwrap();

    assert!(!summary.quit);
    assert_eq!(summary.trials, 2);
    assert_eq!(summary.invalidated, 2);
    for record in writer.records() {
        assert_eq!(record.status, TrialStatus::Invalidated);
        assert!(record.timestamps.contains_key("graphics.end"));
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
