//! Two-probe temporal order task on a moving sled.
//!
//! The sled carries the participant while two probes flash above and below
//! fixation; the participant reports which one came first. The fast loop moves
//! the sled, samples its position and reads the button box. The graphics loop
//! only shows and hides stimuli.

use std::collections::BTreeMap;
use std::time::Duration;

use cogloop_core::{
    ConfigError, DeviceError, Fast, Graphics, ReadoutKey, StimulusSet, StimulusType, TimerKey,
    TrialView, TriggerKey, TriggerSchema,
};
use cogloop_experiment::state::{IDLE, PAUSE};
use cogloop_experiment::{Blueprint, Conditions, DeviceRegistry, Experiment, SessionConfig, StateTable};
use serde_json::{Value, json};

use crate::apparatus::{SimulatedButton, SimulatedSled};

pub const SLED: &str = "sled";
pub const BUTTONS: &str = "buttons";

const START: &str = "start";
const FIRST: &str = "first";
const PROBE1: &str = "probe1";
const PROBE_INTERVAL: &str = "probeInterval";
const PROBE2: &str = "probe2";
const LAST: &str = "last";
const RESPONSE: &str = "response";

const FIXATION: &str = "fixation";
const PROMPT: &str = "prompt";

const SCREEN_LATENCY: f64 = 0.050;
const PROBE_DURATION: Duration = Duration::from_millis(50);
const INTER_PROBE: Duration = Duration::from_millis(500);
const PX_PER_M: f64 = 2000.0;
const PROBE_OFFSET_PX: f32 = 120.0;

/// Simulated participant: presses to continue after this long in idle or pause.
const CONTINUE_AFTER: Duration = Duration::from_millis(300);

#[derive(Clone, Copy)]
struct Keys {
    ready: TriggerKey<Fast>,
    answered: TriggerKey<Fast>,
    sled_clock: TimerKey<Fast>,
    response_clock: TimerKey<Fast>,
    viewer: ReadoutKey<Fast>,
}

fn param_f64(trial: &TrialView, name: &str, default: f64) -> f64 {
    trial.param(name).and_then(Value::as_f64).unwrap_or(default)
}

fn param_str<'a>(trial: &'a TrialView, name: &str) -> Option<&'a str> {
    trial.param(name).and_then(Value::as_str)
}

/// Sled movement and probe onset of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SledPlan {
    start: f64,
    finish: f64,
    duration: Duration,
    back_duration: Duration,
    probe_onset: Duration,
}

impl SledPlan {
    fn for_trial(trial: &TrialView) -> Self {
        let side = if param_str(trial, "side") == Some("left") { -1.0 } else { 1.0 };
        let start = side * param_f64(trial, "sledStart", 0.1);
        let secs = |name: &str, default: f64| {
            Duration::from_secs_f64(param_f64(trial, name, default).max(0.0))
        };
        Self {
            start,
            finish: start + side * param_f64(trial, "movDistance", 0.2),
            duration: secs("movDuration", 0.6),
            back_duration: secs("mvtBackDuration", 0.3),
            probe_onset: Duration::from_secs_f64(
                (param_f64(trial, "timing", 0.2) - SCREEN_LATENCY).max(0.0),
            ),
        }
    }
}

pub struct ProbeExperiment {
    reaction: Duration,
}

impl ProbeExperiment {
    pub fn new(reaction: Duration) -> Self {
        Self { reaction }
    }

    /// Conditions used when no condition file is given.
    pub fn default_conditions() -> Conditions {
        let mut factors = BTreeMap::new();
        factors.insert("first".to_string(), vec![json!("top"), json!("bottom")]);
        factors.insert("side".to_string(), vec![json!("left"), json!("right")]);
        factors.insert("timing".to_string(), vec![json!(0.2), json!(0.4)]);
        Conditions {
            factors,
            repetition: 2,
            randomize: true,
        }
    }

    fn build_fast(table: &mut StateTable<Fast>, keys: Keys) -> Result<(), ConfigError> {
        table.every_iteration(move |ctx| {
            if let Some(sled) = ctx.devices().get::<SimulatedSled>(SLED) {
                let x = sled.position();
                ctx.store(keys.viewer, x);
            }
            let waiting = ctx.state() == IDLE || ctx.state() == PAUSE;
            let move_on = TriggerSchema::move_on();
            if waiting && ctx.elapsed_in_state() >= CONTINUE_AFTER && !ctx.trigger_value(move_on) {
                ctx.raise(move_on);
            }
            Ok(())
        });

        table.add(START)?.hold().then(FIRST).body(move |ctx| {
            let plan = SledPlan::for_trial(ctx.trial());
            let homing = ctx.singleshot("home");
            let homed = match ctx.devices().get_mut::<SimulatedSled>(SLED) {
                Some(sled) => {
                    if homing {
                        sled.move_to(plan.start, plan.back_duration);
                    }
                    sled.is_at(plan.start)
                }
                None => true,
            };
            if homed {
                ctx.raise(keys.ready);
                ctx.move_on();
            }
            Ok(())
        });

        table
            .add(FIRST)?
            .then(PROBE1)
            .deadline(Some(Duration::from_secs(1)))
            .body(move |ctx| {
                if ctx.singleshot("sled_start") {
                    let plan = SledPlan::for_trial(ctx.trial());
                    ctx.set_deadline(Some(plan.probe_onset));
                    ctx.start_timer(keys.sled_clock);
                    if let Some(sled) = ctx.devices().get_mut::<SimulatedSled>(SLED) {
                        sled.move_to(plan.finish, plan.duration);
                    }
                }
                Ok(())
            });

        for (state, next, deadline) in [
            (PROBE1, PROBE_INTERVAL, PROBE_DURATION),
            (PROBE_INTERVAL, PROBE2, INTER_PROBE),
            (PROBE2, LAST, PROBE_DURATION),
            (LAST, RESPONSE, Duration::ZERO),
        ] {
            table.add(state)?.then(next).deadline(Some(deadline));
        }
        for probe in [PROBE1, PROBE2] {
            table.on(probe, move |ctx| {
                if ctx.singleshot(probe) {
                    let x = ctx.readouts().load(keys.viewer);
                    let t = ctx.timers().elapsed(keys.sled_clock).as_secs_f64();
                    ctx.record(&format!("sled_{probe}"), json!(x));
                    ctx.record(&format!("time_{probe}"), json!(t));
                }
                Ok(())
            })?;
        }

        table.add(RESPONSE)?.hold().body(move |ctx| {
            if ctx.singleshot("arm") {
                ctx.start_timer(keys.response_clock);
                match ctx.devices().get_mut::<SimulatedButton>(BUTTONS) {
                    Some(button) => button.arm(),
                    None => {
                        log::warn!("no response device, trial {} cannot be answered", ctx.trial().id);
                        ctx.move_on();
                        return Ok(());
                    }
                }
            }
            let pressed = ctx
                .devices()
                .get_mut::<SimulatedButton>(BUTTONS)
                .and_then(SimulatedButton::poll_press);
            if let Some(answer) = pressed {
                ctx.stop_timer(keys.response_clock);
                let rt = ctx.timers().elapsed(keys.response_clock);
                let correct = param_str(ctx.trial(), "first") == Some(answer);
                ctx.record("responseDuration", json!(rt.as_millis() as u64));
                ctx.record("correct", json!(correct));
                ctx.capture_response(json!(answer));
                ctx.raise(keys.answered);
                ctx.move_on();
            }
            Ok(())
        });

        table.begin_with(START)
    }

    fn build_graphics(table: &mut StateTable<Graphics>, keys: Keys) -> Result<(), ConfigError> {
        // Fixation is body-fixed: it follows the sled.
        table.every_iteration(move |ctx| {
            if ctx.trigger_value(TriggerSchema::start()) && ctx.stimuli().get(FIXATION).is_some() {
                let x = ctx.readouts().load(keys.viewer);
                ctx.stimuli()
                    .set_position(FIXATION, ((x * PX_PER_M) as f32, 0.0))?;
            }
            Ok(())
        });

        table.add(START)?.hold().then(FIRST).body(move |ctx| {
            if ctx.singleshot("fixation") {
                ctx.show(FIXATION)?;
            }
            if ctx.trigger_value(keys.ready) {
                ctx.move_on();
            }
            Ok(())
        });

        table
            .add(FIRST)?
            .then(PROBE1)
            .deadline(Some(Duration::from_secs(1)))
            .body(|ctx| {
                if ctx.singleshot("onset") {
                    let plan = SledPlan::for_trial(ctx.trial());
                    ctx.set_deadline(Some(plan.probe_onset));
                }
                Ok(())
            });

        table
            .add(PROBE1)?
            .then(PROBE_INTERVAL)
            .deadline(Some(PROBE_DURATION))
            .body(|ctx| {
                if ctx.singleshot("show") {
                    ctx.show(PROBE1)?;
                }
                Ok(())
            });
        table
            .add(PROBE_INTERVAL)?
            .then(PROBE2)
            .deadline(Some(INTER_PROBE))
            .body(|ctx| {
                if ctx.singleshot("hide") {
                    ctx.hide(PROBE1)?;
                }
                Ok(())
            });
        table
            .add(PROBE2)?
            .then(LAST)
            .deadline(Some(PROBE_DURATION))
            .body(|ctx| {
                if ctx.singleshot("show") {
                    ctx.show(PROBE2)?;
                }
                Ok(())
            });
        table
            .add(LAST)?
            .then(RESPONSE)
            .deadline(Some(Duration::ZERO))
            .body(|ctx| {
                if ctx.singleshot("hide") {
                    ctx.hide(PROBE2)?;
                }
                Ok(())
            });

        table.add(RESPONSE)?.hold().body(move |ctx| {
            if ctx.singleshot("prompt") {
                ctx.show(PROMPT)?;
            }
            if ctx.trigger_value(keys.answered) {
                ctx.hide(PROMPT)?;
                ctx.move_on();
            }
            Ok(())
        });

        table.begin_with(START)
    }
}

impl Experiment for ProbeExperiment {
    fn name(&self) -> &str {
        "probe"
    }

    fn build(&self, blueprint: &mut Blueprint) -> Result<(), ConfigError> {
        let schema = &mut blueprint.schema;
        let keys = Keys {
            ready: schema.add_trigger::<Fast>("sledReady", false)?,
            answered: schema.add_trigger::<Fast>("responseGiven", false)?,
            sled_clock: schema.add_timer::<Fast>("sledStart")?,
            response_clock: schema.add_timer::<Fast>("responseDuration")?,
            viewer: schema.add_readout::<Fast>("viewerX", 0.0)?,
        };
        Self::build_fast(&mut blueprint.fast, keys)?;
        Self::build_graphics(&mut blueprint.graphics, keys)
    }

    fn init_devices(
        &self,
        config: &SessionConfig,
        devices: &mut DeviceRegistry,
    ) -> Result<(), DeviceError> {
        let sled = config.device(SLED);
        if sled.enabled {
            if !sled.dummy {
                return Err(DeviceError::failed(SLED, "open", "no sled driver available"));
            }
            devices.register(SLED, Box::new(SimulatedSled::new()), sled.required)?;
        }
        let buttons = config.device(BUTTONS);
        if buttons.enabled {
            if !buttons.dummy {
                return Err(DeviceError::failed(BUTTONS, "open", "no button box driver available"));
            }
            let button = SimulatedButton::new(self.reaction, ["top", "bottom"]);
            devices.register(BUTTONS, Box::new(button), buttons.required)?;
        }
        Ok(())
    }

    fn init_stimuli(&self, trial: &TrialView, stimuli: &mut StimulusSet) {
        let (y1, y2) = if param_str(trial, "first") == Some("bottom") {
            (PROBE_OFFSET_PX, -PROBE_OFFSET_PX)
        } else {
            (-PROBE_OFFSET_PX, PROBE_OFFSET_PX)
        };
        let grey = [77, 77, 77, 255];
        stimuli.insert(
            FIXATION,
            StimulusType::Cross {
                size: 20.0,
                thickness: 2.0,
                color: [255, 255, 255, 255],
            },
            (0.0, 0.0),
        );
        for (name, y) in [(PROBE1, y1), (PROBE2, y2)] {
            stimuli.insert(name, StimulusType::Circle { radius: 8.0, color: grey }, (0.0, y));
        }
        stimuli.insert(
            PROMPT,
            StimulusType::text("Which probe came first? top / bottom"),
            (0.0, 200.0),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cogloop_core::{ParameterSet, ResponseSlot};

    fn view(params: Value) -> TrialView {
        let parameters: ParameterSet = serde_json::from_value(params).unwrap();
        TrialView {
            id: 1,
            parameters: Arc::new(parameters),
            response: Arc::new(ResponseSlot::new()),
            replayed: false,
        }
    }

    #[test]
    fn sled_plan_follows_side() {
        let plan = SledPlan::for_trial(&view(json!({"side": "left", "timing": 0.25})));
        assert_eq!(plan.start, -0.1);
        assert!((plan.finish + 0.3).abs() < 1e-9);
        assert!((plan.probe_onset.as_secs_f64() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn probe_onset_never_negative() {
        let plan = SledPlan::for_trial(&view(json!({"timing": 0.0})));
        assert_eq!(plan.probe_onset, Duration::ZERO);
    }

    #[test]
    fn blueprint_validates() {
        let mut blueprint = Blueprint::new();
        ProbeExperiment::new(Duration::from_millis(100))
            .build(&mut blueprint)
            .unwrap();
        blueprint.validate().unwrap();
        assert!(blueprint.fast.contains(RESPONSE));
        assert_eq!(blueprint.graphics.get(PROBE1).unwrap().next_state(), PROBE_INTERVAL);
    }

    #[test]
    fn stimuli_order_puts_first_probe_on_top_by_default() {
        let mut stimuli = StimulusSet::new();
        let exp = ProbeExperiment::new(Duration::ZERO);
        exp.init_stimuli(&view(json!({"first": "top"})), &mut stimuli);
        assert_eq!(stimuli.get(PROBE1).unwrap().position, (0.0, -PROBE_OFFSET_PX));
        assert_eq!(stimuli.len(), 4);
    }
}
