use std::time::Duration;

use cogloop_core::{
    AnyTrigger, Fast, Graphics, QuitOrigin, ReadoutKey, ReadoutSet, StateError, StimulusSet,
    TimerKey, TimerSet, TrialShared, TrialView, TriggerKey,
};
use serde_json::Value;

use super::machine::Cursor;
use super::Loop;
use crate::device::DeviceRegistry;

/// What a state body sees during one iteration of loop `L`.
///
/// Writes to shared fields only accept keys owned by `L`. Device access and
/// response capture exist only for [`Fast`], stimuli only for [`Graphics`].
pub struct StateContext<'a, L: Loop> {
    pub(crate) shared: &'a TrialShared,
    pub(crate) token: &'a cogloop_core::LoopToken<L>,
    pub(crate) cursor: &'a mut Cursor,
    pub(crate) resources: &'a mut L::Resources,
    pub(crate) leaving: bool,
}

impl<L: Loop> StateContext<'_, L> {
    pub fn state(&self) -> &str {
        &self.cursor.current
    }

    pub fn elapsed_in_state(&self) -> Duration {
        self.cursor.entered_at.elapsed()
    }

    /// `true` the first time `label` is reached during this entry into the state.
    pub fn singleshot(&mut self, label: &str) -> bool {
        self.cursor.scope.fire(label)
    }

    /// The gate opened this iteration; the machine leaves after the body returns.
    pub fn leaving(&self) -> bool {
        self.leaving
    }

    /// Leave to the declared next state after this body, gate or not.
    pub fn move_on(&mut self) {
        self.cursor.request_next = true;
    }

    /// Leave to `target` after this body, bypassing the gate.
    pub fn force_advance(&mut self, target: &str) {
        self.cursor.next.clear();
        self.cursor.next.push_str(target);
    }

    /// Overrides the deadline for the rest of this visit.
    pub fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.cursor.deadline = Some(deadline);
    }

    /// Records `event` at the current time into the trial's timestamps.
    pub fn stamp(&mut self, event: &str) {
        let at = self.shared.since_origin();
        self.cursor.trace.push((event.to_string(), at));
    }

    pub fn trial(&self) -> &TrialView {
        &self.shared.trial
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.shared.trial.param(name)
    }

    pub fn shared(&self) -> &TrialShared {
        self.shared
    }

    pub fn resources(&mut self) -> &mut L::Resources {
        self.resources
    }

    pub fn trigger(&self, name: &str) -> Result<bool, StateError> {
        self.shared.triggers.get(name)
    }

    pub fn trigger_value(&self, trigger: impl Into<AnyTrigger>) -> bool {
        self.shared.triggers.value(trigger)
    }

    pub fn set_trigger(&self, key: TriggerKey<L>, value: bool) {
        self.shared.triggers.set(self.token, key, value);
    }

    pub fn raise(&self, key: TriggerKey<L>) {
        self.set_trigger(key, true);
    }

    pub fn timers(&self) -> &TimerSet {
        &self.shared.timers
    }

    pub fn start_timer(&self, key: TimerKey<L>) {
        self.shared.timers.start(self.token, key);
    }

    pub fn stop_timer(&self, key: TimerKey<L>) {
        self.shared.timers.stop(self.token, key);
    }

    pub fn reset_timer(&self, key: TimerKey<L>) {
        self.shared.timers.reset(self.token, key);
    }

    /// Stops every running timer this loop owns.
    pub fn stop_own_timers(&self) -> usize {
        self.shared.timers.stop_owned(self.token)
    }

    pub fn readouts(&self) -> &ReadoutSet {
        &self.shared.readouts
    }

    pub fn store(&self, key: ReadoutKey<L>, value: f64) {
        self.shared.readouts.store(self.token, key, value);
    }

    /// Ends the session after both loops reach `end`.
    pub fn request_quit(&self) {
        if self.shared.quit().request(QuitOrigin::Loop(L::KIND)) {
            log::info!("[{}] quit requested in `{}`", L::KIND, self.cursor.current);
        }
    }
}

impl StateContext<'_, Fast> {
    pub fn devices(&mut self) -> &mut DeviceRegistry {
        &mut self.resources.devices
    }

    /// Stores the trial's response. Only the first capture counts.
    pub fn capture_response(&mut self, value: Value) -> bool {
        let captured = self.shared.trial.response.capture(self.token, value);
        if captured {
            self.stamp("response");
        }
        captured
    }

    /// Invalidates the trial and sends both machines to `end`. The session goes on.
    pub fn abort_trial(&mut self, reason: &str) {
        log::warn!("trial {} aborted in `{}`: {reason}", self.shared.trial.id, self.cursor.current);
        self.shared.abort(self.token);
    }

    /// Adds a value to the trial's persisted data.
    pub fn record(&mut self, key: &str, value: Value) {
        self.resources.data.insert(key.to_string(), value);
    }
}

impl StateContext<'_, Graphics> {
    pub fn stimuli(&mut self) -> &mut StimulusSet {
        &mut self.resources.stimuli
    }

    pub fn show(&mut self, name: &str) -> Result<(), StateError> {
        self.resources.stimuli.show(name)
    }

    pub fn hide(&mut self, name: &str) -> Result<(), StateError> {
        self.resources.stimuli.hide(name)
    }
}
