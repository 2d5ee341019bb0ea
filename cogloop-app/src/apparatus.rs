//! Simulated apparatus for running the demo without hardware.

use std::any::Any;
use std::time::Duration;

use cogloop_core::{DeviceError, ParameterSet};
use cogloop_experiment::Device;
use cogloop_timing::Stopwatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Position tolerance, in metres, for "the sled is there".
const AT_POSITION: f64 = 0.01;

/// Linear guide carrying the participant along one axis.
#[derive(Debug)]
pub struct SimulatedSled {
    position: f64,
    from: f64,
    to: f64,
    duration: Duration,
    clock: Stopwatch,
}

impl SimulatedSled {
    pub fn new() -> Self {
        Self {
            position: 0.0,
            from: 0.0,
            to: 0.0,
            duration: Duration::ZERO,
            clock: Stopwatch::new(),
        }
    }

    /// Starts a movement from the current position to `target`.
    pub fn move_to(&mut self, target: f64, duration: Duration) {
        log::debug!("sled: {:.3} -> {:.3} in {:?}", self.position, target, duration);
        self.from = self.position;
        self.to = target;
        self.duration = duration;
        self.clock.reset();
        if duration.is_zero() {
            self.position = target;
        } else {
            self.clock.start();
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_moving(&self) -> bool {
        self.clock.is_running()
    }

    pub fn is_at(&self, target: f64) -> bool {
        !self.is_moving() && (self.position - target).abs() <= AT_POSITION
    }
}

impl Default for SimulatedSled {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimulatedSled {
    fn start_trial(&mut self, trial_id: u64, _parameters: &ParameterSet) -> Result<(), DeviceError> {
        log::trace!("sled: trial {trial_id} at {:.3}", self.position);
        Ok(())
    }

    fn stop_trial(&mut self, _trial_id: u64, _is_valid: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.clock.stop();
        self.position = 0.0;
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        if !self.clock.is_running() {
            return Ok(());
        }
        let t = self.clock.elapsed().as_secs_f64() / self.duration.as_secs_f64();
        if t >= 1.0 {
            self.clock.stop();
            self.position = self.to;
        } else {
            self.position = self.from + (self.to - self.from) * t;
        }
        Ok(())
    }

    fn dummy_mode(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Two-button response box pressed by a simulated participant.
#[derive(Debug)]
pub struct SimulatedButton {
    reaction: Duration,
    armed: Stopwatch,
    choices: [&'static str; 2],
    rng: StdRng,
}

impl SimulatedButton {
    pub fn new(reaction: Duration, choices: [&'static str; 2]) -> Self {
        Self::with_rng(reaction, choices, StdRng::from_os_rng())
    }

    pub fn with_rng(reaction: Duration, choices: [&'static str; 2], rng: StdRng) -> Self {
        Self {
            reaction,
            armed: Stopwatch::new(),
            choices,
            rng,
        }
    }

    /// Starts waiting for a press.
    pub fn arm(&mut self) {
        self.armed.reset();
        self.armed.start();
    }

    /// The button pressed once the reaction time has passed since `arm`.
    pub fn poll_press(&mut self) -> Option<&'static str> {
        if !self.armed.is_running() || self.armed.elapsed() < self.reaction {
            return None;
        }
        self.armed.stop();
        let i = self.rng.random_range(0..self.choices.len());
        Some(self.choices[i])
    }
}

impl Device for SimulatedButton {
    fn start_trial(&mut self, _trial_id: u64, _parameters: &ParameterSet) -> Result<(), DeviceError> {
        self.armed.reset();
        Ok(())
    }

    fn stop_trial(&mut self, _trial_id: u64, _is_valid: bool) -> Result<(), DeviceError> {
        self.armed.stop();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn dummy_mode(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sled_reaches_target_after_duration() {
        let mut sled = SimulatedSled::new();
        sled.move_to(0.2, Duration::from_millis(20));
        sled.poll().unwrap();
        assert!(sled.is_moving());
        assert!(sled.position() < 0.2);

        thread::sleep(Duration::from_millis(30));
        sled.poll().unwrap();
        assert!(sled.is_at(0.2));
    }

    #[test]
    fn instant_move_does_not_run_the_clock() {
        let mut sled = SimulatedSled::new();
        sled.move_to(-0.1, Duration::ZERO);
        assert!(!sled.is_moving());
        assert!(sled.is_at(-0.1));
    }

    #[test]
    fn button_presses_once_per_arm() {
        let rng = StdRng::seed_from_u64(7);
        let mut button = SimulatedButton::with_rng(Duration::ZERO, ["top", "bottom"], rng);
        assert_eq!(button.poll_press(), None);

        button.arm();
        let pressed = button.poll_press().unwrap();
        assert!(pressed == "top" || pressed == "bottom");
        assert_eq!(button.poll_press(), None);
    }
}
