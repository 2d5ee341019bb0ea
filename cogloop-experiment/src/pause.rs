use std::time::{Duration, Instant};

use crate::config::{PauseConfig, PauseMode};

/// Decides after each trial whether the next one starts with a break.
#[derive(Debug)]
pub struct PauseSchedule {
    config: Option<PauseConfig>,
    last_break: Instant,
    last_counted: usize,
    pending: bool,
    taken: usize,
}

impl PauseSchedule {
    pub fn new(config: Option<PauseConfig>) -> Self {
        Self {
            config,
            last_break: Instant::now(),
            last_counted: 0,
            pending: false,
            taken: 0,
        }
    }

    /// `completed` is the number of trials completed so far in the session.
    ///
    /// A break stays due until [`mark_taken`](Self::mark_taken) is called.
    pub fn after_trial(&mut self, completed: usize) -> bool {
        let Some(config) = &self.config else {
            return false;
        };
        let due = match config.mode {
            PauseMode::Count => {
                let every = config.interval as usize;
                let reached = completed != self.last_counted && completed != 0;
                if reached {
                    self.last_counted = completed;
                }
                reached && completed % every == 0
            }
            PauseMode::Time => {
                self.last_break.elapsed() >= Duration::from_secs_f64(config.interval)
            }
        };
        self.pending |= due;
        self.pending
    }

    pub fn mark_taken(&mut self) {
        self.pending = false;
        self.taken += 1;
        self.last_break = Instant::now();
    }

    pub fn taken(&self) -> usize {
        self.taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mode_breaks_every_fifth_completed_trial() {
        let mut schedule = PauseSchedule::new(Some(PauseConfig {
            mode: PauseMode::Count,
            interval: 5.0,
        }));
        let mut due = Vec::new();
        for n in 1..=16 {
            if schedule.after_trial(n) {
                schedule.mark_taken();
                due.push(n);
            }
        }
        assert_eq!(due, [5, 10, 15]);
    }

    #[test]
    fn count_mode_ignores_trials_that_did_not_complete() {
        let mut schedule = PauseSchedule::new(Some(PauseConfig {
            mode: PauseMode::Count,
            interval: 2.0,
        }));
        assert!(!schedule.after_trial(1));
        assert!(schedule.after_trial(2));
        schedule.mark_taken();
        // an invalidated trial leaves the completed count at 2
        assert!(!schedule.after_trial(2));
    }

    #[test]
    fn due_break_survives_a_trial_that_could_not_take_it() {
        let mut schedule = PauseSchedule::new(Some(PauseConfig {
            mode: PauseMode::Count,
            interval: 5.0,
        }));
        assert!(!schedule.after_trial(4));
        assert!(schedule.after_trial(5));
        // trial 6 ended before reaching the pause state
        assert!(schedule.after_trial(5));
        schedule.mark_taken();
        assert!(!schedule.after_trial(6));
        assert_eq!(schedule.taken(), 1);
    }

    #[test]
    fn time_mode_waits_for_interval() {
        let mut schedule = PauseSchedule::new(Some(PauseConfig {
            mode: PauseMode::Time,
            interval: 0.01,
        }));
        assert!(!schedule.after_trial(1));
        std::thread::sleep(Duration::from_millis(15));
        assert!(schedule.after_trial(2));
        schedule.mark_taken();
        assert!(!schedule.after_trial(3));
        assert_eq!(schedule.taken(), 1);
    }

    #[test]
    fn no_config_never_pauses() {
        let mut schedule = PauseSchedule::new(None);
        assert!((1..100).all(|n| !schedule.after_trial(n)));
    }
}
