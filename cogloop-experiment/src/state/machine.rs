use std::time::{Duration, Instant};

use cogloop_core::{LoopToken, SingleShotScope, StateError, TrialShared};

use super::context::StateContext;
use super::table::StateTable;
use super::{END, LOADING, Loop};

/// Result of one `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stay,
    /// A transition is pending and will be applied by the next commit.
    Transition,
    /// `end` ran; the episode is over.
    Finished,
}

/// Per-visit bookkeeping of one machine.
#[derive(Debug)]
pub(crate) struct Cursor {
    pub(crate) current: String,
    pub(crate) next: String,
    pub(crate) entered_at: Instant,
    pub(crate) scope: SingleShotScope,
    pub(crate) deadline: Option<Option<Duration>>,
    pub(crate) request_next: bool,
    pub(crate) move_on_mark: u64,
    pub(crate) trace: Vec<(String, f64)>,
    pub(crate) finished: bool,
}

impl Cursor {
    fn new() -> Self {
        Self {
            current: LOADING.to_string(),
            next: LOADING.to_string(),
            entered_at: Instant::now(),
            scope: SingleShotScope::new(),
            deadline: None,
            request_next: false,
            move_on_mark: 0,
            trace: Vec::new(),
            finished: false,
        }
    }
}

/// One instance of the transition engine.
///
/// Per iteration the owning loop calls [`commit_transition`](Self::commit_transition)
/// and then [`advance`](Self::advance). Only the commit changes the current state.
pub struct StateMachine<L: Loop> {
    table: StateTable<L>,
    cursor: Cursor,
}

impl<L: Loop> StateMachine<L> {
    pub fn new(table: StateTable<L>) -> Self {
        Self {
            table,
            cursor: Cursor::new(),
        }
    }

    pub fn table(&self) -> &StateTable<L> {
        &self.table
    }

    pub fn current(&self) -> &str {
        &self.cursor.current
    }

    pub fn next_state(&self) -> &str {
        &self.cursor.next
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.finished
    }

    /// Starts a new trial in `state`, discarding everything from the previous one.
    pub fn enter(&mut self, state: &str, shared: &TrialShared) -> Result<(), StateError> {
        if !self.table.contains(state) {
            return Err(StateError::UnknownState {
                machine: L::KIND,
                name: state.to_string(),
            });
        }
        self.cursor.current = state.to_string();
        self.cursor.next = state.to_string();
        self.cursor.trace.clear();
        self.cursor.finished = false;
        log::debug!("[{}] trial {} enters at {state}", L::KIND, shared.trial.id);
        self.on_entry(shared);
        Ok(())
    }

    fn on_entry(&mut self, shared: &TrialShared) {
        let cursor = &mut self.cursor;
        cursor.entered_at = Instant::now();
        cursor.scope.reset_singleshot_scope(&cursor.current);
        cursor.deadline = None;
        cursor.request_next = false;
        cursor.move_on_mark = self
            .table
            .get(&cursor.current)
            .and_then(|spec| spec.move_on)
            .map(|t| shared.triggers.raised_count(t))
            .unwrap_or(0);
        cursor
            .trace
            .push((format!("{}.{}", L::KIND, cursor.current), shared.since_origin()));
    }

    /// Applies a pending transition. Returns whether the state changed.
    ///
    /// An unknown target is a [`StateError`]; the machine stays where it was.
    pub fn commit_transition(&mut self, shared: &TrialShared) -> Result<bool, StateError> {
        if self.cursor.next == self.cursor.current {
            return Ok(false);
        }
        if !self.table.contains(&self.cursor.next) {
            let name = std::mem::replace(&mut self.cursor.next, self.cursor.current.clone());
            return Err(StateError::UnknownState {
                machine: L::KIND,
                name,
            });
        }
        log::info!(
            "[{}] {} => {} [start {:.3}s | dur {:.3}s]",
            L::KIND,
            self.cursor.current,
            self.cursor.next,
            shared.since_origin(),
            self.cursor.entered_at.elapsed().as_secs_f64(),
        );
        self.cursor.current.clone_from(&self.cursor.next);
        self.on_entry(shared);
        Ok(true)
    }

    /// Requests `target` regardless of the gate. Takes effect at the next commit.
    pub fn force_advance(&mut self, target: &str) {
        self.cursor.next = target.to_string();
    }

    /// Sends the machine to `end` if the session is quitting or the trial was
    /// aborted. Returns whether it did.
    pub fn observe_quit(&mut self, shared: &TrialShared) -> bool {
        if shared.should_end() && self.cursor.current != END && self.cursor.next != END {
            log::debug!("[{}] quit observed in `{}`", L::KIND, self.cursor.current);
            self.force_advance(END);
            return true;
        }
        false
    }

    /// Whether the current state's gate is open.
    ///
    /// Open when its move-on trigger was raised since entry (or is set and
    /// owned by this loop), or its deadline has passed. A state without a gate
    /// is open unless it holds.
    pub fn go_next(&self, shared: &TrialShared) -> bool {
        let Some(spec) = self.table.get(&self.cursor.current) else {
            return false;
        };
        let mut gated = false;
        if let Some(trigger) = spec.move_on {
            gated = true;
            let triggers = &shared.triggers;
            if triggers.raised_count(trigger) > self.cursor.move_on_mark {
                return true;
            }
            if triggers.schema().owner(trigger) == L::KIND && triggers.value(trigger) {
                return true;
            }
        }
        if let Some(deadline) = self.cursor.deadline.unwrap_or(spec.deadline) {
            gated = true;
            if self.cursor.entered_at.elapsed() >= deadline {
                return true;
            }
        }
        !gated && !spec.hold
    }

    /// Runs the current state's body once and decides whether to leave.
    pub fn advance(
        &mut self,
        shared: &TrialShared,
        token: &LoopToken<L>,
        resources: &mut L::Resources,
    ) -> Result<Step, StateError> {
        if self.cursor.finished {
            return Ok(Step::Finished);
        }
        let leaving = self.go_next(shared);

        if let Some(hook) = self.table.every_iteration.as_mut() {
            let mut ctx = StateContext {
                shared,
                token,
                cursor: &mut self.cursor,
                resources: &mut *resources,
                leaving,
            };
            hook(&mut ctx)?;
        }

        let spec = self
            .table
            .get_mut(&self.cursor.current)
            .ok_or_else(|| StateError::UnknownState {
                machine: L::KIND,
                name: self.cursor.current.clone(),
            })?;
        if let Some(body) = spec.body.as_mut() {
            let mut ctx = StateContext {
                shared,
                token,
                cursor: &mut self.cursor,
                resources,
                leaving,
            };
            body(&mut ctx)?;
        }

        if self.cursor.current == END {
            self.cursor.finished = true;
            return Ok(Step::Finished);
        }
        if self.cursor.next == self.cursor.current && (leaving || self.cursor.request_next) {
            self.cursor.next.clone_from(&spec.next);
        }
        self.cursor.request_next = false;
        Ok(if self.cursor.next != self.cursor.current {
            Step::Transition
        } else {
            Step::Stay
        })
    }

    /// Entry and event timestamps of the current trial.
    pub fn take_trace(&mut self) -> Vec<(String, f64)> {
        std::mem::take(&mut self.cursor.trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRegistry, FileNaming};
    use crate::state::{FastResources, ITI};
    use cogloop_core::{Fast, Graphics, ParameterSet, QuitFlag, QuitOrigin, SharedSchema, Trial};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        shared: TrialShared,
        token: LoopToken<Fast>,
        resources: FastResources,
    }

    fn fixture(schema: &SharedSchema) -> Fixture {
        let trial = Trial::new(1, ParameterSet::new(), false);
        Fixture {
            shared: TrialShared::new(schema, trial.view(), Arc::new(QuitFlag::new())),
            // SAFETY: each test owns its fixture on one thread.
            token: unsafe { LoopToken::mint() },
            resources: FastResources::new(DeviceRegistry::new(FileNaming::new("data", "test"))),
        }
    }

    impl Fixture {
        fn iterate(&mut self, machine: &mut StateMachine<Fast>) -> Step {
            machine.commit_transition(&self.shared).unwrap();
            machine
                .advance(&self.shared, &self.token, &mut self.resources)
                .unwrap()
        }
    }

    #[test]
    fn singleshot_runs_once_per_entry() {
        let fired = Arc::new(AtomicUsize::new(0));
        let iterations = Arc::new(AtomicUsize::new(0));
        let mut table = StateTable::<Fast>::new();
        {
            let (fired, iterations) = (Arc::clone(&fired), Arc::clone(&iterations));
            table
                .add("probe")
                .unwrap()
                .deadline(Some(Duration::from_millis(15)))
                .body(move |ctx| {
                    iterations.fetch_add(1, Ordering::Relaxed);
                    if ctx.singleshot("onset") {
                        fired.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                });
        }
        table.begin_with("probe").unwrap();

        let schema = SharedSchema::new();
        let mut fx = fixture(&schema);
        let mut machine = StateMachine::new(table);
        machine.enter("probe", &fx.shared).unwrap();
        while fx.iterate(&mut machine) == Step::Stay {}

        assert!(iterations.load(Ordering::Relaxed) > 1);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(machine.next_state(), END);

        // a fresh entry fires again
        machine.force_advance(ITI);
        machine.commit_transition(&fx.shared).unwrap();
        machine.force_advance("probe");
        fx.iterate(&mut machine);
        assert_eq!(machine.current(), "probe");
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn force_advance_overrides_closed_gate() {
        let mut schema = SharedSchema::new();
        let never = schema.add_trigger::<Fast>("never", false).unwrap();
        let mut table = StateTable::<Fast>::new();
        table.add("wait").unwrap().move_on(never).then(END);
        table.add("after").unwrap();

        let mut fx = fixture(&schema);
        let mut machine = StateMachine::new(table);
        machine.enter("wait", &fx.shared).unwrap();
        assert_eq!(fx.iterate(&mut machine), Step::Stay);
        assert!(!machine.go_next(&fx.shared));

        machine.force_advance("after");
        assert!(machine.commit_transition(&fx.shared).unwrap());
        assert_eq!(machine.current(), "after");
    }

    #[test]
    fn body_can_force_advance() {
        let mut table = StateTable::<Fast>::new();
        table
            .add("hold")
            .unwrap()
            .hold()
            .body(|ctx| {
                if ctx.elapsed_in_state() >= Duration::from_millis(2) {
                    ctx.force_advance(ITI);
                }
                Ok(())
            });

        let schema = SharedSchema::new();
        let mut fx = fixture(&schema);
        let mut machine = StateMachine::new(table);
        machine.enter("hold", &fx.shared).unwrap();
        while fx.iterate(&mut machine) == Step::Stay {}
        fx.iterate(&mut machine);
        assert_eq!(machine.current(), ITI);
    }

    #[test]
    fn unknown_target_is_a_state_error() {
        let schema = SharedSchema::new();
        let fx = fixture(&schema);
        let mut machine = StateMachine::new(StateTable::<Fast>::new());
        machine.enter(ITI, &fx.shared).unwrap();

        machine.force_advance("nowhere");
        let err = machine.commit_transition(&fx.shared).unwrap_err();
        assert!(matches!(err, StateError::UnknownState { name, .. } if name == "nowhere"));
        assert_eq!(machine.current(), ITI);
        assert!(machine.enter("nowhere", &fx.shared).is_err());
    }

    #[test]
    fn raise_seen_by_edge_even_after_lowering() {
        let mut schema = SharedSchema::new();
        let cue = schema.add_trigger::<Graphics>("cue", false).unwrap();
        let mut table = StateTable::<Fast>::new();
        table.add("wait").unwrap().move_on(cue);

        let mut fx = fixture(&schema);
        let mut machine = StateMachine::new(table);
        machine.enter("wait", &fx.shared).unwrap();
        assert_eq!(fx.iterate(&mut machine), Step::Stay);

        // SAFETY: stands in for the graphics loop; nothing else writes `cue`.
        let graphics = unsafe { LoopToken::<Graphics>::mint() };
        fx.shared.triggers.set(&graphics, cue, true);
        fx.shared.triggers.set(&graphics, cue, false);
        assert_eq!(fx.iterate(&mut machine), Step::Transition);
    }

    #[test]
    fn quit_sends_machine_to_end_which_finishes() {
        let mut table = StateTable::<Fast>::new();
        table.add("forever").unwrap().hold();

        let schema = SharedSchema::new();
        let mut fx = fixture(&schema);
        let mut machine = StateMachine::new(table);
        machine.enter("forever", &fx.shared).unwrap();
        assert_eq!(fx.iterate(&mut machine), Step::Stay);

        fx.shared.quit().request(QuitOrigin::Controller);
        assert!(machine.observe_quit(&fx.shared));
        assert_eq!(fx.iterate(&mut machine), Step::Finished);
        assert!(machine.is_finished());

        let trace: Vec<String> = machine.take_trace().into_iter().map(|(e, _)| e).collect();
        assert!(trace.contains(&"fast.end".to_string()));
        assert!(trace.contains(&"trial_end".to_string()));
    }
}
