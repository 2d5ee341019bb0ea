//! Runs the fast and graphics machines on two long-lived threads.
//!
//! The threads are spawned once per session. At each trial boundary the
//! controller hands both a job over a channel and waits for both reports;
//! inside a trial the loops only meet through [`TrialShared`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cogloop_core::{
    Display, Fast, FrameSummary, Graphics, LoopKind, LoopToken, QuitOrigin, StateError,
    TrialShared,
};
use cogloop_timing::{HighPrecisionTimer, Timer};
use flume::{Receiver, Sender};

use crate::error::{LoopFault, SessionError};
use crate::state::{END, FastResources, GraphicsResources, Loop, StateMachine, StateTable, Step};

/// How one loop's episode went.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub kind: LoopKind,
    /// State entries and stamped events, seconds since trial start.
    pub trace: Vec<(String, f64)>,
    pub fault: Option<LoopFault>,
    pub reached_end: bool,
    /// The episode was cut short by quit or abort.
    pub forced_end: bool,
    pub iterations: u64,
    pub final_state: String,
    pub frames: Option<FrameSummary>,
}

impl LoopOutcome {
    fn new(kind: LoopKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
            fault: None,
            reached_end: false,
            forced_end: false,
            iterations: 0,
            final_state: String::new(),
            frames: None,
        }
    }
}

/// Reports of both loops plus the devices handed back by the fast loop.
#[derive(Debug)]
pub struct TrialRun {
    pub fast: LoopOutcome,
    pub graphics: LoopOutcome,
    pub resources: FastResources,
}

impl TrialRun {
    pub fn fault(&self) -> Option<&LoopFault> {
        self.fast.fault.as_ref().or(self.graphics.fault.as_ref())
    }

    pub fn forced_end(&self) -> bool {
        self.fast.forced_end || self.graphics.forced_end
    }
}

struct FastJob {
    shared: Arc<TrialShared>,
    entry: String,
    resources: FastResources,
}

struct FastReport {
    outcome: LoopOutcome,
    resources: FastResources,
}

struct GraphicsJob {
    shared: Arc<TrialShared>,
    entry: String,
}

pub struct Coordinator {
    fast_jobs: Option<Sender<FastJob>>,
    fast_reports: Receiver<FastReport>,
    graphics_jobs: Option<Sender<GraphicsJob>>,
    graphics_reports: Receiver<LoopOutcome>,
    handles: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn spawn(
        fast: StateTable<Fast>,
        graphics: StateTable<Graphics>,
        graphics_resources: GraphicsResources,
        display: Box<dyn Display>,
    ) -> Result<Self, SessionError> {
        let (fast_jobs, fast_inbox) = flume::bounded::<FastJob>(1);
        let (fast_outbox, fast_reports) = flume::bounded::<FastReport>(1);
        let (graphics_jobs, graphics_inbox) = flume::bounded::<GraphicsJob>(1);
        let (graphics_outbox, graphics_reports) = flume::bounded::<LoopOutcome>(1);

        let fast_handle = thread::Builder::new()
            .name("fast-loop".into())
            .spawn(move || fast_thread(StateMachine::new(fast), fast_inbox, fast_outbox))
            .map_err(SessionError::Spawn)?;
        let graphics_handle = thread::Builder::new()
            .name("graphics-loop".into())
            .spawn(move || {
                graphics_thread(
                    StateMachine::new(graphics),
                    graphics_resources,
                    display,
                    graphics_inbox,
                    graphics_outbox,
                )
            })
            .map_err(SessionError::Spawn)?;

        Ok(Self {
            fast_jobs: Some(fast_jobs),
            fast_reports,
            graphics_jobs: Some(graphics_jobs),
            graphics_reports,
            handles: vec![fast_handle, graphics_handle],
        })
    }

    /// Runs one trial in both loops, both machines entering at `entry`.
    /// Blocks until both reached `end`.
    pub fn run_trial(
        &mut self,
        shared: Arc<TrialShared>,
        entry: &str,
        resources: FastResources,
    ) -> Result<TrialRun, SessionError> {
        let (Some(fast_jobs), Some(graphics_jobs)) = (&self.fast_jobs, &self.graphics_jobs) else {
            return Err(SessionError::LoopDisconnected(LoopKind::Fast));
        };

        graphics_jobs
            .send(GraphicsJob {
                shared: Arc::clone(&shared),
                entry: entry.to_string(),
            })
            .map_err(|_| SessionError::LoopDisconnected(LoopKind::Graphics))?;
        if fast_jobs
            .send(FastJob {
                shared: Arc::clone(&shared),
                entry: entry.to_string(),
                resources,
            })
            .is_err()
        {
            // let the graphics loop finish its episode before bailing out
            shared.quit().request(QuitOrigin::Controller);
            let _ = self.graphics_reports.recv();
            return Err(SessionError::LoopDisconnected(LoopKind::Fast));
        }

        let fast = self.fast_reports.recv();
        if fast.is_err() {
            shared.quit().request(QuitOrigin::Controller);
        }
        let graphics = self
            .graphics_reports
            .recv()
            .map_err(|_| SessionError::LoopDisconnected(LoopKind::Graphics))?;
        let FastReport { outcome, resources } =
            fast.map_err(|_| SessionError::LoopDisconnected(LoopKind::Fast))?;

        Ok(TrialRun {
            fast: outcome,
            graphics,
            resources,
        })
    }

    /// Closes the job channels and joins both threads.
    pub fn shutdown(&mut self) {
        self.fast_jobs.take();
        self.graphics_jobs.take();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("loop").to_string();
            if handle.join().is_err() {
                log::error!("{name} thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fast_thread(
    mut machine: StateMachine<Fast>,
    jobs: Receiver<FastJob>,
    reports: Sender<FastReport>,
) {
    // SAFETY: this thread is the only fast loop for the session.
    let token = unsafe { LoopToken::<Fast>::mint() };
    while let Ok(FastJob {
        shared,
        entry,
        mut resources,
    }) = jobs.recv()
    {
        let outcome = run_episode(
            &mut machine,
            &shared,
            &token,
            &mut resources,
            &entry,
            |res: &mut FastResources| {
                if let Err(err) = res.devices.poll() {
                    log::error!("trial {}: required {err}", shared.trial.id);
                    shared.abort(&token);
                }
                thread::yield_now();
                Ok(())
            },
        );
        if reports.send(FastReport { outcome, resources }).is_err() {
            break;
        }
    }
    log::debug!("fast loop stopped");
}

fn graphics_thread(
    mut machine: StateMachine<Graphics>,
    mut resources: GraphicsResources,
    mut display: Box<dyn Display>,
    jobs: Receiver<GraphicsJob>,
    reports: Sender<LoopOutcome>,
) {
    // SAFETY: this thread is the only graphics loop for the session.
    let token = unsafe { LoopToken::<Graphics>::mint() };
    let mut frames = HighPrecisionTimer::new();
    while let Ok(GraphicsJob { shared, entry }) = jobs.recv() {
        frames.clear_frames();
        let mut outcome = run_episode(
            &mut machine,
            &shared,
            &token,
            &mut resources,
            &entry,
            |res: &mut GraphicsResources| {
                for (name, stimulus) in res.stimuli.visible() {
                    display.draw(name, stimulus)?;
                }
                let frame = display.present()?;
                frames.record_frame(frame);
                Ok(())
            },
        );
        if frames.frame_count() > 0 {
            outcome.frames = Some(FrameSummary::from(&frames.calibration_stats()));
        }
        if reports.send(outcome).is_err() {
            break;
        }
    }
    log::debug!("graphics loop stopped");
}

/// Drives one machine from `entry` to `end`, running `tail` after every body.
///
/// Faults and panics are contained here: they raise quit so the sibling loop
/// reaches `end`, and this machine still gets one pass through `end`.
fn run_episode<L, T>(
    machine: &mut StateMachine<L>,
    shared: &TrialShared,
    token: &LoopToken<L>,
    resources: &mut L::Resources,
    entry: &str,
    mut tail: T,
) -> LoopOutcome
where
    L: Loop,
    T: FnMut(&mut L::Resources) -> Result<(), LoopFault>,
{
    let mut outcome = LoopOutcome::new(L::KIND);
    let result = catch_unwind(AssertUnwindSafe(|| {
        drive(machine, shared, token, resources, entry, &mut tail, &mut outcome)
    }));
    let fault = match result {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some(fault),
        Err(payload) => Some(LoopFault::Panicked(L::KIND, panic_message(&*payload))),
    };

    if let Some(fault) = &fault {
        log::error!("trial {}: {fault}", shared.trial.id);
        shared.quit().request(QuitOrigin::Loop(L::KIND));
        if !machine.is_finished() {
            let teardown = catch_unwind(AssertUnwindSafe(|| {
                machine.force_advance(END);
                machine.commit_transition(shared)?;
                machine.advance(shared, token, resources)
            }));
            if !matches!(teardown, Ok(Ok(Step::Finished))) {
                log::error!("[{}] could not run `end` after the fault", L::KIND);
            }
        }
        outcome.forced_end = true;
    }

    outcome.fault = fault;
    outcome.reached_end = machine.is_finished();
    outcome.final_state = machine.current().to_string();
    outcome.trace = machine.take_trace();
    outcome
}

fn drive<L, T>(
    machine: &mut StateMachine<L>,
    shared: &TrialShared,
    token: &LoopToken<L>,
    resources: &mut L::Resources,
    entry: &str,
    tail: &mut T,
    outcome: &mut LoopOutcome,
) -> Result<(), LoopFault>
where
    L: Loop,
    T: FnMut(&mut L::Resources) -> Result<(), LoopFault>,
{
    let fault = |err: StateError| LoopFault::State(L::KIND, err);

    machine.enter(entry, shared).map_err(fault)?;
    loop {
        if machine.observe_quit(shared) {
            outcome.forced_end = true;
        }
        if machine.commit_transition(shared).map_err(fault)? {
            L::after_commit(token, shared);
        }
        outcome.iterations += 1;
        let step = machine.advance(shared, token, resources).map_err(fault)?;
        log::trace!("[{}] {} -> {:?}", L::KIND, machine.current(), step);
        tail(resources)?;
        if step == Step::Finished {
            return Ok(());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
