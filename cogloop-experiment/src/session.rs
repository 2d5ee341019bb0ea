//! Trial lifecycle controller: init -> run -> end -> persist -> next.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cogloop_core::{
    Display, LoopKind, PAUSE_REQUESTED, QuitFlag, QuitOrigin, SharedSchema, Trial, TrialShared,
    TrialStatus,
};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::coordinator::{Coordinator, TrialRun};
use crate::design::{Design, Method, TrialSpec};
use crate::device::{DeviceRegistry, FileNaming};
use crate::error::SessionError;
use crate::experiment::{Blueprint, Experiment};
use crate::pause::PauseSchedule;
use crate::record::{RecordWriter, persist_with_retry};
use crate::state::{END, FastResources, GraphicsResources, ITI, LOADING, PAUSE};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub trials: usize,
    pub completed: usize,
    pub invalidated: usize,
    pub replayed: usize,
    pub pauses: usize,
    pub duration_secs: f64,
    pub quit: bool,
    pub data_file: Option<PathBuf>,
}

/// Explicit session context: devices, design and writer live here, not in globals.
pub struct Session {
    config: SessionConfig,
    experiment: Arc<dyn Experiment>,
    schema: SharedSchema,
    design: Design,
    writer: Box<dyn RecordWriter>,
    devices: Option<DeviceRegistry>,
    coordinator: Coordinator,
    pause: PauseSchedule,
    quit: Arc<QuitFlag>,
}

impl Session {
    /// Validates the configuration, builds both machines, registers devices and
    /// spawns the loop threads. No trial runs yet.
    pub fn new(
        config: SessionConfig,
        experiment: Arc<dyn Experiment>,
        method: Box<dyn Method>,
        display: Box<dyn Display>,
        writer: Box<dyn RecordWriter>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let mut blueprint = Blueprint::new();
        experiment.build(&mut blueprint)?;
        blueprint.apply_durations(&config)?;
        blueprint.validate()?;

        let naming = FileNaming::new(&config.data_folder, config.base_file_name());
        let mut devices = DeviceRegistry::new(naming);
        experiment.init_devices(&config, &mut devices)?;

        let Blueprint {
            schema,
            fast,
            graphics,
        } = blueprint;
        let graphics_resources =
            GraphicsResources::new(Arc::clone(&experiment), config.pause_text.clone());
        let coordinator = Coordinator::spawn(fast, graphics, graphics_resources, display)?;

        log::info!(
            "session {} ready: experiment `{}`, {} device(s)",
            config.base_file_name(),
            experiment.name(),
            devices.len()
        );
        Ok(Self {
            design: Design::new(method).with_max_trials(config.max_trials),
            pause: PauseSchedule::new(config.pause.clone()),
            config,
            experiment,
            schema,
            writer,
            devices: Some(devices),
            coordinator,
            quit: Arc::new(QuitFlag::new()),
        })
    }

    /// Flag another thread can raise to end the session after the current trial.
    pub fn quit_handle(&self) -> Arc<QuitFlag> {
        Arc::clone(&self.quit)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs trials until the design is exhausted or quit is requested, then
    /// tears down. Teardown happens on the error path too.
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        let started = Instant::now();
        let mut summary = SessionSummary::default();

        let result = self.run_trials(&mut summary);
        if result.is_err() {
            self.quit.request(QuitOrigin::Controller);
        }
        let teardown = self.teardown();

        summary.pauses = self.pause.taken();
        summary.duration_secs = started.elapsed().as_secs_f64();
        summary.quit = self.quit.is_requested();
        summary.data_file = self.writer.path().map(|p| p.to_path_buf());

        result?;
        teardown?;
        log::info!(
            "session done: {} trial(s), {} completed, {} invalidated, {} replayed, {} pause(s) in {:.1}s",
            summary.trials,
            summary.completed,
            summary.invalidated,
            summary.replayed,
            summary.pauses,
            summary.duration_secs
        );
        Ok(summary)
    }

    fn run_trials(&mut self, summary: &mut SessionSummary) -> Result<(), SessionError> {
        let mut pause_due = false;
        while !self.quit.is_requested() {
            let Some(spec) = self.design.next_trial() else {
                break;
            };
            let replayed = spec.replayed;
            let first = summary.trials == 0;

            let status = self.run_trial(spec, first, pause_due)?;

            summary.trials += 1;
            summary.replayed += usize::from(replayed);
            match status {
                TrialStatus::Completed => summary.completed += 1,
                _ => summary.invalidated += 1,
            }
            pause_due = self.pause.after_trial(summary.completed);
        }
        Ok(())
    }

    fn run_trial(
        &mut self,
        spec: TrialSpec,
        first: bool,
        pause_due: bool,
    ) -> Result<TrialStatus, SessionError> {
        let mut trial = Trial::new(spec.id, spec.parameters, spec.replayed);
        let id = trial.id();
        let mut devices = self
            .devices
            .take()
            .ok_or(SessionError::LoopDisconnected(LoopKind::Fast))?;

        let start = devices.start_trial(id, trial.parameters());
        let entry = if start.fatal.is_some() {
            END
        } else if pause_due {
            PAUSE
        } else if first {
            LOADING
        } else {
            ITI
        };

        trial.start()?;
        let mut shared = TrialShared::new(&self.schema, trial.view(), Arc::clone(&self.quit));
        if entry == PAUSE {
            shared.triggers.preset(PAUSE_REQUESTED, true)?;
            self.pause.mark_taken();
        }
        let shared = Arc::new(shared);
        log::info!(
            "trial {id} enters at `{entry}` with {}",
            serde_json::Value::Object(trial.parameters().clone())
        );

        let TrialRun {
            fast,
            graphics,
            resources,
        } = self
            .coordinator
            .run_trial(Arc::clone(&shared), entry, FastResources::new(devices))?;
        let FastResources { mut devices, data } = resources;

        let fault = fast.fault.clone().or_else(|| graphics.fault.clone());
        let cut_short = start.fatal.is_some()
            || fast.forced_end
            || graphics.forced_end
            || shared.is_aborted();
        let mut valid = !cut_short && fault.is_none() && self.experiment.is_valid(&shared.trial);
        if let Some(err) = devices.stop_trial(id, valid).fatal {
            log::error!("trial {id} invalidated: {err}");
            valid = false;
        }

        trial.merge_timestamps(fast.trace.into_iter().chain(graphics.trace));
        if valid {
            trial.complete(shared.trial.response().cloned())?;
        } else {
            trial.invalidate()?;
        }

        let mut record = trial.to_record();
        record.device_files = devices.user_files();
        record.degraded_devices = devices.degraded().to_vec();
        record.data = data;
        record.frame_stats = graphics.frames;
        self.devices = Some(devices);

        persist_with_retry(self.writer.as_mut(), &record, self.config.write_retries)?;
        log::info!("trial {id} {}", trial.status());

        match trial.status() {
            TrialStatus::Completed if trial.is_adaptive() => {
                if let Some(response) = trial.response() {
                    self.design
                        .report(trial.parameters().clone(), response.clone());
                }
            }
            TrialStatus::Invalidated
                if self.config.replay_invalid && fault.is_none() && !self.quit.is_requested() =>
            {
                log::info!("trial {id} will be replayed");
                self.design.requeue(trial.parameters().clone());
            }
            _ => {}
        }

        if let Some(fault) = fault {
            return Err(SessionError::Loop { trial: id, fault });
        }
        Ok(trial.status())
    }

    fn teardown(&mut self) -> Result<(), SessionError> {
        self.coordinator.shutdown();
        if let Some(mut devices) = self.devices.take() {
            devices.close_all();
        }
        self.writer.flush()?;
        Ok(())
    }
}
