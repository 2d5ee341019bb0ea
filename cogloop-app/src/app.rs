use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cogloop_experiment::{
    Conditions, Constant, JsonLinesWriter, Session, SessionConfig, SessionSummary,
};
use cogloop_render::PixmapDisplay;

use crate::Args;
use crate::demo::ProbeExperiment;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

pub struct App {
    config: SessionConfig,
    conditions: Conditions,
    reaction: Duration,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => SessionConfig {
                experiment: "probe".to_string(),
                ..SessionConfig::default()
            },
        };
        if let Some(participant) = args.participant {
            config.participant = participant;
        }
        if args.trials.is_some() {
            config.max_trials = args.trials;
        }
        if let Some(fps) = args.headless_fps {
            config.refresh_rate_hz = fps;
        }
        config.validate().context("invalid session settings")?;

        let conditions = match &args.conditions {
            Some(path) => Conditions::from_file(path)
                .with_context(|| format!("loading conditions from {}", path.display()))?,
            None => ProbeExperiment::default_conditions(),
        };

        Ok(Self {
            config,
            conditions,
            reaction: Duration::from_millis(args.reaction_ms),
        })
    }

    pub fn run(self) -> Result<SessionSummary> {
        log::info!("platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);

        let display = PixmapDisplay::new(WIDTH, HEIGHT, self.config.refresh_rate_hz)?;
        let writer = JsonLinesWriter::create(&self.config.data_folder, &self.config.base_file_name())
            .context("opening the data file")?;
        let session = Session::new(
            self.config,
            Arc::new(ProbeExperiment::new(self.reaction)),
            Box::new(Constant::new(&self.conditions)),
            Box::new(display),
            Box::new(writer),
        )?;

        let summary = session.run()?;
        log::info!(
            "{} trial(s): {} completed, {} invalidated, {} replayed, {} pause(s) in {:.1}s",
            summary.trials,
            summary.completed,
            summary.invalidated,
            summary.replayed,
            summary.pauses,
            summary.duration_secs
        );
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &std::path::Path) -> Args {
        let config = dir.join("settings.json");
        std::fs::write(
            &config,
            serde_json::json!({
                "participant": "p01",
                "experiment": "probe",
                "data_folder": dir.join("data"),
                "durations": { "probeInterval": 0.1 },
            })
            .to_string(),
        )
        .unwrap();
        Args {
            config: Some(config),
            conditions: None,
            participant: Some("p02".into()),
            trials: Some(2),
            headless_fps: Some(120.0),
            reaction_ms: 20,
        }
    }

    #[test]
    fn cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(args(dir.path())).unwrap();
        assert_eq!(app.config.participant, "p02");
        assert_eq!(app.config.max_trials, Some(2));
        assert_eq!(app.config.refresh_rate_hz, 120.0);
    }

    #[test]
    fn demo_session_runs_headless() {
        let dir = tempfile::tempdir().unwrap();
        let summary = App::new(args(dir.path())).unwrap().run().unwrap();
        assert_eq!(summary.trials, 2);
        assert_eq!(summary.completed, 2);

        let data = summary.data_file.unwrap();
        let lines = std::fs::read_to_string(data).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }
}
