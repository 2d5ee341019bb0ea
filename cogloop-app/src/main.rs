mod app;
mod apparatus;
mod demo;

use std::path::PathBuf;

use clap::Parser;
pub use app::App;

#[derive(Debug, Parser)]
#[command(name = "cogloop", version, about = "Run the two-probe sled demo headless")]
pub struct Args {
    /// Session settings (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Condition file for the constant method (JSON)
    #[arg(long)]
    pub conditions: Option<PathBuf>,

    #[arg(long)]
    pub participant: Option<String>,

    /// Stop after this many trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Refresh rate of the offscreen display
    #[arg(long)]
    pub headless_fps: Option<f64>,

    /// Reaction time of the simulated participant, in milliseconds
    #[arg(long, default_value_t = 400)]
    pub reaction_ms: u64,
}

fn main() -> anyhow::Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let app = App::new(Args::parse())?;
    app.run()?;

    Ok(())
}
