pub mod stopwatch;
pub mod timer;

pub use stopwatch::Stopwatch;
pub use timer::{CalibrationStats, HighPrecisionTimer, Timer};
