pub mod control;
pub mod runner;

pub use control::{ControlEvent, KeyboardListener};
pub use runner::{LoopRunner, RunnerSettings, StepOutcome};
