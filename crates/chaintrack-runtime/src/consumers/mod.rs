//! # Dashboard Consumers
//!
//! Presentation-side observers of the broker. Each one either subscribes
//! (`EventConsole`, `Toaster`), reads snapshots, or follows the metrics
//! channel (`StatusPanel`). `FlowAnimator` is both: it walks the pipeline
//! stages and then publishes.

pub mod console;
pub mod flow;
pub mod status_panel;
pub mod toaster;

pub use console::{render_footer, render_line, ConsoleFilter, EventConsole, UnknownFilter};
pub use flow::{FlowAnimator, FlowStep};
pub use status_panel::StatusPanel;
pub use toaster::{Toast, Toaster};
