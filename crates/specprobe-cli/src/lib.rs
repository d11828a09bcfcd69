//! # specprobe-cli
//!
//! Thin adapters around `specprobe-core`: description loading and report
//! rendering. The `specprobe` binary wires them to the command line.

pub mod loader;
pub mod report;

pub use loader::{DescriptionSource, LoadError, load_description};
pub use report::{JsonReporter, MarkdownReporter, ReportWriter, ReporterError, TerminalReporter};
