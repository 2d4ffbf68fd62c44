pub mod commands;
pub mod output;

pub use commands::{CliArgs, Commands, ParseArgs, PlanArgs};
pub use output::{DiagnosticSink, OutputFormat, OutputFormatter};
