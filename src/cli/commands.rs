use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Container-native build automation: recipe parsing and build-graph
/// lowering
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    about = "Container-native build automation: recipe parsing and build-graph lowering",
    version,
    author,
    long_about = "kiln parses Kilnfile recipes, resolves target references across local and \
                  remote projects, and lowers each target into a content-addressed build \
                  graph for a downstream container build daemon."
)]
pub struct CliArgs {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    /// Enable verbose output (equivalent to --log-level debug)
    #[arg(short = 'v', long, global = true, help = "Increase verbosity")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lower a target into build-graph records
    #[command(
        about = "Lower a target into build-graph records",
        long_about = "Parses the recipe, resolves the target and its dependencies, and \
                      prints the lowered build-graph records.\n\n\
                      Examples:\n  \
                      kiln plan +build\n  \
                      kiln plan --push +release\n  \
                      kiln plan --build-arg VERSION=1.2 ./services/api+image"
    )]
    Plan(PlanArgs),

    /// Parse a recipe and dump its AST
    #[command(
        about = "Parse a recipe and dump its AST",
        long_about = "Lexes and parses a recipe file and prints the resulting AST as JSON.\n\n\
                      Examples:\n  \
                      kiln parse\n  \
                      kiln parse --file ./services/api/Kilnfile"
    )]
    Parse(ParseArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    Json,
    Human,
}

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Target reference to lower (e.g. +build, ./sub+test)
    #[arg(value_name = "TARGET", help = "Target reference to lower")]
    pub target: String,

    /// Recipe file (default: Kilnfile in the current directory)
    #[arg(long, value_name = "FILE", help = "Recipe file path")]
    pub file: Option<PathBuf>,

    /// Enable push effects
    #[arg(long, help = "Execute push effects after the build")]
    pub push: bool,

    /// Build arg override, K=V or K (read from the environment)
    #[arg(
        long = "build-arg",
        value_name = "KEY[=VALUE]",
        help = "Override a build arg (repeatable)"
    )]
    pub build_arg: Vec<String>,

    /// Output format
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

/// Arguments for the parse command
#[derive(Parser, Debug, Clone)]
pub struct ParseArgs {
    /// Recipe file (default: Kilnfile in the current directory)
    #[arg(long, value_name = "FILE", help = "Recipe file path")]
    pub file: Option<PathBuf>,
}
