use kiln::cli::commands::{CliArgs, Commands, OutputFormatArg, ParseArgs, PlanArgs};
use kiln::cli::output::{DiagnosticSink, OutputFormat, OutputFormatter};
use kiln::config::{load_dotenv, parse_build_args, KilnConfig};
use kiln::lower::{FsRecipeLoader, LowerOptions, Lowerer};
use kiln::syntax::{parse, Lexer};
use kiln::{Reference, VERSION};

use clap::Parser;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, error, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("kiln v{} starting", VERSION);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args).await,
        Commands::Parse(parse_args) => handle_parse(parse_args).await,
    };

    process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        kiln::util::logging::parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("KILN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        kiln::util::logging::parse_level(&level_str)
    };
    kiln::util::logging::init_logging(kiln::util::logging::LoggingConfig::with_level(level));
}

/// Resolves the recipe location: `--file` overrides the default Kilnfile
/// in the current directory. Returns (project root, recipe file name).
fn recipe_location(file: &Option<PathBuf>, config: &KilnConfig) -> (PathBuf, String) {
    match file {
        Some(path) => {
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| config.recipe_file.clone());
            (root, name)
        }
        None => (PathBuf::from("."), config.recipe_file.clone()),
    }
}

async fn handle_plan(args: &PlanArgs) -> i32 {
    let sink = DiagnosticSink::stderr();
    let config = KilnConfig::default();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("Configuration error: {}", e);
        return 1;
    }

    let lookup = match config.build_git_lookup() {
        Ok(lookup) => Arc::new(lookup),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 1;
        }
    };

    let reference = match Reference::parse(&args.target, &lookup) {
        Ok(reference) => reference,
        Err(e) => {
            sink.emit(&e.to_string());
            return 1;
        }
    };

    let build_args = match parse_build_args(&args.build_arg) {
        Ok(build_args) => build_args,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let (root, file_name) = recipe_location(&args.file, &config);
    let dotenv = load_dotenv(&root.join(".env"));
    let loader = Arc::new(FsRecipeLoader::new(&root).with_file_name(&file_name));
    let opts = LowerOptions {
        push: args.push || config.push,
        build_args,
        dotenv,
        image_digests: HashMap::new(),
    };

    let lowerer = Arc::new(Lowerer::new(lookup, loader, opts));
    match lowerer.lower(&reference).await {
        Ok(_) => {
            let format = match args.format {
                OutputFormatArg::Json => OutputFormat::Json,
                OutputFormatArg::Human => OutputFormat::Human,
            };
            let formatter = OutputFormatter::new(format);
            match formatter.format_graph(&lowerer.nodes()) {
                Ok(rendered) => {
                    println!("{}", rendered);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    1
                }
            }
        }
        Err(e) => {
            sink.emit_all(e.to_string().lines());
            1
        }
    }
}

async fn handle_parse(args: &ParseArgs) -> i32 {
    let sink = DiagnosticSink::stderr();
    let config = KilnConfig::default();
    let (root, file_name) = recipe_location(&args.file, &config);
    let path = root.join(&file_name);
    let display = path.display().to_string();

    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", display, e);
            return 1;
        }
    };
    let tokens = match Lexer::new(&text).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            sink.emit(&format!("{}:{}", display, e));
            return 1;
        }
    };
    match parse(tokens, &display) {
        Ok(recipe) => {
            let formatter = OutputFormatter::new(OutputFormat::Json);
            match formatter.format_recipe(&recipe) {
                Ok(rendered) => {
                    println!("{}", rendered);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    1
                }
            }
        }
        Err(errors) => {
            sink.emit_all(errors.to_string().lines());
            1
        }
    }
}
