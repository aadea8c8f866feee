use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use faultline::classify::{normalize_error, NormalizeContext, StackFilter};
use faultline::config::ReporterConfig;
use faultline::error::{RawError, StructuredError};
use faultline::logging::{init_logging, LoggingConfig};
use faultline::notification::{render_html_report, ReportContext, DEFAULT_ENVIRONMENT};

mod exit_codes {
    use std::process::ExitCode;

    /// The input or configuration file could not be read.
    pub fn unreadable() -> ExitCode {
        ExitCode::from(1)
    }
}

#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "Classify raw errors and render error reports")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Reporter configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a raw error (JSON) and print the structured error
    Classify {
        /// File holding the raw error
        file: PathBuf,

        /// Module label attached to the error
        #[arg(long, short)]
        module: Option<String>,
    },

    /// Print the HTML alert report for a raw error
    Render {
        /// File holding the raw error
        file: PathBuf,

        /// Environment shown in the report
        #[arg(long, short)]
        environment: Option<String>,

        /// Module label attached to the error
        #[arg(long, short)]
        module: Option<String>,
    },

    /// Print the external view of a raw error
    View {
        /// File holding the raw error
        file: PathBuf,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LoggingConfig::from_verbosity(cli.verbose).with_timestamps(false)) {
        eprintln!("Warning: {}", e);
    }

    let config = match &cli.config {
        Some(path) => match ReporterConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return Ok(exit_codes::unreadable());
            }
        },
        None => ReporterConfig::default(),
    };
    let stack_filter = StackFilter::with_markers(config.stack.deny.clone());

    match cli.command {
        Commands::Classify { file, module } => {
            let Some(raw) = read_raw(&file) else {
                return Ok(exit_codes::unreadable());
            };
            let module = module.or(config.module.clone());
            let error = classify(raw, module.as_deref(), &stack_filter);
            println!("{}", serde_json::to_string_pretty(&error)?);
        }
        Commands::Render {
            file,
            environment,
            module,
        } => {
            let Some(raw) = read_raw(&file) else {
                return Ok(exit_codes::unreadable());
            };
            let module = module.or(config.module.clone());
            let error = classify(raw, module.as_deref(), &stack_filter);
            let environment = environment
                .or(config.environment.clone())
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
            print!("{}", render_html_report(&ReportContext::new(&environment, &error)));
        }
        Commands::View { file } => {
            let Some(raw) = read_raw(&file) else {
                return Ok(exit_codes::unreadable());
            };
            let error = classify(raw, config.module.as_deref(), &stack_filter);
            println!("{}", serde_json::to_string_pretty(&error.to_view())?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Reads a raw error from `path`.
///
/// Content that is not valid JSON is classified as the parse failure itself.
fn read_raw(path: &Path) -> Option<RawError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            return None;
        }
    };

    let raw = match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(value) => RawError::from(value),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Input is not JSON");
            RawError::from(e)
        }
    };
    Some(raw)
}

fn classify(raw: RawError, module: Option<&str>, stack_filter: &StackFilter) -> StructuredError {
    let ctx = NormalizeContext {
        module,
        request: None,
        stack_filter: Some(stack_filter),
    };
    normalize_error(raw, &ctx)
}
