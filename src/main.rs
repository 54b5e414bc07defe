use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use initguard::config::InitGuardConfig;
use initguard::error::{ErrorCode, ErrorContext};
use initguard::logging::{init_logging, LoggingConfig};
use initguard::monitor::report::write_report;
use initguard::monitor::{ErrorMonitor, ErrorPatterns, ErrorSummary, Recommendation};
use initguard::recovery::{InitErrorHandler, RuntimeSettings};
use initguard::ui::{Palette, TextRenderer};

/// Exit code after Ctrl+C.
const EXIT_INTERRUPTED: i32 = 130;

/// Output format for analysis and diagnosis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON on stdout
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "initguard")]
#[command(version)]
#[command(about = "Analyse and recover from database initialization failures")]
struct Cli {
    /// Configuration file (defaults to ./initguard.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of the durable error log (overrides the configuration)
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Disable colors (also respects NO_COLOR environment variable)
    #[arg(long, global = true)]
    no_color: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarise recorded errors and detect repeated patterns
    Analyze {
        /// Trailing window in hours
        #[arg(long)]
        hours: Option<u32>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate a troubleshooting report
    Report {
        /// Trailing window in hours
        #[arg(long)]
        hours: Option<u32>,

        /// Write the report to FILE instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Keep stack traces in the recent errors
        #[arg(long)]
        include_traces: bool,
    },

    /// Show recovery guidance for an error code (all codes if omitted)
    Recovery {
        /// Code name (CONNECTION_REFUSED) or number (1001)
        #[arg(long, value_name = "CODE")]
        error_code: Option<String>,
    },

    /// Clear the error history and delete the durable log files
    Clear,

    /// Export the troubleshooting report as JSON
    Export {
        /// Destination file
        file: PathBuf,

        /// Trailing window in hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Classify a failure message and show how to resolve it
    Diagnose {
        /// The failure message
        message: String,

        /// Backend type, e.g. postgresql or sqlite
        #[arg(long)]
        backend: Option<String>,

        /// Operation that failed
        #[arg(long)]
        operation: Option<String>,

        /// Connection URL (credentials are masked)
        #[arg(long)]
        url: Option<String>,

        /// Database file path
        #[arg(long)]
        path: Option<PathBuf>,

        /// Run the registered recovery strategy
        #[arg(long)]
        auto_recover: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Serialize)]
struct Analysis<'a> {
    error_summary: &'a ErrorSummary,
    error_patterns: &'a ErrorPatterns,
    recommendations: &'a [Recommendation],
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let palette = Palette::detect(cli.no_color);
    init_logging(LoggingConfig::from_verbosity(cli.verbose).with_ansi(palette.enabled()));

    if let Err(e) = ctrlc::set_handler(|| {
        eprintln!("Interrupted");
        std::process::exit(EXIT_INTERRUPTED);
    }) {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }

    match run(cli, palette) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, palette: Palette) -> CliResult {
    let mut config = InitGuardConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.log_dir {
        config.logging.log_dir = dir;
    }

    let monitor = Arc::new(ErrorMonitor::new(config.monitor_config()));
    if let Err(e) = monitor.load_history() {
        tracing::warn!(error = %e, "could not reload error history");
    }
    let renderer = TextRenderer::new(palette);
    let window = |hours: Option<u32>| hours.unwrap_or(config.analysis.default_window_hours);

    match cli.command {
        Commands::Analyze { hours, format } => {
            let report = monitor.generate_report(window(hours), false);
            match format {
                OutputFormat::Json => {
                    let analysis = Analysis {
                        error_summary: &report.error_summary,
                        error_patterns: &report.error_patterns,
                        recommendations: &report.recommendations,
                    };
                    println!("{}", serde_json::to_string_pretty(&analysis)?);
                }
                OutputFormat::Text => print!(
                    "{}",
                    renderer.analysis(
                        &report.error_summary,
                        &report.error_patterns,
                        &report.recommendations
                    )
                ),
            }
        }
        Commands::Report {
            hours,
            output,
            include_traces,
        } => {
            let report = monitor.generate_report(window(hours), include_traces);
            match output {
                Some(path) => {
                    write_report(&report, &path)?;
                    println!("Report written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Recovery { error_code } => {
            let handler = InitErrorHandler::new(Arc::clone(&monitor));
            match error_code {
                Some(raw) => {
                    let code: ErrorCode = raw.parse()?;
                    print!("{}", renderer.resolution(&handler.resolve(code)));
                }
                None => print!("{}", renderer.code_index(handler.catalog())),
            }
        }
        Commands::Clear => {
            let removed = monitor.clear_logs()?;
            monitor.clear();
            println!("Error history cleared ({} log file(s) removed)", removed);
        }
        Commands::Export { file, hours } => {
            let report = monitor.export(&file, window(hours))?;
            println!(
                "Exported {} error(s) to {}",
                report.report_metadata.total_errors_analyzed,
                file.display()
            );
        }
        Commands::Diagnose {
            message,
            backend,
            operation,
            url,
            path,
            auto_recover,
            format,
        } => {
            let context = if backend.is_some() || url.is_some() || path.is_some() {
                let mut ctx = ErrorContext::new(
                    backend.unwrap_or_default(),
                    operation.unwrap_or_else(|| "diagnose".to_string()),
                );
                if let Some(url) = &url {
                    ctx = ctx.with_connection(url);
                }
                if let Some(path) = &path {
                    ctx = ctx.with_file_path(path.display().to_string());
                }
                Some(ctx)
            } else {
                None
            };

            let working_dir = std::env::current_dir()?;
            let settings = RuntimeSettings::new();
            let handler = InitErrorHandler::new(Arc::clone(&monitor));
            handler.registry().register_defaults(
                &config.strategy_config(),
                &config.recovery_dependencies(settings, working_dir),
            );

            let result = handler.handle_failure(message, context, auto_recover);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => print!("{}", renderer.handled(&result)),
            }
        }
    }

    if monitor.is_degraded() {
        tracing::warn!("durable error log unavailable, history was kept in memory only");
    }
    Ok(())
}
