//! zi-core - zero-inflated series modelling
//!
//! The main entry point, handling:
//! - Two-part hurdle fits with composite predictions
//! - Tweedie fits with variance-power profiling
//! - Model comparison reports
//! - Configuration inspection and validation

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;

use zi_common::{format_error_human, Error, OutputFormat, Result, RunId, StructuredError};
use zi_core::config::{
    load_config, load_file, ConfigError, ConfigOptions, ConfigOrigin, ResolvedConfig,
};
use zi_core::exit_codes::ExitCode;
use zi_core::hurdle::HurdleVariant;
use zi_core::logging::{event_names, init_logging, LogConfig, LogContext, Stage};
use zi_core::log_event;
use zi_core::pipeline::{Pipeline, RunOutput, SCHEMA_VERSION};
use zi_core::report::{render, Describe};

/// Zero-inflated series modelling: hurdle and Tweedie fits, comparison
#[derive(Parser)]
#[command(name = "zi-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (TOML)
    #[arg(long, global = true, env = "ZI_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Wall-clock budget for all fits of this run (seconds)
    #[arg(long, global = true)]
    timeout: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a two-part hurdle model and predict every row
    Hurdle(HurdleArgs),

    /// Fit a Tweedie model with a fixed or profiled variance power
    Tweedie(TweedieArgs),

    /// Fit every candidate model and report correlation scores
    Compare(CompareArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct HurdleArgs {
    /// Input CSV file
    #[arg(long)]
    data: PathBuf,

    /// Predictor variant for both parts
    #[arg(long, value_enum, default_value_t = HurdleVariant::Linear)]
    variant: HurdleVariant,
}

#[derive(Args, Debug)]
struct TweedieArgs {
    /// Input CSV file
    #[arg(long)]
    data: PathBuf,

    /// Fixed variance power in [1, 2]; profiled over the grid when omitted
    #[arg(long)]
    power: Option<f64>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Input CSV file
    #[arg(long)]
    data: PathBuf,

    /// Share of rows held out for scoring (overrides config)
    #[arg(long)]
    holdout: Option<f64>,

    /// Seed for the holdout shuffle (overrides config)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration and where it came from
    Show,
    /// Validate a config file (or the resolved one)
    Validate {
        /// Specific file to validate
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Clean,
                _ => ExitCode::ArgsError,
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    init_logging(&LogConfig::from_env(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.format.is_machine(),
    ));

    let exit_code = match &cli.command {
        Commands::Hurdle(args) => run_hurdle(&cli.global, args),
        Commands::Tweedie(args) => run_tweedie(&cli.global, args),
        Commands::Compare(args) => run_compare(&cli.global, args),
        Commands::Config(args) => run_config(&cli.global, args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "zi-core", &mut std::io::stdout());
            ExitCode::Clean
        }
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn resolve_config(global: &GlobalOpts) -> Result<ResolvedConfig> {
    load_config(&ConfigOptions {
        path: global.config.clone(),
    })
    .map_err(config_error)
}

/// Log a rejected configuration and turn it into a command error.
fn config_error(err: ConfigError) -> Error {
    let ctx = LogContext::detached();
    log_event!(
        ctx,
        ERROR,
        event_names::CONFIG_ERROR,
        Stage::Init,
        "configuration rejected",
        reason = err.to_string().as_str()
    );
    err.into()
}

/// Build the pipeline for a modelling command and log its start.
fn start_pipeline(global: &GlobalOpts, config: ResolvedConfig, command: &str) -> Pipeline {
    let pipeline = Pipeline::new(config).with_timeout(global.timeout);
    let ctx = pipeline.log();
    match &pipeline.config().path {
        Some(path) => log_event!(
            ctx,
            INFO,
            event_names::CONFIG_LOADED,
            Stage::Init,
            "configuration loaded",
            path = path.display().to_string().as_str()
        ),
        None => log_event!(
            ctx,
            INFO,
            event_names::CONFIG_DEFAULT_USED,
            Stage::Init,
            "using built-in configuration"
        ),
    }
    log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "run started", command = command);
    pipeline
}

fn run_hurdle(global: &GlobalOpts, args: &HurdleArgs) -> ExitCode {
    execute(global, || {
        let pipeline = start_pipeline(global, resolve_config(global)?, "hurdle");
        let series = pipeline.load(&args.data)?;
        let run = pipeline.run_hurdle(&series, args.variant)?;
        finish(&pipeline, "hurdle", run, global.format).map(|out| (out, ExitCode::Clean))
    })
}

fn run_tweedie(global: &GlobalOpts, args: &TweedieArgs) -> ExitCode {
    execute(global, || {
        let pipeline = start_pipeline(global, resolve_config(global)?, "tweedie");
        let series = pipeline.load(&args.data)?;
        let run = pipeline.run_tweedie(&series, args.power)?;
        finish(&pipeline, "tweedie", run, global.format).map(|out| (out, ExitCode::Clean))
    })
}

fn run_compare(global: &GlobalOpts, args: &CompareArgs) -> ExitCode {
    execute(global, || {
        let mut config = resolve_config(global)?;
        if let Some(fraction) = args.holdout {
            config.settings.compare.holdout_fraction = fraction;
        }
        if let Some(seed) = args.seed {
            config.settings.compare.seed = seed;
        }
        config.settings.validate().map_err(config_error)?;

        let pipeline = start_pipeline(global, config, "compare");
        let series = pipeline.load(&args.data)?;
        let report = pipeline.run_compare(&series)?;
        // The report is always printed; a failed candidate still fails the run.
        let code = report
            .first_error()
            .map(ExitCode::from)
            .unwrap_or(ExitCode::Clean);
        finish(&pipeline, "compare", report, global.format).map(|out| (out, code))
    })
}

fn finish<T: Serialize + Describe>(
    pipeline: &Pipeline,
    command: &str,
    result: T,
    format: OutputFormat,
) -> Result<String> {
    let output = pipeline.envelope(command, result);
    let rendered = render(&output, format)?;
    log_event!(
        pipeline.log(),
        INFO,
        event_names::RUN_FINISHED,
        Stage::Report,
        "run finished",
        command = command
    );
    Ok(rendered)
}

/// Run a command body, print its payload and map errors to exit codes.
fn execute<F>(global: &GlobalOpts, body: F) -> ExitCode
where
    F: FnOnce() -> Result<(String, ExitCode)>,
{
    match body() {
        Ok((payload, code)) => {
            println!("{}", payload);
            code
        }
        Err(e) => output_error(global, &e),
    }
}

/// Output an error in the appropriate format on stderr.
fn output_error(global: &GlobalOpts, error: &Error) -> ExitCode {
    let exit_code = ExitCode::from(error);
    let ctx = LogContext::detached();
    log_event!(
        ctx,
        ERROR,
        event_names::INTERNAL_ERROR,
        Stage::Report,
        "command failed",
        code = u64::from(error.code()),
        exit_code = exit_code.as_i32() as u64
    );

    if global.format.is_machine() {
        let response = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "status": "error",
            "exit_code": exit_code.as_i32(),
            "exit_code_name": exit_code.code_name(),
            "error": StructuredError::from(error),
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| error.to_string())
        );
    } else {
        let use_color = !global.no_color && std::io::stderr().is_terminal();
        eprintln!("{}", format_error_human(error, use_color));
    }
    exit_code
}

// ============================================================================
// Config commands
// ============================================================================

/// Effective settings plus provenance.
#[derive(Serialize)]
struct ConfigView {
    valid: bool,
    settings: zi_core::config::Settings,
}

impl Describe for ConfigView {
    fn markdown(&self) -> String {
        let toml = toml::to_string_pretty(&self.settings).unwrap_or_default();
        format!("```toml\n{}```\n", toml)
    }

    fn summary_line(&self) -> String {
        format!(
            "config {} (time column '{}', value column '{}')",
            if self.valid { "valid" } else { "invalid" },
            self.settings.data.time_column,
            self.settings.data.value_column
        )
    }
}

fn config_output(config: &ResolvedConfig, command: &str) -> RunOutput<ConfigView> {
    RunOutput {
        schema_version: SCHEMA_VERSION.to_string(),
        run_id: RunId::new().to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        command: command.to_string(),
        config: config.snapshot(),
        result: ConfigView {
            valid: true,
            settings: config.settings.clone(),
        },
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    execute(global, || {
        let (config, command) = match &args.command {
            ConfigCommands::Show => (resolve_config(global)?, "config show"),
            ConfigCommands::Validate { path: Some(path) } => {
                (load_file(path, ConfigOrigin::Cli).map_err(config_error)?, "config validate")
            }
            ConfigCommands::Validate { path: None } => (resolve_config(global)?, "config validate"),
        };
        let rendered = render(&config_output(&config, command), global.format)?;
        Ok((rendered, ExitCode::Clean))
    })
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => {
            let version_info = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "zi_core_version": env!("CARGO_PKG_VERSION"),
                "rust_version": env!("CARGO_PKG_RUST_VERSION"),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&version_info).unwrap_or_default()
            );
        }
        OutputFormat::Md | OutputFormat::Summary => {
            println!("zi-core {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}
