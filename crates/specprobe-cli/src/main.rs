//! # specprobe
//!
//! Synthesizes an HTTP API test suite from an OpenAPI description, runs it
//! against a live target and writes a report.
//!
//! ## Usage
//!
//! ```bash
//! # Generate, execute and report
//! specprobe run --spec openapi.yaml --base-url http://localhost:8080
//!
//! # Generate and compile only; writes suite.json
//! specprobe generate --spec https://api.example.com/openapi.json --no-oracle
//!
//! # List the endpoints the description declares
//! specprobe endpoints --spec openapi.yaml
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use specprobe_cli::{DescriptionSource, ReportWriter, TerminalReporter, load_description};
use specprobe_core::{ProbeConfig, ProbePipeline, ReportFormat as LibReportFormat, RunContext};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Configuration file picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG_FILE: &str = "specprobe.yml";

/// specprobe - generate and run HTTP API test suites from OpenAPI descriptions
#[derive(Parser, Debug)]
#[command(name = "specprobe", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (default: ./specprobe.yml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate, execute and report a suite
    Run(RunArgs),

    /// Generate and compile a suite without executing it
    Generate(SuiteArgs),

    /// List the endpoints of a description
    Endpoints(SpecArgs),
}

#[derive(Args, Debug)]
struct SpecArgs {
    /// API description: file path (.json/.yaml) or http(s) URL
    #[arg(short, long)]
    spec: String,
}

#[derive(Args, Debug)]
struct SuiteArgs {
    #[command(flatten)]
    spec: SpecArgs,

    /// Target base URL (overrides config and the description's servers)
    #[arg(long)]
    base_url: Option<String>,

    /// Directory for reports and suite artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Use deterministic scenarios only
    #[arg(long)]
    no_oracle: bool,

    /// Scenarios requested per category and endpoint
    #[arg(long)]
    count: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    suite: SuiteArgs,

    /// Report format (overrides config)
    #[arg(long, value_enum)]
    report: Option<ReportFormat>,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    /// JSON format (machine-readable)
    Json,
    /// Markdown format (human-readable)
    Markdown,
    /// Both markdown and JSON
    Both,
}

impl ReportFormat {
    fn to_lib_format(self) -> LibReportFormat {
        match self {
            ReportFormat::Json => LibReportFormat::Json,
            ReportFormat::Markdown => LibReportFormat::Markdown,
            ReportFormat::Both => LibReportFormat::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v switches our crates to debug.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "specprobe=debug"
        } else {
            "specprobe=info"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_command(config, cli.verbose, args).await,
        Commands::Generate(args) => generate_command(config, cli.verbose, args).await,
        Commands::Endpoints(args) => endpoints_command(cli.verbose, args).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<ProbeConfig> {
    match path {
        Some(path) => ProbeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                ProbeConfig::load(default)
                    .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_FILE))
            } else {
                debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                Ok(ProbeConfig::default())
            }
        }
    }
}

/// Folds command-line overrides into the config.
fn apply_overrides(config: &mut ProbeConfig, args: &SuiteArgs) -> Result<()> {
    if args.no_oracle {
        config.oracle.enabled = false;
    }
    if let Some(count) = args.count {
        config.synthesis.count_per_category = count;
    }
    if let Some(dir) = &args.output_dir {
        config.report.output_dir = dir.clone();
    }
    config.validate().context("Invalid configuration")
}

async fn prepare(
    mut config: ProbeConfig,
    args: &SuiteArgs,
) -> Result<(RunContext, serde_json::Value)> {
    apply_overrides(&mut config, args)?;
    let source = DescriptionSource::parse(&args.spec.spec);
    let description = load_description(&source)
        .await
        .with_context(|| format!("Failed to load API description {}", source))?;

    let mut ctx = RunContext::new(config);
    if let Some(base_url) = &args.base_url {
        ctx = ctx.with_base_url(base_url);
    }
    Ok((ctx, description))
}

async fn run_command(mut config: ProbeConfig, verbose: bool, args: RunArgs) -> Result<ExitCode> {
    if let Some(format) = args.report {
        config.report.format = format.to_lib_format();
    }
    let (ctx, description) = prepare(config, &args.suite).await?;
    let pipeline = ProbePipeline::from_config(&ctx.config)?;

    let suite = pipeline.generate(&ctx, &description).await?;
    let report = pipeline.execute(&ctx, &suite).await;

    let reporter = TerminalReporter::new(verbose);
    reporter.print_outcomes(&report);

    let writer = ReportWriter::new(ctx.config.report.output_dir.clone());
    match writer.write(&report, ctx.config.report.format) {
        Ok(paths) => {
            for path in &paths {
                println!("{}", format!("Report written: {}", path.display()).dimmed());
            }
        }
        Err(e) => {
            eprintln!("{} Failed to write report: {}", "Warning:".yellow(), e);
        }
    }

    reporter.print_summary(&report);

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn generate_command(config: ProbeConfig, verbose: bool, args: SuiteArgs) -> Result<ExitCode> {
    let (ctx, description) = prepare(config, &args).await?;
    let pipeline = ProbePipeline::from_config(&ctx.config)?;
    let suite = pipeline.generate(&ctx, &description).await?;

    TerminalReporter::new(verbose).print_suite(&suite);
    let path = ReportWriter::new(ctx.config.report.output_dir.clone())
        .write_suite(&suite)
        .context("Failed to write suite")?;
    println!("{}", format!("Suite written: {}", path.display()).dimmed());
    Ok(ExitCode::SUCCESS)
}

async fn endpoints_command(verbose: bool, args: SpecArgs) -> Result<ExitCode> {
    let source = DescriptionSource::parse(&args.spec);
    let description = load_description(&source)
        .await
        .with_context(|| format!("Failed to load API description {}", source))?;
    let model = specprobe_core::normalize(&description).context("Invalid API description")?;
    TerminalReporter::new(verbose).print_endpoints(&model);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "specprobe",
            "run",
            "--spec",
            "api.yaml",
            "--base-url",
            "http://localhost:3000",
            "--report",
            "json",
            "--no-oracle",
            "--count",
            "2",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.suite.spec.spec, "api.yaml");
        assert_eq!(args.report, Some(ReportFormat::Json));
        assert_eq!(args.suite.count, Some(2));
        assert!(args.suite.no_oracle);
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let mut config = ProbeConfig::default();
        let args = SuiteArgs {
            spec: SpecArgs {
                spec: "api.json".to_string(),
            },
            base_url: None,
            output_dir: Some(PathBuf::from("out")),
            no_oracle: true,
            count: Some(3),
        };
        apply_overrides(&mut config, &args).unwrap();
        assert!(!config.oracle.enabled);
        assert_eq!(config.synthesis.count_per_category, 3);
        assert_eq!(config.report.output_dir, PathBuf::from("out"));

        let zero = SuiteArgs {
            count: Some(0),
            ..args
        };
        assert!(apply_overrides(&mut config, &zero).is_err());
    }

    #[test]
    fn test_spec_is_required() {
        assert!(Cli::try_parse_from(["specprobe", "generate"]).is_err());
    }
}
