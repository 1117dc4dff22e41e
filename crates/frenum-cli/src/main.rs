//! Command-line surface for the Frenum policy engine: `lint` and `test`.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand, ValueEnum};
use frenum_policy::{has_errors, lint, load_raw_policy, Engine};
use frenum_report::{render_test_report, ReportFormat as RenderFormat};
use frenum_testkit::{coverage, load_test_document, run_tests};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "frenum", about = "Deterministic tool-call policy engine: lint and test")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a policy document, emitting coded diagnostics.
    Lint {
        /// Path to the policy YAML document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a declarative test document against a policy and report coverage.
    Test {
        /// Path to the policy YAML document.
        #[arg(long)]
        config: PathBuf,
        /// Path to the test-case YAML document.
        #[arg(long)]
        tests: PathBuf,
        /// Rendering for the report.
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
    Html,
}

impl From<Format> for RenderFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Text => RenderFormat::Text,
            Format::Json => RenderFormat::Json,
            Format::Html => RenderFormat::Html,
        }
    }
}

fn main() -> ExitCode {
    frenum_telemetry::init_json_logging();
    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Lint { config } => cmd_lint(&config),
        Command::Test { config, tests, format, output } => {
            cmd_test(&config, &tests, format, output.as_deref())
        }
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "frenum command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// `lint --config <path>`: exit 0 if no errors, 1 otherwise. Warnings never
/// change the exit code (§6). Returns whether the run succeeded.
fn cmd_lint(config: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let doc = load_raw_policy(config)?;
    let findings = lint(&doc);

    if findings.is_empty() {
        println!("lint: no findings ({} rules)", doc.rules.len());
    }
    for finding in &findings {
        let rule = finding.rule_name.as_deref().unwrap_or("<policy>");
        println!("{} [{rule}] {}", finding.code.as_str(), finding.message);
    }

    let errored = has_errors(&findings);
    tracing::info!(rules = doc.rules.len(), findings = findings.len(), errored, "lint complete");
    Ok(!errored)
}

/// `test --config <path> --tests <path> [--format ...] [--output <path>]`:
/// exit 0 if all tests pass AND no lint errors, 1 otherwise (§6). Returns
/// whether the run succeeded.
fn cmd_test(
    config: &Path,
    tests: &Path,
    format: Format,
    output: Option<&Path>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let doc = load_raw_policy(config)?;
    let findings = lint(&doc);
    let errored = has_errors(&findings);
    for finding in &findings {
        let rule = finding.rule_name.as_deref().unwrap_or("<policy>");
        tracing::warn!(code = finding.code.as_str(), rule, "{}", finding.message);
    }

    let engine = Engine::new(doc)?;
    let test_doc = load_test_document(tests)?;
    let outcomes = run_tests(&engine, &test_doc.tests);
    let all_passed = outcomes.iter().all(|o| o.passed);
    let coverage_report = coverage(&engine.compiled_policy(), &outcomes);

    let rendered = render_test_report(&outcomes, &coverage_report, format.into());
    match output {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }

    tracing::info!(
        total = outcomes.len(),
        passed = outcomes.iter().filter(|o| o.passed).count(),
        coverage_pct = coverage_report.coverage_pct,
        "test run complete"
    );

    Ok(all_passed && !errored)
}
