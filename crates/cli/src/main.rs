mod config;
mod input;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use riskscript_eval::{EvalConfig, GeneratedRisk, RiskReport};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Threat-model risk rule evaluator.
#[derive(Parser)]
#[command(name = "riskscript", version, about = "Threat-model risk rule evaluator")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse rule files and report whether they are valid
    Check {
        /// Rule file, or a directory of .yaml rule files
        rule: PathBuf,
    },

    /// Evaluate rules against every technical asset of a model
    Run {
        /// Rule file, or a directory of .yaml rule files
        rule: PathBuf,
        /// Model file (.json, or YAML otherwise)
        #[arg(long)]
        model: PathBuf,
        /// Configuration TOML file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { rule } => {
            cmd_check(&rule, cli.output, cli.quiet);
        }
        Commands::Run {
            rule,
            model,
            config,
        } => {
            cmd_run(&rule, &model, config.as_deref(), cli.output, cli.quiet);
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn rule_files_or_exit(path: &Path, output: OutputFormat, quiet: bool) -> Vec<PathBuf> {
    match input::rule_files(path) {
        Ok(files) if files.is_empty() => {
            report_error(
                &format!("error: no rule files in {}", path.display()),
                output,
                quiet,
            );
            process::exit(1);
        }
        Ok(files) => files,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

fn cmd_check(path: &Path, output: OutputFormat, quiet: bool) {
    let files = rule_files_or_exit(path, output, quiet);
    let mut failed = false;
    let mut results = Vec::new();
    for file in &files {
        match input::read_rule(file) {
            Ok(rule) => {
                if !quiet && output == OutputFormat::Text {
                    println!("ok: {}", rule.id());
                }
                results.push(serde_json::json!({
                    "file": file.display().to_string(),
                    "id": rule.id(),
                    "status": "ok",
                }));
            }
            Err(e) => {
                failed = true;
                report_error(&format!("error: {}", e), output, quiet);
                results.push(serde_json::json!({
                    "file": file.display().to_string(),
                    "status": "error",
                    "error": e,
                }));
            }
        }
    }
    if !quiet && output == OutputFormat::Json {
        print_json(&serde_json::Value::Array(results));
    }
    if failed {
        process::exit(1);
    }
}

fn cmd_run(
    rule_path: &Path,
    model_path: &Path,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = match config_path {
        Some(path) => match config::read_config(path) {
            Ok(c) => c.eval,
            Err(e) => {
                report_error(&format!("error: {}", e), output, quiet);
                process::exit(1);
            }
        },
        None => EvalConfig::default(),
    };

    let model = match input::read_model(model_path) {
        Ok(m) => m,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let files = rule_files_or_exit(rule_path, output, quiet);
    tracing::info!(rules = files.len(), model = %model_path.display(), "running rules");
    let mut failed = false;
    let mut reports: Vec<RiskReport> = Vec::new();
    for file in &files {
        let rule = match input::read_rule(file) {
            Ok(r) => r,
            Err(e) => {
                failed = true;
                report_error(&format!("error: {}", e), output, quiet);
                continue;
            }
        };
        match rule.generate_risks_with(&model, &config) {
            Ok(report) => {
                for failure in &report.failures {
                    failed = true;
                    let mut msg = format!(
                        "error: rule '{}' failed for technical asset '{}': {}",
                        report.category, failure.subject, failure.error
                    );
                    if !failure.literal.is_empty() {
                        msg.push_str(&format!("\nin:\n{}", indent(&failure.literal)));
                    }
                    report_error(&msg, output, quiet);
                }
                reports.push(report);
            }
            Err(e) => {
                failed = true;
                report_error(
                    &format!("error: rule '{}' could not run: {}", rule.id(), e),
                    output,
                    quiet,
                );
            }
        }
    }

    if !quiet {
        match output {
            OutputFormat::Json => match serde_json::to_value(&reports) {
                Ok(v) => print_json(&v),
                Err(e) => {
                    report_error(&format!("error: could not serialize report: {}", e), output, quiet);
                    process::exit(1);
                }
            },
            OutputFormat::Text => {
                let mut count = 0;
                for risk in reports.iter().flat_map(|r| &r.risks) {
                    print_risk(risk);
                    count += 1;
                }
                println!(
                    "{} risk(s) generated by {} rule(s)",
                    count,
                    reports.len()
                );
            }
        }
    }

    if failed {
        process::exit(1);
    }
}

fn print_risk(risk: &GeneratedRisk) {
    println!("== {} ==", risk.synthetic_id);
    for line in &risk.risk_explanation {
        println!("{}", line);
    }
    for line in &risk.rating_explanation {
        println!("{}", line);
    }
    if !risk.fields.is_empty() {
        match serde_yaml::to_string(&risk.fields) {
            Ok(yaml) => print!("{}", yaml),
            Err(e) => eprintln!("warning: could not render fields: {}", e),
        }
    }
    println!();
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: could not serialize output: {}", e),
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
