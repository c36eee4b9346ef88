use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use muguard_analysis::config::{load_config, DEFAULT_CONFIG_TOML};
use muguard_analysis::facts::MemoryFactStore;
use muguard_analysis::MutexAnalyzer;
use muguard_diagnostics::human::format_human;
use muguard_diagnostics::rules;

#[derive(Parser)]
#[command(name = "muguard")]
#[command(about = "Mutex-guard consistency analyzer for Go")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze bridge IR for locking issues
    Check {
        /// Path to the bridge IR JSON file
        input: PathBuf,
        /// Output format: human, json
        #[arg(long, default_value = "human")]
        format: String,
        /// Append provenance chains to interprocedural reports
        #[arg(long)]
        verbose: bool,
    },
    /// Explain a rule in detail
    Explain {
        /// Rule code (e.g., MU001)
        rule: String,
    },
    /// Write a default muguard.toml in the current directory
    Init,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(found_issues) => {
            if found_issues {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("muguard: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            input,
            format,
            verbose,
        } => {
            let ir = muguard_ir::load_json_file(&input)
                .with_context(|| format!("loading {}", input.display()))?;

            let cwd = std::env::current_dir().context("resolving working directory")?;
            let mut config = load_config(&cwd);
            if verbose {
                config.muguard.verbose = true;
            }

            let store = MemoryFactStore::new();
            let diagnostics = MutexAnalyzer::analyze_with_store(&ir, &config, &store);

            match format.as_str() {
                "human" => print!("{}", format_human(&diagnostics, config.muguard.verbose)),
                "json" => println!("{}", serde_json::to_string_pretty(&diagnostics)?),
                other => bail!("unknown format {other:?} (expected human or json)"),
            }
            Ok(!diagnostics.is_empty())
        }
        Commands::Explain { rule } => {
            let code = rule.to_uppercase();
            let Some(info) = rules::get_rule(&code) else {
                bail!("unknown rule {code}; run with a code like MU001");
            };
            println!("{} — {} [{}]", info.code, info.name, info.severity);
            println!("\n{}", info.description);
            if let Some(bad) = info.example_bad {
                println!("\nBad:\n{bad}");
            }
            if let Some(good) = info.example_good {
                println!("\nGood:\n{good}");
            }
            Ok(false)
        }
        Commands::Init => {
            let path = std::path::Path::new("muguard.toml");
            if path.exists() {
                bail!("muguard.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG_TOML).context("writing muguard.toml")?;
            println!("wrote muguard.toml");
            Ok(false)
        }
    }
}
