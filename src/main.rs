//! CLI Entry Point for certkit
//!
//! Provides a command-line interface for:
//! - Listing the built-in setup plans
//! - Checking a harness configuration
//! - Running a full setup session on the simulated bench
//!
//! # Usage
//!
//! ```bash
//! certkit plans
//! certkit check-config --config config/certkit.toml
//! certkit run --plan communication-privacy --verdict pass
//! certkit run --plan multiplayer-privilege --select devkit-2,devkit-3
//! ```

use anyhow::{anyhow, Context, Result};
use certkit::config::{HarnessConfig, DEFAULT_CONFIG_PATH};
use certkit::host::ConsoleHost;
use certkit::{simulated_bench, tracing_setup};
use certkit_core::capabilities::ConsoleDevice;
use certkit_core::model::{CheckVerdict, Phase};
use certkit_setup::{SessionEngine, SetupPlan, SetupSession};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "certkit")]
#[command(about = "Multi-console certification setup harness", long_about = None)]
struct Cli {
    /// Harness configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in setup plans
    Plans,

    /// Load and validate the configuration
    CheckConfig,

    /// Run a setup session against the simulated consoles in the configuration
    Run {
        /// Built-in plan name
        #[arg(long, required_unless_present = "plan_file")]
        plan: Option<String>,

        /// Setup plan TOML file, instead of a built-in plan
        #[arg(long, conflicts_with = "plan")]
        plan_file: Option<PathBuf>,

        /// Console ids to select, in order; defaults to the first consoles
        /// the plan needs
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,

        /// Verdict recorded for every manual check
        #[arg(long, value_enum, default_value_t = Verdict::Pass)]
        verdict: Verdict,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Verdict {
    Pass,
    Fail,
}

impl From<Verdict> for CheckVerdict {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => CheckVerdict::Pass,
            Verdict::Fail => CheckVerdict::Fail,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plans => {
            list_plans();
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig => check_config(&cli.config),
        Commands::Run {
            plan,
            plan_file,
            select,
            verdict,
        } => run_session(&cli.config, plan, plan_file, &select, verdict).await,
    }
}

fn list_plans() {
    for plan in SetupPlan::builtins() {
        println!("{} ({} consoles)", plan.name, plan.required_count());
        println!("    {}", plan.summary);
        for check in &plan.manual_checks {
            println!("    - {}: {}", check.id, check.description);
        }
    }
}

fn load_config(path: &Path) -> Result<HarnessConfig> {
    let config = HarnessConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<ExitCode> {
    let config = load_config(path)?;
    println!(
        "Configuration OK: {} consoles, title '{}' ({})",
        config.consoles.len(),
        config.title.name,
        config.title.install_type
    );
    Ok(ExitCode::SUCCESS)
}

fn resolve_plan(name: Option<String>, file: Option<PathBuf>) -> Result<SetupPlan> {
    if let Some(file) = file {
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        return SetupPlan::from_toml_str(&text);
    }
    let name = name.ok_or_else(|| anyhow!("no plan given"))?;
    SetupPlan::builtin(&name).ok_or_else(|| anyhow!("unknown plan '{}'; see `certkit plans`", name))
}

async fn run_session(
    config_path: &Path,
    plan: Option<String>,
    plan_file: Option<PathBuf>,
    select: &[String],
    verdict: Verdict,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    tracing_setup::init_from_config(&config).map_err(|e| anyhow!(e))?;
    let plan = resolve_plan(plan, plan_file)?;

    let host = Arc::new(ConsoleHost::new(true));
    let engine = Arc::new(SessionEngine::new(
        plan,
        config.title.clone(),
        host,
        config.session_settings(),
    )?);
    let bench = simulated_bench(&config);
    let selected: Vec<Arc<dyn ConsoleDevice>> = if select.is_empty() {
        bench
            .into_iter()
            .take(engine.plan().required_count())
            .collect()
    } else {
        select
            .iter()
            .map(|id| {
                bench
                    .iter()
                    .find(|device| device.id() == id)
                    .cloned()
                    .ok_or_else(|| anyhow!("no console '{}' in the configuration", id))
            })
            .collect::<Result<_>>()?
    };
    tracing::info!(
        plan = %engine.plan().name,
        consoles = selected.len(),
        "Starting setup session"
    );

    let interrupt = {
        let cancel = engine.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling session");
                cancel.cancel();
            }
        })
    };

    if let Err(err) = engine.advance(&selected).await {
        eprintln!("Setup did not complete: {}", err);
        if err.is_recoverable() {
            engine.stop().await;
        }
    }

    if engine.phase() == Phase::ReadyForManualVerification {
        let pending: Vec<String> = engine
            .snapshot()
            .checks
            .into_iter()
            .filter(|check| check.verdict.is_none())
            .map(|check| check.id)
            .collect();
        for id in pending {
            engine.record_check(&id, verdict.into()).await?;
        }
    }
    interrupt.abort();

    let snapshot = engine.snapshot();
    print_summary(&snapshot);
    Ok(if snapshot.phase == Phase::Aborted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(session: &SetupSession) {
    println!();
    println!("Session {} ({})", session.session_id, session.plan);
    println!("  Phase:   {}", session.phase);
    println!("  Outcome: {}", session.outcome);
    if let Some(reason) = &session.abort_reason {
        println!("  Aborted: {}", reason);
    }
    for (role, binding) in &session.roles {
        let profile = session
            .profiles
            .get(role)
            .map(|p| p.gamertag.as_str())
            .unwrap_or("-");
        println!("  {:<10} {:<16} {}", role.to_string(), binding.device_name, profile);
    }
    for check in &session.checks {
        let verdict = check.verdict.map(|v| v.as_str()).unwrap_or("NOT RECORDED");
        println!("  [{}] {}", verdict, check.description);
    }
}
