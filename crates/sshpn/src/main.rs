//! sshpn entry point

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sshpn::state::PUBLIC_IP_FACT;
use sshpn::{
    Cli, DryRunExecutor, Executor, FactProvider, FileStateStore, LifecyclePhase, MemoryStateStore,
    RunOptions, SessionTarget, ShellExecutor, ShellFactProvider, SshpnConfig, StateStore, StaticFacts,
    TunnelOrchestrator, TunnelRequest,
};
use sshpn_common::TunnelError;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<TunnelError>()
                .map(TunnelError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let request = cli.request()?;

    let config = match &cli.config {
        Some(path) => SshpnConfig::load_file(path),
        None => SshpnConfig::load(),
    }
    .context("failed to load configuration")?;

    let target = SessionTarget::new(&request.host)
        .with_user(config.session.user.as_str())
        .with_socket(cli.socket.clone().unwrap_or_else(|| config.session.socket.clone()));
    let options = RunOptions {
        quiet: cli.quiet,
        sudo: config.local.sudo,
    };
    let file_store = FileStateStore::new(&config.state.dir);
    debug!(
        socket = %target.socket,
        state_dir = %file_store.dir().display(),
        "Resolved session"
    );

    let (executor, facts, store): (Box<dyn Executor>, Box<dyn FactProvider>, Box<dyn StateStore>) =
        if cli.dry_run {
            warn!("Dry run: facts are placeholders and no state is written");
            let store = dry_run_store(&file_store, &request)?;
            (
                Box::new(DryRunExecutor::new()),
                Box::new(StaticFacts::placeholders()),
                Box::new(store),
            )
        } else {
            (
                Box::new(ShellExecutor::new()),
                Box::new(ShellFactProvider::new()),
                Box::new(file_store),
            )
        };

    let outcome = TunnelOrchestrator::new(&target, executor.as_ref(), facts.as_ref(), store.as_ref())
        .with_options(options)
        .run(&request.spec, request.phase)
        .await?;

    if let Some(notice) = outcome.notice {
        println!("{}", notice);
    }
    Ok(())
}

/// Stop needs the recorded public address; a dry run reads it but never
/// writes back.
fn dry_run_store(
    file_store: &FileStateStore,
    request: &TunnelRequest,
) -> anyhow::Result<MemoryStateStore> {
    if request.phase != LifecyclePhase::Stop {
        return Ok(MemoryStateStore::new());
    }
    let key = request.spec.identity().state_key(PUBLIC_IP_FACT);
    Ok(match file_store.get(&key)? {
        Some(value) => MemoryStateStore::with_entry(&key, &value),
        None => MemoryStateStore::new(),
    })
}
