// src/lib.rs

pub mod cli;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::controller::{Controller, ControllerOptions, deadline_for};
use crate::descriptor::CommandDescriptor;
use crate::exec::ProcessExecutor;
use crate::store::{DescriptorStore, FileDescriptorStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (plus the `--document` override)
/// - the file-backed descriptor store
/// - the privileged process executor
/// - the controller loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.as_deref().map(Path::new);
    let mut cfg = load_or_default(config_path).context("loading configuration")?;

    if let Some(document) = &args.document {
        cfg.store.document = PathBuf::from(document);
    }
    info!(document = ?cfg.store.document, "using descriptor document");

    let store = FileDescriptorStore::new(&cfg.store.document);

    if args.dry_run {
        print_dry_run(&cfg, &store).await?;
        return Ok(());
    }

    let executor = ProcessExecutor::from_config(&cfg.executor);
    let options = ControllerOptions {
        exit_when_idle: args.once,
    };
    let controller = Controller::new(&cfg, Arc::new(store), Arc::new(executor), options);

    // Ctrl-C -> graceful shutdown.
    {
        let handle = controller.handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            handle.shutdown();
        });
    }

    controller.run().await?;
    Ok(())
}

/// Print the effective policy and the decoded current descriptor.
async fn print_dry_run(cfg: &ConfigFile, store: &FileDescriptorStore) -> Result<()> {
    let doc = store
        .fetch()
        .await
        .with_context(|| format!("reading descriptor {}", store.path().display()))?;
    let descriptor = CommandDescriptor::from_document(&doc);

    println!("shellrelay dry-run");
    println!("  store.document = {}", cfg.store.document.display());
    println!(
        "  limits: max_count = {}, warn_count = {}, max_wait_secs = {}, output_limit = {}",
        cfg.limits.max_count, cfg.limits.warn_count, cfg.limits.max_wait_secs, cfg.limits.output_limit
    );
    println!(
        "  executor: elevate = {:?}, shell = {}, command_timeout = {}s, privilege_cache = {}s",
        cfg.executor.elevate,
        cfg.executor.shell,
        cfg.executor.command_timeout_secs,
        cfg.executor.privilege_cache_secs
    );
    println!(
        "  watchdog: max_retry = {}, grace = {}ms, check_interval = {}ms",
        cfg.watchdog.max_retry, cfg.watchdog.grace_period_ms, cfg.watchdog.check_interval_ms
    );
    println!();

    println!("descriptor:");
    println!("  command: {:?}", descriptor.command);
    println!("  enabled: {}", descriptor.enabled);
    match descriptor.validate(&cfg.limits) {
        Ok(validated) => {
            let deadline = deadline_for(validated.count, validated.wait_seconds, &cfg.watchdog);
            println!("  count: {} (requested {})", validated.count, descriptor.count);
            println!("  wait: {}s (requested {})", validated.wait_seconds, descriptor.wait_seconds);
            println!("  watchdog deadline: {}ms", deadline.as_millis());
        }
        Err(err) => println!("  invalid: {err}"),
    }
    if !descriptor.result.is_empty() {
        println!("  last result: {}", descriptor.result);
    }
    if !descriptor.error.is_empty() {
        println!("  last error: {}", descriptor.error);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
