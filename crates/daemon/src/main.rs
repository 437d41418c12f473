// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! isle daemon (isled)
//!
//! Hosts one isolated machine and its TCP console.
//!
//! Architecture:
//! - Machine thread: owns the loop, the registry and all file state
//! - Tokio runtime: console listener and signal handling, reaching the
//!   loop only through the machine handle
//!
//! A `reboot` from the console tears the machine down and builds a
//! fresh one from the same configuration.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use isle_core::{ExitStatus, DIR_DRIVER};
use isle_daemon::{boot, config::Config, console};
use isle_engine::Machine;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] isle_daemon::config::ConfigError),
    #[error("state directory failure: {0}")]
    StateDir(std::io::Error),
    #[error("another isled owns {0}")]
    Locked(PathBuf),
    #[error("machine thread failure: {0}")]
    Thread(std::io::Error),
    #[error("tokio runtime failure: {0}")]
    Runtime(std::io::Error),
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("isled {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            "--help" | "-h" | "help" => {
                print_help();
                return;
            }
            "--check-config" => {
                let Some(path) = args.next() else {
                    eprintln!("error: --check-config needs a path");
                    std::process::exit(2);
                };
                match Config::load(Path::new(&path)) {
                    Ok(config) => {
                        println!("config ok: {} mounts", config.mounts.len());
                        return;
                    }
                    Err(err) => {
                        eprintln!("error: {err}");
                        std::process::exit(1);
                    }
                }
            }
            other if config_path.is_none() && !other.starts_with('-') => {
                config_path = Some(PathBuf::from(other));
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: isled [config.toml] [--check-config <path> | --help | --version]");
                std::process::exit(2);
            }
        }
    }

    match run(config_path) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("isled: {err}");
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!("isled {}", env!("CARGO_PKG_VERSION"));
    println!("isle daemon - hosts one isolated machine and its console");
    println!();
    println!("USAGE:");
    println!("    isled [config.toml]");
    println!();
    println!("OPTIONS:");
    println!("    --check-config <path>    Validate a config file and exit");
    println!("    -h, --help               Print help information");
    println!("    -v, --version            Print version information");
}

fn run(config_path: Option<PathBuf>) -> Result<(), DaemonError> {
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let _log_guard = init_tracing(&config);
    let _pid_lock = take_pid_lock()?;

    loop {
        info!("building isolated machine");
        let status = run_once(&config)?;
        match status {
            ExitStatus::Shutdown => {
                info!("machine exited gracefully");
                return Ok(());
            }
            ExitStatus::Reboot => {
                info!("machine rebooting");
                continue;
            }
            ExitStatus::Panic => {
                error!("machine panicked");
                std::process::exit(1);
            }
        }
    }
}

/// Builds a machine, runs it to completion, and returns its exit status.
fn run_once(config: &Config) -> Result<ExitStatus, DaemonError> {
    let (handle_tx, handle_rx) = std::sync::mpsc::channel();
    let machine_cfg = config.clone();
    let machine_thread = std::thread::Builder::new()
        .name("isle-machine".to_string())
        .spawn(move || -> ExitStatus {
            let mut machine = Machine::new(machine_cfg.machine_config());
            if let Err(err) = machine.install_pack(isle_drivers::pack()) {
                error!(%err, "driver pack installation failure");
                return ExitStatus::Panic;
            }
            if let Err(err) = machine.create_root(DIR_DRIVER) {
                error!(%err, "root creation failure");
                return ExitStatus::Panic;
            }
            let mounts = machine_cfg.mounts.clone();
            let handle = machine.handle();
            if handle_tx.send(handle).is_err() {
                return ExitStatus::Panic;
            }
            let queued = machine.handle().defer(move |host| {
                boot::boot(host, &mounts);
            });
            if queued.is_err() {
                return ExitStatus::Panic;
            }
            machine.run()
        })
        .map_err(DaemonError::Thread)?;

    let handle = match handle_rx.recv() {
        Ok(handle) => handle,
        Err(_) => {
            return Ok(machine_thread.join().unwrap_or(ExitStatus::Panic));
        }
    };

    let runtime = tokio::runtime::Runtime::new().map_err(DaemonError::Runtime)?;
    let listen = config.listen_addr()?;

    let console_handle = handle.clone();
    runtime.spawn(async move {
        match tokio::net::TcpListener::bind(listen).await {
            Ok(listener) => {
                info!(%listen, "console listening");
                if let Err(err) = console::serve(listener, console_handle).await {
                    error!(%err, "console listener failure");
                }
            }
            Err(err) => error!(%listen, %err, "console bind failure"),
        }
    });

    let signal_handle = handle.clone();
    runtime.spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut interrupt), Ok(mut terminate)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            return;
        };
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        info!("shutdown signal received");
        let _ = signal_handle.defer(|host| host.exit(ExitStatus::Shutdown));
    });

    let status = machine_thread.join().unwrap_or(ExitStatus::Panic);
    runtime.shutdown_background();
    Ok(status)
}

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "isled.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// One isled per state directory.
fn take_pid_lock() -> Result<File, DaemonError> {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("isle");
    std::fs::create_dir_all(&state_dir).map_err(DaemonError::StateDir)?;
    let path = state_dir.join("isled.pid");
    let file = File::create(&path).map_err(DaemonError::StateDir)?;
    file.try_lock_exclusive()
        .map_err(|_| DaemonError::Locked(path.clone()))?;
    std::fs::write(&path, format!("{}\n", std::process::id())).map_err(DaemonError::StateDir)?;
    Ok(file)
}
