//! plumbline CLI and relay entry point.

mod args;
mod relay;
mod replay;

use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use plumbline_core::bus::{MessageBus, Transport};
use plumbline_core::config::InspectorConfig;
use plumbline_core::context::{ContextKind, ContextSet};
use plumbline_core::overlay::Transports;
use plumbline_core::protocol::Payload;
use tracing::{error, info};

use crate::args::{Cli, Commands, OutputFormat, ReplayArgs, SendArgs};
use crate::relay::{paths, RelayClient, RelayServer};
use crate::replay::Replay;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        // stdout carries replay frames and sent messages
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Relay => {
            run_relay();
            return;
        }
        Commands::Replay(args) => run_local(run_replay(args)),
        Commands::Send(args) => run_local(run_send(args)),
        Commands::Stop => run_stop(),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Drive a context on a single thread.
///
/// Context state is `Rc`-based, so it lives on a current-thread runtime
/// inside a `LocalSet`.
fn run_local(task: impl std::future::Future<Output = anyhow::Result<()>>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, task)
}

async fn run_replay(args: ReplayArgs) -> anyhow::Result<()> {
    let page = replay::load_page(&args.page)?;
    let steps = replay::load_script(&args.script)?;
    let config = InspectorConfig::load(args.config.as_deref()).context("Failed to load config")?;

    let mut client = if args.connect {
        Some(RelayClient::connect(ContextKind::Content).await?)
    } else {
        None
    };
    // Content-addressed messages stay on this page.
    let runtime: Option<Rc<dyn Transport>> = client
        .as_ref()
        .map(|c| c.transport(ContextSet::only(ContextKind::Background).with(ContextKind::Popup)) as Rc<dyn Transport>);
    let transports = Transports { runtime, tab: None };

    let replay = Replay::new(page, config, transports)?;
    if let Some(client) = client.as_mut() {
        client.listen(replay.context().bus());
        info!("Page overlay joined relay as {}", client.peer());
    }

    let frames = replay.run(&steps).await;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&frames)?),
        OutputFormat::Text => print!("{}", replay::render_text(&frames)),
    }

    drop(replay);
    if let Some(client) = client {
        client.close().await;
    }
    Ok(())
}

async fn run_send(args: SendArgs) -> anyhow::Result<()> {
    let data = serde_json::from_str(&args.data).context("--data is not valid JSON")?;
    let payload = Payload::from_parts(args.kind, data)
        .with_context(|| format!("--data does not fit a {} payload", args.kind))?;
    let target = if args.target.is_empty() {
        ContextSet::ALL
    } else {
        args.target.iter().copied().collect()
    };

    let client = RelayClient::connect(ContextKind::Popup).await?;
    let bus = MessageBus::new(ContextKind::Popup)
        .with_runtime_transport(client.transport(ContextSet::only(ContextKind::Background).with(ContextKind::Popup)))
        .with_tab_transport(client.transport(ContextSet::only(ContextKind::Content)));

    bus.send(payload, target).await;
    if let Some(sent) = bus.history().last() {
        println!("{}", serde_json::to_string(sent)?);
    }

    drop(bus);
    client.close().await;
    Ok(())
}

fn run_stop() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        if RelayClient::request_stop(&paths::get_socket_path(None)).await? {
            println!("Relay shutting down");
        } else {
            println!("Relay is not running");
        }
        Ok(())
    })
}

/// Run the relay until stopped, idle, or signalled.
///
/// The server's Drop removes the socket and PID files on every exit path
/// that returns here.
fn run_relay() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let server = match RelayServer::bind().await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start relay: {:#}", e);
                std::process::exit(1);
            }
        };
        info!("Relay ready at {:?}", server.socket_path());

        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Relay error: {}", e);
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
        }
    });
}

/// Resolve on SIGTERM. If the handler cannot be installed, never resolves.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}, relay will only respond to SIGINT", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
