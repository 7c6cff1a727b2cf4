mod cli;
mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use notify_client::{Burst, ReconnectingClient};
use relay_hub::{RelayClient, RelayConfig, RelayServer};

use crate::cli::{Cli, Command};
use crate::config::{Config, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let (mut cfg, found) = config::load(&cli.config)?;
    cfg.apply_cli(&cli);

    // 3. Init tracing-subscriber.
    init_tracing(&cfg.logging);
    config::warn_if_missing(&cli.config, found);

    match &cli.command {
        Some(Command::Send {
            application,
            payload,
            timeout,
        }) => send(&cfg, application, payload, Duration::from_secs(*timeout)).await,
        Some(Command::Serve) | None => serve(&cfg, &cli.config).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // stdout is reserved for `send` output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().with_thread_ids(true).init();
    } else {
        builder.init();
    }
}

async fn serve(cfg: &Config, config_file: &Path) -> Result<()> {
    let listen_addr: SocketAddr = cfg
        .relay
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    info!(
        config_file = %config_file.display(),
        listen = %listen_addr,
        notifier = cfg.notifier.enabled,
        "app-bridge starting"
    );

    // Shutdown signal (ctrl_c + SIGTERM).
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = RelayServer::bind(RelayConfig { listen_addr }).await?;

    let notifier = if cfg.notifier.enabled {
        let client = ReconnectingClient::new(cfg.notifier.to_client_config());
        let bursts = client.subscribe();
        let handle = client.spawn(shutdown.child_token());
        let feedback = tokio::spawn(consume_bursts(bursts, shutdown.clone()));
        Some((handle, feedback))
    } else {
        info!("notification client disabled");
        None
    };

    let relay_result = server.run(shutdown.clone()).await;
    // The relay may also stop on its own; take the notifier down with it.
    shutdown.cancel();

    if let Some((handle, feedback)) = notifier {
        let stats = handle.shutdown().await;
        let shown = feedback.await.unwrap_or_default();
        info!(
            attempts = stats.attempts,
            connections = stats.connections,
            bursts = stats.bursts,
            shown,
            "notification client finished"
        );
    }

    let registry = relay_result?;
    info!(
        connections = registry.connection_count(),
        channels = registry.channel_count(),
        "app-bridge shutting down"
    );
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                error!(%err, "failed to register SIGTERM handler; only ctrl-c will stop the bridge");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }

    shutdown.cancel();
}

/// Turn every notification into a visible feedback event.
///
/// Returns how many bursts were shown.
async fn consume_bursts(mut bursts: broadcast::Receiver<Burst>, shutdown: CancellationToken) -> u64 {
    let mut shown = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = bursts.recv() => match received {
                Ok(burst) => {
                    shown += 1;
                    info!(seq = burst.seq, len = burst.len, "burst");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "burst feedback fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    shown
}

/// One-shot: issue `payload` to `application` through the relay and print
/// the response.
async fn send(cfg: &Config, application: &str, payload: &str, timeout: Duration) -> Result<()> {
    let command: serde_json::Value =
        serde_json::from_str(payload).context("command payload is not valid JSON")?;

    let url = format!("ws://{}", cfg.relay.listen_addr);
    let mut client = RelayClient::connect(&url)
        .await
        .with_context(|| format!("failed to connect to relay at {url}"))?;

    let response = client
        .send_command(application, command, timeout)
        .await
        .with_context(|| format!("command to {application} failed"))?;
    client.close().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bursts_are_counted_until_sender_goes_away() {
        let (tx, rx) = broadcast::channel(8);
        let consumer = tokio::spawn(consume_bursts(rx, CancellationToken::new()));

        for seq in 1..=3 {
            tx.send(Burst { seq, len: 4 }).unwrap();
        }
        drop(tx);

        assert_eq!(consumer.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn burst_consumer_stops_on_shutdown() {
        let (_tx, rx) = broadcast::channel::<Burst>(8);
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn(consume_bursts(rx, shutdown.clone()));

        shutdown.cancel();
        assert_eq!(consumer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_rejects_invalid_json_before_connecting() {
        let err = send(
            &Config::default(),
            "photoshop",
            "{not json",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn send_round_trips_through_a_live_relay() {
        let server = RelayServer::bind(RelayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        })
        .await
        .unwrap();
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        let url = format!("ws://{addr}");
        let mut surface = RelayClient::connect(&url).await.unwrap();
        surface.register("photoshop").await.unwrap();
        let responder = tokio::spawn(async move {
            if let relay_hub::ServerEvent::CommandPacket(packet) = surface.next_event().await.unwrap() {
                surface
                    .respond(serde_json::json!({
                        "senderId": packet.sender_id.as_str(),
                        "response": {"ok": true},
                    }))
                    .await
                    .unwrap();
            }
        });

        let mut cfg = Config::default();
        cfg.relay.listen_addr = addr.to_string();
        send(&cfg, "photoshop", r#"{"action":"getLayers"}"#, Duration::from_secs(5))
            .await
            .unwrap();

        responder.await.unwrap();
        shutdown.cancel();
    }
}
