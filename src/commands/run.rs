use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

use relaycast::channels::{ControlChannel, GatewayClient, Mailbox};
use relaycast::config::Config;
use relaycast::control::ControlSurface;
use relaycast::metrics;
use relaycast::scheduler::Distributor;
use relaycast::server::ControlServer;
use relaycast::storage::{SharedState, StateStore};

/// Run every long-lived activity until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relaycast starting");

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let bootstrap_admin = config.control.bootstrap_admin;
    let store = StateStore::new(&config.store.path, bootstrap_admin);
    let (state, outcome) = SharedState::open(store).with_context(|| {
        format!(
            "Failed to open state document: {}",
            config.store.path.display()
        )
    })?;
    tracing::info!(path = %config.store.path.display(), outcome = ?outcome, "State ready");

    let gateway = Arc::new(
        GatewayClient::new(config.gateway.clone()).context("Invalid gateway configuration")?,
    );
    let (mailbox, mailbox_handle) = Mailbox::new(gateway.clone(), config.control.mailbox_capacity);
    let channel: Arc<dyn ControlChannel> = Arc::new(mailbox);

    let distributor = Distributor::new(
        state.clone(),
        gateway.clone(),
        gateway.clone(),
        config.distribution_config(),
    );
    let surface = Arc::new(
        ControlSurface::new(state, bootstrap_admin)
            .with_import_timeout(config.import_timeout())
            .with_default_daily_cap(config.distribution.default_daily_cap),
    );

    let address: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address()))?;
    let server = ControlServer::new(address, mailbox_handle, config.reply_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { server.serve(shutdown).await }
    });
    let loop_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { distributor.run(shutdown).await }
    });
    let control_task = tokio::spawn(Arc::clone(&surface).serve(Arc::clone(&channel), shutdown_rx));

    surface.announce_start(channel.as_ref()).await;

    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
            None
        }
        result = &mut server_task => Some(result),
    };

    shutdown_tx.send(true).ok();

    if let Err(e) = loop_task.await {
        tracing::error!(error = %e, "Distribution loop task failed");
    }
    if let Err(e) = control_task.await {
        tracing::error!(error = %e, "Control surface task failed");
    }

    let server_result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };
    server_result
        .context("HTTP server task failed")?
        .context("HTTP server failed")?;

    tracing::info!("relaycast stopped");
    Ok(())
}
