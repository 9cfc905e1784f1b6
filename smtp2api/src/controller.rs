use std::{io, net::SocketAddr, sync::Arc};

use smtp2api_common::{Signal, internal, message::MailParser, tracing};
use smtp2api_dispatch::DispatchCoordinator;
use smtp2api_smtp::{Listener, SessionConfig};
use tokio::sync::broadcast;

use crate::{config::Config, relay::Relay};

/// Owns the listener and the shutdown channel it is stopped through.
pub struct Gateway {
    listener: Listener,
    shutdown: broadcast::Sender<Signal>,
}

impl Gateway {
    /// Build the providers and bind the SMTP listener
    ///
    /// # Errors
    ///
    /// Fails on an invalid provider configuration or if the listen address
    /// cannot be bound.
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(config.registry()?);
        internal!(
            level = INFO,
            "Providers: {:?} ({:?})",
            registry.names(),
            registry.selection()
        );

        let relay = Relay::new(
            MailParser::new(&config.email_defaults),
            DispatchCoordinator::new(
                registry,
                config.dispatch.retry.clone(),
                config.dispatch.send_timeout(),
            ),
        );

        let listener = Listener::bind(
            config.smtp.listen,
            SessionConfig::from_config(&config.smtp, Arc::new(relay)),
        )
        .await?;

        let (shutdown, _receiver) = broadcast::channel(16);
        Ok(Self { listener, shutdown })
    }

    /// The bound SMTP address
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A sender that stops the gateway once [`Signal::Shutdown`] is sent on it
    pub fn shutdown_handle(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    /// Serve until a shutdown is requested through [`Gateway::shutdown_handle`]
    pub async fn serve(self) {
        let receiver = self.shutdown.subscribe();
        self.listener.serve(receiver).await;
    }

    /// Serve until SIGINT or SIGTERM, then shut down gracefully
    ///
    /// # Errors
    ///
    /// Fails if the signal handlers cannot be installed.
    #[tracing::instrument(skip_all)]
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = self.shutdown_handle();
        let mut server = tokio::spawn(self.serve());

        tokio::select! {
            result = &mut server => {
                result?;
                return Ok(());
            }
            result = wait_for_signal() => result?,
        }

        internal!(level = INFO, "Shutting down...");
        // Fails only when the listener is already gone
        let _ = shutdown.send(Signal::Shutdown);
        server.await?;

        internal!(level = INFO, "Shutdown complete");
        Ok(())
    }
}

async fn wait_for_signal() -> io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    }

    Ok(())
}
