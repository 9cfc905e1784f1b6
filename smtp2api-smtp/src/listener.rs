use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use smtp2api_common::{Signal, error::ListenerError, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use crate::session::{Session, SessionConfig};

/// Accepts SMTP connections and runs one [`Session`] task per client.
pub struct Listener {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    shutdown_timeout: Duration,
}

impl Listener {
    /// Bind to `address` without accepting yet.
    ///
    /// # Errors
    ///
    /// [`ListenerError::BindFailed`] when the socket cannot be bound.
    pub async fn bind(address: SocketAddr, config: SessionConfig) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            shutdown_timeout: config.timeouts.shutdown(),
            config: Arc::new(config),
            listener,
        })
    }

    /// The address actually bound, which differs from the requested one for port `0`
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal arrives, then give open
    /// sessions up to the shutdown timeout to finish before aborting them.
    #[tracing::instrument(skip_all, fields(address = ?self.listener.local_addr().ok()))]
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, "Serving SMTP with {:?}", self.config);
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    internal!(
                        level = INFO,
                        "Received shutdown signal, finishing {} session(s) ...",
                        sessions.len()
                    );
                    break;
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            internal!(level = ERROR, "{}", ListenerError::AcceptFailed(err));
                            continue;
                        }
                    };

                    tracing::debug!("Connection received from {peer}");
                    sessions.retain(|session| !session.is_finished());

                    let session = Session::new(stream, peer, Arc::clone(&self.config));
                    let signal = shutdown.resubscribe();
                    sessions.push(tokio::spawn(async move {
                        match session.run(signal).await {
                            Err(err) if err.is_disconnect() => {
                                internal!(level = DEBUG, "Client went away: {err}");
                            }
                            Err(err) => internal!(level = ERROR, "Session failed: {err}"),
                            Ok(()) => {}
                        }
                    }));
                }
            }
        }

        let aborts: Vec<_> = sessions.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.shutdown_timeout, join_all(sessions))
            .await
            .is_err()
        {
            internal!(
                level = WARN,
                "Sessions still open after {} seconds, aborting them",
                self.shutdown_timeout.as_secs()
            );

            for abort in aborts {
                abort.abort();
            }
        }
    }
}
