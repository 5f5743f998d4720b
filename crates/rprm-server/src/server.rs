// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon core: TCP accept loop, one channel session per stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rprm::{ChannelSession, ResmgrError, ResourceManager, ResourceType, TransportError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};

pub mod stream;

pub use stream::StreamChannel;

/// Daemon error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Resource manager error: {0}")]
    Manager(#[from] ResmgrError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Resource manager daemon.
#[derive(Clone)]
pub struct RprmServer {
    config: Arc<ServerConfig>,
    manager: Arc<ResourceManager>,
    shutdown: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl RprmServer {
    /// Create the manager and register the configured resource types.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let manager = ResourceManager::new(config.manager.clone()).map_err(ConfigError::from)?;
        for resource in &config.resources {
            manager.register_resource_type(ResourceType::from_boxed(
                resource.name.clone(),
                resource.owner.clone(),
                resource.backend.build(),
            ))?;
        }

        Ok(Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
            shutdown: Arc::new(watch::channel(false).0),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))
    }

    /// Bind and serve until [`RprmServer::shutdown`].
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    ///
    /// Returns once shutdown was requested and every channel task has
    /// torn its connection down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        if let Ok(addr) = listener.local_addr() {
            info!("Resource manager listening on {}", addr);
        }

        let mut stop = self.shutdown.subscribe();
        let mut channels = JoinSet::new();

        while !*stop.borrow_and_update() {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("New channel from {}", peer_addr);
                            let channel = StreamChannel::new(
                                stream,
                                peer_addr,
                                self.manager.config().max_message_size,
                            );
                            let manager = self.manager.clone();
                            let stop = self.shutdown.subscribe();
                            channels.spawn(async move {
                                if let Err(e) = Self::handle_channel(channel, manager, stop).await {
                                    warn!("Channel error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(joined) = channels.join_next(), if !channels.is_empty() => {
                    if let Err(e) = joined {
                        error!("Channel task failed: {}", e);
                    }
                }
                _ = stop.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        debug!("Waiting for {} channel tasks", channels.len());
        while let Some(joined) = channels.join_next().await {
            if let Err(e) = joined {
                error!("Channel task failed: {}", e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serve one channel. The bound connection is torn down when the
    /// stream ends, fails, or the daemon shuts down.
    async fn handle_channel(
        mut channel: StreamChannel,
        manager: Arc<ResourceManager>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        let peer_addr = channel.peer_addr();
        let mut session = ChannelSession::new(manager.clone());

        let outcome = loop {
            if *stop.borrow_and_update() {
                debug!("Channel handler shutting down: {}", peer_addr);
                break Ok(());
            }
            tokio::select! {
                result = channel.read_message() => {
                    match result {
                        Ok(Some(msg)) => {
                            let reply = session.handle(&msg);
                            if let Err(e) = channel.send_message(&reply).await {
                                break Err(e.into());
                            }
                        }
                        Ok(None) => {
                            info!("Channel closed: {}", peer_addr);
                            break Ok(());
                        }
                        Err(e) => break Err(e.into()),
                    }
                }
                // Re-checked at the top of the loop. A dropped sender
                // means the daemon is gone.
                changed = stop.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        if let Some(report) = session.close() {
            info!(
                "Connection {} from {} torn down, {} releases, {} failed",
                report.connection,
                peer_addr,
                report.attempts(),
                report.failures.len()
            );
            log_snapshot(&manager);
        }
        outcome
    }

    /// Stop accepting and close every channel. Channel tasks busy with a
    /// message see the request once they get back to waiting.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Dump the manager state at debug level.
pub fn log_snapshot(manager: &ResourceManager) {
    for conn in manager.snapshot() {
        debug!(
            "connection {} (open {:?}): {} resources",
            conn.id,
            conn.age,
            conn.instances.len()
        );
        for inst in &conn.instances {
            debug!(
                "  #{} {} base=0x{:08x} constraints={:?} info={}",
                inst.id,
                inst.resource,
                inst.base,
                inst.constraints.mask,
                inst.info.as_deref().unwrap_or("-")
            );
        }
    }
}
