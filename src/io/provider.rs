//! Service provider (acceptor side)
//!
//! Listens for TCP connections, optionally wraps them in TLS, and runs one
//! state machine plus dispatcher per connection. Connections are fully
//! independent; a failing peer only ends its own task.
//!
//! # Examples
//!
//! ```no_run
//! use dicompot::config::ProviderConfig;
//! use dicompot::io::provider::ServiceProvider;
//!
//! #[tokio::main]
//! async fn main() -> dicompot::error::Result<()> {
//!     let provider = ServiceProvider::bind(ProviderConfig::default())
//!         .await?
//!         .with_echo();
//!     provider.run().await;
//!     Ok(())
//! }
//! ```

use super::dispatcher::{CommandHandler, ConnectionState, Dispatcher};
use super::services::{
    EchoService, FindService, GetService, MoveService, QueryHandler, RetrieveHandler,
    StoreHandler, StoreService,
};
use super::state_machine::{AssociationSettings, StateMachine};
use super::tls;
use super::transport::BoxedTransport;
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::protocol::dimse::CommandField;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Hands out connection labels `conn-1`, `conn-2`, ...
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new(seed: u64) -> Self {
        ConnectionIdGenerator {
            next: AtomicU64::new(seed),
        }
    }

    pub fn next_label(&self) -> String {
        format!("conn-{}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

pub struct ServiceProvider {
    config: ProviderConfig,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    ids: ConnectionIdGenerator,
    handlers: HashMap<CommandField, Arc<dyn CommandHandler>>,
}

impl ServiceProvider {
    /// Validate `config`, load the TLS identity if configured and bind the
    /// listening socket
    pub async fn bind(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let acceptor = match &config.tls {
            Some(tls_config) => Some(tls::acceptor(&tls_config.cert_path, &tls_config.key_path)?),
            None => None,
        };
        let listener = TcpListener::bind(&config.listen_address).await?;
        info!(
            addr = %listener.local_addr()?,
            ae_title = %config.ae_title,
            enforce_ae_title = config.enforce_ae_title,
            tls = acceptor.is_some(),
            "Service provider listening"
        );
        Ok(ServiceProvider {
            ids: ConnectionIdGenerator::new(config.connection_id_seed),
            config,
            listener,
            acceptor,
            handlers: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Register a handler for `command_field` on every future connection
    pub fn register(mut self, command_field: CommandField, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(command_field, handler);
        self
    }

    pub fn with_echo(self) -> Self {
        self.register(CommandField::CEchoRq, Arc::new(EchoService))
    }

    pub fn with_find(self, handler: Arc<dyn QueryHandler>) -> Self {
        self.register(CommandField::CFindRq, Arc::new(FindService::new(handler)))
    }

    pub fn with_get(self, handler: Arc<dyn RetrieveHandler>) -> Self {
        self.register(CommandField::CGetRq, Arc::new(GetService::new(handler)))
    }

    /// C-MOVE destinations come from the configured remote AE table
    pub fn with_move(self, handler: Arc<dyn RetrieveHandler>) -> Self {
        let service = MoveService::new(
            handler,
            self.config.ae_title.clone(),
            self.config.remote_aes.clone(),
        )
        .with_settings(self.config.association_settings());
        self.register(CommandField::CMoveRq, Arc::new(service))
    }

    pub fn with_store(self, handler: Arc<dyn StoreHandler>) -> Self {
        self.register(CommandField::CStoreRq, Arc::new(StoreService::new(handler)))
    }

    /// Accept one connection and serve it in its own task
    pub async fn accept(&self) -> Result<JoinHandle<()>> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let label = self.ids.next_label();
        info!(id = %label, peer = %peer_addr, "Connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(id = %label, error = %e, "Cannot set TCP_NODELAY");
        }
        Ok(tokio::spawn(serve_connection(
            label,
            stream,
            peer_addr,
            self.acceptor.clone(),
            self.config.association_settings(),
            self.handlers.clone(),
        )))
    }

    /// Accept connections forever
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.accept().await {
                warn!(error = %e, "Accept failed");
            }
        }
    }
}

async fn serve_connection(
    label: String,
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    settings: AssociationSettings,
    handlers: HashMap<CommandField, Arc<dyn CommandHandler>>,
) {
    let transport: BoxedTransport = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => Box::new(tls_stream),
            Err(e) => {
                warn!(id = %label, peer = %peer_addr, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => Box::new(stream),
    };

    let capacity = settings.channel_capacity;
    let handle = StateMachine::spawn_acceptor(label.clone(), settings, transport);
    let dispatcher = Dispatcher::new(
        ConnectionState {
            label: label.clone(),
            peer_addr: Some(peer_addr),
        },
        handle.downcall,
        capacity,
    );
    for (command_field, handler) in handlers {
        dispatcher.register(command_field, handler).await;
    }

    dispatcher.run(handle.upcall).await;
    if let Err(e) = handle.task.await {
        warn!(id = %label, error = %e, "State machine task failed");
    }
    info!(id = %label, peer = %peer_addr, "Connection finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_labels_are_sequential() {
        let ids = ConnectionIdGenerator::new(41);
        assert_eq!(ids.next_label(), "conn-41");
        assert_eq!(ids.next_label(), "conn-42");
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ProviderConfig {
            ae_title: String::new(),
            ..ProviderConfig::default()
        };
        assert!(ServiceProvider::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ProviderConfig {
            listen_address: "127.0.0.1:0".to_string(),
            ..ProviderConfig::default()
        };
        let provider = ServiceProvider::bind(config).await.unwrap().with_echo();
        assert_ne!(provider.local_addr().unwrap().port(), 0);
        assert!(provider.handlers.contains_key(&CommandField::CEchoRq));
    }
}
