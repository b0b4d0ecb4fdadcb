//! DIMSE service dispatcher
//!
//! Consumes the upcall stream of one association. Requests from the peer
//! open a peer-initiated exchange and run the handler registered for the
//! command type in its own task; responses are routed to the
//! locally-initiated exchange that is waiting for them.
//!
//! Exchange keys carry their origin, so a peer request with message id N and
//! a local request with message id N never share a result channel.

use super::context::{ContextEntry, ContextManager};
use super::events::{StateEvent, UpcallEvent};
use super::state::Event;
use crate::error::{DulError, Result};
use crate::protocol::dimse::{status, CommandField, DimseCommand, Status};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

/// Identity of the connection a dispatcher serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub label: String,
    pub peer_addr: Option<SocketAddr>,
}

/// Which side allocated an exchange's message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeKey {
    pub message_id: u16,
    pub origin: Origin,
}

impl ExchangeKey {
    pub fn local(message_id: u16) -> Self {
        ExchangeKey {
            message_id,
            origin: Origin::Local,
        }
    }

    pub fn peer(message_id: u16) -> Self {
        ExchangeKey {
            message_id,
            origin: Origin::Peer,
        }
    }
}

/// DIMSE message delivered to an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMessage {
    pub command: DimseCommand,
    pub data: Vec<u8>,
}

/// Handles one request type on the provider side
///
/// `exchange` carries the negotiated context of the request and is the
/// channel for responses and any later messages of the same exchange
/// (C-CANCEL, nested C-STORE responses).
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        request: DimseCommand,
        data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()>;
}

struct PendingExchange {
    context_id: u8,
    sender: mpsc::Sender<ExchangeMessage>,
}

struct ExchangeTable {
    entries: HashMap<ExchangeKey, PendingExchange>,
    next_message_id: u16,
    closed: bool,
}

/// Next message id not in use, starting at `*next` and wrapping past 65535
///
/// Message id 0 is never handed out.
fn next_free_id(next: &mut u16, in_use: impl Fn(u16) -> bool) -> Result<u16> {
    for _ in 0..=u16::MAX as u32 {
        let id = (*next).max(1);
        *next = id.wrapping_add(1);
        if !in_use(id) {
            return Ok(id);
        }
    }
    Err(DulError::MessageIdExhausted)
}

struct DispatcherInner {
    connection: ConnectionState,
    downcall: mpsc::Sender<StateEvent>,
    capacity: usize,
    contexts: RwLock<Option<Arc<ContextManager>>>,
    exchanges: Mutex<ExchangeTable>,
    handlers: RwLock<HashMap<CommandField, Arc<dyn CommandHandler>>>,
}

/// Shared handle to the dispatcher of one association
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        connection: ConnectionState,
        downcall: mpsc::Sender<StateEvent>,
        capacity: usize,
    ) -> Self {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                connection,
                downcall,
                capacity: capacity.max(1),
                contexts: RwLock::new(None),
                exchanges: Mutex::new(ExchangeTable {
                    entries: HashMap::new(),
                    next_message_id: 1,
                    closed: false,
                }),
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.inner.connection
    }

    /// Register the handler for a request type, replacing any previous one
    pub async fn register(&self, command_field: CommandField, handler: Arc<dyn CommandHandler>) {
        debug!(id = %self.inner.connection.label, command = %command_field, "Handler registered");
        self.inner.handlers.write().await.insert(command_field, handler);
    }

    /// Contexts negotiated by the handshake, once it completed
    pub async fn contexts(&self) -> Option<Arc<ContextManager>> {
        self.inner.contexts.read().await.clone()
    }

    /// Number of exchanges currently open
    pub async fn pending_exchanges(&self) -> usize {
        self.inner.exchanges.lock().await.entries.len()
    }

    /// Consume upcalls until the state machine closes the channel
    pub async fn run(self, mut upcall: mpsc::Receiver<UpcallEvent>) {
        while let Some(event) = upcall.recv().await {
            self.handle_upcall(event).await;
        }
        debug!(id = %self.inner.connection.label, "Upcall channel closed");
        self.close().await;
    }

    pub async fn handle_upcall(&self, event: UpcallEvent) {
        match event {
            UpcallEvent::HandshakeCompleted { contexts } => {
                debug!(
                    id = %self.inner.connection.label,
                    contexts = contexts.entries().count(),
                    "Handshake completed"
                );
                *self.inner.contexts.write().await = Some(contexts);
            }
            UpcallEvent::Data {
                contexts,
                context_id,
                command,
                data,
            } => self.route(contexts, context_id, command, data).await,
            UpcallEvent::Rejected(rj) => {
                debug!(id = %self.inner.connection.label, reason = rj.reason, "Association rejected");
                self.close().await;
            }
            UpcallEvent::Aborted(cause) => {
                debug!(id = %self.inner.connection.label, cause = %cause, "Association aborted");
                self.close().await;
            }
        }
    }

    async fn route(
        &self,
        contexts: Arc<ContextManager>,
        context_id: u8,
        command: DimseCommand,
        data: Vec<u8>,
    ) {
        let label = &self.inner.connection.label;
        let entry = match contexts.lookup_by_context_id(context_id) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!(id = %label, context_id = context_id, error = %e, "Message on unusable context");
                let _ = self
                    .inner
                    .downcall
                    .send(StateEvent::with_error(Event::InvalidPdu, e.to_string()))
                    .await;
                return;
            }
        };

        let field = command.command_field;
        if field.is_response() || field == CommandField::CCancelRq {
            let key = if field.is_response() {
                ExchangeKey::local(command.routing_id())
            } else {
                ExchangeKey::peer(command.routing_id())
            };
            self.deliver(key, ExchangeMessage { command, data }).await;
            return;
        }

        info!(
            id = %label,
            command = %field,
            sop_class = %command.affected_sop_class_uid,
            message_id = command.routing_id(),
            "Request received"
        );

        let handler = self.inner.handlers.read().await.get(&field).cloned();
        let Some(handler) = handler else {
            warn!(id = %label, command = %field, "No handler registered, answering unrecognized");
            let response = DimseCommand::response_to(
                &command,
                Status::new(
                    status::UNRECOGNIZED_OPERATION,
                    format!("No callback found for {}", field),
                ),
            );
            if let Err(e) = self
                .send_message(&entry.abstract_syntax_uid, response, Vec::new())
                .await
            {
                debug!(id = %label, error = %e, "Could not answer unrecognized request");
            }
            return;
        };

        let key = ExchangeKey::peer(command.routing_id());
        let abstract_syntax = entry.abstract_syntax_uid.clone();
        let mut exchange = match self.register_exchange(key, entry, contexts).await {
            Ok(exchange) => exchange,
            Err(DulError::ConnectionClosed(reason)) => {
                debug!(id = %label, reason = %reason, "Request arrived after close");
                return;
            }
            Err(e) => {
                warn!(id = %label, error = %e, "Cannot open exchange for request");
                let response = DimseCommand::response_to(
                    &command,
                    Status::new(status::PROCESSING_FAILURE, e.to_string()),
                );
                if let Err(e) = self.send_message(&abstract_syntax, response, Vec::new()).await {
                    debug!(id = %label, error = %e, "Could not answer rejected request");
                }
                return;
            }
        };

        let label = label.clone();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let worker_label = label.clone();
            let worker = tokio::spawn(async move {
                if let Err(e) = handler.handle(command.clone(), data, &mut exchange).await {
                    warn!(id = %worker_label, command = %command.command_field, error = %e, "Handler failed");
                    if !e.is_fatal() {
                        let response = DimseCommand::response_to(
                            &command,
                            Status::new(status::PROCESSING_FAILURE, e.to_string()),
                        );
                        let _ = exchange.send(response, Vec::new()).await;
                    }
                }
                exchange.close().await;
            });
            // a panicking handler never reaches close
            if let Err(e) = worker.await {
                warn!(id = %label, key = ?key, error = %e, "Handler task failed");
                dispatcher.remove_exchange(key).await;
            }
        });
    }

    async fn deliver(&self, key: ExchangeKey, message: ExchangeMessage) {
        let sender = {
            let table = self.inner.exchanges.lock().await;
            table.entries.get(&key).map(|pending| pending.sender.clone())
        };
        match sender {
            Some(sender) => {
                trace!(id = %self.inner.connection.label, key = ?key, command = %message.command, "Delivering to exchange");
                if sender.send(message).await.is_err() {
                    debug!(id = %self.inner.connection.label, key = ?key, "Exchange receiver gone");
                }
            }
            None => warn!(
                id = %self.inner.connection.label,
                key = ?key,
                command = %message.command,
                "No exchange for message, dropped"
            ),
        }
    }

    async fn register_exchange(
        &self,
        key: ExchangeKey,
        context: ContextEntry,
        contexts: Arc<ContextManager>,
    ) -> Result<Exchange> {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let mut table = self.inner.exchanges.lock().await;
        if table.closed {
            return Err(DulError::ConnectionClosed("dispatcher closed".into()));
        }
        if table.entries.contains_key(&key) {
            return Err(DulError::InvalidCommand(format!(
                "message id {} already in use",
                key.message_id
            )));
        }
        table.entries.insert(
            key,
            PendingExchange {
                context_id: context.context_id,
                sender,
            },
        );
        Ok(Exchange {
            key,
            context,
            contexts,
            receiver,
            dispatcher: self.clone(),
        })
    }

    /// Open a locally-initiated exchange on the negotiated contexts
    pub async fn open_exchange(&self, abstract_syntax: &str) -> Result<Exchange> {
        let contexts = self
            .contexts()
            .await
            .ok_or_else(|| DulError::ConnectionClosed("association not established".into()))?;
        self.open_nested_exchange(&contexts, abstract_syntax).await
    }

    /// Open a locally-initiated exchange sharing `contexts`
    ///
    /// Used while serving another exchange, such as the C-STORE
    /// sub-operations of a C-GET.
    pub async fn open_nested_exchange(
        &self,
        contexts: &Arc<ContextManager>,
        abstract_syntax: &str,
    ) -> Result<Exchange> {
        let context = contexts.lookup_by_abstract_syntax(abstract_syntax)?.clone();
        let message_id = {
            let mut table = self.inner.exchanges.lock().await;
            let ExchangeTable {
                entries,
                next_message_id,
                ..
            } = &mut *table;
            next_free_id(next_message_id, |id| {
                entries.contains_key(&ExchangeKey::local(id))
            })?
        };
        trace!(id = %self.inner.connection.label, message_id = message_id, "Opening exchange");
        self.register_exchange(ExchangeKey::local(message_id), context, contexts.clone())
            .await
    }

    pub async fn close_nested_exchange(&self, exchange: Exchange) {
        exchange.close().await;
    }

    async fn remove_exchange(&self, key: ExchangeKey) {
        let removed = self.inner.exchanges.lock().await.entries.remove(&key);
        if let Some(pending) = removed {
            trace!(
                id = %self.inner.connection.label,
                key = ?key,
                context_id = pending.context_id,
                "Exchange closed"
            );
        }
    }

    /// Hand a DIMSE message to the state machine
    pub async fn send_message(
        &self,
        abstract_syntax: &str,
        command: DimseCommand,
        data: Vec<u8>,
    ) -> Result<()> {
        self.inner
            .downcall
            .send(StateEvent::data_request(abstract_syntax, command, data))
            .await
            .map_err(|_| DulError::ConnectionClosed("state machine stopped".into()))
    }

    pub async fn release(&self) -> Result<()> {
        self.inner
            .downcall
            .send(StateEvent::release_request())
            .await
            .map_err(|_| DulError::ConnectionClosed("state machine stopped".into()))
    }

    pub async fn abort(&self) -> Result<()> {
        self.inner
            .downcall
            .send(StateEvent::abort_request())
            .await
            .map_err(|_| DulError::ConnectionClosed("state machine stopped".into()))
    }

    /// Close every exchange's channel and refuse new ones
    pub async fn close(&self) {
        let mut table = self.inner.exchanges.lock().await;
        table.closed = true;
        if !table.entries.is_empty() {
            debug!(
                id = %self.inner.connection.label,
                exchanges = table.entries.len(),
                "Closing open exchanges"
            );
        }
        table.entries.clear();
    }
}

/// One request/response exchange
pub struct Exchange {
    key: ExchangeKey,
    context: ContextEntry,
    contexts: Arc<ContextManager>,
    receiver: mpsc::Receiver<ExchangeMessage>,
    dispatcher: Dispatcher,
}

impl Exchange {
    pub fn message_id(&self) -> u16 {
        self.key.message_id
    }

    pub fn origin(&self) -> Origin {
        self.key.origin
    }

    /// Presentation context the exchange runs on
    pub fn context(&self) -> &ContextEntry {
        &self.context
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connection(&self) -> &ConnectionState {
        self.dispatcher.connection()
    }

    /// Send a message on the exchange's presentation context
    pub async fn send(&self, command: DimseCommand, data: Vec<u8>) -> Result<()> {
        self.dispatcher
            .send_message(&self.context.abstract_syntax_uid, command, data)
            .await
    }

    /// Next message for this exchange; `None` once the association ends
    pub async fn recv(&mut self) -> Option<ExchangeMessage> {
        self.receiver.recv().await
    }

    /// Next message, or an error if the association ended first
    pub async fn expect_message(&mut self) -> Result<ExchangeMessage> {
        self.recv().await.ok_or_else(|| {
            DulError::ConnectionClosed(format!(
                "association ended while waiting on message id {}",
                self.key.message_id
            ))
        })
    }

    pub async fn close(self) {
        self.dispatcher.remove_exchange(self.key).await;
    }
}
