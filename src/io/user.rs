//! Service user (requestor side)
//!
//! Opens an association, runs C-ECHO, C-FIND, C-STORE, C-GET and C-MOVE
//! over it and releases or aborts it.
//!
//! # Examples
//!
//! ```no_run
//! use dicompot::config::UserConfig;
//! use dicompot::io::user::ServiceUser;
//!
//! # async fn example() -> dicompot::error::Result<()> {
//! let config = UserConfig {
//!     remote_address: "127.0.0.1:11112".to_string(),
//!     called_ae_title: "radiant".to_string(),
//!     ..UserConfig::default()
//! };
//! let user = ServiceUser::connect(&config).await?;
//! user.c_echo().await?;
//! user.release().await?;
//! # Ok(())
//! # }
//! ```

use super::context::ContextManager;
use super::cstore::store_on_exchange;
use super::dispatcher::{ConnectionState, Dispatcher, Exchange};
use super::events::UpcallEvent;
use super::services::{StoreHandler, StoreService};
use super::state_machine::{RemoteTarget, StateMachine};
use super::tls::{insecure_client_config, native_client_config};
use super::transport::Connector;
use crate::config::UserConfig;
use crate::error::{DulError, Result};
use crate::protocol::dataset::{read_elements, write_elements, Element, Encoding};
use crate::protocol::dimse::{CommandField, DimseCommand, Status, SubOperations};
use crate::protocol::uid;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn check_status(operation: &str, status: &Status) -> Result<()> {
    if status.is_failure() {
        warn!(
            operation = operation,
            status = format_args!("{:#06x}", status.code),
            comment = %status.error_comment,
            "DIMSE operation failed"
        );
        return Err(DulError::OperationFailed {
            status: status.code,
            comment: status.error_comment.clone(),
        });
    }
    Ok(())
}

/// Await a background task, logging a panic or cancellation
///
/// Returns whether the task ran to completion.
async fn join_logged(label: &str, task: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(id = %label, task = task, error = %e, "Background task failed");
            false
        }
    }
}

/// Wait for the final response of `exchange`, feeding pending ones to
/// `on_pending`
async fn collect_responses(
    exchange: &mut Exchange,
    expected: CommandField,
    mut on_pending: impl FnMut(&DimseCommand, Vec<u8>) -> Result<()>,
) -> Result<DimseCommand> {
    loop {
        let message = exchange.expect_message().await?;
        if message.command.command_field != expected {
            warn!(
                id = %exchange.connection().label,
                command = %message.command,
                "Unexpected message on exchange"
            );
            continue;
        }
        let status = message
            .command
            .status
            .clone()
            .ok_or_else(|| DulError::InvalidCommand(format!("{} without a status", expected)))?;
        if status.is_pending() {
            on_pending(&message.command, message.data)?;
            continue;
        }
        return Ok(message.command);
    }
}

pub struct ServiceUser {
    label: String,
    dispatcher: Dispatcher,
    contexts: Arc<ContextManager>,
    machine: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl ServiceUser {
    /// Connect using the TLS options of `config`, if any
    pub async fn connect(config: &UserConfig) -> Result<Self> {
        let connector = match &config.tls {
            None => Connector::Tcp,
            Some(tls) => {
                let client_config = if tls.insecure {
                    insecure_client_config()
                } else {
                    native_client_config()?
                };
                let server_name = tls
                    .server_name
                    .clone()
                    .unwrap_or_else(|| config.remote_host().to_string());
                Connector::tls(client_config, &server_name)?
            }
        };
        Self::connect_with(config, connector).await
    }

    pub async fn connect_with(config: &UserConfig, connector: Connector) -> Result<Self> {
        config.validate()?;
        let label = format!("{}@{}", config.calling_ae_title.trim(), config.remote_address);
        let target = RemoteTarget {
            address: config.remote_address.clone(),
            called_ae_title: config.called_ae_title.clone(),
            connector,
        };
        let mut handle =
            StateMachine::spawn_requestor(label.clone(), config.association_settings(), target);

        let contexts = match handle.upcall.recv().await {
            Some(UpcallEvent::HandshakeCompleted { contexts }) => contexts,
            Some(UpcallEvent::Rejected(rj)) => {
                join_logged(&label, "state machine", handle.task).await;
                return Err(DulError::AssociationRejected {
                    result: rj.result,
                    reject_source: rj.source,
                    reason: rj.reason,
                });
            }
            Some(UpcallEvent::Aborted(cause)) => {
                join_logged(&label, "state machine", handle.task).await;
                return Err(DulError::Aborted(cause));
            }
            Some(UpcallEvent::Data { .. }) => {
                handle.task.abort();
                return Err(DulError::InvalidPdu("data before association".into()));
            }
            None => {
                join_logged(&label, "state machine", handle.task).await;
                return Err(DulError::ConnectionClosed(
                    "association ended during negotiation".into(),
                ));
            }
        };

        info!(
            id = %label,
            remote = %config.remote_address,
            called_ae = %config.called_ae_title,
            accepted = contexts.entries().filter(|e| e.is_accepted()).count(),
            "Association established"
        );
        let dispatcher = Dispatcher::new(
            ConnectionState {
                label: label.clone(),
                peer_addr: config.remote_address.parse().ok(),
            },
            handle.downcall.clone(),
            config.channel_capacity,
        );
        dispatcher
            .handle_upcall(UpcallEvent::HandshakeCompleted {
                contexts: contexts.clone(),
            })
            .await;
        let dispatcher_task = tokio::spawn(dispatcher.clone().run(handle.upcall));

        Ok(ServiceUser {
            label,
            dispatcher,
            contexts,
            machine: handle.task,
            dispatcher_task,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Contexts negotiated with the peer
    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub async fn c_echo(&self) -> Result<()> {
        let mut exchange = self.dispatcher.open_exchange(uid::VERIFICATION).await?;
        let result = async {
            exchange
                .send(DimseCommand::c_echo_rq(exchange.message_id()), Vec::new())
                .await?;
            collect_responses(&mut exchange, CommandField::CEchoRsp, |_, _| Ok(())).await
        }
        .await;
        exchange.close().await;
        let response = result?;
        check_status("C-ECHO", &response.status.unwrap_or_else(Status::success))
    }

    /// Run a C-FIND and return every matching identifier
    pub async fn c_find(&self, sop_class_uid: &str, query: &[Element]) -> Result<Vec<Vec<Element>>> {
        let mut exchange = self.dispatcher.open_exchange(sop_class_uid).await?;
        let mut matches = Vec::new();
        let result = async {
            let encoding = Encoding::from_transfer_syntax(&exchange.context().transfer_syntax_uid)?;
            let command = DimseCommand::c_find_rq(exchange.message_id(), sop_class_uid);
            exchange.send(command, write_elements(query, encoding)).await?;
            collect_responses(&mut exchange, CommandField::CFindRsp, |_, data| {
                if !data.is_empty() {
                    matches.push(read_elements(&data, encoding)?);
                }
                Ok(())
            })
            .await
        }
        .await;
        exchange.close().await;
        let response = result?;
        debug!(id = %self.label, matches = matches.len(), "C-FIND finished");
        check_status("C-FIND", &response.status.unwrap_or_else(Status::success))?;
        Ok(matches)
    }

    pub async fn c_store(
        &self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        elements: &[Element],
    ) -> Result<()> {
        let mut exchange = self.dispatcher.open_exchange(sop_class_uid).await?;
        let result = store_on_exchange(&mut exchange, sop_instance_uid, elements).await;
        exchange.close().await;
        check_status("C-STORE", &result?)
    }

    /// Run a C-GET; instances arrive as C-STORE requests and go to `store`
    pub async fn c_get(
        &self,
        sop_class_uid: &str,
        identifier: &[Element],
        store: Arc<dyn StoreHandler>,
    ) -> Result<SubOperations> {
        self.dispatcher
            .register(CommandField::CStoreRq, Arc::new(StoreService::new(store)))
            .await;
        let command = DimseCommand::c_get_rq(0, sop_class_uid);
        self.retrieve("C-GET", command, CommandField::CGetRsp, identifier)
            .await
    }

    /// Run a C-MOVE of the identified instances to `destination`
    pub async fn c_move(
        &self,
        sop_class_uid: &str,
        destination: &str,
        identifier: &[Element],
    ) -> Result<SubOperations> {
        let command = DimseCommand::c_move_rq(0, sop_class_uid, destination);
        self.retrieve("C-MOVE", command, CommandField::CMoveRsp, identifier)
            .await
    }

    async fn retrieve(
        &self,
        operation: &str,
        mut command: DimseCommand,
        response: CommandField,
        identifier: &[Element],
    ) -> Result<SubOperations> {
        let mut exchange = self
            .dispatcher
            .open_exchange(&command.affected_sop_class_uid.clone())
            .await?;
        command.message_id = Some(exchange.message_id());
        let label = self.label.clone();
        let result = async {
            let encoding = Encoding::from_transfer_syntax(&exchange.context().transfer_syntax_uid)?;
            exchange.send(command, write_elements(identifier, encoding)).await?;
            collect_responses(&mut exchange, response, |pending, _| {
                if let Some(counters) = pending.sub_operations {
                    debug!(
                        id = %label,
                        remaining = counters.remaining,
                        completed = counters.completed,
                        "{} progress",
                        operation
                    );
                }
                Ok(())
            })
            .await
        }
        .await;
        exchange.close().await;
        let final_response = result?;
        check_status(operation, &final_response.status.unwrap_or_else(Status::success))?;
        Ok(final_response.sub_operations.unwrap_or_default())
    }

    /// Release the association and wait for the engine to stop
    pub async fn release(self) -> Result<()> {
        debug!(id = %self.label, "Releasing association");
        self.dispatcher.release().await?;
        self.finish().await
    }

    /// Abort the association and wait for the engine to stop
    pub async fn abort(self) -> Result<()> {
        debug!(id = %self.label, "Aborting association");
        self.dispatcher.abort().await?;
        self.finish().await
    }

    async fn finish(self) -> Result<()> {
        self.machine
            .await
            .map_err(|e| DulError::ConnectionClosed(format!("state machine task failed: {}", e)))?;
        join_logged(&self.label, "dispatcher", self.dispatcher_task).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_logged_reports_task_outcome() {
        assert!(join_logged("test", "quiet", tokio::spawn(async {})).await);

        let panicked = tokio::spawn(async { panic!("dispatcher bug") });
        assert!(!join_logged("test", "dispatcher", panicked).await);

        let cancelled = tokio::spawn(std::future::pending::<()>());
        cancelled.abort();
        assert!(!join_logged("test", "state machine", cancelled).await);
    }
}
