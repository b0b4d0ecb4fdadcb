//! C-STORE over an established association
//!
//! Shared by the service user's C-STORE, the provider's C-GET
//! sub-operations and C-MOVE forwarding.

use super::context::ContextManager;
use super::dispatcher::{Dispatcher, Exchange};
use crate::error::{DulError, Result};
use crate::protocol::dataset::{write_elements, Element, Encoding};
use crate::protocol::dimse::{CommandField, DimseCommand, Status};
use std::sync::Arc;
use tracing::{debug, warn};

/// Send one C-STORE-RQ on `exchange` and wait for its response status
///
/// The data set is encoded with the transfer syntax of the exchange's
/// presentation context.
pub async fn store_on_exchange(
    exchange: &mut Exchange,
    sop_instance_uid: &str,
    elements: &[Element],
) -> Result<Status> {
    let context = exchange.context().clone();
    let encoding = Encoding::from_transfer_syntax(&context.transfer_syntax_uid)?;
    let command = DimseCommand::c_store_rq(
        exchange.message_id(),
        &context.abstract_syntax_uid,
        sop_instance_uid,
    );
    debug!(
        id = %exchange.connection().label,
        message_id = exchange.message_id(),
        sop_class = %context.abstract_syntax_uid,
        sop_instance = sop_instance_uid,
        "Sending C-STORE"
    );
    exchange
        .send(command, write_elements(elements, encoding))
        .await?;

    loop {
        let message = exchange.expect_message().await?;
        if message.command.command_field != CommandField::CStoreRsp {
            warn!(
                id = %exchange.connection().label,
                command = %message.command,
                "Unexpected message while waiting for C-STORE-RSP"
            );
            continue;
        }
        return message.command.status.ok_or_else(|| {
            DulError::InvalidCommand("C-STORE-RSP without a status".into())
        });
    }
}

/// Run a C-STORE on its own nested exchange, closing it afterwards
pub async fn run_c_store_on_association(
    dispatcher: &Dispatcher,
    contexts: &Arc<ContextManager>,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    elements: &[Element],
) -> Result<Status> {
    let mut exchange = dispatcher
        .open_nested_exchange(contexts, sop_class_uid)
        .await?;
    let result = store_on_exchange(&mut exchange, sop_instance_uid, elements).await;
    dispatcher.close_nested_exchange(exchange).await;
    result
}
