//! Provider-side DIMSE services
//!
//! Each service adapts an application callback to the dispatcher's
//! [`CommandHandler`] contract: it decodes the request, runs the callback
//! and streams the responses back on the request's exchange. Callbacks
//! stream their results through an `mpsc::Sender`; dropping it ends the
//! stream.

use super::cstore::run_c_store_on_association;
use super::dispatcher::{CommandHandler, ConnectionState, Exchange};
use super::state_machine::AssociationSettings;
use super::transport::Connector;
use super::user::ServiceUser;
use crate::config::UserConfig;
use crate::error::{DulError, Result};
use crate::protocol::dataset::{read_elements, write_elements, Element, Encoding};
use crate::protocol::dimse::{status, DimseCommand, Status, SubOperations};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the callback result channels
pub const RESULT_CHANNEL_CAPACITY: usize = 128;

/// Decoded C-FIND, C-MOVE or C-GET request handed to a callback
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub connection: ConnectionState,
    pub transfer_syntax_uid: String,
    pub sop_class_uid: String,
    /// Query keys (C-FIND) or retrieve identifiers (C-MOVE, C-GET)
    pub elements: Vec<Element>,
    /// C-MOVE only
    pub move_destination: Option<String>,
    pub session_id: String,
}

/// C-STORE request handed to a callback
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub connection: ConnectionState,
    pub transfer_syntax_uid: String,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// Data set in `transfer_syntax_uid`
    pub data: Vec<u8>,
    pub session_id: String,
}

impl StoreRequest {
    pub fn elements(&self) -> Result<Vec<Element>> {
        read_elements(
            &self.data,
            Encoding::from_transfer_syntax(&self.transfer_syntax_uid)?,
        )
    }
}

/// One instance produced by a retrieve callback
#[derive(Debug, Clone)]
pub struct RetrieveItem {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub elements: Vec<Element>,
    /// Instances still to come after this one
    pub remaining: u16,
}

#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Send every match to `matches`; an error ends the query with a
    /// failure status
    async fn find(&self, request: QueryRequest, matches: mpsc::Sender<Vec<Element>>)
        -> Result<()>;
}

#[async_trait]
pub trait RetrieveHandler: Send + Sync {
    async fn retrieve(
        &self,
        request: QueryRequest,
        items: mpsc::Sender<RetrieveItem>,
    ) -> Result<()>;
}

#[async_trait]
pub trait StoreHandler: Send + Sync {
    async fn store(&self, request: StoreRequest) -> Status;
}

/// Printable summary of query keys, e.g. `(0010,0010)=DOE^J*`
pub fn describe_elements(elements: &[Element]) -> String {
    elements
        .iter()
        .filter(|e| !e.undefined_length && e.vr.map_or(true, |vr| &vr != b"SQ"))
        .map(|e| format!("{}={}", e.tag, e.value_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_request(
    request: &DimseCommand,
    data: &[u8],
    exchange: &Exchange,
) -> Result<QueryRequest> {
    let transfer_syntax_uid = exchange.context().transfer_syntax_uid.clone();
    let elements = read_elements(data, Encoding::from_transfer_syntax(&transfer_syntax_uid)?)?;
    Ok(QueryRequest {
        connection: exchange.connection().clone(),
        transfer_syntax_uid,
        sop_class_uid: request.affected_sop_class_uid.clone(),
        elements,
        move_destination: request.move_destination.clone(),
        session_id: exchange.connection().label.clone(),
    })
}

async fn respond(exchange: &Exchange, request: &DimseCommand, status: Status) -> Result<()> {
    exchange
        .send(DimseCommand::response_to(request, status), Vec::new())
        .await
}

/// C-ECHO: always answers success
pub struct EchoService;

#[async_trait]
impl CommandHandler for EchoService {
    async fn handle(
        &self,
        request: DimseCommand,
        _data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()> {
        info!(id = %exchange.connection().label, "C-ECHO received");
        respond(exchange, &request, Status::success()).await
    }
}

/// C-FIND backed by a [`QueryHandler`]
pub struct FindService {
    handler: Arc<dyn QueryHandler>,
}

impl FindService {
    pub fn new(handler: Arc<dyn QueryHandler>) -> Self {
        FindService { handler }
    }
}

#[async_trait]
impl CommandHandler for FindService {
    async fn handle(
        &self,
        request: DimseCommand,
        data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()> {
        let label = exchange.connection().label.clone();
        let query = match decode_request(&request, &data, exchange) {
            Ok(query) => query,
            Err(e) => {
                warn!(id = %label, error = %e, "Undecodable C-FIND identifier");
                let status = Status::new(status::UNRECOGNIZED_OPERATION, e.to_string());
                return respond(exchange, &request, status).await;
            }
        };
        info!(
            id = %label,
            sop_class = %query.sop_class_uid,
            query = %describe_elements(&query.elements),
            "C-FIND received"
        );
        let encoding = Encoding::from_transfer_syntax(&query.transfer_syntax_uid)?;

        let (tx, mut rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let produce = self.handler.find(query, tx);
        let forward = async {
            let mut count = 0usize;
            let mut failure = None;
            while let Some(elements) = rx.recv().await {
                if failure.is_some() {
                    continue;
                }
                let pending = DimseCommand::response_to(&request, Status::pending()).with_data_set();
                match exchange.send(pending, write_elements(&elements, encoding)).await {
                    Ok(()) => count += 1,
                    Err(e) => failure = Some(e),
                }
            }
            failure.map_or(Ok(count), Err)
        };
        let (produced, forwarded) = tokio::join!(produce, forward);
        let count = forwarded?;

        let status = match produced {
            Ok(()) => Status::success(),
            Err(e) => {
                warn!(id = %label, error = %e, "C-FIND callback failed");
                Status::new(status::UNABLE_TO_PROCESS, e.to_string())
            }
        };
        info!(id = %label, matches = count, "C-FIND completed");
        respond(exchange, &request, status).await
    }
}

/// C-GET backed by a [`RetrieveHandler`]; instances travel back as C-STORE
/// sub-operations on the same association
pub struct GetService {
    handler: Arc<dyn RetrieveHandler>,
}

impl GetService {
    pub fn new(handler: Arc<dyn RetrieveHandler>) -> Self {
        GetService { handler }
    }
}

#[async_trait]
impl CommandHandler for GetService {
    async fn handle(
        &self,
        request: DimseCommand,
        data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()> {
        let label = exchange.connection().label.clone();
        let query = match decode_request(&request, &data, exchange) {
            Ok(query) => query,
            Err(e) => {
                warn!(id = %label, error = %e, "Undecodable C-GET identifier");
                let status = Status::new(status::UNRECOGNIZED_OPERATION, e.to_string());
                return respond(exchange, &request, status).await;
            }
        };
        info!(
            id = %label,
            sop_class = %query.sop_class_uid,
            query = %describe_elements(&query.elements),
            "C-GET received"
        );

        let dispatcher = exchange.dispatcher().clone();
        let contexts = exchange.contexts().clone();
        let (tx, mut rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let produce = self.handler.retrieve(query, tx);
        let forward = async {
            let mut counters = SubOperations::default();
            let mut failure = None;
            while let Some(item) = rx.recv().await {
                if failure.is_some() {
                    continue;
                }
                let outcome = run_c_store_on_association(
                    &dispatcher,
                    &contexts,
                    &item.sop_class_uid,
                    &item.sop_instance_uid,
                    &item.elements,
                )
                .await;
                match outcome {
                    Ok(status) if status.is_success() => counters.completed += 1,
                    Ok(status) if status.is_warning() => counters.warning += 1,
                    Ok(status) => {
                        debug!(id = %label, status = status.code, "C-STORE sub-operation failed");
                        counters.failed += 1
                    }
                    Err(e) if e.is_fatal() => {
                        failure = Some(e);
                        continue;
                    }
                    Err(e) => {
                        debug!(id = %label, error = %e, "C-STORE sub-operation failed");
                        counters.failed += 1
                    }
                }
                counters.remaining = item.remaining;
                let pending = DimseCommand::response_to(&request, Status::pending())
                    .with_sub_operations(counters);
                if let Err(e) = exchange.send(pending, Vec::new()).await {
                    failure = Some(e);
                }
            }
            failure.map_or(Ok(counters), Err)
        };
        let (produced, forwarded) = tokio::join!(produce, forward);
        let mut counters = forwarded?;
        counters.remaining = 0;

        let status = final_retrieve_status(produced, &counters);
        info!(
            id = %label,
            completed = counters.completed,
            failed = counters.failed,
            warning = counters.warning,
            "C-GET completed"
        );
        exchange
            .send(
                DimseCommand::response_to(&request, status).with_sub_operations(counters),
                Vec::new(),
            )
            .await
    }
}

fn final_retrieve_status(produced: Result<()>, counters: &SubOperations) -> Status {
    match produced {
        Err(e) => Status::new(status::UNABLE_TO_PROCESS, e.to_string()),
        Ok(()) if counters.failed > 0 || counters.warning > 0 => Status::new(
            status::SUB_OPERATIONS_WARNING,
            format!("{} sub-operations failed", counters.failed),
        ),
        Ok(()) => Status::success(),
    }
}

/// C-MOVE backed by a [`RetrieveHandler`]
///
/// The move destination is resolved through the remote AE table and the
/// instances are sent there on a new association.
pub struct MoveService {
    handler: Arc<dyn RetrieveHandler>,
    local_ae_title: String,
    remote_aes: HashMap<String, String>,
    settings: AssociationSettings,
}

impl MoveService {
    pub fn new(
        handler: Arc<dyn RetrieveHandler>,
        local_ae_title: impl Into<String>,
        remote_aes: HashMap<String, String>,
    ) -> Self {
        MoveService {
            handler,
            local_ae_title: local_ae_title.into(),
            remote_aes,
            settings: AssociationSettings::default(),
        }
    }

    /// Parameters for the outgoing associations
    pub fn with_settings(mut self, settings: AssociationSettings) -> Self {
        self.settings = settings;
        self
    }

    fn destination_config(&self, destination: &str, address: &str) -> UserConfig {
        UserConfig {
            remote_address: address.to_string(),
            called_ae_title: destination.to_string(),
            calling_ae_title: self.local_ae_title.clone(),
            max_pdu_size: self.settings.max_pdu_size,
            artim_timeout_ms: self.settings.artim_timeout.as_millis() as u64,
            channel_capacity: self.settings.channel_capacity,
            ..UserConfig::default()
        }
    }
}

#[async_trait]
impl CommandHandler for MoveService {
    async fn handle(
        &self,
        request: DimseCommand,
        data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()> {
        let label = exchange.connection().label.clone();
        let query = match decode_request(&request, &data, exchange) {
            Ok(query) => query,
            Err(e) => {
                warn!(id = %label, error = %e, "Undecodable C-MOVE identifier");
                let status = Status::new(status::UNRECOGNIZED_OPERATION, e.to_string());
                return respond(exchange, &request, status).await;
            }
        };
        let destination = query.move_destination.clone().unwrap_or_default();
        info!(
            id = %label,
            sop_class = %query.sop_class_uid,
            destination = %destination,
            query = %describe_elements(&query.elements),
            "C-MOVE received"
        );

        let Some(address) = self.remote_aes.get(destination.trim()).cloned() else {
            warn!(id = %label, destination = %destination, "Unknown move destination");
            let status = Status::new(
                status::MOVE_DESTINATION_UNKNOWN,
                format!("Unknown move destination {}", destination),
            );
            return respond(exchange, &request, status).await;
        };

        let (tx, mut rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let produce = self.handler.retrieve(query, tx);
        let forward = async {
            let mut counters = SubOperations::default();
            let mut failure = None;
            let mut store_user: Option<ServiceUser> = None;
            while let Some(item) = rx.recv().await {
                if failure.is_some() {
                    continue;
                }
                if store_user.is_none() {
                    let mut config = self.destination_config(destination.trim(), &address);
                    config.abstract_syntaxes = vec![item.sop_class_uid.clone()];
                    match ServiceUser::connect_with(&config, Connector::Tcp).await {
                        Ok(user) => store_user = Some(user),
                        Err(e) => warn!(id = %label, error = %e, "Cannot reach move destination"),
                    }
                }
                let stored = match &store_user {
                    Some(user) => {
                        user.c_store(&item.sop_class_uid, &item.sop_instance_uid, &item.elements)
                            .await
                    }
                    None => Err(DulError::ConnectionClosed("move destination unreachable".into())),
                };
                match stored {
                    Ok(()) => counters.completed += 1,
                    Err(e) => {
                        debug!(id = %label, error = %e, "C-MOVE sub-operation failed");
                        counters.failed += 1;
                    }
                }
                counters.remaining = item.remaining;
                let pending = DimseCommand::response_to(&request, Status::pending())
                    .with_sub_operations(counters);
                if let Err(e) = exchange.send(pending, Vec::new()).await {
                    failure = Some(e);
                }
            }
            if let Some(user) = store_user {
                if let Err(e) = user.release().await {
                    debug!(id = %label, error = %e, "Release of move association failed");
                }
            }
            failure.map_or(Ok(counters), Err)
        };
        let (produced, forwarded) = tokio::join!(produce, forward);
        let mut counters = forwarded?;
        counters.remaining = 0;

        let status = final_retrieve_status(produced, &counters);
        info!(
            id = %label,
            destination = %destination,
            completed = counters.completed,
            failed = counters.failed,
            "C-MOVE completed"
        );
        exchange
            .send(
                DimseCommand::response_to(&request, status).with_sub_operations(counters),
                Vec::new(),
            )
            .await
    }
}

/// C-STORE backed by a [`StoreHandler`]
pub struct StoreService {
    handler: Arc<dyn StoreHandler>,
}

impl StoreService {
    pub fn new(handler: Arc<dyn StoreHandler>) -> Self {
        StoreService { handler }
    }
}

#[async_trait]
impl CommandHandler for StoreService {
    async fn handle(
        &self,
        request: DimseCommand,
        data: Vec<u8>,
        exchange: &mut Exchange,
    ) -> Result<()> {
        let store = StoreRequest {
            connection: exchange.connection().clone(),
            transfer_syntax_uid: exchange.context().transfer_syntax_uid.clone(),
            sop_class_uid: request.affected_sop_class_uid.clone(),
            sop_instance_uid: request.affected_sop_instance_uid.clone().unwrap_or_default(),
            data,
            session_id: exchange.connection().label.clone(),
        };
        info!(
            id = %store.session_id,
            sop_class = %store.sop_class_uid,
            sop_instance = %store.sop_instance_uid,
            size = store.data.len(),
            "C-STORE received"
        );
        let status = self.handler.store(store).await;
        respond(exchange, &request, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dataset::tags;

    #[test]
    fn test_describe_elements_skips_sequences() {
        let elements = vec![
            Element::text(tags::PATIENT_NAME, b"PN", "DOE^J*"),
            Element {
                tag: crate::protocol::dataset::Tag::new(0x0008, 0x1110),
                vr: Some(*b"SQ"),
                value: vec![],
                undefined_length: true,
            },
            Element::text(tags::QUERY_RETRIEVE_LEVEL, b"CS", "STUDY"),
        ];
        assert_eq!(
            describe_elements(&elements),
            "(0010,0010)=DOE^J* (0008,0052)=STUDY"
        );
    }

    #[test]
    fn test_final_retrieve_status() {
        let clean = SubOperations {
            completed: 3,
            ..SubOperations::default()
        };
        assert!(final_retrieve_status(Ok(()), &clean).is_success());

        let partial = SubOperations {
            completed: 2,
            failed: 1,
            ..SubOperations::default()
        };
        assert_eq!(
            final_retrieve_status(Ok(()), &partial).code,
            status::SUB_OPERATIONS_WARNING
        );

        let failed = final_retrieve_status(Err(DulError::Config("boom".into())), &clean);
        assert_eq!(failed.code, status::UNABLE_TO_PROCESS);
    }
}
