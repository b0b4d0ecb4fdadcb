//! Per-connection Upper Layer state machine
//!
//! One [`StateMachine`] runs as a tokio task per association. It waits on
//! four event sources (network reader, ARTIM timer, downcalls from the
//! service layer, internal errors), looks the `(state, event)` pair up in
//! the transition table and runs the resulting action. The task ends when
//! the machine returns to Idle; the upcall channel closes with it.
//!
//! # Examples
//!
//! ```no_run
//! use dicompot::io::state_machine::{AssociationSettings, StateMachine};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> dicompot::error::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:11112").await?;
//! let (stream, _) = listener.accept().await?;
//! let mut handle = StateMachine::spawn_acceptor(
//!     "conn-1".to_string(),
//!     AssociationSettings::default(),
//!     Box::new(stream),
//! );
//! while let Some(event) = handle.upcall.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use super::assembler::{max_fragment_size, split_into_pdus, CommandAssembler};
use super::context::ContextManager;
use super::events::{EventPayload, StateEvent, UpcallEvent};
use super::reader::spawn_reader;
use super::state::{resolve, Action, Event, State};
use super::timer::{ArtimTimer, DEFAULT_ARTIM_TIMEOUT};
use super::transport::{BoxedTransport, Connector};
use crate::error::{DulError, Result};
use crate::protocol::pdu::{
    self, reject, AssociatePdu, Pdu, DEFAULT_MAX_PDU_SIZE, PROTOCOL_VERSION,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default capacity of every per-connection channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Default delay before rejecting an association for policy reasons
pub const DEFAULT_REJECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the association (service user)
    Requestor,
    /// Accepted the association (service provider)
    Acceptor,
}

/// Negotiation parameters of one association
#[derive(Debug, Clone)]
pub struct AssociationSettings {
    /// Local AE title. Called AE for the acceptor, calling AE for the requestor.
    pub ae_title: String,
    /// Reject requests whose called AE title differs from `ae_title`
    pub enforce_ae_title: bool,
    pub reject_delay: Duration,
    pub artim_timeout: Duration,
    /// Largest PDU we advertise and accept
    pub max_pdu_size: u32,
    pub channel_capacity: usize,
    /// Requestor: syntaxes to propose. Acceptor: syntaxes to accept (empty
    /// accepts anything).
    pub abstract_syntaxes: Vec<String>,
    pub transfer_syntaxes: Vec<String>,
}

impl Default for AssociationSettings {
    fn default() -> Self {
        AssociationSettings {
            ae_title: "radiant".to_string(),
            enforce_ae_title: false,
            reject_delay: DEFAULT_REJECT_DELAY,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            abstract_syntaxes: Vec::new(),
            transfer_syntaxes: Vec::new(),
        }
    }
}

/// Peer the requestor side connects to
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub address: String,
    pub called_ae_title: String,
    pub connector: Connector,
}

/// Channels of a running state machine
pub struct MachineHandle {
    pub label: String,
    pub downcall: mpsc::Sender<StateEvent>,
    pub upcall: mpsc::Receiver<UpcallEvent>,
    pub task: JoinHandle<()>,
}

pub struct StateMachine {
    label: String,
    role: Role,
    state: State,
    settings: AssociationSettings,
    target: Option<RemoteTarget>,
    contexts: Arc<ContextManager>,
    assembler: CommandAssembler,
    timer: ArtimTimer,
    writer: Option<WriteHalf<BoxedTransport>>,
    reader: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    net_tx: mpsc::Sender<StateEvent>,
    net_rx: mpsc::Receiver<StateEvent>,
    error_tx: mpsc::Sender<StateEvent>,
    error_rx: mpsc::Receiver<StateEvent>,
    downcall_rx: mpsc::Receiver<StateEvent>,
    downcall_open: bool,
    upcall: Option<mpsc::Sender<UpcallEvent>>,
    /// Events raised by actions, handled before any external source
    pending: VecDeque<StateEvent>,
}

impl StateMachine {
    fn new(
        label: String,
        role: Role,
        settings: AssociationSettings,
        target: Option<RemoteTarget>,
    ) -> (Self, mpsc::Sender<StateEvent>, mpsc::Receiver<UpcallEvent>) {
        let capacity = settings.channel_capacity.max(1);
        let (net_tx, net_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);
        let (downcall_tx, downcall_rx) = mpsc::channel(capacity);
        let (upcall_tx, upcall_rx) = mpsc::channel(capacity);

        let contexts = match role {
            Role::Acceptor => ContextManager::new(label.clone()).with_acceptance(
                settings.abstract_syntaxes.clone(),
                settings.transfer_syntaxes.clone(),
            ),
            Role::Requestor => ContextManager::new(label.clone()),
        };

        let machine = StateMachine {
            timer: ArtimTimer::new(settings.artim_timeout),
            label,
            role,
            state: State::Idle,
            settings,
            target,
            contexts: Arc::new(contexts),
            assembler: CommandAssembler::new(),
            writer: None,
            reader: None,
            connect_task: None,
            net_tx,
            net_rx,
            error_tx,
            error_rx,
            downcall_rx,
            downcall_open: true,
            upcall: Some(upcall_tx),
            pending: VecDeque::new(),
        };
        (machine, downcall_tx, upcall_rx)
    }

    /// Run the acceptor side over an accepted transport connection
    pub fn spawn_acceptor(
        label: String,
        settings: AssociationSettings,
        transport: BoxedTransport,
    ) -> MachineHandle {
        let (machine, downcall, upcall) =
            StateMachine::new(label.clone(), Role::Acceptor, settings, None);
        let first = StateEvent {
            event: Event::TransportConnectIndication,
            payload: EventPayload::Transport(transport),
        };
        MachineHandle {
            label,
            downcall,
            upcall,
            task: tokio::spawn(machine.run(first)),
        }
    }

    /// Run the requestor side; the machine opens the connection itself
    pub fn spawn_requestor(
        label: String,
        settings: AssociationSettings,
        target: RemoteTarget,
    ) -> MachineHandle {
        let (machine, downcall, upcall) =
            StateMachine::new(label.clone(), Role::Requestor, settings, Some(target));
        MachineHandle {
            label,
            downcall,
            upcall,
            task: tokio::spawn(machine.run(StateEvent::new(Event::AssociateRequest))),
        }
    }

    async fn run(mut self, first: StateEvent) {
        debug!(id = %self.label, role = ?self.role, "State machine started");
        self.pending.push_back(first);

        loop {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self.next_event().await,
            };
            let action = resolve(self.state, event.event);
            debug!(
                id = %self.label,
                state = %self.state,
                event = %event.event,
                action = action.name(),
                "Running action"
            );

            let next = self.execute(action, event).await;
            if next != self.state {
                trace!(id = %self.label, from = %self.state, to = %next, "State changed");
            }
            self.state = next;
            if self.state == State::Idle {
                break;
            }
        }

        self.shutdown().await;
        debug!(id = %self.label, "State machine finished");
    }

    async fn next_event(&mut self) -> StateEvent {
        loop {
            tokio::select! {
                Some(event) = self.error_rx.recv() => return event,
                Some(event) = self.net_rx.recv() => return event,
                armed_in = self.timer.expired() => {
                    warn!(id = %self.label, state = %armed_in, "ARTIM expired");
                    return StateEvent::with_error(
                        Event::ArtimExpired,
                        format!("ARTIM expired in {}", armed_in),
                    );
                }
                event = self.downcall_rx.recv(), if self.downcall_open => match event {
                    Some(event) => return event,
                    None => {
                        debug!(id = %self.label, "Downcall channel closed");
                        self.downcall_open = false;
                    }
                },
            }
        }
    }

    async fn execute(&mut self, action: Action, event: StateEvent) -> State {
        match action {
            Action::Ae1 => self.ae1().await,
            Action::Ae2 => self.ae2(event.payload).await,
            Action::Ae3 => self.ae3(event.payload).await,
            Action::Ae4 => self.ae4(event.payload).await,
            Action::Ae5 => self.ae5(event.payload).await,
            Action::Ae6 => self.ae6(event.payload).await,
            Action::Ae7 => self.ae7(event.payload).await,
            Action::Ae8 => self.ae8(event.payload).await,
            Action::Dt1 => self.dt1(event.payload).await,
            Action::Dt2 => self.dt2(event.payload).await,
            Action::Ar1 => self.ar1().await,
            Action::Ar2 => self.ar2(),
            Action::Ar3 => self.ar3().await,
            Action::Ar4 => self.ar4().await,
            Action::Ar5 => self.ar5(),
            Action::Ar6 => self.ar6(event.payload).await,
            Action::Ar7 => self.ar7(event.payload).await,
            Action::Ar8 => self.ar8(),
            Action::Ar9 => self.ar9().await,
            Action::Ar10 => self.ar10(),
            Action::Aa1 => self.aa1().await,
            Action::Aa2 => self.aa2().await,
            Action::Aa3 => self.aa3(event.payload).await,
            Action::Aa4 => self.aa4(event.payload).await,
            Action::Aa5 => self.aa5(),
            Action::Aa6 => self.aa6(event.event),
            Action::Aa7 => self.aa7().await,
            Action::Aa8 => self.aa8(describe(&event.payload)).await,
        }
    }

    // Association establishment

    async fn ae1(&mut self) -> State {
        let Some(target) = self.target.clone() else {
            warn!(id = %self.label, "Association request without a remote target");
            return self.aa2().await;
        };
        let net = self.net_tx.clone();
        let errors = self.error_tx.clone();
        let timeout = self.settings.artim_timeout;
        let label = self.label.clone();

        self.connect_task = Some(tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, target.connector.connect(&target.address))
                .await
                .unwrap_or(Err(DulError::Timeout));
            match outcome {
                Ok(transport) => {
                    let _ = net
                        .send(StateEvent {
                            event: Event::TransportConnectConfirm,
                            payload: EventPayload::Transport(transport),
                        })
                        .await;
                }
                Err(e) => {
                    warn!(id = %label, addr = %target.address, error = %e, "Connect failed");
                    let _ = errors
                        .send(StateEvent::with_error(
                            Event::TransportClosed,
                            format!("connect to {} failed: {}", target.address, e),
                        ))
                        .await;
                }
            }
        }));
        State::AwaitingTransportOpen
    }

    async fn ae2(&mut self, payload: EventPayload) -> State {
        let EventPayload::Transport(transport) = payload else {
            return self.invariant("transport confirmation without a transport").await;
        };
        self.attach_transport(transport);

        let Some(target) = self.target.clone() else {
            return self.invariant("requestor without a remote target").await;
        };
        let abstract_syntaxes = self.settings.abstract_syntaxes.clone();
        let transfer_syntaxes = self.settings.transfer_syntaxes.clone();
        let max_pdu_size = self.settings.max_pdu_size;
        let items = match Arc::make_mut(&mut self.contexts).build_proposal(
            &abstract_syntaxes,
            &transfer_syntaxes,
            max_pdu_size,
        ) {
            Ok(items) => items,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Cannot build association proposal");
                self.upcall(UpcallEvent::Aborted(e.to_string())).await;
                return self.aa2().await;
            }
        };

        info!(
            id = %self.label,
            called_ae = %target.called_ae_title,
            calling_ae = %self.settings.ae_title,
            contexts = abstract_syntaxes.len(),
            "Requesting association"
        );
        let rq = Pdu::AssociateRq(AssociatePdu {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: target.called_ae_title,
            calling_ae_title: self.settings.ae_title.clone(),
            items,
        });
        self.send_pdu(&rq).await;
        self.timer.start(State::AwaitingAssociateResponse);
        State::AwaitingAssociateResponse
    }

    async fn ae3(&mut self, payload: EventPayload) -> State {
        self.timer.stop();
        let EventPayload::Pdu(Pdu::AssociateAc(ac)) = payload else {
            return self.invariant("A-ASSOCIATE-AC event without its PDU").await;
        };
        if let Err(e) = Arc::make_mut(&mut self.contexts).resolve_response(&ac.items) {
            warn!(id = %self.label, error = %e, "Invalid A-ASSOCIATE-AC");
            return self.aa8(e.to_string()).await;
        }
        info!(
            id = %self.label,
            peer_max_pdu = self.contexts.peer_max_pdu_size(),
            implementation = %self.contexts.peer_implementation_version_name(),
            "Association accepted by peer"
        );
        let contexts = self.contexts.clone();
        self.upcall(UpcallEvent::HandshakeCompleted { contexts }).await;
        State::Established
    }

    async fn ae4(&mut self, payload: EventPayload) -> State {
        self.timer.stop();
        if let EventPayload::Pdu(Pdu::AssociateRj(rj)) = payload {
            warn!(
                id = %self.label,
                result = rj.result,
                source = rj.source,
                reason = rj.reason,
                "Association rejected by peer"
            );
            self.upcall(UpcallEvent::Rejected(rj)).await;
        }
        self.close_transport().await;
        State::Idle
    }

    async fn ae5(&mut self, payload: EventPayload) -> State {
        let EventPayload::Transport(transport) = payload else {
            return self.invariant("connection indication without a transport").await;
        };
        self.attach_transport(transport);
        self.timer.start(State::AwaitingAssociateRq);
        State::AwaitingAssociateRq
    }

    async fn ae6(&mut self, payload: EventPayload) -> State {
        self.timer.stop();
        let EventPayload::Pdu(Pdu::AssociateRq(rq)) = payload else {
            return self.invariant("A-ASSOCIATE-RQ event without its PDU").await;
        };

        if self.settings.enforce_ae_title
            && rq.called_ae_title.trim() != self.settings.ae_title.trim()
        {
            warn!(
                id = %self.label,
                called_ae = %rq.called_ae_title,
                calling_ae = %rq.calling_ae_title,
                expected_ae = %self.settings.ae_title,
                "Called AE title mismatch, rejecting association"
            );
            tokio::time::sleep(self.settings.reject_delay).await;
            let rj = Pdu::reject(
                reject::RESULT_PERMANENT,
                reject::SOURCE_SERVICE_USER,
                reject::REASON_CALLED_AE_NOT_RECOGNIZED,
            );
            self.send_pdu(&rj).await;
            self.timer.start(State::AwaitingTransportClose);
            return State::AwaitingTransportClose;
        }

        info!(
            id = %self.label,
            called_ae = %rq.called_ae_title,
            calling_ae = %rq.calling_ae_title,
            "Association requested"
        );

        if rq.protocol_version != PROTOCOL_VERSION {
            warn!(id = %self.label, version = rq.protocol_version, "Unsupported protocol version");
            let rj = Pdu::reject(
                reject::RESULT_PERMANENT,
                reject::SOURCE_SERVICE_PROVIDER_ACSE,
                reject::REASON_PROTOCOL_VERSION,
            );
            self.send_pdu(&rj).await;
            self.timer.start(State::AwaitingTransportClose);
            return State::AwaitingTransportClose;
        }

        let max_pdu_size = self.settings.max_pdu_size;
        match Arc::make_mut(&mut self.contexts).accept_proposal(&rq.items, max_pdu_size) {
            Ok(items) => {
                info!(
                    id = %self.label,
                    implementation_class = %self.contexts.peer_implementation_class_uid(),
                    implementation_version = %self.contexts.peer_implementation_version_name(),
                    peer_max_pdu = self.contexts.peer_max_pdu_size(),
                    "Association proposal accepted"
                );
                let ac = Pdu::AssociateAc(AssociatePdu {
                    protocol_version: PROTOCOL_VERSION,
                    called_ae_title: rq.called_ae_title,
                    calling_ae_title: rq.calling_ae_title,
                    items,
                });
                self.pending
                    .push_back(StateEvent::with_pdu(Event::AssociateAccept, ac));
            }
            Err(e) => {
                warn!(id = %self.label, error = %e, "Association proposal refused");
                let rj = Pdu::reject(
                    reject::RESULT_PERMANENT,
                    reject::SOURCE_SERVICE_PROVIDER_ACSE,
                    reject::REASON_PROVIDER_NO_REASON,
                );
                self.pending
                    .push_back(StateEvent::with_pdu(Event::AssociateReject, rj));
            }
        }
        State::AwaitingLocalAssociateResponse
    }

    async fn ae7(&mut self, payload: EventPayload) -> State {
        let EventPayload::Pdu(ac) = payload else {
            return self.invariant("association accept without a response PDU").await;
        };
        self.send_pdu(&ac).await;
        let contexts = self.contexts.clone();
        self.upcall(UpcallEvent::HandshakeCompleted { contexts }).await;
        State::Established
    }

    async fn ae8(&mut self, payload: EventPayload) -> State {
        let EventPayload::Pdu(rj) = payload else {
            return self.invariant("association reject without a response PDU").await;
        };
        self.send_pdu(&rj).await;
        self.timer.start(State::AwaitingTransportClose);
        State::AwaitingTransportClose
    }

    // Data transfer

    async fn dt1(&mut self, payload: EventPayload) -> State {
        match self.send_data(payload).await {
            Ok(()) => State::Established,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Cannot send DIMSE message");
                self.aa8(e.to_string()).await
            }
        }
    }

    async fn dt2(&mut self, payload: EventPayload) -> State {
        match self.receive_data(payload).await {
            Ok(()) => State::Established,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Cannot reassemble DIMSE message");
                self.aa8(e.to_string()).await
            }
        }
    }

    async fn send_data(&mut self, payload: EventPayload) -> Result<()> {
        let EventPayload::Dimse(message) = payload else {
            return Err(DulError::InvalidPdu("P-DATA request without a message".into()));
        };
        let context_id = self
            .contexts
            .lookup_by_abstract_syntax(&message.abstract_syntax)?
            .context_id;
        let chunk = max_fragment_size(self.contexts.peer_max_pdu_size(), self.settings.max_pdu_size)?;
        let pdus = split_into_pdus(context_id, &message.command, &message.data, chunk)?;
        debug!(
            id = %self.label,
            command = %message.command,
            context_id = context_id,
            data_len = message.data.len(),
            fragments = pdus.len(),
            "Sending DIMSE message"
        );
        for pdu in &pdus {
            if !self.send_pdu(pdu).await {
                break;
            }
        }
        Ok(())
    }

    async fn receive_data(&mut self, payload: EventPayload) -> Result<()> {
        let EventPayload::Pdu(Pdu::PDataTf(pdvs)) = payload else {
            return Err(DulError::InvalidPdu("P-DATA event without its PDU".into()));
        };
        for message in self.assembler.add_pdvs(&pdvs)? {
            debug!(
                id = %self.label,
                command = %message.command,
                context_id = message.context_id,
                data_len = message.data.len(),
                "DIMSE message received"
            );
            let contexts = self.contexts.clone();
            self.upcall(UpcallEvent::Data {
                contexts,
                context_id: message.context_id,
                command: message.command,
                data: message.data,
            })
            .await;
        }
        Ok(())
    }

    // Association release

    async fn ar1(&mut self) -> State {
        self.send_pdu(&Pdu::ReleaseRq).await;
        self.timer.start(State::AwaitingReleaseRp);
        State::AwaitingReleaseRp
    }

    fn ar2(&mut self) -> State {
        info!(id = %self.label, "Release requested by peer");
        self.pending.push_back(StateEvent::new(Event::ReleaseResponse));
        State::AwaitingLocalReleaseResponse
    }

    async fn ar3(&mut self) -> State {
        self.timer.stop();
        info!(id = %self.label, "Association released");
        self.close_transport().await;
        State::Idle
    }

    async fn ar4(&mut self) -> State {
        self.send_pdu(&Pdu::ReleaseRp).await;
        self.timer.start(State::AwaitingTransportClose);
        State::AwaitingTransportClose
    }

    fn ar5(&mut self) -> State {
        self.timer.stop();
        State::Idle
    }

    async fn ar6(&mut self, payload: EventPayload) -> State {
        match self.receive_data(payload).await {
            Ok(()) => State::AwaitingReleaseRp,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Cannot reassemble DIMSE message");
                self.aa8(e.to_string()).await
            }
        }
    }

    async fn ar7(&mut self, payload: EventPayload) -> State {
        match self.send_data(payload).await {
            Ok(()) => State::AwaitingLocalReleaseResponse,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Cannot send DIMSE message");
                self.aa8(e.to_string()).await
            }
        }
    }

    fn ar8(&mut self) -> State {
        info!(id = %self.label, role = ?self.role, "Release collision");
        match self.role {
            Role::Requestor => {
                self.pending.push_back(StateEvent::new(Event::ReleaseResponse));
                State::ReleaseCollisionRequestor
            }
            Role::Acceptor => State::ReleaseCollisionAcceptor,
        }
    }

    async fn ar9(&mut self) -> State {
        self.send_pdu(&Pdu::ReleaseRp).await;
        self.timer.start(State::ReleaseCollisionRequestorAwaitingRp);
        State::ReleaseCollisionRequestorAwaitingRp
    }

    fn ar10(&mut self) -> State {
        self.timer.stop();
        self.pending.push_back(StateEvent::new(Event::ReleaseResponse));
        State::ReleaseCollisionAcceptorAwaitingResponse
    }

    // Association abort

    async fn aa1(&mut self) -> State {
        let reason = if self.state == State::AwaitingAssociateRq {
            pdu::ABORT_REASON_UNEXPECTED_PDU
        } else {
            pdu::ABORT_REASON_NOT_SPECIFIED
        };
        self.send_pdu(&Pdu::abort(pdu::ABORT_SOURCE_SERVICE_USER, reason))
            .await;
        self.timer.start(State::AwaitingTransportClose);
        State::AwaitingTransportClose
    }

    async fn aa2(&mut self) -> State {
        self.timer.stop();
        self.close_transport().await;
        State::Idle
    }

    async fn aa3(&mut self, payload: EventPayload) -> State {
        let cause = match payload {
            EventPayload::Pdu(Pdu::Abort(abort)) => format!(
                "aborted by peer (source {}, reason {})",
                abort.source, abort.reason
            ),
            other => describe(&other),
        };
        warn!(id = %self.label, cause = %cause, "Association aborted");
        self.upcall(UpcallEvent::Aborted(cause)).await;
        self.close_transport().await;
        State::Idle
    }

    async fn aa4(&mut self, payload: EventPayload) -> State {
        let cause = describe(&payload);
        debug!(id = %self.label, cause = %cause, "Transport closed");
        self.upcall(UpcallEvent::Aborted(cause)).await;
        State::Idle
    }

    fn aa5(&mut self) -> State {
        self.timer.stop();
        State::Idle
    }

    fn aa6(&mut self, event: Event) -> State {
        trace!(id = %self.label, event = %event, "Ignoring event while awaiting close");
        State::AwaitingTransportClose
    }

    async fn aa7(&mut self) -> State {
        self.send_pdu(&Pdu::abort(
            pdu::ABORT_SOURCE_SERVICE_USER,
            pdu::ABORT_REASON_NOT_SPECIFIED,
        ))
        .await;
        State::AwaitingTransportClose
    }

    async fn aa8(&mut self, cause: String) -> State {
        warn!(id = %self.label, state = %self.state, cause = %cause, "Aborting association");
        self.send_pdu(&Pdu::abort(
            pdu::ABORT_SOURCE_SERVICE_PROVIDER,
            pdu::ABORT_REASON_NOT_SPECIFIED,
        ))
        .await;
        self.upcall(UpcallEvent::Aborted(cause)).await;
        self.timer.start(State::AwaitingTransportClose);
        State::AwaitingTransportClose
    }

    /// An event arrived without the payload its action needs
    async fn invariant(&mut self, what: &str) -> State {
        warn!(id = %self.label, state = %self.state, problem = what, "Internal error");
        self.upcall(UpcallEvent::Aborted(what.to_string())).await;
        self.aa2().await
    }

    // Plumbing

    fn attach_transport(&mut self, transport: BoxedTransport) {
        let (read_half, write_half) = tokio::io::split(transport);
        self.writer = Some(write_half);
        self.reader = Some(spawn_reader(
            self.label.clone(),
            read_half,
            self.settings.max_pdu_size as usize,
            self.net_tx.clone(),
        ));
    }

    /// Write one PDU; on failure the transport is closed and a
    /// transport-closed event is raised
    async fn send_pdu(&mut self, pdu: &Pdu) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            debug!(id = %self.label, pdu = %pdu, "No transport, PDU dropped");
            return false;
        };
        trace!(id = %self.label, pdu = %pdu, "Sending PDU");
        let result = async {
            let bytes = pdu.encode()?;
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            Ok::<(), DulError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %self.label, error = %e, "Failed to send PDU");
                self.close_transport().await;
                if self
                    .error_tx
                    .try_send(StateEvent::with_error(Event::TransportClosed, e.to_string()))
                    .is_err()
                {
                    warn!(id = %self.label, "Error channel full, send failure not reported");
                }
                false
            }
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    async fn upcall(&mut self, event: UpcallEvent) {
        if let Some(upcall) = &self.upcall {
            if upcall.send(event).await.is_err() {
                debug!(id = %self.label, "Upcall receiver gone");
                self.upcall = None;
            }
        }
    }

    async fn shutdown(&mut self) {
        self.timer.stop();
        self.close_transport().await;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.upcall = None;
    }
}

fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Error(message) => message.clone(),
        EventPayload::Pdu(pdu) => format!("unexpected {}", pdu),
        EventPayload::Dimse(message) => format!("unexpected request {}", message.command),
        EventPayload::Transport(_) => "unexpected transport".to_string(),
        EventPayload::None => "protocol error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::context::ContextResult;
    use crate::protocol::pdu::{read_pdu, PresentationContextItem, SubItem};
    use crate::protocol::uid;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn association_rq(called: &str) -> Pdu {
        Pdu::AssociateRq(AssociatePdu {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: called.to_string(),
            calling_ae_title: "SCANNER".to_string(),
            items: vec![
                SubItem::ApplicationContext(uid::APPLICATION_CONTEXT.to_string()),
                SubItem::PresentationContextRq(PresentationContextItem {
                    context_id: 1,
                    result: 0,
                    items: vec![
                        SubItem::AbstractSyntax(uid::VERIFICATION.to_string()),
                        SubItem::TransferSyntax(uid::IMPLICIT_VR_LITTLE_ENDIAN.to_string()),
                    ],
                }),
                SubItem::UserInformation(vec![SubItem::MaximumLength(16384)]),
            ],
        })
    }

    fn acceptor(settings: AssociationSettings) -> (MachineHandle, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1 << 16);
        let handle = StateMachine::spawn_acceptor("test".to_string(), settings, Box::new(local));
        (handle, remote)
    }

    async fn send(stream: &mut DuplexStream, pdu: &Pdu) {
        stream.write_all(&pdu.encode().unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut DuplexStream) -> Option<Pdu> {
        read_pdu(stream, 1 << 20).await.unwrap()
    }

    #[tokio::test]
    async fn test_accept_then_release() {
        let (mut handle, mut peer) = acceptor(AssociationSettings::default());

        send(&mut peer, &association_rq("ANY")).await;
        match recv(&mut peer).await {
            Some(Pdu::AssociateAc(ac)) => {
                let accepted = ac.items.iter().any(|item| {
                    matches!(item, SubItem::PresentationContextAc(pc)
                        if pc.context_id == 1 && pc.result == ContextResult::Accepted.code())
                });
                assert!(accepted);
            }
            other => panic!("expected A-ASSOCIATE-AC, got {:?}", other),
        }
        match handle.upcall.recv().await {
            Some(UpcallEvent::HandshakeCompleted { contexts }) => {
                assert_eq!(contexts.peer_max_pdu_size(), 16384);
                assert!(contexts.lookup_by_abstract_syntax(uid::VERIFICATION).is_ok());
            }
            other => panic!("expected handshake, got {:?}", other),
        }

        send(&mut peer, &Pdu::ReleaseRq).await;
        assert_eq!(recv(&mut peer).await, Some(Pdu::ReleaseRp));
        drop(peer);

        handle.task.await.unwrap();
        assert!(handle.upcall.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_dropped_after_artim() {
        let (handle, mut peer) = acceptor(AssociationSettings::default());

        // nothing is sent; ARTIM in Sta02 closes the connection
        handle.task.await.unwrap();
        assert_eq!(recv(&mut peer).await, None);
    }

    #[tokio::test]
    async fn test_unexpected_pdu_before_association_request() {
        let (handle, mut peer) = acceptor(AssociationSettings::default());

        send(&mut peer, &Pdu::ReleaseRq).await;
        match recv(&mut peer).await {
            Some(Pdu::Abort(abort)) => {
                assert_eq!(abort.source, pdu::ABORT_SOURCE_SERVICE_USER);
                assert_eq!(abort.reason, pdu::ABORT_REASON_UNEXPECTED_PDU);
            }
            other => panic!("expected A-ABORT, got {:?}", other),
        }
        drop(peer);
        handle.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_called_ae_mismatch_rejected_after_delay() {
        let settings = AssociationSettings {
            ae_title: "RADIANT".to_string(),
            enforce_ae_title: true,
            reject_delay: Duration::from_secs(5),
            ..AssociationSettings::default()
        };
        let (handle, mut peer) = acceptor(settings);

        let start = tokio::time::Instant::now();
        send(&mut peer, &association_rq("OTHER")).await;
        match recv(&mut peer).await {
            Some(Pdu::AssociateRj(rj)) => {
                assert_eq!(rj.result, reject::RESULT_PERMANENT);
                assert_eq!(rj.reason, reject::REASON_CALLED_AE_NOT_RECOGNIZED);
            }
            other => panic!("expected A-ASSOCIATE-RJ, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(5));
        drop(peer);
        handle.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_called_ae_accepted() {
        let settings = AssociationSettings {
            ae_title: "RADIANT".to_string(),
            enforce_ae_title: true,
            ..AssociationSettings::default()
        };
        let (_handle, mut peer) = acceptor(settings);

        send(&mut peer, &association_rq("RADIANT")).await;
        assert!(matches!(recv(&mut peer).await, Some(Pdu::AssociateAc(_))));
    }

    #[tokio::test]
    async fn test_bad_protocol_version_rejected() {
        let (_handle, mut peer) = acceptor(AssociationSettings::default());

        let mut rq = association_rq("ANY");
        if let Pdu::AssociateRq(a) = &mut rq {
            a.protocol_version = 2;
        }
        send(&mut peer, &rq).await;
        match recv(&mut peer).await {
            Some(Pdu::AssociateRj(rj)) => {
                assert_eq!(rj.source, reject::SOURCE_SERVICE_PROVIDER_ACSE);
                assert_eq!(rj.reason, reject::REASON_PROTOCOL_VERSION);
            }
            other => panic!("expected A-ASSOCIATE-RJ, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_proposal_rejected() {
        let (_handle, mut peer) = acceptor(AssociationSettings::default());

        let rq = Pdu::AssociateRq(AssociatePdu {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: "ANY".to_string(),
            calling_ae_title: "SCANNER".to_string(),
            items: vec![SubItem::PresentationContextRq(PresentationContextItem {
                context_id: 2,
                result: 0,
                items: vec![
                    SubItem::AbstractSyntax(uid::VERIFICATION.to_string()),
                    SubItem::TransferSyntax(uid::IMPLICIT_VR_LITTLE_ENDIAN.to_string()),
                ],
            })],
        });
        send(&mut peer, &rq).await;
        match recv(&mut peer).await {
            Some(Pdu::AssociateRj(rj)) => {
                assert_eq!(rj.result, 1);
                assert_eq!(rj.source, 2);
                assert_eq!(rj.reason, 1);
            }
            other => panic!("expected A-ASSOCIATE-RJ, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_abort_closes_upcall() {
        let (mut handle, mut peer) = acceptor(AssociationSettings::default());

        send(&mut peer, &association_rq("ANY")).await;
        assert!(matches!(recv(&mut peer).await, Some(Pdu::AssociateAc(_))));
        send(&mut peer, &Pdu::abort(0, 0)).await;

        let mut aborted = false;
        while let Some(event) = handle.upcall.recv().await {
            if let UpcallEvent::Aborted(_) = event {
                aborted = true;
            }
        }
        assert!(aborted);
        handle.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout_aborts_requestor() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let silent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let rq = read_pdu(&mut stream, 1 << 20).await.unwrap();
            let abort = read_pdu(&mut stream, 1 << 20).await.unwrap();
            (rq, abort)
        });

        let settings = AssociationSettings {
            artim_timeout: Duration::from_millis(200),
            abstract_syntaxes: vec![uid::VERIFICATION.to_string()],
            transfer_syntaxes: vec![uid::IMPLICIT_VR_LITTLE_ENDIAN.to_string()],
            ..AssociationSettings::default()
        };
        let target = RemoteTarget {
            address: addr,
            called_ae_title: "SILENT".to_string(),
            connector: Connector::Tcp,
        };
        let mut handle = StateMachine::spawn_requestor("user".to_string(), settings, target);

        match handle.upcall.recv().await {
            Some(UpcallEvent::Aborted(cause)) => assert!(cause.contains("ARTIM")),
            other => panic!("expected abort, got {:?}", other),
        }

        let (rq, abort) = silent.await.unwrap();
        assert!(matches!(rq, Some(Pdu::AssociateRq(_))));
        match abort {
            Some(Pdu::Abort(abort)) => assert_eq!(abort.source, pdu::ABORT_SOURCE_SERVICE_PROVIDER),
            other => panic!("expected A-ABORT, got {:?}", other),
        }
        handle.task.await.unwrap();
    }
}
