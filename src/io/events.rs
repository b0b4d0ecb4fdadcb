//! Messages exchanged between the state machine and its surroundings
//!
//! [`StateEvent`] flows into the machine (from the network reader, the
//! timer, the dispatcher or the machine itself). [`UpcallEvent`] flows out
//! of it towards the dispatcher.

use super::context::ContextManager;
use super::state::Event;
use super::transport::BoxedTransport;
use crate::protocol::dimse::DimseCommand;
use crate::protocol::pdu::{AssociateRj, Pdu};
use std::fmt;
use std::sync::Arc;

/// Outbound DIMSE message handed to the machine with a P-DATA request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimsePayload {
    /// Selects the presentation context the message travels on
    pub abstract_syntax: String,
    pub command: DimseCommand,
    pub data: Vec<u8>,
}

pub enum EventPayload {
    None,
    Pdu(Pdu),
    Transport(BoxedTransport),
    Dimse(DimsePayload),
    Error(String),
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::None => f.write_str("None"),
            EventPayload::Pdu(pdu) => write!(f, "Pdu({})", pdu),
            EventPayload::Transport(_) => f.write_str("Transport"),
            EventPayload::Dimse(d) => write!(f, "Dimse({})", d.command),
            EventPayload::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[derive(Debug)]
pub struct StateEvent {
    pub event: Event,
    pub payload: EventPayload,
}

impl StateEvent {
    pub fn new(event: Event) -> Self {
        StateEvent {
            event,
            payload: EventPayload::None,
        }
    }

    pub fn with_pdu(event: Event, pdu: Pdu) -> Self {
        StateEvent {
            event,
            payload: EventPayload::Pdu(pdu),
        }
    }

    pub fn with_error(event: Event, message: impl Into<String>) -> Self {
        StateEvent {
            event,
            payload: EventPayload::Error(message.into()),
        }
    }

    /// P-DATA request primitive
    pub fn data_request(abstract_syntax: &str, command: DimseCommand, data: Vec<u8>) -> Self {
        StateEvent {
            event: Event::PDataRequest,
            payload: EventPayload::Dimse(DimsePayload {
                abstract_syntax: abstract_syntax.to_string(),
                command,
                data,
            }),
        }
    }

    /// A-RELEASE request primitive
    pub fn release_request() -> Self {
        StateEvent::new(Event::ReleaseRequest)
    }

    /// A-ABORT request primitive
    pub fn abort_request() -> Self {
        StateEvent::new(Event::AbortRequest)
    }
}

/// Notification from the machine to the service layer
#[derive(Debug, Clone)]
pub enum UpcallEvent {
    /// Association established; `contexts` holds the negotiated contexts
    HandshakeCompleted { contexts: Arc<ContextManager> },
    /// A complete DIMSE message arrived
    Data {
        contexts: Arc<ContextManager>,
        context_id: u8,
        command: DimseCommand,
        data: Vec<u8>,
    },
    /// The peer rejected our association request
    Rejected(AssociateRj),
    /// The association was aborted by the peer or the provider
    Aborted(String),
}
