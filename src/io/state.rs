//! States, events, actions and the transition table of the Upper Layer
//! state machine (PS3.8 section 9.2)
//!
//! The table is the protocol definition. Any `(state, event)` pair it does
//! not list resolves to [`Action::Aa2`], which drops the connection.

use std::fmt;

/// Association states Sta01 through Sta13
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    AwaitingAssociateRq,
    AwaitingLocalAssociateResponse,
    AwaitingTransportOpen,
    AwaitingAssociateResponse,
    Established,
    AwaitingReleaseRp,
    AwaitingLocalReleaseResponse,
    ReleaseCollisionRequestor,
    ReleaseCollisionAcceptor,
    ReleaseCollisionRequestorAwaitingRp,
    ReleaseCollisionAcceptorAwaitingResponse,
    AwaitingTransportClose,
}

/// Coarse lifecycle phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Negotiating,
    Established,
    Releasing,
    Aborting,
}

impl State {
    pub const ALL: [State; 13] = [
        State::Idle,
        State::AwaitingAssociateRq,
        State::AwaitingLocalAssociateResponse,
        State::AwaitingTransportOpen,
        State::AwaitingAssociateResponse,
        State::Established,
        State::AwaitingReleaseRp,
        State::AwaitingLocalReleaseResponse,
        State::ReleaseCollisionRequestor,
        State::ReleaseCollisionAcceptor,
        State::ReleaseCollisionRequestorAwaitingRp,
        State::ReleaseCollisionAcceptorAwaitingResponse,
        State::AwaitingTransportClose,
    ];

    /// Number used by PS3.8 (Sta01 = 1)
    pub fn number(&self) -> u8 {
        match self {
            State::Idle => 1,
            State::AwaitingAssociateRq => 2,
            State::AwaitingLocalAssociateResponse => 3,
            State::AwaitingTransportOpen => 4,
            State::AwaitingAssociateResponse => 5,
            State::Established => 6,
            State::AwaitingReleaseRp => 7,
            State::AwaitingLocalReleaseResponse => 8,
            State::ReleaseCollisionRequestor => 9,
            State::ReleaseCollisionAcceptor => 10,
            State::ReleaseCollisionRequestorAwaitingRp => 11,
            State::ReleaseCollisionAcceptorAwaitingResponse => 12,
            State::AwaitingTransportClose => 13,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::AwaitingAssociateRq => "Transport connection open, awaiting A-ASSOCIATE-RQ PDU",
            State::AwaitingLocalAssociateResponse => "Awaiting local A-ASSOCIATE response primitive",
            State::AwaitingTransportOpen => "Awaiting transport connection opening to complete",
            State::AwaitingAssociateResponse => "Awaiting A-ASSOCIATE-AC or A-ASSOCIATE-RJ PDU",
            State::Established => "Association established and ready for data transfer",
            State::AwaitingReleaseRp => "Awaiting A-RELEASE-RP PDU",
            State::AwaitingLocalReleaseResponse => "Awaiting local A-RELEASE response primitive",
            State::ReleaseCollisionRequestor => {
                "Release collision requestor side, awaiting A-RELEASE response"
            }
            State::ReleaseCollisionAcceptor => {
                "Release collision acceptor side, awaiting A-RELEASE-RP PDU"
            }
            State::ReleaseCollisionRequestorAwaitingRp => {
                "Release collision requestor side, awaiting A-RELEASE-RP PDU"
            }
            State::ReleaseCollisionAcceptorAwaitingResponse => {
                "Release collision acceptor side, awaiting A-RELEASE response primitive"
            }
            State::AwaitingTransportClose => "Awaiting transport connection close indication",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            State::Idle => Phase::Idle,
            State::AwaitingTransportOpen => Phase::Connecting,
            State::AwaitingAssociateRq
            | State::AwaitingLocalAssociateResponse
            | State::AwaitingAssociateResponse => Phase::Negotiating,
            State::Established => Phase::Established,
            State::AwaitingReleaseRp
            | State::AwaitingLocalReleaseResponse
            | State::ReleaseCollisionRequestor
            | State::ReleaseCollisionAcceptor
            | State::ReleaseCollisionRequestorAwaitingRp
            | State::ReleaseCollisionAcceptorAwaitingResponse => Phase::Releasing,
            State::AwaitingTransportClose => Phase::Aborting,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sta{:02}({})", self.number(), self.description())
    }
}

/// Events Evt01 through Evt19
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    AssociateRequest,
    TransportConnectConfirm,
    AssociateAcPdu,
    AssociateRjPdu,
    TransportConnectIndication,
    AssociateRqPdu,
    AssociateAccept,
    AssociateReject,
    PDataRequest,
    PDataTfPdu,
    ReleaseRequest,
    ReleaseRqPdu,
    ReleaseRpPdu,
    ReleaseResponse,
    AbortRequest,
    AbortPdu,
    TransportClosed,
    ArtimExpired,
    InvalidPdu,
}

impl Event {
    pub const ALL: [Event; 19] = [
        Event::AssociateRequest,
        Event::TransportConnectConfirm,
        Event::AssociateAcPdu,
        Event::AssociateRjPdu,
        Event::TransportConnectIndication,
        Event::AssociateRqPdu,
        Event::AssociateAccept,
        Event::AssociateReject,
        Event::PDataRequest,
        Event::PDataTfPdu,
        Event::ReleaseRequest,
        Event::ReleaseRqPdu,
        Event::ReleaseRpPdu,
        Event::ReleaseResponse,
        Event::AbortRequest,
        Event::AbortPdu,
        Event::TransportClosed,
        Event::ArtimExpired,
        Event::InvalidPdu,
    ];

    /// Number used by PS3.8 (Evt01 = 1)
    pub fn number(&self) -> u8 {
        Event::ALL
            .iter()
            .position(|e| e == self)
            .map_or(0, |index| index as u8 + 1)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Event::AssociateRequest => "A-ASSOCIATE request (local user)",
            Event::TransportConnectConfirm => "Transport connection confirmed (service user)",
            Event::AssociateAcPdu => "A-ASSOCIATE-AC PDU received",
            Event::AssociateRjPdu => "A-ASSOCIATE-RJ PDU received",
            Event::TransportConnectIndication => "Transport connection accepted (service provider)",
            Event::AssociateRqPdu => "A-ASSOCIATE-RQ PDU received",
            Event::AssociateAccept => "A-ASSOCIATE response primitive (accept)",
            Event::AssociateReject => "A-ASSOCIATE response primitive (reject)",
            Event::PDataRequest => "P-DATA request primitive",
            Event::PDataTfPdu => "P-DATA-TF PDU received",
            Event::ReleaseRequest => "A-RELEASE request primitive",
            Event::ReleaseRqPdu => "A-RELEASE-RQ PDU received",
            Event::ReleaseRpPdu => "A-RELEASE-RP PDU received",
            Event::ReleaseResponse => "A-RELEASE response primitive",
            Event::AbortRequest => "A-ABORT request primitive",
            Event::AbortPdu => "A-ABORT PDU received",
            Event::TransportClosed => "Transport connection closed",
            Event::ArtimExpired => "ARTIM timer expired",
            Event::InvalidPdu => "Unrecognized or invalid PDU received",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Evt{:02}({})", self.number(), self.description())
    }
}

/// State machine actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Ae1,
    Ae2,
    Ae3,
    Ae4,
    Ae5,
    Ae6,
    Ae7,
    Ae8,
    Dt1,
    Dt2,
    Ar1,
    Ar2,
    Ar3,
    Ar4,
    Ar5,
    Ar6,
    Ar7,
    Ar8,
    Ar9,
    Ar10,
    Aa1,
    Aa2,
    Aa3,
    Aa4,
    Aa5,
    Aa6,
    Aa7,
    Aa8,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Ae1 => "AE-1",
            Action::Ae2 => "AE-2",
            Action::Ae3 => "AE-3",
            Action::Ae4 => "AE-4",
            Action::Ae5 => "AE-5",
            Action::Ae6 => "AE-6",
            Action::Ae7 => "AE-7",
            Action::Ae8 => "AE-8",
            Action::Dt1 => "DT-1",
            Action::Dt2 => "DT-2",
            Action::Ar1 => "AR-1",
            Action::Ar2 => "AR-2",
            Action::Ar3 => "AR-3",
            Action::Ar4 => "AR-4",
            Action::Ar5 => "AR-5",
            Action::Ar6 => "AR-6",
            Action::Ar7 => "AR-7",
            Action::Ar8 => "AR-8",
            Action::Ar9 => "AR-9",
            Action::Ar10 => "AR-10",
            Action::Aa1 => "AA-1",
            Action::Aa2 => "AA-2",
            Action::Aa3 => "AA-3",
            Action::Aa4 => "AA-4",
            Action::Aa5 => "AA-5",
            Action::Aa6 => "AA-6",
            Action::Aa7 => "AA-7",
            Action::Aa8 => "AA-8",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Action::Ae1 => "Issue TRANSPORT CONNECT request primitive",
            Action::Ae2 => "Send A-ASSOCIATE-RQ PDU",
            Action::Ae3 => "Issue A-ASSOCIATE confirmation (accept) primitive",
            Action::Ae4 => "Issue A-ASSOCIATE confirmation (reject) primitive and close transport",
            Action::Ae5 => "Issue transport connection response primitive, start ARTIM",
            Action::Ae6 => "Stop ARTIM and accept or reject the A-ASSOCIATE-RQ",
            Action::Ae7 => "Send A-ASSOCIATE-AC PDU",
            Action::Ae8 => "Send A-ASSOCIATE-RJ PDU and start ARTIM",
            Action::Dt1 => "Send P-DATA-TF PDU",
            Action::Dt2 => "Issue P-DATA indication primitive",
            Action::Ar1 => "Send A-RELEASE-RQ PDU",
            Action::Ar2 => "Issue A-RELEASE indication primitive",
            Action::Ar3 => "Issue A-RELEASE confirmation primitive and close transport",
            Action::Ar4 => "Send A-RELEASE-RP PDU and start ARTIM",
            Action::Ar5 => "Stop ARTIM",
            Action::Ar6 => "Issue P-DATA indication",
            Action::Ar7 => "Send P-DATA-TF PDU",
            Action::Ar8 => "Issue A-RELEASE indication (release collision)",
            Action::Ar9 => "Send A-RELEASE-RP PDU",
            Action::Ar10 => "Issue A-RELEASE confirmation primitive",
            Action::Aa1 => "Send A-ABORT PDU (service-user source), restart ARTIM",
            Action::Aa2 => "Stop ARTIM if running, close transport",
            Action::Aa3 => "Issue A-ABORT or A-P-ABORT indication, close transport",
            Action::Aa4 => "Issue A-P-ABORT indication",
            Action::Aa5 => "Stop ARTIM",
            Action::Aa6 => "Ignore PDU",
            Action::Aa7 => "Send A-ABORT PDU",
            Action::Aa8 => "Send A-ABORT PDU (service-provider source), start ARTIM",
        }
    }

    /// Whether the action belongs to the abort family (AA-n)
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Action::Aa1
                | Action::Aa2
                | Action::Aa3
                | Action::Aa4
                | Action::Aa5
                | Action::Aa6
                | Action::Aa7
                | Action::Aa8
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.description())
    }
}

/// One row of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: State,
    pub event: Event,
    pub action: Action,
}

const fn t(state: State, event: Event, action: Action) -> Transition {
    Transition {
        state,
        event,
        action,
    }
}

use Action as A;
use Event as E;
use State as S;

/// The Upper Layer transition table
pub const TRANSITIONS: &[Transition] = &[
    t(S::Idle, E::AssociateRequest, A::Ae1),
    t(S::Idle, E::TransportConnectIndication, A::Ae5),
    // Sta02
    t(S::AwaitingAssociateRq, E::AssociateAcPdu, A::Aa1),
    t(S::AwaitingAssociateRq, E::AssociateRjPdu, A::Aa1),
    t(S::AwaitingAssociateRq, E::AssociateRqPdu, A::Ae6),
    t(S::AwaitingAssociateRq, E::PDataTfPdu, A::Aa1),
    t(S::AwaitingAssociateRq, E::ReleaseRqPdu, A::Aa1),
    t(S::AwaitingAssociateRq, E::ReleaseRpPdu, A::Aa1),
    t(S::AwaitingAssociateRq, E::AbortPdu, A::Aa2),
    t(S::AwaitingAssociateRq, E::TransportClosed, A::Aa5),
    t(S::AwaitingAssociateRq, E::ArtimExpired, A::Aa2),
    t(S::AwaitingAssociateRq, E::InvalidPdu, A::Aa1),
    // Sta03
    t(S::AwaitingLocalAssociateResponse, E::AssociateAcPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::AssociateRjPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::AssociateRqPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::AssociateAccept, A::Ae7),
    t(S::AwaitingLocalAssociateResponse, E::AssociateReject, A::Ae8),
    t(S::AwaitingLocalAssociateResponse, E::PDataTfPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::ReleaseRqPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::ReleaseRpPdu, A::Aa8),
    t(S::AwaitingLocalAssociateResponse, E::AbortRequest, A::Aa1),
    t(S::AwaitingLocalAssociateResponse, E::AbortPdu, A::Aa3),
    t(S::AwaitingLocalAssociateResponse, E::TransportClosed, A::Aa4),
    t(S::AwaitingLocalAssociateResponse, E::InvalidPdu, A::Aa8),
    // Sta04
    t(S::AwaitingTransportOpen, E::TransportConnectConfirm, A::Ae2),
    t(S::AwaitingTransportOpen, E::AbortRequest, A::Aa2),
    t(S::AwaitingTransportOpen, E::TransportClosed, A::Aa4),
    // Sta05
    t(S::AwaitingAssociateResponse, E::AssociateAcPdu, A::Ae3),
    t(S::AwaitingAssociateResponse, E::AssociateRjPdu, A::Ae4),
    t(S::AwaitingAssociateResponse, E::AssociateRqPdu, A::Aa8),
    t(S::AwaitingAssociateResponse, E::PDataTfPdu, A::Aa8),
    t(S::AwaitingAssociateResponse, E::ReleaseRqPdu, A::Aa8),
    t(S::AwaitingAssociateResponse, E::ReleaseRpPdu, A::Aa8),
    t(S::AwaitingAssociateResponse, E::AbortRequest, A::Aa1),
    t(S::AwaitingAssociateResponse, E::AbortPdu, A::Aa3),
    t(S::AwaitingAssociateResponse, E::TransportClosed, A::Aa4),
    t(S::AwaitingAssociateResponse, E::ArtimExpired, A::Aa8),
    t(S::AwaitingAssociateResponse, E::InvalidPdu, A::Aa8),
    // Sta06
    t(S::Established, E::AssociateAcPdu, A::Aa8),
    t(S::Established, E::AssociateRjPdu, A::Aa8),
    t(S::Established, E::AssociateRqPdu, A::Aa8),
    t(S::Established, E::PDataRequest, A::Dt1),
    t(S::Established, E::PDataTfPdu, A::Dt2),
    t(S::Established, E::ReleaseRequest, A::Ar1),
    t(S::Established, E::ReleaseRqPdu, A::Ar2),
    t(S::Established, E::ReleaseRpPdu, A::Aa8),
    t(S::Established, E::AbortRequest, A::Aa1),
    t(S::Established, E::AbortPdu, A::Aa3),
    t(S::Established, E::TransportClosed, A::Aa4),
    t(S::Established, E::InvalidPdu, A::Aa8),
    // Sta07
    t(S::AwaitingReleaseRp, E::AssociateAcPdu, A::Aa8),
    t(S::AwaitingReleaseRp, E::AssociateRjPdu, A::Aa8),
    t(S::AwaitingReleaseRp, E::AssociateRqPdu, A::Aa8),
    t(S::AwaitingReleaseRp, E::PDataTfPdu, A::Ar6),
    t(S::AwaitingReleaseRp, E::ReleaseRqPdu, A::Ar8),
    t(S::AwaitingReleaseRp, E::ReleaseRpPdu, A::Ar3),
    t(S::AwaitingReleaseRp, E::AbortRequest, A::Aa1),
    t(S::AwaitingReleaseRp, E::AbortPdu, A::Aa3),
    t(S::AwaitingReleaseRp, E::TransportClosed, A::Aa4),
    t(S::AwaitingReleaseRp, E::ArtimExpired, A::Aa8),
    t(S::AwaitingReleaseRp, E::InvalidPdu, A::Aa8),
    // Sta08
    t(S::AwaitingLocalReleaseResponse, E::AssociateAcPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::AssociateRjPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::AssociateRqPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::PDataRequest, A::Ar7),
    t(S::AwaitingLocalReleaseResponse, E::PDataTfPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::ReleaseRqPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::ReleaseRpPdu, A::Aa8),
    t(S::AwaitingLocalReleaseResponse, E::ReleaseResponse, A::Ar4),
    t(S::AwaitingLocalReleaseResponse, E::AbortRequest, A::Aa1),
    t(S::AwaitingLocalReleaseResponse, E::AbortPdu, A::Aa3),
    t(S::AwaitingLocalReleaseResponse, E::TransportClosed, A::Aa4),
    t(S::AwaitingLocalReleaseResponse, E::InvalidPdu, A::Aa8),
    // Sta09
    t(S::ReleaseCollisionRequestor, E::AssociateAcPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::AssociateRjPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::AssociateRqPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::PDataTfPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::ReleaseRqPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::ReleaseRpPdu, A::Aa8),
    t(S::ReleaseCollisionRequestor, E::ReleaseResponse, A::Ar9),
    t(S::ReleaseCollisionRequestor, E::AbortRequest, A::Aa1),
    t(S::ReleaseCollisionRequestor, E::AbortPdu, A::Aa3),
    t(S::ReleaseCollisionRequestor, E::TransportClosed, A::Aa4),
    t(S::ReleaseCollisionRequestor, E::InvalidPdu, A::Aa8),
    // Sta10
    t(S::ReleaseCollisionAcceptor, E::AssociateAcPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::AssociateRjPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::AssociateRqPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::PDataTfPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::ReleaseRqPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::ReleaseRpPdu, A::Ar10),
    t(S::ReleaseCollisionAcceptor, E::AbortRequest, A::Aa1),
    t(S::ReleaseCollisionAcceptor, E::AbortPdu, A::Aa3),
    t(S::ReleaseCollisionAcceptor, E::TransportClosed, A::Aa4),
    t(S::ReleaseCollisionAcceptor, E::ArtimExpired, A::Aa8),
    t(S::ReleaseCollisionAcceptor, E::InvalidPdu, A::Aa8),
    // Sta11
    t(S::ReleaseCollisionRequestorAwaitingRp, E::AssociateAcPdu, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::AssociateRjPdu, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::AssociateRqPdu, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::PDataTfPdu, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::ReleaseRqPdu, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::ReleaseRpPdu, A::Ar3),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::AbortRequest, A::Aa1),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::AbortPdu, A::Aa3),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::TransportClosed, A::Aa4),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::ArtimExpired, A::Aa8),
    t(S::ReleaseCollisionRequestorAwaitingRp, E::InvalidPdu, A::Aa8),
    // Sta12
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::AssociateAcPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::AssociateRjPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::AssociateRqPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::PDataTfPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::ReleaseRqPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::ReleaseRpPdu, A::Aa8),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::ReleaseResponse, A::Ar4),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::AbortRequest, A::Aa1),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::AbortPdu, A::Aa3),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::TransportClosed, A::Aa4),
    t(S::ReleaseCollisionAcceptorAwaitingResponse, E::InvalidPdu, A::Aa8),
    // Sta13
    t(S::AwaitingTransportClose, E::AssociateAcPdu, A::Aa6),
    t(S::AwaitingTransportClose, E::AssociateRjPdu, A::Aa6),
    t(S::AwaitingTransportClose, E::AssociateRqPdu, A::Aa7),
    t(S::AwaitingTransportClose, E::AssociateAccept, A::Aa7),
    t(S::AwaitingTransportClose, E::AssociateReject, A::Aa7),
    t(S::AwaitingTransportClose, E::PDataRequest, A::Aa7),
    t(S::AwaitingTransportClose, E::PDataTfPdu, A::Aa6),
    t(S::AwaitingTransportClose, E::ReleaseRequest, A::Aa6),
    t(S::AwaitingTransportClose, E::ReleaseRqPdu, A::Aa6),
    t(S::AwaitingTransportClose, E::ReleaseRpPdu, A::Aa6),
    t(S::AwaitingTransportClose, E::ReleaseResponse, A::Aa6),
    t(S::AwaitingTransportClose, E::AbortRequest, A::Aa2),
    t(S::AwaitingTransportClose, E::AbortPdu, A::Aa2),
    t(S::AwaitingTransportClose, E::TransportClosed, A::Ar5),
    t(S::AwaitingTransportClose, E::ArtimExpired, A::Aa2),
    t(S::AwaitingTransportClose, E::InvalidPdu, A::Aa7),
];

/// Action listed for the pair, if any
pub fn lookup(state: State, event: Event) -> Option<Action> {
    TRANSITIONS
        .iter()
        .find(|row| row.state == state && row.event == event)
        .map(|row| row.action)
}

/// Action to run for the pair; unlisted pairs force the connection down
pub fn resolve(state: State, event: Event) -> Action {
    lookup(state, event).unwrap_or(Action::Aa2)
}
