//! Network reader task
//!
//! Reads PDUs off the transport and feeds them to the state machine as
//! events. A clean end of stream becomes a transport-closed event, a framing
//! or I/O error an invalid-PDU event; both end the task.

use super::events::StateEvent;
use super::state::Event;
use crate::protocol::pdu::{read_pdu, Pdu};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Event a received PDU raises
pub fn classify(pdu: &Pdu) -> Event {
    match pdu {
        Pdu::AssociateRq(_) => Event::AssociateRqPdu,
        Pdu::AssociateAc(_) => Event::AssociateAcPdu,
        Pdu::AssociateRj(_) => Event::AssociateRjPdu,
        Pdu::PDataTf(_) => Event::PDataTfPdu,
        Pdu::ReleaseRq => Event::ReleaseRqPdu,
        Pdu::ReleaseRp => Event::ReleaseRpPdu,
        Pdu::Abort(_) => Event::AbortPdu,
        Pdu::Unknown { .. } => Event::InvalidPdu,
    }
}

pub fn spawn_reader<R>(
    label: String,
    reader: R,
    max_pdu_size: usize,
    events: mpsc::Sender<StateEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_reader(label, reader, max_pdu_size, events))
}

pub async fn run_reader<R>(
    label: String,
    mut reader: R,
    max_pdu_size: usize,
    events: mpsc::Sender<StateEvent>,
) where
    R: AsyncRead + Unpin,
{
    debug!(id = %label, "Network reader started");
    loop {
        let event = match read_pdu(&mut reader, max_pdu_size).await {
            Ok(Some(pdu)) => {
                let event = classify(&pdu);
                trace!(id = %label, pdu = %pdu, event = %event, "PDU received");
                if let Pdu::Unknown { pdu_type, .. } = pdu {
                    warn!(id = %label, pdu_type = pdu_type, "Unrecognized PDU type");
                }
                StateEvent::with_pdu(event, pdu)
            }
            Ok(None) => {
                debug!(id = %label, "Peer closed the connection");
                let _ = events
                    .send(StateEvent::with_error(
                        Event::TransportClosed,
                        "connection closed by peer",
                    ))
                    .await;
                return;
            }
            Err(e) => {
                warn!(id = %label, error = %e, "Failed to read PDU");
                let _ = events
                    .send(StateEvent::with_error(Event::InvalidPdu, e.to_string()))
                    .await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            debug!(id = %label, "State machine gone, reader exiting");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::events::EventPayload;
    use tokio_test::io::Builder;

    async fn collect(mock: tokio_test::io::Mock, max: usize) -> Vec<StateEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        run_reader("test".to_string(), mock, max, tx).await;
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_pdus_then_eof() {
        let release = Pdu::ReleaseRq.encode().unwrap();
        let abort = Pdu::abort(0, 0).encode().unwrap();
        let mock = Builder::new().read(&release).read(&abort).build();

        let events = collect(mock, 1024).await;
        let kinds: Vec<Event> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![Event::ReleaseRqPdu, Event::AbortPdu, Event::TransportClosed]
        );
    }

    #[tokio::test]
    async fn test_unknown_pdu_type_keeps_reading() {
        let unknown = [0x09, 0x00, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB];
        let mock = Builder::new()
            .read(&unknown)
            .read(&Pdu::ReleaseRp.encode().unwrap())
            .build();

        let events = collect(mock, 1024).await;
        let kinds: Vec<Event> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![Event::InvalidPdu, Event::ReleaseRpPdu, Event::TransportClosed]
        );
    }

    #[tokio::test]
    async fn test_oversized_pdu_stops_reader() {
        // P-DATA-TF announcing a 64 KiB body
        let header = [0x04, 0x00, 0x00, 0x01, 0x00, 0x00];
        let mock = Builder::new().read(&header).build();

        let events = collect(mock, 1024).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, Event::InvalidPdu);
        assert!(matches!(events[0].payload, EventPayload::Error(_)));
    }

    #[tokio::test]
    async fn test_truncated_pdu_is_invalid() {
        let bytes = Pdu::abort(2, 0).encode().unwrap();
        let mock = Builder::new().read(&bytes[..7]).build();

        let events = collect(mock, 1024).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, Event::InvalidPdu);
    }
}
