//! P-DATA fragmentation and reassembly
//!
//! Outbound, a DIMSE message is split into presentation data values that
//! fit the peer's maximum PDU length, command first, then data set. Inbound,
//! [`CommandAssembler`] collects fragments until a complete message is
//! available.

use crate::error::{DulError, Result};
use crate::protocol::dimse::DimseCommand;
use crate::protocol::pdu::{Pdu, PresentationDataValue};

/// Bytes reserved per PDU for the PDV item header
pub const PDV_OVERHEAD: usize = 8;

/// Largest fragment payload for a peer maximum PDU length
///
/// A peer maximum of zero means "no limit"; `local_max` is used instead.
pub fn max_fragment_size(peer_max_pdu_size: u32, local_max: u32) -> Result<usize> {
    let limit = if peer_max_pdu_size == 0 {
        local_max
    } else {
        peer_max_pdu_size
    } as usize;
    if limit <= PDV_OVERHEAD {
        return Err(DulError::Negotiation(format!(
            "maximum PDU length {} leaves no room for data",
            limit
        )));
    }
    Ok(limit - PDV_OVERHEAD)
}

/// Split one command or data stream into fragments of at most `chunk_size`
///
/// Only the final fragment is marked last. An empty payload yields a single
/// empty final fragment. `chunk_size` must be non-zero.
fn fragment(
    context_id: u8,
    command: bool,
    payload: &[u8],
    chunk_size: usize,
) -> Vec<PresentationDataValue> {
    if payload.is_empty() {
        return vec![PresentationDataValue {
            context_id,
            command,
            last: true,
            value: Vec::new(),
        }];
    }
    let count = payload.len().div_ceil(chunk_size);
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| PresentationDataValue {
            context_id,
            command,
            last: index + 1 == count,
            value: chunk.to_vec(),
        })
        .collect()
}

/// Encode a DIMSE message as a sequence of P-DATA-TF PDUs, one PDV each
///
/// Fails when data is supplied for a command that declares no data set, or
/// when `chunk_size` is zero.
pub fn split_into_pdus(
    context_id: u8,
    command: &DimseCommand,
    data: &[u8],
    chunk_size: usize,
) -> Result<Vec<Pdu>> {
    if chunk_size == 0 {
        return Err(DulError::Negotiation(
            "fragment size of zero bytes".to_string(),
        ));
    }
    if !command.has_data() && !data.is_empty() {
        return Err(DulError::Reassembly(format!(
            "{} declares no data set but {} data bytes were supplied",
            command.command_field,
            data.len()
        )));
    }

    let mut pdvs = fragment(context_id, true, &command.encode(), chunk_size);
    if command.has_data() {
        pdvs.extend(fragment(context_id, false, data, chunk_size));
    }
    Ok(pdvs.into_iter().map(|pdv| Pdu::PDataTf(vec![pdv])).collect())
}

/// Complete DIMSE message reassembled from fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub context_id: u8,
    pub command: DimseCommand,
    pub data: Vec<u8>,
}

/// Inbound fragment accumulator for one association
#[derive(Debug, Default)]
pub struct CommandAssembler {
    context_id: Option<u8>,
    command_bytes: Vec<u8>,
    command: Option<DimseCommand>,
    data_bytes: Vec<u8>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the PDVs of one P-DATA-TF PDU
    ///
    /// Returns every message completed by these fragments, in order. Any
    /// error leaves the association in an unrecoverable state.
    pub fn add_pdvs(&mut self, pdvs: &[PresentationDataValue]) -> Result<Vec<AssembledMessage>> {
        let mut complete = Vec::new();
        for pdv in pdvs {
            if let Some(message) = self.add(pdv)? {
                complete.push(message);
            }
        }
        Ok(complete)
    }

    fn add(&mut self, pdv: &PresentationDataValue) -> Result<Option<AssembledMessage>> {
        match self.context_id {
            None => self.context_id = Some(pdv.context_id),
            Some(id) if id != pdv.context_id => {
                return Err(DulError::Reassembly(format!(
                    "mixed presentation contexts {} and {} in one message",
                    id, pdv.context_id
                )))
            }
            Some(_) => {}
        }

        if pdv.command {
            if self.command.is_some() {
                return Err(DulError::Reassembly(
                    "command fragment after the final command fragment".into(),
                ));
            }
            self.command_bytes.extend_from_slice(&pdv.value);
            if pdv.last {
                self.command = Some(DimseCommand::decode(&self.command_bytes)?);
            }
        } else {
            match &self.command {
                None => {
                    return Err(DulError::Reassembly(
                        "data fragment before the command is complete".into(),
                    ))
                }
                Some(command) if !command.has_data() => {
                    return Err(DulError::Reassembly(format!(
                        "data fragment for {} which declares no data set",
                        command.command_field
                    )))
                }
                Some(_) => {}
            }
            self.data_bytes.extend_from_slice(&pdv.value);
        }

        let done = match &self.command {
            Some(command) => !command.has_data() || (!pdv.command && pdv.last),
            None => false,
        };
        if !done {
            return Ok(None);
        }

        let state = std::mem::take(self);
        match (state.context_id, state.command) {
            (Some(context_id), Some(command)) => Ok(Some(AssembledMessage {
                context_id,
                command,
                data: state.data_bytes,
            })),
            _ => Err(DulError::Reassembly("incomplete message state".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdvs_of(pdus: Vec<Pdu>) -> Vec<PresentationDataValue> {
        pdus.into_iter()
            .flat_map(|pdu| match pdu {
                Pdu::PDataTf(pdvs) => pdvs,
                other => panic!("unexpected {}", other),
            })
            .collect()
    }

    #[test]
    fn test_fragment_count_for_peer_limit() {
        let chunk = max_fragment_size(16384, 4 << 20).unwrap();
        assert_eq!(chunk, 16376);

        let payload = vec![0xAB; 100_000];
        let fragments = fragment(1, false, &payload, chunk);
        assert_eq!(fragments.len(), 100_000usize.div_ceil(16376));
        assert!(fragments.iter().all(|f| f.value.len() <= chunk));
        assert_eq!(fragments.iter().filter(|f| f.last).count(), 1);
        assert!(fragments.last().unwrap().last);
    }

    #[test]
    fn test_zero_peer_limit_uses_local_max() {
        assert_eq!(max_fragment_size(0, 1024).unwrap(), 1016);
        assert!(max_fragment_size(8, 1024).is_err());
    }

    #[test]
    fn test_split_and_reassemble() {
        let command = DimseCommand::c_store_rq(9, "1.2.840.10008.5.1.4.1.1.2", "1.2.3.4");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        for chunk in [16, 100, 4096, 65536] {
            let pdus = split_into_pdus(5, &command, &data, chunk).unwrap();
            let pdvs = pdvs_of(pdus);
            // command fragments strictly precede data fragments
            let first_data = pdvs.iter().position(|p| !p.command).unwrap();
            assert!(pdvs[..first_data].iter().all(|p| p.command));
            assert!(pdvs[first_data..].iter().all(|p| !p.command));
            assert!(pdvs.iter().all(|p| p.context_id == 5));

            let mut assembler = CommandAssembler::new();
            let mut messages = Vec::new();
            for pdv in &pdvs {
                messages.extend(assembler.add_pdvs(std::slice::from_ref(pdv)).unwrap());
            }
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].context_id, 5);
            assert_eq!(messages[0].command, command);
            assert_eq!(messages[0].data, data);
        }
    }

    #[test]
    fn test_command_without_data() {
        let command = DimseCommand::c_echo_rq(1);
        let pdvs = pdvs_of(split_into_pdus(1, &command, &[], 32).unwrap());
        assert!(pdvs.iter().all(|p| p.command));

        let mut assembler = CommandAssembler::new();
        let messages = assembler.add_pdvs(&pdvs).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].data.is_empty());

        // a data fragment continuing the same context is a protocol error
        let trailing = PresentationDataValue {
            context_id: 1,
            command: false,
            last: true,
            value: vec![1, 2],
        };
        assert!(matches!(
            assembler.add_pdvs(&[trailing]),
            Err(DulError::Reassembly(_))
        ));
    }

    #[test]
    fn test_data_for_command_without_data_set_in_same_pdu() {
        let command = DimseCommand::c_echo_rq(1);
        let mut pdvs = fragment(1, true, &command.encode(), 1024);
        pdvs.push(PresentationDataValue {
            context_id: 1,
            command: false,
            last: true,
            value: vec![0; 4],
        });
        let mut assembler = CommandAssembler::new();
        // the echo completes first, then the stray data fragment fails
        assert!(assembler.add_pdvs(&pdvs).is_err());
    }

    #[test]
    fn test_zero_chunk_size_refused() {
        let command = DimseCommand::c_store_rq(2, "1.2.840.10008.5.1.4.1.1.2", "1.2.3");
        assert!(matches!(
            split_into_pdus(1, &command, &[0; 16], 0),
            Err(DulError::Negotiation(_))
        ));
        assert!(matches!(
            split_into_pdus(1, &DimseCommand::c_echo_rq(1), &[], 0),
            Err(DulError::Negotiation(_))
        ));
    }

    #[test]
    fn test_refuses_data_with_null_data_set() {
        let command = DimseCommand::c_echo_rq(1);
        assert!(split_into_pdus(1, &command, &[1], 1024).is_err());
    }

    #[test]
    fn test_mixed_contexts_rejected() {
        let command = DimseCommand::c_find_rq(3, "1.2.840.10008.5.1.4.1.2.2.1");
        let mut pdvs = fragment(1, true, &command.encode(), 8);
        pdvs[1].context_id = 3;
        let mut assembler = CommandAssembler::new();
        assert!(matches!(
            assembler.add_pdvs(&pdvs),
            Err(DulError::Reassembly(_))
        ));
    }

    #[test]
    fn test_two_messages_in_one_pdu() {
        let mut pdvs = fragment(1, true, &DimseCommand::c_echo_rq(1).encode(), 1024);
        pdvs.extend(fragment(1, true, &DimseCommand::c_echo_rq(2).encode(), 1024));
        let mut assembler = CommandAssembler::new();
        let messages = assembler.add_pdvs(&pdvs).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].command.message_id, Some(2));
    }
}
