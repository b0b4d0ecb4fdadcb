//! Upper Layer PDU codec
//!
//! Every PDU starts with a 6-byte header: PDU type, one reserved byte and a
//! big-endian u32 length of the remaining body. Associate PDUs carry a list
//! of variable items, each with a 4-byte header (type, reserved, u16 length).

use crate::error::{DulError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the fixed PDU header
pub const PDU_HEADER_SIZE: usize = 6;

/// Maximum PDU length this engine advertises and accepts (4 MiB)
pub const DEFAULT_MAX_PDU_SIZE: u32 = 4 << 20;

/// Peer maximum PDU length assumed until user information says otherwise
pub const DEFAULT_PEER_MAX_PDU_SIZE: u32 = 16384;

/// The only protocol version defined by PS3.8
pub const PROTOCOL_VERSION: u16 = 0x0001;

const AE_TITLE_LEN: usize = 16;

/// PDU type codes
pub mod pdu_type {
    pub const ASSOCIATE_RQ: u8 = 0x01;
    pub const ASSOCIATE_AC: u8 = 0x02;
    pub const ASSOCIATE_RJ: u8 = 0x03;
    pub const P_DATA_TF: u8 = 0x04;
    pub const RELEASE_RQ: u8 = 0x05;
    pub const RELEASE_RP: u8 = 0x06;
    pub const ABORT: u8 = 0x07;
}

/// Variable item type codes
pub mod item_type {
    pub const APPLICATION_CONTEXT: u8 = 0x10;
    pub const PRESENTATION_CONTEXT_RQ: u8 = 0x20;
    pub const PRESENTATION_CONTEXT_AC: u8 = 0x21;
    pub const ABSTRACT_SYNTAX: u8 = 0x30;
    pub const TRANSFER_SYNTAX: u8 = 0x40;
    pub const USER_INFORMATION: u8 = 0x50;
    pub const MAXIMUM_LENGTH: u8 = 0x51;
    pub const IMPLEMENTATION_CLASS_UID: u8 = 0x52;
    pub const IMPLEMENTATION_VERSION_NAME: u8 = 0x55;
}

/// A-ABORT source: service user
pub const ABORT_SOURCE_SERVICE_USER: u8 = 0;
/// A-ABORT source: service provider
pub const ABORT_SOURCE_SERVICE_PROVIDER: u8 = 2;
/// A-ABORT reason: not specified
pub const ABORT_REASON_NOT_SPECIFIED: u8 = 0;
/// A-ABORT reason: unexpected PDU
pub const ABORT_REASON_UNEXPECTED_PDU: u8 = 2;

/// A-ASSOCIATE-RJ result, source and reason codes
pub mod reject {
    pub const RESULT_PERMANENT: u8 = 1;
    pub const SOURCE_SERVICE_USER: u8 = 1;
    pub const SOURCE_SERVICE_PROVIDER_ACSE: u8 = 2;
    /// Source 1: no reason given
    pub const REASON_NO_REASON: u8 = 1;
    /// Source 1: called AE title not recognized
    pub const REASON_CALLED_AE_NOT_RECOGNIZED: u8 = 7;
    /// Source 2: no reason given
    pub const REASON_PROVIDER_NO_REASON: u8 = 1;
    /// Source 2: protocol version not supported
    pub const REASON_PROTOCOL_VERSION: u8 = 2;
}

/// Presentation context carried in A-ASSOCIATE-RQ (0x20) and -AC (0x21)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContextItem {
    /// Odd context id chosen by the requestor
    pub context_id: u8,
    /// Result/reason in an AC item, zero in an RQ item
    pub result: u8,
    /// Abstract and transfer syntax sub-items
    pub items: Vec<SubItem>,
}

/// Variable item of an associate PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubItem {
    ApplicationContext(String),
    PresentationContextRq(PresentationContextItem),
    PresentationContextAc(PresentationContextItem),
    AbstractSyntax(String),
    TransferSyntax(String),
    UserInformation(Vec<SubItem>),
    MaximumLength(u32),
    ImplementationClassUid(String),
    ImplementationVersionName(String),
    /// Item type this codec does not interpret, kept verbatim
    Unknown { item_type: u8, data: Vec<u8> },
}

/// A-ASSOCIATE-RQ / A-ASSOCIATE-AC body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatePdu {
    pub protocol_version: u16,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    pub items: Vec<SubItem>,
}

/// A-ASSOCIATE-RJ body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociateRj {
    pub result: u8,
    pub source: u8,
    pub reason: u8,
}

/// One presentation data value of a P-DATA-TF PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationDataValue {
    pub context_id: u8,
    /// Fragment belongs to the command set (otherwise the data set)
    pub command: bool,
    /// Final fragment of its command or data stream
    pub last: bool,
    pub value: Vec<u8>,
}

/// A-ABORT body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort {
    pub source: u8,
    pub reason: u8,
}

/// Upper Layer protocol data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    AssociateRq(AssociatePdu),
    AssociateAc(AssociatePdu),
    AssociateRj(AssociateRj),
    PDataTf(Vec<PresentationDataValue>),
    ReleaseRq,
    ReleaseRp,
    Abort(Abort),
    /// PDU type outside PS3.8; the reader reports it as an invalid PDU
    Unknown { pdu_type: u8, data: Vec<u8> },
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DulError::InvalidPdu(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn decode_text(value: &[u8]) -> Result<String> {
    let text = String::from_utf8(value.to_vec())?;
    Ok(text.trim_end_matches(['\0', ' ']).to_string())
}

fn put_ae_title(buf: &mut BytesMut, title: &str) {
    let mut field = [b' '; AE_TITLE_LEN];
    let bytes = title.as_bytes();
    let len = bytes.len().min(AE_TITLE_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    buf.put_slice(&field);
}

fn get_ae_title(buf: &mut &[u8]) -> Result<String> {
    ensure(*buf, AE_TITLE_LEN, "AE title")?;
    let (title, rest) = buf.split_at(AE_TITLE_LEN);
    *buf = rest;
    Ok(String::from_utf8_lossy(title).trim().to_string())
}

impl SubItem {
    /// Item type code on the wire
    pub fn item_type(&self) -> u8 {
        match self {
            SubItem::ApplicationContext(_) => item_type::APPLICATION_CONTEXT,
            SubItem::PresentationContextRq(_) => item_type::PRESENTATION_CONTEXT_RQ,
            SubItem::PresentationContextAc(_) => item_type::PRESENTATION_CONTEXT_AC,
            SubItem::AbstractSyntax(_) => item_type::ABSTRACT_SYNTAX,
            SubItem::TransferSyntax(_) => item_type::TRANSFER_SYNTAX,
            SubItem::UserInformation(_) => item_type::USER_INFORMATION,
            SubItem::MaximumLength(_) => item_type::MAXIMUM_LENGTH,
            SubItem::ImplementationClassUid(_) => item_type::IMPLEMENTATION_CLASS_UID,
            SubItem::ImplementationVersionName(_) => item_type::IMPLEMENTATION_VERSION_NAME,
            SubItem::Unknown { item_type, .. } => *item_type,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut value = BytesMut::new();
        match self {
            SubItem::ApplicationContext(s)
            | SubItem::AbstractSyntax(s)
            | SubItem::TransferSyntax(s)
            | SubItem::ImplementationClassUid(s)
            | SubItem::ImplementationVersionName(s) => value.put_slice(s.as_bytes()),
            SubItem::PresentationContextRq(pc) | SubItem::PresentationContextAc(pc) => {
                value.put_u8(pc.context_id);
                value.put_u8(0);
                value.put_u8(pc.result);
                value.put_u8(0);
                for item in &pc.items {
                    item.encode(&mut value)?;
                }
            }
            SubItem::UserInformation(items) => {
                for item in items {
                    item.encode(&mut value)?;
                }
            }
            SubItem::MaximumLength(len) => value.put_u32(*len),
            SubItem::Unknown { data, .. } => value.put_slice(data),
        }
        buf.put_u8(self.item_type());
        buf.put_u8(0);
        let len = u16::try_from(value.len()).map_err(|_| {
            DulError::InvalidPdu(format!(
                "item {:#04x} value of {} bytes exceeds 65535",
                self.item_type(),
                value.len()
            ))
        })?;
        buf.put_u16(len);
        buf.put_slice(&value);
        Ok(())
    }

    fn decode(code: u8, value: &[u8]) -> Result<SubItem> {
        Ok(match code {
            item_type::APPLICATION_CONTEXT => SubItem::ApplicationContext(decode_text(value)?),
            item_type::PRESENTATION_CONTEXT_RQ | item_type::PRESENTATION_CONTEXT_AC => {
                ensure(value, 4, "presentation context item")?;
                let pc = PresentationContextItem {
                    context_id: value[0],
                    result: value[2],
                    items: decode_items(&value[4..])?,
                };
                if code == item_type::PRESENTATION_CONTEXT_RQ {
                    SubItem::PresentationContextRq(pc)
                } else {
                    SubItem::PresentationContextAc(pc)
                }
            }
            item_type::ABSTRACT_SYNTAX => SubItem::AbstractSyntax(decode_text(value)?),
            item_type::TRANSFER_SYNTAX => SubItem::TransferSyntax(decode_text(value)?),
            item_type::USER_INFORMATION => SubItem::UserInformation(decode_items(value)?),
            item_type::MAXIMUM_LENGTH => {
                ensure(value, 4, "maximum length item")?;
                let mut v = value;
                SubItem::MaximumLength(v.get_u32())
            }
            item_type::IMPLEMENTATION_CLASS_UID => {
                SubItem::ImplementationClassUid(decode_text(value)?)
            }
            item_type::IMPLEMENTATION_VERSION_NAME => {
                SubItem::ImplementationVersionName(decode_text(value)?)
            }
            other => SubItem::Unknown {
                item_type: other,
                data: value.to_vec(),
            },
        })
    }
}

/// Decode a run of variable items filling `buf` exactly
pub fn decode_items(mut buf: &[u8]) -> Result<Vec<SubItem>> {
    let mut items = Vec::new();
    while buf.has_remaining() {
        ensure(buf, 4, "item header")?;
        let code = buf.get_u8();
        buf.advance(1);
        let len = buf.get_u16() as usize;
        ensure(buf, len, "item value")?;
        let (value, rest) = buf.split_at(len);
        items.push(SubItem::decode(code, value)?);
        buf = rest;
    }
    Ok(items)
}

impl AssociatePdu {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.protocol_version);
        buf.put_u16(0);
        put_ae_title(buf, &self.called_ae_title);
        put_ae_title(buf, &self.calling_ae_title);
        buf.put_bytes(0, 32);
        for item in &self.items {
            item.encode(buf)?;
        }
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        ensure(buf, 4, "associate header")?;
        let protocol_version = buf.get_u16();
        buf.advance(2);
        let called_ae_title = get_ae_title(&mut buf)?;
        let calling_ae_title = get_ae_title(&mut buf)?;
        ensure(buf, 32, "associate reserved block")?;
        buf.advance(32);
        Ok(AssociatePdu {
            protocol_version,
            called_ae_title,
            calling_ae_title,
            items: decode_items(buf)?,
        })
    }
}

impl Pdu {
    /// A-ABORT PDU
    pub fn abort(source: u8, reason: u8) -> Self {
        Pdu::Abort(Abort { source, reason })
    }

    /// A-ASSOCIATE-RJ PDU
    pub fn reject(result: u8, source: u8, reason: u8) -> Self {
        Pdu::AssociateRj(AssociateRj {
            result,
            source,
            reason,
        })
    }

    /// PDU type code on the wire
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::AssociateRq(_) => pdu_type::ASSOCIATE_RQ,
            Pdu::AssociateAc(_) => pdu_type::ASSOCIATE_AC,
            Pdu::AssociateRj(_) => pdu_type::ASSOCIATE_RJ,
            Pdu::PDataTf(_) => pdu_type::P_DATA_TF,
            Pdu::ReleaseRq => pdu_type::RELEASE_RQ,
            Pdu::ReleaseRp => pdu_type::RELEASE_RP,
            Pdu::Abort(_) => pdu_type::ABORT,
            Pdu::Unknown { pdu_type, .. } => *pdu_type,
        }
    }

    /// Encode the PDU including its 6-byte header
    ///
    /// Fails when a variable item or the PDU body outgrows its length field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = BytesMut::new();
        match self {
            Pdu::AssociateRq(a) | Pdu::AssociateAc(a) => a.encode(&mut body)?,
            Pdu::AssociateRj(rj) => {
                body.put_u8(0);
                body.put_u8(rj.result);
                body.put_u8(rj.source);
                body.put_u8(rj.reason);
            }
            Pdu::PDataTf(pdvs) => {
                for pdv in pdvs {
                    let len = u32::try_from(pdv.value.len() + 2).map_err(|_| {
                        DulError::InvalidPdu(format!("PDV of {} bytes", pdv.value.len()))
                    })?;
                    body.put_u32(len);
                    body.put_u8(pdv.context_id);
                    body.put_u8(u8::from(pdv.command) | (u8::from(pdv.last) << 1));
                    body.put_slice(&pdv.value);
                }
            }
            Pdu::ReleaseRq | Pdu::ReleaseRp => body.put_u32(0),
            Pdu::Abort(abort) => {
                body.put_u16(0);
                body.put_u8(abort.source);
                body.put_u8(abort.reason);
            }
            Pdu::Unknown { data, .. } => body.put_slice(data),
        }

        let mut out = BytesMut::with_capacity(PDU_HEADER_SIZE + body.len());
        out.put_u8(self.pdu_type());
        out.put_u8(0);
        let len = u32::try_from(body.len())
            .map_err(|_| DulError::InvalidPdu(format!("PDU body of {} bytes", body.len())))?;
        out.put_u32(len);
        out.put_slice(&body);
        Ok(out.to_vec())
    }

    /// Decode a PDU body whose header has already been consumed
    pub fn decode(code: u8, body: &[u8]) -> Result<Pdu> {
        match code {
            pdu_type::ASSOCIATE_RQ => Ok(Pdu::AssociateRq(AssociatePdu::decode(body)?)),
            pdu_type::ASSOCIATE_AC => Ok(Pdu::AssociateAc(AssociatePdu::decode(body)?)),
            pdu_type::ASSOCIATE_RJ => {
                ensure(body, 4, "A-ASSOCIATE-RJ")?;
                Ok(Pdu::reject(body[1], body[2], body[3]))
            }
            pdu_type::P_DATA_TF => {
                let mut buf = body;
                let mut pdvs = Vec::new();
                while buf.has_remaining() {
                    ensure(buf, 6, "PDV header")?;
                    let len = buf.get_u32() as usize;
                    if len < 2 {
                        return Err(DulError::InvalidPdu(format!("PDV length {} < 2", len)));
                    }
                    let context_id = buf.get_u8();
                    let control = buf.get_u8();
                    ensure(buf, len - 2, "PDV value")?;
                    let (value, rest) = buf.split_at(len - 2);
                    pdvs.push(PresentationDataValue {
                        context_id,
                        command: control & 0x01 != 0,
                        last: control & 0x02 != 0,
                        value: value.to_vec(),
                    });
                    buf = rest;
                }
                Ok(Pdu::PDataTf(pdvs))
            }
            pdu_type::RELEASE_RQ => Ok(Pdu::ReleaseRq),
            pdu_type::RELEASE_RP => Ok(Pdu::ReleaseRp),
            pdu_type::ABORT => {
                ensure(body, 4, "A-ABORT")?;
                Ok(Pdu::abort(body[2], body[3]))
            }
            other => Ok(Pdu::Unknown {
                pdu_type: other,
                data: body.to_vec(),
            }),
        }
    }

    /// Decode a complete PDU (header plus body) from a buffer
    pub fn from_bytes(buf: &[u8]) -> Result<Pdu> {
        ensure(buf, PDU_HEADER_SIZE, "PDU header")?;
        let length = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        let body = &buf[PDU_HEADER_SIZE..];
        ensure(body, length, "PDU body")?;
        Pdu::decode(buf[0], &body[..length])
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pdu::AssociateRq(a) => write!(
                f,
                "A-ASSOCIATE-RQ{{called: {:?}, calling: {:?}, items: {}}}",
                a.called_ae_title,
                a.calling_ae_title,
                a.items.len()
            ),
            Pdu::AssociateAc(a) => write!(f, "A-ASSOCIATE-AC{{items: {}}}", a.items.len()),
            Pdu::AssociateRj(rj) => write!(
                f,
                "A-ASSOCIATE-RJ{{result: {}, source: {}, reason: {}}}",
                rj.result, rj.source, rj.reason
            ),
            Pdu::PDataTf(pdvs) => {
                write!(f, "P-DATA-TF{{")?;
                for (i, pdv) in pdvs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(
                        f,
                        "ctx {} {}{} {}B",
                        pdv.context_id,
                        if pdv.command { "cmd" } else { "data" },
                        if pdv.last { " last" } else { "" },
                        pdv.value.len()
                    )?;
                }
                write!(f, "}}")
            }
            Pdu::ReleaseRq => write!(f, "A-RELEASE-RQ"),
            Pdu::ReleaseRp => write!(f, "A-RELEASE-RP"),
            Pdu::Abort(a) => write!(f, "A-ABORT{{source: {}, reason: {}}}", a.source, a.reason),
            Pdu::Unknown { pdu_type, data } => {
                write!(f, "UNKNOWN{{type: {:#04x}, {}B}}", pdu_type, data.len())
            }
        }
    }
}

/// Read one PDU from the stream
///
/// Returns `Ok(None)` when the stream ends cleanly on a PDU boundary. A PDU
/// whose declared length exceeds `max_size` is refused before its body is
/// read.
pub async fn read_pdu<R>(reader: &mut R, max_size: usize) -> Result<Option<Pdu>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; PDU_HEADER_SIZE];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;

    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if length > max_size {
        return Err(DulError::PduTooLarge {
            size: length,
            max: max_size,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Pdu::decode(header[0], &body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rq() -> Pdu {
        Pdu::AssociateRq(AssociatePdu {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: "RADIANT".to_string(),
            calling_ae_title: "SCANNER".to_string(),
            items: vec![
                SubItem::ApplicationContext("1.2.840.10008.3.1.1.1".to_string()),
                SubItem::PresentationContextRq(PresentationContextItem {
                    context_id: 1,
                    result: 0,
                    items: vec![
                        SubItem::AbstractSyntax("1.2.840.10008.1.1".to_string()),
                        SubItem::TransferSyntax("1.2.840.10008.1.2".to_string()),
                    ],
                }),
                SubItem::UserInformation(vec![
                    SubItem::MaximumLength(16384),
                    SubItem::ImplementationClassUid("1.2.3".to_string()),
                ]),
            ],
        })
    }

    #[test]
    fn test_associate_rq_layout() {
        let bytes = sample_rq().encode().unwrap();
        assert_eq!(bytes[0], pdu_type::ASSOCIATE_RQ);
        let length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        assert_eq!(length, bytes.len() - PDU_HEADER_SIZE);
        // protocol version
        assert_eq!(&bytes[6..8], &[0x00, 0x01]);
        // called AE title, space padded
        assert_eq!(&bytes[10..26], b"RADIANT         ");
        assert_eq!(Pdu::from_bytes(&bytes).unwrap(), sample_rq());
    }

    #[test]
    fn test_uid_padding_stripped() {
        let mut buf = BytesMut::new();
        SubItem::AbstractSyntax("1.2.840.10008.1.1\0".to_string())
            .encode(&mut buf)
            .unwrap();
        let items = decode_items(&buf).unwrap();
        assert_eq!(
            items,
            vec![SubItem::AbstractSyntax("1.2.840.10008.1.1".to_string())]
        );
    }

    #[test]
    fn test_pdv_control_bits() {
        let pdu = Pdu::PDataTf(vec![
            PresentationDataValue {
                context_id: 3,
                command: true,
                last: false,
                value: vec![1, 2, 3],
            },
            PresentationDataValue {
                context_id: 3,
                command: false,
                last: true,
                value: vec![],
            },
        ]);
        let bytes = pdu.encode().unwrap();
        // first PDV: len 5, ctx 3, control 0x01
        assert_eq!(&bytes[6..12], &[0, 0, 0, 5, 3, 0x01]);
        // second PDV control: data + last
        assert_eq!(bytes[6 + 4 + 5 + 5], 0x02);
        assert_eq!(Pdu::from_bytes(&bytes).unwrap(), pdu);
    }

    #[test]
    fn test_oversized_item_refused() {
        let pdu = Pdu::AssociateRq(AssociatePdu {
            protocol_version: PROTOCOL_VERSION,
            called_ae_title: "RADIANT".to_string(),
            calling_ae_title: "SCANNER".to_string(),
            items: vec![SubItem::PresentationContextRq(PresentationContextItem {
                context_id: 1,
                result: 0,
                items: vec![SubItem::AbstractSyntax("1.".repeat(40_000))],
            })],
        });
        match pdu.encode() {
            Err(DulError::InvalidPdu(msg)) => assert!(msg.contains("80000 bytes")),
            other => panic!("expected InvalidPdu, got {:?}", other),
        }

        // the largest value that fits still encodes
        let mut buf = BytesMut::new();
        SubItem::Unknown {
            item_type: 0x99,
            data: vec![0; 65535],
        }
        .encode(&mut buf)
        .unwrap();
        assert_eq!(&buf[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_truncated_item_rejected() {
        // presentation context item claiming 40 bytes with only 4 present
        let body = [0x20, 0x00, 0x00, 0x28, 0x01, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_items(&body),
            Err(DulError::InvalidPdu(_))
        ));
    }

    #[test]
    fn test_unknown_pdu_type_preserved() {
        let pdu = Pdu::decode(0x09, &[1, 2]).unwrap();
        assert_eq!(
            pdu,
            Pdu::Unknown {
                pdu_type: 0x09,
                data: vec![1, 2]
            }
        );
    }

    #[tokio::test]
    async fn test_read_pdu_sequence_then_eof() {
        let mut stream = Vec::new();
        stream.extend(Pdu::ReleaseRq.encode().unwrap());
        stream.extend(Pdu::abort(2, 0).encode().unwrap());
        let mut reader = stream.as_slice();

        assert_eq!(read_pdu(&mut reader, 1024).await.unwrap(), Some(Pdu::ReleaseRq));
        assert_eq!(
            read_pdu(&mut reader, 1024).await.unwrap(),
            Some(Pdu::abort(2, 0))
        );
        assert_eq!(read_pdu(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_pdu_too_large() {
        let bytes = sample_rq().encode().unwrap();
        let mut reader = bytes.as_slice();
        let result = read_pdu(&mut reader, 10).await;
        assert!(matches!(result, Err(DulError::PduTooLarge { max: 10, .. })));
    }

    #[tokio::test]
    async fn test_read_pdu_truncated_body() {
        let bytes = sample_rq().encode().unwrap();
        let mut reader = &bytes[..20];
        assert!(matches!(
            read_pdu(&mut reader, 1 << 20).await,
            Err(DulError::Io(_))
        ));
    }
}
