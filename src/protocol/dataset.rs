//! Minimal data set element codec
//!
//! Reads and writes flat element lists in implicit or explicit VR little
//! endian. Sequences and encapsulated values are carried as opaque bytes, so
//! a data set can be inspected (query keys, SOP UIDs) and forwarded without
//! a full DICOM toolkit.

use crate::error::{DulError, Result};
use crate::protocol::uid;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);

/// VRs whose explicit encoding uses 2 reserved bytes and a 32-bit length
const LONG_VRS: [&[u8; 2]; 13] = [
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"SV", b"UC", b"UN", b"UR", b"UT", b"UV",
];

/// Attribute tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Tag { group, element }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

/// Tags the engine looks at
pub mod tags {
    use super::Tag;

    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const QUERY_RETRIEVE_LEVEL: Tag = Tag::new(0x0008, 0x0052);
    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
}

/// Byte layout of a data set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
}

impl Encoding {
    /// Encoding implied by a negotiated transfer syntax
    ///
    /// Every little-endian transfer syntax other than implicit VR uses
    /// explicit VR for the data set itself. Big endian is not supported.
    pub fn from_transfer_syntax(transfer_syntax_uid: &str) -> Result<Self> {
        match transfer_syntax_uid {
            uid::IMPLICIT_VR_LITTLE_ENDIAN => Ok(Encoding::ImplicitVrLittleEndian),
            uid::EXPLICIT_VR_BIG_ENDIAN => Err(DulError::InvalidDataSet(format!(
                "unsupported transfer syntax {}",
                transfer_syntax_uid
            ))),
            _ => Ok(Encoding::ExplicitVrLittleEndian),
        }
    }
}

/// One data element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: Tag,
    /// VR as read from an explicit VR stream, `None` for implicit VR
    pub vr: Option<[u8; 2]>,
    /// Value bytes; for undefined-length elements this includes the
    /// trailing sequence delimitation item
    pub value: Vec<u8>,
    pub undefined_length: bool,
}

impl Element {
    /// Text element padded to even length
    pub fn text(tag: Tag, vr: &[u8; 2], value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(if vr == b"UI" { 0 } else { b' ' });
        }
        Element {
            tag,
            vr: Some(*vr),
            value: bytes,
            undefined_length: false,
        }
    }

    /// Value as trimmed text
    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value)
            .trim_end_matches(['\0', ' '])
            .trim_start()
            .to_string()
    }

    fn is_long(vr: &[u8; 2]) -> bool {
        LONG_VRS.iter().any(|v| *v == vr)
    }
}

/// Find the first element with `tag`
pub fn find(elements: &[Element], tag: Tag) -> Option<&Element> {
    elements.iter().find(|e| e.tag == tag)
}

fn invalid(msg: impl Into<String>) -> DulError {
    DulError::InvalidDataSet(msg.into())
}

fn read_tag(buf: &mut &[u8]) -> Result<Tag> {
    if buf.remaining() < 4 {
        return Err(invalid("truncated tag"));
    }
    Ok(Tag::new(buf.get_u16_le(), buf.get_u16_le()))
}

/// Length of an undefined-length value, up to and including its
/// sequence delimitation item
fn undefined_value_len(buf: &[u8], encoding: Encoding) -> Result<usize> {
    let mut cursor = buf;
    loop {
        let tag = read_tag(&mut cursor)?;
        if cursor.remaining() < 4 {
            return Err(invalid("truncated item header"));
        }
        let len = cursor.get_u32_le();
        match tag {
            SEQUENCE_DELIMITATION => return Ok(buf.len() - cursor.len()),
            ITEM if len == UNDEFINED_LENGTH => loop {
                let mut peek = cursor;
                if read_tag(&mut peek)? == ITEM_DELIMITATION {
                    if peek.remaining() < 4 {
                        return Err(invalid("truncated item delimitation"));
                    }
                    cursor = &peek[4..];
                    break;
                }
                let (_, consumed) = read_element(cursor, encoding)?;
                cursor = &cursor[consumed..];
            },
            ITEM => {
                let len = len as usize;
                if cursor.remaining() < len {
                    return Err(invalid("item length exceeds data set"));
                }
                cursor = &cursor[len..];
            }
            other => return Err(invalid(format!("unexpected {} inside sequence", other))),
        }
    }
}

fn read_element(buf: &[u8], encoding: Encoding) -> Result<(Element, usize)> {
    let mut cursor = buf;
    let tag = read_tag(&mut cursor)?;
    let (vr, len) = match encoding {
        Encoding::ImplicitVrLittleEndian => {
            if cursor.remaining() < 4 {
                return Err(invalid(format!("truncated header of {}", tag)));
            }
            (None, cursor.get_u32_le())
        }
        Encoding::ExplicitVrLittleEndian => {
            if cursor.remaining() < 4 {
                return Err(invalid(format!("truncated header of {}", tag)));
            }
            let vr = [cursor[0], cursor[1]];
            cursor.advance(2);
            let len = if Element::is_long(&vr) {
                if cursor.remaining() < 6 {
                    return Err(invalid(format!("truncated header of {}", tag)));
                }
                cursor.advance(2);
                cursor.get_u32_le()
            } else {
                u32::from(cursor.get_u16_le())
            };
            (Some(vr), len)
        }
    };

    let header_len = buf.len() - cursor.len();
    let (value_len, undefined_length) = if len == UNDEFINED_LENGTH {
        (undefined_value_len(cursor, encoding)?, true)
    } else {
        (len as usize, false)
    };
    if cursor.remaining() < value_len {
        return Err(invalid(format!("value of {} exceeds data set", tag)));
    }

    let element = Element {
        tag,
        vr,
        value: cursor[..value_len].to_vec(),
        undefined_length,
    };
    Ok((element, header_len + value_len))
}

/// Read every top-level element of a data set
pub fn read_elements(mut buf: &[u8], encoding: Encoding) -> Result<Vec<Element>> {
    let mut elements = Vec::new();
    while buf.has_remaining() {
        let (element, consumed) = read_element(buf, encoding)?;
        elements.push(element);
        buf = &buf[consumed..];
    }
    Ok(elements)
}

/// Write elements in the given encoding
///
/// Elements read from implicit VR carry no VR; they are written as `UN`
/// when the target encoding is explicit.
pub fn write_elements(elements: &[Element], encoding: Encoding) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for element in elements {
        let len = if element.undefined_length {
            UNDEFINED_LENGTH
        } else {
            element.value.len() as u32
        };
        buf.put_u16_le(element.tag.group);
        buf.put_u16_le(element.tag.element);
        match encoding {
            Encoding::ImplicitVrLittleEndian => buf.put_u32_le(len),
            Encoding::ExplicitVrLittleEndian => {
                let vr = element.vr.unwrap_or(*b"UN");
                buf.put_slice(&vr);
                if Element::is_long(&vr) || len > u32::from(u16::MAX) {
                    if !Element::is_long(&vr) {
                        // value too long for a short VR; fall back to UN
                        let end = buf.len();
                        buf[end - 2..].copy_from_slice(b"UN");
                    }
                    buf.put_u16_le(0);
                    buf.put_u32_le(len);
                } else {
                    buf.put_u16_le(len as u16);
                }
            }
        }
        buf.put_slice(&element.value);
    }
    buf.to_vec()
}
