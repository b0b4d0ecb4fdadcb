//! DIMSE command set codec
//!
//! A command set is a run of group 0000 elements, always encoded in implicit
//! VR little endian and preceded by its group length element. Only the
//! fields used by the C-ECHO, C-STORE, C-FIND, C-GET and C-MOVE services are
//! interpreted; other group 0000 elements are skipped on decode.

use crate::error::{DulError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// CommandDataSetType value meaning "no data set follows"
pub const DATA_SET_NULL: u16 = 0x0101;
/// CommandDataSetType value used when a data set follows
pub const DATA_SET_PRESENT: u16 = 0x0001;

/// Command element tags (group 0000)
pub mod tag {
    pub const GROUP_LENGTH: u16 = 0x0000;
    pub const AFFECTED_SOP_CLASS_UID: u16 = 0x0002;
    pub const COMMAND_FIELD: u16 = 0x0100;
    pub const MESSAGE_ID: u16 = 0x0110;
    pub const MESSAGE_ID_BEING_RESPONDED_TO: u16 = 0x0120;
    pub const MOVE_DESTINATION: u16 = 0x0600;
    pub const PRIORITY: u16 = 0x0700;
    pub const COMMAND_DATA_SET_TYPE: u16 = 0x0800;
    pub const STATUS: u16 = 0x0900;
    pub const ERROR_COMMENT: u16 = 0x0902;
    pub const AFFECTED_SOP_INSTANCE_UID: u16 = 0x1000;
    pub const REMAINING_SUB_OPERATIONS: u16 = 0x1020;
    pub const COMPLETED_SUB_OPERATIONS: u16 = 0x1021;
    pub const FAILED_SUB_OPERATIONS: u16 = 0x1022;
    pub const WARNING_SUB_OPERATIONS: u16 = 0x1023;
    pub const MOVE_ORIGINATOR_AE_TITLE: u16 = 0x1030;
    pub const MOVE_ORIGINATOR_MESSAGE_ID: u16 = 0x1031;
}

/// Status codes used by the services in this crate
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const PENDING: u16 = 0xFF00;
    pub const CANCEL: u16 = 0xFE00;
    pub const UNRECOGNIZED_OPERATION: u16 = 0x0211;
    pub const PROCESSING_FAILURE: u16 = 0x0110;
    pub const OUT_OF_RESOURCES: u16 = 0xA700;
    pub const MOVE_DESTINATION_UNKNOWN: u16 = 0xA801;
    pub const UNABLE_TO_PROCESS: u16 = 0xC000;
    pub const SUB_OPERATIONS_WARNING: u16 = 0xB000;
}

/// DIMSE command type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CMoveRq,
    CMoveRsp,
    CEchoRq,
    CEchoRsp,
    CCancelRq,
    Other(u16),
}

impl CommandField {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => CommandField::CStoreRq,
            0x8001 => CommandField::CStoreRsp,
            0x0010 => CommandField::CGetRq,
            0x8010 => CommandField::CGetRsp,
            0x0020 => CommandField::CFindRq,
            0x8020 => CommandField::CFindRsp,
            0x0021 => CommandField::CMoveRq,
            0x8021 => CommandField::CMoveRsp,
            0x0030 => CommandField::CEchoRq,
            0x8030 => CommandField::CEchoRsp,
            0x0FFF => CommandField::CCancelRq,
            other => CommandField::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CommandField::CStoreRq => 0x0001,
            CommandField::CStoreRsp => 0x8001,
            CommandField::CGetRq => 0x0010,
            CommandField::CGetRsp => 0x8010,
            CommandField::CFindRq => 0x0020,
            CommandField::CFindRsp => 0x8020,
            CommandField::CMoveRq => 0x0021,
            CommandField::CMoveRsp => 0x8021,
            CommandField::CEchoRq => 0x0030,
            CommandField::CEchoRsp => 0x8030,
            CommandField::CCancelRq => 0x0FFF,
            CommandField::Other(code) => *code,
        }
    }

    /// Response messages have the high bit set
    pub fn is_response(&self) -> bool {
        self.code() & 0x8000 != 0
    }

    /// The response type answering this request type
    pub fn response(&self) -> CommandField {
        CommandField::from_code(self.code() | 0x8000)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandField::CStoreRq => "C-STORE-RQ",
            CommandField::CStoreRsp => "C-STORE-RSP",
            CommandField::CGetRq => "C-GET-RQ",
            CommandField::CGetRsp => "C-GET-RSP",
            CommandField::CFindRq => "C-FIND-RQ",
            CommandField::CFindRsp => "C-FIND-RSP",
            CommandField::CMoveRq => "C-MOVE-RQ",
            CommandField::CMoveRsp => "C-MOVE-RSP",
            CommandField::CEchoRq => "C-ECHO-RQ",
            CommandField::CEchoRsp => "C-ECHO-RSP",
            CommandField::CCancelRq => "C-CANCEL-RQ",
            CommandField::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandField::Other(code) => write!(f, "UNKNOWN({:#06x})", code),
            known => f.write_str(known.name()),
        }
    }
}

/// Response status with optional error comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub error_comment: String,
}

impl Status {
    pub fn new(code: u16, error_comment: impl Into<String>) -> Self {
        Status {
            code,
            error_comment: error_comment.into(),
        }
    }

    pub fn success() -> Self {
        Status::new(status::SUCCESS, "")
    }

    pub fn pending() -> Self {
        Status::new(status::PENDING, "")
    }

    pub fn is_success(&self) -> bool {
        self.code == status::SUCCESS
    }

    /// 0xFF00 and 0xFF01 both mean "more responses follow"
    pub fn is_pending(&self) -> bool {
        self.code == status::PENDING || self.code == 0xFF01
    }

    pub fn is_warning(&self) -> bool {
        self.code == 0x0001 || (0xB000..=0xBFFF).contains(&self.code)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_pending() && !self.is_warning() && self.code != status::CANCEL
    }
}

/// Sub-operation counters carried by C-MOVE and C-GET responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubOperations {
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// Decoded DIMSE command set
///
/// Fields that a given command type does not use stay `None` and are not
/// emitted on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimseCommand {
    pub command_field: CommandField,
    pub affected_sop_class_uid: String,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub move_destination: Option<String>,
    pub priority: Option<u16>,
    pub data_set_type: u16,
    pub status: Option<Status>,
    pub affected_sop_instance_uid: Option<String>,
    pub sub_operations: Option<SubOperations>,
    pub move_originator_ae_title: Option<String>,
    pub move_originator_message_id: Option<u16>,
}

impl DimseCommand {
    fn bare(command_field: CommandField, affected_sop_class_uid: &str) -> Self {
        DimseCommand {
            command_field,
            affected_sop_class_uid: affected_sop_class_uid.to_string(),
            message_id: None,
            message_id_being_responded_to: None,
            move_destination: None,
            priority: None,
            data_set_type: DATA_SET_NULL,
            status: None,
            affected_sop_instance_uid: None,
            sub_operations: None,
            move_originator_ae_title: None,
            move_originator_message_id: None,
        }
    }

    /// Request with medium priority and no data set
    pub fn request(command_field: CommandField, message_id: u16, sop_class_uid: &str) -> Self {
        let mut cmd = DimseCommand::bare(command_field, sop_class_uid);
        cmd.message_id = Some(message_id);
        if command_field != CommandField::CEchoRq {
            cmd.priority = Some(0);
        }
        cmd
    }

    /// Response answering `request`, without a data set
    pub fn response_to(request: &DimseCommand, status: Status) -> Self {
        let mut cmd = DimseCommand::bare(
            request.command_field.response(),
            &request.affected_sop_class_uid,
        );
        cmd.message_id_being_responded_to = request.message_id;
        cmd.affected_sop_instance_uid = match request.command_field {
            CommandField::CStoreRq => request.affected_sop_instance_uid.clone(),
            _ => None,
        };
        cmd.status = Some(status);
        cmd
    }

    pub fn c_echo_rq(message_id: u16) -> Self {
        DimseCommand::request(
            CommandField::CEchoRq,
            message_id,
            crate::protocol::uid::VERIFICATION,
        )
    }

    pub fn c_store_rq(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> Self {
        let mut cmd = DimseCommand::request(CommandField::CStoreRq, message_id, sop_class_uid);
        cmd.affected_sop_instance_uid = Some(sop_instance_uid.to_string());
        cmd.data_set_type = DATA_SET_PRESENT;
        cmd
    }

    pub fn c_find_rq(message_id: u16, sop_class_uid: &str) -> Self {
        DimseCommand::request(CommandField::CFindRq, message_id, sop_class_uid).with_data_set()
    }

    pub fn c_get_rq(message_id: u16, sop_class_uid: &str) -> Self {
        DimseCommand::request(CommandField::CGetRq, message_id, sop_class_uid).with_data_set()
    }

    pub fn c_move_rq(message_id: u16, sop_class_uid: &str, destination: &str) -> Self {
        let mut cmd =
            DimseCommand::request(CommandField::CMoveRq, message_id, sop_class_uid).with_data_set();
        cmd.move_destination = Some(destination.to_string());
        cmd
    }

    /// Mark the command as followed by a data set
    pub fn with_data_set(mut self) -> Self {
        self.data_set_type = DATA_SET_PRESENT;
        self
    }

    pub fn with_sub_operations(mut self, counters: SubOperations) -> Self {
        self.sub_operations = Some(counters);
        self
    }

    /// Whether a data set follows the command
    pub fn has_data(&self) -> bool {
        self.data_set_type != DATA_SET_NULL
    }

    /// Message id used to route the command to its exchange
    ///
    /// Requests are keyed by their own message id, responses and C-CANCEL
    /// by the id of the request they refer to.
    pub fn routing_id(&self) -> u16 {
        if self.command_field.is_response() || self.command_field == CommandField::CCancelRq {
            self.message_id_being_responded_to.unwrap_or(0)
        } else {
            self.message_id.unwrap_or(0)
        }
    }

    /// Encode as implicit VR little endian, group length first
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BytesMut::new();
        if !self.affected_sop_class_uid.is_empty() {
            put_text(&mut body, tag::AFFECTED_SOP_CLASS_UID, &self.affected_sop_class_uid, 0);
        }
        put_us(&mut body, tag::COMMAND_FIELD, self.command_field.code());
        if let Some(id) = self.message_id {
            put_us(&mut body, tag::MESSAGE_ID, id);
        }
        if let Some(id) = self.message_id_being_responded_to {
            put_us(&mut body, tag::MESSAGE_ID_BEING_RESPONDED_TO, id);
        }
        if let Some(dest) = &self.move_destination {
            put_text(&mut body, tag::MOVE_DESTINATION, dest, b' ');
        }
        if let Some(priority) = self.priority {
            put_us(&mut body, tag::PRIORITY, priority);
        }
        put_us(&mut body, tag::COMMAND_DATA_SET_TYPE, self.data_set_type);
        if let Some(status) = &self.status {
            put_us(&mut body, tag::STATUS, status.code);
            if !status.error_comment.is_empty() {
                put_text(&mut body, tag::ERROR_COMMENT, &status.error_comment, b' ');
            }
        }
        if let Some(uid) = &self.affected_sop_instance_uid {
            put_text(&mut body, tag::AFFECTED_SOP_INSTANCE_UID, uid, 0);
        }
        if let Some(ops) = &self.sub_operations {
            put_us(&mut body, tag::REMAINING_SUB_OPERATIONS, ops.remaining);
            put_us(&mut body, tag::COMPLETED_SUB_OPERATIONS, ops.completed);
            put_us(&mut body, tag::FAILED_SUB_OPERATIONS, ops.failed);
            put_us(&mut body, tag::WARNING_SUB_OPERATIONS, ops.warning);
        }
        if let Some(ae) = &self.move_originator_ae_title {
            put_text(&mut body, tag::MOVE_ORIGINATOR_AE_TITLE, ae, b' ');
        }
        if let Some(id) = self.move_originator_message_id {
            put_us(&mut body, tag::MOVE_ORIGINATOR_MESSAGE_ID, id);
        }

        let mut out = BytesMut::with_capacity(12 + body.len());
        put_header(&mut out, tag::GROUP_LENGTH, 4);
        out.put_u32_le(body.len() as u32);
        out.put_slice(&body);
        out.to_vec()
    }

    /// Decode a complete command set
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut command_field = None;
        let mut cmd = DimseCommand::bare(CommandField::Other(0), "");
        let mut status_code = None;
        let mut error_comment = String::new();
        let mut ops = SubOperations::default();
        let mut has_ops = false;

        while buf.has_remaining() {
            if buf.remaining() < 8 {
                return Err(DulError::InvalidCommand("truncated element header".into()));
            }
            let group = buf.get_u16_le();
            let element = buf.get_u16_le();
            let len = buf.get_u32_le() as usize;
            if group != 0x0000 {
                return Err(DulError::InvalidCommand(format!(
                    "element ({:04x},{:04x}) outside command group",
                    group, element
                )));
            }
            if buf.remaining() < len {
                return Err(DulError::InvalidCommand(format!(
                    "element (0000,{:04x}) length {} exceeds command set",
                    element, len
                )));
            }
            let (value, rest) = buf.split_at(len);
            buf = rest;

            match element {
                tag::AFFECTED_SOP_CLASS_UID => cmd.affected_sop_class_uid = get_text(value)?,
                tag::COMMAND_FIELD => command_field = Some(get_us(element, value)?),
                tag::MESSAGE_ID => cmd.message_id = Some(get_us(element, value)?),
                tag::MESSAGE_ID_BEING_RESPONDED_TO => {
                    cmd.message_id_being_responded_to = Some(get_us(element, value)?)
                }
                tag::MOVE_DESTINATION => cmd.move_destination = Some(get_text(value)?),
                tag::PRIORITY => cmd.priority = Some(get_us(element, value)?),
                tag::COMMAND_DATA_SET_TYPE => cmd.data_set_type = get_us(element, value)?,
                tag::STATUS => status_code = Some(get_us(element, value)?),
                tag::ERROR_COMMENT => error_comment = get_text(value)?,
                tag::AFFECTED_SOP_INSTANCE_UID => {
                    cmd.affected_sop_instance_uid = Some(get_text(value)?)
                }
                tag::REMAINING_SUB_OPERATIONS => {
                    ops.remaining = get_us(element, value)?;
                    has_ops = true;
                }
                tag::COMPLETED_SUB_OPERATIONS => {
                    ops.completed = get_us(element, value)?;
                    has_ops = true;
                }
                tag::FAILED_SUB_OPERATIONS => {
                    ops.failed = get_us(element, value)?;
                    has_ops = true;
                }
                tag::WARNING_SUB_OPERATIONS => {
                    ops.warning = get_us(element, value)?;
                    has_ops = true;
                }
                tag::MOVE_ORIGINATOR_AE_TITLE => {
                    cmd.move_originator_ae_title = Some(get_text(value)?)
                }
                tag::MOVE_ORIGINATOR_MESSAGE_ID => {
                    cmd.move_originator_message_id = Some(get_us(element, value)?)
                }
                _ => {}
            }
        }

        let code = command_field
            .ok_or_else(|| DulError::InvalidCommand("missing CommandField".into()))?;
        cmd.command_field = CommandField::from_code(code);
        cmd.status = status_code.map(|code| Status::new(code, error_comment));
        if has_ops {
            cmd.sub_operations = Some(ops);
        }
        Ok(cmd)
    }
}

impl fmt::Display for DimseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.command_field)?;
        if let Some(id) = self.message_id {
            write!(f, "id: {}, ", id)?;
        }
        if let Some(id) = self.message_id_being_responded_to {
            write!(f, "responding to: {}, ", id)?;
        }
        if let Some(status) = &self.status {
            write!(f, "status: {:#06x}, ", status.code)?;
        }
        write!(
            f,
            "class: {}, data: {}}}",
            self.affected_sop_class_uid,
            self.has_data()
        )
    }
}

fn put_header(buf: &mut BytesMut, element: u16, len: u32) {
    buf.put_u16_le(0x0000);
    buf.put_u16_le(element);
    buf.put_u32_le(len);
}

fn put_us(buf: &mut BytesMut, element: u16, value: u16) {
    put_header(buf, element, 2);
    buf.put_u16_le(value);
}

fn put_text(buf: &mut BytesMut, element: u16, value: &str, pad: u8) {
    let bytes = value.as_bytes();
    let padded_len = bytes.len() + bytes.len() % 2;
    put_header(buf, element, padded_len as u32);
    buf.put_slice(bytes);
    if padded_len > bytes.len() {
        buf.put_u8(pad);
    }
}

fn get_us(element: u16, value: &[u8]) -> Result<u16> {
    if value.len() != 2 {
        return Err(DulError::InvalidCommand(format!(
            "element (0000,{:04x}) has length {}, expected 2",
            element,
            value.len()
        )));
    }
    Ok(u16::from_le_bytes([value[0], value[1]]))
}

fn get_text(value: &[u8]) -> Result<String> {
    let text = String::from_utf8(value.to_vec())?;
    Ok(text.trim_end_matches(['\0', ' ']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_rq_encoding() {
        let bytes = DimseCommand::c_echo_rq(7).encode();
        // group length element first
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 4, 0, 0, 0]);
        let group_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        assert_eq!(group_len, bytes.len() - 12);

        let decoded = DimseCommand::decode(&bytes).unwrap();
        assert_eq!(decoded.command_field, CommandField::CEchoRq);
        assert_eq!(decoded.message_id, Some(7));
        assert_eq!(decoded.affected_sop_class_uid, "1.2.840.10008.1.1");
        assert!(!decoded.has_data());
    }

    #[test]
    fn test_odd_uid_padded_with_nul() {
        let cmd = DimseCommand::c_store_rq(1, "1.2.3", "1.2.3.4.5");
        let bytes = cmd.encode();
        // (0000,0002) length 6 = "1.2.3\0"
        let pos = 12;
        assert_eq!(&bytes[pos..pos + 8], &[0, 0, 2, 0, 6, 0, 0, 0]);
        assert_eq!(&bytes[pos + 8..pos + 14], b"1.2.3\0");
        assert_eq!(DimseCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_response_routing() {
        let rq = DimseCommand::c_get_rq(42, "1.2.840.10008.5.1.4.1.2.2.3");
        let rsp = DimseCommand::response_to(&rq, Status::pending()).with_sub_operations(
            SubOperations {
                remaining: 2,
                completed: 1,
                failed: 0,
                warning: 0,
            },
        );
        assert_eq!(rsp.command_field, CommandField::CGetRsp);
        assert_eq!(rsp.routing_id(), 42);
        assert_eq!(rq.routing_id(), 42);

        let decoded = DimseCommand::decode(&rsp.encode()).unwrap();
        assert_eq!(decoded.sub_operations.unwrap().remaining, 2);
        assert!(decoded.status.unwrap().is_pending());
    }

    #[test]
    fn test_unknown_command_field_preserved() {
        let mut cmd = DimseCommand::c_echo_rq(1);
        cmd.command_field = CommandField::Other(0x0130);
        let decoded = DimseCommand::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded.command_field, CommandField::Other(0x0130));
        assert_eq!(decoded.command_field.response(), CommandField::Other(0x8130));
    }

    #[test]
    fn test_missing_command_field() {
        let mut buf = BytesMut::new();
        put_us(&mut buf, tag::MESSAGE_ID, 1);
        assert!(matches!(
            DimseCommand::decode(&buf),
            Err(DulError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_status_classes() {
        assert!(Status::new(status::UNRECOGNIZED_OPERATION, "").is_failure());
        assert!(Status::new(0xB000, "").is_warning());
        assert!(!Status::pending().is_failure());
    }
}
