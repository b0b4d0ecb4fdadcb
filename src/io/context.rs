//! Presentation context negotiation
//!
//! A [`ContextManager`] is owned by one association. The requestor side
//! builds the proposal and resolves the peer's answer; the acceptor side
//! answers a proposal. Afterwards both sides look contexts up by id (for
//! inbound P-DATA) or by abstract syntax (for outbound messages).
//!
//! The acceptor picks the first transfer syntax the requestor offered that
//! it is willing to use. With no acceptance lists configured that is simply
//! the first one offered.

use crate::error::{DulError, Result};
use crate::protocol::pdu::{PresentationContextItem, SubItem, DEFAULT_PEER_MAX_PDU_SIZE};
use crate::protocol::uid;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Result/reason of one presentation context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextResult {
    Accepted,
    UserRejection,
    NoReason,
    AbstractSyntaxNotSupported,
    TransferSyntaxesNotSupported,
}

impl ContextResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ContextResult::Accepted,
            1 => ContextResult::UserRejection,
            3 => ContextResult::AbstractSyntaxNotSupported,
            4 => ContextResult::TransferSyntaxesNotSupported,
            _ => ContextResult::NoReason,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ContextResult::Accepted => 0,
            ContextResult::UserRejection => 1,
            ContextResult::NoReason => 2,
            ContextResult::AbstractSyntaxNotSupported => 3,
            ContextResult::TransferSyntaxesNotSupported => 4,
        }
    }
}

impl fmt::Display for ContextResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ContextResult::Accepted => "accepted",
            ContextResult::UserRejection => "user rejection",
            ContextResult::NoReason => "no reason",
            ContextResult::AbstractSyntaxNotSupported => "abstract syntax not supported",
            ContextResult::TransferSyntaxesNotSupported => "transfer syntaxes not supported",
        };
        f.write_str(text)
    }
}

/// One negotiated presentation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub context_id: u8,
    pub abstract_syntax_uid: String,
    pub transfer_syntax_uid: String,
    pub result: ContextResult,
}

impl ContextEntry {
    pub fn is_accepted(&self) -> bool {
        self.result == ContextResult::Accepted
    }

    fn ensure_accepted(&self) -> Result<()> {
        if self.result != ContextResult::Accepted {
            return Err(DulError::ContextRejected {
                context_id: self.context_id,
                abstract_syntax: self.abstract_syntax_uid.clone(),
                reason: self.result.to_string(),
            });
        }
        Ok(())
    }
}

/// Negotiated presentation contexts and peer parameters of one association
#[derive(Debug, Clone)]
pub struct ContextManager {
    label: String,
    by_context_id: BTreeMap<u8, ContextEntry>,
    by_abstract_syntax: HashMap<String, ContextEntry>,
    peer_max_pdu_size: u32,
    peer_implementation_class_uid: String,
    peer_implementation_version_name: String,
    /// Proposed contexts awaiting the peer's answer (requestor only)
    pending_requests: HashMap<u8, String>,
    accepted_abstract_syntaxes: Vec<String>,
    accepted_transfer_syntaxes: Vec<String>,
}

impl ContextManager {
    pub fn new(label: impl Into<String>) -> Self {
        ContextManager {
            label: label.into(),
            by_context_id: BTreeMap::new(),
            by_abstract_syntax: HashMap::new(),
            peer_max_pdu_size: DEFAULT_PEER_MAX_PDU_SIZE,
            peer_implementation_class_uid: String::new(),
            peer_implementation_version_name: String::new(),
            pending_requests: HashMap::new(),
            accepted_abstract_syntaxes: Vec::new(),
            accepted_transfer_syntaxes: Vec::new(),
        }
    }

    /// Restrict what [`accept_proposal`](Self::accept_proposal) agrees to
    ///
    /// An empty list accepts anything the peer offers.
    pub fn with_acceptance(
        mut self,
        abstract_syntaxes: Vec<String>,
        transfer_syntaxes: Vec<String>,
    ) -> Self {
        self.accepted_abstract_syntaxes = abstract_syntaxes;
        self.accepted_transfer_syntaxes = transfer_syntaxes;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Maximum PDU length the peer is willing to receive
    pub fn peer_max_pdu_size(&self) -> u32 {
        self.peer_max_pdu_size
    }

    pub fn peer_implementation_class_uid(&self) -> &str {
        &self.peer_implementation_class_uid
    }

    pub fn peer_implementation_version_name(&self) -> &str {
        &self.peer_implementation_version_name
    }

    /// All recorded contexts in id order
    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.by_context_id.values()
    }

    /// Build the items of an A-ASSOCIATE-RQ
    ///
    /// Every transfer syntax is offered under every abstract syntax. Context
    /// ids are assigned 1, 3, 5, ...
    pub fn build_proposal(
        &mut self,
        abstract_syntaxes: &[String],
        transfer_syntaxes: &[String],
        max_pdu_size: u32,
    ) -> Result<Vec<SubItem>> {
        if abstract_syntaxes.is_empty() || transfer_syntaxes.is_empty() {
            return Err(DulError::Negotiation(
                "proposal needs at least one abstract and one transfer syntax".into(),
            ));
        }
        if abstract_syntaxes.len() > 128 {
            return Err(DulError::Negotiation(format!(
                "{} abstract syntaxes exceed the 128 available context ids",
                abstract_syntaxes.len()
            )));
        }

        let mut items = vec![SubItem::ApplicationContext(uid::APPLICATION_CONTEXT.to_string())];
        self.pending_requests.clear();
        for (index, abstract_syntax) in abstract_syntaxes.iter().enumerate() {
            let context_id = (index * 2 + 1) as u8;
            let mut sub_items = vec![SubItem::AbstractSyntax(abstract_syntax.clone())];
            sub_items.extend(transfer_syntaxes.iter().cloned().map(SubItem::TransferSyntax));
            items.push(SubItem::PresentationContextRq(PresentationContextItem {
                context_id,
                result: 0,
                items: sub_items,
            }));
            self.pending_requests
                .insert(context_id, abstract_syntax.clone());
        }
        items.push(user_information(max_pdu_size));
        Ok(items)
    }

    /// Answer the items of an A-ASSOCIATE-RQ
    ///
    /// Returns the items of the A-ASSOCIATE-AC. Fails on malformed
    /// proposals, which the caller turns into an association reject.
    pub fn accept_proposal(
        &mut self,
        items: &[SubItem],
        max_pdu_size: u32,
    ) -> Result<Vec<SubItem>> {
        let mut response = vec![SubItem::ApplicationContext(uid::APPLICATION_CONTEXT.to_string())];

        for item in items {
            match item {
                SubItem::ApplicationContext(name) => {
                    if name != uid::APPLICATION_CONTEXT {
                        warn!(id = %self.label, context = %name, "Unexpected application context");
                    }
                }
                SubItem::PresentationContextRq(pc) => {
                    let entry = self.answer_context(pc)?;
                    response.push(SubItem::PresentationContextAc(PresentationContextItem {
                        context_id: entry.context_id,
                        result: entry.result.code(),
                        items: vec![SubItem::TransferSyntax(entry.transfer_syntax_uid.clone())],
                    }));
                    self.add_mapping(entry)?;
                }
                SubItem::UserInformation(user_items) => self.record_peer_info(user_items),
                other => {
                    debug!(id = %self.label, item_type = other.item_type(), "Ignoring item in association request")
                }
            }
        }

        response.push(user_information(max_pdu_size));
        Ok(response)
    }

    fn answer_context(&self, pc: &PresentationContextItem) -> Result<ContextEntry> {
        if pc.context_id % 2 == 0 {
            return Err(DulError::Negotiation(format!(
                "presentation context id {} is not odd",
                pc.context_id
            )));
        }
        if self.by_context_id.contains_key(&pc.context_id) {
            return Err(DulError::Negotiation(format!(
                "duplicate presentation context id {}",
                pc.context_id
            )));
        }

        let mut abstract_syntaxes = Vec::new();
        let mut transfer_syntaxes = Vec::new();
        for sub in &pc.items {
            match sub {
                SubItem::AbstractSyntax(uid) => abstract_syntaxes.push(uid.clone()),
                SubItem::TransferSyntax(uid) => transfer_syntaxes.push(uid.clone()),
                _ => {}
            }
        }
        if abstract_syntaxes.len() != 1 {
            return Err(DulError::Negotiation(format!(
                "presentation context {} has {} abstract syntaxes, expected exactly 1",
                pc.context_id,
                abstract_syntaxes.len()
            )));
        }
        if transfer_syntaxes.is_empty() {
            return Err(DulError::Negotiation(format!(
                "presentation context {} offers no transfer syntax",
                pc.context_id
            )));
        }

        let abstract_syntax_uid = abstract_syntaxes.remove(0);
        let mut entry = ContextEntry {
            context_id: pc.context_id,
            abstract_syntax_uid,
            transfer_syntax_uid: transfer_syntaxes[0].clone(),
            result: ContextResult::Accepted,
        };

        if !self.accepted_abstract_syntaxes.is_empty()
            && !self.accepted_abstract_syntaxes.contains(&entry.abstract_syntax_uid)
        {
            entry.result = ContextResult::AbstractSyntaxNotSupported;
        } else if !self.accepted_transfer_syntaxes.is_empty() {
            match transfer_syntaxes
                .iter()
                .find(|ts| self.accepted_transfer_syntaxes.contains(ts))
            {
                Some(ts) => entry.transfer_syntax_uid = ts.clone(),
                None => entry.result = ContextResult::TransferSyntaxesNotSupported,
            }
        }

        debug!(
            id = %self.label,
            context_id = entry.context_id,
            abstract_syntax = %entry.abstract_syntax_uid,
            transfer_syntax = %entry.transfer_syntax_uid,
            result = %entry.result,
            "Answered presentation context"
        );
        Ok(entry)
    }

    /// Record the items of an A-ASSOCIATE-AC against the pending proposal
    pub fn resolve_response(&mut self, items: &[SubItem]) -> Result<()> {
        for item in items {
            match item {
                SubItem::PresentationContextAc(pc) => {
                    let abstract_syntax_uid =
                        self.pending_requests.get(&pc.context_id).cloned().ok_or_else(|| {
                            DulError::Negotiation(format!(
                                "response references unknown presentation context {}",
                                pc.context_id
                            ))
                        })?;
                    let transfer_syntaxes: Vec<&String> = pc
                        .items
                        .iter()
                        .filter_map(|sub| match sub {
                            SubItem::TransferSyntax(uid) => Some(uid),
                            _ => None,
                        })
                        .collect();
                    if transfer_syntaxes.len() > 1 {
                        return Err(DulError::Negotiation(format!(
                            "presentation context {} answered with {} transfer syntaxes",
                            pc.context_id,
                            transfer_syntaxes.len()
                        )));
                    }
                    let result = ContextResult::from_code(pc.result);
                    let transfer_syntax_uid = match transfer_syntaxes.first() {
                        Some(uid) => (*uid).clone(),
                        None if result == ContextResult::Accepted => {
                            return Err(DulError::Negotiation(format!(
                                "accepted presentation context {} carries no transfer syntax",
                                pc.context_id
                            )))
                        }
                        None => String::new(),
                    };
                    self.add_mapping(ContextEntry {
                        context_id: pc.context_id,
                        abstract_syntax_uid,
                        transfer_syntax_uid,
                        result,
                    })?;
                }
                SubItem::UserInformation(user_items) => self.record_peer_info(user_items),
                _ => {}
            }
        }
        self.pending_requests.clear();
        Ok(())
    }

    fn record_peer_info(&mut self, items: &[SubItem]) {
        for item in items {
            match item {
                SubItem::MaximumLength(len) => self.peer_max_pdu_size = *len,
                SubItem::ImplementationClassUid(uid) => {
                    self.peer_implementation_class_uid = uid.clone()
                }
                SubItem::ImplementationVersionName(name) => {
                    self.peer_implementation_version_name = name.clone()
                }
                _ => {}
            }
        }
    }

    fn add_mapping(&mut self, entry: ContextEntry) -> Result<()> {
        if entry.result == ContextResult::Accepted
            && (entry.abstract_syntax_uid.is_empty() || entry.transfer_syntax_uid.is_empty())
        {
            return Err(DulError::Negotiation(format!(
                "accepted presentation context {} has an empty syntax",
                entry.context_id
            )));
        }
        let replace = self
            .by_abstract_syntax
            .get(&entry.abstract_syntax_uid)
            .map_or(true, |existing| existing.result != ContextResult::Accepted);
        if replace {
            self.by_abstract_syntax
                .insert(entry.abstract_syntax_uid.clone(), entry.clone());
        }
        self.by_context_id.insert(entry.context_id, entry);
        Ok(())
    }

    /// Accepted context for an abstract syntax
    pub fn lookup_by_abstract_syntax(&self, abstract_syntax_uid: &str) -> Result<&ContextEntry> {
        let entry = self
            .by_abstract_syntax
            .get(abstract_syntax_uid)
            .ok_or_else(|| DulError::UnknownAbstractSyntax(abstract_syntax_uid.to_string()))?;
        entry.ensure_accepted()?;
        Ok(entry)
    }

    /// Accepted context for a context id
    pub fn lookup_by_context_id(&self, context_id: u8) -> Result<&ContextEntry> {
        let entry = self
            .by_context_id
            .get(&context_id)
            .ok_or(DulError::UnknownContextId(context_id))?;
        entry.ensure_accepted()?;
        Ok(entry)
    }
}

fn user_information(max_pdu_size: u32) -> SubItem {
    SubItem::UserInformation(vec![
        SubItem::MaximumLength(max_pdu_size),
        SubItem::ImplementationClassUid(uid::IMPLEMENTATION_CLASS_UID.to_string()),
        SubItem::ImplementationVersionName(uid::IMPLEMENTATION_VERSION_NAME.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn negotiate(
        acceptor: &mut ContextManager,
        abstract_syntaxes: &[&str],
        transfer_syntaxes: &[&str],
    ) -> ContextManager {
        let mut requestor = ContextManager::new("user");
        let proposal = requestor
            .build_proposal(
                &strings(abstract_syntaxes),
                &strings(transfer_syntaxes),
                16384,
            )
            .unwrap();
        let response = acceptor.accept_proposal(&proposal, 32768).unwrap();
        requestor.resolve_response(&response).unwrap();
        requestor
    }

    #[test]
    fn test_first_offered_transfer_syntax_wins() {
        let mut acceptor = ContextManager::new("provider");
        let requestor = negotiate(&mut acceptor, &["1.1", "1.2"], &["T1", "T2"]);

        for side in [&acceptor, &requestor] {
            let x = side.lookup_by_context_id(1).unwrap();
            assert_eq!(x.abstract_syntax_uid, "1.1");
            assert_eq!(x.transfer_syntax_uid, "T1");
            let y = side.lookup_by_context_id(3).unwrap();
            assert_eq!(y.abstract_syntax_uid, "1.2");
            assert_eq!(y.transfer_syntax_uid, "T1");
            assert_eq!(side.lookup_by_abstract_syntax("1.2").unwrap(), y);
        }
        assert_eq!(requestor.peer_max_pdu_size(), 32768);
        assert_eq!(acceptor.peer_max_pdu_size(), 16384);
        assert_eq!(
            acceptor.peer_implementation_class_uid(),
            uid::IMPLEMENTATION_CLASS_UID
        );
    }

    #[test]
    fn test_context_ids_odd_and_unique() {
        let mut cm = ContextManager::new("user");
        let names: Vec<String> = (0..10).map(|i| format!("1.2.{}", i)).collect();
        let items = cm.build_proposal(&names, &strings(&["T1"]), 16384).unwrap();
        let ids: Vec<u8> = items
            .iter()
            .filter_map(|item| match item {
                SubItem::PresentationContextRq(pc) => Some(pc.context_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);
    }

    #[test]
    fn test_multiple_abstract_syntaxes_rejected() {
        let mut cm = ContextManager::new("provider");
        let items = vec![SubItem::PresentationContextRq(PresentationContextItem {
            context_id: 1,
            result: 0,
            items: vec![
                SubItem::AbstractSyntax("1.1".into()),
                SubItem::AbstractSyntax("1.2".into()),
                SubItem::TransferSyntax("T1".into()),
            ],
        })];
        assert!(matches!(
            cm.accept_proposal(&items, 16384),
            Err(DulError::Negotiation(_))
        ));
    }

    #[test]
    fn test_even_context_id_rejected() {
        let mut cm = ContextManager::new("provider");
        let items = vec![SubItem::PresentationContextRq(PresentationContextItem {
            context_id: 2,
            result: 0,
            items: vec![
                SubItem::AbstractSyntax("1.1".into()),
                SubItem::TransferSyntax("T1".into()),
            ],
        })];
        assert!(cm.accept_proposal(&items, 16384).is_err());
    }

    #[test]
    fn test_response_for_unknown_context() {
        let mut cm = ContextManager::new("user");
        cm.build_proposal(&strings(&["1.1"]), &strings(&["T1"]), 16384)
            .unwrap();
        let response = vec![SubItem::PresentationContextAc(PresentationContextItem {
            context_id: 5,
            result: 0,
            items: vec![SubItem::TransferSyntax("T1".into())],
        })];
        assert!(matches!(
            cm.resolve_response(&response),
            Err(DulError::Negotiation(_))
        ));
    }

    #[test]
    fn test_response_with_two_transfer_syntaxes() {
        let mut cm = ContextManager::new("user");
        cm.build_proposal(&strings(&["1.1"]), &strings(&["T1", "T2"]), 16384)
            .unwrap();
        let response = vec![SubItem::PresentationContextAc(PresentationContextItem {
            context_id: 1,
            result: 0,
            items: vec![
                SubItem::TransferSyntax("T1".into()),
                SubItem::TransferSyntax("T2".into()),
            ],
        })];
        assert!(cm.resolve_response(&response).is_err());
    }

    #[test]
    fn test_acceptance_lists() {
        let mut acceptor = ContextManager::new("provider")
            .with_acceptance(strings(&["1.1", "1.2"]), strings(&["T2"]));
        let requestor = negotiate(&mut acceptor, &["1.1", "1.3"], &["T1", "T2"]);

        let accepted = requestor.lookup_by_abstract_syntax("1.1").unwrap();
        assert_eq!(accepted.transfer_syntax_uid, "T2");

        match requestor.lookup_by_abstract_syntax("1.3") {
            Err(DulError::ContextRejected { context_id, .. }) => assert_eq!(context_id, 3),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_no_common_transfer_syntax() {
        let mut acceptor =
            ContextManager::new("provider").with_acceptance(Vec::new(), strings(&["T9"]));
        let requestor = negotiate(&mut acceptor, &["1.1"], &["T1"]);
        assert!(requestor.lookup_by_context_id(1).is_err());
        assert_eq!(
            requestor.entries().next().unwrap().result,
            ContextResult::TransferSyntaxesNotSupported
        );
    }
}
