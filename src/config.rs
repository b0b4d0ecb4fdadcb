//! Provider and service-user configuration
//!
//! Both structures deserialize from TOML with every field optional:
//!
//! ```toml
//! listen_address = "0.0.0.0:11112"
//! ae_title = "PACS"
//! enforce_ae_title = true
//!
//! [remote_aes]
//! WORKSTATION = "10.0.0.7:104"
//!
//! [tls]
//! cert_path = "/etc/dicompot/cert.pem"
//! key_path = "/etc/dicompot/key.pem"
//! ```

use crate::error::{DulError, Result};
use crate::io::assembler::PDV_OVERHEAD;
use crate::io::state_machine::{AssociationSettings, DEFAULT_CHANNEL_CAPACITY};
use crate::io::timer::DEFAULT_ARTIM_TIMEOUT;
use crate::protocol::pdu::DEFAULT_MAX_PDU_SIZE;
use crate::protocol::uid;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Longest AE title the A-ASSOCIATE PDUs can carry
pub const MAX_AE_TITLE_LEN: usize = 16;

pub const DEFAULT_AE_TITLE: &str = "radiant";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:11112";

fn validate_ae_title(field: &str, ae_title: &str) -> Result<()> {
    let trimmed = ae_title.trim();
    if trimmed.is_empty() {
        return Err(DulError::Config(format!("{} must not be empty", field)));
    }
    if trimmed.len() > MAX_AE_TITLE_LEN {
        return Err(DulError::Config(format!(
            "{} '{}' is longer than {} bytes",
            field, trimmed, MAX_AE_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_common(max_pdu_size: u32, channel_capacity: usize) -> Result<()> {
    if max_pdu_size as usize <= PDV_OVERHEAD {
        return Err(DulError::Config(format!(
            "max_pdu_size {} leaves no room for data",
            max_pdu_size
        )));
    }
    if channel_capacity == 0 {
        return Err(DulError::Config("channel_capacity must be positive".into()));
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| DulError::Config(format!("cannot read {}: {}", path.display(), e)))
}

/// Provider-side TLS identity
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerTlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub listen_address: String,
    pub ae_title: String,
    /// Reject associations whose called AE title is not `ae_title`
    pub enforce_ae_title: bool,
    pub max_pdu_size: u32,
    pub artim_timeout_ms: u64,
    pub reject_delay_ms: u64,
    pub channel_capacity: usize,
    /// Abstract syntaxes to accept; empty accepts any
    pub accepted_abstract_syntaxes: Vec<String>,
    /// Transfer syntaxes to accept; empty accepts the first offered
    pub accepted_transfer_syntaxes: Vec<String>,
    /// AE title to `host:port`, used to resolve C-MOVE destinations
    pub remote_aes: HashMap<String, String>,
    pub tls: Option<ServerTlsConfig>,
    /// First connection number handed out
    pub connection_id_seed: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            ae_title: DEFAULT_AE_TITLE.to_string(),
            enforce_ae_title: false,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            artim_timeout_ms: DEFAULT_ARTIM_TIMEOUT.as_millis() as u64,
            reject_delay_ms: 5000,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            accepted_abstract_syntaxes: Vec::new(),
            accepted_transfer_syntaxes: Vec::new(),
            remote_aes: HashMap::new(),
            tls: None,
            connection_id_seed: 1,
        }
    }
}

impl ProviderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ProviderConfig =
            toml::from_str(text).map_err(|e| DulError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_ae_title("ae_title", &self.ae_title)?;
        validate_common(self.max_pdu_size, self.channel_capacity)?;
        if self.listen_address.trim().is_empty() {
            return Err(DulError::Config("listen_address must not be empty".into()));
        }
        for (ae, address) in &self.remote_aes {
            validate_ae_title("remote AE title", ae)?;
            if address.trim().is_empty() {
                return Err(DulError::Config(format!("remote AE {} has no address", ae)));
            }
        }
        Ok(())
    }

    /// Acceptor settings for one association
    pub fn association_settings(&self) -> AssociationSettings {
        AssociationSettings {
            ae_title: self.ae_title.clone(),
            enforce_ae_title: self.enforce_ae_title,
            reject_delay: Duration::from_millis(self.reject_delay_ms),
            artim_timeout: Duration::from_millis(self.artim_timeout_ms),
            max_pdu_size: self.max_pdu_size,
            channel_capacity: self.channel_capacity,
            abstract_syntaxes: self.accepted_abstract_syntaxes.clone(),
            transfer_syntaxes: self.accepted_transfer_syntaxes.clone(),
        }
    }
}

/// Service-user TLS options
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientTlsConfig {
    /// Name to verify the server certificate against; defaults to the host
    /// part of `remote_address`
    #[serde(default)]
    pub server_name: Option<String>,
    /// Skip certificate verification
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub remote_address: String,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    pub abstract_syntaxes: Vec<String>,
    pub transfer_syntaxes: Vec<String>,
    pub max_pdu_size: u32,
    pub artim_timeout_ms: u64,
    pub channel_capacity: usize,
    pub tls: Option<ClientTlsConfig>,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            remote_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            calling_ae_title: DEFAULT_AE_TITLE.to_string(),
            abstract_syntaxes: uid::default_abstract_syntaxes(),
            transfer_syntaxes: uid::default_transfer_syntaxes(),
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            artim_timeout_ms: DEFAULT_ARTIM_TIMEOUT.as_millis() as u64,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tls: None,
        }
    }
}

impl UserConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: UserConfig =
            toml::from_str(text).map_err(|e| DulError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_ae_title("called_ae_title", &self.called_ae_title)?;
        validate_ae_title("calling_ae_title", &self.calling_ae_title)?;
        validate_common(self.max_pdu_size, self.channel_capacity)?;
        if self.abstract_syntaxes.is_empty() {
            return Err(DulError::Config("no abstract syntax to propose".into()));
        }
        if self.transfer_syntaxes.is_empty() {
            return Err(DulError::Config("no transfer syntax to propose".into()));
        }
        Ok(())
    }

    /// Requestor settings; `ae_title` is the calling AE
    pub fn association_settings(&self) -> AssociationSettings {
        AssociationSettings {
            ae_title: self.calling_ae_title.clone(),
            artim_timeout: Duration::from_millis(self.artim_timeout_ms),
            max_pdu_size: self.max_pdu_size,
            channel_capacity: self.channel_capacity,
            abstract_syntaxes: self.abstract_syntaxes.clone(),
            transfer_syntaxes: self.transfer_syntaxes.clone(),
            ..AssociationSettings::default()
        }
    }

    /// Host part of `remote_address`
    pub fn remote_host(&self) -> &str {
        match self.remote_address.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => &self.remote_address,
        }
    }
}
