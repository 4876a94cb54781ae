//! Server configuration.
//!
//! Surfaces the provisioning inputs of the secure layer: the device
//! authentication key, per-user password hashes, the auth-enforcement
//! switch, and an optional serial-number override. Keys are hex strings in
//! the configuration file and default to all-zero keys when absent.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use knxip_secure::SessionStoreConfig;
use knxip_types::{Error, Result};

fn default_receive_buffer() -> usize {
    512
}

fn is_default_receive_buffer(v: &usize) -> bool {
    *v == default_receive_buffer()
}

/// Configuration of one KNXnet/IP server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Device authentication key as 32 hex digits. Empty means all-zero.
    #[serde(rename = "DeviceAuthKey", default)]
    pub device_auth_key: String,

    /// Password hash per user id (1 = management), 32 hex digits each.
    #[serde(rename = "UserPasswordHashes", default)]
    pub user_password_hashes: HashMap<u8, String>,

    /// Reject sessions whose authentication MAC does not verify.
    #[serde(rename = "EnforceSessionAuth", default)]
    pub enforce_session_auth: bool,

    /// Serial number override as 12 hex digits; otherwise derived from the
    /// NIC hardware address.
    #[serde(
        rename = "SerialNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub serial_number: Option<String>,

    /// Network interface whose hardware address seeds the serial number.
    #[serde(
        rename = "Interface",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub interface: String,

    /// Datagram receive buffer size.
    #[serde(
        rename = "ReceiveBufferSize",
        default = "default_receive_buffer",
        skip_serializing_if = "is_default_receive_buffer"
    )]
    pub receive_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_auth_key: String::new(),
            user_password_hashes: HashMap::new(),
            enforce_session_auth: false,
            serial_number: None,
            interface: String::new(),
            receive_buffer_size: default_receive_buffer(),
        }
    }
}

impl ServerConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::Other(format!("parsing config: {e}")))
    }

    /// Resolve the secure-layer configuration, decoding the hex keys and
    /// deriving the serial number.
    pub fn session_store_config(&self) -> Result<SessionStoreConfig> {
        let device_auth_key = parse_key::<16>("DeviceAuthKey", &self.device_auth_key)?;
        let mut user_password_hashes = HashMap::new();
        for (&user, hash) in &self.user_password_hashes {
            user_password_hashes.insert(user, parse_key::<16>("UserPasswordHashes", hash)?);
        }
        let serial_number = match &self.serial_number {
            Some(serial) => parse_key::<6>("SerialNumber", serial)?,
            None => crate::serial::derive_serial_number(&self.interface),
        };
        Ok(SessionStoreConfig {
            device_auth_key,
            user_password_hashes,
            enforce_session_auth: self.enforce_session_auth,
            serial_number,
        })
    }
}

fn parse_key<const N: usize>(field: &str, hex_str: &str) -> Result<[u8; N]> {
    if hex_str.is_empty() {
        return Ok([0u8; N]);
    }
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::Other(format!("{field}: invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Other(format!("{field}: expected {N} bytes")))
}
