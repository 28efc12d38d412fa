//! Managed device model shared by the dispatch engine and its callers.
//!
//! A `Target` is owned by the roster; the engine only borrows a slice of
//! them for the duration of one batch and never writes back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use time::OffsetDateTime;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_USERNAME: &str = "admin";

/// Last state known by the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetState {
    Online,
    Offline,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            username: if username.trim().is_empty() { DEFAULT_USERNAME.to_string() } else { username },
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.password.is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME, "")
    }
}

/// One managed device: identity, credentials and last-known attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub firmware_version: String,
    /// Per-field API path columns (`status/wan/primary_device` -> last polled value)
    #[serde(default)]
    pub api_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub state: TargetState,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl Target {
    pub fn new(address: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            address: address.into().trim().to_string(),
            port,
            credentials,
            hostname: String::new(),
            mac: String::new(),
            serial_number: String::new(),
            product_name: String::new(),
            firmware_version: String::new(),
            api_paths: BTreeMap::new(),
            state: TargetState::Unknown,
            created_at: None,
        }
    }

    /// Address without any `:port` suffix the operator may have typed in.
    /// Bare and bracketed IPv6 literals keep every colon of the address.
    pub fn host(&self) -> &str {
        let addr = self.address.as_str();
        if addr.parse::<IpAddr>().is_ok() {
            return addr;
        }
        if let Some((host, _)) = addr.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
            return host;
        }
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
            _ => addr,
        }
    }

    /// `host:port` to connect to; a port typed into the address wins over `port`.
    pub fn authority(&self) -> String {
        let host = self.host();
        if host != self.address {
            return self.address.clone();
        }
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => SocketAddr::from((v6, self.port)).to_string(),
            _ => format!("{}:{}", host, self.port),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}
