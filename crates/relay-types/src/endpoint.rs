//! Stored endpoint records (server credentials).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Ftp,
    Sftp,
    /// SMB-style share reachable through the local filesystem
    NetworkShare,
}

impl TransportKind {
    /// Port used when a record does not specify one.
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Ftp => 21,
            TransportKind::Sftp => 22,
            TransportKind::NetworkShare => 445,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ftp => write!(f, "FTP"),
            TransportKind::Sftp => write!(f, "SFTP"),
            TransportKind::NetworkShare => write!(f, "NETWORK"),
        }
    }
}

/// Declared protocol string that names no known transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTransport(pub String);

impl std::fmt::Display for UnknownTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown transport '{}'", self.0)
    }
}

impl std::error::Error for UnknownTransport {}

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FTP" => Ok(TransportKind::Ftp),
            "SFTP" => Ok(TransportKind::Sftp),
            "NETWORK" | "SMB" | "NETWORK_SHARE" => Ok(TransportKind::NetworkShare),
            _ => Err(UnknownTransport(s.to_string())),
        }
    }
}

/// Connection details for one remote server.
///
/// `protocol` keeps the declared string as stored; it is parsed into a
/// [`TransportKind`] once, when an endpoint is built from the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Unique identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Declared transport, e.g. "FTP", "SFTP" or "NETWORK"
    pub protocol: String,

    /// Hostname, or share root for network shares
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    /// Stored secret, possibly encrypted
    #[serde(default)]
    pub secret: Option<String>,

    /// Private key used for SFTP public key authentication
    #[serde(default)]
    pub private_key_path: Option<String>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl EndpointRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        protocol: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            protocol: protocol.into(),
            host: host.into(),
            port: None,
            username: None,
            secret: None,
            private_key_path: None,
            is_active: true,
        }
    }

    /// Set username and stored secret
    pub fn with_login(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_private_key(mut self, path: impl Into<String>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Parse the declared protocol.
    pub fn transport(&self) -> Result<TransportKind, UnknownTransport> {
        self.protocol.parse()
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parsing_is_case_insensitive() {
        assert_eq!("ftp".parse::<TransportKind>().unwrap(), TransportKind::Ftp);
        assert_eq!(" Sftp ".parse::<TransportKind>().unwrap(), TransportKind::Sftp);
        assert_eq!(
            "NETWORK".parse::<TransportKind>().unwrap(),
            TransportKind::NetworkShare
        );
        assert_eq!("smb".parse::<TransportKind>().unwrap(), TransportKind::NetworkShare);
    }

    #[test]
    fn test_unknown_transport() {
        let record = EndpointRecord::new("e1", "Web", "HTTP", "example.com");
        let err = record.transport().unwrap_err();
        assert_eq!(err, UnknownTransport("HTTP".to_string()));
        assert_eq!(err.to_string(), "unknown transport 'HTTP'");
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(TransportKind::Ftp.default_port(), 21);
        assert_eq!(TransportKind::Sftp.default_port(), 22);
    }

    #[test]
    fn test_record_roundtrip() {
        let record = EndpointRecord::new("e1", "Box", "SFTP", "sftp.example.com")
            .with_port(2222)
            .with_login("deploy", "s3cret")
            .with_private_key("/keys/id_ed25519");
        let decoded = EndpointRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(record, decoded);
    }
}
