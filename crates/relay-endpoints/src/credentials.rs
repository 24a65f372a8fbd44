//! Runtime credentials built from stored endpoint records.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use relay_types::{EndpointRecord, TransportKind};

use crate::error::EndpointError;

/// Turns the stored form of a secret into a usable one.
///
/// Encryption at rest is owned by whoever writes the records; this trait is
/// the seam where their decryption plugs in.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, stored: &str) -> Result<SecretString, EndpointError>;
}

/// Decryptor for records whose secrets are stored as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextSecrets;

impl SecretDecryptor for PlaintextSecrets {
    fn decrypt(&self, stored: &str) -> Result<SecretString, EndpointError> {
        Ok(SecretString::from(stored.to_string()))
    }
}

/// Connection details for one endpoint, with the secret decrypted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub secret: Option<SecretString>,
    pub private_key_path: Option<PathBuf>,
}

impl Credentials {
    /// Build credentials for `kind` from a stored record.
    pub fn from_record(
        record: &EndpointRecord,
        kind: TransportKind,
        decryptor: &dyn SecretDecryptor,
    ) -> Result<Self, EndpointError> {
        let secret = record
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| decryptor.decrypt(s))
            .transpose()?;

        Ok(Self {
            host: record.host.clone(),
            port: record.port.unwrap_or_else(|| kind.default_port()),
            username: record.username.clone().filter(|u| !u.trim().is_empty()),
            secret,
            private_key_path: record.private_key_path.as_ref().map(PathBuf::from),
        })
    }

    /// The decrypted password, or an empty string.
    pub fn password(&self) -> &str {
        self.secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectingDecryptor;

    impl SecretDecryptor for RejectingDecryptor {
        fn decrypt(&self, _stored: &str) -> Result<SecretString, EndpointError> {
            Err(EndpointError::Secret("bad key".to_string()))
        }
    }

    #[test]
    fn test_from_record_uses_default_port() {
        let record = EndpointRecord::new("e", "E", "FTP", "ftp.example.com").with_login("bob", "pw");
        let creds = Credentials::from_record(&record, TransportKind::Ftp, &PlaintextSecrets).unwrap();
        assert_eq!(creds.port, 21);
        assert_eq!(creds.username.as_deref(), Some("bob"));
        assert_eq!(creds.password(), "pw");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let record = EndpointRecord::new("e", "E", "SFTP", "h").with_login("bob", "hunter2");
        let creds = Credentials::from_record(&record, TransportKind::Sftp, &PlaintextSecrets).unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_decryptor_errors_propagate() {
        let record = EndpointRecord::new("e", "E", "SFTP", "h").with_login("bob", "cipher");
        let err = Credentials::from_record(&record, TransportKind::Sftp, &RejectingDecryptor).unwrap_err();
        assert!(matches!(err, EndpointError::Secret(_)));
    }

    #[test]
    fn test_blank_username_is_none() {
        let mut record = EndpointRecord::new("e", "Share", "NETWORK", "/mnt/share");
        record.username = Some("  ".to_string());
        let creds =
            Credentials::from_record(&record, TransportKind::NetworkShare, &PlaintextSecrets).unwrap();
        assert!(creds.username.is_none());
        assert_eq!(creds.password(), "");
    }
}
