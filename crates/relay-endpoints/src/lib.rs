//! # relay-endpoints
//!
//! Protocol endpoints for file-relay.
//!
//! Every transport implements [`ProtocolEndpoint`]; the orchestrator only
//! ever sees the trait. This crate provides:
//! - FTP via `suppaftp`, SFTP via `ssh2`, network shares via the filesystem,
//!   optionally mounted per session with the endpoint's credentials
//! - A lazy, depth-first listing stream shared by all transports
//! - [`GuardedEndpoint`]: per-endpoint concurrency limit
//! - [`EndpointFactory`]: picks the transport from a stored record
//! - [`MockEndpoint`]: an in-memory endpoint for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_endpoints::{EndpointFactory, EndpointLimits};
//!
//! let factory = EndpointFactory::new(EndpointLimits::default());
//! let endpoint = factory.build(&record)?;
//! endpoint.ensure_directory("/incoming/2024").await?;
//! ```

pub mod credentials;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod factory;
pub mod ftp;
pub mod guarded;
pub mod mock;
pub mod sftp;
pub mod share;

pub use credentials::{Credentials, PlaintextSecrets, SecretDecryptor};
pub use endpoint::{walk, FileStream, ProtocolEndpoint};
pub use entry::{
    file_name_remote, join_remote, normalize_remote, parent_remote, EntryKind, RemoteEntry,
};
pub use error::EndpointError;
pub use factory::{EndpointFactory, EndpointLimits, EndpointResolver};
pub use ftp::FtpEndpoint;
pub use guarded::GuardedEndpoint;
pub use mock::{MockEndpoint, MockResolver};
pub use sftp::SftpEndpoint;
pub use share::{
    CifsMountConnector, MountedShareConnector, ShareConnector, ShareEndpoint, ShareSession,
};
