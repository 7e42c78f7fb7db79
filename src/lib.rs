//! # certdrive - ACME certificate driver for managed domains
//!
//! Drives the acquisition and renewal of X.509 certificates for
//! TLS-serving hosts. A *managed domain* bundles one or more DNS names
//! with contact and policy data; the driver takes such a bundle from
//! "never contacted the CA" to "certificate persisted locally":
//! account establishment, domain authorization challenges, CSR
//! submission, and certificate retrieval.
//!
//! ## Features
//!
//! - **Restart safety**: every phase boundary is persisted; a killed run
//!   resumes without re-registering accounts or re-requesting valid
//!   authorizations
//! - **Challenge types**: HTTP-01, TLS-ALPN-01, TLS-SNI-01, DNS-01,
//!   selected by capability flags
//! - **Anti-replay nonce flow**: single-slot cache, automatic recovery
//!   from `badNonce` rejections
//! - **Async/Await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use certdrive::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> certdrive::Result<()> {
//!     let store = Arc::new(FileStore::new("/var/lib/certdrive"));
//!     let registry = MdRegistry::new(store.clone());
//!
//!     let mut md = ManagedDomain::new(
//!         vec!["example.com".into(), "www.example.com".into()],
//!         "https://acme.example-ca.org/directory",
//!     )?;
//!     md.contacts.push("mailto:admin@example.com".into());
//!     registry.add(&md).await?;
//!
//!     let driver = AcmeDriver::new(store, DriveConfig::default());
//!     driver.run("example.com", &CancelToken::new()).await?;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod account;
pub mod authz;
pub mod cert;
pub mod challenge;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod order;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use account::{Account, AccountManager, AccountSession, AccountStatus};
pub use authz::{Authorization, AuthzManager, AuthzSet, AuthzStatus, Challenge};
pub use client::{AcmeClient, CaResponse};
pub use config::DriveConfig;
pub use crypto::AccountKey;
pub use driver::AcmeDriver;
pub use error::{AcmeError, Result};
pub use order::Order;
pub use protocol::{Directory, DirectoryClient, Jwk, NonceCache, Problem};
pub use registry::MdRegistry;
pub use retry::RetryPolicy;
pub use store::{FileStore, Group, Store};
pub use types::{CancelToken, ChallengeType, DriveState, KeySpec, ManagedDomain};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        account::{Account, AccountManager, AccountSession},
        client::AcmeClient,
        config::DriveConfig,
        driver::AcmeDriver,
        error::{AcmeError, Result},
        registry::MdRegistry,
        store::{FileStore, Group, Store},
        types::{CancelToken, ChallengeType, DriveState, KeySpec, ManagedDomain},
    };
}
