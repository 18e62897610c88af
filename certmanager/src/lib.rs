#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! Bootstrap mutual TLS between services from a single CA kept in a remote
//! secret store.
//!
//! A root CA is generated once with [`generate_root_ca`] and uploaded as a
//! PKCS#12 bundle with [`CertManager::upload_certificate`]. Services later
//! retrieve it, issue themselves a leaf with [`issue_certificate`] and build
//! rustls configurations that trust only that CA:
//!
//! ```no_run
//! # async fn run() -> certmanager::Result<()> {
//! use std::time::Duration;
//! use certmanager::{CertManager, Context, CredentialChain};
//!
//! let manager = CertManager::key_vault(CredentialChain::default());
//! let ctx = Context::with_timeout(Duration::from_secs(10));
//! let not_after = time::OffsetDateTime::now_utc() + time::Duration::days(30);
//! let server = manager
//! 	.build_server_tls_config(
//! 		&ctx,
//! 		"https://my-vault.vault.azure.net/secrets/my-ca",
//! 		"ca-password",
//! 		"api.internal",
//! 		&["10.0.0.7".to_string()],
//! 		not_after,
//! 	)
//! 	.await?;
//! assert!(server.client_auth_mandatory());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod bundle;
mod cert;
mod context;
mod error;
mod locator;
mod manager;
pub mod store;
pub mod tls;

pub use auth::{CredentialChain, CredentialProvider};
pub use cert::{
	generate_intermediate_ca, generate_root_ca, issue_certificate, parse_san, write_new_file,
	CaBuilder, CertificateBuilder, CertificateChain, CertificateMaterial, CertifiedKey,
	EndEntityBuilder, PemCertifiedKey, RsaKey,
};
pub use context::Context;
pub use error::{Error, ErrorKind, ProviderFailure, ProviderFailures, Result, ResultExt};
pub use locator::{resolve_certificate_url, resolve_secret_url, ResourceKind, SecretLocator};
pub use manager::CertManager;
pub use store::{MemoryStore, SecretStore};
pub use tls::{ClientTlsConfig, ServerTlsConfig};
