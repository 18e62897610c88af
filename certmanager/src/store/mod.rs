//! Remote secret stores holding certificate bundles.

use async_trait::async_trait;

use crate::error::Result;
use crate::locator::SecretLocator;

mod keyvault;
pub use keyvault::{KeyVaultClient, KEY_VAULT_API_VERSION, KEY_VAULT_RESOURCE};
mod memory;
pub use memory::MemoryStore;

/// Content type of a secret holding a PKCS#12 archive.
pub const PKCS12_CONTENT_TYPE: &str = "application/x-pkcs12";

/// A secret as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBundle {
	/// Base64 of the archive.
	pub value: String,
	/// Content type recorded with the secret, if any.
	pub content_type: Option<String>,
}

/// A PKCS#12 archive to import as a certificate object.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateImport {
	/// Base64 of the archive.
	pub value: String,
	/// Password protecting the archive.
	pub password: String,
}

impl std::fmt::Debug for CertificateImport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertificateImport")
			.field("value_len", &self.value.len())
			.finish_non_exhaustive()
	}
}

/// Access to a store of named secrets and certificates.
///
/// Implementations do not retry and do not apply deadlines themselves;
/// callers wrap each call in a [`Context`](crate::Context).
#[async_trait]
pub trait SecretStore: Send + Sync {
	/// Fetch the secret named by `locator`, at its version if one is given.
	async fn fetch_secret(&self, locator: &SecretLocator) -> Result<SecretBundle>;

	/// Whether a certificate object named `locator.name` exists.
	async fn certificate_exists(&self, locator: &SecretLocator) -> Result<bool>;

	/// Import a certificate object named `locator.name`.
	async fn import_certificate(
		&self,
		locator: &SecretLocator,
		import: &CertificateImport,
	) -> Result<()>;
}

#[async_trait]
impl<S: SecretStore + ?Sized> SecretStore for std::sync::Arc<S> {
	async fn fetch_secret(&self, locator: &SecretLocator) -> Result<SecretBundle> {
		(**self).fetch_secret(locator).await
	}

	async fn certificate_exists(&self, locator: &SecretLocator) -> Result<bool> {
		(**self).certificate_exists(locator).await
	}

	async fn import_certificate(
		&self,
		locator: &SecretLocator,
		import: &CertificateImport,
	) -> Result<()> {
		(**self).import_certificate(locator, import).await
	}
}
