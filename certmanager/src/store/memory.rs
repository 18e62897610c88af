use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{CertificateImport, SecretBundle, SecretStore, PKCS12_CONTENT_TYPE};
use crate::error::{Error, Result};
use crate::locator::SecretLocator;

type Key = (String, String);

/// In-process [`SecretStore`] keyed by `(base_url, name)`.
///
/// Importing a certificate also publishes it as a new version of the secret
/// with the same name, and overwrites any existing certificate.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
	secrets: HashMap<Key, Vec<SecretBundle>>,
	certificates: HashSet<Key>,
}

impl MemoryStore {
	/// An empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a new version of a secret and return its version identifier.
	pub fn insert_secret(&self, base_url: &str, name: &str, secret: SecretBundle) -> String {
		let mut inner = self.lock();
		let versions = inner
			.secrets
			.entry((base_url.to_string(), name.to_string()))
			.or_default();
		versions.push(secret);
		versions.len().to_string()
	}

	/// Number of certificate objects held.
	pub fn certificate_count(&self) -> usize {
		self.lock().certificates.len()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

fn key(locator: &SecretLocator) -> Key {
	(locator.base_url.clone(), locator.name.clone())
}

#[async_trait]
impl SecretStore for MemoryStore {
	async fn fetch_secret(&self, locator: &SecretLocator) -> Result<SecretBundle> {
		let inner = self.lock();
		let versions = inner.secrets.get(&key(locator));
		let secret = match (versions, locator.version.as_deref()) {
			(Some(versions), None) => versions.last(),
			(Some(versions), Some(version)) => version
				.parse::<usize>()
				.ok()
				.and_then(|v| v.checked_sub(1))
				.and_then(|i| versions.get(i)),
			(None, _) => None,
		};
		secret
			.cloned()
			.ok_or_else(|| Error::NotFound(format!("secret {}", locator.name)))
	}

	async fn certificate_exists(&self, locator: &SecretLocator) -> Result<bool> {
		Ok(self.lock().certificates.contains(&key(locator)))
	}

	async fn import_certificate(
		&self,
		locator: &SecretLocator,
		import: &CertificateImport,
	) -> Result<()> {
		let mut inner = self.lock();
		inner.certificates.insert(key(locator));
		inner
			.secrets
			.entry(key(locator))
			.or_default()
			.push(SecretBundle {
				value: import.value.clone(),
				content_type: Some(PKCS12_CONTENT_TYPE.to_string()),
			});
		debug!(name = %locator.name, "imported certificate");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::locator::{resolve_certificate_url, resolve_secret_url};
	use crate::ErrorKind;

	fn secret(value: &str) -> SecretBundle {
		SecretBundle {
			value: value.into(),
			content_type: None,
		}
	}

	#[tokio::test]
	async fn fetch_latest_and_versioned() -> crate::Result<()> {
		let store = MemoryStore::new();
		let first = store.insert_secret("https://vault.example", "abc", secret("one"));
		store.insert_secret("https://vault.example", "abc", secret("two"));

		let latest = resolve_secret_url("https://vault.example/secrets/abc")?;
		assert_eq!(store.fetch_secret(&latest).await?.value, "two");

		let pinned = resolve_secret_url(&format!("https://vault.example/secrets/abc/{first}"))?;
		assert_eq!(store.fetch_secret(&pinned).await?.value, "one");
		Ok(())
	}

	#[tokio::test]
	async fn missing_secret() -> crate::Result<()> {
		let store = MemoryStore::new();
		store.insert_secret("https://other.example", "abc", secret("x"));
		for url in [
			"https://vault.example/secrets/abc",
			"https://other.example/secrets/abc/7",
			"https://other.example/secrets/abc/latest",
		] {
			let err = store.fetch_secret(&resolve_secret_url(url)?).await.unwrap_err();
			assert_eq!(err.kind(), ErrorKind::NotFound, "{url}");
		}
		Ok(())
	}

	#[tokio::test]
	async fn import_publishes_secret() -> crate::Result<()> {
		let store = MemoryStore::new();
		let cert = resolve_certificate_url("https://vault.example/certificates/ca")?;
		assert!(!store.certificate_exists(&cert).await?);

		let import = CertificateImport {
			value: "AAAA".into(),
			password: "pw".into(),
		};
		store.import_certificate(&cert, &import).await?;
		assert!(store.certificate_exists(&cert).await?);
		assert_eq!(store.certificate_count(), 1);

		let secret = store
			.fetch_secret(&resolve_secret_url("https://vault.example/secrets/ca")?)
			.await?;
		assert_eq!(secret.value, "AAAA");
		assert_eq!(secret.content_type.as_deref(), Some(PKCS12_CONTENT_TYPE));
		Ok(())
	}
}
