use time::OffsetDateTime;
use tracing::info;

use crate::auth::CredentialChain;
use crate::bundle;
use crate::cert::{issue_certificate, CertifiedKey};
use crate::context::Context;
use crate::error::{Error, Result, ResultExt};
use crate::locator::{resolve_certificate_url, resolve_secret_url};
use crate::store::{KeyVaultClient, SecretStore};
use crate::tls::{self, ClientTlsConfig, ServerTlsConfig};

/// Retrieves, uploads and uses certificate bundles kept in a [`SecretStore`].
///
/// Every store call runs under the [`Context`] passed by the caller.
#[derive(Debug, Clone)]
pub struct CertManager<S> {
	store: S,
}

impl CertManager<KeyVaultClient> {
	/// A manager talking to Azure Key Vault with tokens from `credential`.
	pub fn key_vault(credential: CredentialChain) -> Self {
		Self::new(KeyVaultClient::new(credential))
	}
}

impl<S: SecretStore> CertManager<S> {
	/// A manager over `store`.
	pub fn new(store: S) -> Self {
		Self { store }
	}

	/// The underlying secret store.
	pub fn store(&self) -> &S {
		&self.store
	}

	/// Fetch the bundle at the secret `url` and decode it with `password`.
	pub async fn retrieve_certificate(
		&self,
		ctx: &Context,
		url: &str,
		password: &str,
	) -> Result<CertifiedKey> {
		let locator = resolve_secret_url(url).context("failed to parse secret URL")?;
		let secret = ctx
			.run(self.store.fetch_secret(&locator))
			.await
			.with_context(|| format!("failed to fetch secret {}", locator.name))?;
		let certified = bundle::decode_secret(&secret, password)
			.context("failed to decode certificate bundle")?;
		info!(
			name = %locator.name,
			cn = certified.cert.subject_cn(),
			chain = certified.chain.len(),
			fingerprint = %certified.cert.fingerprint(),
			"retrieved certificate"
		);
		Ok(certified)
	}

	/// Encode `certified` with `password` and import it at the certificate `url`.
	///
	/// Fails with [`Error::AlreadyExists`] without writing when the name is taken.
	/// The check and the import are separate store calls.
	pub async fn upload_certificate(
		&self,
		ctx: &Context,
		url: &str,
		certified: &CertifiedKey,
		password: &str,
	) -> Result<()> {
		let locator = resolve_certificate_url(url).context("failed to parse certificate URL")?;
		let exists = ctx
			.run(self.store.certificate_exists(&locator))
			.await
			.context("failed to check for an existing certificate")?;
		if exists {
			return Err(Error::AlreadyExists(locator.name));
		}

		let import = bundle::encode_import(certified, password)
			.context("failed to encode certificate bundle")?;
		ctx.run(self.store.import_certificate(&locator, &import))
			.await
			.context("failed to upload certificate")?;
		info!(
			name = %locator.name,
			cn = certified.cert.subject_cn(),
			fingerprint = %certified.cert.fingerprint(),
			"uploaded certificate"
		);
		Ok(())
	}

	/// Retrieve the CA, issue a certificate for `client_name` and build a client configuration
	/// expecting `server_name`.
	pub async fn build_client_tls_config(
		&self,
		ctx: &Context,
		ca_url: &str,
		ca_password: &str,
		client_name: &str,
		server_name: &str,
		not_after: OffsetDateTime,
	) -> Result<ClientTlsConfig> {
		let ca = self
			.retrieve_certificate(ctx, ca_url, ca_password)
			.await
			.context("failed to retrieve CA")?;
		let leaf = issue_certificate(&ca, client_name, &[], not_after)
			.context("failed to issue client certificate")?;
		tls::client_config(&ca, &leaf, server_name).context("failed to build client TLS config")
	}

	/// Retrieve the CA, issue a certificate for `hostname` and `alt_names` and build a server
	/// configuration that requires client certificates from the same CA.
	pub async fn build_server_tls_config(
		&self,
		ctx: &Context,
		ca_url: &str,
		ca_password: &str,
		hostname: &str,
		alt_names: &[String],
		not_after: OffsetDateTime,
	) -> Result<ServerTlsConfig> {
		let ca = self
			.retrieve_certificate(ctx, ca_url, ca_password)
			.await
			.context("failed to retrieve CA")?;
		let leaf = issue_certificate(&ca, hostname, alt_names, not_after)
			.context("failed to issue server certificate")?;
		tls::server_config(&ca, &leaf).context("failed to build server TLS config")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cert::generate_root_ca;
	use crate::store::MemoryStore;
	use crate::ErrorKind;
	use time::macros::datetime;

	const BASE: &str = "https://vault.example";

	#[tokio::test]
	async fn upload_then_retrieve() -> anyhow::Result<()> {
		let manager = CertManager::new(MemoryStore::new());
		let ctx = Context::background();
		let ca = generate_root_ca("my-ca", datetime!(2035-01-01 0:00 UTC))?;

		manager
			.upload_certificate(&ctx, &format!("{BASE}/certificates/my-ca"), &ca, "pw")
			.await?;
		let fetched = manager
			.retrieve_certificate(&ctx, &format!("{BASE}/secrets/my-ca"), "pw")
			.await?;
		assert_eq!(fetched.cert.der(), ca.cert.der());
		assert_eq!(fetched.cert.fingerprint(), ca.cert.fingerprint());
		assert_eq!(fetched.key.modulus(), ca.key.modulus());
		Ok(())
	}

	#[tokio::test]
	async fn invalid_urls_rejected_before_store() {
		let manager = CertManager::new(MemoryStore::new());
		let ctx = Context::background();
		let err = manager
			.retrieve_certificate(&ctx, &format!("{BASE}/certificates/my-ca"), "")
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidUrl);
		assert_eq!(err.to_string(), "failed to parse secret URL");
	}

	#[tokio::test]
	async fn wrong_ca_password() -> anyhow::Result<()> {
		let manager = CertManager::new(MemoryStore::new());
		let ctx = Context::background();
		let ca = generate_root_ca("my-ca", datetime!(2035-01-01 0:00 UTC))?;
		manager
			.upload_certificate(&ctx, &format!("{BASE}/certificates/my-ca"), &ca, "pw")
			.await?;

		let err = manager
			.build_server_tls_config(
				&ctx,
				&format!("{BASE}/secrets/my-ca"),
				"nope",
				"svc",
				&[],
				datetime!(2030-01-01 0:00 UTC),
			)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::MalformedBundle);
		assert_eq!(err.to_string(), "failed to retrieve CA");
		Ok(())
	}
}
