//! rustls configurations for both sides of a mutually authenticated connection.
//!
//! Both sides trust exactly one CA and present a leaf issued by it:
//! - ring crypto provider with the safe default protocol versions
//! - the CA certificate as the only trust anchor
//! - the leaf followed by any intermediates, never the root

use std::sync::Arc;

use pki_types::{CertificateDer, ServerName};
use rustls::crypto::CryptoProvider;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;

use crate::cert::{CertificateMaterial, CertifiedKey};
use crate::error::{Error, Result};

/// Client side configuration and the name the server must present.
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
	/// The rustls configuration.
	pub config: Arc<ClientConfig>,
	/// Name the server certificate must carry.
	pub server_name: ServerName<'static>,
}

/// Server side configuration requiring client certificates.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
	/// The rustls configuration.
	pub config: Arc<ServerConfig>,
	verifier: Arc<dyn ClientCertVerifier>,
}

impl ServerTlsConfig {
	/// Whether connecting clients must present a certificate.
	pub fn client_auth_mandatory(&self) -> bool {
		self.verifier.client_auth_mandatory()
	}
}

fn provider() -> Arc<CryptoProvider> {
	Arc::new(rustls::crypto::ring::default_provider())
}

/// The certificates `leaf` presents to peers, leaf first.
///
/// When `ca` is itself an intermediate, its certificate and its own
/// intermediates follow the leaf. The root is never included.
pub fn presented_certificates<'a>(
	leaf: &'a CertifiedKey,
	ca: &'a CertifiedKey,
) -> Vec<&'a CertificateMaterial> {
	let mut chain = vec![&leaf.cert];
	if !ca.chain.is_empty() {
		chain.push(&ca.cert);
		chain.extend(ca.chain.without_root());
	}
	chain
}

/// [`presented_certificates`] as DER.
pub fn presented_chain(leaf: &CertifiedKey, ca: &CertifiedKey) -> Vec<CertificateDer<'static>> {
	presented_certificates(leaf, ca)
		.into_iter()
		.map(|c| c.der().clone())
		.collect()
}

/// A root store holding only the CA certificate.
pub fn trust_pool(ca: &CertifiedKey) -> Result<RootCertStore> {
	let mut roots = RootCertStore::empty();
	roots.add(ca.cert.der().clone())?;
	Ok(roots)
}

/// Build a client configuration trusting `ca` and presenting `leaf`.
pub fn client_config(
	ca: &CertifiedKey,
	leaf: &CertifiedKey,
	server_name: &str,
) -> Result<ClientTlsConfig> {
	let server_name = ServerName::try_from(server_name)
		.map(|name| name.to_owned())
		.map_err(|_| Error::InvalidServerName(server_name.to_string()))?;

	let config = ClientConfig::builder_with_provider(provider())
		.with_safe_default_protocol_versions()?
		.with_root_certificates(trust_pool(ca)?)
		.with_client_auth_cert(presented_chain(leaf, ca), leaf.key.private_key_der())?;
	debug!(
		client = leaf.cert.subject_cn(),
		ca = ca.cert.subject_cn(),
		"built client TLS config"
	);

	Ok(ClientTlsConfig {
		config: Arc::new(config),
		server_name,
	})
}

/// A verifier requiring client certificates issued by one of `roots`.
fn client_verifier(roots: RootCertStore) -> Result<Arc<dyn ClientCertVerifier>> {
	WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
		.build()
		.map_err(Error::from)
}

/// Build a server configuration presenting `leaf` and requiring clients issued by `ca`.
pub fn server_config(ca: &CertifiedKey, leaf: &CertifiedKey) -> Result<ServerTlsConfig> {
	let verifier = client_verifier(trust_pool(ca)?)?;
	let config = ServerConfig::builder_with_provider(provider())
		.with_safe_default_protocol_versions()?
		.with_client_cert_verifier(verifier.clone())
		.with_single_cert(presented_chain(leaf, ca), leaf.key.private_key_der())?;
	debug!(
		server = leaf.cert.subject_cn(),
		ca = ca.cert.subject_cn(),
		"built server TLS config"
	);

	Ok(ServerTlsConfig {
		config: Arc::new(config),
		verifier,
	})
}
