//! PKCS#12 encoding of a [`CertifiedKey`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use p12::PFX;
use pki_types::CertificateDer;
use tracing::debug;

use crate::cert::{CertificateChain, CertificateMaterial, CertifiedKey, RsaKey};
use crate::error::{Error, Result, ResultExt};
use crate::store::{CertificateImport, SecretBundle, PKCS12_CONTENT_TYPE};

/// Encode the certificate, its chain and key as a password-protected PKCS#12 archive.
///
/// The chain is stored as CA certificates and the subject CN as friendly name.
pub fn encode(certified: &CertifiedKey, password: &str) -> Result<Vec<u8>> {
	let cas: Vec<&[u8]> = certified.chain.iter().map(|c| c.der().as_ref()).collect();
	let pfx = PFX::new_with_cas(
		certified.cert.der(),
		certified.key.pkcs8_der().secret_pkcs8_der(),
		&cas,
		password,
		certified.cert.subject_cn(),
	)
	.ok_or_else(|| Error::MalformedBundle("failed to encode PKCS#12 archive".into()))?;
	Ok(pfx.to_der())
}

/// Encode for upload to a secret store.
pub fn encode_import(certified: &CertifiedKey, password: &str) -> Result<CertificateImport> {
	let der = encode(certified, password)?;
	Ok(CertificateImport {
		value: STANDARD.encode(der),
		password: password.to_string(),
	})
}

/// Decode a PKCS#12 archive holding exactly one RSA key and at least one certificate.
pub fn decode(der: &[u8], password: &str) -> Result<CertifiedKey> {
	let pfx = PFX::parse(der)
		.map_err(|e| Error::MalformedBundle(format!("failed to parse PKCS#12 archive: {e:?}")))?;
	if !pfx.verify_mac(password) {
		return Err(Error::MalformedBundle(
			"MAC verification failed, check the certificate password".into(),
		));
	}

	let mut keys = pfx
		.key_bags(password)
		.map_err(|e| Error::MalformedBundle(format!("failed to decrypt private key: {e:?}")))?;
	let key = match keys.len() {
		0 => return Err(Error::MalformedBundle("bundle contains no private key".into())),
		1 => RsaKey::from_pkcs8_der(&keys.remove(0))?,
		n => {
			return Err(Error::MalformedBundle(format!(
				"bundle contains {n} private keys, expected one"
			)))
		},
	};

	let mut certs = pfx
		.cert_x509_bags(password)
		.map_err(|e| Error::MalformedBundle(format!("failed to decrypt certificates: {e:?}")))?
		.into_iter()
		.map(|der| CertificateMaterial::from_der(CertificateDer::from(der)))
		.collect::<Result<Vec<_>>>()
		.context("failed to parse bundled certificate")?;
	if certs.is_empty() {
		return Err(Error::MalformedBundle("bundle contains no certificates".into()));
	}

	let leaf = certs
		.iter()
		.position(|c| c.matches_key(&key))
		.or_else(|| certs.iter().position(|c| !c.is_self_issued()))
		.unwrap_or(0);
	let cert = certs.remove(leaf);
	let chain = CertificateChain::link(&cert, certs);
	debug!(
		cn = cert.subject_cn(),
		chain = chain.len(),
		complete = chain.is_ordered_for(&cert),
		"decoded certificate bundle"
	);
	Ok(CertifiedKey::new(cert, key).with_chain(chain))
}

/// Check the content type of a fetched secret, then base64-decode and [`decode`] it.
pub fn decode_secret(secret: &SecretBundle, password: &str) -> Result<CertifiedKey> {
	match secret.content_type.as_deref() {
		Some(PKCS12_CONTENT_TYPE) => {},
		found => {
			return Err(Error::ContentTypeMismatch {
				found: found.unwrap_or_default().to_string(),
				expected: PKCS12_CONTENT_TYPE,
			})
		},
	}
	let der = STANDARD
		.decode(secret.value.trim())
		.map_err(|e| Error::MalformedBundle(format!("failed to base64-decode secret: {e}")))?;
	decode(&der, password)
}
