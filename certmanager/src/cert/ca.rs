use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyUsagePurpose};
use time::OffsetDateTime;
use tracing::debug;

use super::{
	check_issuer, CertificateBuilder, CertificateChain, CertificateMaterial, CertifiedKey, RsaKey,
};
use crate::error::{Result, ResultExt};

/// [CertificateParams] from which a CA [CertifiedKey] can be built
pub struct CaBuilder {
	params: CertificateParams,
}

impl CaBuilder {
	/// Initialize `CaBuilder`
	pub fn new(mut params: CertificateParams) -> Self {
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages.push(KeyUsagePurpose::DigitalSignature);
		params.key_usages.push(KeyUsagePurpose::KeyCertSign);
		params.key_usages.push(KeyUsagePurpose::CrlSign);
		Self { params }
	}
	/// Return `&self.params`.
	pub fn params(&self) -> &CertificateParams {
		&self.params
	}
	/// Set the subject common name.
	pub fn common_name(mut self, name: &str) -> Self {
		self.params
			.distinguished_name
			.push(DnType::CommonName, name);
		self
	}
	/// Generate a key and self-sign.
	pub fn build(self) -> Result<CertifiedKey> {
		let key = RsaKey::generate().context("failed to generate CA key")?;
		let key_pair = key.key_pair()?;
		let cert = self
			.params
			.self_signed(&key_pair)
			.context("failed to self-sign CA certificate")?;
		let cert = CertificateMaterial::from_der(cert.der().clone())?;
		debug!(cn = cert.subject_cn(), serial = ?cert.serial(), "generated root CA");
		Ok(CertifiedKey::new(cert, key))
	}
	/// Generate a key and sign with `issuer`, yielding an intermediate CA.
	pub fn build_signed_by(mut self, issuer: &CertifiedKey) -> Result<CertifiedKey> {
		self.params.use_authority_key_identifier_extension = true;
		let key = RsaKey::generate().context("failed to generate CA key")?;
		let key_pair = key.key_pair()?;
		let (issuer_cert, issuer_key) = issuer.signer().context("failed to load issuer")?;
		let cert = self
			.params
			.signed_by(&key_pair, &issuer_cert, &issuer_key)
			.context("failed to sign intermediate CA certificate")?;
		let cert = CertificateMaterial::from_der(cert.der().clone())?;
		check_issuer(&cert, issuer)?;
		debug!(
			cn = cert.subject_cn(),
			issuer = issuer.cert.subject_cn(),
			"generated intermediate CA"
		);
		let chain = issuer.certificates().cloned().collect::<Vec<_>>();
		Ok(CertifiedKey::new(cert, key).with_chain(CertificateChain::from(chain)))
	}
}

/// Generate a self-signed root CA named `common_name`, valid from now until `not_after`.
///
/// ```no_run
/// # use certmanager::generate_root_ca;
/// let expiry = time::OffsetDateTime::now_utc() + time::Duration::days(3650);
/// let ca = generate_root_ca("my-root-ca", expiry).unwrap();
/// assert_eq!(ca.cert.issuer_cn(), "my-root-ca");
/// ```
pub fn generate_root_ca(common_name: &str, not_after: OffsetDateTime) -> Result<CertifiedKey> {
	CertificateBuilder::new()
		.not_after(not_after)
		.certificate_authority()
		.common_name(common_name)
		.build()
}

/// Generate an intermediate CA named `common_name`, signed by `parent`.
///
/// The returned chain is `parent` followed by `parent`'s own chain.
pub fn generate_intermediate_ca(
	parent: &CertifiedKey,
	common_name: &str,
	not_after: OffsetDateTime,
) -> Result<CertifiedKey> {
	CertificateBuilder::new()
		.not_after(not_after)
		.certificate_authority()
		.common_name(common_name)
		.build_signed_by(parent)
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;
	use x509_parser::prelude::{FromDer, X509Certificate};

	#[test]
	fn init_ca() {
		let params = CertificateParams::default();
		let cert = CaBuilder::new(params);
		assert_eq!(
			cert.params().is_ca,
			IsCa::Ca(BasicConstraints::Unconstrained)
		)
	}

	#[test]
	fn root_ca_is_self_issued() -> anyhow::Result<()> {
		let not_after = datetime!(2036-06-01 12:30:15 UTC);
		let ca = generate_root_ca("my-root-ca", not_after)?;

		assert_eq!(ca.cert.subject_cn(), "my-root-ca");
		assert_eq!(ca.cert.issuer_cn(), "my-root-ca");
		assert!(ca.cert.is_self_issued());
		assert!(ca.cert.is_ca());
		assert_eq!(ca.cert.not_after(), not_after);
		assert!(ca.chain.is_empty());
		assert!(ca.cert.matches_key(&ca.key));

		let (_, cert) = X509Certificate::from_der(ca.cert.der())?;
		let verified = cert.verify_signature(None).is_ok();
		assert!(verified);
		Ok(())
	}

	#[test]
	fn intermediate_signed_by_parent() -> anyhow::Result<()> {
		let not_after = datetime!(2036-06-01 0:00 UTC);
		let root = generate_root_ca("root", not_after)?;
		let int = generate_intermediate_ca(&root, "intermediate", not_after)?;

		assert_eq!(int.cert.issuer_cn(), "root");
		assert!(int.cert.is_ca());
		assert!(int.cert.is_issued_by(&root.cert));
		assert_eq!(int.chain.len(), 1);
		assert!(int.chain.is_ordered_for(&int.cert));

		let (_, issuer) = X509Certificate::from_der(root.cert.der())?;
		let (_, cert) = X509Certificate::from_der(int.cert.der())?;
		let verified = cert.verify_signature(Some(issuer.public_key())).is_ok();
		assert!(verified);
		Ok(())
	}
}
