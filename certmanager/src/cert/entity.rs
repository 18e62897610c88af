use std::net::IpAddr;

use pki_types::CertificateDer;
use rcgen::{
	CertificateParams, CertificateSigningRequest, CertificateSigningRequestParams, DnType,
	ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType,
};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{check_issuer, CertificateBuilder, CertificateMaterial, CertifiedKey, RsaKey};
use crate::error::{Result, ResultExt};

/// [CertificateParams] from which an end-entity [CertifiedKey] can be built
pub struct EndEntityBuilder {
	params: CertificateParams,
}

impl EndEntityBuilder {
	/// Initialize `EndEntityBuilder`
	pub fn new(mut params: CertificateParams) -> Self {
		params.is_ca = IsCa::NoCa;
		params.use_authority_key_identifier_extension = true;
		params.key_usages.push(KeyUsagePurpose::DigitalSignature);
		params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
		Self { params }
	}
	/// Return `&self.params`.
	pub fn params(&self) -> &CertificateParams {
		&self.params
	}
	/// Set the subject common name, also recorded as the first SAN.
	pub fn common_name(mut self, name: &str) -> Result<Self> {
		self.params
			.distinguished_name
			.push(DnType::CommonName, name);
		let san = parse_san(name)?;
		self.params.subject_alt_names.retain(|s| *s != san);
		self.params.subject_alt_names.insert(0, san);
		Ok(self)
	}
	/// `SanTypes` that will be recorded as `subject_alt_names`, skipping duplicates
	pub fn subject_alternative_names(mut self, sans: Vec<SanType>) -> Self {
		for san in sans {
			if !self.params.subject_alt_names.contains(&san) {
				self.params.subject_alt_names.push(san);
			}
		}
		self
	}
	/// Add ClientAuth to `extended_key_usages`.
	pub fn client_auth(&mut self) -> &mut Self {
		let usage = ExtendedKeyUsagePurpose::ClientAuth;
		self.params.extended_key_usages.push(usage);
		self
	}
	/// Add ServerAuth to `extended_key_usages`.
	pub fn server_auth(&mut self) -> &mut Self {
		let usage = ExtendedKeyUsagePurpose::ServerAuth;
		self.params.extended_key_usages.push(usage);
		self
	}
	/// Generate a key, request a certificate for it and sign the request with `issuer`.
	///
	/// Stops at the first failing step.
	pub fn build(self, issuer: &CertifiedKey) -> Result<CertifiedKey> {
		let key = RsaKey::generate().context("failed to generate private key")?;
		let csr = self
			.signing_request(&key)
			.context("failed to create certificate signing request")?;
		let der = self
			.sign(&csr, issuer)
			.context("failed to sign certificate")?;
		let cert =
			CertificateMaterial::from_der(der).context("failed to parse signed certificate")?;
		check_issuer(&cert, issuer)?;
		Ok(CertifiedKey::new(cert, key))
	}

	/// A CSR carrying only the subject and SANs, signed by `key`.
	fn signing_request(&self, key: &RsaKey) -> Result<CertificateSigningRequest> {
		let mut params = CertificateParams::default();
		params.distinguished_name = self.params.distinguished_name.clone();
		params.subject_alt_names = self.params.subject_alt_names.clone();
		Ok(params.serialize_request(&key.key_pair()?)?)
	}

	fn sign(
		&self,
		csr: &CertificateSigningRequest,
		issuer: &CertifiedKey,
	) -> Result<CertificateDer<'static>> {
		let mut request = CertificateSigningRequestParams::from_der(csr.der())?;
		request.params.not_before = self.params.not_before;
		request.params.not_after = self.params.not_after;
		request.params.serial_number = self.params.serial_number.clone();
		request.params.is_ca = self.params.is_ca.clone();
		request.params.key_usages = self.params.key_usages.clone();
		request.params.extended_key_usages = self.params.extended_key_usages.clone();
		request.params.use_authority_key_identifier_extension =
			self.params.use_authority_key_identifier_extension;

		let (issuer_cert, issuer_key) = issuer.signer()?;
		let cert = request.signed_by(&issuer_cert, &issuer_key)?;
		debug!(issuer = issuer.cert.subject_cn(), "signed certificate request");
		Ok(cert.der().clone())
	}
}

/// Parse `host` as an IP address SAN, falling back to a DNS name SAN.
pub fn parse_san(host: &str) -> Result<SanType> {
	Ok(match host.parse::<IpAddr>() {
		Ok(ip) => SanType::IpAddress(ip),
		Err(_) => SanType::DnsName(host.to_string().try_into()?),
	})
}

/// Issue a leaf certificate for `common_name`, signed by `ca`.
///
/// The certificate is valid from now until `not_after`, usable for both
/// server and client authentication, and lists `common_name` followed by
/// `alt_names` as subject alternative names.
pub fn issue_certificate(
	ca: &CertifiedKey,
	common_name: &str,
	alt_names: &[String],
	not_after: OffsetDateTime,
) -> Result<CertifiedKey> {
	let sans = alt_names
		.iter()
		.map(|name| parse_san(name))
		.collect::<Result<Vec<_>>>()
		.context("invalid subject alternative name")?;

	let mut builder = CertificateBuilder::new()
		.not_after(not_after)
		.end_entity()
		.common_name(common_name)
		.context("invalid common name")?
		.subject_alternative_names(sans);
	builder.server_auth().client_auth();

	let leaf = builder.build(ca)?;
	info!(
		cn = leaf.cert.subject_cn(),
		issuer = leaf.cert.issuer_cn(),
		not_after = %leaf.cert.not_after(),
		"issued certificate"
	);
	Ok(leaf)
}
