use std::{fs::OpenOptions, io, net::IpAddr, ops::Deref, path::Path};

use pki_types::CertificateDer;
use rcgen::{CertificateParams, DistinguishedName, SerialNumber};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::error::{Error, Result};

mod ca;
pub use ca::{generate_intermediate_ca, generate_root_ca, CaBuilder};
mod entity;
pub use entity::{issue_certificate, parse_san, EndEntityBuilder};
mod key;
pub use key::RsaKey;

pub(crate) const ENCODE_CONFIG: pem::EncodeConfig = {
	let line_ending = match cfg!(target_family = "windows") {
		true => pem::LineEnding::CRLF,
		false => pem::LineEnding::LF,
	};
	pem::EncodeConfig::new().set_line_ending(line_ending)
};

/// Parsed view of a single DER certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
	der: CertificateDer<'static>,
	subject_cn: String,
	issuer_cn: String,
	sans: Vec<String>,
	not_before: OffsetDateTime,
	not_after: OffsetDateTime,
	serial: Vec<u8>,
	subject: Vec<u8>,
	issuer: Vec<u8>,
	rsa_modulus: Option<Vec<u8>>,
	is_ca: bool,
}

impl CertificateMaterial {
	/// Parse `der`, keeping the original bytes.
	pub fn from_der(der: CertificateDer<'static>) -> Result<Self> {
		let (_, x509) = X509Certificate::from_der(&der)
			.map_err(|e| Error::MalformedCertificate(e.to_string()))?;

		let sans = match x509.subject_alternative_name() {
			Ok(Some(ext)) => ext
				.value
				.general_names
				.iter()
				.filter_map(|name| match name {
					GeneralName::DNSName(dns) => Some(dns.to_string()),
					GeneralName::IPAddress(ip) => ip_to_string(ip),
					_ => None,
				})
				.collect(),
			Ok(None) => Vec::new(),
			Err(e) => return Err(Error::MalformedCertificate(e.to_string())),
		};
		let rsa_modulus = match x509.public_key().parsed() {
			Ok(PublicKey::RSA(rsa)) => Some(trim_leading_zeros(rsa.modulus).to_vec()),
			_ => None,
		};

		Ok(Self {
			der: der.clone(),
			subject_cn: common_name(x509.subject()),
			issuer_cn: common_name(x509.issuer()),
			sans,
			not_before: x509.validity().not_before.to_datetime(),
			not_after: x509.validity().not_after.to_datetime(),
			serial: x509.raw_serial().to_vec(),
			subject: x509.subject().as_raw().to_vec(),
			issuer: x509.issuer().as_raw().to_vec(),
			rsa_modulus,
			is_ca: x509.is_ca(),
		})
	}

	/// The certificate as DER.
	pub fn der(&self) -> &CertificateDer<'static> {
		&self.der
	}
	/// The certificate as a `CERTIFICATE` PEM block.
	pub fn pem(&self) -> String {
		let block = pem::Pem::new("CERTIFICATE", self.der.to_vec());
		pem::encode_config(&block, ENCODE_CONFIG)
	}
	/// Common name of the subject, empty if absent.
	pub fn subject_cn(&self) -> &str {
		&self.subject_cn
	}
	/// Common name of the issuer, empty if absent.
	pub fn issuer_cn(&self) -> &str {
		&self.issuer_cn
	}
	/// DNS and IP subject alternative names, in certificate order.
	pub fn sans(&self) -> &[String] {
		&self.sans
	}
	/// Start of the validity period.
	pub fn not_before(&self) -> OffsetDateTime {
		self.not_before
	}
	/// End of the validity period.
	pub fn not_after(&self) -> OffsetDateTime {
		self.not_after
	}
	/// Serial number as encoded in the certificate (big-endian).
	pub fn serial(&self) -> &[u8] {
		&self.serial
	}
	/// Whether basic constraints mark this certificate as a CA.
	pub fn is_ca(&self) -> bool {
		self.is_ca
	}
	/// Subject and issuer distinguished names are identical.
	pub fn is_self_issued(&self) -> bool {
		self.subject == self.issuer
	}
	/// Whether `self` names `other`'s subject as its issuer.
	pub fn is_issued_by(&self, other: &CertificateMaterial) -> bool {
		self.issuer == other.subject
	}
	/// Whether the certificate's public key is `key`.
	pub fn matches_key(&self, key: &RsaKey) -> bool {
		self.rsa_modulus.as_deref() == Some(trim_leading_zeros(&key.modulus()))
	}
	/// Hex SHA-256 of the DER encoding.
	pub fn fingerprint(&self) -> String {
		let digest = ring::digest::digest(&ring::digest::SHA256, &self.der);
		digest
			.as_ref()
			.iter()
			.map(|b| format!("{b:02x}"))
			.collect()
	}
}

fn common_name(name: &x509_parser::x509::X509Name<'_>) -> String {
	name.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.unwrap_or_default()
		.to_string()
}

fn ip_to_string(bytes: &[u8]) -> Option<String> {
	let ip = match bytes.len() {
		4 => IpAddr::from(<[u8; 4]>::try_from(bytes).ok()?),
		16 => IpAddr::from(<[u8; 16]>::try_from(bytes).ok()?),
		_ => return None,
	};
	Some(ip.to_string())
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
	let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
	&bytes[start..]
}

/// Issuer certificates of a leaf, ordered from the leaf's issuer up to the root.
///
/// Empty when the leaf is itself a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain(Vec<CertificateMaterial>);

impl CertificateChain {
	/// An empty chain.
	pub fn new() -> Self {
		Self::default()
	}

	/// Order `certs` into the chain above `leaf` by following issuer names.
	///
	/// Certificates that are not part of the leaf's chain are dropped.
	pub fn link(leaf: &CertificateMaterial, certs: Vec<CertificateMaterial>) -> Self {
		let mut remaining = certs;
		let mut ordered: Vec<CertificateMaterial> = Vec::with_capacity(remaining.len());

		loop {
			let current = ordered.last().unwrap_or(leaf);
			if current.is_self_issued() {
				break;
			}
			let Some(pos) = remaining.iter().position(|c| current.is_issued_by(c)) else {
				break;
			};
			ordered.push(remaining.remove(pos));
		}

		for cert in &remaining {
			warn!(
				subject = cert.subject_cn(),
				leaf = leaf.subject_cn(),
				"dropping certificate that is not part of the chain"
			);
		}
		Self(ordered)
	}

	/// Whether each element is issued by the next, starting from `leaf`,
	/// ending at a self-issued certificate.
	pub fn is_ordered_for(&self, leaf: &CertificateMaterial) -> bool {
		let mut current = leaf;
		for cert in &self.0 {
			if !current.is_issued_by(cert) {
				return false;
			}
			current = cert;
		}
		current.is_self_issued()
	}

	/// The self-issued root at the end of the chain, if present.
	pub fn root(&self) -> Option<&CertificateMaterial> {
		self.0.last().filter(|c| c.is_self_issued())
	}

	/// The chain with its root removed.
	pub fn without_root(&self) -> &[CertificateMaterial] {
		match self.root() {
			Some(_) => &self.0[..self.0.len() - 1],
			None => &self.0,
		}
	}
}

impl Deref for CertificateChain {
	type Target = [CertificateMaterial];

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl From<Vec<CertificateMaterial>> for CertificateChain {
	fn from(certs: Vec<CertificateMaterial>) -> Self {
		Self(certs)
	}
}

/// A certificate, the chain of its issuers, and its private key.
#[derive(Debug, Clone)]
pub struct CertifiedKey {
	/// The certificate itself.
	pub cert: CertificateMaterial,
	/// Its issuers, nearest first.
	pub chain: CertificateChain,
	/// The private key matching `cert`.
	pub key: RsaKey,
}

impl CertifiedKey {
	/// A certified key without issuer chain.
	pub fn new(cert: CertificateMaterial, key: RsaKey) -> Self {
		Self {
			cert,
			chain: CertificateChain::new(),
			key,
		}
	}
	/// Replace the issuer chain.
	pub fn with_chain(mut self, chain: CertificateChain) -> Self {
		self.chain = chain;
		self
	}
	/// The certificate followed by its chain.
	pub fn certificates(&self) -> impl Iterator<Item = &CertificateMaterial> {
		std::iter::once(&self.cert).chain(self.chain.iter())
	}
	/// Serialize certificate, chain and key as PEM.
	pub fn serialize_pem(&self) -> Result<PemCertifiedKey> {
		Ok(PemCertifiedKey {
			cert_pem: self.certificates().map(CertificateMaterial::pem).collect(),
			private_key_pem: self.key.pkcs1_pem()?,
		})
	}

	/// Reconstruct the rcgen issuer for signing with this certificate.
	pub(crate) fn signer(&self) -> Result<(rcgen::Certificate, rcgen::KeyPair)> {
		let key_pair = self.key.key_pair()?;
		let params = CertificateParams::from_ca_cert_der(self.cert.der())?;
		let cert = params.self_signed(&key_pair)?;
		Ok((cert, key_pair))
	}
}

/// Fail when `cert` does not name `issuer`'s subject as its issuer.
///
/// rcgen rebuilds the issuer name from the CA certificate and cannot express
/// multi-valued RDNs or repeated attribute types, so such names come out altered.
pub(crate) fn check_issuer(cert: &CertificateMaterial, issuer: &CertifiedKey) -> Result<()> {
	if cert.is_issued_by(&issuer.cert) {
		return Ok(());
	}
	Err(Error::SigningFailure(format!(
		"issuer name of the signed certificate differs from the subject of {:?}",
		issuer.cert.subject_cn()
	)))
}

#[derive(Debug, Clone)]
/// PEM serialized certificate chain and PEM serialized corresponding private key
pub struct PemCertifiedKey {
	/// Concatenated `CERTIFICATE` blocks, leaf first.
	pub cert_pem: String,
	/// PKCS#1 `RSA PRIVATE KEY` block.
	pub private_key_pem: String,
}

impl PemCertifiedKey {
	/// Write `{name}.key` and `{name}.crt` into `dir`, creating `dir` if needed.
	///
	/// Files that already exist are left untouched.
	pub fn write(&self, dir: &Path, name: &str) -> Result<(), io::Error> {
		std::fs::create_dir_all(dir)?;

		let key_path = dir.join(format!("{name}.key"));
		write_new_file(&key_path, &self.private_key_pem)?;

		let cert_path = dir.join(format!("{name}.crt"));
		write_new_file(&cert_path, &self.cert_pem)?;

		Ok(())
	}
}

/// Create `path` with `contents`, readable by the owner only.
///
/// Returns `false` without writing when the file already exists.
pub fn write_new_file(path: &Path, contents: &str) -> Result<bool, io::Error> {
	use std::io::Write;

	let mut options = OpenOptions::new();
	options.write(true).create_new(true);
	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;
		options.mode(0o600);
	}

	let mut file = match options.open(path) {
		Ok(file) => file,
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
			info!(path = %path.display(), "file already exists, skipping");
			return Ok(false);
		},
		Err(e) => return Err(e),
	};
	info!(path = %path.display(), "saving");
	file.write_all(contents.as_bytes())?;
	Ok(true)
}

/// Builder to configure [CertificateParams] to be finalized
/// into either a [CaBuilder] or an [EndEntityBuilder].
pub struct CertificateBuilder {
	params: CertificateParams,
}

impl Default for CertificateBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl CertificateBuilder {
	/// Initialize `CertificateParams` valid from now for one year,
	/// with an empty subject and a random serial
	/// # Example
	/// ```
	/// # use certmanager::CertificateBuilder;
	/// let cert = CertificateBuilder::new();
	/// ```
	pub fn new() -> Self {
		let mut params = CertificateParams::default();
		// override default Common Name
		params.distinguished_name = DistinguishedName::new();
		params.not_before = now();
		params.not_after = params.not_before + Duration::days(365);
		params.serial_number = Some(random_serial());
		Self { params }
	}
	/// Set the expiry, truncated to whole seconds.
	pub fn not_after(mut self, not_after: OffsetDateTime) -> Self {
		self.params.not_after = truncate_to_seconds(not_after);
		self
	}
	/// Set options for Ca Certificates
	/// # Example
	/// ```
	/// # use certmanager::CertificateBuilder;
	/// let cert = CertificateBuilder::new().certificate_authority();
	/// ```
	pub fn certificate_authority(self) -> CaBuilder {
		CaBuilder::new(self.params)
	}
	/// Set options for `EndEntity` Certificates
	pub fn end_entity(self) -> EndEntityBuilder {
		EndEntityBuilder::new(self.params)
	}
}

fn now() -> OffsetDateTime {
	truncate_to_seconds(OffsetDateTime::now_utc())
}

fn truncate_to_seconds(t: OffsetDateTime) -> OffsetDateTime {
	t.replace_nanosecond(0).unwrap_or(t)
}

/// A random positive 128-bit serial.
fn random_serial() -> SerialNumber {
	let mut bytes: [u8; 16] = rand::random();
	bytes[0] &= 0x7f;
	SerialNumber::from_slice(&bytes)
}
