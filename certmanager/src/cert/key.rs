use std::fmt;

use pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, PrivateKeyInfo};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

use crate::error::{Error, Result};

/// `rsaEncryption`, the only key algorithm accepted in bundles.
const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";

/// An RSA private key, held both as an [`RsaPrivateKey`] and as PKCS#8 DER.
pub struct RsaKey {
	key: RsaPrivateKey,
	pkcs8: PrivatePkcs8KeyDer<'static>,
}

impl RsaKey {
	/// Size of freshly generated keys.
	pub const DEFAULT_BITS: usize = 2048;
	/// Smallest modulus accepted when generating or decoding.
	pub const MIN_BITS: usize = 2048;

	/// Generate a fresh [`Self::DEFAULT_BITS`] key.
	pub fn generate() -> Result<Self> {
		Self::generate_with_bits(Self::DEFAULT_BITS)
	}

	/// Generate a fresh key of `bits` size.
	pub fn generate_with_bits(bits: usize) -> Result<Self> {
		if bits < Self::MIN_BITS {
			return Err(Error::UnsupportedKeyType(format!(
				"RSA keys must be at least {} bits, got {bits}",
				Self::MIN_BITS
			)));
		}
		let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(Error::signing)?;
		Self::from_rsa(key)
	}

	/// Parse a PKCS#8 DER private key, rejecting anything but RSA.
	pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
		let info = PrivateKeyInfo::try_from(der)
			.map_err(|e| Error::MalformedBundle(format!("failed to parse private key: {e}")))?;
		let oid = info.algorithm.oid.to_string();
		if oid != RSA_ENCRYPTION_OID {
			return Err(Error::UnsupportedKeyType(format!(
				"expected an RSA private key, found algorithm {oid}"
			)));
		}
		let key = RsaPrivateKey::from_pkcs8_der(der)
			.map_err(|e| Error::UnsupportedKeyType(format!("failed to parse key as RSA: {e}")))?;
		Self::from_rsa(key)
	}

	fn from_rsa(key: RsaPrivateKey) -> Result<Self> {
		let bits = key.n().bits();
		if bits < Self::MIN_BITS {
			return Err(Error::UnsupportedKeyType(format!(
				"RSA modulus of {bits} bits is smaller than {}",
				Self::MIN_BITS
			)));
		}
		let der = key.to_pkcs8_der().map_err(Error::signing)?;
		Ok(Self {
			key,
			pkcs8: PrivatePkcs8KeyDer::from(der.as_bytes().to_vec()),
		})
	}

	/// Modulus size in bits.
	pub fn bits(&self) -> usize {
		self.key.n().bits()
	}

	/// Big-endian modulus.
	pub fn modulus(&self) -> Vec<u8> {
		self.key.n().to_bytes_be()
	}

	/// Big-endian public exponent.
	pub fn public_exponent(&self) -> Vec<u8> {
		self.key.e().to_bytes_be()
	}

	/// The key as PKCS#8 DER.
	pub fn pkcs8_der(&self) -> &PrivatePkcs8KeyDer<'static> {
		&self.pkcs8
	}

	/// The key in the form rustls expects.
	pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
		PrivateKeyDer::Pkcs8(self.pkcs8.clone_key())
	}

	/// PKCS#1 `RSA PRIVATE KEY` PEM.
	pub fn pkcs1_pem(&self) -> Result<String> {
		let der = self.key.to_pkcs1_der().map_err(Error::signing)?;
		let block = pem::Pem::new("RSA PRIVATE KEY", der.as_bytes().to_vec());
		Ok(pem::encode_config(&block, super::ENCODE_CONFIG))
	}

	/// A signing key pair for rcgen.
	pub(crate) fn key_pair(&self) -> Result<rcgen::KeyPair> {
		Ok(rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
			&self.pkcs8,
			&rcgen::PKCS_RSA_SHA256,
		)?)
	}
}

impl Clone for RsaKey {
	fn clone(&self) -> Self {
		Self {
			key: self.key.clone(),
			pkcs8: self.pkcs8.clone_key(),
		}
	}
}

impl fmt::Debug for RsaKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RsaKey")
			.field("bits", &self.bits())
			.finish_non_exhaustive()
	}
}
