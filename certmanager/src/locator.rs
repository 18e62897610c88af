//! Parsing of secret store URLs.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

const SECRET_URL_FORMAT: &str = "https://{baseURL}/secrets/{secretName}(/{version})";
const CERTIFICATE_URL_FORMAT: &str = "https://{baseURL}/certificates/{certName}";

/// The kind of store resource a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
	/// An opaque secret bundle, `/secrets/{name}(/{version})`.
	Secret,
	/// A named certificate object, `/certificates/{name}`.
	Certificate,
}

impl ResourceKind {
	fn label(self) -> &'static str {
		match self {
			ResourceKind::Secret => "secret",
			ResourceKind::Certificate => "certificate",
		}
	}

	fn segment(self) -> &'static str {
		match self {
			ResourceKind::Secret => "secrets",
			ResourceKind::Certificate => "certificates",
		}
	}

	fn expected_format(self) -> &'static str {
		match self {
			ResourceKind::Secret => SECRET_URL_FORMAT,
			ResourceKind::Certificate => CERTIFICATE_URL_FORMAT,
		}
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// A resolved store address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLocator {
	/// `scheme://host[:port]` of the store.
	pub base_url: String,
	/// Resource kind the URL addressed.
	pub kind: ResourceKind,
	/// Name of the secret or certificate.
	pub name: String,
	/// Secret version, `None` for the latest.
	pub version: Option<String>,
}

/// Resolve a `scheme://host/secrets/{name}(/{version})` URL.
///
/// ```
/// # use certmanager::resolve_secret_url;
/// let loc = resolve_secret_url("https://vault.example/secrets/abc/42").unwrap();
/// assert_eq!(loc.base_url, "https://vault.example");
/// assert_eq!(loc.name, "abc");
/// assert_eq!(loc.version.as_deref(), Some("42"));
/// ```
pub fn resolve_secret_url(url: &str) -> Result<SecretLocator> {
	resolve(url, ResourceKind::Secret)
}

/// Resolve a `scheme://host/certificates/{name}` URL.
pub fn resolve_certificate_url(url: &str) -> Result<SecretLocator> {
	resolve(url, ResourceKind::Certificate)
}

fn resolve(raw: &str, kind: ResourceKind) -> Result<SecretLocator> {
	let invalid = || Error::InvalidUrl {
		resource: kind.label(),
		url: raw.to_string(),
		expected: kind.expected_format(),
	};

	let url = Url::parse(raw).map_err(|_| invalid())?;
	let host = url.host_str().ok_or_else(invalid)?;
	let base_url = match url.port() {
		Some(port) => format!("{}://{host}:{port}", url.scheme()),
		None => format!("{}://{host}", url.scheme()),
	};

	let mut segments: Vec<&str> = url.path_segments().ok_or_else(invalid)?.collect();
	// a single trailing slash is tolerated
	if segments.len() > 1 && segments.last() == Some(&"") {
		segments.pop();
	}

	let (name, version) = match (kind, segments.as_slice()) {
		(_, [prefix, name]) if *prefix == kind.segment() => (*name, None),
		(ResourceKind::Secret, [prefix, name, version]) if *prefix == kind.segment() => {
			(*name, Some(*version))
		},
		_ => return Err(invalid()),
	};
	if name.is_empty() || version.is_some_and(str::is_empty) {
		return Err(invalid());
	}

	Ok(SecretLocator {
		base_url,
		kind,
		name: name.to_string(),
		version: version.map(str::to_string),
	})
}
