use std::fmt;

/// A specialized `Result` type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while retrieving, issuing, encoding or assembling certificates.
///
/// Most errors reach the caller wrapped in one or more [`Error::Context`] layers
/// naming the stage that failed. Use [`Error::kind`] to match on the underlying
/// cause.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The URL does not address a secret or certificate of the store.
	#[error("invalid key vault {resource} URL {url:?}, expected format: {expected}")]
	InvalidUrl {
		/// `secret` or `certificate`.
		resource: &'static str,
		/// The rejected URL.
		url: String,
		/// The accepted format.
		expected: &'static str,
	},
	/// Every credential provider failed to produce a token.
	#[error("failed to authenticate against the secret store: {0}")]
	Unauthenticated(ProviderFailures),
	/// A single credential provider could not produce a token.
	#[error("{0}")]
	Credential(String),
	/// A required environment variable is not set.
	#[error("env var {0} required when not logged into Azure CLI")]
	MissingEnvVar(&'static str),
	/// The fetched secret is not a PKCS#12 archive.
	#[error("invalid secret content type '{found}', should be '{expected}'")]
	ContentTypeMismatch {
		/// Content type of the secret, empty when missing.
		found: String,
		/// The only accepted content type.
		expected: &'static str,
	},
	/// The archive could not be encoded or decoded.
	#[error("malformed bundle: {0}")]
	MalformedBundle(String),
	/// A certificate could not be parsed.
	#[error("malformed certificate: {0}")]
	MalformedCertificate(String),
	/// The private key is not an RSA key of a supported size.
	#[error("unsupported key type: {0}")]
	UnsupportedKeyType(String),
	/// A certificate with this name already exists in the store.
	#[error("a remote certificate with the name {0} already exists")]
	AlreadyExists(String),
	/// The secret or certificate does not exist in the store.
	#[error("{0} not found")]
	NotFound(String),
	/// Key generation or signing failed.
	#[error("signing failed: {0}")]
	SigningFailure(String),
	/// The caller's deadline expired during a network call.
	#[error("request timed out - please verify that the URL is correct, or increase the timeout")]
	DeadlineExceeded,
	/// The store answered with an unexpected status.
	#[error("secret store returned {status}: {message}")]
	Store {
		/// HTTP status code.
		status: u16,
		/// Error message from the response body.
		message: String,
	},
	/// The request to the store could not be performed.
	#[error("request to secret store failed")]
	Http(#[source] reqwest::Error),
	/// The server name is not a valid DNS name or IP address.
	#[error("invalid server name {0:?}")]
	InvalidServerName(String),
	/// rustls rejected the assembled configuration.
	#[error("failed to build TLS configuration")]
	Tls(#[source] rustls::Error),
	/// The client certificate verifier could not be built from the trust pool.
	#[error("failed to build client certificate verifier")]
	ClientVerifier(#[source] rustls::server::VerifierBuilderError),
	/// Writing an artifact failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Another error, annotated with the stage that produced it.
	#[error("{context}")]
	Context {
		/// What was being done.
		context: String,
		/// Why it failed.
		#[source]
		source: Box<Error>,
	},
}

/// The cause of an [`Error`], with any context layers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
	/// [`Error::InvalidUrl`]
	InvalidUrl,
	/// [`Error::Unauthenticated`]
	Unauthenticated,
	/// [`Error::Credential`]
	Credential,
	/// [`Error::MissingEnvVar`]
	MissingEnvVar,
	/// [`Error::ContentTypeMismatch`]
	ContentTypeMismatch,
	/// [`Error::MalformedBundle`]
	MalformedBundle,
	/// [`Error::MalformedCertificate`]
	MalformedCertificate,
	/// [`Error::UnsupportedKeyType`]
	UnsupportedKeyType,
	/// [`Error::AlreadyExists`]
	AlreadyExists,
	/// [`Error::NotFound`]
	NotFound,
	/// [`Error::SigningFailure`]
	SigningFailure,
	/// [`Error::DeadlineExceeded`]
	DeadlineExceeded,
	/// [`Error::Store`]
	Store,
	/// [`Error::Http`]
	Http,
	/// [`Error::InvalidServerName`]
	InvalidServerName,
	/// [`Error::Tls`]
	Tls,
	/// [`Error::ClientVerifier`]
	ClientVerifier,
	/// [`Error::Io`]
	Io,
}

impl Error {
	/// Returns the kind of the innermost error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::InvalidUrl { .. } => ErrorKind::InvalidUrl,
			Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
			Error::Credential(_) => ErrorKind::Credential,
			Error::MissingEnvVar(_) => ErrorKind::MissingEnvVar,
			Error::ContentTypeMismatch { .. } => ErrorKind::ContentTypeMismatch,
			Error::MalformedBundle(_) => ErrorKind::MalformedBundle,
			Error::MalformedCertificate(_) => ErrorKind::MalformedCertificate,
			Error::UnsupportedKeyType(_) => ErrorKind::UnsupportedKeyType,
			Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
			Error::NotFound(_) => ErrorKind::NotFound,
			Error::SigningFailure(_) => ErrorKind::SigningFailure,
			Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
			Error::Store { .. } => ErrorKind::Store,
			Error::Http(_) => ErrorKind::Http,
			Error::InvalidServerName(_) => ErrorKind::InvalidServerName,
			Error::Tls(_) => ErrorKind::Tls,
			Error::ClientVerifier(_) => ErrorKind::ClientVerifier,
			Error::Io(_) => ErrorKind::Io,
			Error::Context { source, .. } => source.kind(),
		}
	}

	/// Returns the innermost error below all context layers.
	pub fn root(&self) -> &Error {
		let mut err = self;
		while let Error::Context { source, .. } = err {
			err = source;
		}
		err
	}

	/// Shorthand for `self.kind() == kind`.
	pub fn is(&self, kind: ErrorKind) -> bool {
		self.kind() == kind
	}

	pub(crate) fn signing(err: impl fmt::Display) -> Self {
		Error::SigningFailure(err.to_string())
	}
}

impl From<rcgen::Error> for Error {
	fn from(err: rcgen::Error) -> Self {
		Error::signing(err)
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			Error::DeadlineExceeded
		} else {
			Error::Http(err)
		}
	}
}

impl From<rustls::Error> for Error {
	fn from(err: rustls::Error) -> Self {
		Error::Tls(err)
	}
}

impl From<rustls::server::VerifierBuilderError> for Error {
	fn from(err: rustls::server::VerifierBuilderError) -> Self {
		Error::ClientVerifier(err)
	}
}

/// Adds a short description of the failing stage to an error.
pub trait ResultExt<T> {
	/// Wraps the error in [`Error::Context`].
	fn context(self, context: &'static str) -> Result<T>;
	/// Like [`context`](Self::context) but builds the message lazily.
	fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
	fn context(self, context: &'static str) -> Result<T> {
		self.with_context(|| context)
	}

	fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
		self.map_err(|err| Error::Context {
			context: f().into(),
			source: Box::new(err.into()),
		})
	}
}

/// One failed credential provider.
#[derive(Debug)]
pub struct ProviderFailure {
	/// Name of the provider, e.g. `azure-cli`.
	pub provider: &'static str,
	/// Why it failed.
	pub error: Error,
}

/// Failures of every provider in a credential chain, in the order tried.
#[derive(Debug, Default)]
pub struct ProviderFailures(pub Vec<ProviderFailure>);

impl fmt::Display for ProviderFailures {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return write!(f, "no credential providers configured");
		}
		for (i, failure) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, "; ")?;
			}
			write!(f, "{}: {}", failure.provider, failure.error)?;
			let mut source = std::error::Error::source(&failure.error);
			while let Some(cause) = source {
				write!(f, ": {cause}")?;
				source = cause.source();
			}
		}
		Ok(())
	}
}
