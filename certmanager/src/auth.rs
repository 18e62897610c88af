//! Bearer tokens for the secret store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, ProviderFailure, ProviderFailures, Result};

/// Default authority for service principal logins.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// An OAuth bearer token.
#[derive(Clone)]
pub struct AccessToken {
	/// The raw token sent as `Authorization: Bearer`.
	pub token: String,
}

impl fmt::Debug for AccessToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("AccessToken(..)")
	}
}

/// A source of access tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
	/// Short name used in logs and errors.
	fn name(&self) -> &'static str;

	/// Obtain a token for `resource`, e.g. `https://vault.azure.net`.
	async fn token(&self, resource: &str) -> Result<AccessToken>;
}

/// Tokens from the session of a logged-in `az` command line.
#[derive(Debug, Clone)]
pub struct AzureCliCredential {
	program: String,
}

impl Default for AzureCliCredential {
	fn default() -> Self {
		Self {
			program: "az".into(),
		}
	}
}

impl AzureCliCredential {
	/// Runs `az` from `PATH`.
	pub fn new() -> Self {
		Self::default()
	}

	/// Use `program` instead of `az` from `PATH`.
	pub fn with_program(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
	access_token: String,
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
	fn name(&self) -> &'static str {
		"azure-cli"
	}

	async fn token(&self, resource: &str) -> Result<AccessToken> {
		let output = Command::new(&self.program)
			.args(["account", "get-access-token", "--output", "json", "--resource"])
			.arg(resource)
			.kill_on_drop(true)
			.output()
			.await?;
		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			return Err(Error::Credential(format!(
				"`{} account get-access-token` failed: {}",
				self.program,
				stderr.trim()
			)));
		}
		let token: CliToken = serde_json::from_slice(&output.stdout)
			.map_err(|e| Error::Credential(format!("unexpected az output: {e}")))?;
		Ok(AccessToken {
			token: token.access_token,
		})
	}
}

/// Client id, tenant and secret of a service principal.
#[derive(Clone)]
pub struct ServicePrincipalConfig {
	/// `AZURE_CLIENT_ID`.
	pub client_id: String,
	/// `AZURE_TENANT_ID`.
	pub tenant_id: String,
	/// `AZURE_CLIENT_SECRET`.
	pub client_secret: String,
	/// Base URL of the login authority, [`DEFAULT_AUTHORITY_HOST`] unless overridden.
	pub authority_host: String,
}

impl fmt::Debug for ServicePrincipalConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServicePrincipalConfig")
			.field("client_id", &self.client_id)
			.field("tenant_id", &self.tenant_id)
			.field("authority_host", &self.authority_host)
			.finish_non_exhaustive()
	}
}

impl ServicePrincipalConfig {
	/// Read `AZURE_CLIENT_ID`, `AZURE_TENANT_ID` and `AZURE_CLIENT_SECRET` (all required)
	/// and the optional `AZURE_AUTHORITY_HOST` through `lookup`.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let required = |var: &'static str| {
			lookup(var)
				.filter(|v| !v.is_empty())
				.ok_or(Error::MissingEnvVar(var))
		};
		Ok(Self {
			client_id: required("AZURE_CLIENT_ID")?,
			tenant_id: required("AZURE_TENANT_ID")?,
			client_secret: required("AZURE_CLIENT_SECRET")?,
			authority_host: lookup("AZURE_AUTHORITY_HOST")
				.filter(|v| !v.is_empty())
				.unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
		})
	}

	/// [`Self::from_lookup`] over the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|var| std::env::var(var).ok())
	}
}

/// Tokens from the OAuth client credentials flow of a service principal.
#[derive(Debug, Clone)]
pub struct ServicePrincipalCredential {
	config: ServicePrincipalConfig,
	http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
}

#[derive(Deserialize)]
struct TokenError {
	error: String,
	#[serde(default)]
	error_description: String,
}

impl ServicePrincipalCredential {
	/// A credential for `config` with a default HTTP client.
	pub fn new(config: ServicePrincipalConfig) -> Self {
		Self::with_client(config, reqwest::Client::new())
	}

	/// A credential for `config` sending token requests through `http`.
	pub fn with_client(config: ServicePrincipalConfig, http: reqwest::Client) -> Self {
		Self { config, http }
	}
}

#[async_trait]
impl CredentialProvider for ServicePrincipalCredential {
	fn name(&self) -> &'static str {
		"service-principal"
	}

	async fn token(&self, resource: &str) -> Result<AccessToken> {
		let url = format!(
			"{}/{}/oauth2/v2.0/token",
			self.config.authority_host.trim_end_matches('/'),
			self.config.tenant_id
		);
		let scope = format!("{}/.default", resource.trim_end_matches('/'));
		let response = self
			.http
			.post(&url)
			.form(&[
				("grant_type", "client_credentials"),
				("client_id", self.config.client_id.as_str()),
				("client_secret", self.config.client_secret.as_str()),
				("scope", scope.as_str()),
			])
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			let message = match serde_json::from_str::<TokenError>(&body) {
				Ok(err) => format!("{}: {}", err.error, err.error_description),
				Err(_) => body,
			};
			return Err(Error::Credential(format!(
				"token request returned {status}: {message}"
			)));
		}
		let token: TokenResponse = response.json().await?;
		Ok(AccessToken {
			token: token.access_token,
		})
	}
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A service principal configured through `AZURE_*` environment variables.
///
/// The variables are read on every token request, never at construction.
#[derive(Clone)]
pub struct EnvironmentCredential {
	lookup: EnvLookup,
	http: reqwest::Client,
}

impl Default for EnvironmentCredential {
	fn default() -> Self {
		Self::with_lookup(|var| std::env::var(var).ok())
	}
}

impl fmt::Debug for EnvironmentCredential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EnvironmentCredential").finish_non_exhaustive()
	}
}

impl EnvironmentCredential {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self::default()
	}

	/// Read variables through `lookup` instead of the process environment.
	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Arc::new(lookup),
			http: reqwest::Client::new(),
		}
	}
}

#[async_trait]
impl CredentialProvider for EnvironmentCredential {
	fn name(&self) -> &'static str {
		"environment"
	}

	async fn token(&self, resource: &str) -> Result<AccessToken> {
		let config = ServicePrincipalConfig::from_lookup(|var| (self.lookup)(var))?;
		ServicePrincipalCredential::with_client(config, self.http.clone())
			.token(resource)
			.await
	}
}

/// Providers tried in order until one produces a token.
pub struct CredentialChain {
	providers: Vec<Box<dyn CredentialProvider>>,
}

impl fmt::Debug for CredentialChain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list()
			.entries(self.providers.iter().map(|p| p.name()))
			.finish()
	}
}

impl Default for CredentialChain {
	/// The Azure CLI session, then an environment service principal.
	fn default() -> Self {
		Self::new(vec![
			Box::new(AzureCliCredential::new()),
			Box::new(EnvironmentCredential::new()),
		])
	}
}

impl CredentialChain {
	/// A chain trying `providers` in order.
	pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
		Self { providers }
	}
}

#[async_trait]
impl CredentialProvider for CredentialChain {
	fn name(&self) -> &'static str {
		"chain"
	}

	/// The first token obtained, or every provider's failure.
	async fn token(&self, resource: &str) -> Result<AccessToken> {
		let mut failures = ProviderFailures::default();
		for provider in &self.providers {
			match provider.token(resource).await {
				Ok(token) => {
					debug!(provider = provider.name(), "obtained access token");
					return Ok(token);
				},
				Err(error) => {
					debug!(provider = provider.name(), %error, "credential provider failed");
					failures.0.push(ProviderFailure {
						provider: provider.name(),
						error,
					});
				},
			}
		}
		warn!(%failures, "no credential provider produced a token");
		Err(Error::Unauthenticated(failures))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::ErrorKind;
	use wiremock::matchers::{body_string_contains, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	struct Fixed {
		name: &'static str,
		token: Option<&'static str>,
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl CredentialProvider for Fixed {
		fn name(&self) -> &'static str {
			self.name
		}

		async fn token(&self, _resource: &str) -> Result<AccessToken> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			match self.token {
				Some(token) => Ok(AccessToken {
					token: token.into(),
				}),
				None => Err(Error::Credential(format!("{} unavailable", self.name))),
			}
		}
	}

	fn fixed(name: &'static str, token: Option<&'static str>) -> (Box<Fixed>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let provider = Fixed {
			name,
			token,
			calls: calls.clone(),
		};
		(Box::new(provider), calls)
	}

	#[tokio::test]
	async fn first_success_wins() {
		let (a, a_calls) = fixed("a", None);
		let (b, b_calls) = fixed("b", Some("tok-b"));
		let (c, c_calls) = fixed("c", Some("tok-c"));
		let chain = CredentialChain::new(vec![a, b, c]);

		let token = chain.token("https://vault.azure.net").await.unwrap();
		assert_eq!(token.token, "tok-b");
		assert_eq!(a_calls.load(Ordering::SeqCst), 1);
		assert_eq!(b_calls.load(Ordering::SeqCst), 1);
		assert_eq!(c_calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn all_failures_reported() {
		let (a, _) = fixed("a", None);
		let (b, _) = fixed("b", None);
		let chain = CredentialChain::new(vec![a, b]);

		let err = chain.token("https://vault.azure.net").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthenticated);
		let msg = err.to_string();
		assert!(msg.contains("a: a unavailable"), "{msg}");
		assert!(msg.contains("b: b unavailable"), "{msg}");
	}

	#[tokio::test]
	async fn empty_chain_is_unauthenticated() {
		let err = CredentialChain::new(vec![]).token("r").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthenticated);
	}

	#[tokio::test]
	async fn missing_cli_fails() {
		let cli = AzureCliCredential::with_program("/nonexistent/az-for-tests");
		let err = cli.token("https://vault.azure.net").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Io);
	}

	#[test]
	fn service_principal_requires_all_vars() {
		let vars = HashMap::from([
			("AZURE_CLIENT_ID", "id"),
			("AZURE_TENANT_ID", "tenant"),
		]);
		let err = ServicePrincipalConfig::from_lookup(|v| vars.get(v).map(|s| s.to_string()))
			.unwrap_err();
		assert!(matches!(err, Error::MissingEnvVar("AZURE_CLIENT_SECRET")));
	}

	#[tokio::test]
	async fn environment_credential_reads_lazily() -> Result<()> {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/tenant-1/oauth2/v2.0/token"))
			.and(body_string_contains("grant_type=client_credentials"))
			.and(body_string_contains("client_id=id-1"))
			.and(body_string_contains("scope=https%3A%2F%2Fvault.azure.net%2F.default"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"token_type": "Bearer",
				"expires_in": 3599,
				"access_token": "sp-token",
			})))
			.expect(1)
			.mount(&server)
			.await;

		let authority = server.uri();
		let env = EnvironmentCredential::with_lookup(move |var| match var {
			"AZURE_CLIENT_ID" => Some("id-1".into()),
			"AZURE_TENANT_ID" => Some("tenant-1".into()),
			"AZURE_CLIENT_SECRET" => Some("secret".into()),
			"AZURE_AUTHORITY_HOST" => Some(authority.clone()),
			_ => None,
		});
		let token = env.token("https://vault.azure.net").await?;
		assert_eq!(token.token, "sp-token");
		Ok(())
	}

	#[tokio::test]
	async fn service_principal_error_surfaced() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
				"error": "invalid_client",
				"error_description": "AADSTS7000215: Invalid client secret provided.",
			})))
			.mount(&server)
			.await;

		let sp = ServicePrincipalCredential::new(ServicePrincipalConfig {
			client_id: "id".into(),
			tenant_id: "tenant".into(),
			client_secret: "bad".into(),
			authority_host: server.uri(),
		});
		let err = sp.token("https://vault.azure.net").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Credential);
		assert!(err.to_string().contains("invalid_client"));
	}
}
