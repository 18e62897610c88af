use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CertificateImport, SecretBundle, SecretStore};
use crate::auth::{CredentialChain, CredentialProvider};
use crate::error::{Error, Result, ResultExt};
use crate::locator::SecretLocator;

/// REST API version spoken by [`KeyVaultClient`].
pub const KEY_VAULT_API_VERSION: &str = "7.4";
/// Token audience of Key Vault.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

/// [`SecretStore`] backed by the Azure Key Vault REST API.
#[derive(Clone)]
pub struct KeyVaultClient {
	http: reqwest::Client,
	credential: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for KeyVaultClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyVaultClient")
			.field("credential", &self.credential.name())
			.finish_non_exhaustive()
	}
}

impl Default for KeyVaultClient {
	fn default() -> Self {
		Self::new(CredentialChain::default())
	}
}

impl KeyVaultClient {
	/// A client authenticating with `credential`.
	pub fn new(credential: impl CredentialProvider + 'static) -> Self {
		Self::with_client(reqwest::Client::new(), Arc::new(credential))
	}

	/// A client sending requests through `http`.
	pub fn with_client(http: reqwest::Client, credential: Arc<dyn CredentialProvider>) -> Self {
		Self { http, credential }
	}

	async fn get(&self, url: String) -> Result<Response> {
		let token = self
			.credential
			.token(KEY_VAULT_RESOURCE)
			.await
			.context("failed to obtain a Key Vault access token")?;
		debug!(%url, "GET");
		Ok(self
			.http
			.get(url)
			.query(&[("api-version", KEY_VAULT_API_VERSION)])
			.bearer_auth(token.token)
			.send()
			.await?)
	}
}

fn url(locator: &SecretLocator, segments: &[&str]) -> String {
	let mut url = locator.base_url.trim_end_matches('/').to_string();
	for segment in segments {
		url.push('/');
		url.push_str(segment);
	}
	url
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretResponse {
	value: String,
	#[serde(default)]
	content_type: Option<String>,
}

#[derive(Serialize)]
struct ImportRequest<'a> {
	value: &'a str,
	pwd: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
	error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
	code: String,
	message: String,
}

/// Turn a non-success response into [`Error::Store`].
async fn store_error(response: Response) -> Error {
	let status = response.status();
	let body = response.text().await.unwrap_or_default();
	let message = match serde_json::from_str::<ErrorResponse>(&body) {
		Ok(ErrorResponse { error }) => format!("{}: {}", error.code, error.message),
		Err(_) => body,
	};
	Error::Store {
		status: status.as_u16(),
		message,
	}
}

#[async_trait]
impl SecretStore for KeyVaultClient {
	async fn fetch_secret(&self, locator: &SecretLocator) -> Result<SecretBundle> {
		let mut segments = vec!["secrets", locator.name.as_str()];
		if let Some(version) = &locator.version {
			segments.push(version.as_str());
		}
		let response = self.get(url(locator, &segments)).await?;
		match response.status() {
			StatusCode::NOT_FOUND => Err(Error::NotFound(format!("secret {}", locator.name))),
			status if status.is_success() => {
				let secret: SecretResponse = response.json().await?;
				Ok(SecretBundle {
					value: secret.value,
					content_type: secret.content_type,
				})
			},
			_ => Err(store_error(response).await),
		}
	}

	async fn certificate_exists(&self, locator: &SecretLocator) -> Result<bool> {
		let response = self
			.get(url(locator, &["certificates", locator.name.as_str()]))
			.await?;
		match response.status() {
			StatusCode::NOT_FOUND => Ok(false),
			status if status.is_success() => Ok(true),
			_ => Err(store_error(response).await),
		}
	}

	async fn import_certificate(
		&self,
		locator: &SecretLocator,
		import: &CertificateImport,
	) -> Result<()> {
		let token = self
			.credential
			.token(KEY_VAULT_RESOURCE)
			.await
			.context("failed to obtain a Key Vault access token")?;
		let url = url(locator, &["certificates", locator.name.as_str(), "import"]);
		debug!(%url, "POST");
		let response = self
			.http
			.post(url)
			.query(&[("api-version", KEY_VAULT_API_VERSION)])
			.bearer_auth(token.token)
			.json(&ImportRequest {
				value: &import.value,
				pwd: &import.password,
			})
			.send()
			.await?;
		if !response.status().is_success() {
			return Err(store_error(response).await);
		}
		Ok(())
	}
}
