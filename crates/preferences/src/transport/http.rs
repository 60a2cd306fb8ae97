use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::{
	config::{Credentials, SyncConfig},
	error::ConfigError,
};

use super::{Method, Outcome, Request, Transport};

trait WithAuth {
	fn with_auth(self, credentials: Option<&Credentials>) -> Self;
}

impl WithAuth for reqwest::RequestBuilder {
	fn with_auth(self, credentials: Option<&Credentials>) -> Self {
		match credentials {
			Some(credentials) => self.header(
				"authorization",
				format!("{} {}", credentials.token_type, credentials.access_token),
			),
			None => self,
		}
	}
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: reqwest::Client,
	api_url: Url,
	credentials: Option<Credentials>,
}

impl HttpTransport {
	pub fn new(
		client: reqwest::Client,
		api_url: Url,
		credentials: Option<Credentials>,
	) -> Result<Self, ConfigError> {
		if api_url.cannot_be_a_base() {
			return Err(ConfigError::ApiUrlNotBase(api_url.to_string()));
		}

		Ok(Self {
			client,
			api_url,
			credentials,
		})
	}

	pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
		Self::new(
			reqwest::Client::new(),
			config.api_url()?,
			config.credentials.clone(),
		)
	}

	/// Appends the endpoint's segments to the api url, percent-encoding each one.
	#[must_use]
	pub fn url_for(&self, request: &Request) -> Url {
		let mut url = self.api_url.clone();

		if let Ok(mut segments) = url.path_segments_mut() {
			segments
				.pop_if_empty()
				.extend(request.target.segments().iter().map(String::as_str));
		}

		url
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(&self, request: Request, cancel: CancellationToken) -> Outcome {
		let url = self.url_for(&request);

		let builder = match request.method {
			Method::Upsert => self
				.client
				.put(url)
				.json(&json!({ "value": request.body })),
			Method::Delete => self.client.delete(url),
		}
		.with_auth(self.credentials.as_ref());

		tokio::select! {
			biased;

			() = cancel.cancelled() => Outcome::Cancelled,
			res = builder.send() => match res.and_then(reqwest::Response::error_for_status) {
				Ok(response) => {
					trace!(status = %response.status(), "Preference propagated");
					Outcome::Success
				}
				Err(e) => e.status().map_or_else(
					|| Outcome::Network(e.to_string()),
					|status| Outcome::Http(status.as_u16()),
				),
			},
		}
	}
}
