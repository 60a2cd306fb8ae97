//! Sync configuration

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::{error::ConfigError, slot::AppInstanceId};

/// Capacity of the change notification channel when none is configured.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Authorization sent with every propagation, rendered as `<token_type> <access_token>`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
	pub token_type: String,
	pub access_token: String,
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials")
			.field("token_type", &self.token_type)
			.field("access_token", &"<redacted>")
			.finish()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
	/// Root every preference endpoint is resolved against
	pub api_url: String,

	#[serde(default)]
	pub credentials: Option<Credentials>,

	/// Namespaces this instance's locks; a fresh one is generated when absent
	#[serde(default)]
	pub app_instance_id: AppInstanceId,

	/// How many unread change notifications a lagging subscriber may fall behind
	#[serde(default = "default_event_capacity")]
	pub event_capacity: usize,
}

const fn default_event_capacity() -> usize {
	DEFAULT_EVENT_CAPACITY
}

impl SyncConfig {
	pub fn new(api_url: impl Into<String>) -> Self {
		Self {
			api_url: api_url.into(),
			credentials: None,
			app_instance_id: AppInstanceId::new(),
			event_capacity: DEFAULT_EVENT_CAPACITY,
		}
	}

	#[must_use]
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.credentials = Some(credentials);
		self
	}

	/// Load configuration from a JSON file
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		info!("Loading preferences sync config from {}", path.display());
		let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.into(),
			source,
		})?;

		Self::from_json(&json)
	}

	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_json::from_str(json)?;

		// fail on a bad url at load time rather than on the first propagation
		config.api_url()?;

		Ok(config)
	}

	pub fn api_url(&self) -> Result<Url, ConfigError> {
		let url = Url::parse(&self.api_url).map_err(|source| ConfigError::ApiUrl {
			url: self.api_url.clone(),
			source,
		})?;

		if url.cannot_be_a_base() {
			return Err(ConfigError::ApiUrlNotBase(self.api_url.clone()));
		}

		Ok(url)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn minimal_config_gets_defaults() {
		let a = SyncConfig::from_json(r#"{ "apiUrl": "https://api.example.com/" }"#)
			.expect("valid config");
		let b = SyncConfig::from_json(r#"{ "apiUrl": "https://api.example.com/" }"#)
			.expect("valid config");

		assert_eq!(a.event_capacity, DEFAULT_EVENT_CAPACITY);
		assert!(a.credentials.is_none());
		assert_ne!(a.app_instance_id, b.app_instance_id);
	}

	#[test]
	fn full_config_from_file() {
		let mut file = tempfile::NamedTempFile::new().expect("temp file");
		write!(
			file,
			r#"{{
				"apiUrl": "https://api.example.com/v2/",
				"credentials": {{ "tokenType": "Bearer", "accessToken": "secret" }},
				"appInstanceId": "67e55044-10b1-426f-9247-bb680e5fe0c8",
				"eventCapacity": 16
			}}"#
		)
		.expect("write config");

		let config = SyncConfig::load_from(file.path()).expect("valid config");

		assert_eq!(config.event_capacity, 16);
		assert_eq!(
			config.app_instance_id.to_string(),
			"67e5504410b1426f9247bb680e5fe0c8"
		);
		assert_eq!(
			config.credentials.as_ref().map(|c| c.token_type.as_str()),
			Some("Bearer")
		);
		assert!(!format!("{:?}", config.credentials).contains("secret"));
	}

	#[test]
	fn invalid_configs() {
		assert!(matches!(
			SyncConfig::from_json(r#"{ "apiUrl": "not a url" }"#),
			Err(ConfigError::ApiUrl { .. })
		));
		assert!(matches!(
			SyncConfig::from_json(r#"{ "apiUrl": "data:text/plain,hi" }"#),
			Err(ConfigError::ApiUrlNotBase(_))
		));
		assert!(matches!(
			SyncConfig::from_json("{}"),
			Err(ConfigError::Parse(_))
		));
		assert!(matches!(
			SyncConfig::load_from("/definitely/not/here.json"),
			Err(ConfigError::Read { .. })
		));
	}
}
