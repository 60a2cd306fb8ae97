use std::path::Path;

use thiserror::Error;

use crate::slot::Slot;

#[derive(Debug, Error)]
pub enum Error {
	#[error("unregistered preference key: '{0}'")]
	UnregisteredKey(String),
	#[error("invalid value for preference '{key}': {reason}")]
	InvalidValue { key: String, reason: String },
	#[error("invalid project id <raw='{0}'>: expected a positive integer")]
	Identifier(String),
	#[error(
		"unsupported operation on project {0}: replacing or removing a whole project's \
		preferences is not allowed, set or delete individual keys instead"
	)]
	UnsupportedOperation(u64),
	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl Error {
	/// Both unregistered keys and rejected values are validation failures.
	#[must_use]
	pub const fn is_validation(&self) -> bool {
		matches!(self, Self::UnregisteredKey(_) | Self::InvalidValue { .. })
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read sync config file; path: '{}'", .path.display())]
	Read {
		path: Box<Path>,
		#[source]
		source: std::io::Error,
	},
	#[error("malformed sync config")]
	Parse(#[from] serde_json::Error),
	#[error("invalid api url '{url}'")]
	ApiUrl {
		url: String,
		#[source]
		source: url::ParseError,
	},
	#[error("api url '{0}' cannot be used as a base for preference endpoints")]
	ApiUrlNotBase(String),
}

/// Why a propagation for `slot` did not land on the backend. Never surfaced to callers,
/// only reported through tracing.
#[derive(Debug, Error)]
pub enum PropagationFailure {
	#[error("backend rejected {slot} with status {status}")]
	Http { slot: Slot, status: u16 },
	#[error("network failure while propagating {slot}: {message}")]
	Network { slot: Slot, message: String },
	#[error("propagation of {slot} was superseded")]
	Cancelled { slot: Slot },
}
