//! Transport abstraction for mirroring preference mutations to the backend.
//!
//! The propagation engine only depends on [`Transport`]; [`HttpTransport`] is the reqwest
//! implementation talking to the real API, tests script their own.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{error::PropagationFailure, slot::Endpoint, slot::Slot};

mod http;

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
	Upsert,
	Delete,
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Upsert => write!(f, "PUT"),
			Self::Delete => write!(f, "DELETE"),
		}
	}
}

/// One outbound propagation. `body` is the bare preference value, transports wrap it in
/// whatever envelope the backend expects; it is always `None` for deletions.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub method: Method,
	pub target: Endpoint,
	pub body: Option<Value>,
}

impl Request {
	#[must_use]
	pub fn upsert(slot: &Slot, value: Value) -> Self {
		Self {
			method: Method::Upsert,
			target: slot.endpoint(),
			body: Some(value),
		}
	}

	#[must_use]
	pub fn delete(slot: &Slot) -> Self {
		Self {
			method: Method::Delete,
			target: slot.endpoint(),
			body: None,
		}
	}
}

/// How a transport call settled. The engine treats every variant the same way: it
/// discards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Http(u16),
	Network(String),
	Cancelled,
}

impl Outcome {
	#[must_use]
	pub fn into_failure(self, slot: Slot) -> Option<PropagationFailure> {
		match self {
			Self::Success => None,
			Self::Http(status) => Some(PropagationFailure::Http { slot, status }),
			Self::Network(message) => Some(PropagationFailure::Network { slot, message }),
			Self::Cancelled => Some(PropagationFailure::Cancelled { slot }),
		}
	}
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Performs `request`, abandoning it promptly once `cancel` fires.
	///
	/// Credentials are the implementation's concern. Cancelling only stops local handling
	/// of the response, the backend may still apply the request.
	async fn send(&self, request: Request, cancel: CancellationToken) -> Outcome;
}
