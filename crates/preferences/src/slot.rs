//! Addressing for preference values: which container a key lives in, which lock serializes
//! its propagation and which backend endpoint mirrors it.

use std::{fmt, num::NonZeroU64, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// Identifier of a project, always a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(NonZeroU64);

impl ProjectId {
	#[must_use]
	pub const fn get(self) -> u64 {
		self.0.get()
	}

	// u64::MAX as f64 rounds up, so the upper bound is exclusive
	#[allow(
		clippy::cast_possible_truncation,
		clippy::cast_sign_loss,
		clippy::cast_precision_loss
	)]
	fn from_integral_f64(raw: f64) -> Option<Self> {
		if raw.is_finite() && raw.fract() == 0.0 && raw >= 1.0 && raw < u64::MAX as f64 {
			NonZeroU64::new(raw as u64).map(Self)
		} else {
			None
		}
	}
}

impl fmt::Display for ProjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ProjectId {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let trimmed = raw.trim();

		let parsed = if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
			trimmed.parse::<u64>().ok().and_then(NonZeroU64::new).map(Self)
		} else {
			trimmed.parse::<f64>().ok().and_then(Self::from_integral_f64)
		};

		parsed.ok_or_else(|| Error::Identifier(raw.to_string()))
	}
}

macro_rules! impl_try_from_integer {
	($($int:ty),+ $(,)?) => {
		$(
			impl TryFrom<$int> for ProjectId {
				type Error = Error;

				fn try_from(raw: $int) -> Result<Self, Self::Error> {
					u64::try_from(raw)
						.ok()
						.and_then(NonZeroU64::new)
						.map(Self)
						.ok_or_else(|| Error::Identifier(raw.to_string()))
				}
			}
		)+
	};
}

impl_try_from_integer!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl TryFrom<NonZeroU64> for ProjectId {
	type Error = Error;

	fn try_from(raw: NonZeroU64) -> Result<Self, Self::Error> {
		Ok(Self(raw))
	}
}

impl TryFrom<&str> for ProjectId {
	type Error = Error;

	fn try_from(raw: &str) -> Result<Self, Self::Error> {
		raw.parse()
	}
}

impl TryFrom<String> for ProjectId {
	type Error = Error;

	fn try_from(raw: String) -> Result<Self, Self::Error> {
		raw.parse()
	}
}

impl TryFrom<&Value> for ProjectId {
	type Error = Error;

	fn try_from(raw: &Value) -> Result<Self, Self::Error> {
		match raw {
			Value::Number(number) => number
				.as_u64()
				.and_then(NonZeroU64::new)
				.map(Self)
				.or_else(|| number.as_f64().and_then(Self::from_integral_f64))
				.ok_or_else(|| Error::Identifier(number.to_string())),
			Value::String(s) => s.parse(),
			other => Err(Error::Identifier(other.to_string())),
		}
	}
}

/// Which container a preference lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
	Site,
	Project(ProjectId),
}

impl Scope {
	#[must_use]
	pub const fn project_id(self) -> Option<ProjectId> {
		match self {
			Self::Site => None,
			Self::Project(id) => Some(id),
		}
	}
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Site => write!(f, "site"),
			Self::Project(id) => write!(f, "project:{id}"),
		}
	}
}

/// Identifies one running client instance. Lock names are namespaced with it, so
/// instances sharing a lock table never contend for each other's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppInstanceId(Uuid);

impl AppInstanceId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for AppInstanceId {
	fn default() -> Self {
		Self::new()
	}
}

impl From<Uuid> for AppInstanceId {
	fn from(id: Uuid) -> Self {
		Self(id)
	}
}

impl fmt::Display for AppInstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.as_simple())
	}
}

/// The unit of propagation serialization: a scope plus a key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
	pub scope: Scope,
	pub key: String,
}

impl Slot {
	pub fn new(scope: Scope, key: impl Into<String>) -> Self {
		Self {
			scope,
			key: key.into(),
		}
	}

	pub fn site(key: impl Into<String>) -> Self {
		Self::new(Scope::Site, key)
	}

	pub fn project(id: ProjectId, key: impl Into<String>) -> Self {
		Self::new(Scope::Project(id), key)
	}

	/// Name of the lock guarding this slot's in-flight request for the given instance.
	#[must_use]
	pub fn lock_name(&self, app: AppInstanceId) -> String {
		format!("{}:slot:{self}", coordination_lock_name(app))
	}

	#[must_use]
	pub fn endpoint(&self) -> Endpoint {
		let segments = match self.scope {
			Scope::Site => vec!["siteKey".to_string(), self.key.clone()],
			Scope::Project(id) => vec![
				"projects".to_string(),
				id.to_string(),
				"key".to_string(),
				self.key.clone(),
			],
		};

		Endpoint { segments }
	}
}

impl fmt::Display for Slot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.scope, self.key)
	}
}

/// Name of the per-instance lock bounding the propagation decision.
#[must_use]
pub fn coordination_lock_name(app: AppInstanceId) -> String {
	format!("sd-preferences:{app}")
}

/// Backend location of a slot, kept as raw path segments so transports can encode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
	segments: Vec<String>,
}

impl Endpoint {
	#[must_use]
	pub fn segments(&self) -> &[String] {
		&self.segments
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.segments.join("/"))
	}
}
