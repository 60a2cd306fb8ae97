use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::Value;

use crate::error::Error;

type NormalizeFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Validation and transform for a single preference key.
///
/// Normalizers must be pure: the store calls them before touching any state, so a
/// rejection leaves everything as it was.
#[derive(Clone)]
pub struct Rule {
	normalize: Arc<NormalizeFn>,
	default: Option<Value>,
}

impl fmt::Debug for Rule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Rule")
			.field("default", &self.default)
			.finish_non_exhaustive()
	}
}

impl Rule {
	pub fn custom(
		normalize: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
	) -> Self {
		Self {
			normalize: Arc::new(normalize),
			default: None,
		}
	}

	/// Accepts any non-null value as is.
	#[must_use]
	pub fn any() -> Self {
		Self::custom(|value| Ok(value.clone()))
	}

	#[must_use]
	pub fn boolean() -> Self {
		Self::custom(|value| match value {
			Value::Bool(_) => Ok(value.clone()),
			Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
			other => Err(format!("expected a boolean, got {other}")),
		})
	}

	#[must_use]
	pub fn string() -> Self {
		Self::custom(|value| match value {
			Value::String(_) => Ok(value.clone()),
			other => Err(format!("expected a string, got {other}")),
		})
	}

	/// Accepts one of `allowed` string values.
	pub fn one_of<I, S>(allowed: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let allowed = allowed.into_iter().map(Into::into).collect::<Vec<String>>();

		Self::custom(move |value| match value {
			Value::String(s) if allowed.contains(s) => Ok(value.clone()),
			other => Err(format!("expected one of {allowed:?}, got {other}")),
		})
	}

	/// Accepts integers within `min..=max`; integral numbers written as strings are
	/// converted.
	#[must_use]
	pub fn integer_range(min: i64, max: i64) -> Self {
		Self::custom(move |value| {
			let parsed = match value {
				Value::Number(n) => n.as_i64(),
				Value::String(s) => s.trim().parse::<i64>().ok(),
				_ => None,
			};

			match parsed {
				Some(n) if (min..=max).contains(&n) => Ok(Value::from(n)),
				Some(n) => Err(format!("{n} is outside of {min}..={max}")),
				None => Err(format!("expected an integer, got {value}")),
			}
		})
	}

	/// Value reported by reads while the key is absent.
	#[must_use]
	pub fn with_default(mut self, default: impl Into<Value>) -> Self {
		self.default = Some(default.into());
		self
	}
}

/// Maps preference key names to the [`Rule`] their values must satisfy. Keys without a
/// rule can be neither written nor deleted.
#[derive(Debug, Clone, Default)]
pub struct NormalizerRegistry {
	rules: HashMap<String, Rule>,
}

impl NormalizerRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, key: impl Into<String>, rule: Rule) -> Self {
		self.register(key, rule);
		self
	}

	pub fn register(&mut self, key: impl Into<String>, rule: Rule) -> Option<Rule> {
		self.rules.insert(key.into(), rule)
	}

	#[must_use]
	pub fn is_registered(&self, key: &str) -> bool {
		self.rules.contains_key(key)
	}

	pub fn require_registered(&self, key: &str) -> Result<(), Error> {
		self.rule(key).map(|_| ())
	}

	pub fn normalize(&self, key: &str, value: &Value) -> Result<Value, Error> {
		let rule = self.rule(key)?;

		if value.is_null() {
			return Err(Error::InvalidValue {
				key: key.to_string(),
				reason: "null is reserved for deletion".to_string(),
			});
		}

		(rule.normalize)(value).map_err(|reason| Error::InvalidValue {
			key: key.to_string(),
			reason,
		})
	}

	/// Reads `key` out of `container`, falling back to the registered default when absent.
	/// Unregistered keys are returned untouched.
	#[must_use]
	pub fn read_transform(&self, container: &HashMap<String, Value>, key: &str) -> Option<Value> {
		container.get(key).cloned().or_else(|| {
			self.rules
				.get(key)
				.and_then(|rule| rule.default.clone())
		})
	}

	fn rule(&self, key: &str) -> Result<&Rule, Error> {
		self.rules
			.get(key)
			.ok_or_else(|| Error::UnregisteredKey(key.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn registry() -> NormalizerRegistry {
		NormalizerRegistry::new()
			.with("sortOrder", Rule::one_of(["asc", "desc"]).with_default("asc"))
			.with("compact", Rule::boolean())
			.with("pageSize", Rule::integer_range(1, 500))
			.with("note", Rule::string())
	}

	#[test]
	fn unregistered_keys_are_rejected() {
		let registry = registry();

		assert!(matches!(
			registry.normalize("nope", &json!(1)),
			Err(Error::UnregisteredKey(key)) if key == "nope"
		));
		assert!(matches!(
			registry.require_registered("nope"),
			Err(Error::UnregisteredKey(_))
		));
		assert!(registry.require_registered("compact").is_ok());
	}

	#[test]
	fn rules_normalize_values() {
		let registry = registry();

		assert_eq!(registry.normalize("compact", &json!("true")).ok(), Some(json!(true)));
		assert_eq!(registry.normalize("pageSize", &json!("25")).ok(), Some(json!(25)));
		assert_eq!(registry.normalize("sortOrder", &json!("desc")).ok(), Some(json!("desc")));

		for (key, bad) in [
			("compact", json!(3)),
			("pageSize", json!(0)),
			("pageSize", json!("many")),
			("sortOrder", json!("sideways")),
			("note", json!(null)),
		] {
			let err = registry.normalize(key, &bad).expect_err("value must be rejected");
			assert!(err.is_validation());
		}
	}

	#[test]
	fn read_transform_supplies_defaults_without_mutating() {
		let registry = registry();
		let mut container = HashMap::new();

		assert_eq!(registry.read_transform(&container, "sortOrder"), Some(json!("asc")));
		assert_eq!(registry.read_transform(&container, "compact"), None);
		assert!(container.is_empty());

		container.insert("sortOrder".to_string(), json!("desc"));
		assert_eq!(registry.read_transform(&container, "sortOrder"), Some(json!("desc")));
	}
}
