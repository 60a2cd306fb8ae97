use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{
	config::{SyncConfig, DEFAULT_EVENT_CAPACITY},
	engine::{Mutation, PropagationEngine},
	error::Error,
	locks::NamedLocks,
	registry::NormalizerRegistry,
	slot::{ProjectId, Scope, Slot},
	transport::HttpTransport,
};

/// Server provided preferences the store starts a session from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
	#[serde(default)]
	pub site: HashMap<String, Value>,
	/// Keyed by project id as the server writes it, usually a decimal string
	#[serde(default)]
	pub projects: HashMap<String, HashMap<String, Value>>,
}

/// Emitted after every local mutation, before it is propagated. `value` is `None` when
/// the key was deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceChange {
	pub slot: Slot,
	pub value: Option<Value>,
}

#[derive(Debug)]
struct Shared {
	registry: NormalizerRegistry,
	engine: PropagationEngine,
	changes_tx: broadcast::Sender<PreferenceChange>,
}

impl Shared {
	/// Keeps only the entries that pass normalization.
	fn normalize_all(&self, scope: Scope, raw: HashMap<String, Value>) -> HashMap<String, Value> {
		raw.into_iter()
			.filter_map(|(key, value)| match self.registry.normalize(&key, &value) {
				Ok(normalized) => Some((key, normalized)),
				Err(e) => {
					warn!(%scope, "Skipping preference from snapshot: {e}");
					None
				}
			})
			.collect()
	}

	/// Normalized value to store, or `None` when the write deletes the key.
	fn validate(&self, key: &str, value: &Value) -> Result<Option<Value>, Error> {
		if value.is_null() {
			self.registry.require_registered(key)?;
			Ok(None)
		} else {
			self.registry.normalize(key, value).map(Some)
		}
	}

	fn notify(&self, slot: &Slot, value: Option<Value>) {
		if self
			.changes_tx
			.send(PreferenceChange {
				slot: slot.clone(),
				value,
			})
			.is_err()
		{
			trace!(%slot, "No subscribers for preference change");
		}
	}
}

/// Preferences of one scope: the site, or a single project.
pub struct PreferenceMap {
	scope: Scope,
	values: RwLock<HashMap<String, Value>>,
	shared: Arc<Shared>,
}

impl fmt::Debug for PreferenceMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PreferenceMap")
			.field("scope", &self.scope)
			.field("values", &*self.values.read())
			.finish_non_exhaustive()
	}
}

impl PreferenceMap {
	fn new(scope: Scope, values: HashMap<String, Value>, shared: Arc<Shared>) -> Self {
		Self {
			scope,
			values: RwLock::new(values),
			shared,
		}
	}

	#[must_use]
	pub const fn scope(&self) -> Scope {
		self.scope
	}

	/// Current value of `key`, or its registered default when absent.
	#[must_use]
	pub fn get(&self, key: &str) -> Option<Value> {
		self.shared
			.registry
			.read_transform(&self.values.read(), key)
	}

	/// Whether `key` holds a value of its own, defaults aside.
	#[must_use]
	pub fn contains(&self, key: &str) -> bool {
		self.values.read().contains_key(key)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.values.read().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.values.read().is_empty()
	}

	/// Copy of the stored values, without defaults.
	#[must_use]
	pub fn values(&self) -> HashMap<String, Value> {
		self.values.read().clone()
	}

	/// Normalizes and stores `value`, then hands it off for propagation.
	///
	/// Returns as soon as the value is stored locally. Setting `null` deletes the key.
	pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
		let change = self.shared.validate(key, &value.into())?;
		self.apply(key, change);

		Ok(())
	}

	/// Removes `key` and hands the deletion off for propagation, even if it was absent.
	pub fn delete(&self, key: &str) -> Result<(), Error> {
		self.shared.registry.require_registered(key)?;
		self.apply(key, None);

		Ok(())
	}

	/// Stores an already validated change, `None` removing the key.
	fn apply(&self, key: &str, change: Option<Value>) {
		let slot = Slot::new(self.scope, key);

		// handoffs must follow the order in which values were stored
		let mut values = self.values.write();
		let mutation = match &change {
			Some(value) => {
				values.insert(key.to_string(), value.clone());
				Mutation::Upsert(value.clone())
			}
			None => {
				values.remove(key);
				Mutation::Delete
			}
		};
		self.shared.notify(&slot, change);
		self.shared.engine.propagate(slot, mutation);
	}
}

/// Session wide preference store: site preferences plus a lazily grown set of
/// per-project preferences, mirrored to the backend on a best effort basis.
#[derive(Debug)]
pub struct PreferenceStore {
	shared: Arc<Shared>,
	site: Arc<PreferenceMap>,
	projects: RwLock<HashMap<ProjectId, Arc<PreferenceMap>>>,
}

impl PreferenceStore {
	/// Must be called from within a Tokio runtime, it starts the engine's driver.
	pub fn connect(
		config: &SyncConfig,
		registry: NormalizerRegistry,
		snapshot: Snapshot,
	) -> Result<Self, Error> {
		let transport = HttpTransport::from_config(config)?;
		let engine = PropagationEngine::new(
			config.app_instance_id,
			Arc::new(NamedLocks::new()),
			Arc::new(transport),
		);

		Ok(Self::with_event_capacity(
			registry,
			engine,
			snapshot,
			config.event_capacity,
		))
	}

	#[must_use]
	pub fn new(registry: NormalizerRegistry, engine: PropagationEngine, snapshot: Snapshot) -> Self {
		Self::with_event_capacity(registry, engine, snapshot, DEFAULT_EVENT_CAPACITY)
	}

	#[must_use]
	pub fn with_event_capacity(
		registry: NormalizerRegistry,
		engine: PropagationEngine,
		snapshot: Snapshot,
		event_capacity: usize,
	) -> Self {
		let (changes_tx, _) = broadcast::channel(event_capacity.max(1));
		let shared = Arc::new(Shared {
			registry,
			engine,
			changes_tx,
		});

		let Snapshot { site, projects } = snapshot;

		let site = Arc::new(PreferenceMap::new(
			Scope::Site,
			shared.normalize_all(Scope::Site, site),
			Arc::clone(&shared),
		));

		let projects = projects
			.into_iter()
			.filter_map(|(raw_id, values)| match raw_id.parse::<ProjectId>() {
				Ok(id) => {
					let scope = Scope::Project(id);
					let values = shared.normalize_all(scope, values);

					Some((
						id,
						Arc::new(PreferenceMap::new(scope, values, Arc::clone(&shared))),
					))
				}
				Err(e) => {
					warn!("Skipping project preferences from snapshot: {e}");
					None
				}
			})
			.collect();

		Self {
			shared,
			site,
			projects: RwLock::new(projects),
		}
	}

	#[must_use]
	pub fn site(&self) -> &Arc<PreferenceMap> {
		&self.site
	}

	/// Preferences of project `id`, accepting any literal form of a positive integer.
	///
	/// An empty container is created on first access, every later access returns that same
	/// instance. Nothing is created when `id` is malformed.
	pub fn project<I>(&self, id: I) -> Result<Arc<PreferenceMap>, Error>
	where
		I: TryInto<ProjectId, Error = Error>,
	{
		Ok(self.project_by_id(id.try_into()?))
	}

	/// Same as [`PreferenceStore::project`] for an already validated id.
	#[must_use]
	pub fn project_by_id(&self, id: ProjectId) -> Arc<PreferenceMap> {
		if let Some(project) = self.projects.read().get(&id) {
			return Arc::clone(project);
		}

		Arc::clone(self.projects.write().entry(id).or_insert_with(|| {
			trace!(%id, "Creating project preferences");
			Arc::new(PreferenceMap::new(
				Scope::Project(id),
				HashMap::new(),
				Arc::clone(&self.shared),
			))
		}))
	}

	/// Ids of every project container created so far.
	#[must_use]
	pub fn project_ids(&self) -> Vec<ProjectId> {
		let mut ids = self.projects.read().keys().copied().collect::<Vec<_>>();
		ids.sort_unstable();
		ids
	}

	fn container(&self, scope: Scope) -> Arc<PreferenceMap> {
		match scope {
			Scope::Site => Arc::clone(&self.site),
			Scope::Project(id) => self.project_by_id(id),
		}
	}

	#[must_use]
	pub fn get(&self, scope: Scope, key: &str) -> Option<Value> {
		self.container(scope).get(key)
	}

	/// Rejected writes never create the project container they address.
	pub fn set(&self, scope: Scope, key: &str, value: impl Into<Value>) -> Result<(), Error> {
		let change = self.shared.validate(key, &value.into())?;
		self.container(scope).apply(key, change);

		Ok(())
	}

	pub fn delete(&self, scope: Scope, key: &str) -> Result<(), Error> {
		self.shared.registry.require_registered(key)?;
		self.container(scope).apply(key, None);

		Ok(())
	}

	/// Always fails: a project's preferences can only change key by key.
	pub fn replace_project<I>(&self, id: I, _values: HashMap<String, Value>) -> Result<(), Error>
	where
		I: TryInto<ProjectId, Error = Error>,
	{
		Err(Error::UnsupportedOperation(id.try_into()?.get()))
	}

	/// Always fails: a project's preferences can only change key by key.
	pub fn remove_project<I>(&self, id: I) -> Result<(), Error>
	where
		I: TryInto<ProjectId, Error = Error>,
	{
		Err(Error::UnsupportedOperation(id.try_into()?.get()))
	}

	/// Receives every local change from now on.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<PreferenceChange> {
		self.shared.changes_tx.subscribe()
	}

	#[must_use]
	pub fn engine(&self) -> &PropagationEngine {
		&self.shared.engine
	}
}
