//!
//! # Preferences
//!
//! Per-user preference values for a client session, site wide and per project, kept locally
//! and mirrored to the backend on a best effort basis.
//!
//! Writes are applied immediately and validated by a [`NormalizerRegistry`]; the
//! [`PropagationEngine`] then serializes outbound requests per [`Slot`], cancelling any
//! request a newer value has made obsolete. Callers never wait on the network and
//! propagation failures are never surfaced: local state is authoritative for the session.
//!
//! ## Basic example
//!
//! ```no_run
//! use sd_preferences::{NormalizerRegistry, PreferenceStore, Rule, Scope, Snapshot, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sd_preferences::Error> {
//!     let registry = NormalizerRegistry::new()
//!         .with("sortOrder", Rule::one_of(["asc", "desc"]).with_default("asc"));
//!
//!     let store = PreferenceStore::connect(
//!         &SyncConfig::new("https://api.example.com/v1/"),
//!         registry,
//!         Snapshot::default(),
//!     )?;
//!
//!     store.set(Scope::Site, "sortOrder", "desc")?;
//!     store.project("9000")?.set("sortOrder", "asc")?;
//!
//!     store.engine().settled().await;
//!
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod registry;
pub mod slot;
pub mod store;
pub mod transport;

pub use config::{Credentials, SyncConfig};
pub use engine::{Mutation, PropagationEngine};
pub use error::{ConfigError, Error, PropagationFailure};
pub use locks::{NamedLockGuard, NamedLocks};
pub use registry::{NormalizerRegistry, Rule};
pub use slot::{AppInstanceId, Endpoint, ProjectId, Scope, Slot};
pub use store::{PreferenceChange, PreferenceMap, PreferenceStore, Snapshot};
pub use transport::{HttpTransport, Method, Outcome, Request, Transport};
