//! In-process named mutexes.
//!
//! Offers blocking acquire and non-blocking try-acquire keyed by an arbitrary string name.
//! Entries are kept as [`Weak`] references and dropped from the table once nobody holds or
//! waits on them.

use std::{
	collections::HashMap,
	fmt,
	sync::{Arc, Weak},
};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Below this many entries, dead ones are left alone.
const CLEANUP_THRESHOLD: usize = 128;

#[derive(Default)]
pub struct NamedLocks {
	locks: SyncMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl fmt::Debug for NamedLocks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NamedLocks")
			.field("entries", &self.locks.lock().len())
			.finish()
	}
}

/// Holds the named lock until dropped.
#[derive(Debug)]
#[must_use = "the named lock is released as soon as the guard is dropped"]
pub struct NamedLockGuard {
	name: Arc<str>,
	_guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}
}

impl NamedLocks {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits until the lock named `name` is free and takes it.
	pub async fn lock(&self, name: &str) -> NamedLockGuard {
		let mutex = self.entry(name);
		trace!(%name, "Waiting for named lock");

		NamedLockGuard {
			name: name.into(),
			_guard: mutex.lock_owned().await,
		}
	}

	/// Takes the lock named `name` only if nobody currently holds it.
	#[must_use]
	pub fn try_lock(&self, name: &str) -> Option<NamedLockGuard> {
		self.entry(name)
			.try_lock_owned()
			.ok()
			.map(|guard| NamedLockGuard {
				name: name.into(),
				_guard: guard,
			})
	}

	/// Whether someone currently holds the lock named `name`.
	#[must_use]
	pub fn is_locked(&self, name: &str) -> bool {
		self.locks
			.lock()
			.get(name)
			.and_then(Weak::upgrade)
			.is_some_and(|mutex| mutex.try_lock().is_err())
	}

	fn entry(&self, name: &str) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock();

		if let Some(mutex) = locks.get(name).and_then(Weak::upgrade) {
			return mutex;
		}

		if locks.len() > CLEANUP_THRESHOLD {
			locks.retain(|_, weak| weak.strong_count() > 0);
		}

		let mutex = Arc::new(Mutex::new(()));
		locks.insert(name.to_string(), Arc::downgrade(&mutex));

		mutex
	}

	#[cfg(test)]
	fn live_entries(&self) -> usize {
		self.locks
			.lock()
			.values()
			.filter(|weak| weak.strong_count() > 0)
			.count()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::time::timeout;

	use super::*;

	#[tokio::test]
	async fn try_lock_fails_while_held() {
		let locks = NamedLocks::new();

		let guard = locks.try_lock("a").expect("free lock");
		assert_eq!(guard.name(), "a");
		assert!(locks.is_locked("a"));
		assert!(locks.try_lock("a").is_none());

		// distinct names never contend
		assert!(locks.try_lock("b").is_some());

		drop(guard);
		assert!(!locks.is_locked("a"));
		assert!(locks.try_lock("a").is_some());
	}

	#[tokio::test]
	async fn lock_waits_for_release() {
		let locks = Arc::new(NamedLocks::new());
		let guard = locks.lock("slot").await;

		let waiter = tokio::spawn({
			let locks = Arc::clone(&locks);
			async move {
				let _guard = locks.lock("slot").await;
			}
		});

		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());

		drop(guard);
		timeout(Duration::from_secs(5), waiter)
			.await
			.expect("waiter should acquire the released lock")
			.expect("waiter task panicked");
	}

	#[tokio::test]
	async fn released_entries_are_forgotten() {
		let locks = NamedLocks::new();

		let guards = (0..4)
			.map(|i| locks.try_lock(&format!("lock-{i}")).expect("free lock"))
			.collect::<Vec<_>>();
		assert_eq!(locks.live_entries(), 4);

		drop(guards);
		assert_eq!(locks.live_entries(), 0);
	}
}
