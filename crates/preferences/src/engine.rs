//! Propagation engine.
//!
//! Every local mutation is handed off to a driver task which, per [`Slot`], decides whether
//! an older request has to be cancelled before the new value goes out. Callers never wait on
//! any of it: [`PropagationEngine::propagate`] only enqueues.
//!
//! Two named locks take part in each decision, both namespaced by the app instance:
//! - a coordination lock, held only while deciding, never across a transport call;
//! - a slot lock, held for as long as that slot's request is in flight.
//!
//! Whatever request is recorded for the slot gets cancelled, even when the slot lock is
//! free: that only means its task hasn't started waiting yet. The new request is recorded as
//! current; it goes out right away if it took the slot lock, otherwise it waits for it. A
//! request that gets superseded while still waiting never goes out at all, so a burst of
//! writes ends with only the last value being sent.

use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use async_channel as chan;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{spawn, sync::watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument, trace, warn, Instrument};

use crate::{
	error::PropagationFailure,
	locks::{NamedLockGuard, NamedLocks},
	slot::{coordination_lock_name, AppInstanceId, Slot},
	transport::{Request, Transport},
};

/// What the backend should do with a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
	Upsert(Value),
	Delete,
}

impl Mutation {
	fn into_request(self, slot: &Slot) -> Request {
		match self {
			Self::Upsert(value) => Request::upsert(slot, value),
			Self::Delete => Request::delete(slot),
		}
	}
}

#[derive(Debug)]
struct Handoff {
	slot: Slot,
	mutation: Mutation,
}

/// The request currently considered authoritative for a slot.
#[derive(Debug)]
struct InFlight {
	generation: u64,
	token: CancellationToken,
}

struct Inner {
	app: AppInstanceId,
	locks: Arc<NamedLocks>,
	transport: Arc<dyn Transport>,
	in_flight: Mutex<HashMap<Slot, InFlight>>,
	generation: AtomicU64,
	outstanding_tx: watch::Sender<usize>,
	stop: CancellationToken,
}

pub struct PropagationEngine {
	inner: Arc<Inner>,
	handoff_tx: chan::Sender<Handoff>,
	outstanding_rx: watch::Receiver<usize>,
	_stop_driver: DropGuard,
}

impl fmt::Debug for PropagationEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PropagationEngine")
			.field("app", &self.inner.app)
			.field("outstanding", &*self.outstanding_rx.borrow())
			.finish_non_exhaustive()
	}
}

impl PropagationEngine {
	/// Starts the engine's driver task, so it must be called from within a Tokio runtime.
	///
	/// `locks` may be shared with other instances, `app` keeps their lock names apart.
	/// Dropping the engine stops the driver and cancels whatever is still in flight.
	pub fn new(app: AppInstanceId, locks: Arc<NamedLocks>, transport: Arc<dyn Transport>) -> Self {
		let (handoff_tx, handoff_rx) = chan::unbounded();
		let (outstanding_tx, outstanding_rx) = watch::channel(0);
		let stop = CancellationToken::new();

		let inner = Arc::new(Inner {
			app,
			locks,
			transport,
			in_flight: Mutex::new(HashMap::new()),
			generation: AtomicU64::new(0),
			outstanding_tx,
			stop: stop.clone(),
		});

		spawn(Arc::clone(&inner).run(handoff_rx));

		Self {
			inner,
			handoff_tx,
			outstanding_rx,
			_stop_driver: stop.drop_guard(),
		}
	}

	#[must_use]
	pub fn app_instance(&self) -> AppInstanceId {
		self.inner.app
	}

	/// Hands `mutation` off for propagation and returns immediately.
	pub fn propagate(&self, slot: Slot, mutation: Mutation) {
		self.inner.outstanding_tx.send_modify(|count| *count += 1);

		if let Err(e) = self.handoff_tx.try_send(Handoff { slot, mutation }) {
			let Handoff { slot, .. } = e.into_inner();
			warn!(%slot, "Propagation driver is gone, local value will not be mirrored");
			self.inner.finished();
		}
	}

	/// Number of handed off mutations that haven't settled yet.
	#[must_use]
	pub fn outstanding(&self) -> usize {
		*self.outstanding_rx.borrow()
	}

	/// Waits until every mutation handed off so far has settled, one way or another.
	pub async fn settled(&self) {
		let mut outstanding_rx = self.outstanding_rx.clone();

		if outstanding_rx.wait_for(|count| *count == 0).await.is_err() {
			warn!("Propagation engine state channel closed while waiting to settle");
		}
	}
}

impl Inner {
	async fn run(self: Arc<Self>, handoff_rx: chan::Receiver<Handoff>) {
		loop {
			let handoff = tokio::select! {
				biased;

				() = self.stop.cancelled() => break,
				res = handoff_rx.recv() => match res {
					Ok(handoff) => handoff,
					Err(chan::RecvError) => break,
				},
			};

			self.decide(handoff).await;
		}

		trace!(app = %self.app, "Propagation driver stopped");
	}

	#[instrument(skip_all, fields(app = %self.app, slot = %handoff.slot))]
	async fn decide(self: &Arc<Self>, handoff: Handoff) {
		let Handoff { slot, mutation } = handoff;
		let coordination = self.locks.lock(&coordination_lock_name(self.app)).await;

		let token = self.stop.child_token();
		let generation = self.generation.fetch_add(1, Ordering::Relaxed);
		let slot_guard = self.locks.try_lock(&slot.lock_name(self.app));

		{
			let mut in_flight = self.in_flight.lock();

			// a record with a free slot lock belongs to a waiter not yet polled into `lock`
			if let Some(previous) = in_flight.get(&slot) {
				debug!(
					superseded = previous.generation,
					generation,
					slot_was_free = slot_guard.is_some(),
					"Cancelling superseded propagation"
				);
				previous.token.cancel();
			}

			in_flight.insert(
				slot.clone(),
				InFlight {
					generation,
					token: token.clone(),
				},
			);
		}

		drop(coordination);

		let request = mutation.into_request(&slot);

		spawn(
			Arc::clone(self)
				.dispatch(slot, generation, request, token, slot_guard)
				.in_current_span(),
		);
	}

	async fn dispatch(
		self: Arc<Self>,
		slot: Slot,
		generation: u64,
		request: Request,
		token: CancellationToken,
		slot_guard: Option<NamedLockGuard>,
	) {
		let slot_guard = match slot_guard {
			Some(guard) => Some(guard),
			None => {
				let lock_name = slot.lock_name(self.app);

				tokio::select! {
					biased;

					() = token.cancelled() => None,
					guard = self.locks.lock(&lock_name) => Some(guard),
				}
			}
		};

		match slot_guard {
			Some(_guard) if !token.is_cancelled() => {
				trace!(generation, method = %request.method, "Sending propagation");

				let outcome = self.transport.send(request, token).await;
				self.settle(&slot, generation);

				match outcome.into_failure(slot) {
					None => debug!(generation, "Propagation succeeded"),
					Some(failure @ PropagationFailure::Cancelled { .. }) => {
						trace!(generation, %failure, "Discarding propagation result");
					}
					Some(failure) => debug!(generation, %failure, "Discarding propagation result"),
				}
			}
			_ => {
				trace!(generation, "Superseded before being sent");
				self.settle(&slot, generation);
			}
		}

		self.finished();
	}

	/// Forgets the slot's in-flight record, unless a newer one already replaced it.
	fn settle(&self, slot: &Slot, generation: u64) {
		let mut in_flight = self.in_flight.lock();

		if in_flight
			.get(slot)
			.is_some_and(|current| current.generation == generation)
		{
			in_flight.remove(slot);
		}
	}

	fn finished(&self) {
		self.outstanding_tx
			.send_modify(|count| *count = count.saturating_sub(1));
	}
}
