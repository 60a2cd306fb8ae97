#![allow(dead_code)]

use sd_preferences::{
	AppInstanceId, NamedLocks, NormalizerRegistry, Outcome, PreferenceStore, PropagationEngine,
	Request, Rule, Snapshot, Transport,
};

use std::{sync::Arc, time::Duration};

use async_channel as chan;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
	sync::Semaphore,
	time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

/// In-memory transport. Every call is announced on `started`, then blocks until it is
/// released or cancelled; released calls settle with the configured outcome.
pub struct ScriptedTransport {
	started_tx: chan::Sender<Request>,
	started_rx: chan::Receiver<Request>,
	finished_tx: chan::Sender<(Request, Outcome)>,
	finished_rx: chan::Receiver<(Request, Outcome)>,
	finished: Mutex<Vec<(Request, Outcome)>>,
	release: Semaphore,
	respond_with: Outcome,
	latency: Option<Duration>,
}

impl ScriptedTransport {
	fn with(permits: usize, respond_with: Outcome, latency: Option<Duration>) -> Arc<Self> {
		let (started_tx, started_rx) = chan::unbounded();
		let (finished_tx, finished_rx) = chan::unbounded();

		Arc::new(Self {
			started_tx,
			started_rx,
			finished_tx,
			finished_rx,
			finished: Mutex::new(Vec::new()),
			release: Semaphore::new(permits),
			respond_with,
			latency,
		})
	}

	/// Calls wait for [`ScriptedTransport::release`].
	pub fn gated() -> Arc<Self> {
		Self::with(0, Outcome::Success, None)
	}

	/// Calls settle right away with `outcome`.
	pub fn immediate(outcome: Outcome) -> Arc<Self> {
		Self::with(Semaphore::MAX_PERMITS, outcome, None)
	}

	/// Calls succeed after `latency`, unless cancelled first.
	pub fn slow(latency: Duration) -> Arc<Self> {
		Self::with(Semaphore::MAX_PERMITS, Outcome::Success, Some(latency))
	}

	pub fn release(&self, calls: usize) {
		self.release.add_permits(calls);
	}

	pub async fn next_started(&self) -> Request {
		timeout(WAIT, self.started_rx.recv())
			.await
			.expect("timed out waiting for a request to start")
			.expect("transport channel closed")
	}

	/// Skips started requests until one carrying `body` shows up.
	pub async fn started_with_body(&self, body: &Value) -> Request {
		loop {
			let request = self.next_started().await;
			if request.body.as_ref() == Some(body) {
				return request;
			}
		}
	}

	pub async fn next_finished(&self) -> (Request, Outcome) {
		timeout(WAIT, self.finished_rx.recv())
			.await
			.expect("timed out waiting for a request to finish")
			.expect("transport channel closed")
	}

	pub fn finished(&self) -> Vec<(Request, Outcome)> {
		self.finished.lock().clone()
	}

	pub fn succeeded(&self) -> Vec<Request> {
		self.finished()
			.into_iter()
			.filter(|(_, outcome)| *outcome == Outcome::Success)
			.map(|(request, _)| request)
			.collect()
	}
}

#[async_trait]
impl Transport for ScriptedTransport {
	async fn send(&self, request: Request, cancel: CancellationToken) -> Outcome {
		self.started_tx
			.send(request.clone())
			.await
			.expect("started channel closed");

		let outcome = tokio::select! {
			biased;

			() = cancel.cancelled() => Outcome::Cancelled,
			permit = async {
				if let Some(latency) = self.latency {
					sleep(latency).await;
				}
				self.release.acquire().await
			} => {
				permit.expect("semaphore closed").forget();
				self.respond_with.clone()
			}
		};

		self.finished.lock().push((request.clone(), outcome.clone()));
		self.finished_tx
			.send((request, outcome.clone()))
			.await
			.expect("finished channel closed");

		outcome
	}
}

pub fn registry() -> NormalizerRegistry {
	NormalizerRegistry::new()
		.with("sortOrder", Rule::one_of(["asc", "desc"]).with_default("asc"))
		.with("theme", Rule::one_of(["light", "dark"]))
		.with("compact", Rule::boolean())
		.with("pageSize", Rule::integer_range(1, 500).with_default(50))
		.with("note", Rule::string())
}

pub fn engine(transport: &Arc<ScriptedTransport>, locks: Arc<NamedLocks>) -> PropagationEngine {
	PropagationEngine::new(
		AppInstanceId::new(),
		locks,
		Arc::clone(transport) as Arc<dyn Transport>,
	)
}

pub fn store_with(transport: &Arc<ScriptedTransport>, snapshot: Snapshot) -> PreferenceStore {
	PreferenceStore::new(
		registry(),
		engine(transport, Arc::new(NamedLocks::new())),
		snapshot,
	)
}

pub fn store(transport: &Arc<ScriptedTransport>) -> PreferenceStore {
	store_with(transport, Snapshot::default())
}

pub async fn settled(store: &PreferenceStore) {
	timeout(WAIT, store.engine().settled())
		.await
		.expect("timed out waiting for propagation to settle");
}
