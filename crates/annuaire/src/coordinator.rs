//! Backend lifecycle coordination.
//!
//! A single task owns the supervisor, prober and choice store, and
//! consumes selection commands from a channel. Commands submitted
//! while a resolution is in flight queue behind it, so there is never
//! more than one Resolving phase at a time and never two racing
//! process starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, AppPaths, ReadinessConfig, ReadinessPolicy};
use crate::probe::EndpointProber;
use crate::selection::{BackendKind, BackendSelection};
use crate::store::{ChoiceStore, PersistedChoice};
use crate::supervisor::Supervisor;

/// The single resolved base URL the UI must use for all data calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEndpoint {
    pub base_url: String,
}

/// Latched, replayable delivery of the active endpoint.
///
/// A single current value plus a list of waiters: setting the value
/// satisfies everyone currently waiting, and anyone registering later
/// is satisfied immediately. Each `wait` call observes a resolution
/// exactly once — this is deliberately not a broadcast, which would
/// drop the event for late subscribers.
#[derive(Debug, Clone, Default)]
pub struct EndpointLatch {
    inner: Arc<Mutex<LatchInner>>,
}

#[derive(Debug, Default)]
struct LatchInner {
    value: Option<ActiveEndpoint>,
    waiters: Vec<oneshot::Sender<ActiveEndpoint>>,
}

impl EndpointLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a resolved endpoint, waking all current waiters. A
    /// re-selection replaces the value for future waiters.
    pub async fn set(&self, endpoint: ActiveEndpoint) {
        let mut inner = self.inner.lock().await;
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.send(endpoint.clone());
        }
        inner.value = Some(endpoint);
    }

    /// Wait for the endpoint. Resolves immediately if one is already
    /// latched. Returns `None` only if the latch is torn down while
    /// waiting.
    pub async fn wait(&self) -> Option<ActiveEndpoint> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(value) = &inner.value {
                return Some(value.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };
        rx.await.ok()
    }
}

/// Commands accepted by the coordinator task.
#[derive(Debug)]
pub enum Command {
    /// Resolve a backend selection and deliver its endpoint.
    Submit(BackendSelection),
    /// Clear the remembered choice, stop any live backend, and ask
    /// the shell for a full application relaunch.
    Forget,
}

/// Why the coordinator task returned.
#[derive(Debug, PartialEq, Eq)]
pub enum RunExit {
    /// A forget request was processed; the shell should relaunch.
    Relaunch,
    /// All command senders dropped; normal shutdown.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Resolving,
    Active,
    Forgetting,
}

/// The lifecycle state machine.
pub struct Coordinator {
    supervisor: Supervisor,
    prober: EndpointProber,
    store: ChoiceStore,
    latch: EndpointLatch,
    readiness: ReadinessConfig,
    db_uri: String,
    grace: Duration,
    state: State,
}

impl Coordinator {
    pub fn new(
        config: &AppConfig,
        paths: &AppPaths,
        prober: EndpointProber,
        latch: EndpointLatch,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(config.server.clone()),
            prober,
            store: ChoiceStore::new(&paths.data_dir),
            latch,
            readiness: config.readiness.clone(),
            db_uri: paths.db_uri(),
            grace: config.server.grace_period(),
            state: State::Idle,
        }
    }

    /// Drive the state machine until a forget request or until every
    /// command sender is gone. Any live backend process is stopped on
    /// either exit path.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> RunExit {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Submit(selection) => self.resolve(selection).await,
                Command::Forget => {
                    self.forget().await;
                    return RunExit::Relaunch;
                }
            }
        }

        debug!("command channel closed, shutting down");
        if let Err(err) = self.supervisor.stop(self.grace).await {
            warn!("failed to stop backend on shutdown: {err:#}");
        }
        RunExit::Closed
    }

    fn set_state(&mut self, next: State) {
        debug!("lifecycle: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    async fn resolve(&mut self, selection: BackendSelection) {
        self.set_state(State::Resolving);

        let base_url = match &selection.kind {
            BackendKind::Local => {
                let base_url = self.supervisor.base_url();
                let verified = self.start_local(&base_url).await;
                if !verified && self.readiness.policy == ReadinessPolicy::Strict {
                    warn!("strict readiness policy: discarding local selection");
                    if let Err(err) = self.supervisor.stop(self.grace).await {
                        warn!("failed to stop unready backend: {err:#}");
                    }
                    self.set_state(State::Idle);
                    return;
                }
                base_url
            }
            // A remote choice was either probed interactively before
            // submission or restored from persistence; no re-probe here.
            BackendKind::Remote(url) => url.clone(),
        };

        info!("active endpoint resolved: {base_url}");
        self.latch.set(ActiveEndpoint { base_url }).await;

        if selection.remember {
            if let Err(err) = self
                .store
                .save(&PersistedChoice::from_selection(&selection))
            {
                warn!("failed to persist backend choice: {err:#}");
            }
        } else if let Err(err) = self.store.clear() {
            warn!("failed to clear persisted backend choice: {err:#}");
        }

        self.set_state(State::Active);
    }

    /// Spawn the local backend and poll it to readiness. Returns
    /// whether the endpoint was verified reachable; spawn failures and
    /// exhausted polling budgets are logged, not fatal.
    async fn start_local(&mut self, base_url: &str) -> bool {
        if let Err(err) = self.supervisor.start(&self.db_uri).await {
            warn!("failed to spawn local backend: {err:#}");
            return false;
        }

        let ready = self
            .prober
            .wait_until_ready(
                base_url,
                self.readiness.max_attempts,
                self.readiness.per_attempt_timeout(),
                self.readiness.inter_attempt_delay(),
            )
            .await;

        if !ready {
            warn!(
                "local backend not ready after {} attempt(s); data calls may fail",
                self.readiness.max_attempts
            );
        }
        ready
    }

    async fn forget(&mut self) {
        self.set_state(State::Forgetting);
        info!("forgetting remembered backend choice");

        if let Err(err) = self.store.clear() {
            warn!("failed to clear persisted backend choice: {err:#}");
        }
        if let Err(err) = self.supervisor.stop(self.grace).await {
            warn!("failed to stop backend while forgetting: {err:#}");
        }
    }
}
