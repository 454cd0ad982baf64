//! Capability-scoped surface for the presentation layer.
//!
//! The UI talks to the rest of the system exclusively through a
//! [`UiBridge`]: it can submit a selection, ping a URL, ask the user a
//! yes/no question, receive the resolved endpoint, and request a
//! forget. It cannot spawn processes, touch the choice store, or skip
//! the confirm gate — those capabilities stay on the coordinator side
//! of the channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{AppConfig, AppPaths};
use crate::coordinator::{ActiveEndpoint, Command, Coordinator, EndpointLatch, RunExit};
use crate::probe::EndpointProber;
use crate::selection::BackendSelection;

/// A yes/no question for the user. The front-end answers over
/// `reply`; dropping it (a dismissed dialog) counts as "no".
#[derive(Debug)]
pub struct ConfirmRequest {
    pub message: String,
    pub reply: oneshot::Sender<bool>,
}

/// The presentation layer's only handle into the lifecycle system.
#[derive(Debug, Clone)]
pub struct UiBridge {
    commands: mpsc::Sender<Command>,
    confirms: mpsc::Sender<ConfirmRequest>,
    latch: EndpointLatch,
    prober: EndpointProber,
}

impl UiBridge {
    /// Forward a validated selection to the coordinator.
    /// Fire-and-forget: the result arrives via [`Self::endpoint_ready`].
    pub async fn submit_selection(&self, selection: BackendSelection) {
        if self.commands.send(Command::Submit(selection)).await.is_err() {
            warn!("coordinator is gone; selection dropped");
        }
    }

    /// Single-shot reachability check for pre-submission feedback.
    pub async fn check_reachable(&self, url: &str, timeout: Duration) -> bool {
        self.prober.probe(url, timeout).await.is_ready()
    }

    /// Ask the user to confirm a destructive action. Suspends until
    /// the user answers; a dismissed prompt resolves to `false`.
    pub async fn confirm(&self, message: impl Into<String>) -> bool {
        let (reply, response) = oneshot::channel();
        let request = ConfirmRequest {
            message: message.into(),
            reply,
        };
        if self.confirms.send(request).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Receive the resolved endpoint. Replayable: registering after
    /// resolution still yields the value, exactly once per call.
    pub async fn endpoint_ready(&self) -> Option<ActiveEndpoint> {
        self.latch.wait().await
    }

    /// Trigger the Forgetting transition. Callers gate this behind
    /// [`Self::confirm`].
    pub async fn request_forget(&self) {
        if self.commands.send(Command::Forget).await.is_err() {
            warn!("coordinator is gone; forget request dropped");
        }
    }
}

/// Running lifecycle system: the bridge for the presentation layer,
/// the confirm request stream its front-end must answer, and the
/// coordinator task itself.
pub struct App {
    pub bridge: UiBridge,
    pub confirms: mpsc::Receiver<ConfirmRequest>,
    pub coordinator: JoinHandle<RunExit>,
}

/// Wire up and spawn the coordinator, returning the app handles.
pub fn launch(config: &AppConfig, paths: &AppPaths) -> App {
    let latch = EndpointLatch::new();
    let prober = EndpointProber::new();
    let (command_tx, command_rx) = mpsc::channel(16);
    let (confirm_tx, confirm_rx) = mpsc::channel(16);

    let coordinator = Coordinator::new(config, paths, prober.clone(), latch.clone());
    let task = tokio::spawn(coordinator.run(command_rx));

    App {
        bridge: UiBridge {
            commands: command_tx,
            confirms: confirm_tx,
            latch,
            prober,
        },
        confirms: confirm_rx,
        coordinator: task,
    }
}
