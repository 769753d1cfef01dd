pub mod api;
pub mod audio;
mod clock;
pub mod disposition;
mod effects;
pub mod error;
pub mod settings;
pub mod state_machine;
pub mod telephony;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use api::CredentialSource;
use effects::{EffectRunner, TelephonyEffectRunner};
use error::{FailureKind, PhoneError};
use settings::PhoneSettings;
use state_machine::{reduce, CallStatus, CallSummary, Context, Effect, Event, State};
use telephony::{ClientOptions, RoutingId, TelephonyCapability};

pub use clock::ClockStats;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

/// Device status shown on the calling screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceStatus {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    Offline,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiError {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl UiError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable(),
        }
    }
}

/// Snapshot published to the calling screen after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub device: DeviceStatus,
    pub call: CallStatus,
    pub target: Option<String>,
    pub duration_secs: u64,
    pub muted: bool,
    pub error: Option<UiError>,
}

impl UiState {
    fn device(device: DeviceStatus) -> Self {
        Self {
            device,
            call: CallStatus::Idle,
            target: None,
            duration_secs: 0,
            muted: false,
            error: None,
        }
    }

    fn with_last_call(mut self, last_call: Option<&CallSummary>) -> Self {
        if let Some(summary) = last_call {
            self.call = summary.status;
            self.target = Some(summary.target.clone());
            self.duration_secs = summary.duration_secs;
            if self.error.is_none() {
                if let Some(message) = &summary.error {
                    self.error = Some(UiError::new(FailureKind::CallInitiation, message.clone()));
                }
            }
        }
        self
    }
}

/// Convert internal State to UiState
fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Uninitialized => UiState::device(DeviceStatus::Uninitialized),
        State::Initializing { .. } => UiState::device(DeviceStatus::Initializing),
        State::Ready { last_call, .. } => {
            UiState::device(DeviceStatus::Ready).with_last_call(last_call.as_ref())
        }
        State::Busy { call, .. } => UiState {
            device: DeviceStatus::Busy,
            call: call.status(),
            target: Some(call.target.to_string()),
            duration_secs: call.duration_secs(),
            muted: call.muted,
            error: None,
        },
        State::Offline {
            kind,
            message,
            last_call,
        } => UiState {
            error: Some(UiError::new(*kind, message.clone())),
            ..UiState::device(DeviceStatus::Offline)
        }
        .with_last_call(last_call.as_ref()),
        State::Error {
            kind,
            message,
            last_call,
        } => UiState {
            error: Some(UiError::new(*kind, message.clone())),
            ..UiState::device(DeviceStatus::Error)
        }
        .with_last_call(last_call.as_ref()),
    }
}

fn publish_ui(ui: &watch::Sender<UiState>, state: &State) {
    let ui_state = state_to_ui(state);
    log::debug!("Publishing UI state: {:?}", serde_json::to_string(&ui_state));
    ui.send_replace(ui_state);
}

/// A user operation plus the channel its outcome is reported on.
struct Command {
    event: Event,
    reply: Option<oneshot::Sender<Result<(), PhoneError>>>,
}

/// Everything the state loop owns.
struct StateLoop {
    commands: mpsc::Receiver<Command>,
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    ctx: Context,
    ui: watch::Sender<UiState>,
    completions: mpsc::UnboundedSender<CallSummary>,
    cancel: CancellationToken,
}

/// Run the main state loop
async fn run_state_loop(mut l: StateLoop) {
    let mut state = State::default();

    publish_ui(&l.ui, &state);
    log::info!("State loop started");

    loop {
        let (event, reply) = tokio::select! {
            _ = l.cancel.cancelled() => {
                log::info!("Phone session dropped, shutting down state loop");
                break;
            }
            command = l.commands.recv() => match command {
                Some(Command { event, reply }) => (event, reply),
                None => break,
            },
            event = l.rx.recv() => match event {
                Some(event) => (event, None),
                None => break,
            },
        };
        log::debug!("Received event: {:?}", event);

        let teardown = matches!(event, Event::Teardown);
        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event, &l.ctx);
        let new_discriminant = std::mem::discriminant(&next);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        let mut outcome = Ok(());
        for eff in effects {
            match eff {
                Effect::EmitUi => publish_ui(&l.ui, &state),
                Effect::Refuse { error } => {
                    log::warn!("Command refused: {}", error);
                    outcome = Err(error);
                }
                Effect::NotifyCallComplete { summary } => {
                    if l.completions.send(summary).is_err() {
                        log::debug!("No listener for call completion");
                    }
                }
                other => l.effect_runner.spawn(other, l.tx.clone()),
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }

        if teardown {
            log::info!("Teardown requested, shutting down state loop");
            break;
        }
    }

    l.effect_runner.shutdown();
    log::info!("State loop ended");
}

/// Handle to one calling-screen phone: owns the device session and at most
/// one call. Dropping it tears everything down.
pub struct PhoneSession {
    commands: mpsc::Sender<Command>,
    ui: watch::Receiver<UiState>,
    runner: Arc<TelephonyEffectRunner>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PhoneSession {
    /// Start the state loop. Must be called from within a tokio runtime.
    ///
    /// Returns the session and the receiver for call-completion summaries.
    pub fn spawn(
        capability: TelephonyCapability,
        credentials: Arc<dyn CredentialSource>,
        settings: &PhoneSettings,
    ) -> (Self, mpsc::UnboundedReceiver<CallSummary>) {
        let ctx = Context {
            unavailable_reason: capability.reason().map(str::to_string),
            ring_timeout: settings.ring_timeout(),
        };
        let options = ClientOptions {
            edge: settings.edge.clone(),
        };
        let runner = TelephonyEffectRunner::new(capability, credentials, options);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (ui_tx, ui_rx) = watch::channel(state_to_ui(&State::default()));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_state_loop(StateLoop {
            commands: command_rx,
            rx,
            tx,
            effect_runner: runner.clone(),
            ctx,
            ui: ui_tx,
            completions: completion_tx,
            cancel: cancel.clone(),
        }));

        (
            Self {
                commands: command_tx,
                ui: ui_rx,
                runner,
                cancel,
                task: Some(task),
            },
            completion_rx,
        )
    }

    async fn command(&self, event: Event) -> Result<(), PhoneError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| PhoneError::SessionClosed)?;
        reply_rx.await.map_err(|_| PhoneError::SessionClosed)?
    }

    /// Fetch a credential and register the device. Resolves once the
    /// request is accepted; watch `subscribe()` for Ready.
    pub async fn initialize(&self) -> Result<(), PhoneError> {
        self.command(Event::Initialize).await
    }

    /// Re-run initialization from Offline or Error.
    pub async fn reconnect(&self) -> Result<(), PhoneError> {
        self.command(Event::Reconnect).await
    }

    /// Call a voter, given either a bare voter id or a routing key
    /// (`voter:<id>`, or the older `voter_<id>`).
    pub async fn initiate(&self, voter: &str) -> Result<(), PhoneError> {
        let target = RoutingId::resolve(voter)
            .ok_or_else(|| PhoneError::InvalidRoutingId(voter.to_string()))?;
        self.initiate_route(target).await
    }

    pub async fn initiate_route(&self, target: RoutingId) -> Result<(), PhoneError> {
        self.command(Event::Initiate { target }).await
    }

    pub async fn toggle_mute(&self) -> Result<(), PhoneError> {
        self.command(Event::ToggleMute).await
    }

    pub async fn end_call(&self) -> Result<(), PhoneError> {
        self.command(Event::EndCall).await
    }

    /// Latest published snapshot.
    pub fn state(&self) -> UiState {
        self.ui.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.clone()
    }

    pub fn clock_stats(&self) -> ClockStats {
        self.runner.clock_stats()
    }

    pub fn clock_running(&self) -> bool {
        self.runner.clock_running()
    }

    /// Hang up, destroy the client and stop the state loop.
    pub async fn teardown(mut self) {
        if let Err(e) = self.command(Event::Teardown).await {
            log::debug!("Teardown on closed session: {}", e);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("State loop task failed: {}", e);
            }
        }
    }
}

impl Drop for PhoneSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
