//! State machine for the browser phone
//!
//! This module implements the device and call lifecycle using a single-writer
//! pattern. All state transitions go through the `reduce()` function, which
//! returns a new state and a list of effects to execute.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{FailureKind, PhoneError};
use crate::telephony::RoutingId;

/// Facts about the environment the reducer needs but doesn't own.
#[derive(Debug, Clone)]
pub struct Context {
    /// `None` when the telephony SDK is usable, otherwise the reason it isn't.
    pub unavailable_reason: Option<String>,
    /// Force a call that is still ringing to end after this long.
    pub ring_timeout: Option<Duration>,
}

impl Context {
    fn telephony_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    fn fallback_error(&self) -> PhoneError {
        PhoneError::FallbackUnavailable(
            self.unavailable_reason
                .clone()
                .unwrap_or_else(|| "telephony SDK not loaded".to_string()),
        )
    }
}

/// Status of the current or most recent call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallStatus {
    Idle,
    Connecting,
    Connected,
    Ended,
    Rejected,
    Error,
}

/// Why a call left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// Volunteer hung up
    Hangup,
    /// Remote side or network disconnected
    RemoteDisconnect,
    Cancelled,
    Rejected,
    RingTimeout,
    /// The phone screen was closed mid-call
    Teardown,
    Failed,
}

/// Final record of a call attempt, also sent to completion listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_id: Uuid,
    pub target: String,
    pub status: CallStatus,
    pub reason: EndReason,
    pub duration_secs: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CallPhase {
    Connecting,
    Connected {
        started_at: Instant,
        duration_secs: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: Uuid,
    pub target: RoutingId,
    pub phase: CallPhase,
    pub muted: bool,
}

impl ActiveCall {
    pub fn status(&self) -> CallStatus {
        match self.phase {
            CallPhase::Connecting => CallStatus::Connecting,
            CallPhase::Connected { .. } => CallStatus::Connected,
        }
    }

    /// Duration as of the last clock tick.
    pub fn duration_secs(&self) -> u64 {
        match self.phase {
            CallPhase::Connecting => 0,
            CallPhase::Connected { duration_secs, .. } => duration_secs,
        }
    }

    /// Whole seconds since the call was accepted, never below the last tick.
    fn elapsed_secs(&self) -> u64 {
        match self.phase {
            CallPhase::Connecting => 0,
            CallPhase::Connected {
                started_at,
                duration_secs,
            } => duration_secs.max(started_at.elapsed().as_secs()),
        }
    }
}

/// Internal state of the device and its call.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    Uninitialized,
    Initializing {
        device_id: Uuid,
    },
    Ready {
        device_id: Uuid,
        last_call: Option<CallSummary>,
    },
    Busy {
        device_id: Uuid,
        call: ActiveCall,
    },
    Offline {
        kind: FailureKind,
        message: String,
        last_call: Option<CallSummary>,
    },
    Error {
        kind: FailureKind,
        message: String,
        last_call: Option<CallSummary>,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Uninitialized
    }
}

impl State {
    /// Device id of the live (or pending) client, if any.
    pub fn device_id(&self) -> Option<Uuid> {
        match self {
            State::Initializing { device_id }
            | State::Ready { device_id, .. }
            | State::Busy { device_id, .. } => Some(*device_id),
            _ => None,
        }
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        match self {
            State::Busy { call, .. } => Some(call),
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
/// User commands arrive from `PhoneSession`; the rest come from the effect
/// runner (network results, SDK callbacks, timers).
#[derive(Debug, Clone)]
pub enum Event {
    Initialize,
    Reconnect,
    Initiate { target: RoutingId },
    ToggleMute,
    EndCall,
    /// Owning screen is going away
    Teardown,

    // Device events
    CredentialFailed { device_id: Uuid, err: String },
    ClientCreateFailed { device_id: Uuid, err: String },
    Registered { device_id: Uuid },
    Unregistered { device_id: Uuid },
    DeviceError { device_id: Uuid, err: String },

    // Call events
    CallConnectFailed {
        call_id: Uuid,
        err: String,
        rejected: bool,
    },
    CallAccepted { call_id: Uuid },
    CallDisconnected { call_id: Uuid },
    CallCancelled { call_id: Uuid },
    CallRejected { call_id: Uuid },
    CallFailed { call_id: Uuid, err: String },

    // Timers (include id to prevent stale ticks)
    ClockTick { call_id: Uuid },
    RingTimeout { call_id: Uuid },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Fetch a fresh credential, construct the client and register it
    Register { device_id: Uuid },
    DestroyClient { device_id: Uuid },
    PlaceCall {
        device_id: Uuid,
        call_id: Uuid,
        target: RoutingId,
    },
    SetMute { call_id: Uuid, muted: bool },
    DisconnectCall { call_id: Uuid },
    StartClock { call_id: Uuid },
    StopClock { call_id: Uuid },
    StartRingTimeout { call_id: Uuid, after: Duration },
    CancelRingTimeout { call_id: Uuid },
    /// Publish the final call record (only emitted for non-zero durations)
    NotifyCallComplete { summary: CallSummary },
    /// Fail the command that produced this transition
    Refuse { error: PhoneError },
    /// Signal to publish a UI snapshot
    EmitUi,
}

/// Close out the active call. Returns the final record and the cleanup effects.
fn finish_call(
    call: &ActiveCall,
    status: CallStatus,
    reason: EndReason,
    error: Option<String>,
) -> (CallSummary, Vec<Effect>) {
    let duration_secs = call.elapsed_secs();
    let summary = CallSummary {
        call_id: call.call_id,
        target: call.target.to_string(),
        status,
        reason,
        duration_secs,
        error,
    };

    let mut effects = Vec::new();
    match call.phase {
        CallPhase::Connecting => effects.push(Effect::CancelRingTimeout {
            call_id: call.call_id,
        }),
        CallPhase::Connected { .. } => effects.push(Effect::StopClock {
            call_id: call.call_id,
        }),
    }
    if duration_secs > 0 {
        effects.push(Effect::NotifyCallComplete {
            summary: summary.clone(),
        });
    }

    log::info!(
        "Call {} finished: status={:?} reason={:?} duration={}s",
        call.call_id,
        status,
        reason,
        duration_secs
    );

    (summary, effects)
}

/// Terminate the call and return the device to Ready.
fn end_to_ready(
    device_id: Uuid,
    call: &ActiveCall,
    status: CallStatus,
    reason: EndReason,
    error: Option<String>,
    disconnect: bool,
) -> (State, Vec<Effect>) {
    let mut effects = Vec::new();
    if disconnect {
        effects.push(Effect::DisconnectCall {
            call_id: call.call_id,
        });
    }
    let (summary, cleanup) = finish_call(call, status, reason, error);
    effects.extend(cleanup);
    effects.push(Effect::EmitUi);
    (
        State::Ready {
            device_id,
            last_call: Some(summary),
        },
        effects,
    )
}

fn start_initializing() -> (State, Vec<Effect>) {
    let device_id = Uuid::new_v4();
    (
        State::Initializing { device_id },
        vec![Effect::Register { device_id }, Effect::EmitUi],
    )
}

fn refuse(state: &State, error: PhoneError) -> (State, Vec<Effect>) {
    (state.clone(), vec![Effect::Refuse { error }])
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale device or call ids
/// - Refused commands leave the state untouched
pub fn reduce(state: &State, event: Event, ctx: &Context) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_device = state.device_id();
    let current_call = state.active_call().map(|c| c.call_id);

    match (state, event) {
        // -----------------
        // Initialize / Reconnect
        // -----------------
        (Uninitialized, Initialize) => {
            if !ctx.telephony_available() {
                let error = ctx.fallback_error();
                (
                    Offline {
                        kind: FailureKind::FallbackUnavailable,
                        message: error.to_string(),
                        last_call: None,
                    },
                    vec![Refuse { error }, EmitUi],
                )
            } else {
                start_initializing()
            }
        }
        (Initializing { .. } | Ready { .. } | Busy { .. }, Initialize) => (state.clone(), vec![]),
        (Offline { .. } | Error { .. }, Initialize | Reconnect) => {
            if !ctx.telephony_available() {
                refuse(state, ctx.fallback_error())
            } else {
                start_initializing()
            }
        }
        (_, Reconnect) => refuse(state, PhoneError::ReconnectNotAllowed),

        // -----------------
        // Initiate
        // -----------------
        (Ready { device_id, .. }, Initiate { target }) => {
            let call_id = Uuid::new_v4();
            log::info!("Placing call {} to {}", call_id, target);
            let mut effects = vec![PlaceCall {
                device_id: *device_id,
                call_id,
                target: target.clone(),
            }];
            if let Some(after) = ctx.ring_timeout {
                effects.push(StartRingTimeout { call_id, after });
            }
            effects.push(EmitUi);
            (
                Busy {
                    device_id: *device_id,
                    call: ActiveCall {
                        call_id,
                        target,
                        phase: CallPhase::Connecting,
                        muted: false,
                    },
                },
                effects,
            )
        }
        (Busy { .. }, Initiate { .. }) => refuse(state, PhoneError::AlreadyInCall),
        (_, Initiate { .. }) if !ctx.telephony_available() => refuse(state, ctx.fallback_error()),
        (_, Initiate { .. }) => refuse(state, PhoneError::DeviceNotReady),

        // -----------------
        // Mute / End
        // -----------------
        (Busy { device_id, call }, ToggleMute) => match call.phase {
            CallPhase::Connected { .. } => {
                let muted = !call.muted;
                let mut call = call.clone();
                call.muted = muted;
                let call_id = call.call_id;
                (
                    Busy {
                        device_id: *device_id,
                        call,
                    },
                    vec![SetMute { call_id, muted }, EmitUi],
                )
            }
            CallPhase::Connecting => (state.clone(), vec![]),
        },
        (_, ToggleMute) => (state.clone(), vec![]),

        (Busy { device_id, call }, EndCall) => end_to_ready(
            *device_id,
            call,
            CallStatus::Ended,
            EndReason::Hangup,
            None,
            true,
        ),
        (_, EndCall) => (state.clone(), vec![]),

        // -----------------
        // Teardown
        // -----------------
        (Busy { device_id, call }, Teardown) => {
            let mut effects = vec![DisconnectCall {
                call_id: call.call_id,
            }];
            let (_, cleanup) = finish_call(call, CallStatus::Ended, EndReason::Teardown, None);
            effects.extend(cleanup);
            effects.push(DestroyClient {
                device_id: *device_id,
            });
            effects.push(EmitUi);
            (Uninitialized, effects)
        }
        (Initializing { device_id } | Ready { device_id, .. }, Teardown) => (
            Uninitialized,
            vec![
                DestroyClient {
                    device_id: *device_id,
                },
                EmitUi,
            ],
        ),
        (_, Teardown) => (Uninitialized, vec![EmitUi]),

        // -----------------
        // Initializing
        // -----------------
        (Initializing { device_id }, CredentialFailed { device_id: id, err }) if *device_id == id => {
            log::warn!("Credential fetch failed for device {}: {}", id, err);
            (
                Error {
                    kind: FailureKind::CredentialFetch,
                    message: PhoneError::CredentialFetch(err).to_string(),
                    last_call: None,
                },
                vec![DestroyClient { device_id: id }, EmitUi],
            )
        }
        (Initializing { device_id }, ClientCreateFailed { device_id: id, err }) if *device_id == id => (
            Error {
                kind: FailureKind::Registration,
                message: PhoneError::Registration(err).to_string(),
                last_call: None,
            },
            vec![DestroyClient { device_id: id }, EmitUi],
        ),
        (Initializing { device_id }, Registered { device_id: id }) if *device_id == id => {
            log::info!("Device {} registered", id);
            (
                Ready {
                    device_id: id,
                    last_call: None,
                },
                vec![EmitUi],
            )
        }
        (Initializing { device_id }, DeviceError { device_id: id, err }) if *device_id == id => (
            Error {
                kind: FailureKind::Registration,
                message: PhoneError::Registration(err).to_string(),
                last_call: None,
            },
            vec![DestroyClient { device_id: id }, EmitUi],
        ),
        (Initializing { device_id }, Unregistered { device_id: id }) if *device_id == id => (
            Offline {
                kind: FailureKind::Connectivity,
                message: "Phone registration was dropped".to_string(),
                last_call: None,
            },
            vec![DestroyClient { device_id: id }, EmitUi],
        ),

        // -----------------
        // Ready
        // -----------------
        (Ready { device_id, .. }, Registered { device_id: id }) if *device_id == id => {
            (state.clone(), vec![])
        }
        (Ready { device_id, .. }, DeviceError { device_id: id, err }) if *device_id == id => (
            Error {
                kind: FailureKind::Connectivity,
                message: format!("Connection error: {}", err),
                last_call: None,
            },
            vec![DestroyClient { device_id: id }, EmitUi],
        ),
        (Ready { device_id, .. }, Unregistered { device_id: id }) if *device_id == id => (
            Offline {
                kind: FailureKind::Connectivity,
                message: "Phone connection lost".to_string(),
                last_call: None,
            },
            vec![DestroyClient { device_id: id }, EmitUi],
        ),

        // -----------------
        // Busy: device-level failures end the call too
        // -----------------
        (Busy { device_id, call }, DeviceError { device_id: id, err }) if *device_id == id => {
            let mut effects = vec![DisconnectCall {
                call_id: call.call_id,
            }];
            let (summary, cleanup) = finish_call(
                call,
                CallStatus::Error,
                EndReason::Failed,
                Some(err.clone()),
            );
            effects.extend(cleanup);
            effects.push(DestroyClient { device_id: id });
            effects.push(EmitUi);
            (
                Error {
                    kind: FailureKind::Connectivity,
                    message: format!("Connection error: {}", err),
                    last_call: Some(summary),
                },
                effects,
            )
        }
        (Busy { device_id, call }, Unregistered { device_id: id }) if *device_id == id => {
            let mut effects = vec![DisconnectCall {
                call_id: call.call_id,
            }];
            let (summary, cleanup) = finish_call(
                call,
                CallStatus::Error,
                EndReason::Failed,
                Some("phone connection lost".to_string()),
            );
            effects.extend(cleanup);
            effects.push(DestroyClient { device_id: id });
            effects.push(EmitUi);
            (
                Offline {
                    kind: FailureKind::Connectivity,
                    message: "Phone connection lost".to_string(),
                    last_call: Some(summary),
                },
                effects,
            )
        }

        // -----------------
        // Busy: call lifecycle
        // -----------------
        (Busy { device_id, call }, CallConnectFailed { call_id, err, rejected })
            if call.call_id == call_id =>
        {
            let status = if rejected {
                CallStatus::Rejected
            } else {
                CallStatus::Error
            };
            let reason = if rejected {
                EndReason::Rejected
            } else {
                EndReason::Failed
            };
            end_to_ready(
                *device_id,
                call,
                status,
                reason,
                Some(PhoneError::CallInitiation(err).to_string()),
                false,
            )
        }
        (Busy { device_id, call }, CallAccepted { call_id }) if call.call_id == call_id => {
            match call.phase {
                CallPhase::Connecting => {
                    let mut call = call.clone();
                    call.phase = CallPhase::Connected {
                        started_at: Instant::now(),
                        duration_secs: 0,
                    };
                    (
                        Busy {
                            device_id: *device_id,
                            call,
                        },
                        vec![
                            CancelRingTimeout { call_id },
                            StartClock { call_id },
                            EmitUi,
                        ],
                    )
                }
                // Re-entrant accept must not restart the clock
                CallPhase::Connected { .. } => (state.clone(), vec![]),
            }
        }
        (Busy { device_id, call }, CallDisconnected { call_id }) if call.call_id == call_id => {
            end_to_ready(
                *device_id,
                call,
                CallStatus::Ended,
                EndReason::RemoteDisconnect,
                None,
                false,
            )
        }
        (Busy { device_id, call }, CallCancelled { call_id }) if call.call_id == call_id => {
            end_to_ready(
                *device_id,
                call,
                CallStatus::Ended,
                EndReason::Cancelled,
                None,
                false,
            )
        }
        (Busy { device_id, call }, CallRejected { call_id }) if call.call_id == call_id => {
            end_to_ready(
                *device_id,
                call,
                CallStatus::Ended,
                EndReason::Rejected,
                None,
                false,
            )
        }
        (Busy { device_id, call }, CallFailed { call_id, err }) if call.call_id == call_id => {
            end_to_ready(
                *device_id,
                call,
                CallStatus::Error,
                EndReason::Failed,
                Some(err),
                true,
            )
        }
        (Busy { device_id, call }, ClockTick { call_id }) if call.call_id == call_id => {
            match call.phase {
                CallPhase::Connected {
                    started_at,
                    duration_secs,
                } => {
                    let elapsed = call.elapsed_secs();
                    if elapsed == duration_secs {
                        return (state.clone(), vec![]);
                    }
                    let mut call = call.clone();
                    call.phase = CallPhase::Connected {
                        started_at,
                        duration_secs: elapsed,
                    };
                    (
                        Busy {
                            device_id: *device_id,
                            call,
                        },
                        vec![EmitUi],
                    )
                }
                CallPhase::Connecting => (state.clone(), vec![]),
            }
        }
        (Busy { device_id, call }, RingTimeout { call_id }) if call.call_id == call_id => {
            match call.phase {
                CallPhase::Connecting => {
                    log::warn!("Call {} not answered before ring timeout", call_id);
                    end_to_ready(
                        *device_id,
                        call,
                        CallStatus::Ended,
                        EndReason::RingTimeout,
                        None,
                        true,
                    )
                }
                CallPhase::Connected { .. } => (state.clone(), vec![]),
            }
        }

        // -----------------
        // Stale or unhandled events (drop silently)
        // -----------------
        (_, event) => {
            log::debug!(
                "Ignoring event {:?} (device={:?}, call={:?})",
                event,
                current_device,
                current_call
            );
            (state.clone(), vec![])
        }
    }
}
