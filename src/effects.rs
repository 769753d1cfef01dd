//! Effect runner for the browser phone
//!
//! This module handles executing effects produced by the state machine.
//! Bookkeeping effects (destroy, mute, hangup, timers) run inline so they
//! stay ordered with the transition that produced them; network and SDK
//! work runs on spawned tasks that report back with events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::CredentialSource;
use crate::clock::{ClockStats, DurationClock};
use crate::state_machine::{Effect, Event};
use crate::telephony::{
    CallEvent, CallHandle, ClientOptions, ConnectParams, DeviceEvent, RoutingId,
    TelephonyCapability, TelephonyClient, TelephonyError,
};

const SDK_EVENT_BUFFER: usize = 32;

/// Trait for running effects.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);

    /// Release every resource still held. Called once when the session ends.
    fn shutdown(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live telephony clients keyed by device id.
///
/// A device id is never reused: once destroyed (or once the registry is
/// closed) a client that shows up late for it is refused.
#[derive(Default)]
struct ClientRegistry {
    clients: HashMap<Uuid, Arc<dyn TelephonyClient>>,
    retired: HashSet<Uuid>,
    closed: bool,
}

impl ClientRegistry {
    fn insert(&mut self, device_id: Uuid, client: Arc<dyn TelephonyClient>) -> bool {
        if self.closed || self.retired.contains(&device_id) {
            return false;
        }
        self.clients.insert(device_id, client);
        true
    }

    fn get(&self, device_id: Uuid) -> Option<Arc<dyn TelephonyClient>> {
        self.clients.get(&device_id).cloned()
    }

    fn retire(&mut self, device_id: Uuid) -> Option<Arc<dyn TelephonyClient>> {
        self.retired.insert(device_id);
        self.clients.remove(&device_id)
    }

    fn close(&mut self) -> Vec<Arc<dyn TelephonyClient>> {
        self.closed = true;
        self.clients.drain().map(|(_, client)| client).collect()
    }
}

/// Outbound call whose handle may not have arrived yet.
#[derive(Default)]
struct CallSlot {
    handle: Option<Arc<dyn CallHandle>>,
    hangup_requested: bool,
}

/// Real effect runner backed by the injected telephony SDK.
pub struct TelephonyEffectRunner {
    capability: TelephonyCapability,
    credentials: Arc<dyn CredentialSource>,
    options: ClientOptions,
    clients: Arc<Mutex<ClientRegistry>>,
    calls: Arc<Mutex<HashMap<Uuid, CallSlot>>>,
    clock: Mutex<DurationClock>,
    ring_timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TelephonyEffectRunner {
    pub fn new(
        capability: TelephonyCapability,
        credentials: Arc<dyn CredentialSource>,
        options: ClientOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            capability,
            credentials,
            options,
            clients: Arc::new(Mutex::new(ClientRegistry::default())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            clock: Mutex::new(DurationClock::new()),
            ring_timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn clock_stats(&self) -> ClockStats {
        lock(&self.clock).stats()
    }

    pub fn clock_running(&self) -> bool {
        lock(&self.clock).is_running()
    }

    fn register(&self, device_id: Uuid, tx: mpsc::Sender<Event>) {
        let sdk = self.capability.sdk();
        let credentials = self.credentials.clone();
        let options = self.options.clone();
        let clients = self.clients.clone();

        tokio::spawn(async move {
            let credential = match credentials.fetch().await {
                Ok(credential) => credential,
                Err(e) => {
                    log::error!("Credential fetch failed: {}", e);
                    let _ = tx
                        .send(Event::CredentialFailed {
                            device_id,
                            err: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let (device_tx, device_rx) = mpsc::channel(SDK_EVENT_BUFFER);
            let client = match sdk.create_client(credential, &options, device_tx) {
                Ok(client) => client,
                Err(e) => {
                    log::error!("Telephony client construction failed: {}", e);
                    let _ = tx
                        .send(Event::ClientCreateFailed {
                            device_id,
                            err: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            if !lock(&clients).insert(device_id, client.clone()) {
                log::info!(
                    "Device {} was torn down during initialization, destroying client",
                    device_id
                );
                client.destroy();
                return;
            }

            tokio::spawn(forward_device_events(device_id, device_rx, tx.clone()));

            log::info!("Registering device {} (edge={})", device_id, options.edge);
            if let Err(e) = client.register().await {
                let _ = tx
                    .send(Event::DeviceError {
                        device_id,
                        err: e.to_string(),
                    })
                    .await;
            }
        });
    }

    fn place_call(&self, device_id: Uuid, call_id: Uuid, target: RoutingId, tx: mpsc::Sender<Event>) {
        lock(&self.calls).insert(call_id, CallSlot::default());

        let client = lock(&self.clients).get(device_id);
        let calls = self.calls.clone();

        tokio::spawn(async move {
            let Some(client) = client else {
                lock(&calls).remove(&call_id);
                let _ = tx
                    .send(Event::CallConnectFailed {
                        call_id,
                        err: "no registered client".to_string(),
                        rejected: false,
                    })
                    .await;
                return;
            };

            let (call_tx, call_rx) = mpsc::channel(SDK_EVENT_BUFFER);
            tokio::spawn(forward_call_events(call_id, call_rx, tx.clone(), calls.clone()));

            let params = ConnectParams { to: target };
            match client.connect(params, call_tx).await {
                Ok(handle) => {
                    let mut calls = lock(&calls);
                    match calls.get_mut(&call_id) {
                        Some(slot) if !slot.hangup_requested => {
                            slot.handle = Some(handle);
                        }
                        _ => {
                            log::info!("Call {} ended before it connected, hanging up", call_id);
                            calls.remove(&call_id);
                            handle.disconnect();
                        }
                    }
                }
                Err(e) => {
                    log::error!("Call {} failed to start: {}", call_id, e);
                    lock(&calls).remove(&call_id);
                    let rejected = matches!(e, TelephonyError::Rejected(_));
                    let _ = tx
                        .send(Event::CallConnectFailed {
                            call_id,
                            err: e.to_string(),
                            rejected,
                        })
                        .await;
                }
            }
        });
    }

    fn disconnect_call(&self, call_id: Uuid) {
        let mut calls = lock(&self.calls);
        let handle = match calls.get_mut(&call_id) {
            Some(slot) => match slot.handle.take() {
                Some(handle) => Some(handle),
                None => {
                    // Applied when connect() returns
                    slot.hangup_requested = true;
                    None
                }
            },
            None => None,
        };
        if let Some(handle) = handle {
            calls.remove(&call_id);
            drop(calls);
            handle.disconnect();
        }
    }

    fn set_mute(&self, call_id: Uuid, muted: bool) {
        let handle = lock(&self.calls)
            .get(&call_id)
            .and_then(|slot| slot.handle.clone());
        match handle {
            Some(handle) => handle.mute(muted),
            None => log::warn!("Mute requested for call {} with no handle", call_id),
        }
    }

    fn start_ring_timeout(&self, call_id: Uuid, after: Duration, tx: mpsc::Sender<Event>) {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Event::RingTimeout { call_id }).await;
        });
        if let Some(previous) = lock(&self.ring_timers).insert(call_id, task) {
            previous.abort();
        }
    }

    fn cancel_ring_timeout(&self, call_id: Uuid) {
        if let Some(task) = lock(&self.ring_timers).remove(&call_id) {
            task.abort();
        }
    }
}

impl EffectRunner for TelephonyEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::Register { device_id } => self.register(device_id, tx),
            Effect::DestroyClient { device_id } => {
                if let Some(client) = lock(&self.clients).retire(device_id) {
                    log::info!("Destroying telephony client for device {}", device_id);
                    client.destroy();
                }
            }
            Effect::PlaceCall {
                device_id,
                call_id,
                target,
            } => self.place_call(device_id, call_id, target, tx),
            Effect::SetMute { call_id, muted } => self.set_mute(call_id, muted),
            Effect::DisconnectCall { call_id } => self.disconnect_call(call_id),
            Effect::StartClock { call_id } => {
                lock(&self.clock).start(call_id, tx);
            }
            Effect::StopClock { call_id } => {
                if !lock(&self.clock).stop_for(call_id) {
                    log::debug!("No clock to stop for call {}", call_id);
                }
            }
            Effect::StartRingTimeout { call_id, after } => {
                self.start_ring_timeout(call_id, after, tx)
            }
            Effect::CancelRingTimeout { call_id } => self.cancel_ring_timeout(call_id),
            // Handled by the state loop
            Effect::NotifyCallComplete { .. } | Effect::Refuse { .. } | Effect::EmitUi => {}
        }
    }

    fn shutdown(&self) {
        let clients = lock(&self.clients).close();
        let handles: Vec<_> = lock(&self.calls)
            .drain()
            .filter_map(|(_, slot)| slot.handle)
            .collect();

        for handle in handles {
            handle.disconnect();
        }
        for client in &clients {
            client.destroy();
        }
        lock(&self.clock).stop();
        for (_, task) in lock(&self.ring_timers).drain() {
            task.abort();
        }

        log::info!(
            "Effect runner shut down ({} client(s) destroyed)",
            clients.len()
        );
    }
}

/// Map SDK device callbacks to state machine events.
async fn forward_device_events(
    device_id: Uuid,
    mut rx: mpsc::Receiver<DeviceEvent>,
    tx: mpsc::Sender<Event>,
) {
    while let Some(event) = rx.recv().await {
        log::debug!("Device {} event: {:?}", device_id, event);
        let mapped = match event {
            DeviceEvent::Registered => Event::Registered { device_id },
            DeviceEvent::Unregistered => Event::Unregistered { device_id },
            DeviceEvent::Error(e) => Event::DeviceError {
                device_id,
                err: e.to_string(),
            },
            DeviceEvent::Incoming(call) => {
                log::info!("Rejecting incoming call on device {}", device_id);
                call.reject();
                continue;
            }
        };
        if tx.send(mapped).await.is_err() {
            break;
        }
    }
}

/// Map SDK call callbacks to state machine events. Callbacks for calls the
/// SDK already ended drop the runner's handle. An errored call keeps its
/// slot so the reducer's `DisconnectCall` still hangs it up.
async fn forward_call_events(
    call_id: Uuid,
    mut rx: mpsc::Receiver<CallEvent>,
    tx: mpsc::Sender<Event>,
    calls: Arc<Mutex<HashMap<Uuid, CallSlot>>>,
) {
    while let Some(event) = rx.recv().await {
        log::debug!("Call {} event: {:?}", call_id, event);
        let mapped = match event {
            CallEvent::Accept => Event::CallAccepted { call_id },
            CallEvent::Disconnect => Event::CallDisconnected { call_id },
            CallEvent::Cancel => Event::CallCancelled { call_id },
            CallEvent::Reject => Event::CallRejected { call_id },
            CallEvent::Error(e) => Event::CallFailed {
                call_id,
                err: e.to_string(),
            },
        };
        let terminal = !matches!(mapped, Event::CallAccepted { .. });
        let ended_by_sdk = terminal && !matches!(mapped, Event::CallFailed { .. });
        if ended_by_sdk {
            lock(&calls).remove(&call_id);
        }
        if tx.send(mapped).await.is_err() || terminal {
            break;
        }
    }
}
