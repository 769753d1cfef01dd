//! Per-call duration clock
//!
//! Emits `Event::ClockTick` once per second while a call is connected. The
//! reducer derives the displayed duration from the call's start instant, so
//! ticks only need to be roughly on time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state_machine::Event;

const TICK: Duration = Duration::from_secs(1);

struct RunningClock {
    call_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop counters, used to check that every started clock is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockStats {
    pub started: u64,
    pub stopped: u64,
}

/// At most one ticking clock per session.
#[derive(Default)]
pub struct DurationClock {
    running: Option<RunningClock>,
    stats: ClockStats,
}

impl DurationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking for `call_id`. Refused while another clock is running.
    pub fn start(&mut self, call_id: Uuid, tx: mpsc::Sender<Event>) -> bool {
        if let Some(running) = &self.running {
            log::warn!(
                "Clock already running for call {}, not starting for {}",
                running.call_id,
                call_id
            );
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Event::ClockTick { call_id }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.running = Some(RunningClock {
            call_id,
            cancel,
            task,
        });
        self.stats.started += 1;
        log::debug!("Clock started for call {}", call_id);
        true
    }

    /// Stop the running clock. Returns false when nothing was running.
    pub fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                running.cancel.cancel();
                running.task.abort();
                self.stats.stopped += 1;
                log::debug!("Clock stopped for call {}", running.call_id);
                true
            }
            None => false,
        }
    }

    /// Stop only if the running clock belongs to `call_id`.
    pub fn stop_for(&mut self, call_id: Uuid) -> bool {
        match &self.running {
            Some(running) if running.call_id == call_id => self.stop(),
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> ClockStats {
        self.stats
    }
}

impl Drop for DurationClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut clock = DurationClock::new();
        let call_id = Uuid::new_v4();
        assert!(clock.start(call_id, tx));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, Event::ClockTick { call_id: id } if id == call_id));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert!(clock.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused() {
        let (tx, _rx) = mpsc::channel(16);
        let mut clock = DurationClock::new();
        assert!(clock.start(Uuid::new_v4(), tx.clone()));
        assert!(!clock.start(Uuid::new_v4(), tx));
        assert_eq!(clock.stats().started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_ticks() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut clock = DurationClock::new();
        clock.start(Uuid::new_v4(), tx);
        assert!(clock.stop());
        assert!(!clock.stop());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            clock.stats(),
            ClockStats {
                started: 1,
                stopped: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_for_ignores_other_calls() {
        let (tx, _rx) = mpsc::channel(16);
        let mut clock = DurationClock::new();
        let call_id = Uuid::new_v4();
        clock.start(call_id, tx);
        assert!(!clock.stop_for(Uuid::new_v4()));
        assert!(clock.is_running());
        assert!(clock.stop_for(call_id));
        assert!(!clock.is_running());
    }
}
