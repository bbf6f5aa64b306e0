//! Periodic sampling of subscribed firmware variables.
//!
//! Each subscription owns one timer-driven task issuing reads through the
//! controller's protocol queue. Sampling favors recency over completeness:
//! a tick that would overlap a still-running poll is skipped, not queued,
//! and a skipped tick is not an error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::protocol::master::ControllerHandle;
use crate::symbols::ResolvedLocation;

/// One timestamped value produced by periodic polling, distinct from an
/// explicit client-issued read.
#[derive(Debug, Clone)]
pub struct DataSample {
    pub parameter: String,
    pub value: f64,
    /// Unix seconds.
    pub timestamp: f64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SubscriptionKey {
    controller: String,
    parameter: String,
}

struct Subscription {
    task: JoinHandle<()>,
}

pub struct PollingScheduler {
    samples: broadcast::Sender<DataSample>,
    subscriptions: Mutex<HashMap<SubscriptionKey, Subscription>>,
    default_interval: Duration,
}

impl PollingScheduler {
    pub fn new(sample_capacity: usize, default_interval: Duration) -> Self {
        let (samples, _) = broadcast::channel(sample_capacity);
        Self {
            samples,
            subscriptions: Mutex::new(HashMap::new()),
            default_interval,
        }
    }

    /// Receiver for the sample stream. Every subscriber sees every sample,
    /// subject to the channel's lag policy.
    pub fn samples(&self) -> broadcast::Receiver<DataSample> {
        self.samples.subscribe()
    }

    /// Add or replace a subscription. Replacing cancels the previous poll
    /// task for the same (controller, parameter) tuple.
    pub fn subscribe(
        &self,
        handle: ControllerHandle,
        parameter: &str,
        location: ResolvedLocation,
        interval: Option<Duration>,
    ) {
        let key = SubscriptionKey {
            controller: handle.id().to_string(),
            parameter: parameter.to_string(),
        };
        let interval = interval.unwrap_or(self.default_interval);
        let task = self.spawn_poll_task(handle.clone(), key.parameter.clone(), location, interval);

        let mut subs = self.subscriptions.lock().expect("scheduler lock poisoned");
        let controller_had_subs = subs.keys().any(|k| k.controller == key.controller);
        if let Some(previous) = subs.insert(key.clone(), Subscription { task }) {
            previous.task.abort();
        }
        info!(
            controller = %key.controller,
            parameter = %key.parameter,
            interval_ms = interval.as_millis() as u64,
            "subscription installed"
        );
        if !controller_had_subs {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = handle.set_measuring(true).await;
            });
        }
    }

    /// Remove a subscription. Any in-flight poll result is discarded.
    pub fn unsubscribe(&self, handle: &ControllerHandle, parameter: &str) -> bool {
        let key = SubscriptionKey {
            controller: handle.id().to_string(),
            parameter: parameter.to_string(),
        };
        let mut subs = self.subscriptions.lock().expect("scheduler lock poisoned");
        let Some(subscription) = subs.remove(&key) else {
            return false;
        };
        subscription.task.abort();
        info!(
            controller = %key.controller,
            parameter = %key.parameter,
            "subscription removed"
        );
        if !subs.keys().any(|k| k.controller == key.controller) {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = handle.set_measuring(false).await;
            });
        }
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("scheduler lock poisoned")
            .len()
    }

    fn spawn_poll_task(
        &self,
        handle: ControllerHandle,
        parameter: String,
        location: ResolvedLocation,
        interval: Duration,
    ) -> JoinHandle<()> {
        let samples = self.samples.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Recency over completeness: overlapping ticks are dropped.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match handle.read_at(location.address, location.size).await {
                    Ok(bytes) => match location.decode(&bytes) {
                        Some(value) => {
                            let sample = DataSample {
                                parameter: parameter.clone(),
                                value,
                                timestamp: unix_now(),
                            };
                            // No receivers is fine; samples are droppable.
                            let _ = samples.send(sample);
                        }
                        None => {
                            warn!(%parameter, "sample bytes not decodable as a scalar");
                        }
                    },
                    Err(e) => {
                        debug!(%parameter, error = %e, "poll failed, will retry next tick");
                    }
                }
            }
        })
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        let subs = self.subscriptions.lock().expect("scheduler lock poisoned");
        for subscription in subs.values() {
            subscription.task.abort();
        }
    }
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::master::{ControllerWorker, ProtocolTimings};
    use crate::symbols::{ByteOrder, ScalarKind, TypeDesc};
    use crate::transport::emulator::EmulatedController;

    fn scalar_location(address: u32, size: u32) -> ResolvedLocation {
        ResolvedLocation {
            address,
            size,
            ty: TypeDesc::Scalar {
                kind: ScalarKind::Unsigned,
                size,
            },
            byte_order: ByteOrder::Little,
        }
    }

    fn spawn_controller(preload: &[(u32, Vec<u8>)]) -> ControllerHandle {
        let mut slave = EmulatedController::with_default_memory();
        for (address, bytes) in preload {
            slave.write_memory(*address, bytes);
        }
        ControllerWorker::spawn(
            "poll-test".to_string(),
            Box::new(slave),
            ProtocolTimings {
                response_timeout: Duration::from_millis(50),
                connect_timeout: Duration::from_millis(50),
                retry_count: 1,
                protocol_version: 1,
                queue_depth: 8,
            },
        )
    }

    #[tokio::test]
    async fn test_samples_are_emitted() {
        let handle = spawn_controller(&[(0x2000_0028, vec![0xE6, 0x00, 0x00, 0x00])]);
        handle.connect().await.unwrap();

        let scheduler = PollingScheduler::new(16, Duration::from_millis(10));
        let mut samples = scheduler.samples();
        scheduler.subscribe(
            handle.clone(),
            "voltage",
            scalar_location(0x2000_0028, 4),
            None,
        );

        let sample = tokio::time::timeout(Duration::from_secs(1), samples.recv())
            .await
            .expect("no sample within deadline")
            .unwrap();
        assert_eq!(sample.parameter, "voltage");
        assert_eq!(sample.value, 230.0);
        assert!(sample.timestamp > 0.0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_samples() {
        let handle = spawn_controller(&[(0x2000_0028, vec![1, 0, 0, 0])]);
        handle.connect().await.unwrap();

        let scheduler = PollingScheduler::new(16, Duration::from_millis(10));
        let mut samples = scheduler.samples();
        scheduler.subscribe(
            handle.clone(),
            "voltage",
            scalar_location(0x2000_0028, 4),
            None,
        );
        tokio::time::timeout(Duration::from_secs(1), samples.recv())
            .await
            .expect("no sample within deadline")
            .unwrap();

        assert!(scheduler.unsubscribe(&handle, "voltage"));
        assert_eq!(scheduler.subscription_count(), 0);

        // Drain anything already in the channel, then expect silence.
        while samples.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(samples.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_false() {
        let handle = spawn_controller(&[]);
        let scheduler = PollingScheduler::new(16, Duration::from_millis(10));
        assert!(!scheduler.unsubscribe(&handle, "nope"));
    }

    #[tokio::test]
    async fn test_poll_failure_is_not_fatal() {
        // Never connected: every poll fails with a session error, the
        // scheduler keeps ticking and emits nothing.
        let handle = spawn_controller(&[]);
        let scheduler = PollingScheduler::new(16, Duration::from_millis(10));
        let mut samples = scheduler.samples();
        scheduler.subscribe(
            handle.clone(),
            "voltage",
            scalar_location(0x2000_0028, 4),
            None,
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(samples.try_recv().is_err());
        assert_eq!(scheduler.subscription_count(), 1);
    }
}
