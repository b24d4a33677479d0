//! VRAM probe with polling and degradation.
//!
//! [`VramProbe`] sits above a [`DeviceQuery`] chain and guarantees a reading
//! every time it is asked:
//!
//! 1. the first query in the chain that answers wins,
//! 2. otherwise the last good reading is reused,
//! 3. otherwise a conservative constant profile derived from the loaded
//!    model's parameter count.
//!
//! While a request is in flight the probe polls on an interval and emits
//! `low_memory` when free memory drops under the low-water fraction. Idle,
//! it does nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use ember_core::{Clock, SessionId};
use ember_events::{BaseEvent, EngineEvent, EventBus};

use crate::memory::{DeviceMemory, DeviceQuery};

/// Conservative constant profile for a model of `params_billion` parameters.
///
/// Assumes fp16 weights resident on the device and a device sized at twice
/// the model, which errs toward small pools rather than OOM.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fallback_profile(params_billion: f64) -> DeviceMemory {
    let model_bytes = (params_billion.max(0.1) * 2.0 * 1e9) as u64;
    DeviceMemory {
        total: model_bytes * 2,
        used: model_bytes,
        free: model_bytes,
        model_resident: model_bytes,
    }
}

/// Probe configuration.
#[derive(Clone, Copy, Debug)]
pub struct ProbeConfig {
    /// Poll interval while a request is in flight.
    pub poll_interval: Duration,
    /// Fraction of total memory under which `low_memory` fires.
    pub low_memory_fraction: f64,
    /// Parameter count for the degradation profile.
    pub params_billion: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            low_memory_fraction: 0.20,
            params_billion: 7.0,
        }
    }
}

/// Device memory probe. Never errors.
pub struct VramProbe {
    queries: Vec<Box<dyn DeviceQuery>>,
    config: ProbeConfig,
    last_reading: Mutex<Option<DeviceMemory>>,
    in_flight: AtomicBool,
}

impl VramProbe {
    /// Create a probe over a query chain.
    #[must_use]
    pub fn new(queries: Vec<Box<dyn DeviceQuery>>, config: ProbeConfig) -> Self {
        Self {
            queries,
            config,
            last_reading: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Take a reading. Never fails; see the module docs for the degradation
    /// order.
    pub async fn query(&self) -> DeviceMemory {
        for query in &self.queries {
            if let Some(reading) = query.memory_info().await {
                *self.last_reading.lock() = Some(reading);
                return reading;
            }
        }
        if let Some(last) = *self.last_reading.lock() {
            debug!("all probes failed, reusing last good reading");
            return last;
        }
        debug!(
            params_billion = self.config.params_billion,
            "all probes failed with no prior reading, using fallback profile"
        );
        fallback_profile(self.config.params_billion)
    }

    /// Whether a reading is under the low-memory water mark.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn is_low_memory(&self, reading: &DeviceMemory) -> bool {
        if reading.total == 0 {
            return false;
        }
        reading.free < (reading.total as f64 * self.config.low_memory_fraction) as u64
    }

    /// Mark a provider request as started or finished; polling only runs
    /// while one is in flight.
    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::SeqCst);
    }

    /// Whether a provider request is in flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. Abort the returned handle to stop it.
    pub fn spawn_poller(
        self: &Arc<Self>,
        bus: EventBus,
        session_id: SessionId,
        clock: Arc<dyn Clock>,
    ) -> tokio::task::JoinHandle<()> {
        let probe = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                let _ = ticker.tick().await;
                if !probe.is_in_flight() {
                    continue;
                }
                let reading = probe.query().await;
                if probe.is_low_memory(&reading) {
                    info!(
                        free = reading.free,
                        total = reading.total,
                        "device memory low"
                    );
                    bus.emit(EngineEvent::LowMemory {
                        base: BaseEvent::at(session_id.as_str(), clock.now()),
                        free_bytes: reading.free,
                        total_bytes: reading.total,
                    });
                }
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_core::FixedClock;

    /// Query returning a scripted sequence of readings (then None forever).
    struct ScriptedQuery {
        readings: Mutex<Vec<Option<DeviceMemory>>>,
    }

    impl ScriptedQuery {
        fn new(readings: Vec<Option<DeviceMemory>>) -> Self {
            Self {
                readings: Mutex::new(readings),
            }
        }
    }

    #[async_trait]
    impl DeviceQuery for ScriptedQuery {
        async fn memory_info(&self) -> Option<DeviceMemory> {
            let mut guard = self.readings.lock();
            if guard.is_empty() {
                None
            } else {
                guard.remove(0)
            }
        }
    }

    fn reading(total: u64, free: u64) -> DeviceMemory {
        DeviceMemory {
            total,
            used: total - free,
            free,
            model_resident: 0,
        }
    }

    // -- query degradation --

    #[tokio::test]
    async fn first_answering_query_wins() {
        let probe = VramProbe::new(
            vec![
                Box::new(ScriptedQuery::new(vec![None])),
                Box::new(ScriptedQuery::new(vec![Some(reading(100, 50))])),
            ],
            ProbeConfig::default(),
        );
        assert_eq!(probe.query().await, reading(100, 50));
    }

    #[tokio::test]
    async fn failed_probe_reuses_last_reading() {
        let probe = VramProbe::new(
            vec![Box::new(ScriptedQuery::new(vec![
                Some(reading(100, 60)),
                None,
            ]))],
            ProbeConfig::default(),
        );
        assert_eq!(probe.query().await, reading(100, 60));
        // second call: query now fails, last reading returned
        assert_eq!(probe.query().await, reading(100, 60));
    }

    #[tokio::test]
    async fn no_queries_yields_fallback_profile() {
        let probe = VramProbe::new(vec![], ProbeConfig::default());
        let mem = probe.query().await;
        assert_eq!(mem, fallback_profile(7.0));
        assert!(mem.free > 0);
    }

    #[test]
    fn fallback_profile_scales_with_model() {
        let small = fallback_profile(1.0);
        let large = fallback_profile(70.0);
        assert!(large.total > small.total);
        assert_eq!(small.free + small.used, small.total);
    }

    // -- low memory --

    #[test]
    fn low_memory_below_fraction() {
        let probe = VramProbe::new(vec![], ProbeConfig::default());
        assert!(probe.is_low_memory(&reading(1000, 100)));
        assert!(!probe.is_low_memory(&reading(1000, 500)));
        // exactly at the mark is not low
        assert!(!probe.is_low_memory(&reading(1000, 200)));
    }

    #[test]
    fn zero_total_is_never_low() {
        let probe = VramProbe::new(vec![], ProbeConfig::default());
        assert!(!probe.is_low_memory(&DeviceMemory::default()));
    }

    // -- poller --

    #[tokio::test(start_paused = true)]
    async fn poller_emits_low_memory_only_in_flight() {
        let probe = Arc::new(VramProbe::new(
            vec![Box::new(ScriptedQuery::new(vec![
                Some(reading(1000, 50)),
                Some(reading(1000, 50)),
                Some(reading(1000, 50)),
            ]))],
            ProbeConfig::default(),
        ));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let clock = Arc::new(FixedClock::default());
        let handle = probe.spawn_poller(
            bus.clone(),
            SessionId::from("sess-1"),
            clock,
        );

        // idle: two intervals pass, nothing emitted
        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        // in flight: the next tick emits
        probe.set_in_flight(true);
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::LowMemory { free_bytes: 50, .. }));

        handle.abort();
    }
}
