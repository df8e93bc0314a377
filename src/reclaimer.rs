//! Idle reclamation of heavyweight converters
//!
//! The reclaimer watches user activity. Once no activity has been recorded
//! for the configured threshold, every loaded [`Footprint::Heavy`] converter
//! is disposed and removed from the registry. The next request that needs it
//! goes through the registry's lazy load path again.
//!
//! Monitoring starts with [`IdleReclaimer::arm`], at most once per reclaimer.
//! After a reclaim the monitor waits for fresh activity before it starts
//! counting the next idle period. Disposal failures are logged by the
//! registry and never stop the monitor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::Footprint;
use crate::registry::ConverterRegistry;

#[derive(Debug, Clone, Copy)]
struct Activity {
    last: Instant,
    seq: u64,
}

#[derive(Debug)]
struct Shared {
    registry: Arc<ConverterRegistry>,
    threshold: Duration,
    activity: Mutex<Activity>,
    wake: Notify,
    armed: AtomicBool,
    reclaims: AtomicUsize,
}

impl Shared {
    fn activity(&self) -> Activity {
        *self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_activity(&self) {
        {
            let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
            activity.last = Instant::now();
            activity.seq += 1;
        }
        self.wake.notify_one();
    }

    async fn monitor(self: Arc<Self>) {
        loop {
            let seen = self.activity();
            tokio::time::sleep_until(seen.last + self.threshold).await;
            if self.activity().seq != seen.seq {
                continue;
            }

            let removed = self.registry.reclaim(Footprint::Heavy).await;
            self.reclaims.fetch_add(1, Ordering::SeqCst);
            tracing::info!(
                removed,
                idle_ms = self.threshold.as_millis() as u64,
                "reclaimed idle converters"
            );

            self.wait_for_activity(seen.seq).await;
        }
    }

    async fn wait_for_activity(&self, seq: u64) {
        loop {
            let notified = self.wake.notified();
            if self.activity().seq != seq {
                return;
            }
            notified.await;
        }
    }
}

/// Disposes heavy converters after a period of inactivity
#[derive(Debug)]
pub struct IdleReclaimer {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleReclaimer {
    pub fn new(registry: Arc<ConverterRegistry>, threshold: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                threshold,
                activity: Mutex::new(Activity {
                    last: Instant::now(),
                    seq: 0,
                }),
                wake: Notify::new(),
                armed: AtomicBool::new(false),
                reclaims: AtomicUsize::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start monitoring on the current tokio runtime
    ///
    /// Returns `true` if this call started the monitor. Later calls are
    /// no-ops and return `false`, as does a call made outside a runtime.
    pub fn arm(&self) -> bool {
        if self.shared.armed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.shared.armed.store(false, Ordering::SeqCst);
            tracing::warn!("cannot arm idle reclaimer outside a tokio runtime");
            return false;
        };

        self.shared.record_activity();
        let handle = runtime.spawn(Arc::clone(&self.shared).monitor());
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!(
            threshold_ms = self.shared.threshold.as_millis() as u64,
            "idle reclaimer armed"
        );
        true
    }

    /// Record user activity, restarting the idle period
    pub fn touch(&self) {
        self.shared.record_activity();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> Duration {
        self.shared.threshold
    }

    /// Number of idle periods that triggered a reclaim
    pub fn reclaim_count(&self) -> usize {
        self.shared.reclaims.load(Ordering::SeqCst)
    }
}

impl Drop for IdleReclaimer {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Converter, SharedConverter, from_fn};
    use crate::error::ConversionError;
    use async_trait::async_trait;

    const THRESHOLD: Duration = Duration::from_secs(600);

    struct Module {
        fail_dispose: bool,
    }

    #[async_trait]
    impl Converter for Module {
        async fn convert(&self, html: &str) -> Result<String, ConversionError> {
            Ok(html.to_string())
        }

        fn dispose(&self) -> Result<(), ConversionError> {
            if self.fail_dispose {
                Err(ConversionError::failure("heavy", "instance busy"))
            } else {
                Ok(())
            }
        }
    }

    async fn registry(loads: Arc<AtomicUsize>, fail_dispose: bool) -> Arc<ConverterRegistry> {
        let mut registry = ConverterRegistry::new();
        registry
            .register("light", Footprint::Light, || async {
                Ok::<_, ConversionError>(from_fn(|html| Ok(html.to_string())))
            })
            .register("heavy", Footprint::Heavy, move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<SharedConverter, ConversionError>(Arc::new(Module { fail_dispose })) }
            });
        assert!(registry.load_all().await.is_empty());
        Arc::new(registry)
    }

    #[test]
    fn test_arm_outside_runtime_is_refused() {
        let reclaimer = IdleReclaimer::new(Arc::new(ConverterRegistry::new()), THRESHOLD);
        assert!(!reclaimer.arm());
        assert!(!reclaimer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_is_idempotent() {
        let reclaimer = IdleReclaimer::new(Arc::new(ConverterRegistry::new()), THRESHOLD);
        assert!(reclaimer.arm());
        assert!(!reclaimer.arm());
        assert!(reclaimer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heavy_converter_reclaimed_after_idle() {
        let registry = registry(Arc::default(), false).await;
        let reclaimer = IdleReclaimer::new(Arc::clone(&registry), THRESHOLD);
        reclaimer.arm();

        tokio::time::sleep(THRESHOLD - Duration::from_secs(1)).await;
        assert!(registry.is_loaded("heavy"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.is_loaded("heavy"));
        assert!(registry.is_loaded("light"));
        assert_eq!(reclaimer.reclaim_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_reclaim() {
        let registry = registry(Arc::default(), false).await;
        let reclaimer = IdleReclaimer::new(Arc::clone(&registry), THRESHOLD);
        reclaimer.arm();

        tokio::time::sleep(THRESHOLD / 2).await;
        reclaimer.touch();
        tokio::time::sleep(THRESHOLD / 2 + Duration::from_secs(1)).await;
        assert!(registry.is_loaded("heavy"));
        assert_eq!(reclaimer.reclaim_count(), 0);

        tokio::time::sleep(THRESHOLD / 2).await;
        assert!(!registry.is_loaded("heavy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_after_reclaim_then_reclaim_again() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = registry(Arc::clone(&loads), false).await;
        let reclaimer = IdleReclaimer::new(Arc::clone(&registry), THRESHOLD);
        reclaimer.arm();

        tokio::time::sleep(THRESHOLD + Duration::from_secs(1)).await;
        assert!(!registry.is_loaded("heavy"));

        reclaimer.touch();
        registry.get_converter("heavy").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        // No second reclaim without a full idle period after the activity
        tokio::time::sleep(THRESHOLD - Duration::from_secs(1)).await;
        assert!(registry.is_loaded("heavy"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.is_loaded("heavy"));
        assert_eq!(reclaimer.reclaim_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_failure_keeps_monitor_alive() {
        let registry = registry(Arc::default(), true).await;
        let reclaimer = IdleReclaimer::new(Arc::clone(&registry), THRESHOLD);
        reclaimer.arm();

        tokio::time::sleep(THRESHOLD + Duration::from_secs(1)).await;
        assert!(!registry.is_loaded("heavy"));

        reclaimer.touch();
        registry.get_converter("heavy").await.unwrap();
        tokio::time::sleep(THRESHOLD + Duration::from_secs(1)).await;
        assert!(!registry.is_loaded("heavy"));
        assert_eq!(reclaimer.reclaim_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reclaim_while_idle_after_reclaim() {
        let registry = registry(Arc::default(), false).await;
        let reclaimer = IdleReclaimer::new(Arc::clone(&registry), THRESHOLD);
        reclaimer.arm();

        tokio::time::sleep(THRESHOLD * 5).await;
        assert_eq!(reclaimer.reclaim_count(), 1);
    }
}
