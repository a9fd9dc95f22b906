//! Engine reachability with a short-lived cached answer.
//!
//! Status checks are cheap to call repeatedly: the last answer is reused
//! for `health_cache_secs`, so a dashboard polling every second costs the
//! engine one `/health` request per window. The check itself carries its
//! own short timeout and never touches the conversion path.

use crate::cache::CacheStats;
use crate::engine::HealthCheck;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of one reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub reachable: bool,
    /// The answer was reused from an earlier check.
    pub from_cache: bool,
}

/// What [`crate::convert::Mail2Pdf::health`] reports.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub engine_reachable: bool,
    pub from_cache: bool,
    pub cache: CacheStats,
    pub stored_results: usize,
}

pub struct HealthMonitor {
    checker: Option<Arc<dyn HealthCheck>>,
    cache_for: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("checker", &self.checker.is_some())
            .field("cache_for", &self.cache_for)
            .field("last", &*self.last.lock())
            .finish()
    }
}

impl HealthMonitor {
    /// Without a checker every check reports the engine as unreachable.
    pub fn new(checker: Option<Arc<dyn HealthCheck>>, cache_for: Duration) -> Self {
        Self {
            checker,
            cache_for,
            last: Mutex::new(None),
        }
    }

    pub async fn check(&self) -> EngineStatus {
        if let Some((at, reachable)) = *self.last.lock() {
            if at.elapsed() < self.cache_for {
                return EngineStatus {
                    reachable,
                    from_cache: true,
                };
            }
        }

        let reachable = match self.checker {
            Some(ref checker) => checker.ping().await,
            None => false,
        };
        debug!("Engine health check: reachable={}", reachable);
        *self.last.lock() = Some((Instant::now(), reachable));
        EngineStatus {
            reachable,
            from_cache: false,
        }
    }

    /// Forget the cached answer; the next check asks the engine again.
    pub fn invalidate(&self) {
        *self.last.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingPinger {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthCheck for CountingPinger {
        async fn ping(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    fn pinger(up: bool) -> Arc<CountingPinger> {
        Arc::new(CountingPinger {
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn answer_is_reused_within_window() {
        let p = pinger(true);
        let monitor = HealthMonitor::new(Some(p.clone()), Duration::from_secs(30));
        let first = monitor.check().await;
        let second = monitor.check().await;
        assert!(first.reachable && !first.from_cache);
        assert!(second.reachable && second.from_cache);
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_window_always_asks() {
        let p = pinger(false);
        let monitor = HealthMonitor::new(Some(p.clone()), Duration::ZERO);
        assert!(!monitor.check().await.reachable);
        p.up.store(true, Ordering::SeqCst);
        let status = monitor.check().await;
        assert!(status.reachable && !status.from_cache);
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_check() {
        let p = pinger(true);
        let monitor = HealthMonitor::new(Some(p.clone()), Duration::from_secs(30));
        monitor.check().await;
        monitor.invalidate();
        assert!(!monitor.check().await.from_cache);
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_checker_is_unreachable() {
        let monitor = HealthMonitor::new(None, Duration::from_secs(30));
        assert!(!monitor.check().await.reachable);
    }
}
