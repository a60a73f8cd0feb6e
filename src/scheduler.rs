// Background token refresh scheduling
// Owns at most one pending timer; encapsulates the dispose-then-rearm
// discipline so call sites cannot accidentally leave two timers alive

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::session::Session;

/// Scheduler lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No session worth refreshing; no timer pending
    Idle,
    /// A timer is pending
    Armed,
    /// The refresh callback is in flight
    Firing,
    /// Timer retired by `SignedOut` (revived on the next `SignedIn`) or
    /// permanently by `Shutdown`
    Stopped,
}

/// Result of an arming attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// Timer armed with the given wait
    Armed(Duration),
    /// No session, or a zero/default expiry; nothing to schedule
    Idle,
    /// The session is already expired; the caller should transition to
    /// `SignedOut` instead of retrying
    SessionExpired,
    /// The scheduler was permanently retired by a shutdown
    Retired,
}

/// Callback fired when a timer elapses
pub type RefreshHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Supplier of the current wall-clock time.
///
/// Elapsed-time and expiry arithmetic goes through this instead of reading
/// `Utc::now()` directly, so tests running on a paused runtime can hand in a
/// source that follows the runtime's clock.
pub type TimeSource = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The default time source: the system wall clock
pub fn wall_clock() -> TimeSource {
    Arc::new(Utc::now)
}

struct SchedulerInner {
    phase: SchedulerPhase,
    handle: Option<JoinHandle<()>>,
    retired: bool,
}

/// Compute the wait before the next refresh attempt.
///
/// The refresh point is four fifths of the token lifetime, measured from
/// issuance; the result is clamped to `[0, max_wait_secs]`.
pub fn compute_wait(
    expires_in: i64,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_wait_secs: u64,
) -> Duration {
    // Saturating: `expires_in` may carry any i64 from a persisted session
    let interval = expires_in.saturating_mul(4) / 5;
    let elapsed = (now - created_at).num_seconds();
    let wait = interval.saturating_sub(elapsed).clamp(0, max_wait_secs as i64);
    Duration::from_secs(wait as u64)
}

/// Timer-driven background refresh scheduler.
///
/// At most one timer is ever pending: arming aborts the previous handle
/// before spawning the next one. The refresh work itself happens in the hook
/// supplied at construction; the hook is expected to rearm (or stop) the
/// scheduler when it finishes, and the scheduler falls back to `Idle` if it
/// does neither.
pub struct RefreshScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    hook: RefreshHook,
    clock: TimeSource,
    max_wait_secs: u64,
    armed_count: AtomicUsize,
}

impl RefreshScheduler {
    pub fn new(max_wait_secs: u64, hook: RefreshHook) -> Self {
        Self::with_time_source(max_wait_secs, hook, wall_clock())
    }

    /// Build a scheduler that reads `clock` for expiry and elapsed-time
    /// arithmetic instead of the system wall clock
    pub fn with_time_source(max_wait_secs: u64, hook: RefreshHook, clock: TimeSource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                phase: SchedulerPhase::Idle,
                handle: None,
                retired: false,
            })),
            hook,
            clock,
            max_wait_secs,
            armed_count: AtomicUsize::new(0),
        }
    }

    pub async fn phase(&self) -> SchedulerPhase {
        self.inner.lock().await.phase
    }

    /// Total number of timers ever armed; test instrumentation for the
    /// one-live-timer invariant
    pub fn armed_count(&self) -> usize {
        self.armed_count.load(Ordering::SeqCst)
    }

    /// Arm (or rearm) the timer for the given session snapshot.
    ///
    /// A missing session or a zero expiry leaves the scheduler `Idle`; an
    /// already-expired session is reported as [`ArmOutcome::SessionExpired`]
    /// without arming anything.
    pub async fn arm_for(&self, session: Option<&Session>) -> ArmOutcome {
        let mut inner = self.inner.lock().await;
        if inner.retired {
            return ArmOutcome::Retired;
        }

        let Some(session) = session else {
            Self::disarm(&mut inner, SchedulerPhase::Idle);
            return ArmOutcome::Idle;
        };
        if session.expires_in <= 0 {
            Self::disarm(&mut inner, SchedulerPhase::Idle);
            return ArmOutcome::Idle;
        }

        let now = (self.clock)();
        if session.is_expired_at(now) {
            Self::disarm(&mut inner, SchedulerPhase::Idle);
            return ArmOutcome::SessionExpired;
        }

        let wait = compute_wait(session.expires_in, session.created_at, now, self.max_wait_secs);

        // Dispose the previous timer before creating the next one
        if let Some(handle) = inner.handle.take() {
            handle.abort();
        }

        self.armed_count.fetch_add(1, Ordering::SeqCst);
        inner.phase = SchedulerPhase::Armed;

        let shared = self.inner.clone();
        let hook = self.hook.clone();
        // Create the sleep here so its deadline is anchored at arm time, not
        // at the spawned task's first poll
        let sleep = tokio::time::sleep(wait);
        inner.handle = Some(tokio::spawn(async move {
            sleep.await;
            {
                let mut guard = shared.lock().await;
                if guard.phase != SchedulerPhase::Armed {
                    return;
                }
                guard.phase = SchedulerPhase::Firing;
                guard.handle = None;
            }

            hook().await;

            // The hook normally rearms or stops; fall back to Idle when the
            // client behind it is gone
            let mut guard = shared.lock().await;
            if guard.phase == SchedulerPhase::Firing {
                guard.phase = SchedulerPhase::Idle;
            }
        }));

        tracing::debug!("refresh timer armed, fires in {:?}", wait);
        ArmOutcome::Armed(wait)
    }

    /// Cancel any pending timer and stop until the next `SignedIn`.
    ///
    /// An in-flight refresh callback is not cancelled; its result is
    /// discarded by the caller once it observes the stopped phase.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        Self::disarm(&mut inner, SchedulerPhase::Stopped);
    }

    /// Cancel any pending timer and retire the scheduler permanently
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        Self::disarm(&mut inner, SchedulerPhase::Stopped);
        inner.retired = true;
    }

    fn disarm(inner: &mut SchedulerInner, phase: SchedulerPhase) {
        if let Some(handle) = inner.handle.take() {
            handle.abort();
        }
        inner.phase = phase;
    }
}
