//! Wait strategies for ring buffer consumers
//!
//! A wait strategy controls how a consumer waits for a target sequence to
//! become available. Each strategy offers a different trade-off between
//! latency, CPU usage and throughput:
//!
//! - [`BusySpinWaitStrategy`] - lowest latency, burns a core
//! - [`YieldingWaitStrategy`] - low latency, plays nicer with the scheduler
//! - [`SleepingWaitStrategy`] - lowest CPU usage, higher latency
//! - [`BlockingWaitStrategy`] / [`LiteBlockingWaitStrategy`] - park on a
//!   condition variable until a producer signals
//! - [`TimeoutBlockingWaitStrategy`] / [`LiteTimeoutBlockingWaitStrategy`] -
//!   blocking with a deadline, surfacing [`GyreError::Timeout`]
//! - [`PhasedBackoffWaitStrategy`] - spin, then yield, then fall back to a
//!   configurable strategy
//!
//! While waiting, every strategy polls the barrier's alert flag so that a
//! cancelling `alert()` unblocks the consumer within one polling quantum.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::barrier::AlertFlag;
use crate::constants::{
    PHASED_SPIN_TRIES, SLEEP_DEFAULT_NANOS, SLEEP_DEFAULT_RETRIES, YIELD_SPIN_TRIES,
};
use crate::error::{GyreError, Result};
use crate::sequence::{DependentSequences, Sequence};

/// Policy for waiting until a target sequence is reached.
///
/// `wait_for` returns a sequence `>= sequence` on success, or fails with
/// [`GyreError::Alert`] when the barrier is cancelled and
/// [`GyreError::Timeout`] when a deadline elapses. Blocking strategies are
/// woken by `signal_all_when_blocking`, called by producers on publish.
pub trait WaitStrategy: Send + Sync {
    /// Wait until the dependent sequences reach `sequence`
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64>;

    /// Wake any consumers blocked on this strategy
    fn signal_all_when_blocking(&self) {}
}

/// Busy spin wait strategy - lowest latency, highest CPU usage
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusySpinWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            hint::spin_loop();
        }
    }
}

/// Yielding wait strategy - spins briefly, then yields each iteration
pub struct YieldingWaitStrategy;

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = YIELD_SPIN_TRIES;
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                hint::spin_loop();
            }
        }
    }
}

/// Sleeping wait strategy - lowest CPU usage, higher latency
///
/// Spins through a retry budget, yields through the tail of it, then
/// sleeps a fixed nanosecond quantum per iteration.
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep_nanos: u64,
}

impl SleepingWaitStrategy {
    const SPIN_THRESHOLD: u32 = 100;

    pub fn new() -> Self {
        Self::with_timing(SLEEP_DEFAULT_RETRIES, SLEEP_DEFAULT_NANOS)
    }

    pub fn with_retries(retries: u32) -> Self {
        Self::with_timing(retries, SLEEP_DEFAULT_NANOS)
    }

    pub fn with_timing(retries: u32, sleep_nanos: u64) -> Self {
        Self {
            retries,
            sleep_nanos,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = self.retries;
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            if counter > Self::SPIN_THRESHOLD {
                counter -= 1;
                hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_nanos(self.sleep_nanos));
            }
        }
    }
}

/// Blocking wait strategy - parks on a condition variable until publish
///
/// Producers take the lock only to signal; consumers that are ahead of the
/// cursor never touch it.
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                alert.check()?;
                self.condvar.wait(&mut guard);
            }
        }

        // The cursor has arrived; spin the dependents to convergence.
        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Blocking wait strategy that elides the signalling lock when no consumer
/// is parked.
///
/// Waiters raise `signal_needed` before parking; producers only take the
/// mutex when the flag was set, saving a lock round-trip on the hot publish
/// path.
pub struct LiteBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
}

impl LiteBlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            signal_needed: AtomicBool::new(false),
        }
    }
}

impl Default for LiteBlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for LiteBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            loop {
                self.signal_needed.store(true, Ordering::Release);
                if cursor.get() >= sequence {
                    break;
                }
                alert.check()?;
                self.condvar.wait(&mut guard);
                if cursor.get() >= sequence {
                    break;
                }
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::AcqRel) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Blocking wait strategy with a deadline.
///
/// Fails with [`GyreError::Timeout`] when the deadline elapses while the
/// cursor is still behind the target. Remaining time is recomputed from a
/// monotonic clock on every wake, so spurious wakeups cannot extend the
/// deadline.
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut remaining = self.timeout;
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                alert.check()?;
                let started = Instant::now();
                self.condvar.wait_for(&mut guard, remaining);
                remaining = remaining.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(GyreError::Timeout);
                }
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// [`TimeoutBlockingWaitStrategy`] with the lock-eliding signal of
/// [`LiteBlockingWaitStrategy`].
pub struct LiteTimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
    timeout: Duration,
}

impl LiteTimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            signal_needed: AtomicBool::new(false),
            timeout,
        }
    }
}

impl WaitStrategy for LiteTimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut remaining = self.timeout;
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                self.signal_needed.store(true, Ordering::Release);
                alert.check()?;
                let started = Instant::now();
                self.condvar.wait_for(&mut guard, remaining);
                remaining = remaining.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(GyreError::Timeout);
                }
            }
        }

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }
            alert.check()?;
            hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::AcqRel) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Phased backoff wait strategy - spin, then yield, then fall back.
///
/// Spins for `spin_timeout`, yields until `spin_timeout + yield_timeout`,
/// then delegates to the fallback strategy. Suited to bursty workloads
/// where latency only matters while the stream is hot.
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_deadline: Duration,
    fallback: Box<dyn WaitStrategy>,
}

impl PhasedBackoffWaitStrategy {
    pub fn new(
        spin_timeout: Duration,
        yield_timeout: Duration,
        fallback: Box<dyn WaitStrategy>,
    ) -> Self {
        Self {
            spin_timeout,
            yield_deadline: spin_timeout + yield_timeout,
            fallback,
        }
    }

    /// Back off to a [`BlockingWaitStrategy`]
    pub fn with_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(BlockingWaitStrategy::new()),
        )
    }

    /// Back off to a [`LiteBlockingWaitStrategy`]
    pub fn with_lite_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(LiteBlockingWaitStrategy::new()),
        )
    }

    /// Back off to a [`SleepingWaitStrategy`] with no retry budget
    pub fn with_sleep(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(SleepingWaitStrategy::with_retries(0)),
        )
    }
}

impl WaitStrategy for PhasedBackoffWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &DependentSequences,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = PHASED_SPIN_TRIES;
        let mut started: Option<Instant> = None;

        loop {
            let available = dependents.get();
            if available >= sequence {
                return Ok(available);
            }

            counter -= 1;
            if counter == 0 {
                alert.check()?;
                match started {
                    None => started = Some(Instant::now()),
                    Some(start) => {
                        let elapsed = start.elapsed();
                        if elapsed > self.yield_deadline {
                            return self.fallback.wait_for(sequence, cursor, dependents, alert);
                        }
                        if elapsed > self.spin_timeout {
                            thread::yield_now();
                        }
                    }
                }
                counter = PHASED_SPIN_TRIES;
            } else {
                hint::spin_loop();
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::INITIAL_CURSOR_VALUE;
    use std::sync::Arc;

    fn harness() -> (Arc<Sequence>, DependentSequences, AlertFlag) {
        let cursor = Arc::new(Sequence::default());
        let dependents = DependentSequences::Cursor(cursor.clone());
        (cursor, dependents, AlertFlag::new())
    }

    fn assert_waits_and_wakes(strategy: impl WaitStrategy + 'static) {
        let strategy = Arc::new(strategy);
        let cursor = Arc::new(Sequence::default());
        let alert = Arc::new(AlertFlag::new());

        let publisher = {
            let strategy = Arc::clone(&strategy);
            let cursor = Arc::clone(&cursor);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                cursor.set(3);
                strategy.signal_all_when_blocking();
            })
        };

        let dependents = DependentSequences::Cursor(cursor.clone());
        let available = strategy.wait_for(3, &cursor, &dependents, &alert).unwrap();
        assert!(available >= 3);
        publisher.join().unwrap();
    }

    #[test]
    fn test_busy_spin_returns_when_available() {
        let (cursor, dependents, alert) = harness();
        cursor.set(5);
        let strategy = BusySpinWaitStrategy::new();
        assert_eq!(strategy.wait_for(3, &cursor, &dependents, &alert).unwrap(), 5);
    }

    #[test]
    fn test_busy_spin_observes_alert() {
        let (cursor, dependents, alert) = harness();
        assert_eq!(cursor.get(), INITIAL_CURSOR_VALUE);
        alert.set();
        let strategy = BusySpinWaitStrategy::new();
        let result = strategy.wait_for(0, &cursor, &dependents, &alert);
        assert!(matches!(result, Err(GyreError::Alert)));
    }

    #[test]
    fn test_yielding_wakes_on_publish() {
        assert_waits_and_wakes(YieldingWaitStrategy::new());
    }

    #[test]
    fn test_sleeping_wakes_on_publish() {
        assert_waits_and_wakes(SleepingWaitStrategy::with_timing(10, 100));
    }

    #[test]
    fn test_blocking_wakes_on_signal() {
        assert_waits_and_wakes(BlockingWaitStrategy::new());
    }

    #[test]
    fn test_lite_blocking_wakes_on_signal() {
        assert_waits_and_wakes(LiteBlockingWaitStrategy::new());
    }

    #[test]
    fn test_phased_backoff_wakes_on_signal() {
        assert_waits_and_wakes(PhasedBackoffWaitStrategy::with_lock(
            Duration::from_micros(10),
            Duration::from_micros(10),
        ));
    }

    #[test]
    fn test_timeout_strategy_times_out() {
        let (cursor, dependents, alert) = harness();
        let strategy = TimeoutBlockingWaitStrategy::new(Duration::from_millis(20));

        let started = Instant::now();
        let result = strategy.wait_for(0, &cursor, &dependents, &alert);
        assert!(matches!(result, Err(GyreError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_lite_timeout_strategy_times_out() {
        let (cursor, dependents, alert) = harness();
        let strategy = LiteTimeoutBlockingWaitStrategy::new(Duration::from_millis(20));
        let result = strategy.wait_for(0, &cursor, &dependents, &alert);
        assert!(matches!(result, Err(GyreError::Timeout)));
    }

    #[test]
    fn test_timeout_strategy_returns_before_deadline_when_published() {
        let (cursor, dependents, alert) = harness();
        cursor.set(9);
        let strategy = TimeoutBlockingWaitStrategy::new(Duration::from_secs(5));
        assert_eq!(strategy.wait_for(9, &cursor, &dependents, &alert).unwrap(), 9);
    }

    #[test]
    fn test_blocking_observes_alert_while_parked() {
        let cursor = Arc::new(Sequence::default());
        let alert = Arc::new(AlertFlag::new());
        let strategy = Arc::new(BlockingWaitStrategy::new());

        let alerter = {
            let alert = Arc::clone(&alert);
            let strategy = Arc::clone(&strategy);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                alert.set();
                strategy.signal_all_when_blocking();
            })
        };

        let dependents = DependentSequences::Cursor(cursor.clone());
        let result = strategy.wait_for(0, &cursor, &dependents, &alert);
        assert!(matches!(result, Err(GyreError::Alert)));
        alerter.join().unwrap();
    }
}
