use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

/// Hook that lets a device backend make progress while the CPU polls or waits.
///
/// Backends whose completion callbacks only run when the device is pumped
/// (wgpu on native) install a driver; backends that signal from another thread
/// leave it out and the fence parks on its condition variable instead.
pub trait FenceDriver: Send + Sync {
    /// Processes completions that are already available, without blocking.
    fn poll(&self);

    /// Blocks until submitted work makes progress or `timeout` expires.
    fn wait(&self, timeout: Option<Duration>);
}

/// Outcome of a time-boxed wait.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitStatus {
    Reached,
    TimedOut,
}

#[derive(Debug, Default, Copy, Clone)]
struct FenceValues {
    /// Highest value signaled so far.
    completed: u64,
    /// Highest value any submission promised to signal.
    target: u64,
}

struct FenceShared {
    label: String,
    values: Mutex<FenceValues>,
    cond: Condvar,
    driver: Option<Arc<dyn FenceDriver>>,
}

/// Monotonic counter shared between the CPU and the device.
///
/// Cloning produces another handle to the same counter. The device side calls
/// [`Fence::signal`] as work retires; the CPU polls with [`Fence::has_reached`]
/// or blocks with [`Fence::wait_until_cpu`] / [`Fence::wait_timeout`].
#[derive(Clone)]
pub struct Fence {
    shared: Arc<FenceShared>,
}

impl Fence {
    /// Creates a fence signaled from another thread (no driver).
    pub fn new(label: impl Into<String>) -> Self {
        Self::build(label.into(), None)
    }

    /// Creates a fence that pumps `driver` while polling or waiting.
    pub fn with_driver(label: impl Into<String>, driver: Arc<dyn FenceDriver>) -> Self {
        Self::build(label.into(), Some(driver))
    }

    fn build(label: String, driver: Option<Arc<dyn FenceDriver>>) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                label,
                values: Mutex::new(FenceValues::default()),
                cond: Condvar::new(),
                driver,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Last value signaled. Does not pump the driver.
    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    /// Last value scheduled for signaling.
    pub fn target(&self) -> u64 {
        self.lock().target
    }

    /// Returns true when both handles name the same counter.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Records that pending work will signal `value`.
    ///
    /// Values must be strictly increasing across calls.
    pub fn schedule(&self, value: u64) -> Result<()> {
        let mut values = self.lock();
        if value <= values.target {
            return Err(CoreError::protocol(format!(
                "fence `{}`: scheduled value {value} must exceed {}",
                self.shared.label, values.target
            )));
        }
        values.target = value;
        Ok(())
    }

    /// Withdraws a scheduled `value` whose work never reached the device.
    ///
    /// Waiters on it are woken and observe it as unscheduled.
    pub(crate) fn retract(&self, value: u64, previous: u64) {
        let mut values = self.lock();
        if values.target == value && values.completed < value {
            values.target = previous.max(values.completed);
        }
        drop(values);
        self.shared.cond.notify_all();
    }

    /// Forces the completed value to `value` and wakes waiters.
    ///
    /// Signaling the current value again is a no-op; a lower value is an error.
    pub fn signal(&self, value: u64) -> Result<()> {
        let mut values = self.lock();
        if value < values.completed {
            return Err(CoreError::NonMonotonicSignal {
                current: values.completed,
                requested: value,
            });
        }
        values.completed = value;
        values.target = values.target.max(value);
        drop(values);

        log::trace!("fence `{}` signaled {value}", self.shared.label);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Non-blocking check of `completed >= value`.
    pub fn has_reached(&self, value: u64) -> bool {
        if let Some(driver) = &self.shared.driver {
            driver.poll();
        }
        self.lock().completed >= value
    }

    /// Blocks the calling thread until `completed >= value`.
    ///
    /// Returns immediately when already satisfied. There is no timeout: a
    /// device that never reaches `value` blocks forever. Waiting on a value
    /// nothing has scheduled is reported instead of hanging.
    pub fn wait_until_cpu(&self, value: u64) -> Result<()> {
        self.wait_inner(value, None).map(|_| ())
    }

    /// Like [`Fence::wait_until_cpu`], but gives up after `timeout`.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> Result<WaitStatus> {
        self.wait_inner(value, Some(timeout))
    }

    fn wait_inner(&self, value: u64, timeout: Option<Duration>) -> Result<WaitStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(driver) = &self.shared.driver {
                driver.poll();
            }

            let values = self.lock();
            if values.completed >= value {
                return Ok(WaitStatus::Reached);
            }
            if value > values.target {
                return Err(CoreError::NeverScheduled {
                    value,
                    scheduled: values.target,
                });
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::warn!(
                            "fence `{}`: wait for {value} timed out at {}",
                            self.shared.label,
                            values.completed
                        );
                        return Ok(WaitStatus::TimedOut);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match &self.shared.driver {
                Some(driver) => {
                    drop(values);
                    driver.wait(remaining);
                }
                None => match remaining {
                    Some(remaining) => {
                        let (values, _) = self
                            .shared
                            .cond
                            .wait_timeout(values, remaining)
                            .unwrap_or_else(PoisonError::into_inner);
                        drop(values);
                    }
                    None => {
                        let values = self
                            .shared
                            .cond
                            .wait(values)
                            .unwrap_or_else(PoisonError::into_inner);
                        drop(values);
                    }
                },
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, FenceValues> {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.lock();
        f.debug_struct("Fence")
            .field("label", &self.shared.label)
            .field("completed", &values.completed)
            .field("target", &values.target)
            .field("driven", &self.shared.driver.is_some())
            .finish()
    }
}

/// A pending `fence.signal(value)`, fired by a backend once a batch retires.
#[derive(Debug, Clone)]
pub struct FenceSignal {
    fence: Fence,
    value: u64,
}

impl FenceSignal {
    pub(crate) fn new(fence: Fence, value: u64) -> Self {
        Self { fence, value }
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Signals the fence. Failures are logged; the device side has no caller to report to.
    pub fn fire(self) {
        if let Err(err) = self.fence.signal(self.value) {
            log::error!("fence `{}`: {err}", self.fence.label());
        }
    }
}
