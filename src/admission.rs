//! Admission control for calls to the translation service.
//!
//! A single gate combining three limits:
//! - at most `max_concurrent` outstanding calls (semaphore),
//! - a token bucket of `requests_per_window` refilled over `window`,
//! - an explicit pause set when the service asks callers to back off.
//!
//! The controller only ever delays callers; it never fails them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;

/// Shared quota state. Only touched while holding the controller's lock.
#[derive(Debug)]
struct RateBudget {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    paused_until: Option<Instant>,
}

impl RateBudget {
    fn refill(&mut self, now: Instant) {
        if self.capacity <= 0.0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Reserve `cost` tokens, or report how long until that becomes possible.
    fn try_reserve(&mut self, cost: f64, now: Instant) -> Option<Duration> {
        if let Some(until) = self.paused_until {
            if until > now {
                return Some(until - now);
            }
            self.paused_until = None;
        }
        if self.capacity <= 0.0 {
            return None;
        }
        self.refill(now);
        let cost = cost.min(self.capacity);
        if self.tokens >= cost {
            self.tokens -= cost;
            None
        } else {
            let missing = cost - self.tokens;
            Some(Duration::from_secs_f64(missing / self.refill_per_sec).max(Duration::from_millis(1)))
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub max_concurrent: usize,
    /// Zero disables the windowed quota.
    pub requests_per_window: u32,
    pub window: Duration,
}

impl From<&EngineConfig> for AdmissionConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            requests_per_window: config.requests_per_window,
            window: Duration::from_secs(config.window_secs),
        }
    }
}

#[derive(Debug)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    budget: Mutex<RateBudget>,
}

/// A reserved concurrency slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Release the slot now. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let capacity = config.requests_per_window as f64;
        let window_secs = config.window.as_secs_f64().max(f64::EPSILON);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            budget: Mutex::new(RateBudget {
                capacity,
                tokens: capacity,
                refill_per_sec: capacity / window_secs,
                last_refill: Instant::now(),
                paused_until: None,
            }),
        }
    }

    /// Wait until a concurrency slot and `cost` quota tokens are available,
    /// then reserve both.
    pub async fn acquire(&self, cost: u32) -> AdmissionPermit {
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is owned here and never closed.
            Err(_) => unreachable!("admission semaphore closed"),
        };

        loop {
            let wait = {
                let mut budget = self.budget.lock().await;
                budget.try_reserve(cost as f64, Instant::now())
            };
            match wait {
                None => break,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Admission waiting for quota");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        AdmissionPermit { _permit: permit }
    }

    /// Withhold new admissions for at least `duration`. Never shortens an
    /// existing pause.
    pub async fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut budget = self.budget.lock().await;
        match budget.paused_until {
            Some(existing) if existing >= until => {}
            _ => {
                debug!(pause_ms = duration.as_millis() as u64, "Admission paused by service back-off");
                budget.paused_until = Some(until);
            }
        }
    }

    /// Number of calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
