use crate::session::SessionId;
use chrono::{
    DateTime,
    Utc,
};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{
    debug,
    info,
    warn,
};


pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(16_000);

/// Capped exponential backoff: `base * 2^(attempt - 1)`, never above `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the `attempt`-th consecutive failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(cap_ms);
        Duration::from_millis(delay_ms)
    }

    /// Like [`Backoff::delay`], with equal jitter applied when enabled: the
    /// result lies in `[delay / 2, delay]`.
    pub fn next_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let delay = self.delay(attempt);
        if !self.jitter {
            return delay;
        }
        let delay_ms = delay.as_millis() as u64;
        if delay_ms <= 1 {
            return delay;
        }
        let half_ms = delay_ms / 2;
        Duration::from_millis(half_ms + rng.random_range(0..=half_ms))
    }
}

/// Reachability of the session as shown to the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub online: bool,
    pub reconnecting: bool,
    pub attempt_count: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub abandoned: bool,
}

impl ConnectivityState {
    pub fn connected_at(now: DateTime<Utc>) -> Self {
        Self {
            online: true,
            reconnecting: false,
            attempt_count: 0,
            last_connected_at: Some(now),
            abandoned: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Abandon,
}

/// Recovery state machine for one session.
///
/// The controller decides when to attempt a recovery fetch and how long to
/// wait after a failure; the caller owns the fetch itself and the timer.
#[derive(Debug)]
pub struct ReconnectController<S> {
    session: SessionId,
    state: ConnectivityState,
    recovered: Option<S>,
    backoff: Backoff,
    max_attempts: Option<u32>,
    in_flight: bool,
    retry_scheduled: bool,
}

impl<S> ReconnectController<S>
where
    S: Clone,
{
    pub fn new(session: SessionId, backoff: Backoff, now: DateTime<Utc>) -> Self {
        Self {
            session,
            state: ConnectivityState::connected_at(now),
            recovered: None,
            backoff,
            max_attempts: None,
            in_flight: false,
            retry_scheduled: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn recovered(&self) -> Option<&S> {
        self.recovered.as_ref()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.reconnecting
    }

    pub fn is_abandoned(&self) -> bool {
        self.state.abandoned
    }

    pub fn attempt_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled
    }

    pub fn on_offline(&mut self) {
        info!(session = %self.session, "connectivity lost");
        self.state.online = false;
        if !self.state.abandoned {
            self.state.reconnecting = true;
        }
    }

    /// Returns `true` when a recovery attempt should start now.
    pub fn on_online(&mut self) -> bool {
        info!(session = %self.session, "connectivity restored");
        self.state.online = true;
        self.state.reconnecting && !self.state.abandoned && !self.in_flight
    }

    /// Escalation from sustained RPC failures. Returns `true` if this starts
    /// a new recovery rather than joining one already running.
    pub fn on_transport_lost(&mut self) -> bool {
        if self.state.abandoned || self.state.reconnecting {
            return false;
        }
        warn!(session = %self.session, "authority unreachable; entering recovery");
        self.state.reconnecting = true;
        true
    }

    /// Marks an attempt as started and returns its ordinal. `None` while
    /// another attempt is outstanding or after the session was abandoned.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.state.abandoned || self.in_flight {
            return None;
        }
        self.in_flight = true;
        self.retry_scheduled = false;
        self.state.reconnecting = true;
        self.state.attempt_count = self.state.attempt_count.saturating_add(1);
        debug!(
            session = %self.session,
            attempt = self.state.attempt_count,
            "reconnect attempt started"
        );
        Some(self.state.attempt_count)
    }

    pub fn attempt_succeeded(&mut self, state: S, now: DateTime<Utc>) -> S {
        info!(
            session = %self.session,
            attempts = self.state.attempt_count,
            "session state recovered"
        );
        self.in_flight = false;
        self.retry_scheduled = false;
        self.state.reconnecting = false;
        self.state.attempt_count = 0;
        self.state.last_connected_at = Some(now);
        self.recovered = Some(state.clone());
        state
    }

    pub fn attempt_failed(&mut self) -> RetryDecision {
        self.in_flight = false;
        let attempts = self.state.attempt_count;
        if let Some(max) = self.max_attempts
            && attempts >= max
        {
            self.abandon();
            return RetryDecision::Abandon;
        }
        let delay = self.backoff.next_delay(attempts, &mut rand::rng());
        self.retry_scheduled = true;
        warn!(session = %self.session, attempts, ?delay, "reconnection failed; backing off");
        RetryDecision::Retry(delay)
    }

    /// The authority no longer knows the session; retrying cannot succeed.
    pub fn attempt_not_found(&mut self) {
        self.in_flight = false;
        self.abandon();
    }

    /// Aborts an outstanding attempt without counting it as failed.
    pub fn cancel_attempt(&mut self) {
        self.in_flight = false;
    }

    pub fn cancel_retry(&mut self) {
        self.retry_scheduled = false;
    }

    fn abandon(&mut self) {
        warn!(
            session = %self.session,
            attempts = self.state.attempt_count,
            "abandoning session recovery"
        );
        self.retry_scheduled = false;
        self.state.reconnecting = false;
        self.state.abandoned = true;
    }
}
