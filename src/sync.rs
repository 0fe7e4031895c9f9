use crate::{
    authority::{
        SessionAuthority,
        TransportError,
    },
    session::SessionId,
};
use rand::Rng;
use std::time::Duration;
use tracing::{
    debug,
    trace,
    warn,
};


pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Polling,
}

/// Proof that a poll was started. Only one exists at a time.
#[derive(Debug)]
#[must_use]
pub struct PollTicket {
    _private: (),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome<S> {
    /// Authoritative state differs from the last one seen.
    Changed(S),
    Unchanged,
    /// Authority has no such session.
    Missing,
    Failed,
    /// Result arrived after the synchronizer was disabled.
    Discarded,
    /// No fetch was issued.
    Skipped,
}

/// Steady-state poller for one session.
///
/// Tracks the last authoritative snapshot and refuses to start a poll while
/// another one is outstanding or while disabled.
#[derive(Debug)]
pub struct StateSynchronizer<S> {
    session: SessionId,
    enabled: bool,
    phase: SyncPhase,
    last_state: Option<S>,
    consecutive_failures: u32,
}

impl<S> StateSynchronizer<S>
where
    S: Clone + PartialEq,
{
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            enabled: true,
            phase: SyncPhase::Idle,
            last_state: None,
            consecutive_failures: 0,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            debug!(session = %self.session, enabled, "state sync toggled");
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn last_state(&self) -> Option<&S> {
        self.last_state.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Records `state` as already seen so the next identical poll is quiet.
    pub fn prime(&mut self, state: S) {
        self.last_state = Some(state);
        self.consecutive_failures = 0;
    }

    pub fn begin_poll(&mut self) -> Option<PollTicket> {
        if !self.enabled {
            trace!(session = %self.session, "state sync disabled; skipping poll");
            return None;
        }
        if self.phase == SyncPhase::Polling {
            debug!(session = %self.session, "previous poll still in flight; skipping tick");
            return None;
        }
        self.phase = SyncPhase::Polling;
        Some(PollTicket { _private: () })
    }

    /// Drops an outstanding poll without looking at its result.
    pub fn cancel_poll(&mut self, _ticket: PollTicket) {
        trace!(session = %self.session, "poll cancelled");
        self.phase = SyncPhase::Idle;
    }

    pub fn finish_poll(
        &mut self,
        _ticket: PollTicket,
        result: Result<Option<S>, TransportError>,
    ) -> PollOutcome<S> {
        self.phase = SyncPhase::Idle;
        if !self.enabled {
            debug!(session = %self.session, "discarding poll result received while disabled");
            return PollOutcome::Discarded;
        }
        match result {
            Ok(Some(state)) => {
                self.consecutive_failures = 0;
                if self.last_state.as_ref() == Some(&state) {
                    return PollOutcome::Unchanged;
                }
                self.last_state = Some(state.clone());
                PollOutcome::Changed(state)
            }
            Ok(None) => {
                self.consecutive_failures = 0;
                warn!(session = %self.session, "authority has no record of session");
                PollOutcome::Missing
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    session = %self.session,
                    ?err,
                    failures = self.consecutive_failures,
                    "failed to sync game state"
                );
                PollOutcome::Failed
            }
        }
    }

    /// Runs one complete poll against `authority`.
    ///
    /// Dropping the returned future mid-fetch leaves the synchronizer idle.
    pub async fn poll_once<A>(&mut self, authority: &A) -> PollOutcome<S>
    where
        A: SessionAuthority<S>,
    {
        let Some(ticket) = self.begin_poll() else {
            return PollOutcome::Skipped;
        };
        let mut guard = PollGuard {
            sync: self,
            ticket: Some(ticket),
        };
        let result = authority.fetch_session_state(&guard.sync.session).await;
        match guard.ticket.take() {
            Some(ticket) => guard.sync.finish_poll(ticket, result),
            None => PollOutcome::Skipped,
        }
    }
}

/// Returns the synchronizer to idle if a poll is abandoned before it finishes.
struct PollGuard<'a, S> {
    sync: &'a mut StateSynchronizer<S>,
    ticket: Option<PollTicket>,
}

impl<S> Drop for PollGuard<'_, S> {
    fn drop(&mut self) {
        if self.ticket.take().is_some() {
            trace!(session = %self.sync.session, "poll abandoned mid-fetch");
            self.sync.phase = SyncPhase::Idle;
        }
    }
}

/// Delay until the next poll: `interval` plus a uniform share of `jitter`.
pub fn jittered_interval(
    interval: Duration,
    jitter: Duration,
    rng: &mut impl Rng,
) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rng.random_range(0..=jitter_ms))
}
