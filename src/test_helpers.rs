use crate::{
    authority::{
        Action,
        ActionResult,
        SessionAuthority,
        TransportError,
    },
    config::SessionConfig,
    game::{
        GameMode,
        GameSession,
        GameStatus,
        PlayerBoard,
        RankedStatus,
    },
    optimistic::TentativeUpdate,
    session::{
        ActorId,
        SessionId,
    },
};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};

pub fn arb_game_session() -> GameSession {
    GameSession {
        id: "game-1".to_string(),
        status: GameStatus::Active,
        bet_amount: 0.5,
        mode: GameMode::Classic,
        created_at: 1_700_000_000,
        winner: None,
        is_demo: false,
        players: vec!["red".to_string(), "green".to_string()],
        ranked_status: RankedStatus::Ranked,
        board: vec![PlayerBoard::new("red", 0), PlayerBoard::new("green", 13)],
        last_roll: None,
    }
}

/// Defaults with no poll jitter and no backoff jitter, so paused-clock tests
/// can assert exact instants.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        poll_jitter_ms: 0,
        backoff_jitter: false,
        ..SessionConfig::default()
    }
}

/// Records every update handed to a rollback hook.
pub struct RollbackLog<S> {
    entries: Arc<Mutex<Vec<TentativeUpdate<S>>>>,
}

impl<S> Default for RollbackLog<S> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<S> RollbackLog<S>
where
    S: Clone + Send + 'static,
{
    pub fn hook(&self) -> impl FnMut(&TentativeUpdate<S>) + Send + 'static {
        let entries = Arc::clone(&self.entries);
        move |update| {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(update.clone());
        }
    }

    pub fn entries(&self) -> Vec<TentativeUpdate<S>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-memory authority with scriptable latency and failures.
pub struct FakeAuthority<S> {
    inner: Arc<Mutex<FakeState<S>>>,
}

impl<S> Clone for FakeAuthority<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct FakeState<S> {
    state: Option<S>,
    failing: bool,
    fail_next: u32,
    fetch_delay: Duration,
    action_delay: Duration,
    fetch_calls: Vec<Instant>,
    active_fetches: usize,
    max_active_fetches: usize,
    action_results: VecDeque<Result<ActionResult<S>, String>>,
    submitted: Vec<(ActorId, Action)>,
}

struct ActiveFetch<'a, S> {
    inner: &'a Mutex<FakeState<S>>,
}

impl<S> Drop for ActiveFetch<'_, S> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.active_fetches = inner.active_fetches.saturating_sub(1);
    }
}

impl<S> FakeAuthority<S>
where
    S: Clone,
{
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                state: Some(state),
                failing: false,
                fail_next: 0,
                fetch_delay: Duration::ZERO,
                action_delay: Duration::ZERO,
                fetch_calls: Vec::new(),
                active_fetches: 0,
                max_active_fetches: 0,
                action_results: VecDeque::new(),
                submitted: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: S) {
        self.lock().state = Some(state);
    }

    /// Subsequent fetches report the session as unknown.
    pub fn remove_session(&self) {
        self.lock().state = None;
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().fail_next = count;
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = delay;
    }

    pub fn set_action_delay(&self, delay: Duration) {
        self.lock().action_delay = delay;
    }

    /// Start instants of every fetch, in call order.
    pub fn fetch_calls(&self) -> Vec<Instant> {
        self.lock().fetch_calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetch_calls.len()
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.lock().max_active_fetches
    }

    pub fn push_action_result(&self, result: ActionResult<S>) {
        self.lock().action_results.push_back(Ok(result));
    }

    pub fn push_action_error(&self, message: impl Into<String>) {
        self.lock().action_results.push_back(Err(message.into()));
    }

    pub fn submitted_actions(&self) -> Vec<(ActorId, Action)> {
        self.lock().submitted.clone()
    }
}

impl<S> SessionAuthority<S> for FakeAuthority<S>
where
    S: Clone + Send + 'static,
{
    async fn fetch_session_state(
        &self,
        _session: &SessionId,
    ) -> Result<Option<S>, TransportError> {
        let delay = {
            let mut inner = self.lock();
            inner.fetch_calls.push(Instant::now());
            inner.active_fetches += 1;
            inner.max_active_fetches = inner.max_active_fetches.max(inner.active_fetches);
            inner.fetch_delay
        };
        let _active = ActiveFetch { inner: &self.inner };
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        let mut inner = self.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::Unavailable("scripted failure".to_string()));
        }
        if inner.failing {
            return Err(TransportError::Unavailable("authority down".to_string()));
        }
        Ok(inner.state.clone())
    }

    async fn submit_action(
        &self,
        _session: &SessionId,
        actor: &ActorId,
        action: &Action,
    ) -> Result<ActionResult<S>, TransportError> {
        let delay = {
            let mut inner = self.lock();
            inner.submitted.push((actor.clone(), action.clone()));
            inner.action_delay
        };
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        let next = self.lock().action_results.pop_front();
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(TransportError::Unavailable(message)),
            None => Ok(ActionResult::Accepted(None)),
        }
    }
}
