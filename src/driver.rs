//! Single-task session actor.
//!
//! The driver owns the optimistic store, the synchronizer and the reconnect
//! controller, and serialises every state transition through one `select!`
//! loop. Network calls are the only suspension points; at most one fetch
//! against the session is outstanding at any time.

use crate::{
    authority::{
        Action,
        ActionResult,
        SessionAuthority,
        TransportError,
    },
    config::SessionConfig,
    connectivity::{
        Connectivity,
        ConnectivityMonitor,
    },
    optimistic::{
        OptimisticStore,
        StoreError,
        TentativeUpdate,
    },
    reconnect::{
        ConnectivityState,
        ReconnectController,
        RetryDecision,
    },
    session::{
        ActorId,
        SessionId,
        UpdateId,
    },
    sync::{
        PollOutcome,
        PollTicket,
        StateSynchronizer,
        jittered_interval,
    },
};
use chrono::Utc;
use futures::{
    FutureExt,
    future::BoxFuture,
};
use std::{
    fmt::Debug,
    future::pending,
    pin::Pin,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::{
        JoinHandle,
        JoinSet,
    },
    time::{
        self,
        Instant,
        Interval,
        MissedTickBehavior,
        Sleep,
    },
};
use tracing::{
    debug,
    info,
    trace,
    warn,
};

/// Bounds every session snapshot type must meet.
pub trait SessionState: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> SessionState for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session driver has stopped")]
    Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent<S> {
    /// A poll observed a new authoritative state.
    StateChanged(S),
    /// A tentative update was discarded: rejected, failed, or expired.
    Rollback(TentativeUpdate<S>),
    Recovered(S),
    ConnectionLost,
    /// Recovery gave up; no further fetches will be made.
    Abandoned,
}

enum Command<S> {
    Apply {
        id: UpdateId,
        candidate: S,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Confirm {
        id: UpdateId,
        state: Option<S>,
    },
    Rollback {
        id: UpdateId,
    },
    Submit {
        id: UpdateId,
        candidate: S,
        actor: ActorId,
        action: Action,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    SyncNow,
    Reconnect,
}

type FetchResult<S> = Result<Option<S>, TransportError>;

enum FetchKind {
    Poll(PollTicket),
    Reconnect,
}

struct InFlight<S> {
    kind: FetchKind,
    future: BoxFuture<'static, FetchResult<S>>,
}

struct ActionOutcome<S> {
    id: UpdateId,
    result: Result<ActionResult<S>, TransportError>,
}

pub struct SessionDriver<S, A, C> {
    session: SessionId,
    config: SessionConfig,
    authority: Arc<A>,
    connectivity: C,
    connectivity_open: bool,
    store: OptimisticStore<S>,
    sync: StateSynchronizer<S>,
    reconnect: ReconnectController<S>,
    commands: mpsc::UnboundedReceiver<Command<S>>,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SessionEvent<S>>,
    display: watch::Sender<S>,
    status: watch::Sender<ConnectivityState>,
    in_flight: Option<InFlight<S>>,
    poll_timer: Pin<Box<Sleep>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    sweep: Interval,
    submissions: JoinSet<ActionOutcome<S>>,
}

impl<S, A, C> SessionDriver<S, A, C>
where
    S: SessionState,
    A: SessionAuthority<S>,
    C: ConnectivityMonitor,
{
    /// Starts the driver on the current tokio runtime. `initial` is the
    /// snapshot the caller already holds; the first poll runs immediately.
    pub fn spawn(
        config: SessionConfig,
        session: SessionId,
        initial: S,
        authority: A,
        connectivity: C,
    ) -> (SessionHandle<S>, mpsc::UnboundedReceiver<SessionEvent<S>>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (display, display_rx) = watch::channel(initial.clone());

        let reconnect =
            ReconnectController::new(session.clone(), config.backoff(), Utc::now())
                .with_max_attempts(config.max_reconnect_attempts);
        let (status, status_rx) = watch::channel(reconnect.state().clone());

        let rollback_events = event_tx.clone();
        let store = OptimisticStore::new(initial.clone())
            .with_max_pending_age(config.pending_timeout())
            .with_rollback_hook(move |update| {
                if rollback_events
                    .send(SessionEvent::Rollback(update.clone()))
                    .is_err()
                {
                    trace!(update = %update.id, "event receiver gone; rollback not delivered");
                }
            });

        let mut sync = StateSynchronizer::new(session.clone());
        sync.prime(initial);

        let mut sweep = time::interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let poll_timer = Box::pin(time::sleep(config.poll_interval()));

        let driver = Self {
            session: session.clone(),
            config,
            authority: Arc::new(authority),
            connectivity,
            connectivity_open: true,
            store,
            sync,
            reconnect,
            commands,
            shutdown,
            events: event_tx,
            display,
            status,
            in_flight: None,
            poll_timer,
            retry_timer: None,
            sweep,
            submissions: JoinSet::new(),
        };
        let task = tokio::spawn(driver.run());

        let handle = SessionHandle {
            session,
            commands: command_tx,
            display: display_rx,
            status: status_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        };
        (handle, event_rx)
    }

    async fn run(mut self) {
        info!(session = %self.session, "session driver started");
        self.start_poll();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }
                result = next_fetch(&mut self.in_flight) => self.handle_fetch(result),
                _ = fire(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.start_reconnect_attempt();
                }
                change = self.connectivity.next_change(), if self.connectivity_open => {
                    self.handle_connectivity(change);
                }
                Some(joined) = self.submissions.join_next(), if !self.submissions.is_empty() => {
                    match joined {
                        Ok(outcome) => self.handle_action_outcome(outcome),
                        Err(err) => warn!(session = %self.session, ?err, "action task failed"),
                    }
                }
                _ = &mut self.poll_timer => self.handle_poll_tick(),
                _ = self.sweep.tick(), if self.sweep_enabled() => self.sweep_pending(),
            }
        }

        info!(session = %self.session, "session driver stopped");
    }

    fn handle_command(&mut self, command: Command<S>) {
        match command {
            Command::Apply {
                id,
                candidate,
                reply,
            } => {
                let result = self.store.apply_optimistic_update(id, candidate);
                self.publish_display();
                let _ = reply.send(result);
            }
            Command::Confirm { id, state } => {
                self.store.confirm_update(&id, state);
                self.publish_display();
            }
            Command::Rollback { id } => {
                self.store.rollback_update(&id);
                self.publish_display();
            }
            Command::Submit {
                id,
                candidate,
                actor,
                action,
                reply,
            } => {
                let result = self.store.apply_optimistic_update(id.clone(), candidate);
                if result.is_ok() {
                    self.publish_display();
                    self.spawn_submission(id, actor, action);
                }
                let _ = reply.send(result);
            }
            Command::SyncNow => self.start_poll(),
            Command::Reconnect => self.start_reconnect_attempt(),
        }
    }

    fn fetch_future(&self) -> BoxFuture<'static, FetchResult<S>> {
        let authority = Arc::clone(&self.authority);
        let session = self.session.clone();
        async move { authority.fetch_session_state(&session).await }.boxed()
    }

    fn start_poll(&mut self) {
        if self.in_flight.is_some() {
            debug!(session = %self.session, "fetch already in flight; skipping poll");
            return;
        }
        let Some(ticket) = self.sync.begin_poll() else {
            return;
        };
        self.in_flight = Some(InFlight {
            kind: FetchKind::Poll(ticket),
            future: self.fetch_future(),
        });
    }

    fn cancel_poll(&mut self) {
        let polling = matches!(
            self.in_flight,
            Some(InFlight {
                kind: FetchKind::Poll(_),
                ..
            })
        );
        if !polling {
            return;
        }
        if let Some(InFlight {
            kind: FetchKind::Poll(ticket),
            ..
        }) = self.in_flight.take()
        {
            self.sync.cancel_poll(ticket);
        }
    }

    fn handle_poll_tick(&mut self) {
        let scheduled = self.poll_timer.deadline();
        self.reschedule_poll(scheduled);
        self.start_poll();
    }

    fn reschedule_poll(&mut self, from: Instant) {
        let delay = jittered_interval(
            self.config.poll_interval(),
            self.config.poll_jitter(),
            &mut rand::rng(),
        );
        let now = Instant::now();
        let mut next = from + delay;
        if next <= now {
            next = now + delay;
        }
        self.poll_timer.as_mut().reset(next);
    }

    fn handle_fetch(&mut self, result: FetchResult<S>) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        match in_flight.kind {
            FetchKind::Poll(ticket) => self.finish_poll(ticket, result),
            FetchKind::Reconnect => self.finish_reconnect(result),
        }
    }

    fn finish_poll(&mut self, ticket: PollTicket, result: FetchResult<S>) {
        match self.sync.finish_poll(ticket, result) {
            PollOutcome::Changed(state) => {
                let reconciled = self.store.reconcile(state.clone());
                debug!(
                    session = %self.session,
                    confirmed = reconciled.confirmed.len(),
                    "authoritative state changed"
                );
                self.publish_display();
                self.emit(SessionEvent::StateChanged(state));
            }
            PollOutcome::Failed => self.escalate_if_unreachable(),
            PollOutcome::Unchanged
            | PollOutcome::Missing
            | PollOutcome::Discarded
            | PollOutcome::Skipped => {}
        }
    }

    fn escalate_if_unreachable(&mut self) {
        let Some(threshold) = self.config.failure_threshold else {
            return;
        };
        if self.sync.consecutive_failures() < threshold {
            return;
        }
        if self.reconnect.on_transport_lost() {
            self.emit(SessionEvent::ConnectionLost);
            self.start_reconnect_attempt();
        }
    }

    fn start_reconnect_attempt(&mut self) {
        if self.reconnect.is_abandoned() {
            debug!(session = %self.session, "session abandoned; not reconnecting");
            return;
        }
        if matches!(
            self.in_flight,
            Some(InFlight {
                kind: FetchKind::Reconnect,
                ..
            })
        ) {
            debug!(session = %self.session, "reconnect attempt already in flight");
            return;
        }
        self.retry_timer = None;
        self.reconnect.cancel_retry();
        self.cancel_poll();

        let Some(attempt) = self.reconnect.begin_attempt() else {
            return;
        };
        info!(session = %self.session, attempt, "attempting to reconnect");
        self.refresh_sync_gate();
        self.in_flight = Some(InFlight {
            kind: FetchKind::Reconnect,
            future: self.fetch_future(),
        });
        self.publish_status();
    }

    fn finish_reconnect(&mut self, result: FetchResult<S>) {
        match result {
            Ok(Some(state)) => {
                let state = self.reconnect.attempt_succeeded(state, Utc::now());
                self.store.reconcile(state.clone());
                self.sync.prime(state.clone());
                self.reschedule_poll(Instant::now());
                self.refresh_sync_gate();
                self.publish_display();
                self.publish_status();
                self.emit(SessionEvent::Recovered(state));
            }
            Ok(None) => {
                self.reconnect.attempt_not_found();
                self.retry_timer = None;
                self.refresh_sync_gate();
                self.publish_status();
                self.emit(SessionEvent::Abandoned);
            }
            Err(err) => {
                debug!(session = %self.session, ?err, "reconnect fetch failed");
                match self.reconnect.attempt_failed() {
                    RetryDecision::Retry(delay) => {
                        self.retry_timer = Some(Box::pin(time::sleep(delay)));
                    }
                    RetryDecision::Abandon => {
                        self.retry_timer = None;
                        self.refresh_sync_gate();
                        self.emit(SessionEvent::Abandoned);
                    }
                }
                self.publish_status();
            }
        }
    }

    fn refresh_sync_gate(&mut self) {
        let enabled = !self.reconnect.is_reconnecting() && !self.reconnect.is_abandoned();
        self.sync.set_enabled(enabled);
        if !enabled {
            self.cancel_poll();
        }
    }

    fn handle_connectivity(&mut self, change: Option<Connectivity>) {
        match change {
            None => {
                debug!(session = %self.session, "connectivity monitor closed");
                self.connectivity_open = false;
            }
            Some(Connectivity::Offline) => {
                let was_reconnecting = self.reconnect.is_reconnecting();
                self.reconnect.on_offline();
                self.refresh_sync_gate();
                self.publish_status();
                if !was_reconnecting && self.reconnect.is_reconnecting() {
                    self.emit(SessionEvent::ConnectionLost);
                }
            }
            Some(Connectivity::Online) => {
                if self.reconnect.on_online() {
                    self.start_reconnect_attempt();
                }
                self.publish_status();
            }
        }
    }

    fn spawn_submission(&mut self, id: UpdateId, actor: ActorId, action: Action) {
        let authority = Arc::clone(&self.authority);
        let session = self.session.clone();
        let deadline = self.config.action_timeout();
        self.submissions.spawn(async move {
            let submitted =
                time::timeout(deadline, authority.submit_action(&session, &actor, &action))
                    .await;
            let result = match submitted {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            ActionOutcome { id, result }
        });
    }

    fn handle_action_outcome(&mut self, outcome: ActionOutcome<S>) {
        let ActionOutcome { id, result } = outcome;
        match result {
            Ok(ActionResult::Accepted(state)) => {
                let seen = state.clone();
                if self.store.confirm_update(&id, state) {
                    if let Some(state) = seen {
                        self.sync.prime(state);
                    }
                } else {
                    debug!(
                        session = %self.session,
                        update = %id,
                        "move accepted after its update was resolved; resyncing"
                    );
                    self.start_poll();
                }
            }
            Ok(ActionResult::Rejected(reason)) => {
                info!(session = %self.session, update = %id, %reason, "move rejected");
                self.store.rollback_update(&id);
            }
            Err(err) => {
                warn!(session = %self.session, update = %id, ?err, "move submission failed");
                self.store.rollback_update(&id);
            }
        }
        self.publish_display();
    }

    fn sweep_enabled(&self) -> bool {
        self.store.max_pending_age().is_some() && self.store.has_pending_updates()
    }

    fn sweep_pending(&mut self) {
        let expired = self.store.expire_stale(Instant::now());
        if !expired.is_empty() {
            self.publish_display();
        }
    }

    fn publish_display(&self) {
        let display = self.store.display_state();
        self.display.send_if_modified(|current| {
            if current == display {
                return false;
            }
            *current = display.clone();
            true
        });
    }

    fn publish_status(&self) {
        let state = self.reconnect.state();
        self.status.send_if_modified(|current| {
            if current == state {
                return false;
            }
            *current = state.clone();
            true
        });
    }

    fn emit(&self, event: SessionEvent<S>) {
        if self.events.send(event).is_err() {
            trace!(session = %self.session, "event receiver gone; event dropped");
        }
    }
}

async fn next_fetch<S>(slot: &mut Option<InFlight<S>>) -> FetchResult<S> {
    match slot.as_mut() {
        Some(in_flight) => (&mut in_flight.future).await,
        None => pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

/// UI-side entry point to a running [`SessionDriver`].
///
/// Dropping the handle stops the driver; [`SessionHandle::shutdown`] also
/// waits for it to finish.
pub struct SessionHandle<S> {
    session: SessionId,
    commands: mpsc::UnboundedSender<Command<S>>,
    display: watch::Receiver<S>,
    status: watch::Receiver<ConnectivityState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<S> SessionHandle<S>
where
    S: SessionState,
{
    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn display_state(&self) -> watch::Receiver<S> {
        self.display.clone()
    }

    pub fn current_display_state(&self) -> S {
        self.display.borrow().clone()
    }

    pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.status.clone()
    }

    pub fn current_connectivity(&self) -> ConnectivityState {
        self.status.borrow().clone()
    }

    pub async fn apply_optimistic_update(
        &self,
        id: UpdateId,
        candidate: S,
    ) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Apply {
            id,
            candidate,
            reply,
        })?;
        response.await.map_err(|_| DriverError::Closed)??;
        Ok(())
    }

    pub fn confirm_update(&self, id: UpdateId, state: Option<S>) -> Result<(), DriverError> {
        self.send(Command::Confirm { id, state })
    }

    pub fn rollback_update(&self, id: UpdateId) -> Result<(), DriverError> {
        self.send(Command::Rollback { id })
    }

    /// Applies `candidate` optimistically, then submits `action` to the
    /// authority. The update is confirmed or rolled back when it answers.
    pub async fn submit_move(
        &self,
        id: UpdateId,
        candidate: S,
        actor: ActorId,
        action: Action,
    ) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Submit {
            id,
            candidate,
            actor,
            action,
            reply,
        })?;
        response.await.map_err(|_| DriverError::Closed)??;
        Ok(())
    }

    pub fn sync_now(&self) -> Result<(), DriverError> {
        self.send(Command::SyncNow)
    }

    pub fn reconnect(&self) -> Result<(), DriverError> {
        self.send(Command::Reconnect)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the driver and waits for it. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(session = %self.session, ?err, "session driver task failed");
        }
    }

    fn send(&self, command: Command<S>) -> Result<(), DriverError> {
        self.commands.send(command).map_err(|_| DriverError::Closed)
    }
}

impl<S> Drop for SessionHandle<S> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
