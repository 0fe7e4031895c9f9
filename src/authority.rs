use crate::session::{
    ActorId,
    SessionId,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authority responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid authority payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request timed out")]
    Timeout,
    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

/// Moves the client can ask the authority to perform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    RollDice,
    MovePiece { piece: u8, steps: u8 },
    Join { is_demo: bool },
    Leave,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActionResult<S> {
    /// Carries the resulting state when the authority returns one.
    Accepted(Option<S>),
    Rejected(String),
}

/// Remote holder of the authoritative session state.
pub trait SessionAuthority<S>: Send + Sync + 'static {
    /// Full state of `session`, or `None` if the authority does not know it.
    /// Must be free of side effects.
    fn fetch_session_state(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Option<S>, TransportError>> + Send;

    fn submit_action(
        &self,
        session: &SessionId,
        actor: &ActorId,
        action: &Action,
    ) -> impl Future<Output = Result<ActionResult<S>, TransportError>> + Send;
}

/// JSON-over-HTTP binding to the game backend.
#[derive(Clone, Debug)]
pub struct HttpSessionAuthority {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSessionAuthority {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::build(base_url, None)
    }

    pub fn with_request_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::build(base_url, Some(timeout))
    }

    fn build(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn game_url(&self, session: &SessionId) -> String {
        format!("{}/games/{}", self.base_url, session)
    }
}

#[derive(Serialize)]
struct ActionRequestDto<'a> {
    actor: &'a ActorId,
    action: &'a Action,
}

#[derive(Deserialize)]
struct ActionResponseDto<S> {
    state: Option<S>,
}

impl<S> SessionAuthority<S> for HttpSessionAuthority
where
    S: DeserializeOwned + Send + 'static,
{
    async fn fetch_session_state(
        &self,
        session: &SessionId,
    ) -> Result<Option<S>, TransportError> {
        let res = self.http.get(self.game_url(session)).send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            return Err(TransportError::Status { status, body });
        }
        let state = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }

    async fn submit_action(
        &self,
        session: &SessionId,
        actor: &ActorId,
        action: &Action,
    ) -> Result<ActionResult<S>, TransportError> {
        let url = format!("{}/actions", self.game_url(session));
        let res = self
            .http
            .post(url)
            .json(&ActionRequestDto { actor, action })
            .send()
            .await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = String::from_utf8_lossy(&bytes).into_owned();
            return Ok(ActionResult::Rejected(reason));
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            return Err(TransportError::Status { status, body });
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ActionResult::Accepted(None));
        }
        let dto: ActionResponseDto<S> = serde_json::from_slice(&bytes)?;
        Ok(ActionResult::Accepted(dto.state))
    }
}
