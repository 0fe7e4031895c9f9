//! Client-side reconciliation of a remotely held game session.
//!
//! [`OptimisticStore`] overlays tentative moves on the last authoritative
//! state, [`StateSynchronizer`] polls the authority for changes, and
//! [`ReconnectController`] drives recovery after connectivity loss.
//! [`SessionDriver`] runs all three on a single task.

pub mod authority;
pub mod config;
pub mod connectivity;
pub mod driver;
pub mod game;
pub mod logging;
pub mod optimistic;
pub mod reconnect;
pub mod session;
pub mod sync;

pub mod test_helpers;

pub use authority::{
    Action,
    ActionResult,
    HttpSessionAuthority,
    SessionAuthority,
    TransportError,
};
pub use config::{
    ConfigError,
    SessionConfig,
};
pub use connectivity::{
    ChannelConnectivity,
    Connectivity,
    ConnectivityMonitor,
    NeverChanges,
    TcpProbe,
};
pub use driver::{
    DriverError,
    SessionDriver,
    SessionEvent,
    SessionHandle,
    SessionState,
};
pub use game::GameSession;
pub use optimistic::{
    OptimisticStore,
    StoreError,
    TentativeUpdate,
};
pub use reconnect::{
    Backoff,
    ConnectivityState,
    ReconnectController,
    RetryDecision,
};
pub use session::{
    ActorId,
    SessionId,
    UpdateId,
};
pub use sync::{
    PollOutcome,
    StateSynchronizer,
};
