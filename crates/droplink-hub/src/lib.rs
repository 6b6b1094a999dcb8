//! droplink-hub
//!
//! The signaling hub daemon. One connection actor per websocket peer, a
//! single hub task that owns the roster and routes signaling frames between
//! peers, and an axum frontend that upgrades `/ws` and greets newcomers.

pub mod config;
pub mod hub;
pub mod peer;
pub mod server;
pub mod turn;

pub use config::HubConfig;
pub use hub::{Hub, HubClosed, RegisterError, Registration, RouteError};
pub use peer::{PeerHandle, SendError};
pub use server::SignalServer;
