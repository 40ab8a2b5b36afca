//! Websocket replay server for recorded market streams.
//!
//! A client connecting to `/ws/<stream>` receives every record value of that
//! stream as of connection time, one message per record in key order,
//! followed by a normal close. Unknown streams are refused with `400` before
//! the websocket upgrade.

pub mod config;
pub mod error;
pub mod handler;
pub mod replay;
pub mod router;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use replay::{Ending, ReplaySession};
pub use server::ReplayServer;
pub use state::AppState;
