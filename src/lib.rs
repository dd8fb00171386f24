//! Client core for the services marketplace: HTTP API access, the
//! real-time chat/budget store, and device-local state.

pub mod api;
pub mod app;
pub mod error;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod store;
pub mod utils;

pub use error::{ClientError, Result};
pub use session::Session;
pub use store::{ChatStore, Outcome, SharedStore, StoreUpdate};
