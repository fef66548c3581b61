//! Client side: relay API, session handling, push updates and the facade.

pub mod api;
pub mod service;
pub mod session;
pub mod updates;

pub use api::{ApiClient, ApiError, CallAuth};
pub use service::KeeperClient;
pub use session::{AuthedCall, Session};
pub use updates::{open_update_stream, spawn_update_loop, ApplyOutcome, UpdateApplier, UpdateHandle};
