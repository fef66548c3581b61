//! Last-write-wins rules shared by the relay and the client.

pub mod conflict;

pub use conflict::{ConflictResolver, Resolution, SyncAction};
