pub mod auth;
pub mod secrets;
pub mod updates;
