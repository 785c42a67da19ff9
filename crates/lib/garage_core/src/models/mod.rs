//! Domain models shared by the core services and the HTTP layer.

pub mod auth;
pub mod role;
