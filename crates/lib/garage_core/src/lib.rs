//! # garage_core
//!
//! Authentication and role-based access control for the Garage booking
//! platform.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod rbac;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
