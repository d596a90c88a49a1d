//! Router Module Index
//!
//! Routes are split by access level; access control is applied per module with
//! Axum layers in `create_router`.

/// Storefront routes, open to anonymous clients.
pub mod public;

/// Routes restricted to users with the 'admin' role.
pub mod admin;
