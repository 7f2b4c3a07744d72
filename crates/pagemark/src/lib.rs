//! Public facade crate for `pagemark`.
//!
//! No IO or provider-specific logic lives here; it re-exports the match, oracle and
//! document types/traits from `pagemark-core`.

pub use pagemark_core::*;
