//! `applyflow-auth`: bearer-token authentication boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts the token, this
//! crate turns it into the [`UserId`](applyflow_core::UserId) that scopes
//! every batch operation.

pub mod claims;
pub mod validator;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use validator::{Hs256JwtValidator, JwtValidator};
