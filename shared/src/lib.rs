//! Shared library for the DazNode API
//!
//! Configuration, the infrastructure error taxonomy and session token
//! handling used by the HTTP service.

pub mod auth;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::{AuthService, SessionClaims, SessionSubject, SessionToken};
pub use config::Config;
pub use error::{AppError, ErrorResponse, Result};
