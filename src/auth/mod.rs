//! Authentication module for the ads service
//!
//! Validates bearer tokens issued by the main backend and exposes the
//! caller's identity to handlers.

mod extractor;
mod service;

pub use extractor::AuthenticatedUser;
pub use service::{AuthService, Claims};
