//! Utility functions shared by the converter and the HTTP boundary.
//!
//! - **URL validation**: checks that a feed URL is absolute http(s) before
//!   any network work is attempted

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
