//! Utility functions for common operations.
//!
//! - **HTML cleaning**: turn post markup into plain text for filter matching
//! - **Text processing**: control-character stripping and title truncation
//! - **URL validation**: sanity checks for configured site base URLs
//! - **Concurrency**: fan-out limit shared by the fetchers

mod concurrency;
mod html;
mod text;
mod url_validator;

pub use concurrency::batch_size;
pub use html::html_to_plain_text;
pub use text::{strip_control_chars, truncate_chars};
pub use url_validator::{validate_base_url, UrlValidationError};
