//! Shared utility functions for claimforge.

pub mod json_extraction;

pub use json_extraction::{extract_json_from_response, JsonExtractionError};
