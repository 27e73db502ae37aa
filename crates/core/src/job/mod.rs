//! Jobs, progress, and completed-job records.

mod title;
mod types;

pub use title::{leading_heading, normalize_title, sanitize_filename};
pub use types::*;
