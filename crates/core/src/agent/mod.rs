//! Remote page agent client.
//!
//! The page agent owns the browser. It opens contexts, runs the page-specific
//! extraction and renders documents; this module speaks its JSON/HTTP API.

mod http;

pub use http::HttpPageAgent;
