//! Content generation engine clients.

pub mod http;

pub use http::HttpContentGenerator;
