//! HTTP(S) server

pub mod http;
pub mod tls;

pub use http::{run, serve, AppState, MAX_BODY_BYTES};
