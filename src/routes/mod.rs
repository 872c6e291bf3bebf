//! HTTP routes for multirootca

pub mod authsign;
pub mod envelope;
pub mod health;
pub mod info;

pub use authsign::{AuthSignRequest, SignResult};
pub use envelope::{error_response, json_response, Envelope, ResponseMessage};
pub use info::InfoResult;
