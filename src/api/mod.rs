//! HTTP collaborators: snapshot fetch, submission, suggestions and the live
//! event stream.

mod client;
mod error;
mod live;

pub use client::{ApiClient, ApiConfig, DEFAULT_MAX_SCENARIOS};
pub use error::TransportError;
