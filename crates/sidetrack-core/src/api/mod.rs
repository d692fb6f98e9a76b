//! Client side of the side-project tracker REST API.
//!
//! - `Gateway`: the single path every request takes. It attaches the bearer
//!   token, decodes `{success, message, data}` envelopes and recovers from an
//!   expired token with one shared refresh.
//! - `ApiClient`: typed endpoints built on the gateway.
//! - `Transport`: the seam between the gateway and the network, implemented
//!   by `HttpTransport` over reqwest.

pub mod client;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod request;
pub mod transport;

#[cfg(test)]
mod fake;

pub use client::ApiClient;
pub use envelope::Payload;
pub use error::{ApiError, ErrorBody, ErrorCode};
pub use gateway::{Gateway, DEFAULT_TIMEOUT};
pub use request::{ApiRequest, Auth, REFRESH_PATH};
pub use transport::{HttpTransport, RawResponse, Transport};
