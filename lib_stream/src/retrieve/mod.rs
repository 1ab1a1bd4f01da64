//! # Data Retrieval Module
//!
//! HTTP access to the feed's platform services.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff for
//!   transient failures.
//! - **`rdp_discovery`**: the platform discovery client. It exchanges the
//!   machine credentials for an access token and lists the streaming endpoints.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

/// Token exchange and streaming endpoint discovery over HTTP.
pub mod rdp_discovery;

pub use ky_http::{ApiClient, ApiResponse};
pub use rdp_discovery::{RdpDiscoveryService, DEFAULT_RDP_BASE_URL};
