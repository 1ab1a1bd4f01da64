//! # Session Connectors
//!
//! Implementations of [`SessionConnector`](crate::core::session::SessionConnector).
//! The real feed transport is linked in by the deploying application; this
//! module ships a simulated connector that behaves like a live session.
//!
//! ## Contained Modules:
//! - **`simulated`**: opens in-process sessions whose own delivery thread
//!   emits login, refresh and periodic update messages, and can be told to
//!   refuse opens or to drop the connection after a while.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// In-process session connector for local runs and tests.
pub mod simulated;

pub use simulated::{SimulatedConfig, SimulatedConnector};
