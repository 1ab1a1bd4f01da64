//! # Configuration Inputs
//!
//! Static inputs the session engine consumes but does not own: where the
//! instrument list comes from, which fields a subscription view asks for, and
//! how encrypted feed credentials are retrieved.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The ordered field-ID table used to build subscription views.
pub mod field_ids;

/// File-backed and embedded instrument lists.
pub mod instruments;

/// AES-256-CBC encrypted credentials fetched over HTTP.
pub mod secrets;

pub use field_ids::{default_view, lookup, view_from_acronyms, FieldId, UnknownField, AUD_FIELD_IDS};
pub use instruments::{EmbeddedInstruments, JsonFileInstruments};
pub use secrets::{decrypt_secret, fetch_credentials, SecretError};
