//! Wire and persistence types for the zap session service.
//!
//! This crate contains the serde-serializable types shared by the runtime
//! and the operation gateway: connection records as they are persisted,
//! authentication credentials and key collections as they cross the
//! credential store, and the typed events emitted by a live transport.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Binary-safe**: Byte fields round-trip through text persistence via
//!   base64, never through lossy string conversion
//! - **Stable**: Changes only when the persisted or wire shapes change
//!
//! The lifecycle machinery that produces and consumes these types lives in
//! `zap-runtime`; the public operation surface lives in `zap-core`.

pub mod auth;
pub mod events;
pub mod options;
pub mod record;

pub use auth::*;
pub use events::*;
pub use options::*;
pub use record::*;
