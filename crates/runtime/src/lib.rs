//! Session lifecycle runtime for the zap messaging service.
//!
//! This crate maintains one authenticated multi-device session per
//! connection id: it provisions a scannable login code with a bounded wait,
//! persists cryptographic credentials durably, promotes the transport to an
//! open session, and recovers from transient disconnects with bounded
//! retries.
//!
//! # Architecture
//!
//! - [`CredentialStore`]: durable read/modify/write of connection records
//!   and their opaque credential blobs.
//! - [`TransportFactory`] / [`TransportHandle`]: the seam behind which the
//!   wire-level protocol client lives; the runtime never sees key exchange
//!   or message encryption.
//! - [`SocketAdapter`]: one live transport bound to one connection id.
//! - [`ProvisioningBoard`]: pending login-code waits with deadlines.
//! - [`ConnectionRegistry`]: the single authoritative id-to-state/adapter
//!   map; the only component other code may query to know whether a
//!   connection is usable right now.
//! - [`SessionLifecycleController`]: the per-connection state machine
//!   driving all of the above from transport events.

pub mod adapter;
pub mod error;
pub mod lifecycle;
pub mod provisioning;
pub mod registry;
pub mod store;
pub mod transport;

pub use adapter::SocketAdapter;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleConfig, SessionLifecycleController};
pub use provisioning::{ProvisioningBoard, ProvisioningOutcome, TicketFailure};
pub use registry::{ConnectionRegistry, SessionState};
pub use store::CredentialStore;
pub use transport::{KeyProvider, TransportFactory, TransportHandle, TransportParts};
