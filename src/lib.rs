//! Flapjack - session core for a legacy binary instant-messaging protocol.
//!
//! This crate provides the client side of the protocol: one logical session
//! multiplexed over several typed connections, a server-authoritative
//! contact list, and per-message text-encoding negotiation.
//!
//! # Architecture
//!
//! The crate follows a single-task session pattern:
//!
//! - **Session** - Central state owner, runs the event loop
//! - **Conn** - One framed connection with its read/write task pair
//! - **Synchronizer** - Contact-list mirror and the optimistic edit pipeline
//! - **Proto** - Typed encode/decode for each protocol family
//!
//! # Modules
//!
//! - [`session`] - Session loop, command handle, and event stream
//! - [`conn`] - Connection tasks and the transport seam
//! - [`list`] - Contact-list mirror, sync state machine, reconciliation
//! - [`proto`] - Per-family atom encoding/decoding
//! - [`codec`] - Frames, atoms, and TLV primitives
//! - [`encoding`] - Outbound/inbound text encoding selection

// Library modules
pub mod codec;
pub mod config;
pub mod conn;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod list;
pub mod proto;
pub mod session;

// Re-export commonly used types
pub use config::{SessionConfig, StoredContact};
pub use error::{SessionError, SignOnError};
pub use list::ListEditError;
pub use proto::admin::AdminRequest;
pub use proto::icbm::TypingState;
pub use proto::UserInfo;

// Re-export the session entry points
pub use session::{RoomId, Session, SessionEvent, SessionHandle};
