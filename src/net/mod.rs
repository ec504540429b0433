//! Network synchronization layer: framing, wire messages, sessions and
//! per-connection I/O tasks

pub mod connection;
pub mod error;
pub mod framing;
pub mod listener;
pub mod mailbox;
pub mod protocol;
pub mod session;

pub use connection::{run_connection, CancelFlag, Envelope};
pub use error::NetError;
pub use mailbox::{Mailbox, MailboxError, Outbound};
pub use protocol::{CarState, ClientMessage, ServerMessage, SessionId, TargetId, TargetState};
pub use session::{Session, SessionRegistry};
