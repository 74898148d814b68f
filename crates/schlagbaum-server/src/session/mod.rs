//! Session management and multiplexing.
//!
//! One task per connection owns the TLS stream; the [`Multiplexer`] loop
//! owns the slot table and the line controller and talks to the tasks over
//! channels.

mod multiplexer;
mod slots;
mod task;
mod types;

pub use multiplexer::Multiplexer;
pub use slots::SlotTable;
pub use types::{
    CAPACITY_MESSAGE, HANDSHAKE_REJECTION, MultiplexerConfig, SessionError, SessionEvent,
    SessionId, SessionState,
};
