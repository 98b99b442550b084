//! Telecontrol stack boundary and connection supervision.
//!
//! The actual IEC 60870-5-104 link/application layer is out of scope; the
//! core consumes it through the [`TelecontrolStack`] capability trait. The
//! shipped [`PlaceholderStack`] simulates link lifecycle and traffic so the
//! surrounding pipeline — capture, history, broadcast, test orchestration —
//! can be exercised end to end. A real stack slots in behind the same trait
//! without touching the pipeline.

mod signals;
mod stack;
mod supervisor;

pub use signals::{SignalDictionary, SignalListError, SignalRow};
pub use stack::{
    PlaceholderConfig, PlaceholderStack, StackError, StackEvent, StackEventSender,
    TelecontrolStack,
};
pub use supervisor::{CONNECT_TIMEOUT, ConnectionSupervisor, StatusSnapshot};
