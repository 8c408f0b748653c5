//! Runner event protocol
//!
//! Parses the tagged lines a headless runner prints and the result model
//! they deserialize into.

mod reader;
mod types;

pub use reader::{format_event, EventKind, ProtocolReader, StreamContext, StreamEnd, EVENT_DELIMITER};
pub use types::*;
