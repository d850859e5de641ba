//! Named FIFO mailboxes and their registry.

pub mod box_handler;
pub mod message_box;

pub use box_handler::BoxHandler;
pub use message_box::{Direction, MessageBox};
