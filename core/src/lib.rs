//! Core traits and plumbing shared by the C64 emulation crates.

mod bus;
mod hash;
mod message;
mod serialization;

pub use bus::Bus;
pub use hash::fnv_1a_64;
pub use message::{Message, MessageQueue};
pub use serialization::{SnapshotReader, SnapshotWriter};
