//! Cycle-accurate Commodore 64 core.
//!
//! The system bus and the three chip state machines that share it: the
//! 6510 CPU (from the `mos-6510` crate), the VIC-II, and the dynamic
//! memory-bank mapper with its expansion-port contribution. CIA timers,
//! the SID register file and cartridges tick along on the same clock.
//!
//! One call to [`C64::execute_one_cycle`] advances the whole machine by a
//! single clock cycle: the VIC runs its two bus phases first, then the CPU
//! performs its one bus transaction (unless the VIC has pulled RDY), then
//! the peripheral hooks run.
//!
//! # ROMs
//!
//! Three images are required before the machine is ready: Basic (8KB),
//! Character (4KB) and Kernal (8KB). They are fingerprinted with FNV-1a-64
//! on load.

pub mod archive;
pub mod cartridge;
mod c64;
pub mod cia;
pub mod config;
pub mod crt;
pub mod expansion;
pub mod flash;
mod mcp;
pub mod memory;
mod palette;
mod sid;
mod snapshot;
pub mod vic;

pub use archive::{Archive, PrgArchive, T64Archive};
pub use c64::C64;
pub use cartridge::{ButtonEffect, Cartridge, CartridgeKind};
pub use config::{MachineConfig, RamInitPattern, SidRevision, TimingMode, VicRevision};
pub use crt::{ChipPacket, CrtCartridge};
pub use flash::{FlashRom, FlashState};
pub use mcp::McpServer;
pub use memory::{Memory, MemoryType};
pub use palette::{rgba, Color, PALETTE};
pub use sid::Sid;
pub use snapshot::Snapshot;
pub use vic::Vic;
