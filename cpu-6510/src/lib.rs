//! MOS 6510 CPU.
//!
//! Cycle-stepped emulation where each `tick()` performs at most one bus
//! transaction. Instructions are broken down into their component cycles;
//! the position within an instruction is the integer pair `(opcode, cycle)`,
//! so snapshots never contain function pointers.
//!
//! The 6510 is a 6502 with an on-chip I/O port at $0000/$0001 (the port
//! itself lives in the memory subsystem) and an RDY input which the VIC-II
//! uses to stall the CPU during badline DMA. RDY gates read cycles only;
//! write cycles always proceed.

mod cpu;
mod disassembler;
mod registers;

pub use cpu::{
    BreakpointTag, ErrorState, Mos6510, INTSRC_CIA, INTSRC_EXPANSION, INTSRC_KEYBOARD, INTSRC_VIC,
};
pub use disassembler::{disassemble, instruction_length, mnemonic, AddressingMode};
pub use registers::{Flags, Registers};
