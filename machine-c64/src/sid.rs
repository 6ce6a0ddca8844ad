//! SID 6581/8580 register file.
//!
//! Audio synthesis is a host concern; the core only keeps the register
//! state the CPU can observe and a cycle counter a host-side synthesizer
//! can consume. Oscillator 3 and envelope 3 readback ($1B/$1C) are
//! approximated from the voice-3 frequency so software that polls them for
//! entropy keeps working.

use emu_core::{SnapshotReader, SnapshotWriter};

use crate::config::SidRevision;

/// SID register file collaborator.
pub struct Sid {
    model: SidRevision,
    registers: [u8; 32],
    /// Voice 3 oscillator accumulator, advanced per cycle.
    osc3: u32,
    /// Cycles executed, for a host synthesizer to drain.
    pub cycles: u64,
}

impl Sid {
    #[must_use]
    pub fn new(model: SidRevision) -> Self {
        Self {
            model,
            registers: [0; 32],
            osc3: 0,
            cycles: 0,
        }
    }

    #[must_use]
    pub fn model(&self) -> SidRevision {
        self.model
    }

    pub fn reset(&mut self) {
        self.registers = [0; 32];
        self.osc3 = 0;
        self.cycles = 0;
    }

    /// Advance one cycle.
    pub fn execute(&mut self) {
        self.cycles += 1;
        let freq =
            u32::from(self.registers[0x0E]) | (u32::from(self.registers[0x0F]) << 8);
        self.osc3 = self.osc3.wrapping_add(freq) & 0x00FF_FFFF;
    }

    /// Register read. Only $1B and $1C are readable; the rest return the
    /// last value written to any register (the SID's write latch).
    pub fn peek(&self, reg: u8) -> u8 {
        match reg & 0x1F {
            0x1B => (self.osc3 >> 16) as u8,
            0x1C => {
                // Envelope 3: coarse approximation, full volume while the
                // gate bit is on.
                if self.registers[0x12] & 0x01 != 0 {
                    0xFF
                } else {
                    0x00
                }
            }
            r => self.registers[r as usize],
        }
    }

    #[must_use]
    pub fn spypeek(&self, reg: u8) -> u8 {
        self.peek(reg)
    }

    pub fn poke(&mut self, reg: u8, value: u8) {
        self.registers[(reg & 0x1F) as usize] = value;
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_bytes(&self.registers);
        w.write_u32(self.osc3);
        w.write_u64(self.cycles);
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), &'static str> {
        r.read_bytes(&mut self.registers)?;
        self.osc3 = r.read_u32()?;
        self.cycles = r.read_u64()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osc3_advances_with_voice3_frequency() {
        let mut sid = Sid::new(SidRevision::Mos6581);
        sid.poke(0x0E, 0x00);
        sid.poke(0x0F, 0x40); // freq = $4000
        for _ in 0..4 {
            sid.execute();
        }
        assert_eq!(sid.peek(0x1B), 0x01);
    }
}
