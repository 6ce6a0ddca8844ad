//! Expansion port.
//!
//! Owns the attached cartridge (if any) and presents the GAME/EXROM lines
//! to the memory mapper. With nothing attached both lines float high.

use emu_core::{SnapshotReader, SnapshotWriter};
use log::debug;

use crate::cartridge::{ButtonEffect, Cartridge};
use crate::crt::CrtCartridge;

#[derive(Default)]
pub struct ExpansionPort {
    cartridge: Option<Cartridge>,
}

impl ExpansionPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cartridge built from a parsed container record.
    pub fn attach(&mut self, record: &CrtCartridge) -> Result<(), &'static str> {
        self.cartridge = Some(Cartridge::attach(record)?);
        Ok(())
    }

    /// Remove the cartridge.
    pub fn detach(&mut self) {
        if let Some(cart) = self.cartridge.take() {
            debug!("detached cartridge '{}'", cart.title());
        }
    }

    #[must_use]
    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    pub fn cartridge_mut(&mut self) -> Option<&mut Cartridge> {
        self.cartridge.as_mut()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.cartridge.is_some()
    }

    /// GAME line level (true = high, the unasserted default).
    #[must_use]
    pub fn game_line(&self) -> bool {
        self.cartridge.as_ref().map_or(true, Cartridge::game_line)
    }

    /// EXROM line level.
    #[must_use]
    pub fn exrom_line(&self) -> bool {
        self.cartridge.as_ref().map_or(true, Cartridge::exrom_line)
    }

    #[must_use]
    pub fn nmi_level(&self) -> bool {
        self.cartridge.as_ref().is_some_and(Cartridge::nmi_level)
    }

    #[must_use]
    pub fn irq_level(&self) -> bool {
        self.cartridge.as_ref().is_some_and(Cartridge::irq_level)
    }

    pub fn reset(&mut self) {
        if let Some(cart) = &mut self.cartridge {
            cart.reset();
        }
    }

    /// Per-cycle hook.
    pub fn execute(&mut self) {
        if let Some(cart) = &mut self.cartridge {
            cart.execute();
        }
    }

    pub fn nmi_will_trigger(&mut self) {
        if let Some(cart) = &mut self.cartridge {
            cart.nmi_will_trigger();
        }
    }

    pub fn nmi_did_trigger(&mut self) {
        if let Some(cart) = &mut self.cartridge {
            cart.nmi_did_trigger();
        }
    }

    /// Press a cartridge button (1-based). Returns the machine-level
    /// effect.
    pub fn press_button(&mut self, nr: usize) -> ButtonEffect {
        self.cartridge
            .as_mut()
            .map_or(ButtonEffect::None, |c| c.press_button(nr))
    }

    pub fn release_button(&mut self, nr: usize) {
        if let Some(cart) = &mut self.cartridge {
            cart.release_button(nr);
        }
    }

    // Window accessors; all fall back to the floating bus when empty.

    pub fn peek_roml(&mut self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_mut()
            .map_or(bus_latch, |c| c.peek_roml(addr))
    }

    #[must_use]
    pub fn spypeek_roml(&self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_ref()
            .map_or(bus_latch, |c| c.spypeek_roml(addr))
    }

    pub fn peek_romh(&mut self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_mut()
            .map_or(bus_latch, |c| c.peek_romh(addr))
    }

    #[must_use]
    pub fn spypeek_romh(&self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_ref()
            .map_or(bus_latch, |c| c.spypeek_romh(addr))
    }

    /// Write into a cartridge ROM window. Returns true when the cartridge
    /// intercepted the write.
    pub fn poke_roml(&mut self, addr: u16, value: u8) -> bool {
        self.cartridge
            .as_mut()
            .is_some_and(|c| c.poke_roml(addr, value))
    }

    pub fn poke_romh(&mut self, addr: u16, value: u8) -> bool {
        self.cartridge
            .as_mut()
            .is_some_and(|c| c.poke_romh(addr, value))
    }

    pub fn peek_io1(&mut self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_mut()
            .map_or(bus_latch, |c| c.peek_io1(addr, bus_latch))
    }

    #[must_use]
    pub fn spypeek_io1(&self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_ref()
            .map_or(bus_latch, |c| c.spypeek_io1(addr, bus_latch))
    }

    pub fn peek_io2(&mut self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_mut()
            .map_or(bus_latch, |c| c.peek_io2(addr, bus_latch))
    }

    #[must_use]
    pub fn spypeek_io2(&self, addr: u16, bus_latch: u8) -> u8 {
        self.cartridge
            .as_ref()
            .map_or(bus_latch, |c| c.spypeek_io2(addr, bus_latch))
    }

    pub fn poke_io1(&mut self, addr: u16, value: u8) {
        if let Some(cart) = &mut self.cartridge {
            cart.poke_io1(addr, value);
        }
    }

    pub fn poke_io2(&mut self, addr: u16, value: u8) {
        if let Some(cart) = &mut self.cartridge {
            cart.poke_io2(addr, value);
        }
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_bool(self.cartridge.is_some());
        if let Some(cart) = &self.cartridge {
            cart.save_state(w);
        }
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), &'static str> {
        let attached = r.read_bool()?;
        match (&mut self.cartridge, attached) {
            (Some(cart), true) => cart.load_state(r),
            (None, false) => Ok(()),
            _ => Err("snapshot cartridge attachment mismatch"),
        }
    }
}
