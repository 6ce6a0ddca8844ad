//! Expansion-port cartridges.
//!
//! Cartridge hardware is modeled as one struct with a kind tag and a
//! per-kind state record; every capability (ROM windows, I/O registers,
//! buttons, per-cycle hooks) dispatches on the kind. There are only a
//! couple of dozen board designs, all known at attach time.
//!
//! Line conventions: `game_line`/`exrom_line` hold the physical level the
//! cartridge drives, true = high (inactive). Ultimax is GAME low with
//! EXROM high.

use emu_core::{SnapshotReader, SnapshotWriter};
use log::debug;

use crate::crt::{ChipPacket, CrtCartridge};
use crate::flash::FlashRom;

/// Epyx FastLoad capacitor charge in cycles.
const EPYX_CHARGE: u32 = 512;

/// StarDos RC pair, in arbitrary charge units drained one per cycle.
const STARDOS_FULL: u32 = 1_000_000;
const STARDOS_CHARGE_STEP: u32 = 200_000;
const STARDOS_VISIBLE: u32 = 100_000;

/// Cartridge hardware families the core implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeKind {
    /// Plain 8K/16K/Ultimax ROM.
    Standard,
    /// Action Replay hardware revision 3.
    ActionReplay3,
    /// Action Replay revision 4 and later, with 8KB on-board RAM.
    ActionReplay,
    /// Atomic Power; Action Replay with a RAM-to-ROMH special mapping.
    AtomicPower,
    /// Final Cartridge III.
    FinalCartridge3,
    /// Epyx FastLoad.
    EpyxFastLoad,
    /// StarDos.
    StarDos,
    /// EasyFlash.
    EasyFlash,
    /// Magic Desk / Domark / HES Australia.
    MagicDesk,
    /// Ocean type 1.
    Ocean,
    /// Zaxxon / Super Zaxxon.
    Zaxxon,
    /// C64 Game System / System 3.
    C64GameSystem,
    /// Simons' BASIC.
    SimonsBasic,
    /// Comal-80.
    Comal80,
    /// Westermann Learning.
    Westermann,
    /// Freeze Frame.
    FreezeFrame,
    /// Fun Play / Power Play.
    FunPlay,
    /// Super Games.
    SuperGames,
}

impl CartridgeKind {
    /// Map a CRT hardware type ID onto a kind.
    pub fn from_crt_type(crt_type: u16) -> Result<Self, &'static str> {
        Ok(match crt_type {
            0 => CartridgeKind::Standard,
            1 => CartridgeKind::ActionReplay,
            3 => CartridgeKind::FinalCartridge3,
            4 => CartridgeKind::SimonsBasic,
            5 => CartridgeKind::Ocean,
            7 => CartridgeKind::FunPlay,
            8 => CartridgeKind::SuperGames,
            9 => CartridgeKind::AtomicPower,
            10 => CartridgeKind::EpyxFastLoad,
            11 => CartridgeKind::Westermann,
            14 => CartridgeKind::FreezeFrame,
            15 => CartridgeKind::C64GameSystem,
            17 => CartridgeKind::ActionReplay3,
            18 => CartridgeKind::Zaxxon,
            19 => CartridgeKind::MagicDesk,
            21 => CartridgeKind::Comal80,
            32 => CartridgeKind::EasyFlash,
            53 => CartridgeKind::StarDos,
            _ => return Err("unsupported cartridge type"),
        })
    }

    fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Effect of a button press the machine has to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEffect {
    None,
    /// Reset the machine, keeping cartridge RAM alive.
    Reset,
}

/// An attached cartridge.
pub struct Cartridge {
    kind: CartridgeKind,
    title: String,
    packets: Vec<ChipPacket>,

    /// Initial line levels from the container header.
    initial_game: bool,
    initial_exrom: bool,
    /// Line levels currently driven.
    game_line: bool,
    exrom_line: bool,

    /// Selected bank for ROML and ROMH.
    bank_l: usize,
    bank_h: usize,
    /// Per-variant control register shadow.
    control: u8,
    /// On-board RAM, when the board has any.
    ram: Vec<u8>,
    ram_enabled: bool,
    /// Register interface switched off (until reset).
    disabled: bool,

    /// Interrupt levels the cartridge drives.
    nmi_level: bool,
    irq_level: bool,

    /// Freeze button held.
    freeze_pressed: bool,
    /// Final Cartridge III freeze flip-flop.
    fc3_qd: bool,
    /// Epyx capacitor charge countdown.
    epyx_counter: u32,
    /// StarDos capacitor charge.
    stardos_voltage: u32,

    /// EasyFlash chips (ROML, ROMH) and bank register.
    flash_l: Option<FlashRom>,
    flash_h: Option<FlashRom>,
    /// EasyFlash boot jumper; pulls GAME low while the register bit is
    /// clear.
    boot_jumper: bool,

    led: bool,
    battery: bool,
    switch_pos: i8,
}

impl Cartridge {
    /// Build a cartridge from a parsed container record.
    pub fn attach(record: &CrtCartridge) -> Result<Self, &'static str> {
        let kind = CartridgeKind::from_crt_type(record.crt_type)?;

        let ram = match kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => vec![0xFF; 0x2000],
            CartridgeKind::EasyFlash => vec![0xFF; 0x100],
            _ => Vec::new(),
        };

        let (flash_l, flash_h) = if kind == CartridgeKind::EasyFlash {
            let mut lo = FlashRom::new();
            let mut hi = FlashRom::new();
            for chip in &record.chips {
                match chip.load_address {
                    0x8000 => lo.load_bank(chip.bank as usize, &chip.data),
                    0xA000 | 0xE000 => hi.load_bank(chip.bank as usize, &chip.data),
                    _ => return Err("invalid EasyFlash chip address"),
                }
            }
            (Some(lo), Some(hi))
        } else {
            (None, None)
        };

        let mut cartridge = Self {
            kind,
            title: record.name.clone(),
            packets: record.chips.clone(),
            initial_game: record.game_line,
            initial_exrom: record.exrom_line,
            game_line: record.game_line,
            exrom_line: record.exrom_line,
            bank_l: 0,
            bank_h: 0,
            control: 0,
            ram,
            ram_enabled: false,
            disabled: false,
            nmi_level: false,
            irq_level: false,
            freeze_pressed: false,
            fc3_qd: true,
            epyx_counter: 0,
            stardos_voltage: 0,
            flash_l,
            flash_h,
            boot_jumper: true,
            led: false,
            battery: kind == CartridgeKind::EasyFlash,
            switch_pos: 0,
        };
        cartridge.reset();
        debug!("attached cartridge '{}' ({kind:?})", cartridge.title);
        Ok(cartridge)
    }

    #[must_use]
    pub fn kind(&self) -> CartridgeKind {
        self.kind
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn has_battery(&self) -> bool {
        self.battery
    }

    #[must_use]
    pub fn led(&self) -> bool {
        self.led
    }

    pub fn set_switch(&mut self, pos: i8) {
        self.switch_pos = pos;
    }

    #[must_use]
    pub fn switch_pos(&self) -> i8 {
        self.switch_pos
    }

    /// Current GAME line level (true = high).
    #[must_use]
    pub fn game_line(&self) -> bool {
        self.game_line
    }

    /// Current EXROM line level (true = high).
    #[must_use]
    pub fn exrom_line(&self) -> bool {
        self.exrom_line
    }

    /// NMI level the cartridge drives.
    #[must_use]
    pub fn nmi_level(&self) -> bool {
        self.nmi_level
    }

    /// IRQ level the cartridge drives.
    #[must_use]
    pub fn irq_level(&self) -> bool {
        self.irq_level
    }

    /// Hardware reset. Chip contents survive; registers do not.
    pub fn reset(&mut self) {
        self.game_line = self.initial_game;
        self.exrom_line = self.initial_exrom;
        self.bank_l = 0;
        self.bank_h = 0;
        self.control = 0;
        self.ram_enabled = false;
        self.disabled = false;
        self.nmi_level = false;
        self.irq_level = false;
        self.freeze_pressed = false;
        self.fc3_qd = true;
        self.stardos_voltage = 0;
        if let Some(flash) = &mut self.flash_l {
            flash.reset();
        }
        if let Some(flash) = &mut self.flash_h {
            flash.reset();
        }

        match self.kind {
            CartridgeKind::EpyxFastLoad => {
                // Plugging in/resetting discharges the capacitor.
                self.epyx_counter = EPYX_CHARGE;
                self.exrom_line = false;
                self.game_line = true;
            }
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => {
                self.set_ar_control(0);
            }
            CartridgeKind::EasyFlash => {
                // Boot jumper holds GAME low: the cartridge starts in
                // ultimax until software programs $DE02.
                self.game_line = !self.boot_jumper;
                self.exrom_line = true;
                self.bank_l = 0;
                self.bank_h = 0;
            }
            CartridgeKind::StarDos => {
                self.stardos_voltage = STARDOS_FULL;
                self.update_stardos_lines();
            }
            _ => {}
        }
    }

    fn packet(&self, load_address: u16, bank: usize) -> Option<&ChipPacket> {
        self.packets
            .iter()
            .find(|p| p.load_address == load_address && p.bank as usize == bank)
    }

    fn packet_byte(packet: &ChipPacket, addr: u16) -> u8 {
        if packet.data.is_empty() {
            return 0xFF;
        }
        // 4KB chips mirror within the 8KB window.
        packet.data[(addr as usize & 0x1FFF) % packet.data.len()]
    }

    fn rom_l(&self, addr: u16, bank: usize) -> u8 {
        self.packet(0x8000, bank)
            .map_or(0xFF, |p| Self::packet_byte(p, addr))
    }

    fn rom_h(&self, addr: u16, bank: usize) -> u8 {
        // ROMH packets load at $A000, or $E000 for ultimax boards. Boards
        // with a single ROM chip (the freezers) mirror it into ROMH.
        let packet = self
            .packet(0xE000, bank)
            .or_else(|| self.packet(0xA000, bank))
            .or_else(|| self.packet(0x8000, bank));
        packet.map_or(0xFF, |p| Self::packet_byte(p, addr))
    }

    // ------------------------------------------------------------------
    // ROM windows
    // ------------------------------------------------------------------

    /// RAM overlays ROML on the Action Replay family, except for Atomic
    /// Power's special mapping which moves it to ROMH.
    fn ram_at_roml(&self) -> bool {
        self.ram_enabled
            && match self.kind {
                CartridgeKind::ActionReplay => true,
                CartridgeKind::AtomicPower => !self.special_mapping(),
                _ => false,
            }
    }

    /// Read from the ROML window ($8000-$9FFF).
    pub fn peek_roml(&mut self, addr: u16) -> u8 {
        if self.ram_at_roml() {
            return self.ram[(addr & 0x1FFF) as usize];
        }
        match self.kind {
            CartridgeKind::EpyxFastLoad => {
                self.discharge_epyx();
                self.rom_l(addr, self.bank_l)
            }
            CartridgeKind::Zaxxon => {
                // A12 doubles as the ROMH bank select.
                self.bank_h = usize::from(addr >= 0x9000);
                self.rom_l(addr, 0)
            }
            CartridgeKind::EasyFlash => {
                let bank = self.bank_l as u32;
                self.flash_l
                    .as_ref()
                    .map_or(0xFF, |f| f.peek(bank << 13 | u32::from(addr & 0x1FFF)))
            }
            _ => self.rom_l(addr, self.bank_l),
        }
    }

    /// ROML read without side effects.
    #[must_use]
    pub fn spypeek_roml(&self, addr: u16) -> u8 {
        if self.ram_at_roml() {
            return self.ram[(addr & 0x1FFF) as usize];
        }
        match self.kind {
            CartridgeKind::Zaxxon => self.rom_l(addr, 0),
            CartridgeKind::EasyFlash => {
                let bank = self.bank_l as u32;
                self.flash_l
                    .as_ref()
                    .map_or(0xFF, |f| f.peek(bank << 13 | u32::from(addr & 0x1FFF)))
            }
            _ => self.rom_l(addr, self.bank_l),
        }
    }

    /// Read from the ROMH window ($A000-$BFFF, or $E000-$FFFF in ultimax).
    pub fn peek_romh(&mut self, addr: u16) -> u8 {
        match self.kind {
            CartridgeKind::AtomicPower if self.ram_enabled && self.special_mapping() => {
                self.ram[(addr & 0x1FFF) as usize]
            }
            CartridgeKind::EasyFlash => {
                let bank = self.bank_h as u32;
                self.flash_h
                    .as_ref()
                    .map_or(0xFF, |f| f.peek(bank << 13 | u32::from(addr & 0x1FFF)))
            }
            _ => self.rom_h(addr, self.bank_h),
        }
    }

    /// ROMH read without side effects.
    #[must_use]
    pub fn spypeek_romh(&self, addr: u16) -> u8 {
        match self.kind {
            CartridgeKind::AtomicPower if self.ram_enabled && self.special_mapping() => {
                self.ram[(addr & 0x1FFF) as usize]
            }
            CartridgeKind::EasyFlash => {
                let bank = self.bank_h as u32;
                self.flash_h
                    .as_ref()
                    .map_or(0xFF, |f| f.peek(bank << 13 | u32::from(addr & 0x1FFF)))
            }
            _ => self.rom_h(addr, self.bank_h),
        }
    }

    /// Write into the ROML window. Returns true when the cartridge took
    /// the write; otherwise it falls through to the DRAM underneath.
    pub fn poke_roml(&mut self, addr: u16, value: u8) -> bool {
        if self.ram_at_roml() {
            self.ram[(addr & 0x1FFF) as usize] = value;
            return true;
        }
        match self.kind {
            CartridgeKind::EasyFlash => {
                let bank = self.bank_l as u32;
                if let Some(flash) = &mut self.flash_l {
                    flash.poke(bank << 13 | u32::from(addr & 0x1FFF), value);
                }
                true
            }
            _ => false,
        }
    }

    /// Write into the ROMH window.
    pub fn poke_romh(&mut self, addr: u16, value: u8) -> bool {
        match self.kind {
            CartridgeKind::AtomicPower if self.ram_enabled && self.special_mapping() => {
                self.ram[(addr & 0x1FFF) as usize] = value;
                true
            }
            CartridgeKind::EasyFlash => {
                let bank = self.bank_h as u32;
                if let Some(flash) = &mut self.flash_h {
                    flash.poke(bank << 13 | u32::from(addr & 0x1FFF), value);
                }
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // I/O windows
    // ------------------------------------------------------------------

    /// Read from I/O 1 ($DE00-$DEFF). `bus_latch` is the floating-bus
    /// value unmapped boards put on the data lines.
    pub fn peek_io1(&mut self, addr: u16, bus_latch: u8) -> u8 {
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => self.control,
            CartridgeKind::FinalCartridge3 => {
                // Mirrors $1E00-$1EFF of the active ROML bank.
                self.rom_l(0x1E00 | (addr & 0xFF), self.bank_l)
            }
            CartridgeKind::EpyxFastLoad => {
                self.discharge_epyx();
                bus_latch
            }
            CartridgeKind::StarDos => {
                self.charge_stardos();
                bus_latch
            }
            CartridgeKind::C64GameSystem => {
                self.bank_l = (addr & 0x3F) as usize;
                bus_latch
            }
            CartridgeKind::SimonsBasic => {
                // Read switches back to 8K mode.
                self.game_line = true;
                bus_latch
            }
            CartridgeKind::FreezeFrame => {
                // Touching IO1 maps the ROM in 8K mode and ends the freeze.
                self.exrom_line = false;
                self.game_line = true;
                self.nmi_level = false;
                bus_latch
            }
            CartridgeKind::MagicDesk => self.control,
            _ => bus_latch,
        }
    }

    #[must_use]
    pub fn spypeek_io1(&self, addr: u16, bus_latch: u8) -> u8 {
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower | CartridgeKind::MagicDesk => {
                self.control
            }
            CartridgeKind::FinalCartridge3 => self.rom_l(0x1E00 | (addr & 0xFF), self.bank_l),
            _ => bus_latch,
        }
    }

    /// Read from I/O 2 ($DF00-$DFFF).
    pub fn peek_io2(&mut self, addr: u16, bus_latch: u8) -> u8 {
        let offset = addr & 0xFF;
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => {
                // IO2 mirrors $1F00-$1FFF of RAM or the active bank.
                if self.ram_enabled {
                    self.ram[(0x1F00 | offset) as usize & 0x1FFF]
                } else {
                    self.rom_l(0x1F00 | offset, self.bank_l)
                }
            }
            CartridgeKind::ActionReplay3 => {
                if self.disabled {
                    0
                } else {
                    self.rom_l(0x1F00 | offset, self.bank_l)
                }
            }
            CartridgeKind::FinalCartridge3 => self.rom_l(0x1F00 | offset, self.bank_l),
            CartridgeKind::EpyxFastLoad => self.rom_l(0x1F00 | offset, self.bank_l),
            CartridgeKind::StarDos => {
                self.discharge_stardos();
                bus_latch
            }
            CartridgeKind::EasyFlash => self.ram[offset as usize],
            CartridgeKind::Westermann => {
                // Reading IO2 drops ROMH (16K becomes 8K).
                self.game_line = true;
                bus_latch
            }
            CartridgeKind::FreezeFrame => {
                // Touching IO2 hides the ROM entirely.
                self.exrom_line = true;
                self.game_line = true;
                self.nmi_level = false;
                bus_latch
            }
            _ => bus_latch,
        }
    }

    #[must_use]
    pub fn spypeek_io2(&self, addr: u16, bus_latch: u8) -> u8 {
        let offset = addr & 0xFF;
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => {
                if self.ram_enabled {
                    self.ram[(0x1F00 | offset) as usize & 0x1FFF]
                } else {
                    self.rom_l(0x1F00 | offset, self.bank_l)
                }
            }
            CartridgeKind::FinalCartridge3 | CartridgeKind::EpyxFastLoad => {
                self.rom_l(0x1F00 | offset, self.bank_l)
            }
            CartridgeKind::EasyFlash => self.ram[offset as usize],
            _ => bus_latch,
        }
    }

    /// Write to I/O 1.
    pub fn poke_io1(&mut self, addr: u16, value: u8) {
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => {
                if !self.disabled {
                    self.set_ar_control(value);
                }
            }
            CartridgeKind::ActionReplay3 => {
                if !self.disabled {
                    self.set_ar3_control(value);
                }
            }
            CartridgeKind::Ocean => {
                self.bank_l = (value & 0x3F) as usize;
                self.bank_h = self.bank_l;
            }
            CartridgeKind::FunPlay => {
                // The bank bits arrive scrambled: A16 in bit 0, A13-A15 in
                // bits 3-5. Writing $86 switches the ROM off.
                if value == 0x86 {
                    self.exrom_line = true;
                } else {
                    self.bank_l =
                        (((value >> 3) & 0x07) | ((value & 0x01) << 3)) as usize;
                    self.exrom_line = false;
                }
            }
            CartridgeKind::MagicDesk => {
                self.control = value;
                self.bank_l = (value & 0x3F) as usize;
                // Bit 7 disconnects the ROM.
                self.exrom_line = value & 0x80 != 0;
            }
            CartridgeKind::C64GameSystem => {
                self.bank_l = (addr & 0x3F) as usize;
            }
            CartridgeKind::SimonsBasic => {
                // Write switches to 16K mode.
                self.game_line = false;
            }
            CartridgeKind::Comal80 => {
                self.control = value;
                self.bank_l = (value & 0x03) as usize;
                self.bank_h = self.bank_l;
                if value & 0x80 != 0 {
                    self.exrom_line = true;
                    self.game_line = true;
                } else {
                    self.exrom_line = false;
                    self.game_line = false;
                }
            }
            CartridgeKind::StarDos => self.charge_stardos(),
            CartridgeKind::EasyFlash => match addr & 0xFF {
                0x00 => {
                    self.bank_l = (value & 0x3F) as usize;
                    self.bank_h = self.bank_l;
                }
                0x02 => {
                    self.control = value;
                    // Bit 2 (MODE) selects whether bit 0 or the boot
                    // jumper drives GAME. Bit 1 pulls EXROM, bit 7 the LED.
                    self.game_line = if value & 0x04 != 0 {
                        value & 0x01 == 0
                    } else {
                        !self.boot_jumper
                    };
                    self.exrom_line = value & 0x02 == 0;
                    self.led = value & 0x80 != 0;
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Write to I/O 2.
    pub fn poke_io2(&mut self, addr: u16, value: u8) {
        let offset = addr & 0xFF;
        match self.kind {
            CartridgeKind::ActionReplay | CartridgeKind::AtomicPower => {
                if self.ram_enabled {
                    self.ram[(0x1F00 | offset) as usize & 0x1FFF] = value;
                }
            }
            CartridgeKind::FinalCartridge3 => {
                if addr == 0xDFFF && self.fc3_write_enabled() {
                    self.set_fc3_control(value);
                }
            }
            CartridgeKind::EasyFlash => {
                self.ram[offset as usize] = value;
            }
            CartridgeKind::StarDos => self.discharge_stardos(),
            CartridgeKind::SuperGames => {
                // $DF00: bits 0-1 bank (16K), bit 2 hides the ROM, bit 3
                // locks the register until reset.
                if !self.disabled {
                    self.control = value;
                    self.bank_l = (value & 0x03) as usize;
                    self.bank_h = self.bank_l;
                    if value & 0x04 != 0 {
                        self.exrom_line = true;
                        self.game_line = true;
                    } else {
                        self.exrom_line = false;
                        self.game_line = false;
                    }
                    if value & 0x08 != 0 {
                        self.disabled = true;
                    }
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Action Replay family
    // ------------------------------------------------------------------

    /// AR control register, VICE bit assignment:
    /// 0: /GAME low, 1: /EXROM high, 2: disable register, 3-4: bank,
    /// 5: RAM at ROML and IO2, 6: reset freeze mode.
    fn set_ar_control(&mut self, value: u8) {
        self.control = value;
        self.bank_l = ((value >> 3) & 0x03) as usize;
        self.bank_h = self.bank_l;
        self.ram_enabled = value & 0x20 != 0;

        if self.special_mapping() {
            // Atomic Power: this pattern forces 16K mode with RAM at ROMH.
            self.game_line = false;
            self.exrom_line = false;
        } else {
            self.game_line = value & 0x01 == 0;
            self.exrom_line = value & 0x02 != 0;
        }

        if value & 0x04 != 0 {
            self.disabled = true;
        }
        if value & 0x40 != 0 || self.disabled {
            self.nmi_level = false;
            self.irq_level = false;
        }
    }

    /// Atomic Power remaps its RAM to ROMH for one specific register
    /// pattern (RAM on, EXROM bit set, GAME bit clear, no freeze reset).
    fn special_mapping(&self) -> bool {
        self.kind == CartridgeKind::AtomicPower && (self.control & 0xE7) == 0x22
    }

    /// AR3 register: 0: GAME level, 1-2: bank, 3: /EXROM low, 4: disable.
    fn set_ar3_control(&mut self, value: u8) {
        self.control = value;
        self.bank_l = ((value >> 1) & 0x03) as usize;
        self.bank_h = self.bank_l;
        self.game_line = value & 0x01 != 0;
        self.exrom_line = value & 0x08 == 0;
        if value & 0x10 != 0 {
            self.disabled = true;
            self.nmi_level = false;
            self.irq_level = false;
        }
    }

    // ------------------------------------------------------------------
    // Final Cartridge III
    // ------------------------------------------------------------------

    /// FC3 register at $DFFF: 0-1: bank, 4: EXROM level, 5: GAME level,
    /// 6: NMI line (0 = pulled), 7: hide register.
    fn set_fc3_control(&mut self, value: u8) {
        self.control = value;
        self.bank_l = (value & 0x03) as usize;
        self.bank_h = self.bank_l;
        self.exrom_line = value & 0x10 != 0;
        self.update_fc3_nmi();
        self.update_fc3_game();
    }

    fn fc3_write_enabled(&self) -> bool {
        self.control & 0x80 == 0 || self.freeze_pressed
    }

    fn update_fc3_nmi(&mut self) {
        self.nmi_level = !(self.control & 0x40 != 0 && !self.freeze_pressed);
    }

    fn update_fc3_game(&mut self) {
        self.game_line = (self.control & 0x20 != 0) && self.fc3_qd;
    }

    // ------------------------------------------------------------------
    // Capacitor boards
    // ------------------------------------------------------------------

    fn discharge_epyx(&mut self) {
        self.epyx_counter = EPYX_CHARGE;
        self.exrom_line = false;
        self.game_line = true;
    }

    fn charge_stardos(&mut self) {
        self.stardos_voltage = (self.stardos_voltage + STARDOS_CHARGE_STEP).min(STARDOS_FULL);
        self.update_stardos_lines();
    }

    fn discharge_stardos(&mut self) {
        self.stardos_voltage = 0;
        self.update_stardos_lines();
    }

    fn update_stardos_lines(&mut self) {
        // ROML is visible while the capacitor holds charge.
        self.exrom_line = self.stardos_voltage < STARDOS_VISIBLE;
        self.game_line = true;
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Per-cycle hook.
    pub fn execute(&mut self) {
        match self.kind {
            CartridgeKind::EpyxFastLoad => {
                if self.epyx_counter > 0 {
                    self.epyx_counter -= 1;
                    if self.epyx_counter == 0 {
                        // Capacitor expired: the ROM disappears.
                        self.exrom_line = true;
                        self.game_line = true;
                    }
                }
            }
            CartridgeKind::StarDos => {
                if self.stardos_voltage > 0 {
                    self.stardos_voltage -= 1;
                    if self.stardos_voltage == STARDOS_VISIBLE - 1 {
                        self.update_stardos_lines();
                    }
                }
            }
            _ => {}
        }
    }

    /// Called right before the CPU acknowledges an NMI.
    pub fn nmi_will_trigger(&mut self) {}

    /// Called right after the CPU acknowledged an NMI.
    pub fn nmi_did_trigger(&mut self) {
        if self.kind == CartridgeKind::FinalCartridge3 && self.freeze_pressed {
            // The freeze counter overflows qD to 0, forcing GAME low until
            // the button is released.
            self.fc3_qd = false;
            self.update_fc3_game();
        }
    }

    /// Number of buttons on this board.
    #[must_use]
    pub fn num_buttons(&self) -> usize {
        match self.kind {
            CartridgeKind::ActionReplay3
            | CartridgeKind::ActionReplay
            | CartridgeKind::AtomicPower
            | CartridgeKind::FinalCartridge3 => 2,
            CartridgeKind::FreezeFrame | CartridgeKind::StarDos => 1,
            _ => 0,
        }
    }

    /// Button label, 1-based.
    #[must_use]
    pub fn button_title(&self, nr: usize) -> Option<&'static str> {
        match (self.kind, nr) {
            (
                CartridgeKind::ActionReplay3
                | CartridgeKind::ActionReplay
                | CartridgeKind::AtomicPower
                | CartridgeKind::FinalCartridge3,
                1,
            )
            | (CartridgeKind::FreezeFrame, 1) => Some("Freeze"),
            (
                CartridgeKind::ActionReplay3
                | CartridgeKind::ActionReplay
                | CartridgeKind::AtomicPower
                | CartridgeKind::FinalCartridge3,
                2,
            ) => Some("Reset"),
            (CartridgeKind::StarDos, 1) => Some("Reset"),
            _ => None,
        }
    }

    /// Press a button. Line changes show up on the level getters; a
    /// machine-level effect is returned to the caller.
    pub fn press_button(&mut self, nr: usize) -> ButtonEffect {
        debug!("press button {nr} on {:?}", self.kind);
        match (self.kind, nr) {
            (CartridgeKind::ActionReplay3, 1) => {
                self.freeze_pressed = true;
                self.nmi_level = true;
                self.irq_level = true;
                // Control 0 drives GAME low / EXROM high: ultimax until the
                // freezer's interrupt handler restores the map.
                self.set_ar3_control(0);
                ButtonEffect::None
            }
            (CartridgeKind::ActionReplay | CartridgeKind::AtomicPower, 1) => {
                self.freeze_pressed = true;
                self.set_ar_control(0x23);
                self.nmi_level = true;
                self.irq_level = true;
                ButtonEffect::None
            }
            (CartridgeKind::FinalCartridge3, 1) => {
                self.freeze_pressed = true;
                self.update_fc3_nmi();
                ButtonEffect::None
            }
            (CartridgeKind::FreezeFrame, 1) => {
                self.freeze_pressed = true;
                self.nmi_level = true;
                self.exrom_line = false;
                self.game_line = true;
                ButtonEffect::None
            }
            (
                CartridgeKind::ActionReplay3
                | CartridgeKind::ActionReplay
                | CartridgeKind::AtomicPower
                | CartridgeKind::FinalCartridge3,
                2,
            )
            | (CartridgeKind::StarDos, 1) => ButtonEffect::Reset,
            _ => ButtonEffect::None,
        }
    }

    /// Release a button.
    pub fn release_button(&mut self, nr: usize) {
        match (self.kind, nr) {
            (
                CartridgeKind::ActionReplay3
                | CartridgeKind::ActionReplay
                | CartridgeKind::AtomicPower,
                1,
            ) => {
                self.freeze_pressed = false;
                self.nmi_level = false;
                self.irq_level = false;
            }
            (CartridgeKind::FinalCartridge3, 1) => {
                self.freeze_pressed = false;
                self.fc3_qd = true;
                self.update_fc3_nmi();
                self.update_fc3_game();
            }
            (CartridgeKind::FreezeFrame, 1) => {
                self.freeze_pressed = false;
                self.nmi_level = false;
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.kind.to_u8());
        w.write_bool(self.game_line);
        w.write_bool(self.exrom_line);
        w.write_u8(self.bank_l as u8);
        w.write_u8(self.bank_h as u8);
        w.write_u8(self.control);
        w.write_u32(self.ram.len() as u32);
        w.write_bytes(&self.ram);
        w.write_bool(self.ram_enabled);
        w.write_bool(self.disabled);
        w.write_bool(self.nmi_level);
        w.write_bool(self.irq_level);
        w.write_bool(self.freeze_pressed);
        w.write_bool(self.fc3_qd);
        w.write_u32(self.epyx_counter);
        w.write_u32(self.stardos_voltage);
        w.write_bool(self.led);
        w.write_u8(self.switch_pos as u8);
        w.write_bool(self.flash_l.is_some());
        if let Some(flash) = &self.flash_l {
            flash.save_state(w);
        }
        w.write_bool(self.flash_h.is_some());
        if let Some(flash) = &self.flash_h {
            flash.save_state(w);
        }
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), &'static str> {
        if r.read_u8()? != self.kind.to_u8() {
            return Err("snapshot cartridge kind mismatch");
        }
        self.game_line = r.read_bool()?;
        self.exrom_line = r.read_bool()?;
        self.bank_l = usize::from(r.read_u8()?);
        self.bank_h = usize::from(r.read_u8()?);
        self.control = r.read_u8()?;
        let ram_len = r.read_u32()? as usize;
        if ram_len != self.ram.len() {
            return Err("snapshot cartridge RAM size mismatch");
        }
        r.read_bytes(&mut self.ram)?;
        self.ram_enabled = r.read_bool()?;
        self.disabled = r.read_bool()?;
        self.nmi_level = r.read_bool()?;
        self.irq_level = r.read_bool()?;
        self.freeze_pressed = r.read_bool()?;
        self.fc3_qd = r.read_bool()?;
        self.epyx_counter = r.read_u32()?;
        self.stardos_voltage = r.read_u32()?;
        self.led = r.read_bool()?;
        self.switch_pos = r.read_u8()? as i8;
        if r.read_bool()? {
            if let Some(flash) = &mut self.flash_l {
                flash.load_state(r)?;
            } else {
                return Err("snapshot flash state for a non-flash cartridge");
            }
        }
        if r.read_bool()? {
            if let Some(flash) = &mut self.flash_h {
                flash.load_state(r)?;
            } else {
                return Err("snapshot flash state for a non-flash cartridge");
            }
        }
        Ok(())
    }
}
