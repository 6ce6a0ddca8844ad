//! Am29F040 flash ROM, as found on EasyFlash cartridges.
//!
//! 512KB in eight 64KB sectors. Commands are written through the magic
//! address pair $5555/$2AAA. Programming can only clear bits (the array
//! ANDs the new value in); erasing sets a sector or the whole chip back to
//! $FF. Trying to program a 0 bit back to 1 parks the chip in the
//! byte-program-error state until a reset command arrives.

use emu_core::{SnapshotReader, SnapshotWriter};
use log::{debug, trace};

/// Chip size in bytes.
pub const FLASH_SIZE: usize = 0x80000;
/// Sector size in bytes.
pub const SECTOR_SIZE: usize = 0x10000;

const MAGIC_1: u32 = 0x5555;
const MAGIC_2: u32 = 0x2AAA;

/// Manufacturer ID returned in autoselect mode (AMD).
const MANUFACTURER_ID: u8 = 0x01;
/// Device ID returned in autoselect mode (Am29F040).
const DEVICE_ID: u8 = 0xA4;

/// Flash state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashState {
    #[default]
    Read,
    Magic1,
    Magic2,
    Autoselect,
    ByteProgram,
    ByteProgramError,
    EraseMagic1,
    EraseMagic2,
    EraseSelect,
    ChipErase,
    SectorErase,
    SectorEraseTimeout,
    SectorEraseSuspend,
}

impl FlashState {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Result<Self, &'static str> {
        Ok(match value {
            0 => FlashState::Read,
            1 => FlashState::Magic1,
            2 => FlashState::Magic2,
            3 => FlashState::Autoselect,
            4 => FlashState::ByteProgram,
            5 => FlashState::ByteProgramError,
            6 => FlashState::EraseMagic1,
            7 => FlashState::EraseMagic2,
            8 => FlashState::EraseSelect,
            9 => FlashState::ChipErase,
            10 => FlashState::SectorErase,
            11 => FlashState::SectorEraseTimeout,
            12 => FlashState::SectorEraseSuspend,
            _ => return Err("invalid flash state"),
        })
    }
}

/// One Am29F040.
pub struct FlashRom {
    state: FlashState,
    /// State to fall back to after a command completes (read or
    /// autoselect).
    base_state: FlashState,
    rom: Vec<u8>,
}

impl FlashRom {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: FlashState::Read,
            base_state: FlashState::Read,
            rom: vec![0xFF; FLASH_SIZE],
        }
    }

    /// Copy an 8KB bank image into the array. Loading behaves like
    /// programming pre-erased cells, a plain copy.
    pub fn load_bank(&mut self, bank: usize, data: &[u8]) {
        let offset = bank * 0x2000;
        let len = data.len().min(0x2000);
        if offset + len <= FLASH_SIZE {
            self.rom[offset..offset + len].copy_from_slice(&data[..len]);
        }
    }

    /// The state machine resets on power-up; array contents persist.
    pub fn reset(&mut self) {
        self.state = FlashState::Read;
        self.base_state = FlashState::Read;
    }

    #[must_use]
    pub fn state(&self) -> FlashState {
        self.state
    }

    #[must_use]
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// Read a byte. The visible value depends on the state machine.
    #[must_use]
    pub fn peek(&self, addr: u32) -> u8 {
        debug_assert!((addr as usize) < FLASH_SIZE);
        match self.state {
            FlashState::Autoselect => match addr & 0xFF {
                0x00 => MANUFACTURER_ID,
                0x01 => DEVICE_ID,
                // Sector protect status; nothing is protected.
                0x02 => 0x00,
                _ => self.rom[addr as usize],
            },
            FlashState::ByteProgramError => {
                // DQ5 set signals the failed program; DQ7 is the complement
                // of the intended data, approximated from the array.
                (self.rom[addr as usize] ^ 0x80) | 0x20
            }
            FlashState::SectorEraseTimeout | FlashState::SectorErase | FlashState::ChipErase => {
                // Erase completes instantly at this abstraction level, so a
                // status poll already sees the erased array (DQ7 = 1).
                self.rom[addr as usize]
            }
            _ => self.rom[addr as usize],
        }
    }

    /// Write a byte, advancing the command state machine.
    pub fn poke(&mut self, addr: u32, value: u8) {
        debug_assert!((addr as usize) < FLASH_SIZE);
        match self.state {
            FlashState::Read => {
                if addr == MAGIC_1 && value == 0xAA {
                    self.state = FlashState::Magic1;
                }
            }
            FlashState::Magic1 => {
                if addr == MAGIC_2 && value == 0x55 {
                    self.state = FlashState::Magic2;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::Magic2 => {
                if addr == MAGIC_1 {
                    match value {
                        0xF0 => {
                            self.state = FlashState::Read;
                            self.base_state = FlashState::Read;
                        }
                        0x90 => {
                            self.state = FlashState::Autoselect;
                            self.base_state = FlashState::Autoselect;
                        }
                        0xA0 => self.state = FlashState::ByteProgram,
                        0x80 => self.state = FlashState::EraseMagic1,
                        _ => self.state = self.base_state,
                    }
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::ByteProgram => {
                if self.do_byte_program(addr, value) {
                    self.state = self.base_state;
                } else {
                    debug!("byte program failed at {addr:05X} (cannot set a cleared bit)");
                    self.state = FlashState::ByteProgramError;
                }
            }
            FlashState::EraseMagic1 => {
                self.state = if addr == MAGIC_1 && value == 0xAA {
                    FlashState::EraseMagic2
                } else {
                    self.base_state
                };
            }
            FlashState::EraseMagic2 => {
                self.state = if addr == MAGIC_2 && value == 0x55 {
                    FlashState::EraseSelect
                } else {
                    self.base_state
                };
            }
            FlashState::EraseSelect => {
                if addr == MAGIC_1 && value == 0x10 {
                    // The array erases instantly at this abstraction level;
                    // the chip still reports the erase state until the next
                    // write, which is what status pollers look at.
                    self.do_chip_erase();
                    self.state = FlashState::ChipErase;
                } else if value == 0x30 {
                    // Sector erase takes the sector from the address.
                    self.do_sector_erase(addr);
                    self.state = FlashState::SectorEraseTimeout;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::SectorEraseTimeout => {
                // Additional sector-erase commands may queue within the
                // timeout window; anything else ends the operation.
                if value == 0x30 {
                    self.do_sector_erase(addr);
                } else if value == 0xB0 {
                    self.state = FlashState::SectorEraseSuspend;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::SectorErase => {
                if value == 0xB0 {
                    self.state = FlashState::SectorEraseSuspend;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::SectorEraseSuspend => {
                if value == 0x30 {
                    self.state = FlashState::SectorErase;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::ByteProgramError | FlashState::Autoselect => {
                if addr == MAGIC_1 && value == 0xAA {
                    self.state = FlashState::Magic1;
                } else if value == 0xF0 {
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                }
            }
            FlashState::ChipErase => {
                // The erase has completed; the next write ends the state
                // and may open a fresh command sequence.
                if addr == MAGIC_1 && value == 0xAA {
                    self.state = FlashState::Magic1;
                } else if value == 0xF0 {
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                } else {
                    self.state = self.base_state;
                }
            }
        }
    }

    /// Program one byte. Flash cells only go from 1 to 0: the array ANDs
    /// the value in. Returns false when the requested value needs a 0 bit
    /// raised back to 1.
    fn do_byte_program(&mut self, addr: u32, value: u8) -> bool {
        trace!("program {addr:05X} <- {value:02X}");
        let cell = &mut self.rom[addr as usize];
        *cell &= value;
        *cell == value
    }

    fn do_chip_erase(&mut self) {
        debug!("chip erase");
        self.rom.fill(0xFF);
    }

    fn do_sector_erase(&mut self, addr: u32) {
        let start = addr as usize & !(SECTOR_SIZE - 1);
        debug!("sector erase {:X}", start / SECTOR_SIZE);
        self.rom[start..start + SECTOR_SIZE].fill(0xFF);
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.state.to_u8());
        w.write_u8(self.base_state.to_u8());
        w.write_bytes(&self.rom);
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), &'static str> {
        self.state = FlashState::from_u8(r.read_u8()?)?;
        self.base_state = FlashState::from_u8(r.read_u8()?)?;
        r.read_bytes(&mut self.rom)?;
        Ok(())
    }
}

impl Default for FlashRom {
    fn default() -> Self {
        Self::new()
    }
}
