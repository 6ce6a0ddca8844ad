//! CRT cartridge container records.
//!
//! The core consumes cartridges as parsed records: the header's type and
//! line levels plus a list of CHIP packets. A byte-level reader for the
//! `.crt` interchange format produces them.

/// CRT file signature.
const CRT_SIGNATURE: &[u8; 16] = b"C64 CARTRIDGE   ";

/// One CHIP packet: a ROM (or RAM/flash) bank image with its target
/// address.
#[derive(Clone, Debug)]
pub struct ChipPacket {
    /// 0 = ROM, 1 = RAM, 2 = Flash.
    pub chip_type: u16,
    /// Bank number.
    pub bank: u16,
    /// Load address: $8000 (ROML), $A000 or $E000 (ROMH).
    pub load_address: u16,
    /// Bank contents.
    pub data: Vec<u8>,
}

/// Parsed cartridge record.
#[derive(Clone, Debug)]
pub struct CrtCartridge {
    /// Hardware type ID from the header.
    pub crt_type: u16,
    /// EXROM line level the cartridge drives at reset (true = high).
    pub exrom_line: bool,
    /// GAME line level the cartridge drives at reset (true = high).
    pub game_line: bool,
    /// Cartridge name from the header.
    pub name: String,
    /// CHIP packets.
    pub chips: Vec<ChipPacket>,
}

impl CrtCartridge {
    /// Parse a `.crt` image into a record.
    pub fn from_bytes(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < 64 {
            return Err("CRT file too small");
        }
        if &data[0..16] != CRT_SIGNATURE {
            return Err("invalid CRT signature");
        }

        let header_len =
            u32::from_be_bytes([data[16], data[17], data[18], data[19]]) as usize;
        if header_len < 64 || header_len > data.len() {
            return Err("invalid CRT header length");
        }
        let crt_type = u16::from_be_bytes([data[22], data[23]]);
        // Header stores the line levels directly: 0 = low, 1 = high.
        let exrom_line = data[24] != 0;
        let game_line = data[25] != 0;

        let name = data[32..64]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>();

        let mut chips = Vec::new();
        let mut offset = header_len;
        while offset + 16 <= data.len() {
            if &data[offset..offset + 4] != b"CHIP" {
                return Err("malformed CHIP packet");
            }
            let packet_len = u32::from_be_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]) as usize;
            let chip_type = u16::from_be_bytes([data[offset + 8], data[offset + 9]]);
            let bank = u16::from_be_bytes([data[offset + 10], data[offset + 11]]);
            let load_address = u16::from_be_bytes([data[offset + 12], data[offset + 13]]);
            let rom_size = u16::from_be_bytes([data[offset + 14], data[offset + 15]]) as usize;

            let rom_start = offset + 16;
            let rom_end = rom_start.checked_add(rom_size).ok_or("CRT file truncated")?;
            if rom_end > data.len() || packet_len < 16 + rom_size {
                return Err("CRT file truncated");
            }

            chips.push(ChipPacket {
                chip_type,
                bank,
                load_address,
                data: data[rom_start..rom_end].to_vec(),
            });

            offset += packet_len;
        }

        if chips.is_empty() {
            return Err("no CHIP packets in CRT");
        }

        Ok(Self {
            crt_type,
            exrom_line,
            game_line,
            name,
            chips,
        })
    }

    /// Wrap a raw 8KB or 16KB ROM dump in a record.
    pub fn from_raw_rom(data: &[u8]) -> Result<Self, &'static str> {
        match data.len() {
            0x2000 => Ok(Self {
                crt_type: 0,
                exrom_line: false,
                game_line: true,
                name: String::from("8K ROM"),
                chips: vec![ChipPacket {
                    chip_type: 0,
                    bank: 0,
                    load_address: 0x8000,
                    data: data.to_vec(),
                }],
            }),
            0x4000 => Ok(Self {
                crt_type: 0,
                exrom_line: false,
                game_line: false,
                name: String::from("16K ROM"),
                chips: vec![
                    ChipPacket {
                        chip_type: 0,
                        bank: 0,
                        load_address: 0x8000,
                        data: data[..0x2000].to_vec(),
                    },
                    ChipPacket {
                        chip_type: 0,
                        bank: 0,
                        load_address: 0xA000,
                        data: data[0x2000..].to_vec(),
                    },
                ],
            }),
            _ => Err("raw cartridge ROM must be 8K or 16K"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_crt(crt_type: u16, exrom: u8, game: u8, chips: &[(u16, u16, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(CRT_SIGNATURE);
        data.extend_from_slice(&0x40u32.to_be_bytes());
        data.extend_from_slice(&[1, 0]); // version
        data.extend_from_slice(&crt_type.to_be_bytes());
        data.push(exrom);
        data.push(game);
        data.extend_from_slice(&[0; 6]); // reserved
        let mut name = [0u8; 32];
        name[..4].copy_from_slice(b"TEST");
        data.extend_from_slice(&name);

        for &(bank, load, rom) in chips {
            data.extend_from_slice(b"CHIP");
            data.extend_from_slice(&((16 + rom.len()) as u32).to_be_bytes());
            data.extend_from_slice(&0u16.to_be_bytes()); // ROM
            data.extend_from_slice(&bank.to_be_bytes());
            data.extend_from_slice(&load.to_be_bytes());
            data.extend_from_slice(&(rom.len() as u16).to_be_bytes());
            data.extend_from_slice(rom);
        }
        data
    }

    #[test]
    fn parses_header_and_chips() {
        let rom = vec![0xABu8; 0x2000];
        let image = build_crt(0, 0, 1, &[(0, 0x8000, &rom)]);
        let crt = CrtCartridge::from_bytes(&image).unwrap();
        assert_eq!(crt.crt_type, 0);
        assert!(!crt.exrom_line);
        assert!(crt.game_line);
        assert_eq!(crt.name, "TEST");
        assert_eq!(crt.chips.len(), 1);
        assert_eq!(crt.chips[0].load_address, 0x8000);
        assert_eq!(crt.chips[0].data.len(), 0x2000);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut image = build_crt(0, 0, 1, &[(0, 0x8000, &[0u8; 32])]);
        image[0] = b'X';
        assert!(CrtCartridge::from_bytes(&image).is_err());
    }

    #[test]
    fn rejects_truncated_chip() {
        let rom = vec![0u8; 0x2000];
        let mut image = build_crt(0, 0, 1, &[(0, 0x8000, &rom)]);
        image.truncate(image.len() - 10);
        assert!(CrtCartridge::from_bytes(&image).is_err());
    }

    #[test]
    fn raw_16k_splits_into_two_chips() {
        let crt = CrtCartridge::from_raw_rom(&vec![0x55u8; 0x4000]).unwrap();
        assert_eq!(crt.chips.len(), 2);
        assert_eq!(crt.chips[1].load_address, 0xA000);
        assert!(!crt.exrom_line);
        assert!(!crt.game_line);
    }
}
