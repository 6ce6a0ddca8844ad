//! Program archives (T64, PRG, P00).
//!
//! The core consumes file formats through a small item-iterator surface:
//! select an item, ask for its name, size and load address, then pull
//! bytes until exhaustion. Disk images stay outside the core; the drive
//! collaborator presents the same surface for them.

/// Iterator-style access to the programs inside a container.
pub trait Archive {
    /// Number of stored items.
    fn item_count(&self) -> usize;

    /// Select the item subsequent calls refer to. Out-of-range selections
    /// leave nothing selected.
    fn select_item(&mut self, n: usize);

    /// Name of the selected item, converted from PETSCII.
    fn name_of_item(&self) -> String;

    /// Size of the selected item in bytes (excluding the load address).
    fn size_of_item(&self) -> usize;

    /// Memory address the selected item wants to load at.
    fn destination_addr_of_item(&self) -> u16;

    /// Read the next byte of the selected item; `None` at end of data.
    fn read_item(&mut self) -> Option<u8>;
}

/// Printable ASCII for a PETSCII character (letter case swapped).
fn petscii_char(byte: u8) -> char {
    match byte {
        0x20..=0x40 => byte as char,
        0x41..=0x5A => (byte + 0x20) as char, // lower case
        0x61..=0x7A => (byte - 0x20) as char, // upper case
        0xC1..=0xDA => (byte - 0x80) as char,
        _ => ' ',
    }
}

fn petscii_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| petscii_char(b))
        .collect::<String>()
        .trim_end()
        .to_string()
}

// ---------------------------------------------------------------------
// T64
// ---------------------------------------------------------------------

/// One directory entry of a T64 tape archive.
#[derive(Clone, Debug)]
struct T64Entry {
    start_addr: u16,
    end_addr: u16,
    offset: usize,
    name: [u8; 16],
}

/// T64 tape archive.
///
/// Layout: a 64-byte header ("C64" magic at offset 0, entry counts at
/// $22/$24, tape name at $28-$3F) followed by 32-byte directory entries
/// starting at $40: used flag, file type, start/end address, a 4-byte file
/// offset and a 16-character PETSCII name.
pub struct T64Archive {
    data: Vec<u8>,
    entries: Vec<T64Entry>,
    tape_name: String,
    selected: Option<usize>,
    read_pos: usize,
}

impl T64Archive {
    /// Magic bytes: "C64".
    const MAGIC: [u8; 3] = [0x43, 0x36, 0x34];

    pub fn from_bytes(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < 0x40 {
            return Err("T64 file too small");
        }
        if data[0..3] != Self::MAGIC {
            return Err("invalid T64 signature");
        }

        let max_entries = usize::from(u16::from_le_bytes([data[0x22], data[0x23]]));
        let mut used_entries = usize::from(u16::from_le_bytes([data[0x24], data[0x25]]));
        // Plenty of real tapes claim zero entries but carry one.
        if used_entries == 0 {
            used_entries = 1;
        }
        if used_entries > max_entries.max(1) {
            return Err("T64 directory inconsistent");
        }
        let tape_name = petscii_name(&data[0x28..0x40]);

        let mut entries = Vec::new();
        for n in 0..used_entries {
            let base = 0x40 + 32 * n;
            if base + 32 > data.len() {
                return Err("T64 directory truncated");
            }
            let entry = &data[base..base + 32];
            if entry[0] == 0 {
                continue; // free slot
            }
            let start_addr = u16::from_le_bytes([entry[2], entry[3]]);
            let mut end_addr = u16::from_le_bytes([entry[4], entry[5]]);
            let offset = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as usize;
            if offset > data.len() {
                return Err("T64 item offset out of range");
            }
            let mut name = [0x20u8; 16];
            name.copy_from_slice(&entry[16..32]);

            // A widespread converter bug stored a bogus end address; repair
            // it from the file size.
            let available = data.len() - offset;
            let claimed = usize::from(end_addr.wrapping_sub(start_addr));
            if claimed == 0 || claimed > available {
                end_addr = start_addr.wrapping_add(available.min(0x10000) as u16);
            }

            entries.push(T64Entry {
                start_addr,
                end_addr,
                offset,
                name,
            });
        }

        if entries.is_empty() {
            return Err("T64 contains no items");
        }

        Ok(Self {
            data: data.to_vec(),
            entries,
            tape_name,
            selected: None,
            read_pos: 0,
        })
    }

    #[must_use]
    pub fn tape_name(&self) -> &str {
        &self.tape_name
    }

    fn entry(&self) -> Option<&T64Entry> {
        self.selected.and_then(|n| self.entries.get(n))
    }
}

impl Archive for T64Archive {
    fn item_count(&self) -> usize {
        self.entries.len()
    }

    fn select_item(&mut self, n: usize) {
        self.selected = (n < self.entries.len()).then_some(n);
        self.read_pos = 0;
    }

    fn name_of_item(&self) -> String {
        self.entry().map_or_else(String::new, |e| petscii_name(&e.name))
    }

    fn size_of_item(&self) -> usize {
        self.entry()
            .map_or(0, |e| usize::from(e.end_addr.wrapping_sub(e.start_addr)))
    }

    fn destination_addr_of_item(&self) -> u16 {
        self.entry().map_or(0, |e| e.start_addr)
    }

    fn read_item(&mut self) -> Option<u8> {
        let entry = self.selected.map(|n| &self.entries[n])?;
        let size = usize::from(entry.end_addr.wrapping_sub(entry.start_addr));
        if self.read_pos >= size {
            return None;
        }
        let byte = self.data.get(entry.offset + self.read_pos).copied();
        self.read_pos += 1;
        byte
    }
}

// ---------------------------------------------------------------------
// PRG / P00
// ---------------------------------------------------------------------

/// A plain PRG: two bytes of load address followed by the program.
pub struct PrgArchive {
    name: String,
    load_addr: u16,
    payload: Vec<u8>,
    read_pos: usize,
    selected: bool,
}

impl PrgArchive {
    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < 3 {
            return Err("PRG file too short");
        }
        Ok(Self {
            name: name.to_string(),
            load_addr: u16::from_le_bytes([data[0], data[1]]),
            payload: data[2..].to_vec(),
            read_pos: 0,
            selected: false,
        })
    }

    /// P00: a 26-byte "C64File" header wrapping a PRG.
    pub fn from_p00_bytes(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < 0x1C || &data[0..7] != b"C64File" {
            return Err("invalid P00 header");
        }
        let name = petscii_name(&data[8..0x18]);
        let mut prg = Self::from_bytes(&name, &data[0x1A..])?;
        prg.name = name;
        Ok(prg)
    }
}

impl Archive for PrgArchive {
    fn item_count(&self) -> usize {
        1
    }

    fn select_item(&mut self, n: usize) {
        self.selected = n == 0;
        self.read_pos = 0;
    }

    fn name_of_item(&self) -> String {
        self.name.clone()
    }

    fn size_of_item(&self) -> usize {
        self.payload.len()
    }

    fn destination_addr_of_item(&self) -> u16 {
        self.load_addr
    }

    fn read_item(&mut self) -> Option<u8> {
        if !self.selected {
            return None;
        }
        let byte = self.payload.get(self.read_pos).copied();
        self.read_pos += 1;
        byte
    }
}
