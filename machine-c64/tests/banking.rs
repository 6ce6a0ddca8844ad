//! Bank mapper properties.

use emu_core::Bus;
use machine_c64::{C64, CrtCartridge, MachineConfig, MemoryType};
use proptest::prelude::*;

fn machine() -> C64 {
    let mut c64 = C64::new(MachineConfig::pal());
    // Give the ROM regions recognizable contents.
    c64.mem.rom[0xA000..0xC000].fill(0xBA);
    c64.mem.rom[0xD000..0xE000].fill(0xCC);
    c64.mem.rom[0xE000..].fill(0xEE);
    c64.mem.update_peek_poke_lookup_tables();
    c64
}

/// Drive the five control bits to a specific combination. GAME/EXROM are
/// produced by attaching a cartridge with the right initial lines.
fn configure(c64: &mut C64, exrom: bool, game: bool, charen: bool, hiram: bool, loram: bool) {
    if !(exrom && game) {
        let mut rom = vec![0x41u8; 0x4000];
        rom[0x1FFF] = 0x4C;
        let mut record = CrtCartridge::from_raw_rom(&rom).unwrap();
        record.exrom_line = exrom;
        record.game_line = game;
        c64.attach_cartridge(&record).unwrap();
    } else {
        c64.detach_cartridge();
    }
    c64.poke(0x0000, 0x07);
    let bits = (u8::from(charen) << 2) | (u8::from(hiram) << 1) | u8::from(loram);
    c64.poke(0x0001, bits);
}

proptest! {
    /// P1: every control combination resolves every nibble to exactly one
    /// region, and open-bus entries never write back to DRAM.
    #[test]
    fn bank_map_is_total(bits in 0u8..32, nibble in 0u16..16) {
        let mut c64 = machine();
        configure(
            &mut c64,
            bits & 0x10 != 0,
            bits & 0x08 != 0,
            bits & 0x04 != 0,
            bits & 0x02 != 0,
            bits & 0x01 != 0,
        );

        let addr = nibble << 12;
        let source = c64.mem.peek_source(addr);
        let target = c64.mem.poke_target(addr);

        // Resolution is total: reads and writes always land somewhere
        // (possibly the open bus), never panic.
        let _ = c64.spypeek(addr | 0x0123);

        if target == MemoryType::None {
            let probe = addr | 0x0234;
            let before = c64.mem.ram[probe as usize];
            c64.poke(probe, before.wrapping_add(1));
            prop_assert_eq!(c64.mem.ram[probe as usize], before,
                "open-bus writes must not reach DRAM");
        }

        // The low two nibbles are always RAM.
        if nibble < 2 {
            prop_assert_eq!(source, MemoryType::Ram);
            prop_assert_eq!(target, MemoryType::Ram);
        }
    }
}

#[test]
fn zero_page_port_registers_bypass_dram() {
    let mut c64 = machine();
    let ram0 = c64.mem.ram[0];
    let ram1 = c64.mem.ram[1];

    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);

    assert_eq!(c64.mem.ram[0], ram0);
    assert_eq!(c64.mem.ram[1], ram1);
    assert_eq!(c64.spypeek(0x0000), 0x2F);

    // Every other zero-page address is plain DRAM.
    for addr in 2u16..=0xFF {
        c64.poke(addr, 0x5A);
        assert_eq!(c64.mem.ram[addr as usize], 0x5A);
    }
}

#[test]
fn standard_map_selects_roms() {
    let mut c64 = machine();
    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);

    assert_eq!(c64.spypeek(0xA123), 0xBA);
    assert_eq!(c64.spypeek(0xE123), 0xEE);
    assert_eq!(c64.mem.peek_source(0xD000), MemoryType::Io);

    c64.poke(0x0001, 0x33); // CHAREN=0
    assert_eq!(c64.spypeek(0xD123), 0xCC);
}

#[test]
fn mapper_refresh_after_port_write() {
    // P9: a write that changes a control bit is visible to the very next
    // access.
    let mut c64 = machine();
    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);
    c64.mem.ram[0xA123] = 0x11;

    assert_eq!(c64.spypeek(0xA123), 0xBA);
    c64.poke(0x0001, 0x36); // LORAM off: Basic unmapped
    assert_eq!(c64.spypeek(0xA123), 0x11);
    c64.poke(0x0001, 0x37);
    assert_eq!(c64.spypeek(0xA123), 0xBA);
}

#[test]
fn mapper_refresh_after_cartridge_bank_change() {
    // P9 for the expansion-port bits: a Magic Desk write that drops the
    // ROM is observable on the next access.
    let mut c64 = machine();
    let record = CrtCartridge {
        crt_type: 19,
        exrom_line: false,
        game_line: true,
        name: "md".into(),
        chips: (0..4)
            .map(|bank| machine_c64::ChipPacket {
                chip_type: 0,
                bank,
                load_address: 0x8000,
                data: vec![0x80 + bank as u8; 0x2000],
            })
            .collect(),
    };
    c64.attach_cartridge(&record).unwrap();
    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);

    assert_eq!(c64.spypeek(0x8000), 0x80);
    c64.poke(0xDE00, 0x02);
    assert_eq!(c64.spypeek(0x8000), 0x82);

    c64.mem.ram[0x8000] = 0x55;
    c64.poke(0xDE00, 0x80); // disable: EXROM high
    assert_eq!(c64.spypeek(0x8000), 0x55);
}

#[test]
fn ultimax_blanks_inner_ram() {
    let mut c64 = machine();
    let mut rom = vec![0x99u8; 0x2000];
    rom[0] = 0x42;
    let record = CrtCartridge {
        crt_type: 0,
        exrom_line: true,
        game_line: false, // GAME=0, EXROM=1: ultimax
        name: "ultimax".into(),
        chips: vec![machine_c64::ChipPacket {
            chip_type: 0,
            bank: 0,
            load_address: 0xE000,
            data: rom,
        }],
    };
    c64.attach_cartridge(&record).unwrap();
    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);

    // $2000-$7FFF and $A000-$CFFF are open bus.
    assert_eq!(c64.mem.peek_source(0x2000), MemoryType::None);
    assert_eq!(c64.mem.peek_source(0xA000), MemoryType::None);
    assert_eq!(c64.mem.peek_source(0xC000), MemoryType::None);
    // The cartridge answers at $E000 (and provides the vectors).
    assert_eq!(c64.mem.peek_source(0xE000), MemoryType::CrtHi);
    assert_eq!(c64.spypeek(0xE000), 0x42);
    // I/O stays mapped.
    assert_eq!(c64.mem.peek_source(0xD000), MemoryType::Io);

    // Writes into the blanked region disappear.
    let before = c64.mem.ram[0x3000];
    c64.poke(0x3000, before.wrapping_add(9));
    assert_eq!(c64.mem.ram[0x3000], before);
}

#[test]
fn open_bus_reads_return_data_latch() {
    let mut c64 = machine();
    let record = CrtCartridge {
        crt_type: 0,
        exrom_line: true,
        game_line: false,
        name: "ultimax".into(),
        chips: vec![machine_c64::ChipPacket {
            chip_type: 0,
            bank: 0,
            load_address: 0xE000,
            data: vec![0u8; 0x2000],
        }],
    };
    c64.attach_cartridge(&record).unwrap();
    c64.poke(0x0000, 0x2F);
    c64.poke(0x0001, 0x37);

    // Latch a known value by reading RAM, then read open bus.
    c64.mem.ram[0x0200] = 0x5C;
    let latch = c64.mem.read(0x0200);
    assert_eq!(latch, 0x5C);
    assert_eq!(c64.mem.read(0x3456), 0x5C);
}
