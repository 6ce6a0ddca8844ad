//! Boot the machine with real ROM images.
//!
//! These tests need the stock ROMs in `tests/data/`: `basic.bin` (8KB),
//! `chargen.bin` (4KB) and `kernal.bin` (8KB). They are not distributable,
//! so the tests are ignored by default.

use machine_c64::{C64, MachineConfig};

fn machine_with_roms() -> Option<C64> {
    let basic = std::fs::read("tests/data/basic.bin").ok()?;
    let chargen = std::fs::read("tests/data/chargen.bin").ok()?;
    let kernal = std::fs::read("tests/data/kernal.bin").ok()?;

    let mut c64 = C64::new(MachineConfig::pal());
    c64.load_basic_rom(&basic).ok()?;
    c64.load_character_rom(&chargen).ok()?;
    c64.load_kernal_rom(&kernal).ok()?;
    c64.is_ready().ok()?;
    c64.reset();
    Some(c64)
}

/// "READY." in screen codes.
const READY: [u8; 6] = [0x12, 0x05, 0x01, 0x04, 0x19, 0x2E];

#[test]
#[ignore = "needs ROM images in tests/data/"]
fn boots_to_ready_prompt() {
    let mut c64 = machine_with_roms().expect("ROM images present");

    c64.execute_cycles(2_500_000);

    // The Kernal has printed the power-on message; the screen memory at
    // $0400 must contain READY.
    let screen: Vec<u8> = (0x0400u16..0x07E8)
        .map(|addr| c64.mem.ram[addr as usize])
        .collect();
    let found = screen.windows(READY.len()).any(|w| w == READY);
    assert!(found, "READY. prompt not found in screen memory");

    // The cursor should be blinking under Kernal IRQ control by now.
    assert!(c64.cycle() >= 2_500_000);
}

#[test]
#[ignore = "needs ROM images in tests/data/"]
fn boot_screen_uses_standard_banking() {
    let mut c64 = machine_with_roms().expect("ROM images present");
    c64.execute_cycles(2_500_000);

    // The Kernal leaves $01 at its standard value: ROMs and I/O mapped.
    assert_eq!(c64.spypeek(0x0001) & 0x07, 0x07);
    // The VIC is in text mode with the screen at $0400.
    assert_eq!(c64.spypeek(0xD018) & 0xF0, 0x10);
}

#[test]
#[ignore = "needs ROM images in tests/data/"]
fn snapshot_of_booted_machine_round_trips() {
    let mut c64 = machine_with_roms().expect("ROM images present");
    c64.execute_cycles(1_000_000);

    c64.suspend();
    let snapshot = c64.save_snapshot();
    c64.resume();

    let mut restored = machine_with_roms().expect("ROM images present");
    restored.load_snapshot(&snapshot).expect("snapshot loads");

    for _ in 0..100 {
        c64.execute_one_cycle();
        restored.execute_one_cycle();
    }
    c64.execute_frame();
    restored.execute_frame();
    assert_eq!(c64.screen_buffer(), restored.screen_buffer());
}
