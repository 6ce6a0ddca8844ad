//! Snapshot round-trip and determinism.

use machine_c64::{C64, MachineConfig, Snapshot};

/// A machine running a busy little program that exercises RAM, the VIC
/// registers and the stack.
fn busy_machine() -> C64 {
    let mut c64 = C64::new(MachineConfig::pal());
    c64.poke(0x0000, 0x07);
    c64.poke(0x0001, 0x05); // I/O visible, no ROMs

    // $4000: INX; STX $D020; STX $0400; INC $0401; JMP $4000
    let program = [
        0xE8u8, // INX
        0x8E, 0x20, 0xD0, // STX $D020
        0x8E, 0x00, 0x04, // STX $0400
        0xEE, 0x01, 0x04, // INC $0401
        0x4C, 0x00, 0x40, // JMP $4000
    ];
    for (i, &b) in program.iter().enumerate() {
        c64.mem.ram[0x4000 + i] = b;
    }
    c64.cpu.regs.pc = 0x4000;
    c64.cpu.regs.flags.i = true;
    c64.poke(0xD011, 0x1B);
    c64
}

#[test]
fn snapshot_byte_round_trip_preserves_state() {
    let mut c64 = busy_machine();
    c64.execute_cycles(100_000);

    c64.suspend();
    let snapshot = c64.save_snapshot();
    let bytes = snapshot.to_bytes();
    c64.resume();

    let parsed = Snapshot::from_bytes(&bytes).expect("parseable snapshot");
    assert!(parsed.is_compatible());
    assert_eq!(parsed.data(), snapshot.data());
}

#[test]
fn restored_machine_runs_identically() {
    let mut original = busy_machine();
    original.execute_cycles(1_000_000);

    original.suspend();
    let snapshot = original.save_snapshot();
    original.resume();

    // Restore into a freshly built machine.
    let mut restored = busy_machine();
    restored
        .load_snapshot(&snapshot)
        .expect("snapshot loads into an identical machine");

    assert_eq!(original.cpu.regs, restored.cpu.regs);
    assert_eq!(original.cycle(), restored.cycle());
    assert_eq!(&original.mem.ram[..], &restored.mem.ram[..]);

    // Both continue in lockstep for a while.
    for step in 0..100_000u32 {
        original.execute_one_cycle();
        restored.execute_one_cycle();
        if step % 10_000 == 0 {
            assert_eq!(
                original.cpu.regs, restored.cpu.regs,
                "divergence at step {step}"
            );
        }
    }
    assert_eq!(&original.mem.ram[..], &restored.mem.ram[..]);
    assert_eq!(original.spypeek(0xD020), restored.spypeek(0xD020));

    // Run both to the next frame boundary; the framebuffers must be
    // byte-identical.
    original.execute_frame();
    restored.execute_frame();
    assert_eq!(original.screen_buffer(), restored.screen_buffer());
}

#[test]
fn snapshot_restores_mid_instruction_pipeline() {
    // Snapshots carry the (opcode, cycle) pair, so capturing without an
    // instruction boundary still restores exactly.
    let mut original = busy_machine();
    original.execute_cycles(12_345); // lands mid-instruction somewhere

    let snapshot = original.save_snapshot();
    let mut restored = busy_machine();
    restored.load_snapshot(&snapshot).unwrap();

    for _ in 0..1000 {
        original.execute_one_cycle();
        restored.execute_one_cycle();
    }
    assert_eq!(original.cpu.regs, restored.cpu.regs);
    assert_eq!(original.cpu.total_cycles(), restored.cpu.total_cycles());
}

#[test]
fn version_mismatch_is_rejected() {
    let mut c64 = busy_machine();
    let snapshot = c64.save_snapshot();
    let mut bytes = snapshot.to_bytes();
    bytes[4] ^= 0x01; // bump major version

    let parsed = Snapshot::from_bytes(&bytes).unwrap();
    assert!(!parsed.is_compatible());
    assert_eq!(
        c64.load_snapshot(&parsed),
        Err("unsupported snapshot version")
    );
}

#[test]
fn wrong_machine_revision_is_rejected() {
    let mut pal = busy_machine();
    let snapshot = pal.save_snapshot();

    let mut ntsc = C64::new(MachineConfig::ntsc());
    assert!(ntsc.load_snapshot(&snapshot).is_err());
}
