//! Tom Harte `SingleStepTests` harness for the 6502.
//!
//! Each JSON file holds 10,000 cases for one opcode: initial CPU/RAM state,
//! final state, and the exact bus activity in between. Place the `v1`
//! directory in `tests/data/65x02/6502/v1/`.

use emu_core::Bus;
use mos_6510::Mos6510;
use serde::Deserialize;
use std::path::Path;

struct RamBus {
    ram: Box<[u8; 65536]>,
}

impl RamBus {
    fn new() -> Self {
        Self {
            ram: vec![0u8; 65536].into_boxed_slice().try_into().unwrap(),
        }
    }
}

impl Bus for RamBus {
    fn read(&mut self, address: u16) -> u8 {
        self.ram[address as usize]
    }
    fn write(&mut self, address: u16, value: u8) {
        self.ram[address as usize] = value;
    }
    fn spypeek(&self, address: u16) -> u8 {
        self.ram[address as usize]
    }
}

#[derive(Deserialize)]
struct TestCase {
    name: String,
    initial: CpuState,
    #[serde(rename = "final")]
    final_state: CpuState,
    cycles: Vec<(u16, u8, String)>,
}

#[derive(Deserialize)]
struct CpuState {
    pc: u16,
    s: u8,
    a: u8,
    x: u8,
    y: u8,
    p: u8,
    ram: Vec<(u16, u8)>,
}

fn run_case(case: &TestCase) -> Result<(), String> {
    let mut bus = RamBus::new();
    for &(addr, value) in &case.initial.ram {
        bus.ram[addr as usize] = value;
    }

    let mut cpu = Mos6510::new();
    cpu.regs.pc = case.initial.pc;
    cpu.regs.sp = case.initial.s;
    cpu.regs.a = case.initial.a;
    cpu.regs.x = case.initial.x;
    cpu.regs.y = case.initial.y;
    cpu.regs.flags.unpack(case.initial.p);

    for _ in 0..case.cycles.len() {
        cpu.tick(&mut bus);
    }
    if !cpu.is_instruction_complete() {
        return Err(format!("{}: wrong cycle count", case.name));
    }

    let mut errors = Vec::new();
    if cpu.regs.pc != case.final_state.pc {
        errors.push(format!(
            "PC: got ${:04X}, want ${:04X}",
            cpu.regs.pc, case.final_state.pc
        ));
    }
    if cpu.regs.sp != case.final_state.s {
        errors.push(format!(
            "S: got ${:02X}, want ${:02X}",
            cpu.regs.sp, case.final_state.s
        ));
    }
    if cpu.regs.a != case.final_state.a {
        errors.push(format!(
            "A: got ${:02X}, want ${:02X}",
            cpu.regs.a, case.final_state.a
        ));
    }
    if cpu.regs.x != case.final_state.x {
        errors.push(format!(
            "X: got ${:02X}, want ${:02X}",
            cpu.regs.x, case.final_state.x
        ));
    }
    if cpu.regs.y != case.final_state.y {
        errors.push(format!(
            "Y: got ${:02X}, want ${:02X}",
            cpu.regs.y, case.final_state.y
        ));
    }
    // The B bit has no storage; compare the flags with it masked in.
    if cpu.regs.flags.pack() | 0x30 != case.final_state.p | 0x30 {
        errors.push(format!(
            "P: got ${:02X}, want ${:02X}",
            cpu.regs.flags.pack(),
            case.final_state.p
        ));
    }
    for &(addr, value) in &case.final_state.ram {
        if bus.ram[addr as usize] != value {
            errors.push(format!(
                "[{addr:04X}]: got ${:02X}, want ${value:02X}",
                bus.ram[addr as usize]
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{}: {}", case.name, errors.join(", ")))
    }
}

#[test]
#[ignore = "needs tests/data/65x02/6502/v1/"]
fn single_step_tests() {
    let dir = Path::new("tests/data/65x02/6502/v1");
    let mut failures = 0u32;
    let mut total = 0u32;

    for entry in std::fs::read_dir(dir).expect("test data directory missing") {
        let path = entry.expect("readable dir entry").path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path).expect("readable test file");
        let cases: Vec<TestCase> = serde_json::from_str(&text).expect("valid test JSON");
        for case in &cases {
            total += 1;
            if let Err(msg) = run_case(case) {
                failures += 1;
                if failures <= 20 {
                    eprintln!("{msg}");
                }
            }
        }
    }

    assert_eq!(failures, 0, "{failures}/{total} cases failed");
}
