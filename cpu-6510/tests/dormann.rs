//! Klaus Dormann's 6502 functional test harness.
//!
//! The functional test exercises all documented opcodes including decimal
//! mode. Assemble the standard binary with load address $0000 and place it
//! in `tests/data/6502_functional_test.bin`.
//!
//! - $0400: entry point
//! - the test traps (branches to itself) on failure
//! - success: PC settles at $3469

use emu_core::Bus;
use mos_6510::Mos6510;

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

const SUCCESS_TRAP: u16 = 0x3469;

fn run_dormann(binary: &[u8]) -> bool {
    let mut bus = RamBus::new();
    bus.ram[..binary.len()].copy_from_slice(binary);

    let mut cpu = Mos6510::new();
    cpu.regs.pc = 0x0400;

    let mut instructions: u64 = 0;
    let mut prev_pc = 0xFFFFu16;
    let mut same_pc_count = 0;

    loop {
        let start_pc = cpu.regs.pc;

        // A trap is a branch to itself: the PC stops moving.
        if start_pc == prev_pc {
            same_pc_count += 1;
            if same_pc_count > 2 {
                eprintln!("trapped at ${start_pc:04X} after {instructions} instructions");
                return start_pc == SUCCESS_TRAP;
            }
        } else {
            same_pc_count = 0;
            prev_pc = start_pc;
        }

        cpu.tick(&mut bus);
        while !cpu.is_instruction_complete() {
            cpu.tick(&mut bus);
        }
        instructions += 1;

        if instructions > 100_000_000 {
            eprintln!("exceeded 100M instructions at PC=${:04X}", cpu.regs.pc);
            return false;
        }
    }
}

#[test]
#[ignore = "needs tests/data/6502_functional_test.bin"]
fn dormann_functional() {
    let binary = std::fs::read("tests/data/6502_functional_test.bin")
        .expect("tests/data/6502_functional_test.bin not found");
    assert!(run_dormann(&binary), "Dormann functional test failed");
}
