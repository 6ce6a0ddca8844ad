//! Unit tests for 6510 instruction and interrupt behavior.

use emu_core::Bus;
use mos_6510::{ErrorState, Mos6510, INTSRC_CIA};

/// Flat 64KB RAM for testing.
struct RamBus {
    ram: Box<[u8; 65536]>,
}

impl RamBus {
    fn new() -> Self {
        Self {
            ram: vec![0u8; 65536].into_boxed_slice().try_into().unwrap(),
        }
    }

    fn load(&mut self, addr: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.ram[addr as usize + i] = b;
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

/// Run one complete instruction (fetch plus execute cycles).
fn run_instruction(cpu: &mut Mos6510, bus: &mut RamBus) {
    cpu.tick(bus);
    for _ in 0..20 {
        if cpu.is_instruction_complete() {
            return;
        }
        cpu.tick(bus);
    }
    panic!("instruction did not complete within 20 cycles");
}

fn setup(bus: &mut RamBus, cpu: &mut Mos6510, program: &[u8]) {
    bus.load(0x0200, program);
    cpu.regs.pc = 0x0200;
    cpu.regs.sp = 0xFF;
}

#[test]
fn lda_sets_flags() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    setup(&mut bus, &mut cpu, &[0xA9, 0x80, 0xA9, 0x00]);

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.a, 0x80);
    assert!(cpu.regs.flags.n);

    run_instruction(&mut cpu, &mut bus);
    assert!(cpu.regs.flags.z);
    assert!(!cpu.regs.flags.n);
}

#[test]
fn stack_pha_pla() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    // LDA #$42; PHA; LDA #$00; PLA
    setup(&mut bus, &mut cpu, &[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68]);

    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.regs.a, 0x42);
    assert_eq!(cpu.regs.sp, 0xFF);
}

#[test]
fn brk_pushes_b_set_and_vectors() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x03);
    // CLI; BRK; padding
    setup(&mut bus, &mut cpu, &[0x58, 0x00, 0xEA]);

    run_instruction(&mut cpu, &mut bus);
    run_instruction(&mut cpu, &mut bus);

    assert_eq!(cpu.regs.pc, 0x0300);
    assert_eq!(cpu.regs.sp, 0xFC);
    assert!(cpu.regs.flags.i);
    // Return address skips the padding byte.
    assert_eq!(bus.spypeek(0x01FF), 0x02);
    assert_eq!(bus.spypeek(0x01FE), 0x03);
    // Pushed status has B and bit 5 set.
    assert_eq!(bus.spypeek(0x01FD) & 0x30, 0x30);
}

#[test]
fn jmp_indirect_page_wrap_bug() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();

    // Pointer at $02FF: low byte at $02FF, high byte read from $0200
    // (not $0300) because the 6502 never carries into the page.
    bus.write(0x02FF, 0x34);
    bus.write(0x0300, 0xFF); // would be used by a correct CPU
    bus.write(0x0200, 0x12); // actually used

    bus.load(0x0400, &[0x6C, 0xFF, 0x02]);
    cpu.regs.pc = 0x0400;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.pc, 0x1234);
}

#[test]
fn sei_delays_irq_by_one_instruction() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x06); // IRQ handler at $0600
    bus.write(0x0600, 0xEA);

    // NOP; SEI; NOP; NOP - IRQ asserted long before the SEI.
    setup(&mut bus, &mut cpu, &[0xEA, 0x78, 0xEA, 0xEA]);

    run_instruction(&mut cpu, &mut bus); // NOP
    cpu.pull_down_irq_line(INTSRC_CIA);
    // Let the line settle past the acknowledge delay.
    run_instruction(&mut cpu, &mut bus); // SEI (I becomes 1)

    // The instruction after SEI still samples the old I value, so the IRQ
    // is taken now even though I is already set.
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.pc, 0x0600, "IRQ must fire once after SEI");
}

#[test]
fn cli_delays_irq_by_one_instruction() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x06);
    bus.write(0x0600, 0xEA);

    // SEI; CLI; NOP; NOP with the IRQ line held the whole time.
    setup(&mut bus, &mut cpu, &[0x78, 0x58, 0xE8, 0xE8]);

    run_instruction(&mut cpu, &mut bus); // SEI
    cpu.pull_down_irq_line(INTSRC_CIA);
    run_instruction(&mut cpu, &mut bus); // CLI (I becomes 0)

    // Directly after CLI the poll still sees the old I=1: INX runs.
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.x, 1, "instruction after CLI must still execute");
    assert_ne!(cpu.regs.pc, 0x0600);

    // One instruction later the IRQ is taken.
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.pc, 0x0600);
}

#[test]
fn irq_pushes_b_clear() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x06);
    setup(&mut bus, &mut cpu, &[0xEA, 0xEA, 0xEA]);

    run_instruction(&mut cpu, &mut bus);
    cpu.pull_down_irq_line(INTSRC_CIA);
    run_instruction(&mut cpu, &mut bus);
    run_instruction(&mut cpu, &mut bus); // acknowledge sequence

    assert_eq!(cpu.regs.pc, 0x0600);
    // Status byte on the stack has B clear, bit 5 set.
    assert_eq!(bus.spypeek(0x01FD) & 0x30, 0x20);
    assert!(cpu.regs.flags.i);
}

#[test]
fn nmi_is_edge_triggered() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0xFFFA, 0x00);
    bus.write(0xFFFB, 0x07); // NMI handler at $0700
    bus.load(0x0700, &[0xEA, 0xEA, 0xEA, 0xEA, 0xEA, 0xEA, 0xEA, 0xEA]);
    setup(&mut bus, &mut cpu, &[0xEA, 0xEA, 0xEA]);

    run_instruction(&mut cpu, &mut bus);
    cpu.pull_down_nmi_line(INTSRC_CIA);
    run_instruction(&mut cpu, &mut bus);
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.pc, 0x0700);

    // The line is still low; without a new edge no second NMI happens.
    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert!(cpu.regs.pc > 0x0700 && cpu.regs.pc < 0x0710);
}

#[test]
fn rdy_low_stalls_reads_but_not_writes() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    // LDA #$55; STA $1000
    setup(&mut bus, &mut cpu, &[0xA9, 0x55, 0x8D, 0x00, 0x10]);

    run_instruction(&mut cpu, &mut bus); // LDA

    // Run STA's fetch and operand reads.
    cpu.tick(&mut bus); // fetch 8D
    cpu.tick(&mut bus); // read $00
    cpu.tick(&mut bus); // read $10

    // Stall. The pending cycle is the data write, which must proceed.
    cpu.set_rdy_line(false);
    cpu.tick(&mut bus);
    assert_eq!(bus.spypeek(0x1000), 0x55, "write cycles ignore RDY");
    assert!(cpu.is_instruction_complete());

    // Next instruction fetch is a read: it must stall now.
    let pc_before = cpu.regs.pc;
    for _ in 0..10 {
        cpu.tick(&mut bus);
    }
    assert_eq!(cpu.regs.pc, pc_before, "fetch must stall while RDY is low");

    cpu.set_rdy_line(true);
    cpu.tick(&mut bus);
    assert_ne!(cpu.regs.pc, pc_before);
}

#[test]
fn illegal_opcode_sets_error_state() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    setup(&mut bus, &mut cpu, &[0x02]); // JAM

    cpu.tick(&mut bus);
    cpu.tick(&mut bus);
    assert_eq!(cpu.error_state(), ErrorState::IllegalInstruction);

    // The CPU stays put.
    let pc = cpu.regs.pc;
    cpu.tick(&mut bus);
    assert_eq!(cpu.regs.pc, pc);
}

#[test]
fn lax_loads_a_and_x() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0x0080, 0xC3);
    setup(&mut bus, &mut cpu, &[0xA7, 0x80]); // LAX $80

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.a, 0xC3);
    assert_eq!(cpu.regs.x, 0xC3);
    assert!(cpu.regs.flags.n);
}

#[test]
fn sax_stores_a_and_x() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    setup(&mut bus, &mut cpu, &[0x87, 0x80]); // SAX $80
    cpu.regs.a = 0xF0;
    cpu.regs.x = 0x3C;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(bus.spypeek(0x0080), 0x30);
}

#[test]
fn dcp_decrements_and_compares() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0x0080, 0x43);
    setup(&mut bus, &mut cpu, &[0xC7, 0x80]); // DCP $80
    cpu.regs.a = 0x42;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(bus.spypeek(0x0080), 0x42);
    assert!(cpu.regs.flags.z, "A == decremented value");
    assert!(cpu.regs.flags.c);
}

#[test]
fn isc_increments_and_subtracts() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0x0080, 0x0F);
    setup(&mut bus, &mut cpu, &[0xE7, 0x80]); // ISC $80
    cpu.regs.a = 0x20;
    cpu.regs.flags.c = true;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(bus.spypeek(0x0080), 0x10);
    assert_eq!(cpu.regs.a, 0x10);
}

#[test]
fn slo_shifts_and_ors() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0x0080, 0x81);
    setup(&mut bus, &mut cpu, &[0x07, 0x80]); // SLO $80
    cpu.regs.a = 0x01;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(bus.spypeek(0x0080), 0x02);
    assert_eq!(cpu.regs.a, 0x03);
    assert!(cpu.regs.flags.c, "carry from bit 7 of the original value");
}

#[test]
fn anc_copies_n_into_c() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    setup(&mut bus, &mut cpu, &[0x0B, 0xFF]); // ANC #$FF
    cpu.regs.a = 0x80;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.a, 0x80);
    assert!(cpu.regs.flags.n);
    assert!(cpu.regs.flags.c);
}

#[test]
fn adc_decimal_mode() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    // SED; CLC; LDA #$19; ADC #$28 -> $47 in BCD
    setup(&mut bus, &mut cpu, &[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28]);

    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.regs.a, 0x47);
    assert!(!cpu.regs.flags.c);
}

#[test]
fn sbc_decimal_mode() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    // SED; SEC; LDA #$42; SBC #$13 -> $29 in BCD
    setup(&mut bus, &mut cpu, &[0xF8, 0x38, 0xA9, 0x42, 0xE9, 0x13]);

    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.regs.a, 0x29);
    assert!(cpu.regs.flags.c);
}

#[test]
fn absolute_x_page_cross_costs_a_cycle() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();

    // LDA $10F0,X with X=$20 crosses into $1110.
    bus.write(0x1110, 0x99);
    setup(&mut bus, &mut cpu, &[0xBD, 0xF0, 0x10]);
    cpu.regs.x = 0x20;

    let start = cpu.total_cycles();
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.a, 0x99);
    assert_eq!(cpu.total_cycles() - start, 5, "4 cycles + page-cross penalty");

    // Without a cross it is 4 cycles.
    let mut cpu2 = Mos6510::new();
    bus.write(0x1010, 0x77);
    setup(&mut bus, &mut cpu2, &[0xBD, 0x00, 0x10]);
    cpu2.regs.x = 0x10;
    let start = cpu2.total_cycles();
    run_instruction(&mut cpu2, &mut bus);
    assert_eq!(cpu2.regs.a, 0x77);
    assert_eq!(cpu2.total_cycles() - start, 4);
}

#[test]
fn rmw_performs_double_write() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    bus.write(0x0080, 0x41);
    setup(&mut bus, &mut cpu, &[0xE6, 0x80]); // INC $80

    let start = cpu.total_cycles();
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(bus.spypeek(0x0080), 0x42);
    assert_eq!(cpu.total_cycles() - start, 5);
}

#[test]
fn breakpoints_halt_and_soft_tags_clear() {
    let mut bus = RamBus::new();
    let mut cpu = Mos6510::new();
    setup(&mut bus, &mut cpu, &[0xE8, 0xE8, 0xE8]); // INX x3

    cpu.set_breakpoint(0x0201, mos_6510::BreakpointTag::Soft);
    run_instruction(&mut cpu, &mut bus);

    cpu.tick(&mut bus);
    assert_eq!(cpu.error_state(), ErrorState::SoftBreakpoint);
    assert_eq!(cpu.regs.x, 1, "halted before the second INX");
    assert_eq!(
        cpu.breakpoint(0x0201),
        mos_6510::BreakpointTag::None,
        "soft tag is deleted when it fires"
    );

    cpu.clear_error_state();
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.x, 2);
}
