//! 6510 CPU implementation.
//!
//! Each `tick()` consumes one clock cycle and performs at most one bus
//! transaction. The position inside an instruction is `(opcode, cycle)`;
//! both are plain integers so the whole pipeline state serializes directly.
//!
//! Interrupt lines are bitmasks of asserting sources. IRQ is level
//! triggered and sampled in the fetch slot; NMI latches its falling edge.
//! An asserted line is not acknowledged before two cycles have passed,
//! which models the one-cycle propagation delay between the CIAs and the
//! CPU.

use emu_core::{Bus, SnapshotReader, SnapshotWriter};
use log::debug;

use crate::registers::Registers;

/// IRQ/NMI source: CIA 1 (IRQ) or CIA 2 (NMI).
pub const INTSRC_CIA: u8 = 0x01;
/// IRQ source: VIC-II.
pub const INTSRC_VIC: u8 = 0x02;
/// IRQ/NMI source: expansion port (cartridge).
pub const INTSRC_EXPANSION: u8 = 0x10;
/// NMI source: RESTORE key.
pub const INTSRC_KEYBOARD: u8 = 0x20;

/// Breakpoint tag attached to a memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakpointTag {
    #[default]
    None,
    /// Execution halts; the tag stays.
    Hard,
    /// Execution halts; the tag is deleted.
    Soft,
}

/// Error state of the CPU.
///
/// `Ok` is normal operation. Anything else means the CPU has stopped and is
/// waiting for the host to intervene. None of these are fatal to the
/// process; the emulation thread halts, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorState {
    #[default]
    Ok,
    SoftBreakpoint,
    HardBreakpoint,
    IllegalInstruction,
}

impl ErrorState {
    fn to_u8(self) -> u8 {
        match self {
            ErrorState::Ok => 0,
            ErrorState::SoftBreakpoint => 1,
            ErrorState::HardBreakpoint => 2,
            ErrorState::IllegalInstruction => 3,
        }
    }

    fn from_u8(value: u8) -> Result<Self, &'static str> {
        match value {
            0 => Ok(ErrorState::Ok),
            1 => Ok(ErrorState::SoftBreakpoint),
            2 => Ok(ErrorState::HardBreakpoint),
            3 => Ok(ErrorState::IllegalInstruction),
            _ => Err("invalid CPU error state"),
        }
    }
}

/// Execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Next cycle fetches an opcode (instruction boundary).
    Fetch,
    /// Executing the cycles of the current opcode.
    Execute,
    /// Running the seven-cycle interrupt acknowledge sequence.
    Service,
}

const SERVICE_IRQ: u8 = 1;
const SERVICE_NMI: u8 = 2;

/// Return-address ring kept for the debugger's call-stack view.
const CALL_STACK_DEPTH: usize = 64;

/// The MOS 6510.
pub struct Mos6510 {
    /// Register set.
    pub regs: Registers,

    state: State,
    /// Opcode currently executing (also consulted for the SEI/CLI/PLP/RTI
    /// interrupt quirk, where it still holds the previous opcode during the
    /// fetch slot).
    opcode: u8,
    /// Cycle index within the current instruction; 0 is the fetch slot.
    cycle: u8,
    /// Which interrupt the Service state is acknowledging.
    servicing: u8,

    // Pipeline scratch.
    addr: u16,
    pointer: u8,
    data: u8,
    /// Indexed addressing crossed a page; the high byte needs fixing.
    overflow: bool,

    /// PC of the opcode byte, recorded in the fetch slot.
    pc_at_cycle_0: u16,

    /// RDY input. While low, read cycles stall; writes proceed.
    rdy_line: bool,

    /// Bitmask of sources currently pulling IRQ low.
    irq_line: u8,
    /// Bitmask of sources currently pulling NMI low.
    nmi_line: u8,
    /// Latched falling edge of the NMI line; cleared on acknowledge.
    nmi_edge: bool,
    /// Earliest cycle at which a pending IRQ may be acknowledged.
    next_possible_irq_cycle: u64,
    /// Earliest cycle at which the latched NMI may be acknowledged.
    next_possible_nmi_cycle: u64,
    /// I flag before the current instruction. SEI/CLI/PLP/RTI change I one
    /// cycle too late on a real 6510; the fetch slot samples this instead.
    old_i: bool,

    error_state: ErrorState,
    /// Skip the breakpoint check once, so execution can resume off a hard
    /// breakpoint after the host clears the error state.
    skip_breakpoint_check: bool,
    breakpoints: Box<[BreakpointTag; 65536]>,

    /// Ring buffer of return targets (JSR and interrupt entries).
    call_stack: [u16; CALL_STACK_DEPTH],
    call_stack_ptr: u8,

    /// Set when an NMI acknowledge sequence begins; consumed by the
    /// machine to run cartridge NMI callbacks.
    nmi_acknowledged: bool,

    /// Total cycles executed since power-on.
    total_cycles: u64,
}

impl Default for Mos6510 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6510 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            state: State::Fetch,
            opcode: 0,
            cycle: 0,
            servicing: 0,
            addr: 0,
            pointer: 0,
            data: 0,
            overflow: false,
            pc_at_cycle_0: 0,
            rdy_line: true,
            irq_line: 0,
            nmi_line: 0,
            nmi_edge: false,
            next_possible_irq_cycle: 0,
            next_possible_nmi_cycle: 0,
            old_i: false,
            error_state: ErrorState::Ok,
            skip_breakpoint_check: false,
            breakpoints: Box::new([BreakpointTag::None; 65536]),
            call_stack: [0; CALL_STACK_DEPTH],
            call_stack_ptr: 0,
            nmi_acknowledged: false,
            total_cycles: 0,
        }
    }

    /// Reset to the power-on state. Breakpoints survive; the caller loads PC
    /// from the reset vector afterwards.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.state = State::Fetch;
        self.opcode = 0;
        self.cycle = 0;
        self.servicing = 0;
        self.addr = 0;
        self.pointer = 0;
        self.data = 0;
        self.overflow = false;
        self.pc_at_cycle_0 = 0;
        self.rdy_line = true;
        self.irq_line = 0;
        self.nmi_line = 0;
        self.nmi_edge = false;
        self.next_possible_irq_cycle = 0;
        self.next_possible_nmi_cycle = 0;
        self.old_i = false;
        self.error_state = ErrorState::Ok;
        self.skip_breakpoint_check = false;
        self.call_stack = [0; CALL_STACK_DEPTH];
        self.call_stack_ptr = 0;
        self.nmi_acknowledged = false;
        self.total_cycles = 0;
    }

    /// True once after each NMI acknowledge; reading clears the flag.
    pub fn take_nmi_acknowledged(&mut self) -> bool {
        std::mem::take(&mut self.nmi_acknowledged)
    }

    // ------------------------------------------------------------------
    // Lines
    // ------------------------------------------------------------------

    /// Pull the IRQ line low on behalf of `source`.
    pub fn pull_down_irq_line(&mut self, source: u8) {
        debug_assert!(source != 0);
        if self.irq_line == 0 {
            self.next_possible_irq_cycle = self.total_cycles + 2;
        }
        self.irq_line |= source;
    }

    /// Release `source`'s pull on the IRQ line.
    pub fn release_irq_line(&mut self, source: u8) {
        self.irq_line &= !source;
    }

    /// Pull the NMI line low on behalf of `source`. The 1→0 transition of
    /// the combined line latches the edge.
    pub fn pull_down_nmi_line(&mut self, source: u8) {
        debug_assert!(source != 0);
        if self.nmi_line == 0 {
            self.nmi_edge = true;
            self.next_possible_nmi_cycle = self.total_cycles + 2;
        }
        self.nmi_line |= source;
    }

    /// Release `source`'s pull on the NMI line. Does not clear a latched
    /// edge; only the acknowledge does that.
    pub fn release_nmi_line(&mut self, source: u8) {
        self.nmi_line &= !source;
    }

    #[must_use]
    pub fn irq_line(&self) -> u8 {
        self.irq_line
    }

    #[must_use]
    pub fn nmi_line(&self) -> u8 {
        self.nmi_line
    }

    /// Drive the RDY input (wired to the VIC-II's delayed BA output).
    pub fn set_rdy_line(&mut self, high: bool) {
        self.rdy_line = high;
    }

    #[must_use]
    pub fn rdy_line(&self) -> bool {
        self.rdy_line
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// True at an instruction boundary (next cycle fetches an opcode).
    #[must_use]
    pub fn is_instruction_complete(&self) -> bool {
        self.state == State::Fetch
    }

    /// PC of the instruction currently executing.
    #[must_use]
    pub fn pc_at_cycle_0(&self) -> u16 {
        self.pc_at_cycle_0
    }

    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    #[must_use]
    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    /// Clear the error state so execution can continue. Resuming off a hard
    /// breakpoint skips exactly one breakpoint check.
    pub fn clear_error_state(&mut self) {
        if self.error_state == ErrorState::HardBreakpoint {
            self.skip_breakpoint_check = true;
        }
        self.error_state = ErrorState::Ok;
    }

    /// The recorded call stack, most recent entry last.
    #[must_use]
    pub fn call_stack(&self) -> Vec<u16> {
        let ptr = usize::from(self.call_stack_ptr);
        let mut result = Vec::with_capacity(ptr);
        result.extend_from_slice(&self.call_stack[..ptr.min(CALL_STACK_DEPTH)]);
        result
    }

    // ------------------------------------------------------------------
    // Breakpoints
    // ------------------------------------------------------------------

    pub fn set_breakpoint(&mut self, addr: u16, tag: BreakpointTag) {
        self.breakpoints[addr as usize] = tag;
    }

    #[must_use]
    pub fn breakpoint(&self, addr: u16) -> BreakpointTag {
        self.breakpoints[addr as usize]
    }

    pub fn delete_breakpoint(&mut self, addr: u16) {
        self.breakpoints[addr as usize] = BreakpointTag::None;
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute one clock cycle.
    pub fn tick<B: Bus>(&mut self, bus: &mut B) {
        self.total_cycles += 1;

        match self.state {
            State::Fetch => self.fetch(bus),
            State::Execute => self.execute_instruction(bus),
            State::Service => self.service_interrupt(bus),
        }
    }

    /// One read bus transaction, honoring the RDY line.
    ///
    /// Returns `None` when the CPU is stalled; the caller must return
    /// immediately without changing any state, so the same micro-step is
    /// retried next cycle.
    fn read_cycle<B: Bus>(&mut self, bus: &mut B, addr: u16) -> Option<u8> {
        if !self.rdy_line {
            return None;
        }
        Some(bus.read(addr))
    }

    fn finish(&mut self) {
        self.state = State::Fetch;
        self.cycle = 0;
    }

    fn push_call_stack(&mut self, return_target: u16) {
        let ptr = usize::from(self.call_stack_ptr) % CALL_STACK_DEPTH;
        self.call_stack[ptr] = return_target;
        if usize::from(self.call_stack_ptr) < CALL_STACK_DEPTH {
            self.call_stack_ptr += 1;
        }
    }

    fn pop_call_stack(&mut self) {
        if self.call_stack_ptr > 0 {
            self.call_stack_ptr -= 1;
        }
    }

    /// The I value interrupt polling sees. SEI, CLI, PLP and RTI take
    /// effect one instruction late: the poll after one of those samples the
    /// pre-instruction value.
    fn irqs_are_blocked(&mut self) -> bool {
        let blocked = match self.opcode {
            0x78 | 0x58 | 0x28 | 0x40 => self.old_i,
            _ => self.regs.flags.i,
        };
        self.old_i = self.regs.flags.i;
        blocked
    }

    /// Breakpoint check at the fetch slot. Returns true when execution must
    /// halt on this address.
    fn check_breakpoint(&mut self) -> bool {
        if self.skip_breakpoint_check {
            self.skip_breakpoint_check = false;
            return false;
        }
        match self.breakpoints[self.regs.pc as usize] {
            BreakpointTag::None => false,
            BreakpointTag::Hard => {
                debug!("hard breakpoint at {:04X}", self.regs.pc);
                self.error_state = ErrorState::HardBreakpoint;
                true
            }
            BreakpointTag::Soft => {
                debug!("soft breakpoint at {:04X}", self.regs.pc);
                self.breakpoints[self.regs.pc as usize] = BreakpointTag::None;
                self.error_state = ErrorState::SoftBreakpoint;
                true
            }
        }
    }

    /// The fetch slot: poll interrupts, check breakpoints, read the opcode.
    fn fetch<B: Bus>(&mut self, bus: &mut B) {
        if !self.rdy_line {
            return;
        }
        if self.error_state != ErrorState::Ok {
            return;
        }
        if self.check_breakpoint() {
            return;
        }

        let irq_blocked = self.irqs_are_blocked();

        if self.nmi_edge && self.total_cycles >= self.next_possible_nmi_cycle {
            self.nmi_edge = false;
            self.nmi_acknowledged = true;
            self.servicing = SERVICE_NMI;
            let _ = bus.read(self.regs.pc);
            self.state = State::Service;
            self.cycle = 1;
            return;
        }

        if self.irq_line != 0 && !irq_blocked && self.total_cycles >= self.next_possible_irq_cycle
        {
            self.servicing = SERVICE_IRQ;
            let _ = bus.read(self.regs.pc);
            self.state = State::Service;
            self.cycle = 1;
            return;
        }

        self.pc_at_cycle_0 = self.regs.pc;
        self.opcode = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.cycle = 1;
        self.state = State::Execute;
    }

    /// Seven-cycle interrupt acknowledge: two dummy reads (the first was the
    /// fetch slot), PCH, PCL, P with B clear, then the vector.
    fn service_interrupt<B: Bus>(&mut self, bus: &mut B) {
        let vector: u16 = if self.servicing == SERVICE_NMI {
            0xFFFA
        } else {
            0xFFFE
        };
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.flags.pack() & !0x10);
                self.regs.flags.i = true;
                self.cycle = 5;
            }
            5 => {
                let Some(lo) = self.read_cycle(bus, vector) else {
                    return;
                };
                self.data = lo;
                self.cycle = 6;
            }
            6 => {
                let Some(hi) = self.read_cycle(bus, vector.wrapping_add(1)) else {
                    return;
                };
                self.push_call_stack(self.regs.pc);
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.servicing = 0;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// One cycle of the current instruction.
    #[allow(clippy::too_many_lines)]
    fn execute_instruction<B: Bus>(&mut self, bus: &mut B) {
        match self.opcode {
            // BRK
            0x00 => self.op_brk(bus),
            // ORA
            0x01 => self.addr_izx(bus, Self::do_ora),
            0x05 => self.addr_zp(bus, Self::do_ora),
            0x09 => self.addr_imm(bus, Self::do_ora),
            0x0D => self.addr_abs(bus, Self::do_ora),
            0x11 => self.addr_izy(bus, Self::do_ora),
            0x15 => self.addr_zpx(bus, Self::do_ora),
            0x19 => self.addr_aby(bus, Self::do_ora),
            0x1D => self.addr_abx(bus, Self::do_ora),
            // ASL
            0x06 => self.addr_zp_rmw(bus, Self::do_asl),
            0x0A => self.op_accumulator(bus, Self::do_asl),
            0x0E => self.addr_abs_rmw(bus, Self::do_asl),
            0x16 => self.addr_zpx_rmw(bus, Self::do_asl),
            0x1E => self.addr_abx_rmw(bus, Self::do_asl),
            // PHP / PLP / PHA / PLA
            0x08 => self.op_php(bus),
            0x28 => self.op_plp(bus),
            0x48 => self.op_pha(bus),
            0x68 => self.op_pla(bus),
            // Branches
            0x10 => self.op_branch(bus, !self.regs.flags.n),
            0x30 => self.op_branch(bus, self.regs.flags.n),
            0x50 => self.op_branch(bus, !self.regs.flags.v),
            0x70 => self.op_branch(bus, self.regs.flags.v),
            0x90 => self.op_branch(bus, !self.regs.flags.c),
            0xB0 => self.op_branch(bus, self.regs.flags.c),
            0xD0 => self.op_branch(bus, !self.regs.flags.z),
            0xF0 => self.op_branch(bus, self.regs.flags.z),
            // Flag operations
            0x18 => self.op_flag(bus, |cpu| cpu.regs.flags.c = false),
            0x38 => self.op_flag(bus, |cpu| cpu.regs.flags.c = true),
            0x58 => self.op_flag(bus, |cpu| cpu.regs.flags.i = false),
            0x78 => self.op_flag(bus, |cpu| cpu.regs.flags.i = true),
            0xB8 => self.op_flag(bus, |cpu| cpu.regs.flags.v = false),
            0xD8 => self.op_flag(bus, |cpu| cpu.regs.flags.d = false),
            0xF8 => self.op_flag(bus, |cpu| cpu.regs.flags.d = true),
            // JSR / RTS / RTI
            0x20 => self.op_jsr(bus),
            0x60 => self.op_rts(bus),
            0x40 => self.op_rti(bus),
            // AND
            0x21 => self.addr_izx(bus, Self::do_and),
            0x25 => self.addr_zp(bus, Self::do_and),
            0x29 => self.addr_imm(bus, Self::do_and),
            0x2D => self.addr_abs(bus, Self::do_and),
            0x31 => self.addr_izy(bus, Self::do_and),
            0x35 => self.addr_zpx(bus, Self::do_and),
            0x39 => self.addr_aby(bus, Self::do_and),
            0x3D => self.addr_abx(bus, Self::do_and),
            // BIT
            0x24 => self.addr_zp(bus, Self::do_bit),
            0x2C => self.addr_abs(bus, Self::do_bit),
            // ROL
            0x26 => self.addr_zp_rmw(bus, Self::do_rol),
            0x2A => self.op_accumulator(bus, Self::do_rol),
            0x2E => self.addr_abs_rmw(bus, Self::do_rol),
            0x36 => self.addr_zpx_rmw(bus, Self::do_rol),
            0x3E => self.addr_abx_rmw(bus, Self::do_rol),
            // EOR
            0x41 => self.addr_izx(bus, Self::do_eor),
            0x45 => self.addr_zp(bus, Self::do_eor),
            0x49 => self.addr_imm(bus, Self::do_eor),
            0x4D => self.addr_abs(bus, Self::do_eor),
            0x51 => self.addr_izy(bus, Self::do_eor),
            0x55 => self.addr_zpx(bus, Self::do_eor),
            0x59 => self.addr_aby(bus, Self::do_eor),
            0x5D => self.addr_abx(bus, Self::do_eor),
            // LSR
            0x46 => self.addr_zp_rmw(bus, Self::do_lsr),
            0x4A => self.op_accumulator(bus, Self::do_lsr),
            0x4E => self.addr_abs_rmw(bus, Self::do_lsr),
            0x56 => self.addr_zpx_rmw(bus, Self::do_lsr),
            0x5E => self.addr_abx_rmw(bus, Self::do_lsr),
            // JMP
            0x4C => self.op_jmp_abs(bus),
            0x6C => self.op_jmp_ind(bus),
            // ADC
            0x61 => self.addr_izx(bus, Self::do_adc),
            0x65 => self.addr_zp(bus, Self::do_adc),
            0x69 => self.addr_imm(bus, Self::do_adc),
            0x6D => self.addr_abs(bus, Self::do_adc),
            0x71 => self.addr_izy(bus, Self::do_adc),
            0x75 => self.addr_zpx(bus, Self::do_adc),
            0x79 => self.addr_aby(bus, Self::do_adc),
            0x7D => self.addr_abx(bus, Self::do_adc),
            // ROR
            0x66 => self.addr_zp_rmw(bus, Self::do_ror),
            0x6A => self.op_accumulator(bus, Self::do_ror),
            0x6E => self.addr_abs_rmw(bus, Self::do_ror),
            0x76 => self.addr_zpx_rmw(bus, Self::do_ror),
            0x7E => self.addr_abx_rmw(bus, Self::do_ror),
            // STA / STX / STY
            0x81 => self.addr_izx_w(bus, |cpu| cpu.regs.a),
            0x84 => self.addr_zp_w(bus, |cpu| cpu.regs.y),
            0x85 => self.addr_zp_w(bus, |cpu| cpu.regs.a),
            0x86 => self.addr_zp_w(bus, |cpu| cpu.regs.x),
            0x8C => self.addr_abs_w(bus, |cpu| cpu.regs.y),
            0x8D => self.addr_abs_w(bus, |cpu| cpu.regs.a),
            0x8E => self.addr_abs_w(bus, |cpu| cpu.regs.x),
            0x91 => self.addr_izy_w(bus, |cpu| cpu.regs.a),
            0x94 => self.addr_zpx_w(bus, |cpu| cpu.regs.y),
            0x95 => self.addr_zpx_w(bus, |cpu| cpu.regs.a),
            0x96 => self.addr_zpy_w(bus, |cpu| cpu.regs.x),
            0x99 => self.addr_aby_w(bus, |cpu| cpu.regs.a),
            0x9D => self.addr_abx_w(bus, |cpu| cpu.regs.a),
            // Transfers
            0x8A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.x;
                cpu.regs.flags.set_nz(cpu.regs.a);
            }),
            0x98 => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.y;
                cpu.regs.flags.set_nz(cpu.regs.a);
            }),
            0x9A => self.op_implied(bus, |cpu| {
                // TXS does not touch the flags.
                cpu.regs.sp = cpu.regs.x;
            }),
            0xA8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.a;
                cpu.regs.flags.set_nz(cpu.regs.y);
            }),
            0xAA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.a;
                cpu.regs.flags.set_nz(cpu.regs.x);
            }),
            0xBA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.sp;
                cpu.regs.flags.set_nz(cpu.regs.x);
            }),
            // LDA / LDX / LDY
            0xA0 => self.addr_imm(bus, Self::do_ldy),
            0xA1 => self.addr_izx(bus, Self::do_lda),
            0xA2 => self.addr_imm(bus, Self::do_ldx),
            0xA4 => self.addr_zp(bus, Self::do_ldy),
            0xA5 => self.addr_zp(bus, Self::do_lda),
            0xA6 => self.addr_zp(bus, Self::do_ldx),
            0xA9 => self.addr_imm(bus, Self::do_lda),
            0xAC => self.addr_abs(bus, Self::do_ldy),
            0xAD => self.addr_abs(bus, Self::do_lda),
            0xAE => self.addr_abs(bus, Self::do_ldx),
            0xB1 => self.addr_izy(bus, Self::do_lda),
            0xB4 => self.addr_zpx(bus, Self::do_ldy),
            0xB5 => self.addr_zpx(bus, Self::do_lda),
            0xB6 => self.addr_zpy(bus, Self::do_ldx),
            0xB9 => self.addr_aby(bus, Self::do_lda),
            0xBC => self.addr_abx(bus, Self::do_ldy),
            0xBD => self.addr_abx(bus, Self::do_lda),
            0xBE => self.addr_aby(bus, Self::do_ldx),
            // CMP / CPX / CPY
            0xC0 => self.addr_imm(bus, Self::do_cpy),
            0xC1 => self.addr_izx(bus, Self::do_cmp),
            0xC4 => self.addr_zp(bus, Self::do_cpy),
            0xC5 => self.addr_zp(bus, Self::do_cmp),
            0xC9 => self.addr_imm(bus, Self::do_cmp),
            0xCC => self.addr_abs(bus, Self::do_cpy),
            0xCD => self.addr_abs(bus, Self::do_cmp),
            0xD1 => self.addr_izy(bus, Self::do_cmp),
            0xD5 => self.addr_zpx(bus, Self::do_cmp),
            0xD9 => self.addr_aby(bus, Self::do_cmp),
            0xDD => self.addr_abx(bus, Self::do_cmp),
            0xE0 => self.addr_imm(bus, Self::do_cpx),
            0xE4 => self.addr_zp(bus, Self::do_cpx),
            0xEC => self.addr_abs(bus, Self::do_cpx),
            // DEC / INC
            0xC6 => self.addr_zp_rmw(bus, Self::do_dec),
            0xCE => self.addr_abs_rmw(bus, Self::do_dec),
            0xD6 => self.addr_zpx_rmw(bus, Self::do_dec),
            0xDE => self.addr_abx_rmw(bus, Self::do_dec),
            0xE6 => self.addr_zp_rmw(bus, Self::do_inc),
            0xEE => self.addr_abs_rmw(bus, Self::do_inc),
            0xF6 => self.addr_zpx_rmw(bus, Self::do_inc),
            0xFE => self.addr_abx_rmw(bus, Self::do_inc),
            // Register increments/decrements
            0x88 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_sub(1);
                cpu.regs.flags.set_nz(cpu.regs.y);
            }),
            0xC8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_add(1);
                cpu.regs.flags.set_nz(cpu.regs.y);
            }),
            0xCA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_sub(1);
                cpu.regs.flags.set_nz(cpu.regs.x);
            }),
            0xE8 => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_add(1);
                cpu.regs.flags.set_nz(cpu.regs.x);
            }),
            // SBC (0xEB is the undocumented alias)
            0xE1 => self.addr_izx(bus, Self::do_sbc),
            0xE5 => self.addr_zp(bus, Self::do_sbc),
            0xE9 | 0xEB => self.addr_imm(bus, Self::do_sbc),
            0xED => self.addr_abs(bus, Self::do_sbc),
            0xF1 => self.addr_izy(bus, Self::do_sbc),
            0xF5 => self.addr_zpx(bus, Self::do_sbc),
            0xF9 => self.addr_aby(bus, Self::do_sbc),
            0xFD => self.addr_abx(bus, Self::do_sbc),
            // NOP and its undocumented widenings
            0xEA | 0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => self.op_implied(bus, |_| {}),
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => self.addr_imm(bus, |_, _| {}),
            0x04 | 0x44 | 0x64 => self.addr_zp(bus, |_, _| {}),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => self.addr_zpx(bus, |_, _| {}),
            0x0C => self.addr_abs(bus, |_, _| {}),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => self.addr_abx(bus, |_, _| {}),
            // SLO: ASL memory, then ORA
            0x03 => self.addr_izx_rmw(bus, Self::do_slo),
            0x07 => self.addr_zp_rmw(bus, Self::do_slo),
            0x0F => self.addr_abs_rmw(bus, Self::do_slo),
            0x13 => self.addr_izy_rmw(bus, Self::do_slo),
            0x17 => self.addr_zpx_rmw(bus, Self::do_slo),
            0x1B => self.addr_aby_rmw(bus, Self::do_slo),
            0x1F => self.addr_abx_rmw(bus, Self::do_slo),
            // RLA: ROL memory, then AND
            0x23 => self.addr_izx_rmw(bus, Self::do_rla),
            0x27 => self.addr_zp_rmw(bus, Self::do_rla),
            0x2F => self.addr_abs_rmw(bus, Self::do_rla),
            0x33 => self.addr_izy_rmw(bus, Self::do_rla),
            0x37 => self.addr_zpx_rmw(bus, Self::do_rla),
            0x3B => self.addr_aby_rmw(bus, Self::do_rla),
            0x3F => self.addr_abx_rmw(bus, Self::do_rla),
            // SRE: LSR memory, then EOR
            0x43 => self.addr_izx_rmw(bus, Self::do_sre),
            0x47 => self.addr_zp_rmw(bus, Self::do_sre),
            0x4F => self.addr_abs_rmw(bus, Self::do_sre),
            0x53 => self.addr_izy_rmw(bus, Self::do_sre),
            0x57 => self.addr_zpx_rmw(bus, Self::do_sre),
            0x5B => self.addr_aby_rmw(bus, Self::do_sre),
            0x5F => self.addr_abx_rmw(bus, Self::do_sre),
            // RRA: ROR memory, then ADC
            0x63 => self.addr_izx_rmw(bus, Self::do_rra),
            0x67 => self.addr_zp_rmw(bus, Self::do_rra),
            0x6F => self.addr_abs_rmw(bus, Self::do_rra),
            0x73 => self.addr_izy_rmw(bus, Self::do_rra),
            0x77 => self.addr_zpx_rmw(bus, Self::do_rra),
            0x7B => self.addr_aby_rmw(bus, Self::do_rra),
            0x7F => self.addr_abx_rmw(bus, Self::do_rra),
            // SAX: store A & X
            0x83 => self.addr_izx_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x87 => self.addr_zp_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x8F => self.addr_abs_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x97 => self.addr_zpy_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            // LAX: load A and X
            0xA3 => self.addr_izx(bus, Self::do_lax),
            0xA7 => self.addr_zp(bus, Self::do_lax),
            0xAF => self.addr_abs(bus, Self::do_lax),
            0xB3 => self.addr_izy(bus, Self::do_lax),
            0xB7 => self.addr_zpy(bus, Self::do_lax),
            0xBF => self.addr_aby(bus, Self::do_lax),
            // DCP: DEC memory, then CMP
            0xC3 => self.addr_izx_rmw(bus, Self::do_dcp),
            0xC7 => self.addr_zp_rmw(bus, Self::do_dcp),
            0xCF => self.addr_abs_rmw(bus, Self::do_dcp),
            0xD3 => self.addr_izy_rmw(bus, Self::do_dcp),
            0xD7 => self.addr_zpx_rmw(bus, Self::do_dcp),
            0xDB => self.addr_aby_rmw(bus, Self::do_dcp),
            0xDF => self.addr_abx_rmw(bus, Self::do_dcp),
            // ISC: INC memory, then SBC
            0xE3 => self.addr_izx_rmw(bus, Self::do_isc),
            0xE7 => self.addr_zp_rmw(bus, Self::do_isc),
            0xEF => self.addr_abs_rmw(bus, Self::do_isc),
            0xF3 => self.addr_izy_rmw(bus, Self::do_isc),
            0xF7 => self.addr_zpx_rmw(bus, Self::do_isc),
            0xFB => self.addr_aby_rmw(bus, Self::do_isc),
            0xFF => self.addr_abx_rmw(bus, Self::do_isc),
            // ANC: AND immediate, carry from bit 7
            0x0B | 0x2B => self.addr_imm(bus, Self::do_anc),

            // Everything else (JAM and the unstable ops) stops the CPU.
            _ => {
                if self.error_state == ErrorState::Ok {
                    debug!(
                        "illegal opcode {:02X} at {:04X}",
                        self.opcode, self.pc_at_cycle_0
                    );
                    self.error_state = ErrorState::IllegalInstruction;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Addressing modes, read operations
    // ------------------------------------------------------------------

    /// Immediate: operand is the next byte.
    fn addr_imm<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        if self.cycle == 1 {
            let Some(value) = self.read_cycle(bus, self.regs.pc) else {
                return;
            };
            self.regs.pc = self.regs.pc.wrapping_add(1);
            op(self, value);
            self.finish();
        }
    }

    /// Zero page.
    fn addr_zp<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Zero page indexed. The index add wraps within the zero page.
    fn addr_zp_indexed<B: Bus>(&mut self, bus: &mut B, index: u8, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(index));
                self.cycle = 3;
            }
            3 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        let index = self.regs.x;
        self.addr_zp_indexed(bus, index, op);
    }

    fn addr_zpy<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        let index = self.regs.y;
        self.addr_zp_indexed(bus, index, op);
    }

    /// Absolute.
    fn addr_abs<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Absolute indexed read: one extra cycle only when the index add
    /// crosses a page, with a dummy read from the unfixed address.
    fn addr_abs_indexed<B: Bus>(&mut self, bus: &mut B, index: u8, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < index;
                self.cycle = 3;
            }
            3 => {
                if self.overflow {
                    if self.read_cycle(bus, self.addr).is_none() {
                        return;
                    }
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 4;
                } else {
                    let Some(value) = self.read_cycle(bus, self.addr) else {
                        return;
                    };
                    op(self, value);
                    self.finish();
                }
            }
            4 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        let index = self.regs.x;
        self.addr_abs_indexed(bus, index, op);
    }

    fn addr_aby<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        let index = self.regs.y;
        self.addr_abs_indexed(bus, index, op);
    }

    /// Indexed indirect (zp,X).
    fn addr_izx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Indirect indexed (zp),Y.
    fn addr_izy<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < self.regs.y;
                self.cycle = 4;
            }
            4 => {
                if self.overflow {
                    if self.read_cycle(bus, self.addr).is_none() {
                        return;
                    }
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 5;
                } else {
                    let Some(value) = self.read_cycle(bus, self.addr) else {
                        return;
                    };
                    op(self, value);
                    self.finish();
                }
            }
            5 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                op(self, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------
    // Addressing modes, write operations
    // ------------------------------------------------------------------

    fn addr_zp_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zp_indexed_w<B: Bus>(&mut self, bus: &mut B, index: u8, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(index));
                self.cycle = 3;
            }
            3 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        let index = self.regs.x;
        self.addr_zp_indexed_w(bus, index, val);
    }

    fn addr_zpy_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        let index = self.regs.y;
        self.addr_zp_indexed_w(bus, index, val);
    }

    fn addr_abs_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Absolute indexed write: always five cycles, dummy read included.
    fn addr_abs_indexed_w<B: Bus>(&mut self, bus: &mut B, index: u8, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < index;
                self.cycle = 3;
            }
            3 => {
                if self.read_cycle(bus, self.addr).is_none() {
                    return;
                }
                if self.overflow {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        let index = self.regs.x;
        self.addr_abs_indexed_w(bus, index, val);
    }

    fn addr_aby_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        let index = self.regs.y;
        self.addr_abs_indexed_w(bus, index, val);
    }

    fn addr_izx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izy_w<B: Bus>(&mut self, bus: &mut B, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < self.regs.y;
                self.cycle = 4;
            }
            4 => {
                if self.read_cycle(bus, self.addr).is_none() {
                    return;
                }
                if self.overflow {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------
    // Addressing modes, read-modify-write
    // ------------------------------------------------------------------

    fn addr_zp_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 3;
            }
            3 => {
                // The 6502 writes the unmodified value back first.
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.x));
                self.cycle = 3;
            }
            3 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abs_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Absolute indexed read-modify-write: always seven cycles.
    fn addr_abs_indexed_rmw<B: Bus>(&mut self, bus: &mut B, index: u8, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < index;
                self.cycle = 3;
            }
            3 => {
                if self.read_cycle(bus, self.addr).is_none() {
                    return;
                }
                if self.overflow {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        let index = self.regs.x;
        self.addr_abs_indexed_rmw(bus, index, op);
    }

    fn addr_aby_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        let index = self.regs.y;
        self.addr_abs_indexed_rmw(bus, index, op);
    }

    fn addr_izx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izy_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read_cycle(bus, u16::from(self.pointer)) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read_cycle(bus, u16::from(self.pointer.wrapping_add(1)))
                else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.overflow = lo < self.regs.y;
                self.cycle = 4;
            }
            4 => {
                if self.read_cycle(bus, self.addr).is_none() {
                    return;
                }
                if self.overflow {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                let Some(value) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = value;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------
    // Control flow and stack instructions
    // ------------------------------------------------------------------

    fn op_brk<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                // Padding byte; read and skipped.
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.flags.pack() | 0x10);
                self.regs.flags.i = true;
                self.cycle = 5;
            }
            5 => {
                let Some(lo) = self.read_cycle(bus, 0xFFFE) else {
                    return;
                };
                self.data = lo;
                self.cycle = 6;
            }
            6 => {
                let Some(hi) = self.read_cycle(bus, 0xFFFF) else {
                    return;
                };
                self.push_call_stack(self.regs.pc);
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_rti<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, self.regs.stack_addr()).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                let p = bus.read(addr);
                self.regs.flags.unpack(p);
                self.cycle = 4;
            }
            4 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                self.addr = u16::from(bus.read(addr));
                self.cycle = 5;
            }
            5 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                self.regs.pc = self.addr | (u16::from(bus.read(addr)) << 8);
                self.pop_call_stack();
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_rts<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, self.regs.stack_addr()).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                self.addr = u16::from(bus.read(addr));
                self.cycle = 4;
            }
            4 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                self.addr |= u16::from(bus.read(addr)) << 8;
                self.cycle = 5;
            }
            5 => {
                if self.read_cycle(bus, self.addr).is_none() {
                    return;
                }
                self.regs.pc = self.addr.wrapping_add(1);
                self.pop_call_stack();
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_jsr<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, self.regs.stack_addr()).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 5;
            }
            5 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.push_call_stack(self.regs.pc.wrapping_add(1));
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_jmp_abs<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.regs.pc = self.addr | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_jmp_ind<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read_cycle(bus, self.addr) else {
                    return;
                };
                self.data = lo;
                self.cycle = 4;
            }
            4 => {
                // The high byte is read from the same page: ($xxFF) wraps to
                // ($xx00) instead of crossing into the next page.
                let hi_addr = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0x00FF);
                let Some(hi) = self.read_cycle(bus, hi_addr) else {
                    return;
                };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_branch<B: Bus>(&mut self, bus: &mut B, taken: bool) {
        match self.cycle {
            1 => {
                let Some(offset) = self.read_cycle(bus, self.regs.pc) else {
                    return;
                };
                self.data = offset;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if taken {
                    self.cycle = 2;
                } else {
                    self.finish();
                }
            }
            2 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                let offset = i16::from(self.data as i8);
                let target = self.regs.pc.wrapping_add_signed(offset);
                if (target ^ self.regs.pc) & 0xFF00 != 0 {
                    self.addr = target;
                    self.cycle = 3;
                } else {
                    self.regs.pc = target;
                    self.finish();
                }
            }
            3 => {
                // Page crossed: one more cycle, dummy read from the address
                // with the unfixed high byte.
                let wrong = (self.regs.pc & 0xFF00) | (self.addr & 0x00FF);
                if self.read_cycle(bus, wrong).is_none() {
                    return;
                }
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_php<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.flags.pack() | 0x10);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_plp<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, self.regs.stack_addr()).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                let p = bus.read(addr);
                self.regs.flags.unpack(p);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_pha<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.a);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_pla<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                if self.read_cycle(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read_cycle(bus, self.regs.stack_addr()).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                if !self.rdy_line {
                    return;
                }
                let addr = self.regs.pop();
                self.regs.a = bus.read(addr);
                self.regs.flags.set_nz(self.regs.a);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Two-cycle implied instruction; the second bus access is a dummy read
    /// of the next opcode byte.
    fn op_implied<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self)) {
        if self.cycle == 1 {
            if self.read_cycle(bus, self.regs.pc).is_none() {
                return;
            }
            op(self);
            self.finish();
        }
    }

    fn op_flag<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self)) {
        self.op_implied(bus, op);
    }

    /// Shift/rotate on the accumulator.
    fn op_accumulator<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) {
        if self.cycle == 1 {
            if self.read_cycle(bus, self.regs.pc).is_none() {
                return;
            }
            self.regs.a = op(self, self.regs.a);
            self.finish();
        }
    }

    // ------------------------------------------------------------------
    // ALU operations
    // ------------------------------------------------------------------

    fn do_lda(&mut self, value: u8) {
        self.regs.a = value;
        self.regs.flags.set_nz(value);
    }

    fn do_ldx(&mut self, value: u8) {
        self.regs.x = value;
        self.regs.flags.set_nz(value);
    }

    fn do_ldy(&mut self, value: u8) {
        self.regs.y = value;
        self.regs.flags.set_nz(value);
    }

    fn do_ora(&mut self, value: u8) {
        self.regs.a |= value;
        self.regs.flags.set_nz(self.regs.a);
    }

    fn do_and(&mut self, value: u8) {
        self.regs.a &= value;
        self.regs.flags.set_nz(self.regs.a);
    }

    fn do_eor(&mut self, value: u8) {
        self.regs.a ^= value;
        self.regs.flags.set_nz(self.regs.a);
    }

    fn do_adc(&mut self, value: u8) {
        if self.regs.flags.d {
            self.do_adc_decimal(value);
        } else {
            self.do_adc_binary(value);
        }
    }

    fn do_adc_binary(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = u16::from(self.regs.flags.c);
        let sum = u16::from(a) + u16::from(value) + carry;
        let result = sum as u8;

        self.regs.flags.c = sum > 0xFF;
        self.regs.flags.v = (a ^ result) & (value ^ result) & 0x80 != 0;
        self.regs.a = result;
        self.regs.flags.set_nz(result);
    }

    fn do_adc_decimal(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.flags.c);

        let mut lo = (a & 0x0F) + (value & 0x0F) + carry;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (value >> 4) + u8::from(lo > 0x0F);

        // Z, N and V come from the binary result on an NMOS part.
        let bin = (u16::from(a) + u16::from(value) + u16::from(carry)) as u8;
        self.regs.flags.z = bin == 0;
        self.regs.flags.n = hi & 0x08 != 0;
        self.regs.flags.v = (a ^ bin) & (value ^ bin) & 0x80 != 0;

        if hi > 9 {
            hi += 6;
        }
        self.regs.flags.c = hi > 0x0F;
        self.regs.a = (hi << 4) | (lo & 0x0F);
    }

    fn do_sbc(&mut self, value: u8) {
        if self.regs.flags.d {
            self.do_sbc_decimal(value);
        } else {
            // Binary SBC is ADC of the complement.
            self.do_adc_binary(!value);
        }
    }

    fn do_sbc_decimal(&mut self, value: u8) {
        let a = self.regs.a;
        let borrow = i16::from(!self.regs.flags.c);

        let bin = i16::from(a) - i16::from(value) - borrow;
        self.regs.flags.c = bin >= 0;
        self.regs.flags.z = (bin as u8) == 0;
        self.regs.flags.n = bin & 0x80 != 0;
        self.regs.flags.v =
            (i16::from(a) ^ bin) & (i16::from(a) ^ i16::from(value)) & 0x80 != 0;

        let mut lo = i16::from(a & 0x0F) - i16::from(value & 0x0F) - borrow;
        let mut hi = i16::from(a >> 4) - i16::from(value >> 4);
        if lo < 0 {
            lo -= 6;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 6;
        }
        self.regs.a = ((hi << 4) as u8) | ((lo & 0x0F) as u8);
    }

    fn do_cmp(&mut self, value: u8) {
        let result = self.regs.a.wrapping_sub(value);
        self.regs.flags.c = self.regs.a >= value;
        self.regs.flags.set_nz(result);
    }

    fn do_cpx(&mut self, value: u8) {
        let result = self.regs.x.wrapping_sub(value);
        self.regs.flags.c = self.regs.x >= value;
        self.regs.flags.set_nz(result);
    }

    fn do_cpy(&mut self, value: u8) {
        let result = self.regs.y.wrapping_sub(value);
        self.regs.flags.c = self.regs.y >= value;
        self.regs.flags.set_nz(result);
    }

    fn do_bit(&mut self, value: u8) {
        self.regs.flags.z = self.regs.a & value == 0;
        self.regs.flags.n = value & 0x80 != 0;
        self.regs.flags.v = value & 0x40 != 0;
    }

    fn do_asl(&mut self, value: u8) -> u8 {
        self.regs.flags.c = value & 0x80 != 0;
        let result = value << 1;
        self.regs.flags.set_nz(result);
        result
    }

    fn do_lsr(&mut self, value: u8) -> u8 {
        self.regs.flags.c = value & 0x01 != 0;
        let result = value >> 1;
        self.regs.flags.set_nz(result);
        result
    }

    fn do_rol(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.regs.flags.c);
        self.regs.flags.c = value & 0x80 != 0;
        let result = (value << 1) | carry_in;
        self.regs.flags.set_nz(result);
        result
    }

    fn do_ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.regs.flags.c { 0x80 } else { 0 };
        self.regs.flags.c = value & 0x01 != 0;
        let result = (value >> 1) | carry_in;
        self.regs.flags.set_nz(result);
        result
    }

    fn do_inc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.regs.flags.set_nz(result);
        result
    }

    fn do_dec(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.regs.flags.set_nz(result);
        result
    }

    // ------------------------------------------------------------------
    // Undocumented combined operations
    // ------------------------------------------------------------------

    fn do_slo(&mut self, value: u8) -> u8 {
        self.regs.flags.c = value & 0x80 != 0;
        let shifted = value << 1;
        self.regs.a |= shifted;
        self.regs.flags.set_nz(self.regs.a);
        shifted
    }

    fn do_rla(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.regs.flags.c);
        self.regs.flags.c = value & 0x80 != 0;
        let rotated = (value << 1) | carry_in;
        self.regs.a &= rotated;
        self.regs.flags.set_nz(self.regs.a);
        rotated
    }

    fn do_sre(&mut self, value: u8) -> u8 {
        self.regs.flags.c = value & 0x01 != 0;
        let shifted = value >> 1;
        self.regs.a ^= shifted;
        self.regs.flags.set_nz(self.regs.a);
        shifted
    }

    fn do_rra(&mut self, value: u8) -> u8 {
        let carry_in = if self.regs.flags.c { 0x80 } else { 0 };
        self.regs.flags.c = value & 0x01 != 0;
        let rotated = (value >> 1) | carry_in;
        self.do_adc(rotated);
        rotated
    }

    fn do_lax(&mut self, value: u8) {
        self.regs.a = value;
        self.regs.x = value;
        self.regs.flags.set_nz(value);
    }

    fn do_dcp(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.do_cmp(result);
        result
    }

    fn do_isc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.do_sbc(result);
        result
    }

    fn do_anc(&mut self, value: u8) {
        self.regs.a &= value;
        self.regs.flags.set_nz(self.regs.a);
        self.regs.flags.c = self.regs.a & 0x80 != 0;
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize the CPU state. The micro-step position is the integer pair
    /// `(opcode, cycle)`; no pointers are involved.
    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.regs.a);
        w.write_u8(self.regs.x);
        w.write_u8(self.regs.y);
        w.write_u8(self.regs.sp);
        w.write_u16(self.regs.pc);
        w.write_u8(self.regs.flags.pack());
        w.write_u8(match self.state {
            State::Fetch => 0,
            State::Execute => 1,
            State::Service => 2,
        });
        w.write_u8(self.opcode);
        w.write_u8(self.cycle);
        w.write_u8(self.servicing);
        w.write_u16(self.addr);
        w.write_u8(self.pointer);
        w.write_u8(self.data);
        w.write_bool(self.overflow);
        w.write_u16(self.pc_at_cycle_0);
        w.write_bool(self.rdy_line);
        w.write_u8(self.irq_line);
        w.write_u8(self.nmi_line);
        w.write_bool(self.nmi_edge);
        w.write_u64(self.next_possible_irq_cycle);
        w.write_u64(self.next_possible_nmi_cycle);
        w.write_bool(self.old_i);
        w.write_u8(self.error_state.to_u8());
        for entry in &self.call_stack {
            w.write_u16(*entry);
        }
        w.write_u8(self.call_stack_ptr);
        w.write_u64(self.total_cycles);
    }

    /// Restore the CPU state written by `save_state`.
    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), &'static str> {
        self.regs.a = r.read_u8()?;
        self.regs.x = r.read_u8()?;
        self.regs.y = r.read_u8()?;
        self.regs.sp = r.read_u8()?;
        self.regs.pc = r.read_u16()?;
        let flags = r.read_u8()?;
        self.regs.flags.unpack(flags);
        self.state = match r.read_u8()? {
            0 => State::Fetch,
            1 => State::Execute,
            2 => State::Service,
            _ => return Err("invalid CPU pipeline state"),
        };
        self.opcode = r.read_u8()?;
        self.cycle = r.read_u8()?;
        self.servicing = r.read_u8()?;
        self.addr = r.read_u16()?;
        self.pointer = r.read_u8()?;
        self.data = r.read_u8()?;
        self.overflow = r.read_bool()?;
        self.pc_at_cycle_0 = r.read_u16()?;
        self.rdy_line = r.read_bool()?;
        self.irq_line = r.read_u8()?;
        self.nmi_line = r.read_u8()?;
        self.nmi_edge = r.read_bool()?;
        self.next_possible_irq_cycle = r.read_u64()?;
        self.next_possible_nmi_cycle = r.read_u64()?;
        self.old_i = r.read_bool()?;
        self.error_state = ErrorState::from_u8(r.read_u8()?)?;
        for entry in &mut self.call_stack {
            *entry = r.read_u16()?;
        }
        self.call_stack_ptr = r.read_u8()?;
        self.total_cycles = r.read_u64()?;
        Ok(())
    }
}
