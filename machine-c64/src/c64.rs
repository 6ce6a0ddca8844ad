//! The Commodore 64.
//!
//! Owns the CPU and the memory subsystem (which in turn owns the chips on
//! the bus) and drives them in a strict per-cycle round: VIC-II first,
//! then the CPU micro-step, then the CIA/cartridge/SID hooks. Interrupt
//! line changes a chip makes in cycle N reach the CPU in cycle N+1.

use std::time::{SystemTime, UNIX_EPOCH};

use emu_core::{Bus, Message, MessageQueue, SnapshotReader, SnapshotWriter};
use log::{debug, info};
use mos_6510::{
    BreakpointTag, ErrorState, Mos6510, INTSRC_CIA, INTSRC_EXPANSION, INTSRC_VIC,
};

use crate::archive::Archive;
use crate::cartridge::ButtonEffect;
use crate::config::{MachineConfig, VicRevision};
use crate::crt::CrtCartridge;
use crate::memory::Memory;
use crate::snapshot::Snapshot;
use crate::vic::DISPLAY_WIDTH;

/// The machine.
pub struct C64 {
    pub cpu: Mos6510,
    pub mem: Memory,
    config: MachineConfig,
    /// Master clock cycles since power-on.
    cycle: u64,
    /// Host notification queue.
    queue: MessageQueue,
    running: bool,
    /// Nesting depth of the host's suspend/resume bracket.
    suspend_depth: u32,
    /// Error state already reported to the host.
    reported_error: ErrorState,
    /// Expansion NMI level seen last cycle, for the will-trigger callback.
    expansion_nmi_seen: bool,
}

impl C64 {
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        let mut c64 = Self {
            cpu: Mos6510::new(),
            mem: Memory::new(&config),
            config,
            cycle: 0,
            queue: MessageQueue::new(),
            running: false,
            suspend_depth: 0,
            reported_error: ErrorState::Ok,
            expansion_nmi_seen: false,
        };
        c64.reset();
        c64
    }

    #[must_use]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Master clock cycles since power-on.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Hard reset. ROM images and cartridge chip contents survive.
    pub fn reset(&mut self) {
        info!("resetting machine");
        self.mem.reset();
        self.finish_reset();
    }

    /// Reset without touching DRAM, as a cartridge reset button does.
    pub fn reset_keeping_ram(&mut self) {
        info!("resetting machine (RAM kept)");
        self.mem.reset_keeping_ram();
        self.finish_reset();
    }

    fn finish_reset(&mut self) {
        self.cpu.reset();
        self.cpu.regs.pc = self.mem.reset_vector();
        self.cycle = 0;
        self.reported_error = ErrorState::Ok;
        self.expansion_nmi_seen = false;
    }

    // ------------------------------------------------------------------
    // ROMs
    // ------------------------------------------------------------------

    pub fn load_basic_rom(&mut self, data: &[u8]) -> Result<(), &'static str> {
        self.mem.load_basic_rom(data)?;
        debug!("basic ROM {:016x}", self.mem.basic_rom_fingerprint());
        Ok(())
    }

    pub fn load_character_rom(&mut self, data: &[u8]) -> Result<(), &'static str> {
        self.mem.load_character_rom(data)?;
        debug!("character ROM {:016x}", self.mem.character_rom_fingerprint());
        Ok(())
    }

    pub fn load_kernal_rom(&mut self, data: &[u8]) -> Result<(), &'static str> {
        self.mem.load_kernal_rom(data)?;
        debug!("kernal ROM {:016x}", self.mem.kernal_rom_fingerprint());
        Ok(())
    }

    /// The machine can run once all three ROMs are present.
    pub fn is_ready(&self) -> Result<(), &'static str> {
        if !self.mem.basic_rom_is_loaded() {
            return Err("Basic ROM missing");
        }
        if !self.mem.character_rom_is_loaded() {
            return Err("Character ROM missing");
        }
        if !self.mem.kernal_rom_is_loaded() {
            return Err("Kernal ROM missing");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // The clock
    // ------------------------------------------------------------------

    /// Execute one system cycle.
    pub fn execute_one_cycle(&mut self) {
        // VIC Phi1/Phi2: fetches, BA, raster logic, pixels.
        self.mem.vic_cycle();
        self.mem.sync_expansion_lines();

        // BA reaches RDY with its AND delay already applied by the VIC.
        self.cpu.set_rdy_line(self.mem.vic.rdy_line());

        // Interrupt levels sampled now were set no later than the previous
        // cycle, giving the one-cycle propagation delay.
        self.propagate_interrupt_lines();

        // CPU micro-step (one bus transaction at most).
        self.cpu.tick(&mut self.mem);
        if self.cpu.take_nmi_acknowledged() {
            self.mem.expansion.nmi_did_trigger();
            self.mem.sync_expansion_lines();
        }

        // Peripheral cycle hooks.
        self.mem.cia1.execute();
        self.mem.cia2.execute();
        self.mem.expansion.execute();
        self.mem.sid.execute();
        self.mem.sync_expansion_lines();

        self.cycle += 1;
        self.surface_cpu_errors();
    }

    fn propagate_interrupt_lines(&mut self) {
        if self.mem.vic_irq_level() {
            self.cpu.pull_down_irq_line(INTSRC_VIC);
        } else {
            self.cpu.release_irq_line(INTSRC_VIC);
        }

        if self.mem.cia1.int_line() {
            self.cpu.pull_down_irq_line(INTSRC_CIA);
        } else {
            self.cpu.release_irq_line(INTSRC_CIA);
        }

        if self.mem.cia2.int_line() {
            self.cpu.pull_down_nmi_line(INTSRC_CIA);
        } else {
            self.cpu.release_nmi_line(INTSRC_CIA);
        }

        if self.mem.expansion.irq_level() {
            self.cpu.pull_down_irq_line(INTSRC_EXPANSION);
        } else {
            self.cpu.release_irq_line(INTSRC_EXPANSION);
        }

        let nmi = self.mem.expansion.nmi_level();
        if nmi && !self.expansion_nmi_seen {
            self.mem.expansion.nmi_will_trigger();
        }
        if nmi {
            self.cpu.pull_down_nmi_line(INTSRC_EXPANSION);
        } else {
            self.cpu.release_nmi_line(INTSRC_EXPANSION);
        }
        self.expansion_nmi_seen = nmi;
    }

    fn surface_cpu_errors(&mut self) {
        let state = self.cpu.error_state();
        if state == self.reported_error {
            return;
        }
        self.reported_error = state;
        match state {
            ErrorState::Ok => self.queue.put(Message::CpuOk),
            ErrorState::SoftBreakpoint => {
                self.halt();
                self.queue.put(Message::CpuSoftBreakpoint);
            }
            ErrorState::HardBreakpoint => {
                self.halt();
                self.queue.put(Message::CpuHardBreakpoint);
            }
            ErrorState::IllegalInstruction => {
                self.halt();
                self.queue.put(Message::CpuIllegalInstruction);
            }
        }
    }

    /// Execute `count` cycles.
    pub fn execute_cycles(&mut self, count: u64) {
        for _ in 0..count {
            self.execute_one_cycle();
        }
    }

    /// Execute one full video frame.
    pub fn execute_frame(&mut self) {
        let start = self.mem.vic.frame();
        while self.mem.vic.frame() == start {
            self.execute_one_cycle();
        }
    }

    /// Run until the CPU reaches the next instruction boundary. A CPU
    /// sitting in an error state stays where it is.
    fn finish_instruction(&mut self) {
        while !self.cpu.is_instruction_complete() && self.cpu.error_state() == ErrorState::Ok {
            self.execute_one_cycle();
        }
    }

    /// Execute one complete CPU instruction.
    pub fn step_instruction(&mut self) {
        if self.cpu.error_state() != ErrorState::Ok {
            self.cpu.clear_error_state();
        }
        self.execute_one_cycle();
        self.finish_instruction();
    }

    /// Execute one instruction, running subroutine calls to completion.
    pub fn step_over(&mut self) {
        let pc = self.cpu.regs.pc;
        let opcode = self.mem.spypeek(pc);
        if opcode != 0x20 {
            self.step_instruction();
            return;
        }
        // JSR: run until control returns behind the call, with a cycle cap
        // so a runaway subroutine cannot hang the host.
        let resume = pc.wrapping_add(3);
        if self.cpu.error_state() != ErrorState::Ok {
            self.cpu.clear_error_state();
        }
        self.step_instruction();
        for _ in 0..20_000_000u32 {
            if self.cpu.is_instruction_complete() && self.cpu.regs.pc == resume {
                return;
            }
            if self.cpu.error_state() != ErrorState::Ok {
                return;
            }
            self.execute_one_cycle();
        }
    }

    // ------------------------------------------------------------------
    // Run control
    // ------------------------------------------------------------------

    pub fn run(&mut self) {
        if !self.running {
            self.running = true;
            self.queue.put(Message::Run);
        }
    }

    pub fn halt(&mut self) {
        if self.running {
            self.running = false;
            self.queue.put(Message::Halt);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Enter a host critical section. The first suspend drives the
    /// emulation to an instruction boundary; pairs may nest.
    pub fn suspend(&mut self) {
        if self.suspend_depth == 0 {
            self.finish_instruction();
        }
        self.suspend_depth += 1;
    }

    /// Leave the critical section opened by `suspend`.
    pub fn resume(&mut self) {
        debug_assert!(self.suspend_depth > 0, "resume without suspend");
        self.suspend_depth = self.suspend_depth.saturating_sub(1);
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }

    /// Drain one pending host message.
    pub fn message(&mut self) -> Option<Message> {
        self.queue.get()
    }

    // ------------------------------------------------------------------
    // Video out
    // ------------------------------------------------------------------

    /// Last fully rendered frame, RGBA.
    #[must_use]
    pub fn screen_buffer(&self) -> &[u32] {
        self.mem.vic.screen_buffer()
    }

    #[must_use]
    pub fn screen_width(&self) -> usize {
        DISPLAY_WIDTH
    }

    #[must_use]
    pub fn screen_height(&self) -> usize {
        self.mem.vic.display_height()
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Press a key in the 8x8 matrix.
    pub fn press_key(&mut self, row: usize, col: usize) {
        if row < 8 && col < 8 {
            self.mem.cia1.keyboard_matrix[col] &= !(1 << row);
        }
    }

    /// Release a key.
    pub fn release_key(&mut self, row: usize, col: usize) {
        if row < 8 && col < 8 {
            self.mem.cia1.keyboard_matrix[col] |= 1 << row;
        }
    }

    // ------------------------------------------------------------------
    // Cartridges
    // ------------------------------------------------------------------

    pub fn attach_cartridge(&mut self, record: &CrtCartridge) -> Result<(), &'static str> {
        self.mem.expansion.attach(record)?;
        self.mem.update_peek_poke_lookup_tables();
        self.queue.put(Message::CartridgeAttached);
        Ok(())
    }

    pub fn detach_cartridge(&mut self) {
        self.mem.expansion.detach();
        self.mem.update_peek_poke_lookup_tables();
        self.queue.put(Message::CartridgeDetached);
    }

    /// Press a cartridge button (1-based). Reset buttons reset the
    /// machine with cartridge RAM kept alive.
    pub fn press_cartridge_button(&mut self, nr: usize) {
        self.suspend();
        let effect = self.mem.expansion.press_button(nr);
        self.mem.sync_expansion_lines();
        if effect == ButtonEffect::Reset {
            self.reset_keeping_ram();
        }
        self.resume();
    }

    pub fn release_cartridge_button(&mut self, nr: usize) {
        self.suspend();
        self.mem.expansion.release_button(nr);
        self.mem.sync_expansion_lines();
        self.resume();
    }

    pub fn set_cartridge_switch(&mut self, pos: i8) {
        if let Some(cart) = self.mem.expansion.cartridge_mut() {
            cart.set_switch(pos);
        }
    }

    // ------------------------------------------------------------------
    // Program loading
    // ------------------------------------------------------------------

    /// Copy the selected archive item straight into RAM and fix the Basic
    /// program pointers, like an instant LOAD.
    pub fn flash_program(&mut self, archive: &mut dyn Archive, item: usize) -> Result<u16, &'static str> {
        if item >= archive.item_count() {
            return Err("no such item in archive");
        }
        archive.select_item(item);
        let load_addr = archive.destination_addr_of_item();
        let mut addr = load_addr;
        while let Some(byte) = archive.read_item() {
            self.mem.ram[addr as usize] = byte;
            addr = addr.wrapping_add(1);
        }

        if load_addr == 0x0801 {
            // Update VARTAB/ARYTAB/STREND so Basic sees the program.
            for pointer in [0x2D, 0x2F, 0x31] {
                self.mem.ram[pointer] = (addr & 0xFF) as u8;
                self.mem.ram[pointer + 1] = (addr >> 8) as u8;
            }
        }
        debug!("flashed {} bytes at {load_addr:04X}", addr.wrapping_sub(load_addr));
        Ok(load_addr)
    }

    // ------------------------------------------------------------------
    // Debug access
    // ------------------------------------------------------------------

    /// Side-effect-free memory read through the current mapping.
    #[must_use]
    pub fn spypeek(&self, addr: u16) -> u8 {
        self.mem.spypeek(addr)
    }

    /// Memory write through the current mapping.
    pub fn poke(&mut self, addr: u16, value: u8) {
        self.mem.write(addr, value);
    }

    pub fn set_breakpoint(&mut self, addr: u16, tag: BreakpointTag) {
        self.cpu.set_breakpoint(addr, tag);
    }

    pub fn delete_breakpoint(&mut self, addr: u16) {
        self.cpu.delete_breakpoint(addr);
    }

    /// Disassemble the instruction at the current PC.
    #[must_use]
    pub fn disassemble_pc(&self) -> String {
        mos_6510::disassemble(&self.mem, self.cpu.regs.pc)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Capture the complete machine state.
    #[must_use]
    pub fn save_snapshot(&self) -> Snapshot {
        let mut w = SnapshotWriter::with_capacity(0x20000);
        w.write_u8(match self.config.vic {
            VicRevision::Vic6567 => 0,
            VicRevision::Vic6569 => 1,
        });
        w.write_u64(self.cycle);
        self.cpu.save_state(&mut w);
        self.mem.save_state(&mut w);

        let screenshot = self
            .screen_buffer()
            .iter()
            .flat_map(|px| px.to_be_bytes())
            .collect();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        Snapshot::new(
            self.screen_width() as u32,
            self.screen_height() as u32,
            screenshot,
            timestamp,
            w.into_bytes(),
        )
    }

    /// Restore a captured machine state. The cartridge and ROM images are
    /// not part of the snapshot; the same ones must already be attached.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), &'static str> {
        if !snapshot.is_compatible() {
            return Err("unsupported snapshot version");
        }
        let mut r = SnapshotReader::new(snapshot.data());
        let revision = match r.read_u8()? {
            0 => VicRevision::Vic6567,
            1 => VicRevision::Vic6569,
            _ => return Err("invalid machine revision in snapshot"),
        };
        if revision != self.config.vic {
            return Err("snapshot was taken on a different machine revision");
        }
        self.cycle = r.read_u64()?;
        self.cpu.load_state(&mut r)?;
        self.mem.load_state(&mut r)?;
        self.reported_error = self.cpu.error_state();
        self.expansion_nmi_seen = self.mem.expansion.nmi_level();
        Ok(())
    }
}

impl Default for C64 {
    fn default() -> Self {
        Self::new(MachineConfig::pal())
    }
}
