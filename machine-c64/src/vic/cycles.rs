//! Per-cycle VIC-II engine.
//!
//! Each raster line runs 63 (PAL) or 65 (NTSC) cycles. Every cycle
//! performs, in order: Phi1 frame logic, the Phi1 fetch (sprite pointer
//! and data, refresh, or graphics), the Phi2 raster-interrupt check, the
//! Phi2 BA update, the Phi2 fetch (video matrix), and finally advances the
//! x counter while emitting eight pixels.
//!
//! The per-cycle sprite BA masks and fetch slots follow the 6569/6567
//! timing tables; sprite 0's pointer fetch sits near the end of the line,
//! sprites 3-7 spill into the beginning of the next one.

use crate::config::TimingMode;

use super::{Vic, IRQ_RASTER};

/// Sprite BA masks per cycle, PAL. BA drops three cycles ahead of a
/// sprite's pointer fetch and stays low through its data fetches.
#[rustfmt::skip]
const BA_SPRITE_PAL: [u8; 64] = [
    0x00,
    0x18, 0x38, 0x30, 0x70, 0x60, 0xE0, 0xC0, 0xC0, 0x80, 0x80,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x03, 0x03, 0x07, 0x06,
    0x0E, 0x0C, 0x1C,
];

/// Sprite BA masks per cycle, NTSC.
#[rustfmt::skip]
const BA_SPRITE_NTSC: [u8; 66] = [
    0x00,
    0x38, 0x30, 0x70, 0x60, 0xE0, 0xC0, 0xC0, 0x80, 0x80, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x03, 0x03, 0x07,
    0x06, 0x0E, 0x0C, 0x1C, 0x18,
];

/// Sprite whose pointer (and data) fetch happens in a given cycle, PAL.
const fn p_access_pal(cycle: u16) -> Option<usize> {
    match cycle {
        58 => Some(0),
        60 => Some(1),
        62 => Some(2),
        1 => Some(3),
        3 => Some(4),
        5 => Some(5),
        7 => Some(6),
        9 => Some(7),
        _ => None,
    }
}

/// Sprite fetch slots, NTSC.
const fn p_access_ntsc(cycle: u16) -> Option<usize> {
    match cycle {
        59 => Some(0),
        61 => Some(1),
        63 => Some(2),
        65 => Some(3),
        2 => Some(4),
        4 => Some(5),
        6 => Some(6),
        8 => Some(7),
        _ => None,
    }
}

impl Vic {
    /// Read through the VIC's 14-bit bus. Character ROM shadows
    /// $1000-$1FFF in banks 0 and 2; everything else is DRAM.
    fn vic_read(&mut self, ram: &[u8; 65536], rom: &[u8; 65536], bank: u16, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        let value = if (bank & 1) == 0 && (0x1000..0x2000).contains(&addr) {
            rom[0xD000 + (addr & 0x0FFF) as usize]
        } else {
            ram[((bank << 14) | addr) as usize]
        };
        self.data_bus = value;
        value
    }

    /// Execute one VIC cycle.
    pub fn execute_cycle(
        &mut self,
        ram: &[u8; 65536],
        rom: &[u8; 65536],
        color_ram: &[u8; 1024],
        bank: u16,
    ) {
        let c = self.cycle;
        let timing = self.revision.timing_mode();

        // Phi1.1 frame logic.
        self.check_vertical_frame_ff();

        // The y counter wraps in cycle 2, not at the line boundary; the
        // line-0 raster compare therefore fires one cycle late.
        if c == 2 && self.y_counter >= self.lines_per_frame {
            self.y_counter = 0;
            self.start_frame();
        }

        // DEN seen anywhere in line $30 arms this frame's badlines.
        if self.y_counter == 0x30 && self.den() {
            self.den_latch = true;
        }

        // The badline condition is evaluated continuously; YSCROLL writes
        // take effect mid-line.
        self.badline = self.den_latch
            && (0x30..=0xF7).contains(&self.y_counter)
            && (self.y_counter & 7) == self.yscroll();
        if self.badline {
            self.display_state = true;
        }

        // Phi2.1 raster interrupt, edge triggered on the line transition.
        if c == 1 {
            let past_wrap = self.y_counter != 0 && self.y_counter < self.lines_per_frame;
            if past_wrap
                && self.y_counter == self.raster_compare
                && !self.y_counter_equals_irq_rasterline
            {
                self.trigger_irq(IRQ_RASTER);
            }
            self.y_counter_equals_irq_rasterline = self.y_counter == self.raster_compare;
        }
        if c == 2 && self.y_counter == 0 {
            if self.raster_compare == 0 && !self.y_counter_equals_irq_rasterline {
                self.trigger_irq(IRQ_RASTER);
            }
            self.y_counter_equals_irq_rasterline = self.y_counter == self.raster_compare;
        }

        // Sprite unit bookkeeping.
        match c {
            14 => {
                self.vc = self.vc_base;
                if self.badline {
                    self.rc = 0;
                }
            }
            16 => self.sprite_mcbase_advance(),
            55 => {
                // Expansion flip-flops toggle, then the Y compare may turn
                // on DMA for sprites matching this line.
                self.sprite_exp_ff ^= self.regs[0x17];
                self.sprite_check_dma();
            }
            56 => self.sprite_check_dma(),
            58 => {
                self.sprite_check_display();
                if self.rc == 7 {
                    self.display_state = false;
                    self.vc_base = self.vc;
                }
                if self.badline {
                    self.display_state = true;
                }
                if self.display_state {
                    self.rc = (self.rc + 1) & 7;
                }
            }
            _ => {}
        }

        // Phi1 fetch.
        let p_slot = match timing {
            TimingMode::Pal => p_access_pal(c),
            TimingMode::Ntsc => p_access_ntsc(c),
        };
        if let Some(n) = p_slot {
            self.sprite_fetch(n, ram, rom, bank);
        } else if (11..=15).contains(&c) {
            self.refresh_access(ram, rom, bank);
        }

        // Graphics fetch and pixel decode.
        self.prev_pixels = self.pixels;
        self.prev_pixels_fg = self.pixels_fg;
        if (16..=55).contains(&c) {
            if self.display_state {
                let column = (c - 16) as usize;
                let code = self.line_matrix[column];
                let color = self.line_color[column];
                let addr = if self.bmm() {
                    self.bitmap_base() | (self.vc << 3) | u16::from(self.rc)
                } else {
                    let code = if self.ecm() { code & 0x3F } else { code };
                    self.char_base() | (u16::from(code) << 3) | u16::from(self.rc)
                };
                let gfx = self.vic_read(ram, rom, bank, addr);
                self.decode_gfx(gfx, code, color);
                self.vc = (self.vc + 1) & 0x3FF;
            } else {
                // Idle access.
                let addr = if self.ecm() { 0x39FF } else { 0x3FFF };
                let gfx = self.vic_read(ram, rom, bank, addr);
                self.decode_gfx(gfx, 0, 0);
            }
        } else {
            self.decode_gfx(0, 0, 0);
        }

        // Phi2.4 BA.
        let sprite_mask = match timing {
            TimingMode::Pal => BA_SPRITE_PAL[c as usize],
            TimingMode::Ntsc => BA_SPRITE_NTSC[c as usize],
        };
        let ba = (self.badline && (12..=54).contains(&c))
            || (self.sprite_dma_on & sprite_mask) != 0;
        self.set_ba_low(ba);

        // Phi2.5 fetch: the video matrix c-access on badlines.
        if self.badline && (15..=54).contains(&c) {
            let column = (c - 15) as usize;
            let addr = self.screen_base() | self.vc;
            self.line_matrix[column] = self.vic_read(ram, rom, bank, addr);
            self.line_color[column] = color_ram[self.vc as usize & 0x03FF] & 0x0F;
        }

        // Finalize: border unit, pixel output, beam advance.
        self.update_main_frame_ff();
        self.draw_pixels();
        self.x_counter += 8;
        self.cycle += 1;
        if self.cycle > self.cycles_per_line {
            self.cycle = 1;
            self.x_counter = 0;
            self.y_counter += 1;
        }
    }

    /// Start-of-frame bookkeeping, run when the y counter wraps.
    fn start_frame(&mut self) {
        self.vc_base = 0;
        self.den_latch = false;
        self.frame += 1;
        std::mem::swap(&mut self.fb, &mut self.fb_done);
    }

    /// DRAM refresh access. Only the bus value is observable.
    fn refresh_access(&mut self, ram: &[u8; 65536], rom: &[u8; 65536], bank: u16) {
        let addr = 0x3F00 | u16::from(self.refresh_counter);
        let _ = self.vic_read(ram, rom, bank, addr);
        self.refresh_counter = self.refresh_counter.wrapping_sub(1);
    }

    /// Sprite pointer fetch plus, when DMA is on, the three data fetches
    /// of this line's row.
    fn sprite_fetch(&mut self, n: usize, ram: &[u8; 65536], rom: &[u8; 65536], bank: u16) {
        let ptr_addr = self.screen_base() | 0x03F8 | n as u16;
        let ptr = self.vic_read(ram, rom, bank, ptr_addr);
        if self.sprite_dma_on & (1 << n) != 0 {
            let base = u16::from(ptr) << 6;
            let mut row = 0u32;
            for _ in 0..3 {
                let byte = self.vic_read(ram, rom, bank, base | u16::from(self.sprite_mc[n]));
                row = (row << 8) | u32::from(byte);
                self.sprite_mc[n] = (self.sprite_mc[n] + 1) & 0x3F;
            }
            self.sprite_shift[n] = row;
        }
    }

    /// Cycles 55/56: the Y compare turns on sprite DMA.
    fn sprite_check_dma(&mut self) {
        let line = (self.y_counter & 0xFF) as u8;
        for n in 0..8 {
            let bit = 1 << n;
            if self.regs[0x15] & bit != 0
                && self.sprite_y(n) == line
                && self.sprite_dma_on & bit == 0
            {
                self.sprite_dma_on |= bit;
                self.sprite_mc_base[n] = 0;
                if self.regs[0x17] & bit != 0 {
                    self.sprite_exp_ff &= !bit;
                }
            }
        }
    }

    /// Cycle 58: MC reloads from MCBASE and the display gate updates.
    fn sprite_check_display(&mut self) {
        let line = (self.y_counter & 0xFF) as u8;
        for n in 0..8 {
            let bit = 1 << n;
            self.sprite_mc[n] = self.sprite_mc_base[n];
            if self.sprite_dma_on & bit != 0 {
                if self.regs[0x15] & bit != 0 && self.sprite_y(n) == line {
                    self.sprite_display_on |= bit;
                }
            } else {
                self.sprite_display_on &= !bit;
            }
        }
    }

    /// Cycle 16: MCBASE advances for sprites whose expansion flip-flop is
    /// set; a sprite that has fetched all 21 rows loses its DMA.
    fn sprite_mcbase_advance(&mut self) {
        for n in 0..8 {
            let bit = 1 << n;
            if self.sprite_dma_on & bit != 0 && self.sprite_exp_ff & bit != 0 {
                self.sprite_mc_base[n] += 3;
                if self.sprite_mc_base[n] >= 63 {
                    self.sprite_dma_on &= !bit;
                }
            }
        }
    }

    /// Vertical frame flip-flop conditions. The set condition latches at
    /// the end of the line and applies in cycle 1.
    fn check_vertical_frame_ff(&mut self) {
        let (top, bottom) = if self.rsel() { (51, 251) } else { (55, 247) };
        if self.cycle == self.cycles_per_line {
            self.vertical_frame_ff_set_cond = self.y_counter == bottom;
        }
        if self.cycle == 1 {
            if self.vertical_frame_ff_set_cond {
                self.vertical_frame_ff = true;
            }
            if self.y_counter == top && self.den() {
                self.vertical_frame_ff = false;
            }
        }
    }

    /// Main (horizontal) frame flip-flop: set at the right edge, cleared
    /// at the left edge when the vertical flip-flop allows it.
    fn update_main_frame_ff(&mut self) {
        let (left, right) = if self.csel() { (16, 56) } else { (17, 55) };
        let (top, bottom) = if self.rsel() { (51, 251) } else { (55, 247) };
        if self.cycle == right {
            self.main_frame_ff = true;
        }
        if self.cycle == left {
            if self.y_counter == bottom {
                self.vertical_frame_ff = true;
            }
            if self.y_counter == top && self.den() {
                self.vertical_frame_ff = false;
            }
            if !self.vertical_frame_ff {
                self.main_frame_ff = false;
            }
        }
    }

    fn set_ba_low(&mut self, low: bool) {
        self.ba_low = low;
        self.ba_history = ((self.ba_history << 1) | u8::from(low)) & 0b111;
    }
}
