//! One-line disassembly for the debugger.

use emu_core::Bus;

/// 6510 addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
    Relative,
    Indirect,
}

/// Decode an opcode into its mnemonic and addressing mode. Unknown opcodes
/// decode as `???`.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn decode(opcode: u8) -> (&'static str, AddressingMode) {
    use AddressingMode::{
        Absolute, AbsoluteX, AbsoluteY, Accumulator, Immediate, Implied, Indirect, IndirectX,
        IndirectY, Relative, ZeroPage, ZeroPageX, ZeroPageY,
    };
    match opcode {
        0x00 => ("BRK", Implied),
        0x01 => ("ORA", IndirectX),
        0x05 => ("ORA", ZeroPage),
        0x06 => ("ASL", ZeroPage),
        0x08 => ("PHP", Implied),
        0x09 => ("ORA", Immediate),
        0x0A => ("ASL", Accumulator),
        0x0D => ("ORA", Absolute),
        0x0E => ("ASL", Absolute),
        0x10 => ("BPL", Relative),
        0x11 => ("ORA", IndirectY),
        0x15 => ("ORA", ZeroPageX),
        0x16 => ("ASL", ZeroPageX),
        0x18 => ("CLC", Implied),
        0x19 => ("ORA", AbsoluteY),
        0x1D => ("ORA", AbsoluteX),
        0x1E => ("ASL", AbsoluteX),
        0x20 => ("JSR", Absolute),
        0x21 => ("AND", IndirectX),
        0x24 => ("BIT", ZeroPage),
        0x25 => ("AND", ZeroPage),
        0x26 => ("ROL", ZeroPage),
        0x28 => ("PLP", Implied),
        0x29 => ("AND", Immediate),
        0x2A => ("ROL", Accumulator),
        0x2C => ("BIT", Absolute),
        0x2D => ("AND", Absolute),
        0x2E => ("ROL", Absolute),
        0x30 => ("BMI", Relative),
        0x31 => ("AND", IndirectY),
        0x35 => ("AND", ZeroPageX),
        0x36 => ("ROL", ZeroPageX),
        0x38 => ("SEC", Implied),
        0x39 => ("AND", AbsoluteY),
        0x3D => ("AND", AbsoluteX),
        0x3E => ("ROL", AbsoluteX),
        0x40 => ("RTI", Implied),
        0x41 => ("EOR", IndirectX),
        0x45 => ("EOR", ZeroPage),
        0x46 => ("LSR", ZeroPage),
        0x48 => ("PHA", Implied),
        0x49 => ("EOR", Immediate),
        0x4A => ("LSR", Accumulator),
        0x4C => ("JMP", Absolute),
        0x4D => ("EOR", Absolute),
        0x4E => ("LSR", Absolute),
        0x50 => ("BVC", Relative),
        0x51 => ("EOR", IndirectY),
        0x55 => ("EOR", ZeroPageX),
        0x56 => ("LSR", ZeroPageX),
        0x58 => ("CLI", Implied),
        0x59 => ("EOR", AbsoluteY),
        0x5D => ("EOR", AbsoluteX),
        0x5E => ("LSR", AbsoluteX),
        0x60 => ("RTS", Implied),
        0x61 => ("ADC", IndirectX),
        0x65 => ("ADC", ZeroPage),
        0x66 => ("ROR", ZeroPage),
        0x68 => ("PLA", Implied),
        0x69 => ("ADC", Immediate),
        0x6A => ("ROR", Accumulator),
        0x6C => ("JMP", Indirect),
        0x6D => ("ADC", Absolute),
        0x6E => ("ROR", Absolute),
        0x70 => ("BVS", Relative),
        0x71 => ("ADC", IndirectY),
        0x75 => ("ADC", ZeroPageX),
        0x76 => ("ROR", ZeroPageX),
        0x78 => ("SEI", Implied),
        0x79 => ("ADC", AbsoluteY),
        0x7D => ("ADC", AbsoluteX),
        0x7E => ("ROR", AbsoluteX),
        0x81 => ("STA", IndirectX),
        0x84 => ("STY", ZeroPage),
        0x85 => ("STA", ZeroPage),
        0x86 => ("STX", ZeroPage),
        0x88 => ("DEY", Implied),
        0x8A => ("TXA", Implied),
        0x8C => ("STY", Absolute),
        0x8D => ("STA", Absolute),
        0x8E => ("STX", Absolute),
        0x90 => ("BCC", Relative),
        0x91 => ("STA", IndirectY),
        0x94 => ("STY", ZeroPageX),
        0x95 => ("STA", ZeroPageX),
        0x96 => ("STX", ZeroPageY),
        0x98 => ("TYA", Implied),
        0x99 => ("STA", AbsoluteY),
        0x9A => ("TXS", Implied),
        0x9D => ("STA", AbsoluteX),
        0xA0 => ("LDY", Immediate),
        0xA1 => ("LDA", IndirectX),
        0xA2 => ("LDX", Immediate),
        0xA4 => ("LDY", ZeroPage),
        0xA5 => ("LDA", ZeroPage),
        0xA6 => ("LDX", ZeroPage),
        0xA8 => ("TAY", Implied),
        0xA9 => ("LDA", Immediate),
        0xAA => ("TAX", Implied),
        0xAC => ("LDY", Absolute),
        0xAD => ("LDA", Absolute),
        0xAE => ("LDX", Absolute),
        0xB0 => ("BCS", Relative),
        0xB1 => ("LDA", IndirectY),
        0xB4 => ("LDY", ZeroPageX),
        0xB5 => ("LDA", ZeroPageX),
        0xB6 => ("LDX", ZeroPageY),
        0xB8 => ("CLV", Implied),
        0xB9 => ("LDA", AbsoluteY),
        0xBA => ("TSX", Implied),
        0xBC => ("LDY", AbsoluteX),
        0xBD => ("LDA", AbsoluteX),
        0xBE => ("LDX", AbsoluteY),
        0xC0 => ("CPY", Immediate),
        0xC1 => ("CMP", IndirectX),
        0xC4 => ("CPY", ZeroPage),
        0xC5 => ("CMP", ZeroPage),
        0xC6 => ("DEC", ZeroPage),
        0xC8 => ("INY", Implied),
        0xC9 => ("CMP", Immediate),
        0xCA => ("DEX", Implied),
        0xCC => ("CPY", Absolute),
        0xCD => ("CMP", Absolute),
        0xCE => ("DEC", Absolute),
        0xD0 => ("BNE", Relative),
        0xD1 => ("CMP", IndirectY),
        0xD5 => ("CMP", ZeroPageX),
        0xD6 => ("DEC", ZeroPageX),
        0xD8 => ("CLD", Implied),
        0xD9 => ("CMP", AbsoluteY),
        0xDD => ("CMP", AbsoluteX),
        0xDE => ("DEC", AbsoluteX),
        0xE0 => ("CPX", Immediate),
        0xE1 => ("SBC", IndirectX),
        0xE4 => ("CPX", ZeroPage),
        0xE5 => ("SBC", ZeroPage),
        0xE6 => ("INC", ZeroPage),
        0xE8 => ("INX", Implied),
        0xE9 | 0xEB => ("SBC", Immediate),
        0xEA => ("NOP", Implied),
        0xEC => ("CPX", Absolute),
        0xED => ("SBC", Absolute),
        0xEE => ("INC", Absolute),
        0xF0 => ("BEQ", Relative),
        0xF1 => ("SBC", IndirectY),
        0xF5 => ("SBC", ZeroPageX),
        0xF6 => ("INC", ZeroPageX),
        0xF8 => ("SED", Implied),
        0xF9 => ("SBC", AbsoluteY),
        0xFD => ("SBC", AbsoluteX),
        0xFE => ("INC", AbsoluteX),
        // Undocumented opcodes the CPU implements.
        0x03 => ("SLO", IndirectX),
        0x07 => ("SLO", ZeroPage),
        0x0F => ("SLO", Absolute),
        0x13 => ("SLO", IndirectY),
        0x17 => ("SLO", ZeroPageX),
        0x1B => ("SLO", AbsoluteY),
        0x1F => ("SLO", AbsoluteX),
        0x23 => ("RLA", IndirectX),
        0x27 => ("RLA", ZeroPage),
        0x2F => ("RLA", Absolute),
        0x33 => ("RLA", IndirectY),
        0x37 => ("RLA", ZeroPageX),
        0x3B => ("RLA", AbsoluteY),
        0x3F => ("RLA", AbsoluteX),
        0x43 => ("SRE", IndirectX),
        0x47 => ("SRE", ZeroPage),
        0x4F => ("SRE", Absolute),
        0x53 => ("SRE", IndirectY),
        0x57 => ("SRE", ZeroPageX),
        0x5B => ("SRE", AbsoluteY),
        0x5F => ("SRE", AbsoluteX),
        0x63 => ("RRA", IndirectX),
        0x67 => ("RRA", ZeroPage),
        0x6F => ("RRA", Absolute),
        0x73 => ("RRA", IndirectY),
        0x77 => ("RRA", ZeroPageX),
        0x7B => ("RRA", AbsoluteY),
        0x7F => ("RRA", AbsoluteX),
        0x83 => ("SAX", IndirectX),
        0x87 => ("SAX", ZeroPage),
        0x8F => ("SAX", Absolute),
        0x97 => ("SAX", ZeroPageY),
        0xA3 => ("LAX", IndirectX),
        0xA7 => ("LAX", ZeroPage),
        0xAF => ("LAX", Absolute),
        0xB3 => ("LAX", IndirectY),
        0xB7 => ("LAX", ZeroPageY),
        0xBF => ("LAX", AbsoluteY),
        0xC3 => ("DCP", IndirectX),
        0xC7 => ("DCP", ZeroPage),
        0xCF => ("DCP", Absolute),
        0xD3 => ("DCP", IndirectY),
        0xD7 => ("DCP", ZeroPageX),
        0xDB => ("DCP", AbsoluteY),
        0xDF => ("DCP", AbsoluteX),
        0xE3 => ("ISC", IndirectX),
        0xE7 => ("ISC", ZeroPage),
        0xEF => ("ISC", Absolute),
        0xF3 => ("ISC", IndirectY),
        0xF7 => ("ISC", ZeroPageX),
        0xFB => ("ISC", AbsoluteY),
        0xFF => ("ISC", AbsoluteX),
        0x0B | 0x2B => ("ANC", Immediate),
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => ("NOP", Implied),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => ("NOP", Immediate),
        0x04 | 0x44 | 0x64 => ("NOP", ZeroPage),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => ("NOP", ZeroPageX),
        0x0C => ("NOP", Absolute),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => ("NOP", AbsoluteX),
        _ => ("???", Implied),
    }
}

/// Mnemonic of an opcode.
#[must_use]
pub fn mnemonic(opcode: u8) -> &'static str {
    decode(opcode).0
}

/// Instruction length in bytes.
#[must_use]
pub fn instruction_length(opcode: u8) -> u16 {
    use AddressingMode::{
        Absolute, AbsoluteX, AbsoluteY, Accumulator, Immediate, Implied, Indirect, IndirectX,
        IndirectY, Relative, ZeroPage, ZeroPageX, ZeroPageY,
    };
    match decode(opcode).1 {
        Implied | Accumulator => 1,
        Immediate | ZeroPage | ZeroPageX | ZeroPageY | IndirectX | IndirectY | Relative => 2,
        Absolute | AbsoluteX | AbsoluteY | Indirect => 3,
    }
}

/// Disassemble one instruction at `pc`, reading the bytes via `spypeek`.
#[must_use]
pub fn disassemble<B: Bus>(bus: &B, pc: u16) -> String {
    use AddressingMode::{
        Absolute, AbsoluteX, AbsoluteY, Accumulator, Immediate, Implied, Indirect, IndirectX,
        IndirectY, Relative, ZeroPage, ZeroPageX, ZeroPageY,
    };

    let opcode = bus.spypeek(pc);
    let (name, mode) = decode(opcode);
    let op8 = bus.spypeek(pc.wrapping_add(1));
    let op16 = u16::from(op8) | (u16::from(bus.spypeek(pc.wrapping_add(2))) << 8);

    let operand = match mode {
        Implied => String::new(),
        Accumulator => " A".into(),
        Immediate => format!(" #${op8:02X}"),
        ZeroPage => format!(" ${op8:02X}"),
        ZeroPageX => format!(" ${op8:02X},X"),
        ZeroPageY => format!(" ${op8:02X},Y"),
        Absolute => format!(" ${op16:04X}"),
        AbsoluteX => format!(" ${op16:04X},X"),
        AbsoluteY => format!(" ${op16:04X},Y"),
        Indirect => format!(" (${op16:04X})"),
        IndirectX => format!(" (${op8:02X},X)"),
        IndirectY => format!(" (${op8:02X}),Y"),
        Relative => {
            let target = pc.wrapping_add(2).wrapping_add_signed(i16::from(op8 as i8));
            format!(" ${target:04X}")
        }
    };

    format!("{pc:04X}: {name}{operand}")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBus([u8; 16]);

    impl Bus for FlatBus {
        fn read(&mut self, address: u16) -> u8 {
            self.0[address as usize & 0x0F]
        }
        fn write(&mut self, address: u16, value: u8) {
            self.0[address as usize & 0x0F] = value;
        }
        fn spypeek(&self, address: u16) -> u8 {
            self.0[address as usize & 0x0F]
        }
    }

    #[test]
    fn formats_absolute_operand() {
        let bus = FlatBus([0xAD, 0x34, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(disassemble(&bus, 0), "0000: LDA $1234");
    }

    #[test]
    fn formats_branch_target() {
        // BNE -2 at $0004 branches to $0004.
        let mut bus = FlatBus([0; 16]);
        bus.0[4] = 0xD0;
        bus.0[5] = 0xFE;
        assert_eq!(disassemble(&bus, 4), "0004: BNE $0004");
    }

    #[test]
    fn every_opcode_has_a_length() {
        for opcode in 0..=255u8 {
            let len = instruction_length(opcode);
            assert!((1..=3).contains(&len));
        }
    }
}
