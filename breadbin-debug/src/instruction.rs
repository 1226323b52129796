// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::fmt;

pub enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    ZeroPage(u8),
    ZeroPageX(u8),
    ZeroPageY(u8),
    Absolute(u16),
    AbsoluteX(u16),
    AbsoluteY(u16),
    IndirectX(u8),
    IndirectY(u8),
    Indirect(u16),
    Relative(i8),
}

pub struct Instruction {
    pub mnemonic: &'static str,
    pub operand: Operand,
    pub illegal: bool,
}

impl Instruction {
    pub fn new(mnemonic: &'static str, operand: Operand, illegal: bool) -> Self {
        Instruction {
            mnemonic,
            operand,
            illegal,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.illegal { "*" } else { "" };
        match self.operand {
            Operand::Implied => write!(f, "{}{}", self.mnemonic, suffix),
            Operand::Accumulator => write!(f, "{}{} A", self.mnemonic, suffix),
            Operand::Immediate(value) => write!(f, "{}{} #${:02x}", self.mnemonic, suffix, value),
            Operand::ZeroPage(address) => write!(f, "{}{} ${:02x}", self.mnemonic, suffix, address),
            Operand::ZeroPageX(address) => {
                write!(f, "{}{} ${:02x},X", self.mnemonic, suffix, address)
            }
            Operand::ZeroPageY(address) => {
                write!(f, "{}{} ${:02x},Y", self.mnemonic, suffix, address)
            }
            Operand::Absolute(address) => write!(f, "{}{} ${:04x}", self.mnemonic, suffix, address),
            Operand::AbsoluteX(address) => {
                write!(f, "{}{} ${:04x},X", self.mnemonic, suffix, address)
            }
            Operand::AbsoluteY(address) => {
                write!(f, "{}{} ${:04x},Y", self.mnemonic, suffix, address)
            }
            Operand::IndirectX(address) => {
                write!(f, "{}{} (${:02x},X)", self.mnemonic, suffix, address)
            }
            Operand::IndirectY(address) => {
                write!(f, "{}{} (${:02x}),Y", self.mnemonic, suffix, address)
            }
            Operand::Indirect(address) => write!(f, "{}{} (${:04x})", self.mnemonic, suffix, address),
            Operand::Relative(offset) => write!(f, "{}{} {:+}", self.mnemonic, suffix, offset),
        }
    }
}
