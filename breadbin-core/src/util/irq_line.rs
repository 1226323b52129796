// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::Level;

/// An active-low line shared by multiple sources. Each source pulls the line
/// down through its own bit; the line stays asserted while any bit is set.
/// NMI, IRQ and RDY are all wired this way.
pub struct IrqLine {
    kind: &'static str,
    signal: u8,
}

impl IrqLine {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, signal: 0 }
    }

    pub fn get_signal(&self) -> u8 {
        self.signal
    }

    pub fn is_low(&self) -> bool {
        self.signal != 0
    }

    pub fn reset(&mut self) {
        self.signal = 0;
    }

    pub fn restore(&mut self, signal: u8) {
        self.signal = signal;
    }

    pub fn set_low(&mut self, source: usize, value: bool) {
        if log_enabled!(Level::Trace) {
            trace!(
                target: "cpu::int", "{}.{} {}",
                self.kind,
                source,
                if value { "set" } else { "cleared" }
            );
        }
        self.signal.set_bit(source, value);
    }
}

/// Source bit assignments for the interrupt and RDY lines.
pub mod source {
    pub const CIA: usize = 0;
    pub const VIC: usize = 1;
    pub const VIA_1: usize = 2;
    pub const VIA_2: usize = 3;
    pub const EXPANSION: usize = 4;
    pub const KEYBOARD: usize = 5;
}
