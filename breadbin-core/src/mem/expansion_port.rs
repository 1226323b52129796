// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use bit_field::BitField;

use crate::device::cartridge::Cartridge;
use crate::factory::AddressableFaded;
use crate::util::{Clock, IoPort, IrqLine, Shared};

// The GAME and EXROM lines feed the PLA through bits 3 and 4 of the shared
// io line, alongside LORAM/HIRAM/CHAREN from the processor port.

#[derive(Copy, Clone)]
enum IoLine {
    Game = 3,
    Exrom = 4,
}

impl IoLine {
    pub fn value(self) -> usize {
        self as usize
    }
}

pub struct ExpansionPort {
    cartridge: Option<Cartridge>,
    // I/O
    io_line: Shared<IoPort>,
    nmi_line: Shared<IrqLine>,
    clock: Rc<Clock>,
}

impl ExpansionPort {
    pub fn new(io_line: Shared<IoPort>, nmi_line: Shared<IrqLine>, clock: Rc<Clock>) -> Self {
        Self {
            cartridge: None,
            io_line,
            nmi_line,
            clock,
        }
    }

    pub fn attach(&mut self, mut cartridge: Cartridge) {
        let io_line_clone = self.io_line.clone();
        cartridge.set_io_observer(Some(Box::new(move |config| {
            let mut io_value = 0u8;
            io_value.set_bit(IoLine::Game.value(), config.game);
            io_value.set_bit(IoLine::Exrom.value(), config.exrom);
            io_line_clone.borrow_mut().set_value(io_value);
        })));
        cartridge.set_nmi_line(Some(self.nmi_line.clone()));
        cartridge.set_clock(Some(self.clock.clone()));
        cartridge.powerup();
        self.cartridge = Some(cartridge);
    }

    pub fn detach(&mut self) {
        if let Some(mut cartridge) = self.cartridge.take() {
            cartridge.set_io_observer(None);
            cartridge.set_nmi_line(None);
            cartridge.set_clock(None);
        }
        let mut io_value = 0u8;
        io_value.set_bit(IoLine::Game.value(), true);
        io_value.set_bit(IoLine::Exrom.value(), true);
        self.io_line.borrow_mut().set_value(io_value);
    }

    pub fn has_cartridge(&self) -> bool {
        self.cartridge.is_some()
    }

    /// Per-cycle hook for cartridges with a timed state machine.
    pub fn clock(&mut self) {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.execute();
        }
    }

    pub fn needs_clock(&self) -> bool {
        self.cartridge
            .as_ref()
            .map_or(false, |cartridge| cartridge.needs_clock())
    }

    pub fn reset(&mut self) {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.reset();
        } else {
            let mut io_value = 0u8;
            io_value.set_bit(IoLine::Game.value(), true);
            io_value.set_bit(IoLine::Exrom.value(), true);
            self.io_line.borrow_mut().set_value(io_value);
        }
    }
}

impl AddressableFaded for ExpansionPort {
    fn read(&mut self, address: u16) -> Option<u8> {
        self.cartridge.as_mut().and_then(|crt| crt.read(address))
    }

    fn write(&mut self, address: u16, value: u8) {
        if let Some(ref mut cartridge) = self.cartridge {
            cartridge.write(address, value)
        }
    }
}
