// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::factory::{Addressable, Bank, Mmu};
use crate::util::{Ram, Rom, Shared, SharedCell};

use super::Mmio;

// Spec: COMMODORE 64 MEMORY MAPS p. 263
// Design:
//   Memory dispatches every cpu access through the PLA bank table. Writes to
//   ROM areas fall through to the RAM underneath (write-through), since some
//   bank configurations make that RAM visible later. Reads from disabled
//   zones return the last byte the VIC drove on the data bus.

#[derive(Copy, Clone)]
enum BaseAddr {
    Basic = 0xa000,
    Charset = 0xd000,
    Kernal = 0xe000,
}

impl BaseAddr {
    pub fn addr(self) -> u16 {
        self as u16
    }
}

pub struct Memory {
    // Configuration
    mmu: Shared<dyn Mmu>,
    // Addressable
    basic: Shared<Rom>,
    charset: Shared<Rom>,
    expansion_port: Shared<dyn crate::factory::AddressableFaded>,
    io: Mmio,
    kernal: Shared<Rom>,
    ram: Shared<Ram>,
    // Runtime State
    vic_data_bus: SharedCell<u8>,
}

impl Memory {
    pub fn new(
        mmu: Shared<dyn Mmu>,
        expansion_port: Shared<dyn crate::factory::AddressableFaded>,
        io: Mmio,
        ram: Shared<Ram>,
        rom_basic: Shared<Rom>,
        rom_charset: Shared<Rom>,
        rom_kernal: Shared<Rom>,
        vic_data_bus: SharedCell<u8>,
    ) -> Self {
        Memory {
            mmu,
            basic: rom_basic,
            charset: rom_charset,
            expansion_port,
            io,
            kernal: rom_kernal,
            ram,
            vic_data_bus,
        }
    }
}

impl Addressable for Memory {
    fn read(&self, address: u16) -> u8 {
        let bank = self.mmu.borrow().map(address);
        match bank {
            Bank::Ram => self.ram.borrow().read(address),
            Bank::Basic => self.basic.borrow().read(address - BaseAddr::Basic.addr()),
            Bank::Charset => self
                .charset
                .borrow()
                .read(address - BaseAddr::Charset.addr()),
            Bank::Kernal => self.kernal.borrow().read(address - BaseAddr::Kernal.addr()),
            Bank::RomL | Bank::RomH => self
                .expansion_port
                .borrow_mut()
                .read(address)
                .unwrap_or_else(|| self.ram.borrow().read(address)),
            Bank::Io => self.io.read(address),
            Bank::Disabled => self.vic_data_bus.get(),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        let bank = self.mmu.borrow().map(address);
        match bank {
            Bank::Ram
            | Bank::Basic
            | Bank::Charset
            | Bank::Kernal
            | Bank::RomL
            | Bank::RomH => self.ram.borrow_mut().write(address, value),
            Bank::Io => self.io.write(address, value),
            Bank::Disabled => {}
        }
    }
}
