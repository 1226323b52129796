// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use breadbin_core::cpu::{Cpu6510, CpuModel};
use breadbin_core::factory::*;
use breadbin_core::io::cia;
use breadbin_core::io::Cia;
use breadbin_core::mem::{Memory, Mmio};
use breadbin_core::util::{Clock, IoPort, IrqLine, Pin, Ram, Rom, Shared, SharedCell, new_shared};
use breadbin_core::video::Vic;

pub struct C64Factory;

impl C64Factory {
    pub fn new() -> Self {
        C64Factory
    }
}

impl Default for C64Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipFactory for C64Factory {
    fn new_cpu(
        &self,
        mem: Shared<dyn Addressable>,
        io_port: Shared<IoPort>,
        rdy_line: Shared<IrqLine>,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
        vic_data_bus: SharedCell<u8>,
        clock: Rc<Clock>,
    ) -> Box<dyn Cpu> {
        Box::new(Cpu6510::new(
            CpuModel::Mos6510,
            mem,
            io_port,
            rdy_line,
            irq_line,
            nmi_line,
            vic_data_bus,
            clock,
        ))
    }

    fn new_cia_1(
        &self,
        joystick_1: SharedCell<u8>,
        joystick_2: SharedCell<u8>,
        keyboard_matrix: Shared<[u8; 16]>,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        flag_pin: Shared<Pin>,
        irq_line: Shared<IrqLine>,
    ) -> Shared<dyn Chip> {
        new_shared(Cia::new(
            cia::Mode::Cia1,
            Some(joystick_1),
            Some(joystick_2),
            Some(keyboard_matrix),
            port_a,
            port_b,
            flag_pin,
            irq_line,
        ))
    }

    fn new_cia_2(
        &self,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        flag_pin: Shared<Pin>,
        nmi_line: Shared<IrqLine>,
    ) -> Shared<dyn Chip> {
        new_shared(Cia::new(
            cia::Mode::Cia2,
            None,
            None,
            None,
            port_a,
            port_b,
            flag_pin,
            nmi_line,
        ))
    }

    fn new_vic(
        &self,
        chip_model: VicModel,
        color_ram: Shared<Ram>,
        ram: Shared<Ram>,
        rom_charset: Shared<Rom>,
        vic_base_address: SharedCell<u16>,
        vic_data_bus: SharedCell<u8>,
        frame_buffer: Shared<dyn VideoOutput>,
        vsync_flag: SharedCell<bool>,
        rdy_line: Shared<IrqLine>,
        irq_line: Shared<IrqLine>,
    ) -> Shared<dyn Chip> {
        new_shared(Vic::new(
            chip_model,
            color_ram,
            ram,
            rom_charset,
            vic_base_address,
            vic_data_bus,
            frame_buffer,
            vsync_flag,
            rdy_line,
            irq_line,
        ))
    }

    fn new_memory(
        &self,
        mmu: Shared<dyn Mmu>,
        cia_1: Shared<dyn Chip>,
        cia_2: Shared<dyn Chip>,
        color_ram: Shared<Ram>,
        expansion_port: Shared<dyn AddressableFaded>,
        ram: Shared<Ram>,
        rom_basic: Shared<Rom>,
        rom_charset: Shared<Rom>,
        rom_kernal: Shared<Rom>,
        sid: Shared<dyn Chip>,
        vic: Shared<dyn Chip>,
        vic_data_bus: SharedCell<u8>,
    ) -> Shared<dyn Addressable> {
        let io = Mmio::new(
            cia_1,
            cia_2,
            color_ram,
            expansion_port.clone(),
            sid,
            vic,
            vic_data_bus.clone(),
        );
        new_shared(Memory::new(
            mmu,
            expansion_port,
            io,
            ram,
            rom_basic,
            rom_charset,
            rom_kernal,
            vic_data_bus,
        ))
    }

    fn new_ram(&self, capacity: usize) -> Shared<Ram> {
        new_shared(Ram::new(capacity))
    }

    fn new_rom(&self, data: &[u8], offset: u16) -> Shared<Rom> {
        new_shared(Rom::new_with_data(data, offset))
    }
}
