// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#![cfg_attr(feature = "cargo-clippy", allow(clippy::too_many_arguments))]

use std::rc::Rc;

use crate::factory::system_model::VicModel;
use crate::factory::types::*;
use crate::util::{Clock, IoPort, IrqLine, Pin, Ram, Rom, Shared, SharedCell};

/// ChipFactory provides an interface to construct each chip/component within
/// the system so that implementations can be swapped out. All interactions
/// between chips are managed through separate I/O state provided as input to
/// each of the chip constructors (`IrqLine`, `Pin`, `SharedCell`), which keeps
/// the chips decoupled from each other.
pub trait ChipFactory {
    /// Constructs CPU.
    ///
    /// The three least significant bits in the port register correspond to the
    /// control lines used for bank switching; the rdy line stalls read cycles.
    fn new_cpu(
        &self,
        mem: Shared<dyn Addressable>,
        io_port: Shared<IoPort>,
        rdy_line: Shared<IrqLine>,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
        vic_data_bus: SharedCell<u8>,
        clock: Rc<Clock>,
    ) -> Box<dyn Cpu>;

    // -- Chipset

    /// Constructs CIA 1 chip, wired to the keyboard matrix, both joysticks and
    /// the datassette FLAG pin.
    fn new_cia_1(
        &self,
        joystick_1: SharedCell<u8>,
        joystick_2: SharedCell<u8>,
        keyboard_matrix: Shared<[u8; 16]>,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        flag_pin: Shared<Pin>,
        irq_line: Shared<IrqLine>,
    ) -> Shared<dyn Chip>;

    /// Constructs CIA 2 chip, whose port A drives the VIC bank and the IEC
    /// lines and whose interrupt output is the CPU NMI line.
    fn new_cia_2(
        &self,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        flag_pin: Shared<Pin>,
        nmi_line: Shared<IrqLine>,
    ) -> Shared<dyn Chip>;

    /// Constructs VIC chip. The memory base address as defined by CIA 2 port A
    /// comes in through `vic_base_address`; every phi1 fetch is published on
    /// `vic_data_bus` (the value open addresses read).
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
    ) -> Shared<dyn Chip>;

    // -- Memory

    /// Constructs memory controller driven by the 5 PLA inputs
    /// (LORAM, HIRAM, CHAREN, GAME, EXROM).
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
    ) -> Shared<dyn Addressable>;

    /// Constructs RAM with the specified `capacity`.
    fn new_ram(&self, capacity: usize) -> Shared<Ram>;

    /// Constructs ROM based on the specified image.
    fn new_rom(&self, data: &[u8], offset: u16) -> Shared<Rom>;
}
