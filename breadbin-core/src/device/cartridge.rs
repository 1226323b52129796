// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use bit_field::BitField;
use log::Level;

use crate::util::{irq_line, Clock, IrqLine, Shared};

// SPEC: http://ist.uwaterloo.ca/~schepers/formats/CRT.TXT
// Design:
//   A cartridge is a bank set plus a per-variant control register protocol on
//   IO1/IO2. Variants are dispatched through the hardware type tag; each one
//   reconfigures banking, toggles GAME/EXROM, and may pull the NMI line or
//   run a cycle-timed state machine (Epyx capacitor).

/// Cycles the Epyx capacitor stays charged after a ROML or IO1 access.
const EPYX_DISCHARGE_CYCLES: u64 = 512;

pub enum ChipType {
    Rom,
    Ram,
    FlashRom,
}

impl ChipType {
    pub fn from(chip_type: u16) -> ChipType {
        match chip_type {
            0x00 => ChipType::Rom,
            0x01 => ChipType::Ram,
            0x02 => ChipType::FlashRom,
            _ => panic!("invalid chip type {}", chip_type),
        }
    }
}

pub struct Chip {
    pub chip_type: ChipType,
    pub bank_number: u8,
    pub offset: u16,
    pub size: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq)]
pub enum HwType {
    Normal,
    FinalIII,
    SimonsBasic,
    OceanType1,
    FunPlay,
    SuperGames,
    EpyxFastload,
    Westermann,
    EasyFlash,
}

impl HwType {
    pub fn from(value: u8) -> HwType {
        match value {
            0 => HwType::Normal,
            3 => HwType::FinalIII,
            4 => HwType::SimonsBasic,
            5 => HwType::OceanType1,
            7 => HwType::FunPlay,
            8 => HwType::SuperGames,
            10 => HwType::EpyxFastload,
            11 => HwType::Westermann,
            32 => HwType::EasyFlash,
            _ => panic!("invalid hardware type {}", value),
        }
    }

    pub fn is_mirrored(&self) -> bool {
        matches!(self, HwType::OceanType1 | HwType::FunPlay | HwType::Normal)
    }
}

pub struct IoConfig {
    pub exrom: bool,
    pub game: bool,
}

impl IoConfig {
    pub fn new() -> Self {
        IoConfig {
            exrom: true,
            game: true,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Cartridge {
    version: u16,
    hw_type: HwType,
    exrom: bool,
    game: bool,
    banks: Vec<Option<Chip>>,
    io_observer: Option<Box<dyn Fn(&IoConfig)>>,
    is_mirrored: bool,
    // Runtime state
    bank_lo: Option<usize>,
    bank_hi: Option<usize>,
    io_config: IoConfig,
    reg_value: u8,
    disabled: bool,
    disable_at_cycle: u64,
    easyflash_ram: Vec<u8>,
    // Wiring, provided on attach
    nmi_line: Option<Shared<IrqLine>>,
    clock: Option<Rc<Clock>>,
}

impl Cartridge {
    pub fn new(version: u16, hw_type: HwType, exrom: bool, game: bool) -> Self {
        let mut banks = Vec::with_capacity(64);
        for _ in 0..64 {
            banks.push(None);
        }
        Cartridge {
            version,
            hw_type,
            exrom,
            game,
            banks,
            io_observer: None,
            is_mirrored: hw_type.is_mirrored(),
            bank_lo: None,
            bank_hi: None,
            io_config: IoConfig::new(),
            reg_value: 0,
            disabled: false,
            disable_at_cycle: 0,
            easyflash_ram: vec![0; 0x100],
            nmi_line: None,
            clock: None,
        }
    }

    pub fn get_version(&self) -> u16 {
        self.version
    }

    pub fn get_hw_type(&self) -> HwType {
        self.hw_type
    }

    pub fn add(&mut self, chip: Chip) {
        let bank_num = chip.bank_number as usize;
        self.banks[bank_num] = Some(chip);
    }

    pub fn set_io_observer(&mut self, observer: Option<Box<dyn Fn(&IoConfig)>>) {
        self.io_observer = observer;
    }

    pub fn set_nmi_line(&mut self, nmi_line: Option<Shared<IrqLine>>) {
        self.nmi_line = nmi_line;
    }

    pub fn set_clock(&mut self, clock: Option<Rc<Clock>>) {
        self.clock = clock;
    }

    /// True when the variant carries a per-cycle state machine.
    pub fn needs_clock(&self) -> bool {
        self.hw_type == HwType::EpyxFastload
    }

    /* The powerup path is the authoritative one; reset routes through it so
       both end up with identical line and bank state. */
    pub fn powerup(&mut self) {
        self.disabled = false;
        self.bank_lo = None;
        self.bank_hi = None;
        self.reg_value = 0;
        self.io_config = IoConfig {
            exrom: self.exrom,
            game: self.game,
        };
        match self.hw_type {
            HwType::FinalIII => {
                // FC3 powers up in 16K mode with bank 0 and a pending NMI.
                self.io_config.exrom = false;
                self.io_config.game = false;
                self.switch_bank(0);
                self.pull_nmi(true);
            }
            HwType::EpyxFastload => {
                self.io_config.exrom = false;
                self.io_config.game = true;
                self.switch_bank(0);
                self.charge_capacitor();
            }
            _ => {
                if self.banks.iter().any(|b| b.is_some()) {
                    self.switch_bank(0);
                }
            }
        }
        self.notify_io_changed();
    }

    pub fn reset(&mut self) {
        self.pull_nmi(false);
        self.powerup();
    }

    /// Per-cycle hook, used by the Epyx capacitor discharge.
    pub fn execute(&mut self) {
        if self.hw_type == HwType::EpyxFastload && !self.disabled {
            if let Some(ref clock) = self.clock {
                if clock.get() > self.disable_at_cycle {
                    if log_enabled!(Level::Trace) {
                        trace!(target: "cart", "Epyx capacitor discharged");
                    }
                    self.disabled = true;
                    self.io_config.exrom = true;
                    self.io_config.game = true;
                    self.notify_io_changed();
                }
            }
        }
    }

    fn charge_capacitor(&mut self) {
        if let Some(ref clock) = self.clock {
            self.disable_at_cycle = clock.get() + EPYX_DISCHARGE_CYCLES;
        }
        if self.disabled {
            self.disabled = false;
            self.io_config.exrom = false;
            self.io_config.game = true;
            self.notify_io_changed();
        }
    }

    fn pull_nmi(&mut self, low: bool) {
        if let Some(ref nmi_line) = self.nmi_line {
            nmi_line
                .borrow_mut()
                .set_low(irq_line::source::EXPANSION, low);
        }
    }

    fn notify_io_changed(&self) {
        if let Some(ref observer) = self.io_observer {
            observer(&self.io_config);
        }
    }

    fn switch_bank(&mut self, bank_number: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "cart::banks", "Switching to bank {} game {} exrom {}", bank_number, self.io_config.game, self.io_config.exrom);
        }
        if let Some(ref bank) = self.banks[bank_number as usize] {
            match bank.offset {
                0x8000 => {
                    self.bank_lo = Some(bank.bank_number as usize);
                    if bank.size > 0x2000 || self.is_mirrored {
                        self.bank_hi = self.bank_lo;
                    } else {
                        self.bank_hi = None;
                    }
                }
                0xa000 | 0xe000 => {
                    self.bank_hi = Some(bank.bank_number as usize);
                    if self.is_mirrored {
                        self.bank_lo = self.bank_hi;
                    } else {
                        self.bank_lo = None;
                    }
                }
                _ => panic!("invalid load address {:04x}", bank.offset),
            }
        }
    }

    fn bank_data(&self, bank: usize, offset: usize) -> u8 {
        match self.banks[bank] {
            Some(ref chip) => chip.data[offset % chip.data.len()],
            None => 0,
        }
    }

    // -- Device I/O

    pub fn peek_io(&mut self, address: u16) -> Option<u8> {
        match self.hw_type {
            HwType::FinalIII => {
                // IO1/IO2 mirror $1e00-$1fff of the active bank.
                let offset = 0x1e00 + (address as usize & 0x1ff);
                self.bank_lo.map(|bank| self.bank_data(bank, offset))
            }
            HwType::SimonsBasic => {
                if address == 0xde00 {
                    // Reading the register switches back to 8K mode.
                    self.io_config.game = true;
                    self.notify_io_changed();
                }
                Some(self.reg_value)
            }
            HwType::Westermann => {
                if (0xdf00..=0xdfff).contains(&address) {
                    self.io_config.game = true;
                    self.notify_io_changed();
                }
                Some(self.reg_value)
            }
            HwType::EpyxFastload => match address {
                0xde00..=0xdeff => {
                    self.charge_capacitor();
                    None
                }
                0xdf00..=0xdfff => {
                    // IO2 mirrors the last page of the ROM.
                    let offset = 0x1f00 + (address as usize & 0xff);
                    self.bank_lo.map(|bank| self.bank_data(bank, offset))
                }
                _ => None,
            },
            HwType::EasyFlash => match address {
                0xdf00..=0xdfff => Some(self.easyflash_ram[(address & 0xff) as usize]),
                _ => Some(self.reg_value),
            },
            _ => Some(self.reg_value),
        }
    }

    pub fn poke_io(&mut self, address: u16, value: u8) {
        self.reg_value = value;
        match self.hw_type {
            HwType::Normal => {
                if address == 0xde00 {
                    self.switch_bank(value & 0x3f);
                }
            }
            HwType::FinalIII => {
                if address == 0xdfff {
                    /*  "7      Hide this register (1 = hidden)
                     *   6      NMI line   (0 = low = active)
                     *   5      GAME line  (0 = low = active)
                     *   4      EXROM line (0 = low = active)
                     *   0-1    number of bank to show at $8000" [VICE]
                     */
                    if value.get_bit(7) {
                        self.io_config.game = true;
                        self.io_config.exrom = true;
                    } else {
                        self.io_config.game = value.get_bit(5);
                        self.io_config.exrom = value.get_bit(4);
                    }
                    self.pull_nmi(!value.get_bit(6));
                    self.switch_bank(value & 0x03);
                    self.notify_io_changed();
                }
            }
            HwType::SimonsBasic => {
                if address == 0xde00 {
                    // Writing selects 16K mode.
                    self.io_config.game = false;
                    self.notify_io_changed();
                }
            }
            HwType::OceanType1 => {
                if address == 0xde00 && value.get_bit(7) {
                    self.switch_bank(value & 0x3f);
                }
            }
            HwType::FunPlay => {
                if address == 0xde00 {
                    if value == 0x86 {
                        self.io_config.exrom = true;
                        self.notify_io_changed();
                    } else {
                        let bank = ((value >> 3) & 0x07) | ((value & 0x01) << 3);
                        self.switch_bank(bank);
                        self.io_config.exrom = self.exrom;
                        self.notify_io_changed();
                    }
                }
            }
            HwType::SuperGames => {
                if (0xdf00..=0xdfff).contains(&address) {
                    self.switch_bank(value & 0x03);
                    if value.get_bit(2) {
                        self.io_config.exrom = true;
                        self.io_config.game = true;
                    } else {
                        self.io_config.exrom = false;
                        self.io_config.game = false;
                    }
                    self.notify_io_changed();
                }
            }
            HwType::EpyxFastload => {}
            HwType::Westermann => {}
            HwType::EasyFlash => match address {
                0xde00 => {
                    self.switch_bank(value & 0x3f);
                }
                0xde02 => {
                    /* Control register: bit 0 GAME, bit 1 EXROM, bit 2
                       selects whether GAME follows bit 0 or stays active. */
                    let game_override = value.get_bit(2);
                    self.io_config.game = if game_override {
                        !value.get_bit(0)
                    } else {
                        false
                    };
                    self.io_config.exrom = !value.get_bit(1);
                    self.notify_io_changed();
                }
                0xdf00..=0xdfff => {
                    self.easyflash_ram[(address & 0xff) as usize] = value;
                }
                _ => {}
            },
        }
    }

    pub fn read(&mut self, address: u16) -> Option<u8> {
        if self.disabled {
            return None;
        }
        match address {
            0x8000..=0x9fff => {
                if self.hw_type == HwType::EpyxFastload {
                    self.charge_capacitor();
                }
                self.bank_lo
                    .map(|bank| self.bank_data(bank, (address - 0x8000) as usize))
            }
            0xa000..=0xbfff => self.bank_hi.map(|bank| {
                let chip_offset = self.banks[bank]
                    .as_ref()
                    .map(|chip| chip.offset)
                    .unwrap_or(0xa000);
                if chip_offset == 0x8000 {
                    self.bank_data(bank, (address - 0x8000) as usize)
                } else {
                    self.bank_data(bank, (address - 0xa000) as usize)
                }
            }),
            0xe000..=0xffff => self.bank_hi.map(|bank| {
                let chip_offset = self.banks[bank]
                    .as_ref()
                    .map(|chip| chip.offset)
                    .unwrap_or(0xe000);
                if chip_offset == 0x8000 {
                    // 16K chips expose their upper half in ultimax mode.
                    self.bank_data(bank, (address as usize & 0x1fff) + 0x2000)
                } else {
                    self.bank_data(bank, address as usize & 0x1fff)
                }
            }),
            0xde00..=0xdfff => self.peek_io(address),
            _ => panic!("invalid address {:04x}", address),
        }
    }

    pub fn write(&mut self, address: u16, value: u8) {
        match address {
            0xde00..=0xdfff => self.poke_io(address, value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(bank: u8, offset: u16, size: u16, fill: u8) -> Chip {
        Chip {
            chip_type: ChipType::Rom,
            bank_number: bank,
            offset,
            size,
            data: vec![fill; size as usize],
        }
    }

    #[test]
    fn normal_8k_maps_low_bank() {
        let mut cartridge = Cartridge::new(1, HwType::Normal, false, true);
        cartridge.add(chip(0, 0x8000, 0x2000, 0xaa));
        cartridge.powerup();
        assert_eq!(Some(0xaa), cartridge.read(0x8000));
        assert_eq!(Some(0xaa), cartridge.read(0xa000));
    }

    #[test]
    fn final3_register_switches_banks() {
        let mut cartridge = Cartridge::new(1, HwType::FinalIII, false, false);
        cartridge.add(chip(0, 0x8000, 0x4000, 0x11));
        cartridge.add(chip(1, 0x8000, 0x4000, 0x22));
        cartridge.powerup();
        assert_eq!(Some(0x11), cartridge.read(0x8000));
        cartridge.poke_io(0xdfff, 0x01);
        assert_eq!(Some(0x22), cartridge.read(0x8000));
        // 16K chip upper half shows up in the ultimax window.
        assert_eq!(Some(0x22), cartridge.read(0xe000));
    }

    #[test]
    fn final3_hide_bit_releases_lines() {
        let mut cartridge = Cartridge::new(1, HwType::FinalIII, false, false);
        cartridge.add(chip(0, 0x8000, 0x4000, 0x11));
        cartridge.powerup();
        cartridge.poke_io(0xdfff, 0x80 | 0x40);
        assert!(cartridge.io_config.game);
        assert!(cartridge.io_config.exrom);
    }

    #[test]
    fn epyx_capacitor_disables_cartridge() {
        let clock = Rc::new(Clock::new());
        let mut cartridge = Cartridge::new(1, HwType::EpyxFastload, false, true);
        cartridge.add(chip(0, 0x8000, 0x2000, 0x33));
        cartridge.set_clock(Some(clock.clone()));
        cartridge.powerup();
        assert_eq!(Some(0x33), cartridge.read(0x8000));
        clock.tick_delta(EPYX_DISCHARGE_CYCLES + 1);
        cartridge.execute();
        assert_eq!(None, cartridge.read(0x8000));
        assert!(cartridge.io_config.exrom);
    }

    #[test]
    fn ocean_bank_switching() {
        let mut cartridge = Cartridge::new(1, HwType::OceanType1, false, true);
        cartridge.add(chip(0, 0x8000, 0x2000, 0x01));
        cartridge.add(chip(1, 0x8000, 0x2000, 0x02));
        cartridge.powerup();
        cartridge.poke_io(0xde00, 0x81);
        assert_eq!(Some(0x02), cartridge.read(0x8000));
    }
}
