// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::Level;

use crate::util::{IoPort, IrqLine, Reader, Shared, SnapshotError, Writer};

// Spec: 6522 VERSATILE INTERFACE ADAPTER (VIA) Datasheet
// Design:
//   The two drive VIAs carry the IEC handshake (VIA 1) and the drive
//   mechanics (VIA 2). Timers 1 and 2, the CA1 edge input used for the
//   byte-ready signal, and the CA2/CB2 control outputs are modeled; the
//   shift register is kept as plain storage.

pub mod reg {
    pub const ORB: u8 = 0x00;
    pub const ORA: u8 = 0x01;
    pub const DDRB: u8 = 0x02;
    pub const DDRA: u8 = 0x03;
    pub const T1CL: u8 = 0x04;
    pub const T1CH: u8 = 0x05;
    pub const T1LL: u8 = 0x06;
    pub const T1LH: u8 = 0x07;
    pub const T2CL: u8 = 0x08;
    pub const T2CH: u8 = 0x09;
    pub const SR: u8 = 0x0a;
    pub const ACR: u8 = 0x0b;
    pub const PCR: u8 = 0x0c;
    pub const IFR: u8 = 0x0d;
    pub const IER: u8 = 0x0e;
    pub const ORA_NH: u8 = 0x0f;
}

/// Interrupt flag register bits.
pub mod int_src {
    pub const CA2: usize = 0;
    pub const CA1: usize = 1;
    pub const SR: usize = 2;
    pub const CB2: usize = 3;
    pub const CB1: usize = 4;
    pub const T2: usize = 5;
    pub const T1: usize = 6;
}

pub struct Via {
    // Configuration
    irq_source: usize,
    // Functional Units
    t1_latch: u16,
    t1_counter: u16,
    t1_running: bool,
    t2_latch_lo: u8,
    t2_counter: u16,
    t2_irq_armed: bool,
    sr: u8,
    acr: u8,
    pcr: u8,
    ifr: u8,
    ier: u8,
    // Input edges
    ca1: bool,
    port_a_latch: u8,
    // I/O
    port_a: Shared<IoPort>,
    port_b: Shared<IoPort>,
    irq_line: Shared<IrqLine>,
}

impl Via {
    pub fn new(
        irq_source: usize,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        irq_line: Shared<IrqLine>,
    ) -> Self {
        Self {
            irq_source,
            t1_latch: 0,
            t1_counter: 0,
            t1_running: false,
            t2_latch_lo: 0,
            t2_counter: 0,
            t2_irq_armed: false,
            sr: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            ca1: true,
            port_a_latch: 0xff,
            port_a,
            port_b,
            irq_line,
        }
    }

    pub fn get_port_a(&self) -> Shared<IoPort> {
        self.port_a.clone()
    }

    pub fn get_port_b(&self) -> Shared<IoPort> {
        self.port_b.clone()
    }

    /// CA2 control line as driven by the PCR output modes.
    pub fn get_ca2_out(&self) -> bool {
        match (self.pcr >> 1) & 0x07 {
            0b110 => false,
            0b111 => true,
            _ => true,
        }
    }

    /// CB2 control line as driven by the PCR output modes.
    pub fn get_cb2_out(&self) -> bool {
        match (self.pcr >> 5) & 0x07 {
            0b110 => false,
            0b111 => true,
            _ => true,
        }
    }

    /// CA1 input transition; the active edge latches port A and raises the
    /// interrupt flag.
    pub fn set_ca1(&mut self, level: bool) {
        if level != self.ca1 {
            let positive_mode = self.pcr.get_bit(0);
            let active = if positive_mode { level } else { !level };
            if active {
                self.ifr.set_bit(int_src::CA1, true);
                if self.acr.get_bit(0) {
                    self.port_a_latch = self.port_a.borrow().get_value();
                }
                self.update_irq();
            }
            self.ca1 = level;
        }
    }

    pub fn clock(&mut self) {
        // Timer 1
        if self.t1_counter == 0 {
            if self.t1_running {
                self.ifr.set_bit(int_src::T1, true);
                self.update_irq();
                if self.acr.get_bit(6) {
                    self.t1_counter = self.t1_latch;
                } else {
                    self.t1_running = false;
                }
            }
        } else {
            self.t1_counter = self.t1_counter.wrapping_sub(1);
        }
        // Timer 2 counts down continuously and interrupts once.
        if !self.acr.get_bit(5) {
            self.t2_counter = self.t2_counter.wrapping_sub(1);
            if self.t2_counter == 0 && self.t2_irq_armed {
                self.ifr.set_bit(int_src::T2, true);
                self.t2_irq_armed = false;
                self.update_irq();
            }
        }
    }

    pub fn reset(&mut self) {
        self.t1_latch = 0;
        self.t1_counter = 0;
        self.t1_running = false;
        self.t2_latch_lo = 0;
        self.t2_counter = 0;
        self.t2_irq_armed = false;
        self.sr = 0;
        self.acr = 0;
        self.pcr = 0;
        self.ifr = 0;
        self.ier = 0;
        self.ca1 = true;
        self.port_a_latch = 0xff;
        self.port_a.borrow_mut().reset();
        self.port_b.borrow_mut().reset();
        self.update_irq();
    }

    fn update_irq(&mut self) {
        let asserted = (self.ifr & self.ier & 0x7f) != 0;
        self.irq_line.borrow_mut().set_low(self.irq_source, asserted);
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        let value = match reg & 0x0f {
            reg::ORB => {
                self.ifr &= !((1 << int_src::CB1) | (1 << int_src::CB2));
                self.update_irq();
                self.port_b.borrow().get_value()
            }
            reg::ORA | reg::ORA_NH => {
                if reg & 0x0f == reg::ORA {
                    self.ifr &= !((1 << int_src::CA1) | (1 << int_src::CA2));
                    self.update_irq();
                }
                if self.acr.get_bit(0) {
                    self.port_a_latch
                } else {
                    self.port_a.borrow().get_value()
                }
            }
            reg::DDRB => self.port_b.borrow().get_direction(),
            reg::DDRA => self.port_a.borrow().get_direction(),
            reg::T1CL => {
                self.ifr &= !(1 << int_src::T1);
                self.update_irq();
                (self.t1_counter & 0xff) as u8
            }
            reg::T1CH => (self.t1_counter >> 8) as u8,
            reg::T1LL => (self.t1_latch & 0xff) as u8,
            reg::T1LH => (self.t1_latch >> 8) as u8,
            reg::T2CL => {
                self.ifr &= !(1 << int_src::T2);
                self.update_irq();
                (self.t2_counter & 0xff) as u8
            }
            reg::T2CH => (self.t2_counter >> 8) as u8,
            reg::SR => self.sr,
            reg::ACR => self.acr,
            reg::PCR => self.pcr,
            reg::IFR => {
                let mut value = self.ifr;
                value.set_bit(7, (self.ifr & self.ier & 0x7f) != 0);
                value
            }
            reg::IER => self.ier | 0x80,
            _ => unreachable!(),
        };
        if log_enabled!(Level::Trace) {
            trace!(target: "via::reg", "Read 0x{:02x} = 0x{:02x}", reg, value);
        }
        value
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "via::reg", "Write 0x{:02x} = 0x{:02x}", reg, value);
        }
        match reg & 0x0f {
            reg::ORB => {
                self.ifr &= !((1 << int_src::CB1) | (1 << int_src::CB2));
                self.port_b.borrow_mut().set_value(value);
                self.update_irq();
            }
            reg::ORA | reg::ORA_NH => {
                if reg & 0x0f == reg::ORA {
                    self.ifr &= !((1 << int_src::CA1) | (1 << int_src::CA2));
                }
                self.port_a.borrow_mut().set_value(value);
                self.update_irq();
            }
            reg::DDRB => self.port_b.borrow_mut().set_direction(value),
            reg::DDRA => self.port_a.borrow_mut().set_direction(value),
            reg::T1CL | reg::T1LL => {
                self.t1_latch = (self.t1_latch & 0xff00) | u16::from(value);
            }
            reg::T1CH => {
                self.t1_latch = (u16::from(value) << 8) | (self.t1_latch & 0x00ff);
                self.t1_counter = self.t1_latch;
                self.t1_running = true;
                self.ifr &= !(1 << int_src::T1);
                self.update_irq();
            }
            reg::T1LH => {
                self.t1_latch = (u16::from(value) << 8) | (self.t1_latch & 0x00ff);
                self.ifr &= !(1 << int_src::T1);
                self.update_irq();
            }
            reg::T2CL => {
                self.t2_latch_lo = value;
            }
            reg::T2CH => {
                self.t2_counter = (u16::from(value) << 8) | u16::from(self.t2_latch_lo);
                self.t2_irq_armed = true;
                self.ifr &= !(1 << int_src::T2);
                self.update_irq();
            }
            reg::SR => {
                self.sr = value;
            }
            reg::ACR => {
                self.acr = value;
            }
            reg::PCR => {
                self.pcr = value;
            }
            reg::IFR => {
                self.ifr &= !(value & 0x7f);
                self.update_irq();
            }
            reg::IER => {
                /*
                If bit 7 of the data placed on the system data bus during
                this write operation is a 0, each 1 in bits 6 through 0
                clears the corresponding bit in the IER. Setting works the
                same with bit 7 = 1.
                */
                if value.get_bit(7) {
                    self.ier |= value & 0x7f;
                } else {
                    self.ier &= !(value & 0x7f);
                }
                self.update_irq();
            }
            _ => unreachable!(),
        }
    }

    // -- Persistence

    pub fn save_state(&self, writer: &mut Writer) {
        writer.put_u16(self.t1_latch);
        writer.put_u16(self.t1_counter);
        writer.put_bool(self.t1_running);
        writer.put_u8(self.t2_latch_lo);
        writer.put_u16(self.t2_counter);
        writer.put_bool(self.t2_irq_armed);
        writer.put_u8(self.sr);
        writer.put_u8(self.acr);
        writer.put_u8(self.pcr);
        writer.put_u8(self.ifr);
        writer.put_u8(self.ier);
        writer.put_bool(self.ca1);
        writer.put_u8(self.port_a_latch);
        writer.put_u8(self.port_a.borrow().get_direction());
        writer.put_u8(self.port_a.borrow().get_output());
        writer.put_u8(self.port_b.borrow().get_direction());
        writer.put_u8(self.port_b.borrow().get_output());
    }

    pub fn validate_state(reader: &mut Reader) -> Result<(), SnapshotError> {
        reader.get_u16()?; // t1 latch
        reader.get_u16()?; // t1 counter
        reader.get_bool()?; // t1 running
        reader.get_u8()?; // t2 latch low
        reader.get_u16()?; // t2 counter
        reader.get_bool()?; // t2 irq armed
        for _ in 0..5 {
            reader.get_u8()?; // sr, acr, pcr, ifr, ier
        }
        reader.get_bool()?; // ca1
        reader.get_u8()?; // port a latch
        for _ in 0..4 {
            reader.get_u8()?; // port directions and outputs
        }
        Ok(())
    }

    pub fn restore_state(&mut self, reader: &mut Reader) -> Result<(), SnapshotError> {
        self.t1_latch = reader.get_u16()?;
        self.t1_counter = reader.get_u16()?;
        self.t1_running = reader.get_bool()?;
        self.t2_latch_lo = reader.get_u8()?;
        self.t2_counter = reader.get_u16()?;
        self.t2_irq_armed = reader.get_bool()?;
        self.sr = reader.get_u8()?;
        self.acr = reader.get_u8()?;
        self.pcr = reader.get_u8()?;
        self.ifr = reader.get_u8()?;
        self.ier = reader.get_u8()?;
        self.ca1 = reader.get_bool()?;
        self.port_a_latch = reader.get_u8()?;
        let dir_a = reader.get_u8()?;
        let out_a = reader.get_u8()?;
        self.port_a.borrow_mut().set_direction(dir_a);
        self.port_a.borrow_mut().set_value(out_a);
        let dir_b = reader.get_u8()?;
        let out_b = reader.get_u8()?;
        self.port_b.borrow_mut().set_direction(dir_b);
        self.port_b.borrow_mut().set_value(out_b);
        self.update_irq();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{irq_line, new_shared};

    fn setup_via() -> (Via, Shared<IrqLine>) {
        let port_a = new_shared(IoPort::new(0x00, 0xff));
        let port_b = new_shared(IoPort::new(0x00, 0xff));
        let irq = new_shared(IrqLine::new("irq"));
        let via = Via::new(irq_line::source::VIA_2, port_a, port_b, irq.clone());
        (via, irq)
    }

    #[test]
    fn t1_one_shot_interrupt() {
        let (mut via, irq) = setup_via();
        via.write(reg::IER, 0x80 | (1 << int_src::T1));
        via.write(reg::T1CL, 0x03);
        via.write(reg::T1CH, 0x00);
        for _ in 0..3 {
            via.clock();
            assert!(!irq.borrow().is_low());
        }
        via.clock();
        assert!(irq.borrow().is_low());
        // Reading T1CL acknowledges.
        via.read(reg::T1CL);
        assert!(!irq.borrow().is_low());
    }

    #[test]
    fn t2_interrupts_once() {
        let (mut via, irq) = setup_via();
        via.write(reg::IER, 0x80 | (1 << int_src::T2));
        via.write(reg::T2CL, 0x02);
        via.write(reg::T2CH, 0x00);
        let mut fired = 0;
        for _ in 0..0x300 {
            via.clock();
            if irq.borrow().is_low() {
                fired += 1;
                via.read(reg::T2CL);
            }
        }
        assert_eq!(1, fired);
    }

    #[test]
    fn ca1_edge_sets_flag() {
        let (mut via, irq) = setup_via();
        via.write(reg::IER, 0x80 | (1 << int_src::CA1));
        // Default PCR selects the negative edge.
        via.set_ca1(false);
        assert!(irq.borrow().is_low());
        assert!(via.read(reg::IFR).get_bit(int_src::CA1));
        // Reading ORA acknowledges.
        via.read(reg::ORA);
        assert!(!irq.borrow().is_low());
    }

    #[test]
    fn ier_set_clear_protocol() {
        let (mut via, _) = setup_via();
        via.write(reg::IER, 0x82);
        assert_eq!(0x82, via.read(reg::IER));
        via.write(reg::IER, 0x02);
        assert_eq!(0x80, via.read(reg::IER));
    }
}
