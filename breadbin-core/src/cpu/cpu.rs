// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::cell::Cell;
use core::fmt;
use std::rc::Rc;

use bit_field::BitField;
use log::Level;

use crate::factory::{
    Addressable, Cpu, InstructionLogEntry, Register, WatchpointHit,
};
use crate::util::{
    ClockedRegister, Clock, IoPort, IrqLine, Reader, Shared, SharedCell, SnapshotError, Writer,
};

use super::uops::{decode_opcode, load_program, MicroOp, MicroOpPair, ProgramId};

// Design:
//   The CPU is a microinstruction machine. Each architectural instruction is
//   decomposed into a static chain of micro-ops, one executed per clock
//   cycle. Interrupt lines are sampled every cycle through one-cycle-delayed
//   detectors and consumed at opcode fetch; the 7-cycle BRK/IRQ sequences
//   re-check the NMI edge before the vector fetch (interrupt hijacking).
//   The 6510 personality additionally owns the processor port at
//   $0000/$0001, including the floating bits 3/6/7 which discharge after a
//   direction flip, and honors the RDY line by stalling read cycles.

const DISCHARGE_CYCLES: u64 = 350_000;
const INSTRUCTION_LOG_SIZE: usize = 256;

#[derive(Clone, Copy, PartialEq)]
pub enum CpuModel {
    Mos6510,
    Mos6502,
}

pub enum Flag {
    Carry = 1,
    Zero = 1 << 1,
    IntDisable = 1 << 2,
    Decimal = 1 << 3,
    Break = 1 << 4,
    Reserved = 1 << 5,
    Overflow = 1 << 6,
    Negative = 1 << 7,
}

pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: u8,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0,
            pc: 0,
            p: 0,
        }
    }

    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0;
        self.pc = 0;
        self.p = 0;
    }
}

pub struct Cpu6510 {
    // Dependencies
    model: CpuModel,
    clock: Rc<Clock>,
    mem: Shared<dyn Addressable>,
    // Runtime State
    regs: Registers,
    frozen_pc: u16,
    opcode: u8,
    program: ProgramId,
    uops: &'static [MicroOpPair],
    cycle: u8,
    address_lo: u8,
    address_hi: u8,
    address_hi_base: u8,
    data: u8,
    page_cross: bool,
    vector: u16,
    jammed: bool,
    // Interrupt detectors
    nmi_last: bool,
    nmi_pending: ClockedRegister<bool>,
    irq_pending: ClockedRegister<bool>,
    // RDY bookkeeping
    rdy_was_low: bool,
    rdy_fall_cycle: u64,
    rdy_rise_cycle: u64,
    // Processor port
    discharge_cycle: [u64; 8],
    // Debugger
    debug_enabled: bool,
    watchpoints: Vec<u16>,
    watch_hit: Cell<Option<WatchpointHit>>,
    instruction_log: Vec<InstructionLogEntry>,
    log_index: usize,
    // I/O
    rdy_line: Shared<IrqLine>,
    io_port: Shared<IoPort>,
    irq_line: Shared<IrqLine>,
    nmi_line: Shared<IrqLine>,
    vic_data_bus: SharedCell<u8>,
}

impl Cpu6510 {
    pub fn new(
        model: CpuModel,
        mem: Shared<dyn Addressable>,
        io_port: Shared<IoPort>,
        rdy_line: Shared<IrqLine>,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
        vic_data_bus: SharedCell<u8>,
        clock: Rc<Clock>,
    ) -> Self {
        let nmi_pending = ClockedRegister::new(clock.clone(), 1, false);
        let irq_pending = ClockedRegister::new(clock.clone(), 1, false);
        Self {
            model,
            clock,
            mem,
            regs: Registers::new(),
            frozen_pc: 0,
            opcode: 0,
            program: ProgramId::Start,
            uops: load_program(ProgramId::Start),
            cycle: 0,
            address_lo: 0,
            address_hi: 0,
            address_hi_base: 0,
            data: 0,
            page_cross: false,
            vector: 0xfffe,
            jammed: false,
            nmi_last: false,
            nmi_pending,
            irq_pending,
            rdy_was_low: false,
            rdy_fall_cycle: 0,
            rdy_rise_cycle: 0,
            discharge_cycle: [0; 8],
            debug_enabled: false,
            watchpoints: Vec::new(),
            watch_hit: Cell::new(None),
            instruction_log: Vec::new(),
            log_index: 0,
            rdy_line,
            io_port,
            irq_line,
            nmi_line,
            vic_data_bus,
        }
    }

    fn execute(&mut self, op: MicroOp) {
        if log_enabled!(Level::Trace) {
            trace!(target: "cpu::uop", "0x{:04x}: {:02x} #{} {:<18}; {}", self.regs.pc, self.opcode, self.cycle, format!("{:?}", op), &self);
        }
        match op {
            MicroOp::FetchOpcode => self.load_next_program(),
            MicroOp::FetchOpcodeDiscard => self.fetch_opcode_discard(),
            MicroOp::FetchOperand => self.fetch_operand(),
            MicroOp::FetchAdl => self.fetch_adl(),
            MicroOp::FetchAdh => self.fetch_adh(),
            MicroOp::FixAdh => self.fix_adh(),
            MicroOp::IncrementAdlX => self.increment_adl_x(),
            MicroOp::IncrementAdlY => self.increment_adl_y(),
            MicroOp::IndirectFetchAdl => self.indirect_fetch_adl(),
            MicroOp::IndirectFetchAdh => self.indirect_fetch_adh(),
            MicroOp::ReadData => self.read_data(),
            MicroOp::ReadDataOrFixAdh => self.read_data_or_fix_adh(),
            MicroOp::WriteData => self.write_data(),
            MicroOp::OpLDA => self.lda(),
            MicroOp::OpLDX => self.ldx(),
            MicroOp::OpLDY => self.ldy(),
            MicroOp::OpSTA => self.sda(),
            MicroOp::OpSTX => self.sdx(),
            MicroOp::OpSTY => self.sdy(),
            MicroOp::OpTAX => self.tax(),
            MicroOp::OpTXA => self.txa(),
            MicroOp::OpTAY => self.tay(),
            MicroOp::OpTYA => self.tya(),
            MicroOp::OpTSX => self.tsx(),
            MicroOp::OpTXS => self.txs(),
            MicroOp::OpPLA => self.pla(),
            MicroOp::OpPLP => self.plp(),
            MicroOp::OpPHA => self.pha(),
            MicroOp::OpPHP => self.php(),
            MicroOp::OpAND => self.and(),
            MicroOp::OpEOR => self.eor(),
            MicroOp::OpORA => self.ora(),
            MicroOp::OpADC => self.adc(),
            MicroOp::OpSBC => self.sbc(),
            MicroOp::OpBIT => self.bit(),
            MicroOp::OpCMP => self.cmp(),
            MicroOp::OpCPX => self.cpx(),
            MicroOp::OpCPY => self.cpy(),
            MicroOp::OpDEC => self.dec(),
            MicroOp::OpDEX => self.dex(),
            MicroOp::OpDEY => self.dey(),
            MicroOp::OpINC => self.inc(),
            MicroOp::OpINX => self.inx(),
            MicroOp::OpINY => self.iny(),
            MicroOp::OpASL => self.asl(),
            MicroOp::OpASLImplied => self.asl_implied(),
            MicroOp::OpLSR => self.lsr(),
            MicroOp::OpLSRImplied => self.lsr_implied(),
            MicroOp::OpROL => self.rol(),
            MicroOp::OpROLImplied => self.rol_implied(),
            MicroOp::OpROR => self.ror(),
            MicroOp::OpRORImplied => self.ror_implied(),
            MicroOp::OpJMP => self.jmp(),
            MicroOp::OpJSR => self.jsr(),
            MicroOp::OpRTS => self.rts(),
            MicroOp::OpBRK => self.brk(),
            MicroOp::OpRTI => self.rti(),
            MicroOp::OpBCC => self.branch(Flag::Carry, false),
            MicroOp::OpBCS => self.branch(Flag::Carry, true),
            MicroOp::OpBEQ => self.branch(Flag::Zero, true),
            MicroOp::OpBNE => self.branch(Flag::Zero, false),
            MicroOp::OpBMI => self.branch(Flag::Negative, true),
            MicroOp::OpBPL => self.branch(Flag::Negative, false),
            MicroOp::OpBVC => self.branch(Flag::Overflow, false),
            MicroOp::OpBVS => self.branch(Flag::Overflow, true),
            MicroOp::OpBranchFix => self.branch_fix(),
            MicroOp::OpCLC => self.clear_flag(Flag::Carry),
            MicroOp::OpCLD => self.clear_flag(Flag::Decimal),
            MicroOp::OpCLI => self.clear_flag(Flag::IntDisable),
            MicroOp::OpCLV => self.clear_flag(Flag::Overflow),
            MicroOp::OpSEC => self.set_flag(Flag::Carry),
            MicroOp::OpSED => self.set_flag(Flag::Decimal),
            MicroOp::OpSEI => self.set_flag(Flag::IntDisable),
            MicroOp::OpNOP => self.nop(),
            MicroOp::OpSLO => self.slo(),
            MicroOp::OpRLA => self.rla(),
            MicroOp::OpSRE => self.sre(),
            MicroOp::OpRRA => self.rra(),
            MicroOp::OpDCP => self.dcp(),
            MicroOp::OpISC => self.isc(),
            MicroOp::OpSAX => self.sax(),
            MicroOp::OpLAX => self.lax(),
            MicroOp::OpANC => self.anc(),
            MicroOp::OpALR => self.alr(),
            MicroOp::OpARR => self.arr(),
            MicroOp::OpANE => self.ane(),
            MicroOp::OpANX => self.anx(),
            MicroOp::OpAXS => self.axs(),
            MicroOp::OpLAS => self.las(),
            MicroOp::OpSHA => self.sha(),
            MicroOp::OpSHX => self.shx(),
            MicroOp::OpSHY => self.shy(),
            MicroOp::OpTAS => self.tas(),
            MicroOp::OpJam => self.jam(),
            MicroOp::OpIRQ => self.irq(),
            MicroOp::OpNMI => self.nmi(),
            MicroOp::OpRST => self.rst(),
        }
    }

    fn load_next_program(&mut self) {
        if self.nmi_pending.delayed() {
            if log_enabled!(Level::Trace) {
                trace!(target: "cpu::int", "NMI");
            }
            self.nmi_pending.force(false);
            self.program = ProgramId::Nmi;
            self.uops = load_program(ProgramId::Nmi);
        } else if self.irq_pending.delayed() && !self.test_flag(Flag::IntDisable) {
            if log_enabled!(Level::Trace) {
                trace!(target: "cpu::int", "IRQ");
            }
            self.program = ProgramId::Irq;
            self.uops = load_program(ProgramId::Irq);
        } else {
            self.fetch_opcode();
        }
        self.cycle = 0;
    }

    fn fetch_opcode(&mut self) {
        self.frozen_pc = self.regs.pc;
        self.opcode = self.read_mem(self.regs.pc);
        self.program = ProgramId::Start;
        self.uops = decode_opcode(self.opcode);
        if self.debug_enabled {
            self.log_instruction();
        }
        if log_enabled!(Level::Trace) {
            trace!(target: "cpu::ins", "0x{:04x}: {:02x}; {}", self.regs.pc, self.opcode, &self);
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_opcode_discard(&mut self) {
        let _ = self.read_mem(self.regs.pc);
    }

    fn fetch_operand(&mut self) {
        self.data = self.read_mem(self.regs.pc);
        if self.debug_enabled {
            self.log_operand(self.data);
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_adl(&mut self) {
        self.address_hi = 0;
        self.address_hi_base = 0;
        self.address_lo = self.read_mem(self.regs.pc);
        if self.debug_enabled {
            self.log_operand(self.address_lo);
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fetch_adh(&mut self) {
        self.address_hi = self.read_mem(self.regs.pc);
        self.address_hi_base = self.address_hi;
        if self.debug_enabled {
            self.log_operand(self.address_hi);
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
    }

    fn fix_adh(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        let _ = self.read_mem(address);
        if self.page_cross {
            self.address_hi = self.address_hi.wrapping_add(1);
        }
    }

    fn increment_adl_x(&mut self) {
        self.page_cross = self.address_lo.checked_add(self.regs.x).is_none();
        self.address_lo = self.address_lo.wrapping_add(self.regs.x);
    }

    fn increment_adl_y(&mut self) {
        self.page_cross = self.address_lo.checked_add(self.regs.y).is_none();
        self.address_lo = self.address_lo.wrapping_add(self.regs.y);
    }

    fn indirect_fetch_adl(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        let adl = self.read_mem(address);
        self.data = adl;
        self.address_lo = self.address_lo.wrapping_add(1);
    }

    fn indirect_fetch_adh(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.address_lo = self.data;
        self.address_hi = self.read_mem(address);
        self.address_hi_base = self.address_hi;
    }

    fn read_data_or_fix_adh(&mut self) {
        if self.page_cross {
            let address = make_address(self.address_hi, self.address_lo);
            let _ = self.read_mem(address);
            self.address_hi = self.address_hi.wrapping_add(1);
        } else {
            let address = make_address(self.address_hi, self.address_lo);
            self.data = self.read_mem(address);
            self.cycle += 1;
        }
    }

    fn read_data(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.data = self.read_mem(address);
    }

    fn write_data(&mut self) {
        let address = make_address(self.address_hi, self.address_lo);
        self.write_mem(address, self.data);
    }

    fn lda(&mut self) {
        let data = self.data;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn ldx(&mut self) {
        let data = self.data;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn ldy(&mut self) {
        let data = self.data;
        self.regs.y = data;
        self.set_nz(data);
    }

    fn sda(&mut self) {
        self.data = self.regs.a;
    }

    fn sdx(&mut self) {
        self.data = self.regs.x;
    }

    fn sdy(&mut self) {
        self.data = self.regs.y;
    }

    fn tax(&mut self) {
        let data = self.regs.a;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn txa(&mut self) {
        let data = self.regs.x;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn tay(&mut self) {
        let data = self.regs.a;
        self.regs.y = data;
        self.set_nz(data);
    }

    fn tya(&mut self) {
        let data = self.regs.y;
        self.regs.a = data;
        self.set_nz(data);
    }

    fn tsx(&mut self) {
        let data = self.regs.sp;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn txs(&mut self) {
        let data = self.regs.x;
        self.regs.sp = data;
        // NOTE do not set nz
    }

    fn pla(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let data = self.read_mem(address);
                self.regs.a = data;
                self.set_nz(data);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn plp(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let data = self.read_mem(address);
                self.regs.p = data;
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn pha(&mut self) {
        self.write_stack(self.regs.a);
    }

    fn php(&mut self) {
        self.write_stack(self.regs.p | (Flag::Break as u8) | (Flag::Reserved as u8));
    }

    fn and(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn eor(&mut self) {
        let result = self.regs.a ^ self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn ora(&mut self) {
        let result = self.regs.a | self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn adc(&mut self) {
        let value = self.data;
        self.add_to_accumulator(value);
    }

    fn add_to_accumulator(&mut self, value: u8) {
        let ac = self.regs.a as u16;
        let value = value as u16;
        let carry = if self.test_flag(Flag::Carry) { 1 } else { 0 };
        let temp = if !self.test_flag(Flag::Decimal) {
            ac.wrapping_add(value).wrapping_add(carry)
        } else {
            let mut t = (ac & 0x0f) + (value & 0x0f) + carry;
            if t > 0x09 {
                t += 0x06;
            }
            t += (ac & 0xf0) + (value & 0xf0);
            if t & 0x01f0 > 0x90 {
                t += 0x60;
            }
            t
        };
        self.update_flag(
            Flag::Overflow,
            (ac ^ value) & 0x80 == 0 && (ac ^ temp) & 0x80 == 0x80,
        );
        self.update_flag(Flag::Carry, temp > 0xff);
        let result = (temp & 0xff) as u8;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn sbc(&mut self) {
        let value = self.data;
        self.sub_from_accumulator(value);
    }

    fn sub_from_accumulator(&mut self, value: u8) {
        let ac = self.regs.a as u16;
        let value = value as u16;
        let carry = if self.test_flag(Flag::Carry) { 0 } else { 1 };
        let temp = if !self.test_flag(Flag::Decimal) {
            ac.wrapping_sub(value).wrapping_sub(carry)
        } else {
            let mut t = (ac & 0x0f).wrapping_sub(value & 0x0f).wrapping_sub(carry);
            if t & 0x10 != 0 {
                t = (t.wrapping_sub(0x06) & 0x0f)
                    | ((ac & 0xf0).wrapping_sub(value & 0xf0).wrapping_sub(0x10));
            } else {
                t = (t & 0x0f) | ((ac & 0xf0).wrapping_sub(value & 0xf0));
            }
            if t & 0x0100 != 0 {
                t -= 0x60;
            }
            t
        };
        self.update_flag(
            Flag::Overflow,
            (ac ^ temp) & 0x80 != 0 && (ac ^ value) & 0x80 == 0x80,
        );
        self.update_flag(Flag::Carry, temp < 0x100);
        let result = (temp & 0xff) as u8;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn bit(&mut self) {
        let data = self.data;
        let a = self.regs.a;
        self.update_flag(Flag::Negative, data & 0x80 != 0);
        self.update_flag(Flag::Overflow, 0x40 & data != 0);
        self.update_flag(Flag::Zero, data & a == 0);
    }

    fn cmp(&mut self) {
        let result = (u16::from(self.regs.a)).wrapping_sub(u16::from(self.data));
        self.update_flag(Flag::Carry, result < 0x100);
        self.set_nz((result & 0xff) as u8);
    }

    fn cpx(&mut self) {
        let result = (u16::from(self.regs.x)).wrapping_sub(u16::from(self.data));
        self.update_flag(Flag::Carry, result < 0x100);
        self.set_nz((result & 0xff) as u8);
    }

    fn cpy(&mut self) {
        let result = (u16::from(self.regs.y)).wrapping_sub(u16::from(self.data));
        self.update_flag(Flag::Carry, result < 0x100);
        self.set_nz((result & 0xff) as u8);
    }

    fn dec(&mut self) {
        let result = self.data.wrapping_sub(1);
        self.data = result;
        self.set_nz(result);
    }

    fn dex(&mut self) {
        let result = self.regs.x.wrapping_sub(1);
        self.regs.x = result;
        self.set_nz(result);
    }

    fn dey(&mut self) {
        let result = self.regs.y.wrapping_sub(1);
        self.regs.y = result;
        self.set_nz(result);
    }

    fn inc(&mut self) {
        let result = self.data.wrapping_add(1);
        self.data = result;
        self.set_nz(result);
    }

    fn inx(&mut self) {
        let result = self.regs.x.wrapping_add(1);
        self.regs.x = result;
        self.set_nz(result);
    }

    fn iny(&mut self) {
        let result = self.regs.y.wrapping_add(1);
        self.regs.y = result;
        self.set_nz(result);
    }

    fn asl(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, (data & 0x80) != 0);
        let result = data << 1;
        self.data = result;
        self.set_nz(result);
    }

    fn asl_implied(&mut self) {
        let data = self.regs.a;
        self.update_flag(Flag::Carry, (data & 0x80) != 0);
        let result = data << 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn lsr(&mut self) {
        let data = self.data;
        self.update_flag(Flag::Carry, (data & 0x01) != 0);
        let result = data >> 1;
        self.data = result;
        self.set_nz(result);
    }

    fn lsr_implied(&mut self) {
        let data = self.regs.a;
        self.update_flag(Flag::Carry, (data & 0x01) != 0);
        let result = data >> 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn rol(&mut self) {
        self.data = self.rol_value(self.data);
    }

    fn rol_implied(&mut self) {
        self.regs.a = self.rol_value(self.regs.a);
    }

    fn rol_value(&mut self, data: u8) -> u8 {
        let mut temp = (data as u16) << 1;
        if self.test_flag(Flag::Carry) {
            temp |= 0x01
        };
        self.update_flag(Flag::Carry, temp > 0xff);
        let result = (temp & 0xff) as u8;
        self.set_nz(result);
        result
    }

    fn ror(&mut self) {
        self.data = self.ror_value(self.data);
    }

    fn ror_implied(&mut self) {
        self.regs.a = self.ror_value(self.regs.a);
    }

    fn ror_value(&mut self, data: u8) -> u8 {
        let data = data as u16;
        let mut temp = if self.test_flag(Flag::Carry) {
            data | 0x100
        } else {
            data
        };
        self.update_flag(Flag::Carry, temp & 0x01 != 0);
        temp >>= 1;
        let result = (temp & 0xff) as u8;
        self.set_nz(result);
        result
    }

    fn jmp(&mut self) {
        self.regs.pc = make_address(self.address_hi, self.address_lo);
    }

    fn jsr(&mut self) {
        match self.cycle {
            2 => {
                // SP -> Address Bus
            }
            3 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            5 => {
                self.address_hi = self.read_mem(self.regs.pc);
                // Do not increment pc
            }
            6 => {
                self.regs.pc = make_address(self.address_hi, self.address_lo);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rts(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let pcl = self.read_mem(address);
                self.regs.pc = u16::from(pcl);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            4 => {
                let address = make_address(0x01, self.regs.sp);
                let pch = self.read_mem(address);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            5 => {
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn brk(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p | (Flag::Break as u8) | (Flag::Reserved as u8));
                self.select_vector();
            }
            5 => {
                let pcl = self.read_mem(self.vector);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(self.vector.wrapping_add(1));
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rti(&mut self) {
        match self.cycle {
            2 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            3 => {
                let address = make_address(0x01, self.regs.sp);
                let p = self.read_mem(address);
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.regs.p = p;
            }
            4 => {
                let address = make_address(0x01, self.regs.sp);
                let pcl = self.read_mem(address);
                self.regs.pc = u16::from(pcl);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            5 => {
                let address = make_address(0x01, self.regs.sp);
                let pch = self.read_mem(address);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn branch(&mut self, flag: Flag, value: bool) {
        let cond = self.test_flag(flag) == value;
        if cond {
            let offset = self.data as i8;
            let ea = if offset < 0 {
                self.regs.pc.wrapping_sub((offset as i16).abs() as u16)
            } else {
                self.regs.pc.wrapping_add(offset as u16)
            };
            self.page_cross = hi_byte(ea) != hi_byte(self.regs.pc);
            if self.page_cross {
                // Only PCL is updated this cycle; the fix cycle repairs PCH.
                self.data = hi_byte(ea);
                self.regs.pc = make_address(hi_byte(self.regs.pc), lo_byte(ea));
            } else {
                self.regs.pc = ea;
                self.cycle += 1;
            }
        } else {
            self.load_next_program();
        }
    }

    fn branch_fix(&mut self) {
        let _ = self.read_mem(self.regs.pc);
        self.regs.pc = make_address(self.data, lo_byte(self.regs.pc));
    }

    fn nop(&mut self) {}

    fn slo(&mut self) {
        self.update_flag(Flag::Carry, (self.data & 0x80) != 0);
        self.data <<= 1;
        let result = self.regs.a | self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn rla(&mut self) {
        let carry_in = self.test_flag(Flag::Carry);
        self.update_flag(Flag::Carry, (self.data & 0x80) != 0);
        self.data = (self.data << 1) | (carry_in as u8);
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn sre(&mut self) {
        self.update_flag(Flag::Carry, (self.data & 0x01) != 0);
        self.data >>= 1;
        let result = self.regs.a ^ self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn rra(&mut self) {
        let carry_in = self.test_flag(Flag::Carry);
        self.update_flag(Flag::Carry, (self.data & 0x01) != 0);
        self.data = (self.data >> 1) | ((carry_in as u8) << 7);
        let value = self.data;
        self.add_to_accumulator(value);
    }

    fn dcp(&mut self) {
        self.data = self.data.wrapping_sub(1);
        let result = (u16::from(self.regs.a)).wrapping_sub(u16::from(self.data));
        self.update_flag(Flag::Carry, result < 0x100);
        self.set_nz((result & 0xff) as u8);
    }

    fn isc(&mut self) {
        self.data = self.data.wrapping_add(1);
        let value = self.data;
        self.sub_from_accumulator(value);
    }

    fn sax(&mut self) {
        self.data = self.regs.a & self.regs.x;
    }

    fn lax(&mut self) {
        let data = self.data;
        self.regs.a = data;
        self.regs.x = data;
        self.set_nz(data);
    }

    fn anc(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.set_nz(result);
        self.update_flag(Flag::Carry, result & 0x80 != 0);
    }

    fn alr(&mut self) {
        let value = self.regs.a & self.data;
        self.update_flag(Flag::Carry, (value & 0x01) != 0);
        let result = value >> 1;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn arr(&mut self) {
        let value = self.regs.a & self.data;
        let carry_in = self.test_flag(Flag::Carry) as u8;
        let result = (value >> 1) | (carry_in << 7);
        self.update_flag(Flag::Negative, carry_in != 0);
        self.update_flag(Flag::Zero, result == 0);
        if !self.test_flag(Flag::Decimal) {
            self.update_flag(Flag::Carry, result & 0x40 != 0);
            self.update_flag(
                Flag::Overflow,
                ((result >> 6) ^ (result >> 5)) & 0x01 != 0,
            );
            self.regs.a = result;
        } else {
            let mut fixed = result;
            self.update_flag(Flag::Overflow, (value ^ result) & 0x40 != 0);
            if (value & 0x0f) + (value & 0x01) > 0x05 {
                fixed = (fixed & 0xf0) | (fixed.wrapping_add(0x06) & 0x0f);
            }
            if u16::from(value & 0xf0) + u16::from(value & 0x10) > 0x50 {
                self.set_flag(Flag::Carry);
                fixed = fixed.wrapping_add(0x60);
            } else {
                self.clear_flag(Flag::Carry);
            }
            self.regs.a = fixed;
        }
    }

    fn ane(&mut self) {
        let result = self.regs.a & self.regs.x & self.data;
        self.regs.a = result;
        self.set_nz(result);
    }

    fn anx(&mut self) {
        let result = self.regs.a & self.data;
        self.regs.a = result;
        self.regs.x = result;
        self.set_nz(result);
    }

    fn axs(&mut self) {
        let result = ((self.regs.a & self.regs.x) as u16).wrapping_sub(self.data as u16);
        self.update_flag(Flag::Carry, result < 0x100);
        self.regs.x = (result & 0xff) as u8;
        self.set_nz((result & 0xff) as u8);
    }

    fn las(&mut self) {
        let result = self.data & self.regs.sp;
        self.regs.a = result;
        self.regs.x = result;
        self.regs.sp = result;
        self.set_nz(result);
    }

    fn sha(&mut self) {
        self.data = self.regs.a & self.regs.x & self.unstable_mask();
    }

    fn shx(&mut self) {
        self.data = self.regs.x & self.unstable_mask();
    }

    fn shy(&mut self) {
        self.data = self.regs.y & self.unstable_mask();
    }

    fn tas(&mut self) {
        self.regs.sp = self.regs.a & self.regs.x;
        self.data = self.regs.sp & self.unstable_mask();
    }

    /* The stored value of SHA/SHX/SHY/TAS is ANDed with the unincremented
       high address byte plus one, unless a DMA steal ended on the previous
       cycle, in which case the AND drops out. */
    fn unstable_mask(&self) -> u8 {
        if self.rdy_rise_cycle != 0 && self.clock.get() == self.rdy_rise_cycle + 1 {
            0xff
        } else {
            self.address_hi_base.wrapping_add(1)
        }
    }

    fn jam(&mut self) {
        if !self.jammed {
            info!(target: "cpu", "Cpu jam at 0x{:04x}, opcode {:02x}", self.frozen_pc, self.opcode);
        }
        self.jammed = true;
        // Keep replaying this microinstruction.
        self.cycle -= 1;
    }

    // -- Interrupts

    fn select_vector(&mut self) {
        self.vector = if self.nmi_pending.delayed() {
            self.nmi_pending.force(false);
            0xfffa
        } else {
            0xfffe
        };
    }

    fn irq(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p & 0xef);
                self.select_vector();
            }
            5 => {
                let pcl = self.read_mem(self.vector);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(self.vector.wrapping_add(1));
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn nmi(&mut self) {
        match self.cycle {
            2 => {
                self.write_stack(hi_byte(self.regs.pc));
            }
            3 => {
                self.write_stack(lo_byte(self.regs.pc));
            }
            4 => {
                self.write_stack(self.regs.p & 0xef);
            }
            5 => {
                let pcl = self.read_mem(0xfffa);
                self.regs.pc = u16::from(pcl);
            }
            6 => {
                let pch = self.read_mem(0xfffb);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
                self.set_flag(Flag::IntDisable);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    fn rst(&mut self) {
        match self.cycle {
            2 => {}
            3 => {}
            4 => {
                let pcl = self.read_mem(0xfffc);
                self.regs.pc = u16::from(pcl);
            }
            5 => {
                let pch = self.read_mem(0xfffd);
                self.regs.pc = make_address(pch, self.regs.pc as u8);
            }
            _ => panic!("invalid cycle {}", self.cycle),
        }
    }

    // -- Interrupt detectors

    fn poll_interrupts(&mut self) {
        let nmi_low = self.nmi_line.borrow().is_low();
        if nmi_low && !self.nmi_last {
            self.nmi_pending.write(true);
        }
        self.nmi_last = nmi_low;
        self.irq_pending.write(self.irq_line.borrow().is_low());
    }

    fn is_write_cycle(&self) -> bool {
        let pair = self.uops[self.cycle as usize];
        let write_op = |op: MicroOp| match op {
            MicroOp::WriteData => true,
            MicroOp::OpBRK | MicroOp::OpIRQ | MicroOp::OpNMI => {
                (2..=4).contains(&self.cycle)
            }
            MicroOp::OpJSR => (3..=4).contains(&self.cycle),
            MicroOp::OpPHA | MicroOp::OpPHP => self.cycle == 2,
            // The modify cycle of a read-modify-write chain drives the bus.
            MicroOp::OpASL
            | MicroOp::OpLSR
            | MicroOp::OpROL
            | MicroOp::OpROR
            | MicroOp::OpDEC
            | MicroOp::OpINC
            | MicroOp::OpSLO
            | MicroOp::OpRLA
            | MicroOp::OpSRE
            | MicroOp::OpRRA
            | MicroOp::OpDCP
            | MicroOp::OpISC => true,
            _ => false,
        };
        match pair.1 {
            Some(MicroOp::WriteData) => true,
            Some(_) => false,
            None => write_op(pair.0),
        }
    }

    // -- Debugger

    fn log_instruction(&mut self) {
        let entry = InstructionLogEntry {
            pc: self.frozen_pc,
            sp: self.regs.sp,
            a: self.regs.a,
            x: self.regs.x,
            y: self.regs.y,
            p: self.regs.p,
            bytes: [self.opcode, 0, 0],
            len: 1,
        };
        if self.instruction_log.len() < INSTRUCTION_LOG_SIZE {
            self.instruction_log.push(entry);
            self.log_index = self.instruction_log.len() - 1;
        } else {
            self.log_index = (self.log_index + 1) % INSTRUCTION_LOG_SIZE;
            self.instruction_log[self.log_index] = entry;
        }
    }

    fn log_operand(&mut self, value: u8) {
        if let Some(entry) = self.instruction_log.get_mut(self.log_index) {
            if entry.len < 3 {
                entry.bytes[entry.len as usize] = value;
                entry.len += 1;
            }
        }
    }

    fn check_watchpoint(&self, address: u16, value: u8, write: bool) {
        if self.watchpoints.binary_search(&address).is_ok() {
            self.watch_hit.set(Some(WatchpointHit {
                address,
                value,
                write,
            }));
        }
    }

    // -- Flag Ops

    #[inline]
    fn clear_flag(&mut self, flag: Flag) {
        self.regs.p &= !(flag as u8);
    }

    #[inline]
    fn set_flag(&mut self, flag: Flag) {
        self.regs.p |= flag as u8;
    }

    #[inline]
    fn set_nz(&mut self, value: u8) {
        self.update_flag(Flag::Negative, value & 0x80 != 0);
        self.update_flag(Flag::Zero, value == 0);
    }

    #[inline]
    fn update_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.regs.p |= flag as u8;
        } else {
            self.regs.p &= !(flag as u8);
        }
    }

    #[inline]
    fn test_flag(&self, flag: Flag) -> bool {
        (self.regs.p & (flag as u8)) != 0
    }

    // -- Processor Port

    fn read_port_value(&self) -> u8 {
        let port = self.io_port.borrow();
        let direction = port.get_direction();
        let now = self.clock.get();
        let bit_3 = if now < self.discharge_cycle[3] { 0x08 } else { 0x00 };
        let bit_6 = if now < self.discharge_cycle[6] { 0x40 } else { 0x00 };
        let bit_7 = if now < self.discharge_cycle[7] { 0x80 } else { 0x00 };
        // Bit 4 is the cassette switch, fed in by the datassette. Bits 0-2
        // have pull-ups, bit 5 a pull-down.
        let bit_4 = port.get_value() & 0x10;
        let inputs = bit_7 | bit_6 | bit_4 | bit_3 | 0x07;
        (port.get_output() & direction) | (inputs & !direction)
    }

    fn write_port_direction(&mut self, value: u8) {
        let old_direction = self.io_port.borrow().get_direction();
        let output = self.io_port.borrow().get_output();
        for &bit in &[3usize, 6, 7] {
            if value.get_bit(bit) {
                self.discharge_cycle[bit] = 0;
            } else if old_direction.get_bit(bit) && output.get_bit(bit) {
                self.discharge_cycle[bit] = self.clock.get() + DISCHARGE_CYCLES;
            }
        }
        self.io_port.borrow_mut().set_direction(value);
    }

    // -- Memory Ops

    pub fn read_mem(&self, address: u16) -> u8 {
        let value = if self.model == CpuModel::Mos6510 {
            match address {
                0x0000 => self.io_port.borrow().get_direction(),
                0x0001 => self.read_port_value(),
                _ => self.mem.borrow().read(address),
            }
        } else {
            self.mem.borrow().read(address)
        };
        if self.debug_enabled {
            self.check_watchpoint(address, value, false);
        }
        value
    }

    pub fn write_mem(&mut self, address: u16, value: u8) {
        if self.model == CpuModel::Mos6510 {
            match address {
                0x0000 => {
                    self.write_port_direction(value);
                    // The last VIC bus byte lands in the RAM underneath.
                    let bus = self.vic_data_bus.get();
                    self.mem.borrow_mut().write(address, bus);
                }
                0x0001 => {
                    self.io_port.borrow_mut().set_value(value);
                    let bus = self.vic_data_bus.get();
                    self.mem.borrow_mut().write(address, bus);
                }
                _ => self.mem.borrow_mut().write(address, value),
            }
        } else {
            self.mem.borrow_mut().write(address, value);
        }
        if self.debug_enabled {
            self.check_watchpoint(address, value, true);
        }
    }

    #[inline]
    pub fn write_stack(&mut self, value: u8) {
        let address = make_address(0x01, self.regs.sp);
        self.write_mem(address, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }
}

impl Cpu for Cpu6510 {
    fn get_register(&self, reg: Register) -> u8 {
        match reg {
            Register::A => self.regs.a,
            Register::X => self.regs.x,
            Register::Y => self.regs.y,
            Register::SP => self.regs.sp,
            Register::PCL => self.regs.pc as u8,
            Register::PCH => (self.regs.pc >> 8) as u8,
            Register::P => self.regs.p,
        }
    }

    fn set_register(&mut self, reg: Register, value: u8) {
        match reg {
            Register::A => self.regs.a = value,
            Register::X => self.regs.x = value,
            Register::Y => self.regs.y = value,
            Register::SP => self.regs.sp = value,
            Register::PCL => {
                self.regs.pc = (self.regs.pc & 0xff00) | u16::from(value);
            }
            Register::PCH => {
                self.regs.pc = (u16::from(value) << 8) | (self.regs.pc & 0xff);
            }
            Register::P => self.regs.p = value,
        }
    }

    fn get_pc(&self) -> u16 {
        self.regs.pc
    }

    fn set_pc(&mut self, value: u16) {
        self.regs.pc = value;
        self.frozen_pc = value;
        self.program = ProgramId::Start;
        self.uops = load_program(ProgramId::Start);
        self.cycle = 0;
        self.jammed = false;
    }

    fn get_frozen_pc(&self) -> u16 {
        self.frozen_pc
    }

    fn is_jammed(&self) -> bool {
        self.jammed
    }

    fn at_instruction_boundary(&self) -> bool {
        // The opcode fetch counts as cycle 1 of an instruction, so the CPU
        // sits at a clean boundary right after it. Interrupt and reset
        // sequences run to completion first.
        self.cycle == 1 && self.program == ProgramId::Start
    }

    fn clock(&mut self) {
        if self.jammed {
            self.poll_interrupts();
            return;
        }
        let rdy_low = self.rdy_line.borrow().is_low();
        if rdy_low && !self.rdy_was_low {
            self.rdy_fall_cycle = self.clock.get();
        } else if !rdy_low && self.rdy_was_low {
            self.rdy_rise_cycle = self.clock.get();
        }
        self.rdy_was_low = rdy_low;
        if rdy_low && !self.is_write_cycle() {
            // Halted by DMA; the same microinstruction repeats next cycle.
            self.poll_interrupts();
            return;
        }
        let pair = self.uops[self.cycle as usize];
        self.execute(pair.0);
        if let Some(op1) = pair.1 {
            self.execute(op1);
        }
        self.cycle += 1;
        self.poll_interrupts();
    }

    fn reset(&mut self) {
        self.regs.reset();
        self.frozen_pc = 0;
        self.address_hi = 0;
        self.address_hi_base = 0;
        self.address_lo = 0;
        self.data = 0;
        self.page_cross = false;
        self.vector = 0xfffe;
        self.jammed = false;
        self.nmi_last = false;
        self.nmi_pending.force(false);
        self.irq_pending.force(false);
        self.rdy_was_low = false;
        self.rdy_fall_cycle = 0;
        self.rdy_rise_cycle = 0;
        self.discharge_cycle = [0; 8];
        self.instruction_log.clear();
        self.log_index = 0;
        self.irq_line.borrow_mut().reset();
        self.nmi_line.borrow_mut().reset();
        if self.model == CpuModel::Mos6510 {
            self.io_port.borrow_mut().set_value(0xff);
            self.write(0x0000, 0b_0010_1111);
            self.write(0x0001, 0b_0001_1111);
        }
        self.opcode = 0;
        self.program = ProgramId::Reset;
        self.uops = load_program(ProgramId::Reset);
        self.cycle = 0;
    }

    // -- I/O

    fn read(&self, address: u16) -> u8 {
        self.read_mem(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.write_mem(address, value);
    }

    // -- Debugger

    fn set_debug_enabled(&mut self, enabled: bool) {
        self.debug_enabled = enabled;
        if !enabled {
            self.watch_hit.set(None);
        }
    }

    fn set_watchpoints(&mut self, watchpoints: Vec<u16>) {
        self.watchpoints = watchpoints;
        self.watchpoints.sort_unstable();
    }

    fn take_watchpoint_hit(&mut self) -> Option<WatchpointHit> {
        self.watch_hit.take()
    }

    fn recent_instructions(&self) -> Vec<InstructionLogEntry> {
        if self.instruction_log.len() < INSTRUCTION_LOG_SIZE {
            self.instruction_log.clone()
        } else {
            let split = (self.log_index + 1) % INSTRUCTION_LOG_SIZE;
            let mut entries = Vec::with_capacity(INSTRUCTION_LOG_SIZE);
            entries.extend_from_slice(&self.instruction_log[split..]);
            entries.extend_from_slice(&self.instruction_log[..split]);
            entries
        }
    }

    // -- Persistence

    fn save_state(&self, writer: &mut Writer) {
        writer.begin_section(0x01);
        writer.put_u8(self.regs.a);
        writer.put_u8(self.regs.x);
        writer.put_u8(self.regs.y);
        writer.put_u8(self.regs.sp);
        writer.put_u16(self.regs.pc);
        writer.put_u8(self.regs.p);
        writer.put_u16(self.frozen_pc);
        writer.put_u8(self.opcode);
        writer.put_u8(match self.program {
            ProgramId::Start => 0,
            ProgramId::Irq => 1,
            ProgramId::Nmi => 2,
            ProgramId::Reset => 3,
        });
        writer.put_u8(self.cycle);
        writer.put_u8(self.address_lo);
        writer.put_u8(self.address_hi);
        writer.put_u8(self.address_hi_base);
        writer.put_u8(self.data);
        writer.put_bool(self.page_cross);
        writer.put_u16(self.vector);
        writer.put_bool(self.jammed);
        writer.put_bool(self.nmi_last);
        writer.put_bool(self.nmi_pending.delayed());
        writer.put_bool(self.irq_pending.delayed());
        writer.put_u64(self.rdy_fall_cycle);
        writer.put_u64(self.rdy_rise_cycle);
        writer.put_bool(self.rdy_was_low);
        writer.put_u64(self.discharge_cycle[3]);
        writer.put_u64(self.discharge_cycle[6]);
        writer.put_u64(self.discharge_cycle[7]);
        writer.put_u8(self.io_port.borrow().get_direction());
        writer.put_u8(self.io_port.borrow().get_output());
    }

    fn restore_state(&mut self, reader: &mut Reader) -> Result<(), SnapshotError> {
        reader.expect_section(0x01)?;
        self.regs.a = reader.get_u8()?;
        self.regs.x = reader.get_u8()?;
        self.regs.y = reader.get_u8()?;
        self.regs.sp = reader.get_u8()?;
        self.regs.pc = reader.get_u16()?;
        self.regs.p = reader.get_u8()?;
        self.frozen_pc = reader.get_u16()?;
        self.opcode = reader.get_u8()?;
        self.program = match reader.get_u8()? {
            0 => ProgramId::Start,
            1 => ProgramId::Irq,
            2 => ProgramId::Nmi,
            3 => ProgramId::Reset,
            _ => return Err(SnapshotError::InvalidValue),
        };
        self.uops = if self.program == ProgramId::Start {
            decode_opcode(self.opcode)
        } else {
            load_program(self.program)
        };
        self.cycle = reader.get_u8()?;
        if self.cycle as usize >= self.uops.len() {
            return Err(SnapshotError::InvalidValue);
        }
        self.address_lo = reader.get_u8()?;
        self.address_hi = reader.get_u8()?;
        self.address_hi_base = reader.get_u8()?;
        self.data = reader.get_u8()?;
        self.page_cross = reader.get_bool()?;
        self.vector = reader.get_u16()?;
        self.jammed = reader.get_bool()?;
        self.nmi_last = reader.get_bool()?;
        let nmi_pending = reader.get_bool()?;
        self.nmi_pending.force(nmi_pending);
        let irq_pending = reader.get_bool()?;
        self.irq_pending.force(irq_pending);
        self.rdy_fall_cycle = reader.get_u64()?;
        self.rdy_rise_cycle = reader.get_u64()?;
        self.rdy_was_low = reader.get_bool()?;
        self.discharge_cycle[3] = reader.get_u64()?;
        self.discharge_cycle[6] = reader.get_u64()?;
        self.discharge_cycle[7] = reader.get_u64()?;
        let direction = reader.get_u8()?;
        let output = reader.get_u8()?;
        self.io_port.borrow_mut().set_direction(direction);
        self.io_port.borrow_mut().set_value(output);
        Ok(())
    }

    fn validate_state(&self, reader: &mut Reader) -> Result<(), SnapshotError> {
        reader.expect_section(0x01)?;
        for _ in 0..4 {
            reader.get_u8()?; // a, x, y, sp
        }
        reader.get_u16()?; // pc
        reader.get_u8()?; // p
        reader.get_u16()?; // frozen pc
        let opcode = reader.get_u8()?;
        let program = match reader.get_u8()? {
            0 => ProgramId::Start,
            1 => ProgramId::Irq,
            2 => ProgramId::Nmi,
            3 => ProgramId::Reset,
            _ => return Err(SnapshotError::InvalidValue),
        };
        let uops = if program == ProgramId::Start {
            decode_opcode(opcode)
        } else {
            load_program(program)
        };
        let cycle = reader.get_u8()?;
        if cycle as usize >= uops.len() {
            return Err(SnapshotError::InvalidValue);
        }
        for _ in 0..4 {
            reader.get_u8()?; // address latches, data
        }
        reader.get_bool()?; // page cross
        reader.get_u16()?; // vector
        for _ in 0..4 {
            reader.get_bool()?; // jammed, nmi last, nmi pending, irq pending
        }
        reader.get_u64()?; // rdy fall cycle
        reader.get_u64()?; // rdy rise cycle
        reader.get_bool()?; // rdy was low
        for _ in 0..3 {
            reader.get_u64()?; // discharge deadlines
        }
        reader.get_u8()?; // port direction
        reader.get_u8()?; // port output
        Ok(())
    }
}

impl fmt::Display for Cpu6510 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x} {}{}{}{}{}{}{}",
            self.regs.a,
            self.regs.x,
            self.regs.y,
            self.regs.sp,
            if (self.regs.p & Flag::Negative as u8) != 0 { "N" } else { "n" },
            if (self.regs.p & Flag::Overflow as u8) != 0 { "V" } else { "v" },
            if (self.regs.p & Flag::Break as u8) != 0 { "B" } else { "b" },
            if (self.regs.p & Flag::Decimal as u8) != 0 { "D" } else { "d" },
            if (self.regs.p & Flag::IntDisable as u8) != 0 { "I" } else { "i" },
            if (self.regs.p & Flag::Zero as u8) != 0 { "Z" } else { "z" },
            if (self.regs.p & Flag::Carry as u8) != 0 { "C" } else { "c" }
        )
    }
}

#[inline]
fn make_address(hi: u8, lo: u8) -> u16 {
    u16::from(hi) << 8 | u16::from(lo)
}

#[inline]
fn lo_byte(data: u16) -> u8 {
    data as u8
}

#[inline]
fn hi_byte(data: u16) -> u8 {
    (data >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{new_shared, new_shared_cell, Ram};

    struct MockMemory {
        ram: Ram,
    }

    impl Addressable for MockMemory {
        fn read(&self, address: u16) -> u8 {
            self.ram.read(address)
        }

        fn write(&mut self, address: u16, value: u8) {
            self.ram.write(address, value);
        }
    }

    struct TestBench {
        clock: Rc<Clock>,
        cpu: Cpu6510,
        irq_line: Shared<IrqLine>,
        nmi_line: Shared<IrqLine>,
        rdy_line: Shared<IrqLine>,
    }

    impl TestBench {
        fn step(&mut self) {
            self.cpu.clock();
            self.clock.tick();
        }

        fn step_instruction(&mut self) -> u32 {
            let mut cycles = 0;
            loop {
                self.step();
                cycles += 1;
                if self.cpu.at_instruction_boundary() || self.cpu.is_jammed() {
                    break;
                }
            }
            cycles
        }

        fn load(&mut self, program: &[u8], offset: u16) {
            for (i, byte) in program.iter().enumerate() {
                self.cpu.write(offset.wrapping_add(i as u16), *byte);
            }
            self.cpu.set_pc(offset);
        }
    }

    fn setup_cpu() -> TestBench {
        let clock = Rc::new(Clock::new());
        let rdy_line = new_shared(IrqLine::new("rdy"));
        let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));
        let vic_data_bus = new_shared_cell(0u8);
        let mem = new_shared(MockMemory {
            ram: Ram::new(0x10000),
        });
        let cpu = Cpu6510::new(
            CpuModel::Mos6510,
            mem,
            cpu_io_port,
            rdy_line.clone(),
            irq_line.clone(),
            nmi_line.clone(),
            vic_data_bus,
            clock.clone(),
        );
        TestBench {
            clock,
            cpu,
            irq_line,
            nmi_line,
            rdy_line,
        }
    }

    #[test]
    fn lda_immediate() {
        let mut bench = setup_cpu();
        bench.load(&[0xa9, 0x42], 0x1000);
        bench.step(); // initial fetch
        let cycles = bench.step_instruction();
        assert_eq!(2, cycles);
        assert_eq!(0x42, bench.cpu.get_register(Register::A));
    }

    #[test]
    fn branch_taken_page_cross_takes_four_cycles() {
        let mut bench = setup_cpu();
        // BNE +4 from 0xc0fe with Z clear crosses into 0xc104.
        bench.load(&[0xd0, 0x04], 0xc0fe);
        bench.step();
        let cycles = bench.step_instruction();
        assert_eq!(4, cycles);
        assert_eq!(0xc104, bench.cpu.get_pc());
    }

    #[test]
    fn branch_taken_same_page_takes_three_cycles() {
        let mut bench = setup_cpu();
        bench.load(&[0xd0, 0x02], 0x1000);
        bench.step();
        let cycles = bench.step_instruction();
        assert_eq!(3, cycles);
        assert_eq!(0x1004, bench.cpu.get_pc());
    }

    #[test]
    fn branch_not_taken_takes_two_cycles() {
        let mut bench = setup_cpu();
        bench.cpu.set_register(Register::P, Flag::Zero as u8);
        bench.load(&[0xd0, 0x02], 0x1000);
        bench.step();
        let cycles = bench.step_instruction();
        assert_eq!(2, cycles);
        assert_eq!(0x1002, bench.cpu.get_pc());
    }

    #[test]
    fn adc_bcd() {
        let mut bench = setup_cpu();
        bench.cpu.set_register(Register::A, 0x28);
        bench.cpu.set_register(Register::P, Flag::Decimal as u8);
        bench.load(&[0x69, 0x14], 0x1000);
        bench.step();
        bench.step_instruction();
        assert_eq!(0x42, bench.cpu.get_register(Register::A));
        let p = bench.cpu.get_register(Register::P);
        assert_eq!(0, p & Flag::Carry as u8);
        assert_eq!(0, p & Flag::Zero as u8);
        assert_eq!(0, p & Flag::Negative as u8);
        assert_eq!(0, p & Flag::Overflow as u8);
    }

    #[test]
    fn jam_opcode_halts_cpu() {
        let mut bench = setup_cpu();
        bench.load(&[0x02], 0x1000);
        bench.step();
        bench.step_instruction();
        assert!(bench.cpu.is_jammed());
        let pc = bench.cpu.get_pc();
        for _ in 0..8 {
            bench.step();
        }
        assert!(bench.cpu.is_jammed());
        assert_eq!(pc, bench.cpu.get_pc());
    }

    #[test]
    fn frozen_pc_tracks_instruction_start() {
        let mut bench = setup_cpu();
        bench.load(&[0xea, 0xa9, 0x01], 0x2000);
        bench.step();
        assert_eq!(0x2000, bench.cpu.get_frozen_pc());
        bench.step_instruction();
        // Mid-instruction, the frozen pc still points at the lda opcode.
        bench.step();
        assert_eq!(0x2001, bench.cpu.get_frozen_pc());
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let mut bench = setup_cpu();
        // Vector at $fffa points to a nop slide.
        bench.cpu.write(0xfffa, 0x00);
        bench.cpu.write(0xfffb, 0x30);
        for addr in 0x3000..0x3010u16 {
            bench.cpu.write(addr, 0xea);
        }
        bench.load(&[0xea, 0xea, 0xea, 0xea, 0xea, 0xea, 0xea, 0xea], 0x1000);
        bench.step();
        bench.nmi_line.borrow_mut().set_low(0, true);
        // Keep the line held low. Exactly one NMI sequence must run.
        let mut entries = 0;
        for _ in 0..60 {
            bench.step();
            if bench.cpu.get_frozen_pc() == 0x3000 && bench.cpu.at_instruction_boundary() {
                entries += 1;
            }
        }
        assert_eq!(1, entries);
    }

    #[test]
    fn nmi_hijacks_brk_vector() {
        let mut bench = setup_cpu();
        // IRQ/BRK vector -> $2000, NMI vector -> $3000.
        bench.cpu.write(0xfffe, 0x00);
        bench.cpu.write(0xffff, 0x20);
        bench.cpu.write(0xfffa, 0x00);
        bench.cpu.write(0xfffb, 0x30);
        for addr in 0x2000..0x2010u16 {
            bench.cpu.write(addr, 0xea);
        }
        for addr in 0x3000..0x3010u16 {
            bench.cpu.write(addr, 0xea);
        }
        bench.load(&[0x00], 0x1000);
        bench.step(); // fetch brk
        // The edge arrives between the stack pushes; the sequence must
        // divert to the nmi vector.
        bench.nmi_line.borrow_mut().set_low(0, true);
        let cycles = bench.step_instruction();
        assert_eq!(7, cycles);
        assert_eq!(0x3000, bench.cpu.get_frozen_pc());
        // The consumed edge must not retrigger another nmi sequence.
        bench.step_instruction();
        assert_eq!(0x3001, bench.cpu.get_frozen_pc());
    }

    #[test]
    fn sha_stores_masked_value() {
        let mut bench = setup_cpu();
        bench.cpu.set_register(Register::A, 0x33);
        bench.cpu.set_register(Register::X, 0x55);
        bench.cpu.set_register(Register::Y, 0x05);
        // sha $20f0,y
        bench.load(&[0x9f, 0xf0, 0x20], 0x1000);
        bench.step();
        bench.step_instruction();
        assert_eq!(0x33 & 0x55 & 0x21, bench.cpu.read(0x20f5));
    }

    #[test]
    fn irq_requires_interrupt_enable() {
        let mut bench = setup_cpu();
        bench.cpu.write(0xfffe, 0x00);
        bench.cpu.write(0xffff, 0x30);
        for addr in 0x3000..0x3010u16 {
            bench.cpu.write(addr, 0xea);
        }
        bench.load(&[0xea, 0xea, 0xea, 0xea], 0x1000);
        bench.cpu.set_register(Register::P, Flag::IntDisable as u8);
        bench.step();
        bench.irq_line.borrow_mut().set_low(0, true);
        for _ in 0..12 {
            bench.step();
        }
        assert_ne!(0x3000, bench.cpu.get_frozen_pc());
    }

    #[test]
    fn rdy_stalls_read_cycles() {
        let mut bench = setup_cpu();
        bench.load(&[0xa9, 0x42, 0xa9, 0x43], 0x1000);
        bench.step();
        bench.rdy_line.borrow_mut().set_low(0, true);
        let pc = bench.cpu.get_pc();
        for _ in 0..10 {
            bench.step();
        }
        assert_eq!(pc, bench.cpu.get_pc());
        bench.rdy_line.borrow_mut().set_low(0, false);
        bench.step_instruction();
        assert_eq!(0x42, bench.cpu.get_register(Register::A));
    }

    #[test]
    fn rdy_does_not_stall_write_cycles() {
        let mut bench = setup_cpu();
        // STA $2000 has its write on the final cycle.
        bench.cpu.set_register(Register::A, 0x55);
        bench.load(&[0x8d, 0x00, 0x20], 0x1000);
        bench.step();
        bench.step(); // adl
        bench.step(); // adh
        bench.rdy_line.borrow_mut().set_low(0, true);
        bench.step(); // write proceeds despite rdy
        assert_eq!(0x55, bench.cpu.read(0x2000));
    }

    #[test]
    fn sta_absolute_x_always_takes_five_cycles() {
        let mut bench = setup_cpu();
        bench.cpu.set_register(Register::A, 0x99);
        bench.cpu.set_register(Register::X, 0x01);
        bench.load(&[0x9d, 0x00, 0x20], 0x1000);
        bench.step();
        assert_eq!(5, bench.step_instruction());
        assert_eq!(0x99, bench.cpu.read(0x2001));
    }

    #[test]
    fn lda_absolute_x_page_cross_penalty() {
        let mut bench = setup_cpu();
        bench.cpu.write(0x2100, 0x77);
        bench.cpu.set_register(Register::X, 0x01);
        bench.load(&[0xbd, 0xff, 0x20], 0x1000);
        bench.step();
        assert_eq!(5, bench.step_instruction());
        assert_eq!(0x77, bench.cpu.get_register(Register::A));
    }

    #[test]
    fn lda_absolute_x_no_cross() {
        let mut bench = setup_cpu();
        bench.cpu.write(0x2001, 0x77);
        bench.cpu.set_register(Register::X, 0x01);
        bench.load(&[0xbd, 0x00, 0x20], 0x1000);
        bench.step();
        assert_eq!(4, bench.step_instruction());
        assert_eq!(0x77, bench.cpu.get_register(Register::A));
    }

    #[test]
    fn port_floating_bits_discharge() {
        let mut bench = setup_cpu();
        // Drive bits 6/7 high as outputs, then flip them to inputs.
        bench.cpu.write(0x0000, 0xff);
        bench.cpu.write(0x0001, 0xff);
        bench.cpu.write(0x0000, 0x00);
        let value = bench.cpu.read(0x0001);
        assert_eq!(0xc0, value & 0xc0);
        bench.clock.tick_delta(DISCHARGE_CYCLES + 1);
        let value = bench.cpu.read(0x0001);
        assert_eq!(0x00, value & 0xc0);
    }

    #[test]
    fn dcp_subtracts_and_compares() {
        let mut bench = setup_cpu();
        bench.cpu.write(0x0080, 0x11);
        bench.cpu.set_register(Register::A, 0x10);
        bench.load(&[0xc7, 0x80], 0x1000);
        bench.step();
        assert_eq!(5, bench.step_instruction());
        assert_eq!(0x10, bench.cpu.read(0x0080));
        let p = bench.cpu.get_register(Register::P);
        assert_ne!(0, p & Flag::Zero as u8);
        assert_ne!(0, p & Flag::Carry as u8);
    }

    #[test]
    fn slo_shifts_then_ors() {
        let mut bench = setup_cpu();
        bench.cpu.write(0x0080, 0x41);
        bench.cpu.set_register(Register::A, 0x01);
        bench.load(&[0x07, 0x80], 0x1000);
        bench.step();
        bench.step_instruction();
        assert_eq!(0x82, bench.cpu.read(0x0080));
        assert_eq!(0x83, bench.cpu.get_register(Register::A));
    }

    #[test]
    fn instruction_log_records_bytes() {
        let mut bench = setup_cpu();
        bench.cpu.set_debug_enabled(true);
        bench.load(&[0xa9, 0x42, 0x8d, 0x00, 0x20], 0x1000);
        bench.step();
        bench.step_instruction();
        bench.step_instruction();
        let log = bench.cpu.recent_instructions();
        // The trailing entry belongs to the already-fetched next opcode.
        assert_eq!(3, log.len());
        assert_eq!([0xa9, 0x42, 0x00], log[0].bytes);
        assert_eq!(2, log[0].len);
        assert_eq!([0x8d, 0x00, 0x20], log[1].bytes);
        assert_eq!(3, log[1].len);
    }

    #[test]
    fn watchpoint_hit_on_write() {
        let mut bench = setup_cpu();
        bench.cpu.set_debug_enabled(true);
        bench.cpu.set_watchpoints(vec![0x2000]);
        bench.cpu.set_register(Register::A, 0x55);
        bench.load(&[0x8d, 0x00, 0x20], 0x1000);
        bench.step();
        bench.step_instruction();
        let hit = bench.cpu.take_watchpoint_hit().unwrap();
        assert_eq!(0x2000, hit.address);
        assert_eq!(0x55, hit.value);
        assert!(hit.write);
    }
}
