// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use breadbin_core::cpu::{Cpu6510, CpuModel};
use breadbin_core::factory::{Addressable, Cpu};
use breadbin_core::util::{new_shared, new_shared_cell, Clock, IoPort, IrqLine, Ram};

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
}

impl TestBench {
    fn new() -> Self {
        let clock = Rc::new(Clock::new());
        let cpu = Cpu6510::new(
            CpuModel::Mos6510,
            new_shared(MockMemory {
                ram: Ram::new(0x10000),
            }),
            new_shared(IoPort::new(0x00, 0xff)),
            new_shared(IrqLine::new("rdy")),
            new_shared(IrqLine::new("irq")),
            new_shared(IrqLine::new("nmi")),
            new_shared_cell(0u8),
            clock.clone(),
        );
        TestBench { clock, cpu }
    }

    fn step(&mut self) {
        self.cpu.clock();
        self.clock.tick();
    }

    fn run_instruction(&mut self) -> u32 {
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
}

// Based on 65xx Processor Data from http://www.romhacking.net/documents/318/
// Operands are $20/$2020 and X/Y are zero, so no page boundary penalties
// apply. Branches run with P = $00: BPL/BVC/BCC/BNE are taken into the same
// page (3 cycles), the others fall through (2 cycles). Jam opcodes are 0.

#[cfg_attr(rustfmt, rustfmt_skip)]
const OPCODE_TIMING: [u8; 256] = [
    7, 6, 0, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6, // 00
    3, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 10
    6, 6, 0, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6, // 20
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 30
    6, 6, 0, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6, // 40
    3, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 50
    6, 6, 0, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6, // 60
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 70
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // 80
    3, 6, 0, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5, // 90
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // a0
    2, 5, 0, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4, // b0
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // c0
    3, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // d0
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // e0
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // f0
];

#[test]
fn opcode_cycle_counts() {
    for opcode in 0..=255u8 {
        let expected = OPCODE_TIMING[opcode as usize];
        if expected == 0 {
            continue;
        }
        let mut bench = TestBench::new();
        bench.cpu.write(0x0800, opcode);
        bench.cpu.write(0x0801, 0x20);
        bench.cpu.write(0x0802, 0x20);
        bench.cpu.set_pc(0x0800);
        bench.step(); // opcode fetch
        let cycles = bench.run_instruction();
        assert_eq!(
            u32::from(expected),
            cycles,
            "opcode {:02x} took {} cycles, expected {}",
            opcode,
            cycles,
            expected
        );
    }
}

#[test]
fn jam_opcodes_never_complete() {
    for &opcode in &[
        0x02u8, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xb2, 0xd2, 0xf2,
    ] {
        let mut bench = TestBench::new();
        bench.cpu.write(0x0800, opcode);
        bench.cpu.set_pc(0x0800);
        bench.step();
        bench.run_instruction();
        assert!(bench.cpu.is_jammed(), "opcode {:02x} should jam", opcode);
    }
}

#[test]
fn page_cross_penalty_on_indexed_reads() {
    // lda $20ff,x with x=1 crosses into $2100.
    let mut bench = TestBench::new();
    bench.cpu.write(0x0800, 0xbd);
    bench.cpu.write(0x0801, 0xff);
    bench.cpu.write(0x0802, 0x20);
    bench.cpu.set_register(breadbin_core::factory::Register::X, 0x01);
    bench.cpu.set_pc(0x0800);
    bench.step();
    assert_eq!(5, bench.run_instruction());
}

#[test]
fn branch_page_cross_costs_two_extra() {
    // bne from $c0fe with offset +4 lands at $c104 (4 cycles).
    let mut bench = TestBench::new();
    bench.cpu.write(0xc0fe, 0xd0);
    bench.cpu.write(0xc0ff, 0x04);
    bench.cpu.set_pc(0xc0fe);
    bench.step();
    assert_eq!(4, bench.run_instruction());
    assert_eq!(0xc104, bench.cpu.get_pc());
}
