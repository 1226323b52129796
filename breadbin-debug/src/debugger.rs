// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use breadbin_core::factory::Register;
use breadbin_system::{C64, ExecState};

use crate::disassembler::Disassembler;

// Design:
//   The debugger is a command interpreter over a paused machine. A front end
//   turns user input into Command values; the results come back as typed
//   CommandResult payloads so each front end renders them its own way.

#[derive(Debug)]
pub enum Command {
    // Breakpoints
    BpClear,
    BpDisable(u16),
    BpDisableAll,
    BpEnable(u16),
    BpEnableAll,
    BpIgnore(u16, u16),
    BpList,
    BpRemove(u16),
    BpSet(u16, bool),
    // Watchpoints
    WpSet(u16),
    WpRemove(u16),
    // Execution
    Step,
    StepLine,
    StepFrame,
    // Registers
    RegRead,
    RegWrite(Vec<RegOp>),
    // Memory
    MemRead(u16, u16),
    MemWrite(u16, Vec<u8>),
    Disassemble(u16, u16),
    InstructionLog,
    // System
    SysReset(bool),
    SysStopwatch(bool),
}

#[derive(Debug)]
pub enum RegOp {
    SetA(u8),
    SetX(u8),
    SetY(u8),
    SetP(u8),
    SetSP(u8),
    SetPC(u16),
}

#[derive(Debug, PartialEq)]
pub struct RegData {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
    pub port_00: u8,
    pub port_01: u8,
}

#[derive(Debug, PartialEq)]
pub enum CommandResult {
    Unit,
    Text(String),
    Buffer(Vec<u8>),
    Registers(RegData),
    Number(u64),
    Error(String),
}

pub struct Debugger;

impl Debugger {
    pub fn execute(c64: &mut C64, command: &Command) -> CommandResult {
        match Self::execute_internal(c64, command) {
            Ok(result) => result,
            Err(error) => CommandResult::Error(error),
        }
    }

    fn execute_internal(c64: &mut C64, command: &Command) -> Result<CommandResult, String> {
        match *command {
            Command::BpClear => {
                c64.get_bpm_mut().clear();
                Ok(CommandResult::Unit)
            }
            Command::BpDisable(index) => {
                c64.get_bpm_mut().set_enabled(index, false)?;
                Ok(CommandResult::Unit)
            }
            Command::BpDisableAll => {
                c64.get_bpm_mut().enable_all(false);
                Ok(CommandResult::Unit)
            }
            Command::BpEnable(index) => {
                c64.get_bpm_mut().set_enabled(index, true)?;
                Ok(CommandResult::Unit)
            }
            Command::BpEnableAll => {
                c64.get_bpm_mut().enable_all(true);
                Ok(CommandResult::Unit)
            }
            Command::BpIgnore(index, count) => {
                c64.get_bpm_mut().ignore(index, count)?;
                Ok(CommandResult::Unit)
            }
            Command::BpList => {
                let mut buffer = String::new();
                for bp in c64.get_bpm().list() {
                    buffer.push_str(
                        format!(
                            "Bp {}: ${:04x}{}\n",
                            bp.index,
                            bp.address,
                            if bp.enabled { "" } else { " disabled" },
                        )
                        .as_str(),
                    );
                }
                if buffer.is_empty() {
                    buffer.push_str("No breakpoints are set\n");
                }
                Ok(CommandResult::Text(buffer))
            }
            Command::BpRemove(index) => {
                c64.get_bpm_mut().remove(index)?;
                Ok(CommandResult::Unit)
            }
            Command::BpSet(address, autodelete) => {
                let index = c64.get_bpm_mut().set(address, autodelete);
                Ok(CommandResult::Text(format!(
                    "Bp {}: ${:04x}\n",
                    index, address
                )))
            }
            Command::WpSet(address) => {
                c64.get_bpm_mut().set_watchpoint(address);
                c64.sync_debugger();
                Ok(CommandResult::Unit)
            }
            Command::WpRemove(address) => {
                c64.get_bpm_mut().remove_watchpoint(address);
                c64.sync_debugger();
                Ok(CommandResult::Unit)
            }
            Command::Step => {
                let state = c64.step_one_instruction();
                Ok(CommandResult::Number((state == ExecState::Halted) as u64))
            }
            Command::StepLine => {
                let state = c64.step_one_line();
                Ok(CommandResult::Number((state == ExecState::Halted) as u64))
            }
            Command::StepFrame => {
                let state = c64.step_one_frame();
                c64.reset_vsync();
                Ok(CommandResult::Number((state == ExecState::Halted) as u64))
            }
            Command::RegRead => {
                let cpu = c64.get_cpu();
                let regs = RegData {
                    a: cpu.get_register(Register::A),
                    x: cpu.get_register(Register::X),
                    y: cpu.get_register(Register::Y),
                    p: cpu.get_register(Register::P),
                    sp: cpu.get_register(Register::SP),
                    pc: cpu.get_pc(),
                    port_00: cpu.read(0x00),
                    port_01: cpu.read(0x01),
                };
                Ok(CommandResult::Registers(regs))
            }
            Command::RegWrite(ref ops) => {
                let cpu = c64.get_cpu_mut();
                for op in ops {
                    match *op {
                        RegOp::SetA(value) => cpu.set_register(Register::A, value),
                        RegOp::SetX(value) => cpu.set_register(Register::X, value),
                        RegOp::SetY(value) => cpu.set_register(Register::Y, value),
                        RegOp::SetP(value) => cpu.set_register(Register::P, value),
                        RegOp::SetSP(value) => cpu.set_register(Register::SP, value),
                        RegOp::SetPC(value) => cpu.set_pc(value),
                    }
                }
                Ok(CommandResult::Unit)
            }
            Command::MemRead(start, end) => {
                let cpu = c64.get_cpu();
                let mut buffer = Vec::new();
                let mut address = start;
                while address < end {
                    buffer.push(cpu.read(address));
                    address = address.wrapping_add(1);
                }
                Ok(CommandResult::Buffer(buffer))
            }
            Command::MemWrite(address, ref data) => {
                c64.load_ram(data, address);
                Ok(CommandResult::Unit)
            }
            Command::Disassemble(start, count) => {
                let cpu = c64.get_cpu();
                let mut data = Vec::new();
                for i in 0..(count as usize * 3) {
                    data.push(cpu.read(start.wrapping_add(i as u16)));
                }
                let dasm = Disassembler::new(data, start);
                let mut buffer = String::new();
                let mut address = start;
                for _ in 0..count {
                    let (instruction, length) = dasm.disassemble(address);
                    buffer.push_str(format!("${:04x}  {}\n", address, instruction).as_str());
                    address = address.wrapping_add(length as u16);
                }
                Ok(CommandResult::Text(buffer))
            }
            Command::InstructionLog => {
                let entries = c64.get_cpu().recent_instructions();
                let mut buffer = String::new();
                for entry in entries {
                    let dasm = Disassembler::new(entry.bytes.to_vec(), entry.pc);
                    let (instruction, _) = dasm.disassemble(entry.pc);
                    buffer.push_str(
                        format!(
                            "${:04x}  {:<12} a={:02x} x={:02x} y={:02x} sp={:02x} p={:02x}\n",
                            entry.pc, format!("{}", instruction), entry.a, entry.x, entry.y,
                            entry.sp, entry.p
                        )
                        .as_str(),
                    );
                }
                Ok(CommandResult::Text(buffer))
            }
            Command::SysReset(hard) => {
                c64.reset(hard);
                Ok(CommandResult::Unit)
            }
            Command::SysStopwatch(reset) => {
                let clock = c64.get_clock();
                if reset {
                    clock.reset();
                }
                Ok(CommandResult::Number(clock.get()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadbin_core::factory::SystemModel;
    use breadbin_system::Config;
    use std::rc::Rc;

    fn setup_c64() -> C64 {
        let config = Rc::new(Config::new(SystemModel::from("pal")));
        let mut c64 = C64::build(config);
        c64.reset(false);
        c64
    }

    #[test]
    fn breakpoint_lifecycle() {
        let mut c64 = setup_c64();
        let result = Debugger::execute(&mut c64, &Command::BpSet(0x1000, false));
        assert_eq!(CommandResult::Text("Bp 1: $1000\n".to_string()), result);
        let result = Debugger::execute(&mut c64, &Command::BpRemove(1));
        assert_eq!(CommandResult::Unit, result);
        let result = Debugger::execute(&mut c64, &Command::BpList);
        assert_eq!(
            CommandResult::Text("No breakpoints are set\n".to_string()),
            result
        );
    }

    #[test]
    fn watchpoint_toggles_cpu_fast_path() {
        let mut c64 = setup_c64();
        Debugger::execute(&mut c64, &Command::WpSet(0x2000));
        Debugger::execute(&mut c64, &Command::WpRemove(0x2000));
        // Clearing the last watchpoint must restore the fast path; a further
        // run does not stop.
        let result = Debugger::execute(&mut c64, &Command::Step);
        assert_eq!(CommandResult::Number(0), result);
    }

    #[test]
    fn mem_write_and_read_round_trip() {
        let mut c64 = setup_c64();
        Debugger::execute(&mut c64, &Command::MemWrite(0x2000, vec![0xde, 0xad]));
        let result = Debugger::execute(&mut c64, &Command::MemRead(0x2000, 0x2002));
        assert_eq!(CommandResult::Buffer(vec![0xde, 0xad]), result);
    }

    #[test]
    fn reg_write_updates_cpu() {
        let mut c64 = setup_c64();
        Debugger::execute(
            &mut c64,
            &Command::RegWrite(vec![RegOp::SetA(0x42), RegOp::SetPC(0x1234)]),
        );
        if let CommandResult::Registers(regs) = Debugger::execute(&mut c64, &Command::RegRead) {
            assert_eq!(0x42, regs.a);
            assert_eq!(0x1234, regs.pc);
        } else {
            panic!("expected registers");
        }
    }

    #[test]
    fn disassemble_formats_listing() {
        let mut c64 = setup_c64();
        Debugger::execute(&mut c64, &Command::MemWrite(0x2000, vec![0xa9, 0x01, 0xea]));
        let result = Debugger::execute(&mut c64, &Command::Disassemble(0x2000, 2));
        assert_eq!(
            CommandResult::Text("$2000  LDA #$01\n$2002  NOP\n".to_string()),
            result
        );
    }
}
