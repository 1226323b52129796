// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::time::Duration;

use breadbin_core::factory::{RomKind, SystemModel};
use breadbin_system::{C64, Command, Config, Error, ExecState, ExecutionEngine, Message};

/// Cycles of one PAL frame.
const PAL_FRAME_CYCLES: u64 = 312 * 63;

/// Synthetic ROM set: the kernal carries a reset vector of $FCE2 pointing at
/// a jmp-to-self loop, so the machine settles into a known steady state.
fn test_roms() -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
    let basic = vec![0x00; 0x2000];
    let charset = vec![0x00; 0x1000];
    let mut kernal = vec![0xea; 0x2000];
    // Reset vector at $fffc/$fffd -> $fce2.
    kernal[0x1ffc] = 0xe2;
    kernal[0x1ffd] = 0xfc;
    // IRQ/NMI vectors point at an rti.
    kernal[0x1ffa] = 0xf0;
    kernal[0x1ffb] = 0xfc;
    kernal[0x1ffe] = 0xf0;
    kernal[0x1fff] = 0xfc;
    kernal[0x1cf0] = 0x40; // rti at $fcf0
    // jmp $fce2 at $fce2
    kernal[0x1ce2] = 0x4c;
    kernal[0x1ce3] = 0xe2;
    kernal[0x1ce4] = 0xfc;
    let mut drive_rom = vec![0xea; 0x4000];
    // Drive reset vector -> $c000, which holds a jmp-to-self loop.
    drive_rom[0x3ffc] = 0x00;
    drive_rom[0x3ffd] = 0xc0;
    drive_rom[0x0000] = 0x4c;
    drive_rom[0x0001] = 0x00;
    drive_rom[0x0002] = 0xc0;
    (basic, charset, kernal, drive_rom)
}

fn setup_c64() -> C64 {
    let (basic, charset, kernal, drive) = test_roms();
    let mut config = Config::new_with_roms(SystemModel::from("pal"), &basic, &charset, &kernal);
    config.roms.drive = drive;
    let mut c64 = C64::build(Rc::new(config));
    c64.reset(false);
    c64
}

#[test]
fn reset_fetches_vector_from_fffc() {
    let mut c64 = setup_c64();
    // Run the reset sequence to the first opcode fetch.
    while !c64.get_cpu().at_instruction_boundary() {
        c64.step_one_cycle();
    }
    assert_eq!(0xfce2, c64.get_cpu().get_frozen_pc());
}

#[test]
fn frame_takes_exact_cycle_count() {
    let mut c64 = setup_c64();
    assert_eq!(ExecState::Continue, c64.step_one_frame());
    assert_eq!(PAL_FRAME_CYCLES, c64.get_cycles());
    c64.reset_vsync();
    assert_eq!(ExecState::Continue, c64.step_one_frame());
    assert_eq!(2 * PAL_FRAME_CYCLES, c64.get_cycles());
}

#[test]
fn line_takes_63_cycles() {
    let mut c64 = setup_c64();
    assert_eq!(ExecState::Continue, c64.step_one_line());
    assert_eq!(63, c64.get_cycles());
}

#[test]
fn jam_opcode_halts_machine_and_reports() {
    let mut c64 = setup_c64();
    c64.load_ram(&[0x02], 0x1000);
    c64.get_cpu_mut().set_pc(0x1000);
    let mut state = ExecState::Continue;
    for _ in 0..8 {
        state = c64.step_one_cycle();
        if state == ExecState::Halted {
            break;
        }
    }
    assert_eq!(ExecState::Halted, state);
    assert!(c64.is_cpu_jammed());
    let mut saw_halt = false;
    while let Some(message) = c64.poll_message() {
        if message == Message::Halt {
            saw_halt = true;
        }
    }
    assert!(saw_halt);
}

#[test]
fn ram_write_read_round_trip() {
    let mut c64 = setup_c64();
    c64.get_cpu_mut().write(0x2000, 0x5a);
    assert_eq!(0x5a, c64.get_cpu().read(0x2000));
}

#[test]
fn rom_areas_are_write_through() {
    let mut c64 = setup_c64();
    // With the kernal banked in, reads hit ROM but writes land in RAM.
    let rom_value = c64.get_cpu().read(0xfce2);
    assert_eq!(0x4c, rom_value);
    c64.get_cpu_mut().write(0xfce2, 0x12);
    assert_eq!(0x4c, c64.get_cpu().read(0xfce2));
    // Bank the kernal out through the processor port.
    c64.get_cpu_mut().write(0x0001, 0x1d);
    assert_eq!(0x12, c64.get_cpu().read(0xfce2));
}

#[test]
fn badline_steals_cpu_cycles() {
    let mut c64 = setup_c64();
    // Enable the display with y-scroll 3 via the VIC control register.
    c64.get_vic().borrow_mut().write(0x11, 0x13);
    // An endless loop of pure read cycles at $1000.
    c64.load_ram(&[0x4c, 0x00, 0x10], 0x1000);
    c64.get_cpu_mut().set_pc(0x1000);
    let instructions_on_line = |c64: &mut C64, line: u8| {
        // Run to the start of the requested raster line.
        loop {
            c64.step_one_cycle();
            let raster = c64.get_vic().borrow_mut().read(0x12);
            if raster == line {
                break;
            }
        }
        let mut boundaries = 0;
        for _ in 0..62 {
            c64.step_one_cycle();
            if c64.get_cpu().at_instruction_boundary() {
                boundaries += 1;
            }
        }
        boundaries
    };
    // Line 51 matches y-scroll 3 and is a badline; line 52 is not. The jmp
    // loop issues only read cycles, so the 40-column fetch window stalls it
    // almost entirely on the badline.
    let badline_count = instructions_on_line(&mut c64, 51);
    let normal_count = instructions_on_line(&mut c64, 52);
    assert!(
        badline_count * 2 < normal_count,
        "badline {} vs normal {}",
        badline_count,
        normal_count
    );
}

#[test]
fn snapshot_round_trips_identically() {
    let mut c64 = setup_c64();
    for _ in 0..3 {
        c64.step_one_frame();
        c64.reset_vsync();
    }
    let snapshot = c64.take_snapshot();
    let cycles = c64.get_cycles();
    c64.restore_snapshot(&snapshot).unwrap();
    assert_eq!(cycles, c64.get_cycles());
    let snapshot_2 = c64.take_snapshot();
    assert_eq!(snapshot, snapshot_2);
}

#[test]
fn snapshot_restore_continues_deterministically() {
    let mut c64 = setup_c64();
    c64.step_one_frame();
    c64.reset_vsync();
    let snapshot = c64.take_snapshot();
    c64.step_one_frame();
    c64.reset_vsync();
    let pc_after = c64.get_cpu().get_pc();
    let cycles_after = c64.get_cycles();
    c64.restore_snapshot(&snapshot).unwrap();
    c64.step_one_frame();
    c64.reset_vsync();
    assert_eq!(pc_after, c64.get_cpu().get_pc());
    assert_eq!(cycles_after, c64.get_cycles());
}

#[test]
fn bad_snapshot_is_refused_without_mutation() {
    let mut c64 = setup_c64();
    c64.step_one_frame();
    c64.reset_vsync();
    let cycles = c64.get_cycles();
    let garbage = vec![0xff; 64];
    match c64.restore_snapshot(&garbage) {
        Err(Error::SnapshotMismatch) => {}
        other => panic!("expected snapshot mismatch, got {:?}", other.err()),
    }
    assert_eq!(cycles, c64.get_cycles());
}

#[test]
fn corrupted_snapshot_section_leaves_state_untouched() {
    let mut c64 = setup_c64();
    c64.step_one_frame();
    c64.reset_vsync();
    let mut snapshot = c64.take_snapshot();
    c64.step_one_frame();
    c64.reset_vsync();
    let cycles = c64.get_cycles();
    let frame = c64.get_frame_count();
    // Clobber the drive section's trailing flag. The envelope (magic,
    // version, model, total length) stays intact, so only the per-section
    // dry run can catch this.
    let len = snapshot.len();
    snapshot[len - 5] = 0x07;
    match c64.restore_snapshot(&snapshot) {
        Err(Error::SnapshotMismatch) => {}
        other => panic!("expected snapshot mismatch, got {:?}", other.err()),
    }
    assert_eq!(cycles, c64.get_cycles());
    assert_eq!(frame, c64.get_frame_count());
    // The machine keeps running and the repaired snapshot still restores.
    c64.step_one_frame();
    c64.reset_vsync();
    snapshot[len - 5] = 0x00;
    c64.restore_snapshot(&snapshot).unwrap();
}

#[test]
fn breakpoint_stops_at_clean_boundary() {
    let mut c64 = setup_c64();
    c64.load_ram(&[0xea, 0xea, 0xea, 0x4c, 0x00, 0x10], 0x1000);
    c64.get_cpu_mut().set_pc(0x1000);
    c64.get_bpm_mut().set(0x1002, false);
    let mut state = ExecState::Continue;
    for _ in 0..20 {
        state = c64.step_one_cycle();
        if state == ExecState::Halted {
            break;
        }
    }
    assert_eq!(ExecState::Halted, state);
    assert_eq!(0x1002, c64.get_cpu().get_frozen_pc());
    assert!(c64.get_cpu().at_instruction_boundary());
}

#[test]
fn breakpoint_set_and_clear_restores_state() {
    let mut c64 = setup_c64();
    let index = c64.get_bpm_mut().set(0x1234, false);
    assert!(c64.get_bpm().is_bp_present());
    c64.get_bpm_mut().remove(index).unwrap();
    assert!(!c64.get_bpm().is_bp_present());
}

#[test]
fn missing_roms_are_reported() {
    let config = Config::new(SystemModel::from("pal"));
    let c64 = C64::build(Rc::new(config));
    match c64.check_roms() {
        Err(Error::RomMissing(mask)) => assert_eq!(0x0f, mask),
        _ => panic!("expected missing roms"),
    }
}

#[test]
fn rom_size_is_validated() {
    let mut c64 = setup_c64();
    match c64.load_rom(RomKind::Basic, &[0u8; 100]) {
        Err(Error::ImageInvalid(_)) => {}
        _ => panic!("expected invalid image"),
    }
}

#[test]
fn drive_clock_tracks_host_ratio() {
    let mut c64 = setup_c64();
    c64.step_one_frame();
    c64.reset_vsync();
    let host_cycles = c64.get_cycles();
    let drive_cycles = c64.get_drive().get_cycles();
    // f_drive/f_host = 1_000_000 / 985_248
    let expected = host_cycles * 1_000_000 / 985_248;
    assert!(
        drive_cycles >= expected.saturating_sub(1) && drive_cycles <= expected + 1,
        "expected ~{} drive cycles, got {}",
        expected,
        drive_cycles
    );
}

#[test]
fn restore_key_pulses_nmi() {
    let mut c64 = setup_c64();
    // Let the machine reach its idle loop first.
    for _ in 0..16 {
        c64.step_one_cycle();
    }
    c64.get_keyboard().set_restore(true);
    // NMI sequence takes 7 cycles once recognized; afterwards the cpu
    // executes from the NMI vector's rti at $fcf0.
    let mut reached_handler = false;
    for _ in 0..40 {
        c64.step_one_cycle();
        if c64.get_cpu().get_frozen_pc() == 0xfcf0 {
            reached_handler = true;
            break;
        }
    }
    c64.get_keyboard().set_restore(false);
    assert!(reached_handler);
}

#[test]
fn tod_ticks_every_tenth_of_a_second() {
    let mut c64 = setup_c64();
    // Start the TOD by reading the tenths register.
    c64.get_cia_1().borrow_mut().read(0x08);
    // 5 frames per tenth at 50 fps.
    for _ in 0..5 {
        c64.step_one_frame();
        c64.reset_vsync();
    }
    let tenth = c64.get_cia_1().borrow_mut().read(0x08);
    assert_eq!(0x01, tenth);
}

#[test]
fn execution_engine_runs_on_worker_thread() {
    let (basic, charset, kernal, drive) = test_roms();
    let mut config =
        Config::new_with_roms(SystemModel::from("pal"), &basic, &charset, &kernal);
    config.roms.drive = drive;
    let engine = ExecutionEngine::launch(config);
    engine.send(Command::SetWarp(true));
    engine.send(Command::Run);
    let mut saw_run = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        match engine.messages().recv_timeout(Duration::from_millis(100)) {
            Ok(Message::Run) => {
                saw_run = true;
                break;
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    assert!(saw_run);
    engine.send(Command::Pause);
    engine.shutdown();
}

#[test]
fn execution_engine_reports_missing_roms() {
    let config = Config::new(SystemModel::from("pal"));
    let engine = ExecutionEngine::launch(config);
    engine.send(Command::Run);
    let mut saw_missing = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        match engine.messages().recv_timeout(Duration::from_millis(100)) {
            Ok(Message::RomMissing(mask)) => {
                assert_eq!(0x0f, mask);
                saw_missing = true;
                break;
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    assert!(saw_missing);
    engine.shutdown();
}

#[test]
fn history_snapshot_appears_after_four_seconds() {
    let mut c64 = setup_c64();
    assert!(c64.history_snapshot(0).is_none());
    // 4 seconds of PAL frames.
    for _ in 0..(50 * 4) {
        c64.step_one_frame();
        c64.reset_vsync();
    }
    assert!(c64.history_snapshot(0).is_some());
}
