// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use breadbin_core::factory::Chip;
use breadbin_core::util::{Reader, SnapshotError, Writer};

use super::c64::C64;
use super::error::Error;

// Snapshot container: a header with magic, version, machine model, the
// cycle counter and a screenshot, followed by every component's state in a
// deterministic leaves-first order (memory, cpu, cias, sid, vic, drive,
// scheduler counters). Restore is all-or-nothing: after the envelope check,
// a dry-run pass walks every field of every section without applying it, so
// a payload with a corrupted interior section is refused before any machine
// state is touched.

const MAGIC: u32 = 0x4252_4442;
const VERSION: u16 = 1;

pub fn save(c64: &C64) -> Vec<u8> {
    let mut writer = Writer::new();
    let (cycles, frame, line, line_cycle) = c64.snapshot_counters();
    writer.put_u32(MAGIC);
    writer.put_u16(VERSION);
    writer.put_u8(c64.model_id());
    writer.put_u64(cycles);
    writer.put_u32(frame);
    writer.put_u16(line);
    writer.put_u16(line_cycle);
    writer.put_bytes(&c64.screenshot());
    let (ram, color_ram, cpu, cia_1, cia_2, sid, vic, drive) = c64.snapshot_parts();
    writer.put_bytes(ram.borrow().as_bytes());
    writer.put_bytes(color_ram.borrow().as_bytes());
    cpu.save_state(&mut writer);
    cia_1.borrow().save_state(&mut writer);
    cia_2.borrow().save_state(&mut writer);
    sid.borrow().save_state(&mut writer);
    vic.borrow().save_state(&mut writer);
    drive.save_state(&mut writer);
    // Trailing length guard so a truncated payload is refused up front.
    let len = writer.len() as u32 + 4;
    writer.put_u32(len);
    writer.into_data()
}

/// Parse the header and the rasterline counters, leaving the reader
/// positioned on the screenshot.
fn read_header(reader: &mut Reader) -> Result<(u64, u32, u16, u16), SnapshotError> {
    let _ = reader.get_u32()?;
    let _ = reader.get_u16()?;
    let _ = reader.get_u8()?;
    let cycles = reader.get_u64()?;
    let frame = reader.get_u32()?;
    let line = reader.get_u16()?;
    let line_cycle = reader.get_u16()?;
    Ok((cycles, frame, line, line_cycle))
}

pub fn restore(c64: &mut C64, data: &[u8]) -> Result<(), Error> {
    // Validate the envelope first.
    {
        let mut reader = Reader::new(data);
        let magic = reader.get_u32()?;
        if magic != MAGIC {
            return Err(Error::SnapshotMismatch);
        }
        let version = reader.get_u16()?;
        if version != VERSION {
            return Err(Error::SnapshotMismatch);
        }
        let model = reader.get_u8()?;
        if model != c64.model_id() {
            return Err(Error::SnapshotMismatch);
        }
        if data.len() < 4 {
            return Err(Error::SnapshotMismatch);
        }
        let declared = u32::from_le_bytes([
            data[data.len() - 4],
            data[data.len() - 3],
            data[data.len() - 2],
            data[data.len() - 1],
        ]);
        if declared as usize != data.len() {
            return Err(Error::SnapshotMismatch);
        }
    }
    // Dry run: perform every read the apply pass will perform, without
    // touching any state. Only a payload that decodes completely gets
    // applied.
    {
        let mut reader = Reader::new(data);
        let _ = read_header(&mut reader)?;
        let _ = reader.get_bytes()?; // screenshot
        let (ram, color_ram, cpu, cia_1, cia_2, sid, vic, drive) = c64.snapshot_parts();
        let ram_bytes = reader.get_bytes()?;
        if ram_bytes.len() != ram.borrow().capacity() {
            return Err(Error::SnapshotMismatch);
        }
        let color_bytes = reader.get_bytes()?;
        if color_bytes.len() != color_ram.borrow().capacity() {
            return Err(Error::SnapshotMismatch);
        }
        cpu.validate_state(&mut reader)?;
        cia_1.borrow().validate_state(&mut reader)?;
        cia_2.borrow().validate_state(&mut reader)?;
        sid.borrow().validate_state(&mut reader)?;
        vic.borrow().validate_state(&mut reader)?;
        drive.validate_state(&mut reader)?;
        // Nothing but the trailing length guard may remain.
        if reader.remaining() != 4 {
            return Err(Error::SnapshotMismatch);
        }
    }
    // Apply: repeats the validated reads, so none of them can fail now.
    let mut reader = Reader::new(data);
    let (cycles, frame, line, line_cycle) = read_header(&mut reader)?;
    let _screenshot = reader.get_bytes()?;
    // Set the clock first; component restore logic reads it.
    c64.restore_counters(cycles, frame, line, line_cycle);
    {
        let (ram, color_ram, cpu, cia_1, cia_2, sid, vic, drive) = c64.snapshot_parts_mut();
        let ram_bytes = reader.get_bytes()?;
        ram.borrow_mut().restore(ram_bytes);
        let color_bytes = reader.get_bytes()?;
        color_ram.borrow_mut().restore(color_bytes);
        cpu.restore_state(&mut reader)?;
        cia_1.borrow_mut().restore_state(&mut reader)?;
        cia_2.borrow_mut().restore_state(&mut reader)?;
        sid.borrow_mut().restore_state(&mut reader)?;
        vic.borrow_mut().restore_state(&mut reader)?;
        drive.restore_state(&mut reader)?;
    }
    Ok(())
}
