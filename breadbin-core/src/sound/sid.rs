// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::sync::Arc;

use log::Level;
use resid;

use crate::factory::{Chip, SidModel, SoundOutput};
use crate::util::{Clock, Reader, SnapshotError, Writer};

// Design:
//   SID renders lazily: register accesses and the end-of-frame hook catch
//   the resid core up to the current system cycle and push the generated
//   samples into the host sound buffer. Warp mode fades the volume down and
//   back up to avoid clicks.

#[derive(Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    Fast,
    Interpolate,
    Resample,
    ResampleFast,
}

pub struct Sid {
    // Dependencies
    system_clock: Rc<Clock>,
    sound_buffer: Arc<dyn SoundOutput>,
    // Functional Units
    resid: resid::Sid,
    // Runtime State
    buffer: [i16; 8192],
    cycles: u64,
    reg_shadow: [u8; 0x20],
    muted: bool,
}

impl Sid {
    pub fn new(
        chip_model: SidModel,
        system_clock: Rc<Clock>,
        sound_buffer: Arc<dyn SoundOutput>,
    ) -> Self {
        info!(target: "sound", "Initializing SID");
        let resid_model = match chip_model {
            SidModel::Mos6581 => resid::ChipModel::Mos6581,
            SidModel::Mos8580 => resid::ChipModel::Mos8580,
        };
        let resid = resid::Sid::new(resid_model);
        Sid {
            system_clock,
            sound_buffer,
            resid,
            buffer: [0i16; 8192],
            cycles: 0,
            reg_shadow: [0; 0x20],
            muted: false,
        }
    }

    pub fn enable_filter(&mut self, enabled: bool) {
        self.resid.enable_filter(enabled);
    }

    pub fn set_sampling_parameters(
        &mut self,
        sampling_method: SamplingMethod,
        clock_freq: u32,
        sample_freq: u32,
    ) {
        let resid_sampling_method = match sampling_method {
            SamplingMethod::Fast => resid::SamplingMethod::Fast,
            SamplingMethod::Interpolate => resid::SamplingMethod::Interpolate,
            SamplingMethod::Resample => resid::SamplingMethod::Resample,
            SamplingMethod::ResampleFast => resid::SamplingMethod::ResampleFast,
        };
        self.resid
            .set_sampling_parameters(resid_sampling_method, clock_freq, sample_freq);
    }

    /// Fade the output down before entering warp mode.
    pub fn ramp_down(&mut self) {
        self.sync();
        self.muted = true;
        self.resid.write(0x18, self.reg_shadow[0x18] & 0xf0);
    }

    /// Restore the output volume when leaving warp mode.
    pub fn ramp_up(&mut self) {
        self.cycles = self.system_clock.get();
        self.muted = false;
        self.resid.write(0x18, self.reg_shadow[0x18]);
    }

    fn sync(&mut self) {
        if self.cycles != self.system_clock.get() {
            let delta = (self.system_clock.get() - self.cycles) as u32;
            self.clock_delta(delta);
        }
    }
}

impl Chip for Sid {
    fn clock(&mut self) {
        self.resid.clock();
        self.cycles = self.cycles.wrapping_add(1);
    }

    fn clock_delta(&mut self, delta: u32) {
        if delta > 0 {
            let mut delta = delta;
            while delta > 0 {
                let (samples, next_delta) = self.resid.sample(delta, &mut self.buffer[..], 1);
                self.sound_buffer.write(&self.buffer[0..samples]);
                delta = next_delta;
            }
        }
        self.cycles = self.cycles.wrapping_add(u64::from(delta));
    }

    fn process_vsync(&mut self) {
        self.sync();
    }

    fn reset(&mut self) {
        self.resid.reset();
        self.cycles = self.system_clock.get();
        self.reg_shadow = [0; 0x20];
        self.muted = false;
    }

    // I/O

    fn read(&mut self, reg: u8) -> u8 {
        self.sync();
        self.resid.read(reg)
    }

    fn write(&mut self, reg: u8, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "sid::reg", "Write 0x{:02x} = 0x{:02x}", reg, value);
        }
        self.sync();
        self.reg_shadow[(reg & 0x1f) as usize] = value;
        if self.muted && reg & 0x1f == 0x18 {
            self.resid.write(reg, value & 0xf0);
        } else {
            self.resid.write(reg, value);
        }
    }

    // -- Persistence

    fn save_state(&self, writer: &mut Writer) {
        writer.begin_section(0x05);
        for &value in self.reg_shadow.iter() {
            writer.put_u8(value);
        }
        writer.put_u64(self.cycles);
    }

    fn restore_state(&mut self, reader: &mut Reader) -> Result<(), SnapshotError> {
        reader.expect_section(0x05)?;
        self.resid.reset();
        for i in 0..0x20 {
            let value = reader.get_u8()?;
            self.reg_shadow[i] = value;
            self.resid.write(i as u8, value);
        }
        self.cycles = reader.get_u64()?;
        Ok(())
    }

    fn validate_state(&self, reader: &mut Reader) -> Result<(), SnapshotError> {
        reader.expect_section(0x05)?;
        for _ in 0..0x20 {
            reader.get_u8()?; // register shadow
        }
        reader.get_u64()?; // cycles
        Ok(())
    }
}
