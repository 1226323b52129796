// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

use crate::util::{Pin, Shared};

use super::cycle_counter::CycleCounter;

// Spec: 6526 COMPLEX INTERFACE ADAPTER (CIA) Datasheet
// Design:
//   The 6526 timers run behind a small delay pipeline: a newly started timer
//   counts its first pulse two cycles after the CRA write, a latch write to a
//   stopped timer becomes visible two cycles later, and a force-load strobe
//   takes effect on the following cycle. Underflow reloads the latch in the
//   same cycle and suppresses the next count pulse. Cascading (timer B
//   counting timer A underflows) carries no extra delay.

mod pipeline {
    pub const COUNT0: u16 = 0x01;
    pub const COUNT1: u16 = 0x02;
    pub const COUNT2: u16 = 0x04;
    pub const COUNT3: u16 = 0x08;
    pub const LOAD0: u16 = 0x40;
    pub const LOAD1: u16 = 0x80;
    pub const MASK: u16 = COUNT0 | COUNT1 | COUNT2 | COUNT3 | LOAD0 | LOAD1;
}

#[derive(Copy, Clone, PartialEq)]
pub enum Mode {
    TimerA,
    TimerB,
}

#[derive(Copy, Clone, PartialEq)]
enum Input {
    SystemClock,
    External,
    TimerA,
    TimerAWithCnt,
}

#[derive(Copy, Clone, PartialEq)]
enum Output {
    Pulse,
    Toggle,
}

pub struct Timer {
    // Configuration
    mode: Mode,
    enabled: bool,
    input: Input,
    output: Output,
    one_shot: bool,
    pb_on: bool,
    config: u8,
    // Runtime State
    latch: u16,
    counter: u16,
    delay: CycleCounter,
    skip_count: bool,
    cascade_pulse: bool,
    pb_toggle: bool,
    pb_pulse: bool,
    // I/O
    cnt_pin: Shared<Pin>,
}

impl Timer {
    pub fn new(mode: Mode, cnt_pin: Shared<Pin>) -> Self {
        Self {
            mode,
            enabled: false,
            input: Input::SystemClock,
            output: Output::Pulse,
            one_shot: false,
            pb_on: false,
            config: 0,
            latch: 0xffff,
            counter: 0,
            delay: CycleCounter::new(pipeline::MASK),
            skip_count: false,
            cascade_pulse: false,
            pb_toggle: false,
            pb_pulse: false,
            cnt_pin,
        }
    }

    pub fn get_config(&self) -> u8 {
        let mut config = self.config & !0x10;
        config.set_bit(0, self.enabled);
        config
    }

    pub fn get_counter(&self) -> u16 {
        self.counter
    }

    pub fn get_counter_lo(&self) -> u8 {
        (self.counter & 0xff) as u8
    }

    pub fn get_counter_hi(&self) -> u8 {
        (self.counter >> 8) as u8
    }

    pub fn get_latch(&self) -> u16 {
        self.latch
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_pb_on(&self) -> bool {
        self.pb_on
    }

    pub fn get_pb_output(&self) -> bool {
        match self.output {
            Output::Pulse => self.pb_pulse,
            Output::Toggle => self.pb_toggle,
        }
    }

    pub fn set_config(&mut self, value: u8) {
        self.config = value;
        let was_enabled = self.enabled;
        self.enabled = value.get_bit(0);
        self.pb_on = value.get_bit(1);
        self.output = if value.get_bit(2) {
            Output::Toggle
        } else {
            Output::Pulse
        };
        self.one_shot = value.get_bit(3);
        self.input = match self.mode {
            Mode::TimerA => {
                if value.get_bit(5) {
                    Input::External
                } else {
                    Input::SystemClock
                }
            }
            Mode::TimerB => match (value >> 5) & 0x03 {
                0 => Input::SystemClock,
                1 => Input::External,
                2 => Input::TimerA,
                3 => Input::TimerAWithCnt,
                _ => unreachable!(),
            },
        };
        if self.enabled && !was_enabled {
            // Counting starts two cycles after the register write.
            self.pb_toggle = true;
            if self.input == Input::SystemClock {
                self.delay.feed(pipeline::COUNT0 | pipeline::COUNT1);
            }
        }
        self.delay
            .autofeed(pipeline::COUNT0, self.enabled && self.input == Input::SystemClock);
        if value.get_bit(4) {
            // Force load strobe, effective on the next cycle.
            self.delay.feed(pipeline::LOAD1);
        }
    }

    pub fn set_latch_lo(&mut self, value: u8) {
        self.latch = (self.latch & 0xff00) | u16::from(value);
    }

    pub fn set_latch_hi(&mut self, value: u8) {
        self.latch = (u16::from(value) << 8) | (self.latch & 0x00ff);
        if !self.enabled {
            self.delay.feed(pipeline::LOAD0);
        }
    }

    /// Presents this cycle's timer A underflow to a cascaded timer B.
    pub fn feed_source(&mut self, timer_a_output: bool) {
        self.cascade_pulse = timer_a_output;
    }

    pub fn clock(&mut self) -> bool {
        let mut loading = false;
        if self.delay.has_cycle(pipeline::LOAD1) {
            self.counter = self.latch;
            self.delay.remove(pipeline::LOAD1);
            loading = true;
        }
        let pulse = match self.input {
            Input::SystemClock => self.delay.has_cycle(pipeline::COUNT3),
            Input::External => self.enabled && self.cnt_pin.borrow().is_rising(),
            Input::TimerA => self.enabled && self.cascade_pulse,
            Input::TimerAWithCnt => {
                self.enabled && self.cascade_pulse && self.cnt_pin.borrow().is_high()
            }
        };
        let mut output = false;
        if pulse && !loading && !self.skip_count {
            self.counter = self.counter.wrapping_sub(1);
            if self.counter == 0 {
                output = true;
                self.counter = self.latch;
                self.skip_count = true;
                self.pb_toggle = !self.pb_toggle;
                self.pb_pulse = true;
                if self.one_shot {
                    self.enabled = false;
                    self.delay.autofeed(pipeline::COUNT0, false);
                }
            }
        } else {
            if !pulse {
                self.pb_pulse = false;
            }
            if self.skip_count {
                self.skip_count = false;
                self.pb_pulse = false;
            }
        }
        self.cascade_pulse = false;
        self.delay.clock();
        output
    }

    pub fn reset(&mut self) {
        self.enabled = false;
        self.input = Input::SystemClock;
        self.output = Output::Pulse;
        self.one_shot = false;
        self.pb_on = false;
        self.config = 0;
        self.latch = 0xffff;
        self.counter = 0;
        self.delay.reset();
        self.skip_count = false;
        self.cascade_pulse = false;
        self.pb_toggle = false;
        self.pb_pulse = false;
    }

    // -- Persistence

    pub fn save_state(&self, writer: &mut crate::util::Writer) {
        writer.put_u8(self.config);
        writer.put_bool(self.enabled);
        writer.put_u16(self.latch);
        writer.put_u16(self.counter);
        let (cycles, feed) = self.delay.state();
        writer.put_u16(cycles);
        writer.put_u16(feed);
        writer.put_bool(self.skip_count);
        writer.put_bool(self.pb_toggle);
        writer.put_bool(self.pb_pulse);
    }

    pub fn validate_state(
        reader: &mut crate::util::Reader,
    ) -> Result<(), crate::util::SnapshotError> {
        reader.get_u8()?; // config
        reader.get_bool()?; // enabled
        reader.get_u16()?; // latch
        reader.get_u16()?; // counter
        reader.get_u16()?; // delay cycles
        reader.get_u16()?; // delay feed
        reader.get_bool()?; // skip count
        reader.get_bool()?; // pb toggle
        reader.get_bool()?; // pb pulse
        Ok(())
    }

    pub fn restore_state(
        &mut self,
        reader: &mut crate::util::Reader,
    ) -> Result<(), crate::util::SnapshotError> {
        let config = reader.get_u8()?;
        self.set_config(config & !0x11);
        self.config = config;
        self.enabled = reader.get_bool()?;
        self.delay
            .autofeed(pipeline::COUNT0, self.enabled && self.input == Input::SystemClock);
        self.latch = reader.get_u16()?;
        self.counter = reader.get_u16()?;
        let cycles = reader.get_u16()?;
        let feed = reader.get_u16()?;
        self.delay.restore(cycles, feed);
        self.skip_count = reader.get_bool()?;
        self.pb_toggle = reader.get_bool()?;
        self.pb_pulse = reader.get_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared;

    fn setup_timer(mode: Mode) -> Timer {
        let cnt_pin = new_shared(Pin::new_high());
        Timer::new(mode, cnt_pin)
    }

    #[test]
    fn counting_starts_two_cycles_after_write() {
        let mut timer = setup_timer(Mode::TimerA);
        timer.set_latch_lo(0x03);
        timer.set_latch_hi(0x00);
        timer.clock();
        timer.clock();
        assert_eq!(3, timer.get_counter());
        timer.set_config(0x01);
        timer.clock();
        assert_eq!(3, timer.get_counter());
        timer.clock();
        assert_eq!(3, timer.get_counter());
        timer.clock();
        assert_eq!(2, timer.get_counter());
    }

    #[test]
    fn underflow_reloads_latch_same_cycle() {
        let mut timer = setup_timer(Mode::TimerA);
        timer.set_latch_lo(0x02);
        timer.set_latch_hi(0x00);
        timer.clock();
        timer.clock();
        timer.set_config(0x01);
        timer.clock();
        timer.clock();
        assert!(!timer.clock()); // 2 -> 1
        assert_eq!(1, timer.get_counter());
        assert!(timer.clock()); // 1 -> underflow, reload
        assert_eq!(2, timer.get_counter());
        assert!(!timer.clock()); // count suppressed after reload
        assert_eq!(2, timer.get_counter());
        assert!(!timer.clock()); // 2 -> 1
        assert_eq!(1, timer.get_counter());
        assert!(timer.clock());
    }

    #[test]
    fn one_shot_stops_after_underflow() {
        let mut timer = setup_timer(Mode::TimerA);
        timer.set_latch_lo(0x01);
        timer.set_latch_hi(0x00);
        timer.clock();
        timer.clock();
        timer.set_config(0x09);
        timer.clock();
        timer.clock();
        assert!(timer.clock());
        assert!(!timer.is_enabled());
        for _ in 0..8 {
            assert!(!timer.clock());
        }
        assert_eq!(1, timer.get_counter());
    }

    #[test]
    fn force_load_takes_effect_next_cycle() {
        let mut timer = setup_timer(Mode::TimerA);
        timer.set_latch_lo(0x42);
        timer.set_latch_hi(0x00);
        timer.set_config(0x10);
        assert_eq!(0, timer.get_counter());
        timer.clock();
        assert_eq!(0x42, timer.get_counter());
    }

    #[test]
    fn cascade_counts_timer_a_underflows_without_delay() {
        let mut timer_b = setup_timer(Mode::TimerB);
        timer_b.set_latch_lo(0x02);
        timer_b.set_latch_hi(0x00);
        timer_b.clock();
        timer_b.clock();
        // Timer B counts timer A underflows.
        timer_b.set_config(0x41);
        timer_b.feed_source(true);
        timer_b.clock();
        assert_eq!(1, timer_b.get_counter());
        timer_b.feed_source(false);
        timer_b.clock();
        assert_eq!(1, timer_b.get_counter());
        timer_b.feed_source(true);
        assert!(timer_b.clock());
        assert_eq!(2, timer_b.get_counter());
    }

    #[test]
    fn toggle_output_starts_high() {
        let mut timer = setup_timer(Mode::TimerA);
        timer.set_latch_lo(0x02);
        timer.set_latch_hi(0x00);
        timer.clock();
        timer.clock();
        timer.set_config(0x07); // start, pb on, toggle
        assert_eq!(true, timer.get_pb_output());
        timer.clock();
        timer.clock();
        timer.clock(); // 2 -> 1
        assert_eq!(true, timer.get_pb_output());
        timer.clock(); // underflow
        assert_eq!(false, timer.get_pb_output());
    }
}
