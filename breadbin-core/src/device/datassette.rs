// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

use crate::factory::Tape;
use crate::util::{IoPort, Pin, Shared};

// Design:
//   The datassette turns the pulse stream of an attached tape into edges on
//   the CIA 1 FLAG pin. The processor port controls the motor (bit 5) and
//   reads the cassette switch (bit 4, low while a key is pressed).

const DUTY_CYCLE: u32 = 50;

struct Pulse {
    low_cycles: u32,
    remaining_cycles: u32,
}

impl Pulse {
    pub fn new(length: u32, duty: u32) -> Pulse {
        Pulse {
            low_cycles: length * (100 - duty) / 100,
            remaining_cycles: length,
        }
    }

    #[inline(always)]
    pub fn is_done(&self) -> bool {
        self.remaining_cycles == 0
    }

    #[inline(always)]
    pub fn advance(&mut self) -> bool {
        self.remaining_cycles -= 1;
        if self.low_cycles == 0 {
            true
        } else {
            self.low_cycles -= 1;
            false
        }
    }
}

pub struct Datassette {
    // Dependencies
    cia_flag_pin: Shared<Pin>,
    cpu_io_port: Shared<IoPort>,
    // Runtime State
    playing: bool,
    tape: Option<Box<dyn Tape>>,
    current_pulse: Pulse,
}

impl Datassette {
    pub fn new(cia_flag_pin: Shared<Pin>, cpu_io_port: Shared<IoPort>) -> Datassette {
        Datassette {
            cia_flag_pin,
            cpu_io_port,
            playing: false,
            tape: None,
            current_pulse: Pulse::new(0, DUTY_CYCLE),
        }
    }

    pub fn attach(&mut self, tape: Box<dyn Tape>) {
        self.tape = Some(tape);
        self.set_cassette_switch(true);
    }

    pub fn detach(&mut self) {
        self.stop();
        self.tape = None;
        self.set_cassette_switch(true);
    }

    pub fn has_tape(&self) -> bool {
        self.tape.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.cpu_io_port.borrow().get_value().get_bit(5)
    }

    /// Playback progress in permille of the tape length.
    pub fn progress(&self) -> u16 {
        if let Some(ref tape) = self.tape {
            let total = tape.total_len();
            if total > 0 {
                return (tape.current_pos() * 1000 / total) as u16;
            }
        }
        0
    }

    pub fn play(&mut self) {
        info!(target: "device", "Starting datassette");
        if self.tape.is_some() {
            self.set_cassette_switch(false);
            self.playing = true;
        }
    }

    pub fn stop(&mut self) {
        info!(target: "device", "Stopping datassette");
        self.set_cassette_switch(true);
        self.playing = false;
    }

    pub fn rewind(&mut self) {
        if let Some(ref mut tape) = self.tape {
            tape.seek(0);
        }
        self.current_pulse = Pulse::new(0, DUTY_CYCLE);
    }

    pub fn reset(&mut self) {
        self.set_cassette_switch(true);
        self.playing = false;
        self.current_pulse = Pulse::new(0, DUTY_CYCLE);
        if let Some(ref mut tape) = self.tape {
            tape.seek(0);
        }
    }

    #[inline(always)]
    pub fn clock(&mut self) {
        if self.is_playing() && self.tape.is_some() {
            if self.current_pulse.is_done() {
                let pulse_maybe = if let Some(ref mut tape) = self.tape {
                    tape.read_pulse()
                } else {
                    None
                };
                if let Some(pulse) = pulse_maybe {
                    self.current_pulse = Pulse::new(pulse, DUTY_CYCLE);
                } else {
                    self.stop();
                }
            }
            if !self.current_pulse.is_done() {
                let level = self.current_pulse.advance();
                self.cia_flag_pin.borrow_mut().set_active(level);
            }
        }
    }

    fn set_cassette_switch(&self, released: bool) {
        self.cpu_io_port.borrow_mut().set_input_bit(4, released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared;

    struct PulseTape {
        pulses: Vec<u32>,
        pos: usize,
    }

    impl Tape for PulseTape {
        fn read_pulse(&mut self) -> Option<u32> {
            let pulse = self.pulses.get(self.pos).copied();
            self.pos += 1;
            pulse
        }

        fn seek(&mut self, pos: usize) -> bool {
            self.pos = pos;
            true
        }

        fn current_pos(&self) -> usize {
            self.pos
        }

        fn total_len(&self) -> usize {
            self.pulses.len()
        }
    }

    fn setup_datassette() -> (Datassette, Shared<Pin>, Shared<IoPort>) {
        let flag_pin = new_shared(Pin::new_low());
        let cpu_io_port = new_shared(IoPort::new(0x20, 0xff));
        let datassette = Datassette::new(flag_pin.clone(), cpu_io_port.clone());
        (datassette, flag_pin, cpu_io_port)
    }

    #[test]
    fn pulses_drive_flag_edges() {
        let (mut datassette, flag_pin, cpu_io_port) = setup_datassette();
        datassette.attach(Box::new(PulseTape {
            pulses: vec![8, 8],
            pos: 0,
        }));
        datassette.play();
        // Motor on (bit 5 low).
        cpu_io_port.borrow_mut().set_value(0x00);
        assert!(datassette.is_playing());
        let mut falling = 0;
        for _ in 0..16 {
            datassette.clock();
            if flag_pin.borrow().is_falling() {
                falling += 1;
            }
        }
        // Each pulse boundary after the first produces a falling edge.
        assert_eq!(1, falling);
    }

    #[test]
    fn motor_bit_gates_playback() {
        let (mut datassette, _flag_pin, cpu_io_port) = setup_datassette();
        datassette.attach(Box::new(PulseTape {
            pulses: vec![8],
            pos: 0,
        }));
        datassette.play();
        cpu_io_port.borrow_mut().set_value(0x20);
        assert!(!datassette.is_playing());
    }

    #[test]
    fn cassette_switch_follows_play_key() {
        let (mut datassette, _flag_pin, cpu_io_port) = setup_datassette();
        datassette.attach(Box::new(PulseTape {
            pulses: vec![],
            pos: 0,
        }));
        assert!(cpu_io_port.borrow().get_value().get_bit(4));
        datassette.play();
        assert!(!cpu_io_port.borrow().get_value().get_bit(4));
    }
}
