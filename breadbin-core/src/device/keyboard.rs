// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

use crate::util::{irq_line, IrqLine, Shared};

// SPEC: https://www.c64-wiki.com/index.php/Keyboard#Hardware
// Design:
//   The 8x8 key matrix is kept in two mirrors so that both scan directions
//   work: entries 0-7 are indexed by row (driven from CIA 1 port A), entries
//   8-15 by column (driven from port B). A pressed key clears its bit in
//   both mirrors. RESTORE is not part of the matrix; it pulses the NMI line.

pub struct Keyboard {
    matrix: Shared<[u8; 16]>,
    nmi_line: Shared<IrqLine>,
    shift_lock: bool,
}

impl Keyboard {
    pub fn new(matrix: Shared<[u8; 16]>, nmi_line: Shared<IrqLine>) -> Keyboard {
        Keyboard {
            matrix,
            nmi_line,
            shift_lock: false,
        }
    }

    pub fn get_row(&self, row: u8) -> u8 {
        self.matrix.borrow()[row as usize]
    }

    pub fn is_shift_lock(&self) -> bool {
        self.shift_lock
    }

    pub fn reset(&mut self) {
        let mut matrix = self.matrix.borrow_mut();
        for entry in matrix.iter_mut() {
            *entry = 0xff;
        }
        drop(matrix);
        self.shift_lock = false;
        self.nmi_line
            .borrow_mut()
            .set_low(irq_line::source::KEYBOARD, false);
    }

    /// Press or release the key at the given matrix position.
    pub fn set_key(&mut self, row: u8, col: u8, pressed: bool) {
        let mut matrix = self.matrix.borrow_mut();
        matrix[row as usize].set_bit(col as usize, !pressed);
        matrix[8 + col as usize].set_bit(row as usize, !pressed);
    }

    /// Shift lock latches the left shift key (row 1, column 7).
    pub fn set_shift_lock(&mut self, locked: bool) {
        self.shift_lock = locked;
        self.set_key(1, 7, locked);
    }

    /// RESTORE bypasses the matrix and pulls the NMI line directly.
    pub fn set_restore(&mut self, pressed: bool) {
        self.nmi_line
            .borrow_mut()
            .set_low(irq_line::source::KEYBOARD, pressed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared;

    fn setup_keyboard() -> (Keyboard, Shared<[u8; 16]>, Shared<IrqLine>) {
        let matrix = new_shared([0xff; 16]);
        let nmi_line = new_shared(IrqLine::new("nmi"));
        let keyboard = Keyboard::new(matrix.clone(), nmi_line.clone());
        (keyboard, matrix, nmi_line)
    }

    #[test]
    fn key_press_updates_both_mirrors() {
        let (mut keyboard, matrix, _) = setup_keyboard();
        keyboard.set_key(2, 4, true);
        assert_eq!(0xff & !0x10, matrix.borrow()[2]);
        assert_eq!(0xff & !0x04, matrix.borrow()[8 + 4]);
        keyboard.set_key(2, 4, false);
        assert_eq!(0xff, matrix.borrow()[2]);
        assert_eq!(0xff, matrix.borrow()[8 + 4]);
    }

    #[test]
    fn restore_pulses_nmi() {
        let (mut keyboard, _, nmi_line) = setup_keyboard();
        keyboard.set_restore(true);
        assert!(nmi_line.borrow().is_low());
        keyboard.set_restore(false);
        assert!(!nmi_line.borrow().is_low());
    }

    #[test]
    fn shift_lock_holds_left_shift() {
        let (mut keyboard, matrix, _) = setup_keyboard();
        keyboard.set_shift_lock(true);
        assert_eq!(0xff & !0x80, matrix.borrow()[1]);
        assert!(keyboard.is_shift_lock());
    }
}
