// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Pepto's measured C64 palette.

pub struct Palette;

impl Palette {
    pub fn default() -> [u32; 16] {
        [
            0x00_000000, // Black
            0x00_ffffff, // White
            0x00_68372b, // Red
            0x00_70a4b2, // Cyan
            0x00_6f3d86, // Purple
            0x00_588d43, // Green
            0x00_352879, // Blue
            0x00_b8c76f, // Yellow
            0x00_6f4f25, // Orange
            0x00_433900, // Brown
            0x00_9a6759, // LightRed
            0x00_444444, // DarkGray
            0x00_6c6c6c, // MediumGray
            0x00_9ad284, // LightGreen
            0x00_6c5eb5, // LightBlue
            0x00_959595, // LightGray
        ]
    }
}
