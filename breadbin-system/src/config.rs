// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use breadbin_core::factory::SystemModel;

pub struct Config {
    pub model: SystemModel,
    pub sound: SoundConfig,
    pub roms: RomData,
}

impl Config {
    pub fn new(model: SystemModel) -> Config {
        Config {
            model,
            sound: SoundConfig::default(),
            roms: RomData::default(),
        }
    }

    pub fn new_with_roms(
        model: SystemModel,
        basic: &[u8],
        charset: &[u8],
        kernal: &[u8],
    ) -> Config {
        Config {
            model,
            sound: SoundConfig::default(),
            roms: RomData::new(basic, charset, kernal),
        }
    }
}

pub struct RomData {
    pub basic: Vec<u8>,
    pub charset: Vec<u8>,
    pub kernal: Vec<u8>,
    pub drive: Vec<u8>,
}

impl RomData {
    pub fn new(basic: &[u8], charset: &[u8], kernal: &[u8]) -> Self {
        RomData {
            basic: basic.to_vec(),
            charset: charset.to_vec(),
            kernal: kernal.to_vec(),
            drive: Vec::new(),
        }
    }
}

impl Default for RomData {
    fn default() -> Self {
        RomData {
            basic: Vec::new(),
            charset: Vec::new(),
            kernal: Vec::new(),
            drive: Vec::new(),
        }
    }
}

pub struct SoundConfig {
    pub enable: bool,
    pub buffer_size: usize,
    pub sample_rate: u32,
    pub sid_filters: bool,
}

impl Default for SoundConfig {
    fn default() -> SoundConfig {
        SoundConfig {
            enable: true,
            buffer_size: 4096,
            sample_rate: 44100,
            sid_filters: true,
        }
    }
}
