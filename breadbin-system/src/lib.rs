// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod breakpoint;
mod c64;
mod c64_factory;
mod config;
mod error;
mod execution;
mod frame_buffer;
mod message;
mod pacer;
mod palette;
mod snapshot;
mod sound_buffer;

pub use self::breakpoint::{Breakpoint, BreakpointManager};
pub use self::c64::{identify_rom, C64, ExecState};
pub use self::c64_factory::C64Factory;
pub use self::config::{Config, RomData, SoundConfig};
pub use self::error::Error;
pub use self::execution::{CartridgeSpec, ChipSpec, Command, ExecutionEngine, State};
pub use self::frame_buffer::FrameBuffer;
pub use self::message::{Message, MessageQueue};
pub use self::palette::Palette;
pub use self::sound_buffer::SoundBuffer;
