// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod border_unit;
mod gfx_sequencer;
mod mux_unit;
mod spec;
mod sprite_sequencer;
mod vic;

pub use self::border_unit::BorderUnit;
pub use self::gfx_sequencer::{GfxSequencer, Mode};
pub use self::mux_unit::MuxUnit;
pub use self::spec::Spec;
pub use self::sprite_sequencer::SpriteSequencer;
pub use self::vic::Vic;
