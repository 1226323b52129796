// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::fmt;

use breadbin_core::util::SnapshotError;

/// Errors surfaced at the interface layer. Per-cycle paths never fail; every
/// fallible operation is validated before any component state changes.
#[derive(Debug)]
pub enum Error {
    /// One or more required ROM images are absent (bit mask of RomKind).
    RomMissing(u8),
    /// The provided image does not match any recognized format.
    ImageInvalid(&'static str),
    /// Snapshot magic, version or layout mismatch.
    SnapshotMismatch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RomMissing(mask) => write!(f, "missing rom images, mask {:02x}", mask),
            Error::ImageInvalid(reason) => write!(f, "invalid image: {}", reason),
            Error::SnapshotMismatch => write!(f, "snapshot does not match this machine"),
        }
    }
}

impl From<SnapshotError> for Error {
    fn from(_: SnapshotError) -> Self {
        Error::SnapshotMismatch
    }
}
