// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::thread;
use std::time::{Duration, Instant};

// Wall-clock pacing: after each frame the worker sleeps toward a target
// deadline derived from the model's refresh rate. Falling more than 200 ms
// behind or jittering by over a second resynchronizes the timer instead of
// chasing it.

const RESYNC_BEHIND: Duration = Duration::from_millis(200);
const RESYNC_JITTER: Duration = Duration::from_secs(1);

pub struct Pacer {
    frame_duration: Duration,
    target: Instant,
}

impl Pacer {
    pub fn new(refresh_rate: f64) -> Self {
        let frame_duration = Duration::from_secs_f64(1.0 / refresh_rate);
        Pacer {
            frame_duration,
            target: Instant::now() + frame_duration,
        }
    }

    pub fn restart(&mut self) {
        self.target = Instant::now() + self.frame_duration;
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Sleep until the next frame deadline.
    pub fn sync(&mut self) {
        let now = Instant::now();
        if now > self.target && now - self.target > RESYNC_BEHIND {
            debug!(target: "c64", "Emulation lost synchronization, restarting timer");
            self.restart();
            return;
        }
        if self.target > now {
            thread::sleep(self.target - now);
        }
        let jitter = Instant::now().saturating_duration_since(self.target);
        self.target += self.frame_duration;
        if jitter > RESYNC_JITTER {
            debug!(target: "c64", "Jitter exceeds limit, restarting timer");
            self.restart();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_waits_for_deadline() {
        let mut pacer = Pacer::new(1000.0);
        let start = Instant::now();
        pacer.sync();
        pacer.sync();
        assert!(start.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn falling_behind_resynchronizes() {
        let mut pacer = Pacer::new(50.0);
        pacer.target = Instant::now() - Duration::from_secs(1);
        let start = Instant::now();
        pacer.sync();
        // No sleep happens when the deadline is long gone.
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
