// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::slice::Iter;

// Breakpoints stop the machine at an instruction boundary; watchpoints are
// forwarded to the CPU, which pays for the extra checks only while any
// debugger feature is active.

pub struct Breakpoint {
    pub index: u16,
    pub address: u16,
    pub enabled: bool,
    ignore: u16,
    autodelete: bool,
}

pub struct BreakpointManager {
    breakpoints: Vec<Breakpoint>,
    watchpoints: Vec<u16>,
    bp_index: u16,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self {
            breakpoints: Vec::new(),
            watchpoints: Vec::new(),
            bp_index: 1,
        }
    }

    #[inline]
    pub fn check(&mut self, pc: u16) -> Option<u16> {
        if self.breakpoints.is_empty() {
            return None;
        }
        let bp_pos = self.breakpoints.iter_mut().position(|bp| {
            if bp.address == pc && bp.enabled {
                if bp.ignore == 0 {
                    true
                } else {
                    bp.ignore -= 1;
                    false
                }
            } else {
                false
            }
        });
        if let Some(pos) = bp_pos {
            let index = self.breakpoints[pos].index;
            if self.breakpoints[pos].autodelete {
                self.breakpoints.remove(pos);
            }
            Some(index)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    pub fn enable_all(&mut self, enabled: bool) {
        for bp in self.breakpoints.iter_mut() {
            bp.enabled = enabled;
        }
    }

    pub fn get(&self, index: u16) -> Result<&Breakpoint, String> {
        match self.breakpoints.iter().position(|bp| bp.index == index) {
            Some(pos) => Ok(&self.breakpoints[pos]),
            None => Err(format!("Invalid index {}", index)),
        }
    }

    pub fn is_bp_present(&self) -> bool {
        self.breakpoints.iter().any(|bp| bp.enabled)
    }

    pub fn is_wp_present(&self) -> bool {
        !self.watchpoints.is_empty()
    }

    pub fn ignore(&mut self, index: u16, count: u16) -> Result<(), String> {
        match self.find_mut(index) {
            Some(bp) => {
                bp.ignore = count;
                Ok(())
            }
            None => Err(format!("Invalid index {}", index)),
        }
    }

    pub fn list(&self) -> Iter<'_, Breakpoint> {
        self.breakpoints.iter()
    }

    pub fn remove(&mut self, index: u16) -> Result<(), String> {
        match self.breakpoints.iter().position(|bp| bp.index == index) {
            Some(pos) => {
                self.breakpoints.remove(pos);
                Ok(())
            }
            None => Err(format!("Invalid index {}", index)),
        }
    }

    pub fn set(&mut self, address: u16, autodelete: bool) -> u16 {
        let index = self.bp_index;
        self.bp_index += 1;
        self.breakpoints.push(Breakpoint {
            index,
            address,
            enabled: true,
            ignore: 0,
            autodelete,
        });
        index
    }

    pub fn set_enabled(&mut self, index: u16, enabled: bool) -> Result<(), String> {
        match self.find_mut(index) {
            Some(bp) => {
                bp.enabled = enabled;
                Ok(())
            }
            None => Err(format!("Invalid index {}", index)),
        }
    }

    pub fn set_watchpoint(&mut self, address: u16) {
        if !self.watchpoints.contains(&address) {
            self.watchpoints.push(address);
        }
    }

    pub fn remove_watchpoint(&mut self, address: u16) {
        self.watchpoints.retain(|&a| a != address);
    }

    pub fn watchpoints(&self) -> Vec<u16> {
        self.watchpoints.clone()
    }

    fn find_mut(&mut self, index: u16) -> Option<&mut Breakpoint> {
        self.breakpoints.iter_mut().find(|bp| bp.index == index)
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_hits_at_address() {
        let mut bpm = BreakpointManager::new();
        bpm.set(0x1000, false);
        assert!(bpm.check(0x0fff).is_none());
        assert!(bpm.check(0x1000).is_some());
        // Still present after the hit.
        assert!(bpm.check(0x1000).is_some());
    }

    #[test]
    fn ignore_count_skips_hits() {
        let mut bpm = BreakpointManager::new();
        let index = bpm.set(0x1000, false);
        bpm.ignore(index, 2).unwrap();
        assert!(bpm.check(0x1000).is_none());
        assert!(bpm.check(0x1000).is_none());
        assert!(bpm.check(0x1000).is_some());
    }

    #[test]
    fn autodelete_removes_after_hit() {
        let mut bpm = BreakpointManager::new();
        bpm.set(0x1000, true);
        assert!(bpm.check(0x1000).is_some());
        assert!(bpm.check(0x1000).is_none());
        assert!(!bpm.is_bp_present());
    }

    #[test]
    fn set_and_remove_leaves_clean_state() {
        let mut bpm = BreakpointManager::new();
        let index = bpm.set(0x2000, false);
        assert!(bpm.is_bp_present());
        bpm.remove(index).unwrap();
        assert!(!bpm.is_bp_present());
    }
}
