// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use breadbin_core::factory::RomKind;
use crossbeam_channel::{unbounded, Receiver, Sender};

// The message queue is the only lock-taking object shared between the worker
// and the host; everything the host observes through it reflects a completed
// cycle boundary.

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Run,
    Halt,
    RomMissing(u8),
    RomLoaded(RomKind),
    RomComplete,
    Warp(bool),
    AlwaysWarp(bool),
    Vc1530Tape,
    Vc1530NoTape,
    Vc1530Progress(u16),
    Vc1541RedLedOn,
    Vc1541RedLedOff,
    Vc1541MotorOn,
    Vc1541MotorOff,
    Vc1541Disk,
    Vc1541NoDisk,
    Vc1541HeadUp,
    Vc1541HeadDown,
    Cartridge(bool),
    KeyMatrix,
}

#[derive(Clone)]
pub struct MessageQueue {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        MessageQueue { sender, receiver }
    }

    pub fn put(&self, message: Message) {
        // The host may have dropped its receiver; that is not an error.
        let _ = self.sender.send(message);
    }

    pub fn poll(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    pub fn listener(&self) -> Receiver<Message> {
        self.receiver.clone()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_returns_messages_in_order() {
        let queue = MessageQueue::new();
        queue.put(Message::Run);
        queue.put(Message::Halt);
        assert_eq!(Some(Message::Run), queue.poll());
        assert_eq!(Some(Message::Halt), queue.poll());
        assert_eq!(None, queue.poll());
    }
}
