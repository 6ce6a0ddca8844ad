//! Host notification queue.
//!
//! The core never calls back into the host directly. State changes that the
//! host needs to know about are posted as messages to a queue owned by the
//! top-level machine object; the host drains the queue whenever it likes.

use std::collections::VecDeque;

/// A notification from the core to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// CPU returned to normal operation.
    CpuOk,
    /// CPU halted on a soft breakpoint (tag was cleared).
    CpuSoftBreakpoint,
    /// CPU halted on a hard breakpoint.
    CpuHardBreakpoint,
    /// CPU halted on an opcode it does not implement.
    CpuIllegalInstruction,
    /// A cartridge was attached to the expansion port.
    CartridgeAttached,
    /// The cartridge was removed from the expansion port.
    CartridgeDetached,
    /// A cartridge switch or LED changed state.
    CartridgeLed(bool),
    /// Drive activity LED.
    DriveLed(bool),
    /// Sound output enabled or disabled.
    SoundOn(bool),
    /// Emulation started running.
    Run,
    /// Emulation halted.
    Halt,
}

/// FIFO of pending host notifications.
///
/// Bounded: if the host never drains it, old messages are dropped rather than
/// growing without limit.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: VecDeque<Message>,
}

impl MessageQueue {
    const CAPACITY: usize = 64;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a message. Drops the oldest entry if the queue is full.
    pub fn put(&mut self, msg: Message) {
        if self.queue.len() >= Self::CAPACITY {
            self.queue.pop_front();
        }
        self.queue.push_back(msg);
    }

    /// Remove and return the oldest pending message.
    pub fn get(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = MessageQueue::new();
        q.put(Message::Run);
        q.put(Message::Halt);
        assert_eq!(q.get(), Some(Message::Run));
        assert_eq!(q.get(), Some(Message::Halt));
        assert_eq!(q.get(), None);
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut q = MessageQueue::new();
        for _ in 0..MessageQueue::CAPACITY {
            q.put(Message::CpuOk);
        }
        q.put(Message::Halt);
        // Oldest entry gone, newest present.
        let mut last = None;
        while let Some(m) = q.get() {
            last = Some(m);
        }
        assert_eq!(last, Some(Message::Halt));
    }
}
