/*!
    Where compressed packets come from.
*/

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use interop_types::{Packet, Result};

/**
    A stream of compressed packets, read in order.
*/
pub trait PacketSource {
    /// The next packet, or `None` once the stream has ended.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

impl PacketSource for VecDeque<Packet> {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.pop_front())
    }
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        (**self).read_packet()
    }
}

/**
    Adapts any packet iterator into a [`PacketSource`].
*/
#[derive(Debug)]
pub struct IterSource<I>(pub I);

impl<I: Iterator<Item = Packet>> PacketSource for IterSource<I> {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.0.next())
    }
}

struct PacketQueueInner {
    packets: VecDeque<Packet>,
    capacity: usize,
    closed: bool,
}

/**
    Thread-safe bounded queue for packets.
    Used to route demuxed packets to the decode thread.
*/
pub struct PacketQueue {
    inner: Mutex<PacketQueueInner>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl PacketQueue {
    /**
        Create a new packet queue with the given capacity
    */
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PacketQueueInner {
                packets: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /**
        Push a packet to the queue, blocking if full.
        Returns false if the queue was closed.
    */
    pub fn push(&self, packet: Packet) -> bool {
        let mut inner = self.inner.lock();

        while inner.packets.len() >= inner.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }

        if inner.closed {
            return false;
        }

        inner.packets.push_back(packet);
        self.not_empty.notify_one();
        true
    }

    /**
        Pop a packet from the queue, blocking if empty.
        Returns None if the queue is closed and empty.
    */
    pub fn pop(&self) -> Option<Packet> {
        let mut inner = self.inner.lock();

        while inner.packets.is_empty() && !inner.closed {
            self.not_empty.wait(&mut inner);
        }

        let packet = inner.packets.pop_front();
        if packet.is_some() {
            self.not_full.notify_one();
        }
        packet
    }

    /**
        Close the queue, signaling end of stream.
        Packets already queued can still be popped.
    */
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().packets.is_empty()
    }

    /**
        Clear all packets from the queue.
        Wakes any threads waiting to push.
    */
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.packets.clear();
        self.not_full.notify_all();
    }

    /**
        Reopen a closed queue for reuse (e.g., after seeking).
        Clears any remaining packets and resets the closed flag.
    */
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.packets.clear();
        inner.closed = false;
        self.not_full.notify_all();
    }
}

impl PacketSource for Arc<PacketQueue> {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.pop())
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PacketQueue")
            .field("len", &inner.packets.len())
            .field("capacity", &inner.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn packet(n: u8) -> Packet {
        Packet::new(0, vec![n])
    }

    #[test]
    fn iter_source_reads_in_order() {
        let mut source = IterSource((1..=3).map(packet));
        let mut seen = Vec::new();
        while let Some(p) = source.read_packet().unwrap() {
            seen.push(p.data[0]);
        }
        assert_eq!(seen, [1, 2, 3]);
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let queue = PacketQueue::new(4);
        assert!(queue.push(packet(1)));
        queue.close();
        assert!(!queue.push(packet(2)));
        assert_eq!(queue.pop().map(|p| p.data[0]), Some(1));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_blocks_until_space() {
        let queue = Arc::new(PacketQueue::new(1));
        assert!(queue.push(packet(1)));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(packet(2)))
        };

        let mut source = queue.clone();
        assert_eq!(source.read_packet().unwrap().map(|p| p.data[0]), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(source.read_packet().unwrap().map(|p| p.data[0]), Some(2));
    }

    #[test]
    fn reopen_clears_and_accepts_again() {
        let queue = PacketQueue::new(2);
        queue.push(packet(1));
        queue.close();
        assert!(queue.is_closed());

        queue.reopen();
        assert!(!queue.is_closed());
        assert!(queue.is_empty());
        assert!(queue.push(packet(3)));
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert_eq!(queue.len(), 0);
    }
}
