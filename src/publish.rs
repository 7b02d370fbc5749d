//! Lock-free single producer single consumer triple buffer.
//!
//! The writer owns one slot, the reader owns another one and the third slot is the hand over
//! point. Publishing swaps the writers slot with the hand over slot, reading swaps the hand over
//! slot with the readers slot if something new was published. Neither side ever waits and the
//! reader always sees a complete value.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

pub struct TripleBuffer<T> {
    slots: [UnsafeCell<T>; 3],
    back: AtomicU8,
    master: T,
    write_index: u8,
    read_index: u8,
}

// Slots are only accessed through the handles, each of them exclusively owns the slot its
// index points to.
unsafe impl<T: Send> Sync for TripleBuffer<T> {}

impl<T: Clone> TripleBuffer<T> {
    pub fn new(value: T) -> Self {
        Self {
            slots: [
                UnsafeCell::new(value.clone()),
                UnsafeCell::new(value.clone()),
                UnsafeCell::new(value.clone()),
            ],
            back: AtomicU8::new(1),
            master: value,
            write_index: 0,
            read_index: 2,
        }
    }
}

impl<T> TripleBuffer<T> {
    /// Splits the buffer into its writing and reading half.
    pub fn split(&mut self) -> (Publisher<'_, T>, Subscriber<'_, T>) {
        let TripleBuffer {
            slots,
            back,
            master,
            write_index,
            read_index,
        } = self;
        let slots = &*slots;
        let back = &*back;

        (
            Publisher {
                slots,
                back,
                master,
                index: write_index,
            },
            Subscriber {
                slots,
                back,
                index: read_index,
            },
        )
    }
}

/// Writing half of a [TripleBuffer].
pub struct Publisher<'a, T> {
    slots: &'a [UnsafeCell<T>; 3],
    back: &'a AtomicU8,
    master: &'a mut T,
    index: &'a mut u8,
}

unsafe impl<T: Send> Send for Publisher<'_, T> {}

impl<T: Clone> Publisher<'_, T> {
    /// The value that will be published next. Changes stay private until [Publisher::publish].
    pub fn staged(&mut self) -> &mut T {
        self.master
    }

    pub fn current(&self) -> &T {
        self.master
    }

    /// Makes the staged value visible to the subscriber.
    pub fn publish(&mut self) {
        let index = *self.index as usize;
        // SAFETY: the slot at our index is not reachable by the subscriber until it is swapped
        // into the back position below.
        unsafe { (*self.slots[index].get()).clone_from(self.master) };

        let previous = self.back.swap(*self.index | FRESH, Ordering::AcqRel);
        *self.index = previous & INDEX_MASK;
    }

    /// Replaces the staged value and publishes it.
    pub fn write(&mut self, value: T) {
        *self.master = value;
        self.publish();
    }
}

/// Reading half of a [TripleBuffer].
pub struct Subscriber<'a, T> {
    slots: &'a [UnsafeCell<T>; 3],
    back: &'a AtomicU8,
    index: &'a mut u8,
}

unsafe impl<T: Send> Send for Subscriber<'_, T> {}

impl<T> Subscriber<'_, T> {
    /// Returns true if a value was published since the last [Subscriber::read].
    pub fn has_fresh(&self) -> bool {
        self.back.load(Ordering::Relaxed) & FRESH != 0
    }

    /// Returns the latest published value.
    pub fn read(&mut self) -> &T {
        if self.has_fresh() {
            let previous = self.back.swap(*self.index, Ordering::AcqRel);
            *self.index = previous & INDEX_MASK;
        }

        // SAFETY: the publisher never touches the slot the subscriber holds.
        unsafe { &*self.slots[*self.index as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_initial_value() {
        let mut buffer = TripleBuffer::new(7u32);
        let (_, mut subscriber) = buffer.split();

        assert!(!subscriber.has_fresh());
        assert_eq!(*subscriber.read(), 7);
    }

    #[test]
    fn test_latest_publish_wins() {
        let mut buffer = TripleBuffer::new(0u32);
        let (mut publisher, mut subscriber) = buffer.split();

        publisher.write(1);
        publisher.write(2);
        *publisher.staged() = 3;
        assert!(subscriber.has_fresh());
        assert_eq!(*subscriber.read(), 2);
        assert!(!subscriber.has_fresh());

        publisher.publish();
        assert_eq!(*subscriber.read(), 3);
        assert_eq!(*subscriber.read(), 3);
    }

    #[test]
    fn test_split_keeps_state() {
        let mut buffer = TripleBuffer::new(0u32);
        {
            let (mut publisher, _) = buffer.split();
            publisher.write(5);
        }

        let (publisher, mut subscriber) = buffer.split();
        assert_eq!(*publisher.current(), 5);
        assert_eq!(*subscriber.read(), 5);
    }

    #[test]
    fn test_concurrent_snapshots_are_consistent() {
        let mut buffer = TripleBuffer::new([0u8; 64]);
        let (mut publisher, mut subscriber) = buffer.split();

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for round in 0..20_000u32 {
                    publisher.write([round as u8; 64]);
                }
            });

            scope.spawn(move || {
                for _ in 0..20_000 {
                    let value = subscriber.read();
                    assert!(value.iter().all(|byte| *byte == value[0]));
                }
            });
        });
    }
}
