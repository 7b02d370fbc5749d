//! Channel buffer of a single universe shared between the network and the signal context.

use crate::consts::{DMX_MAX_PACKAGE_SIZE, DMX_MAX_SLOTS, DMX_NULL_START};
use crate::publish::{Publisher, Subscriber, TripleBuffer};

/// Start code followed by 512 channel values.
pub type DmxFrame = [u8; DMX_MAX_PACKAGE_SIZE];

pub struct Universe {
    buffer: TripleBuffer<DmxFrame>,
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    /// Creates a universe with null start code and all channels at zero.
    pub fn new() -> Self {
        let mut frame = [0u8; DMX_MAX_PACKAGE_SIZE];
        frame[0] = DMX_NULL_START;

        Self {
            buffer: TripleBuffer::new(frame),
        }
    }

    pub fn split(&mut self) -> (UniverseWriter<'_>, UniverseReader<'_>) {
        let (publisher, subscriber) = self.buffer.split();

        (
            UniverseWriter { publisher },
            UniverseReader { subscriber },
        )
    }
}

/// Network side of a [Universe].
pub struct UniverseWriter<'a> {
    publisher: Publisher<'a, DmxFrame>,
}

impl UniverseWriter<'_> {
    /// Copies `data` into the universe starting at the 1-based `slot` and publishes the result.
    /// Everything past slot 512 is dropped. Returns the number of slots written.
    pub fn write(&mut self, slot: usize, data: &[u8]) -> usize {
        if slot == 0 || slot > DMX_MAX_SLOTS {
            return 0;
        }

        let slots_written = data.len().min(DMX_MAX_SLOTS + 1 - slot);
        self.publisher.staged()[slot..slot + slots_written]
            .copy_from_slice(&data[..slots_written]);
        self.publisher.publish();

        slots_written
    }

    pub fn set_start_code(&mut self, start_code: u8) {
        self.publisher.staged()[0] = start_code;
        self.publisher.publish();
    }

    /// Sets all channels to zero.
    pub fn clear(&mut self) {
        self.publisher.staged()[1..].fill(0);
        self.publisher.publish();
    }

    /// The values as written by this side, including unpublished changes.
    pub fn current(&self) -> &DmxFrame {
        self.publisher.current()
    }
}

/// Signal side of a [Universe].
pub struct UniverseReader<'a> {
    subscriber: Subscriber<'a, DmxFrame>,
}

impl UniverseReader<'_> {
    /// The most recently published frame.
    pub fn snapshot(&mut self) -> &DmxFrame {
        self.subscriber.read()
    }
}
