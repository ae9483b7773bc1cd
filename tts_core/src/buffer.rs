use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::BufferError;

/// Smallest capacity an accumulator starts with.
pub const MIN_INITIAL_CAPACITY: usize = 1024 * 1024;

/// Largest capacity reserved up front; growth past it happens on demand.
pub const MAX_INITIAL_CAPACITY: usize = 16 * 1024 * 1024;

/// Growable byte FIFO shared by the fetch worker (writer) and the frame
/// consumer (reader).
///
/// Reads drain from the front and compact the remainder to offset 0. All
/// operations hold the lock only for the copy.
#[derive(Debug)]
pub struct ByteAccumulator {
    inner: Mutex<Vec<u8>>,
}

impl ByteAccumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Sized for one hundred frames, within [`MIN_INITIAL_CAPACITY`] and
    /// [`MAX_INITIAL_CAPACITY`].
    pub fn for_frame_bytes(frame_bytes: usize) -> Self {
        let capacity = frame_bytes.saturating_mul(100);
        Self::with_capacity(capacity.clamp(MIN_INITIAL_CAPACITY, MAX_INITIAL_CAPACITY))
    }

    // A poisoned lock only means a holder panicked between plain byte copies;
    // the vector itself is still well-formed.
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `data`. An empty slice is a no-op.
    pub fn write(&self, data: &[u8]) -> Result<(), BufferError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut buf = self.lock();
        let len = buf.len();
        let needed = len + data.len();
        if needed > buf.capacity() {
            let new_capacity = (buf.capacity() * 2).max(needed * 2);
            buf.try_reserve_exact(new_capacity - len)
                .map_err(|_| BufferError::OutOfMemory {
                    requested: new_capacity,
                })?;
            debug!("Audio buffer grown to {} bytes", buf.capacity());
        }
        buf.extend_from_slice(data);
        Ok(())
    }

    /// Removes and returns up to `frame_size` bytes from the front.
    pub fn read_frame(&self, frame_size: usize) -> Vec<u8> {
        let mut buf = self.lock();
        let n = frame_size.min(buf.len());
        buf.drain(..n).collect()
    }

    /// Drops buffered bytes, keeping the allocation.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}
