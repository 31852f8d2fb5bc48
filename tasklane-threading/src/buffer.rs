use std::borrow::Cow;
use std::io;

use parking_lot::Mutex;

pub use tasklane_config::DEFAULT_CHUNK_SIZE;

/// Source name given to code loaded from an unnamed [`TransportBuffer`].
pub const DEFAULT_BUFFER_NAME: &str = "=detached";

/// Error returned when a [`TransportBuffer`] cannot allocate.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Growing the storage to `requested` bytes failed.
    #[error("failed to allocate {requested} bytes for transport buffer")]
    AllocationFailure {
        /// The capacity that could not be reserved.
        requested: usize,
    },
}

#[derive(Debug)]
struct Storage {
    data: Vec<u8>,
    capacity: usize,
}

impl Storage {
    fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| BufferError::AllocationFailure {
                requested: capacity,
            })?;

        Ok(Self { data, capacity })
    }

    /// Grows the logical capacity by `max(chunk_size, additional)`.
    ///
    /// On failure, both the content and the capacity are left untouched.
    fn grow(&mut self, additional: usize, chunk_size: usize) -> Result<(), BufferError> {
        let step = chunk_size.max(additional);
        let requested = self
            .capacity
            .checked_add(step)
            .ok_or(BufferError::AllocationFailure {
                requested: usize::MAX,
            })?;

        self.data
            .try_reserve_exact(requested - self.data.len())
            .map_err(|_| BufferError::AllocationFailure { requested })?;

        self.capacity = requested;
        Ok(())
    }
}

/// A growable byte accumulator carrying a serialized payload between execution contexts.
///
/// The buffer starts out with one chunk of storage and grows in whole chunks, or by the size of
/// the appended slice if that is larger. Capacity never shrinks while the buffer is fed. All
/// operations take a per-buffer lock, so a buffer can be fed from several threads through a
/// shared reference.
///
/// Releasing the buffer consumes it, see [`TransportBuffer::release`].
///
/// # Example
///
/// ```
/// use tasklane_threading::TransportBuffer;
///
/// let buffer = TransportBuffer::with_chunk_size(4).unwrap();
/// buffer.feed(b"abc").unwrap();
/// assert_eq!(buffer.feed(b"defgh").unwrap(), 8);
/// assert!(buffer.is_ready() >= 8);
/// assert_eq!(buffer.into_bytes(), b"abcdefgh");
/// ```
#[derive(Debug)]
pub struct TransportBuffer {
    name: Cow<'static, str>,
    chunk_size: usize,
    storage: Mutex<Storage>,
}

impl TransportBuffer {
    /// Allocates a buffer with the default chunk size.
    pub fn new() -> Result<Self, BufferError> {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Allocates a buffer that starts with and grows by `chunk_size` bytes.
    ///
    /// A chunk size of zero is treated as one.
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, BufferError> {
        let chunk_size = chunk_size.max(1);

        Ok(Self {
            name: Cow::Borrowed(DEFAULT_BUFFER_NAME),
            chunk_size,
            storage: Mutex::new(Storage::with_capacity(chunk_size)?),
        })
    }

    /// Attaches a name tag to the buffer.
    ///
    /// The name is used as the source name when the payload is loaded as code.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the name tag of this buffer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `bytes` and returns the new used length.
    ///
    /// If the bytes do not fit, capacity is grown first. When that allocation fails, the error is
    /// returned and previously fed content stays intact.
    pub fn feed(&self, bytes: &[u8]) -> Result<usize, BufferError> {
        let mut storage = self.storage.lock();

        if storage.data.len() + bytes.len() > storage.capacity {
            storage.grow(bytes.len(), self.chunk_size)?;
        }

        storage.data.extend_from_slice(bytes);
        Ok(storage.data.len())
    }

    /// Returns the current capacity in bytes.
    ///
    /// A successfully constructed buffer always reports at least one chunk.
    pub fn is_ready(&self) -> usize {
        self.storage.lock().capacity
    }

    /// Returns the number of bytes fed so far.
    pub fn len(&self) -> usize {
        self.storage.lock().data.len()
    }

    /// Returns `true` if nothing has been fed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with the fed bytes while holding the buffer lock.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.storage.lock().data)
    }

    /// Consumes the buffer and returns its content.
    pub fn into_bytes(self) -> Vec<u8> {
        self.storage.into_inner().data
    }

    /// Frees the storage of this buffer.
    pub fn release(self) {
        tasklane_log::trace!(name = %self.name, "releasing transport buffer");
    }
}

impl From<BufferError> for io::Error {
    fn from(error: BufferError) -> Self {
        io::Error::new(io::ErrorKind::OutOfMemory, error)
    }
}

impl io::Write for &TransportBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.feed(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_starts_with_one_chunk() {
        let buffer = TransportBuffer::new().unwrap();
        assert_eq!(buffer.is_ready(), DEFAULT_CHUNK_SIZE);
        assert!(buffer.is_empty());
        assert_eq!(buffer.name(), DEFAULT_BUFFER_NAME);
    }

    #[test]
    fn test_oversized_chunk_fails_at_init() {
        let error = TransportBuffer::with_chunk_size(usize::MAX).unwrap_err();
        assert!(matches!(
            error,
            BufferError::AllocationFailure {
                requested: usize::MAX
            }
        ));
    }

    #[test]
    fn test_failed_grow_keeps_content() {
        let buffer = TransportBuffer::with_chunk_size(4).unwrap();
        buffer.feed(b"abc").unwrap();

        let error = buffer
            .storage
            .lock()
            .grow(isize::MAX as usize, buffer.chunk_size)
            .unwrap_err();
        assert!(matches!(
            error,
            BufferError::AllocationFailure { requested } if requested == 4 + isize::MAX as usize
        ));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.is_ready(), 4);
        buffer.with_bytes(|bytes| assert_eq!(bytes, b"abc"));

        // The buffer stays usable after the failure.
        assert_eq!(buffer.feed(b"de").unwrap(), 5);
        assert_eq!(buffer.into_bytes(), b"abcde");
    }

    #[test]
    fn test_capacity_overflow_keeps_content() {
        let buffer = TransportBuffer::with_chunk_size(4).unwrap();
        buffer.feed(b"ab").unwrap();

        let error = buffer
            .storage
            .lock()
            .grow(usize::MAX, buffer.chunk_size)
            .unwrap_err();
        assert!(matches!(
            error,
            BufferError::AllocationFailure {
                requested: usize::MAX
            }
        ));

        assert_eq!(buffer.is_ready(), 4);
        buffer.with_bytes(|bytes| assert_eq!(bytes, b"ab"));
    }

    #[test]
    fn test_allocation_failure_maps_to_out_of_memory() {
        let error = io::Error::from(BufferError::AllocationFailure { requested: 64 });
        assert_eq!(error.kind(), io::ErrorKind::OutOfMemory);
        assert_eq!(
            error.to_string(),
            "failed to allocate 64 bytes for transport buffer"
        );
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let buffer = TransportBuffer::with_chunk_size(0).unwrap();
        assert_eq!(buffer.is_ready(), 1);
        assert_eq!(buffer.feed(b"xyz").unwrap(), 3);
    }

    #[test]
    fn test_grows_by_chunk_for_small_writes() {
        let buffer = TransportBuffer::with_chunk_size(8).unwrap();
        buffer.feed(&[1; 6]).unwrap();
        assert_eq!(buffer.is_ready(), 8);

        // Exceeds capacity by a few bytes, so exactly one chunk is added.
        buffer.feed(&[2; 4]).unwrap();
        assert_eq!(buffer.is_ready(), 16);
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_grows_by_request_for_large_writes() {
        let buffer = TransportBuffer::with_chunk_size(8).unwrap();
        buffer.feed(&[1; 4]).unwrap();
        buffer.feed(&[2; 100]).unwrap();
        assert_eq!(buffer.is_ready(), 108);
        assert_eq!(buffer.len(), 104);
    }

    #[test]
    fn test_content_is_concatenation_of_chunks() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let buffer = TransportBuffer::with_chunk_size(16).unwrap();

        let mut offset = 0;
        for size in [1, 7, 16, 17, 300, 1, 2048].iter().cycle() {
            if offset >= payload.len() {
                break;
            }
            let end = (offset + size).min(payload.len());
            let len = buffer.feed(&payload[offset..end]).unwrap();
            assert_eq!(len, end);
            offset = end;
        }

        assert!(buffer.is_ready() >= payload.len());
        buffer.with_bytes(|bytes| assert_eq!(bytes, payload.as_slice()));
        assert_eq!(buffer.into_bytes(), payload);
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let buffer = TransportBuffer::with_chunk_size(4).unwrap();
        let mut last = buffer.is_ready();
        for size in [3, 0, 9, 1, 1, 20] {
            buffer.feed(&vec![0; size]).unwrap();
            let capacity = buffer.is_ready();
            assert!(capacity >= last);
            assert!(capacity >= buffer.len());
            last = capacity;
        }
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let buffer = TransportBuffer::with_chunk_size(4).unwrap();
        assert_eq!(buffer.feed(&[]).unwrap(), 0);
        assert_eq!(buffer.is_ready(), 4);
    }

    #[test]
    fn test_write_impl_appends() {
        let buffer = TransportBuffer::with_chunk_size(2).unwrap().named("dump");
        write!(&buffer, "hello {}", 42).unwrap();
        assert_eq!(buffer.name(), "dump");
        assert_eq!(buffer.into_bytes(), b"hello 42");
    }

    #[test]
    fn test_concurrent_feeders_do_not_lose_bytes() {
        let buffer = Arc::new(TransportBuffer::with_chunk_size(3).unwrap());

        let threads: Vec<_> = (0..4u8)
            .map(|id| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        buffer.feed(&[id, id]).unwrap();
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        let bytes = Arc::try_unwrap(buffer).unwrap().into_bytes();
        assert_eq!(bytes.len(), 2000);
        // Each feed is atomic, so pairs are never torn apart.
        assert!(bytes.chunks(2).all(|pair| pair[0] == pair[1]));
    }
}
