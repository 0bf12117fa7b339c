use std::collections::TryReserveError;

/// Fixed-capacity byte storage circulated between the empty and full queues.
///
/// `len` bytes from the start are valid; the rest of the capacity is scratch space.
#[derive(Debug)]
pub struct Buffer {
    id: usize,
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    /// Allocates a zeroed buffer of `capacity` bytes, reporting allocation failure
    /// instead of aborting.
    pub fn try_new(id: usize, capacity: usize) -> Result<Buffer, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0u8);
        Ok(Buffer {
            id,
            data: data.into_boxed_slice(),
            len: 0,
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole capacity, for a source to write into.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Records how many bytes are in use. Returns false and leaves the buffer
    /// untouched if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) -> bool {
        if len > self.data.len() {
            return false;
        }
        self.len = len;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}
