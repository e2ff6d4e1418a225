/// Growable byte container with a write cursor (`pointer`) distinct from
/// capacity.
///
/// Grounded in the original's `BasicBuffer` (raw pointer + separate length
/// field, geometric growth, `reset()` that keeps capacity). The Rust version
/// is backed by a plain `Vec<u8>` and an index-based cursor, so there is no
/// raw pointer for a `resize` to invalidate — callers index into `data()`
/// instead of holding borrowed pointers across a growth (see DESIGN.md).
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    pointer: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new(), pointer: 0 }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { data: Vec::with_capacity(cap), pointer: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pointer
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pointer == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Grow capacity geometrically to at least `min_capacity`, preserving data.
    pub fn resize(&mut self, min_capacity: usize) {
        if self.data.capacity() < min_capacity {
            let target = (self.data.capacity() * 2).max(min_capacity);
            self.data.reserve(target - self.data.len());
        }
    }

    /// Reset the write cursor to zero. Capacity (and any stale bytes beyond
    /// the new cursor) is kept, matching the original's `reset()`.
    pub fn reset(&mut self) {
        self.pointer = 0;
        self.data.truncate(0);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.pointer = self.data.len();
    }

    pub fn push(&mut self, byte: u8) {
        self.data.push(byte);
        self.pointer = self.data.len();
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.pointer]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.pointer]
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        let pointer = data.len();
        Self { data, pointer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_preserves_data() {
        let mut buf = Buffer::new();
        buf.extend_from_slice(b"hello");
        buf.resize(4096);
        assert!(buf.capacity() >= 4096);
        assert_eq!(buf.as_slice(), b"hello");
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = Buffer::with_capacity(1024);
        buf.extend_from_slice(b"some bytes");
        let cap_before = buf.capacity();
        buf.reset();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), cap_before);
    }
}
