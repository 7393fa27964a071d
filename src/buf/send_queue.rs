use std::collections::VecDeque;
use std::io::{self, Write};

/// A single deferred write. Bytes already flushed are dropped from the
/// front via `advance` rather than tracked with a separate cursor, since
/// sends are expected to complete in a handful of partial writes at most.
pub struct SendBuffer {
    data: Vec<u8>,
}

impl SendBuffer {
    pub fn new(data: Vec<u8>) -> SendBuffer {
        SendBuffer { data }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Attempt a single non-blocking write, dropping the bytes that made it
    /// out. Returns the number of bytes written.
    pub fn flush_into<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        let n = sink.write(&self.data)?;
        self.data.drain(..n);
        Ok(n)
    }
}

/// The bounded list of pending send buffers owned by a `Channel`. The
/// maximum length is fixed at construction (§3).
pub struct SendQueue {
    max_len: usize,
    buffers: VecDeque<SendBuffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl SendQueue {
    pub fn new(max_len: usize) -> SendQueue {
        SendQueue {
            max_len,
            buffers: VecDeque::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn push(&mut self, buf: SendBuffer) -> Result<(), QueueFull> {
        if self.buffers.len() >= self.max_len {
            return Err(QueueFull);
        }
        self.buffers.push_back(buf);
        Ok(())
    }

    pub fn push_front(&mut self, buf: SendBuffer) {
        self.buffers.push_front(buf);
    }

    /// Flush as much of the front of the queue as the socket will currently
    /// accept, dropping fully-flushed buffers. Returns `Ok(true)` if the
    /// queue drained completely.
    pub fn flush_into<W: Write>(&mut self, sink: &mut W) -> io::Result<bool> {
        while let Some(front) = self.buffers.front_mut() {
            front.flush_into(sink)?;
            if front.is_empty() {
                self.buffers.pop_front();
            } else {
                // Socket accepted fewer bytes than we had queued; it will
                // report would-block on the next write attempt.
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink(Vec<u8>);
    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bounded_push_rejects_past_max() {
        let mut q = SendQueue::new(1);
        assert!(q.push(SendBuffer::new(vec![1])).is_ok());
        assert_eq!(q.push(SendBuffer::new(vec![2])), Err(QueueFull));
    }

    #[test]
    fn flush_drains_in_order() {
        let mut q = SendQueue::new(4);
        q.push(SendBuffer::new(b"ab".to_vec())).unwrap();
        q.push(SendBuffer::new(b"cd".to_vec())).unwrap();

        let mut sink = Sink(Vec::new());
        let drained = q.flush_into(&mut sink).unwrap();
        assert!(drained);
        assert!(q.is_empty());
        assert_eq!(sink.0, b"abcd");
    }
}
