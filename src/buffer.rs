//! A set of reusable buffers for Bolt protocol communication, adapted from the teacher's
//! `BufferSet` pattern: one connection reuses these across every request instead of
//! allocating fresh `Vec`s per call.

/// `BoltConnection` uses a single `BufferSet` for all its operations.
#[derive(Debug, Default)]
pub struct BufferSet {
    /// Scratch space for one encoded message payload, before chunking.
    /// Bytes are valid during an operation.
    pub message: Vec<u8>,

    /// Scratch space for the chunked bytes a message encodes to, ready to write to the
    /// socket in one call.
    /// Bytes are valid during an operation.
    pub framed: Vec<u8>,

    /// General-purpose read buffer accumulating bytes off the socket until a full
    /// message's chunks have arrived.
    /// Bytes are valid during an operation.
    pub read: Vec<u8>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear and return the message scratch buffer.
    #[inline]
    pub fn new_message_buffer(&mut self) -> &mut Vec<u8> {
        self.message.clear();
        &mut self.message
    }

    /// Clear and return the framed-bytes scratch buffer.
    #[inline]
    pub fn new_framed_buffer(&mut self) -> &mut Vec<u8> {
        self.framed.clear();
        &mut self.framed
    }

    #[inline]
    pub fn read_buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_buffer_clears_previous_contents() {
        let mut buffers = BufferSet::new();
        buffers.new_message_buffer().extend_from_slice(b"stale");
        assert!(buffers.new_message_buffer().is_empty());
    }

    #[test]
    fn buffers_start_empty() {
        let buffers = BufferSet::new();
        assert!(buffers.message.is_empty());
        assert!(buffers.framed.is_empty());
        assert!(buffers.read.is_empty());
    }
}
