//! Message envelope information.
//!
//! This module provides the [`Status`] struct returned by probe, receive and
//! wait operations. It describes a message (who sent it, with which tag, and
//! how large it is) independently of the element kind it is read as.

use crate::datatype::ElementKind;
use crate::substrate::{ANY_SOURCE, ANY_TAG};

/// Envelope of a probed or received message.
///
/// # Example
///
/// ```
/// use tclmpi::{ElementKind, Status};
///
/// let status = Status::new(3, 42, 24);
/// assert_eq!(status.count_char(), 24);
/// assert_eq!(status.count_int(), 6);
/// assert_eq!(status.count_double(), 3);
/// assert_eq!(status.count(ElementKind::FloatInt), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message.
    pub source: i32,
    /// Tag of the message.
    pub tag: i32,
    /// Error code reported for the message (0 on success).
    pub error: i32,
    /// Size of the message in bytes on the wire, padding excluded.
    pub bytes: usize,
}

impl Status {
    /// A successful status for a message of `bytes` bytes.
    pub fn new(source: i32, tag: i32, bytes: usize) -> Self {
        Status {
            source,
            tag,
            error: 0,
            bytes,
        }
    }

    /// The status of an operation without a message, e.g. a completed send.
    pub fn empty() -> Self {
        Status::new(ANY_SOURCE, ANY_TAG, 0)
    }

    /// Message size counted in bytes.
    pub fn count_char(&self) -> usize {
        self.bytes
    }

    /// Message size counted in 32-bit integers.
    pub fn count_int(&self) -> usize {
        self.count(ElementKind::Int)
    }

    /// Message size counted in doubles.
    pub fn count_double(&self) -> usize {
        self.count(ElementKind::Float)
    }

    /// Number of whole `kind` elements in the message.
    ///
    /// Counts are taken from the wire size, so a message of three `dblint`
    /// elements (36 bytes) reads as 9 ints or 4 doubles. A trailing partial
    /// element is dropped where MPI would report `MPI_UNDEFINED`.
    pub fn count(&self, kind: ElementKind) -> usize {
        self.bytes / kind.wire_width()
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_status_uses_wildcards() {
        let status = Status::empty();
        assert_eq!(status.source, ANY_SOURCE);
        assert_eq!(status.tag, ANY_TAG);
        assert_eq!(status.count_char(), 0);
        assert_eq!(status, Status::default());
    }

    #[test]
    fn partial_elements_are_not_counted() {
        let status = Status::new(0, 1, 10);
        assert_eq!(status.count_int(), 2);
        assert_eq!(status.count_double(), 1);
        assert_eq!(status.count(ElementKind::Bytes), 10);
    }

    #[test]
    fn pair_messages_count_wire_bytes() {
        let status = Status::new(0, 0, 36);
        assert_eq!(status.count(ElementKind::FloatInt), 3);
        assert_eq!(status.count(ElementKind::IntPair), 4);
        assert_eq!(status.count_int(), 9);
        assert_eq!(status.count_double(), 4);
    }
}
