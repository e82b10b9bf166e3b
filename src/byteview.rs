//! Provides the immutable value snapshots handed out by caches.
//!
//! Cached data is shared between the cache itself, concurrent readers and - when a
//! node answers for a peer - the HTTP layer. To make this safe, values are never
//! exposed as mutable buffers. A [ByteView] wraps a reference counted, immutable
//! [Bytes](bytes::Bytes) buffer: cloning a view is cheap, and the only way to obtain
//! a mutable buffer is [ByteView::to_vec] which copies.

use std::fmt;

use bytes::Bytes;

use crate::lru::ByteSize;

/// An immutable snapshot of a cache value.
///
/// Views behave like values: they can be cloned freely, compared for equality and
/// formatted, but the underlying bytes can never be modified through them.
///
/// # Examples
/// ```
/// use callisto::ByteView;
///
/// let view = ByteView::from("moon data");
/// assert_eq!(view.len(), 9);
/// assert_eq!(view.to_string(), "moon data");
///
/// // to_vec copies - changing the copy doesn't affect the view...
/// let mut copy = view.to_vec();
/// copy[0] = b'M';
/// assert_eq!(view.as_slice()[0], b'm');
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a view taking ownership of the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }

    /// Returns the length of the underlying value in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the view contains any data at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provides read access to the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns a copy of the underlying bytes.
    ///
    /// The returned buffer is owned by the caller. Modifying it has no effect on
    /// the view or on any value stored in a cache.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView::new(data)
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}
