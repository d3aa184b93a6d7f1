//! Bounded destination path buffer
//!
//! The walker builds every destination path in one buffer whose capacity is
//! fixed up front. Each level of recursion appends `segment/` and truncates
//! back when it returns, so a traversal of any depth never reallocates, and a
//! path that would not fit is refused instead of being cut short.

use std::ops::{Deref, DerefMut};

use crate::error::PathTooLong;

pub const SEPARATOR: char = '/';

/// Position to truncate back to after a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMark(usize);

/// Fixed-capacity path buffer with push/pop semantics
#[derive(Debug)]
pub struct PathAccumulator {
    buf: String,
    capacity: usize,
}

impl PathAccumulator {
    /// `capacity` counts a terminator, so the longest path is `capacity - 1` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append `segment` and a separator. Leaves the buffer untouched on overflow.
    pub fn push(&mut self, segment: &str) -> Result<PathMark, PathTooLong> {
        self.check(segment)?;
        let segment = segment.trim_end_matches(SEPARATOR);
        let mark = PathMark(self.buf.len());
        self.buf.push_str(segment);
        self.buf.push(SEPARATOR);
        Ok(mark)
    }

    /// Whether `segment` could be pushed without overflowing
    pub fn check(&self, segment: &str) -> Result<(), PathTooLong> {
        let segment = segment.trim_end_matches(SEPARATOR);
        if self.buf.len() + segment.len() + 1 >= self.capacity {
            return Err(PathTooLong {
                parent: self.buf.clone(),
                segment: segment.to_string(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Truncate back to `mark`
    pub fn pop(&mut self, mark: PathMark) {
        self.buf.truncate(mark.0);
    }

    /// Push `segment` for the lifetime of the returned scope
    pub fn enter(&mut self, segment: &str) -> Result<PathScope<'_>, PathTooLong> {
        let mark = self.push(segment)?;
        Ok(PathScope { path: self, mark })
    }

    /// The path built so far, ending in a separator unless empty
    pub fn current(&self) -> &str {
        &self.buf
    }

    /// The path without its trailing separator, as used for file entries
    pub fn entry_path(&self) -> &str {
        self.buf.strip_suffix(SEPARATOR).unwrap_or(&self.buf)
    }
}

/// A pushed segment that is popped when the scope ends
pub struct PathScope<'a> {
    path: &'a mut PathAccumulator,
    mark: PathMark,
}

impl Deref for PathScope<'_> {
    type Target = PathAccumulator;

    fn deref(&self) -> &PathAccumulator {
        self.path
    }
}

impl DerefMut for PathScope<'_> {
    fn deref_mut(&mut self) -> &mut PathAccumulator {
        self.path
    }
}

impl Drop for PathScope<'_> {
    fn drop(&mut self) {
        self.path.pop(self.mark);
    }
}
