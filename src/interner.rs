//! Label interning table
//!
//! Deduplicates string labels into a single append-only byte buffer with
//! minimal fragmentation. Identical content is stored exactly once and is
//! identified by a stable byte offset into the buffer.
//!
//! The dedup index stores only `(content hash, offset)` pairs, never a second
//! copy of the string: lookups hash the probe content and resolve candidate
//! offsets back through the owning buffer with a byte comparison. Equality is
//! therefore always structural, never pointer identity.

use std::hash::Hasher;

use fnv::{FnvHashMap, FnvHasher};

use crate::error::{Error, Result};

/// Default initial capacity of the backing buffer, in bytes.
const DEFAULT_CAPACITY: usize = 2048;

/// Append-only, deduplicating string storage with stable offsets.
///
/// Offsets returned by [`push_back`](LabelInterner::push_back) never change;
/// only new content is ever appended. Views returned by
/// [`get`](LabelInterner::get) borrow the buffer and end before the next
/// insertion.
///
/// # Example
///
/// ```
/// use medir::interner::LabelInterner;
///
/// let mut db = LabelInterner::new();
/// let dog = db.push_back("dog").unwrap();
/// let cat = db.push_back("cat").unwrap();
/// assert_eq!(db.push_back("dog").unwrap(), dog);
/// assert_eq!(db.get(dog), "dog");
/// assert_eq!(db.get(cat), "cat");
/// ```
#[derive(Debug, Clone)]
pub struct LabelInterner {
    /// NUL-terminated label bytes, stored back to back: `"foo\0bar\0"`.
    data: Vec<u8>,
    /// Content hash -> offsets of entries with that hash. Collisions are
    /// resolved by comparing bytes through `data`.
    index: FnvHashMap<u64, Vec<u32>>,
}

impl LabelInterner {
    /// Creates an interner with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an interner with a caller-chosen initial capacity in bytes.
    ///
    /// Small capacities are useful in tests to force buffer regrowth.
    pub fn with_capacity(capacity: usize) -> Self {
        LabelInterner {
            data: Vec::with_capacity(capacity),
            index: FnvHashMap::default(),
        }
    }

    /// Interns `label`, returning the stable offset of its content.
    ///
    /// If identical content is already stored, the existing offset is
    /// returned and nothing is appended. Labels are stored up to their first
    /// interior NUL byte, which doubles as the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when buffer growth fails or the buffer
    /// would exceed the `u32` offset range.
    pub fn push_back(&mut self, label: &str) -> Result<u32> {
        let bytes = terminated_prefix(label.as_bytes());
        let hash = content_hash(bytes);

        if let Some(offsets) = self.index.get(&hash) {
            for &offset in offsets {
                if self.stored_bytes(offset) == bytes {
                    return Ok(offset);
                }
            }
        }

        let offset = u32::try_from(self.data.len()).map_err(|_| Error::OutOfMemory)?;
        self.reserve_for(bytes.len() + 1)?;
        self.data.extend_from_slice(bytes);
        self.data.push(0);

        self.index.entry(hash).or_default().push(offset);
        Ok(offset)
    }

    /// Returns the content stored at `offset`.
    ///
    /// The returned view is valid until the next insertion; callers that
    /// need longevity should keep the offset instead.
    pub fn get(&self, offset: u32) -> &str {
        // The buffer only ever holds bytes copied from `&str` inputs,
        // truncated at a NUL codepoint boundary, so this cannot fail.
        std::str::from_utf8(self.stored_bytes(offset)).unwrap_or("")
    }

    /// True if the entry at `offset` stores the same content as `probe`.
    ///
    /// The probe is truncated at its first interior NUL, exactly as
    /// [`push_back`](LabelInterner::push_back) would store it, so a label
    /// compares equal to its own stored form.
    pub fn content_eq(&self, offset: u32, probe: &str) -> bool {
        self.stored_bytes(offset) == terminated_prefix(probe.as_bytes())
    }

    /// Number of bytes currently stored, terminators included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes of the entry starting at `offset`, terminator excluded.
    fn stored_bytes(&self, offset: u32) -> &[u8] {
        let start = offset as usize;
        let tail = &self.data[start..];
        match tail.iter().position(|&b| b == 0) {
            Some(end) => &tail[..end],
            None => tail,
        }
    }

    /// Ensures room for `additional` bytes, growing to at least 1.5x the
    /// current capacity (or exactly enough, whichever is larger).
    fn reserve_for(&mut self, additional: usize) -> Result<()> {
        let needed = self.data.len() + additional;
        if needed <= self.data.capacity() {
            return Ok(());
        }

        let grown = self.data.capacity() + self.data.capacity() / 2;
        let target = grown.max(needed);
        self.data.try_reserve_exact(target - self.data.len())?;
        Ok(())
    }
}

impl Default for LabelInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a hash of the content bytes.
fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Truncates at the first interior NUL, mirroring the stored form.
fn terminated_prefix(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_get() {
        let mut db = LabelInterner::new();
        let dog = db.push_back("dog").unwrap();
        let cat = db.push_back("cat").unwrap();

        assert_ne!(dog, cat);
        assert_eq!(db.get(dog), "dog");
        assert_eq!(db.get(cat), "cat");
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut db = LabelInterner::new();
        let first = db.push_back("dog").unwrap();
        let second = db.push_back("dog").unwrap();
        assert_eq!(first, second);
        // "dog" plus its terminator, stored once.
        assert_eq!(db.len(), 4);
    }

    #[test]
    fn test_structural_equality_across_instances() {
        let mut db = LabelInterner::new();
        let owned = String::from("dog");
        let a = db.push_back("dog").unwrap();
        let b = db.push_back(owned.as_str()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_offsets_survive_regrowth() {
        // Capacity 1 forces a regrow on nearly every insertion.
        let mut db = LabelInterner::with_capacity(1);
        let mut offsets = Vec::new();
        for i in 0..64 {
            offsets.push((format!("label_{i}"), db.push_back(&format!("label_{i}")).unwrap()));
        }
        for (label, offset) in &offsets {
            assert_eq!(db.get(*offset), label.as_str());
        }
    }

    #[test]
    fn test_empty_label() {
        let mut db = LabelInterner::new();
        let empty = db.push_back("").unwrap();
        assert_eq!(db.get(empty), "");
        assert_eq!(db.push_back("").unwrap(), empty);
    }

    #[test]
    fn test_interior_nul_truncates() {
        let mut db = LabelInterner::new();
        let idx = db.push_back("foo\0bar").unwrap();
        assert_eq!(db.get(idx), "foo");
        assert_eq!(db.push_back("foo").unwrap(), idx);
    }
}
