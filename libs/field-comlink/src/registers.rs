//! Double-buffered register file
//!
//! Two byte buffers of identical size, `old` and `new`, viewed as bytes,
//! little-endian words, little-endian double words or bits (bit `n` is bit
//! `n % 16` of word `n / 16`). Views overlap: word `i` covers bytes `2i`
//! and `2i + 1`, dword `i` covers bytes `4i .. 4i + 4`.
//!
//! Every write first copies the current `new` value into `old` at the same
//! offset, so after a scan cycle `old` holds what the previous write left
//! behind and edge detection compares the two.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bytes::{extract_bit_u16, with_bit_u16};
use crate::error::{LinkError, Result};

// ============================================================================
// Addressing
// ============================================================================

/// View a register address is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Bit,
    Byte,
    Word,
    Dword,
}

impl RegisterKind {
    /// Width of one element in bytes (bits report their containing word)
    fn width(self) -> usize {
        match self {
            RegisterKind::Byte => 1,
            RegisterKind::Bit | RegisterKind::Word => 2,
            RegisterKind::Dword => 4,
        }
    }
}

/// Element index inside one view of the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAddr {
    pub kind: RegisterKind,
    pub index: usize,
}

impl RegisterAddr {
    pub const fn bit(index: usize) -> Self {
        Self {
            kind: RegisterKind::Bit,
            index,
        }
    }

    pub const fn byte(index: usize) -> Self {
        Self {
            kind: RegisterKind::Byte,
            index,
        }
    }

    pub const fn word(index: usize) -> Self {
        Self {
            kind: RegisterKind::Word,
            index,
        }
    }

    pub const fn dword(index: usize) -> Self {
        Self {
            kind: RegisterKind::Dword,
            index,
        }
    }
}

/// Symbolic names for register addresses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagTable {
    tags: HashMap<String, RegisterAddr>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, addr: RegisterAddr) -> Option<RegisterAddr> {
        self.tags.insert(name.into(), addr)
    }

    /// Resolve a tag; an unknown name is an error, never a silent default
    pub fn resolve(&self, name: &str) -> Result<RegisterAddr> {
        self.tags
            .get(name)
            .copied()
            .ok_or_else(|| LinkError::PointNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegisterAddr)> {
        self.tags.iter()
    }
}

impl FromIterator<(String, RegisterAddr)> for TagTable {
    fn from_iter<I: IntoIterator<Item = (String, RegisterAddr)>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Register file
// ============================================================================

#[derive(Debug)]
struct Buffers {
    old: Vec<u8>,
    new: Vec<u8>,
}

impl Buffers {
    fn range(&self, kind: RegisterKind, index: usize) -> Result<std::ops::Range<usize>> {
        let width = kind.width();
        let start = match kind {
            RegisterKind::Bit => (index / 16) * 2,
            _ => index * width,
        };
        let end = start + width;
        if end > self.new.len() {
            return Err(LinkError::config(format!(
                "{:?} {} out of range (register file is {} bytes)",
                kind,
                index,
                self.new.len()
            )));
        }
        Ok(start..end)
    }

    /// Copy `new` into `old` over the range about to be written
    fn rotate(&mut self, range: std::ops::Range<usize>) {
        let (old, new) = (&mut self.old, &self.new);
        old[range.clone()].copy_from_slice(&new[range]);
    }

    fn read_word(buf: &[u8], start: usize) -> u16 {
        u16::from_le_bytes([buf[start], buf[start + 1]])
    }

    fn read_dword(buf: &[u8], start: usize) -> u32 {
        u32::from_le_bytes([buf[start], buf[start + 1], buf[start + 2], buf[start + 3]])
    }

    fn set_word(&mut self, index: usize, value: u16) -> Result<()> {
        let range = self.range(RegisterKind::Word, index)?;
        self.rotate(range.clone());
        self.new[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn set_bit(&mut self, bit: usize, on: bool) -> Result<()> {
        let range = self.range(RegisterKind::Bit, bit)?;
        self.rotate(range.clone());
        let word = Self::read_word(&self.new, range.start);
        let word = with_bit_u16(word, (bit % 16) as u8, on);
        self.new[range].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }
}

/// Thread-safe double-buffered register file
#[derive(Debug)]
pub struct RegisterFile {
    buffers: Mutex<Buffers>,
    tags: RwLock<TagTable>,
}

impl RegisterFile {
    /// Create a zeroed register file of `size_bytes` bytes
    pub fn new(size_bytes: usize) -> Self {
        Self::with_tags(size_bytes, TagTable::new())
    }

    pub fn with_tags(size_bytes: usize, tags: TagTable) -> Self {
        Self {
            buffers: Mutex::new(Buffers {
                old: vec![0; size_bytes],
                new: vec![0; size_bytes],
            }),
            tags: RwLock::new(tags),
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.buffers.lock().new.len()
    }

    pub fn len_words(&self) -> usize {
        self.len_bytes() / 2
    }

    /// Register or replace a tag
    pub fn add_tag(&self, name: impl Into<String>, addr: RegisterAddr) {
        self.tags.write().insert(name, addr);
    }

    pub fn resolve(&self, name: &str) -> Result<RegisterAddr> {
        self.tags.read().resolve(name)
    }

    // ---- writes --------------------------------------------------------

    pub fn set_byte(&self, index: usize, value: u8) -> Result<()> {
        let mut buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Byte, index)?;
        buf.rotate(range.clone());
        buf.new[range.start] = value;
        Ok(())
    }

    pub fn set_word(&self, index: usize, value: u16) -> Result<()> {
        self.buffers.lock().set_word(index, value)
    }

    pub fn set_dword(&self, index: usize, value: u32) -> Result<()> {
        let mut buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Dword, index)?;
        buf.rotate(range.clone());
        buf.new[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn set_bit(&self, bit: usize, on: bool) -> Result<()> {
        self.buffers.lock().set_bit(bit, on)
    }

    /// Write consecutive words starting at word `index` under one lock
    ///
    /// The whole range is checked first; nothing is written when it does
    /// not fit.
    pub fn set_words(&self, index: usize, values: &[u16]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut buf = self.buffers.lock();
        buf.range(RegisterKind::Word, index + values.len() - 1)?;
        for (i, value) in values.iter().enumerate() {
            buf.set_word(index + i, *value)?;
        }
        Ok(())
    }

    /// Write consecutive bits starting at bit `bit` under one lock
    pub fn set_bits(&self, bit: usize, values: &[bool]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut buf = self.buffers.lock();
        buf.range(RegisterKind::Bit, bit + values.len() - 1)?;
        // Rotate each touched word once so `old` reflects the value before
        // this batch, not an intermediate state
        let first_word = bit / 16;
        let last_word = (bit + values.len() - 1) / 16;
        let span = first_word * 2..(last_word + 1) * 2;
        buf.rotate(span);
        for (i, on) in values.iter().enumerate() {
            let n = bit + i;
            let start = (n / 16) * 2;
            let word = Buffers::read_word(&buf.new, start);
            let word = with_bit_u16(word, (n % 16) as u8, *on);
            buf.new[start..start + 2].copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    // ---- reads ---------------------------------------------------------

    pub fn byte(&self, index: usize) -> Result<u8> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Byte, index)?;
        Ok(buf.new[range.start])
    }

    pub fn old_byte(&self, index: usize) -> Result<u8> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Byte, index)?;
        Ok(buf.old[range.start])
    }

    pub fn word(&self, index: usize) -> Result<u16> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Word, index)?;
        Ok(Buffers::read_word(&buf.new, range.start))
    }

    pub fn old_word(&self, index: usize) -> Result<u16> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Word, index)?;
        Ok(Buffers::read_word(&buf.old, range.start))
    }

    pub fn dword(&self, index: usize) -> Result<u32> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Dword, index)?;
        Ok(Buffers::read_dword(&buf.new, range.start))
    }

    pub fn old_dword(&self, index: usize) -> Result<u32> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Dword, index)?;
        Ok(Buffers::read_dword(&buf.old, range.start))
    }

    pub fn bit(&self, bit: usize) -> Result<bool> {
        Ok(self.bit_pair(bit)?.1)
    }

    pub fn old_bit(&self, bit: usize) -> Result<bool> {
        Ok(self.bit_pair(bit)?.0)
    }

    /// Consecutive words from the current buffer
    pub fn words(&self, index: usize, count: usize) -> Result<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let buf = self.buffers.lock();
        buf.range(RegisterKind::Word, index + count - 1)?;
        Ok((index..index + count)
            .map(|i| Buffers::read_word(&buf.new, i * 2))
            .collect())
    }

    /// Copy of the current buffer
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffers.lock().new.clone()
    }

    fn bit_pair(&self, bit: usize) -> Result<(bool, bool)> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Bit, bit)?;
        let idx = (bit % 16) as u8;
        Ok((
            extract_bit_u16(Buffers::read_word(&buf.old, range.start), idx),
            extract_bit_u16(Buffers::read_word(&buf.new, range.start), idx),
        ))
    }

    // ---- change detection ----------------------------------------------

    pub fn is_changed_byte(&self, index: usize) -> Result<bool> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Byte, index)?;
        Ok(buf.old[range.clone()] != buf.new[range])
    }

    pub fn is_changed_word(&self, index: usize) -> Result<bool> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Word, index)?;
        Ok(buf.old[range.clone()] != buf.new[range])
    }

    pub fn is_changed_dword(&self, index: usize) -> Result<bool> {
        let buf = self.buffers.lock();
        let range = buf.range(RegisterKind::Dword, index)?;
        Ok(buf.old[range.clone()] != buf.new[range])
    }

    pub fn is_changed_bit(&self, bit: usize) -> Result<bool> {
        let (old, new) = self.bit_pair(bit)?;
        Ok(old != new)
    }

    /// Old false, new true
    pub fn is_rising(&self, bit: usize) -> Result<bool> {
        let (old, new) = self.bit_pair(bit)?;
        Ok(!old && new)
    }

    /// Old true, new false
    pub fn is_falling(&self, bit: usize) -> Result<bool> {
        let (old, new) = self.bit_pair(bit)?;
        Ok(old && !new)
    }

    // ---- tag access ----------------------------------------------------

    /// Read a tagged value in its own view, widened to u32
    pub fn read_tag(&self, name: &str) -> Result<u32> {
        let addr = self.resolve(name)?;
        match addr.kind {
            RegisterKind::Bit => Ok(u32::from(self.bit(addr.index)?)),
            RegisterKind::Byte => Ok(u32::from(self.byte(addr.index)?)),
            RegisterKind::Word => Ok(u32::from(self.word(addr.index)?)),
            RegisterKind::Dword => self.dword(addr.index),
        }
    }

    /// Write a tagged value in its own view; the value is truncated to width
    pub fn write_tag(&self, name: &str, value: u32) -> Result<()> {
        let addr = self.resolve(name)?;
        match addr.kind {
            RegisterKind::Bit => self.set_bit(addr.index, value != 0),
            RegisterKind::Byte => self.set_byte(addr.index, value as u8),
            RegisterKind::Word => self.set_word(addr.index, value as u16),
            RegisterKind::Dword => self.set_dword(addr.index, value),
        }
    }

    pub fn word_by_tag(&self, name: &str) -> Result<u16> {
        let addr = self.resolve_kind(name, RegisterKind::Word)?;
        self.word(addr.index)
    }

    pub fn bit_by_tag(&self, name: &str) -> Result<bool> {
        let addr = self.resolve_kind(name, RegisterKind::Bit)?;
        self.bit(addr.index)
    }

    pub fn is_changed_tag(&self, name: &str) -> Result<bool> {
        let addr = self.resolve(name)?;
        match addr.kind {
            RegisterKind::Bit => self.is_changed_bit(addr.index),
            RegisterKind::Byte => self.is_changed_byte(addr.index),
            RegisterKind::Word => self.is_changed_word(addr.index),
            RegisterKind::Dword => self.is_changed_dword(addr.index),
        }
    }

    pub fn is_rising_tag(&self, name: &str) -> Result<bool> {
        let addr = self.resolve_kind(name, RegisterKind::Bit)?;
        self.is_rising(addr.index)
    }

    pub fn is_falling_tag(&self, name: &str) -> Result<bool> {
        let addr = self.resolve_kind(name, RegisterKind::Bit)?;
        self.is_falling(addr.index)
    }

    fn resolve_kind(&self, name: &str, kind: RegisterKind) -> Result<RegisterAddr> {
        let addr = self.resolve(name)?;
        if addr.kind != kind {
            return Err(LinkError::config(format!(
                "tag '{}' is a {:?}, not a {:?}",
                name, addr.kind, kind
            )));
        }
        Ok(addr)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_views_overlap_little_endian() {
        let file = RegisterFile::new(8);
        file.set_dword(0, 0x1234_5678).unwrap();

        assert_eq!(file.byte(0).unwrap(), 0x78);
        assert_eq!(file.word(0).unwrap(), 0x5678);
        assert_eq!(file.word(1).unwrap(), 0x1234);
        assert!(file.bit(3).unwrap()); // 0x5678 bit 3
        assert!(!file.bit(0).unwrap());
    }

    #[test]
    fn test_set_rotates_old() {
        let file = RegisterFile::new(4);
        file.set_word(1, 10).unwrap();
        file.set_word(1, 20).unwrap();

        assert_eq!(file.old_word(1).unwrap(), 10);
        assert_eq!(file.word(1).unwrap(), 20);
        assert!(file.is_changed_word(1).unwrap());

        file.set_word(1, 20).unwrap();
        assert!(!file.is_changed_word(1).unwrap());
    }

    #[test]
    fn test_byte_change_seen_under_concurrent_writes() {
        let file = RegisterFile::new(2);
        file.set_byte(0, 1).unwrap();
        file.set_byte(0, 2).unwrap();

        // every write flips the byte, so old and new always differ
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..20_000u32 {
                    file.set_byte(0, if i % 2 == 0 { 1 } else { 2 }).unwrap();
                }
            });
            for _ in 0..20_000 {
                assert!(file.is_changed_byte(0).unwrap());
            }
        });
        assert!(!file.is_changed_byte(1).unwrap());
        assert!(file.is_changed_byte(2).is_err());
    }

    #[test]
    fn test_rising_and_falling_edges() {
        let file = RegisterFile::new(4);

        file.set_bit(5, true).unwrap();
        assert!(file.is_rising(5).unwrap());
        assert!(!file.is_falling(5).unwrap());

        file.set_bit(5, true).unwrap();
        assert!(!file.is_rising(5).unwrap());
        assert!(!file.is_changed_bit(5).unwrap());

        file.set_bit(5, false).unwrap();
        assert!(file.is_falling(5).unwrap());
        assert!(!file.is_rising(5).unwrap());
    }

    #[test]
    fn test_bulk_bits_rotate_once() {
        let file = RegisterFile::new(4);
        file.set_bits(14, &[true, true, true]).unwrap();

        // all three bits rose in one batch, spanning words 0 and 1
        assert!(file.is_rising(14).unwrap());
        assert!(file.is_rising(15).unwrap());
        assert!(file.is_rising(16).unwrap());
        assert_eq!(file.word(0).unwrap(), 0xC000);
        assert_eq!(file.word(1).unwrap(), 0x0001);
    }

    #[test]
    fn test_bulk_words() {
        let file = RegisterFile::new(8);
        file.set_words(1, &[1, 2, 3]).unwrap();
        assert_eq!(file.words(0, 4).unwrap(), vec![0, 1, 2, 3]);

        assert!(file.set_words(2, &[9, 9, 9]).is_err());
        // range check failed before anything was written
        assert_eq!(file.word(2).unwrap(), 2);
    }

    #[test]
    fn test_out_of_range_is_config_error() {
        let file = RegisterFile::new(4);
        assert!(matches!(file.word(2), Err(LinkError::Config(_))));
        assert!(matches!(file.set_dword(1, 0), Err(LinkError::Config(_))));
        assert!(file.bit(31).is_ok());
        assert!(file.bit(32).is_err());
    }

    #[test]
    fn test_tags() {
        let mut tags = TagTable::new();
        tags.insert("run", RegisterAddr::bit(0));
        tags.insert("speed", RegisterAddr::word(1));
        let file = RegisterFile::with_tags(4, tags);

        file.write_tag("run", 1).unwrap();
        file.write_tag("speed", 1500).unwrap();

        assert!(file.is_rising_tag("run").unwrap());
        assert_eq!(file.word_by_tag("speed").unwrap(), 1500);
        assert_eq!(file.read_tag("speed").unwrap(), 1500);
        assert!(file.is_changed_tag("speed").unwrap());
    }

    #[test]
    fn test_unknown_tag_fails_fast() {
        let file = RegisterFile::new(4);
        assert!(matches!(
            file.read_tag("missing"),
            Err(LinkError::PointNotFound(name)) if name == "missing"
        ));

        file.add_tag("speed", RegisterAddr::word(0));
        assert!(matches!(file.bit_by_tag("speed"), Err(LinkError::Config(_))));
    }
}
