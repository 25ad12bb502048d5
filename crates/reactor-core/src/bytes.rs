//! `ByteBlock`: an immutable, shareable byte buffer.
//!
//! Shared storage, cheap slices: slicing never copies the underlying
//! allocation, only adjusts the offset/len window into it.

use crate::error::{ErrorKind, ErrorPtr};
use std::fmt;
use std::sync::Arc;

/// An immutable byte buffer that can be cheaply shared and sliced.
#[derive(Clone)]
pub struct ByteBlock {
    storage: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl ByteBlock {
    pub fn from_vec(data: Vec<u8>) -> Self {
        let storage: Arc<[u8]> = Arc::from(data.into_boxed_slice());
        let len = storage.len();
        ByteBlock {
            storage,
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Returns a new `ByteBlock` sharing the same storage. `len` defaults to
    /// "everything remaining after `offset`".
    pub fn slice(&self, offset: usize, len: Option<usize>) -> Result<ByteBlock, ErrorPtr> {
        let available = self.len.checked_sub(offset).ok_or_else(|| out_of_range(offset, self.len))?;
        let len = len.unwrap_or(available);
        if len > available {
            return Err(out_of_range(offset + len, self.len));
        }
        Ok(ByteBlock {
            storage: self.storage.clone(),
            offset: self.offset + offset,
            len,
        })
    }

    /// The longest prefix that is printable 7-bit ASCII, capped at `max`
    /// bytes if given.
    pub fn slice_printable_ascii(&self, max: Option<usize>) -> ByteBlock {
        let bytes = self.as_bytes();
        let cap = max.unwrap_or(bytes.len()).min(bytes.len());
        let printable_len = bytes[..cap]
            .iter()
            .take_while(|b| (0x20..=0x7e).contains(*b))
            .count();
        self.slice(0, Some(printable_len))
            .expect("printable_len is always <= len")
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

fn out_of_range(requested: usize, len: usize) -> ErrorPtr {
    ErrorPtr::new(
        ErrorKind::Programmer,
        format!("slice offset {requested} out of range for block of length {len}"),
    )
}

impl fmt::Debug for ByteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBlock").field("len", &self.len).finish()
    }
}

impl fmt::Display for ByteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_shares_storage_without_copy() {
        let block = ByteBlock::from_vec(b"hello world".to_vec());
        let sliced = block.slice(6, Some(5)).unwrap();
        assert_eq!(sliced.as_bytes(), b"world");
        assert!(Arc::ptr_eq(&block.storage, &sliced.storage));
    }

    #[test]
    fn slice_out_of_range_is_programmer_error() {
        let block = ByteBlock::from_vec(b"hi".to_vec());
        let err = block.slice(10, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Programmer);
    }

    #[test]
    fn printable_ascii_prefix_stops_at_first_non_printable() {
        let mut data = b"abc".to_vec();
        data.push(0x01);
        data.extend_from_slice(b"def");
        let block = ByteBlock::from_vec(data);
        let printable = block.slice_printable_ascii(None);
        assert_eq!(printable.as_bytes(), b"abc");
    }

    #[test]
    fn printable_ascii_respects_max() {
        let block = ByteBlock::from_vec(b"abcdef".to_vec());
        let printable = block.slice_printable_ascii(Some(3));
        assert_eq!(printable.as_bytes(), b"abc");
    }
}
