//! In-memory image of one block, with typed field accessors.
//!
//! Layout of every field is fixed and little-endian:
//!
//! ```text
//! | int | bytes len | bytes      | str len | str (UTF-8) |
//! | 8B  | 8B        | len bytes  | 8B      | len bytes   |
//! ```
//!
//! Offsets are supplied by the caller. Nothing here checks them beyond the
//! slice bounds, so an offset running past the end of the buffer panics.

use byteorder::{ByteOrder, LittleEndian};

/// Width of an integer field and of every length prefix.
pub const INT_SIZE: usize = 8;

/// Bytes a string field occupies: the length prefix plus its UTF-8 encoding.
pub fn max_length_for_str(s: &str) -> usize {
    INT_SIZE + s.len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    buffer: Vec<u8>,
}

impl Page {
    /// A zeroed page of exactly `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            buffer: vec![0u8; block_size],
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn get_int(&self, offset: usize) -> u64 {
        LittleEndian::read_u64(&self.buffer[offset..offset + INT_SIZE])
    }

    pub fn set_int(&mut self, offset: usize, value: u64) {
        LittleEndian::write_u64(&mut self.buffer[offset..offset + INT_SIZE], value);
    }

    pub fn get_bytes(&self, offset: usize) -> Vec<u8> {
        let len = self.get_int(offset) as usize;
        let start = offset + INT_SIZE;
        self.buffer[start..start + len].to_vec()
    }

    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.set_int(offset, bytes.len() as u64);
        let start = offset + INT_SIZE;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Invalid UTF-8 is replaced rather than rejected; the page never
    /// validates what callers stored.
    pub fn get_string(&self, offset: usize) -> String {
        String::from_utf8_lossy(&self.get_bytes(offset)).into_owned()
    }

    pub fn set_string(&mut self, offset: usize, s: &str) {
        self.set_bytes(offset, s.as_bytes());
    }

    /// Raw buffer, for disk I/O.
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Wraps an existing buffer of any length, such as a raw log record.
    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_field() {
        let mut page = Page::new(256);
        page.set_int(23, 1234);
        assert_eq!(page.get_int(23), 1234);

        page.set_int(0, u64::MAX);
        assert_eq!(page.get_int(0), u64::MAX);
        assert_eq!(page.get_int(23), 1234);
    }

    #[test]
    fn test_int_is_little_endian() {
        let mut page = Page::new(16);
        page.set_int(0, 0x0102_0304_0506_0708);
        assert_eq!(
            &page.contents()[..8],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_bytes_field() {
        let mut page = Page::new(256);
        let expected = [1u8, 2, 3, 4, 5, 6];
        page.set_bytes(111, &expected);

        assert_eq!(page.get_bytes(111), expected);
        assert_eq!(page.get_int(111), 6);
        assert!(page.get_bytes(0).is_empty());
    }

    #[test]
    fn test_string_field() {
        let s = "hello, 世界";
        let mut page = Page::new(256);
        page.set_string(11, s);
        assert_eq!(page.get_string(11), s);
    }

    #[test]
    fn test_max_length_counts_utf8_bytes() {
        let s = "hello, 世界";
        assert_eq!(max_length_for_str(s), 8 + s.len());
        assert_eq!(max_length_for_str(s), 8 + 13);
        assert_eq!(max_length_for_str(""), 8);
    }

    #[test]
    fn test_adjacent_fields() {
        let mut page = Page::new(400);
        let text = "hello world";
        page.set_string(88, text);
        let next = 88 + max_length_for_str(text);
        assert_eq!(next, 107);
        page.set_int(next, 321);

        assert_eq!(page.get_string(88), text);
        assert_eq!(page.get_int(next), 321);
    }

    #[test]
    fn test_detached_buffer() {
        let mut page = Page::from_bytes(vec![0u8; 24]);
        assert_eq!(page.len(), 24);
        page.set_string(0, "log rec");
        assert_eq!(page.get_string(0), "log rec");
        assert_eq!(page.into_bytes().len(), 24);
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_offset_panics() {
        let page = Page::new(16);
        page.get_int(12);
    }
}
