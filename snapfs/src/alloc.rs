use crate::sb::BLOCK_COUNT;
use zerocopy::{AsBytes, FromBytes};

/// Number of ids one bitmap tracks. The block pool and the inode pool are the
/// same width, so a single map type serves both.
pub const MAP_BITS: usize = BLOCK_COUNT;
const MAP_WORDS: usize = (MAP_BITS + 63) / 64;

/// Size of a serialized bitmap in bytes.
pub const BITMAP_BYTES: usize = MAP_WORDS * 8;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Tracks which resource ids are handed out, one bit per id. Bit i is set
/// while id i belongs to a live node and clear otherwise.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy, Debug, PartialEq)]
pub struct Bitmap {
    bits: [u64; MAP_WORDS],
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bits: [0; MAP_WORDS],
        }
    }

    /// Reads a bitmap back from its serialized bytes. Returns `None` unless
    /// the buffer is exactly [`BITMAP_BYTES`] long.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from(buf)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, id: usize) -> State {
        assert!(id < MAP_BITS);
        let word = self.bits[id / 64];
        let mask = 0b01_u64 << (id % 64);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, id: usize) {
        assert!(id < MAP_BITS);
        self.bits[id / 64] |= 0b01_u64 << (id % 64);
    }

    pub fn set_free(&mut self, id: usize) {
        assert!(id < MAP_BITS);
        self.bits[id / 64] &= !(0b01_u64 << (id % 64));
    }

    /// Index of the first free id in `[start, MAP_BITS)`, or `None` when the
    /// whole range is occupied. Rescans from `start` on every call so ids
    /// released since the last allocation are found again.
    pub fn first_free(&self, start: usize) -> Option<usize> {
        (start..MAP_BITS).find(|&id| self.get(id) == State::Free)
    }

    /// Number of free ids in `[start, MAP_BITS)`.
    pub fn free_in_range(&self, start: usize) -> usize {
        (start..MAP_BITS)
            .filter(|&id| self.get(id) == State::Free)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0);
        bmp.set_reserved(MAP_BITS - 1);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(MAP_BITS - 1), State::Used);
    }

    #[test]
    fn can_toggle_id_between_free_and_used() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(10);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);

        // Neighbors stay untouched by the clear.
        bmp.set_reserved(11);
        bmp.set_free(10);
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn first_free_skips_reserved_ids() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(1);
        bmp.set_reserved(2);

        assert_eq!(bmp.first_free(1), Some(3));
        assert_eq!(bmp.first_free(0), Some(0));
    }

    #[test]
    fn first_free_reports_exhaustion() {
        let mut bmp = Bitmap::new();
        for id in 5..MAP_BITS {
            bmp.set_reserved(id);
        }

        assert_eq!(bmp.first_free(5), None);
        assert_eq!(bmp.first_free(0), Some(0));
    }

    #[test]
    fn released_ids_are_found_again() {
        let mut bmp = Bitmap::new();
        for id in 0..MAP_BITS {
            bmp.set_reserved(id);
        }
        bmp.set_free(42);

        assert_eq!(bmp.first_free(0), Some(42));
    }

    #[test]
    fn can_serialize_and_deserialize_state() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(10);
        bmp.set_reserved(11);
        bmp.set_reserved(99);

        let read_bmp = Bitmap::parse(bmp.serialize()).unwrap();
        assert_eq!(read_bmp, bmp);
    }

    #[test]
    fn parse_rejects_wrong_length_buffers() {
        assert!(Bitmap::parse(&[0; 4]).is_none());
        assert!(Bitmap::parse(&[0; BITMAP_BYTES + 1]).is_none());
    }

    #[test]
    fn free_count_tracks_reservations() {
        let mut bmp = Bitmap::new();
        assert_eq!(bmp.free_in_range(0), MAP_BITS);

        bmp.set_reserved(7);
        bmp.set_reserved(8);
        assert_eq!(bmp.free_in_range(0), MAP_BITS - 2);
        assert_eq!(bmp.free_in_range(8), MAP_BITS - 9);
    }
}
