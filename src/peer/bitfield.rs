/// Piece-availability bitmap, one bit per piece index, MSB first.
///
/// The capacity is fixed when the bitfield is built and never changes.
/// Indices outside `[0, 8 * len)` are range-clamped: [`Bitfield::has_piece`]
/// answers `false` and [`Bitfield::set_piece`] discards the write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// An empty bitfield large enough for `count` pieces.
    pub fn from_piece_count(count: usize) -> Self {
        Bitfield {
            bits: vec![0; count.div_ceil(8)],
        }
    }

    /// Wraps raw bitmap bytes, typically the payload of a bitfield message.
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Bitfield { bits }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bits
    }

    /// Number of addressable bits.
    pub fn len_bits(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn has_piece(&self, index: usize) -> bool {
        let byte = index / 8;
        let bit = 7 - (index % 8); // MSB first
        match self.bits.get(byte) {
            Some(b) => b & (1 << bit) != 0,
            None => false,
        }
    }

    pub fn set_piece(&mut self, index: usize) {
        let byte = index / 8;
        let bit = 7 - (index % 8);
        if let Some(b) = self.bits.get_mut(byte) {
            *b |= 1 << bit;
        }
    }

    /// Number of pieces marked present.
    pub fn count_pieces(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn capacity_and_index() -> impl Strategy<Value = (usize, usize)> {
        (1usize..2048).prop_flat_map(|pieces| (Just(pieces), 0..pieces))
    }

    proptest! {
        #[test]
        fn out_of_range_index_is_ignored(
            bytes in vec(any::<u8>(), 0..64),
            offset in any::<usize>(),
        ) {
            let mut bitfield = Bitfield::from_bytes(bytes.clone());
            let index = bitfield.len_bits().saturating_add(offset);

            prop_assert!(!bitfield.has_piece(index));
            bitfield.set_piece(index);
            prop_assert_eq!(bitfield.as_bytes(), bytes.as_slice());
        }

        #[test]
        fn set_piece_sets_exactly_one_bit((pieces, index) in capacity_and_index()) {
            let mut bitfield = Bitfield::from_piece_count(pieces);
            bitfield.set_piece(index);

            prop_assert_eq!(bitfield.count_pieces(), 1);
            for other in 0..bitfield.len_bits() {
                prop_assert_eq!(bitfield.has_piece(other), other == index);
            }
        }

        #[test]
        fn set_piece_keeps_other_bits(
            bytes in vec(any::<u8>(), 1..64),
            seed in any::<usize>(),
        ) {
            let mut bitfield = Bitfield::from_bytes(bytes.clone());
            let index = seed % bitfield.len_bits();
            let before = Bitfield::from_bytes(bytes);
            bitfield.set_piece(index);

            for other in 0..bitfield.len_bits() {
                let expected = other == index || before.has_piece(other);
                prop_assert_eq!(bitfield.has_piece(other), expected);
            }
        }
    }
}
