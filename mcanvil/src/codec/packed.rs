//! Packed index arrays: sequences of fixed-width indices stored in 64-bit
//! big-endian words, plus the 4-bit nibble arrays used by legacy data.
//!
//! Two incompatible layouts exist for the same logical content. Before the
//! padding cutoff the words form one continuous little-endian-within-word
//! bit-stream and an index may straddle a word boundary; from the cutoff on,
//! each word holds only whole indices and the trailing bits of every word
//! are padding.

use crate::error::{Error, Result};

/// Index width for a palette of `palette_len` entries, with the schema's
/// minimum width.
pub fn bits_for(palette_len: usize, min_bits: u32) -> u32 {
    let needed = usize::BITS - palette_len.saturating_sub(1).leading_zeros();
    needed.max(min_bits)
}

/// Number of words `count` indices of `bits` width occupy.
pub fn word_count(count: usize, bits: u32, padded: bool) -> usize {
    if padded {
        count.div_ceil(64 / bits as usize)
    } else {
        (count * bits as usize).div_ceil(64)
    }
}

/// Slice `words` into `count` indices of `bits` width.
pub fn unpack(words: &[i64], bits: u32, count: usize, padded: bool) -> Result<Vec<u16>> {
    assert!((1..=16).contains(&bits), "unsupported index width: {bits}");
    let required = word_count(count, bits, padded);
    if words.len() < required {
        return Err(Error::format(format!(
            "packed index array too short: {} words, need {required}",
            words.len()
        )));
    }
    let mask = (1u64 << bits) - 1;
    let mut indices = Vec::with_capacity(count);
    if padded {
        let per_word = (64 / bits) as usize;
        'words: for &word in words {
            let mut word = word as u64;
            for _ in 0..per_word {
                if indices.len() == count {
                    break 'words;
                }
                indices.push((word & mask) as u16);
                word >>= bits;
            }
        }
    } else {
        // Continuous bit-stream: accumulate pending bits so an index can
        // straddle a word boundary.
        let mut pending: u128 = 0;
        let mut pending_bits = 0u32;
        for &word in words {
            pending |= (word as u64 as u128) << pending_bits;
            pending_bits += 64;
            while pending_bits >= bits && indices.len() < count {
                indices.push((pending as u64 & mask) as u16);
                pending >>= bits;
                pending_bits -= bits;
            }
        }
    }
    Ok(indices)
}

/// Pack `indices` of `bits` width into 64-bit words.
pub fn pack(indices: &[u16], bits: u32, padded: bool) -> Vec<i64> {
    assert!((1..=16).contains(&bits), "unsupported index width: {bits}");
    debug_assert!(
        indices.iter().all(|&v| (v as u64) < (1u64 << bits)),
        "index wider than {bits} bits"
    );
    let mut words = Vec::with_capacity(word_count(indices.len(), bits, padded));
    if padded {
        let per_word = (64 / bits) as usize;
        for group in indices.chunks(per_word) {
            let mut word = 0u64;
            for (i, &value) in group.iter().enumerate() {
                word |= (value as u64) << (i as u32 * bits);
            }
            words.push(word as i64);
        }
    } else {
        let mut pending: u128 = 0;
        let mut pending_bits = 0u32;
        for &value in indices {
            pending |= (value as u128) << pending_bits;
            pending_bits += bits;
            if pending_bits >= 64 {
                words.push(pending as u64 as i64);
                pending >>= 64;
                pending_bits -= 64;
            }
        }
        if pending_bits > 0 {
            words.push(pending as u64 as i64);
        }
    }
    words
}

/// Read the 4-bit value at `index` from a packed nibble array (two values
/// per byte, low nibble first).
pub fn nibble(data: &[i8], index: usize) -> u8 {
    let byte = data[index / 2] as u8;
    if index % 2 == 0 { byte & 0xF } else { byte >> 4 }
}

/// Set the 4-bit value at `index` in a packed nibble array.
pub fn set_nibble(data: &mut [i8], index: usize, value: u8) {
    let byte = data[index / 2] as u8;
    data[index / 2] = if index % 2 == 0 {
        (byte & 0xF0) | (value & 0xF)
    } else {
        (byte & 0x0F) | (value << 4)
    } as i8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SECTION_BLOCK_COUNT;

    #[test]
    fn test_bits_for_palette_sizes() {
        assert_eq!(bits_for(1, 4), 4);
        assert_eq!(bits_for(2, 4), 4);
        assert_eq!(bits_for(16, 4), 4);
        assert_eq!(bits_for(17, 4), 5);
        assert_eq!(bits_for(32, 4), 5);
        assert_eq!(bits_for(33, 4), 6);
        assert_eq!(bits_for(1, 1), 1);
        assert_eq!(bits_for(2, 1), 1);
        assert_eq!(bits_for(3, 1), 2);
    }

    #[test]
    fn test_roundtrip_both_layouts() {
        let indices: Vec<u16> = (0..SECTION_BLOCK_COUNT).map(|i| (i % 31) as u16).collect();
        for padded in [false, true] {
            let words = pack(&indices, 5, padded);
            let unpacked = unpack(&words, 5, indices.len(), padded).unwrap();
            assert_eq!(unpacked, indices);
        }
    }

    #[test]
    fn test_word_counts_differ_at_padding_cutoff() {
        // 5-bit indices: 4096 * 5 bits fills 320 words exactly when indices
        // may straddle; padded words hold only 12 whole indices each.
        let indices = vec![1u16; SECTION_BLOCK_COUNT];
        let unpadded = pack(&indices, 5, false);
        let padded = pack(&indices, 5, true);
        assert_eq!(unpadded.len(), 320);
        assert_eq!(padded.len(), 342);
        assert_eq!(word_count(SECTION_BLOCK_COUNT, 5, false), 320);
        assert_eq!(word_count(SECTION_BLOCK_COUNT, 5, true), 342);
    }

    #[test]
    fn test_unpadded_indices_straddle_words() {
        // With 5-bit indices the 13th value occupies bits 60..65, crossing
        // the first word boundary.
        let mut indices = vec![0u16; 16];
        indices[12] = 0b11111;
        let words = pack(&indices, 5, false);
        assert_eq!(words.len(), 2);
        assert_ne!(words[0] >> 60, 0);
        assert_ne!(words[1] & 0b1, 0);
        assert_eq!(unpack(&words, 5, 16, false).unwrap(), indices);

        // Padded layout leaves the straddling bits unused instead
        let words = pack(&indices, 5, true);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0] >> 60, 0);
        assert_eq!(unpack(&words, 5, 16, true).unwrap(), indices);
    }

    #[test]
    fn test_unpack_always_yields_full_count() {
        for bits in [4, 5] {
            let indices = vec![0u16; SECTION_BLOCK_COUNT];
            for padded in [false, true] {
                let words = pack(&indices, bits, padded);
                assert_eq!(
                    unpack(&words, bits, SECTION_BLOCK_COUNT, padded)
                        .unwrap()
                        .len(),
                    SECTION_BLOCK_COUNT
                );
            }
        }
    }

    #[test]
    fn test_short_array_is_format_error() {
        let words = vec![0i64; 100];
        assert!(matches!(
            unpack(&words, 4, SECTION_BLOCK_COUNT, true),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_nibble_access() {
        let mut data = vec![0i8; 4];
        set_nibble(&mut data, 0, 0xA);
        set_nibble(&mut data, 1, 0x5);
        set_nibble(&mut data, 6, 0xF);
        assert_eq!(nibble(&data, 0), 0xA);
        assert_eq!(nibble(&data, 1), 0x5);
        assert_eq!(nibble(&data, 6), 0xF);
        assert_eq!(nibble(&data, 7), 0);
        assert_eq!(data[0] as u8, 0x5A);
    }
}
