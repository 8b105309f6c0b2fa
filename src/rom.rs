// ROM image handling.
// The core consumes 12-bit words. On disk an image is either the nibble-pair
// source layout (4 bytes per two words) or the packed layout (3 bytes per
// two words). Sizes are validated before any decode is attempted.

use std::{
    fs,
    io,
    path::Path
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("malformed ROM image: {len} bytes is not a multiple of {align}")]
    Malformed {
        len:    usize,
        align:  usize
    },
    #[error("couldn't read ROM image: {0}")]
    Io(#[from] io::Error),
}

// On-disk layout of a ROM image. Which one applies is configuration,
// chosen by the frontend.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum RomFormat {
    NibblePairs,
    Packed
}

// Pack 4 source bytes into 3. The two 12-bit words keep their bit layout.
pub fn pack(src: &[u8]) -> Result<Vec<u8>, RomError> {
    if src.len() % 4 != 0 {
        return Err(RomError::Malformed { len: src.len(), align: 4 });
    }

    let mut packed = Vec::with_capacity((src.len() / 4) * 3);
    for quad in src.chunks_exact(4) {
        let (v1, v2, v3, v4) = (quad[0], quad[1], quad[2], quad[3]);
        packed.push((v1 << 4) | hi_nibble!(v2));
        packed.push((lo_nibble!(v2) << 4) | v3);
        packed.push(v4);
    }
    Ok(packed)
}

// Unpack each 3-byte triple into two 12-bit words. A trailing partial
// triple would leave an odd word and is rejected, never truncated.
pub fn unpack(packed: &[u8]) -> Result<Vec<u16>, RomError> {
    if packed.len() % 3 != 0 {
        return Err(RomError::Malformed { len: packed.len(), align: 3 });
    }

    let mut words = Vec::with_capacity((packed.len() / 3) * 2);
    for triple in packed.chunks_exact(3) {
        let (b0, b1, b2) = (triple[0], triple[1], triple[2]);
        words.push(((b0 as u16) << 4) | (hi_nibble!(b1) as u16));
        words.push(make12!(b1, b2));
    }
    Ok(words)
}

// The 12-bit word array the core executes from. Built once at startup.
pub struct WordRom {
    words: Box<[u16]>
}

impl WordRom {
    pub fn from_nibble_pairs(src: &[u8]) -> Result<Self, RomError> {
        let packed = pack(src)?;
        Ok(WordRom {
            words: unpack(&packed)?.into_boxed_slice()
        })
    }

    pub fn from_packed(packed: &[u8]) -> Result<Self, RomError> {
        Ok(WordRom {
            words: unpack(packed)?.into_boxed_slice()
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, format: RomFormat) -> Result<Self, RomError> {
        let bytes = fs::read(path)?;
        match format {
            RomFormat::NibblePairs => WordRom::from_nibble_pairs(&bytes),
            RomFormat::Packed      => WordRom::from_packed(&bytes),
        }
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference 12-bit view of the nibble-pair source layout.
    fn nibble_pair_words(src: &[u8]) -> Vec<u16> {
        src.chunks_exact(2).map(|p| make12!(p[0], p[1])).collect()
    }

    #[test]
    fn unpack_matches_documented_scenario() {
        let words = unpack(&[0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(words, vec![0xABC, 0xDEF]);
    }

    #[test]
    fn pack_then_unpack_round_trips() {
        let src: Vec<u8> = (0..=255).cycle().take(0x300).map(|v| v as u8).collect();
        let packed = pack(&src).unwrap();
        assert_eq!(packed.len(), (src.len() / 4) * 3);

        let words = unpack(&packed).unwrap();
        assert_eq!(words.len(), (packed.len() / 3) * 2);
        assert_eq!(words, nibble_pair_words(&src));
    }

    #[test]
    fn all_unpacked_words_fit_in_12_bits() {
        let packed: Vec<u8> = (0..=255).rev().cycle().take(0x2FD).map(|v| v as u8).collect();
        for word in unpack(&packed).unwrap() {
            assert!(word <= 0xFFF);
        }
    }

    #[test]
    fn pack_rejects_unaligned_source() {
        match pack(&[0x12, 0x34, 0x56]) {
            Err(RomError::Malformed { len: 3, align: 4 }) => {},
            other => panic!("expected malformed error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unpack_rejects_partial_triple() {
        assert!(unpack(&[0xAB, 0xCD, 0xEF, 0x01]).is_err());
        assert!(unpack(&[0xAB]).is_err());
    }

    #[test]
    fn empty_image_is_valid() {
        assert!(unpack(&[]).unwrap().is_empty());
        assert!(WordRom::from_nibble_pairs(&[]).unwrap().is_empty());
    }
}
