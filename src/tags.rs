//! Sparse bitmaps over metric indices.
//!
//! Used for tag membership (`tag-<NAME>` records) and for the chunk's
//! fragment-changed tracking. The persisted image is the raw
//! little-endian word array; its length encodes the capacity.

pub const BITS_PER_WORD: usize = u64::BITS as usize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bit_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(BITS_PER_WORD)],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let words = bytes
            .chunks(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word[..chunk.len()].copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();

        Self { words }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn set(&mut self, index: u32) {
        let word = index as usize / BITS_PER_WORD;

        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }

        self.words[word] |= 1u64 << (index as usize % BITS_PER_WORD);
    }

    pub fn get(&self, index: u32) -> bool {
        let word = index as usize / BITS_PER_WORD;

        match self.words.get(word) {
            Some(w) => w & (1u64 << (index as usize % BITS_PER_WORD)) != 0,
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn union(&mut self, other: &Bitmap) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }

        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= src;
        }
    }

    pub fn intersect(&mut self, other: &Bitmap) {
        for (i, dst) in self.words.iter_mut().enumerate() {
            *dst &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Zero every bit strictly above `max_index`.
    pub fn mask_beyond(&mut self, max_index: u32) {
        let max_word = max_index as usize / BITS_PER_WORD;
        let keep = max_index as usize % BITS_PER_WORD + 1;

        for (i, word) in self.words.iter_mut().enumerate() {
            if i > max_word {
                *word = 0;
            } else if i == max_word && keep < BITS_PER_WORD {
                *word &= (1u64 << keep) - 1;
            }
        }
    }

    /// Indices of set bits up to and including `max_index`, ascending.
    pub fn ones(&self, max_index: u32) -> impl Iterator<Item = u32> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .flat_map(move |(i, w)| {
                (0..BITS_PER_WORD)
                    .filter(move |bit| w & (1u64 << bit) != 0)
                    .map(move |bit| (i * BITS_PER_WORD + bit) as u32)
            })
            .take_while(move |index| *index <= max_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    And,
    Or,
}

/// Fold tag bitmaps into one membership set. Missing tags contribute
/// nothing; bits beyond `max_index` are masked out of the final result.
pub fn consolidate(maps: impl Iterator<Item = Bitmap>, op: TagOp, max_index: u32) -> Bitmap {
    let mut folded: Option<Bitmap> = None;

    for map in maps {
        match folded.as_mut() {
            None => folded = Some(map),
            Some(acc) => match op {
                TagOp::And => acc.intersect(&map),
                TagOp::Or => acc.union(&map),
            },
        }
    }

    let mut out = folded.unwrap_or_default();
    out.mask_beyond(max_index);

    out
}
