use crate::bitmap::logic;
#[cfg(feature = "unsafe-kernels")]
use crate::bitmap::logic_unsafe;
use crate::bitmap::word::Word;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{BitPosition, Compression};

/// A logical bitmap indexed by non-negative bit positions.
///
/// The backing array interleaves literal words with run-length fills
/// according to the vector's compression mode, which is fixed at
/// construction. Two invariants hold after every mutation:
///
/// - the last physical word is always a literal (the writable tail);
/// - once compressed, writes land only at or past the tail (forward-only).
#[derive(Debug, Clone)]
pub struct Vector {
    compression: Compression,
    allow_unsafe: bool,
    words: Vec<Word>,
    word_count_logical: usize,
}

impl Vector {
    pub fn new(allow_unsafe: bool, compression: Compression) -> Result<Vector> {
        if allow_unsafe && !cfg!(feature = "unsafe-kernels") {
            return Err(Error::new(
                ErrorKind::UnsafeUnavailable,
                "this build does not carry the unsafe kernels".to_string(),
            ));
        }
        Ok(Vector {
            compression,
            allow_unsafe,
            words: vec![Word::ZERO],
            word_count_logical: 1,
        })
    }

    /// Copy `source` into a fresh vector of the requested compression.
    /// Copying between identical compressions is a straight word-array
    /// clone, so it is binary-identical to the source.
    pub fn from_vector(
        allow_unsafe: bool,
        compression: Compression,
        source: &Vector,
    ) -> Result<Vector> {
        let mut vector = Vector::new(allow_unsafe, compression)?;
        if compression == source.compression {
            vector.words = source.words.clone();
            vector.word_count_logical = source.word_count_logical;
            return Ok(vector);
        }
        if !compression.is_compressed() {
            vector.words_grow(source.word_count_logical);
            k_decompress(
                allow_unsafe,
                &mut vector.words,
                &source.words,
                source.packed_enabled(),
            );
            vector.word_count_logical = source.word_count_logical;
            return Ok(vector);
        }
        // compressing target: replay literal words through the
        // forward-only writer, which re-compresses opportunistically
        let literal;
        let literal_words: &[Word] = if source.compression.is_compressed() {
            literal = source.to_literal_words();
            &literal
        } else {
            &source.words
        };
        for (position, word) in literal_words.iter().enumerate() {
            if word.0 != 0 {
                vector.set_word(position, *word)?;
            }
        }
        Ok(vector)
    }

    #[inline]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[inline]
    pub fn allow_unsafe(&self) -> bool {
        self.allow_unsafe
    }

    #[inline]
    pub fn word_count_physical(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn word_count_logical(&self) -> usize {
        self.word_count_logical
    }

    /// The physical word array. The last word is always a literal.
    #[inline]
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    #[inline]
    fn packed_enabled(&self) -> bool {
        self.compression.is_packed_position_enabled()
    }

    /// Reset to a single zeroed literal word.
    pub fn clear(&mut self) {
        self.words.clear();
        self.words.push(Word::ZERO);
        self.word_count_logical = 1;
    }

    pub fn get_bit(&self, position: BitPosition) -> bool {
        let word = self.get_word_logical((position / Word::BITS) as usize);
        word.get_bit(position % Word::BITS)
    }

    /// Materialize the logical word at `word_position` as a literal.
    /// Reading past the tail yields zero.
    pub fn get_word_logical(&self, word_position: usize) -> Word {
        if !self.compression.is_compressed() {
            return self.words.get(word_position).copied().unwrap_or(Word::ZERO);
        }
        let mut logical = 0usize;
        for word in &self.words {
            if word.is_compressed() {
                let span = word.fill_count() as usize;
                if word_position < logical + span {
                    return if word.fill_bit() { Word(Word::LITERAL_MASK) } else { Word::ZERO };
                }
                logical += span;
                if self.packed_enabled() && word.has_packed_word() {
                    if word_position == logical {
                        return word.packed_word();
                    }
                    logical += 1;
                }
            } else {
                if word_position == logical {
                    return *word;
                }
                logical += 1;
            }
        }
        Word::ZERO
    }

    pub fn set_bit(&mut self, position: BitPosition, value: bool) -> Result<()> {
        let word_position = (position / Word::BITS) as usize;
        let tail = self.word_count_logical - 1;
        if self.compression.is_compressed() && word_position < tail {
            return Err(Error::new(
                ErrorKind::ForwardOnlyViolation,
                format!("bit {} precedes the tail of a compressed vector", position),
            ));
        }
        if !value && word_position > tail {
            return Ok(());
        }
        self.zero_fill(word_position)?;
        let physical = if self.compression.is_compressed() {
            self.words.len() - 1
        } else {
            word_position
        };
        self.words[physical].set_bit(position % Word::BITS, value);
        Ok(())
    }

    pub fn set_word(&mut self, word_position: usize, word: Word) -> Result<()> {
        debug_assert!(self.packed_enabled() || !word.has_packed_word());
        let tail = self.word_count_logical - 1;
        if self.compression.is_compressed() && word_position < tail {
            return Err(Error::new(
                ErrorKind::ForwardOnlyViolation,
                format!("word {} precedes the tail of a compressed vector", word_position),
            ));
        }
        // an all-zero word at or past the tail is an absent tail
        let is_zero = word.0 == 0
            || (word.is_compressed() && !word.fill_bit() && !word.has_packed_word());
        if is_zero {
            if word_position <= tail {
                let physical = if self.compression.is_compressed() {
                    self.words.len() - 1
                } else {
                    word_position
                };
                self.words[physical] = Word::ZERO;
            }
            return Ok(());
        }
        if !word.is_compressed() {
            self.zero_fill(word_position)?;
            let physical = if self.compression.is_compressed() {
                self.words.len() - 1
            } else {
                word_position
            };
            self.words[physical] = word;
            return Ok(());
        }
        if !self.compression.is_compressed() {
            // expand the run into literals
            let mut cursor = word_position;
            if word.fill_bit() {
                for _ in 0..word.fill_count() {
                    self.set_word(cursor, Word(Word::LITERAL_MASK))?;
                    cursor += 1;
                }
            } else {
                cursor += word.fill_count() as usize;
            }
            if word.has_packed_word() {
                self.set_word(cursor, word.packed_word())?;
            }
            return Ok(());
        }
        // compressed word onto a compressed vector: land the run at the
        // tail slot, then append an explicit literal zero as the new tail
        self.zero_fill(word_position)?;
        let span = word.fill_count() as usize
            + (self.packed_enabled() && word.has_packed_word()) as usize;
        let last = self.words.len() - 1;
        self.words[last] = word;
        self.word_count_logical += span - 1;
        self.words_push(Word::ZERO);
        self.word_count_logical += 1;
        Ok(())
    }

    /// Logical words still missing for the tail to sit at `word_position`.
    #[inline]
    fn tail_gap(&self, word_position: usize) -> usize {
        (word_position + 1).saturating_sub(self.word_count_logical)
    }

    /// Extend the logical space with zeros so the tail literal sits at
    /// `word_position`. Each step handles one compression opportunity and
    /// is guarded by the remaining gap.
    fn zero_fill(&mut self, word_position: usize) -> Result<()> {
        if self.compression.is_compressed() {
            self.zero_fill_single_word(word_position);
            self.zero_fill_coalesce_run(word_position)?;
            self.zero_fill_pack_tail(word_position);
            self.zero_fill_zero_tail(word_position)?;
            self.zero_fill_large_gap(word_position)?;
        }
        self.zero_fill_finish(word_position);
        Ok(())
    }

    fn zero_fill_single_word(&mut self, word_position: usize) {
        if self.tail_gap(word_position) > 0
            && self.words.len() == 1
            && self.words[0].is_compressible()
        {
            self.words[0].compress();
            self.words_push(Word::ZERO);
            self.word_count_logical += 1;
        }
    }

    fn zero_fill_coalesce_run(&mut self, word_position: usize) -> Result<()> {
        let gap = self.tail_gap(word_position);
        if gap == 0 || self.words.len() < 2 {
            return Ok(());
        }
        let last = self.words.len() - 1;
        let penultimate = self.words[last - 1];
        let tail = self.words[last];
        if penultimate.is_compressed()
            && !penultimate.has_packed_word()
            && tail.is_compressible()
            && tail.compressible_fill_bit() == penultimate.fill_bit()
        {
            let extend = if penultimate.fill_bit() { 1 } else { fill_count_for(gap)? };
            self.words[last - 1].add_fill_count(extend)?;
            self.words[last] = Word::ZERO;
            self.word_count_logical += extend as usize;
        }
        Ok(())
    }

    fn zero_fill_pack_tail(&mut self, word_position: usize) {
        if self.tail_gap(word_position) == 0 || !self.packed_enabled() || self.words.len() < 2 {
            return;
        }
        let last = self.words.len() - 1;
        let penultimate = self.words[last - 1];
        let tail = self.words[last];
        if penultimate.is_compressed()
            && !penultimate.fill_bit()
            && !penultimate.has_packed_word()
            && tail.0.count_ones() == 1
        {
            self.words[last - 1].pack(tail);
            self.words[last] = Word::ZERO;
            self.word_count_logical += 1;
        }
    }

    fn zero_fill_zero_tail(&mut self, word_position: usize) -> Result<()> {
        let gap = self.tail_gap(word_position);
        let last = self.words.len() - 1;
        if gap > 0 && self.words[last] == Word::ZERO {
            self.words[last] = Word::fill(false, fill_count_for(gap)?);
            self.words_push(Word::ZERO);
            self.word_count_logical += gap;
        }
        Ok(())
    }

    fn zero_fill_large_gap(&mut self, word_position: usize) -> Result<()> {
        let gap = self.tail_gap(word_position);
        if gap > 1 {
            let last = self.words.len() - 1;
            self.words[last].compress();
            self.words_push(Word::fill(false, fill_count_for(gap - 1)?));
            self.words_push(Word::ZERO);
            self.word_count_logical += gap;
        }
        Ok(())
    }

    fn zero_fill_finish(&mut self, word_position: usize) {
        let gap = self.tail_gap(word_position);
        if gap > 0 {
            self.words_grow(self.words.len() + gap);
            self.word_count_logical += gap;
        }
    }

    /// Grow the physical array to `len` words, padding with literal zeros.
    /// Allocation jumps to at least 1.1x the current capacity, minimum 2.
    fn words_grow(&mut self, len: usize) {
        if len > self.words.capacity() {
            let target = len.max(self.words.capacity() + self.words.capacity() / 10).max(2);
            self.words.reserve(target - self.words.len());
        }
        if len > self.words.len() {
            self.words.resize(len, Word::ZERO);
        }
    }

    fn words_push(&mut self, word: Word) {
        self.words_grow(self.words.len() + 1);
        let last = self.words.len() - 1;
        self.words[last] = word;
    }

    pub fn population(&self) -> u32 {
        self.words.iter().map(Word::population).sum()
    }

    pub fn population_any(&self) -> bool {
        self.words.iter().any(|word| word.population() > 0)
    }

    /// AND `other` into this vector. Only clears bits, so the trailing zero
    /// tail may shrink. Not defined for a compressed self.
    pub fn and_in_place(&mut self, other: &Vector) -> Result<()> {
        if self.compression.is_compressed() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "AND in place over a compressed vector".to_string(),
            ));
        }
        let live = if other.compression.is_compressed() {
            k_and_in_place_n_cwpp(
                self.allow_unsafe,
                &mut self.words,
                &other.words,
                other.packed_enabled(),
            )
        } else {
            k_and_in_place_nn(self.allow_unsafe, &mut self.words, &other.words)
        };
        self.words.truncate(live.max(1));
        self.word_count_logical = self.words.len();
        Ok(())
    }

    /// OR `other` into this vector. Not defined for a compressed self.
    pub fn or_in_place(&mut self, other: &Vector) -> Result<()> {
        if self.compression.is_compressed() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "OR in place over a compressed vector".to_string(),
            ));
        }
        let other_logical = other.word_count_logical;
        if other_logical > self.words.len() {
            self.words_grow(other_logical);
            self.word_count_logical = other_logical;
        }
        if other.compression.is_compressed() {
            k_or_in_place_n_cwpp(
                self.allow_unsafe,
                &mut self.words[..other_logical],
                &other.words,
                other.packed_enabled(),
            );
        } else {
            k_or_in_place_nn(self.allow_unsafe, &mut self.words, &other.words);
        }
        Ok(())
    }

    /// AND two vectors into a fresh vector of the requested compression.
    /// Operands are reordered so the less-compressed one drives the kernel.
    pub fn and_out_of_place(
        &self,
        other: &Vector,
        result_compression: Compression,
    ) -> Result<Vector> {
        let (left, right) = if self.compression.is_compressed() && !other.compression.is_compressed()
        {
            (other, self)
        } else {
            (self, other)
        };
        let literal = match (left.compression.is_compressed(), right.compression.is_compressed()) {
            (false, false) => k_and_out_of_place_nn(self.allow_unsafe, &left.words, &right.words),
            (false, true) => logic::and_out_of_place_n_cwpp(
                &left.words,
                &right.words,
                right.packed_enabled(),
            ),
            _ => logic::and_out_of_place_cwpp_cwpp(
                &left.words,
                left.packed_enabled(),
                &right.words,
                right.packed_enabled(),
            ),
        };
        let mut result = Vector::new(self.allow_unsafe, result_compression)?;
        for (position, word) in literal.iter().enumerate() {
            if word.0 != 0 {
                result.set_word(position, *word)?;
            }
        }
        Ok(result)
    }

    /// Union two or more vectors into a fresh uncompressed vector.
    pub fn or_out_of_place(vectors: &[&Vector]) -> Result<Vector> {
        if vectors.len() < 2 {
            return Err(Error::new(
                ErrorKind::ArgumentOutOfRange,
                format!("OR out of place requires at least 2 vectors, got {}", vectors.len()),
            ));
        }
        let mut result =
            Vector::from_vector(vectors[0].allow_unsafe, Compression::None, vectors[0])?;
        for vector in &vectors[1..] {
            result.or_in_place(vector)?;
        }
        Ok(result)
    }

    /// Population of `self AND other` without materializing the result.
    /// Two compressed operands are not supported; decompress one first.
    pub fn and_population(&self, other: &Vector) -> Result<u32> {
        let (left, right) = if self.compression.is_compressed() && !other.compression.is_compressed()
        {
            (other, self)
        } else {
            (self, other)
        };
        match (left.compression.is_compressed(), right.compression.is_compressed()) {
            (false, false) => Ok(k_and_population_nn(self.allow_unsafe, &left.words, &right.words)),
            (false, true) => Ok(k_and_population_n_cwpp(
                self.allow_unsafe,
                &left.words,
                &right.words,
                right.packed_enabled(),
            )),
            _ => Err(Error::new(
                ErrorKind::Unsupported,
                "AND population of two compressed vectors".to_string(),
            )),
        }
    }

    /// Short-circuit variant of `and_population`.
    pub fn and_population_any(&self, other: &Vector) -> Result<bool> {
        let (left, right) = if self.compression.is_compressed() && !other.compression.is_compressed()
        {
            (other, self)
        } else {
            (self, other)
        };
        match (left.compression.is_compressed(), right.compression.is_compressed()) {
            (false, false) => {
                Ok(k_and_population_any_nn(self.allow_unsafe, &left.words, &right.words))
            }
            (false, true) => Ok(k_and_population_any_n_cwpp(
                self.allow_unsafe,
                &left.words,
                &right.words,
                right.packed_enabled(),
            )),
            _ => Err(Error::new(
                ErrorKind::Unsupported,
                "AND population of two compressed vectors".to_string(),
            )),
        }
    }

    /// Ordered lazy enumeration of positions whose bit equals `value`.
    /// Clear-bit enumeration of a compressed vector is unbounded and
    /// therefore unsupported.
    pub fn bit_positions(&self, value: bool) -> Result<BitPositions<'_>> {
        if !value && self.compression.is_compressed() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "clear-bit enumeration of a compressed vector".to_string(),
            ));
        }
        Ok(BitPositions {
            words: &self.words,
            packed: self.packed_enabled(),
            value,
            word_idx: 0,
            logical: 0,
            fill_remaining: 0,
            in_packed: false,
            bit: 0,
        })
    }

    /// Remap every set bit `p` to `p - shifts[p]`, dropping bits whose
    /// shift is negative (the deletion sentinel). Returns `None` when every
    /// bit was dropped, so callers can retire the owning entry.
    pub fn optimize(&self, bit_position_shifts: &[i32]) -> Result<Option<Vector>> {
        let mut optimized = Vector::new(self.allow_unsafe, self.compression)?;
        let mut any = false;
        for position in self.bit_positions(true)? {
            let shift = bit_position_shifts[position as usize];
            if shift >= 0 {
                optimized.set_bit(position - shift as u32, true)?;
                any = true;
            }
        }
        Ok(if any { Some(optimized) } else { None })
    }

    /// Literal expansion of the whole vector.
    fn to_literal_words(&self) -> Vec<Word> {
        let mut buffer = vec![Word::ZERO; self.word_count_logical];
        k_decompress(self.allow_unsafe, &mut buffer, &self.words, self.packed_enabled());
        buffer
    }
}

/// Ordered enumeration over the bits of a vector; see
/// [`Vector::bit_positions`].
#[derive(Debug)]
pub struct BitPositions<'a> {
    words: &'a [Word],
    packed: bool,
    value: bool,
    word_idx: usize,
    logical: u32,
    fill_remaining: u32,
    in_packed: bool,
    bit: u32,
}

impl Iterator for BitPositions<'_> {
    type Item = BitPosition;

    fn next(&mut self) -> Option<BitPosition> {
        loop {
            if self.fill_remaining > 0 {
                if self.bit < Word::BITS {
                    let position = self.logical * Word::BITS + self.bit;
                    self.bit += 1;
                    return Some(position);
                }
                self.fill_remaining -= 1;
                self.logical += 1;
                self.bit = 0;
                if self.fill_remaining > 0 {
                    continue;
                }
                let word = self.words[self.word_idx];
                if self.packed && word.has_packed_word() {
                    self.in_packed = true;
                } else {
                    self.word_idx += 1;
                }
                continue;
            }
            if self.in_packed {
                let word = self.words[self.word_idx];
                self.in_packed = false;
                let position = self.logical * Word::BITS + word.packed_position();
                self.logical += 1;
                self.word_idx += 1;
                return Some(position);
            }
            let word = *self.words.get(self.word_idx)?;
            if word.is_compressed() {
                if word.fill_bit() {
                    // value is always true here: clear-bit enumeration is
                    // rejected for compressed vectors at construction
                    self.fill_remaining = word.fill_count();
                    self.bit = 0;
                    continue;
                }
                self.logical += word.fill_count();
                if self.packed && word.has_packed_word() {
                    self.in_packed = true;
                } else {
                    self.word_idx += 1;
                }
                continue;
            }
            while self.bit < Word::BITS {
                let bit = self.bit;
                self.bit += 1;
                if word.get_bit(bit) == self.value {
                    return Some(self.logical * Word::BITS + bit);
                }
            }
            self.bit = 0;
            self.logical += 1;
            self.word_idx += 1;
        }
    }
}

fn fill_count_for(words: usize) -> Result<u32> {
    if words > Word::FILL_COUNT_MASK as usize {
        return Err(Error::new(
            ErrorKind::ArgumentOutOfRange,
            format!("zero fill of {} words overflows the fill count", words),
        ));
    }
    Ok(words as u32)
}

// Kernel dispatch: `allow_unsafe` picks the pointer twins when the build
// carries them; construction already rejected the flag otherwise.

fn k_decompress(allow_unsafe: bool, dst: &mut [Word], src: &[Word], packed: bool) {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::decompress(dst, src, packed);
    }
    let _ = allow_unsafe;
    logic::decompress(dst, src, packed)
}

fn k_and_in_place_nn(allow_unsafe: bool, lhs: &mut [Word], rhs: &[Word]) -> usize {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_in_place_nn(lhs, rhs);
    }
    let _ = allow_unsafe;
    logic::and_in_place_nn(lhs, rhs)
}

fn k_and_in_place_n_cwpp(allow_unsafe: bool, lhs: &mut [Word], rhs: &[Word], packed: bool) -> usize {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_in_place_n_cwpp(lhs, rhs, packed);
    }
    let _ = allow_unsafe;
    logic::and_in_place_n_cwpp(lhs, rhs, packed)
}

fn k_or_in_place_nn(allow_unsafe: bool, lhs: &mut [Word], rhs: &[Word]) {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::or_in_place_nn(lhs, rhs);
    }
    let _ = allow_unsafe;
    logic::or_in_place_nn(lhs, rhs)
}

fn k_or_in_place_n_cwpp(allow_unsafe: bool, lhs: &mut [Word], rhs: &[Word], packed: bool) {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::or_in_place_n_cwpp(lhs, rhs, packed);
    }
    let _ = allow_unsafe;
    logic::or_in_place_n_cwpp(lhs, rhs, packed)
}

fn k_and_out_of_place_nn(allow_unsafe: bool, lhs: &[Word], rhs: &[Word]) -> Vec<Word> {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_out_of_place_nn(lhs, rhs);
    }
    let _ = allow_unsafe;
    logic::and_out_of_place_nn(lhs, rhs)
}

fn k_and_population_nn(allow_unsafe: bool, lhs: &[Word], rhs: &[Word]) -> u32 {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_population_nn(lhs, rhs);
    }
    let _ = allow_unsafe;
    logic::and_population_nn(lhs, rhs)
}

fn k_and_population_n_cwpp(allow_unsafe: bool, lhs: &[Word], rhs: &[Word], packed: bool) -> u32 {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_population_n_cwpp(lhs, rhs, packed);
    }
    let _ = allow_unsafe;
    logic::and_population_n_cwpp(lhs, rhs, packed)
}

fn k_and_population_any_nn(allow_unsafe: bool, lhs: &[Word], rhs: &[Word]) -> bool {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_population_any_nn(lhs, rhs);
    }
    let _ = allow_unsafe;
    logic::and_population_any_nn(lhs, rhs)
}

fn k_and_population_any_n_cwpp(
    allow_unsafe: bool,
    lhs: &[Word],
    rhs: &[Word],
    packed: bool,
) -> bool {
    #[cfg(feature = "unsafe-kernels")]
    if allow_unsafe {
        return logic_unsafe::and_population_any_n_cwpp(lhs, rhs, packed);
    }
    let _ = allow_unsafe;
    logic::and_population_any_n_cwpp(lhs, rhs, packed)
}
