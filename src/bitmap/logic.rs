//! Safe word-array kernels.
//!
//! Each kernel is specialized by the (left, right) operand forms so the hot
//! loop never branches per word: `nn` takes two literal arrays, `n_cwpp`
//! takes a literal left and a compressed (optionally packed) right. Callers
//! reorder operands so the less-compressed one is on the left. The pointer
//! twins in `logic_unsafe` must stay observably identical to these.

use super::word::Word;

/// Expand a compressed source into a pre-sized, zeroed literal destination.
pub(crate) fn decompress(dst: &mut [Word], src: &[Word], packed: bool) {
    let mut cursor = 0usize;
    for word in src {
        if word.is_compressed() {
            if word.fill_bit() {
                for slot in &mut dst[cursor..cursor + word.fill_count() as usize] {
                    *slot = Word(Word::LITERAL_MASK);
                }
            }
            cursor += word.fill_count() as usize;
            if packed && word.has_packed_word() {
                dst[cursor] = word.packed_word();
                cursor += 1;
            }
        } else {
            dst[cursor] = *word;
            cursor += 1;
        }
    }
}

/// AND a literal left with a literal right. Bits beyond the right's length
/// are cleared. Returns the live word count after trimming trailing zeros.
pub(crate) fn and_in_place_nn(lhs: &mut [Word], rhs: &[Word]) -> usize {
    let common = lhs.len().min(rhs.len());
    for i in 0..common {
        lhs[i].0 &= rhs[i].0;
    }
    for slot in &mut lhs[common..] {
        *slot = Word::ZERO;
    }
    live_word_count(lhs)
}

/// AND a literal left with a compressed right.
pub(crate) fn and_in_place_n_cwpp(lhs: &mut [Word], rhs: &[Word], packed: bool) -> usize {
    let len = lhs.len();
    let mut cursor = 0usize;
    for word in rhs {
        if cursor >= len {
            break;
        }
        if word.is_compressed() {
            let span = word.fill_count() as usize;
            if !word.fill_bit() {
                for slot in &mut lhs[cursor..len.min(cursor + span)] {
                    *slot = Word::ZERO;
                }
            }
            cursor += span;
            if packed && word.has_packed_word() {
                if cursor < len {
                    lhs[cursor].0 &= word.packed_word().0;
                }
                cursor += 1;
            }
        } else {
            lhs[cursor].0 &= word.0;
            cursor += 1;
        }
    }
    // the right is implicitly zero past its end
    for slot in &mut lhs[len.min(cursor)..] {
        *slot = Word::ZERO;
    }
    live_word_count(lhs)
}

/// OR a literal right into a literal left. The left must already span the
/// right's length.
pub(crate) fn or_in_place_nn(lhs: &mut [Word], rhs: &[Word]) {
    for (l, r) in lhs.iter_mut().zip(rhs) {
        l.0 |= r.0;
    }
}

/// OR a compressed right into a literal left. The left must already span the
/// right's logical length.
pub(crate) fn or_in_place_n_cwpp(lhs: &mut [Word], rhs: &[Word], packed: bool) {
    let mut cursor = 0usize;
    for word in rhs {
        if word.is_compressed() {
            let span = word.fill_count() as usize;
            if word.fill_bit() {
                for slot in &mut lhs[cursor..cursor + span] {
                    slot.0 = Word::LITERAL_MASK;
                }
            }
            cursor += span;
            if packed && word.has_packed_word() {
                lhs[cursor].0 |= word.packed_word().0;
                cursor += 1;
            }
        } else {
            lhs[cursor].0 |= word.0;
            cursor += 1;
        }
    }
}

/// Literal AND literal, into a fresh literal array.
pub(crate) fn and_out_of_place_nn(lhs: &[Word], rhs: &[Word]) -> Vec<Word> {
    lhs.iter().zip(rhs).map(|(l, r)| Word(l.0 & r.0)).collect()
}

/// Literal AND compressed, into a fresh literal array.
pub(crate) fn and_out_of_place_n_cwpp(lhs: &[Word], rhs: &[Word], packed: bool) -> Vec<Word> {
    let rhs_logical = logical_word_count(rhs, packed);
    let mut out = vec![Word::ZERO; lhs.len().min(rhs_logical)];
    let len = out.len();
    let mut cursor = 0usize;
    for word in rhs {
        if cursor >= len {
            break;
        }
        if word.is_compressed() {
            let span = word.fill_count() as usize;
            if word.fill_bit() {
                let end = len.min(cursor + span);
                out[cursor..end].copy_from_slice(&lhs[cursor..end]);
            }
            cursor += span;
            if packed && word.has_packed_word() {
                if cursor < len {
                    out[cursor] = Word(lhs[cursor].0 & word.packed_word().0);
                }
                cursor += 1;
            }
        } else {
            out[cursor] = Word(lhs[cursor].0 & word.0);
            cursor += 1;
        }
    }
    out
}

/// Compressed AND compressed, into a fresh literal array. Walks both
/// operands span-by-span without materializing either side. Packed
/// recognition is per operand, since the compression modes may differ.
pub(crate) fn and_out_of_place_cwpp_cwpp(
    lhs: &[Word],
    lhs_packed: bool,
    rhs: &[Word],
    rhs_packed: bool,
) -> Vec<Word> {
    let logical = logical_word_count(lhs, lhs_packed).min(logical_word_count(rhs, rhs_packed));
    let mut out = vec![Word::ZERO; logical];

    let mut left = Spans::new(lhs, lhs_packed);
    let mut right = Spans::new(rhs, rhs_packed);
    let (mut l, mut r) = (left.next(), right.next());
    let mut cursor = 0usize;

    while let (Some(lspan), Some(rspan)) = (&mut l, &mut r) {
        let step = lspan.1.min(rspan.1);
        let bits = lspan.0 & rspan.0;
        if bits != 0 {
            for slot in &mut out[cursor..cursor + step] {
                *slot = Word(bits);
            }
        }
        cursor += step;
        lspan.1 -= step;
        rspan.1 -= step;
        if lspan.1 == 0 {
            l = left.next();
        }
        if rspan.1 == 0 {
            r = right.next();
        }
    }
    out
}

/// Population of the logical AND of two literal arrays.
pub(crate) fn and_population_nn(lhs: &[Word], rhs: &[Word]) -> u32 {
    lhs.iter().zip(rhs).map(|(l, r)| (l.0 & r.0).count_ones()).sum()
}

/// Population of the logical AND of a literal left and compressed right.
pub(crate) fn and_population_n_cwpp(lhs: &[Word], rhs: &[Word], packed: bool) -> u32 {
    let len = lhs.len();
    let mut population = 0u32;
    let mut cursor = 0usize;
    for word in rhs {
        if cursor >= len {
            break;
        }
        if word.is_compressed() {
            let span = word.fill_count() as usize;
            if word.fill_bit() {
                for slot in &lhs[cursor..len.min(cursor + span)] {
                    population += slot.0.count_ones();
                }
            }
            cursor += span;
            if packed && word.has_packed_word() {
                if cursor < len {
                    population += (lhs[cursor].0 & word.packed_word().0).count_ones();
                }
                cursor += 1;
            }
        } else {
            population += (lhs[cursor].0 & word.0).count_ones();
            cursor += 1;
        }
    }
    population
}

/// Whether the logical AND of two literal arrays has any set bit.
pub(crate) fn and_population_any_nn(lhs: &[Word], rhs: &[Word]) -> bool {
    lhs.iter().zip(rhs).any(|(l, r)| l.0 & r.0 != 0)
}

/// Short-circuit variant of `and_population_n_cwpp`.
pub(crate) fn and_population_any_n_cwpp(lhs: &[Word], rhs: &[Word], packed: bool) -> bool {
    let len = lhs.len();
    let mut cursor = 0usize;
    for word in rhs {
        if cursor >= len {
            break;
        }
        if word.is_compressed() {
            let span = word.fill_count() as usize;
            if word.fill_bit() && lhs[cursor..len.min(cursor + span)].iter().any(|w| w.0 != 0) {
                return true;
            }
            cursor += span;
            if packed && word.has_packed_word() {
                if cursor < len && lhs[cursor].0 & word.packed_word().0 != 0 {
                    return true;
                }
                cursor += 1;
            }
        } else {
            if lhs[cursor].0 & word.0 != 0 {
                return true;
            }
            cursor += 1;
        }
    }
    false
}

/// Logical word count of a word array, expanding fills and packed positions.
pub(crate) fn logical_word_count(words: &[Word], packed: bool) -> usize {
    words
        .iter()
        .map(|w| {
            if w.is_compressed() {
                w.fill_count() as usize + (packed && w.has_packed_word()) as usize
            } else {
                1
            }
        })
        .sum()
}

/// Index just past the last nonzero word.
pub(crate) fn live_word_count(words: &[Word]) -> usize {
    words.iter().rposition(|w| w.0 != 0).map_or(0, |i| i + 1)
}

/// Decodes a compressed word array into (literal bits, run length) spans.
struct Spans<'a> {
    words: &'a [Word],
    idx: usize,
    packed: bool,
    pending_packed: bool,
}

impl<'a> Spans<'a> {
    fn new(words: &'a [Word], packed: bool) -> Self {
        Spans { words, idx: 0, packed, pending_packed: false }
    }
}

impl Iterator for Spans<'_> {
    type Item = (u32, usize);

    fn next(&mut self) -> Option<(u32, usize)> {
        if self.pending_packed {
            self.pending_packed = false;
            let word = self.words[self.idx];
            self.idx += 1;
            return Some((word.packed_word().0, 1));
        }
        let word = *self.words.get(self.idx)?;
        if word.is_compressed() {
            let bits = if word.fill_bit() { Word::LITERAL_MASK } else { 0 };
            if self.packed && word.has_packed_word() {
                self.pending_packed = true;
            } else {
                self.idx += 1;
            }
            Some((bits, word.fill_count() as usize))
        } else {
            self.idx += 1;
            Some((word.0, 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compressed fixtures are built word-by-word; the Vector layer is what
    // normally guarantees canonical form, so these stay canonical by hand.
    fn ones_run(count: u32) -> Word {
        Word::fill(true, count)
    }

    fn zero_run(count: u32) -> Word {
        Word::fill(false, count)
    }

    fn packed_run(count: u32, position: u32) -> Word {
        let mut run = Word::fill(false, count);
        let mut single = Word::ZERO;
        single.set_bit(position, true);
        run.pack(single);
        run
    }

    fn literals(bits: &[u32]) -> Vec<Word> {
        bits.iter().map(|&b| Word::literal(b)).collect()
    }

    #[test]
    fn decompress_expands_runs_and_packed() {
        let src = vec![ones_run(2), Word::literal(0b1010), packed_run(3, 7)];
        let mut dst = vec![Word::ZERO; logical_word_count(&src, true)];
        decompress(&mut dst, &src, true);
        assert_eq!(
            dst,
            literals(&[Word::LITERAL_MASK, Word::LITERAL_MASK, 0b1010, 0, 0, 0, 1 << 7])
        );
    }

    #[test]
    fn and_in_place_nn_trims_trailing_zeros() {
        let mut lhs = literals(&[0b1111, 0b0110, 0b1000]);
        let live = and_in_place_nn(&mut lhs, &literals(&[0b1010, 0b0110]));
        assert_eq!(live, 2);
        assert_eq!(&lhs[..live], &literals(&[0b1010, 0b0110])[..]);
        assert_eq!(lhs[2], Word::ZERO);
    }

    #[test]
    fn and_in_place_n_cwpp_honors_fills_and_packed() {
        let mut lhs = literals(&[0b11, 0b11, 0b11, 0b11, 0b11]);
        let rhs = vec![zero_run(1), Word::literal(0b01), packed_run(1, 1), Word::literal(0b11)];
        let live = and_in_place_n_cwpp(&mut lhs, &rhs, true);
        // rhs logical: [0, 0b01, 0, 1<<1, 0b11]
        assert_eq!(live, 5);
        assert_eq!(&lhs[..live], &literals(&[0, 0b01, 0, 0b10, 0b11])[..]);
    }

    #[test]
    fn and_in_place_clears_past_right_end() {
        let mut lhs = literals(&[0b1, 0b1, 0b1]);
        let live = and_in_place_n_cwpp(&mut lhs, &[ones_run(1)], false);
        assert_eq!(live, 1);
        assert_eq!(lhs[1], Word::ZERO);
        assert_eq!(lhs[2], Word::ZERO);
    }

    #[test]
    fn or_in_place_n_cwpp_sets_fill_spans() {
        let mut lhs = literals(&[0b1, 0, 0, 0b1000]);
        let rhs = vec![Word::literal(0b10), ones_run(2), Word::literal(0b1)];
        or_in_place_n_cwpp(&mut lhs, &rhs, false);
        assert_eq!(
            lhs,
            literals(&[0b11, Word::LITERAL_MASK, Word::LITERAL_MASK, 0b1001])
        );
    }

    #[test]
    fn out_of_place_matches_in_place() {
        let lhs = literals(&[0b1011, 0b1111, 0, 0b1, 0b110]);
        let rhs = vec![Word::literal(0b1110), zero_run(2), packed_run(1, 2)];
        let out = and_out_of_place_n_cwpp(&lhs, &rhs, true);

        let mut via_in_place = lhs.clone();
        let live = and_in_place_n_cwpp(&mut via_in_place, &rhs, true);
        assert_eq!(live_word_count(&out), live);
        assert_eq!(&out[..live], &via_in_place[..live]);
    }

    #[test]
    fn cwpp_cwpp_merges_runs() {
        let lhs = vec![ones_run(3), Word::literal(0b101)];
        let rhs = vec![Word::literal(0b111), zero_run(1), ones_run(2)];
        let out = and_out_of_place_cwpp_cwpp(&lhs, true, &rhs, true);
        assert_eq!(out, literals(&[0b111, 0, Word::LITERAL_MASK, 0b101]));
    }

    #[test]
    fn cwpp_cwpp_aligns_packed_against_run() {
        let lhs = vec![packed_run(2, 5), Word::literal(0b1)];
        let rhs = vec![ones_run(4)];
        let out = and_out_of_place_cwpp_cwpp(&lhs, true, &rhs, false);
        // lhs logical: [0, 0, 1<<5, 0b1]; rhs covers the first 4 words
        assert_eq!(out, literals(&[0, 0, 1 << 5, 0b1]));
    }

    #[test]
    fn population_kernels_match_materialized_and() {
        let lhs = literals(&[0b1011, Word::LITERAL_MASK, 0, 0b1, 0b110, 0b11]);
        let rhs = vec![Word::literal(0b1110), ones_run(2), packed_run(1, 1), Word::literal(0b10)];
        let materialized = and_out_of_place_n_cwpp(&lhs, &rhs, true);
        let expected: u32 = materialized.iter().map(|w| w.0.count_ones()).sum();

        assert_eq!(and_population_n_cwpp(&lhs, &rhs, true), expected);
        assert_eq!(and_population_any_n_cwpp(&lhs, &rhs, true), expected > 0);

        let rhs_literal = literals(&[0b0100, 0b1011, 0b1]);
        let expected: u32 = lhs
            .iter()
            .zip(&rhs_literal)
            .map(|(l, r)| (l.0 & r.0).count_ones())
            .sum();
        assert_eq!(and_population_nn(&lhs, &rhs_literal), expected);
        assert_eq!(and_population_any_nn(&lhs, &rhs_literal), expected > 0);
    }

    #[test]
    fn population_any_short_circuit_agrees_on_empty_intersection() {
        let lhs = literals(&[0b0101, 0, 0b1]);
        let rhs = vec![Word::literal(0b1010), ones_run(1), Word::literal(0b10)];
        assert_eq!(and_population_n_cwpp(&lhs, &rhs, false), 0);
        assert!(!and_population_any_n_cwpp(&lhs, &rhs, false));
    }
}

#[cfg(all(test, feature = "unsafe-kernels"))]
mod equivalence_tests {
    use super::*;
    use crate::bitmap::logic_unsafe;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_literals(rng: &mut StdRng, len: usize) -> Vec<Word> {
        (0..len)
            .map(|_| match rng.gen_range(0..5) {
                0 => Word::ZERO,
                1 => Word::literal(Word::LITERAL_MASK),
                2 => Word::literal(1 << rng.gen_range(0..Word::BITS)),
                _ => Word::literal(rng.gen::<u32>() & Word::LITERAL_MASK),
            })
            .collect()
    }

    fn random_compressed(rng: &mut StdRng, packed: bool) -> Vec<Word> {
        let mut words = Vec::new();
        for _ in 0..rng.gen_range(1..8) {
            match rng.gen_range(0..4) {
                0 => words.push(Word::literal(rng.gen::<u32>() & Word::LITERAL_MASK)),
                1 => words.push(Word::fill(true, rng.gen_range(1..5))),
                2 => words.push(Word::fill(false, rng.gen_range(1..5))),
                _ => {
                    let mut run = Word::fill(false, rng.gen_range(1..4));
                    if packed {
                        let mut single = Word::ZERO;
                        single.set_bit(rng.gen_range(0..Word::BITS), true);
                        run.pack(single);
                    }
                    words.push(run);
                }
            }
        }
        // last physical word stays a literal
        words.push(Word::literal(rng.gen::<u32>() & Word::LITERAL_MASK));
        words
    }

    #[test]
    fn pointer_kernels_match_safe_kernels() {
        let mut rng = StdRng::seed_from_u64(0x0b17_51f7);
        for round in 0..300 {
            let packed = round % 2 == 0;
            let lhs_len = rng.gen_range(1..40);
            let lhs = random_literals(&mut rng, lhs_len);
            let rhs_literal_len = rng.gen_range(1..40);
            let rhs_literal = random_literals(&mut rng, rhs_literal_len);
            let rhs_compressed = random_compressed(&mut rng, packed);

            let logical = logical_word_count(&rhs_compressed, packed);
            let mut safe_dst = vec![Word::ZERO; logical];
            let mut fast_dst = vec![Word::ZERO; logical];
            decompress(&mut safe_dst, &rhs_compressed, packed);
            logic_unsafe::decompress(&mut fast_dst, &rhs_compressed, packed);
            assert_eq!(safe_dst, fast_dst);

            let mut safe = lhs.clone();
            let mut fast = lhs.clone();
            assert_eq!(
                and_in_place_nn(&mut safe, &rhs_literal),
                logic_unsafe::and_in_place_nn(&mut fast, &rhs_literal)
            );
            assert_eq!(safe, fast);

            let mut safe = lhs.clone();
            let mut fast = lhs.clone();
            assert_eq!(
                and_in_place_n_cwpp(&mut safe, &rhs_compressed, packed),
                logic_unsafe::and_in_place_n_cwpp(&mut fast, &rhs_compressed, packed)
            );
            assert_eq!(safe, fast);

            let shared = random_literals(&mut rng, lhs.len());
            let mut safe = lhs.clone();
            let mut fast = lhs.clone();
            or_in_place_nn(&mut safe, &shared);
            logic_unsafe::or_in_place_nn(&mut fast, &shared);
            assert_eq!(safe, fast);

            // the OR contract requires the left to span the right
            let padded = random_literals(&mut rng, logical);
            let mut safe = padded.clone();
            let mut fast = padded.clone();
            or_in_place_n_cwpp(&mut safe, &rhs_compressed, packed);
            logic_unsafe::or_in_place_n_cwpp(&mut fast, &rhs_compressed, packed);
            assert_eq!(safe, fast);

            assert_eq!(
                and_out_of_place_nn(&lhs, &rhs_literal),
                logic_unsafe::and_out_of_place_nn(&lhs, &rhs_literal)
            );
            assert_eq!(
                and_population_nn(&lhs, &rhs_literal),
                logic_unsafe::and_population_nn(&lhs, &rhs_literal)
            );
            assert_eq!(
                and_population_n_cwpp(&lhs, &rhs_compressed, packed),
                logic_unsafe::and_population_n_cwpp(&lhs, &rhs_compressed, packed)
            );
            assert_eq!(
                and_population_any_nn(&lhs, &rhs_literal),
                logic_unsafe::and_population_any_nn(&lhs, &rhs_literal)
            );
            assert_eq!(
                and_population_any_n_cwpp(&lhs, &rhs_compressed, packed),
                logic_unsafe::and_population_any_n_cwpp(&lhs, &rhs_compressed, packed)
            );
        }
    }
}
