//! Pointer-arithmetic twins of the `logic` kernels, compiled behind the
//! `unsafe-kernels` feature and selected at runtime by `allow_unsafe`.
//!
//! Every function here must be observably identical to its safe twin; the
//! equivalence tests in `logic` drive both over the same inputs. Bounds are
//! the caller's contract, exactly as documented on the safe kernels.

use super::word::Word;

pub(crate) fn decompress(dst: &mut [Word], src: &[Word], packed: bool) {
    unsafe {
        let mut out = dst.as_mut_ptr();
        let mut cur = src.as_ptr();
        let end = cur.add(src.len());
        while cur < end {
            let word = *cur;
            if word.is_compressed() {
                if word.fill_bit() {
                    let stop = out.add(word.fill_count() as usize);
                    while out < stop {
                        *out = Word(Word::LITERAL_MASK);
                        out = out.add(1);
                    }
                } else {
                    out = out.add(word.fill_count() as usize);
                }
                if packed && word.has_packed_word() {
                    *out = word.packed_word();
                    out = out.add(1);
                }
            } else {
                *out = word;
                out = out.add(1);
            }
            cur = cur.add(1);
        }
    }
}

pub(crate) fn and_in_place_nn(lhs: &mut [Word], rhs: &[Word]) -> usize {
    let common = lhs.len().min(rhs.len());
    unsafe {
        let mut l = lhs.as_mut_ptr();
        let mut r = rhs.as_ptr();
        let stop = l.add(common);
        while l < stop {
            (*l).0 &= (*r).0;
            l = l.add(1);
            r = r.add(1);
        }
        let end = lhs.as_mut_ptr().add(lhs.len());
        while l < end {
            *l = Word::ZERO;
            l = l.add(1);
        }
    }
    live_word_count(lhs)
}

pub(crate) fn and_in_place_n_cwpp(lhs: &mut [Word], rhs: &[Word], packed: bool) -> usize {
    let len = lhs.len();
    unsafe {
        let base = lhs.as_mut_ptr();
        let end = base.add(len);
        let mut l = base;
        let mut r = rhs.as_ptr();
        let rhs_end = r.add(rhs.len());
        while r < rhs_end && l < end {
            let word = *r;
            if word.is_compressed() {
                // a fill may run past the left's end; clamp before advancing
                let remaining = end.offset_from(l) as usize;
                let span = (word.fill_count() as usize).min(remaining);
                if word.fill_bit() {
                    l = l.add(span);
                } else {
                    let stop = l.add(span);
                    while l < stop {
                        *l = Word::ZERO;
                        l = l.add(1);
                    }
                }
                if packed && word.has_packed_word() && l < end {
                    (*l).0 &= word.packed_word().0;
                    l = l.add(1);
                }
            } else {
                (*l).0 &= word.0;
                l = l.add(1);
            }
            r = r.add(1);
        }
        while l < end {
            *l = Word::ZERO;
            l = l.add(1);
        }
    }
    live_word_count(lhs)
}

pub(crate) fn or_in_place_nn(lhs: &mut [Word], rhs: &[Word]) {
    let common = lhs.len().min(rhs.len());
    unsafe {
        let mut l = lhs.as_mut_ptr();
        let mut r = rhs.as_ptr();
        let stop = l.add(common);
        while l < stop {
            (*l).0 |= (*r).0;
            l = l.add(1);
            r = r.add(1);
        }
    }
}

pub(crate) fn or_in_place_n_cwpp(lhs: &mut [Word], rhs: &[Word], packed: bool) {
    unsafe {
        let mut l = lhs.as_mut_ptr();
        let mut r = rhs.as_ptr();
        let rhs_end = r.add(rhs.len());
        while r < rhs_end {
            let word = *r;
            if word.is_compressed() {
                let stop = l.add(word.fill_count() as usize);
                if word.fill_bit() {
                    while l < stop {
                        (*l).0 = Word::LITERAL_MASK;
                        l = l.add(1);
                    }
                }
                l = stop;
                if packed && word.has_packed_word() {
                    (*l).0 |= word.packed_word().0;
                    l = l.add(1);
                }
            } else {
                (*l).0 |= word.0;
                l = l.add(1);
            }
            r = r.add(1);
        }
    }
}

pub(crate) fn and_out_of_place_nn(lhs: &[Word], rhs: &[Word]) -> Vec<Word> {
    let len = lhs.len().min(rhs.len());
    let mut out = vec![Word::ZERO; len];
    unsafe {
        let mut o = out.as_mut_ptr();
        let mut l = lhs.as_ptr();
        let mut r = rhs.as_ptr();
        let stop = o.add(len);
        while o < stop {
            (*o).0 = (*l).0 & (*r).0;
            o = o.add(1);
            l = l.add(1);
            r = r.add(1);
        }
    }
    out
}

pub(crate) fn and_population_nn(lhs: &[Word], rhs: &[Word]) -> u32 {
    let common = lhs.len().min(rhs.len());
    let mut population = 0u32;
    unsafe {
        let mut l = lhs.as_ptr();
        let mut r = rhs.as_ptr();
        let stop = l.add(common);
        while l < stop {
            population += ((*l).0 & (*r).0).count_ones();
            l = l.add(1);
            r = r.add(1);
        }
    }
    population
}

pub(crate) fn and_population_n_cwpp(lhs: &[Word], rhs: &[Word], packed: bool) -> u32 {
    let mut population = 0u32;
    unsafe {
        let base = lhs.as_ptr();
        let end = base.add(lhs.len());
        let mut l = base;
        let mut r = rhs.as_ptr();
        let rhs_end = r.add(rhs.len());
        while r < rhs_end && l < end {
            let word = *r;
            if word.is_compressed() {
                let remaining = end.offset_from(l) as usize;
                let stop = l.add((word.fill_count() as usize).min(remaining));
                if word.fill_bit() {
                    let mut p = l;
                    while p < stop {
                        population += (*p).0.count_ones();
                        p = p.add(1);
                    }
                }
                l = stop;
                if packed && word.has_packed_word() && l < end {
                    population += ((*l).0 & word.packed_word().0).count_ones();
                    l = l.add(1);
                }
            } else {
                population += ((*l).0 & word.0).count_ones();
                l = l.add(1);
            }
            r = r.add(1);
        }
    }
    population
}

pub(crate) fn and_population_any_nn(lhs: &[Word], rhs: &[Word]) -> bool {
    let common = lhs.len().min(rhs.len());
    unsafe {
        let mut l = lhs.as_ptr();
        let mut r = rhs.as_ptr();
        let stop = l.add(common);
        while l < stop {
            if (*l).0 & (*r).0 != 0 {
                return true;
            }
            l = l.add(1);
            r = r.add(1);
        }
    }
    false
}

pub(crate) fn and_population_any_n_cwpp(lhs: &[Word], rhs: &[Word], packed: bool) -> bool {
    unsafe {
        let base = lhs.as_ptr();
        let end = base.add(lhs.len());
        let mut l = base;
        let mut r = rhs.as_ptr();
        let rhs_end = r.add(rhs.len());
        while r < rhs_end && l < end {
            let word = *r;
            if word.is_compressed() {
                let remaining = end.offset_from(l) as usize;
                let stop = l.add((word.fill_count() as usize).min(remaining));
                if word.fill_bit() {
                    let mut p = l;
                    while p < stop {
                        if (*p).0 != 0 {
                            return true;
                        }
                        p = p.add(1);
                    }
                }
                l = stop;
                if packed && word.has_packed_word() && l < end {
                    if (*l).0 & word.packed_word().0 != 0 {
                        return true;
                    }
                    l = l.add(1);
                }
            } else {
                if (*l).0 & word.0 != 0 {
                    return true;
                }
                l = l.add(1);
            }
            r = r.add(1);
        }
    }
    false
}

fn live_word_count(words: &[Word]) -> usize {
    super::logic::live_word_count(words)
}
