//! Orderings used to break ties between equally scored candidates.

use std::cmp::Ordering;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::TieBreakMode;

pub trait Collator: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// Root-locale style ordering, on three levels: base letters first, ignoring
/// case and accents, then accents (unaccented first), then case (lower case
/// first). So "apple" < "Apple" < "banana" and "emile" < "Émile" < "fable".
#[derive(Debug, Clone, Copy, Default)]
pub struct RootCollator;

impl Collator for RootCollator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        let (a_base, a_marks) = decompose(a);
        let (b_base, b_marks) = decompose(b);
        a_base
            .cmp(&b_base)
            .then_with(|| a_marks.cmp(&b_marks))
            .then_with(|| lower_first(a, b))
    }
}

// Lower-cased base letters, and the combining marks attached to each of them.
fn decompose(s: &str) -> (Vec<char>, Vec<Vec<char>>) {
    let mut base: Vec<char> = Vec::new();
    let mut marks: Vec<Vec<char>> = Vec::new();
    for c in s.nfd() {
        if is_combining_mark(c) {
            if let Some(m) = marks.last_mut() {
                m.push(c);
                continue;
            }
        }
        for l in c.to_lowercase() {
            base.push(l);
            marks.push(Vec::new());
        }
    }
    (base, marks)
}

// Within a case-insensitive tie, lower case sorts before upper case.
fn lower_first(a: &str, b: &str) -> Ordering {
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            return match (ca.is_lowercase(), cb.is_lowercase()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => ca.cmp(&cb),
            };
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodepointCollator;

impl Collator for CodepointCollator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

pub fn collator_for(mode: TieBreakMode) -> Box<dyn Collator> {
    match mode {
        TieBreakMode::RootCollation => Box::new(RootCollator),
        TieBreakMode::CodepointOrder => Box::new(CodepointCollator),
    }
}
