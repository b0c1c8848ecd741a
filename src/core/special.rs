//! Special-token recognition.
//!
//! Special tokens are literal strings with reserved IDs. Before any regex or
//! merge work, input text is partitioned into plain-text runs and special
//! tokens according to an [`AllowedSpecial`] policy. Where several allowed
//! literals could match, the leftmost position wins, and at one position the
//! longest literal wins.

use aho_corasick::{AhoCorasick, MatchKind};
use rustc_hash::{FxHashMap, FxHashSet};

use super::tokenizer::TokenizerError;
use super::vocab::{Rank, VocabError};

/// Which special tokens may be recognised in input text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedSpecial<'a> {
    /// No special tokens are recognised; their text is ordinary content.
    #[default]
    None,
    /// Every configured special token is recognised.
    All,
    /// Only the listed literals are recognised. Unknown literals are ignored.
    Explicit(FxHashSet<&'a str>),
}

impl<'a> AllowedSpecial<'a> {
    pub fn explicit(literals: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Explicit(literals.into_iter().collect())
    }

    fn allows(&self, literal: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Explicit(set) => set.contains(literal),
        }
    }
}

/// One piece of partitioned input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'t> {
    /// Ordinary text, to be pre-tokenized and merged. Never empty.
    Text(&'t str),
    /// A recognised special token.
    Special { literal: &'t str, id: Rank },
}

/// The special-token table of one encoding.
#[derive(Clone)]
pub struct SpecialTokens {
    encoder: FxHashMap<String, Rank>,
    decoder: FxHashMap<Rank, String>,
    /// Literals in automaton pattern order, with their IDs.
    literals: Vec<(String, Rank)>,
    /// Leftmost-longest matcher over every literal.
    longest: Option<AhoCorasick>,
    /// Overlapping matcher over every literal, for explicit policies.
    overlapping: Option<AhoCorasick>,
}

impl SpecialTokens {
    pub fn new(encoder: FxHashMap<String, Rank>) -> Result<Self, TokenizerError> {
        let mut literals: Vec<(String, Rank)> =
            encoder.iter().map(|(k, &v)| (k.clone(), v)).collect();
        literals.sort_unstable();

        let mut decoder = FxHashMap::default();
        for (literal, id) in &literals {
            if literal.is_empty() {
                return Err(VocabError::InvalidVocabulary(
                    "special token literal is empty".to_string(),
                )
                .into());
            }
            if let Some(other) = decoder.insert(*id, literal.clone()) {
                return Err(VocabError::InvalidVocabulary(format!(
                    "special tokens {other:?} and {literal:?} share id {id}"
                ))
                .into());
            }
        }

        let (longest, overlapping) = if literals.is_empty() {
            (None, None)
        } else {
            let patterns = literals.iter().map(|(literal, _)| literal.as_str());
            let longest = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .build(patterns.clone())?;
            let overlapping = AhoCorasick::builder()
                .match_kind(MatchKind::Standard)
                .build(patterns)?;
            (Some(longest), Some(overlapping))
        };

        Ok(Self {
            encoder,
            decoder,
            literals,
            longest,
            overlapping,
        })
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self {
            encoder: FxHashMap::default(),
            decoder: FxHashMap::default(),
            literals: Vec::new(),
            longest: None,
            overlapping: None,
        }
    }

    #[inline]
    pub fn id(&self, literal: &str) -> Option<Rank> {
        self.encoder.get(literal).copied()
    }

    #[inline]
    pub fn literal(&self, id: Rank) -> Option<&str> {
        self.decoder.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    pub fn encoder(&self) -> &FxHashMap<String, Rank> {
        &self.encoder
    }

    pub fn decoder(&self) -> &FxHashMap<Rank, String> {
        &self.decoder
    }

    pub fn max_id(&self) -> Option<Rank> {
        self.decoder.keys().max().copied()
    }

    /// Partition `text` into plain runs and special tokens allowed by `allowed`.
    pub fn split<'s, 't>(
        &'s self,
        text: &'t str,
        allowed: &AllowedSpecial<'_>,
    ) -> Segments<'s, 't> {
        let matches = match (allowed, &self.longest) {
            (AllowedSpecial::None, _) | (_, None) => Matches::None,
            (AllowedSpecial::All, Some(longest)) => Matches::Automaton(longest),
            (AllowedSpecial::Explicit(_), Some(_)) => Matches::Listed(
                self.allowed_matches(text, allowed).into_iter(),
            ),
        };
        Segments {
            text,
            pos: 0,
            pending: None,
            matches,
            literals: &self.literals,
        }
    }

    /// Leftmost-longest, non-overlapping matches of allowed literals.
    fn allowed_matches(
        &self,
        text: &str,
        allowed: &AllowedSpecial<'_>,
    ) -> Vec<(usize, usize, Rank)> {
        let Some(overlapping) = &self.overlapping else {
            return Vec::new();
        };
        let mut candidates: Vec<(usize, usize, Rank)> = overlapping
            .find_overlapping_iter(text)
            .filter_map(|m| {
                let (literal, id) = &self.literals[m.pattern().as_usize()];
                allowed
                    .allows(literal)
                    .then_some((m.start(), m.end(), *id))
            })
            .collect();
        // Leftmost first, longest first at one position.
        candidates.sort_unstable_by_key(|&(start, end, _)| (start, std::cmp::Reverse(end)));

        let mut selected = Vec::new();
        let mut pos = 0;
        for candidate in candidates {
            if candidate.0 >= pos {
                pos = candidate.1;
                selected.push(candidate);
            }
        }
        selected
    }

    /// The first configured special literal occurring anywhere in `text`.
    pub fn find_any<'t>(&self, text: &'t str) -> Option<&'t str> {
        let m = self.longest.as_ref()?.find(text)?;
        Some(&text[m.start()..m.end()])
    }

    /// The leftmost occurrence in `text` of a literal `allowed` does not
    /// permit.
    ///
    /// Every occurrence counts, including ones overlapping a match that
    /// [`SpecialTokens::split`] would take, unless the occurrence lies
    /// entirely inside such a match.
    pub fn find_disallowed<'t>(
        &self,
        text: &'t str,
        allowed: &AllowedSpecial<'_>,
    ) -> Option<&'t str> {
        let overlapping = match allowed {
            AllowedSpecial::All => return None,
            AllowedSpecial::None => return self.find_any(text),
            AllowedSpecial::Explicit(_) => self.overlapping.as_ref()?,
        };
        let taken = self.allowed_matches(text, allowed);
        let covered = |start: usize, end: usize| {
            // `taken` is sorted and non-overlapping.
            let i = taken.partition_point(|&(s, _, _)| s <= start);
            i > 0 && end <= taken[i - 1].1
        };
        overlapping
            .find_overlapping_iter(text)
            .filter(|m| !allowed.allows(&self.literals[m.pattern().as_usize()].0))
            .filter(|m| !covered(m.start(), m.end()))
            .min_by_key(|m| (m.start(), std::cmp::Reverse(m.end())))
            .map(|m| &text[m.start()..m.end()])
    }
}

impl std::fmt::Debug for SpecialTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.literals.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

enum Matches<'s> {
    None,
    Automaton(&'s AhoCorasick),
    Listed(std::vec::IntoIter<(usize, usize, Rank)>),
}

/// Iterator returned by [`SpecialTokens::split`].
pub struct Segments<'s, 't> {
    text: &'t str,
    pos: usize,
    pending: Option<Segment<'t>>,
    matches: Matches<'s>,
    literals: &'s [(String, Rank)],
}

impl Segments<'_, '_> {
    fn next_match(&mut self) -> Option<(usize, usize, Rank)> {
        match &mut self.matches {
            Matches::None => None,
            Matches::Automaton(automaton) => {
                let input = aho_corasick::Input::new(self.text).span(self.pos..self.text.len());
                automaton
                    .find(input)
                    .map(|m| (m.start(), m.end(), self.literals[m.pattern().as_usize()].1))
            }
            Matches::Listed(listed) => listed.next(),
        }
    }
}

impl<'t> Iterator for Segments<'_, 't> {
    type Item = Segment<'t>;

    fn next(&mut self) -> Option<Segment<'t>> {
        if let Some(segment) = self.pending.take() {
            return Some(segment);
        }
        if self.pos >= self.text.len() {
            return None;
        }
        match self.next_match() {
            Some((start, end, id)) => {
                let special = Segment::Special {
                    literal: &self.text[start..end],
                    id,
                };
                let plain = &self.text[self.pos..start];
                self.pos = end;
                if plain.is_empty() {
                    Some(special)
                } else {
                    self.pending = Some(special);
                    Some(Segment::Text(plain))
                }
            }
            None => {
                let rest = &self.text[self.pos..];
                self.pos = self.text.len();
                Some(Segment::Text(rest))
            }
        }
    }
}
