//! Vocabulary storage and loading.
//!
//! A [`Vocabulary`] is the immutable, validated bidirectional mapping between
//! byte pieces and their ranks. A rank doubles as the token ID and as the merge
//! priority: lower ranks are merged first during byte-pair encoding.
//!
//! The loaders in this module turn the two common on-disk shapes into a
//! `piece -> rank` map:
//!
//! - tiktoken rank files, one `base64_piece rank` pair per line
//! - HuggingFace `tokenizer.json` descriptions, whose `model.vocab` keys are
//!   GPT-2 byte-level strings (see [`super::byte_level`])
//!
//! # Example Format
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! Where `SGVsbG8=` decodes to `Hello` (rank 0), `V29ybGQ=` to `World` (rank 1)
//! and `IQ==` to `!` (rank 2).

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;

use super::byte_level::byte_level_decode;

/// Token identifier and merge priority.
pub type Rank = u32;

/// Errors that can occur when loading or validating a vocabulary.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("Invalid tokenizer description: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),
}

/// Immutable `piece <-> rank` mapping.
///
/// Construction guarantees that:
/// - no two pieces share a rank
/// - every single byte `0..=255` is a piece, so any input stays representable
///
/// The ranks may leave holes in `[base_rank, max_rank]`; those ids belong to
/// special tokens, which the [`Tokenizer`](super::Tokenizer) checks once the
/// special-token table is known.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    encoder: FxHashMap<Vec<u8>, Rank>,
    decoder: FxHashMap<Rank, Vec<u8>>,
    base: Rank,
    max: Rank,
    byte_ranks: [Rank; 256],
}

impl Vocabulary {
    /// Validate a finished `piece -> rank` map.
    pub fn new(encoder: FxHashMap<Vec<u8>, Rank>) -> Result<Self, VocabError> {
        let (Some(&base), Some(&max)) = (encoder.values().min(), encoder.values().max()) else {
            return Err(VocabError::InvalidVocabulary(
                "vocabulary is empty".to_string(),
            ));
        };
        if max == Rank::MAX {
            return Err(VocabError::InvalidVocabulary(format!(
                "rank {} is reserved",
                Rank::MAX
            )));
        }

        let mut decoder: FxHashMap<Rank, Vec<u8>> = FxHashMap::default();
        decoder.reserve(encoder.len());
        for (piece, &rank) in &encoder {
            if let Some(other) = decoder.insert(rank, piece.clone()) {
                return Err(VocabError::InvalidVocabulary(format!(
                    "rank {rank} is assigned to both {other:?} and {piece:?}"
                )));
            }
        }

        let mut byte_ranks = [0; 256];
        for (b, slot) in (0..=255u8).zip(byte_ranks.iter_mut()) {
            *slot = *encoder.get([b].as_slice()).ok_or_else(|| {
                VocabError::InvalidVocabulary(format!("missing single-byte piece 0x{b:02x}"))
            })?;
        }

        tracing::debug!(pieces = encoder.len(), base, max, "validated vocabulary");

        Ok(Self {
            encoder,
            decoder,
            base,
            max,
            byte_ranks,
        })
    }

    /// Build from `(piece, rank)` pairs.
    ///
    /// Unlike [`Vocabulary::new`], this also rejects a piece listed twice with
    /// different ranks, which a map would silently collapse.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (Vec<u8>, Rank)>,
    ) -> Result<Self, VocabError> {
        let mut encoder = FxHashMap::default();
        for (piece, rank) in pairs {
            if let Some(previous) = encoder.insert(piece, rank) {
                if previous != rank {
                    return Err(VocabError::InvalidVocabulary(format!(
                        "piece listed with ranks {previous} and {rank}"
                    )));
                }
            }
        }
        Self::new(encoder)
    }

    /// piece -> rank
    #[inline]
    pub fn rank(&self, piece: &[u8]) -> Option<Rank> {
        self.encoder.get(piece).copied()
    }

    /// rank -> piece
    #[inline]
    pub fn piece(&self, rank: Rank) -> Option<&[u8]> {
        self.decoder.get(&rank).map(Vec::as_slice)
    }

    /// Rank of the single-byte piece `b`. Always present.
    #[inline]
    pub fn byte_rank(&self, b: u8) -> Rank {
        self.byte_ranks[b as usize]
    }

    #[inline]
    pub fn contains_rank(&self, rank: Rank) -> bool {
        self.decoder.contains_key(&rank)
    }

    /// Number of pieces.
    #[inline]
    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    /// Smallest rank in the vocabulary.
    #[inline]
    pub fn base_rank(&self) -> Rank {
        self.base
    }

    /// Largest rank in the vocabulary.
    #[inline]
    pub fn max_rank(&self) -> Rank {
        self.max
    }

    /// Number of ids in `[base_rank, max_rank]` that no piece holds.
    pub fn unused_ranks(&self) -> u64 {
        (self.max - self.base) as u64 + 1 - self.encoder.len() as u64
    }

    /// The underlying `piece -> rank` map.
    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, Rank> {
        &self.encoder
    }

    /// Iterate `(rank, piece)` in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (Rank, &[u8])> + '_ {
        let mut entries: Vec<(Rank, &[u8])> = self
            .decoder
            .iter()
            .map(|(&rank, piece)| (rank, piece.as_slice()))
            .collect();
        entries.sort_unstable_by_key(|&(rank, _)| rank);
        entries.into_iter()
    }
}

/// Load a tiktoken BPE rank table from raw bytes.
///
/// Format: `base64_token rank\n` per line.
/// Example: `SGVsbG8= 0` (where "SGVsbG8=" decodes to "Hello")
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let mut encoder = FxHashMap::default();

    for (number, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos = line.iter().rposition(|&b| b == b' ').ok_or_else(|| {
            VocabError::ParseError(format!("line {}: missing space separator", number + 1))
        })?;

        let token = STANDARD.decode(&line[..space_pos])?;

        let rank_str = std::str::from_utf8(&line[space_pos + 1..]).map_err(|_| {
            VocabError::ParseError(format!("line {}: invalid UTF-8 in rank", number + 1))
        })?;
        let rank: Rank = rank_str.trim().parse().map_err(|_| {
            VocabError::ParseError(format!("line {}: invalid rank {rank_str:?}", number + 1))
        })?;

        if let Some(previous) = encoder.insert(token, rank) {
            if previous != rank {
                return Err(VocabError::InvalidVocabulary(format!(
                    "line {}: piece listed with ranks {previous} and {rank}",
                    number + 1
                )));
            }
        }
    }

    Ok(encoder)
}

/// Load a tiktoken BPE rank table from a file path.
pub fn load_tiktoken_bpe_file(
    path: impl AsRef<Path>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}

#[derive(Deserialize)]
struct TokenizerDescription {
    model: TokenizerModel,
}

#[derive(Deserialize)]
struct TokenizerModel {
    vocab: FxHashMap<String, Rank>,
}

/// Load the `model.vocab` table of a HuggingFace `tokenizer.json`.
///
/// Keys are GPT-2 byte-level strings and are re-keyed to the raw bytes they
/// stand for. Entries whose key is one of `special_tokens` are left out: they
/// are recognised by the special-token splitter, never by merging.
pub fn load_tokenizer_json(
    data: &[u8],
    special_tokens: &FxHashMap<String, Rank>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let description: TokenizerDescription = serde_json::from_slice(data)?;

    let mut encoder = FxHashMap::default();
    for (key, rank) in description.model.vocab {
        if special_tokens.contains_key(&key) {
            continue;
        }
        let piece = byte_level_decode(&key).ok_or_else(|| {
            VocabError::ParseError(format!("token {key:?} is not byte-level encoded"))
        })?;
        if let Some(previous) = encoder.insert(piece, rank) {
            return Err(VocabError::InvalidVocabulary(format!(
                "token {key:?} decodes to a piece already held by rank {previous}"
            )));
        }
    }

    Ok(encoder)
}

/// Load the `model.vocab` table of a HuggingFace `tokenizer.json` file.
pub fn load_tokenizer_json_file(
    path: impl AsRef<Path>,
    special_tokens: &FxHashMap<String, Rank>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let data = std::fs::read(path)?;
    load_tokenizer_json(&data, special_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_encoder(offset: Rank) -> FxHashMap<Vec<u8>, Rank> {
        (0..=255u8).map(|b| (vec![b], b as Rank + offset)).collect()
    }

    #[test]
    fn test_load_tiktoken_bpe() {
        // "Hello" base64 = "SGVsbG8="
        // "World" base64 = "V29ybGQ="
        let data = b"SGVsbG8= 0\nV29ybGQ= 1\r\n\n";
        let encoder = load_tiktoken_bpe(data).unwrap();

        assert_eq!(encoder.get(b"Hello".as_slice()), Some(&0));
        assert_eq!(encoder.get(b"World".as_slice()), Some(&1));
        assert_eq!(encoder.len(), 2);
    }

    #[test]
    fn test_load_tiktoken_bpe_rejects_garbage() {
        assert!(matches!(
            load_tiktoken_bpe(b"SGVsbG8=0\n"),
            Err(VocabError::ParseError(_))
        ));
        assert!(matches!(
            load_tiktoken_bpe(b"SGVsbG8= zero\n"),
            Err(VocabError::ParseError(_))
        ));
        assert!(matches!(
            load_tiktoken_bpe(b"!!!! 0\n"),
            Err(VocabError::Base64Error(_))
        ));
        assert!(matches!(
            load_tiktoken_bpe(b"SGVsbG8= 0\nSGVsbG8= 1\n"),
            Err(VocabError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_vocabulary_lookups() {
        let mut encoder = byte_encoder(0);
        encoder.insert(b"ab".to_vec(), 256);
        let vocab = Vocabulary::new(encoder).unwrap();

        assert_eq!(vocab.len(), 257);
        assert_eq!(vocab.base_rank(), 0);
        assert_eq!(vocab.max_rank(), 256);
        assert_eq!(vocab.rank(b"ab"), Some(256));
        assert_eq!(vocab.piece(256), Some(b"ab".as_slice()));
        assert_eq!(vocab.piece(257), None);
        assert_eq!(vocab.byte_rank(b'a'), b'a' as Rank);
        assert_eq!(vocab.iter().count(), 257);
    }

    #[test]
    fn test_vocabulary_with_offset_base() {
        let vocab = Vocabulary::new(byte_encoder(19)).unwrap();
        assert_eq!(vocab.base_rank(), 19);
        assert_eq!(vocab.piece(18), None);
        assert_eq!(vocab.piece(19), Some([0u8].as_slice()));
        assert_eq!(vocab.max_rank(), 274);
    }

    #[test]
    fn test_vocabulary_rejects_missing_byte() {
        let mut encoder = byte_encoder(0);
        encoder.remove([0x7fu8].as_slice());
        encoder.insert(b"ab".to_vec(), 0x7f);
        let err = Vocabulary::new(encoder).unwrap_err();
        assert!(matches!(err, VocabError::InvalidVocabulary(msg) if msg.contains("0x7f")));
    }

    #[test]
    fn test_vocabulary_rejects_shared_rank() {
        let mut encoder = byte_encoder(0);
        encoder.insert(b"ab".to_vec(), 3);
        let err = Vocabulary::new(encoder).unwrap_err();
        assert!(matches!(err, VocabError::InvalidVocabulary(msg) if msg.contains("rank 3")));
    }

    #[test]
    fn test_vocabulary_rejects_shared_rank_hiding_a_gap() {
        // 258 pieces over 258 slots, but 256 is unused and 3 is used twice.
        let mut encoder = byte_encoder(0);
        encoder.insert(b"ab".to_vec(), 3);
        encoder.insert(b"cd".to_vec(), 257);
        let err = Vocabulary::new(encoder).unwrap_err();
        assert!(matches!(err, VocabError::InvalidVocabulary(msg) if msg.contains("rank 3")));
    }

    #[test]
    fn test_vocabulary_allows_holes() {
        // p50k_base leaves 50256 to <|endoftext|>; here 256 plays that role.
        let mut encoder = byte_encoder(0);
        encoder.insert(b"ab".to_vec(), 257);
        encoder.insert(b"cd".to_vec(), 258);
        let vocab = Vocabulary::new(encoder).unwrap();
        assert_eq!(vocab.len(), 258);
        assert_eq!(vocab.max_rank(), 258);
        assert_eq!(vocab.unused_ranks(), 1);
        assert!(!vocab.contains_rank(256));
        assert_eq!(vocab.piece(257), Some(b"ab".as_slice()));
        let ranks: Vec<Rank> = vocab.iter().map(|(rank, _)| rank).skip(255).collect();
        assert_eq!(ranks, vec![255, 257, 258]);
    }

    #[test]
    fn test_vocabulary_rejects_empty() {
        assert!(matches!(
            Vocabulary::new(FxHashMap::default()),
            Err(VocabError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_from_pairs_rejects_conflicting_piece() {
        let pairs = (0..=255u8)
            .map(|b| (vec![b], b as Rank))
            .chain([(b"ab".to_vec(), 256), (b"ab".to_vec(), 257)]);
        assert!(matches!(
            Vocabulary::from_pairs(pairs),
            Err(VocabError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_load_tokenizer_json_rekeys_and_skips_specials() {
        let json = r#"{
            "version": "1.0",
            "model": {
                "type": "BPE",
                "vocab": { "<|endoftext|>": 0, "Ġ": 1, "a": 2, "Ġa": 3 },
                "merges": []
            }
        }"#;
        let mut special = FxHashMap::default();
        special.insert("<|endoftext|>".to_string(), 0);

        let encoder = load_tokenizer_json(json.as_bytes(), &special).unwrap();
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.get(b" ".as_slice()), Some(&1));
        assert_eq!(encoder.get(b" a".as_slice()), Some(&3));
        assert!(!encoder.contains_key(b"<|endoftext|>".as_slice()));
    }

    #[test]
    fn test_load_tokenizer_json_rejects_non_byte_level_key() {
        let json = r#"{ "model": { "vocab": { "中": 0 } } }"#;
        assert!(matches!(
            load_tokenizer_json(json.as_bytes(), &FxHashMap::default()),
            Err(VocabError::ParseError(_))
        ));
    }
}
