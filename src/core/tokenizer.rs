use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::bpe::{byte_pair_count, byte_pair_encode};
use super::pretokenizer::PreTokenizer;
use super::special::{AllowedSpecial, Segment, SpecialTokens};
use super::vocab::{load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, VocabError, Vocabulary};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Regex compilation error: {0}")]
    RegexError(#[from] fancy_regex::Error),
    #[cfg(feature = "pcre2")]
    #[error("Regex compilation error (PCRE2): {0}")]
    Pcre2Error(#[from] pcre2::Error),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Encountered text corresponding to disallowed special token {0:?}")]
    DisallowedSpecialToken(String),
    #[error("Unknown token id: {0}")]
    UnknownTokenId(Rank),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Byte-level BPE codec for one encoding.
///
/// A tokenizer combines a [`Vocabulary`], a pre-tokenizer pattern and a
/// special-token table. Encoding runs in three stages:
///
/// 1. special tokens allowed by the caller's [`AllowedSpecial`] policy are cut
///    out of the text and map directly to their reserved IDs
/// 2. the remaining plain text is split into chunks by the pattern
/// 3. each chunk is byte-pair merged against the vocabulary
///
/// Nothing is mutated by encoding or decoding, so one instance can be shared
/// across threads (the vocabulary itself is held in an [`Arc`]). The batch
/// methods use Rayon to parallelise across texts, never within one.
///
/// # Example
///
/// ```ignore
/// let tokenizer = Tokenizer::from_file("cl100k_base.tiktoken", CL100K_BASE_PATTERN, specials)?;
/// let tokens = tokenizer.encode("Hello<|endoftext|>", &AllowedSpecial::All);
/// assert_eq!(tokenizer.decode(&tokens)?, "Hello<|endoftext|>");
/// ```
#[derive(Clone)]
pub struct Tokenizer {
    name: Option<String>,
    vocab: Arc<Vocabulary>,
    special: SpecialTokens,
    pretokenizer: PreTokenizer,
}

impl Tokenizer {
    /// Create a new tokenizer from encoder map, special tokens, and regex pattern.
    ///
    /// # Arguments
    /// * `encoder` - Map of byte sequences to ranks
    /// * `special_tokens` - Map of special token strings to reserved IDs
    /// * `pattern` - Pre-tokenizer regex pattern
    pub fn new(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::from_vocabulary(Arc::new(Vocabulary::new(encoder)?), special_tokens, pattern)
    }

    /// Create a tokenizer over an already validated, possibly shared vocabulary.
    pub fn from_vocabulary(
        vocab: Arc<Vocabulary>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        if let Some((literal, id)) = special_tokens
            .iter()
            .find(|(_, &id)| vocab.contains_rank(id))
        {
            return Err(VocabError::InvalidVocabulary(format!(
                "special token {literal:?} reuses rank {id} of an ordinary piece"
            ))
            .into());
        }

        let special = SpecialTokens::new(special_tokens)?;

        // Ids between the smallest and largest piece rank that no piece holds
        // must belong to special tokens. Special ids outside that range are
        // unconstrained.
        let (base, max) = (vocab.base_rank(), vocab.max_rank());
        let held = special
            .decoder()
            .keys()
            .filter(|&&id| (base..=max).contains(&id))
            .count() as u64;
        if held != vocab.unused_ranks() {
            return Err(VocabError::InvalidVocabulary(format!(
                "ranks {base}..={max} have {} ids held by no piece or special token",
                vocab.unused_ranks() - held
            ))
            .into());
        }

        let pretokenizer = PreTokenizer::new(pattern)?;

        tracing::debug!(
            pieces = vocab.len(),
            special_tokens = special.len(),
            "built tokenizer"
        );

        Ok(Self {
            name: None,
            vocab,
            special,
            pretokenizer,
        })
    }

    /// Create a tokenizer from a tiktoken rank file.
    pub fn from_file(
        vocab_path: impl AsRef<Path>,
        pattern: &str,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Result<Self, TokenizerError> {
        let encoder = load_tiktoken_bpe_file(vocab_path)?;
        Self::new(encoder, special_tokens, pattern)
    }

    /// Create a tokenizer from the bytes of a tiktoken rank file.
    pub fn from_bytes(
        vocab_data: &[u8],
        pattern: &str,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Result<Self, TokenizerError> {
        let encoder = load_tiktoken_bpe(vocab_data)?;
        Self::new(encoder, special_tokens, pattern)
    }

    /// Attach an encoding name, reported by [`Tokenizer::name`].
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Switch to the PCRE2 regex backend, or back to the default one.
    ///
    /// # Errors
    /// Returns an error if regex compilation fails.
    #[cfg(feature = "pcre2")]
    pub fn pcre2(mut self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        let pattern = self.pretokenizer.pattern().to_string();
        self.pretokenizer = if use_pcre2 {
            PreTokenizer::new_pcre2(&pattern)?
        } else {
            PreTokenizer::new(&pattern)?
        };
        Ok(self)
    }

    /// Switch to PCRE2 regex backend (stub when feature not enabled).
    #[cfg(not(feature = "pcre2"))]
    pub fn pcre2(self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        if use_pcre2 {
            Err(TokenizerError::Pcre2NotEnabled)
        } else {
            Ok(self)
        }
    }

    fn encode_segment(&self, segment: Segment<'_>, tokens: &mut Vec<Rank>) {
        match segment {
            Segment::Text(text) => {
                for chunk in self.pretokenizer.chunks(text) {
                    tokens.extend(byte_pair_encode(chunk.as_bytes(), &self.vocab));
                }
            }
            Segment::Special { id, .. } => tokens.push(id),
        }
    }

    fn count_segment(&self, segment: Segment<'_>) -> usize {
        match segment {
            Segment::Text(text) => self
                .pretokenizer
                .chunks(text)
                .map(|chunk| byte_pair_count(chunk.as_bytes(), &self.vocab))
                .sum(),
            Segment::Special { .. } => 1,
        }
    }

    fn check_strict(
        &self,
        text: &str,
        allowed: &AllowedSpecial<'_>,
    ) -> Result<(), TokenizerError> {
        match self.special.find_disallowed(text, allowed) {
            Some(literal) => Err(TokenizerError::DisallowedSpecialToken(literal.to_string())),
            None => Ok(()),
        }
    }

    /// Encode text, recognising the special tokens `allowed` permits.
    ///
    /// Special-token text that is not allowed is encoded as ordinary text.
    pub fn encode(&self, text: &str, allowed: &AllowedSpecial<'_>) -> Vec<Rank> {
        let mut tokens = Vec::new();
        for segment in self.special.split(text, allowed) {
            self.encode_segment(segment, &mut tokens);
        }
        tokens
    }

    /// Like [`Tokenizer::encode`], but special-token text that is not allowed
    /// fails with [`TokenizerError::DisallowedSpecialToken`].
    ///
    /// The whole input is checked, including disallowed literals that overlap
    /// an allowed match. Only a disallowed literal lying entirely inside an
    /// allowed match (such as `<fim>` inside an allowed `<fim>_pad`) is
    /// accepted.
    pub fn encode_strict(
        &self,
        text: &str,
        allowed: &AllowedSpecial<'_>,
    ) -> Result<Vec<Rank>, TokenizerError> {
        self.check_strict(text, allowed)?;
        Ok(self.encode(text, allowed))
    }

    /// Encode text as plain content (ignores special tokens in input).
    pub fn encode_ordinary(&self, text: &str) -> Vec<Rank> {
        self.encode(text, &AllowedSpecial::None)
    }

    /// Encode text with every special token recognised.
    pub fn encode_with_special(&self, text: &str) -> Vec<Rank> {
        self.encode(text, &AllowedSpecial::All)
    }

    /// Number of tokens [`Tokenizer::encode`] would produce.
    pub fn count_tokens(&self, text: &str, allowed: &AllowedSpecial<'_>) -> usize {
        self.special
            .split(text, allowed)
            .map(|segment| self.count_segment(segment))
            .sum()
    }

    /// Number of tokens [`Tokenizer::encode_strict`] would produce.
    pub fn count_tokens_strict(
        &self,
        text: &str,
        allowed: &AllowedSpecial<'_>,
    ) -> Result<usize, TokenizerError> {
        self.check_strict(text, allowed)?;
        Ok(self.count_tokens(text, allowed))
    }

    /// Bytes of a single token.
    pub fn decode_single_token_bytes(&self, token: Rank) -> Result<&[u8], TokenizerError> {
        self.vocab
            .piece(token)
            .or_else(|| self.special.literal(token).map(str::as_bytes))
            .ok_or(TokenizerError::UnknownTokenId(token))
    }

    /// Decode token IDs back to bytes.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            result.extend_from_slice(self.decode_single_token_bytes(token)?);
        }
        Ok(result)
    }

    /// Decode token IDs to a string.
    pub fn decode(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode token IDs to a string, replacing invalid UTF-8 with U+FFFD.
    pub fn decode_lossy(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Rank of a byte sequence, if it is a single vocabulary piece.
    pub fn token_to_id(&self, piece: &[u8]) -> Option<Rank> {
        self.vocab.rank(piece)
    }

    /// Batch encode multiple texts in parallel (ignores special tokens).
    pub fn encode_batch<T: AsRef<str> + Sync>(&self, texts: &[T]) -> Vec<Vec<Rank>> {
        texts
            .par_iter()
            .map(|text| self.encode_ordinary(text.as_ref()))
            .collect()
    }

    /// Batch encode multiple texts with every special token recognised.
    pub fn encode_batch_with_special<T: AsRef<str> + Sync>(&self, texts: &[T]) -> Vec<Vec<Rank>> {
        texts
            .par_iter()
            .map(|text| self.encode_with_special(text.as_ref()))
            .collect()
    }

    /// Batch count tokens in parallel.
    pub fn count_tokens_batch<T: AsRef<str> + Sync>(
        &self,
        texts: &[T],
        allowed: &AllowedSpecial<'_>,
    ) -> Vec<usize> {
        texts
            .par_iter()
            .map(|text| self.count_tokens(text.as_ref(), allowed))
            .collect()
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<Rank>]) -> Result<Vec<String>, TokenizerError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Total number of token IDs: the highest piece or special ID plus one.
    pub fn vocab_size(&self) -> usize {
        let max_special = self.special.max_id().unwrap_or(0);
        self.vocab.max_rank().max(max_special) as usize + 1
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn pretokenizer(&self) -> &PreTokenizer {
        &self.pretokenizer
    }

    pub fn pattern(&self) -> &str {
        self.pretokenizer.pattern()
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("name", &self.name)
            .field("pieces", &self.vocab.len())
            .field("special_tokens", &self.special.len())
            .field("pretokenizer", &self.pretokenizer)
            .finish()
    }
}
