//! tokcodec - byte-level BPE tokenization codec.
//!
//! Converts text to the token IDs of a fixed, pre-trained vocabulary and back,
//! bit-exact with the tiktoken-style encodings it implements:
//! - Leftmost-longest special-token splitting with a per-call allow policy
//! - Unicode-aware regex pre-tokenization (fancy-regex, optional PCRE2)
//! - Rank-ordered byte-pair merging over a linked list, with a heap for long chunks
//! - Rayon parallelism for batch calls
//! - A registry of named encodings (`starcoder`, `cl100k_base`, `p50k_base`,
//!   `r50k_base`) loaded lazily from tiktoken or `tokenizer.json` files
//!
//! Decoding is the exact inverse of encoding: every byte sequence, valid UTF-8
//! or not, survives an encode/decode round trip.
//!
//! # Example
//!
//! ```ignore
//! use tokcodec::{AllowedSpecial, Registry, RegistryConfig};
//!
//! let registry = Registry::with_config(RegistryConfig::new("vocabs"));
//! let tokenizer = registry.get("cl100k_base")?;
//! let tokens = tokenizer.encode("hello world<|endoftext|>", &AllowedSpecial::All);
//! assert_eq!(tokenizer.decode(&tokens)?, "hello world<|endoftext|>");
//! ```

pub mod core;

pub use self::core::{
    AllowedSpecial, EncodingDefinition, EncodingName, Rank, Registry, RegistryConfig, Segment,
    SpecialTokens, Tokenizer, TokenizerError, VocabError, VocabSource, Vocabulary,
    CL100K_BASE_PATTERN, R50K_BASE_PATTERN, STARCODER_PATTERN,
};
