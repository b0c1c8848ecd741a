//! Core tokenization engine for tokcodec.
//!
//! Encoding a text runs three stages, each in its own module:
//!
//! - [`special`]: cut out the special-token literals the caller allows,
//!   using Aho-Corasick automata built once per table
//! - [`pretokenizer`]: split the remaining text into chunks with the
//!   encoding's regex pattern
//! - [`bpe`]: merge each chunk's bytes by vocabulary rank, over a
//!   flat-array linked list
//!
//! [`Tokenizer`] ties them together around one [`Vocabulary`]. The
//! [`registry`] declares the built-in encodings and loads them on demand.

pub mod bpe;
pub mod byte_level;
pub mod pretokenizer;
pub mod registry;
pub mod special;
mod tokenizer;
pub mod vocab;

pub use bpe::{byte_pair_count, byte_pair_encode, byte_pair_split};
pub use byte_level::{byte_level_decode, byte_level_encode};
pub use pretokenizer::{
    Chunks, PreTokenizer, CL100K_BASE_PATTERN, R50K_BASE_PATTERN, STARCODER_PATTERN,
};
pub use registry::{
    EncodingDefinition, EncodingName, Registry, RegistryConfig, VocabSource, ENDOFTEXT,
};
pub use special::{AllowedSpecial, Segment, Segments, SpecialTokens};
pub use tokenizer::{Tokenizer, TokenizerError};
pub use vocab::{
    load_tiktoken_bpe, load_tiktoken_bpe_file, load_tokenizer_json, load_tokenizer_json_file,
    Rank, VocabError, Vocabulary,
};
