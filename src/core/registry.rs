//! Named encodings.
//!
//! An encoding is fixed by three things: a vocabulary, a pre-tokenizer pattern
//! and a special-token table. This module declares the built-in encodings and
//! a [`Registry`] that maps names to lazily built, shared [`Tokenizer`]s.
//!
//! The registry is an ordinary value: create one, register sources, and pass
//! it (or the tokenizers it hands out) to whoever needs them.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::with_config(RegistryConfig::new("/opt/vocabs"));
//! let tokenizer = registry.get("starcoder")?;
//! let tokens = tokenizer.encode("def main():", &AllowedSpecial::All);
//! ```

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use super::pretokenizer::{CL100K_BASE_PATTERN, R50K_BASE_PATTERN, STARCODER_PATTERN};
use super::tokenizer::{Tokenizer, TokenizerError};
use super::vocab::{
    load_tiktoken_bpe, load_tiktoken_bpe_file, load_tokenizer_json_file, Rank, Vocabulary,
};

pub const ENDOFTEXT: &str = "<|endoftext|>";

/// Built-in encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingName {
    /// StarCoder / SantaCoder code models
    Starcoder,
    /// OpenAI cl100k_base (GPT-4, GPT-3.5-turbo)
    Cl100kBase,
    /// OpenAI p50k_base (Codex, text-davinci-002/003)
    P50kBase,
    /// OpenAI r50k_base (GPT-2, GPT-3)
    R50kBase,
}

impl EncodingName {
    pub const ALL: [EncodingName; 4] = [
        EncodingName::Starcoder,
        EncodingName::Cl100kBase,
        EncodingName::P50kBase,
        EncodingName::R50kBase,
    ];

    /// Parse encoding name from string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "starcoder" => Some(Self::Starcoder),
            "cl100k_base" => Some(Self::Cl100kBase),
            "p50k_base" => Some(Self::P50kBase),
            "r50k_base" | "gpt2" => Some(Self::R50kBase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starcoder => "starcoder",
            Self::Cl100kBase => "cl100k_base",
            Self::P50kBase => "p50k_base",
            Self::R50kBase => "r50k_base",
        }
    }

    /// Get all supported encoding names.
    pub fn supported_names() -> &'static [&'static str] {
        &["starcoder", "cl100k_base", "p50k_base", "r50k_base", "gpt2"]
    }

    /// Vocabulary file for this encoding, relative to a vocabulary directory.
    pub fn default_vocab_file(&self) -> &'static str {
        match self {
            Self::Starcoder => "starcoder/tokenizer.json",
            Self::Cl100kBase => "cl100k_base.tiktoken",
            Self::P50kBase => "p50k_base.tiktoken",
            Self::R50kBase => "r50k_base.tiktoken",
        }
    }

    /// Pattern and special tokens of this encoding.
    pub fn definition(&self) -> EncodingDefinition {
        let (pattern, special_tokens) = match self {
            Self::Starcoder => (STARCODER_PATTERN, starcoder_special_tokens()),
            Self::Cl100kBase => (CL100K_BASE_PATTERN, cl100k_base_special_tokens()),
            Self::P50kBase | Self::R50kBase => (R50K_BASE_PATTERN, r50k_base_special_tokens()),
        };
        EncodingDefinition::new(self.as_str(), pattern, special_tokens).with_eos(ENDOFTEXT)
    }

    /// How a vocabulary stored under `vocab_dir` is read.
    pub fn vocab_source(&self, vocab_dir: &Path) -> VocabSource {
        let path = vocab_dir.join(self.default_vocab_file());
        match self {
            Self::Starcoder => VocabSource::TokenizerJsonFile(path),
            _ => VocabSource::TiktokenFile(path),
        }
    }
}

impl std::fmt::Display for EncodingName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Special tokens of starcoder. They occupy the bottom of the id space, so the
/// ordinary pieces start at rank 19.
pub fn starcoder_special_tokens() -> FxHashMap<String, Rank> {
    [
        ENDOFTEXT,
        "<fim_prefix>",
        "<fim_middle>",
        "<fim_suffix>",
        "<fim_pad>",
        "<filename>",
        "<gh_stars>",
        "<issue_start>",
        "<issue_comment>",
        "<issue_closed>",
        "<jupyter_start>",
        "<jupyter_text>",
        "<jupyter_code>",
        "<jupyter_output>",
        "<empty_output>",
        "<commit_before>",
        "<commit_msg>",
        "<commit_after>",
        "<reponame>",
    ]
    .into_iter()
    .enumerate()
    .map(|(id, literal)| (literal.to_string(), id as Rank))
    .collect()
}

pub fn cl100k_base_special_tokens() -> FxHashMap<String, Rank> {
    [
        (ENDOFTEXT, 100257),
        ("<|fim_prefix|>", 100258),
        ("<|fim_middle|>", 100259),
        ("<|fim_suffix|>", 100260),
        ("<|endofprompt|>", 100276),
    ]
    .into_iter()
    .map(|(literal, id)| (literal.to_string(), id))
    .collect()
}

/// Shared by r50k_base and p50k_base.
pub fn r50k_base_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert(ENDOFTEXT.to_string(), 50256);
    special
}

/// Pattern and special-token table of one encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingDefinition {
    pub name: String,
    pub pattern: String,
    pub special_tokens: FxHashMap<String, Rank>,
    /// Literal of the end-of-text token, if the encoding has one.
    pub eos_token: Option<String>,
}

impl EncodingDefinition {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            special_tokens,
            eos_token: None,
        }
    }

    pub fn with_eos(mut self, literal: impl Into<String>) -> Self {
        self.eos_token = Some(literal.into());
        self
    }

    /// ID of the end-of-text token.
    pub fn eos_id(&self) -> Option<Rank> {
        self.eos_token
            .as_ref()
            .and_then(|literal| self.special_tokens.get(literal).copied())
    }
}

/// Where an encoding's vocabulary comes from.
#[derive(Debug, Clone)]
pub enum VocabSource {
    /// An already validated vocabulary, shared as is.
    Vocabulary(Arc<Vocabulary>),
    /// A `piece -> rank` map.
    Ranks(FxHashMap<Vec<u8>, Rank>),
    /// Contents of a tiktoken rank file.
    TiktokenBytes(Cow<'static, [u8]>),
    /// Path to a tiktoken rank file.
    TiktokenFile(PathBuf),
    /// Path to a HuggingFace `tokenizer.json` with a byte-level `model.vocab`.
    TokenizerJsonFile(PathBuf),
}

impl VocabSource {
    fn load(
        &self,
        special_tokens: &FxHashMap<String, Rank>,
    ) -> Result<Arc<Vocabulary>, TokenizerError> {
        let encoder = match self {
            VocabSource::Vocabulary(vocab) => return Ok(Arc::clone(vocab)),
            VocabSource::Ranks(ranks) => ranks.clone(),
            VocabSource::TiktokenBytes(data) => load_tiktoken_bpe(data)?,
            VocabSource::TiktokenFile(path) => load_tiktoken_bpe_file(path)?,
            VocabSource::TokenizerJsonFile(path) => {
                load_tokenizer_json_file(path, special_tokens)?
            }
        };
        Ok(Arc::new(Vocabulary::new(encoder)?))
    }
}

/// Directory the built-in encodings are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub vocab_dir: PathBuf,
}

impl RegistryConfig {
    /// Environment variable naming the vocabulary directory.
    pub const ENV_VAR: &'static str = "TOKCODEC_VOCAB_DIR";

    pub fn new(vocab_dir: impl Into<PathBuf>) -> Self {
        Self {
            vocab_dir: vocab_dir.into(),
        }
    }

    /// Read the vocabulary directory from `TOKCODEC_VOCAB_DIR`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(Self::ENV_VAR)
            .filter(|dir| !dir.is_empty())
            .map(Self::new)
    }

    pub fn vocab_path(&self, name: EncodingName) -> PathBuf {
        self.vocab_dir.join(name.default_vocab_file())
    }
}

#[derive(Debug)]
struct Entry {
    definition: EncodingDefinition,
    source: VocabSource,
    loaded: OnceLock<Arc<Tokenizer>>,
}

/// Name to tokenizer map with lazy, build-once loading.
///
/// Registration needs `&mut self` and therefore happens before the registry
/// is shared. [`Registry::get`] only needs `&self`: the first successful call
/// for a name builds the tokenizer and every later call returns the same
/// `Arc`. A failed build is returned to the caller and retried next time.
#[derive(Debug, Default)]
pub struct Registry {
    entries: FxHashMap<String, Entry>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in encoding read from `config.vocab_dir`.
    pub fn with_config(config: RegistryConfig) -> Self {
        let mut registry = Self::new();
        for name in EncodingName::ALL {
            registry.register_builtin(name, name.vocab_source(&config.vocab_dir));
        }
        registry
    }

    /// [`Registry::with_config`] with the directory from `TOKCODEC_VOCAB_DIR`.
    pub fn from_env() -> Option<Self> {
        RegistryConfig::from_env().map(Self::with_config)
    }

    /// Add an encoding, replacing any earlier one with the same name.
    pub fn register(&mut self, definition: EncodingDefinition, source: VocabSource) {
        let name = definition.name.clone();
        let entry = Entry {
            definition,
            source,
            loaded: OnceLock::new(),
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            tracing::debug!(encoding = %name, "replaced registered encoding");
        }
    }

    /// Add a built-in encoding with its vocabulary from `source`.
    pub fn register_builtin(&mut self, name: EncodingName, source: VocabSource) {
        self.register(name.definition(), source);
        if name == EncodingName::R50kBase {
            if let Some(entry) = self.entries.get("r50k_base") {
                let alias = Entry {
                    definition: EncodingDefinition {
                        name: "gpt2".to_string(),
                        ..entry.definition.clone()
                    },
                    source: entry.source.clone(),
                    loaded: OnceLock::new(),
                };
                self.entries.insert("gpt2".to_string(), alias);
            }
        }
    }

    /// The tokenizer registered under `name`, built on first use.
    pub fn get(&self, name: &str) -> Result<Arc<Tokenizer>, TokenizerError> {
        let entry = self.entries.get(name).ok_or_else(|| {
            let mut known = self.names();
            known.sort_unstable();
            TokenizerError::UnknownEncoding(format!("{}. Registered: {}", name, known.join(", ")))
        })?;

        if let Some(tokenizer) = entry.loaded.get() {
            return Ok(Arc::clone(tokenizer));
        }

        let definition = &entry.definition;
        let vocab = entry.source.load(&definition.special_tokens)?;
        let tokenizer = Tokenizer::from_vocabulary(
            vocab,
            definition.special_tokens.clone(),
            &definition.pattern,
        )?
        .named(definition.name.clone());

        tracing::info!(
            encoding = %definition.name,
            vocab_size = tokenizer.vocab_size(),
            "loaded encoding"
        );

        Ok(Arc::clone(
            entry.loaded.get_or_init(|| Arc::new(tokenizer)),
        ))
    }

    /// Definition registered under `name`.
    pub fn definition(&self, name: &str) -> Option<&EncodingDefinition> {
        self.entries.get(name).map(|entry| &entry.definition)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether `name` has been built already.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.loaded.get().is_some())
    }
}
