//! Regex pre-tokenization.
//!
//! Plain text is cut into chunks by a fixed, encoding-specific pattern before
//! any merging happens; merges never cross a chunk boundary. The patterns are
//! part of each encoding's definition and must be used verbatim.

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

use super::tokenizer::TokenizerError;

/// Pattern for cl100k_base (GPT-4, GPT-3.5-turbo). starcoder uses it too.
///
/// In priority order: contraction suffixes; an optional non-letter/non-digit
/// followed by letters; 1-3 digits; an optional space, a punctuation run and
/// trailing line breaks; whitespace ending in line breaks; whitespace not
/// followed by non-whitespace; any whitespace.
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Pattern for starcoder.
pub const STARCODER_PATTERN: &str = CL100K_BASE_PATTERN;

/// Pattern for r50k_base and p50k_base (GPT-2, GPT-3).
pub const R50K_BASE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

#[derive(Clone)]
enum RegexBackend {
    Fancy(Box<fancy_regex::Regex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

/// Compiled chunking pattern.
#[derive(Clone)]
pub struct PreTokenizer {
    pattern: String,
    regex: RegexBackend,
}

impl PreTokenizer {
    /// Compile `pattern` with the default (`fancy-regex`) backend.
    ///
    /// No backtrack limit: `\s*[\r\n]+` and `\s+(?!\S)` backtrack once per
    /// character of a whitespace run, however long.
    pub fn new(pattern: &str) -> Result<Self, TokenizerError> {
        let regex = fancy_regex::RegexBuilder::new(pattern)
            .backtrack_limit(usize::MAX)
            .build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex: RegexBackend::Fancy(Box::new(regex)),
        })
    }

    /// Compile `pattern` with PCRE2 (JIT when available, Unicode properties on).
    #[cfg(feature = "pcre2")]
    pub fn new_pcre2(pattern: &str) -> Result<Self, TokenizerError> {
        let mut regex_builder = pcre2::bytes::RegexBuilder::new();
        regex_builder.jit_if_available(true);
        regex_builder.utf(true);
        regex_builder.ucp(true);
        let regex = regex_builder.build(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex: RegexBackend::Pcre2(regex),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_pcre2(&self) -> bool {
        match self.regex {
            RegexBackend::Fancy(_) => false,
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(_) => true,
        }
    }

    /// Lazily cut `text` into chunks.
    ///
    /// The chunks are non-overlapping, in order, and concatenate back to
    /// `text`. Call again to restart.
    pub fn chunks<'r, 't>(&'r self, text: &'t str) -> Chunks<'r, 't> {
        let matches = match &self.regex {
            RegexBackend::Fancy(regex) => MatchIter::Fancy(regex.find_iter(text)),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => MatchIter::Pcre2(regex.find_iter(text.as_bytes())),
        };
        Chunks {
            text,
            pos: 0,
            pending: None,
            matches,
        }
    }
}

impl std::fmt::Debug for PreTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreTokenizer")
            .field("pattern", &self.pattern)
            .field("pcre2", &self.is_pcre2())
            .finish()
    }
}

enum MatchIter<'r, 't> {
    Fancy(fancy_regex::Matches<'r, 't>),
    #[cfg(feature = "pcre2")]
    Pcre2(pcre2::bytes::Matches<'r, 't>),
    Done,
}

impl MatchIter<'_, '_> {
    /// Next non-empty match as a byte range.
    fn next_range(&mut self) -> Option<(usize, usize)> {
        loop {
            let found = match self {
                MatchIter::Fancy(matches) => match matches.next()? {
                    Ok(m) => (m.start(), m.end()),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "pre-tokenizer regex failed, keeping the rest as one chunk"
                        );
                        *self = MatchIter::Done;
                        return None;
                    }
                },
                #[cfg(feature = "pcre2")]
                MatchIter::Pcre2(matches) => match matches.next()? {
                    Ok(m) => (m.start(), m.end()),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "pre-tokenizer regex failed, keeping the rest as one chunk"
                        );
                        *self = MatchIter::Done;
                        return None;
                    }
                },
                MatchIter::Done => return None,
            };
            if found.1 > found.0 {
                return Some(found);
            }
        }
    }
}

/// Iterator over the chunks of one text segment.
pub struct Chunks<'r, 't> {
    text: &'t str,
    pos: usize,
    /// A match found after a gap, emitted after the gap itself.
    pending: Option<(usize, usize)>,
    matches: MatchIter<'r, 't>,
}

impl<'t> Iterator for Chunks<'_, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        if let Some((start, end)) = self.pending.take() {
            self.pos = end;
            return Some(&self.text[start..end]);
        }
        if self.pos >= self.text.len() {
            return None;
        }
        match self.matches.next_range() {
            Some((start, end)) if start > self.pos => {
                let gap = &self.text[self.pos..start];
                self.pos = start;
                self.pending = Some((start, end));
                Some(gap)
            }
            Some((start, end)) => {
                self.pos = end;
                Some(&self.text[start..end])
            }
            None => {
                let rest = &self.text[self.pos..];
                self.pos = self.text.len();
                Some(rest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(pattern: &str, text: &str) -> Vec<String> {
        PreTokenizer::new(pattern)
            .unwrap()
            .chunks(text)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_cl100k_chunks() {
        let cases: &[(&str, &[&str])] = &[
            ("a b", &["a", " b"]),
            ("Hello world", &["Hello", " world"]),
            ("I'm here", &["I", "'m", " here"]),
            ("They'LL go", &["They", "'LL", " go"]),
            ("12345", &["123", "45"]),
            ("foo  bar", &["foo", " ", " bar"]),
            ("x = 1;\n\n  y", &["x", " =", " ", "1", ";\n\n", " ", " y"]),
            ("line\r\n\r\nnext", &["line", "\r\n\r\n", "next"]),
            ("a\tb  \n", &["a", "\tb", "  \n"]),
            ("héllo wörld 你好", &["héllo", " wörld", " 你好"]),
            ("   ", &["   "]),
        ];
        for (text, expected) in cases {
            assert_eq!(&split(CL100K_BASE_PATTERN, text), expected, "text {text:?}");
        }
    }

    #[test]
    fn test_r50k_chunks() {
        let cases: &[(&str, &[&str])] = &[
            ("They'LL go", &["They", "'", "LL", " go"]),
            ("12345", &["12345"]),
            ("x = 1;\n\n  y", &["x", " =", " 1", ";", "\n\n ", " y"]),
            ("a\tb  \n", &["a", "\t", "b", "  \n"]),
        ];
        for (text, expected) in cases {
            assert_eq!(&split(R50K_BASE_PATTERN, text), expected, "text {text:?}");
        }
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(split(CL100K_BASE_PATTERN, "").is_empty());
    }

    #[test]
    fn test_chunks_cover_input() {
        let texts = [
            "fn main() {\n    println!(\"hi\");\n}\n",
            "  \t\n\r\n  ",
            "Ünïcödé – “quotes” and emoji 🦀🦀 mixed with العربية and 日本語",
            "\u{301}\u{301}combining marks first",
            "trailing space ",
        ];
        for text in texts {
            assert_eq!(split(CL100K_BASE_PATTERN, text).concat(), text);
            assert_eq!(split(R50K_BASE_PATTERN, text).concat(), text);
        }
    }

    #[test]
    fn test_gaps_become_chunks() {
        // Only digits match; everything in between is still emitted.
        assert_eq!(split(r"\d+", "ab12cd3e"), vec!["ab", "12", "cd", "3", "e"]);
    }

    #[test]
    fn test_long_whitespace_run() {
        let pretokenizer = PreTokenizer::new(CL100K_BASE_PATTERN).unwrap();
        let n = 2_000_000;
        let text = format!("{}a", " ".repeat(n));
        let lens: Vec<usize> = pretokenizer.chunks(&text).map(str::len).collect();
        assert_eq!(lens, vec![n - 1, 2]);

        let text = format!("x{}\ny", " ".repeat(n));
        let lens: Vec<usize> = pretokenizer.chunks(&text).map(str::len).collect();
        assert_eq!(lens, vec![1, n + 1, 1]);
    }

    #[test]
    fn test_chunks_restart() {
        let pretokenizer = PreTokenizer::new(CL100K_BASE_PATTERN).unwrap();
        let first: Vec<&str> = pretokenizer.chunks("one two").collect();
        let second: Vec<&str> = pretokenizer.chunks("one two").collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            PreTokenizer::new("(unclosed"),
            Err(TokenizerError::RegexError(_))
        ));
    }
}
