//! Tokenizer for pipeline text.
//!
//! Splits a command line into words, pipes, and redirect operators using the
//! logos lexer generator. The grammar is deliberately flat: `|`, `<`, `>`
//! and `>>` are the only special unquoted characters, so globs, flags, and
//! path fragments (`f*`, `--long`, `a/b.c`, `{x}`) survive as single words.
//!
//! Quoting groups one token and marks it `quoted`; downstream that exempts
//! the word from glob expansion and from option detection. Partial mode
//! (`accept_partial = true`) tolerates an unterminated quote by emitting the
//! trailing fragment with `unterminated` set, for live-typing consumers.
//!
//! Every token carries its `[start, end)` character offsets in the original
//! text so a caret position can be mapped back onto a token.

use std::fmt;

use logos::Logos;

use crate::error::ParseError;

/// A token with its character span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: std::ops::Range<usize>,
}

impl<T> Spanned<T> {
    pub fn new(token: T, span: std::ops::Range<usize>) -> Self {
        Self { token, span }
    }
}

/// A single word with its quoting context preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub quoted: bool,
    /// Set in partial mode when the closing quote was missing.
    pub unterminated: bool,
}

impl Word {
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
            unterminated: false,
        }
    }

    pub fn quoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: true,
            unterminated: false,
        }
    }
}

/// Tokens produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    Pipe,
    RedirectIn,
    RedirectOut,
    RedirectAppend,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) if w.quoted => write!(f, "'{}'", w.text),
            Token::Word(w) => write!(f, "{}", w.text),
            Token::Pipe => write!(f, "|"),
            Token::RedirectIn => write!(f, "<"),
            Token::RedirectOut => write!(f, ">"),
            Token::RedirectAppend => write!(f, ">>"),
        }
    }
}

/// Literal strings used with `PipelineBuilder::create` become pre-quoted
/// words: never glob-expanded, never mistaken for options.
impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Word(Word::quoted(s))
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Word(Word::quoted(s))
    }
}

impl From<Word> for Token {
    fn from(w: Word) -> Self {
        Token::Word(w)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LexError {
    #[default]
    UnexpectedCharacter,
}

/// Raw token layer; [`tokenize`] folds these into [`Token`]s.
///
/// `>>` must come before `>` so the longer operator wins. The unterminated
/// quote forms carry lower priority so a properly closed string always
/// matches the complete pattern.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    #[token(">>")]
    Append,

    #[token(">")]
    Out,

    #[token("<")]
    In,

    #[token("|")]
    Pipe,

    /// Double-quoted word: escapes for `\"`, `\\`, `\n`, `\t` are processed,
    /// anything else keeps its backslash.
    #[regex(r#""([^"\\]|\\.)*""#, lex_double, priority = 3)]
    Double(String),

    /// Single-quoted word: literal content, no escape processing.
    #[regex(r"'[^']*'", lex_single, priority = 3)]
    Single(String),

    /// Double quote missing its terminator; runs to end of input.
    #[regex(r#""([^"\\]|\\.)*"#, lex_double_open, priority = 2)]
    DoubleOpen(String),

    /// Single quote missing its terminator; runs to end of input.
    #[regex(r"'[^']*", lex_single_open, priority = 2)]
    SingleOpen(String),

    /// Anything that is not whitespace, a quote, or an operator.
    #[regex(r#"[^ \t\r\n|<>'"]+"#, lex_bare)]
    Bare(String),
}

fn lex_double(lex: &mut logos::Lexer<RawToken>) -> String {
    let s = lex.slice();
    unescape_double(&s[1..s.len() - 1])
}

fn lex_single(lex: &mut logos::Lexer<RawToken>) -> String {
    let s = lex.slice();
    s[1..s.len() - 1].to_string()
}

fn lex_double_open(lex: &mut logos::Lexer<RawToken>) -> String {
    unescape_double(&lex.slice()[1..])
}

fn lex_single_open(lex: &mut logos::Lexer<RawToken>) -> String {
    lex.slice()[1..].to_string()
}

fn lex_bare(lex: &mut logos::Lexer<RawToken>) -> String {
    lex.slice().to_string()
}

fn unescape_double(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Tokenize pipeline text into spanned tokens.
///
/// With `accept_partial` set, an unterminated quote becomes the final token
/// with [`Word::unterminated`] set instead of failing; otherwise it is a
/// [`ParseError::UnterminatedQuote`]. Empty input yields an empty vector.
pub fn tokenize(source: &str, accept_partial: bool) -> Result<Vec<Spanned<Token>>, ParseError> {
    let to_chars = CharSpans::new(source);
    let mut tokens = Vec::new();

    for (result, span) in RawToken::lexer(source).spanned() {
        let span = to_chars.convert(span);
        let raw = result.map_err(|_| ParseError::UnexpectedCharacter(span.start))?;
        let token = match raw {
            RawToken::Pipe => Token::Pipe,
            RawToken::In => Token::RedirectIn,
            RawToken::Out => Token::RedirectOut,
            RawToken::Append => Token::RedirectAppend,
            RawToken::Bare(text) => Token::Word(Word::bare(text)),
            RawToken::Double(text) | RawToken::Single(text) => Token::Word(Word::quoted(text)),
            RawToken::DoubleOpen(text) | RawToken::SingleOpen(text) => {
                if !accept_partial {
                    return Err(ParseError::UnterminatedQuote(span.start));
                }
                Token::Word(Word {
                    text,
                    quoted: true,
                    unterminated: true,
                })
            }
        };
        tokens.push(Spanned::new(token, span));
    }

    Ok(tokens)
}

/// Byte-span to character-span conversion for caret-aware consumers.
struct CharSpans {
    /// `char_at[b]` = number of characters strictly before byte offset `b`.
    char_at: Vec<usize>,
}

impl CharSpans {
    fn new(source: &str) -> Self {
        let mut char_at = vec![0; source.len() + 1];
        let mut count = 0;
        for (byte, c) in source.char_indices() {
            char_at[byte] = count;
            count += 1;
            // Continuation bytes map to the character they sit inside.
            for b in byte + 1..(byte + c.len_utf8()) {
                char_at[b] = count;
            }
        }
        char_at[source.len()] = count;
        Self { char_at }
    }

    fn convert(&self, span: std::ops::Range<usize>) -> std::ops::Range<usize> {
        self.char_at[span.start]..self.char_at[span.end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[Spanned<Token>]) -> Vec<&Token> {
        tokens.iter().map(|t| &t.token).collect()
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(tokenize("", false).unwrap(), vec![]);
        assert_eq!(tokenize("   \t ", false).unwrap(), vec![]);
    }

    #[test]
    fn splits_on_whitespace_only() {
        let tokens = tokenize("ls -l /tmp/*.txt", false).unwrap();
        assert_eq!(
            words(&tokens),
            vec![
                &Token::Word(Word::bare("ls")),
                &Token::Word(Word::bare("-l")),
                &Token::Word(Word::bare("/tmp/*.txt")),
            ]
        );
    }

    #[test]
    fn quotes_group_one_token() {
        let tokens = tokenize("a 'b c' d", false).unwrap();
        assert_eq!(
            words(&tokens),
            vec![
                &Token::Word(Word::bare("a")),
                &Token::Word(Word::quoted("b c")),
                &Token::Word(Word::bare("d")),
            ]
        );
    }

    #[test]
    fn double_quote_escapes() {
        let tokens = tokenize(r#"echo "a \"b\" c\n""#, false).unwrap();
        assert_eq!(
            tokens[1].token,
            Token::Word(Word::quoted("a \"b\" c\n"))
        );
    }

    #[test]
    fn operators_split_without_spaces() {
        let tokens = tokenize("a|b>c", false).unwrap();
        assert_eq!(
            words(&tokens),
            vec![
                &Token::Word(Word::bare("a")),
                &Token::Pipe,
                &Token::Word(Word::bare("b")),
                &Token::RedirectOut,
                &Token::Word(Word::bare("c")),
            ]
        );
    }

    #[test]
    fn append_beats_out() {
        let tokens = tokenize("x >> log", false).unwrap();
        assert_eq!(tokens[1].token, Token::RedirectAppend);
    }

    #[test]
    fn spans_cover_source() {
        let src = "ab 'c d'";
        let tokens = tokenize(src, false).unwrap();
        assert_eq!(tokens[0].span, 0..2);
        assert_eq!(tokens[1].span, 3..8);
    }

    #[test]
    fn spans_are_character_offsets() {
        // 'é' is two bytes; spans still count characters.
        let tokens = tokenize("é b", false).unwrap();
        assert_eq!(tokens[0].span, 0..1);
        assert_eq!(tokens[1].span, 2..3);
    }

    #[test]
    fn unterminated_quote_fails_strict() {
        let err = tokenize("a 'bc", false).unwrap_err();
        assert_eq!(err, ParseError::UnterminatedQuote(2));
    }

    #[test]
    fn unterminated_quote_partial_mode() {
        let tokens = tokenize("a 'bc", true).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[1].token,
            Token::Word(Word {
                text: "bc".into(),
                quoted: true,
                unterminated: true,
            })
        );
    }

    #[test]
    fn double_dash_is_an_ordinary_word() {
        let tokens = tokenize("rm -- -f", false).unwrap();
        assert_eq!(
            words(&tokens),
            vec![
                &Token::Word(Word::bare("rm")),
                &Token::Word(Word::bare("--")),
                &Token::Word(Word::bare("-f")),
            ]
        );
    }
}
