//! The byte-level lexer.
//!
//! UTF-8 agnostic: the scanner walks raw bytes and every position it
//! reports is a byte position. Whitespace and `//` comments are skipped,
//! a `#!` first line is treated as a shebang, and one token is produced
//! per [`Scanner::next_token`] call, left in [`Scanner::token`].
//!
//! String literals are decoded while scanning: escape sequences are
//! rendered into the token's text, an unterminated string or a raw line
//! feed inside one is a lexical error.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    DotDot,
    Dot,
    Comma,
    Colon,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    PipeEq,
    PipePipe,
    Pipe,
    CaretEq,
    Caret,
    AmpEq,
    AmpAmp,
    Amp,
    Arrow,
    EqEq,
    Eq,
    BangEq,
    Bang,
    GtGtEq,
    GtGt,
    GtEq,
    Gt,
    LtLtEq,
    LtLt,
    LtEq,
    Lt,
    PlusEq,
    PlusPlus,
    Plus,
    DashEq,
    DashDash,
    Dash,
    StarEq,
    Star,
    SlashEq,
    Slash,
    TildeSlashEq,
    TildeSlash,
    Tilde,
    PercentEq,
    Percent,
    Int,
    Float,
    String,
    Name,
    AsKw,
    BreakKw,
    ContinueKw,
    DelKw,
    DoKw,
    ElseKw,
    FalseKw,
    FnKw,
    ForKw,
    ForeachKw,
    FromKw,
    IfKw,
    IfBangKw,
    ImportKw,
    InKw,
    LetKw,
    LoopKw,
    MatchKw,
    MutKw,
    NilKw,
    ReturnKw,
    StructKw,
    TrueKw,
    UnderscoreKw,
    WhileKw,
    WhileBangKw,
}

/// One scanned token. `lexeme` holds the raw text for names and numbers
/// and the decoded value for string literals.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
    pub lexeme: String,
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("..", TokenKind::DotDot),
    (".", TokenKind::Dot),
    (",", TokenKind::Comma),
    (":", TokenKind::Colon),
    (";", TokenKind::Semicolon),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("|=", TokenKind::PipeEq),
    ("||", TokenKind::PipePipe),
    ("|", TokenKind::Pipe),
    ("^=", TokenKind::CaretEq),
    ("^", TokenKind::Caret),
    ("&=", TokenKind::AmpEq),
    ("&&", TokenKind::AmpAmp),
    ("&", TokenKind::Amp),
    ("=>", TokenKind::Arrow),
    ("==", TokenKind::EqEq),
    ("=", TokenKind::Eq),
    ("!=", TokenKind::BangEq),
    ("!", TokenKind::Bang),
    (">>=", TokenKind::GtGtEq),
    (">>", TokenKind::GtGt),
    (">=", TokenKind::GtEq),
    (">", TokenKind::Gt),
    ("<<=", TokenKind::LtLtEq),
    ("<<", TokenKind::LtLt),
    ("<=", TokenKind::LtEq),
    ("<", TokenKind::Lt),
    ("+=", TokenKind::PlusEq),
    ("++", TokenKind::PlusPlus),
    ("+", TokenKind::Plus),
    ("-=", TokenKind::DashEq),
    ("--", TokenKind::DashDash),
    ("-", TokenKind::Dash),
    ("*=", TokenKind::StarEq),
    ("*", TokenKind::Star),
    ("/=", TokenKind::SlashEq),
    ("/", TokenKind::Slash),
    ("~/=", TokenKind::TildeSlashEq),
    ("~/", TokenKind::TildeSlash),
    ("~", TokenKind::Tilde),
    ("%=", TokenKind::PercentEq),
    ("%", TokenKind::Percent),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("_", TokenKind::UnderscoreKw),
    ("as", TokenKind::AsKw),
    ("break", TokenKind::BreakKw),
    ("continue", TokenKind::ContinueKw),
    ("del", TokenKind::DelKw),
    ("do", TokenKind::DoKw),
    ("else", TokenKind::ElseKw),
    ("false", TokenKind::FalseKw),
    ("fn", TokenKind::FnKw),
    ("foreach", TokenKind::ForeachKw),
    ("for", TokenKind::ForKw),
    ("from", TokenKind::FromKw),
    ("if!", TokenKind::IfBangKw),
    ("if", TokenKind::IfKw),
    ("import", TokenKind::ImportKw),
    ("in", TokenKind::InKw),
    ("let", TokenKind::LetKw),
    ("loop", TokenKind::LoopKw),
    ("match", TokenKind::MatchKw),
    ("mut", TokenKind::MutKw),
    ("nil", TokenKind::NilKw),
    ("return", TokenKind::ReturnKw),
    ("struct", TokenKind::StructKw),
    ("true", TokenKind::TrueKw),
    ("while!", TokenKind::WhileBangKw),
    ("while", TokenKind::WhileKw),
];

#[derive(Debug)]
pub struct Scanner<'a> {
    file: String,
    source: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    pub token: Token,
}

impl<'a> Scanner<'a> {
    /// Create a scanner over `source`, skip an optional shebang line, and
    /// scan the first token.
    pub fn new(file: &str, source: &'a str) -> Result<Self> {
        let mut scanner = Self {
            file: file.to_string(),
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            token: Token {
                kind: TokenKind::Eof,
                line: 1,
                col: 1,
                lexeme: String::new(),
            },
        };
        scanner.skip_shebang();
        scanner.next_token()?;
        Ok(scanner)
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    fn char_at(&self, n: usize) -> u8 {
        self.source.get(self.pos + n).copied().unwrap_or(b'\0')
    }

    fn current_char(&self) -> u8 {
        self.char_at(0)
    }

    fn next_char(&mut self) {
        if self.current_char() == b'\n' {
            self.line += 1;
            self.col = 1;
            self.pos += 1;
            return;
        }
        self.col += 1;
        self.pos += 1;
    }

    fn next_chars(&mut self, n: usize) {
        for _ in 0..n {
            self.next_char();
        }
    }

    fn lexical_error(&self, message: impl Into<String>) -> Error {
        Error::Lexical {
            message: message.into(),
            file: self.file.clone(),
            line: self.line,
            col: self.col,
        }
    }

    fn skip_shebang(&mut self) {
        if self.char_at(0) != b'#' || self.char_at(1) != b'!' {
            return;
        }
        self.next_chars(2);
        while self.current_char() != b'\0' {
            if self.current_char() == b'\n' {
                self.next_char();
                break;
            }
            self.next_char();
        }
    }

    fn skip_spaces_comments(&mut self) {
        loop {
            while self.current_char().is_ascii_whitespace() {
                self.next_char();
            }
            if self.char_at(0) == b'/' && self.char_at(1) == b'/' {
                self.next_chars(2);
                while self.current_char() != b'\0' && self.current_char() != b'\n' {
                    self.next_char();
                }
                continue;
            }
            return;
        }
    }

    fn make_token(&mut self, kind: TokenKind, length: usize, lexeme: String) {
        self.token = Token {
            kind,
            line: self.line,
            col: self.col,
            lexeme,
        };
        self.next_chars(length);
    }

    fn match_operator(&mut self) -> bool {
        for (text, kind) in OPERATORS {
            if self.source[self.pos..].starts_with(text.as_bytes()) {
                self.make_token(*kind, text.len(), (*text).to_string());
                return true;
            }
        }
        false
    }

    fn match_keyword(&mut self) -> bool {
        for (text, kind) in KEYWORDS {
            let bytes = text.as_bytes();
            if self.source[self.pos..].starts_with(bytes) {
                let after = self.char_at(bytes.len());
                if after.is_ascii_alphanumeric() || after == b'_' {
                    continue;
                }
                self.make_token(*kind, bytes.len(), (*text).to_string());
                return true;
            }
        }
        false
    }

    fn match_number(&mut self) -> Result<bool> {
        let mut n = 0;
        if self.char_at(n) == b'0' {
            n += 1;
        } else {
            if !(b'1'..=b'9').contains(&self.char_at(n)) {
                return Ok(false);
            }
            n += 1;
            while self.char_at(n).is_ascii_digit() {
                n += 1;
            }
        }
        let mut kind = TokenKind::Int;
        let mut done = false;
        if self.char_at(n) == b'.' {
            if !self.char_at(n + 1).is_ascii_digit() {
                // Not a fraction: leave the dot for `..` or `.` tokens.
                done = true;
            } else {
                n += 2;
                while self.char_at(n).is_ascii_digit() {
                    n += 1;
                }
                kind = TokenKind::Float;
            }
        }
        if !done {
            if self.char_at(n) == b'e' || self.char_at(n) == b'E' {
                n += 1;
                if self.char_at(n) == b'+' || self.char_at(n) == b'-' {
                    n += 1;
                }
                if !self.char_at(n).is_ascii_digit() {
                    return Err(self.lexical_error("malformed exponent in number"));
                }
                n += 1;
                while self.char_at(n).is_ascii_digit() {
                    n += 1;
                }
            }
            if self.char_at(n).is_ascii_alphanumeric() || self.char_at(n) == b'_' {
                return Err(self.lexical_error("invalid character in number"));
            }
        }
        let lexeme = String::from_utf8_lossy(&self.source[self.pos..self.pos + n]).into_owned();
        self.make_token(kind, n, lexeme);
        Ok(true)
    }

    fn match_string(&mut self) -> Result<bool> {
        let delimiter = self.current_char();
        if delimiter != b'\'' && delimiter != b'"' {
            return Ok(false);
        }
        let mut literal = Vec::new();
        let mut n = 1;
        loop {
            let c = self.char_at(n);
            if c == delimiter {
                n += 1;
                break;
            }
            match c {
                b'\0' => return Err(self.lexical_error("unterminated string")),
                b'\n' => {
                    return Err(self.lexical_error("unexpected line break in string literal"));
                }
                b'\\' => {
                    let escape = self.char_at(n + 1);
                    literal.push(match escape {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'\\' => b'\\',
                        b'\'' => b'\'',
                        b'"' => b'"',
                        _ => return Err(self.lexical_error("invalid escape sequence")),
                    });
                    n += 2;
                }
                _ => {
                    literal.push(c);
                    n += 1;
                }
            }
        }
        let lexeme = String::from_utf8_lossy(&literal).into_owned();
        self.make_token(TokenKind::String, n, lexeme);
        Ok(true)
    }

    fn match_name(&mut self) -> bool {
        let c = self.current_char();
        if c != b'_' && !c.is_ascii_alphabetic() {
            return false;
        }
        let mut n = 1;
        while self.char_at(n) == b'_' || self.char_at(n).is_ascii_alphanumeric() {
            n += 1;
        }
        let lexeme = String::from_utf8_lossy(&self.source[self.pos..self.pos + n]).into_owned();
        self.make_token(TokenKind::Name, n, lexeme);
        true
    }

    /// Advance one token, leaving it in `self.token`.
    pub fn next_token(&mut self) -> Result<()> {
        self.skip_spaces_comments();
        if self.current_char() == b'\0' {
            self.token = Token {
                kind: TokenKind::Eof,
                line: self.line,
                col: self.col,
                lexeme: String::new(),
            };
            return Ok(());
        }
        if self.match_number()? {
            return Ok(());
        }
        if self.match_string()? {
            return Ok(());
        }
        if self.match_keyword() {
            return Ok(());
        }
        if self.match_name() {
            return Ok(());
        }
        if self.match_operator() {
            return Ok(());
        }
        Err(self.lexical_error("unexpected character"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<Token> {
        let mut scanner = Scanner::new("test.hk", source).unwrap();
        let mut tokens = Vec::new();
        while scanner.token.kind != TokenKind::Eof {
            tokens.push(scanner.token.clone());
            scanner.next_token().unwrap();
        }
        tokens
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan_all(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_operators_longest_first() {
        assert_eq!(
            kinds("<<= << <= < >>= >> >= > ~/= ~/ ~"),
            vec![
                TokenKind::LtLtEq,
                TokenKind::LtLt,
                TokenKind::LtEq,
                TokenKind::Lt,
                TokenKind::GtGtEq,
                TokenKind::GtGt,
                TokenKind::GtEq,
                TokenKind::Gt,
                TokenKind::TildeSlashEq,
                TokenKind::TildeSlash,
                TokenKind::Tilde,
            ]
        );
    }

    #[test]
    fn scans_keywords_and_names() {
        assert_eq!(
            kinds("if if! ifx while while! _ _x foreach for"),
            vec![
                TokenKind::IfKw,
                TokenKind::IfBangKw,
                TokenKind::Name,
                TokenKind::WhileKw,
                TokenKind::WhileBangKw,
                TokenKind::UnderscoreKw,
                TokenKind::Name,
                TokenKind::ForeachKw,
                TokenKind::ForKw,
            ]
        );
    }

    #[test]
    fn scans_numbers() {
        let tokens = scan_all("0 42 3.25 1e3 2.5e-1");
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[1].kind, TokenKind::Int);
        assert_eq!(tokens[1].lexeme, "42");
        assert_eq!(tokens[2].kind, TokenKind::Float);
        assert_eq!(tokens[3].kind, TokenKind::Int);
        assert_eq!(tokens[3].lexeme, "1e3");
        assert_eq!(tokens[4].kind, TokenKind::Float);
    }

    #[test]
    fn rejects_leading_zero_integers() {
        let mut scanner = Scanner::new("test.hk", "0").unwrap();
        assert_eq!(scanner.token.kind, TokenKind::Int);
        scanner.next_token().unwrap();
        assert!(Scanner::new("test.hk", "01").is_err());
        assert!(Scanner::new("test.hk", "1x").is_err());
    }

    #[test]
    fn integer_dot_dot_is_a_range() {
        assert_eq!(
            kinds("1..3"),
            vec![TokenKind::Int, TokenKind::DotDot, TokenKind::Int]
        );
    }

    #[test]
    fn decodes_escape_sequences() {
        let tokens = scan_all(r#""\tte\r\nst""#);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme.as_bytes(), b"\tte\r\nst");
    }

    #[test]
    fn single_quoted_strings() {
        let tokens = scan_all("'hi'");
        assert_eq!(tokens[0].lexeme, "hi");
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let err = Scanner::new("test.hk", "\"abc").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn raw_line_feed_in_string_is_fatal() {
        let err = Scanner::new("test.hk", "\"te\nst\"").unwrap_err();
        assert!(err.to_string().contains("line break"));
    }

    #[test]
    fn skips_shebang_and_comments() {
        let source = "#!/usr/bin/env hook\n// comment\nlet x = 1; // tail\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::LetKw,
                TokenKind::Name,
                TokenKind::Eq,
                TokenKind::Int,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn tracks_lines_and_columns() {
        let tokens = scan_all("let x\n  = 1;");
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (1, 5));
        assert_eq!((tokens[2].line, tokens[2].col), (2, 3));
        assert_eq!((tokens[3].line, tokens[3].col), (2, 5));
    }
}
