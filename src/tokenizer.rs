use std::ops::BitOr;

use crate::token::{Token, TokenKind};

/// Lexical and match errors raised while producing or consuming tokens.
#[derive(Debug, thiserror::Error)]
pub enum SyntaxError {
    #[error("expected {expected:?}, got {got:?} (at line {line}, column {column})")]
    UnexpectedCharacter {
        expected: Option<String>,
        got: Option<char>,
        line: u32,
        column: u32,
    },
    #[error("expected {expected}, got {got}")]
    UnexpectedToken { expected: TokenQuery, got: Token },
}

/// What `Tokenizer::eat` should match the current token against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenQuery {
    Kind(TokenKind),
    Lexeme(&'static str),
    /// Any of the literal kinds.
    Literal,
}

impl TokenQuery {
    pub fn matches(&self, token: &Token) -> bool {
        match self {
            TokenQuery::Kind(kind) => token.kind == *kind,
            TokenQuery::Lexeme(lexeme) => token.lexeme == *lexeme,
            TokenQuery::Literal => token.kind.is_literal(),
        }
    }
}

impl From<TokenKind> for TokenQuery {
    fn from(kind: TokenKind) -> Self {
        TokenQuery::Kind(kind)
    }
}

impl From<&'static str> for TokenQuery {
    fn from(lexeme: &'static str) -> Self {
        TokenQuery::Lexeme(lexeme)
    }
}

impl std::fmt::Display for TokenQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenQuery::Kind(kind) => write!(f, "{kind:?}"),
            TokenQuery::Lexeme(lexeme) => write!(f, "{lexeme:?}"),
            TokenQuery::Literal => f.write_str("a literal"),
        }
    }
}

/// Runtime-toggleable tokenizer behavior, packed as a bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenizerOptions(u8);

impl TokenizerOptions {
    pub const NONE: Self = Self(0);
    pub const EMIT_NEWLINE: Self = Self(1 << 0);
    pub const EMIT_WHITESPACE: Self = Self(1 << 1);
    pub const EMIT_COMMENTS: Self = Self(1 << 2);
    pub const INCLUDE_COMMENT_CHARACTER: Self = Self(1 << 3);
    pub const INCLUDE_COMMENT_EOL: Self = Self(1 << 4);
    pub const SKIP_SPACES_BEFORE_EATING: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | other.0)
        } else {
            Self(self.0 & !other.0)
        }
    }
}

impl BitOr for TokenizerOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

const IDENTIFIER_EXTRA_CHARS: [char; 5] = ['_', '$', '#', '%', '!'];

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || IDENTIFIER_EXTRA_CHARS.contains(&c)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || IDENTIFIER_EXTRA_CHARS.contains(&c)
}

fn escaped(c: char) -> Option<char> {
    match c {
        'r' => Some('\r'),
        't' => Some('\t'),
        'n' => Some('\n'),
        '\\' => Some('\\'),
        '\'' => Some('\''),
        _ => None,
    }
}

/// A stateful producer of tokens over one source string.
///
/// `advance` moves the cursor and replaces the current token; once the
/// end of input is reached it keeps returning the EoF sentinel.
pub struct Tokenizer {
    source: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
    options: TokenizerOptions,
    current: Token,
}

impl Tokenizer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            options: TokenizerOptions::NONE,
            current: Token::new(1, 1, TokenKind::Eof, "<EOF>"),
        }
    }

    /// The last token produced by `advance`. Before the first `advance`
    /// this is an EoF placeholder.
    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn has_tokens(&self) -> bool {
        self.current.kind != TokenKind::Eof
    }

    pub fn options(&self) -> TokenizerOptions {
        self.options
    }

    pub fn set_options(&mut self, options: TokenizerOptions) {
        self.options = options;
    }

    /// Run `f` with the given options forced on or off, restoring the
    /// previous option set on every exit path.
    pub fn with_options<R>(
        &mut self,
        options: TokenizerOptions,
        enabled: bool,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = self.options;
        self.options = self.options.with(options, enabled);
        let result = f(self);
        self.options = saved;
        result
    }

    fn emits(&self, option: TokenizerOptions) -> bool {
        self.options.contains(option)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.index + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn unexpected(&self, expected: Option<&str>) -> SyntaxError {
        SyntaxError::UnexpectedCharacter {
            expected: expected.map(str::to_owned),
            got: self.peek(),
            line: self.line,
            column: self.column,
        }
    }

    fn token(&mut self, line: u32, column: u32, kind: TokenKind, lexeme: String) -> Token {
        self.current = Token::new(line, column, kind, lexeme);
        self.current.clone()
    }

    /// Produce the next token, honoring the current option set.
    pub fn advance(&mut self) -> Result<Token, SyntaxError> {
        loop {
            let line = self.line;
            let column = self.column;
            let Some(c) = self.peek() else {
                return Ok(self.token(line, column, TokenKind::Eof, "<EOF>".into()));
            };

            match c {
                '\n' => {
                    self.bump();
                    if self.emits(TokenizerOptions::EMIT_NEWLINE) {
                        return Ok(self.token(line, column, TokenKind::NewLine, "\n".into()));
                    }
                }
                ' ' | '\t' => {
                    self.bump();
                    if self.emits(TokenizerOptions::EMIT_WHITESPACE) {
                        return Ok(self.token(
                            line,
                            column,
                            TokenKind::WhiteSpace,
                            c.to_string(),
                        ));
                    }
                }
                ';' if self.peek_next() == Some(';') => {
                    let comment = self.comment_lexeme();
                    if self.emits(TokenizerOptions::EMIT_COMMENTS) {
                        return Ok(self.token(line, column, TokenKind::Comment, comment));
                    }
                }
                ';' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::SemiColon, ";".into()));
                }
                '(' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::LeftParen, "(".into()));
                }
                ')' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::RightParen, ")".into()));
                }
                '{' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::LeftBrace, "{".into()));
                }
                '}' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::RightBrace, "}".into()));
                }
                ',' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::Comma, ",".into()));
                }
                ':' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::Colon, ":".into()));
                }
                '*' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::Asterisk, "*".into()));
                }
                '=' => {
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::Equal, "=".into()));
                }
                '.' => {
                    if self.peek_next().is_some_and(|n| n.is_ascii_digit()) {
                        let number = self.number_lexeme()?;
                        return Ok(self.token(line, column, TokenKind::FloatLit, number));
                    }
                    self.bump();
                    return Ok(self.token(line, column, TokenKind::Dot, ".".into()));
                }
                '\'' => {
                    let lexeme = self.char_lexeme()?;
                    return Ok(self.token(line, column, TokenKind::CharLit, lexeme));
                }
                '"' => {
                    let lexeme = self.string_lexeme()?;
                    return Ok(self.token(line, column, TokenKind::StringLit, lexeme));
                }
                '\\' => {
                    self.bump();
                    if self.peek() != Some('x') {
                        return Err(self.unexpected(Some("x")));
                    }
                    self.bump();
                    let lexeme = self.hex_lexeme()?;
                    return Ok(self.token(line, column, TokenKind::HexLit, lexeme));
                }
                c if c.is_ascii_digit() || c == '-' => {
                    let number = self.number_lexeme()?;
                    let kind = if number.contains('.') {
                        TokenKind::FloatLit
                    } else {
                        TokenKind::IntLit
                    };
                    return Ok(self.token(line, column, kind, number));
                }
                c if is_identifier_start(c) => {
                    let lexeme = self.identifier_lexeme();
                    let kind = match lexeme.as_str() {
                        "true" | "false" => TokenKind::BoolLit,
                        "null" => TokenKind::NullLit,
                        _ => TokenKind::Identifier,
                    };
                    return Ok(self.token(line, column, kind, lexeme));
                }
                _ => return Err(self.unexpected(None)),
            }
        }
    }

    /// Consume the current token if it matches, producing the next one.
    /// Returns the matched token.
    pub fn eat(&mut self, query: impl Into<TokenQuery>) -> Result<Token, SyntaxError> {
        let query = query.into();
        if self.emits(TokenizerOptions::SKIP_SPACES_BEFORE_EATING) {
            while self.current.kind == TokenKind::WhiteSpace {
                self.advance()?;
            }
        }
        if !query.matches(&self.current) {
            return Err(SyntaxError::UnexpectedToken {
                expected: query,
                got: self.current.clone(),
            });
        }
        let eaten = self.current.clone();
        self.advance()?;
        Ok(eaten)
    }

    /// A comment runs from `;;` up to, but never past, the end of the
    /// line. The leader and the newline join the lexeme only on request.
    fn comment_lexeme(&mut self) -> String {
        let mut buffer = String::new();
        if self.emits(TokenizerOptions::INCLUDE_COMMENT_CHARACTER) {
            buffer.push(';');
            buffer.push(';');
        }
        self.bump();
        self.bump();
        while let Some(c) = self.peek() {
            if c == '\n' {
                if self.emits(TokenizerOptions::INCLUDE_COMMENT_EOL) {
                    self.bump();
                    buffer.push('\n');
                }
                break;
            }
            self.bump();
            buffer.push(c);
        }
        buffer
    }

    fn identifier_lexeme(&mut self) -> String {
        let mut buffer = String::new();
        while let Some(c) = self.peek() {
            if !is_identifier_char(c) {
                break;
            }
            self.bump();
            buffer.push(c);
        }
        buffer
    }

    fn digits(&mut self, buffer: &mut String) {
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.bump();
            buffer.push(c);
        }
    }

    fn number_lexeme(&mut self) -> Result<String, SyntaxError> {
        let mut buffer = String::new();
        if self.peek() == Some('-') {
            self.bump();
            buffer.push('-');
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.unexpected(Some("a digit")));
            }
        }
        self.digits(&mut buffer);
        if buffer.is_empty() && self.peek() != Some('.') {
            return Err(self.unexpected(Some("a digit")));
        }
        if self.peek() == Some('.') {
            self.bump();
            buffer.push('.');
            self.digits(&mut buffer);
        }
        Ok(buffer)
    }

    fn char_lexeme(&mut self) -> Result<String, SyntaxError> {
        self.bump();
        let Some(mut c) = self.bump() else {
            return Err(self.unexpected(Some("'")));
        };
        if c == '\\' {
            if let Some(e) = self.peek().and_then(escaped) {
                self.bump();
                c = e;
            }
        }
        if self.peek() != Some('\'') {
            return Err(self.unexpected(Some("'")));
        }
        self.bump();
        Ok(c.to_string())
    }

    fn string_lexeme(&mut self) -> Result<String, SyntaxError> {
        self.bump();
        let mut buffer = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.unexpected(Some("\"")));
            };
            match c {
                '"' => {
                    self.bump();
                    return Ok(buffer);
                }
                '\\' => {
                    self.bump();
                    match self.peek().and_then(escaped) {
                        Some(e) => {
                            self.bump();
                            buffer.push(e);
                        }
                        None => buffer.push('\\'),
                    }
                }
                _ => {
                    self.bump();
                    buffer.push(c);
                }
            }
        }
    }

    fn hex_lexeme(&mut self) -> Result<String, SyntaxError> {
        let mut buffer = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_hexdigit() {
                break;
            }
            self.bump();
            buffer.push(c);
        }
        if buffer.is_empty() {
            return Err(self.unexpected(Some("a hex digit")));
        }
        Ok(buffer)
    }
}
