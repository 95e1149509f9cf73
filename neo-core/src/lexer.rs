//! Lexer for Neo source text.
//!
//! Lexing happens in two passes. [`tokenize`] turns the character
//! stream into a flat token list, and [`group`] folds bracket pairs into
//! [`TokenKind::Group`] nodes so that later stages can treat a
//! parenthesized, bracketed or braced region as a single token.

use tracing::trace;

use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::span::Span;

/// Bracket flavour of a [`TokenKind::Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Paren,   // ( )
    Bracket, // [ ]
    Brace,   // { }
}

impl Delimiter {
    fn from_open(ch: u8) -> Option<Delimiter> {
        match ch {
            b'(' => Some(Delimiter::Paren),
            b'[' => Some(Delimiter::Bracket),
            b'{' => Some(Delimiter::Brace),
            _ => None,
        }
    }

    fn from_close(ch: u8) -> Option<Delimiter> {
        match ch {
            b')' => Some(Delimiter::Paren),
            b']' => Some(Delimiter::Bracket),
            b'}' => Some(Delimiter::Brace),
            _ => None,
        }
    }

    pub fn open(&self) -> char {
        match self {
            Delimiter::Paren => '(',
            Delimiter::Bracket => '[',
            Delimiter::Brace => '{',
        }
    }
}

/// Kind of a token produced by the lexer.
///
/// Operators are classified without any notion of precedence; the
/// compiler decides what an operator means from its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    String,
    Identifier,
    Keyword,
    Operator,    // + - * / % ** & | ^ << >> ~ && || > < <= >= == != !
    SetOperator, // = += -= *= /= %= &= |= ^= := <<= >>= &&= ||= **=
    IncOperator, // ++ --
    Symbol,      // . , : \
    Range,       // ..
    /// Raw bracket; only present before [`group`] runs.
    Paren,
    Eol, // \n
    Eoe, // ;
    Group(Delimiter),
}

/// A token with its source span and cached text.
///
/// `value` mirrors the text under `span`, except for string literals
/// whose raw newlines are canonicalized to escape sequences. Group
/// tokens own their children; every other token is a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: String,
    pub children: Vec<Token>,
}

impl Token {
    fn leaf(kind: TokenKind, span: Span, value: impl Into<String>) -> Token {
        Token {
            kind,
            span,
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// Recompute `value` from the source after `span` changed.
    pub fn update_value(&mut self, source: &str) {
        self.value = self.span.text(source).to_string();
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.value == symbol
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value == keyword
    }

    pub fn is_separator(&self) -> bool {
        matches!(self.kind, TokenKind::Eol | TokenKind::Eoe)
    }

    pub fn delimiter(&self) -> Option<Delimiter> {
        match self.kind {
            TokenKind::Group(delimiter) => Some(delimiter),
            _ => None,
        }
    }

    pub fn is_group(&self, delimiter: Delimiter) -> bool {
        self.delimiter() == Some(delimiter)
    }

    /// Short human readable form used in error messages.
    pub fn describe(&self) -> &str {
        match self.kind {
            TokenKind::Eol => "newline",
            _ => self.value.as_str(),
        }
    }
}

const TRIPLE_SET_OPERATORS: &[&str] = &["<<=", ">>=", "&&=", "||=", "**="];
const DOUBLE_SET_OPERATORS: &[&str] = &["+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", ":="];
const INC_OPERATORS: &[&str] = &["++", "--"];
const DOUBLE_OPERATORS: &[&str] = &["**", "<<", ">>", "&&", "||", "<=", ">=", "==", "!="];
const SINGLE_OPERATORS: &[u8] = b"+-*/%&|^~><!";
const SYMBOLS: &[u8] = b".,:\\";

pub const KEYWORDS: &[&str] = &[
    "let", "const", "if", "else", "for", "loop", "while", "do", "return", "break", "continue",
    "fn", "class", "import", "in",
];

/// Run both lexer passes and return the grouped token tree.
pub fn lex(source: &str) -> Result<Vec<Token>, CoreError> {
    let tokens = tokenize(source)?;
    trace!(count = tokens.len(), "tokenized source");
    group(source, tokens)
}

/// Lex a source string into a flat token list.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    let mut lexer = Lexer {
        source,
        chars: source.as_bytes(),
        index: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'src> {
    source: &'src str,
    chars: &'src [u8],
    index: usize,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> Result<(), CoreError> {
        while let Some(ch) = self.peek_char() {
            let start = self.index;

            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }
            match ch {
                b'\n' => {
                    self.consume_char();
                    self.simple_token(TokenKind::Eol, start);
                    continue;
                }
                b';' => {
                    self.consume_char();
                    self.simple_token(TokenKind::Eoe, start);
                    continue;
                }
                b'/' if self.peek_next() == Some(b'/') => {
                    self.skip_line_comment();
                    continue;
                }
                b'/' if self.peek_next() == Some(b'*') => {
                    self.skip_block_comment();
                    continue;
                }
                b'0'..=b'9' => {
                    self.lex_number(start)?;
                    continue;
                }
                b'"' | b'\'' => {
                    self.lex_string(start)?;
                    continue;
                }
                b'(' | b')' | b'[' | b']' | b'{' | b'}' => {
                    self.consume_char();
                    self.simple_token(TokenKind::Paren, start);
                    continue;
                }
                _ => {}
            }

            if is_ident_start(ch) {
                self.lex_ident_or_keyword(start);
                continue;
            }
            if self.lex_operator(start) {
                continue;
            }
            return Err(self.unexpected_char(start));
        }
        Ok(())
    }

    fn simple_token(&mut self, kind: TokenKind, start: usize) {
        let span = Span::new(start as u32, self.index as u32);
        let value = &self.source[start..self.index];
        self.tokens.push(Token::leaf(kind, span, value));
    }

    fn unexpected_char(&self, start: usize) -> CoreError {
        let width = self.source[start..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        let span = Span::new(start as u32, (start + width) as u32);
        CoreError::LexError(
            Diagnostic::syntax("Unexpected character", span).with_code("E0001"),
        )
    }

    /// Maximal munch over the operator and symbol tables, longest
    /// candidates first.
    fn lex_operator(&mut self, start: usize) -> bool {
        let source = self.source;
        let rest = &source[start..];
        let tables: [(&[&str], TokenKind); 4] = [
            (TRIPLE_SET_OPERATORS, TokenKind::SetOperator),
            (DOUBLE_SET_OPERATORS, TokenKind::SetOperator),
            (INC_OPERATORS, TokenKind::IncOperator),
            (DOUBLE_OPERATORS, TokenKind::Operator),
        ];
        for (table, kind) in tables {
            if let Some(op) = table.iter().find(|op| rest.starts_with(**op)) {
                self.index += op.len();
                self.simple_token(kind, start);
                return true;
            }
        }
        if rest.starts_with("..") {
            self.index += 2;
            self.simple_token(TokenKind::Range, start);
            return true;
        }

        let Some(ch) = self.peek_char() else {
            return false;
        };
        let kind = if SINGLE_OPERATORS.contains(&ch) {
            TokenKind::Operator
        } else if ch == b'=' {
            TokenKind::SetOperator
        } else if SYMBOLS.contains(&ch) {
            TokenKind::Symbol
        } else {
            return false;
        };
        self.consume_char();
        self.simple_token(kind, start);
        true
    }

    fn skip_line_comment(&mut self) {
        // The newline itself still terminates the statement.
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn skip_block_comment(&mut self) {
        self.consume_char(); // '/'
        self.consume_char(); // '*'
        // An unterminated block comment swallows the rest of the input.
        while let Some(ch) = self.peek_char() {
            if ch == b'*' && self.peek_next() == Some(b'/') {
                self.consume_char();
                self.consume_char();
                return;
            }
            self.consume_char();
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<(), CoreError> {
        self.consume_digits();

        if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char(); // '.'
            self.consume_digits();
        }

        if self.peek_char() == Some(b'e') {
            self.consume_char();
            if matches!(self.peek_char(), Some(b'+' | b'-')) {
                self.consume_char();
            }
            if !self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                let span = Span::new(start as u32, self.index as u32);
                return Err(CoreError::LexError(
                    Diagnostic::syntax("Expected an integer after the 'e' in the number", span)
                        .with_code("E0003"),
                ));
            }
            self.consume_digits();
        }

        if self.peek_char() == Some(b'n') {
            self.consume_char();
        }

        if self.peek_char().is_some_and(is_ident_continue) {
            let mut end = self.index;
            while self.chars.get(end).copied().is_some_and(is_ident_continue) {
                end += 1;
            }
            let span = Span::new(start as u32, end as u32);
            return Err(CoreError::LexError(
                Diagnostic::syntax("Invalid suffix on numeric literal", span).with_code("E0003"),
            ));
        }

        self.simple_token(TokenKind::Number, start);
        Ok(())
    }

    fn lex_string(&mut self, start: usize) -> Result<(), CoreError> {
        let quote = self.chars[start];
        self.consume_char();

        let mut value = vec![quote];
        let mut escaped = false;
        while let Some(ch) = self.peek_char() {
            self.consume_char();
            match ch {
                b'\n' => value.extend_from_slice(b"\\n"),
                b'\r' => value.extend_from_slice(b"\\r"),
                _ => value.push(ch),
            }
            if ch == quote && !escaped {
                let span = Span::new(start as u32, self.index as u32);
                let value = String::from_utf8_lossy(&value).into_owned();
                self.tokens.push(Token::leaf(TokenKind::String, span, value));
                return Ok(());
            }
            escaped = ch == b'\\' && !escaped;
        }

        let span = Span::new(start as u32, start as u32 + 1);
        Err(CoreError::LexError(
            Diagnostic::syntax("Unterminated string", span).with_code("E0002"),
        ))
    }

    fn lex_ident_or_keyword(&mut self, start: usize) {
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.consume_char();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.index];
        let kind = if KEYWORDS.contains(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.simple_token(kind, start);
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
        }
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }
}

/// Fold bracket tokens into [`TokenKind::Group`] nodes.
///
/// Newlines inside `(...)` and `[...]` are dropped so argument lists and
/// array literals can span several lines; brace groups keep them since
/// block bodies are newline-terminated statement lists.
pub fn group(source: &str, tokens: Vec<Token>) -> Result<Vec<Token>, CoreError> {
    let mut root = Vec::new();
    let mut open: Vec<Token> = Vec::new();

    for token in tokens {
        if token.kind == TokenKind::Paren {
            let ch = token.value.as_bytes().first().copied().unwrap_or(b' ');
            if let Some(delimiter) = Delimiter::from_open(ch) {
                open.push(Token {
                    kind: TokenKind::Group(delimiter),
                    ..token
                });
                continue;
            }

            let matches_top = open
                .last()
                .is_some_and(|group| group.delimiter() == Delimiter::from_close(ch));
            if !matches_top {
                return Err(CoreError::ParseError(
                    Diagnostic::syntax(format!("Unexpected token '{}'", token.value), token.span)
                        .with_code("E0102"),
                ));
            }
            if let Some(mut closed) = open.pop() {
                closed.span = closed.span.join(token.span);
                closed.update_value(source);
                match open.last_mut() {
                    Some(parent) => parent.children.push(closed),
                    None => root.push(closed),
                }
            }
            continue;
        }

        match open.last_mut() {
            Some(parent) => {
                let inline = matches!(
                    parent.kind,
                    TokenKind::Group(Delimiter::Paren | Delimiter::Bracket)
                );
                if !(inline && token.kind == TokenKind::Eol) {
                    parent.children.push(token);
                }
            }
            None => root.push(token),
        }
    }

    if let Some(unclosed) = open.pop() {
        return Err(CoreError::ParseError(
            Diagnostic::syntax("Unterminated parenthesis", unclosed.span).with_code("E0102"),
        ));
    }

    Ok(root)
}

/// Split a token slice on every token matching `is_delimiter`.
///
/// A trailing empty piece is dropped so `[1, 2,]` yields two elements;
/// empty pieces elsewhere are kept for the caller to reject.
pub fn split_tokens<'t>(tokens: &'t [Token], is_delimiter: impl Fn(&Token) -> bool) -> Vec<&'t [Token]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        if is_delimiter(token) {
            pieces.push(&tokens[start..index]);
            start = index + 1;
        }
    }
    if start < tokens.len() {
        pieces.push(&tokens[start..]);
    }
    pieces
}

/// Trim leading and trailing separator tokens from a slice.
pub fn trim_separators(mut tokens: &[Token]) -> &[Token] {
    while let [first, rest @ ..] = tokens {
        if !first.is_separator() {
            break;
        }
        tokens = rest;
    }
    while let [rest @ .., last] = tokens {
        if !last.is_separator() {
            break;
        }
        tokens = rest;
    }
    tokens
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\r' | 0x0b)
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
