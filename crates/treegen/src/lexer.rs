//! Hand-written lexer for the tree-description language.
//!
//! Produces identifiers, integer literals, string literals, doc comments
//! and single-character sigils, each tagged with a 1-based line/column and
//! a byte span for diagnostics. Plain `//` and `/* */` comments are
//! skipped; `/** */` comments become [`TokenKind::DocComment`] tokens that
//! the parser attaches to the following declaration.

use smol_str::SmolStr;

use crate::error::{Result, TreeGenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Int,
    Str,
    DocComment,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Comma,
    Semicolon,
    Colon,
    Equals,
    Star,
    Question,
    Pipe,
    Bang,
    Eof,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Ident => "identifier",
            TokenKind::Int => "integer literal",
            TokenKind::Str => "string literal",
            TokenKind::DocComment => "doc comment",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Lt => "`<`",
            TokenKind::Gt => "`>`",
            TokenKind::Comma => "`,`",
            TokenKind::Semicolon => "`;`",
            TokenKind::Colon => "`:`",
            TokenKind::Equals => "`=`",
            TokenKind::Star => "`*`",
            TokenKind::Question => "`?`",
            TokenKind::Pipe => "`|`",
            TokenKind::Bang => "`!`",
            TokenKind::Eof => "end of input",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Lexeme for identifiers and literals (string literals unescaped,
    /// doc comments cleaned), the raw character otherwise.
    pub text: SmolStr,
    pub line: usize,
    pub col: usize,
    pub offset: usize,
    pub len: usize,
}

struct Lexer<'s> {
    src: &'s str,
    pos: usize,
    line: usize,
    col: usize,
}

/// Tokenizes a whole source file, appending a single [`TokenKind::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        src,
        pos: 0,
        line: 1,
        col: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'s> Lexer<'s> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, lexeme: &str) -> TreeGenError {
        TreeGenError::parse(message, self.line, self.col, lexeme)
    }

    fn skip_trivia(&mut self) -> Result<Option<Token>> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let (line, col, offset) = (self.line, self.col, self.pos);
                    self.bump();
                    self.bump();
                    let doc = self.peek() == Some('*') && self.peek2() != Some('/');
                    if doc {
                        self.bump();
                    }
                    let body_start = self.pos;
                    let mut body_end;
                    loop {
                        body_end = self.pos;
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(TreeGenError::parse(
                                    "unterminated block comment",
                                    line,
                                    col,
                                    "/*",
                                ));
                            }
                        }
                    }
                    if doc {
                        let text = clean_doc(&self.src[body_start..body_end]);
                        return Ok(Some(Token {
                            kind: TokenKind::DocComment,
                            text: SmolStr::from(text),
                            line,
                            col,
                            offset,
                            len: self.pos - offset,
                        }));
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        if let Some(doc) = self.skip_trivia()? {
            return Ok(doc);
        }
        let (line, col, offset) = (self.line, self.col, self.pos);
        let token = |kind, text: &str, len| Token {
            kind,
            text: SmolStr::from(text),
            line,
            col,
            offset,
            len,
        };
        let Some(ch) = self.peek() else {
            return Ok(token(TokenKind::Eof, "", 0));
        };

        if ch.is_ascii_alphabetic() || ch == '_' {
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                self.bump();
            }
            let text = &self.src[offset..self.pos];
            return Ok(token(TokenKind::Ident, text, text.len()));
        }

        if ch.is_ascii_digit() {
            self.bump();
            if ch == '0' && matches!(self.peek(), Some('x') | Some('X')) {
                self.bump();
                while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                    self.bump();
                }
            } else {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
            let text = &self.src[offset..self.pos];
            return Ok(token(TokenKind::Int, text, text.len()));
        }

        if ch == '"' {
            self.bump();
            let mut value = String::new();
            loop {
                match self.bump() {
                    Some('"') => break,
                    Some('\\') => match self.bump() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => {
                            return Err(TreeGenError::parse(
                                format!("unknown escape sequence `\\{other}`"),
                                line,
                                col,
                                &self.src[offset..self.pos],
                            ));
                        }
                        None => {
                            return Err(TreeGenError::parse(
                                "unterminated string literal",
                                line,
                                col,
                                "\"",
                            ));
                        }
                    },
                    Some(other) => value.push(other),
                    None => {
                        return Err(TreeGenError::parse(
                            "unterminated string literal",
                            line,
                            col,
                            "\"",
                        ));
                    }
                }
            }
            return Ok(Token {
                kind: TokenKind::Str,
                text: SmolStr::from(value),
                line,
                col,
                offset,
                len: self.pos - offset,
            });
        }

        let kind = match ch {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '=' => TokenKind::Equals,
            '*' => TokenKind::Star,
            '?' => TokenKind::Question,
            '|' => TokenKind::Pipe,
            '!' => TokenKind::Bang,
            other => {
                return Err(self.error(
                    format!("unexpected character `{other}`"),
                    &other.to_string(),
                ));
            }
        };
        self.bump();
        Ok(token(kind, &self.src[offset..self.pos], self.pos - offset))
    }
}

/// Strips the decoration from a `/** */` body: leading `*` gutters and
/// shared indentation go, blank edges are trimmed.
fn clean_doc(body: &str) -> String {
    let mut lines: Vec<&str> = body
        .lines()
        .map(|line| {
            let line = line.trim_start();
            line.strip_prefix('*').map_or(line, |rest| {
                rest.strip_prefix(' ').unwrap_or(rest)
            })
        })
        .collect();
    while lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds("Add : Expr { lhs: One<Expr>; }"),
            vec![
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::LBrace,
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::Lt,
                TokenKind::Ident,
                TokenKind::Gt,
                TokenKind::Semicolon,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_docs() {
        let tokens = tokenize("// line\n/* block */ /** Doc text. */ x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::DocComment);
        assert_eq!(tokens[0].text, "Doc text.");
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].text, "x");
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""a\"b\n""#).unwrap();
        assert_eq!(tokens[0].text, "a\"b\n");
    }

    #[test]
    fn rejects_stray_characters() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err.position(), (1, 3));
    }

    #[test]
    fn hex_literals() {
        let tokens = tokenize("0x3456").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[0].text, "0x3456");
    }
}
