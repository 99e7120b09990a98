//! Recursive-descent parser for the tree-description language.
//!
//! Grammar, informally:
//!
//! ```text
//! file        := (directive | enum-decl | node-decl)*
//! directive   := "namespace" path ";"
//!              | "location" path ";"
//!              | "serializable" ";"
//!              | "include" STR ";"
//!              | "src_include" STR ";"
//!              | "prim" IDENT "{" (IDENT ":" STR ";")* "}"
//! enum-decl   := DOC? "enum" IDENT "{" IDENT ("," IDENT)* ","? "}"
//! node-decl   := DOC? ("root" | "error")* IDENT (":" IDENT)? "{" field* "}"
//! field       := DOC? IDENT ":" type "!"? ("=" default)? ";"
//! type        := ("Maybe"|"One"|"Any"|"Many"|"Link") "<" IDENT ">"
//!              | IDENT "?" | IDENT "*" | IDENT
//! ```
//!
//! Header directives may appear anywhere but conventionally lead the file.
//! All keywords are contextual; `root` or `error` can still name a node
//! type as long as the declaration is unambiguous.

use smol_str::SmolStr;

use crate::ast::{
    DefaultValue, EnumConstant, EnumDecl, FieldDecl, NodeDecl, PrimDecl, SourceFile, Span,
    TypeExpr,
};
use crate::error::{Result, TreeGenError};
use crate::lexer::{Token, TokenKind, tokenize};

/// Parses a whole `.tree` source into its raw AST. Errors carry the
/// source text for rendering.
pub fn parse(src: &str) -> Result<SourceFile> {
    let tokens = tokenize(src).map_err(|err| attach(err, src))?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_file().map_err(|err| attach(err, src))
}

fn attach(err: TreeGenError, src: &str) -> TreeGenError {
    let span = match &err {
        TreeGenError::Parse { line, col, lexeme, .. } => {
            offset_of(src, *line, *col).map(|offset| (offset, lexeme.len().max(1)).into())
        }
        _ => None,
    };
    err.with_source(src, span)
}

fn offset_of(src: &str, line: usize, col: usize) -> Option<usize> {
    let line_start = src
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum::<usize>();
    Some((line_start + col.saturating_sub(1)).min(src.len()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_ident(&self, text: &str) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Ident && token.text == text
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> TreeGenError {
        TreeGenError::parse(message, token.line, token.col, token.text.as_str())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            Err(self.error_at(
                &token,
                format!(
                    "expected {} but found {}",
                    kind.describe(),
                    token.kind.describe()
                ),
            ))
        }
    }

    fn span_of(token: &Token) -> Span {
        Span {
            offset: token.offset,
            len: token.len,
            line: token.line,
            col: token.col,
        }
    }

    fn take_doc(&mut self) -> Option<String> {
        let mut doc: Option<String> = None;
        while self.at(TokenKind::DocComment) {
            let token = self.advance();
            match &mut doc {
                Some(text) => {
                    text.push('\n');
                    text.push_str(&token.text);
                }
                None => doc = Some(token.text.to_string()),
            }
        }
        doc
    }

    fn parse_file(&mut self) -> Result<SourceFile> {
        let mut file = SourceFile::default();
        loop {
            let doc = self.take_doc();
            if self.at(TokenKind::Eof) {
                return Ok(file);
            }
            let token = self.peek().clone();
            if token.kind != TokenKind::Ident {
                return Err(self.error_at(
                    &token,
                    format!("expected a declaration but found {}", token.kind.describe()),
                ));
            }
            match token.text.as_str() {
                "namespace" => {
                    self.advance();
                    let (path, span) = self.parse_path()?;
                    file.header.namespace = Some(path);
                    file.header.namespace_span = span;
                    self.expect(TokenKind::Semicolon)?;
                }
                "location" => {
                    self.advance();
                    let (path, _) = self.parse_path()?;
                    file.header.location = Some(
                        path.iter()
                            .map(SmolStr::as_str)
                            .collect::<Vec<_>>()
                            .join("::"),
                    );
                    self.expect(TokenKind::Semicolon)?;
                }
                "serializable" => {
                    self.advance();
                    self.expect(TokenKind::Semicolon)?;
                    file.header.serializable = true;
                }
                "include" => {
                    self.advance();
                    let path = self.expect(TokenKind::Str)?;
                    file.header.includes.push(path.text.to_string());
                    self.expect(TokenKind::Semicolon)?;
                }
                "src_include" => {
                    self.advance();
                    let path = self.expect(TokenKind::Str)?;
                    file.header.src_includes.push(path.text.to_string());
                    self.expect(TokenKind::Semicolon)?;
                }
                "prim" => {
                    let prim = self.parse_prim(doc)?;
                    file.header.prims.push(prim);
                }
                "enum" => {
                    let decl = self.parse_enum(doc)?;
                    file.enums.push(decl);
                }
                _ => {
                    let decl = self.parse_node(doc)?;
                    file.nodes.push(decl);
                }
            }
        }
    }

    /// `::`-separated identifier path.
    fn parse_path(&mut self) -> Result<(Vec<SmolStr>, Span)> {
        let first = self.expect(TokenKind::Ident)?;
        let span = Self::span_of(&first);
        let mut segments = vec![first.text];
        while self.at(TokenKind::Colon) && self.tokens[self.pos + 1].kind == TokenKind::Colon {
            self.advance();
            self.advance();
            segments.push(self.expect(TokenKind::Ident)?.text);
        }
        Ok((segments, span))
    }

    fn parse_prim(&mut self, doc: Option<String>) -> Result<PrimDecl> {
        self.advance(); // prim
        let name = self.expect(TokenKind::Ident)?;
        let mut prim = PrimDecl {
            span: Self::span_of(&name),
            name: name.text,
            doc,
            lang: None,
            dynamic: None,
            init: None,
            serdes: None,
        };
        self.expect(TokenKind::LBrace)?;
        while !self.at(TokenKind::RBrace) {
            let key = self.expect(TokenKind::Ident)?;
            self.expect(TokenKind::Colon)?;
            let value = self.expect(TokenKind::Str)?;
            self.expect(TokenKind::Semicolon)?;
            let slot = match key.text.as_str() {
                "lang" => &mut prim.lang,
                "dyn" => &mut prim.dynamic,
                "init" => &mut prim.init,
                "serdes" => &mut prim.serdes,
                other => {
                    return Err(self.error_at(
                        &key,
                        format!("unknown primitive attribute `{other}`"),
                    ));
                }
            };
            *slot = Some(value.text.to_string());
        }
        self.expect(TokenKind::RBrace)?;
        Ok(prim)
    }

    fn parse_enum(&mut self, doc: Option<String>) -> Result<EnumDecl> {
        self.advance(); // enum
        let name = self.expect(TokenKind::Ident)?;
        let span = Self::span_of(&name);
        self.expect(TokenKind::LBrace)?;
        let mut constants = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let constant = self.expect(TokenKind::Ident)?;
            constants.push(EnumConstant {
                span: Self::span_of(&constant),
                name: constant.text,
            });
            if self.at(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(EnumDecl {
            name: name.text,
            doc,
            constants,
            span,
        })
    }

    fn parse_node(&mut self, doc: Option<String>) -> Result<NodeDecl> {
        let mut root = false;
        let mut error = false;
        // `root X { }` / `error X { }`; a node named `root` stays
        // parseable because the markers must be followed by another
        // identifier.
        loop {
            if self.at_ident("root") && self.tokens[self.pos + 1].kind == TokenKind::Ident {
                self.advance();
                root = true;
            } else if self.at_ident("error") && self.tokens[self.pos + 1].kind == TokenKind::Ident {
                self.advance();
                error = true;
            } else {
                break;
            }
        }
        let name = self.expect(TokenKind::Ident)?;
        let span = Self::span_of(&name);
        let parent = if self.at(TokenKind::Colon) {
            self.advance();
            let parent = self.expect(TokenKind::Ident)?;
            Some((parent.text.clone(), Self::span_of(&parent)))
        } else {
            None
        };
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            fields.push(self.parse_field()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(NodeDecl {
            name: name.text,
            doc,
            parent,
            root,
            error,
            fields,
            span,
        })
    }

    fn parse_field(&mut self) -> Result<FieldDecl> {
        let doc = self.take_doc();
        let name = self.expect(TokenKind::Ident)?;
        let span = Self::span_of(&name);
        self.expect(TokenKind::Colon)?;
        let type_expr = self.parse_type_expr()?;
        let ext_eq = if self.at(TokenKind::Bang) {
            self.advance();
            true
        } else {
            false
        };
        let default = if self.at(TokenKind::Equals) {
            self.advance();
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Int => {
                    self.advance();
                    Some(DefaultValue::Int(token.text.to_string()))
                }
                TokenKind::Str => {
                    self.advance();
                    Some(DefaultValue::Str(token.text.to_string()))
                }
                TokenKind::Ident => {
                    self.advance();
                    Some(DefaultValue::Ident(token.text.to_string()))
                }
                _ => {
                    return Err(self.error_at(
                        &token,
                        format!(
                            "expected a default expression but found {}",
                            token.kind.describe()
                        ),
                    ));
                }
            }
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(FieldDecl {
            name: name.text,
            doc,
            type_expr,
            ext_eq,
            default,
            span,
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr> {
        let name = self.expect(TokenKind::Ident)?;
        let wrapper = match name.text.as_str() {
            "Maybe" | "One" | "Any" | "Many" | "Link" if self.at(TokenKind::Lt) => {
                self.advance();
                let target = self.expect(TokenKind::Ident)?.text;
                self.expect(TokenKind::Gt)?;
                Some(match name.text.as_str() {
                    "Maybe" => TypeExpr::Maybe(target),
                    "One" => TypeExpr::One(target),
                    "Any" => TypeExpr::Any(target),
                    "Many" => TypeExpr::Many(target),
                    _ => TypeExpr::Link(target),
                })
            }
            _ => None,
        };
        if let Some(wrapped) = wrapper {
            return Ok(wrapped);
        }
        // `T?` and `T*` are sugar for `Maybe<T>` and `Any<T>`.
        if self.at(TokenKind::Question) {
            self.advance();
            Ok(TypeExpr::Maybe(name.text))
        } else if self.at(TokenKind::Star) {
            self.advance();
            Ok(TypeExpr::Any(name.text))
        } else {
            Ok(TypeExpr::Plain(name.text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
        namespace demo::expr;
        serializable;

        prim Int {
            lang: "i64";
            dyn: "int";
            init: "0";
            serdes: "int";
        }

        /** An expression. */
        Expr {}
        Add : Expr { lhs: One<Expr>; rhs: One<Expr>; }
        Lit : Expr { value: Int = 0; }
        root Program { body: Expr*; }
    "#;

    #[test]
    fn parses_small_file() {
        let file = parse(SMALL).unwrap();
        assert_eq!(
            file.header.namespace.as_deref(),
            Some(&[SmolStr::from("demo"), SmolStr::from("expr")][..])
        );
        assert!(file.header.serializable);
        assert_eq!(file.header.prims.len(), 1);
        assert_eq!(file.header.prims[0].lang.as_deref(), Some("i64"));
        assert_eq!(file.nodes.len(), 4);
        assert_eq!(file.nodes[0].doc.as_deref(), Some("An expression."));
        assert_eq!(file.nodes[1].parent.as_ref().unwrap().0, "Expr");
        assert!(file.nodes[3].root);
        assert_eq!(
            file.nodes[3].fields[0].type_expr,
            TypeExpr::Any(SmolStr::from("Expr"))
        );
    }

    #[test]
    fn parses_field_flags_and_defaults() {
        let file = parse("X { a: Int !; b: Str = \"hi\"; }").unwrap();
        assert!(file.nodes[0].fields[0].ext_eq);
        assert_eq!(
            file.nodes[0].fields[1].default,
            Some(DefaultValue::Str("hi".to_string()))
        );
    }

    #[test]
    fn parses_link_and_maybe_sugar() {
        let file = parse("X { a: Link<X>; b: X?; }").unwrap();
        assert_eq!(
            file.nodes[0].fields[0].type_expr,
            TypeExpr::Link(SmolStr::from("X"))
        );
        assert_eq!(
            file.nodes[0].fields[1].type_expr,
            TypeExpr::Maybe(SmolStr::from("X"))
        );
    }

    #[test]
    fn error_carries_position_and_lexeme() {
        let err = parse("X { a Int; }").unwrap_err();
        let TreeGenError::Parse { line, col, lexeme, .. } = &err else {
            panic!("expected a parse error");
        };
        assert_eq!((*line, *col), (1, 7));
        assert_eq!(lexeme, "Int");
    }

    #[test]
    fn error_on_unknown_prim_attribute() {
        let err = parse("prim X { bogus: \"y\"; }").unwrap_err();
        assert!(err.to_string().contains("unknown primitive attribute"));
    }
}
