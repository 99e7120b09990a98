use miette::{Diagnostic, SourceSpan};
use std::io;
use thiserror::Error;

/// Errors that can occur while turning a tree description into code
#[derive(Debug, Error, Diagnostic)]
pub enum TreeGenError {
    /// IO error when reading the description or writing outputs
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Lexical or grammatical error in the `.tree` input
    #[error("{message}")]
    #[diagnostic(code(treegen::parse_error))]
    Parse {
        message: String,
        /// 1-based position of the offending token
        line: usize,
        col: usize,
        /// Lexeme the parser choked on; empty at end of input
        lexeme: String,
        /// Source text that failed to parse
        #[source_code]
        src: Option<String>,
        #[label("here")]
        span: Option<SourceSpan>,
    },

    /// Semantic error: unknown name, cycle, duplicate, invalid root
    #[error("{message}")]
    #[diagnostic(code(treegen::resolve_error))]
    Resolve {
        message: String,
        line: usize,
        col: usize,
        #[source_code]
        src: Option<String>,
        #[label("declared here")]
        span: Option<SourceSpan>,
    },

    /// Generated tokens failed to re-parse before formatting
    #[error("failed to format generated code: {source}")]
    #[diagnostic(code(treegen::format_error))]
    Format {
        #[source]
        source: syn::Error,
    },
}

impl TreeGenError {
    pub fn parse(
        message: impl Into<String>,
        line: usize,
        col: usize,
        lexeme: impl Into<String>,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            line,
            col,
            lexeme: lexeme.into(),
            src: None,
            span: None,
        }
    }

    pub fn resolve(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self::Resolve {
            message: message.into(),
            line,
            col,
            src: None,
            span: None,
        }
    }

    /// Attaches source text and a span so miette can render a labelled
    /// snippet. Positional errors only; other kinds pass through.
    pub fn with_source(mut self, source: &str, at: Option<SourceSpan>) -> Self {
        match &mut self {
            Self::Parse { src, span, .. } | Self::Resolve { src, span, .. } => {
                *src = Some(source.to_string());
                if span.is_none() {
                    *span = at;
                }
            }
            _ => {}
        }
        self
    }

    /// 1-based line and column, or `(0, 0)` for errors with no position.
    pub fn position(&self) -> (usize, usize) {
        match self {
            Self::Parse { line, col, .. } | Self::Resolve { line, col, .. } => (*line, *col),
            _ => (0, 0),
        }
    }

    /// The single-line rendering the command line interface prints:
    /// `<file>:<line>:<col>: <message>`.
    pub fn render_line(&self, file: &str) -> String {
        let (line, col) = self.position();
        format!("{file}:{line}:{col}: {self}")
    }
}

/// Result type for generator operations
pub type Result<T> = std::result::Result<T, TreeGenError>;
