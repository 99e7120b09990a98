//! Raw parse tree of a tree-description file, prior to name resolution.

use smol_str::SmolStr;

/// Byte span plus 1-based position, carried through to diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn source_span(&self) -> miette::SourceSpan {
        (self.offset, self.len.max(1)).into()
    }
}

/// A parsed `.tree` file: header directives followed by declarations in
/// source order.
#[derive(Debug, Default)]
pub struct SourceFile {
    pub header: Header,
    pub enums: Vec<EnumDecl>,
    pub nodes: Vec<NodeDecl>,
}

/// Global declarations from the file header.
#[derive(Debug, Default)]
pub struct Header {
    /// Output namespace, `::`-separated segments.
    pub namespace: Option<Vec<SmolStr>>,
    pub namespace_span: Span,
    /// Source-location tracker type; enables location tracking.
    pub location: Option<String>,
    /// Enables `serialize`/`deserialize` on the generated model.
    pub serializable: bool,
    /// Verbatim splices for the types output.
    pub includes: Vec<String>,
    /// Verbatim splices for the impls output.
    pub src_includes: Vec<String>,
    pub prims: Vec<PrimDecl>,
}

/// A `prim` block declaring a by-value primitive.
#[derive(Debug)]
pub struct PrimDecl {
    pub name: SmolStr,
    pub doc: Option<String>,
    /// Native (Rust) type expression.
    pub lang: Option<String>,
    /// Dynamic (Python) constructor expression.
    pub dynamic: Option<String>,
    /// Default initializer expression.
    pub init: Option<String>,
    /// CBOR scalar kind: bool, int, float, string or bytes.
    pub serdes: Option<String>,
    pub span: Span,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub constants: Vec<EnumConstant>,
    pub span: Span,
}

#[derive(Debug)]
pub struct EnumConstant {
    pub name: SmolStr,
    pub span: Span,
}

#[derive(Debug)]
pub struct NodeDecl {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub parent: Option<(SmolStr, Span)>,
    /// Marked `root`: the single entry-point type of the tree.
    pub root: bool,
    /// Marked `error`: a recovery placeholder type.
    pub error: bool,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Debug)]
pub struct FieldDecl {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub type_expr: TypeExpr,
    /// `!` flag: generate `PartialEq` on the declaring type.
    pub ext_eq: bool,
    /// `=` default expression.
    pub default: Option<DefaultValue>,
    pub span: Span,
}

/// A field default, with the literal kind preserved so the emitters can
/// re-quote it for their target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// Integer literal, verbatim (decimal or `0x` hex).
    Int(String),
    /// String literal, unescaped.
    Str(String),
    /// Bare identifier: `true`, `false`, or an enumeration constant.
    Ident(String),
}

/// Surface type expression of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// Bare name: a node type (meaning `One`) or a primitive.
    Plain(SmolStr),
    Maybe(SmolStr),
    One(SmolStr),
    Any(SmolStr),
    Many(SmolStr),
    Link(SmolStr),
}

impl TypeExpr {
    pub fn target(&self) -> &SmolStr {
        match self {
            TypeExpr::Plain(name)
            | TypeExpr::Maybe(name)
            | TypeExpr::One(name)
            | TypeExpr::Any(name)
            | TypeExpr::Many(name)
            | TypeExpr::Link(name) => name,
        }
    }
}
