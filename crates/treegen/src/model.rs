//! The validated Tree Model.
//!
//! Built once per invocation by [`crate::resolve::build`], then consumed
//! read-only by the emitters. Declaration order is preserved everywhere:
//! it drives type discriminator numbering and the wire-format key order.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::ast::Span;

/// CBOR scalar kind a primitive maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerdesKind {
    Bool,
    Int,
    Float,
    String,
    Bytes,
}

impl SerdesKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        })
    }
}

/// A by-value primitive declared in the file header.
#[derive(Debug)]
pub struct Primitive {
    pub name: SmolStr,
    pub doc: Option<String>,
    /// Native (Rust) type expression.
    pub lang: String,
    /// Dynamic (Python) constructor expression.
    pub dynamic: String,
    /// Default initializer expression, if not the type's default.
    pub init: Option<String>,
    pub serdes: Option<SerdesKind>,
    pub span: Span,
}

/// A finite ordered set of named constants, usable as a primitive.
/// Constants serialize as declaration-order ordinals starting at 0.
#[derive(Debug)]
pub struct Enumeration {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub constants: Vec<SmolStr>,
    pub span: Span,
}

/// Multiplicity and ownership of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Optional owning edge, zero or one.
    Maybe,
    /// Mandatory owning edge; physically nullable until `check_complete`.
    One,
    /// Owning ordered sequence, zero or more.
    Any,
    /// Owning ordered sequence, one or more.
    Many,
    /// Non-owning reference to a node elsewhere in the same tree.
    Link,
    /// By-value primitive or enumeration storage.
    Prim,
}

/// Resolved target of a field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Node(SmolStr),
    Prim(SmolStr),
    Enum(SmolStr),
}

impl TypeRef {
    pub fn name(&self) -> &SmolStr {
        match self {
            TypeRef::Node(name) | TypeRef::Prim(name) | TypeRef::Enum(name) => name,
        }
    }
}

#[derive(Debug)]
pub struct Field {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub kind: EdgeKind,
    pub target: TypeRef,
    /// Generate `PartialEq` on the declaring type.
    pub ext_eq: bool,
    /// Field-level default, overriding the primitive's initializer.
    pub default: Option<crate::ast::DefaultValue>,
    pub span: Span,
}

#[derive(Debug)]
pub struct NodeType {
    pub name: SmolStr,
    pub doc: Option<String>,
    pub parent: Option<SmolStr>,
    /// Direct children, in declaration order.
    pub children: Vec<SmolStr>,
    /// Own fields only; inherited fields live on the ancestors.
    pub fields: Vec<Field>,
    pub root: bool,
    pub error: bool,
    /// Discriminator number; concrete types only, declaration order, 1-based.
    pub type_id: Option<u32>,
    pub span: Span,
}

impl NodeType {
    /// Has at least one child and is therefore non-instantiable.
    pub fn is_derived(&self) -> bool {
        !self.children.is_empty()
    }

    /// Has no children and is therefore instantiable.
    pub fn is_final(&self) -> bool {
        self.children.is_empty()
    }
}

/// A whole validated tree description.
#[derive(Debug, Default)]
pub struct TreeModel {
    /// Output namespace segments.
    pub namespace: Vec<SmolStr>,
    /// Source-location tracker type; presence enables location tracking.
    pub location: Option<String>,
    pub serializable: bool,
    pub includes: Vec<String>,
    pub src_includes: Vec<String>,
    pub prims: IndexMap<SmolStr, Primitive>,
    pub enums: IndexMap<SmolStr, Enumeration>,
    pub nodes: IndexMap<SmolStr, NodeType>,
    /// The node type marked `root`, if any.
    pub root: Option<SmolStr>,
}

impl TreeModel {
    pub fn node(&self, name: &str) -> &NodeType {
        &self.nodes[name]
    }

    /// Ancestors of `name`, root-most first. Assumes an acyclic model.
    pub fn ancestors(&self, name: &str) -> Vec<&NodeType> {
        let mut chain = Vec::new();
        let mut current = self.nodes[name].parent.as_ref();
        while let Some(parent) = current {
            let node = &self.nodes[parent.as_str()];
            chain.push(node);
            current = node.parent.as_ref();
        }
        chain.reverse();
        chain
    }

    /// All fields reachable on `name`: ancestor fields root-most first,
    /// own fields last, each group in declaration order.
    pub fn all_fields(&self, name: &str) -> Vec<&Field> {
        let mut fields = Vec::new();
        for ancestor in self.ancestors(name) {
            fields.extend(ancestor.fields.iter());
        }
        fields.extend(self.nodes[name].fields.iter());
        fields
    }

    /// Concrete descendants of `name` (including `name` itself when
    /// concrete), in declaration order of the file.
    pub fn concrete_descendants(&self, name: &str) -> Vec<&NodeType> {
        self.nodes
            .values()
            .filter(|node| node.is_final() && self.descends_from(&node.name, name))
            .collect()
    }

    /// All strict and non-strict descendants of `name`, in declaration
    /// order, excluding `name` itself.
    pub fn descendants(&self, name: &str) -> Vec<&NodeType> {
        self.nodes
            .values()
            .filter(|node| node.name != name && self.descends_from(&node.name, name))
            .collect()
    }

    /// Whether `name` equals `ancestor` or inherits from it.
    pub fn descends_from(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        while let Some(step) = current {
            if step == ancestor {
                return true;
            }
            current = self.nodes[step].parent.as_deref();
        }
        false
    }

    /// Variant chain from abstract `from` down to descendant `to`:
    /// the direct child of `from` on the path, then its child, and so on,
    /// ending at `to` itself.
    pub fn chain(&self, from: &str, to: &str) -> Vec<&NodeType> {
        let mut chain = vec![&self.nodes[to]];
        let mut current = self.nodes[to].parent.as_deref();
        while let Some(step) = current {
            if step == from {
                break;
            }
            chain.push(&self.nodes[step]);
            current = self.nodes[step].parent.as_deref();
        }
        chain.reverse();
        chain
    }
}
