//! Code generation from a validated [`TreeModel`].
//!
//! Two emitters share one generator facade: the native emitter builds
//! the Rust object model as token streams, split into a declarations
//! file and an implementations file, and the dynamic emitter stitches
//! the parallel Python model as text, with an embedded CBOR codec so
//! the output is dependency-free.
//!
//! [`output`] turns the token streams into formatted source files with a
//! generated-file banner and writes everything to disk.

use proc_macro2::TokenStream;
use quote::quote;

use crate::error::{Result, TreeGenError};
use crate::model::{EdgeKind, Field, Primitive, TreeModel, TypeRef};

mod impls;
mod names;
pub mod output;
mod python;
mod types;

pub(crate) use names::{make_ident, method_name, ref_ident, type_ident};

/// Code generator over a resolved tree model.
pub struct CodeGenerator<'m> {
    model: &'m TreeModel,
    /// Name of the `.tree` input, quoted in the generated-file banners.
    source_name: String,
}

impl<'m> CodeGenerator<'m> {
    pub fn new(model: &'m TreeModel, source_name: impl Into<String>) -> Self {
        Self {
            model,
            source_name: source_name.into(),
        }
    }

    pub fn model(&self) -> &TreeModel {
        self.model
    }

    /// Whether any node carries an owning edge.
    fn has_edges(&self) -> bool {
        self.model.nodes.values().any(|node| {
            node.fields.iter().any(|field| {
                matches!(
                    field.kind,
                    EdgeKind::Maybe | EdgeKind::One | EdgeKind::Any | EdgeKind::Many
                )
            })
        })
    }

    /// Whether any node carries a non-owning link.
    fn has_links(&self) -> bool {
        self.model
            .nodes
            .values()
            .any(|node| node.fields.iter().any(|field| field.kind == EdgeKind::Link))
    }

    fn prim(&self, name: &str) -> &Primitive {
        &self.model.prims[name]
    }

    /// Rust storage type for one field.
    fn storage_type(&self, field: &Field) -> Result<TokenStream> {
        let target = field.target.name();
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => {
                let target = type_ident(target);
                Ok(quote! { Option<Rc<RefCell<#target>>> })
            }
            EdgeKind::Any | EdgeKind::Many => {
                let target = type_ident(target);
                Ok(quote! { Vec<Rc<RefCell<#target>>> })
            }
            EdgeKind::Link => {
                let target = type_ident(target);
                Ok(quote! { Weak<RefCell<#target>> })
            }
            EdgeKind::Prim => match &field.target {
                TypeRef::Prim(name) => self.prim_type(&self.prim(name).lang),
                TypeRef::Enum(name) => {
                    let target = type_ident(name);
                    Ok(quote! { #target })
                }
                TypeRef::Node(_) => unreachable!("prim edge resolved to a node"),
            },
        }
    }

    fn prim_type(&self, lang: &str) -> Result<TokenStream> {
        let parsed: syn::Type = syn::parse_str(lang)
            .map_err(|source| TreeGenError::Format { source })?;
        Ok(quote! { #parsed })
    }

    /// Doc attribute(s) from an optional description, one per line.
    fn doc_attr(doc: Option<&String>) -> TokenStream {
        match doc {
            Some(text) => {
                let lines = text.lines().map(|line| {
                    let line = if line.is_empty() {
                        String::new()
                    } else {
                        format!(" {line}")
                    };
                    quote! { #[doc = #line] }
                });
                quote! { #(#lines)* }
            }
            None => quote! {},
        }
    }
}
