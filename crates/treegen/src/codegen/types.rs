//! Declarations file of the generated Rust object model: structs, enums,
//! the type discriminator, and the visitor trait.

use proc_macro2::TokenStream;
use quote::quote;

use super::{CodeGenerator, method_name, ref_ident, type_ident};
use crate::error::Result;
use crate::model::NodeType as ModelNode;

impl<'m> CodeGenerator<'m> {
    /// All items of the types (header) output.
    pub fn types_tokens(&self) -> Result<TokenStream> {
        let mut items = vec![self.types_imports()];
        items.push(self.discriminator_enum());
        items.push(self.visitor_trait());
        for decl in self.model.enums.values() {
            items.push(self.enumeration(decl));
        }
        for node in self.model.nodes.values() {
            if node.is_derived() {
                items.push(self.abstract_enum(node)?);
            } else {
                items.push(self.concrete_struct(node)?);
            }
        }
        items.push(self.root_alias());
        Ok(quote! { #(#items)* })
    }

    fn types_imports(&self) -> TokenStream {
        let (edges, links) = (self.has_edges(), self.has_links());
        let cell = (edges || links).then(|| quote! { use std::cell::RefCell; });
        let rc = match (edges, links) {
            (true, true) => Some(quote! { use std::rc::{Rc, Weak}; }),
            (true, false) => Some(quote! { use std::rc::Rc; }),
            (false, true) => Some(quote! { use std::rc::Weak; }),
            (false, false) => None,
        };
        quote! {
            #cell
            #rc

            use treegen_runtime::Annotations;
        }
    }

    /// The stable `NodeType` discriminator: concrete types in declaration
    /// order, numbered from 1.
    fn discriminator_enum(&self) -> TokenStream {
        let concrete: Vec<&ModelNode> = self
            .model
            .nodes
            .values()
            .filter(|node| node.is_final())
            .collect();
        let variants = concrete.iter().map(|node| {
            let ident = type_ident(&node.name);
            let id = node.type_id.unwrap_or_default();
            quote! { #ident = #id }
        });
        let names = concrete.iter().map(|node| {
            let ident = type_ident(&node.name);
            let name = node.name.as_str();
            quote! { Self::#ident => #name }
        });
        let from_names = concrete.iter().map(|node| {
            let ident = type_ident(&node.name);
            let name = node.name.as_str();
            quote! { #name => Some(Self::#ident) }
        });
        let error_marked: Vec<TokenStream> = concrete
            .iter()
            .filter(|node| node.error)
            .map(|node| {
                let ident = type_ident(&node.name);
                quote! { Self::#ident }
            })
            .collect();
        let is_error = if error_marked.is_empty() {
            quote! { false }
        } else {
            quote! { matches!(self, #(#error_marked)|*) }
        };

        quote! {
            /// Stable discriminator naming each concrete node type.
            /// Numbered in declaration order starting at 1.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            #[repr(u32)]
            pub enum NodeType {
                #(#variants,)*
            }

            impl NodeType {
                pub fn name(self) -> &'static str {
                    match self {
                        #(#names,)*
                    }
                }

                pub fn number(self) -> u32 {
                    self as u32
                }

                /// Whether this type is an error-recovery placeholder.
                pub fn is_error(self) -> bool {
                    #is_error
                }

                pub fn from_name(name: &str) -> Option<Self> {
                    match name {
                        #(#from_names,)*
                        _ => None,
                    }
                }
            }
        }
    }

    /// Visitor over the hierarchy. Concrete methods receive the node,
    /// abstract methods its borrowed view; returning
    /// [`VisitorFlow::Fallback`] hands dispatch to the nearest ancestor
    /// method.
    fn visitor_trait(&self) -> TokenStream {
        let methods = self.model.nodes.values().map(|node| {
            let method = method_name("visit", &node.name);
            if node.is_derived() {
                let view = ref_ident(&node.name);
                quote! {
                    fn #method(&mut self, _node: #view<'_>) -> VisitorFlow {
                        VisitorFlow::Fallback
                    }
                }
            } else {
                let ident = type_ident(&node.name);
                quote! {
                    fn #method(&mut self, _node: &#ident) -> VisitorFlow {
                        VisitorFlow::Fallback
                    }
                }
            }
        });
        quote! {
            /// Outcome of one visitor method.
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum VisitorFlow {
                /// The node was handled; dispatch stops.
                Handled,
                /// Fall back to the nearest ancestor method.
                Fallback,
            }

            pub trait Visitor {
                #(#methods)*
            }
        }
    }

    fn enumeration(&self, decl: &crate::model::Enumeration) -> TokenStream {
        let doc = Self::doc_attr(decl.doc.as_ref());
        let ident = type_ident(&decl.name);
        let constants: Vec<syn::Ident> = decl
            .constants
            .iter()
            .map(|name| type_ident(name))
            .collect();
        let ordinals = constants.iter().enumerate().map(|(ordinal, constant)| {
            let ordinal = ordinal as i64;
            quote! { #ordinal => Some(Self::#constant) }
        });
        let default = constants.first().map(|first| {
            quote! {
                impl Default for #ident {
                    fn default() -> Self {
                        Self::#first
                    }
                }
            }
        });
        quote! {
            #doc
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum #ident {
                #(#constants,)*
            }

            impl #ident {
                /// Declaration-order ordinal, starting at 0.
                pub fn ordinal(self) -> i64 {
                    self as i64
                }

                pub fn from_ordinal(ordinal: i64) -> Option<Self> {
                    match ordinal {
                        #(#ordinals,)*
                        _ => None,
                    }
                }
            }

            #default
        }
    }

    /// An abstract node type: an enum over its direct children plus a
    /// borrowed view over its concrete descendants.
    fn abstract_enum(&self, node: &ModelNode) -> Result<TokenStream> {
        let doc = Self::doc_attr(node.doc.as_ref());
        let ident = type_ident(&node.name);
        let variants = node.children.iter().map(|child| {
            let child = type_ident(child);
            quote! { #child(#child) }
        });
        let view = ref_ident(&node.name);
        let leaves = self.model.concrete_descendants(&node.name);
        let view_variants = leaves.iter().map(|leaf| {
            let leaf = type_ident(&leaf.name);
            quote! { #leaf(&'a #leaf) }
        });
        Ok(quote! {
            #doc
            #[derive(Debug)]
            pub enum #ident {
                #(#variants,)*
            }

            /// Borrowed view of any concrete descendant.
            #[derive(Clone, Copy)]
            pub enum #view<'a> {
                #(#view_variants,)*
            }
        })
    }

    fn concrete_struct(&self, node: &ModelNode) -> Result<TokenStream> {
        let doc = Self::doc_attr(node.doc.as_ref());
        let ident = type_ident(&node.name);
        let mut fields = Vec::new();
        for field in self.model.all_fields(&node.name) {
            let field_doc = Self::doc_attr(field.doc.as_ref());
            let name = make_field(&field.name);
            let ty = self.storage_type(field)?;
            fields.push(quote! {
                #field_doc
                pub #name: #ty
            });
        }
        Ok(quote! {
            #doc
            #[derive(Debug)]
            pub struct #ident {
                #(#fields,)*
                /// Annotations attached to this node.
                pub annotations: Annotations,
            }
        })
    }

    /// `pub type Root = X;` alias for the node marked `root`, unless a
    /// declared type already claims the name.
    fn root_alias(&self) -> TokenStream {
        let Some(root) = &self.model.root else {
            return quote! {};
        };
        if self.model.nodes.contains_key("Root")
            || self.model.enums.contains_key("Root")
            || self.model.prims.contains_key("Root")
        {
            return quote! {};
        }
        let ident = type_ident(root);
        quote! {
            /// The designated root type of this tree.
            pub type Root = #ident;
        }
    }
}

pub(super) fn make_field(name: &str) -> syn::Ident {
    super::make_ident(name)
}
