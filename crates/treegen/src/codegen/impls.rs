//! Implementations file of the generated Rust object model: constructors,
//! cloning, equality, visiting, completeness checking and the CBOR hooks.

use proc_macro2::TokenStream;
use quote::quote;

use super::types::make_field;
use super::{CodeGenerator, method_name, ref_ident, type_ident};
use crate::ast::DefaultValue;
use crate::error::{Result, TreeGenError};
use crate::model::{EdgeKind, Field, NodeType as ModelNode, SerdesKind, TypeRef};

impl<'m> CodeGenerator<'m> {
    /// All items of the impls (source) output. `types_module` is the
    /// module stem of the types file, imported as a sibling module.
    pub fn impls_tokens(&self, types_module: &str) -> Result<TokenStream> {
        let mut items = vec![self.impls_imports(types_module)];
        if self.model.serializable {
            items.push(quote! {
                fn require<'a, 'b>(
                    entries: &'a IndexMap<String, Slice<'b>>,
                    key: &str,
                ) -> cbor::Result<&'a Slice<'b>> {
                    entries
                        .get(key)
                        .ok_or_else(|| CborError::invalid(format!("missing key `{key}`")))
                }
            });
        }
        for node in self.model.nodes.values() {
            if node.is_derived() {
                items.push(self.abstract_impl(node)?);
            } else {
                items.push(self.concrete_impl(node)?);
            }
            if self
                .model
                .all_fields(&node.name)
                .iter()
                .any(|field| field.ext_eq)
            {
                let ident = type_ident(&node.name);
                items.push(quote! {
                    impl PartialEq for #ident {
                        fn eq(&self, other: &Self) -> bool {
                            self.equals(other)
                        }
                    }
                });
            }
        }
        Ok(quote! { #(#items)* })
    }

    fn impls_imports(&self, types_module: &str) -> TokenStream {
        let module = super::make_ident(types_module);
        let (edges, links) = (self.has_edges(), self.has_links());
        let serializable = self.model.serializable;
        let cell = (edges || links || serializable).then(|| quote! { use std::cell::RefCell; });
        let rc = match (edges || serializable, links) {
            (true, true) => Some(quote! { use std::rc::{Rc, Weak}; }),
            (true, false) => Some(quote! { use std::rc::Rc; }),
            (false, true) => Some(quote! { use std::rc::Weak; }),
            (false, false) => None,
        };
        let addr = (edges || links || serializable)
            .then(|| quote! { use treegen_runtime::tree::handle_addr; });
        let has_abstract = self.model.nodes.values().any(|node| node.is_derived());
        let serde = serializable.then(|| {
            let any = (links || has_abstract).then(|| quote! { use std::any::Any; });
            let downcast = links.then(|| quote! { use treegen_runtime::links::downcast_link; });
            quote! {
                #any

                use treegen_runtime::cbor::{self, CborError, MapWriter, Reader, Slice, Writer};
                use treegen_runtime::indexmap::IndexMap;
                use treegen_runtime::links::{self, LinkFill, LinkResolver, LinkTable, PathStep};
                #downcast
            }
        });
        quote! {
            #cell
            use std::collections::HashSet;
            use std::fmt::Write as _;
            #rc

            use treegen_runtime::Annotations;
            use treegen_runtime::tree::{CloneMap, IncompleteTree};
            #addr

            #serde

            use super::#module::*;
        }
    }

    fn field_default(&self, field: &Field) -> Result<TokenStream> {
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => Ok(quote! { None }),
            EdgeKind::Any | EdgeKind::Many => Ok(quote! { Vec::new() }),
            EdgeKind::Link => Ok(quote! { Weak::new() }),
            EdgeKind::Prim => {
                if let Some(default) = &field.default {
                    return match default {
                        DefaultValue::Int(raw) => self.parse_expr(raw),
                        DefaultValue::Str(value) => Ok(quote! { #value.into() }),
                        DefaultValue::Ident(word) => {
                            if let TypeRef::Enum(name) = &field.target {
                                let target = type_ident(name);
                                let constant = super::make_ident(word);
                                Ok(quote! { #target::#constant })
                            } else {
                                self.parse_expr(word)
                            }
                        }
                    };
                }
                if let TypeRef::Prim(name) = &field.target {
                    if let Some(init) = &self.prim(name).init {
                        return self.parse_expr(init);
                    }
                }
                Ok(quote! { Default::default() })
            }
        }
    }

    fn parse_expr(&self, raw: &str) -> Result<TokenStream> {
        let parsed: syn::Expr =
            syn::parse_str(raw).map_err(|source| TreeGenError::Format { source })?;
        Ok(quote! { #parsed })
    }

    fn concrete_impl(&self, node: &ModelNode) -> Result<TokenStream> {
        let ident = type_ident(&node.name);
        let name_lit = node.name.as_str();
        let fields = self.model.all_fields(&node.name);

        // Constructors.
        let inits = fields
            .iter()
            .map(|field| {
                let name = make_field(&field.name);
                let default = self.field_default(field)?;
                Ok(quote! { #name: #default })
            })
            .collect::<Result<Vec<_>>>()?;
        let params = fields
            .iter()
            .map(|field| {
                let name = make_field(&field.name);
                let ty = self.storage_type(field)?;
                Ok(quote! { #name: #ty })
            })
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<syn::Ident> = fields.iter().map(|f| make_field(&f.name)).collect();

        // Per-field bodies for the structural methods.
        let clone_inits = fields.iter().map(|f| self.clone_init(f));
        let remap_stmts = fields.iter().map(|f| self.remap_stmt(f));
        let equals_body = fields
            .iter()
            .map(|f| self.equals_clause(f))
            .reduce(|acc, clause| quote! { #acc && #clause })
            .unwrap_or_else(|| {
                quote! {
                    {
                        let _ = other;
                        true
                    }
                }
            });
        let dump_stmts = fields.iter().map(|f| self.dump_stmt(f));
        let collect_stmts = fields.iter().map(|f| self.collect_addr_stmt(f));
        let check_stmts = fields
            .iter()
            .map(|f| self.check_stmt(node, f))
            .collect::<Vec<_>>();

        // Visitor chain: own method first, then ancestors nearest-first.
        let own_visit = method_name("visit", &node.name);
        let ancestor_visits = self
            .model
            .ancestors(&node.name)
            .into_iter()
            .rev()
            .map(|ancestor| {
                let method = method_name("visit", &ancestor.name);
                let view = ref_ident(&ancestor.name);
                quote! {
                    if visitor.#method(#view::#ident(self)) == VisitorFlow::Handled {
                        return;
                    }
                }
            });

        let serde = if self.model.serializable {
            self.concrete_serde(node)?
        } else {
            quote! {}
        };

        Ok(quote! {
            impl #ident {
                /// Creates an empty node: edges unset, primitives at
                /// their defaults.
                pub fn new() -> Self {
                    Self {
                        #(#inits,)*
                        annotations: Annotations::new(),
                    }
                }

                /// Creates a node with every field, in declaration order.
                pub fn with(#(#params),*) -> Self {
                    Self {
                        #(#names,)*
                        annotations: Annotations::new(),
                    }
                }

                pub fn type_of(&self) -> NodeType {
                    NodeType::#ident
                }

                /// Shallow clone: children and link targets stay shared.
                pub fn copy(&self) -> Self {
                    Self {
                        #(#names: self.#names.clone(),)*
                        annotations: self.annotations.clone(),
                    }
                }

                /// Deep clone. Owning children are duplicated; links into
                /// the cloned subtree are remapped onto the fresh nodes,
                /// links pointing elsewhere keep their original targets.
                pub fn clone_tree(&self) -> Self {
                    let mut map = CloneMap::new();
                    let mut cloned = self.clone_with(&mut map);
                    cloned.remap_links(&map);
                    cloned
                }

                pub(crate) fn clone_with(&self, map: &mut CloneMap) -> Self {
                    let _ = &map;
                    Self {
                        #(#clone_inits,)*
                        annotations: self.annotations.clone(),
                    }
                }

                pub(crate) fn remap_links(&mut self, map: &CloneMap) {
                    #(#remap_stmts)*
                    let _ = map;
                }

                /// Structural equality over the owning subtree; links
                /// compare by target identity, annotations and locations
                /// are ignored.
                pub fn equals(&self, other: &Self) -> bool {
                    #equals_body
                }

                /// Dispatches to the visitor method for this type,
                /// falling back through the ancestor methods.
                pub fn visit<V: Visitor>(&self, visitor: &mut V) {
                    if visitor.#own_visit(self) == VisitorFlow::Handled {
                        return;
                    }
                    #(#ancestor_visits)*
                }

                /// Pretty-prints the subtree.
                pub fn dump(&self) -> String {
                    let mut out = String::new();
                    self.dump_into(&mut out, 0);
                    out
                }

                pub(crate) fn dump_into(&self, out: &mut String, indent: usize) {
                    let pad = "  ".repeat(indent);
                    let _ = writeln!(out, "{}{} {{", pad, #name_lit);
                    #(#dump_stmts)*
                    let _ = writeln!(out, "{}}}", pad);
                }

                /// Verifies that every `One` edge is set, every `Many`
                /// edge is non-empty, and every link resolves inside this
                /// subtree.
                pub fn check_complete(&self) -> Result<(), IncompleteTree> {
                    let mut owned = HashSet::new();
                    self.collect_addrs(&mut owned);
                    self.check_complete_in(&owned)
                }

                pub(crate) fn collect_addrs(&self, owned: &mut HashSet<usize>) {
                    #(#collect_stmts)*
                    let _ = owned;
                }

                pub(crate) fn check_complete_in(
                    &self,
                    owned: &HashSet<usize>,
                ) -> Result<(), IncompleteTree> {
                    #(#check_stmts)*
                    let _ = owned;
                    Ok(())
                }

                #serde
            }

            impl Default for #ident {
                fn default() -> Self {
                    Self::new()
                }
            }
        })
    }

    fn clone_init(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                #name: self.#name.as_ref().map(|child| {
                    let cloned = Rc::new(RefCell::new(child.borrow().clone_with(map)));
                    map.insert(handle_addr(child), cloned.clone());
                    cloned
                })
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                #name: self
                    .#name
                    .iter()
                    .map(|child| {
                        let cloned = Rc::new(RefCell::new(child.borrow().clone_with(map)));
                        map.insert(handle_addr(child), cloned.clone());
                        cloned
                    })
                    .collect()
            },
            EdgeKind::Link | EdgeKind::Prim => quote! { #name: self.#name.clone() },
        }
    }

    fn remap_stmt(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                if let Some(child) = &self.#name {
                    child.borrow_mut().remap_links(map);
                }
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                for child in &self.#name {
                    child.borrow_mut().remap_links(map);
                }
            },
            EdgeKind::Link => {
                let target = type_ident(field.target.name());
                quote! {
                    if let Some(old) = self.#name.upgrade() {
                        if let Some(new) = map.mapped::<#target>(handle_addr(&old)) {
                            self.#name = Rc::downgrade(&new);
                        }
                    }
                }
            }
            EdgeKind::Prim => quote! {},
        }
    }

    fn equals_clause(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                (match (&self.#name, &other.#name) {
                    (Some(a), Some(b)) => a.borrow().equals(&b.borrow()),
                    (None, None) => true,
                    _ => false,
                })
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                (self.#name.len() == other.#name.len()
                    && self
                        .#name
                        .iter()
                        .zip(other.#name.iter())
                        .all(|(a, b)| a.borrow().equals(&b.borrow())))
            },
            EdgeKind::Link => quote! {
                (match (self.#name.upgrade(), other.#name.upgrade()) {
                    (Some(a), Some(b)) => Rc::ptr_eq(&a, &b),
                    (None, None) => true,
                    _ => false,
                })
            },
            EdgeKind::Prim => quote! { (self.#name == other.#name) },
        }
    }

    fn dump_stmt(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        let label = field.name.as_str();
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                match &self.#name {
                    Some(child) => {
                        let _ = writeln!(out, "{}  {}:", pad, #label);
                        child.borrow().dump_into(out, indent + 2);
                    }
                    None => {
                        let _ = writeln!(out, "{}  {}: -", pad, #label);
                    }
                }
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                let _ = writeln!(out, "{}  {}[{}]:", pad, #label, self.#name.len());
                for child in &self.#name {
                    child.borrow().dump_into(out, indent + 2);
                }
            },
            EdgeKind::Link => quote! {
                let _ = writeln!(
                    out,
                    "{}  {}: {}",
                    pad,
                    #label,
                    if self.#name.upgrade().is_some() { "<link>" } else { "<unset>" }
                );
            },
            EdgeKind::Prim => quote! {
                let _ = writeln!(out, "{}  {}: {:?}", pad, #label, self.#name);
            },
        }
    }

    fn collect_addr_stmt(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                if let Some(child) = &self.#name {
                    owned.insert(handle_addr(child));
                    child.borrow().collect_addrs(owned);
                }
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                for child in &self.#name {
                    owned.insert(handle_addr(child));
                    child.borrow().collect_addrs(owned);
                }
            },
            EdgeKind::Link | EdgeKind::Prim => quote! {},
        }
    }

    fn check_stmt(&self, node: &ModelNode, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        let unset = format!("field `{}` of `{}` is not set", field.name, node.name);
        let empty = format!("field `{}` of `{}` is empty", field.name, node.name);
        let dangling = format!(
            "link `{}` of `{}` does not resolve in this tree",
            field.name, node.name
        );
        match field.kind {
            EdgeKind::One => quote! {
                match &self.#name {
                    Some(child) => child.borrow().check_complete_in(owned)?,
                    None => return Err(IncompleteTree::new(#unset)),
                }
            },
            EdgeKind::Maybe => quote! {
                if let Some(child) = &self.#name {
                    child.borrow().check_complete_in(owned)?;
                }
            },
            EdgeKind::Many => quote! {
                if self.#name.is_empty() {
                    return Err(IncompleteTree::new(#empty));
                }
                for child in &self.#name {
                    child.borrow().check_complete_in(owned)?;
                }
            },
            EdgeKind::Any => quote! {
                for child in &self.#name {
                    child.borrow().check_complete_in(owned)?;
                }
            },
            EdgeKind::Link => quote! {
                match self.#name.upgrade() {
                    Some(target) if owned.contains(&handle_addr(&target)) => {}
                    _ => return Err(IncompleteTree::new(#dangling)),
                }
            },
            EdgeKind::Prim => quote! {},
        }
    }

    /// `collect_links`, `write_node`, `read_value`, `serialize` and
    /// `deserialize` for a concrete type.
    fn concrete_serde(&self, node: &ModelNode) -> Result<TokenStream> {
        let name_lit = node.name.as_str();
        let fields = self.model.all_fields(&node.name);
        let link_stmts = fields.iter().map(|f| self.collect_link_stmt(f));
        let write_stmts = fields
            .iter()
            .map(|f| self.write_stmt(f))
            .collect::<Result<Vec<_>>>()?;
        let read_stmts = fields
            .iter()
            .map(|f| self.read_stmt(f))
            .collect::<Result<Vec<_>>>()?;
        let location_write = self.model.location.as_ref().map(|_| {
            quote! { self.annotations.serialize_location(map)?; }
        });
        let location_read = self.model.location.as_ref().map(|_| {
            quote! {
                if let Some(slice) = entries.get("location") {
                    node.annotations.deserialize_location(slice)?;
                }
            }
        });
        let wrong_type = format!("expected node type `{}`", node.name);
        let serde_entry = self.serde_entry_points();

        Ok(quote! {
            pub(crate) fn collect_links(&self, table: &mut LinkTable) {
                #(#link_stmts)*
                let _ = table;
            }

            pub(crate) fn write_node(
                &self,
                map: &mut MapWriter,
                table: &mut LinkTable,
                path: &mut Vec<PathStep>,
            ) -> cbor::Result<()> {
                map.write_string("type", #name_lit)?;
                #(#write_stmts)*
                #location_write
                self.annotations.serialize_into(map)?;
                let _ = (table, path);
                Ok(())
            }

            #[allow(unused_mut)]
            pub(crate) fn read_value(
                entries: &IndexMap<String, Slice<'_>>,
                path: &mut Vec<PathStep>,
                resolver: &mut LinkResolver,
            ) -> cbor::Result<(Self, Vec<(u64, LinkFill<Self>)>)> {
                let type_name = require(entries, "type")?.as_string()?;
                if type_name != #name_lit {
                    return Err(CborError::invalid(format!(
                        "{}, found `{type_name}`",
                        #wrong_type
                    )));
                }
                let mut node = Self::new();
                let mut fills: Vec<(u64, LinkFill<Self>)> = Vec::new();
                #(#read_stmts)*
                #location_read
                node.annotations.deserialize_from(entries)?;
                let _ = (path, resolver);
                Ok((node, fills))
            }

            #serde_entry
        })
    }

    /// `serialize`/`deserialize` entry points, shared verbatim between
    /// concrete and abstract types.
    fn serde_entry_points(&self) -> TokenStream {
        quote! {
            /// Serializes this node as a tree root.
            pub fn serialize(node: &Rc<RefCell<Self>>) -> cbor::Result<Vec<u8>> {
                let mut table = LinkTable::new();
                node.borrow().collect_links(&mut table);
                let mut writer = Writer::new();
                let mut map = writer.start();
                let mut path = Vec::new();
                table.note_path(handle_addr(node), &path);
                node.borrow().write_node(&mut map, &mut table, &mut path)?;
                table.write_into(&mut map)?;
                map.close()?;
                writer.into_bytes()
            }

            /// Reads back a tree rooted at this type.
            pub fn deserialize(data: Vec<u8>) -> cbor::Result<Rc<RefCell<Self>>> {
                let reader = Reader::new(data)?;
                let entries = reader.root().as_map()?;
                let paths = links::read_table(&entries)?;
                let mut resolver = LinkResolver::new(paths);
                let mut path = Vec::new();
                let (value, fills) = Self::read_value(&entries, &mut path, &mut resolver)?;
                let node = Rc::new(RefCell::new(value));
                resolver.note_built(&path, node.clone());
                for (id, fill) in fills {
                    let handle = node.clone();
                    resolver.defer(
                        id,
                        Box::new(move |target| fill(&mut handle.borrow_mut(), target)),
                    );
                }
                resolver.resolve()?;
                Ok(node)
            }
        }
    }

    fn collect_link_stmt(&self, field: &Field) -> TokenStream {
        let name = make_field(&field.name);
        match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                if let Some(child) = &self.#name {
                    child.borrow().collect_links(table);
                }
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                for child in &self.#name {
                    child.borrow().collect_links(table);
                }
            },
            EdgeKind::Link => quote! {
                if let Some(target) = self.#name.upgrade() {
                    table.request(handle_addr(&target));
                }
            },
            EdgeKind::Prim => quote! {},
        }
    }

    fn write_stmt(&self, field: &Field) -> Result<TokenStream> {
        let name = make_field(&field.name);
        let key = field.name.as_str();
        Ok(match field.kind {
            EdgeKind::Maybe | EdgeKind::One => quote! {
                match &self.#name {
                    Some(child) => {
                        path.push(PathStep::Field(#key.into()));
                        table.note_path(handle_addr(child), path);
                        let mut entry = map.start_map(#key)?;
                        child.borrow().write_node(&mut entry, table, path)?;
                        entry.close()?;
                        path.pop();
                    }
                    None => map.write_null(#key)?,
                }
            },
            EdgeKind::Any | EdgeKind::Many => quote! {
                {
                    let mut items = map.start_array(#key)?;
                    path.push(PathStep::Field(#key.into()));
                    for (index, child) in self.#name.iter().enumerate() {
                        path.push(PathStep::Index(index));
                        table.note_path(handle_addr(child), path);
                        let mut entry = items.start_map()?;
                        child.borrow().write_node(&mut entry, table, path)?;
                        entry.close()?;
                        path.pop();
                    }
                    path.pop();
                    items.close()?;
                }
            },
            EdgeKind::Link => quote! {
                match self.#name.upgrade() {
                    Some(target) => {
                        let id = table.lookup(handle_addr(&target)).ok_or_else(|| {
                            CborError::invalid("link target was not assigned an id")
                        })?;
                        map.write_int(#key, id as i64)?;
                    }
                    None => map.write_null(#key)?,
                }
            },
            EdgeKind::Prim => match &field.target {
                TypeRef::Enum(_) => quote! {
                    map.write_int(#key, self.#name.ordinal())?;
                },
                TypeRef::Prim(prim) => match self.serdes_of(prim) {
                    SerdesKind::Bool => quote! { map.write_bool(#key, self.#name)?; },
                    SerdesKind::Int => quote! { map.write_int(#key, self.#name as i64)?; },
                    SerdesKind::Float => quote! { map.write_float(#key, self.#name as f64)?; },
                    SerdesKind::String => quote! { map.write_string(#key, &self.#name)?; },
                    SerdesKind::Bytes => quote! { map.write_bytes(#key, &self.#name)?; },
                },
                TypeRef::Node(_) => unreachable!("prim edge resolved to a node"),
            },
        })
    }

    fn read_stmt(&self, field: &Field) -> Result<TokenStream> {
        let name = make_field(&field.name);
        let key = field.name.as_str();
        let wrap_child = |target: &syn::Ident, bind: TokenStream| {
            quote! {
                let child_entries = slice.as_map()?;
                let (value, child_fills) = #target::read_value(&child_entries, path, resolver)?;
                let child = Rc::new(RefCell::new(value));
                resolver.note_built(path, child.clone());
                for (id, fill) in child_fills {
                    let handle = child.clone();
                    resolver.defer(
                        id,
                        Box::new(move |target| fill(&mut handle.borrow_mut(), target)),
                    );
                }
                #bind
            }
        };
        Ok(match field.kind {
            EdgeKind::Maybe | EdgeKind::One => {
                let target = type_ident(field.target.name());
                let body = wrap_child(&target, quote! { node.#name = Some(child); });
                quote! {
                    {
                        let slice = require(entries, #key)?;
                        if !slice.is_null() {
                            path.push(PathStep::Field(#key.into()));
                            #body
                            path.pop();
                        }
                    }
                }
            }
            EdgeKind::Any | EdgeKind::Many => {
                let target = type_ident(field.target.name());
                let body = wrap_child(&target, quote! { node.#name.push(child); });
                quote! {
                    {
                        path.push(PathStep::Field(#key.into()));
                        for (index, slice) in require(entries, #key)?
                            .as_array()?
                            .into_iter()
                            .enumerate()
                        {
                            path.push(PathStep::Index(index));
                            #body
                            path.pop();
                        }
                        path.pop();
                    }
                }
            }
            EdgeKind::Link => {
                let target = type_ident(field.target.name());
                quote! {
                    {
                        let slice = require(entries, #key)?;
                        if !slice.is_null() {
                            let id = u64::try_from(slice.as_int()?)
                                .map_err(|_| CborError::invalid("negative link id"))?;
                            fills.push((
                                id,
                                Box::new(move |node: &mut Self, target: Rc<dyn Any>| {
                                    let target = downcast_link::<#target>(target)?;
                                    node.#name = Rc::downgrade(&target);
                                    Ok(())
                                }),
                            ));
                        }
                    }
                }
            }
            EdgeKind::Prim => match &field.target {
                TypeRef::Enum(target) => {
                    let target = type_ident(target);
                    quote! {
                        node.#name = #target::from_ordinal(require(entries, #key)?.as_int()?)
                            .ok_or_else(|| {
                                CborError::invalid("enumeration ordinal out of range")
                            })?;
                    }
                }
                TypeRef::Prim(prim) => match self.serdes_of(prim) {
                    SerdesKind::Bool => quote! {
                        node.#name = require(entries, #key)?.as_bool()?;
                    },
                    SerdesKind::Int => quote! {
                        node.#name = require(entries, #key)?.as_int()? as _;
                    },
                    SerdesKind::Float => quote! {
                        node.#name = require(entries, #key)?.as_float()? as _;
                    },
                    SerdesKind::String => quote! {
                        node.#name = require(entries, #key)?.as_string()?.into();
                    },
                    SerdesKind::Bytes => quote! {
                        node.#name = require(entries, #key)?.as_bytes()?.into();
                    },
                },
                TypeRef::Node(_) => unreachable!("prim edge resolved to a node"),
            },
        })
    }

    fn serdes_of(&self, prim: &str) -> SerdesKind {
        // Validated during resolution for serializable models.
        self.prim(prim).serdes.unwrap_or(SerdesKind::Int)
    }

    fn abstract_impl(&self, node: &ModelNode) -> Result<TokenStream> {
        let ident = type_ident(&node.name);
        let children: Vec<syn::Ident> =
            node.children.iter().map(|child| type_ident(child)).collect();
        let multi = node.children.len() > 1;

        let dispatch = |call: TokenStream| {
            let arms = children.iter().map(|child| {
                quote! { Self::#child(inner) => inner.#call }
            });
            quote! {
                match self {
                    #(#arms,)*
                }
            }
        };

        let type_of = dispatch(quote! { type_of() });
        let copy_arms = children.iter().map(|child| {
            quote! { Self::#child(inner) => Self::#child(inner.copy()) }
        });
        let clone_arms = children.iter().map(|child| {
            quote! { Self::#child(inner) => Self::#child(inner.clone_with(map)) }
        });
        let remap = dispatch(quote! { remap_links(map) });
        let collect = dispatch(quote! { collect_addrs(owned) });
        let check_in = dispatch(quote! { check_complete_in(owned) });
        let dump_into = dispatch(quote! { dump_into(out, indent) });
        let visit = dispatch(quote! { visit(visitor) });

        let equals_arms = children.iter().map(|child| {
            quote! { (Self::#child(a), Self::#child(b)) => a.equals(b) }
        });
        let equals_wildcard = multi.then(|| quote! { _ => false, });

        let accessors = self.accessors(node, multi);

        let serde = if self.model.serializable {
            self.abstract_serde(node, &children)?
        } else {
            quote! {}
        };

        Ok(quote! {
            impl #ident {
                pub fn type_of(&self) -> NodeType {
                    #type_of
                }

                /// Shallow clone: children and link targets stay shared.
                pub fn copy(&self) -> Self {
                    match self {
                        #(#copy_arms,)*
                    }
                }

                /// Deep clone with link remapping, as on concrete types.
                pub fn clone_tree(&self) -> Self {
                    let mut map = CloneMap::new();
                    let mut cloned = self.clone_with(&mut map);
                    cloned.remap_links(&map);
                    cloned
                }

                pub(crate) fn clone_with(&self, map: &mut CloneMap) -> Self {
                    match self {
                        #(#clone_arms,)*
                    }
                }

                pub(crate) fn remap_links(&mut self, map: &CloneMap) {
                    #remap
                }

                /// Structural equality; different concrete types are
                /// never equal.
                #[allow(unreachable_patterns)]
                pub fn equals(&self, other: &Self) -> bool {
                    match (self, other) {
                        #(#equals_arms,)*
                        #equals_wildcard
                    }
                }

                pub fn visit<V: Visitor>(&self, visitor: &mut V) {
                    #visit
                }

                /// Pretty-prints the subtree.
                pub fn dump(&self) -> String {
                    let mut out = String::new();
                    self.dump_into(&mut out, 0);
                    out
                }

                pub(crate) fn dump_into(&self, out: &mut String, indent: usize) {
                    #dump_into
                }

                pub fn check_complete(&self) -> Result<(), IncompleteTree> {
                    let mut owned = HashSet::new();
                    self.collect_addrs(&mut owned);
                    self.check_complete_in(&owned)
                }

                pub(crate) fn collect_addrs(&self, owned: &mut HashSet<usize>) {
                    #collect
                }

                pub(crate) fn check_complete_in(
                    &self,
                    owned: &HashSet<usize>,
                ) -> Result<(), IncompleteTree> {
                    #check_in
                }

                #accessors

                #serde
            }
        })
    }

    /// `is_*`/`as_*` downcast accessors for every descendant type.
    fn accessors(&self, node: &ModelNode, multi: bool) -> TokenStream {
        let methods = self.model.descendants(&node.name).into_iter().map(|descendant| {
            let is_method = method_name("is", &descendant.name);
            let as_method = method_name("as", &descendant.name);
            let target = type_ident(&descendant.name);
            let chain = self.model.chain(&node.name, &descendant.name);
            let step = type_ident(&chain[0].name);
            let wildcard = multi.then(|| quote! { _ => None, });
            let body = if chain.len() == 1 {
                quote! {
                    match self {
                        Self::#step(node) => Some(node),
                        #wildcard
                    }
                }
            } else {
                quote! {
                    match self {
                        Self::#step(inner) => inner.#as_method(),
                        #wildcard
                    }
                }
            };
            let doc = format!(
                " Downcast to [`{}`]: the dynamic type equals or descends from it.",
                descendant.name
            );
            quote! {
                #[doc = #doc]
                pub fn #as_method(&self) -> Option<&#target> {
                    #body
                }

                pub fn #is_method(&self) -> bool {
                    self.#as_method().is_some()
                }
            }
        });
        quote! { #(#methods)* }
    }

    /// Serialization dispatch for an abstract type: `write_node` and
    /// `collect_links` delegate to the active variant, `read_value`
    /// dispatches on the wire `type` name and lifts the variant one level.
    fn abstract_serde(&self, node: &ModelNode, children: &[syn::Ident]) -> Result<TokenStream> {
        let write_arms = children.iter().map(|child| {
            quote! { Self::#child(inner) => inner.write_node(map, table, path) }
        });
        let link_arms = children.iter().map(|child| {
            quote! { Self::#child(inner) => inner.collect_links(table) }
        });
        let read_arms = node.children.iter().map(|child_name| {
            let child = type_ident(child_name);
            let child_node = self.model.node(child_name);
            let names: Vec<&str> = if child_node.is_final() {
                vec![child_node.name.as_str()]
            } else {
                self.model
                    .concrete_descendants(child_name)
                    .into_iter()
                    .map(|leaf| leaf.name.as_str())
                    .collect()
            };
            quote! {
                #(#names)|* => {
                    let (value, fills) = #child::read_value(entries, path, resolver)?;
                    let fills = fills
                        .into_iter()
                        .map(|(id, fill)| {
                            let fill: LinkFill<Self> =
                                Box::new(move |holder: &mut Self, target: Rc<dyn Any>| {
                                    match holder {
                                        Self::#child(inner) => fill(inner, target),
                                        _ => Err(CborError::invalid(
                                            "link holder changed variant",
                                        )),
                                    }
                                });
                            (id, fill)
                        })
                        .collect();
                    Ok((Self::#child(value), fills))
                }
            }
        });
        let serde_entry = self.serde_entry_points();

        Ok(quote! {
            pub(crate) fn collect_links(&self, table: &mut LinkTable) {
                match self {
                    #(#link_arms,)*
                }
            }

            pub(crate) fn write_node(
                &self,
                map: &mut MapWriter,
                table: &mut LinkTable,
                path: &mut Vec<PathStep>,
            ) -> cbor::Result<()> {
                match self {
                    #(#write_arms,)*
                }
            }

            #[allow(unreachable_patterns)]
            pub(crate) fn read_value(
                entries: &IndexMap<String, Slice<'_>>,
                path: &mut Vec<PathStep>,
                resolver: &mut LinkResolver,
            ) -> cbor::Result<(Self, Vec<(u64, LinkFill<Self>)>)> {
                let type_name = require(entries, "type")?.as_string()?;
                match type_name.as_str() {
                    #(#read_arms)*
                    other => Err(CborError::invalid(format!("unknown node type `{other}`"))),
                }
            }

            #serde_entry
        })
    }
}
