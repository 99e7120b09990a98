//! Semantic analysis: raw AST to validated [`TreeModel`].
//!
//! Three passes over the declarations, failing on the first error:
//!
//! 1. collection - populate the name tables, rejecting duplicates
//! 2. resolution - link parents and field targets to their declarations
//! 3. validation - parent-cycle, field-collision, root and enum checks,
//!    then discriminator assignment
//!
//! The emitters never see a partially resolved model.

use std::collections::HashSet;

use smol_str::SmolStr;
use tracing::debug;

use crate::ast::{self, SourceFile, Span, TypeExpr};
use crate::error::{Result, TreeGenError};
use crate::model::{
    EdgeKind, Enumeration, Field, NodeType, Primitive, SerdesKind, TreeModel, TypeRef,
};

/// Builds and validates the model for one source file.
pub fn build(file: &SourceFile, src: &str) -> Result<TreeModel> {
    let mut model = collect(file).map_err(|err| located(err, src))?;
    resolve(file, &mut model).map_err(|err| located(err, src))?;
    validate(&mut model).map_err(|err| located(err, src))?;
    debug!(
        nodes = model.nodes.len(),
        prims = model.prims.len(),
        enums = model.enums.len(),
        "resolved tree model"
    );
    Ok(model)
}

fn located(err: TreeGenError, src: &str) -> TreeGenError {
    err.with_source(src, None)
}

fn err_at(span: Span, message: impl Into<String>) -> TreeGenError {
    let mut err = TreeGenError::resolve(message, span.line, span.col);
    if let TreeGenError::Resolve { span: slot, .. } = &mut err {
        *slot = Some(span.source_span());
    }
    err
}

fn collect(file: &SourceFile) -> Result<TreeModel> {
    let mut model = TreeModel {
        namespace: file.header.namespace.clone().unwrap_or_default(),
        location: file.header.location.clone(),
        serializable: file.header.serializable,
        includes: file.header.includes.clone(),
        src_includes: file.header.src_includes.clone(),
        ..TreeModel::default()
    };

    let mut taken: HashSet<SmolStr> = HashSet::new();
    let mut claim = |name: &SmolStr, span: Span| -> Result<()> {
        // Names claimed by the generated support code itself.
        if matches!(
            name.as_str(),
            "Node" | "NodeType" | "Visitor" | "VisitorFlow"
        ) {
            return Err(err_at(span, format!("`{name}` is a reserved type name")));
        }
        if !taken.insert(name.clone()) {
            return Err(err_at(span, format!("duplicate definition of `{name}`")));
        }
        Ok(())
    };

    for prim in &file.header.prims {
        claim(&prim.name, prim.span)?;
        let serdes = match &prim.serdes {
            Some(name) => Some(SerdesKind::parse(name).ok_or_else(|| {
                err_at(
                    prim.span,
                    format!("unknown serdes kind `{name}` for primitive `{}`", prim.name),
                )
            })?),
            None => None,
        };
        model.prims.insert(
            prim.name.clone(),
            Primitive {
                name: prim.name.clone(),
                doc: prim.doc.clone(),
                lang: prim.lang.clone().ok_or_else(|| {
                    err_at(
                        prim.span,
                        format!("primitive `{}` is missing its `lang` type", prim.name),
                    )
                })?,
                dynamic: prim.dynamic.clone().unwrap_or_else(|| "None".to_string()),
                init: prim.init.clone(),
                serdes,
                span: prim.span,
            },
        );
    }

    for decl in &file.enums {
        claim(&decl.name, decl.span)?;
        model.enums.insert(
            decl.name.clone(),
            Enumeration {
                name: decl.name.clone(),
                doc: decl.doc.clone(),
                constants: decl.constants.iter().map(|c| c.name.clone()).collect(),
                span: decl.span,
            },
        );
    }

    for decl in &file.nodes {
        claim(&decl.name, decl.span)?;
        model.nodes.insert(
            decl.name.clone(),
            NodeType {
                name: decl.name.clone(),
                doc: decl.doc.clone(),
                parent: decl.parent.as_ref().map(|(name, _)| name.clone()),
                children: Vec::new(),
                fields: Vec::new(),
                root: decl.root,
                error: decl.error,
                type_id: None,
                span: decl.span,
            },
        );
    }

    Ok(model)
}

fn resolve(file: &SourceFile, model: &mut TreeModel) -> Result<()> {
    // Parent references and the children sets they induce.
    for decl in &file.nodes {
        if let Some((parent, span)) = &decl.parent {
            if !model.nodes.contains_key(parent.as_str()) {
                return Err(err_at(
                    *span,
                    format!("unknown node type `{parent}`"),
                ));
            }
            model.nodes[parent.as_str()].children.push(decl.name.clone());
        }
    }

    // Field targets.
    for decl in &file.nodes {
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            fields.push(resolve_field(model, decl, field)?);
        }
        model.nodes[decl.name.as_str()].fields = fields;
    }
    Ok(())
}

fn resolve_field(
    model: &TreeModel,
    decl: &ast::NodeDecl,
    field: &ast::FieldDecl,
) -> Result<Field> {
    // Reserved wire keys and the annotation slot cannot double as fields.
    if matches!(
        field.name.as_str(),
        "type" | "location" | "links" | "annotations"
    ) {
        return Err(err_at(
            field.span,
            format!(
                "field name `{}` in `{}` is reserved",
                field.name, decl.name
            ),
        ));
    }

    let target_name = field.type_expr.target();
    let target = if model.nodes.contains_key(target_name.as_str()) {
        TypeRef::Node(target_name.clone())
    } else if model.prims.contains_key(target_name.as_str()) {
        TypeRef::Prim(target_name.clone())
    } else if model.enums.contains_key(target_name.as_str()) {
        TypeRef::Enum(target_name.clone())
    } else {
        return Err(err_at(
            field.span,
            format!(
                "unknown type `{target_name}` in field `{}` of `{}`",
                field.name, decl.name
            ),
        ));
    };

    let is_node = matches!(target, TypeRef::Node(_));
    let kind = match &field.type_expr {
        TypeExpr::Plain(_) => {
            if is_node {
                EdgeKind::One
            } else {
                EdgeKind::Prim
            }
        }
        TypeExpr::Maybe(_) => EdgeKind::Maybe,
        TypeExpr::One(_) => EdgeKind::One,
        TypeExpr::Any(_) => EdgeKind::Any,
        TypeExpr::Many(_) => EdgeKind::Many,
        TypeExpr::Link(_) => EdgeKind::Link,
    };

    // Edge wrappers only make sense around node types; links in
    // particular may only target nodes declared in this file.
    if !is_node && kind != EdgeKind::Prim {
        return Err(err_at(
            field.span,
            format!(
                "edge target `{target_name}` in field `{}` of `{}` is not a node type",
                field.name, decl.name
            ),
        ));
    }

    if field.default.is_some() && kind != EdgeKind::Prim {
        return Err(err_at(
            field.span,
            format!(
                "field `{}` of `{}` has a default but is not a primitive",
                field.name, decl.name
            ),
        ));
    }

    Ok(Field {
        name: field.name.clone(),
        doc: field.doc.clone(),
        kind,
        target,
        ext_eq: field.ext_eq,
        default: field.default.clone(),
        span: field.span,
    })
}

fn validate(model: &mut TreeModel) -> Result<()> {
    // No cycles in the parent-of relation.
    for node in model.nodes.values() {
        let mut seen = HashSet::new();
        seen.insert(node.name.as_str());
        let mut current = node.parent.as_deref();
        while let Some(step) = current {
            if !seen.insert(step) {
                return Err(err_at(
                    node.span,
                    format!("cycle in parent chain of `{}`", node.name),
                ));
            }
            current = model.nodes[step].parent.as_deref();
        }
    }

    // Field names must be unique on the node and across its ancestors.
    for node in model.nodes.values() {
        let mut inherited = HashSet::new();
        for ancestor in model.ancestors(node.name.as_str()) {
            for field in &ancestor.fields {
                inherited.insert((field.name.clone(), ancestor.name.clone()));
            }
        }
        let mut own = HashSet::new();
        for field in &node.fields {
            if !own.insert(field.name.clone()) {
                return Err(err_at(
                    field.span,
                    format!(
                        "duplicate field `{}` in `{}`",
                        field.name, node.name
                    ),
                ));
            }
            if let Some((_, ancestor)) = inherited
                .iter()
                .find(|(name, _)| *name == field.name)
            {
                return Err(err_at(
                    field.span,
                    format!(
                        "field `{}` of `{}` collides with a field inherited from `{ancestor}`",
                        field.name, node.name
                    ),
                ));
            }
        }
    }

    // At most one root.
    let mut root = None;
    for node in model.nodes.values() {
        if node.root {
            if let Some(previous) = &root {
                return Err(err_at(
                    node.span,
                    format!(
                        "`{}` is marked root but `{previous}` already is",
                        node.name
                    ),
                ));
            }
            root = Some(node.name.clone());
        }
    }
    model.root = root;

    // Enumeration constants are unique within the enumeration.
    for decl in model.enums.values() {
        let mut seen = HashSet::new();
        for constant in &decl.constants {
            if !seen.insert(constant.as_str()) {
                return Err(err_at(
                    decl.span,
                    format!(
                        "duplicate constant `{constant}` in enumeration `{}`",
                        decl.name
                    ),
                ));
            }
        }
    }

    // An enumeration without constants has no values to store.
    for node in model.nodes.values() {
        for field in &node.fields {
            if let TypeRef::Enum(name) = &field.target {
                if model.enums[name.as_str()].constants.is_empty() {
                    return Err(err_at(
                        field.span,
                        format!("enumeration `{name}` has no constants but is used as a field type"),
                    ));
                }
            }
        }
    }

    // Serialization requires every primitive used on a node to say how it
    // hits the wire.
    if model.serializable {
        for node in model.nodes.values() {
            for field in &node.fields {
                if let TypeRef::Prim(name) = &field.target {
                    if model.prims[name.as_str()].serdes.is_none() {
                        return Err(err_at(
                            field.span,
                            format!(
                                "primitive `{name}` is used in a serializable tree but declares no serdes kind"
                            ),
                        ));
                    }
                }
            }
        }
    }

    // Stable discriminators: concrete types in declaration order from 1.
    let mut next = 1u32;
    let concrete: Vec<SmolStr> = model
        .nodes
        .values()
        .filter(|node| node.is_final())
        .map(|node| node.name.clone())
        .collect();
    for name in concrete {
        model.nodes[name.as_str()].type_id = Some(next);
        next += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn model(src: &str) -> Result<TreeModel> {
        build(&parse(src)?, src)
    }

    const EXPR: &str = r#"
        serializable;
        prim Int { lang: "i64"; dyn: "int"; init: "0"; serdes: "int"; }

        Expr {}
        Add : Expr { lhs: One<Expr>; rhs: One<Expr>; }
        Lit : Expr { value: Int; }
        root Program { body: Any<Expr>; }
    "#;

    #[test]
    fn resolves_expression_model() {
        let model = model(EXPR).unwrap();
        let expr = model.node("Expr");
        assert!(expr.is_derived());
        assert_eq!(expr.children, vec!["Add", "Lit"]);
        assert_eq!(model.root.as_deref(), Some("Program"));
        // Concrete numbering skips abstract Expr.
        assert_eq!(model.node("Add").type_id, Some(1));
        assert_eq!(model.node("Lit").type_id, Some(2));
        assert_eq!(model.node("Program").type_id, Some(3));
        assert_eq!(model.node("Expr").type_id, None);
    }

    #[test]
    fn bare_node_name_means_one() {
        let model = model("A {} B { child: A; }").unwrap();
        assert_eq!(model.node("B").fields[0].kind, EdgeKind::One);
    }

    #[test]
    fn rejects_parent_cycle() {
        let err = model("A : B { } B : A { }").unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
        assert_ne!(err.position(), (0, 0));
    }

    #[test]
    fn rejects_unknown_edge_target() {
        let err = model("Root {} X : Root { child: One<Missing>; }").unwrap_err();
        assert!(err.to_string().contains("unknown type `Missing`"), "{err}");
    }

    #[test]
    fn rejects_duplicate_node() {
        let err = model("A {} A {}").unwrap_err();
        assert!(err.to_string().contains("duplicate definition"), "{err}");
    }

    #[test]
    fn rejects_inherited_field_collision() {
        let err = model(
            r#"
            prim Int { lang: "i64"; }
            A { x: Int; }
            B : A { x: Int; }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("collides"), "{err}");
    }

    #[test]
    fn rejects_second_root() {
        let err = model("root A {} root B {}").unwrap_err();
        assert!(err.to_string().contains("already is"), "{err}");
    }

    #[test]
    fn rejects_duplicate_enum_constant() {
        let err = model("enum E { X, X, }").unwrap_err();
        assert!(err.to_string().contains("duplicate constant"), "{err}");
    }

    #[test]
    fn rejects_edge_around_primitive() {
        let err = model(
            r#"
            prim Int { lang: "i64"; }
            A { xs: Many<Int>; }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a node type"), "{err}");
    }

    #[test]
    fn rejects_unserializable_prim_in_serializable_tree() {
        let err = model(
            r#"
            serializable;
            prim Opaque { lang: "u8"; }
            A { x: Opaque; }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("serdes"), "{err}");
    }

    #[test]
    fn rejects_reserved_names() {
        let err = model("NodeType {}").unwrap_err();
        assert!(err.to_string().contains("reserved type name"), "{err}");

        let err = model(
            r#"
            prim Int { lang: "i64"; }
            A { type: Int; }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    #[test]
    fn links_resolve_to_nodes() {
        let model = model("A {} B { target: Link<A>; }").unwrap();
        assert_eq!(model.node("B").fields[0].kind, EdgeKind::Link);
        assert_eq!(
            model.node("B").fields[0].target,
            TypeRef::Node("A".into())
        );
    }
}
