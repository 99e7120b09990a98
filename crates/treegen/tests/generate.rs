use std::fs;
use std::path::Path;

use treegen::codegen::CodeGenerator;
use treegen::parser::parse;
use treegen::resolve::build;

const EXPR_TREE: &str = r#"
namespace demo::expr;
serializable;

prim Int { lang: "i64"; dyn: "int"; init: "0"; serdes: "int"; }

/** An expression. */
Expr {}
/** Sum of two operands. */
Add : Expr { lhs: One<Expr>; rhs: One<Expr>; }
Lit : Expr { value: Int = 0; }
Var : Expr { origin: Link<Expr>; }
root Program { body: Many<Expr>; }
"#;

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn generate(src: &str) -> (String, String, String) {
    let file = parse(src).expect("parse");
    let model = build(&file, src).expect("resolve");
    let generator = CodeGenerator::new(&model, "test.tree");

    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("types.rs");
    let source = dir.path().join("impls.rs");
    let python = dir.path().join("tree.py");
    generator
        .write_outputs(&header, &source, Some(&python))
        .expect("write outputs");
    (read(&header), read(&source), read(&python))
}

#[test]
fn emits_class_hierarchy() {
    let (types, _, _) = generate(EXPR_TREE);
    // Abstract types become enums over their children, concrete types
    // become structs with flattened fields.
    assert!(types.contains("pub enum Expr {"));
    assert!(types.contains("Add(Add)"));
    assert!(types.contains("pub struct Add {"));
    assert!(types.contains("pub lhs: Option<Rc<RefCell<Expr>>>"));
    assert!(types.contains("pub body: Vec<Rc<RefCell<Expr>>>"));
    assert!(types.contains("pub origin: Weak<RefCell<Expr>>"));
    assert!(types.contains("pub value: i64"));
    assert!(types.contains("pub annotations: Annotations"));
    // Doc comments are carried over.
    assert!(types.contains("Sum of two operands."));
    assert!(types.contains("pub type Root = Program;"));
}

#[test]
fn emits_stable_discriminators() {
    let (types, _, _) = generate(EXPR_TREE);
    // Concrete types only, declaration order, starting at 1.
    assert!(types.contains("Add = 1u32"));
    assert!(types.contains("Lit = 2u32"));
    assert!(types.contains("Var = 3u32"));
    assert!(types.contains("Program = 4u32"));
    assert!(!types.contains("Expr = "));
}

#[test]
fn emits_visitor_with_fallback_views() {
    let (types, impls, _) = generate(EXPR_TREE);
    assert!(types.contains("pub trait Visitor {"));
    assert!(types.contains("fn visit_add(&mut self, _node: &Add) -> VisitorFlow"));
    assert!(types.contains("fn visit_expr(&mut self, _node: ExprRef<'_>) -> VisitorFlow"));
    assert!(types.contains("pub enum ExprRef<'a> {"));
    // Concrete dispatch falls back through the ancestor chain.
    assert!(impls.contains("visitor.visit_add(self)"));
    assert!(impls.contains("visitor.visit_expr(ExprRef::Add(self))"));
}

#[test]
fn emits_structural_methods() {
    let (_, impls, _) = generate(EXPR_TREE);
    for needle in [
        "pub fn new()",
        "pub fn with(",
        "pub fn copy(&self)",
        "pub fn clone_tree(&self)",
        "pub fn equals(&self, other: &Self)",
        "pub fn check_complete(&self)",
        "pub fn dump(&self)",
        "pub fn is_add(&self)",
        "pub fn as_add(&self)",
        "NodeType::Add",
    ] {
        assert!(impls.contains(needle), "missing {needle}");
    }
    // Links remap through the clone map, never deep-copy.
    assert!(impls.contains("map.mapped::<Expr>"));
    assert!(impls.contains("Rc::ptr_eq"));
}

#[test]
fn emits_cbor_hooks_only_when_serializable() {
    let (_, impls, _) = generate(EXPR_TREE);
    assert!(impls.contains("pub fn serialize(node: &Rc<RefCell<Self>>)"));
    assert!(impls.contains("pub fn deserialize(data: Vec<u8>)"));
    assert!(impls.contains("map.write_string(\"type\", \"Add\")"));
    assert!(impls.contains("table.write_into(&mut map)"));

    let plain = EXPR_TREE.replace("serializable;\n", "");
    let (_, impls, python) = generate(&plain);
    assert!(!impls.contains("fn serialize"));
    assert!(!impls.contains("treegen_runtime::cbor"));
    // The dynamic model always carries its embedded codec.
    assert!(python.contains("_cbor_decode"));
}

#[test]
fn emits_parallel_python_model() {
    let (_, _, python) = generate(EXPR_TREE);
    assert!(python.contains("class Expr(Node):"));
    assert!(python.contains("class Add(Expr):"));
    assert!(python.contains("TYPE_NAME = \"Add\""));
    assert!(python.contains("TYPE_ID = 1"));
    assert!(python.contains("(\"lhs\", \"one\", \"Expr\"),"));
    assert!(python.contains("(\"origin\", \"link\", \"Expr\"),"));
    assert!(python.contains("def __init__(self, lhs=None, rhs=None):"));
    assert!(python.contains("TYPE_REGISTRY = {\"Add\": Add"));
    assert!(python.contains("Root = Program"));
    // Wire order matches the native side: type first, then fields.
    assert!(python.contains("_w_text(out, \"type\")"));
}

#[test]
fn field_order_is_declaration_order() {
    let (types, _, _) = generate(EXPR_TREE);
    let lhs = types.find("pub lhs").unwrap();
    let rhs = types.find("pub rhs").unwrap();
    assert!(lhs < rhs);
}

#[test]
fn inherited_fields_are_flattened_into_leaves() {
    let src = r#"
        prim Str { lang: "String"; dyn: "str"; }
        Annotated { note: Str; }
        Stmt : Annotated {}
        Print : Stmt { text: Str; }
    "#;
    let (types, _, python) = generate(src);
    // Print carries the inherited field first, then its own.
    let print_struct = types.split("pub struct Print").nth(1).unwrap();
    let note = print_struct.find("pub note").unwrap();
    let text = print_struct.find("pub text").unwrap();
    assert!(note < text);
    assert!(python.contains("def __init__(self, note=None, text=None):"));
}

#[test]
fn parent_cycle_renders_located_error() {
    let src = "A : B { }\nB : A { }";
    let file = parse(src).unwrap();
    let err = build(&file, src).unwrap_err();
    let line = err.render_line("cycle.tree");
    assert!(line.starts_with("cycle.tree:1:1:"), "{line}");
    assert!(line.contains("cycle"), "{line}");
}

#[test]
fn unknown_target_renders_located_error() {
    let src = "Root {}\nX : Root { child: One<Missing>; }";
    let file = parse(src).unwrap();
    let err = build(&file, src).unwrap_err();
    let line = err.render_line("missing.tree");
    assert!(line.starts_with("missing.tree:2:12:"), "{line}");
    assert!(line.contains("unknown type `Missing`"), "{line}");
}

#[test]
fn parse_error_renders_location_and_lexeme() {
    let err = parse("X { a Int; }").unwrap_err();
    let line = err.render_line("bad.tree");
    assert!(line.starts_with("bad.tree:1:7:"), "{line}");
    assert!(line.contains("expected"), "{line}");
}

#[test]
fn operator_flag_generates_partial_eq() {
    let src = r#"
        prim Int { lang: "i64"; dyn: "int"; }
        Lit { value: Int !; }
    "#;
    let (_, impls, _) = generate(src);
    assert!(impls.contains("impl PartialEq for Lit"));

    let without = src.replace(" !", "");
    let (_, impls, _) = generate(&without);
    assert!(!impls.contains("impl PartialEq for Lit"));
}

#[test]
fn enumerations_are_ordinal() {
    let src = r#"
        serializable;
        enum Color { Red, Green, Blue, }
        Pixel { color: Color; }
    "#;
    let (types, impls, python) = generate(src);
    assert!(types.contains("pub enum Color {"));
    assert!(types.contains("pub fn ordinal(self)"));
    assert!(impls.contains("Color::from_ordinal"));
    assert!(python.contains("Green = 1"));
}
