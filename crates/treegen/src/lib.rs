//! # Tree description parsing and object-model code generation
//!
//! `tree-gen` turns a declarative description of a tree-shaped data type
//! (an AST or IR, typically) into a full object model: a native Rust
//! class hierarchy with cloning, equality, visiting, completeness
//! checking and CBOR serialization, plus an optional parallel Python
//! model that round-trips the same wire format. Generated code links
//! against the `treegen-runtime` crate.
//!
//! ## Usage
//!
//! ```bash
//! tree-gen expr.tree src/generated/types.rs src/generated/impls.rs expr_tree.py
//! ```
//!
//! The first two outputs are mounted as sibling modules
//! (`mod types; mod impls;`); the Python file stands alone.
//!
//! ## Modules
//!
//! - [`lexer`]/[`parser`] - the tree-description language front end
//! - [`ast`] - raw parse tree of a description file
//! - [`resolve`] - semantic analysis producing the validated model
//! - [`model`] - the Tree Model consumed by the emitters
//! - [`codegen`] - Rust and Python code generation
//! - [`cli`] - command-line argument definitions

pub mod ast;
pub mod cli;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod resolve;
