//! # Runtime support for object models generated by `tree-gen`
//!
//! Generated Rust trees link against this crate for everything that is not
//! specific to one tree description:
//!
//! - [`cbor`] - strict RFC 7049 subset reader and writer used by the
//!   generated `serialize`/`deserialize` methods
//! - [`annotations`] - per-node heterogeneous annotation map plus the
//!   process-wide serialization registry
//! - [`links`] - link-id table written at the tree root and the resolver
//!   that patches non-owning references back in on deserialization
//! - [`tree`] - clone bookkeeping and the incomplete-tree error
//!
//! Everything here is single-threaded by contract: readers may share the
//! underlying buffer freely, writers and trees must not cross threads.

pub mod annotations;
pub mod cbor;
pub mod links;
pub mod tree;

pub use annotations::Annotations;
pub use cbor::{Reader, Slice, Writer};
pub use tree::IncompleteTree;

pub use bytes;
pub use indexmap;
pub use smol_str;
