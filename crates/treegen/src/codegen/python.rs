//! Dynamic-language emitter: one dependency-free Python file mirroring
//! the generated Rust object model, bit-for-bit compatible on the wire.
//!
//! Per-class output is deliberately thin: a docstring, the wire metadata
//! (`TYPE_NAME`, `TYPE_ID`, `FIELDS`), and a checked constructor. All
//! behavior lives once in the embedded prelude, driven by `FIELDS`.

use std::fmt::Write as _;

use heck::ToSnakeCase;

use crate::ast::DefaultValue;
use crate::error::Result;
use crate::model::{EdgeKind, Field, NodeType as ModelNode, SerdesKind, TypeRef};

use super::CodeGenerator;

impl<'m> CodeGenerator<'m> {
    /// The whole Python output, banner included.
    pub fn python_text(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# @generated by tree-gen from {}. DO NOT EDIT.",
            self.source_name
        );
        let namespace = self
            .model
            .namespace
            .iter()
            .map(|segment| segment.as_str())
            .collect::<Vec<_>>()
            .join(".");
        if namespace.is_empty() {
            let _ = writeln!(out, "\"\"\"Generated tree object model.\"\"\"");
        } else {
            let _ = writeln!(out, "\"\"\"Generated tree object model for {namespace}.\"\"\"");
        }
        out.push('\n');
        out.push_str(PRELUDE);
        out.push('\n');

        for decl in self.model.enums.values() {
            self.python_enum(&mut out, decl);
        }
        for node in self.model.nodes.values() {
            self.python_class(&mut out, node)?;
        }
        self.python_registry(&mut out);
        Ok(out)
    }

    fn python_enum(&self, out: &mut String, decl: &crate::model::Enumeration) {
        let _ = writeln!(out, "\nclass {}:", decl.name);
        if let Some(doc) = &decl.doc {
            write_docstring(out, doc, 1);
        }
        for (ordinal, constant) in decl.constants.iter().enumerate() {
            let _ = writeln!(out, "    {constant} = {ordinal}");
        }
        let names = decl
            .constants
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "    CONSTANTS = ({names},)");
    }

    fn python_class(&self, out: &mut String, node: &ModelNode) -> Result<()> {
        let parent = node.parent.as_deref().unwrap_or("Node");
        let _ = writeln!(out, "\nclass {}({parent}):", node.name);
        if let Some(doc) = &node.doc {
            write_docstring(out, doc, 1);
        }
        if node.is_final() {
            let _ = writeln!(out, "    TYPE_NAME = \"{}\"", node.name);
            let _ = writeln!(
                out,
                "    TYPE_ID = {}",
                node.type_id.unwrap_or_default()
            );
            if node.error {
                let _ = writeln!(out, "    IS_ERROR = True");
            }
        }
        let _ = writeln!(
            out,
            "    VISIT_NAME = \"visit_{}\"",
            node.name.to_snake_case()
        );

        let fields = self.model.all_fields(&node.name);
        if fields.is_empty() {
            let _ = writeln!(out, "    FIELDS = ()");
        } else {
            let _ = writeln!(out, "    FIELDS = (");
            for field in &fields {
                let _ = writeln!(
                    out,
                    "        (\"{}\", \"{}\", \"{}\"),",
                    field.name,
                    kind_tag(field),
                    self.python_target(field)
                );
            }
            let _ = writeln!(out, "    )");
        }

        if node.is_final() {
            let params = fields
                .iter()
                .map(|field| format!("{}=None", field.name))
                .collect::<Vec<_>>()
                .join(", ");
            out.push('\n');
            if params.is_empty() {
                let _ = writeln!(out, "    def __init__(self):");
            } else {
                let _ = writeln!(out, "    def __init__(self, {params}):");
            }
            let _ = writeln!(out, "        super().__init__()");
            for field in &fields {
                match field.kind {
                    EdgeKind::Prim => {
                        let default = self.python_default(field);
                        let _ = writeln!(
                            out,
                            "        self.{0} = {1} if {0} is None else {0}",
                            field.name, default
                        );
                    }
                    _ => {
                        let _ = writeln!(
                            out,
                            "        self.{0} = self._check_field(\"{0}\", \"{1}\", \"{2}\", {0})",
                            field.name,
                            kind_tag(field),
                            self.python_target(field)
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn python_target(&self, field: &Field) -> String {
        match (&field.kind, &field.target) {
            (EdgeKind::Prim, TypeRef::Prim(name)) => {
                match self.prim(name).serdes.unwrap_or(SerdesKind::Int) {
                    SerdesKind::Bool => "bool",
                    SerdesKind::Int => "int",
                    SerdesKind::Float => "float",
                    SerdesKind::String => "string",
                    SerdesKind::Bytes => "bytes",
                }
                .to_string()
            }
            _ => field.target.name().to_string(),
        }
    }

    fn python_default(&self, field: &Field) -> String {
        if let Some(default) = &field.default {
            return match default {
                DefaultValue::Int(raw) => raw.clone(),
                DefaultValue::Str(value) => format!("{value:?}"),
                DefaultValue::Ident(word) => match word.as_str() {
                    "true" => "True".to_string(),
                    "false" => "False".to_string(),
                    other => {
                        if let TypeRef::Enum(name) = &field.target {
                            format!("{name}.{other}")
                        } else {
                            other.to_string()
                        }
                    }
                },
            };
        }
        match &field.target {
            TypeRef::Enum(name) => {
                let first = &self.model.enums[name.as_str()].constants[0];
                format!("{name}.{first}")
            }
            TypeRef::Prim(name) => {
                let ctor = &self.prim(name).dynamic;
                if ctor == "None" {
                    "None".to_string()
                } else {
                    format!("{ctor}()")
                }
            }
            TypeRef::Node(_) => "None".to_string(),
        }
    }

    fn python_registry(&self, out: &mut String) {
        out.push('\n');
        let concrete = self
            .model
            .nodes
            .values()
            .filter(|node| node.is_final())
            .map(|node| format!("\"{0}\": {0}", node.name))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "TYPE_REGISTRY = {{{concrete}}}");
        let every = self
            .model
            .nodes
            .values()
            .map(|node| format!("\"{0}\": {0}", node.name))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "TYPE_REGISTRY_ALL = {{{every}}}");
        let _ = writeln!(
            out,
            "_HAS_LOCATION = {}",
            if self.model.location.is_some() {
                "True"
            } else {
                "False"
            }
        );
        if let Some(root) = &self.model.root {
            if !self.model.nodes.contains_key("Root") {
                let _ = writeln!(out, "Root = {root}");
            }
        }
    }
}

fn kind_tag(field: &Field) -> &'static str {
    match (field.kind, &field.target) {
        (EdgeKind::Maybe, _) => "maybe",
        (EdgeKind::One, _) => "one",
        (EdgeKind::Any, _) => "any",
        (EdgeKind::Many, _) => "many",
        (EdgeKind::Link, _) => "link",
        (EdgeKind::Prim, TypeRef::Enum(_)) => "enum",
        (EdgeKind::Prim, _) => "prim",
    }
}

fn write_docstring(out: &mut String, doc: &str, indent: usize) {
    let pad = "    ".repeat(indent);
    let mut lines = doc.lines();
    let Some(first) = lines.next() else {
        return;
    };
    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        let _ = writeln!(out, "{pad}\"\"\"{first}\"\"\"");
    } else {
        let _ = writeln!(out, "{pad}\"\"\"{first}");
        for line in rest {
            let _ = writeln!(out, "{pad}{line}");
        }
        let _ = writeln!(out, "{pad}\"\"\"");
    }
}

/// Support code embedded at the top of every generated Python file:
/// the CBOR subset codec, link bookkeeping, the annotation registry and
/// the metadata-driven `Node` base class.
const PRELUDE: &str = r#"import struct


class IncompleteTreeError(Exception):
    """A `One` edge is unset, a `Many` edge is empty, or a link dangles."""


_ANNOTATION_CODECS = []
_ANNOTATIONS_BY_KEY = {}
_LOCATION_CODEC = None


def register_annotation(cls, name, serialize, deserialize):
    """Registers an annotation class under its canonical name."""
    entry = (cls, name, serialize, deserialize)
    _ANNOTATION_CODECS.append(entry)
    _ANNOTATIONS_BY_KEY["{" + name + "}"] = entry


def register_location(cls, serialize, deserialize):
    """Registers the source-location tracker class."""
    global _LOCATION_CODEC
    _LOCATION_CODEC = (cls, "location", serialize, deserialize)


# --- CBOR writing (strict RFC 7049 subset, indefinite containers) ---

def _w_head(out, major, value):
    if value < 24:
        out.append((major << 5) | value)
    elif value <= 0xFF:
        out.append((major << 5) | 24)
        out.append(value)
    elif value <= 0xFFFF:
        out.append((major << 5) | 25)
        out.extend(value.to_bytes(2, "big"))
    elif value <= 0xFFFFFFFF:
        out.append((major << 5) | 26)
        out.extend(value.to_bytes(4, "big"))
    else:
        out.append((major << 5) | 27)
        out.extend(value.to_bytes(8, "big"))


def _w_int(out, value):
    if value >= 0:
        if value > 0x7FFFFFFFFFFFFFFF:
            raise ValueError("integer exceeds 2**63-1")
        _w_head(out, 0, value)
    else:
        if value < -0x8000000000000000:
            raise ValueError("integer precedes -2**63")
        _w_head(out, 1, -1 - value)


def _w_float(out, value):
    out.append(0xFB)
    out.extend(struct.pack(">d", value))


def _w_text(out, value):
    encoded = value.encode("utf-8")
    _w_head(out, 3, len(encoded))
    out.extend(encoded)


def _w_bytes(out, value):
    _w_head(out, 2, len(value))
    out.extend(value)


def _w_value(out, value):
    if value is None:
        out.append(0xF6)
    elif value is True:
        out.append(0xF5)
    elif value is False:
        out.append(0xF4)
    elif isinstance(value, int):
        _w_int(out, value)
    elif isinstance(value, float):
        _w_float(out, value)
    elif isinstance(value, str):
        _w_text(out, value)
    elif isinstance(value, (bytes, bytearray)):
        _w_bytes(out, bytes(value))
    elif isinstance(value, (list, tuple)):
        out.append(0x9F)
        for item in value:
            _w_value(out, item)
        out.append(0xFF)
    elif isinstance(value, dict):
        out.append(0xBF)
        for key, item in value.items():
            _w_text(out, key)
            _w_value(out, item)
        out.append(0xFF)
    else:
        raise ValueError("unsupported payload value %r" % (value,))


def _w_prim(out, serdes, value):
    if serdes == "bool":
        out.append(0xF5 if value else 0xF4)
    elif serdes == "int":
        _w_int(out, value)
    elif serdes == "float":
        _w_float(out, float(value))
    elif serdes == "string":
        _w_text(out, value)
    else:
        _w_bytes(out, bytes(value))


# --- CBOR reading ---

def _r_head(buf, pos):
    if pos >= len(buf):
        raise ValueError("unexpected end of input")
    initial = buf[pos]
    pos += 1
    major = initial >> 5
    ai = initial & 0x1F
    if ai < 24:
        return major, ai, ai, False, pos
    if ai == 24:
        width = 1
    elif ai == 25:
        width = 2
    elif ai == 26:
        width = 4
    elif ai == 27:
        width = 8
    elif ai == 31:
        return major, ai, 0, True, pos
    else:
        raise ValueError("reserved additional-information value")
    if pos + width > len(buf):
        raise ValueError("unexpected end of input")
    value = int.from_bytes(buf[pos:pos + width], "big")
    return major, ai, value, False, pos + width


def _r_chunks(buf, pos, major, value, indefinite):
    if not indefinite:
        if pos + value > len(buf):
            raise ValueError("length runs past end of input")
        return bytes(buf[pos:pos + value]), pos + value
    parts = []
    while True:
        if pos >= len(buf):
            raise ValueError("unterminated indefinite-length item")
        if buf[pos] == 0xFF:
            return b"".join(parts), pos + 1
        chunk_major, _ai, chunk_len, chunk_indef, pos = _r_head(buf, pos)
        if chunk_major != major or chunk_indef:
            raise ValueError("bad indefinite-length string chunk")
        if pos + chunk_len > len(buf):
            raise ValueError("length runs past end of input")
        parts.append(bytes(buf[pos:pos + chunk_len]))
        pos += chunk_len


def _decode_item(buf, pos):
    major, ai, value, indefinite, pos = _r_head(buf, pos)
    while major == 6:
        if indefinite:
            raise ValueError("tag with indefinite argument")
        major, ai, value, indefinite, pos = _r_head(buf, pos)
    if major == 0:
        if value > 0x7FFFFFFFFFFFFFFF:
            raise ValueError("unsigned integer exceeds 2**63-1")
        return value, pos
    if major == 1:
        if value > 0x7FFFFFFFFFFFFFFF:
            raise ValueError("negative integer precedes -2**63")
        return -1 - value, pos
    if major == 2:
        return _r_chunks(buf, pos, 2, value, indefinite)
    if major == 3:
        raw, pos = _r_chunks(buf, pos, 3, value, indefinite)
        return raw.decode("utf-8"), pos
    if major == 4:
        items = []
        if indefinite:
            while True:
                if pos >= len(buf):
                    raise ValueError("unterminated indefinite-length item")
                if buf[pos] == 0xFF:
                    return items, pos + 1
                item, pos = _decode_item(buf, pos)
                items.append(item)
        for _ in range(value):
            item, pos = _decode_item(buf, pos)
            items.append(item)
        return items, pos
    if major == 5:
        entries = {}

        def read_pair(pos):
            key, pos = _decode_item(buf, pos)
            if not isinstance(key, str):
                raise ValueError("map key is not a UTF-8 string")
            item, pos = _decode_item(buf, pos)
            entries[key] = item
            return pos

        if indefinite:
            while True:
                if pos >= len(buf):
                    raise ValueError("unterminated indefinite-length item")
                if buf[pos] == 0xFF:
                    return entries, pos + 1
                pos = read_pair(pos)
        for _ in range(value):
            pos = read_pair(pos)
        return entries, pos
    # major 7
    if ai == 20:
        return False, pos
    if ai == 21:
        return True, pos
    if ai == 22:
        return None, pos
    if ai == 23:
        raise ValueError("undefined is not supported")
    if ai in (25, 26):
        raise ValueError("half- and single-precision floats are not supported")
    if ai == 27:
        return struct.unpack(">d", value.to_bytes(8, "big"))[0], pos
    if ai == 31:
        raise ValueError("break outside indefinite-length item")
    raise ValueError("unassigned simple value")


def _cbor_decode(data):
    value, pos = _decode_item(memoryview(data), 0)
    if pos != len(data):
        raise ValueError("trailing bytes after top-level item")
    return value


def _check_prim(serdes, value):
    if serdes == "bool" and isinstance(value, bool):
        return value
    if serdes == "int" and isinstance(value, int) and not isinstance(value, bool):
        return value
    if serdes == "float" and isinstance(value, float):
        return value
    if serdes == "string" and isinstance(value, str):
        return value
    if serdes == "bytes" and isinstance(value, bytes):
        return value
    raise ValueError("unexpected CBOR value for %s field" % serdes)


class _LinkTable:
    def __init__(self):
        self.ids = {}
        self.paths = {}
        self._next = 0

    def request(self, addr):
        if addr not in self.ids:
            self.ids[addr] = self._next
            self._next += 1
        return self.ids[addr]

    def note(self, addr, path):
        ident = self.ids.get(addr)
        if ident is not None:
            self.paths[ident] = path

    def write_into(self, out):
        if not self.ids:
            return
        _w_text(out, "links")
        out.append(0xBF)
        for ident in sorted(self.ids.values()):
            if ident not in self.paths:
                raise ValueError("link target outside the serialized tree")
            _w_text(out, str(ident))
            out.append(0x9F)
            for step in self.paths[ident]:
                if isinstance(step, int):
                    _w_int(out, step)
                else:
                    _w_text(out, step)
            out.append(0xFF)
        out.append(0xFF)


def _cls_of(name):
    return TYPE_REGISTRY_ALL[name]


def _read_node(entries, expected, path, built, pending):
    type_name = entries.get("type")
    node_cls = TYPE_REGISTRY.get(type_name)
    if node_cls is None:
        raise ValueError("unknown node type %r" % (type_name,))
    if not issubclass(node_cls, expected):
        raise ValueError(
            "node type %s does not descend from %s" % (type_name, expected.__name__)
        )
    node = node_cls.__new__(node_cls)
    node.annotations = {}
    built[tuple(path)] = node
    for name, kind, target in node_cls.FIELDS:
        if name not in entries:
            raise ValueError("missing key %r" % name)
        value = entries[name]
        if kind in ("maybe", "one"):
            if value is None:
                setattr(node, name, None)
            else:
                if not isinstance(value, dict):
                    raise ValueError("field %r is not a node map" % name)
                child = _read_node(value, _cls_of(target), path + (name,), built, pending)
                setattr(node, name, child)
        elif kind in ("any", "many"):
            if not isinstance(value, list):
                raise ValueError("field %r is not an array" % name)
            items = []
            for index, entry in enumerate(value):
                if not isinstance(entry, dict):
                    raise ValueError("field %r element is not a node map" % name)
                items.append(
                    _read_node(entry, _cls_of(target), path + (name, index), built, pending)
                )
            setattr(node, name, items)
        elif kind == "link":
            setattr(node, name, None)
            if value is not None:
                if isinstance(value, bool) or not isinstance(value, int):
                    raise ValueError("link id is not an integer")
                pending.append(
                    (value, lambda target_node, node=node, name=name: setattr(node, name, target_node))
                )
        elif kind == "enum":
            if isinstance(value, bool) or not isinstance(value, int):
                raise ValueError("enumeration ordinal is not an integer")
            setattr(node, name, value)
        else:
            setattr(node, name, _check_prim(target, value))
    if _HAS_LOCATION and _LOCATION_CODEC is not None and "location" in entries:
        loc_cls, _name, _ser, de = _LOCATION_CODEC
        node.annotations[loc_cls] = de(entries["location"])
    for key, value in entries.items():
        if key.startswith("{") and key.endswith("}"):
            codec = _ANNOTATIONS_BY_KEY.get(key)
            if codec is not None:
                ann_cls, _name, _ser, de = codec
                node.annotations[ann_cls] = de(value)
    return node


class Node:
    """Base class of every generated node type."""

    TYPE_NAME = None
    TYPE_ID = None
    IS_ERROR = False
    VISIT_NAME = None
    FIELDS = ()

    def __init__(self):
        if type(self).TYPE_NAME is None:
            raise TypeError("%s is abstract" % type(self).__name__)
        self.annotations = {}

    def _check_field(self, name, kind, target, value):
        if kind in ("maybe", "one", "link"):
            if value is not None and not isinstance(value, _cls_of(target)):
                raise TypeError(
                    "field %s expects %s, got %s" % (name, target, type(value).__name__)
                )
            return value
        items = list(value or [])
        for child in items:
            if not isinstance(child, _cls_of(target)):
                raise TypeError(
                    "field %s expects a sequence of %s" % (name, target)
                )
        return items

    def type_of(self):
        return self.TYPE_NAME

    def copy(self):
        """Shallow clone: children and link targets stay shared."""
        clone = self.__class__.__new__(self.__class__)
        clone.annotations = dict(self.annotations)
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("any", "many"):
                value = list(value)
            setattr(clone, name, value)
        return clone

    def clone(self):
        """Deep clone with link remapping into the cloned subtree."""
        memo = {}
        clone = self._clone_with(memo)
        clone._remap_links(memo)
        return clone

    def _clone_with(self, memo):
        clone = self.__class__.__new__(self.__class__)
        clone.annotations = dict(self.annotations)
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("maybe", "one"):
                if value is not None:
                    child = value._clone_with(memo)
                    memo[id(value)] = child
                    value = child
            elif kind in ("any", "many"):
                items = []
                for child in value:
                    cloned = child._clone_with(memo)
                    memo[id(child)] = cloned
                    items.append(cloned)
                value = items
            setattr(clone, name, value)
        return clone

    def _remap_links(self, memo):
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("maybe", "one"):
                if value is not None:
                    value._remap_links(memo)
            elif kind in ("any", "many"):
                for child in value:
                    child._remap_links(memo)
            elif kind == "link":
                if value is not None and id(value) in memo:
                    setattr(self, name, memo[id(value)])

    def equals(self, other):
        """Structural equality; links compare by target identity."""
        if type(self) is not type(other):
            return False
        for name, kind, _target in self.FIELDS:
            mine = getattr(self, name)
            theirs = getattr(other, name)
            if kind in ("maybe", "one"):
                if (mine is None) != (theirs is None):
                    return False
                if mine is not None and not mine.equals(theirs):
                    return False
            elif kind in ("any", "many"):
                if len(mine) != len(theirs):
                    return False
                for a, b in zip(mine, theirs):
                    if not a.equals(b):
                        return False
            elif kind == "link":
                if mine is not theirs:
                    return False
            elif mine != theirs:
                return False
        return True

    __eq__ = equals
    __hash__ = object.__hash__

    def visit(self, visitor):
        """Calls the most specific visitor method that exists."""
        for cls in type(self).__mro__:
            name = getattr(cls, "VISIT_NAME", None)
            if name is None:
                continue
            method = getattr(visitor, name, None)
            if method is not None:
                return method(self)
        return None

    def dump(self, indent=0):
        lines = []
        self._dump_into(lines, indent)
        return "\n".join(lines) + "\n"

    def _dump_into(self, lines, indent):
        pad = "  " * indent
        lines.append("%s%s {" % (pad, self.TYPE_NAME))
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("maybe", "one"):
                if value is None:
                    lines.append("%s  %s: -" % (pad, name))
                else:
                    lines.append("%s  %s:" % (pad, name))
                    value._dump_into(lines, indent + 2)
            elif kind in ("any", "many"):
                lines.append("%s  %s[%d]:" % (pad, name, len(value)))
                for child in value:
                    child._dump_into(lines, indent + 2)
            elif kind == "link":
                lines.append(
                    "%s  %s: %s" % (pad, name, "<link>" if value is not None else "<unset>")
                )
            else:
                lines.append("%s  %s: %r" % (pad, name, value))
        lines.append(pad + "}")

    def check_complete(self):
        """Raises IncompleteTreeError unless the subtree is complete."""
        owned = set()
        self._collect_owned(owned)
        self._check_in(owned)

    def _collect_owned(self, owned):
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("maybe", "one"):
                if value is not None:
                    owned.add(id(value))
                    value._collect_owned(owned)
            elif kind in ("any", "many"):
                for child in value:
                    owned.add(id(child))
                    child._collect_owned(owned)

    def _check_in(self, owned):
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind == "one":
                if value is None:
                    raise IncompleteTreeError(
                        "field `%s` of `%s` is not set" % (name, self.TYPE_NAME)
                    )
                value._check_in(owned)
            elif kind == "maybe":
                if value is not None:
                    value._check_in(owned)
            elif kind in ("any", "many"):
                if kind == "many" and not value:
                    raise IncompleteTreeError(
                        "field `%s` of `%s` is empty" % (name, self.TYPE_NAME)
                    )
                for child in value:
                    child._check_in(owned)
            elif kind == "link":
                if value is None or id(value) not in owned:
                    raise IncompleteTreeError(
                        "link `%s` of `%s` does not resolve in this tree"
                        % (name, self.TYPE_NAME)
                    )

    def serialize(self):
        """Encodes this node as a tree root, CBOR-compatible with the
        native model."""
        table = _LinkTable()
        self._collect_links(table)
        out = bytearray()
        out.append(0xBF)
        table.note(id(self), ())
        self._write_entries(out, table, [])
        table.write_into(out)
        out.append(0xFF)
        return bytes(out)

    def _collect_links(self, table):
        for name, kind, _target in self.FIELDS:
            value = getattr(self, name)
            if kind in ("maybe", "one"):
                if value is not None:
                    value._collect_links(table)
            elif kind in ("any", "many"):
                for child in value:
                    child._collect_links(table)
            elif kind == "link":
                if value is not None:
                    table.request(id(value))

    def _write_entries(self, out, table, path):
        _w_text(out, "type")
        _w_text(out, self.TYPE_NAME)
        for name, kind, target in self.FIELDS:
            value = getattr(self, name)
            _w_text(out, name)
            if kind in ("maybe", "one"):
                if value is None:
                    out.append(0xF6)
                else:
                    path.append(name)
                    table.note(id(value), tuple(path))
                    out.append(0xBF)
                    value._write_entries(out, table, path)
                    out.append(0xFF)
                    path.pop()
            elif kind in ("any", "many"):
                out.append(0x9F)
                path.append(name)
                for index, child in enumerate(value):
                    path.append(index)
                    table.note(id(child), tuple(path))
                    out.append(0xBF)
                    child._write_entries(out, table, path)
                    out.append(0xFF)
                    path.pop()
                path.pop()
                out.append(0xFF)
            elif kind == "link":
                if value is None:
                    out.append(0xF6)
                else:
                    _w_int(out, table.ids[id(value)])
            elif kind == "enum":
                _w_int(out, value)
            else:
                _w_prim(out, target, value)
        if _HAS_LOCATION and _LOCATION_CODEC is not None:
            loc_cls, _name, ser, _de = _LOCATION_CODEC
            value = self.annotations.get(loc_cls)
            if value is not None:
                _w_text(out, "location")
                _w_value(out, ser(value))
        for ann_cls, name, ser, _de in _ANNOTATION_CODECS:
            value = self.annotations.get(ann_cls)
            if value is not None:
                _w_text(out, "{" + name + "}")
                _w_value(out, ser(value))

    @classmethod
    def deserialize(cls, data):
        """Decodes a tree rooted at this type."""
        obj = _cbor_decode(data)
        if not isinstance(obj, dict):
            raise ValueError("top-level CBOR item is not a map")
        links = obj.get("links") or {}
        paths = {int(key): tuple(path) for key, path in links.items()}
        built = {}
        pending = []
        node = _read_node(obj, cls, (), built, pending)
        for ident, setter in pending:
            if ident not in paths:
                raise ValueError("link id missing from links table")
            target = built.get(paths[ident])
            if target is None:
                raise ValueError("link path does not name a node")
            setter(target)
        return node
"#;
