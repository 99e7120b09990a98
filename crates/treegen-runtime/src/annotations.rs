//! Heterogeneous per-node annotations and the process-wide serialization
//! registry.
//!
//! A node may carry at most one annotation per Rust type, stored as a
//! shared handle. Serialization only covers annotation types that were
//! registered with a canonical name; everything else rides along in memory
//! and is dropped from the wire format.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{OnceLock, RwLock};

use indexmap::IndexMap;

use crate::cbor::{self, MapWriter, Slice};

type SerializeFn = Box<dyn Fn(&dyn Any, &mut MapWriter) -> cbor::Result<()> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(&Slice) -> cbor::Result<Box<dyn Any>> + Send + Sync>;

struct Codec {
    type_id: TypeId,
    key: String,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

#[derive(Default)]
struct Registry {
    codecs: Vec<Codec>,
    by_type: HashMap<TypeId, usize>,
    by_key: HashMap<String, usize>,
    location: Option<usize>,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

fn insert_codec(codec: Codec, location: bool) {
    let mut registry = registry().write().expect("annotation registry poisoned");
    if registry.by_type.contains_key(&codec.type_id) {
        return;
    }
    let index = registry.codecs.len();
    registry.by_type.insert(codec.type_id, index);
    registry.by_key.insert(codec.key.clone(), index);
    if location {
        registry.location = Some(index);
    }
    registry.codecs.push(codec);
}

fn wrap<T, S, D>(key: String, serialize: S, deserialize: D) -> Codec
where
    T: 'static,
    S: Fn(&T, &mut MapWriter) -> cbor::Result<()> + Send + Sync + 'static,
    D: Fn(&Slice) -> cbor::Result<T> + Send + Sync + 'static,
{
    Codec {
        type_id: TypeId::of::<T>(),
        key,
        serialize: Box::new(move |value: &dyn Any, writer: &mut MapWriter| {
            let value = value
                .downcast_ref::<T>()
                .ok_or_else(|| cbor::CborError::invalid("annotation type mismatch"))?;
            serialize(value, writer)
        }),
        deserialize: Box::new(move |slice: &Slice| {
            let value: Box<dyn Any> = Box::new(deserialize(slice)?);
            Ok(value)
        }),
    }
}

/// Registers a serializable annotation type under its canonical name.
///
/// The wire key is the name wrapped in braces; the serialize callback
/// fills the payload map, the deserialize callback rebuilds the value
/// from it. Must be called before the first serialization; re-registering
/// replaces nothing and later lookups keep using the first registration.
pub fn register<T, S, D>(name: &str, serialize: S, deserialize: D)
where
    T: 'static,
    S: Fn(&T, &mut MapWriter) -> cbor::Result<()> + Send + Sync + 'static,
    D: Fn(&Slice) -> cbor::Result<T> + Send + Sync + 'static,
{
    insert_codec(
        wrap::<T, S, D>(format!("{{{name}}}"), serialize, deserialize),
        false,
    );
}

/// Registers the source-location tracker type.
///
/// Location annotations use the reserved `location` wire key rather than
/// the braced annotation form, and are only emitted by generated code for
/// trees whose description enables location tracking.
pub fn register_location<T, S, D>(serialize: S, deserialize: D)
where
    T: 'static,
    S: Fn(&T, &mut MapWriter) -> cbor::Result<()> + Send + Sync + 'static,
    D: Fn(&Slice) -> cbor::Result<T> + Send + Sync + 'static,
{
    insert_codec(
        wrap::<T, S, D>("location".to_string(), serialize, deserialize),
        true,
    );
}

/// Per-object annotation map: at most one value per Rust type, held by
/// shared handle so that copying a node shares its annotations.
#[derive(Default, Clone)]
pub struct Annotations {
    entries: HashMap<TypeId, Rc<dyn Any>>,
}

impl std::fmt::Debug for Annotations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotations")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous annotation of the same type.
    pub fn set<T: 'static>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Rc::new(value));
    }

    /// Shared handle to the annotation of type `T`, if present.
    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    pub fn remove<T: 'static>(&mut self) -> bool {
        self.entries.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends one `{"{Name}": {...}}` entry per registered annotation on
    /// this node, in registration order. Unregistered annotations are
    /// skipped silently.
    pub fn serialize_into(&self, writer: &mut MapWriter) -> cbor::Result<()> {
        let registry = registry().read().expect("annotation registry poisoned");
        for (index, codec) in registry.codecs.iter().enumerate() {
            if registry.location == Some(index) {
                continue;
            }
            if let Some(value) = self.entries.get(&codec.type_id) {
                let mut payload = writer.start_map(&codec.key)?;
                (codec.serialize)(value.as_ref(), &mut payload)?;
                payload.close()?;
            }
        }
        Ok(())
    }

    /// Restores annotations from the entries of a node map. Keys in the
    /// `{...}` form that match a registered codec are rebuilt; everything
    /// else is ignored.
    pub fn deserialize_from(&mut self, entries: &IndexMap<String, Slice<'_>>) -> cbor::Result<()> {
        let registry = registry().read().expect("annotation registry poisoned");
        for (key, slice) in entries {
            if !(key.starts_with('{') && key.ends_with('}')) {
                continue;
            }
            if let Some(&index) = registry.by_key.get(key) {
                let codec = &registry.codecs[index];
                let value = (codec.deserialize)(slice)?;
                self.entries.insert(codec.type_id, Rc::from(value));
            }
        }
        Ok(())
    }

    /// Writes the reserved `location` entry if both a location codec and a
    /// location annotation are present.
    pub fn serialize_location(&self, writer: &mut MapWriter) -> cbor::Result<()> {
        let registry = registry().read().expect("annotation registry poisoned");
        let Some(index) = registry.location else {
            return Ok(());
        };
        let codec = &registry.codecs[index];
        if let Some(value) = self.entries.get(&codec.type_id) {
            let mut payload = writer.start_map(&codec.key)?;
            (codec.serialize)(value.as_ref(), &mut payload)?;
            payload.close()?;
        }
        Ok(())
    }

    /// Restores the reserved `location` entry.
    pub fn deserialize_location(&mut self, slice: &Slice<'_>) -> cbor::Result<()> {
        let registry = registry().read().expect("annotation registry poisoned");
        let Some(index) = registry.location else {
            return Ok(());
        };
        let codec = &registry.codecs[index];
        let value = (codec.deserialize)(slice)?;
        self.entries.insert(codec.type_id, Rc::from(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(i64);

    #[test]
    fn set_get_and_shared_copy() {
        let mut annotations = Annotations::new();
        annotations.set(Marker(7));
        let copied = annotations.clone();
        let original = annotations.get::<Marker>().unwrap();
        let shared = copied.get::<Marker>().unwrap();
        assert!(Rc::ptr_eq(&original, &shared));
        assert_eq!(*shared, Marker(7));
    }

    #[test]
    fn replaces_same_type() {
        let mut annotations = Annotations::new();
        annotations.set(Marker(1));
        annotations.set(Marker(2));
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.get::<Marker>().unwrap().0, 2);
    }

    #[test]
    fn unregistered_types_are_skipped() {
        struct Unregistered;
        let mut annotations = Annotations::new();
        annotations.set(Unregistered);

        let mut writer = crate::cbor::Writer::new();
        let mut map = writer.start();
        annotations.serialize_into(&mut map).unwrap();
        map.close().unwrap();
        // Nothing but the empty top-level map.
        assert_eq!(writer.into_bytes().unwrap(), vec![0xbf, 0xff]);
    }
}
