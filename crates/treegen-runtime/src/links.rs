//! Link-id bookkeeping for serialization and deserialization.
//!
//! Owning edges serialize by recursion; non-owning `Link` edges serialize
//! as small integer ids. The tree root carries a `links` table mapping each
//! id to the path of field-name and index steps from the root to the
//! target node, which is what lets the other side patch the references
//! back in after the whole tree exists.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::cbor::{self, CborError, MapWriter, Slice};

/// One step of a root-relative node path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathStep {
    Field(SmolStr),
    Index(usize),
}

/// Serialization-side table. Phase one of a generated `serialize` walks
/// the tree requesting an id for every link target; phase two emits the
/// nodes, noting the path of each node that was requested, and finally
/// writes the table itself.
#[derive(Default)]
pub struct LinkTable {
    ids: HashMap<usize, u64>,
    paths: HashMap<u64, Vec<PathStep>>,
    next: u64,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for the node at `addr`, assigning the next one on first use.
    pub fn request(&mut self, addr: usize) -> u64 {
        *self.ids.entry(addr).or_insert_with(|| {
            let id = self.next;
            self.next += 1;
            id
        })
    }

    pub fn lookup(&self, addr: usize) -> Option<u64> {
        self.ids.get(&addr).copied()
    }

    /// Records the root-relative path of a node, if some link targets it.
    pub fn note_path(&mut self, addr: usize, path: &[PathStep]) {
        if let Some(id) = self.ids.get(&addr) {
            self.paths.insert(*id, path.to_vec());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Writes the `links` entry at the root map. Fails if some link target
    /// was never visited by the owning walk, i.e. the target lives outside
    /// the tree being serialized.
    pub fn write_into(&self, writer: &mut MapWriter) -> cbor::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut table = writer.start_map("links")?;
        let mut ids: Vec<u64> = self.ids.values().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let path = self.paths.get(&id).ok_or_else(|| {
                CborError::invalid("link target outside the serialized tree")
            })?;
            let mut steps = table.start_array(&id.to_string())?;
            for step in path {
                match step {
                    PathStep::Field(name) => steps.write_string(name)?,
                    PathStep::Index(index) => steps.write_int(*index as i64)?,
                }
            }
            steps.close()?;
        }
        table.close()
    }
}

/// Parses the `links` table from a root node map, if present.
pub fn read_table(
    entries: &IndexMap<String, Slice<'_>>,
) -> cbor::Result<HashMap<u64, Vec<PathStep>>> {
    let mut paths = HashMap::new();
    let Some(table) = entries.get("links") else {
        return Ok(paths);
    };
    for (key, value) in table.as_map()? {
        let id: u64 = key
            .parse()
            .map_err(|_| CborError::invalid("links table key is not an id"))?;
        let mut path = Vec::new();
        for step in value.as_array()? {
            if step.is_int() {
                let index = usize::try_from(step.as_int()?)
                    .map_err(|_| CborError::invalid("negative index in link path"))?;
                path.push(PathStep::Index(index));
            } else {
                path.push(PathStep::Field(SmolStr::from(step.as_string()?)));
            }
        }
        paths.insert(id, path);
    }
    Ok(paths)
}

type Fill = Box<dyn FnOnce(Rc<dyn Any>) -> cbor::Result<()>>;

/// Deferred link-field setter produced by a generated `read_value`: once
/// the holder node has its final handle, the fill runs against the holder
/// value and the resolved target handle.
pub type LinkFill<T> = Box<dyn FnOnce(&mut T, Rc<dyn Any>) -> cbor::Result<()>>;

/// Deserialization-side resolver. While a generated `deserialize` builds
/// the owning tree it registers every node under its path and defers one
/// callback per link field; [`LinkResolver::resolve`] then runs the
/// callbacks against the finished tree.
pub struct LinkResolver {
    paths: HashMap<u64, Vec<PathStep>>,
    built: HashMap<Vec<PathStep>, Rc<dyn Any>>,
    pending: Vec<(u64, Fill)>,
}

impl LinkResolver {
    pub fn new(paths: HashMap<u64, Vec<PathStep>>) -> Self {
        Self {
            paths,
            built: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn note_built(&mut self, path: &[PathStep], handle: Rc<dyn Any>) {
        self.built.insert(path.to_vec(), handle);
    }

    pub fn defer(&mut self, id: u64, fill: Fill) {
        self.pending.push((id, fill));
    }

    /// Patches all deferred links. Every id must appear in the table and
    /// every path must name a node built during this deserialization.
    pub fn resolve(self) -> cbor::Result<()> {
        for (id, fill) in self.pending {
            let path = self
                .paths
                .get(&id)
                .ok_or_else(|| CborError::invalid("link id missing from links table"))?;
            let handle = self
                .built
                .get(path)
                .ok_or_else(|| CborError::invalid("link path does not name a node"))?;
            fill(handle.clone())?;
        }
        Ok(())
    }
}

/// Downcasts a resolved handle to the node type a link field expects.
pub fn downcast_link<T: 'static>(handle: Rc<dyn Any>) -> cbor::Result<Rc<RefCell<T>>> {
    handle
        .downcast::<RefCell<T>>()
        .map_err(|_| CborError::invalid("link target has an unexpected type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{Reader, Writer};

    #[test]
    fn table_round_trip() {
        let mut table = LinkTable::new();
        let id = table.request(0x1000);
        assert_eq!(table.request(0x1000), id);
        table.note_path(
            0x1000,
            &[PathStep::Field("body".into()), PathStep::Index(2)],
        );

        let mut writer = Writer::new();
        let mut map = writer.start();
        table.write_into(&mut map).unwrap();
        map.close().unwrap();

        let reader = Reader::new(writer.into_bytes().unwrap()).unwrap();
        let entries = reader.root().as_map().unwrap();
        let paths = read_table(&entries).unwrap();
        assert_eq!(
            paths[&id],
            vec![PathStep::Field("body".into()), PathStep::Index(2)]
        );
    }

    #[test]
    fn unvisited_target_is_an_error() {
        let mut table = LinkTable::new();
        table.request(0xdead);
        let mut writer = Writer::new();
        let mut map = writer.start();
        assert!(table.write_into(&mut map).is_err());
    }
}
