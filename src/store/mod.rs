pub mod strings;
pub mod streams;

use crate::rdb::RdbEntry;
use std::path::Path;

/// The server's whole keyspace: a string table and a stream table,
/// addressed by disjoint key namespaces the same way real Redis keeps
/// one flat keyspace across value types — `TYPE` tells them apart.
#[derive(Default)]
pub struct Datastore {
    pub strings: strings::StringStore,
    pub streams: streams::StreamStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Stream,
    None,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_of(&self, key: &[u8]) -> ValueType {
        if self.strings.contains_live(key) {
            ValueType::String
        } else if self.streams.exists(key) {
            ValueType::Stream
        } else {
            ValueType::None
        }
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys = self.strings.keys();
        keys.extend(self.streams.keys());
        keys
    }

    pub fn load_rdb(&self, dir: &Path, dbfilename: &str) -> Result<(), crate::error::RdbError> {
        let entries: Vec<RdbEntry> = crate::rdb::load_file(dir, dbfilename)?;
        let count = entries.len();
        self.strings.load_from_rdb(entries);
        tracing::info!(keys = count, "loaded RDB snapshot");
        Ok(())
    }
}
