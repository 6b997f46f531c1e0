use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Ordered reference sequences from the alignment header.
///
/// Reference ids are positions in header order, which is also the order
/// records and index entries are sorted by.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceDictionary {
    names: Vec<String>,
    lengths: Vec<u32>,
    name_to_id: FxHashMap<String, u32>,
}

impl ReferenceDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reference, returning its id. A repeated name keeps its first id.
    pub fn push(&mut self, name: &str, length: u32) -> u32 {
        if let Some(id) = self.name_to_id.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.lengths.push(length);
        self.name_to_id.insert(name.to_owned(), id);
        id
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|s| s.as_str())
    }

    pub fn get_len(&self, id: u32) -> Option<u32> {
        self.lengths.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
