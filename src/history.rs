//! Finished documents, most recent first.
//!
//! Only the controller appends. Everything else gets shared, immutable
//! snapshots.

use crate::document::{DocumentId, ProcessedDocument};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<Arc<ProcessedDocument>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finalized document at the front.
    pub(crate) fn push_front(&mut self, doc: Arc<ProcessedDocument>) {
        self.entries.push_front(doc);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: DocumentId) -> Option<Arc<ProcessedDocument>> {
        self.entries.iter().find(|d| d.id == id).cloned()
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcessedDocument>> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Arc<ProcessedDocument>> {
        self.entries.iter().cloned().collect()
    }
}
