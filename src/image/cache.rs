//! LRU cache of decompressed chunks for the random-access reader

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Bounded chunk cache with LRU eviction.
///
/// Holds `Arc`s so hits hand out the buffer without copying the data.
pub(crate) struct ChunkCache {
    cache: HashMap<usize, Arc<Vec<u8>>>,
    lru_queue: VecDeque<usize>,
    capacity: usize,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: HashMap::new(),
            lru_queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, chunk_index: usize) -> Option<Arc<Vec<u8>>> {
        if let Some(data) = self.cache.get(&chunk_index) {
            // Move to front of LRU
            self.lru_queue.retain(|&x| x != chunk_index);
            self.lru_queue.push_front(chunk_index);
            return Some(Arc::clone(data));
        }
        None
    }

    pub fn insert(&mut self, chunk_index: usize, data: Arc<Vec<u8>>) {
        if self.cache.insert(chunk_index, data).is_some() {
            self.lru_queue.retain(|&x| x != chunk_index);
        }
        self.lru_queue.push_front(chunk_index);

        while self.cache.len() > self.capacity {
            if let Some(old_index) = self.lru_queue.pop_back() {
                self.cache.remove(&old_index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}
