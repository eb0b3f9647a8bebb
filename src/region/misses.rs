use crate::cache::entry::LocalId;
use itertools::Itertools;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CacheMissType {
    /// Nothing is known about the object
    Full = 0,
    /// Known, but with another crc
    Crc = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheMissRequest {
    pub local_id: LocalId,
    pub miss_type: CacheMissType,
}

/// Misses collected since the last flush, in the order they happened.
#[derive(Debug, Default)]
pub struct CacheMissList {
    requests: Vec<CacheMissRequest>,
}

impl CacheMissList {
    pub fn add(&mut self, local_id: LocalId, miss_type: CacheMissType) {
        self.requests.push(CacheMissRequest { local_id, miss_type });
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, local_id: LocalId) -> bool {
        self.requests.iter().any(|request| request.local_id == local_id)
    }

    /// Empties the list into messages of at most `batch_size` requests.
    pub fn drain_batches(&mut self, batch_size: usize) -> Vec<Vec<CacheMissRequest>> {
        let batch_size = batch_size.max(1);
        std::mem::take(&mut self.requests)
            .into_iter()
            .chunks(batch_size)
            .into_iter()
            .map(|chunk| chunk.collect_vec())
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_capped() {
        let mut misses = CacheMissList::default();
        for id in 1..=600 {
            misses.add(id, if id % 2 == 0 { CacheMissType::Crc } else { CacheMissType::Full });
        }

        let batches = misses.drain_batches(255);
        assert_eq!(batches.iter().map(Vec::len).collect_vec(), vec![255, 255, 90]);
        assert_eq!(batches[0][0].local_id, 1);
        assert_eq!(batches[0][1].miss_type, CacheMissType::Crc);
        assert!(misses.is_empty());
        assert!(misses.drain_batches(255).is_empty());
    }
}
