use std::collections::{HashMap, VecDeque};

use upqueue_protocol::{FileId, FileRecord};

/// FIFO of pending file records with lookup by id.
///
/// The head is the next file to transfer, or the one transferring now.
#[derive(Debug, Default)]
pub struct UploadQueue {
    order: VecDeque<FileId>,
    records: HashMap<FileId, FileRecord>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. A record with the same id already in the queue is
    /// replaced and moved to the back.
    pub fn push_back(&mut self, record: FileRecord) {
        let id = record.id;
        if self.records.insert(id, record).is_some() {
            self.order.retain(|queued| *queued != id);
        }
        self.order.push_back(id);
    }

    pub fn head_id(&self) -> Option<FileId> {
        self.order.front().copied()
    }

    pub fn get(&self, id: &FileId) -> Option<&FileRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &FileId) -> Option<&mut FileRecord> {
        self.records.get_mut(id)
    }

    /// Removes a record wherever it sits in the queue.
    pub fn remove(&mut self, id: &FileId) -> Option<FileRecord> {
        let record = self.records.remove(id)?;
        if self.order.front() == Some(id) {
            self.order.pop_front();
        } else {
            self.order.retain(|queued| queued != id);
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates records in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upqueue_protocol::{FileInfo, FileStatus};

    fn rec(id: u64) -> FileRecord {
        FileRecord::new(
            FileId::new(id),
            FileInfo::new(format!("f{id}"), 10, format!("/tmp/f{id}")),
        )
    }

    fn ids(queue: &UploadQueue) -> Vec<u64> {
        queue.iter().map(|r| r.id.raw()).collect()
    }

    #[test]
    fn fifo_order() {
        let mut q = UploadQueue::new();
        q.push_back(rec(1));
        q.push_back(rec(2));
        q.push_back(rec(3));
        assert_eq!(q.len(), 3);
        assert_eq!(q.head_id(), Some(FileId::new(1)));
        assert_eq!(ids(&q), vec![1, 2, 3]);
    }

    #[test]
    fn remove_from_middle_and_head() {
        let mut q = UploadQueue::new();
        for i in 1..=4 {
            q.push_back(rec(i));
        }
        assert!(q.remove(&FileId::new(3)).is_some());
        assert_eq!(ids(&q), vec![1, 2, 4]);

        assert!(q.remove(&FileId::new(1)).is_some());
        assert_eq!(q.head_id(), Some(FileId::new(2)));
        assert!(q.get(&FileId::new(1)).is_none());
    }

    #[test]
    fn remove_missing_is_none() {
        let mut q = UploadQueue::new();
        q.push_back(rec(1));
        assert!(q.remove(&FileId::new(9)).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn push_existing_id_moves_to_back() {
        let mut q = UploadQueue::new();
        q.push_back(rec(1));
        q.push_back(rec(2));

        let mut again = rec(1);
        again.status = FileStatus::Queued;
        q.push_back(again);

        assert_eq!(ids(&q), vec![2, 1]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut q = UploadQueue::new();
        q.push_back(rec(1));
        if let Some(r) = q.get_mut(&FileId::new(1)) {
            r.status = FileStatus::InProgress;
        }
        assert_eq!(
            q.get(&FileId::new(1)).map(|r| r.status),
            Some(FileStatus::InProgress)
        );
    }

    #[test]
    fn empty_queue() {
        let q = UploadQueue::new();
        assert!(q.is_empty());
        assert!(q.head_id().is_none());
    }
}
