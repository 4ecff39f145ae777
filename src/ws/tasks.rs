use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// At most one background loop per document.
///
/// `try_start` is an atomic check-and-set. The winner receives a
/// [`TaskTicket`]; a loop that fails to start calls `release` with its ticket,
/// which only clears the slot if it still belongs to that ticket. `stop`
/// cancels and clears regardless of owner.
#[derive(Default)]
pub struct RoomTasks {
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

struct Slot {
    generation: u64,
    cancel: CancellationToken,
}

/// Ownership of one document's slot, handed to the loop that won it.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub doc_id: String,
    pub generation: u64,
    pub cancel: CancellationToken,
}

impl RoomTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_start(&self, doc_id: &str) -> Option<TaskTicket> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if slots.contains_key(doc_id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        slots.insert(
            doc_id.to_string(),
            Slot {
                generation,
                cancel: cancel.clone(),
            },
        );
        Some(TaskTicket {
            doc_id: doc_id.to_string(),
            generation,
            cancel,
        })
    }

    /// Clear the slot held by `ticket`. Returns false if it was already taken over.
    pub fn release(&self, ticket: &TaskTicket) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        match slots.get(&ticket.doc_id) {
            Some(slot) if slot.generation == ticket.generation => {
                slots.remove(&ticket.doc_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel the document's loop, if any.
    pub fn stop(&self, doc_id: &str) -> bool {
        let removed = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.remove(doc_id)
        };
        match removed {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every loop.
    pub fn stop_all(&self) {
        let drained: Vec<Slot> = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            slot.cancel.cancel();
        }
    }

    pub fn is_active(&self, doc_id: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.contains_key(doc_id)
    }

    pub fn active_count(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_only_first_start_wins() {
        let tasks = RoomTasks::new();
        let ticket = tasks.try_start("doc");
        assert!(ticket.is_some());
        assert!(tasks.try_start("doc").is_none());
        assert!(tasks.try_start("other").is_some());
        assert_eq!(tasks.active_count(), 2);
    }

    #[test]
    fn test_release_frees_slot_for_retry() {
        let tasks = RoomTasks::new();
        let ticket = tasks.try_start("doc").unwrap();
        assert!(tasks.release(&ticket));
        assert!(!tasks.is_active("doc"));
        assert!(tasks.try_start("doc").is_some());
    }

    #[test]
    fn test_stale_release_leaves_new_owner_alone() {
        let tasks = RoomTasks::new();
        let old = tasks.try_start("doc").unwrap();
        assert!(tasks.stop("doc"));
        let new = tasks.try_start("doc").unwrap();

        assert!(!tasks.release(&old));
        assert!(tasks.is_active("doc"));
        assert!(!new.cancel.is_cancelled());
    }

    #[test]
    fn test_stop_cancels_token() {
        let tasks = RoomTasks::new();
        let ticket = tasks.try_start("doc").unwrap();
        assert!(tasks.stop("doc"));
        assert!(ticket.cancel.is_cancelled());
        assert!(!tasks.stop("doc"));
    }

    #[test]
    fn test_stop_all() {
        let tasks = RoomTasks::new();
        let a = tasks.try_start("a").unwrap();
        let b = tasks.try_start("b").unwrap();
        tasks.stop_all();
        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
        assert_eq!(tasks.active_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_winner() {
        let tasks = Arc::new(RoomTasks::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let tasks = Arc::clone(&tasks);
            handles.push(tokio::spawn(async move { tasks.try_start("doc").is_some() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
