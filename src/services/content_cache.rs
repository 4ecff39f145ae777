use std::collections::HashMap;
use tokio::sync::RwLock;

/// Latest accepted edit content per document. Last write wins; entries
/// outlive their rooms and are only replaced, never cleared.
#[derive(Default)]
pub struct ContentCache {
    docs: RwLock<HashMap<String, String>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, doc_id: &str, content: &str) {
        let mut docs = self.docs.write().await;
        docs.insert(doc_id.to_string(), content.to_string());
    }

    pub async fn get(&self, doc_id: &str) -> Option<String> {
        self.docs.read().await.get(doc_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}
