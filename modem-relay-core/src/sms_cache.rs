//! Per-chat SMS reference cache
//!
//! `/sms` hands out short IDs; `/deletesms <id>` resolves them back to object
//! paths. Each chat has its own map, replaced wholesale by its next listing.
//! The lock guards map access only and is never held across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::CacheMiss;
use crate::transport::ChatId;

/// Short ID to object path, per chat
#[derive(Debug, Default)]
pub struct SmsReferenceCache {
    chats: Mutex<HashMap<ChatId, HashMap<String, String>>>,
}

impl SmsReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn chats(&self) -> MutexGuard<'_, HashMap<ChatId, HashMap<String, String>>> {
        self.chats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace everything cached for `chat`
    pub fn replace(&self, chat: ChatId, references: HashMap<String, String>) {
        debug!("Caching {} SMS references for chat {}", references.len(), chat);
        self.chats().insert(chat, references);
    }

    /// Object path for a short ID
    pub fn resolve(&self, chat: ChatId, id: &str) -> Result<String, CacheMiss> {
        let chats = self.chats();
        let references = chats
            .get(&chat)
            .filter(|refs| !refs.is_empty())
            .ok_or(CacheMiss::Empty)?;
        references
            .get(id)
            .cloned()
            .ok_or_else(|| CacheMiss::UnknownId(id.to_string()))
    }

    /// Drop one ID after its message was deleted
    pub fn forget(&self, chat: ChatId, id: &str) {
        if let Some(references) = self.chats().get_mut(&chat) {
            references.remove(id);
        }
    }

    /// Number of IDs cached for `chat`
    pub fn len(&self, chat: ChatId) -> usize {
        self.chats().get(&chat).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[&str]) -> HashMap<String, String> {
        ids.iter()
            .map(|id| (id.to_string(), format!("/org/freedesktop/ModemManager1/SMS/{}", id)))
            .collect()
    }

    #[test]
    fn test_resolve_before_listing_is_empty_miss() {
        let cache = SmsReferenceCache::new();
        assert_eq!(cache.resolve(ChatId(1), "3"), Err(CacheMiss::Empty));
    }

    #[test]
    fn test_replace_discards_previous_listing() {
        let cache = SmsReferenceCache::new();
        cache.replace(ChatId(1), refs(&["3", "4"]));
        cache.replace(ChatId(1), refs(&["5"]));

        assert_eq!(
            cache.resolve(ChatId(1), "3"),
            Err(CacheMiss::UnknownId("3".to_string()))
        );
        assert_eq!(
            cache.resolve(ChatId(1), "5").unwrap(),
            "/org/freedesktop/ModemManager1/SMS/5"
        );
    }

    #[test]
    fn test_chats_are_isolated() {
        let cache = SmsReferenceCache::new();
        cache.replace(ChatId(1), refs(&["3"]));
        assert_eq!(cache.resolve(ChatId(2), "3"), Err(CacheMiss::Empty));
    }

    #[test]
    fn test_forget_then_empty() {
        let cache = SmsReferenceCache::new();
        cache.replace(ChatId(1), refs(&["3"]));
        cache.forget(ChatId(1), "3");
        assert_eq!(cache.len(ChatId(1)), 0);
        assert_eq!(cache.resolve(ChatId(1), "3"), Err(CacheMiss::Empty));
    }

    #[test]
    fn test_empty_listing_is_empty_miss() {
        let cache = SmsReferenceCache::new();
        cache.replace(ChatId(1), HashMap::new());
        assert_eq!(cache.resolve(ChatId(1), "1"), Err(CacheMiss::Empty));
    }
}
