//! Armed/consumed state that carries a listing click over to the detail page.

use crate::SessionStorage;
use mb_core::AutoContext;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::Clock;
use std::sync::Arc;

pub const AUTO_FLAG_KEY: &str = "ma_player_auto_detail_open_ts";
pub const AUTO_CONTEXT_KEY: &str = "ma_player_auto_detail_context_v1";
/// Freshness window of an armed state.
pub const AUTO_MAX_AGE_MS: u64 = 2 * 60 * 1000;

/// Reads and writes the two auto-continuation keys of one origin's session storage.
#[derive(Clone)]
pub struct AutoContinuationStore {
    storage: SessionStorage,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AutoContinuationStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AutoContinuationStore")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl AutoContinuationStore {
    pub fn new(storage: SessionStorage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    /// Stamps the current time and stores `context` next to it.
    pub fn arm(&self, origin: &str, context: &AutoContext) -> BridgeResult<()> {
        let encoded = serde_json::to_string(context).map_err(|error| {
            BridgeError::new(
                "storage.context_encode_failed",
                format!("failed to encode auto context: {error}"),
            )
        })?;
        let now = self.clock.now_millis();

        self.storage.set_item(origin, AUTO_FLAG_KEY, &now.to_string())?;
        self.storage.set_item(origin, AUTO_CONTEXT_KEY, &encoded)?;
        tracing::debug!(origin, armed_at = now, href = %context.href, "armed auto-continuation");
        Ok(())
    }

    /// Stored timestamp, when it parses as a positive integer.
    pub fn armed_at(&self, origin: &str) -> BridgeResult<Option<u64>> {
        let raw = self.storage.get_item(origin, AUTO_FLAG_KEY)?;
        Ok(raw
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|stamp| *stamp > 0))
    }

    /// Whether an armed state exists and is still inside the freshness window.
    pub fn is_armed(&self, origin: &str) -> BridgeResult<bool> {
        let Some(armed_at) = self.armed_at(origin)? else {
            return Ok(false);
        };
        let age = self.clock.now_millis().saturating_sub(armed_at);
        Ok(age <= AUTO_MAX_AGE_MS)
    }

    /// Stored context. Corrupt or non-object JSON is discarded and reads as `None`.
    pub fn load(&self, origin: &str) -> BridgeResult<Option<AutoContext>> {
        let Some(raw) = self.storage.get_item(origin, AUTO_CONTEXT_KEY)? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }

        let context = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|value| AutoContext::from_value(&value));
        if context.is_none() {
            tracing::debug!(origin, "discarding corrupt auto context");
            self.storage.remove_item(origin, AUTO_CONTEXT_KEY)?;
        }
        Ok(context)
    }

    /// Fresh context, when the armed state is inside the window.
    pub fn peek(&self, origin: &str) -> BridgeResult<Option<AutoContext>> {
        if !self.is_armed(origin)? {
            return Ok(None);
        }
        self.load(origin)
    }

    /// Reads the context and deletes both keys.
    pub fn consume(&self, origin: &str) -> BridgeResult<Option<AutoContext>> {
        self.storage.remove_item(origin, AUTO_FLAG_KEY)?;
        let context = self.load(origin)?;
        self.storage.remove_item(origin, AUTO_CONTEXT_KEY)?;
        tracing::debug!(origin, has_context = context.is_some(), "consumed auto-continuation");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::AUTO_CONTEXT_KEY;
    use super::AUTO_FLAG_KEY;
    use super::AUTO_MAX_AGE_MS;
    use super::AutoContinuationStore;
    use crate::SessionStorage;
    use mb_core::AutoContext;
    use mb_core::ManualClock;
    use std::sync::Arc;

    const ORIGIN: &str = "https://films.test";

    fn store() -> (AutoContinuationStore, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let store = AutoContinuationStore::new(SessionStorage::default(), Arc::new(clock.clone()));
        (store, clock)
    }

    fn context() -> AutoContext {
        AutoContext {
            title: "Dune".to_owned(),
            year: "2021".to_owned(),
            href: "https://films.test/voddetail/7.html".to_owned(),
            page_url: "https://films.test/list".to_owned(),
            ..AutoContext::default()
        }
    }

    #[test]
    fn roundtrip_inside_window() {
        let (store, clock) = store();
        assert!(store.arm(ORIGIN, &context()).is_ok());
        clock.advance(AUTO_MAX_AGE_MS);

        assert_eq!(store.is_armed(ORIGIN), Ok(true));
        assert_eq!(store.peek(ORIGIN), Ok(Some(context())));
    }

    #[test]
    fn expires_after_window_without_deleting() {
        let (store, clock) = store();
        assert!(store.arm(ORIGIN, &context()).is_ok());
        clock.advance(AUTO_MAX_AGE_MS + 1);

        assert_eq!(store.is_armed(ORIGIN), Ok(false));
        assert_eq!(store.peek(ORIGIN), Ok(None));
        assert!(matches!(store.storage().get_item(ORIGIN, AUTO_FLAG_KEY), Ok(Some(_))));
    }

    #[test]
    fn consume_deletes_both_keys() {
        let (store, _clock) = store();
        assert!(store.arm(ORIGIN, &context()).is_ok());

        assert_eq!(store.consume(ORIGIN), Ok(Some(context())));
        assert_eq!(store.is_armed(ORIGIN), Ok(false));
        assert_eq!(store.peek(ORIGIN), Ok(None));
        assert_eq!(store.storage().len(ORIGIN), Ok(0));
    }

    #[test]
    fn corrupt_context_is_discarded() {
        let (store, _clock) = store();
        let storage = store.storage();
        assert!(storage.set_item(ORIGIN, AUTO_CONTEXT_KEY, "{not json").is_ok());
        assert_eq!(store.load(ORIGIN), Ok(None));
        assert_eq!(storage.get_item(ORIGIN, AUTO_CONTEXT_KEY), Ok(None));

        assert!(storage.set_item(ORIGIN, AUTO_CONTEXT_KEY, "[1,2]").is_ok());
        assert_eq!(store.load(ORIGIN), Ok(None));
    }

    #[test]
    fn invalid_timestamps_are_not_armed() {
        let (store, _clock) = store();
        let storage = store.storage();
        assert!(storage.set_item(ORIGIN, AUTO_FLAG_KEY, "soon").is_ok());
        assert_eq!(store.is_armed(ORIGIN), Ok(false));
        assert!(storage.set_item(ORIGIN, AUTO_FLAG_KEY, "0").is_ok());
        assert_eq!(store.is_armed(ORIGIN), Ok(false));
    }

    #[test]
    fn reads_alias_keys_from_stored_context() {
        let (store, _clock) = store();
        let storage = store.storage();
        assert!(
            storage
                .set_item(ORIGIN, AUTO_CONTEXT_KEY, r#"{"title":"Heat","vod_year":"1995"}"#)
                .is_ok()
        );
        let context = store.load(ORIGIN).unwrap_or_default().unwrap_or_default();
        assert_eq!(context.title, "Heat");
        assert_eq!(context.year, "1995");
    }
}
