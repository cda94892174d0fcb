use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::StartError;
use crate::session::Session;
use crate::starter::SessionStarter;

type Slot = Arc<OnceCell<Arc<Session>>>;

/// Maps session ids to live sessions.
///
/// Each id owns a creation slot. The table lock is only held long enough to
/// find or insert a slot; the starter runs inside the slot, so a slow spawn
/// holds up requests for that id and nothing else. At most one session is
/// ever live per id.
#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating it with `starter` and `extra`
    /// if none exists. `extra` is ignored for existing sessions.
    ///
    /// A failed or cancelled start leaves no entry behind; the next call for
    /// the same id retries.
    pub async fn get_or_create(
        &self,
        id: &str,
        extra: &HashMap<String, String>,
        starter: &dyn SessionStarter,
    ) -> Result<Arc<Session>, StartError> {
        let pending = PendingSlot {
            registry: self,
            id,
            slot: self.slot(id),
        };
        let result = pending
            .slot
            .get_or_try_init(|| async {
                info!(session_id = id, "creating new session");
                let stream = starter.start(extra).await?;
                Ok::<_, StartError>(Arc::new(Session::new(id, stream)))
            })
            .await
            .cloned();
        result
    }

    /// Returns the session for `id` without creating one.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.table().get(id).and_then(|slot| slot.get().cloned())
    }

    /// Drops the entry for `id` if it still refers to `session`. Returns
    /// whether anything was removed.
    pub fn remove(&self, id: &str, session: &Arc<Session>) -> bool {
        let mut table = self.table();
        let matches = table
            .get(id)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if matches {
            table.remove(id);
            debug!(session_id = id, "session removed from registry");
        }
        matches
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of live sessions. Slots still being created are not counted.
    pub fn len(&self) -> usize {
        self.table()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &str) -> Slot {
        self.table()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Removes `slot` if it never produced a session and no other caller is
    /// still waiting on it.
    fn discard_empty(&self, id: &str, slot: &Slot) {
        let mut table = self.table();
        let stale = table.get(id).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && !current.initialized()
                && Arc::strong_count(current) == 2
        });
        if stale {
            table.remove(id);
            debug!(session_id = id, "discarded unfinished creation slot");
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Holds a creation slot for one `get_or_create` call. Dropping it, whether
/// the call finished, failed or was cancelled, discards the slot if it is
/// still empty.
struct PendingSlot<'a> {
    registry: &'a SessionRegistry,
    id: &'a str,
    slot: Slot,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.slot.initialized() {
            self.registry.discard_empty(self.id, &self.slot);
        }
    }
}
