use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async lock per conversation thread, so turns of a thread run one
/// after the other. Entries are dropped once no turn holds them.
#[derive(Clone, Debug, Default)]
pub struct ThreadLocks {
    locks: Arc<StdMutex<HashMap<String, Weak<Mutex<()>>>>>,
}

impl ThreadLocks {
    pub async fn lock(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(thread_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(thread_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    pub fn active(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|lock| lock.strong_count() > 0).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|lock| lock.strong_count() > 0)
                .count(),
        }
    }
}
