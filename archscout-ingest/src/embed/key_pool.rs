use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyPoolError {
    #[error("no API keys configured")]
    Empty,
    #[error("key pool is closed")]
    Closed,
}

/// A fixed set of API credentials shared by concurrent workers.
///
/// A worker leases one entry for a whole project and hands it back by dropping the lease.
/// Leasing waits while every entry is out. Entries are usually keys, or models already bound
/// to a key.
pub struct KeyPool<T> {
    entries: Mutex<VecDeque<T>>,
    available: Arc<Semaphore>,
    size: usize,
}

impl<T> fmt::Debug for KeyPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("size", &self.size)
            .field("available", &self.available.available_permits())
            .finish()
    }
}

impl<T> KeyPool<T> {
    /// # Errors
    ///
    /// Errors if `entries` is empty; a pool without keys would wait forever.
    pub fn new(entries: impl IntoIterator<Item = T>) -> Result<Arc<Self>, KeyPoolError> {
        let entries: VecDeque<T> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(KeyPoolError::Empty);
        }

        let size = entries.len();
        Ok(Arc::new(Self {
            entries: Mutex::new(entries),
            available: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.available.available_permits()
    }

    /// Waits for a free entry
    ///
    /// # Errors
    ///
    /// Errors if the pool was closed.
    pub async fn lease(self: &Arc<Self>) -> Result<KeyLease<T>, KeyPoolError>
    where
        T: Clone,
    {
        let permit = Arc::clone(&self.available)
            .acquire_owned()
            .await
            .map_err(|_| KeyPoolError::Closed)?;

        let entry = self
            .entries
            .lock()
            .map_err(|_| KeyPoolError::Closed)?
            .pop_front()
            .ok_or(KeyPoolError::Closed)?;

        Ok(KeyLease {
            pool: Arc::clone(self),
            entry,
            _permit: permit,
        })
    }

    /// Wakes every waiter with [`KeyPoolError::Closed`]
    pub fn close(&self) {
        self.available.close();
    }
}

/// An entry out of the pool. A copy goes back on drop, entries are expected to be cheap
/// handles such as keys or `Arc`s.
pub struct KeyLease<T: Clone> {
    pool: Arc<KeyPool<T>>,
    entry: T,
    // Released after `drop` has put the entry back
    _permit: OwnedSemaphorePermit,
}

impl<T: Clone> fmt::Debug for KeyLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLease").finish_non_exhaustive()
    }
}

impl<T: Clone> Deref for KeyLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry
    }
}

impl<T: Clone> Drop for KeyLease<T> {
    fn drop(&mut self) {
        let entry = self.entry.clone();
        match self.pool.entries.lock() {
            Ok(mut entries) => entries.push_back(entry),
            Err(poisoned) => poisoned.into_inner().push_back(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_pool_is_refused() {
        assert_eq!(
            KeyPool::<String>::new(Vec::new()).unwrap_err(),
            KeyPoolError::Empty
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_lease_and_return() {
        let pool = KeyPool::new(["a".to_string(), "b".to_string()]).unwrap();

        let first = pool.lease().await.unwrap();
        let second = pool.lease().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert_ne!(*first, *second);

        drop(first);
        assert_eq!(pool.available(), 1);
        let third = pool.lease().await.unwrap();
        assert_eq!(*third, "a");
        drop(second);
        drop(third);
        assert_eq!(pool.available(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_lease_waits_for_a_free_key() {
        let pool = KeyPool::new(["only".to_string()]).unwrap();
        let held = pool.lease().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.lease().await.map(|lease| (*lease).clone()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "only");
    }

    #[test_log::test(tokio::test)]
    async fn test_close_wakes_waiters() {
        let pool = KeyPool::new(["only".to_string()]).unwrap();
        let _held = pool.lease().await.unwrap();
        pool.close();
        assert_eq!(pool.lease().await.unwrap_err(), KeyPoolError::Closed);
    }
}
