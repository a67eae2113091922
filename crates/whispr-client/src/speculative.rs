//! Optimistic local state: apply a change right away, keep it if the store
//! confirms, undo it if the store refuses.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

#[derive(Debug)]
pub struct Speculative<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Speculative<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default> Default for Speculative<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Speculative<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.guard(), value)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.guard())
    }

    /// Apply `change` locally, then await `commit`. On failure `undo` runs
    /// and the error is returned unchanged.
    ///
    /// The lock is never held across the await.
    pub async fn apply<R, C, U, F>(&self, change: C, undo: U, commit: F) -> Result<R>
    where
        C: FnOnce(&mut T),
        U: FnOnce(&mut T),
        F: Future<Output = Result<R>>,
    {
        change(&mut self.guard());
        match commit.await {
            Ok(confirmed) => Ok(confirmed),
            Err(e) => {
                undo(&mut self.guard());
                Err(e)
            }
        }
    }
}

impl<T: Clone> Speculative<T> {
    pub fn view(&self) -> T {
        self.guard().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[tokio::test]
    async fn confirmed_change_sticks() {
        let pinned = Speculative::new(false);
        let result = pinned
            .apply(|p| *p = true, |p| *p = false, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert!(pinned.view());
    }

    #[tokio::test]
    async fn refused_change_is_undone() {
        let draft = Speculative::new(String::from("hello"));
        let saved = draft.view();
        let err = draft
            .apply(
                |d| d.clear(),
                |d| *d = saved,
                async { Err::<(), _>(ClientError::Transport("offline".into())) },
            )
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(draft.view(), "hello");
    }

    #[tokio::test]
    async fn local_state_is_visible_while_commit_is_pending() {
        let counter = Speculative::new(0);
        let observer = counter.clone();
        counter
            .apply(
                |c| *c += 1,
                |c| *c -= 1,
                async move {
                    assert_eq!(observer.view(), 1);
                    Ok(())
                },
            )
            .await
            .unwrap();
    }
}
