//! Batch-stitch helpers: collect foreign keys, fetch the related rows in a
//! single call, merge through an id-keyed map.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{DatabaseError, DbResult, Entity, Store};

/// Runs a read, retrying it once if the first try failed transiently.
pub async fn retry_once<T, F, Fut>(mut read: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    match read().await {
        Err(err) if err.is_transient() => {
            debug!(error = %err, "transient read failure, retrying once");
            read().await
        }
        other => other,
    }
}

/// Bounds a read by `limit`; running out of time counts as transient.
pub async fn bounded<T, Fut>(limit: Duration, read: Fut) -> DbResult<T>
where
    Fut: Future<Output = DbResult<T>>,
{
    tokio::time::timeout(limit, read)
        .await
        .unwrap_or_else(|_| {
            Err(DatabaseError::Transient(format!(
                "read timed out after {:?}",
                limit
            )))
        })
}

/// Order-preserving dedupe of an id list.
pub fn unique_ids<I: IntoIterator<Item = Uuid>>(ids: I) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

pub struct BatchLoader<E: Entity> {
    store: Arc<dyn Store<E>>,
    timeout: Duration,
}

impl<E: Entity> BatchLoader<E> {
    pub fn new(store: Arc<dyn Store<E>>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// One `get_many` for the distinct ids. Missing ids are simply absent
    /// from the map.
    pub async fn load<I>(&self, ids: I) -> DbResult<HashMap<Uuid, E>>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = bounded(self.timeout, retry_once(|| self.store.get_many(&ids))).await?;
        Ok(rows.into_iter().map(|row| (row.id(), row)).collect())
    }

    /// Like `load`, but a failed or timed-out fetch yields an empty map so
    /// every dependent row falls back to its placeholder.
    pub async fn load_or_empty<I>(&self, ids: I) -> HashMap<Uuid, E>
    where
        I: IntoIterator<Item = Uuid>,
    {
        match self.load(ids).await {
            Ok(map) => map,
            Err(err) => {
                warn!(entity = E::NAME, error = %err, "related rows unavailable, using placeholders");
                HashMap::new()
            }
        }
    }
}

/// Attaches the related row (if any) to each primary row.
pub fn stitch<P, R, K>(primary: Vec<P>, related: &HashMap<Uuid, R>, key: K) -> Vec<(P, Option<R>)>
where
    R: Clone,
    K: Fn(&P) -> Option<Uuid>,
{
    primary
        .into_iter()
        .map(|row| {
            let found = key(&row).and_then(|id| related.get(&id).cloned());
            (row, found)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Department, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn departments(names: &[&str]) -> Vec<Department> {
        names.iter().map(|name| Department::new(*name)).collect()
    }

    #[tokio::test]
    async fn load_dedupes_and_skips_missing() {
        let rows = departments(&["Logistics", "Production"]);
        let store = Arc::new(MemoryStore::with_rows(rows.clone()));
        let loader = BatchLoader::<Department>::new(store, Duration::from_secs(1));

        let map = loader
            .load([rows[0].id, rows[0].id, Uuid::new_v4(), rows[1].id])
            .await
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map[&rows[1].id].name, "Production");
    }

    #[tokio::test]
    async fn load_retries_a_single_transient_failure() {
        let rows = departments(&["Logistics"]);
        let store = Arc::new(MemoryStore::with_rows(rows.clone()));
        store.fail_next_reads(1);
        let loader = BatchLoader::<Department>::new(store, Duration::from_secs(1));

        let map = loader.load([rows[0].id]).await.unwrap();
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn load_gives_up_after_the_retry() {
        let rows = departments(&["Logistics"]);
        let store = Arc::new(MemoryStore::with_rows(rows.clone()));
        store.fail_next_reads(2);
        let loader = BatchLoader::<Department>::new(store.clone(), Duration::from_secs(1));

        let err = loader.load([rows[0].id]).await.unwrap_err();
        assert!(err.is_transient());

        store.fail_next_reads(2);
        assert!(loader.load_or_empty([rows[0].id]).await.is_empty());
    }

    #[tokio::test]
    async fn retry_once_does_not_retry_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let result: DbResult<()> = retry_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::NotFound)
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_turns_a_hung_read_into_a_transient_error() {
        let result: DbResult<()> = bounded(Duration::from_secs(2), std::future::pending()).await;
        assert!(result.unwrap_err().is_transient());
    }

    #[test]
    fn stitch_leaves_placeholders_for_missing_rows() {
        let known = Department::new("Logistics");
        let related: HashMap<Uuid, Department> = [(known.id, known.clone())].into();
        let primary = vec![Some(known.id), Some(Uuid::new_v4()), None];

        let stitched = stitch(primary, &related, |key| *key);

        assert_eq!(stitched[0].1.as_ref().map(|d| d.name.as_str()), Some("Logistics"));
        assert!(stitched[1].1.is_none());
        assert!(stitched[2].1.is_none());
    }
}
