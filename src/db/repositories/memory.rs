use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::port::{Changes, Created, DbResult, Entity, Filter, ListQuery, Page, Store};
use crate::db::DatabaseError;

/// In-process store. Backs the development mode and every test.
///
/// Rows keep insertion order, which is also the default list order. Unique
/// keys declared by `Entity::unique_key` are enforced under the write lock,
/// so `create_unique` is atomic. Transient failures can be injected to
/// exercise retry paths.
pub struct MemoryStore<E> {
    rows: RwLock<Vec<E>>,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
    writes_before_fault: AtomicUsize,
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            failing_reads: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            writes_before_fault: AtomicUsize::new(0),
        }
    }

    pub fn with_rows(rows: Vec<E>) -> Self {
        Self {
            rows: RwLock::new(rows),
            ..Self::new()
        }
    }

    /// The next `n` read operations fail with `DatabaseError::Transient`.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, AtomicOrdering::SeqCst);
    }

    /// The next `n` write operations fail with `DatabaseError::Transient`.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes_after(0, n);
    }

    /// Lets `ok` writes through, then fails the `n` after them.
    pub fn fail_writes_after(&self, ok: usize, n: usize) {
        self.writes_before_fault.store(ok, AtomicOrdering::SeqCst);
        self.failing_writes.store(n, AtomicOrdering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn check_read(&self) -> DbResult<()> {
        take_fault(&self.failing_reads, E::NAME, "read")
    }

    fn check_write(&self) -> DbResult<()> {
        let passed = self
            .writes_before_fault
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if passed {
            return Ok(());
        }
        take_fault(&self.failing_writes, E::NAME, "write")
    }
}

fn take_fault(counter: &AtomicUsize, entity: &str, op: &str) -> DbResult<()> {
    let tripped = counter
        .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
            n.checked_sub(1)
        })
        .is_ok();
    if tripped {
        Err(DatabaseError::Transient(format!(
            "injected {} failure on {}",
            op, entity
        )))
    } else {
        Ok(())
    }
}

fn conflicts<E: Entity>(rows: &[E], candidate: &E) -> Option<usize> {
    let key: Filter = candidate.unique_key()?;
    rows.iter().position(|row| key.matches(row))
}

#[async_trait]
impl<E: Entity> Store<E> for MemoryStore<E> {
    async fn get_by_id(&self, id: Uuid) -> DbResult<E> {
        self.check_read()?;
        self.rows
            .read()
            .await
            .iter()
            .find(|row| row.id() == id)
            .cloned()
            .ok_or(DatabaseError::NotFound)
    }

    async fn list(&self, query: &ListQuery) -> DbResult<Page<E>> {
        self.check_read()?;
        let rows = self.rows.read().await;
        let mut matching: Vec<E> = rows
            .iter()
            .filter(|row| query.filter.matches(*row))
            .cloned()
            .collect();
        drop(rows);

        if let Some(sort) = query.sort {
            matching.sort_by(|a, b| {
                let ord = a
                    .field(sort.column)
                    .compare(&b.field(sort.column))
                    .unwrap_or(Ordering::Equal);
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let total = matching.len() as u64;
        let rows = match query.page_size {
            Some(size) => matching
                .into_iter()
                .skip(query.offset())
                .take(size as usize)
                .collect(),
            None => matching,
        };
        Ok(Page { rows, total })
    }

    async fn create(&self, entity: E) -> DbResult<E> {
        self.check_write()?;
        let mut rows = self.rows.write().await;
        if rows.iter().any(|row| row.id() == entity.id()) || conflicts(&rows, &entity).is_some()
        {
            return Err(DatabaseError::Duplicate);
        }
        rows.push(entity.clone());
        Ok(entity)
    }

    async fn create_unique(&self, entity: E) -> DbResult<Created<E>> {
        self.check_write()?;
        let mut rows = self.rows.write().await;
        if let Some(index) = conflicts(&rows, &entity) {
            return Ok(Created {
                entity: rows[index].clone(),
                inserted: false,
            });
        }
        if rows.iter().any(|row| row.id() == entity.id()) {
            return Err(DatabaseError::Duplicate);
        }
        rows.push(entity.clone());
        Ok(Created {
            entity,
            inserted: true,
        })
    }

    async fn update(&self, id: Uuid, changes: &Changes) -> DbResult<E> {
        self.check_write()?;
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id() == id)
            .ok_or(DatabaseError::NotFound)?;

        // Apply to a copy so a failing column leaves the row untouched.
        let mut next = row.clone();
        for (column, assign) in changes.iter() {
            let resolved = assign.resolve(&next.field(column));
            next.set_field(column, resolved)?;
        }
        *row = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.check_write()?;
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| row.id() != id);
        Ok(rows.len() != before)
    }

    async fn count(&self, filter: &Filter) -> DbResult<u64> {
        self.check_read()?;
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|row| filter.matches(*row)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Certificate, Department};
    use crate::db::port::Sort;
    use time::OffsetDateTime;

    fn departments() -> MemoryStore<Department> {
        MemoryStore::with_rows(vec![
            Department::new("Safety"),
            Department::new("Finance"),
            Department::new("Operations"),
        ])
    }

    #[tokio::test]
    async fn get_by_id_distinguishes_missing_from_failure() {
        let store = departments();
        let err = store.get_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());

        store.fail_next_reads(1);
        let err = store.get_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn list_sorts_and_pages() {
        let store = departments();
        let query = ListQuery::default().sorted(Sort::asc("name")).paged(2, 2);
        let page = store.list(&query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].name, "Safety");
    }

    #[tokio::test]
    async fn get_many_skips_missing_ids() {
        let store = departments();
        let existing = store.list(&ListQuery::default()).await.unwrap().rows;
        let ids = vec![existing[0].id, Uuid::new_v4(), existing[2].id];
        let found = store.get_many(&ids).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn create_unique_returns_existing_row() {
        let store = MemoryStore::<Certificate>::new();
        let (user, track) = (Uuid::new_v4(), Uuid::new_v4());
        let now = OffsetDateTime::now_utc();

        let first = store
            .create_unique(Certificate::new(user, track, now))
            .await
            .unwrap();
        let second = store
            .create_unique(Certificate::new(user, track, now))
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.entity.id, second.entity.id);
        assert_eq!(store.len().await, 1);

        let err = store
            .create(Certificate::new(user, track, now))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let store = departments();
        let id = store.list(&ListQuery::default()).await.unwrap().rows[0].id;
        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert_eq!(store.count(&Filter::new()).await.unwrap(), 2);
    }
}
