//! Persistence port shared by every engine component.
//!
//! The port is a generic per-entity store. It has no join operator; all
//! relational composition happens in the aggregation layer. Updates are
//! expressed as column assignments with merge semantics so that adapters
//! can apply them atomically (`GREATEST`, `COALESCE`, `CASE` in SQL, or the
//! same rules under a lock in memory).

use std::cmp::Ordering;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::DatabaseError;

pub type DbResult<T> = Result<T, DatabaseError>;

/// A single column value as seen by the port.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Uuid(Uuid),
    UuidList(Vec<Uuid>),
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(OffsetDateTime),
    /// Postgres enum value; `pg_type` is the database type name.
    Enum {
        pg_type: &'static str,
        value: &'static str,
    },
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Ordering between two values of the same kind. `Null` sorts first.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (Uuid(a), Uuid(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Enum { value: a, .. }, Enum { value: b, .. }) => a.partial_cmp(b),
            _ => None,
        }
    }

    pub fn into_uuid(self, column: &str) -> DbResult<Uuid> {
        match self {
            FieldValue::Uuid(v) => Ok(v),
            other => Err(mismatch(column, "uuid", &other)),
        }
    }

    pub fn into_opt_uuid(self, column: &str) -> DbResult<Option<Uuid>> {
        match self {
            FieldValue::Null => Ok(None),
            other => other.into_uuid(column).map(Some),
        }
    }

    pub fn into_uuid_list(self, column: &str) -> DbResult<Vec<Uuid>> {
        match self {
            FieldValue::UuidList(v) => Ok(v),
            other => Err(mismatch(column, "uuid[]", &other)),
        }
    }

    pub fn into_text(self, column: &str) -> DbResult<String> {
        match self {
            FieldValue::Text(v) => Ok(v),
            other => Err(mismatch(column, "text", &other)),
        }
    }

    pub fn into_opt_text(self, column: &str) -> DbResult<Option<String>> {
        match self {
            FieldValue::Null => Ok(None),
            other => other.into_text(column).map(Some),
        }
    }

    pub fn into_int(self, column: &str) -> DbResult<i64> {
        match self {
            FieldValue::Int(v) => Ok(v),
            other => Err(mismatch(column, "integer", &other)),
        }
    }

    pub fn into_float(self, column: &str) -> DbResult<f64> {
        match self {
            FieldValue::Float(v) => Ok(v),
            FieldValue::Int(v) => Ok(v as f64),
            other => Err(mismatch(column, "float", &other)),
        }
    }

    pub fn into_bool(self, column: &str) -> DbResult<bool> {
        match self {
            FieldValue::Bool(v) => Ok(v),
            other => Err(mismatch(column, "boolean", &other)),
        }
    }

    pub fn into_timestamp(self, column: &str) -> DbResult<OffsetDateTime> {
        match self {
            FieldValue::Timestamp(v) => Ok(v),
            other => Err(mismatch(column, "timestamp", &other)),
        }
    }

    pub fn into_opt_timestamp(self, column: &str) -> DbResult<Option<OffsetDateTime>> {
        match self {
            FieldValue::Null => Ok(None),
            other => other.into_timestamp(column).map(Some),
        }
    }

    pub fn into_enum(self, column: &str) -> DbResult<&'static str> {
        match self {
            FieldValue::Enum { value, .. } => Ok(value),
            other => Err(mismatch(column, "enum", &other)),
        }
    }
}

fn mismatch(column: &str, expected: &str, got: &FieldValue) -> DatabaseError {
    DatabaseError::InvalidInput(format!(
        "column `{}` expects {}, got {:?}",
        column, expected, got
    ))
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Uuid(v)
    }
}

impl From<Vec<Uuid>> for FieldValue {
    fn from(v: Vec<Uuid>) -> Self {
        FieldValue::UuidList(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<OffsetDateTime> for FieldValue {
    fn from(v: OffsetDateTime) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One predicate of a conjunctive filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`; `Eq(_, Null)` behaves like `IsNull`.
    Eq(&'static str, FieldValue),
    /// `column IN (...)`; an empty set matches nothing.
    In(&'static str, Vec<FieldValue>),
    IsNull(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<FieldValue>) -> Self {
        self.conditions.push(Condition::Eq(column, value.into()));
        self
    }

    pub fn one_of<V, I>(mut self, column: &'static str, values: I) -> Self
    where
        V: Into<FieldValue>,
        I: IntoIterator<Item = V>,
    {
        self.conditions.push(Condition::In(
            column,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(column, value) => {
                let current = entity.field(column);
                if value.is_null() {
                    current.is_null()
                } else {
                    current == *value
                }
            }
            Condition::In(column, values) => {
                let current = entity.field(column);
                values.iter().any(|v| *v == current)
            }
            Condition::IsNull(column) => entity.field(column).is_null(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub column: &'static str,
    pub descending: bool,
}

impl Sort {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Filter, sort and pagination for `Store::list`. Pages are 1-based;
/// `page_size: None` returns every matching row.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub page: u32,
    pub page_size: Option<u32>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: Filter::new(),
            sort: None,
            page: 1,
            page_size: None,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn paged(mut self, page: u32, page_size: u32) -> Self {
        self.page = page.max(1);
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn offset(&self) -> usize {
        match self.page_size {
            Some(size) => (self.page.max(1) as usize - 1) * size as usize,
            None => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page<E> {
    pub rows: Vec<E>,
    pub total: u64,
}

/// Column assignment with merge semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Assign {
    /// Overwrite.
    Set(FieldValue),
    /// Keep the larger of the stored and the given value.
    Max(FieldValue),
    /// Only write when the stored value is null.
    SetOnce(FieldValue),
    /// Write `value` unless the stored value already equals `terminal`.
    Latch {
        value: FieldValue,
        terminal: FieldValue,
    },
}

impl Assign {
    pub fn resolve(&self, current: &FieldValue) -> FieldValue {
        match self {
            Assign::Set(value) => value.clone(),
            Assign::Max(value) => {
                if current.is_null() {
                    return value.clone();
                }
                match current.compare(value) {
                    Some(Ordering::Less) => value.clone(),
                    _ => current.clone(),
                }
            }
            Assign::SetOnce(value) => {
                if current.is_null() {
                    value.clone()
                } else {
                    current.clone()
                }
            }
            Assign::Latch { value, terminal } => {
                if current == terminal {
                    current.clone()
                } else {
                    value.clone()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    assignments: Vec<(&'static str, Assign)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &'static str, value: impl Into<FieldValue>) -> Self {
        self.assignments.push((column, Assign::Set(value.into())));
        self
    }

    pub fn max(mut self, column: &'static str, value: impl Into<FieldValue>) -> Self {
        self.assignments.push((column, Assign::Max(value.into())));
        self
    }

    pub fn set_once(mut self, column: &'static str, value: impl Into<FieldValue>) -> Self {
        self.assignments.push((column, Assign::SetOnce(value.into())));
        self
    }

    pub fn latch(
        mut self,
        column: &'static str,
        value: impl Into<FieldValue>,
        terminal: impl Into<FieldValue>,
    ) -> Self {
        self.assignments.push((
            column,
            Assign::Latch {
                value: value.into(),
                terminal: terminal.into(),
            },
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, Assign)> {
        self.assignments.iter()
    }
}

/// A row type the port knows how to store.
pub trait Entity: Clone + Send + Sync + Unpin + 'static {
    /// Human-readable name used in error messages.
    const NAME: &'static str;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Uuid;

    /// Current value of `column`; unknown columns read as `Null`.
    fn field(&self, column: &str) -> FieldValue;

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()>;

    /// Natural key enforced by a unique constraint, if any.
    fn unique_key(&self) -> Option<Filter> {
        None
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        Self::COLUMNS
            .iter()
            .map(|column| (*column, self.field(column)))
            .collect()
    }

    /// Resolves a caller-supplied column name (e.g. a sort key from a query
    /// string) against the known columns.
    fn column(name: &str) -> Option<&'static str> {
        Self::COLUMNS.iter().find(|c| **c == name).copied()
    }
}

/// Result of `Store::create_unique`.
#[derive(Debug, Clone, PartialEq)]
pub struct Created<E> {
    pub entity: E,
    /// `false` when a row with the same natural key already existed.
    pub inserted: bool,
}

#[async_trait]
pub trait Store<E: Entity>: Send + Sync {
    /// Fails with `DatabaseError::NotFound` when the row is absent.
    async fn get_by_id(&self, id: Uuid) -> DbResult<E>;

    async fn list(&self, query: &ListQuery) -> DbResult<Page<E>>;

    async fn create(&self, entity: E) -> DbResult<E>;

    /// Inserts `entity` unless a row with the same natural key exists, in
    /// which case the existing row is returned. Atomic with respect to
    /// concurrent callers.
    async fn create_unique(&self, entity: E) -> DbResult<Created<E>>;

    /// Fails with `DatabaseError::NotFound` when the row is absent.
    async fn update(&self, id: Uuid, changes: &Changes) -> DbResult<E>;

    async fn delete(&self, id: Uuid) -> DbResult<bool>;

    async fn count(&self, filter: &Filter) -> DbResult<u64>;

    /// Batched fetch by id set in one call. Missing ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> DbResult<Vec<E>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = ListQuery::filtered(Filter::new().one_of("id", ids.iter().copied()));
        Ok(self.list(&query).await?.rows)
    }

    async fn find_one(&self, filter: &Filter) -> DbResult<Option<E>> {
        let query = ListQuery::filtered(filter.clone()).paged(1, 1);
        Ok(self.list(&query).await?.rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_never_decreases() {
        let assign = Assign::Max(FieldValue::Int(10));
        assert_eq!(assign.resolve(&FieldValue::Int(42)), FieldValue::Int(42));
        assert_eq!(assign.resolve(&FieldValue::Int(3)), FieldValue::Int(10));
        assert_eq!(assign.resolve(&FieldValue::Null), FieldValue::Int(10));
    }

    #[test]
    fn set_once_keeps_existing_value() {
        let first = OffsetDateTime::UNIX_EPOCH;
        let later = first + time::Duration::hours(1);
        let assign = Assign::SetOnce(later.into());
        assert_eq!(assign.resolve(&FieldValue::Null), FieldValue::Timestamp(later));
        assert_eq!(
            assign.resolve(&FieldValue::Timestamp(first)),
            FieldValue::Timestamp(first)
        );
    }

    #[test]
    fn latch_holds_terminal_value() {
        let done = FieldValue::Text("done".into());
        let assign = Assign::Latch {
            value: FieldValue::Text("working".into()),
            terminal: done.clone(),
        };
        assert_eq!(assign.resolve(&done), done);
        assert_eq!(
            assign.resolve(&FieldValue::Text("idle".into())),
            FieldValue::Text("working".into())
        );
    }

    #[test]
    fn list_query_offset_is_one_based() {
        let query = ListQuery::default().paged(3, 20);
        assert_eq!(query.offset(), 40);
        assert_eq!(ListQuery::default().offset(), 0);
        assert_eq!(ListQuery::default().paged(0, 5).offset(), 0);
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(
            FieldValue::Null.compare(&FieldValue::Int(1)),
            Some(Ordering::Less)
        );
        assert_eq!(FieldValue::Int(1).compare(&FieldValue::Text("a".into())), None);
    }
}
