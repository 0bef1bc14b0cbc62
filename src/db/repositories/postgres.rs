use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::port::{
    Assign, Changes, Condition, Created, DbResult, Entity, FieldValue, Filter, ListQuery, Page,
    Store,
};
use crate::db::DatabaseError;

/// Postgres adapter over a shared pool.
///
/// Column names always come from `Entity::COLUMNS` or from code, never from
/// request input, so they are pushed into SQL verbatim; values are bound.
pub struct PgStore<E> {
    pool: PgPool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> PgStore<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }
}

impl<E> Clone for PgStore<E> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Null => {
            qb.push("NULL");
        }
        FieldValue::Uuid(v) => {
            qb.push_bind(*v);
        }
        FieldValue::UuidList(v) => {
            qb.push_bind(v.clone());
        }
        FieldValue::Text(v) => {
            qb.push_bind(v.clone());
        }
        FieldValue::Int(v) => {
            qb.push_bind(*v);
        }
        FieldValue::Float(v) => {
            qb.push_bind(*v);
        }
        FieldValue::Bool(v) => {
            qb.push_bind(*v);
        }
        FieldValue::Timestamp(v) => {
            qb.push_bind(*v);
        }
        FieldValue::Enum { pg_type, value } => {
            qb.push_bind(*value).push("::").push(*pg_type);
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if filter.is_empty() {
        return;
    }
    qb.push(" WHERE ");
    for (i, condition) in filter.conditions().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        match condition {
            Condition::Eq(column, FieldValue::Null) | Condition::IsNull(column) => {
                qb.push(*column).push(" IS NULL");
            }
            Condition::Eq(column, value) => {
                qb.push(*column).push(" = ");
                push_value(qb, value);
            }
            Condition::In(_, values) if values.is_empty() => {
                qb.push("FALSE");
            }
            Condition::In(column, values) => {
                qb.push(*column).push(" IN (");
                for (j, value) in values.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, value);
                }
                qb.push(")");
            }
        }
    }
}

fn push_assignment(qb: &mut QueryBuilder<'_, Postgres>, column: &str, assign: &Assign) {
    qb.push(column).push(" = ");
    match assign {
        Assign::Set(value) => push_value(qb, value),
        Assign::Max(value) => {
            qb.push("GREATEST(").push(column).push(", ");
            push_value(qb, value);
            qb.push(")");
        }
        Assign::SetOnce(value) => {
            qb.push("COALESCE(").push(column).push(", ");
            push_value(qb, value);
            qb.push(")");
        }
        Assign::Latch { value, terminal } => {
            qb.push("CASE WHEN ").push(column).push(" = ");
            push_value(qb, terminal);
            qb.push(" THEN ").push(column).push(" ELSE ");
            push_value(qb, value);
            qb.push(" END");
        }
    }
}

fn insert_statement<E: Entity>(entity: &E) -> QueryBuilder<'static, Postgres> {
    let columns: Vec<(&'static str, FieldValue)> = entity
        .columns()
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect();

    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", E::TABLE));
    for (i, (column, _)) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(*column);
    }
    qb.push(") VALUES (");
    for (i, (_, value)) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, value);
    }
    qb.push(")");
    qb
}

#[async_trait]
impl<E> Store<E> for PgStore<E>
where
    E: Entity + for<'r> FromRow<'r, PgRow>,
{
    async fn get_by_id(&self, id: Uuid) -> DbResult<E> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", E::TABLE);
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(DatabaseError::NotFound)
    }

    async fn list(&self, query: &ListQuery) -> DbResult<Page<E>> {
        let mut count_qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", E::TABLE));
        push_where(&mut count_qb, &query.filter);
        let total: i64 = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", E::TABLE));
        push_where(&mut qb, &query.filter);
        if let Some(sort) = query.sort {
            qb.push(" ORDER BY ")
                .push(sort.column)
                .push(if sort.descending { " DESC" } else { " ASC" });
        }
        if let Some(size) = query.page_size {
            qb.push(" LIMIT ")
                .push_bind(size as i64)
                .push(" OFFSET ")
                .push_bind(query.offset() as i64);
        }
        let rows = qb.build_query_as::<E>().fetch_all(&self.pool).await?;

        Ok(Page {
            rows,
            total: total.max(0) as u64,
        })
    }

    async fn create(&self, entity: E) -> DbResult<E> {
        let mut qb = insert_statement(&entity);
        qb.push(" RETURNING *");
        let row = qb.build_query_as::<E>().fetch_one(&self.pool).await?;
        Ok(row)
    }

    async fn create_unique(&self, entity: E) -> DbResult<Created<E>> {
        let key = entity.unique_key();
        let mut qb = insert_statement(&entity);
        qb.push(" ON CONFLICT DO NOTHING RETURNING *");
        let inserted = qb.build_query_as::<E>().fetch_optional(&self.pool).await?;

        if let Some(entity) = inserted {
            return Ok(Created {
                entity,
                inserted: true,
            });
        }

        // Lost the race (or the row already existed): hand back the winner.
        let key = key.ok_or(DatabaseError::Duplicate)?;
        match self.find_one(&key).await? {
            Some(entity) => Ok(Created {
                entity,
                inserted: false,
            }),
            None => Err(DatabaseError::Duplicate),
        }
    }

    async fn update(&self, id: Uuid, changes: &Changes) -> DbResult<E> {
        if changes.is_empty() {
            return self.get_by_id(id).await;
        }

        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", E::TABLE));
        for (i, (column, assign)) in changes.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_assignment(&mut qb, column, assign);
        }
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let row = qb.build_query_as::<E>().fetch_optional(&self.pool).await?;
        row.ok_or(DatabaseError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", E::TABLE);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, filter: &Filter) -> DbResult<u64> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", E::TABLE));
        push_where(&mut qb, filter);
        let total: i64 = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ProgressStatus;

    #[test]
    fn renders_merge_assignments() {
        let changes = Changes::new()
            .max("watch_time_seconds", 120_i64)
            .latch(
                "status",
                ProgressStatus::InProgress,
                ProgressStatus::Completed,
            )
            .set_once("completed_at", FieldValue::Null);

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE progress SET ");
        for (i, (column, assign)) in changes.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_assignment(&mut qb, column, assign);
        }

        assert_eq!(
            qb.sql(),
            "UPDATE progress SET watch_time_seconds = GREATEST(watch_time_seconds, $1), \
             status = CASE WHEN status = $2::progress_status THEN status ELSE $3::progress_status END, \
             completed_at = COALESCE(completed_at, NULL)"
        );
    }

    #[test]
    fn renders_filters() {
        let filter = Filter::new()
            .eq("user_id", Uuid::nil())
            .one_of("video_id", Vec::<Uuid>::new())
            .is_null("department_id");
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM progress");
        push_where(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM progress WHERE user_id = $1 AND FALSE AND department_id IS NULL"
        );
    }
}
