use anyhow::Context;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

use crate::error::{RepositoryError, Result};
use crate::model::{
    IndexRow, InstanceQuery, QueryPage, RangeBounds, SolutionPage, SolutionRow, SortSpec,
};
use crate::store::traits::IndexStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS instance_index (
        problem_class TEXT NOT NULL,
        instance_uid TEXT NOT NULL,
        attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
        file_path TEXT NOT NULL,
        PRIMARY KEY (problem_class, instance_uid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS solution_index (
        problem_class TEXT NOT NULL,
        solution_uid TEXT NOT NULL,
        instance_uid TEXT NOT NULL,
        attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
        file_path TEXT NOT NULL,
        PRIMARY KEY (problem_class, solution_uid)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS solution_index_instance ON solution_index (problem_class, instance_uid)",
];

/// Index backend storing declared attributes as JSONB, one table per record
/// kind, partitioned by a `problem_class` column.
#[derive(Debug, Clone)]
pub struct PostgresIndexStore {
    pool: PgPool,
}

impl PostgresIndexStore {
    /// Create a new PostgreSQL index store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the index tables if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create index tables")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn conflict_or(err: sqlx::Error, what: String) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(what),
        _ => RepositoryError::Index(anyhow::Error::new(err).context(format!("Failed to insert {}", what))),
    }
}

fn attributes_of(row: &PgRow) -> Result<BTreeMap<String, Value>> {
    let Json(attributes): Json<BTreeMap<String, Value>> = row
        .try_get("attributes")
        .context("Failed to decode index attributes")?;
    Ok(attributes)
}

fn instance_row(row: &PgRow) -> Result<IndexRow> {
    Ok(IndexRow {
        uid: row.try_get("instance_uid").context("Failed to decode instance_uid")?,
        attributes: attributes_of(row)?,
        file_path: row.try_get("file_path").context("Failed to decode file_path")?,
    })
}

fn solution_row(row: &PgRow) -> Result<SolutionRow> {
    Ok(SolutionRow {
        solution_uid: row.try_get("solution_uid").context("Failed to decode solution_uid")?,
        instance_uid: row.try_get("instance_uid").context("Failed to decode instance_uid")?,
        attributes: attributes_of(row)?,
        file_path: row.try_get("file_path").context("Failed to decode file_path")?,
    })
}

fn push_instance_filters(builder: &mut QueryBuilder<'_, Postgres>, class: &str, query: &InstanceQuery) {
    builder.push(" WHERE problem_class = ");
    builder.push_bind(class.to_string());

    for range in &query.ranges {
        if let Some(min) = range.min {
            builder.push(" AND (attributes->>");
            builder.push_bind(range.field.clone());
            builder.push(")::float8 >= ");
            builder.push_bind(min);
        }
        if let Some(max) = range.max {
            builder.push(" AND (attributes->>");
            builder.push_bind(range.field.clone());
            builder.push(")::float8 <= ");
            builder.push_bind(max);
        }
    }
    for filter in &query.booleans {
        builder.push(" AND attributes->");
        builder.push_bind(filter.field.clone());
        builder.push(" = to_jsonb(");
        builder.push_bind(filter.value);
        builder.push("::boolean)");
    }
    if let Some(search) = &query.search {
        builder.push(" AND strpos(instance_uid, ");
        builder.push_bind(search.clone());
        builder.push(") > 0");
    }
}

fn push_order(builder: &mut QueryBuilder<'_, Postgres>, order: &[SortSpec], tie_breaker: &str) {
    builder.push(" ORDER BY ");
    for spec in order {
        builder.push("attributes->");
        builder.push_bind(spec.field.clone());
        builder.push(if spec.descending { " DESC, " } else { " ASC, " });
    }
    builder.push(tie_breaker);
    builder.push(" ASC");
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, offset: usize, limit: usize) -> Result<()> {
    let bigint = |name: &str, value: usize| {
        i64::try_from(value)
            .map_err(|_| RepositoryError::validation(format!("{} {} is out of range", name, value)))
    };
    builder.push(" LIMIT ");
    builder.push_bind(bigint("limit", limit)?);
    builder.push(" OFFSET ");
    builder.push_bind(bigint("offset", offset)?);
    Ok(())
}

#[async_trait::async_trait]
impl IndexStore for PostgresIndexStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get_instance_row(&self, class: &str, uid: &str) -> Result<Option<IndexRow>> {
        let row = sqlx::query(
            "SELECT instance_uid, attributes, file_path FROM instance_index WHERE problem_class = $1 AND instance_uid = $2",
        )
        .bind(class)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch instance row")?;

        row.as_ref().map(instance_row).transpose()
    }

    async fn insert_instance_row(&self, class: &str, row: IndexRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO instance_index (problem_class, instance_uid, attributes, file_path) VALUES ($1, $2, $3, $4)",
        )
        .bind(class)
        .bind(&row.uid)
        .bind(Json(&row.attributes))
        .bind(&row.file_path)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, format!("instance '{}' of problem '{}'", row.uid, class)))?;

        Ok(())
    }

    async fn delete_instance_row(&self, class: &str, uid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instance_index WHERE problem_class = $1 AND instance_uid = $2")
            .bind(class)
            .bind(uid)
            .execute(&self.pool)
            .await
            .context("Failed to delete instance row")?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_instances(&self, class: &str, query: &InstanceQuery) -> Result<QueryPage> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM instance_index");
        push_instance_filters(&mut count, class, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count matching instances")?;

        let mut select = QueryBuilder::new("SELECT instance_uid, attributes, file_path FROM instance_index");
        push_instance_filters(&mut select, class, query);
        push_order(&mut select, query.sort.as_slice(), "instance_uid");
        push_page(&mut select, query.offset, query.limit)?;
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query instances")?;

        Ok(QueryPage {
            rows: rows.iter().map(instance_row).collect::<Result<_>>()?,
            total: total as usize,
        })
    }

    async fn range_bounds(&self, class: &str, fields: &[String]) -> Result<Vec<RangeBounds>> {
        let mut bounds = Vec::with_capacity(fields.len());
        for field in fields {
            let row = sqlx::query(
                r#"
                SELECT MIN((attributes->>$2)::float8) AS min_val, MAX((attributes->>$2)::float8) AS max_val
                FROM instance_index
                WHERE problem_class = $1 AND jsonb_typeof(attributes->$2) = 'number'
                "#,
            )
            .bind(class)
            .bind(field)
            .fetch_one(&self.pool)
            .await
            .context("Failed to compute range bounds")?;

            bounds.push(RangeBounds {
                problem_uid: class.to_string(),
                field_name: field.clone(),
                min_val: row.try_get("min_val").context("Failed to decode min_val")?,
                max_val: row.try_get("max_val").context("Failed to decode max_val")?,
            });
        }
        Ok(bounds)
    }

    async fn instance_rows(&self, class: &str) -> Result<Vec<IndexRow>> {
        let rows = sqlx::query(
            "SELECT instance_uid, attributes, file_path FROM instance_index WHERE problem_class = $1 ORDER BY instance_uid",
        )
        .bind(class)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list instance rows")?;

        rows.iter().map(instance_row).collect()
    }

    async fn get_solution_row(&self, class: &str, solution_uid: &str) -> Result<Option<SolutionRow>> {
        let row = sqlx::query(
            "SELECT solution_uid, instance_uid, attributes, file_path FROM solution_index WHERE problem_class = $1 AND solution_uid = $2",
        )
        .bind(class)
        .bind(solution_uid)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch solution row")?;

        row.as_ref().map(solution_row).transpose()
    }

    async fn insert_solution_row(&self, class: &str, row: SolutionRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO solution_index (problem_class, solution_uid, instance_uid, attributes, file_path)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(class)
        .bind(&row.solution_uid)
        .bind(&row.instance_uid)
        .bind(Json(&row.attributes))
        .bind(&row.file_path)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, format!("solution '{}' of problem '{}'", row.solution_uid, class)))?;

        Ok(())
    }

    async fn delete_solution_row(&self, class: &str, solution_uid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM solution_index WHERE problem_class = $1 AND solution_uid = $2")
            .bind(class)
            .bind(solution_uid)
            .execute(&self.pool)
            .await
            .context("Failed to delete solution row")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_solutions_of_instance(&self, class: &str, instance_uid: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM solution_index WHERE problem_class = $1 AND instance_uid = $2")
            .bind(class)
            .bind(instance_uid)
            .execute(&self.pool)
            .await
            .context("Failed to delete solution rows of instance")?;

        Ok(result.rows_affected())
    }

    async fn query_solutions(
        &self,
        class: &str,
        instance_uid: &str,
        order: &[SortSpec],
        offset: usize,
        limit: usize,
    ) -> Result<SolutionPage> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM solution_index WHERE problem_class = $1 AND instance_uid = $2",
        )
        .bind(class)
        .bind(instance_uid)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count solutions")?;

        let mut select = QueryBuilder::new(
            "SELECT solution_uid, instance_uid, attributes, file_path FROM solution_index WHERE problem_class = ",
        );
        select.push_bind(class.to_string());
        select.push(" AND instance_uid = ");
        select.push_bind(instance_uid.to_string());
        push_order(&mut select, order, "solution_uid");
        push_page(&mut select, offset, limit)?;
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query solutions")?;

        Ok(SolutionPage {
            rows: rows.iter().map(solution_row).collect::<Result<_>>()?,
            total: total as usize,
        })
    }

    async fn solution_rows(&self, class: &str) -> Result<Vec<SolutionRow>> {
        let rows = sqlx::query(
            "SELECT solution_uid, instance_uid, attributes, file_path FROM solution_index WHERE problem_class = $1 ORDER BY solution_uid",
        )
        .bind(class)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list solution rows")?;

        rows.iter().map(solution_row).collect()
    }

    async fn truncate(&self, class: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query("DELETE FROM solution_index WHERE problem_class = $1")
            .bind(class)
            .execute(&mut *tx)
            .await
            .context("Failed to truncate solution index")?;
        sqlx::query("DELETE FROM instance_index WHERE problem_class = $1")
            .bind(class)
            .execute(&mut *tx)
            .await
            .context("Failed to truncate instance index")?;
        tx.commit().await.context("Failed to commit truncate")?;
        Ok(())
    }
}
