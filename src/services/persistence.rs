//! File metadata persistence.
//!
//! The pipeline only talks to [`FileRepository`]; the SQLite implementation
//! keeps one row per file in `upload_files` and its ordered relations in
//! `upload_file_relations`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::file::{FileRecord, NewFileRecord, Relation};

pub type PersistenceResult<T> = Result<T, sqlx::Error>;

const MAX_PAGE_SIZE: i64 = 1000;
const DEFAULT_PAGE_SIZE: i64 = 100;

/// Filters and paging accepted by `find` and `count`.
///
/// Field names follow the query string: `?_limit=10&_start=20&_sort=name:DESC&mime=image/png`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileQuery {
    #[serde(rename = "_limit")]
    pub limit: Option<i64>,
    #[serde(rename = "_start")]
    pub start: Option<i64>,
    #[serde(rename = "_sort")]
    pub sort: Option<String>,
    pub name: Option<String>,
    pub mime: Option<String>,
    pub provider: Option<String>,
    pub hash: Option<String>,
}

impl FileQuery {
    /// Column and direction, only for whitelisted columns.
    fn order_by(&self) -> (&'static str, &'static str) {
        let Some(sort) = self.sort.as_deref() else {
            return ("created_at", "DESC");
        };
        let (field, dir) = sort.split_once(':').unwrap_or((sort, "ASC"));
        let column = match field {
            "name" => "name",
            "size" => "size",
            "mime" => "mime",
            "createdAt" | "created_at" => "created_at",
            "updatedAt" | "updated_at" => "updated_at",
            _ => "created_at",
        };
        let direction = if dir.eq_ignore_ascii_case("desc") {
            "DESC"
        } else {
            "ASC"
        };
        (column, direction)
    }
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create(&self, record: NewFileRecord) -> PersistenceResult<FileRecord>;
    async fn find_one(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>>;
    async fn find(&self, query: &FileQuery) -> PersistenceResult<Vec<FileRecord>>;
    async fn count(&self, query: &FileQuery) -> PersistenceResult<i64>;
    /// Case-insensitive substring match on hash or name.
    async fn search(&self, term: &str) -> PersistenceResult<Vec<FileRecord>>;
    /// Remove and return the record, if it existed.
    async fn delete(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>>;
}

#[derive(FromRow)]
struct FileRow {
    id: Uuid,
    name: String,
    hash: String,
    content_digest: String,
    ext: String,
    mime: String,
    size: f64,
    url: String,
    path: Option<String>,
    provider: String,
    provider_metadata: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RelationRow {
    file_id: Uuid,
    ref_id: String,
    #[sqlx(rename = "ref")]
    ref_type: String,
    source: Option<String>,
    field: String,
}

const FILE_COLUMNS: &str = "id, name, hash, content_digest, ext, mime, size, url, path, \
                            provider, provider_metadata, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteFileRepository {
    db: Arc<SqlitePool>,
}

impl SqliteFileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &FileQuery) {
        builder.push(" WHERE 1 = 1");
        let filters = [
            ("name", &query.name),
            ("mime", &query.mime),
            ("provider", &query.provider),
            ("hash", &query.hash),
        ];
        for (column, value) in filters {
            if let Some(value) = value {
                builder.push(format!(" AND {} = ", column));
                builder.push_bind(value.clone());
            }
        }
    }

    /// Attach relations to rows, preserving row order.
    async fn hydrate(&self, rows: Vec<FileRow>) -> PersistenceResult<Vec<FileRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT file_id, ref_id, ref, source, field FROM upload_file_relations WHERE file_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.id);
        }
        builder.push(") ORDER BY file_id, position");
        let relations: Vec<RelationRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let related = relations
                    .iter()
                    .filter(|r| r.file_id == row.id)
                    .map(|r| Relation {
                        ref_id: r.ref_id.clone(),
                        ref_type: r.ref_type.clone(),
                        source: r.source.clone(),
                        field: r.field.clone(),
                    })
                    .collect();
                into_record(row, related)
            })
            .collect())
    }
}

fn into_record(row: FileRow, related: Vec<Relation>) -> FileRecord {
    let provider_metadata = row.provider_metadata.as_deref().and_then(|raw| {
        serde_json::from_str(raw)
            .map_err(|err| tracing::warn!(id = %row.id, error = %err, "unreadable provider metadata"))
            .ok()
    });
    FileRecord {
        id: row.id,
        name: row.name,
        hash: row.hash,
        content_digest: row.content_digest,
        ext: row.ext,
        mime: row.mime,
        size: row.size,
        url: row.url,
        path: row.path,
        provider: row.provider,
        provider_metadata,
        related,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn create(&self, record: NewFileRecord) -> PersistenceResult<FileRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let metadata = record
            .provider_metadata
            .as_ref()
            .map(|m| m.to_string());

        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "INSERT INTO upload_files ({FILE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .bind(&record.name)
        .bind(&record.hash)
        .bind(&record.content_digest)
        .bind(&record.ext)
        .bind(&record.mime)
        .bind(record.size)
        .bind(&record.url)
        .bind(&record.path)
        .bind(&record.provider)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (position, relation) in record.related.iter().enumerate() {
            sqlx::query(
                "INSERT INTO upload_file_relations (file_id, position, ref_id, ref, source, field)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(position as i64)
            .bind(&relation.ref_id)
            .bind(&relation.ref_type)
            .bind(&relation.source)
            .bind(&relation.field)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(into_record(row, record.related))
    }

    async fn find_one(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM upload_files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find(&self, query: &FileQuery) -> PersistenceResult<Vec<FileRecord>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} FROM upload_files"));
        Self::push_filters(&mut builder, query);

        let (column, direction) = query.order_by();
        builder.push(format!(" ORDER BY {} {}", column, direction));
        builder.push(" LIMIT ");
        builder.push_bind(
            query
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        );
        builder.push(" OFFSET ");
        builder.push_bind(query.start.unwrap_or(0).max(0));

        let rows: Vec<FileRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        self.hydrate(rows).await
    }

    async fn count(&self, query: &FileQuery) -> PersistenceResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM upload_files");
        Self::push_filters(&mut builder, query);
        builder
            .build_query_scalar::<i64>()
            .fetch_one(&*self.db)
            .await
    }

    async fn search(&self, term: &str) -> PersistenceResult<Vec<FileRecord>> {
        // `%` and `_` in the term are literal characters
        let escaped = term
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM upload_files
             WHERE LOWER(hash) LIKE ? ESCAPE '\\' OR LOWER(name) LIKE ? ESCAPE '\\'
             ORDER BY created_at DESC"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&*self.db)
        .await?;
        self.hydrate(rows).await
    }

    async fn delete(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>> {
        let Some(record) = self.find_one(id).await? else {
            return Ok(None);
        };

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM upload_file_relations WHERE file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM upload_files WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(record))
    }
}
