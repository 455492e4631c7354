//! File rows and their event history.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use super::{event_from_row, file_from_row, SqliteStore, FILE_COLUMNS};
use crate::model::{FileEntry, FileEvent, JobId};

/// Names per `IN (...)` query; stays well under SQLite's bound-parameter limit.
const PREFETCH_CHUNK: usize = 500;

impl SqliteStore {
    pub(super) async fn insert_files(&self, job: JobId, files: &[FileEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = ?1")
            .bind(job)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            bail!("job {} does not exist", job);
        }
        for file in files {
            let file_id = sqlx::query(
                r#"
                INSERT INTO files (
                    job_id, name, url, status, size_bytes, downloaded_bytes, priority, selected
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(job)
            .bind(file.name.as_str())
            .bind(file.url.as_str())
            .bind(file.status.as_str())
            .bind(file.size_bytes)
            .bind(file.downloaded_bytes)
            .bind(file.priority.rank() as i64)
            .bind(file.selected as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert file {:?} into job {}", file.name, job))?
            .last_insert_rowid();
            for event in &file.events {
                sqlx::query("INSERT INTO events (file_id, timestamp, message) VALUES (?1, ?2, ?3)")
                    .bind(file_id)
                    .bind(event.timestamp.as_str())
                    .bind(event.message.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    pub(super) async fn file_by_name(&self, job: JobId, name: &str) -> Result<Option<FileEntry>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE job_id = ?1 AND name = ?2");
        let row = sqlx::query(&sql)
            .bind(job)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    pub(super) async fn files_by_names(
        &self,
        job: JobId,
        names: &[String],
    ) -> Result<HashMap<String, FileEntry>> {
        let mut out = HashMap::with_capacity(names.len());
        for chunk in names.chunks(PREFETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE job_id = ? AND name IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql).bind(job);
            for name in chunk {
                query = query.bind(name.as_str());
            }
            for row in query.fetch_all(&self.pool).await? {
                let file = file_from_row(&row);
                out.insert(file.name.clone(), file);
            }
        }
        Ok(out)
    }

    /// Files of a job in insertion order; `filter` is appended to the WHERE clause.
    pub(super) async fn files_where(&self, job: JobId, filter: &str) -> Result<Vec<FileEntry>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE job_id = ?1 {filter} ORDER BY id ASC");
        let rows = sqlx::query(&sql).bind(job).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(file_from_row).collect())
    }

    pub(super) async fn update_file(&self, job: JobId, file: &FileEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET url = ?1,
                status = ?2,
                size_bytes = ?3,
                downloaded_bytes = ?4,
                priority = ?5,
                selected = ?6
            WHERE job_id = ?7 AND name = ?8
            "#,
        )
        .bind(file.url.as_str())
        .bind(file.status.as_str())
        .bind(file.size_bytes)
        .bind(file.downloaded_bytes)
        .bind(file.priority.rank() as i64)
        .bind(file.selected as i64)
        .bind(job)
        .bind(file.name.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn insert_event(
        &self,
        job: JobId,
        name: &str,
        event: &FileEvent,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (file_id, timestamp, message)
            SELECT id, ?1, ?2 FROM files WHERE job_id = ?3 AND name = ?4
            "#,
        )
        .bind(event.timestamp.as_str())
        .bind(event.message.as_str())
        .bind(job)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn events_of(&self, job: JobId, name: &str) -> Result<Vec<FileEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT e.timestamp AS timestamp, e.message AS message
            FROM events e
            JOIN files f ON f.id = e.file_id
            WHERE f.job_id = ?1 AND f.name = ?2
            ORDER BY e.timestamp ASC, e.id ASC
            "#,
        )
        .bind(job)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(event_from_row).collect())
    }

    /// Number of event rows for a job (all files).
    #[cfg(test)]
    pub(super) async fn count_events(&self, job: JobId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM events e JOIN files f ON f.id = e.file_id WHERE f.job_id = ?1",
        )
        .bind(job)
        .fetch_one(&self.pool)
        .await?;
        Ok(sqlx::Row::get(&row, "n"))
    }
}
