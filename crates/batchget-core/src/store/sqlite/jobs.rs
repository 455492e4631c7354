//! Job rows: insert, read, update, delete.

use anyhow::{Context, Result};

use super::{job_from_row, unix_timestamp, SqliteStore, JOB_COLUMNS};
use crate::model::{Job, JobId};

impl SqliteStore {
    pub(super) async fn insert_job(&self, job: &Job) -> Result<JobId> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (
                name, status, folder, total_size_bytes, downloaded_bytes,
                selected_files_count, selected_files_with_known_size, files_done,
                threads_allocated, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(job.name.as_str())
        .bind(job.status.as_str())
        .bind(job.folder.to_string_lossy().into_owned())
        .bind(job.total_size_bytes)
        .bind(job.downloaded_bytes)
        .bind(job.selected_files_count)
        .bind(job.selected_files_with_known_size)
        .bind(job.files_done)
        .bind(job.threads_allocated)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert job {:?}", job.name))?
        .last_insert_rowid();
        Ok(id)
    }

    pub(super) async fn job_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    pub(super) async fn job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    /// All jobs, oldest first.
    pub(super) async fn list_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    pub(super) async fn update_job(&self, job: &Job) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = ?1,
                status = ?2,
                folder = ?3,
                total_size_bytes = ?4,
                downloaded_bytes = ?5,
                selected_files_count = ?6,
                selected_files_with_known_size = ?7,
                files_done = ?8,
                threads_allocated = ?9,
                updated_at = ?10
            WHERE id = ?11
            "#,
        )
        .bind(job.name.as_str())
        .bind(job.status.as_str())
        .bind(job.folder.to_string_lossy().into_owned())
        .bind(job.total_size_bytes)
        .bind(job.downloaded_bytes)
        .bind(job.selected_files_count)
        .bind(job.selected_files_with_known_size)
        .bind(job.files_done)
        .bind(job.threads_allocated)
        .bind(unix_timestamp())
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn remove_job(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
