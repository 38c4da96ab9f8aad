//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to the file row,
//! with an explicit `dims` column. Similarity is computed in Rust over
//! [`vector_candidates`](Store::vector_candidates).

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use code_sage_core::embedding::{blob_to_vec, vec_to_blob};
use code_sage_core::models::{
    CommitRecord, FileReference, IndexEntry, IndexingProgress, Project, Question, VectorCandidate,
};
use code_sage_core::store::Store;
use code_sage_core::DimensionMismatch;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn project_from_row(row: &SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        repo_url: row.get("repo_url"),
        access_token: row.get("access_token"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn commit_from_row(row: &SqliteRow) -> CommitRecord {
    CommitRecord {
        id: row.get("id"),
        project_id: row.get("project_id"),
        hash: row.get("hash"),
        message: row.get("message"),
        author_name: row.get("author_name"),
        author_avatar: row.get("author_avatar"),
        committed_at: row.get("committed_at"),
        summary: row.get("summary"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, repo_url, access_token, created_at, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.repo_url)
        .bind(&project.access_token)
        .bind(project.created_at)
        .bind(project.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(project_from_row))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT * FROM projects WHERE deleted_at IS NULL ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn soft_delete_project(&self, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE projects SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn indexed_paths(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT path, content_hash FROM indexed_files WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("path"), row.get("content_hash")))
            .collect())
    }

    async fn write_index_entry(&self, entry: &IndexEntry) -> Result<()> {
        let dims = entry.embedding.len() as i64;

        // A single statement: the dimension guard, the row and its vector
        // commit together or not at all.
        let result = sqlx::query(
            r#"
            INSERT INTO indexed_files (project_id, path, content, summary, content_hash,
                                       embedding, dims, indexed_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM indexed_files
                WHERE project_id = ?1 AND path != ?2 AND dims != ?7
            )
            ON CONFLICT(project_id, path) DO UPDATE SET
                content = excluded.content,
                summary = excluded.summary,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                dims = excluded.dims,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&entry.project_id)
        .bind(&entry.path)
        .bind(&entry.content)
        .bind(&entry.summary)
        .bind(&entry.content_hash)
        .bind(vec_to_blob(&entry.embedding))
        .bind(dims)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let expected: i64 = sqlx::query_scalar(
                "SELECT dims FROM indexed_files WHERE project_id = ? AND path != ? LIMIT 1",
            )
            .bind(&entry.project_id)
            .bind(&entry.path)
            .fetch_one(&self.pool)
            .await?;
            return Err(DimensionMismatch {
                expected: expected as usize,
                actual: dims as usize,
            }
            .into());
        }
        Ok(())
    }

    async fn vector_candidates(&self, project_id: &str) -> Result<Vec<VectorCandidate>> {
        let rows = sqlx::query(
            "SELECT path, summary, content, embedding FROM indexed_files WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorCandidate {
                    path: row.get("path"),
                    summary: row.get("summary"),
                    content: row.get("content"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn begin_progress(&self, project_id: &str, total: i64) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO indexing_progress (project_id, current_step, total_steps, failed_steps,
                                           is_finished, started_at, updated_at)
            VALUES (?, 0, ?, 0, 0, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                current_step = 0,
                total_steps = excluded.total_steps,
                failed_steps = 0,
                is_finished = 0,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(total.max(0))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_progress(&self, project_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE indexing_progress \
             SET current_step = MIN(current_step + 1, total_steps), updated_at = ? \
             WHERE project_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, project_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE indexing_progress SET failed_steps = failed_steps + 1, updated_at = ? \
             WHERE project_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_progress(&self, project_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE indexing_progress \
             SET current_step = total_steps, is_finished = 1, updated_at = ? \
             WHERE project_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_progress(&self, project_id: &str) -> Result<Option<IndexingProgress>> {
        let row = sqlx::query(
            "SELECT current_step, total_steps, failed_steps, is_finished \
             FROM indexing_progress WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| IndexingProgress {
            current_step: row.get("current_step"),
            total_steps: row.get("total_steps"),
            failed_steps: row.get("failed_steps"),
            is_finished: row.get::<i64, _>("is_finished") != 0,
        }))
    }

    async fn save_question(&self, question: &Question) -> Result<()> {
        let references = serde_json::to_string(&question.file_references)?;
        sqlx::query(
            "INSERT INTO questions (id, project_id, user_id, question, answer, file_references, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&question.id)
        .bind(&question.project_id)
        .bind(&question.user_id)
        .bind(&question.question)
        .bind(&question.answer)
        .bind(references)
        .bind(question.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>> {
        let rows = sqlx::query(
            "SELECT * FROM questions WHERE project_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let references: String = row.get("file_references");
                let file_references: Vec<FileReference> = serde_json::from_str(&references)?;
                Ok(Question {
                    id: row.get("id"),
                    project_id: row.get("project_id"),
                    user_id: row.get("user_id"),
                    question: row.get("question"),
                    answer: row.get("answer"),
                    file_references,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn commit_hashes(&self, project_id: &str) -> Result<Vec<String>> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT hash FROM commits WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes)
    }

    async fn insert_commit(&self, commit: &CommitRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO commits (id, project_id, hash, message, author_name,
                                           author_avatar, committed_at, summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&commit.id)
        .bind(&commit.project_id)
        .bind(&commit.hash)
        .bind(&commit.message)
        .bind(&commit.author_name)
        .bind(&commit.author_avatar)
        .bind(&commit.committed_at)
        .bind(&commit.summary)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>> {
        let rows =
            sqlx::query("SELECT * FROM commits WHERE project_id = ? ORDER BY committed_at DESC")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(commit_from_row).collect())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "indexed_files",
            "indexing_progress",
            "questions",
            "commits",
            "projects",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_tables;
    use code_sage_core::models::content_hash;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_tables(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn entry(path: &str, content: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            project_id: "p1".to_string(),
            path: path.to_string(),
            content: content.to_string(),
            summary: format!("summary of {}", path),
            content_hash: content_hash(content),
            embedding,
        }
    }

    #[tokio::test]
    async fn soft_deleted_projects_are_hidden() {
        let store = store().await;
        let project = Project::new("app", "https://github.com/o/r", None);
        store.create_project(&project).await.unwrap();

        assert!(store.get_project(&project.id).await.unwrap().is_some());
        assert!(store.soft_delete_project(&project.id).await.unwrap());
        assert!(!store.soft_delete_project(&project.id).await.unwrap());
        assert!(store.get_project(&project.id).await.unwrap().is_none());
        assert!(store.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_is_an_upsert_and_vectors_round_trip() {
        let store = store().await;
        store.write_index_entry(&entry("a.rs", "v1", vec![1.0, 0.0])).await.unwrap();
        store.write_index_entry(&entry("a.rs", "v2", vec![0.0, 1.0])).await.unwrap();

        let paths = store.indexed_paths("p1").await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths["a.rs"], content_hash("v2"));

        let candidates = store.vector_candidates("p1").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].embedding, vec![0.0, 1.0]);
        assert_eq!(candidates[0].content, "v2");
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected_without_writing() {
        let store = store().await;
        store.write_index_entry(&entry("a.rs", "a", vec![1.0, 0.0])).await.unwrap();

        let err = store
            .write_index_entry(&entry("b.rs", "b", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        let mismatch = err.downcast_ref::<DimensionMismatch>().unwrap();
        assert_eq!((mismatch.expected, mismatch.actual), (2, 3));
        assert_eq!(store.indexed_paths("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progress_is_capped_and_pinned_on_finish() {
        let store = store().await;
        store.begin_progress("p1", 2).await.unwrap();
        for _ in 0..3 {
            store.advance_progress("p1").await.unwrap();
        }
        store.record_failure("p1").await.unwrap();
        let p = store.get_progress("p1").await.unwrap().unwrap();
        assert_eq!((p.current_step, p.total_steps, p.failed_steps), (2, 2, 1));
        assert!(!p.is_finished);

        store.begin_progress("p1", 5).await.unwrap();
        store.advance_progress("p1").await.unwrap();
        store.finish_progress("p1").await.unwrap();
        let p = store.get_progress("p1").await.unwrap().unwrap();
        assert_eq!((p.current_step, p.total_steps, p.failed_steps), (5, 5, 0));
        assert!(p.is_finished);
    }

    #[tokio::test]
    async fn questions_keep_references_and_list_newest_first() {
        let store = store().await;
        let reference = FileReference {
            file_name: "src/auth.rs".to_string(),
            summary: "login".to_string(),
            source_code: "fn login() {}".to_string(),
            similarity: 0.8,
        };
        let mut first = Question::new("p1", "u1", "first?", "a1", vec![reference.clone()]);
        first.created_at = 100;
        let mut second = Question::new("p1", "u1", "second?", "a2", vec![]);
        second.created_at = 200;
        store.save_question(&first).await.unwrap();
        store.save_question(&second).await.unwrap();

        let listed = store.list_questions("p1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].question, "second?");
        assert_eq!(listed[1].file_references, vec![reference]);
    }

    #[tokio::test]
    async fn duplicate_commits_are_ignored() {
        let store = store().await;
        let commit = CommitRecord {
            id: "c1".to_string(),
            project_id: "p1".to_string(),
            hash: "abc".to_string(),
            message: "fix".to_string(),
            author_name: "dev".to_string(),
            author_avatar: String::new(),
            committed_at: "2024-01-01T00:00:00Z".to_string(),
            summary: "* fixed".to_string(),
        };
        store.insert_commit(&commit).await.unwrap();
        store
            .insert_commit(&CommitRecord {
                id: "c2".to_string(),
                ..commit.clone()
            })
            .await
            .unwrap();
        assert_eq!(store.commit_hashes("p1").await.unwrap(), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn clear_all_empties_every_table() {
        let store = store().await;
        store
            .create_project(&Project::new("app", "https://github.com/o/r", None))
            .await
            .unwrap();
        store.write_index_entry(&entry("a.rs", "a", vec![1.0])).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.list_projects().await.unwrap().is_empty());
        assert!(store.indexed_paths("p1").await.unwrap().is_empty());
    }
}
