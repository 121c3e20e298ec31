use super::{
    mergeable_from_str, mergeable_to_str, status_from_str, status_to_str, verdict_from_str,
    verdict_to_str, Error, LoadedState, PersistedBuildResult, Store,
};
use crate::ci::BuildVerdict;
use crate::model::{Mergeable, PullRequest, PullRequestStatus};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

/// Durable state backed by SQLite: async, no separate server process, and close to the
/// crate's existing `serde`/`serde_json` footprint rather than pulling in an unrelated ORM.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new().max_connections(8).connect(url).await?;
        let store = Self { pool };
        store.run_schema().await?;
        Ok(store)
    }

    async fn run_schema(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pull (
                repo TEXT NOT NULL,
                num INTEGER NOT NULL,
                status TEXT NOT NULL,
                merge_sha TEXT,
                title TEXT NOT NULL,
                body TEXT,
                head_sha TEXT NOT NULL,
                head_ref TEXT NOT NULL,
                base_ref TEXT NOT NULL,
                assignee TEXT,
                approved_by TEXT,
                priority INTEGER NOT NULL,
                try INTEGER NOT NULL,
                rollup INTEGER NOT NULL,
                PRIMARY KEY (repo, num)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS build_res (
                repo TEXT NOT NULL,
                num INTEGER NOT NULL,
                builder TEXT NOT NULL,
                res TEXT NOT NULL,
                url TEXT,
                merge_sha TEXT NOT NULL,
                PRIMARY KEY (repo, num, builder)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mergeable (
                repo TEXT NOT NULL,
                num INTEGER NOT NULL,
                mergeable TEXT NOT NULL,
                PRIMARY KEY (repo, num)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS build_triggers (
                branch TEXT NOT NULL,
                trigger_sha TEXT NOT NULL PRIMARY KEY,
                target_sha TEXT NOT NULL,
                build_count INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn repo_key(owner: &str, repo: &str) -> String {
        format!("{}/{}", owner, repo)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_pull(&self, pull: &PullRequest) -> Result<(), Error> {
        let repo = Self::repo_key(&pull.owner, &pull.repo);
        sqlx::query(
            "INSERT INTO pull
                (repo, num, status, merge_sha, title, body, head_sha, head_ref, base_ref,
                 assignee, approved_by, priority, try, rollup)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(repo, num) DO UPDATE SET
                status = excluded.status,
                merge_sha = excluded.merge_sha,
                title = excluded.title,
                body = excluded.body,
                head_sha = excluded.head_sha,
                head_ref = excluded.head_ref,
                base_ref = excluded.base_ref,
                assignee = excluded.assignee,
                approved_by = excluded.approved_by,
                priority = excluded.priority,
                try = excluded.try,
                rollup = excluded.rollup",
        )
        .bind(&repo)
        .bind(pull.num as i64)
        .bind(status_to_str(pull.status))
        .bind(&pull.integration_sha)
        .bind(&pull.title)
        .bind(&pull.body)
        .bind(&pull.head_sha)
        .bind(&pull.head_ref)
        .bind(&pull.base_ref)
        .bind(&pull.assignee)
        .bind(&pull.approved_by)
        .bind(pull.priority)
        .bind(pull.try_)
        .bind(pull.rollup)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pull(&self, owner: &str, repo: &str, num: u64) -> Result<(), Error> {
        let repo = Self::repo_key(owner, repo);
        sqlx::query("DELETE FROM pull WHERE repo = ? AND num = ?")
            .bind(&repo)
            .bind(num as i64)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM build_res WHERE repo = ? AND num = ?")
            .bind(&repo)
            .bind(num as i64)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM mergeable WHERE repo = ? AND num = ?")
            .bind(&repo)
            .bind(num as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_build(
        &self,
        owner: &str,
        repo: &str,
        num: u64,
        builder: &str,
        verdict: BuildVerdict,
        url: Option<&str>,
        integration_sha: &str,
    ) -> Result<(), Error> {
        let repo = Self::repo_key(owner, repo);
        sqlx::query(
            "INSERT INTO build_res (repo, num, builder, res, url, merge_sha)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(repo, num, builder) DO UPDATE SET
                res = excluded.res, url = excluded.url, merge_sha = excluded.merge_sha",
        )
        .bind(&repo)
        .bind(num as i64)
        .bind(builder)
        .bind(verdict_to_str(&verdict))
        .bind(url)
        .bind(integration_sha)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_mergeable(&self, owner: &str, repo: &str, num: u64, mergeable: Mergeable) -> Result<(), Error> {
        let repo = Self::repo_key(owner, repo);
        sqlx::query(
            "INSERT INTO mergeable (repo, num, mergeable) VALUES (?, ?, ?)
             ON CONFLICT(repo, num) DO UPDATE SET mergeable = excluded.mergeable",
        )
        .bind(&repo)
        .bind(num as i64)
        .bind(mergeable_to_str(mergeable))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_trigger(&self, branch: &str, requested_sha: &str, produced_sha: &str) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO build_triggers (branch, trigger_sha, target_sha, build_count)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(trigger_sha) DO UPDATE SET
                branch = excluded.branch, target_sha = excluded.target_sha",
        )
        .bind(branch)
        .bind(requested_sha)
        .bind(produced_sha)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_trigger_count(&self, requested_sha: &str) -> Result<(), Error> {
        sqlx::query("UPDATE build_triggers SET build_count = build_count + 1 WHERE trigger_sha = ?")
            .bind(requested_sha)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<LoadedState, Error> {
        let mut state = LoadedState::default();

        let rows = sqlx::query("SELECT * FROM pull").fetch_all(&self.pool).await?;
        for row in rows {
            let repo: String = row.try_get("repo")?;
            let (owner, repo) = split_repo_key(&repo);
            let status: String = row.try_get("status")?;
            let mut pull = PullRequest::new(
                owner,
                repo,
                row.try_get::<i64, _>("num")? as u64,
                row.try_get("title")?,
                row.try_get("head_sha")?,
                row.try_get("head_ref")?,
                row.try_get("base_ref")?,
            );
            pull.status = status_from_str(&status)?;
            pull.integration_sha = row.try_get("merge_sha")?;
            pull.body = row.try_get("body")?;
            pull.assignee = row.try_get("assignee")?;
            pull.approved_by = row.try_get("approved_by")?;
            pull.priority = row.try_get("priority")?;
            pull.try_ = row.try_get("try")?;
            pull.rollup = row.try_get("rollup")?;
            state.pulls.push(pull);
        }

        let rows = sqlx::query("SELECT * FROM build_res").fetch_all(&self.pool).await?;
        for row in rows {
            let repo: String = row.try_get("repo")?;
            let (owner, repo) = split_repo_key(&repo);
            let verdict: String = row.try_get("res")?;
            state.build_results.push(PersistedBuildResult {
                owner,
                repo,
                num: row.try_get::<i64, _>("num")? as u64,
                builder: row.try_get("builder")?,
                verdict: verdict_from_str(&verdict)?,
                url: row.try_get("url")?,
                integration_sha: row.try_get("merge_sha")?,
            });
        }

        // `mergeable` rows are folded directly into the pulls already loaded above.
        let rows = sqlx::query("SELECT * FROM mergeable").fetch_all(&self.pool).await?;
        for row in rows {
            let repo: String = row.try_get("repo")?;
            let (owner, repo) = split_repo_key(&repo);
            let num: i64 = row.try_get("num")?;
            let mergeable: String = row.try_get("mergeable")?;
            let mergeable = mergeable_from_str(&mergeable)?;
            if let Some(pull) = state
                .pulls
                .iter_mut()
                .find(|p| p.owner == owner && p.repo == repo && p.num == num as u64)
            {
                pull.mergeable = mergeable;
            }
        }

        Ok(state)
    }
}

fn split_repo_key(repo: &str) -> (String, String) {
    match repo.split_once('/') {
        Some((owner, repo)) => (owner.to_string(), repo.to_string()),
        None => (String::new(), repo.to_string()),
    }
}
