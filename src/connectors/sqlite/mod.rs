//! SQLite connector -- Tests, Results and env vars stored as JSON rows.

pub mod schema;

use super::{Connector, EnvVars};
use crate::engine::Options;
use crate::filter;
use crate::model::{Test, TestResult};
use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde_json::{json, Value};
use std::path::Path;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Key of the identity metadata attached to every Test read from SQLite.
pub const METADATA_KEY: &str = "sqlite";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

pub struct SqliteConnector {
    pool: Pool,
}

impl SqliteConnector {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Opening SQLite connector");
        Ok(Self {
            pool: open_pool(path)?,
        })
    }

    /// Insert new Tests; returns their row ids.
    pub async fn insert_tests(&self, tests: &[Test]) -> Result<Vec<i64>> {
        let payloads = tests
            .iter()
            .map(encode_test)
            .collect::<Result<Vec<_>>>()?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<i64>> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(payloads.len());
            {
                let mut stmt = tx.prepare("INSERT INTO tests (test_json) VALUES (?1)")?;
                for payload in &payloads {
                    stmt.execute(params![payload])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;
            Ok(ids)
        })
        .await?
    }

    /// Store or replace env vars. Runs on the calling thread; meant for
    /// startup seeding before any pipeline runs.
    pub fn seed_env_vars(&self, vars: &EnvVars) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO env_vars (name, value) VALUES (?1, ?2)")?;
            for (name, value) in vars {
                stmt.execute(params![name, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn write_results(&self, results: &[TestResult], upsert: bool) -> Result<()> {
        let rows = results
            .iter()
            .map(|r| {
                let json = serde_json::to_string(r)?;
                Ok((r.id.clone(), r.status.to_string(), r.label.clone(), json))
            })
            .collect::<Result<Vec<_>>>()?;
        let sql = if upsert {
            "INSERT INTO results (id, status, label, result_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                label = excluded.label,
                result_json = excluded.result_json,
                updated_at = datetime('now')"
        } else {
            "INSERT INTO results (id, status, label, result_json) VALUES (?1, ?2, ?3, ?4)"
        };
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(sql)?;
                for (id, status, label, json) in &rows {
                    stmt.execute(params![id, status, label, json])
                        .with_context(|| format!("failed to write result '{}'", id))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }
}

/// Serialize a Test without its identity metadata.
fn encode_test(test: &Test) -> Result<String> {
    let mut test = test.clone();
    test.fields.remove(METADATA_KEY);
    Ok(serde_json::to_string(&test)?)
}

fn row_id(test: &Test) -> Option<i64> {
    test.fields
        .get(METADATA_KEY)
        .and_then(|m| m.get("rowId"))
        .and_then(Value::as_i64)
}

#[async_trait::async_trait]
impl Connector for SqliteConnector {
    async fn get_test_list(&self, options: &Options) -> Result<Vec<Test>> {
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(i64, String)>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare("SELECT id, test_json FROM tests ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await??;

        let mut tests = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            let mut test: Test = serde_json::from_str(&json)
                .with_context(|| format!("failed to decode test row {}", id))?;
            test.fields
                .insert(METADATA_KEY.to_string(), json!({ "rowId": id }));
            tests.push(test);
        }
        Ok(filter::apply(tests, &options.filters))
    }

    async fn update_test_list(&self, tests: &[Test], _options: &Options) -> Result<()> {
        let rows = tests
            .iter()
            .map(|t| {
                let id = row_id(t).ok_or_else(|| {
                    anyhow::anyhow!("test '{}' has no {}.rowId", t.url, METADATA_KEY)
                })?;
                Ok((id, encode_test(t)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE tests SET test_json = ?1, updated_at = datetime('now') WHERE id = ?2",
                )?;
                for (id, json) in &rows {
                    let changed = stmt.execute(params![json, id])?;
                    if changed == 0 {
                        anyhow::bail!("test row {} not found", id);
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn get_result_list(&self, options: &Options) -> Result<Vec<TestResult>> {
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare("SELECT id, result_json FROM results ORDER BY rowid")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await??;

        let mut results = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            let result: TestResult = serde_json::from_str(&json)
                .with_context(|| format!("failed to decode result '{}'", id))?;
            results.push(result);
        }
        Ok(filter::apply(results, &options.filters))
    }

    async fn append_result_list(&self, results: &[TestResult], _options: &Options) -> Result<()> {
        self.write_results(results, false).await
    }

    async fn update_result_list(&self, results: &[TestResult], _options: &Options) -> Result<()> {
        self.write_results(results, true).await
    }

    async fn get_env_vars(&self) -> Result<EnvVars> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<EnvVars> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare("SELECT name, value FROM env_vars")?;
            let vars = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<EnvVars, _>>()?;
            Ok(vars)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultType, Status};

    fn connector() -> (tempfile::TempDir, SqliteConnector) {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteConnector::open(&dir.path().join("nested/awp.db")).unwrap();
        (dir, conn)
    }

    #[tokio::test]
    async fn test_tests_round_trip_with_row_id() {
        let (_dir, conn) = connector();
        let mut a = Test::new("a.com").with_source("psi", json!({ "strategy": "mobile" }));
        a.fields.insert("selected".to_string(), json!(true));
        let ids = conn.insert_tests(&[a, Test::new("b.com")]).await.unwrap();
        assert_eq!(ids.len(), 2);

        let opts = Options::default();
        let mut tests = conn.get_test_list(&opts).await.unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(row_id(&tests[0]), Some(ids[0]));
        assert_eq!(tests[0].source_settings("psi"), json!({ "strategy": "mobile" }));

        tests[1].label = Some("B".to_string());
        conn.update_test_list(&tests[1..], &opts).await.unwrap();
        let selected = conn
            .get_test_list(&Options::default().with_filters(["selected"]))
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url, "a.com");
        let all = conn.get_test_list(&opts).await.unwrap();
        assert_eq!(all[1].label.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_update_unknown_test_row_fails() {
        let (_dir, conn) = connector();
        let mut t = Test::new("a.com");
        t.fields.insert(METADATA_KEY.to_string(), json!({ "rowId": 42 }));
        let err = conn
            .update_test_list(&[t], &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("42"));
    }

    #[tokio::test]
    async fn test_results_append_update_and_filter() {
        let (_dir, conn) = connector();
        let opts = Options::default();
        let mut r1 = TestResult::for_test(&Test::new("a.com"), ResultType::Single, 1);
        let r2 = TestResult::for_test(&Test::new("b.com"), ResultType::Single, 2);
        conn.append_result_list(&[r1.clone(), r2.clone()], &opts).await.unwrap();

        // appending an existing id is a persistence error
        assert!(conn.append_result_list(&[r2.clone()], &opts).await.is_err());

        r1.status = Status::Retrieved;
        conn.update_result_list(&[r1.clone()], &opts).await.unwrap();

        let all = conn.get_result_list(&opts).await.unwrap();
        assert_eq!(all, vec![r1, r2.clone()]);

        let pending = conn
            .get_result_list(&Options::default().with_filters(["status !== 'Retrieved'"]))
            .await
            .unwrap();
        assert_eq!(pending, vec![r2]);
    }

    #[tokio::test]
    async fn test_env_vars() {
        let (_dir, conn) = connector();
        let mut vars = EnvVars::new();
        vars.insert("psiApiKey".to_string(), "abc".to_string());
        conn.seed_env_vars(&vars).unwrap();
        vars.insert("psiApiKey".to_string(), "def".to_string());
        conn.seed_env_vars(&vars).unwrap();
        assert_eq!(conn.get_env_vars().await.unwrap()["psiApiKey"], "def");
    }
}
