use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::context::{CompensationData, SagaContext};
use crate::error::{Result, SagaStoreError};
use crate::model::{Saga, SagaState, SagaStep, StepLogState, StepName};
use crate::query::{SagaMetrics, SagaQuery, StepPerformance};
use crate::store::{SagaStore, StepLogMutation};

/// PostgreSQL-backed saga store implementation.
///
/// `update_transactionally` applies the saga row update and every step-log
/// mutation inside one database transaction, guarded by the saga's
/// `revision` column.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

const SAGA_COLUMNS: &str = "id, correlation_id, state, current_step, attempts, revision, \
     context, compensation_data, error_message, created_at, updated_at, completed_at";

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<Saga> {
        let state: String = row.try_get("state")?;
        let state = SagaState::from_str(&state).map_err(SagaStoreError::Corrupt)?;

        let current_step: Option<String> = row.try_get("current_step")?;
        let current_step = current_step
            .map(|s| StepName::from_str(&s).map_err(SagaStoreError::Corrupt))
            .transpose()?;

        let context: serde_json::Value = row.try_get("context")?;
        let context: SagaContext = serde_json::from_value(context)?;

        let compensation_data: Option<serde_json::Value> = row.try_get("compensation_data")?;
        let compensation_data: Option<CompensationData> = compensation_data
            .map(serde_json::from_value)
            .transpose()?;

        Ok(Saga {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            state,
            current_step,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            revision: row.try_get("revision")?,
            context,
            compensation_data,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_step(row: PgRow) -> Result<SagaStep> {
        let step_name: String = row.try_get("step_name")?;
        let step_name = StepName::from_str(&step_name).map_err(SagaStoreError::Corrupt)?;

        let state: String = row.try_get("state")?;
        let state = StepLogState::from_str(&state).map_err(SagaStoreError::Corrupt)?;

        Ok(SagaStep {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            step_name,
            attempt: row.try_get::<i32, _>("attempt")? as u32,
            state,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            success: row.try_get("success")?,
            error_message: row.try_get("error_message")?,
            step_data: row.try_get("step_data")?,
        })
    }

    async fn apply_mutation(conn: &mut PgConnection, mutation: &StepLogMutation) -> Result<()> {
        match mutation {
            StepLogMutation::Append(step) => {
                sqlx::query(
                    r#"
                    INSERT INTO saga_steps
                        (saga_id, step_name, attempt, state, started_at, completed_at,
                         duration_ms, success, error_message, step_data)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(step.saga_id.as_uuid())
                .bind(step.step_name.as_str())
                .bind(step.attempt as i32)
                .bind(step.state.as_str())
                .bind(step.started_at)
                .bind(step.completed_at)
                .bind(step.duration_ms)
                .bind(step.success)
                .bind(&step.error_message)
                .bind(&step.step_data)
                .execute(&mut *conn)
                .await?;
            }
            StepLogMutation::Finalize {
                saga_id,
                step_name,
                attempt,
                success,
                error_message,
                step_data,
            } => {
                let state = if *success {
                    StepLogState::Succeeded
                } else {
                    StepLogState::Failed
                };
                let completed_at = Utc::now();

                let started_at: Option<DateTime<Utc>> = sqlx::query_scalar(
                    "SELECT started_at FROM saga_steps \
                     WHERE saga_id = $1 AND step_name = $2 AND attempt = $3",
                )
                .bind(saga_id.as_uuid())
                .bind(step_name.as_str())
                .bind(*attempt as i32)
                .fetch_optional(&mut *conn)
                .await?;

                if let Some(started_at) = started_at {
                    let duration_ms = (completed_at - started_at).num_milliseconds();
                    sqlx::query(
                        r#"
                        UPDATE saga_steps
                        SET state = $4, completed_at = $5, duration_ms = $6, success = $7,
                            error_message = $8, step_data = COALESCE($9, step_data)
                        WHERE saga_id = $1 AND step_name = $2 AND attempt = $3
                        "#,
                    )
                    .bind(saga_id.as_uuid())
                    .bind(step_name.as_str())
                    .bind(*attempt as i32)
                    .bind(state.as_str())
                    .bind(completed_at)
                    .bind(duration_ms)
                    .bind(*success)
                    .bind(error_message)
                    .bind(step_data.as_ref())
                    .execute(&mut *conn)
                    .await?;
                } else {
                    // Attempt record missing; insert a fully-formed one so
                    // the audit trail stays whole.
                    sqlx::query(
                        r#"
                        INSERT INTO saga_steps
                            (saga_id, step_name, attempt, state, started_at, completed_at,
                             duration_ms, success, error_message, step_data)
                        VALUES ($1, $2, $3, $4, $5, $5, 0, $6, $7, $8)
                        "#,
                    )
                    .bind(saga_id.as_uuid())
                    .bind(step_name.as_str())
                    .bind(*attempt as i32)
                    .bind(state.as_str())
                    .bind(completed_at)
                    .bind(*success)
                    .bind(error_message)
                    .bind(
                        step_data
                            .clone()
                            .unwrap_or(serde_json::Value::Null),
                    )
                    .execute(&mut *conn)
                    .await?;
                }
            }
            StepLogMutation::MarkCompensated { saga_id, step_name } => {
                sqlx::query(
                    r#"
                    UPDATE saga_steps SET state = 'compensated'
                    WHERE id = (
                        SELECT id FROM saga_steps
                        WHERE saga_id = $1 AND step_name = $2 AND state = 'succeeded'
                        ORDER BY id DESC LIMIT 1
                    )
                    "#,
                )
                .bind(saga_id.as_uuid())
                .bind(step_name.as_str())
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn load(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let row = sqlx::query(&format!("SELECT {SAGA_COLUMNS} FROM sagas WHERE id = $1"))
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn load_by_correlation(&self, correlation_id: CorrelationId) -> Result<Option<Saga>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas WHERE correlation_id = $1"
        ))
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn save_new(&self, saga: Saga) -> Result<Saga> {
        let context = serde_json::to_value(&saga.context)?;
        let compensation_data = saga
            .compensation_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO sagas
                (id, correlation_id, state, current_step, attempts, revision,
                 context, compensation_data, error_message, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.correlation_id.as_uuid())
        .bind(saga.state.as_str())
        .bind(saga.current_step.map(|s| s.as_str()))
        .bind(saga.attempts as i32)
        .bind(saga.revision)
        .bind(context)
        .bind(compensation_data)
        .bind(&saga.error_message)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .bind(saga.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("sagas_correlation_id_key")
            {
                return SagaStoreError::DuplicateCorrelation(saga.correlation_id);
            }
            SagaStoreError::Database(e)
        })?;

        Ok(saga)
    }

    async fn update_transactionally(
        &self,
        saga: &Saga,
        step_logs: &[StepLogMutation],
    ) -> Result<Saga> {
        let context = serde_json::to_value(&saga.context)?;
        let compensation_data = saga
            .compensation_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let new_revision = saga.revision + 1;
        let updated = sqlx::query(
            r#"
            UPDATE sagas
            SET state = $3, current_step = $4, attempts = $5, revision = $6,
                context = $7, compensation_data = $8, error_message = $9,
                updated_at = $10, completed_at = $11
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.revision)
        .bind(saga.state.as_str())
        .bind(saga.current_step.map(|s| s.as_str()))
        .bind(saga.attempts as i32)
        .bind(new_revision)
        .bind(context)
        .bind(compensation_data)
        .bind(&saga.error_message)
        .bind(saga.updated_at)
        .bind(saga.completed_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT revision FROM sagas WHERE id = $1")
                .bind(saga.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            return match actual {
                Some(actual) => Err(SagaStoreError::Conflict {
                    saga_id: saga.id,
                    expected: saga.revision,
                    actual,
                }),
                None => Err(SagaStoreError::NotFound(saga.id)),
            };
        }

        for mutation in step_logs {
            Self::apply_mutation(&mut tx, mutation).await?;
        }

        tx.commit().await?;

        let mut updated = saga.clone();
        updated.revision = new_revision;
        Ok(updated)
    }

    async fn record_step_log(&self, mutation: StepLogMutation) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::apply_mutation(&mut conn, &mutation).await
    }

    async fn step_logs(&self, saga_id: SagaId) -> Result<Vec<SagaStep>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id, step_name, attempt, state, started_at, completed_at,
                   duration_ms, success, error_message, step_data
            FROM saga_steps
            WHERE saga_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<Saga>> {
        let mut sql = format!("SELECT {SAGA_COLUMNS} FROM sagas WHERE 1=1");
        let mut param_count = 0;

        if query.state.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND state = ${param_count}"));
        }
        if query.correlation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND correlation_id = ${param_count}"));
        }
        if query.created_from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.created_to.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(state) = query.state {
            q = q.bind(state.as_str());
        }
        if let Some(correlation_id) = query.correlation_id {
            q = q.bind(correlation_id.as_uuid());
        }
        if let Some(from) = query.created_from {
            q = q.bind(from);
        }
        if let Some(to) = query.created_to {
            q = q.bind(to);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            q = q.bind(offset as i64);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn find_failed(&self) -> Result<Vec<Saga>> {
        self.query(SagaQuery::new().state(SagaState::Failed)).await
    }

    async fn metrics(&self) -> Result<SagaMetrics> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM sagas GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut total = 0u64;
        let mut confirmed = 0u64;
        let mut compensated = 0u64;
        let mut failed = 0u64;
        let mut in_flight = 0u64;
        let mut failures_by_state = std::collections::HashMap::new();

        for row in rows {
            let state: String = row.try_get("state")?;
            let state = SagaState::from_str(&state).map_err(SagaStoreError::Corrupt)?;
            let count = row.try_get::<i64, _>("count")? as u64;
            total += count;
            if state.is_success() {
                confirmed += count;
            } else if state == SagaState::Compensated {
                compensated += count;
            } else if state.is_failure() {
                failed += count;
                failures_by_state.insert(state.as_str().to_string(), count);
            } else {
                in_flight += count;
            }
        }

        let average_duration_ms: Option<f64> = sqlx::query_scalar(
            "SELECT (AVG(EXTRACT(EPOCH FROM (completed_at - created_at)) * 1000.0))::float8 \
             FROM sagas WHERE completed_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let terminal = confirmed + compensated + failed;
        Ok(SagaMetrics {
            total,
            confirmed,
            compensated,
            failed,
            in_flight,
            success_rate: if terminal > 0 {
                confirmed as f64 / terminal as f64
            } else {
                0.0
            },
            average_duration_ms,
            failures_by_state,
        })
    }

    async fn step_performance(&self) -> Result<Vec<StepPerformance>> {
        let rows = sqlx::query(
            r#"
            SELECT step_name,
                   COUNT(*) FILTER (WHERE success IS NOT NULL) AS executions,
                   COUNT(*) FILTER (WHERE success = FALSE) AS failures,
                   (AVG(duration_ms) FILTER (WHERE success IS NOT NULL))::float8 AS avg_ms
            FROM saga_steps
            GROUP BY step_name
            ORDER BY step_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut performance = Vec::new();
        for row in rows {
            let step_name: String = row.try_get("step_name")?;
            let step_name = StepName::from_str(&step_name).map_err(SagaStoreError::Corrupt)?;
            let executions = row.try_get::<i64, _>("executions")? as u64;
            let failures = row.try_get::<i64, _>("failures")? as u64;
            if executions == 0 {
                continue;
            }
            performance.push(StepPerformance {
                step_name,
                executions,
                failures,
                success_rate: (executions - failures) as f64 / executions as f64,
                average_duration_ms: row.try_get("avg_ms")?,
            });
        }

        Ok(performance)
    }

    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM sagas WHERE completed_at IS NOT NULL AND completed_at < $1")
                .bind(older_than)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
