use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{BatchTransition, BetTransition, SettlementStore, StoreError, StoreResult};
use crate::domain::{AuditLogEntry, Batch, Bet, NewAuditEntry, NewBet};

const BET_COLUMNS: &str = r#"
    bet_id, created_at, updated_at, user_wallet, vault_address, allowance_pda, casino_id,
    game_type, stake_amount, stake_token, choice, status,
    external_batch_id, solana_tx_id, retry_count, processor_id,
    last_error_code, last_error_message, payout_amount, won,
    drawn_outcome, retry_after, version
"#;

const BATCH_COLUMNS: &str = r#"
    batch_id, created_at, updated_at, processor_id, status, bet_count,
    solana_tx_id, blockhash, confirm_slot, confirm_status, retry_count,
    last_error_code, last_error_message
"#;

const AUDIT_COLUMNS: &str = r#"
    id, event_time, event_type, aggregate_id, user_id,
    before_state, after_state, metadata, actor
"#;

#[derive(Debug, FromRow)]
struct BetRow {
    bet_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    user_wallet: String,
    vault_address: String,
    allowance_pda: Option<String>,
    casino_id: Option<String>,
    game_type: String,
    stake_amount: i64,
    stake_token: String,
    choice: String,
    status: String,
    external_batch_id: Option<Uuid>,
    solana_tx_id: Option<String>,
    retry_count: i32,
    processor_id: Option<String>,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    payout_amount: Option<i64>,
    won: Option<bool>,
    drawn_outcome: Option<String>,
    retry_after: Option<DateTime<Utc>>,
    version: i32,
}

impl TryFrom<BetRow> for Bet {
    type Error = StoreError;

    fn try_from(row: BetRow) -> StoreResult<Self> {
        let status = row
            .status
            .parse()
            .map_err(|detail| StoreError::Corrupt { entity: "bet", detail })?;
        Ok(Bet {
            bet_id: row.bet_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user_wallet: row.user_wallet,
            vault_address: row.vault_address,
            allowance_pda: row.allowance_pda,
            casino_id: row.casino_id,
            game_type: row.game_type,
            stake_amount: row.stake_amount,
            stake_token: row.stake_token,
            choice: row.choice,
            status,
            external_batch_id: row.external_batch_id,
            solana_tx_id: row.solana_tx_id,
            retry_count: row.retry_count,
            processor_id: row.processor_id,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            payout_amount: row.payout_amount,
            won: row.won,
            drawn_outcome: row.drawn_outcome,
            retry_after: row.retry_after,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    batch_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processor_id: String,
    status: String,
    bet_count: i32,
    solana_tx_id: Option<String>,
    blockhash: Option<String>,
    confirm_slot: Option<i64>,
    confirm_status: Option<String>,
    retry_count: i32,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> StoreResult<Self> {
        let status = row
            .status
            .parse()
            .map_err(|detail| StoreError::Corrupt { entity: "batch", detail })?;
        Ok(Batch {
            batch_id: row.batch_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processor_id: row.processor_id,
            status,
            bet_count: row.bet_count,
            solana_tx_id: row.solana_tx_id,
            blockhash: row.blockhash,
            confirm_slot: row.confirm_slot,
            confirm_status: row.confirm_status,
            retry_count: row.retry_count,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    event_time: DateTime<Utc>,
    event_type: String,
    aggregate_id: String,
    user_id: Option<String>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
    actor: String,
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        AuditLogEntry {
            id: row.id,
            event_time: row.event_time,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            user_id: row.user_id,
            before_state: row.before_state,
            after_state: row.after_state,
            metadata: row.metadata,
            actor: row.actor,
        }
    }
}

fn bets_from_rows(rows: Vec<BetRow>) -> StoreResult<Vec<Bet>> {
    rows.into_iter().map(Bet::try_from).collect()
}

pub struct PostgresSettlementStore {
    pool: PgPool,
}

impl PostgresSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_audit(
        tx: &mut Transaction<'_, Postgres>,
        entry: NewAuditEntry,
    ) -> StoreResult<AuditLogEntry> {
        let row: AuditRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO audit_log (
                event_time, event_type, aggregate_id, user_id,
                before_state, after_state, metadata, actor
            )
            VALUES (NOW(), $1, $2, $3, $4, $5, $6, $7)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(entry.event_type)
        .bind(entry.aggregate_id)
        .bind(entry.user_id)
        .bind(entry.before_state)
        .bind(entry.after_state)
        .bind(entry.metadata)
        .bind(entry.actor)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }
}

#[async_trait]
impl SettlementStore for PostgresSettlementStore {
    async fn create_bet(&self, bet: NewBet, audit: NewAuditEntry) -> StoreResult<Bet> {
        let mut tx = self.pool.begin().await?;

        let row: BetRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO bets (
                bet_id, user_wallet, vault_address, allowance_pda, casino_id,
                game_type, stake_amount, stake_token, choice, status
            )
            VALUES ($1, $2, $3, $4, $5, 'coinflip', $6, $7, $8, 'pending')
            RETURNING {BET_COLUMNS}
            "#
        ))
        .bind(bet.bet_id)
        .bind(bet.user_wallet)
        .bind(bet.vault_address)
        .bind(bet.allowance_pda)
        .bind(bet.casino_id)
        .bind(bet.stake_amount)
        .bind(bet.stake_token)
        .bind(bet.choice.as_str())
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn find_bet(&self, bet_id: Uuid) -> StoreResult<Option<Bet>> {
        let query = format!("SELECT {BET_COLUMNS} FROM bets WHERE bet_id = $1");
        let row: Option<BetRow> = sqlx::query_as(&query)
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Bet::try_from).transpose()
    }

    async fn find_bets_by_user(
        &self,
        user_wallet: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let rows: Vec<BetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BET_COLUMNS}
            FROM bets
            WHERE user_wallet = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_wallet)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        bets_from_rows(rows)
    }

    async fn find_pending(&self, limit: i64, now: DateTime<Utc>) -> StoreResult<Vec<Bet>> {
        let rows: Vec<BetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BET_COLUMNS}
            FROM bets
            WHERE status = 'pending'
              AND (retry_after IS NULL OR retry_after <= $2)
            ORDER BY created_at ASC, bet_id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        bets_from_rows(rows)
    }

    async fn create_batch(
        &self,
        batch_id: Uuid,
        processor_id: &str,
        audit: NewAuditEntry,
    ) -> StoreResult<Batch> {
        let mut tx = self.pool.begin().await?;

        let row: BatchRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO batches (batch_id, processor_id, status, bet_count)
            VALUES ($1, $2, 'created', 0)
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(batch_id)
        .bind(processor_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn set_batch_bet_count(&self, batch_id: Uuid, bet_count: i32) -> StoreResult<()> {
        let result = sqlx::query("UPDATE batches SET bet_count = $2 WHERE batch_id = $1")
            .bind(batch_id)
            .bind(bet_count)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "batch", id: batch_id });
        }
        Ok(())
    }

    async fn find_batch(&self, batch_id: Uuid) -> StoreResult<Option<Batch>> {
        let row: Option<BatchRow> =
            sqlx::query_as(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = $1"))
                .bind(batch_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Batch::try_from).transpose()
    }

    async fn bets_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Bet>> {
        let rows: Vec<BetRow> = sqlx::query_as(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE external_batch_id = $1 ORDER BY created_at ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        bets_from_rows(rows)
    }

    async fn transition_bet(&self, transition: BetTransition) -> StoreResult<Bet> {
        let mut tx = self.pool.begin().await?;
        let patch = transition.patch;

        let row: Option<BetRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bets SET
                status = $4,
                version = version + 1,
                updated_at = NOW(),
                processor_id = CASE WHEN $5 THEN NULL ELSE COALESCE($6, processor_id) END,
                external_batch_id = CASE WHEN $5 THEN NULL ELSE COALESCE($7, external_batch_id) END,
                solana_tx_id = COALESCE($8, solana_tx_id),
                retry_count = COALESCE($9, retry_count),
                retry_after = COALESCE($10, retry_after),
                last_error_code = COALESCE($11, last_error_code),
                last_error_message = COALESCE($12, last_error_message),
                payout_amount = COALESCE($13, payout_amount),
                won = COALESCE($14, won),
                drawn_outcome = COALESCE(drawn_outcome, $15)
            WHERE bet_id = $1 AND version = $2 AND status = $3
            RETURNING {BET_COLUMNS}
            "#
        ))
        .bind(transition.bet_id)
        .bind(transition.expected_version)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(patch.clear_assignment)
        .bind(patch.processor_id)
        .bind(patch.external_batch_id)
        .bind(patch.solana_tx_id)
        .bind(patch.retry_count)
        .bind(patch.retry_after)
        .bind(patch.last_error_code)
        .bind(patch.last_error_message)
        .bind(patch.payout_amount)
        .bind(patch.won)
        .bind(patch.drawn_outcome)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT bet_id FROM bets WHERE bet_id = $1")
                    .bind(transition.bet_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match exists {
                Some(_) => StoreError::Conflict {
                    entity: "bet",
                    id: transition.bet_id,
                    expected: format!(
                        "version {} in {}",
                        transition.expected_version, transition.from
                    ),
                },
                None => StoreError::NotFound {
                    entity: "bet",
                    id: transition.bet_id,
                },
            });
        };

        Self::insert_audit(&mut tx, transition.audit).await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn transition_batch(&self, transition: BatchTransition) -> StoreResult<Batch> {
        let mut tx = self.pool.begin().await?;
        let patch = transition.patch;

        let row: Option<BatchRow> = sqlx::query_as(&format!(
            r#"
            UPDATE batches SET
                status = $3,
                updated_at = NOW(),
                solana_tx_id = COALESCE($4, solana_tx_id),
                confirm_slot = COALESCE($5, confirm_slot),
                confirm_status = COALESCE($6, confirm_status),
                last_error_code = COALESCE($7, last_error_code),
                last_error_message = COALESCE($8, last_error_message),
                blockhash = COALESCE($9, blockhash)
            WHERE batch_id = $1 AND status = $2
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(transition.batch_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(patch.solana_tx_id)
        .bind(patch.confirm_slot)
        .bind(patch.confirm_status)
        .bind(patch.last_error_code)
        .bind(patch.last_error_message)
        .bind(patch.blockhash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::Conflict {
                entity: "batch",
                id: transition.batch_id,
                expected: format!("status {}", transition.from),
            });
        };

        Self::insert_audit(&mut tx, transition.audit).await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn stuck_batches(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Batch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM batches b
            WHERE (b.status = 'submitted' AND b.updated_at < $1)
               OR EXISTS (
                    SELECT 1 FROM bets m
                    WHERE m.external_batch_id = b.batch_id
                      AND m.status IN ('batched', 'submitted_to_solana',
                                       'confirmed_on_solana', 'failed_retryable')
                      AND m.updated_at < $1
               )
            ORDER BY b.updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn audit_trail(&self, aggregate_id: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE aggregate_id = $1 ORDER BY id ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditLogEntry::from).collect())
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
