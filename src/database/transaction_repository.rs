use crate::database::error::{DatabaseError, DbResult};
use crate::payments::types::{PaymentMethod, TransactionStatus, TransactionType};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, internal_reference, provider_reference, idempotency_key, \
     user_id, amount, currency, payment_method, transaction_type, status, listing_id, \
     package_id, provider_response, metadata, claimed_at, created_at, updated_at, expires_at, \
     completed_at";

/// Canonical payment-intent record. Rows are never deleted; after creation
/// only status, provider reference/response and completion time may change.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub internal_reference: String,
    pub provider_reference: Option<String>,
    pub idempotency_key: String,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub listing_id: Option<Uuid>,
    pub package_id: Option<Uuid>,
    pub provider_response: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Input for creating a new payment intent.
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub transaction_type: TransactionType,
    pub idempotency_key: String,
    pub status: TransactionStatus,
    pub provider_reference: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub listing_id: Option<Uuid>,
    pub package_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a guarded status transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(Box<PaymentTransaction>),
    /// The row exists but its current status does not permit the edge;
    /// nothing was changed. Overlapping reconciliation runs land here.
    Illegal { current: TransactionStatus },
}

pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn generate_reference() -> String {
        format!("PAY-{}", Uuid::new_v4().simple())
    }

    pub async fn create(&self, new: NewPaymentTransaction) -> DbResult<PaymentTransaction> {
        let reference = Self::generate_reference();

        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "INSERT INTO payment_transactions \
             (id, internal_reference, provider_reference, idempotency_key, user_id, amount, \
              currency, payment_method, transaction_type, status, listing_id, package_id, \
              provider_response, metadata, created_at, updated_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW(), $15) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&reference)
        .bind(&new.provider_reference)
        .bind(&new.idempotency_key)
        .bind(new.user_id)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(new.payment_method)
        .bind(new.transaction_type)
        .bind(new.status)
        .bind(new.listing_id)
        .bind(new.package_id)
        .bind(&new.provider_response)
        .bind(&new.metadata)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_reference(&self, reference: &str) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE internal_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_provider_reference(
        &self,
        provider_reference: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE provider_reference = $1"
        ))
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Replay guard for `initiate`: a repeated submission with the same
    /// idempotency key returns the original intent instead of charging twice.
    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Apply a status transition if and only if the stored status permits
    /// the edge. The conditional update doubles as the claim that keeps
    /// overlapping reconciliation runs from double-processing: exactly one
    /// caller observes `Applied`.
    pub async fn transition(
        &self,
        reference: &str,
        next: TransactionStatus,
        provider_response: Option<serde_json::Value>,
    ) -> DbResult<TransitionOutcome> {
        let legal_sources: Vec<String> = TransactionStatus::legal_sources(next)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query_as::<_, PaymentTransaction>(&format!(
            "UPDATE payment_transactions \
             SET status = $2, \
                 provider_response = COALESCE($3, provider_response), \
                 completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE internal_reference = $1 AND status = ANY($4) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(reference)
        .bind(next)
        .bind(&provider_response)
        .bind(&legal_sources)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(tx) => Ok(TransitionOutcome::Applied(Box::new(tx))),
            None => {
                let current = self
                    .find_by_reference(reference)
                    .await?
                    .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;
                Ok(TransitionOutcome::Illegal {
                    current: current.status,
                })
            }
        }
    }

    /// Attach or replace the raw provider response blob.
    pub async fn set_provider_response(
        &self,
        reference: &str,
        provider_response: &serde_json::Value,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE payment_transactions SET provider_response = $2, updated_at = NOW() \
             WHERE internal_reference = $1",
        )
        .bind(reference)
        .bind(provider_response)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Record the provider's reference once the adapter has one.
    pub async fn set_provider_reference(
        &self,
        reference: &str,
        provider_reference: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE payment_transactions SET provider_reference = $2, updated_at = NOW() \
             WHERE internal_reference = $1",
        )
        .bind(reference)
        .bind(provider_reference)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Claim a batch of stale pending/processing transactions for
    /// reconciliation. `SKIP LOCKED` plus the claim lease keeps concurrent
    /// workers from picking up the same rows.
    pub async fn claim_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        claim_lease_secs: f64,
        limit: i64,
    ) -> DbResult<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "UPDATE payment_transactions \
             SET claimed_at = NOW(), updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM payment_transactions \
                 WHERE status IN ('pending', 'processing') \
                   AND created_at < $1 \
                   AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2)) \
                 ORDER BY created_at ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(older_than)
        .bind(claim_lease_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Release a claim early so the next reconciliation tick can re-check a
    /// still-pending transaction without waiting out the lease.
    pub async fn release_claim(&self, reference: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE payment_transactions SET claimed_at = NULL, updated_at = NOW() \
             WHERE internal_reference = $1",
        )
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
