use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction as SqlxTransaction};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Per-user wallet. The `(available, locked)` pair is the only truly shared
/// mutable state in the system; every mutation goes through `apply_entry`.
#[derive(Debug, Clone, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub available_balance: BigDecimal,
    pub locked_balance: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger row. `new_* = previous_* ± amount` holds exactly, and
/// replaying a wallet's rows from zero yields its current balances.
#[derive(Debug, Clone, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub entry_type: WalletEntryType,
    pub amount: BigDecimal,
    pub previous_available: BigDecimal,
    pub new_available: BigDecimal,
    pub previous_locked: BigDecimal,
    pub new_locked: BigDecimal,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum WalletEntryType {
    Deposit,
    Withdrawal,
    Payment,
    Refund,
    Lock,
    Unlock,
}

impl fmt::Display for WalletEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Payment => "payment",
            Self::Refund => "refund",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        };
        f.write_str(s)
    }
}

/// Compute the balance pair after applying one entry. Rejects any result
/// that would drive either balance negative; callers apply the result and
/// the ledger row in one database transaction or not at all.
pub fn apply_entry_amounts(
    entry_type: WalletEntryType,
    available: &BigDecimal,
    locked: &BigDecimal,
    amount: &BigDecimal,
) -> DbResult<(BigDecimal, BigDecimal)> {
    if amount <= &BigDecimal::from(0) {
        return Err(DatabaseError::new(DatabaseErrorKind::CheckViolation {
            constraint: "wallet_amount_positive".to_string(),
        }));
    }

    let (new_available, new_locked) = match entry_type {
        WalletEntryType::Lock => (available - amount, locked + amount),
        WalletEntryType::Unlock => (available + amount, locked - amount),
        WalletEntryType::Payment => (available.clone(), locked - amount),
        WalletEntryType::Deposit | WalletEntryType::Refund => {
            (available + amount, locked.clone())
        }
        WalletEntryType::Withdrawal => (available - amount, locked.clone()),
    };

    if new_available < BigDecimal::from(0) {
        return Err(DatabaseError::insufficient_balance(
            available.clone(),
            amount.clone(),
        ));
    }
    if new_locked < BigDecimal::from(0) {
        return Err(DatabaseError::insufficient_balance(
            locked.clone(),
            amount.clone(),
        ));
    }

    Ok((new_available, new_locked))
}

/// Wallet ledger: atomic balance operations with an audit trail.
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find or lazily create the wallet for a user.
    pub async fn ensure_wallet(&self, user_id: Uuid, currency: &str) -> DbResult<Wallet> {
        if let Some(wallet) = self.find_by_user_id(user_id).await? {
            return Ok(wallet);
        }

        sqlx::query(
            "INSERT INTO user_wallets (id, user_id, currency, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(currency)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_by_user_id(user_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("wallet", user_id.to_string()))
    }

    pub async fn find_by_user_id(&self, user_id: Uuid) -> DbResult<Option<Wallet>> {
        sqlx::query_as::<_, Wallet>(
            "SELECT id, user_id, available_balance, locked_balance, currency, created_at, updated_at \
             FROM user_wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Reserve funds for a payment in flight: available -> locked.
    pub async fn lock(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        payment_reference: &str,
    ) -> DbResult<Wallet> {
        self.apply_entry(user_id, WalletEntryType::Lock, amount, Some(payment_reference))
            .await
    }

    /// Return reserved funds after a failed or expired payment.
    pub async fn unlock(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        payment_reference: &str,
    ) -> DbResult<Wallet> {
        self.apply_entry(
            user_id,
            WalletEntryType::Unlock,
            amount,
            Some(payment_reference),
        )
        .await
    }

    /// Settle a completed wallet payment: the locked reservation leaves the
    /// wallet for good.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        payment_reference: &str,
    ) -> DbResult<Wallet> {
        self.apply_entry(
            user_id,
            WalletEntryType::Payment,
            amount,
            Some(payment_reference),
        )
        .await
    }

    /// Add funds to the available balance (top-up deposit or refund).
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        entry_type: WalletEntryType,
        payment_reference: Option<&str>,
    ) -> DbResult<Wallet> {
        debug_assert!(matches!(
            entry_type,
            WalletEntryType::Deposit | WalletEntryType::Refund
        ));
        self.apply_entry(user_id, entry_type, amount, payment_reference)
            .await
    }

    /// One atomic read-modify-write: row lock, balance check, balance
    /// update, ledger append — committed together or not at all. The row
    /// lock serializes concurrent operations on the same wallet.
    async fn apply_entry(
        &self,
        user_id: Uuid,
        entry_type: WalletEntryType,
        amount: &BigDecimal,
        payment_reference: Option<&str>,
    ) -> DbResult<Wallet> {
        let mut tx: SqlxTransaction<'_, Postgres> =
            self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT id, user_id, available_balance, locked_balance, currency, created_at, updated_at \
             FROM user_wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("wallet", user_id.to_string()))?;

        let (new_available, new_locked) = apply_entry_amounts(
            entry_type,
            &wallet.available_balance,
            &wallet.locked_balance,
            amount,
        )?;

        let updated = sqlx::query_as::<_, Wallet>(
            "UPDATE user_wallets SET available_balance = $2, locked_balance = $3, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING id, user_id, available_balance, locked_balance, currency, created_at, updated_at",
        )
        .bind(wallet.id)
        .bind(&new_available)
        .bind(&new_locked)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO wallet_transactions \
             (id, wallet_id, entry_type, amount, previous_available, new_available, \
              previous_locked, new_locked, payment_reference, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(wallet.id)
        .bind(entry_type)
        .bind(amount)
        .bind(&wallet.available_balance)
        .bind(&new_available)
        .bind(&wallet.locked_balance)
        .bind(&new_locked)
        .bind(payment_reference)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        debug!(
            wallet_id = %wallet.id,
            entry = %entry_type,
            %amount,
            "wallet entry applied"
        );

        Ok(updated)
    }

    /// Ledger rows for a wallet in application order, for audit replay.
    pub async fn ledger_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<WalletTransaction>> {
        sqlx::query_as::<_, WalletTransaction>(
            "SELECT id, wallet_id, entry_type, amount, previous_available, new_available, \
                    previous_locked, new_locked, payment_reference, created_at \
             FROM wallet_transactions WHERE wallet_id = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3",
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

/// Replay a ledger sequence from zero. Audit invariant: the result must
/// equal the wallet's current `(available, locked)` pair.
pub fn replay_ledger(entries: &[WalletTransaction]) -> DbResult<(BigDecimal, BigDecimal)> {
    let mut available = BigDecimal::from(0);
    let mut locked = BigDecimal::from(0);
    for entry in entries {
        let (a, l) = apply_entry_amounts(entry.entry_type, &available, &locked, &entry.amount)?;
        available = a;
        locked = l;
    }
    Ok((available, locked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn lock_moves_available_to_locked() {
        let (a, l) = apply_entry_amounts(
            WalletEntryType::Lock,
            &dec("20000"),
            &dec("0"),
            &dec("15000"),
        )
        .unwrap();
        assert_eq!(a, dec("5000"));
        assert_eq!(l, dec("15000"));
    }

    #[test]
    fn lock_beyond_available_is_rejected_whole() {
        let err = apply_entry_amounts(
            WalletEntryType::Lock,
            &dec("5000"),
            &dec("0"),
            &dec("15000"),
        )
        .unwrap_err();
        match err.kind {
            DatabaseErrorKind::InsufficientBalance {
                available,
                required,
            } => {
                assert_eq!(available, dec("5000"));
                assert_eq!(required, dec("15000"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn debit_only_touches_locked() {
        let (a, l) = apply_entry_amounts(
            WalletEntryType::Payment,
            &dec("5000"),
            &dec("15000"),
            &dec("15000"),
        )
        .unwrap();
        assert_eq!(a, dec("5000"));
        assert_eq!(l, dec("0"));
    }

    #[test]
    fn unlock_returns_funds() {
        let (a, l) = apply_entry_amounts(
            WalletEntryType::Unlock,
            &dec("5000"),
            &dec("15000"),
            &dec("15000"),
        )
        .unwrap();
        assert_eq!(a, dec("20000"));
        assert_eq!(l, dec("0"));
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        for bad in ["0", "-1"] {
            let err = apply_entry_amounts(
                WalletEntryType::Deposit,
                &dec("100"),
                &dec("0"),
                &dec(bad),
            )
            .unwrap_err();
            assert!(matches!(
                err.kind,
                DatabaseErrorKind::CheckViolation { .. }
            ));
        }
    }

    #[test]
    fn no_sequence_can_drive_balances_negative() {
        // Walk a mixed sequence; every rejected step must leave the pair
        // untouched, every accepted step must keep both sides >= 0.
        let ops = [
            (WalletEntryType::Deposit, "10000"),
            (WalletEntryType::Lock, "4000"),
            (WalletEntryType::Payment, "9000"), // locked is 4000: reject
            (WalletEntryType::Lock, "7000"),    // available is 6000: reject
            (WalletEntryType::Payment, "4000"),
            (WalletEntryType::Unlock, "1"), // locked is 0: reject
            (WalletEntryType::Withdrawal, "6000"),
            (WalletEntryType::Withdrawal, "1"), // available is 0: reject
        ];

        let mut available = BigDecimal::from(0);
        let mut locked = BigDecimal::from(0);
        for (op, amount) in ops {
            match apply_entry_amounts(op, &available, &locked, &dec(amount)) {
                Ok((a, l)) => {
                    assert!(a >= BigDecimal::from(0));
                    assert!(l >= BigDecimal::from(0));
                    available = a;
                    locked = l;
                }
                Err(_) => { /* pair untouched */ }
            }
        }
        assert_eq!(available, dec("0"));
        assert_eq!(locked, dec("0"));
    }

    #[test]
    fn replay_reproduces_final_balances() {
        // Simulate the happy-path scenario: deposit, lock, debit.
        let mut entries = Vec::new();
        let mut available = BigDecimal::from(0);
        let mut locked = BigDecimal::from(0);
        let wallet_id = Uuid::new_v4();

        for (op, amount) in [
            (WalletEntryType::Deposit, "20000"),
            (WalletEntryType::Lock, "15000"),
            (WalletEntryType::Payment, "15000"),
        ] {
            let amount = dec(amount);
            let (a, l) = apply_entry_amounts(op, &available, &locked, &amount).unwrap();
            entries.push(WalletTransaction {
                id: Uuid::new_v4(),
                wallet_id,
                entry_type: op,
                amount,
                previous_available: available.clone(),
                new_available: a.clone(),
                previous_locked: locked.clone(),
                new_locked: l.clone(),
                payment_reference: None,
                created_at: Utc::now(),
            });
            available = a;
            locked = l;
        }

        let (replayed_available, replayed_locked) = replay_ledger(&entries).unwrap();
        assert_eq!(replayed_available, available);
        assert_eq!(replayed_locked, locked);
        assert_eq!(replayed_available, dec("5000"));
        assert_eq!(replayed_locked, dec("0"));
    }
}
