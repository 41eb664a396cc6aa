//! End-to-end payment lifecycle tests.
//!
//! These tests require a running Postgres instance. Run with:
//! DATABASE_URL=postgres://... cargo test --test payment_flow_test -- --ignored

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use ikaze_payments::config::PaymentsConfig;
use ikaze_payments::database::promotion_repository::{PromotionRepository, PromotionStatus};
use ikaze_payments::database::transaction_repository::{
    TransactionRepository, TransitionOutcome,
};
use ikaze_payments::database::wallet_repository::{
    replay_ledger, WalletEntryType, WalletRepository,
};
use ikaze_payments::database::webhook_repository::WebhookRepository;
use ikaze_payments::error::{AppError, AppResult};
use ikaze_payments::notifications::LogEmitter;
use ikaze_payments::payments::providers::WalletProvider;
use ikaze_payments::payments::types::{
    ChargeIntent, InitiatePayment, PaymentMethod, ProviderCharge, ProviderPaymentStatus,
    ProviderRefund, RefundOutcome, RefundStatus, TransactionStatus, TransactionType,
    WebhookUpdate,
};
use ikaze_payments::payments::{PaymentProcessor, PaymentProvider};
use ikaze_payments::promotions::{
    ListingSnapshot, PromotionActivator, PromotionCatalog, PromotionPackage,
};
use ikaze_payments::reconciliation::Reconciler;
use ikaze_payments::settlement::SettlementEngine;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

const PACKAGE_PRICE: &str = "15000";
const PACKAGE_DURATION_DAYS: i32 = 7;

/// Catalog stub: one featured package priced at 15,000 RWF for 7 days.
struct StubCatalog {
    owner_id: Uuid,
}

#[async_trait]
impl PromotionCatalog for StubCatalog {
    async fn package(&self, package_id: Uuid) -> AppResult<PromotionPackage> {
        Ok(PromotionPackage {
            id: package_id,
            name: "Featured".to_string(),
            price: dec(PACKAGE_PRICE),
            currency: "RWF".to_string(),
            duration_days: PACKAGE_DURATION_DAYS,
            is_active: true,
        })
    }

    async fn listing(&self, listing_id: Uuid) -> AppResult<ListingSnapshot> {
        Ok(ListingSnapshot {
            id: listing_id,
            owner_id: self.owner_id,
            view_count: 10,
            inquiry_count: 2,
        })
    }
}

/// What the scripted provider should answer on the next `verify`.
enum MockVerify {
    Status(ProviderPaymentStatus),
    Unavailable,
}

/// Stand-in for an external provider with a scripted verify sequence.
struct MockProvider {
    method: PaymentMethod,
    verify_script: Mutex<VecDeque<MockVerify>>,
}

impl MockProvider {
    fn new(method: PaymentMethod, script: Vec<MockVerify>) -> Self {
        Self {
            method,
            verify_script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        Ok(ProviderCharge {
            provider_reference: Some(format!("prov-{}", intent.reference)),
            instructions: "Approve the charge on your phone.".to_string(),
            initial_status: TransactionStatus::Processing,
            provider_data: None,
            crypto: None,
        })
    }

    async fn verify(&self, _reference: &str) -> AppResult<ProviderPaymentStatus> {
        let mut script = self.verify_script.lock().await;
        match script.pop_front() {
            Some(MockVerify::Status(status)) => Ok(status),
            Some(MockVerify::Unavailable) => Err(AppError::provider_unavailable(
                "mock",
                "simulated timeout",
            )),
            None => Ok(ProviderPaymentStatus::Pending),
        }
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        Ok(RefundOutcome {
            refund_reference: format!("RF-{}", request.reference),
            status: RefundStatus::Completed,
        })
    }

    fn validate_webhook_signature(&self, _payload: &[u8], signature: &str) -> bool {
        signature == "valid-signature"
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| AppError::InvalidWebhookPayload {
                provider: "mock".to_string(),
                message: e.to_string(),
            })?;
        Ok(WebhookUpdate {
            provider_reference: value["reference"].as_str().unwrap_or_default().to_string(),
            status: match value["status"].as_str() {
                Some("completed") => ProviderPaymentStatus::Completed { paid_at: None },
                Some("failed") => ProviderPaymentStatus::Failed { reason: None },
                _ => ProviderPaymentStatus::Pending,
            },
            event_type: "mock.update".to_string(),
        })
    }
}

struct Harness {
    pool: sqlx::PgPool,
    transactions: Arc<TransactionRepository>,
    wallets: Arc<WalletRepository>,
    promotions: Arc<PromotionRepository>,
    processor: Arc<PaymentProcessor>,
    reconciler: Arc<Reconciler>,
}

async fn setup(mtn_script: Vec<MockVerify>) -> Harness {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = ikaze_payments::database::init_pool(&database_url, None)
        .await
        .expect("Failed to init DB pool");
    ikaze_payments::database::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let transactions = Arc::new(TransactionRepository::new(pool.clone()));
    let wallets = Arc::new(WalletRepository::new(pool.clone()));
    let promotions = Arc::new(PromotionRepository::new(pool.clone()));
    let webhooks = Arc::new(WebhookRepository::new(pool.clone()));

    let catalog: Arc<dyn PromotionCatalog> = Arc::new(StubCatalog {
        owner_id: Uuid::new_v4(),
    });
    let notifier = Arc::new(LogEmitter);
    let activator = Arc::new(PromotionActivator::new(promotions.clone(), catalog.clone()));
    let settlement = Arc::new(SettlementEngine::new(
        transactions.clone(),
        wallets.clone(),
        promotions.clone(),
        activator,
        notifier.clone(),
    ));

    let providers: Vec<Arc<dyn PaymentProvider>> = vec![
        Arc::new(MockProvider::new(PaymentMethod::MtnMomo, mtn_script)),
        Arc::new(WalletProvider::new(wallets.clone())),
    ];

    let config = PaymentsConfig {
        default_currency: "RWF".to_string(),
        supported_currencies: vec!["RWF".to_string()],
        payment_expiry_minutes: 60,
        reconcile_interval_secs: 1,
        reconcile_batch_size: 25,
        claim_lease_secs: 0,
    };

    let processor = Arc::new(PaymentProcessor::new(
        config.clone(),
        providers,
        transactions.clone(),
        promotions.clone(),
        webhooks.clone(),
        wallets.clone(),
        settlement.clone(),
        catalog.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        transactions.clone(),
        promotions.clone(),
        webhooks,
        processor.clone(),
        settlement,
        catalog,
        notifier,
        config,
    ));

    Harness {
        pool,
        transactions,
        wallets,
        promotions,
        processor,
        reconciler,
    }
}

fn promotion_request(
    user_id: Uuid,
    method: PaymentMethod,
    listing_id: Uuid,
) -> InitiatePayment {
    InitiatePayment {
        user_id,
        amount: dec(PACKAGE_PRICE),
        currency: "RWF".to_string(),
        payment_method: method,
        transaction_type: TransactionType::ListingPromotion,
        idempotency_key: format!("idem-{}", Uuid::new_v4()),
        msisdn: Some("250780000001".to_string()),
        listing_id: Some(listing_id),
        package_id: Some(Uuid::new_v4()),
        metadata: None,
    }
}

/// Make a fresh intent look old enough for the stale-pending claim.
async fn backdate(pool: &sqlx::PgPool, reference: &str, minutes: i64) {
    sqlx::query(
        "UPDATE payment_transactions \
         SET created_at = created_at - make_interval(mins => $2) \
         WHERE internal_reference = $1",
    )
    .bind(reference)
    .bind(minutes as i32)
    .execute(pool)
    .await
    .expect("backdate failed");
}

async fn force_expiry(pool: &sqlx::PgPool, reference: &str) {
    sqlx::query(
        "UPDATE payment_transactions \
         SET created_at = NOW() - INTERVAL '2 hours', \
             expires_at = NOW() - INTERVAL '1 hour' \
         WHERE internal_reference = $1",
    )
    .bind(reference)
    .execute(pool)
    .await
    .expect("force_expiry failed");
}

#[tokio::test]
#[ignore] // Requires database running
async fn wallet_payment_happy_path() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();
    let listing_id = Uuid::new_v4();

    // Fund the wallet with 20,000 RWF.
    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("20000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::Wallet, listing_id))
        .await
        .unwrap();
    assert_eq!(result.status, TransactionStatus::Processing);

    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, dec("5000"));
    assert_eq!(wallet.locked_balance, dec("15000"));

    // Reconcile: the wallet adapter confirms synchronously locked funds.
    backdate(&harness.pool, &result.reference, 2).await;
    harness.reconciler.run_once().await.unwrap();

    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.completed_at.is_some());

    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, dec("5000"));
    assert_eq!(wallet.locked_balance, dec("0"));

    // Ledger: deposit, lock, payment — and it replays to the final pair.
    let entries = harness
        .wallets
        .ledger_entries(wallet.id, 100, 0)
        .await
        .unwrap();
    let kinds: Vec<_> = entries.iter().map(|e| e.entry_type).collect();
    assert_eq!(
        kinds,
        vec![
            WalletEntryType::Deposit,
            WalletEntryType::Lock,
            WalletEntryType::Payment
        ]
    );
    let (available, locked) = replay_ledger(&entries).unwrap();
    assert_eq!(available, wallet.available_balance);
    assert_eq!(locked, wallet.locked_balance);

    // The promotion went live exactly once.
    let promotion = harness
        .promotions
        .find_by_payment_reference(&result.reference)
        .await
        .unwrap()
        .expect("promotion should exist");
    assert_eq!(promotion.status, PromotionStatus::Active);
}

#[tokio::test]
#[ignore] // Requires database running
async fn insufficient_balance_fails_fast_and_leaves_no_state() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("5000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let request = promotion_request(user_id, PaymentMethod::Wallet, Uuid::new_v4());
    let idempotency_key = request.idempotency_key.clone();
    let err = harness
        .processor
        .initiate_payment(request)
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientBalance {
            shortfall,
            currency,
        } => {
            assert_eq!(shortfall, dec("10000"));
            assert_eq!(currency, "RWF");
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }

    // No transaction row, no balance change.
    assert!(harness
        .transactions
        .find_by_idempotency_key(&idempotency_key)
        .await
        .unwrap()
        .is_none());
    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, dec("5000"));
    assert_eq!(wallet.locked_balance, dec("0"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn provider_timeout_then_success_activates_once() {
    let harness = setup(vec![
        MockVerify::Unavailable,
        MockVerify::Status(ProviderPaymentStatus::Pending),
        MockVerify::Status(ProviderPaymentStatus::Completed { paid_at: None }),
        // Extra completions simulate replayed reconciliation after settlement.
        MockVerify::Status(ProviderPaymentStatus::Completed { paid_at: None }),
    ])
    .await;
    let user_id = Uuid::new_v4();
    let listing_id = Uuid::new_v4();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::MtnMomo, listing_id))
        .await
        .unwrap();
    assert_eq!(result.status, TransactionStatus::Processing);
    backdate(&harness.pool, &result.reference, 2).await;

    // Two passes with no definitive answer leave it processing.
    for _ in 0..2 {
        harness.reconciler.run_once().await.unwrap();
        let tx = harness
            .processor
            .get_transaction(&result.reference)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
    }

    // Third pass completes and activates the promotion.
    harness.reconciler.run_once().await.unwrap();
    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);

    let promotion = harness
        .promotions
        .find_by_payment_reference(&result.reference)
        .await
        .unwrap()
        .expect("promotion should exist");
    let first_expiry = promotion.expires_at;

    // A fourth pass (terminal row is no longer claimable, but replay the
    // settlement directly) must not create a second promotion or move the
    // expiry.
    harness.reconciler.run_once().await.unwrap();
    let promotion_again = harness
        .promotions
        .find_by_payment_reference(&result.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promotion_again.id, promotion.id);
    assert_eq!(promotion_again.expires_at, first_expiry);
}

#[tokio::test]
#[ignore] // Requires database running
async fn overdue_wallet_payment_expires_and_unlocks() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("20000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::Wallet, Uuid::new_v4()))
        .await
        .unwrap();
    force_expiry(&harness.pool, &result.reference).await;

    harness.reconciler.run_once().await.unwrap();

    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Expired);

    // Locked funds returned in full.
    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, dec("20000"));
    assert_eq!(wallet.locked_balance, dec("0"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn illegal_transitions_leave_status_unchanged() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("20000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::Wallet, Uuid::new_v4()))
        .await
        .unwrap();
    backdate(&harness.pool, &result.reference, 2).await;
    harness.reconciler.run_once().await.unwrap();

    // Completed is terminal apart from refund.
    for next in [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Failed,
        TransactionStatus::Expired,
    ] {
        let outcome = harness
            .transactions
            .transition(&result.reference, next, None)
            .await
            .unwrap();
        assert!(
            matches!(
                outcome,
                TransitionOutcome::Illegal {
                    current: TransactionStatus::Completed
                }
            ),
            "completed -> {next} must be rejected"
        );
    }

    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
}

#[tokio::test]
#[ignore] // Requires database running
async fn concurrent_activation_creates_one_promotion() {
    let harness = setup(vec![MockVerify::Status(ProviderPaymentStatus::Completed {
        paid_at: None,
    })])
    .await;
    let user_id = Uuid::new_v4();
    let listing_id = Uuid::new_v4();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::MtnMomo, listing_id))
        .await
        .unwrap();
    backdate(&harness.pool, &result.reference, 2).await;
    harness.reconciler.run_once().await.unwrap();

    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);

    // Hammer the activator with concurrent replays of the same transaction.
    let catalog: Arc<dyn PromotionCatalog> = Arc::new(StubCatalog {
        owner_id: Uuid::new_v4(),
    });
    let activator = Arc::new(PromotionActivator::new(
        harness.promotions.clone(),
        catalog,
    ));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let activator = activator.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move { activator.activate(&tx).await }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all activations must land on one promotion");
}

#[tokio::test]
#[ignore] // Requires database running
async fn promotion_expiry_sweep_is_complete() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("20000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::Wallet, Uuid::new_v4()))
        .await
        .unwrap();
    backdate(&harness.pool, &result.reference, 2).await;
    harness.reconciler.run_once().await.unwrap();

    // Push the live promotion past its window, then sweep.
    sqlx::query(
        "UPDATE listing_promotions SET expires_at = NOW() - INTERVAL '1 minute' \
         WHERE payment_transaction_reference = $1",
    )
    .bind(&result.reference)
    .execute(&harness.pool)
    .await
    .unwrap();

    harness.reconciler.run_once().await.unwrap();

    let promotion = harness
        .promotions
        .find_by_payment_reference(&result.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promotion.status, PromotionStatus::Expired);

    // Sweep completeness: nothing active remains past its deadline.
    let overdue_active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM listing_promotions WHERE status = 'active' AND expires_at < NOW()",
    )
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert_eq!(overdue_active, 0);
}

#[tokio::test]
#[ignore] // Requires database running
async fn idempotency_key_replay_returns_original_intent() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();
    let listing_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("40000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let mut request = promotion_request(user_id, PaymentMethod::Wallet, listing_id);
    request.idempotency_key = format!("replay-{}", Uuid::new_v4());

    let first = harness
        .processor
        .initiate_payment(request.clone())
        .await
        .unwrap();
    let second = harness
        .processor
        .initiate_payment(request)
        .await
        .unwrap();

    assert_eq!(first.reference, second.reference);

    // Locked exactly once despite two submissions.
    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.locked_balance, dec("15000"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn refund_reverses_a_completed_wallet_payment() {
    let harness = setup(vec![]).await;
    let user_id = Uuid::new_v4();

    harness
        .wallets
        .ensure_wallet(user_id, "RWF")
        .await
        .unwrap();
    harness
        .wallets
        .credit(user_id, &dec("20000"), WalletEntryType::Deposit, None)
        .await
        .unwrap();

    let result = harness
        .processor
        .initiate_payment(promotion_request(user_id, PaymentMethod::Wallet, Uuid::new_v4()))
        .await
        .unwrap();
    backdate(&harness.pool, &result.reference, 2).await;
    harness.reconciler.run_once().await.unwrap();

    harness
        .processor
        .refund_payment(&result.reference, None, Some("admin decision".to_string()))
        .await
        .unwrap();

    let tx = harness
        .processor
        .get_transaction(&result.reference)
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Refunded);

    // Funds are back and the promotion slot was released.
    let wallet = harness
        .wallets
        .find_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, dec("20000"));
    let promotion = harness
        .promotions
        .find_by_payment_reference(&result.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promotion.status, PromotionStatus::Cancelled);

    // Refunding twice is rejected.
    assert!(harness
        .processor
        .refund_payment(&result.reference, None, None)
        .await
        .is_err());
}
