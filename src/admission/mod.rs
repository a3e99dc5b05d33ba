//! Wager admission
//!
//! Validates a wager and commits it atomically: debit the bettor, apply the
//! stake to the pool and record the wager, all against the pool version the
//! quote was computed from. A commit that loses the version race is retried
//! from a fresh snapshot with jittered backoff, up to a bounded number of
//! attempts.

use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::balance::BalanceStore;
use crate::clock::Clock;
use crate::config::AdmissionConfig;
use crate::error::{BalanceError, WagerError};
use crate::lifecycle::MarketLifecycle;
use crate::notify::{PoolNotifier, PoolUpdate, UpdateKind};
use crate::pool::{quote_pool, PoolLedger, Quote};
use crate::types::{Amount, BettorId, MarketId, MarketStatus, OutcomeId, Pool, Wager, WagerId};
use crate::wagers::WagerBook;

/// Why one commit attempt did not go through
enum CommitError {
    /// Pool moved since the snapshot; retry from a fresh one
    Conflict { expected: u64, current: u64 },
    Rejected(WagerError),
}

impl From<WagerError> for CommitError {
    fn from(err: WagerError) -> Self {
        CommitError::Rejected(err)
    }
}

/// Exponential backoff capped at `max_ms`, plus up to `jitter_pct` of random extra delay
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_pct: f64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = base_ms.saturating_mul(1u64 << exp).min(max_ms);
    let jitter_cap = ((base as f64) * jitter_pct.clamp(0.0, 1.0)).round() as u64;
    let jitter = if jitter_cap > 0 {
        rand::thread_rng().gen_range(0..=jitter_cap)
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter))
}

fn map_balance_error(err: BalanceError, stake: Amount) -> WagerError {
    match err {
        BalanceError::InsufficientFunds {
            bettor_id,
            available,
            requested,
        } => WagerError::InsufficientFunds {
            bettor_id,
            available,
            requested,
        },
        BalanceError::UnknownAccount(bettor_id) => WagerError::InsufficientFunds {
            bettor_id,
            available: 0.0,
            requested: stake,
        },
        BalanceError::Unreachable(reason) => WagerError::Unavailable(reason),
    }
}

/// Shared state the commit section needs; owned so the section can run as its own task
struct CommitSection {
    ledger: Arc<PoolLedger>,
    balances: Arc<dyn BalanceStore>,
    wagers: Arc<WagerBook>,
    clock: Arc<dyn Clock>,
    config: AdmissionConfig,
}

/// Inputs of one commit attempt
struct CommitRequest {
    snapshot: Pool,
    outcome_id: OutcomeId,
    bettor_id: BettorId,
    stake: Amount,
    quote: Quote,
}

pub struct WagerAdmission {
    section: Arc<CommitSection>,
    lifecycle: Arc<MarketLifecycle>,
    notifier: PoolNotifier,
    /// Per-market commit section; held only while checking the version and writing
    commit_locks: RwLock<HashMap<MarketId, Arc<AsyncMutex<()>>>>,
}

impl WagerAdmission {
    pub fn new(
        ledger: Arc<PoolLedger>,
        lifecycle: Arc<MarketLifecycle>,
        balances: Arc<dyn BalanceStore>,
        wagers: Arc<WagerBook>,
        notifier: PoolNotifier,
        clock: Arc<dyn Clock>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            section: Arc::new(CommitSection {
                ledger,
                balances,
                wagers,
                clock,
                config,
            }),
            lifecycle,
            notifier,
            commit_locks: RwLock::new(HashMap::new()),
        }
    }

    fn commit_lock(&self, market_id: &MarketId) -> Result<Arc<AsyncMutex<()>>, WagerError> {
        if let Some(lock) = self
            .commit_locks
            .read()
            .map_err(|_| WagerError::Internal("commit lock index poisoned".to_string()))?
            .get(market_id)
        {
            return Ok(lock.clone());
        }
        let mut locks = self
            .commit_locks
            .write()
            .map_err(|_| WagerError::Internal("commit lock index poisoned".to_string()))?;
        Ok(locks
            .entry(market_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Admit one wager. Validation, state and funds failures leave no trace.
    ///
    /// Dropping the returned future never splits a commit: once started, the
    /// commit section runs to completion on its own task.
    pub async fn place_wager(
        &self,
        market_id: &MarketId,
        outcome_id: &OutcomeId,
        bettor_id: &BettorId,
        stake: Amount,
    ) -> Result<Wager, WagerError> {
        if !(stake.is_finite() && stake > 0.0) {
            return Err(WagerError::InvalidStake(stake));
        }

        // Shared with the commit task so a closing market drains only after it.
        let permit = Arc::new(self.lifecycle.admit(market_id)?);
        let market = permit.market().clone();
        if !market.has_outcome(outcome_id) {
            return Err(WagerError::UnknownOutcome {
                market_id: market_id.clone(),
                outcome_id: outcome_id.clone(),
            });
        }

        let lock = self.commit_lock(market_id)?;
        let config = &self.section.config;
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let snapshot = self.section.ledger.snapshot(market_id)?;
            let quote = quote_pool(&snapshot, outcome_id, market.takeout_rate, stake);

            let available = self
                .section
                .call_balances("check_balance", stake, || {
                    self.section.balances.check_balance(bettor_id)
                })
                .await?;
            if available < stake {
                debug!(
                    market_id = %market_id,
                    bettor_id = %bettor_id,
                    available = available,
                    stake = stake,
                    "[ADMIT] Rejecting wager for insufficient funds"
                );
                return Err(WagerError::InsufficientFunds {
                    bettor_id: bettor_id.clone(),
                    available,
                    requested: stake,
                });
            }

            let request = CommitRequest {
                snapshot,
                outcome_id: outcome_id.clone(),
                bettor_id: bettor_id.clone(),
                stake,
                quote,
            };
            let section = self.section.clone();
            let task_lock = lock.clone();
            let task_permit = permit.clone();
            let committed = tokio::spawn(async move {
                let result = section.commit(&task_lock, request).await;
                drop(task_permit);
                result
            })
            .await
            .map_err(|e| WagerError::Internal(format!("commit task failed: {}", e)))?;

            match committed {
                Ok((wager, pool)) => {
                    drop(permit);
                    info!(
                        market_id = %market_id,
                        outcome_id = %outcome_id,
                        bettor_id = %bettor_id,
                        wager_id = %wager.id,
                        stake = stake,
                        version = pool.version,
                        attempts = attempt,
                        "✅ [ADMIT] Wager committed"
                    );
                    let status = self
                        .lifecycle
                        .status(market_id)
                        .unwrap_or(MarketStatus::Open);
                    self.notifier
                        .publish(PoolUpdate::from_pool(&pool, status, UpdateKind::Admission));
                    return Ok(wager);
                }
                Err(CommitError::Conflict { expected, current }) => {
                    if attempt >= config.max_attempts {
                        warn!(
                            market_id = %market_id,
                            bettor_id = %bettor_id,
                            attempts = attempt,
                            "[ADMIT] Giving up after repeated version conflicts"
                        );
                        return Err(WagerError::Contended {
                            market_id: market_id.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = backoff_delay(
                        attempt,
                        config.backoff_base_ms,
                        config.backoff_max_ms,
                        config.jitter_pct,
                    );
                    debug!(
                        market_id = %market_id,
                        expected = expected,
                        current = current,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "[ADMIT] Version conflict, retrying from fresh snapshot"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(CommitError::Rejected(err)) => return Err(err),
            }
        }
    }
}

impl CommitSection {
    /// Run a balance-store call, retrying while the store is unreachable
    async fn call_balances<T, F, Fut>(
        &self,
        op: &'static str,
        stake: Amount,
        mut call: F,
    ) -> Result<T, WagerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BalanceError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(BalanceError::Unreachable(reason))
                    if attempt < self.config.dependency_attempts =>
                {
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_max_ms,
                        self.config.jitter_pct,
                    );
                    warn!(
                        op = op,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "[ADMIT] Balance store unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(map_balance_error(err, stake)),
            }
        }
    }

    /// The commit section: version check, debit, ledger write, wager record.
    ///
    /// Once the debit is attempted the commit is all-or-nothing.
    async fn commit(
        &self,
        lock: &AsyncMutex<()>,
        request: CommitRequest,
    ) -> Result<(Wager, Pool), CommitError> {
        let CommitRequest {
            snapshot,
            outcome_id,
            bettor_id,
            stake,
            quote,
        } = request;
        let market_id = &snapshot.market_id;
        let _section = lock.lock().await;

        let current = self
            .ledger
            .snapshot(market_id)
            .map_err(WagerError::from)?
            .version;
        if current != snapshot.version {
            return Err(CommitError::Conflict {
                expected: snapshot.version,
                current,
            });
        }

        self.call_balances("debit", stake, || self.balances.debit(&bettor_id, stake))
            .await?;

        let wager_id = WagerId::new();
        let pool = match self
            .ledger
            .apply_stake(market_id, &outcome_id, stake, snapshot.version)
        {
            Ok(pool) => pool,
            Err(ledger_err) => {
                self.refund(&bettor_id, stake, &wager_id).await;
                return Err(WagerError::from(ledger_err).into());
            }
        };

        let wager = Wager {
            id: wager_id,
            market_id: market_id.clone(),
            outcome_id,
            bettor_id,
            stake,
            quote_at_placement: quote,
            pool_version: pool.version,
            placed_at: self.clock.now(),
            settled: false,
            payout: None,
        };
        if let Err(e) = self.wagers.insert(wager.clone()) {
            error!(
                market_id = %market_id,
                wager_id = %wager.id,
                error = %e,
                "[ADMIT] Stake is in the pool but the wager was not recorded"
            );
            return Err(WagerError::from(e).into());
        }

        Ok((wager, pool))
    }

    /// Return a debit whose ledger write failed
    async fn refund(&self, bettor_id: &BettorId, stake: Amount, wager_id: &WagerId) {
        let key = format!("refund:{}", wager_id);
        match self
            .call_balances("refund", stake, || self.balances.credit(bettor_id, stake, &key))
            .await
        {
            Ok(_) => warn!(
                bettor_id = %bettor_id,
                stake = stake,
                "[ADMIT] Ledger write failed after debit, stake refunded"
            ),
            Err(e) => error!(
                bettor_id = %bettor_id,
                stake = stake,
                key = %key,
                error = %e,
                "[ADMIT] Refund after failed ledger write did not go through"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{CreditOutcome, InMemoryBalanceStore};
    use crate::clock::SystemClock;
    use crate::directory::InMemoryMarketDirectory;
    use crate::types::Market;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicBool, Ordering};

    mock! {
        pub Balances {}

        #[async_trait]
        impl BalanceStore for Balances {
            async fn check_balance(&self, bettor_id: &BettorId) -> Result<Amount, BalanceError>;
            async fn debit(&self, bettor_id: &BettorId, amount: Amount) -> Result<(), BalanceError>;
            async fn credit(
                &self,
                bettor_id: &BettorId,
                amount: Amount,
                idempotency_key: &str,
            ) -> Result<CreditOutcome, BalanceError>;
        }
    }

    struct Harness {
        admission: WagerAdmission,
        ledger: Arc<PoolLedger>,
        wagers: Arc<WagerBook>,
        market: MarketId,
    }

    fn fast_config() -> AdmissionConfig {
        AdmissionConfig {
            max_attempts: 4,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            jitter_pct: 0.0,
            dependency_attempts: 3,
        }
    }

    fn harness(ledger: Arc<PoolLedger>, balances: Arc<dyn BalanceStore>) -> Harness {
        harness_with(ledger, balances, fast_config())
    }

    fn harness_with(
        ledger: Arc<PoolLedger>,
        balances: Arc<dyn BalanceStore>,
        config: AdmissionConfig,
    ) -> Harness {
        let market = Market::new("m", 0.1, &["a", "b"]);
        let directory = Arc::new(InMemoryMarketDirectory::new());
        directory.upsert(market.clone());
        ledger.open_pool(&market.id, &market.outcomes).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let lifecycle = Arc::new(MarketLifecycle::new(directory, ledger.clone(), clock.clone()));
        lifecycle.register(market.clone()).unwrap();
        let wagers = Arc::new(WagerBook::new());
        let admission = WagerAdmission::new(
            ledger.clone(),
            lifecycle,
            balances,
            wagers.clone(),
            PoolNotifier::new(16),
            clock,
            config,
        );
        Harness {
            admission,
            ledger,
            wagers,
            market: market.id,
        }
    }

    #[tokio::test]
    async fn commits_wager_with_quote_and_debit() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let x = BettorId::from("x");
        store.deposit(&x, 1500.0);
        let h = harness(Arc::new(PoolLedger::new()), store.clone());

        let wager = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &x, 1000.0)
            .await
            .unwrap();

        assert_eq!(store.balance_of(&x), 500.0);
        assert_eq!(wager.pool_version, 1);
        let eff = wager.quote_at_placement.effective_multiplier.unwrap();
        assert!((eff - 0.9).abs() < 1e-12);
        let pool = h.ledger.snapshot(&h.market).unwrap();
        assert_eq!(pool.total_stake, 1000.0);
        assert!(h.wagers.get(&wager.id).is_some());
    }

    #[tokio::test]
    async fn validation_failures_leave_no_trace() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let x = BettorId::from("x");
        store.deposit(&x, 50.0);
        let h = harness(Arc::new(PoolLedger::new()), store.clone());

        for bad in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                h.admission
                    .place_wager(&h.market, &OutcomeId::from("a"), &x, bad)
                    .await,
                Err(WagerError::InvalidStake(_))
            ));
        }
        assert!(matches!(
            h.admission
                .place_wager(&h.market, &OutcomeId::from("zzz"), &x, 10.0)
                .await,
            Err(WagerError::UnknownOutcome { .. })
        ));
        assert!(matches!(
            h.admission
                .place_wager(&h.market, &OutcomeId::from("a"), &x, 60.0)
                .await,
            Err(WagerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            h.admission
                .place_wager(&MarketId::from("nope"), &OutcomeId::from("a"), &x, 1.0)
                .await,
            Err(WagerError::UnknownMarket(_))
        ));

        assert_eq!(store.balance_of(&x), 50.0);
        assert_eq!(h.ledger.snapshot(&h.market).unwrap().version, 0);
        assert_eq!(h.wagers.count_for_market(&h.market), 0);
    }

    #[tokio::test]
    async fn retries_after_concurrent_pool_change() {
        let ledger = Arc::new(PoolLedger::new());
        let interfering = ledger.clone();
        let bumped = Arc::new(AtomicBool::new(false));
        let bumped_in_mock = bumped.clone();

        let mut balances = MockBalances::new();
        balances.expect_check_balance().returning(move |_| {
            // Another admission sneaks in between the first snapshot and its commit.
            if !bumped_in_mock.swap(true, Ordering::SeqCst) {
                interfering
                    .apply_stake(&MarketId::from("m"), &OutcomeId::from("b"), 500.0, 0)
                    .unwrap();
            }
            Ok(10_000.0)
        });
        balances.expect_debit().times(1).returning(|_, _| Ok(()));

        let h = harness(ledger, Arc::new(balances));
        let wager = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &BettorId::from("x"), 100.0)
            .await
            .unwrap();

        assert!(bumped.load(Ordering::SeqCst));
        assert_eq!(wager.pool_version, 2);
        // Quote reflects the pool it actually joined: 0.9 * 600 / 100.
        let eff = wager.quote_at_placement.effective_multiplier.unwrap();
        assert!((eff - 5.4).abs() < 1e-9);
        let pool = h.ledger.snapshot(&h.market).unwrap();
        assert_eq!(pool.total_stake, 600.0);
        assert!(pool.is_consistent());
    }

    #[tokio::test]
    async fn unreachable_store_surfaces_unavailable_after_retries() {
        let mut balances = MockBalances::new();
        balances
            .expect_check_balance()
            .times(3)
            .returning(|_| Err(BalanceError::Unreachable("connection refused".to_string())));
        balances.expect_debit().never();

        let h = harness(Arc::new(PoolLedger::new()), Arc::new(balances));
        let err = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &BettorId::from("x"), 10.0)
            .await
            .unwrap_err();

        assert!(matches!(err, WagerError::Unavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(h.ledger.snapshot(&h.market).unwrap().version, 0);
    }

    #[tokio::test]
    async fn debit_race_reports_insufficient_funds() {
        let mut balances = MockBalances::new();
        balances.expect_check_balance().returning(|_| Ok(100.0));
        balances.expect_debit().times(1).returning(|bettor, amount| {
            Err(BalanceError::InsufficientFunds {
                bettor_id: bettor.clone(),
                available: 0.0,
                requested: amount,
            })
        });

        let h = harness(Arc::new(PoolLedger::new()), Arc::new(balances));
        let err = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &BettorId::from("x"), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, WagerError::InsufficientFunds { .. }));
        assert!(h.ledger.snapshot(&h.market).unwrap().is_empty());
        assert_eq!(h.wagers.count_for_market(&h.market), 0);
    }

    #[tokio::test]
    async fn unknown_account_reports_the_requested_stake() {
        let mut balances = MockBalances::new();
        balances
            .expect_check_balance()
            .returning(|bettor| Err(BalanceError::UnknownAccount(bettor.clone())));
        balances.expect_debit().never();

        let h = harness(Arc::new(PoolLedger::new()), Arc::new(balances));
        let err = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &BettorId::from("ghost"), 40.0)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            WagerError::InsufficientFunds {
                bettor_id: BettorId::from("ghost"),
                available: 0.0,
                requested: 40.0,
            }
        );
    }

    #[tokio::test]
    async fn gives_up_as_contended_when_every_commit_loses_the_race() {
        let ledger = Arc::new(PoolLedger::new());
        let interfering = ledger.clone();

        let mut balances = MockBalances::new();
        balances.expect_check_balance().times(2).returning(move |_| {
            // Someone else commits between every snapshot and its commit.
            let market = MarketId::from("m");
            let version = interfering.snapshot(&market).unwrap().version;
            interfering
                .apply_stake(&market, &OutcomeId::from("b"), 1.0, version)
                .unwrap();
            Ok(10_000.0)
        });
        balances.expect_debit().never();

        let mut config = fast_config();
        config.max_attempts = 2;
        let h = harness_with(ledger, Arc::new(balances), config);
        let err = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &BettorId::from("x"), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, WagerError::Contended { attempts: 2, .. }));
        assert!(err.is_retryable());
        let pool = h.ledger.snapshot(&h.market).unwrap();
        assert_eq!(pool.stake_on(&OutcomeId::from("a")), 0.0);
        assert_eq!(pool.version, 2);
        assert_eq!(h.wagers.count_for_market(&h.market), 0);
    }

    /// Freezes the pool while the debit is in progress, so the ledger write that
    /// follows is rejected
    struct FreezeOnDebit {
        inner: InMemoryBalanceStore,
        ledger: Arc<PoolLedger>,
    }

    #[async_trait]
    impl BalanceStore for FreezeOnDebit {
        async fn check_balance(&self, bettor_id: &BettorId) -> Result<Amount, BalanceError> {
            self.inner.check_balance(bettor_id).await
        }

        async fn debit(&self, bettor_id: &BettorId, amount: Amount) -> Result<(), BalanceError> {
            self.inner.debit(bettor_id, amount).await?;
            self.ledger.freeze(&MarketId::from("m")).unwrap();
            Ok(())
        }

        async fn credit(
            &self,
            bettor_id: &BettorId,
            amount: Amount,
            idempotency_key: &str,
        ) -> Result<CreditOutcome, BalanceError> {
            self.inner.credit(bettor_id, amount, idempotency_key).await
        }
    }

    #[tokio::test]
    async fn failed_ledger_write_refunds_the_debit() {
        let ledger = Arc::new(PoolLedger::new());
        let store = Arc::new(FreezeOnDebit {
            inner: InMemoryBalanceStore::new(),
            ledger: ledger.clone(),
        });
        let x = BettorId::from("x");
        store.inner.deposit(&x, 250.0);
        let h = harness(ledger, store.clone());

        let err = h
            .admission
            .place_wager(&h.market, &OutcomeId::from("a"), &x, 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, WagerError::Internal(_)));
        assert_eq!(store.inner.balance_of(&x), 250.0);
        let pool = h.ledger.snapshot(&h.market).unwrap();
        assert!(pool.is_empty());
        assert_eq!(h.wagers.count_for_market(&h.market), 0);
    }

    /// Applies the debit, then stalls before acknowledging it
    struct SlowDebit {
        inner: InMemoryBalanceStore,
        delay: Duration,
    }

    #[async_trait]
    impl BalanceStore for SlowDebit {
        async fn check_balance(&self, bettor_id: &BettorId) -> Result<Amount, BalanceError> {
            self.inner.check_balance(bettor_id).await
        }

        async fn debit(&self, bettor_id: &BettorId, amount: Amount) -> Result<(), BalanceError> {
            self.inner.debit(bettor_id, amount).await?;
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn credit(
            &self,
            bettor_id: &BettorId,
            amount: Amount,
            idempotency_key: &str,
        ) -> Result<CreditOutcome, BalanceError> {
            self.inner.credit(bettor_id, amount, idempotency_key).await
        }
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_split_the_commit() {
        let store = Arc::new(SlowDebit {
            inner: InMemoryBalanceStore::new(),
            delay: Duration::from_millis(200),
        });
        let x = BettorId::from("x");
        store.inner.deposit(&x, 100.0);
        let h = harness(Arc::new(PoolLedger::new()), store.clone());

        let placed = tokio::time::timeout(
            Duration::from_millis(20),
            h.admission
                .place_wager(&h.market, &OutcomeId::from("a"), &x, 100.0),
        )
        .await;
        assert!(placed.is_err());

        // The commit keeps running without its caller.
        for _ in 0..100 {
            if h.wagers.count_for_market(&h.market) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let pool = h.ledger.snapshot(&h.market).unwrap();
        assert_eq!(store.inner.balance_of(&x), 0.0);
        assert_eq!(pool.total_stake, 100.0);
        assert_eq!(h.wagers.count_for_market(&h.market), 1);
        assert_eq!(store.inner.balance_of(&x) + pool.total_stake, 100.0);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1, 2, 100, 0.0), Duration::from_millis(2));
        assert_eq!(backoff_delay(3, 2, 100, 0.0), Duration::from_millis(8));
        assert_eq!(backoff_delay(30, 2, 100, 0.0), Duration::from_millis(100));
        let jittered = backoff_delay(1, 10, 100, 0.5);
        assert!(jittered >= Duration::from_millis(10) && jittered <= Duration::from_millis(15));
    }
}
