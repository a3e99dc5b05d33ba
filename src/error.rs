//! Error types for the tote engine
//!
//! Every engine error maps onto one [`ErrorClass`], which decides whether the
//! caller should retry.

use thiserror::Error;

use crate::types::{Amount, BettorId, MarketId, MarketStatus, OutcomeId, WagerId};

/// Coarse error taxonomy shared by all engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request, rejected immediately
    Validation,
    /// Market is in the wrong lifecycle status
    State,
    /// Bettor lacks the funds
    Resource,
    /// Lost an optimistic commit race
    Concurrency,
    /// External collaborator failed
    Dependency,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "VALIDATION"),
            ErrorClass::State => write!(f, "STATE"),
            ErrorClass::Resource => write!(f, "RESOURCE"),
            ErrorClass::Concurrency => write!(f, "CONCURRENCY"),
            ErrorClass::Dependency => write!(f, "DEPENDENCY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Outcome {outcome_id} does not belong to market {market_id}")]
    UnknownOutcome {
        market_id: MarketId,
        outcome_id: OutcomeId,
    },

    #[error("Pool for market {0} already exists")]
    AlreadyOpen(MarketId),

    #[error("Version conflict on market {market_id}: expected {expected}, current {current}")]
    VersionConflict {
        market_id: MarketId,
        expected: u64,
        current: u64,
    },

    #[error("Pool for market {0} is frozen")]
    Frozen(MarketId),

    #[error("Invalid stake amount: {0}")]
    InvalidAmount(Amount),

    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::UnknownMarket(_)
            | LedgerError::UnknownOutcome { .. }
            | LedgerError::InvalidAmount(_) => ErrorClass::Validation,
            LedgerError::AlreadyOpen(_) | LedgerError::Frozen(_) => ErrorClass::State,
            LedgerError::VersionConflict { .. } => ErrorClass::Concurrency,
            LedgerError::Poisoned(_) => ErrorClass::Dependency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    #[error("Insufficient funds for {bettor_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        bettor_id: BettorId,
        available: Amount,
        requested: Amount,
    },

    #[error("Unknown balance account: {0}")]
    UnknownAccount(BettorId),

    #[error("Balance store unreachable: {0}")]
    Unreachable(String),
}

impl BalanceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BalanceError::InsufficientFunds { .. } | BalanceError::UnknownAccount(_) => {
                ErrorClass::Resource
            }
            BalanceError::Unreachable(_) => ErrorClass::Dependency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WagerBookError {
    #[error("Wager {0} is already recorded")]
    Duplicate(WagerId),

    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl WagerBookError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WagerBookError::Duplicate(_) => ErrorClass::State,
            WagerBookError::Poisoned(_) => ErrorClass::Dependency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Market {0} is already registered")]
    AlreadyRegistered(MarketId),

    #[error("Invalid take-out rate {rate} for market {market_id}")]
    InvalidTakeoutRate { market_id: MarketId, rate: f64 },

    #[error("Market {market_id} has no outcomes")]
    NoOutcomes { market_id: MarketId },

    #[error("Market {market_id} cannot move from {from} to {to}")]
    InvalidTransition {
        market_id: MarketId,
        from: MarketStatus,
        to: MarketStatus,
    },

    #[error("Market {market_id} is not open (status {status})")]
    MarketNotOpen {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Wagers(#[from] WagerBookError),
}

impl LifecycleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LifecycleError::UnknownMarket(_)
            | LifecycleError::InvalidTakeoutRate { .. }
            | LifecycleError::NoOutcomes { .. } => ErrorClass::Validation,
            LifecycleError::AlreadyRegistered(_)
            | LifecycleError::InvalidTransition { .. }
            | LifecycleError::MarketNotOpen { .. } => ErrorClass::State,
            LifecycleError::Poisoned(_) => ErrorClass::Dependency,
            LifecycleError::Ledger(e) => e.class(),
            LifecycleError::Wagers(e) => e.class(),
        }
    }
}

/// Errors surfaced by `place_wager`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WagerError {
    #[error("Invalid stake: {0}")]
    InvalidStake(Amount),

    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Outcome {outcome_id} does not belong to market {market_id}")]
    UnknownOutcome {
        market_id: MarketId,
        outcome_id: OutcomeId,
    },

    #[error("Market {market_id} is not open (status {status})")]
    MarketNotOpen {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("Insufficient funds for {bettor_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        bettor_id: BettorId,
        available: Amount,
        requested: Amount,
    },

    #[error("Market {market_id} is contended: commit lost {attempts} version races")]
    Contended { market_id: MarketId, attempts: u32 },

    #[error("Balance store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WagerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WagerError::InvalidStake(_)
            | WagerError::UnknownMarket(_)
            | WagerError::UnknownOutcome { .. } => ErrorClass::Validation,
            WagerError::MarketNotOpen { .. } => ErrorClass::State,
            WagerError::InsufficientFunds { .. } => ErrorClass::Resource,
            WagerError::Contended { .. } => ErrorClass::Concurrency,
            WagerError::Unavailable(_) | WagerError::Internal(_) => ErrorClass::Dependency,
        }
    }

    /// Transient failures the caller may resubmit
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Concurrency | ErrorClass::Dependency
        )
    }
}

impl From<LifecycleError> for WagerError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::UnknownMarket(id) => WagerError::UnknownMarket(id),
            LifecycleError::MarketNotOpen { market_id, status } => {
                WagerError::MarketNotOpen { market_id, status }
            }
            other => WagerError::Internal(other.to_string()),
        }
    }
}

impl From<WagerBookError> for WagerError {
    fn from(err: WagerBookError) -> Self {
        WagerError::Internal(err.to_string())
    }
}

impl From<LedgerError> for WagerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownMarket(id) => WagerError::UnknownMarket(id),
            LedgerError::UnknownOutcome {
                market_id,
                outcome_id,
            } => WagerError::UnknownOutcome {
                market_id,
                outcome_id,
            },
            LedgerError::InvalidAmount(amount) => WagerError::InvalidStake(amount),
            other => WagerError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Market {0} is already settled")]
    MarketAlreadySettled(MarketId),

    #[error("Market {market_id} is not closed (status {status})")]
    MarketNotClosed {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("Outcome {outcome_id} does not belong to market {market_id}")]
    UnknownOutcome {
        market_id: MarketId,
        outcome_id: OutcomeId,
    },

    #[error("No winning outcome declared for market {0}")]
    NoWinners(MarketId),

    #[error("Market {market_id} was declared with winners {declared:?}, not {requested:?}")]
    WinnersMismatch {
        market_id: MarketId,
        declared: Vec<OutcomeId>,
        requested: Vec<OutcomeId>,
    },

    #[error("Settlement of market {0} is already in progress")]
    SettlementInProgress(MarketId),

    #[error("Credit for wager {wager_id} failed: {reason}")]
    CreditFailed { wager_id: WagerId, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl SettlementError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SettlementError::UnknownMarket(_)
            | SettlementError::UnknownOutcome { .. }
            | SettlementError::NoWinners(_) => ErrorClass::Validation,
            SettlementError::MarketAlreadySettled(_)
            | SettlementError::MarketNotClosed { .. }
            | SettlementError::WinnersMismatch { .. } => ErrorClass::State,
            SettlementError::SettlementInProgress(_) => ErrorClass::Concurrency,
            SettlementError::CreditFailed { .. } => ErrorClass::Dependency,
            SettlementError::Ledger(e) => e.class(),
            SettlementError::Lifecycle(e) => e.class(),
        }
    }

    /// A later settlement pass can pick up where this one stopped
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Concurrency | ErrorClass::Dependency
        )
    }
}
