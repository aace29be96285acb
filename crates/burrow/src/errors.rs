use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for printing to the host as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub category: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ErrorReport {
    pub fn new(code: &'static str, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Map any report to the host-visible shape. Unclassified failures become `internal`.
    pub fn from_report(e: &eyre::Report) -> Self {
        e.downcast_ref::<WalletError>().map_or_else(
            || Self::new("internal", "internal", format!("{e:#}")),
            |we| Self::from(we.clone()),
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("{0}")]
    InvalidPasscode(String),

    #[error("Invalid seed phrase")]
    InvalidSeedPhrase,

    #[error("Invalid recipient address")]
    InvalidAddress,

    #[error("Invalid token contract")]
    InvalidContract,

    #[error("{0}")]
    InvalidAmount(String),

    #[error("Theft passcode must differ from the wallet passcode")]
    TheftPasscodeMatchesPrimary,

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("decryption failed")]
    Decryption,

    #[error("Wrong passcode")]
    WrongPasscode,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("Decryption succeeded but wallet address mismatch. Storage may be corrupted.")]
    StorageCorrupted,

    /// Present but undecodable, or of an unknown version. Only a reset recovers.
    #[error("stored record {0} is corrupted; reset is required")]
    CorruptRecord(String),

    #[error("Wrong network. Expected {display_name} ({expected}), got {actual}")]
    WrongNetwork {
        display_name: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    InsufficientFunds(String),

    #[error("{0}")]
    Transport(String),

    #[error("Wallet is locked. Unlock to continue.")]
    WalletLocked,

    #[error("No wallet found")]
    NoWallet,

    #[error("another custody operation is in progress; retry the operation")]
    CustodyOperationInProgress,
}

impl WalletError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPasscode(_) => "invalid_passcode",
            Self::InvalidSeedPhrase => "invalid_seed_phrase",
            Self::InvalidAddress => "invalid_address",
            Self::InvalidContract => "invalid_contract",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::TheftPasscodeMatchesPrimary => "theft_passcode_matches_primary",
            Self::UnknownChain(_) => "unknown_chain",
            Self::Decryption => "decryption_error",
            Self::WrongPasscode => "wrong_passcode",
            Self::Storage(_) => "storage_error",
            Self::StorageCorrupted | Self::CorruptRecord(_) => "storage_corrupted",
            Self::WrongNetwork { .. } => "wrong_network",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::Transport(_) => "transport_error",
            Self::WalletLocked => "wallet_locked",
            Self::NoWallet => "no_wallet",
            Self::CustodyOperationInProgress => "custody_operation_in_progress",
        }
    }

    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidPasscode(_)
            | Self::InvalidSeedPhrase
            | Self::InvalidAddress
            | Self::InvalidContract
            | Self::InvalidAmount(_)
            | Self::TheftPasscodeMatchesPrimary
            | Self::UnknownChain(_) => "validation",
            Self::Decryption | Self::WrongPasscode => "passcode",
            Self::Storage(_) => "storage",
            Self::StorageCorrupted | Self::CorruptRecord(_) => "storage_corrupted",
            Self::WrongNetwork { .. } => "network",
            Self::InsufficientFunds(_) => "funds",
            Self::Transport(_) => "transport",
            Self::WalletLocked | Self::NoWallet => "state",
            Self::CustodyOperationInProgress => "busy",
        }
    }

    /// Storage failures keep the full context chain in the message.
    pub fn storage(e: &eyre::Report) -> eyre::Report {
        Self::Storage(format!("{e:#}")).into()
    }
}

impl From<WalletError> for ErrorReport {
    fn from(e: WalletError) -> Self {
        let mut out = Self::new(e.code(), e.category(), e.to_string());
        if let WalletError::WrongNetwork {
            expected, actual, ..
        } = e
        {
            out.data = serde_json::json!({ "expected": expected, "actual": actual });
        }
        out
    }
}
