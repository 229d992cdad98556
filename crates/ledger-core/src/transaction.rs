//! Transaction templates, prepared transactions and signed blobs
//!
//! A caller describes *what* to do with a [`TransactionTemplate`]. The
//! submission client fills in the sequence, fee and expiry to produce a
//! [`PreparedTransaction`], whose canonical JSON encoding is what gets signed.
//! Signing yields a [`SignedTransaction`]: an immutable blob plus its hash.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::account::AccountId;
use crate::amount::{Amount, Drops};
use crate::error::{LedgerError, LedgerResult};

/// Prefix mixed into the transaction hash ("TXN\0")
const HASH_PREFIX_TRANSACTION_ID: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

/// 256-bit transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA-512Half over the transaction-id prefix and the signed blob
    pub fn of_blob(blob: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(HASH_PREFIX_TRANSACTION_ID);
        hasher.update(blob);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        Self(out)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| LedgerError::InvalidHash(s.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LedgerError::InvalidHash(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for TxHash {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.to_string()
    }
}

/// Free-form memo attached to a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Memo {
    pub memo_type: Option<String>,
    pub memo_data: String,
}

/// The action a transaction performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "TransactionType")]
pub enum TransactionKind {
    /// Move an amount to a destination
    #[serde(rename_all = "PascalCase")]
    Payment {
        destination: AccountId,
        amount: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_tag: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_max: Option<Amount>,
    },
    /// Change account flags. With neither flag set this is a no-op.
    #[serde(rename_all = "PascalCase")]
    AccountSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_flag: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clear_flag: Option<u32>,
    },
    /// Create or modify a trust line
    #[serde(rename_all = "PascalCase")]
    TrustSet { limit_amount: Amount },
    /// Place an offer on the exchange
    #[serde(rename_all = "PascalCase")]
    OfferCreate { taker_pays: Amount, taker_gets: Amount },
    /// Withdraw an offer
    #[serde(rename_all = "PascalCase")]
    OfferCancel { offer_sequence: u32 },
}

impl TransactionKind {
    /// Transaction type name as it appears on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::Payment { .. } => "Payment",
            TransactionKind::AccountSet { .. } => "AccountSet",
            TransactionKind::TrustSet { .. } => "TrustSet",
            TransactionKind::OfferCreate { .. } => "OfferCreate",
            TransactionKind::OfferCancel { .. } => "OfferCancel",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            TransactionKind::AccountSet {
                set_flag: None,
                clear_flag: None
            }
        )
    }

    fn validate(&self) -> LedgerResult<()> {
        match self {
            TransactionKind::Payment { amount, send_max, .. } => {
                if amount.is_zero() {
                    return Err(LedgerError::InvalidAmount("payment amount is zero".to_string()));
                }
                if let Some(Amount::Native(_)) = send_max {
                    if amount.is_native() {
                        return Err(LedgerError::InvalidAmount(
                            "native-to-native payment cannot carry SendMax".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            TransactionKind::OfferCreate { taker_pays, taker_gets } => {
                if taker_pays.same_asset(taker_gets) {
                    return Err(LedgerError::CurrencyMismatch {
                        left: taker_pays.asset(),
                        right: taker_gets.asset(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// An unsigned request: action and parameters, no sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTemplate {
    pub account: AccountId,
    pub kind: TransactionKind,
    /// Explicit fee; computed from server load when absent
    pub fee: Option<Drops>,
    /// Explicit expiry ledger; defaulted by the submission client when absent
    pub last_ledger_sequence: Option<u32>,
    pub memos: Vec<Memo>,
}

impl TransactionTemplate {
    pub fn new(account: AccountId, kind: TransactionKind) -> Self {
        Self {
            account,
            kind,
            fee: None,
            last_ledger_sequence: None,
            memos: Vec::new(),
        }
    }

    /// Simple payment
    pub fn payment(account: AccountId, destination: AccountId, amount: Amount) -> Self {
        Self::new(
            account,
            TransactionKind::Payment {
                destination,
                amount,
                destination_tag: None,
                send_max: None,
            },
        )
    }

    /// A no-op `AccountSet`, used to consume an abandoned sequence number
    pub fn noop(account: AccountId) -> Self {
        Self::new(
            account,
            TransactionKind::AccountSet {
                set_flag: None,
                clear_flag: None,
            },
        )
    }

    pub fn with_fee(mut self, fee: Drops) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_last_ledger_sequence(mut self, ledger: u32) -> Self {
        self.last_ledger_sequence = Some(ledger);
        self
    }

    pub fn with_destination_tag(mut self, tag: u32) -> Self {
        if let TransactionKind::Payment { destination_tag, .. } = &mut self.kind {
            *destination_tag = Some(tag);
        }
        self
    }

    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memos.push(memo);
        self
    }

    /// Fill in the fields the submission client owns
    pub fn prepare(&self, sequence: u32, fee: Drops, last_ledger_sequence: u32) -> LedgerResult<PreparedTransaction> {
        self.kind.validate()?;
        Ok(PreparedTransaction {
            account: self.account.clone(),
            kind: self.kind.clone(),
            fee,
            sequence,
            last_ledger_sequence,
            memos: self.memos.clone(),
        })
    }
}

/// A fully specified, unsigned transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreparedTransaction {
    pub account: AccountId,
    #[serde(flatten)]
    pub kind: TransactionKind,
    pub fee: Drops,
    pub sequence: u32,
    pub last_ledger_sequence: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memos: Vec<Memo>,
}

impl PreparedTransaction {
    /// Deterministic bytes that a signer signs
    pub fn canonical_bytes(&self) -> LedgerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A signed transaction ready for submission
///
/// The blob is shared, never mutated: resubmission sends these exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    pub blob: Arc<Vec<u8>>,
    pub prepared: PreparedTransaction,
}

impl SignedTransaction {
    pub fn sequence(&self) -> u32 {
        self.prepared.sequence
    }

    pub fn account(&self) -> &AccountId {
        &self.prepared.account
    }

    pub fn last_ledger_sequence(&self) -> u32 {
        self.prepared.last_ledger_sequence
    }
}
