//! Ledger-facing data model for the rtxn stack
//!
//! This crate holds the values the submission client exchanges with a remote
//! ledger server, with none of the submission logic itself:
//!
//! - [`AccountId`]: validated classic account addresses
//! - [`Amount`]: native drops or issued-currency amounts as one tagged union
//! - [`EngineResult`]: server result codes and their retry classification
//! - [`TransactionTemplate`] / [`PreparedTransaction`] / [`SignedTransaction`]:
//!   the three stages a transaction passes through before submission
//! - [`Signer`]: the seam behind which key handling lives
//!
//! ## Example
//!
//! ```rust
//! use rtxn_ledger_core::{AccountId, Amount, Drops, HmacSigner, Signer, TransactionTemplate};
//!
//! let alice = AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap();
//! let bob = AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap();
//!
//! let template = TransactionTemplate::payment(alice.clone(), bob, Amount::native(1_000_000));
//! let prepared = template.prepare(1, Drops::new(12), 100).unwrap();
//!
//! let signer = HmacSigner::new(alice, b"dev-secret".to_vec());
//! let signed = signer.sign(&prepared).unwrap();
//! assert_eq!(signed.sequence(), 1);
//! ```

pub mod account;
pub mod amount;
pub mod error;
pub mod result;
pub mod signer;
pub mod transaction;

pub use account::AccountId;
pub use amount::{Amount, Currency, Drops, IssuedAmount, IssuedValue};
pub use error::{LedgerError, LedgerResult};
pub use result::{codes, EngineResult, ResultClass};
pub use signer::{decode_blob, HmacSigner, Signer};
pub use transaction::{
    Memo, PreparedTransaction, SignedTransaction, TransactionKind, TransactionTemplate, TxHash,
};
