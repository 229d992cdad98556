//! Signing seam
//!
//! Real key handling and signature schemes live outside this workspace. The
//! submission client only needs something that turns a
//! [`PreparedTransaction`] into an immutable [`SignedTransaction`], so that
//! is all [`Signer`] asks for.
//!
//! [`HmacSigner`] is a self-contained implementation for development and
//! tests: it authenticates the canonical bytes with HMAC-SHA256 under a
//! shared secret and wraps both in a JSON envelope. [`decode_blob`] reverses
//! the envelope so in-memory ledgers can apply what they receive.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::trace;

use crate::account::AccountId;
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{PreparedTransaction, SignedTransaction, TxHash};

type HmacSha256 = Hmac<Sha256>;

/// Produces signed transactions for one account
pub trait Signer: Send + Sync {
    /// The account whose transactions this signer can sign
    fn account(&self) -> &AccountId;

    /// Sign a prepared transaction
    fn sign(&self, tx: &PreparedTransaction) -> LedgerResult<SignedTransaction>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignedEnvelope {
    #[serde(flatten)]
    tx: PreparedTransaction,
    txn_signature: String,
}

/// HMAC-SHA256 signer for development and testing
pub struct HmacSigner {
    account: AccountId,
    secret: Vec<u8>,
}

impl HmacSigner {
    pub fn new(account: AccountId, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            account,
            secret: secret.into(),
        }
    }

    fn mac(&self, bytes: &[u8]) -> LedgerResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        mac.update(bytes);
        Ok(hex::encode_upper(mac.finalize().into_bytes()))
    }

    /// Check a blob's signature against this signer's secret
    pub fn verify(&self, blob: &[u8]) -> LedgerResult<bool> {
        let envelope: SignedEnvelope = serde_json::from_slice(blob)?;
        let expected = self.mac(&envelope.tx.canonical_bytes()?)?;
        Ok(expected == envelope.txn_signature)
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Signer for HmacSigner {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn sign(&self, tx: &PreparedTransaction) -> LedgerResult<SignedTransaction> {
        if tx.account != self.account {
            return Err(LedgerError::Signing(format!(
                "signer for {} cannot sign for {}",
                self.account, tx.account
            )));
        }
        let signature = self.mac(&tx.canonical_bytes()?)?;
        let envelope = SignedEnvelope {
            tx: tx.clone(),
            txn_signature: signature,
        };
        let blob = serde_json::to_vec(&envelope)?;
        let hash = TxHash::of_blob(&blob);
        trace!(account = %tx.account, sequence = tx.sequence, %hash, "signed transaction");
        Ok(SignedTransaction {
            hash,
            blob: Arc::new(blob),
            prepared: tx.clone(),
        })
    }
}

/// Recover the prepared transaction and hash from a signed blob
pub fn decode_blob(blob: &[u8]) -> LedgerResult<(PreparedTransaction, TxHash)> {
    let envelope: SignedEnvelope = serde_json::from_slice(blob)?;
    Ok((envelope.tx, TxHash::of_blob(blob)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{Amount, Drops};
    use crate::transaction::TransactionTemplate;

    fn alice() -> AccountId {
        AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap()
    }

    fn bob() -> AccountId {
        AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap()
    }

    fn prepared(sequence: u32) -> PreparedTransaction {
        TransactionTemplate::payment(alice(), bob(), Amount::native(10))
            .prepare(sequence, Drops::new(12), 100)
            .unwrap()
    }

    #[test]
    fn test_sign_is_deterministic_and_decodable() {
        let signer = HmacSigner::new(alice(), b"secret".to_vec());
        let a = signer.sign(&prepared(1)).unwrap();
        let b = signer.sign(&prepared(1)).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.blob, b.blob);

        let (decoded, hash) = decode_blob(&a.blob).unwrap();
        assert_eq!(decoded, prepared(1));
        assert_eq!(hash, a.hash);
        assert!(signer.verify(&a.blob).unwrap());
    }

    #[test]
    fn test_different_sequence_gives_different_hash() {
        let signer = HmacSigner::new(alice(), b"secret".to_vec());
        assert_ne!(signer.sign(&prepared(1)).unwrap().hash, signer.sign(&prepared(2)).unwrap().hash);
    }

    #[test]
    fn test_wrong_account_refused() {
        let signer = HmacSigner::new(bob(), b"secret".to_vec());
        assert!(matches!(signer.sign(&prepared(1)), Err(LedgerError::Signing(_))));
    }

    #[test]
    fn test_verify_with_other_secret_fails() {
        let signer = HmacSigner::new(alice(), b"secret".to_vec());
        let other = HmacSigner::new(alice(), b"not-the-secret".to_vec());
        let signed = signer.sign(&prepared(3)).unwrap();
        assert!(!other.verify(&signed.blob).unwrap());
    }
}
