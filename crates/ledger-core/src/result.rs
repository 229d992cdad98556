//! Engine result codes
//!
//! The server reports the outcome of applying a transaction as a short code
//! whose three-letter prefix names its class:
//!
//! | prefix | class | applied? | consumes sequence? | retry? |
//! |--------|-------|----------|--------------------|--------|
//! | `tes`  | success | yes | yes | no |
//! | `tec`  | claimed (fee only) | yes | yes | no |
//! | `tef`  | failure | no | no | no |
//! | `ter`  | retry | no | no | yes |
//! | `tem`  | malformed | no | no | no |
//! | `tel`  | local | no | no | yes |
//! | `tej`  | client-side | no | no | no |
//!
//! `tej` codes never come from the server; the submission client raises them
//! for conditions it detects itself (expiry, fee cap, supersession).
//!
//! Parsing is case-insensitive and canonicalises to lower-case prefix plus
//! upper-case remainder, so `tefdst_tag_needed` and `tefDST_TAG_NEEDED` are
//! the same result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Well-known result codes
pub mod codes {
    pub const TES_SUCCESS: &str = "tesSUCCESS";
    pub const TEC_UNFUNDED_PAYMENT: &str = "tecUNFUNDED_PAYMENT";
    pub const TEC_NO_DST_INSUF_XRP: &str = "tecNO_DST_INSUF_XRP";
    pub const TEF_PAST_SEQ: &str = "tefPAST_SEQ";
    pub const TEF_MAX_LEDGER: &str = "tefMAX_LEDGER";
    pub const TEF_DST_TAG_NEEDED: &str = "tefDST_TAG_NEEDED";
    pub const TEF_ALREADY: &str = "tefALREADY";
    pub const TER_PRE_SEQ: &str = "terPRE_SEQ";
    pub const TER_QUEUED: &str = "terQUEUED";
    pub const TER_RETRY: &str = "terRETRY";
    pub const TEM_MALFORMED: &str = "temMALFORMED";
    pub const TEM_BAD_AMOUNT: &str = "temBAD_AMOUNT";
    pub const TEL_INSUF_FEE_P: &str = "telINSUF_FEE_P";
    pub const TEL_CAN_NOT_QUEUE: &str = "telCAN_NOT_QUEUE";
    pub const TEJ_MAX_LEDGER: &str = "tejMaxLedger";
    pub const TEJ_MAX_FEE_EXCEEDED: &str = "tejMaxFeeExceeded";
    pub const TEJ_SUPERSEDED: &str = "tejSuperseded";
    pub const TEJ_ABORT: &str = "tejAbort";
}

/// Class of an engine result, from its prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultClass {
    Success,
    Claimed,
    Failure,
    Retry,
    Malformed,
    Local,
    Client,
}

impl ResultClass {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "tes" => Some(ResultClass::Success),
            "tec" => Some(ResultClass::Claimed),
            "tef" => Some(ResultClass::Failure),
            "ter" => Some(ResultClass::Retry),
            "tem" => Some(ResultClass::Malformed),
            "tel" => Some(ResultClass::Local),
            "tej" => Some(ResultClass::Client),
            _ => None,
        }
    }
}

/// A parsed engine result code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EngineResult {
    code: String,
    class: ResultClass,
}

impl EngineResult {
    /// Parse a code, case-insensitively
    ///
    /// ```rust
    /// use rtxn_ledger_core::{EngineResult, ResultClass};
    ///
    /// let r = EngineResult::parse("tefdst_tag_needed").unwrap();
    /// assert_eq!(r.code(), "tefDST_TAG_NEEDED");
    /// assert_eq!(r.class(), ResultClass::Failure);
    /// ```
    pub fn parse(code: &str) -> LedgerResult<Self> {
        if code.len() < 4 || !code.is_ascii() {
            return Err(LedgerError::InvalidResultCode(code.to_string()));
        }
        let (prefix, rest) = code.split_at(3);
        let prefix = prefix.to_ascii_lowercase();
        let class = ResultClass::from_prefix(&prefix)
            .ok_or_else(|| LedgerError::InvalidResultCode(code.to_string()))?;
        // Client codes are camel case and keep their spelling.
        let rest = if class == ResultClass::Client {
            client_canonical(rest)
        } else {
            rest.to_ascii_uppercase()
        };
        Ok(Self {
            code: format!("{}{}", prefix, rest),
            class,
        })
    }

    /// Build a result from a known-good code constant
    pub fn from_static(code: &'static str) -> Self {
        match Self::parse(code) {
            Ok(result) => result,
            Err(_) => Self {
                code: code.to_string(),
                class: ResultClass::Client,
            },
        }
    }

    pub fn success() -> Self {
        Self::from_static(codes::TES_SUCCESS)
    }

    /// Canonical code string
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn class(&self) -> ResultClass {
        self.class
    }

    /// Whether this is exactly `code` (case-insensitive)
    pub fn is(&self, code: &str) -> bool {
        self.code.eq_ignore_ascii_case(code)
    }

    pub fn is_success(&self) -> bool {
        self.class == ResultClass::Success
    }

    /// Applied to a ledger, so the sequence number is used up
    pub fn consumes_sequence(&self) -> bool {
        matches!(self.class, ResultClass::Success | ResultClass::Claimed)
    }

    /// Provisional: the same payload may still succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self.class, ResultClass::Retry | ResultClass::Local)
    }

    /// Final outcome; never retried
    pub fn is_definitive(&self) -> bool {
        !self.is_retryable()
    }

    /// The server expects an earlier sequence first
    pub fn is_sequence_ahead(&self) -> bool {
        self.is(codes::TER_PRE_SEQ)
    }

    /// The sequence slot has already been consumed by some transaction
    pub fn is_past_sequence(&self) -> bool {
        self.is(codes::TEF_PAST_SEQ) || self.is(codes::TEF_ALREADY)
    }
}

fn client_canonical(rest: &str) -> String {
    const CLIENT: [&str; 4] = [
        codes::TEJ_MAX_LEDGER,
        codes::TEJ_MAX_FEE_EXCEEDED,
        codes::TEJ_SUPERSEDED,
        codes::TEJ_ABORT,
    ];
    CLIENT
        .iter()
        .map(|c| &c[3..])
        .find(|known| known.eq_ignore_ascii_case(rest))
        .map(str::to_string)
        .unwrap_or_else(|| rest.to_string())
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for EngineResult {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EngineResult {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EngineResult> for String {
    fn from(value: EngineResult) -> Self {
        value.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalises_case() {
        let r = EngineResult::parse("TESsuccess").unwrap();
        assert_eq!(r.code(), codes::TES_SUCCESS);
        assert!(r.is_success());
        assert!(r.is("tessuccess"));

        let j = EngineResult::parse("tejmaxledger").unwrap();
        assert_eq!(j.code(), codes::TEJ_MAX_LEDGER);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        assert!(EngineResult::parse("abcFOO").is_err());
        assert!(EngineResult::parse("tes").is_err());
    }

    #[test]
    fn test_classification() {
        let pre_seq = EngineResult::from_static(codes::TER_PRE_SEQ);
        assert!(pre_seq.is_retryable());
        assert!(pre_seq.is_sequence_ahead());
        assert!(!pre_seq.consumes_sequence());

        let unfunded = EngineResult::from_static(codes::TEC_UNFUNDED_PAYMENT);
        assert!(unfunded.consumes_sequence());
        assert!(unfunded.is_definitive());
        assert!(!unfunded.is_success());

        let tag = EngineResult::from_static(codes::TEF_DST_TAG_NEEDED);
        assert!(tag.is_definitive());
        assert!(!tag.consumes_sequence());
        assert!(!tag.is_past_sequence());

        assert!(EngineResult::from_static(codes::TEF_PAST_SEQ).is_past_sequence());
        assert!(EngineResult::from_static(codes::TEL_INSUF_FEE_P).is_retryable());
        assert!(EngineResult::from_static(codes::TEM_MALFORMED).is_definitive());
    }

    #[test]
    fn test_serde_as_string() {
        let r = EngineResult::success();
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"tesSUCCESS\"");
        let back: EngineResult = serde_json::from_str("\"terpre_seq\"").unwrap();
        assert_eq!(back.code(), codes::TER_PRE_SEQ);
    }
}
