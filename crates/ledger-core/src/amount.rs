//! Amounts
//!
//! The ledger carries two shapes of amount: the native asset, counted in
//! integer drops, and issued assets identified by currency and issuer with a
//! decimal value. [`Amount`] is the tagged union of the two; comparisons and
//! arithmetic across different assets are errors rather than silent
//! coercions.
//!
//! ## Wire shape
//!
//! ```text
//! native:  "1000000"                                   (drops, as a string)
//! issued:  {"currency":"USD","issuer":"r...","value":"1.5"}
//! ```
//!
//! ## Issued value precision
//!
//! Issued values are stored as a normalized mantissa/exponent pair with 16
//! significant decimal digits and an exponent in `-96..=80`. Digits beyond
//! the 16th are truncated. Values below the smallest exponent collapse to
//! zero; values above the largest are an overflow.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::{LedgerError, LedgerResult};

/// Code reserved for the native asset
pub const NATIVE_CODE: &str = "XRP";

/// Drops per whole unit of the native asset
pub const DROPS_PER_NATIVE: u64 = 1_000_000;

/// Upper bound on any native amount (100 billion units)
pub const MAX_DROPS: u64 = 100_000_000_000 * DROPS_PER_NATIVE;

const MIN_MANTISSA: u128 = 1_000_000_000_000_000;
const MAX_MANTISSA: u128 = 9_999_999_999_999_999;
const MIN_EXPONENT: i32 = -96;
const MAX_EXPONENT: i32 = 80;
const PARSE_DIGIT_LIMIT: u128 = 1_000_000_000_000_000_000;

/// Integer amount of the native asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Drops(u64);

impl Drops {
    /// Zero drops
    pub const ZERO: Drops = Drops(0);

    /// Wrap a drop count
    pub const fn new(drops: u64) -> Self {
        Self(drops)
    }

    /// The drop count
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Parse a whole-unit decimal such as `"1.5"` into drops
    pub fn from_native_units(text: &str) -> LedgerResult<Self> {
        let invalid = || LedgerError::InvalidAmount(text.to_string());
        let (whole, frac) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 6 || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let mut frac_drops: u64 = if frac.is_empty() { 0 } else { frac.parse().map_err(|_| invalid())? };
        for _ in frac.len()..6 {
            frac_drops *= 10;
        }
        let drops = whole
            .checked_mul(DROPS_PER_NATIVE)
            .and_then(|d| d.checked_add(frac_drops))
            .ok_or(LedgerError::AmountOverflow)?;
        Self::checked(drops)
    }

    fn checked(drops: u64) -> LedgerResult<Self> {
        if drops > MAX_DROPS {
            return Err(LedgerError::AmountOverflow);
        }
        Ok(Self(drops))
    }

    /// Add, failing past [`MAX_DROPS`]
    pub fn checked_add(self, other: Drops) -> LedgerResult<Drops> {
        let sum = self.0.checked_add(other.0).ok_or(LedgerError::AmountOverflow)?;
        Self::checked(sum)
    }

    /// Subtract, failing below zero
    pub fn checked_sub(self, other: Drops) -> LedgerResult<Drops> {
        self.0
            .checked_sub(other.0)
            .map(Drops)
            .ok_or(LedgerError::AmountOverflow)
    }
}

impl fmt::Display for Drops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Drops {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::InvalidAmount(s.to_string()));
        }
        let drops: u64 = s.parse().map_err(|_| LedgerError::AmountOverflow)?;
        Self::checked(drops)
    }
}

impl TryFrom<String> for Drops {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Drops> for String {
    fn from(value: Drops) -> Self {
        value.0.to_string()
    }
}

/// Currency code of an issued asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a 3-character standard code or a 40-hex-digit nonstandard code
    pub fn parse(code: &str) -> LedgerResult<Self> {
        const SYMBOLS: &str = "?!@#$%^&*<>(){}[]|";
        let standard = code.len() == 3
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || SYMBOLS.contains(c))
            && code != NATIVE_CODE;
        if standard {
            return Ok(Self(code.to_string()));
        }
        let hex_code = code.len() == 40
            && code.bytes().all(|b| b.is_ascii_hexdigit())
            && !code.bytes().all(|b| b == b'0');
        if hex_code {
            return Ok(Self(code.to_ascii_uppercase()));
        }
        Err(LedgerError::InvalidCurrency(code.to_string()))
    }

    /// The code string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Decimal value of an issued amount, normalized mantissa and exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssuedValue {
    mantissa: i64,
    exponent: i32,
}

impl IssuedValue {
    /// Zero
    pub const ZERO: IssuedValue = IssuedValue { mantissa: 0, exponent: 0 };

    /// Build a value from any mantissa and exponent, normalizing it
    pub fn new(mantissa: i64, exponent: i32) -> LedgerResult<Self> {
        Self::normalize(mantissa as i128, exponent)
    }

    fn normalize(mantissa: i128, exponent: i32) -> LedgerResult<Self> {
        if mantissa == 0 {
            return Ok(Self::ZERO);
        }
        let negative = mantissa < 0;
        let mut m = mantissa.unsigned_abs();
        let mut e = exponent;
        while m < MIN_MANTISSA {
            m *= 10;
            e -= 1;
        }
        while m > MAX_MANTISSA {
            m /= 10;
            e += 1;
        }
        if e < MIN_EXPONENT {
            return Ok(Self::ZERO);
        }
        if e > MAX_EXPONENT {
            return Err(LedgerError::AmountOverflow);
        }
        let m = m as i64;
        Ok(Self {
            mantissa: if negative { -m } else { m },
            exponent: e,
        })
    }

    /// Normalized mantissa (zero, or 16 significant digits with sign)
    pub fn mantissa(&self) -> i64 {
        self.mantissa
    }

    /// Normalized exponent
    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    pub fn negate(&self) -> Self {
        Self {
            mantissa: -self.mantissa,
            exponent: self.exponent,
        }
    }

    /// Add two values, aligning to the larger exponent
    pub fn checked_add(&self, other: &IssuedValue) -> LedgerResult<IssuedValue> {
        if self.is_zero() {
            return Ok(*other);
        }
        if other.is_zero() {
            return Ok(*self);
        }
        let (mut m1, mut e1) = (self.mantissa as i128, self.exponent);
        let (mut m2, mut e2) = (other.mantissa as i128, other.exponent);
        while e1 < e2 {
            m1 /= 10;
            e1 += 1;
        }
        while e2 < e1 {
            m2 /= 10;
            e2 += 1;
        }
        Self::normalize(m1 + m2, e1)
    }

    pub fn checked_sub(&self, other: &IssuedValue) -> LedgerResult<IssuedValue> {
        self.checked_add(&other.negate())
    }
}

impl Ord for IssuedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let (sa, sb) = (self.mantissa.signum(), other.mantissa.signum());
        if sa != sb {
            return sa.cmp(&sb);
        }
        if sa == 0 {
            return Ordering::Equal;
        }
        let magnitude = (self.exponent, self.mantissa.abs()).cmp(&(other.exponent, other.mantissa.abs()));
        if sa > 0 {
            magnitude
        } else {
            magnitude.reverse()
        }
    }
}

impl PartialOrd for IssuedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for IssuedValue {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidAmount(s.to_string());
        let text = s.trim();
        let (negative, body) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (number, mut exponent) = match body.find(['e', 'E']) {
            Some(idx) => {
                let exp: i32 = body[idx + 1..].parse().map_err(|_| invalid())?;
                if exp.abs() > 1_000 {
                    return Err(invalid());
                }
                (&body[..idx], exp)
            }
            None => (body, 0),
        };
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut mantissa: u128 = 0;
        for digit in int_part.bytes().map(|b| (b - b'0') as u128) {
            if mantissa < PARSE_DIGIT_LIMIT {
                mantissa = mantissa * 10 + digit;
            } else {
                exponent += 1;
            }
        }
        for digit in frac_part.bytes().map(|b| (b - b'0') as u128) {
            if mantissa < PARSE_DIGIT_LIMIT {
                mantissa = mantissa * 10 + digit;
                exponent -= 1;
            }
        }

        let signed = if negative { -(mantissa as i128) } else { mantissa as i128 };
        Self::normalize(signed, exponent)
    }
}

impl fmt::Display for IssuedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mantissa == 0 {
            return f.write_str("0");
        }
        let mut m = self.mantissa.unsigned_abs();
        let mut e = self.exponent;
        while m % 10 == 0 {
            m /= 10;
            e += 1;
        }
        let digits = m.to_string();
        let body = if e >= 0 {
            format!("{}{}", digits, "0".repeat(e as usize))
        } else {
            let point = digits.len() as i32 + e;
            if point > 0 {
                let (head, tail) = digits.split_at(point as usize);
                format!("{}.{}", head, tail)
            } else {
                format!("0.{}{}", "0".repeat((-point) as usize), digits)
            }
        };
        if self.mantissa < 0 {
            write!(f, "-{}", body)
        } else {
            f.write_str(&body)
        }
    }
}

impl TryFrom<String> for IssuedValue {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IssuedValue> for String {
    fn from(value: IssuedValue) -> Self {
        value.to_string()
    }
}

/// An amount of an issued asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuedAmount {
    pub currency: Currency,
    pub issuer: AccountId,
    pub value: IssuedValue,
}

impl IssuedAmount {
    fn asset(&self) -> String {
        format!("{}/{}", self.currency, self.issuer)
    }
}

/// A ledger amount: native drops or an issued asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    /// Native asset, in drops
    Native(Drops),
    /// Issued asset with currency, issuer and decimal value
    Issued(IssuedAmount),
}

impl Amount {
    /// A native amount of `drops`
    pub fn native(drops: u64) -> Self {
        Amount::Native(Drops::new(drops))
    }

    /// An issued amount parsed from its parts
    ///
    /// ```rust
    /// use rtxn_ledger_core::Amount;
    ///
    /// let usd = Amount::issued("12.50", "USD", "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap();
    /// assert_eq!(usd.to_string(), "12.5/USD/rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh");
    /// ```
    pub fn issued(value: &str, currency: &str, issuer: &str) -> LedgerResult<Self> {
        Ok(Amount::Issued(IssuedAmount {
            currency: Currency::parse(currency)?,
            issuer: AccountId::parse(issuer)?,
            value: value.parse()?,
        }))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Amount::Native(_))
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Amount::Native(d) => d.get() == 0,
            Amount::Issued(i) => i.value.is_zero(),
        }
    }

    /// Asset label: `XRP` or `CUR/issuer`
    pub fn asset(&self) -> String {
        match self {
            Amount::Native(_) => NATIVE_CODE.to_string(),
            Amount::Issued(i) => i.asset(),
        }
    }

    /// Whether both amounts are of the same asset
    pub fn same_asset(&self, other: &Amount) -> bool {
        match (self, other) {
            (Amount::Native(_), Amount::Native(_)) => true,
            (Amount::Issued(a), Amount::Issued(b)) => a.currency == b.currency && a.issuer == b.issuer,
            _ => false,
        }
    }

    fn mismatch(&self, other: &Amount) -> LedgerError {
        LedgerError::CurrencyMismatch {
            left: self.asset(),
            right: other.asset(),
        }
    }

    /// Compare two amounts of the same asset
    pub fn compare(&self, other: &Amount) -> LedgerResult<Ordering> {
        match (self, other) {
            (Amount::Native(a), Amount::Native(b)) => Ok(a.cmp(b)),
            (Amount::Issued(a), Amount::Issued(b)) if self.same_asset(other) => Ok(a.value.cmp(&b.value)),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn checked_add(&self, other: &Amount) -> LedgerResult<Amount> {
        match (self, other) {
            (Amount::Native(a), Amount::Native(b)) => Ok(Amount::Native(a.checked_add(*b)?)),
            (Amount::Issued(a), Amount::Issued(b)) if self.same_asset(other) => Ok(Amount::Issued(IssuedAmount {
                currency: a.currency.clone(),
                issuer: a.issuer.clone(),
                value: a.value.checked_add(&b.value)?,
            })),
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn checked_sub(&self, other: &Amount) -> LedgerResult<Amount> {
        match (self, other) {
            (Amount::Native(a), Amount::Native(b)) => Ok(Amount::Native(a.checked_sub(*b)?)),
            (Amount::Issued(a), Amount::Issued(b)) if self.same_asset(other) => Ok(Amount::Issued(IssuedAmount {
                currency: a.currency.clone(),
                issuer: a.issuer.clone(),
                value: a.value.checked_sub(&b.value)?,
            })),
            _ => Err(self.mismatch(other)),
        }
    }
}

impl From<Drops> for Amount {
    fn from(value: Drops) -> Self {
        Amount::Native(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Native(d) => write!(f, "{} drops", d),
            Amount::Issued(i) => write!(f, "{}/{}/{}", i.value, i.currency, i.issuer),
        }
    }
}
