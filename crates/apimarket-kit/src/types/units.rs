//! Marketplace token amounts.

use std::fmt::{self, Display};
use std::ops::{Add, Mul};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::ParseAmountError;

/// Decimals of the marketplace payment token.
pub const TOKEN_DECIMALS: usize = 18;

/// Smallest units per whole token (10^18).
const BASE_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Fractional digits shown by [`Display`].
const DISPLAY_DECIMALS: usize = 6;

/// A token amount in the smallest unit (10^-18 token).
///
/// The value is carried as a 256-bit integer from the contract boundary to
/// the view layer, so amounts above 2^53 (or 2^64) never lose precision.
///
/// # Creating Amounts
///
/// ```
/// use apimarket_kit::TokenAmount;
///
/// let five = TokenAmount::tokens(5);
/// let hundred_base = TokenAmount::base(100);
/// assert!(five > hundred_base);
/// ```
///
/// # Parsing from Strings
///
/// - `"100"` - a bare whole number is taken as smallest units
/// - `"1.5 tokens"` or `"1.5 token"` - decimal whole tokens
///
/// Negative numbers, fractions of a smallest unit and exponents are rejected.
///
/// ```
/// use apimarket_kit::TokenAmount;
///
/// let amount: TokenAmount = "1.5 tokens".parse().unwrap();
/// assert_eq!(amount, TokenAmount::base(1_500_000_000_000_000_000));
/// assert!("-1".parse::<TokenAmount>().is_err());
/// assert!("3.5".parse::<TokenAmount>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenAmount(U256);

impl TokenAmount {
    /// Zero tokens.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Create from smallest units.
    pub fn base(units: u128) -> Self {
        Self(U256::from(units))
    }

    /// Create from whole tokens.
    pub fn tokens(tokens: u64) -> Self {
        Self(U256::from(tokens) * U256::from(BASE_PER_TOKEN))
    }

    /// Create from a raw 256-bit value.
    pub const fn from_u256(value: U256) -> Self {
        Self(value)
    }

    /// The raw 256-bit value in smallest units.
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked multiplication by a count (e.g. price per request times requests).
    pub fn checked_mul(self, count: U256) -> Option<Self> {
        self.0.checked_mul(count).map(Self)
    }

    /// Exact decimal string of the smallest-unit value.
    pub fn to_base_string(&self) -> String {
        self.0.to_string()
    }

    /// Whole-token string with all significant decimals, e.g. `"1.5"`.
    pub fn to_token_string(&self) -> String {
        let (whole, fraction) = self.split();
        if fraction.is_empty() {
            whole
        } else {
            format!("{}.{}", whole, fraction)
        }
    }

    /// Whole part and trimmed fractional digits.
    fn split(&self) -> (String, String) {
        let base = U256::from(BASE_PER_TOKEN);
        let whole = self.0 / base;
        let remainder = self.0 % base;
        let fraction = format!("{:0>width$}", remainder.to_string(), width = TOKEN_DECIMALS);
        let fraction = fraction.trim_end_matches('0').to_string();
        (whole.to_string(), fraction)
    }

    fn parse_decimal_tokens(s: &str) -> Result<Self, ParseAmountError> {
        let (whole, fraction) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(ParseAmountError::InvalidFormat(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ParseAmountError::InvalidFormat(s.to_string()));
        }
        if fraction.len() > TOKEN_DECIMALS {
            return Err(ParseAmountError::TooManyDecimals(s.to_string()));
        }

        let whole = if whole.is_empty() {
            U256::ZERO
        } else {
            parse_u256(whole)?
        };
        let fraction = if fraction.is_empty() {
            U256::ZERO
        } else {
            let padded = format!("{:0<width$}", fraction, width = TOKEN_DECIMALS);
            parse_u256(&padded)?
        };

        whole
            .checked_mul(U256::from(BASE_PER_TOKEN))
            .and_then(|w| w.checked_add(fraction))
            .map(Self)
            .ok_or(ParseAmountError::Overflow)
    }
}

fn parse_u256(digits: &str) -> Result<U256, ParseAmountError> {
    U256::from_str_radix(digits, 10).map_err(|_| ParseAmountError::Overflow)
}

impl FromStr for TokenAmount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }
        if s.starts_with('-') {
            return Err(ParseAmountError::Negative(s.to_string()));
        }

        // "X tokens" or "X token"
        if let Some(value) = s
            .strip_suffix(" tokens")
            .or_else(|| s.strip_suffix(" token"))
        {
            return Self::parse_decimal_tokens(value.trim());
        }

        // Bare number = smallest units, must be whole
        if s.chars().all(|c| c.is_ascii_digit()) {
            return parse_u256(s).map(Self);
        }
        if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(ParseAmountError::NotInteger(s.to_string()));
        }

        Err(ParseAmountError::InvalidFormat(s.to_string()))
    }
}

impl TryFrom<&str> for TokenAmount {
    type Error = ParseAmountError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(amount: TokenAmount) -> Self {
        amount.0
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            return write!(f, "0 tokens");
        }

        let (whole, fraction) = self.split();
        if fraction.is_empty() {
            write!(f, "{} tokens", whole)
        } else {
            // Show up to 6 decimal places; dust below that renders as ".0"
            let shown = fraction[..fraction.len().min(DISPLAY_DECIMALS)].trim_end_matches('0');
            let shown = if shown.is_empty() { "0" } else { shown };
            write!(f, "{}.{} tokens", whole, shown)
        }
    }
}

impl Add for TokenAmount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl Mul<U256> for TokenAmount {
    type Output = Self;

    fn mul(self, count: U256) -> Self {
        Self(self.0 * count)
    }
}

// ============================================================================
// IntoTokenAmount trait
// ============================================================================

/// Trait for inputs that can be validated into a non-negative whole
/// smallest-unit amount.
///
/// This lets session methods accept typed values and raw user input alike,
/// rejecting negative or fractional values before any external call.
///
/// # Example
///
/// ```
/// use apimarket_kit::{IntoTokenAmount, TokenAmount};
///
/// assert_eq!(100u64.into_token_amount().unwrap(), TokenAmount::base(100));
/// assert_eq!("100".into_token_amount().unwrap(), TokenAmount::base(100));
/// assert!((-1i64).into_token_amount().is_err());
/// assert!(3.5f64.into_token_amount().is_err());
/// ```
pub trait IntoTokenAmount {
    /// Convert into a TokenAmount.
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError>;
}

impl IntoTokenAmount for TokenAmount {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        Ok(self)
    }
}

impl IntoTokenAmount for U256 {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        Ok(TokenAmount(self))
    }
}

macro_rules! impl_into_token_amount_unsigned {
    ($($t:ty),*) => {
        $(
            impl IntoTokenAmount for $t {
                fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
                    Ok(TokenAmount(U256::from(self)))
                }
            }
        )*
    };
}

macro_rules! impl_into_token_amount_signed {
    ($($t:ty),*) => {
        $(
            impl IntoTokenAmount for $t {
                fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
                    if self < 0 {
                        return Err(ParseAmountError::Negative(self.to_string()));
                    }
                    Ok(TokenAmount(U256::from(self.unsigned_abs())))
                }
            }
        )*
    };
}

impl_into_token_amount_unsigned!(u8, u16, u32, u64, u128, usize);
impl_into_token_amount_signed!(i8, i16, i32, i64, i128, isize);

/// Largest integer an `f64` represents without rounding (2^53 - 1).
const MAX_SAFE_FLOAT: f64 = 9_007_199_254_740_991.0;

impl IntoTokenAmount for f64 {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        if !self.is_finite() {
            return Err(ParseAmountError::InvalidFormat(self.to_string()));
        }
        if self < 0.0 {
            return Err(ParseAmountError::Negative(self.to_string()));
        }
        if self.fract() != 0.0 {
            return Err(ParseAmountError::NotInteger(self.to_string()));
        }
        if self > MAX_SAFE_FLOAT {
            return Err(ParseAmountError::Imprecise(format!("{:.0}", self)));
        }
        // Integral finite f64 prints exactly with no exponent
        parse_u256(&format!("{:.0}", self)).map(TokenAmount)
    }
}

impl IntoTokenAmount for Duration {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        if self.subsec_nanos() != 0 {
            return Err(ParseAmountError::NotInteger(format!("{:?}", self)));
        }
        Ok(TokenAmount(U256::from(self.as_secs())))
    }
}

impl IntoTokenAmount for &str {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        self.parse()
    }
}

impl IntoTokenAmount for String {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        self.parse()
    }
}

impl IntoTokenAmount for &String {
    fn into_token_amount(self) -> Result<TokenAmount, ParseAmountError> {
        self.parse()
    }
}
