use alloy::primitives::U256;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid digits in {0:?}")]
    InvalidDigits(String),

    #[error("{0} exceeds 256 bits")]
    TooWide(String),

    #[error("{value} does not fit in a signed {bits}-bit integer")]
    OutOfRange { value: String, bits: u32 },
}

/// An integer of up to 256 bits of magnitude plus a sign.
///
/// Parsed from either a `0x` hex quantity (JSON-RPC encoding, never signed) or a
/// decimal string with an optional leading `+`/`-`. Narrowing to a machine integer
/// always goes through [`Quantity::to_signed`], which checks the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    negative: bool,
    magnitude: U256,
}

impl Quantity {
    /// Surrounding whitespace is not stripped; it fails as invalid digits.
    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        if raw.is_empty() {
            return Err(QuantityError::Empty);
        }

        if let Some(digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            return Self::parse_digits(raw, digits, 16).map(|magnitude| Self {
                negative: false,
                magnitude,
            });
        }

        let (negative, digits) = match raw.as_bytes()[0] {
            b'-' => (true, &raw[1..]),
            b'+' => (false, &raw[1..]),
            _ => (false, raw),
        };
        let magnitude = Self::parse_digits(raw, digits, 10)?;
        Ok(Self {
            negative: negative && !magnitude.is_zero(),
            magnitude,
        })
    }

    fn parse_digits(raw: &str, digits: &str, radix: u32) -> Result<U256, QuantityError> {
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return Err(QuantityError::InvalidDigits(raw.to_string()));
        }
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(trimmed, radix as u64)
            .map_err(|_| QuantityError::TooWide(raw.to_string()))
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }

    /// Canonical decimal text: no leading zeros, no `+`, `-` only for non-zero values.
    pub fn to_decimal(&self) -> String {
        self.to_string()
    }

    /// Narrow to a signed integer of `bits` width (1..=64), refusing anything out of range.
    pub fn to_signed(&self, bits: u32) -> Result<i64, QuantityError> {
        let bits = bits.clamp(1, 64);
        let limit = U256::from(1u64) << ((bits - 1) as usize);
        let out_of_range = || QuantityError::OutOfRange {
            value: self.to_decimal(),
            bits,
        };

        if !self.negative {
            if self.magnitude >= limit {
                return Err(out_of_range());
            }
            return i64::try_from(self.magnitude.as_limbs()[0]).map_err(|_| out_of_range());
        }

        if self.magnitude > limit {
            return Err(out_of_range());
        }
        i64::try_from(-i128::from(self.magnitude.as_limbs()[0])).map_err(|_| out_of_range())
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self {
            negative: value < 0,
            magnitude: U256::from(value.unsigned_abs()),
        }
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self {
            negative: false,
            magnitude: U256::from(value),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}
