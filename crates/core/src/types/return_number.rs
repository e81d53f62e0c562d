//! Human-readable return numbers.

use core::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`ReturnNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReturnNumberError {
    /// The input does not start with `RET-`.
    #[error("return number must start with {prefix}")]
    MissingPrefix {
        /// Expected prefix.
        prefix: &'static str,
    },
    /// The date segment is not a valid `YYYYMMDD` date.
    #[error("return number has an invalid date segment: {0}")]
    InvalidDate(String),
    /// The suffix has the wrong length or characters.
    #[error("return number suffix must be {len} uppercase letters or digits")]
    InvalidSuffix {
        /// Required suffix length.
        len: usize,
    },
}

/// A unique, human-readable return reference, e.g. `RET-20261017-7KQ3ZD`.
///
/// ## Format
///
/// - Prefix `RET-`
/// - Request date as `YYYYMMDD`
/// - A dash and a random suffix of 6 uppercase ASCII letters or digits
///
/// The random suffix is generated by the server; uniqueness is enforced by the
/// store. Numbers are never reused, even for cancelled or rejected returns.
///
/// ## Examples
///
/// ```
/// use chrono::NaiveDate;
/// use returns_core::ReturnNumber;
///
/// let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
/// let number = ReturnNumber::new(date, "7KQ3ZD").unwrap();
/// assert_eq!(number.as_str(), "RET-20261017-7KQ3ZD");
/// assert_eq!(number.date(), date);
///
/// assert!(ReturnNumber::parse("RET-20261017-7KQ3ZD").is_ok());
/// assert!(ReturnNumber::parse("RET-20261317-7KQ3ZD").is_err()); // month 13
/// assert!(ReturnNumber::parse("RMA-20261017-7KQ3ZD").is_err()); // prefix
/// assert!(ReturnNumber::parse("RET-20261017-7kq3zd").is_err()); // lowercase
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ReturnNumber(String);

impl ReturnNumber {
    /// Fixed prefix of every return number.
    pub const PREFIX: &'static str = "RET-";
    /// Length of the random suffix.
    pub const SUFFIX_LEN: usize = 6;
    /// Characters allowed in the suffix.
    pub const SUFFIX_ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Build a return number from its request date and suffix.
    ///
    /// # Errors
    ///
    /// Returns an error if the suffix is not [`Self::SUFFIX_LEN`] uppercase
    /// ASCII letters or digits.
    pub fn new(date: NaiveDate, suffix: &str) -> Result<Self, ReturnNumberError> {
        validate_suffix(suffix)?;
        Ok(Self(format!(
            "{}{}-{suffix}",
            Self::PREFIX,
            date.format("%Y%m%d")
        )))
    }

    /// Parse a return number from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix, date segment or suffix is invalid.
    pub fn parse(s: &str) -> Result<Self, ReturnNumberError> {
        let rest = s
            .strip_prefix(Self::PREFIX)
            .ok_or(ReturnNumberError::MissingPrefix {
                prefix: Self::PREFIX,
            })?;

        let (date, suffix) = rest
            .split_once('-')
            .ok_or_else(|| ReturnNumberError::InvalidDate(rest.to_string()))?;

        if date.len() != 8 {
            return Err(ReturnNumberError::InvalidDate(date.to_string()));
        }
        NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|_| ReturnNumberError::InvalidDate(date.to_string()))?;
        validate_suffix(suffix)?;

        Ok(Self(s.to_string()))
    }

    /// The number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The request date encoded in the number.
    ///
    /// # Panics
    ///
    /// Never panics for values built through [`Self::new`] or [`Self::parse`].
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn date(&self) -> NaiveDate {
        let segment = self
            .0
            .get(Self::PREFIX.len()..Self::PREFIX.len() + 8)
            .expect("validated return number has a date segment");
        NaiveDate::parse_from_str(segment, "%Y%m%d").expect("validated return number date")
    }
}

fn validate_suffix(suffix: &str) -> Result<(), ReturnNumberError> {
    let valid = suffix.len() == ReturnNumber::SUFFIX_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ReturnNumberError::InvalidSuffix {
            len: ReturnNumber::SUFFIX_LEN,
        })
    }
}

impl fmt::Display for ReturnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ReturnNumber {
    type Error = ReturnNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReturnNumber> for String {
    fn from(number: ReturnNumber) -> Self {
        number.0
    }
}

impl AsRef<str> for ReturnNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "postgres")]
impl ::sqlx::Type<::sqlx::Postgres> for ReturnNumber {
    fn type_info() -> ::sqlx::postgres::PgTypeInfo {
        <String as ::sqlx::Type<::sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
        <String as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for ReturnNumber {
    fn decode(
        value: ::sqlx::postgres::PgValueRef<'r>,
    ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
        let raw = <&str as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(raw)?)
    }
}

#[cfg(feature = "postgres")]
impl ::sqlx::Encode<'_, ::sqlx::Postgres> for ReturnNumber {
    fn encode_by_ref(
        &self,
        buf: &mut ::sqlx::postgres::PgArgumentBuffer,
    ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
        <&str as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0.as_str(), buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn test_new_formats_date_and_suffix() {
        let number = ReturnNumber::new(date(), "AB12CD").unwrap();
        assert_eq!(number.to_string(), "RET-20261017-AB12CD");
    }

    #[test]
    fn test_new_rejects_bad_suffix() {
        assert!(matches!(
            ReturnNumber::new(date(), "AB12C"),
            Err(ReturnNumberError::InvalidSuffix { len: 6 })
        ));
        assert!(ReturnNumber::new(date(), "ab12cd").is_err());
        assert!(ReturnNumber::new(date(), "AB-2CD").is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let number = ReturnNumber::new(date(), "ZZ99ZZ").unwrap();
        let parsed = ReturnNumber::parse(number.as_str()).unwrap();
        assert_eq!(parsed, number);
        assert_eq!(parsed.date(), date());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ReturnNumber::parse("20261017-AB12CD"),
            Err(ReturnNumberError::MissingPrefix { .. })
        ));
        assert!(matches!(
            ReturnNumber::parse("RET-2026101-AB12CD"),
            Err(ReturnNumberError::InvalidDate(_))
        ));
        assert!(matches!(
            ReturnNumber::parse("RET-20261017AB12CD"),
            Err(ReturnNumberError::InvalidDate(_))
        ));
        assert!(matches!(
            ReturnNumber::parse("RET-20261017-AB12CDE"),
            Err(ReturnNumberError::InvalidSuffix { .. })
        ));
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<ReturnNumber, _> = serde_json::from_str("\"RET-20261017-AB12CD\"");
        assert!(ok.is_ok());
        let bad: Result<ReturnNumber, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_alphabet_is_valid_suffix_material() {
        let suffix: String = ReturnNumber::SUFFIX_ALPHABET
            .iter()
            .take(ReturnNumber::SUFFIX_LEN)
            .map(|&b| char::from(b))
            .collect();
        assert!(ReturnNumber::new(date(), &suffix).is_ok());
    }
}
