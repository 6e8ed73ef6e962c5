// Convert wire strings into internal integer ticks/lots.
// Digits past the configured decimals are truncated, never rounded.

use crate::market_data::error::{Field, ParseError};
use crate::market_data::types::{PriceLevel, Scale};

#[derive(Debug, Clone, Copy)]
pub struct Normaliser {
    pub scale: Scale,
    price_factor: u64, // e.g. 100_000_000 => 8 decimal places
    size_factor: u64,
}

impl Normaliser {
    pub fn new(price_decimals: u32, size_decimals: u32) -> Self {
        let price_factor = 10u64.saturating_pow(price_decimals);
        let size_factor = 10u64.saturating_pow(size_decimals);
        Self {
            scale: Scale { price_decimals, size_decimals },
            price_factor,
            size_factor,
        }
    }

    pub fn price_to_ticks(&self, s: &str) -> Result<i64, ParseError> {
        let value = parse_fixed(s, self.scale.price_decimals, self.price_factor, Field::Price)?;
        i64::try_from(value).map_err(|_| invalid(Field::Price, s))
    }

    pub fn size_to_lots(&self, s: &str) -> Result<u64, ParseError> {
        parse_fixed(s, self.scale.size_decimals, self.size_factor, Field::Size)
    }

    pub fn level(&self, price: &str, size: &str) -> Result<PriceLevel, ParseError> {
        Ok(PriceLevel {
            price: self.price_to_ticks(price)?,
            size: self.size_to_lots(size)?,
        })
    }
}

impl Default for Normaliser {
    fn default() -> Self {
        let scale = Scale::default();
        Self::new(scale.price_decimals, scale.size_decimals)
    }
}

fn invalid(field: Field, s: &str) -> ParseError {
    ParseError::InvalidDecimal { field, value: s.to_string() }
}

fn parse_fixed(s: &str, decimals: u32, factor: u64, field: Field) -> Result<u64, ParseError> {
    let (integer_part, decimal_part) = match s.find('.') {
        Some(dot_pos) => (&s[..dot_pos], &s[dot_pos + 1..]),
        None => (s, ""),
    };

    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if integer_part.is_empty() && decimal_part.is_empty() {
        return Err(invalid(field, s));
    }
    if !all_digits(integer_part) || !all_digits(decimal_part) {
        return Err(invalid(field, s));
    }

    let integer: u64 = if integer_part.is_empty() {
        0
    } else {
        integer_part.parse().map_err(|_| invalid(field, s))?
    };

    let width = decimals as usize;
    let decimal: u64 = if width == 0 {
        0
    } else if decimal_part.len() >= width {
        decimal_part[..width].parse().map_err(|_| invalid(field, s))?
    } else {
        let padded = format!("{:0<width$}", decimal_part, width = width);
        padded.parse().map_err(|_| invalid(field, s))?
    };

    integer
        .checked_mul(factor)
        .and_then(|v| v.checked_add(decimal))
        .ok_or_else(|| invalid(field, s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_to_ticks() {
        let n = Normaliser::new(2, 8);
        assert_eq!(n.price_to_ticks("100.00").unwrap(), 10_000);
        assert_eq!(n.price_to_ticks("99.5").unwrap(), 9_950);
        assert_eq!(n.price_to_ticks("101").unwrap(), 10_100);
        assert_eq!(n.price_to_ticks(".25").unwrap(), 25);
    }

    #[test]
    fn test_truncates_extra_digits() {
        let n = Normaliser::new(2, 3);
        assert_eq!(n.price_to_ticks("1.239").unwrap(), 123);
        assert_eq!(n.size_to_lots("0.12345678").unwrap(), 123);
    }

    #[test]
    fn test_size_to_lots() {
        let n = Normaliser::default();
        assert_eq!(n.size_to_lots("0.00000001").unwrap(), 1);
        assert_eq!(n.size_to_lots("3").unwrap(), 300_000_000);
    }

    #[test]
    fn test_rejects_garbage() {
        let n = Normaliser::default();
        for bad in ["abc", "", ".", "1.2.3", "-1", "+1", "1e5", " 1", "1,5"] {
            let err = n.price_to_ticks(bad).unwrap_err();
            assert_eq!(err, ParseError::InvalidDecimal { field: Field::Price, value: bad.to_string() });
        }
        assert!(matches!(
            n.size_to_lots("abc"),
            Err(ParseError::InvalidDecimal { field: Field::Size, .. })
        ));
    }

    #[test]
    fn test_rejects_overflow() {
        let n = Normaliser::new(8, 8);
        assert!(n.price_to_ticks("99999999999999999999").is_err());
        assert!(n.size_to_lots("999999999999").is_err());
    }
}
