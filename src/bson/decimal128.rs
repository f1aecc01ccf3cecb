//! IEEE 754-2008 128-bit decimal ("Decimal128"), stored using the binary integer decimal (BID)
//! encoding BSON puts on the wire: a 1-bit sign, a 17-bit combination field carrying the two
//! most-significant exponent bits plus the coefficient's leading digit, a 12-bit exponent
//! continuation, and a 110-bit coefficient continuation. The full coefficient (up to 34 decimal
//! digits) is a single binary integer, not per-digit declets.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Error, ErrorKind};

const EXPONENT_BIAS: i32 = 6176;
const MAX_BIASED_EXPONENT: i32 = 16383;
const TRAILING_BITS: u32 = 110;
const TRAILING_MASK: u128 = (1u128 << TRAILING_BITS) - 1;
const MAX_COEFFICIENT: u128 = 10u128.pow(34) - 1;

/// The raw 16-byte wire payload, stored as the two little-endian 64-bit words BSON transmits
/// (`low` first, then `high`, matching the layout of `bson_decimal128_t` in the C driver).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal128 {
    low: u64,
    high: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Special {
    None,
    Infinity,
    Nan,
}

impl Decimal128 {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        // bytes are little-endian: [0..8) is `low`, [8..16) is `high`.
        let low = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let high = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        Self { low, high }
    }

    pub const fn bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let low = self.low.to_le_bytes();
        let high = self.high.to_le_bytes();
        let mut i = 0;
        while i < 8 {
            out[i] = low[i];
            out[8 + i] = high[i];
            i += 1;
        }
        out
    }

    fn bits(&self) -> u128 {
        ((self.high as u128) << 64) | self.low as u128
    }

    fn from_bits(bits: u128) -> Self {
        Self {
            low: bits as u64,
            high: (bits >> 64) as u64,
        }
    }

    fn bit(bits: u128, pos_from_msb: u32) -> u32 {
        ((bits >> (127 - pos_from_msb)) & 1) as u32
    }

    pub fn nan() -> Self {
        Self::special(false, Special::Nan)
    }

    pub fn infinity() -> Self {
        Self::special(false, Special::Infinity)
    }

    pub fn neg_infinity() -> Self {
        Self::special(true, Special::Infinity)
    }

    fn special(negative: bool, special: Special) -> Self {
        let mut bits: u128 = if negative { 1 } else { 0 } << 127;
        let combo: u128 = match special {
            Special::Infinity => 0b11110,
            Special::Nan => 0b11111,
            Special::None => unreachable!(),
        };
        bits |= combo << (127 - 5);
        Self::from_bits(bits)
    }

    fn classify(&self) -> (bool, Special) {
        let bits = self.bits();
        let negative = Self::bit(bits, 0) == 1;
        let g = |p: u32| Self::bit(bits, p);
        if g(1) == 1 && g(2) == 1 && g(3) == 1 && g(4) == 1 {
            (negative, Special::Nan)
        } else if g(1) == 1 && g(2) == 1 && g(3) == 1 && g(4) == 0 {
            (negative, Special::Infinity)
        } else {
            (negative, Special::None)
        }
    }

    /// Decomposes a finite value into `(negative, coefficient, exponent)` such that the value
    /// equals `(-1)^negative * coefficient * 10^exponent`. Returns `None` for NaN/Infinity.
    pub fn to_parts(&self) -> Option<(bool, u128, i32)> {
        let bits = self.bits();
        let (negative, special) = self.classify();
        if special != Special::None {
            return None;
        }

        let g = |p: u32| Self::bit(bits, p) as u128;
        let (exp_top, msd): (u128, u128) = if g(1) == 1 && g(2) == 1 {
            // G0 G1 == 11: exponent top bits are G2 G3, MSD is 8 + G4.
            ((g(3) << 1) | g(4), 8 + g(5))
        } else {
            // exponent top bits are G0 G1, MSD is G2 G3 G4.
            ((g(1) << 1) | g(2), (g(3) << 2) | (g(4) << 1) | g(5))
        };

        // 12-bit exponent continuation occupies combination-field positions 6..=17.
        let mut exp_continuation: u128 = 0;
        for p in 6..=17u32 {
            exp_continuation = (exp_continuation << 1) | g(p);
        }
        let biased_exponent = ((exp_top << 12) | exp_continuation) as i32;
        let exponent = biased_exponent - EXPONENT_BIAS;

        let trailing = bits & TRAILING_MASK;
        let coefficient = (msd << TRAILING_BITS) | trailing;

        Some((negative, coefficient, exponent))
    }

    pub fn from_parts(negative: bool, coefficient: u128, exponent: i32) -> Result<Self, Error> {
        if coefficient > MAX_COEFFICIENT {
            return Err(Error::new(0, ErrorKind::NumericConversion));
        }
        let biased_exponent = exponent + EXPONENT_BIAS;
        if !(0..=MAX_BIASED_EXPONENT).contains(&biased_exponent) {
            return Err(Error::new(0, ErrorKind::NumericConversion));
        }

        let msd = coefficient >> TRAILING_BITS;
        let trailing = coefficient & TRAILING_MASK;
        let biased_exponent = biased_exponent as u128;

        let mut bits: u128 = if negative { 1 } else { 0 } << 127;
        if msd <= 7 {
            let combo = ((biased_exponent >> 12) << 3) | msd;
            bits |= combo << (127 - 5);
            bits |= (biased_exponent & 0xFFF) << TRAILING_BITS;
        } else {
            let combo = 0b11000u128 | ((biased_exponent >> 12) << 1) | (msd - 8);
            bits |= combo << (127 - 5);
            bits |= (biased_exponent & 0xFFF) << TRAILING_BITS;
        }
        bits |= trailing;

        Ok(Self::from_bits(bits))
    }

    pub fn parse_str(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "nan" => return Ok(Self::nan()),
            "inf" | "infinity" => return Ok(Self::infinity()),
            "-inf" | "-infinity" => return Ok(Self::neg_infinity()),
            _ => {}
        }

        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (mantissa, exp_part) = match rest.split_once(['e', 'E']) {
            Some((m, e)) => (m, Some(e)),
            None => (rest, None),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        if digits.is_empty() {
            return Err(Error::new(0, ErrorKind::InvalidUtf8));
        }
        if digits.len() > 34 {
            return Err(Error::new(0, ErrorKind::NumericConversion));
        }
        let coefficient: u128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| Error::new(0, ErrorKind::InvalidUtf8))?
        };

        let explicit_exp: i32 = match exp_part {
            Some(e) => e.parse().map_err(|_| Error::new(0, ErrorKind::InvalidUtf8))?,
            None => 0,
        };
        let exponent = explicit_exp - frac_part.len() as i32;

        Self::from_parts(negative, coefficient, exponent)
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, special) = self.classify();
        match special {
            Special::Nan => return write!(f, "NaN"),
            Special::Infinity => {
                return write!(f, "{}Infinity", if negative { "-" } else { "" });
            }
            Special::None => {}
        }
        let (negative, coefficient, exponent) = self.to_parts().expect("finite");
        if negative {
            write!(f, "-")?;
        }
        if exponent >= 0 {
            write!(f, "{coefficient}")?;
            for _ in 0..exponent {
                write!(f, "0")?;
            }
        } else {
            let digits = coefficient.to_string();
            let point = digits.len() as i32 + exponent;
            if point <= 0 {
                write!(f, "0.")?;
                for _ in 0..(-point) {
                    write!(f, "0")?;
                }
                write!(f, "{digits}")?;
            } else {
                let (int_part, frac_part) = digits.split_at(point as usize);
                write!(f, "{int_part}.{frac_part}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128(\"{self}\")")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_integers() {
        for s in ["0", "1", "-1", "123456789", "-42", "1000000"] {
            let d = Decimal128::parse_str(s).unwrap();
            assert_eq!(d.to_string(), s, "round-trip of {s}");
        }
    }

    #[test]
    fn round_trips_fractions() {
        for s in ["1.5", "-0.001", "3.14159", "0.1"] {
            let d = Decimal128::parse_str(s).unwrap();
            assert_eq!(d.to_string(), s, "round-trip of {s}");
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let d = Decimal128::parse_str("123.456").unwrap();
        let bytes = d.bytes();
        let back = Decimal128::from_bytes(bytes);
        assert_eq!(d, back);
        assert_eq!(back.to_string(), "123.456");
    }

    #[test]
    fn specials() {
        assert_eq!(Decimal128::nan().to_string(), "NaN");
        assert_eq!(Decimal128::infinity().to_string(), "Infinity");
        assert_eq!(Decimal128::neg_infinity().to_string(), "-Infinity");
        assert_eq!(Decimal128::parse_str("NaN").unwrap().to_string(), "NaN");
    }
}
