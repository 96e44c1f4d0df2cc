//! 代币金额
//!
//! 链上边界：6 位小数的定点整数（U256）
//! 接口边界：十进制字符串（至少保留两位小数，如 "212.00"）

use std::{fmt, str::FromStr};

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RelayError;

/// 奖励代币精度
pub const TOKEN_DECIMALS: u32 = 6;

const BPS_DENOMINATOR: u64 = 10_000;

fn unit() -> U256 {
    U256::exp10(TOKEN_DECIMALS as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256([0; 4]));

    /// 直接使用链上最小单位
    pub fn from_base_units(units: U256) -> Self {
        Self(units)
    }

    pub fn base_units(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// 解析十进制字符串，超过 6 位小数或负数视为非法
    pub fn parse_decimal(s: &str) -> Result<Self, RelayError> {
        let d = Decimal::from_str(s.trim())
            .map_err(|e| RelayError::InvalidAmount(format!("'{}': {}", s, e)))?;
        if d.is_sign_negative() {
            return Err(RelayError::InvalidAmount(format!("'{}' is negative", s)));
        }
        if d.normalize().scale() > TOKEN_DECIMALS {
            return Err(RelayError::InvalidAmount(format!(
                "'{}' has more than {} decimals",
                s, TOKEN_DECIMALS
            )));
        }
        let scaled = d
            .checked_mul(Decimal::from(10u64.pow(TOKEN_DECIMALS)))
            .ok_or_else(|| RelayError::InvalidAmount(format!("'{}' is too large", s)))?;
        let units = scaled
            .trunc()
            .to_string()
            .parse::<u128>()
            .map_err(|e| RelayError::InvalidAmount(format!("'{}': {}", s, e)))?;
        Ok(Self(U256::from(units)))
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_mul_u64(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(U256::from(factor)).map(Self)
    }

    /// 按基点计算（向下取整）
    pub fn mul_bps(self, bps: u32) -> Self {
        Self(self.0.saturating_mul(U256::from(bps)) / U256::from(BPS_DENOMINATOR))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 <= U256::from(i64::MAX as u64) {
            let units = self.0.as_u128() as i128;
            if let Ok(mut d) = Decimal::try_from_i128_with_scale(units, TOKEN_DECIMALS) {
                d = d.normalize();
                if d.scale() < 2 {
                    d.rescale(2);
                }
                return write!(f, "{}", d);
            }
        }
        // 超出 Decimal 范围时按整数拼接
        let whole = self.0 / unit();
        let frac = (self.0 % unit()).as_u64();
        let mut frac_str = format!("{:06}", frac);
        while frac_str.len() > 2 && frac_str.ends_with('0') {
            frac_str.pop();
        }
        write!(f, "{}.{}", whole, frac_str)
    }
}

impl FromStr for TokenAmount {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(s)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let a = TokenAmount::parse_decimal("2.00").unwrap();
        assert_eq!(a.base_units(), U256::from(2_000_000u64));
        assert_eq!(a.to_string(), "2.00");

        let b = TokenAmount::parse_decimal("0.123456").unwrap();
        assert_eq!(b.base_units(), U256::from(123_456u64));
        assert_eq!(b.to_string(), "0.123456");

        assert_eq!(TokenAmount::ZERO.to_string(), "0.00");
        assert_eq!(TokenAmount::parse_decimal("7.5").unwrap().to_string(), "7.50");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(TokenAmount::parse_decimal("-1").is_err());
        assert!(TokenAmount::parse_decimal("1.0000001").is_err());
        assert!(TokenAmount::parse_decimal("abc").is_err());
    }

    #[test]
    fn test_fee_math() {
        let reward = TokenAmount::parse_decimal("2.00").unwrap();
        let total = reward.checked_mul_u64(100).unwrap();
        assert_eq!(total.to_string(), "200.00");
        let fee = total.mul_bps(600);
        assert_eq!(fee.to_string(), "12.00");
        assert_eq!(total.checked_add(fee).unwrap().to_string(), "212.00");
    }

    #[test]
    fn test_mul_bps_floors() {
        let a = TokenAmount::from_base_units(U256::from(1u64));
        assert!(a.mul_bps(600).is_zero());
    }

    #[test]
    fn test_serde_string() {
        let a = TokenAmount::parse_decimal("212").unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"212.00\"");
        let back: TokenAmount = serde_json::from_str("\"212.00\"").unwrap();
        assert_eq!(a, back);
    }
}
