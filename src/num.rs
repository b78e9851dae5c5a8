use alloy::primitives::U256;
use fastnum::{
    UD256, bint,
    decimal::{Context, RoundingMode},
};

/// Fixed-point to decimal converter for token amounts.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: i32,
}

/// Scale of WAD-denominated figures such as vault rates.
pub const WAD_DECIMALS: u8 = 18;

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    pub fn wad() -> Self {
        Self::new(WAD_DECIMALS)
    }

    pub fn from_unsigned(&self, value: U256) -> UD256 {
        let unscaled = bint::UInt::<4>::from_le_slice(value.as_le_slice())
            .expect("Converter: U256 -> UInt::<4>");
        UD256::from_parts(
            unscaled,
            -self.decimals,
            Context::default().with_rounding_mode(RoundingMode::Floor),
        )
    }
}

/// Share of `part` in `total`, zero when `total` is zero.
pub fn ratio(part: UD256, total: UD256) -> UD256 {
    if total.is_zero() {
        UD256::ZERO
    } else {
        part / total
    }
}
