use primitive_types::U256;
use rust_decimal::Decimal;

/// Converts a raw integer amount with `decimals` places into a [`Decimal`].
///
/// Returns `None` when the value does not fit the 96-bit decimal mantissa
/// or `decimals` exceeds the supported scale of 28.
pub fn format_units(raw: U256, decimals: u32) -> Option<Decimal> {
    if raw.bits() > 96 {
        return None;
    }
    let mantissa = i128::try_from(raw.as_u128()).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .ok()
        .map(|d| d.normalize())
}
