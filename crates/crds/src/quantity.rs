//! Kubernetes resource quantities as byte counts

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::CodecError;

/// Convert a quantity such as `20Gi`, `512M` or `1e9` into bytes.
///
/// Fractional byte counts are rounded up.
pub fn quantity_to_bytes(quantity: &Quantity) -> Result<u64, CodecError> {
    let raw = quantity.0.trim();
    let invalid = || CodecError::InvalidQuantity(raw.to_string());

    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number = number.strip_prefix('+').unwrap_or(number);
    if number.is_empty() {
        return Err(invalid());
    }

    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return Err(invalid());
    }
    let digits = format!("{whole}{fraction}");
    let mantissa: u128 = digits.parse().map_err(|_| invalid())?;
    let scale = 10u128
        .checked_pow(u32::try_from(fraction.len()).map_err(|_| invalid())?)
        .ok_or_else(invalid)?;

    let (multiplier, divisor): (u128, u128) = match suffix {
        "" => (1, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "m" => (1, 1_000),
        "u" => (1, 1_000_000),
        "n" => (1, 1_000_000_000),
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let power: u32 = exp[1..].parse().map_err(|_| invalid())?;
            (10u128.checked_pow(power).ok_or_else(invalid)?, 1)
        }
        _ => return Err(invalid()),
    };

    let numerator = mantissa.checked_mul(multiplier).ok_or_else(invalid)?;
    let denominator = scale.checked_mul(divisor).ok_or_else(invalid)?;
    let bytes = numerator.div_ceil(denominator);
    u64::try_from(bytes).map_err(|_| invalid())
}
