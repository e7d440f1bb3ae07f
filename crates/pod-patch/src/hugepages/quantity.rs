//! Byte quantities in Kubernetes notation.
//!
//! Only whole numbers are accepted; HugePages amounts are always whole
//! multiples of a page.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY: [(&str, u32); 6] = [("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
const DECIMAL: [(&str, u32); 6] = [("k", 1), ("M", 2), ("G", 3), ("T", 4), ("P", 5), ("E", 6)];

/// Parse a quantity such as `2Gi`, `2048Mi`, `500M` or `1073741824` into bytes.
pub fn parse_bytes(value: &str) -> Option<u128> {
    let value = value.trim();
    let (digits, multiplier) = BINARY
        .iter()
        .find_map(|(suffix, power)| value.strip_suffix(suffix).map(|digits| (digits, 1024u128.pow(*power))))
        .or_else(|| {
            DECIMAL
                .iter()
                .find_map(|(suffix, power)| value.strip_suffix(suffix).map(|digits| (digits, 1000u128.pow(*power))))
        })
        .unwrap_or((value, 1));
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u128>().ok()?.checked_mul(multiplier)
}

/// Format bytes with the largest binary suffix that divides them exactly.
pub fn format_bytes(bytes: u128) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    BINARY
        .iter()
        .rev()
        .find_map(|(suffix, power)| {
            let unit = 1024u128.pow(*power);
            (bytes % unit == 0).then(|| format!("{}{}", bytes / unit, suffix))
        })
        .unwrap_or_else(|| bytes.to_string())
}

/// Canonical form of a quantity, or the quantity itself if it cannot be parsed.
pub fn canonical(quantity: &Quantity) -> Quantity {
    parse_bytes(&quantity.0).map_or_else(|| quantity.clone(), |bytes| Quantity(format_bytes(bytes)))
}
