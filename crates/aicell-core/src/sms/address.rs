//! Destination number normalization

use crate::config::NumberPlan;

/// Rewrite a destination into international form.
///
/// - `+...` is left alone
/// - `00...` becomes `+...`
/// - a bare country code prefix gains a `+`
/// - a national number loses its trunk prefix and gains `+<country code>`
///
/// Separators (spaces, dashes, dots, parentheses) are removed first.
/// Anything else is returned cleaned but otherwise unchanged. Applying the
/// function twice gives the same result as applying it once.
pub fn normalize_destination(number: &str, plan: &NumberPlan) -> String {
    let cleaned: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if cleaned.starts_with('+') || cleaned.is_empty() {
        return cleaned;
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        // Alphanumeric sender IDs and short codes with letters pass through
        return cleaned;
    }

    if let Some(rest) = cleaned.strip_prefix("00") {
        return format!("+{}", rest);
    }
    if !plan.country_code.is_empty() && cleaned.starts_with(&plan.country_code) {
        return format!("+{}", cleaned);
    }
    if !plan.trunk_prefix.is_empty() {
        if let Some(rest) = cleaned.strip_prefix(&plan.trunk_prefix) {
            return format!("+{}{}", plan.country_code, rest);
        }
    }
    cleaned
}

/// Whether a number is already in international form
pub fn is_international(number: &str) -> bool {
    number.starts_with('+') && number.len() > 1 && number[1..].chars().all(|c| c.is_ascii_digit())
}
