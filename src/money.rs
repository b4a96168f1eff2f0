/// Converts a decimal currency amount from the API into minor units.
pub fn to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    Some((amount * 100.0).round() as i64)
}

pub fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_formats() {
        assert_eq!(to_cents(450.0), Some(45000));
        assert_eq!(to_cents(19.999), Some(2000));
        assert_eq!(to_cents(-1.0), None);
        assert_eq!(to_cents(f64::NAN), None);
        assert_eq!(format_cents(45000), "450.00");
        assert_eq!(format_cents(1205), "12.05");
    }
}
