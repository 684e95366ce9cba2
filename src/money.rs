// Rounding for amounts and percentages shown to users

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Two decimals: money and most percentages
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// One decimal: allocation and progress percentages
pub fn round1(value: f64) -> f64 {
    round_to(value, 1)
}

/// `part / whole * 100`, or 0 when the whole is not positive
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    part / whole * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(round2(5041.666_666), 5041.67);
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round2(-1.005_1), -1.01);
    }

    #[test]
    fn test_percentage_guards_zero() {
        assert_eq!(percentage(10.0, 0.0), 0.0);
        assert_eq!(percentage(25.0, 200.0), 12.5);
    }
}
