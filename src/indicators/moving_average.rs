use rust_decimal::Decimal;

/// Calculate Simple Moving Average (SMA) over the last `period` prices
///
/// `prices` is oldest first. Returns `None` when fewer than `period` prices
/// are available or `period` is zero.
pub fn calculate_sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: Decimal = prices.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sma() {
        let prices = vec![dec!(100), dec!(102), dec!(104), dec!(106), dec!(108)];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(dec!(104)));
    }

    #[test]
    fn test_sma_uses_most_recent_prices() {
        let prices = vec![dec!(1), dec!(1000), dec!(10), dec!(20), dec!(30)];
        assert_eq!(calculate_sma(&prices, 3), Some(dec!(20)));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![dec!(100), dec!(102)];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_sma_zero_period() {
        assert!(calculate_sma(&[dec!(1)], 0).is_none());
    }

    #[test]
    fn test_sma_keeps_decimal_precision() {
        let prices = vec![dec!(0.1), dec!(0.2)];
        assert_eq!(calculate_sma(&prices, 2), Some(dec!(0.15)));
    }
}
