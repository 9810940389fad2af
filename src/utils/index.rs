/// Render a base-unit token amount with `decimals` fractional digits, without rounding.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let Some(scale) = 10u128.checked_pow(decimals) else {
        // More decimals than a u128 can express: every digit is fractional.
        return format!("0.{:0>width$}", amount, width = decimals as usize);
    };
    format!(
        "{}.{:0>width$}",
        amount / scale,
        amount % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_and_fractional_parts() {
        assert_eq!(format_token_amount(1_500_000, 6), "1.500000");
        assert_eq!(format_token_amount(42, 6), "0.000042");
        assert_eq!(format_token_amount(7, 0), "7");
    }

    #[test]
    fn large_amounts_keep_precision() {
        let amount = 123_456_789_000_000_000_000_000_001u128;
        assert_eq!(format_token_amount(amount, 18), "123456789.000000000000000001");
    }
}
