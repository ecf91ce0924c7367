//! Outbound post formatting.

use crate::types::TokenMetadata;
use rust_decimal::Decimal;

/// Platform hard limit on post length, in characters.
pub const MAX_POST_LEN: usize = 280;

/// Builds the sale announcement. The fiat amount is omitted when the
/// oracle reported it unavailable.
pub fn format_sale_post(
    meta: &TokenMetadata,
    price_eth: Decimal,
    price_usd: Option<Decimal>,
    buyer: &str,
) -> String {
    let price = match price_usd {
        Some(usd) => format!("{} ETH (${})", price_eth.normalize(), usd.round_dp(2)),
        None => format!("{} ETH", price_eth.normalize()),
    };
    let text = format!(
        "{} #{} by {} sold for {} to {}\n{}",
        meta.project_name, meta.edition_number, meta.artist_name, price, buyer, meta.canonical_url
    );
    clamp_post(text)
}

/// Fixed status message for the manual publish test.
pub fn format_test_post() -> String {
    "Sales bot status check: pipeline is up and publishing is armed.".to_string()
}

/// Enforces the platform length limit. The trailing URL line is kept
/// whole; the head of the message is truncated with an ellipsis instead.
pub fn clamp_post(text: String) -> String {
    if text.chars().count() <= MAX_POST_LEN {
        return text;
    }
    match text.rsplit_once('\n') {
        Some((head, url)) if url.chars().count() + 2 < MAX_POST_LEN => {
            let budget = MAX_POST_LEN - url.chars().count() - 2; // newline + ellipsis
            let truncated: String = head.chars().take(budget).collect();
            format!("{}…\n{}", truncated, url)
        }
        _ => text.chars().take(MAX_POST_LEN).collect(),
    }
}
