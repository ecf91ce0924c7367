//! Sale price extraction from raw transaction evidence.
//!
//! Sales clear through varying settlement shapes, so no single signal is
//! reliable. The heuristics below run in order of decreasing reliability;
//! the first positive amount wins and zero means "could not determine a
//! price, do not publish".

use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};
use once_cell::sync::Lazy;
use std::str::FromStr;

/// ERC-20/721 `Transfer(address,address,uint256)` topic.
pub static TRANSFER_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from_str("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        .expect("valid transfer topic")
});

/// Seaport `OrderFulfilled` settlement topic.
pub static ORDER_FULFILLED_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from_str("0x9d9af8e38d66c62e2c12f0225249fd9d721c54b83f48d9352c97c6cacdcb6f31")
        .expect("valid settlement topic")
});

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub wrapped_native: Address,
    pub materiality_wei: U256,
}

/// Determines the sale price in wei for a transaction and its receipt.
pub fn extract_price_wei(
    tx: &Transaction,
    receipt: &TransactionReceipt,
    cfg: &ExtractorConfig,
) -> U256 {
    let settlement = receipt
        .logs
        .iter()
        .find(|log| log.topics.first() == Some(&*ORDER_FULFILLED_TOPIC));
    let outer_value_material = !tx.value.is_zero() && tx.value >= cfg.materiality_wei;

    // 1. Settlement event plus a material native payment: the outer value
    //    is the price.
    if settlement.is_some() && outer_value_material {
        return tx.value;
    }

    // 2. Best-effort scan of the settlement payload for an embedded native
    //    amount. The zero-address word marks the native-asset consideration
    //    item and the amount follows it. Fragile by construction; only a
    //    fallback when the structured paths below fail to apply.
    if let Some(log) = settlement {
        let sniffed = sniff_embedded_amount(&log.data);
        if !sniffed.is_zero() {
            return sniffed;
        }
    }

    // 3. Wrapped-native transfer inside the settlement: well-structured and
    //    preferred for offer-style sales where the outer value is zero.
    let wrapped = wrapped_transfer_amount(receipt, cfg.wrapped_native);
    if !wrapped.is_zero() {
        return wrapped;
    }

    // 4. Last resort: a material outer value even without a recognized
    //    settlement event.
    if outer_value_material {
        return tx.value;
    }

    U256::zero()
}

/// Scans 32-byte words for a zero word (the ABI encoding of the zero
/// address) and reads the next word as a candidate amount.
fn sniff_embedded_amount(data: &Bytes) -> U256 {
    let words: Vec<&[u8]> = data.chunks_exact(32).collect();
    for pair in words.windows(2) {
        if pair[0].iter().all(|b| *b == 0) {
            let candidate = U256::from_big_endian(pair[1]);
            // amounts above 100k ETH are ABI noise, not payments
            if !candidate.is_zero() && candidate <= U256::exp10(23) {
                return candidate;
            }
        }
    }
    U256::zero()
}

/// Largest wrapped-native `Transfer` amount in the receipt. Settlements
/// split payment across seller, platform fee, and royalties; the largest
/// leg understates the total but is the most stable single signal.
fn wrapped_transfer_amount(receipt: &TransactionReceipt, wrapped: Address) -> U256 {
    receipt
        .logs
        .iter()
        .filter(|log| {
            log.address == wrapped
                && log.topics.first() == Some(&*TRANSFER_TOPIC)
                && log.data.len() >= 32
        })
        .map(|log| U256::from_big_endian(&log.data[..32]))
        .max()
        .unwrap_or_else(U256::zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{eth_f64_to_wei, wei_to_eth};
    use ethers::types::Log;
    use rust_decimal::Decimal;

    fn weth() -> Address {
        Address::from_str("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap()
    }

    fn cfg() -> ExtractorConfig {
        ExtractorConfig {
            wrapped_native: weth(),
            materiality_wei: eth_f64_to_wei(0.01),
        }
    }

    fn tx_with_value(wei: U256) -> Transaction {
        Transaction {
            value: wei,
            ..Default::default()
        }
    }

    fn receipt_with_logs(logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            logs,
            ..Default::default()
        }
    }

    fn settlement_log(data: Vec<u8>) -> Log {
        Log {
            topics: vec![*ORDER_FULFILLED_TOPIC],
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    fn weth_transfer_log(amount: U256) -> Log {
        let mut data = [0u8; 32];
        amount.to_big_endian(&mut data);
        Log {
            address: weth(),
            topics: vec![*TRANSFER_TOPIC, H256::zero(), H256::zero()],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_settlement_with_material_value_uses_outer_value() {
        let price = U256::from_dec_str("1200000000000000000").unwrap();
        let tx = tx_with_value(price);
        let receipt = receipt_with_logs(vec![settlement_log(vec![])]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), price);
    }

    #[test]
    fn test_wrapped_transfer_when_outer_value_zero() {
        // offer-style sale: value=0, payment carried by a WETH transfer
        let amount = U256::from_dec_str("2500000000000000000").unwrap();
        let tx = tx_with_value(U256::zero());
        let receipt = receipt_with_logs(vec![weth_transfer_log(amount)]);
        let wei = extract_price_wei(&tx, &receipt, &cfg());
        assert_eq!(wei, amount);
        assert_eq!(wei_to_eth(wei), Decimal::new(25, 1)); // 2.5 ETH
    }

    #[test]
    fn test_largest_wrapped_transfer_wins() {
        let fee = U256::from_dec_str("50000000000000000").unwrap();
        let payment = U256::from_dec_str("1950000000000000000").unwrap();
        let tx = tx_with_value(U256::zero());
        let receipt = receipt_with_logs(vec![weth_transfer_log(fee), weth_transfer_log(payment)]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), payment);
    }

    #[test]
    fn test_embedded_amount_sniffing() {
        let amount = U256::from_dec_str("800000000000000000").unwrap();
        let mut data = vec![0u8; 32]; // zero-address marker word
        let mut word = [0u8; 32];
        amount.to_big_endian(&mut word);
        data.extend_from_slice(&word);
        let tx = tx_with_value(U256::zero());
        let receipt = receipt_with_logs(vec![settlement_log(data)]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), amount);
    }

    #[test]
    fn test_immaterial_value_without_logs_is_zero() {
        let tx = tx_with_value(eth_f64_to_wei(0.001));
        let receipt = receipt_with_logs(vec![]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), U256::zero());
    }

    #[test]
    fn test_material_value_without_settlement_is_last_resort() {
        let price = eth_f64_to_wei(0.5);
        let tx = tx_with_value(price);
        let receipt = receipt_with_logs(vec![]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), price);
    }

    #[test]
    fn test_non_wrapped_transfer_ignored() {
        let other = Address::from_str("0x1111111111111111111111111111111111111111").unwrap();
        let amount = U256::from_dec_str("2500000000000000000").unwrap();
        let mut data = [0u8; 32];
        amount.to_big_endian(&mut data);
        let log = Log {
            address: other,
            topics: vec![*TRANSFER_TOPIC],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        };
        let tx = tx_with_value(U256::zero());
        let receipt = receipt_with_logs(vec![log]);
        assert_eq!(extract_price_wei(&tx, &receipt, &cfg()), U256::zero());
    }
}
