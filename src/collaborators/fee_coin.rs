use crate::collaborators::FeeCoinProvider;
use crate::portfolio::types::{Coin, CoinType};

/// Tokens pay their fees in the platform coin of the chain they live on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenFeeCoinProvider;

impl FeeCoinProvider for TokenFeeCoinProvider {
	fn fee_coin_type(&self, coin: &Coin) -> Option<CoinType> {
		match coin.coin_type {
			CoinType::Erc20 { .. } => Some(CoinType::Ethereum),
			CoinType::Bep20 { .. } => Some(CoinType::BinanceSmartChain),
			CoinType::Bep2 { ref symbol } if symbol != "BNB" => Some(CoinType::Bep2 {
				symbol: "BNB".to_string(),
			}),
			_ => None,
		}
	}
}
