//! Market lookup tool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::live::FunctionDeclaration;
use crate::payments::MarketData;

use super::{ToolHandler, error_result};

/// `get_market_price` - quote an asset by symbol.
pub struct MarketPriceTool {
    market: Arc<dyn MarketData>,
}

impl MarketPriceTool {
    /// Create the handler.
    pub fn new(market: Arc<dyn MarketData>) -> Arc<Self> {
        Arc::new(Self { market })
    }
}

#[async_trait]
impl ToolHandler for MarketPriceTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "get_market_price".to_string(),
            description: "Look up the current market price of an asset.".to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "symbol": {
                        "type": "string",
                        "description": "Asset symbol, e.g. SOL"
                    }
                },
                "required": ["symbol"]
            })),
        }
    }

    async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        let Some(symbol) = args.get("symbol").and_then(serde_json::Value::as_str) else {
            return error_result("missing symbol");
        };
        match self.market.quote(symbol).await {
            Ok(quote) => serde_json::json!({
                "status": "ok",
                "symbol": quote.symbol,
                "price_usd": quote.price_usd,
                "change_24h": quote.change_24h,
            }),
            Err(e) => error_result(format!("no quote for {symbol}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::payments::memory::FixedMarketData;

    use super::*;

    #[tokio::test]
    async fn test_quote_known_symbol() {
        let tool = MarketPriceTool::new(FixedMarketData::new([("SOL", 95.0)]));
        let result = tool
            .call(
                serde_json::json!({"symbol": "sol"}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result["status"], "ok");
        assert_eq!(result["symbol"], "SOL");
        assert_eq!(result["price_usd"], 95.0);
    }

    #[tokio::test]
    async fn test_quote_unknown_symbol() {
        let tool = MarketPriceTool::new(FixedMarketData::new([("SOL", 95.0)]));
        let result = tool
            .call(
                serde_json::json!({"symbol": "DOGE"}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result["status"], "error");
    }

    #[tokio::test]
    async fn test_quote_missing_symbol() {
        let tool = MarketPriceTool::new(FixedMarketData::new([]));
        let result = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(result["status"], "error");
    }
}
