use crate::tools::core::{Tool, ToolSpec};
use crate::tools::ToolName;
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

// Input type
#[derive(Deserialize, Serialize)]
pub struct GetStockPriceInput {
    pub symbol: String,
}

// Output type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub price: f64,
    /// Absolute change since the previous close
    pub change: f64,
    pub volume: u64,
}

/// Simulated stock quote lookup
pub struct GetStockPriceTool;

#[async_trait::async_trait]
impl Tool for GetStockPriceTool {
    type Input = GetStockPriceInput;
    type Output = StockQuote;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: ToolName::GetStockPrice,
            description: "Get stock price information",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {
                        "type": "string",
                        "description": "Stock symbol (e.g., AAPL, GOOGL)"
                    }
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn execute(&self, input: Self::Input) -> Result<Self::Output> {
        let symbol = input.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(anyhow::anyhow!("Stock symbol cannot be empty"));
        }

        let mut rng = rand::thread_rng();
        Ok(StockQuote {
            symbol,
            price: rng.gen_range(50..550) as f64,
            change: (rng.gen::<f64>() - 0.5) * 20.0,
            volume: rng.gen_range(0..1_000_000),
        })
    }
}
