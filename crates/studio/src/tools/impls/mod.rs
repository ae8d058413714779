mod analyze_code;
mod get_stock_price;
mod get_weather;

pub use analyze_code::{AnalyzeCodeTool, CodeAnalysisReport, Complexity};
pub use get_stock_price::{GetStockPriceTool, StockQuote};
pub use get_weather::{GetWeatherTool, WeatherReport};
