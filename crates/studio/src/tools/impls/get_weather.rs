use crate::tools::core::{Tool, ToolSpec};
use crate::tools::ToolName;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

const CONDITIONS: &[&str] = &["sunny", "cloudy", "rainy", "snowy", "partly cloudy"];

// Input type
#[derive(Deserialize, Serialize)]
pub struct GetWeatherInput {
    pub location: String,
}

// Output type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub location: String,
    /// Degrees Celsius
    pub temperature: i32,
    pub condition: String,
    /// Percent
    pub humidity: u32,
    /// km/h
    pub wind_speed: u32,
}

/// Simulated weather lookup
pub struct GetWeatherTool;

#[async_trait::async_trait]
impl Tool for GetWeatherTool {
    type Input = GetWeatherInput;
    type Output = WeatherReport;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: ToolName::GetWeather,
            description: "Get weather information for a location",
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and country to get weather for"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn execute(&self, input: Self::Input) -> Result<Self::Output> {
        let location = input.location.trim().to_string();
        if location.is_empty() {
            return Err(anyhow::anyhow!("Location cannot be empty"));
        }

        let mut rng = rand::thread_rng();
        Ok(WeatherReport {
            location,
            temperature: rng.gen_range(5..35),
            condition: CONDITIONS
                .choose(&mut rng)
                .copied()
                .unwrap_or("sunny")
                .to_string(),
            humidity: rng.gen_range(0..100),
            wind_speed: rng.gen_range(0..20),
        })
    }
}
