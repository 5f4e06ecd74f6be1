use serde::Serialize;

pub const DEFAULT_API_URL: &str = "https://app.datadoghq.com";

#[derive(Debug, Serialize)]
pub struct Metric {
    #[serde(rename = "metric")]
    pub name: String,
    /// `[unix timestamp, value]` pairs, the shape the series API expects.
    pub points: Vec<(i64, f64)>,
    pub host: String,
    pub tags: Vec<String>,
}

#[derive(Serialize)]
struct SeriesRequest<'a> {
    series: &'a [Metric],
}

/// Thin client for the Datadog series API. Cheap to share since the
/// underlying HTTP client pools connections internally.
pub struct DatadogClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DatadogClient {
    pub fn new(api_key: impl Into<String>, client: reqwest::Client) -> DatadogClient {
        DatadogClient {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> DatadogClient {
        self.api_url = api_url.into();
        self
    }

    pub async fn publish_series(&self, series: &[Metric]) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/api/v1/series", self.api_url))
            .query(&[("api_key", self.api_key.as_str())])
            .json(&SeriesRequest { series })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_the_series_wire_shape() {
        let series = vec![Metric {
            name: "memstats.Alloc".to_string(),
            points: vec![(1456278960, 202208.0)],
            host: "web-1".to_string(),
            tags: vec!["env:prod".to_string()],
        }];

        let body = serde_json::to_value(SeriesRequest { series: &series }).unwrap();
        assert_eq!(
            body,
            json!({
                "series": [{
                    "metric": "memstats.Alloc",
                    "points": [[1456278960, 202208.0]],
                    "host": "web-1",
                    "tags": ["env:prod"],
                }]
            })
        );
    }
}
