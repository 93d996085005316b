//! Crowd sentiment from recent social posts.
//!
//! Fetches a bounded batch of recent posts mentioning an asset, scores each
//! with a compound-polarity analyzer, and reports the mean. An empty result
//! set is neutral, not an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sentinel_broker::{BrokerError, BrokerResult, SentimentSource};
use serde::Deserialize;
use tracing::debug;

/// Configuration for the social search client.
pub struct SocialSearchConfig {
    pub base_url: String,
    pub bearer_token: String,
    /// Posts fetched per query; the API enforces its own ceiling too.
    pub max_results: usize,
}

impl Default for SocialSearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".into(),
            bearer_token: String::new(),
            max_results: 10,
        }
    }
}

/// Sentiment source backed by the recent-search endpoint.
pub struct SocialSearchClient {
    http: Client,
    config: SocialSearchConfig,
}

impl SocialSearchClient {
    pub fn new(config: SocialSearchConfig) -> BrokerResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| BrokerError::Other(format!("failed to create http client: {err}")))?;
        Ok(Self { http, config })
    }

    async fn recent_texts(&self, base_asset: &str) -> BrokerResult<Vec<String>> {
        let query = format!("{base_asset} crypto -is:retweet lang:en");
        let response = self
            .http
            .get(format!("{}/2/tweets/search/recent", self.config.base_url))
            .bearer_auth(&self.config.bearer_token)
            .query(&[
                ("query", query.as_str()),
                ("max_results", &self.config.max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BrokerError::RateLimited("recent-search quota hit".into()));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Authentication(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(BrokerError::Exchange(format!("http {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| BrokerError::Serialization(err.to_string()))?;
        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|post| post.text)
            .collect())
    }
}

#[async_trait]
impl SentimentSource for SocialSearchClient {
    async fn sentiment(&self, base_asset: &str) -> BrokerResult<f64> {
        let texts = self.recent_texts(base_asset).await?;
        let score = mean_compound(&texts);
        debug!(base_asset, posts = texts.len(), score, "sentiment sampled");
        Ok(score)
    }
}

/// Mean compound polarity over a batch of texts, 0.0 for an empty batch.
#[must_use]
pub fn mean_compound(texts: &[String]) -> f64 {
    if texts.is_empty() {
        return 0.0;
    }
    let analyzer = vader_sentiment::SentimentIntensityAnalyzer::new();
    let total: f64 = texts
        .iter()
        .map(|text| {
            analyzer
                .polarity_scores(text)
                .get("compound")
                .copied()
                .unwrap_or(0.0)
        })
        .sum();
    total / texts.len() as f64
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<Vec<Post>>,
}

#[derive(Debug, Deserialize)]
struct Post {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_neutral() {
        assert_eq!(mean_compound(&[]), 0.0);
    }

    #[test]
    fn polarity_orders_obvious_texts() {
        let bullish = mean_compound(&["great amazing rally, huge win".to_string()]);
        let bearish = mean_compound(&["terrible crash, awful losses".to_string()]);
        assert!(bullish > 0.0);
        assert!(bearish < 0.0);
        assert!(bullish > bearish);
    }

    #[test]
    fn mean_is_between_extremes() {
        let texts = vec![
            "great amazing rally".to_string(),
            "terrible crash".to_string(),
        ];
        let mixed = mean_compound(&texts);
        let bullish = mean_compound(&texts[..1].to_vec());
        assert!(mixed < bullish);
    }
}
