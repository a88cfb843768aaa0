use crate::modules::error::FetchError;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;

/// Body of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedModule {
    /// Final URL after redirects
    pub url: String,
    pub content: Vec<u8>,
}

/// Network access used by the module resolver
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError>;
}

/// Fetcher backed by reqwest
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("rustle-script/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::HttpError {
                url: String::new(),
                error: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
        debug!("Fetching module from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::HttpError {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content = response.bytes().await.map_err(|e| FetchError::HttpError {
            url: url.to_string(),
            error: e.to_string(),
        })?;

        Ok(FetchedModule {
            url: final_url,
            content: content.to_vec(),
        })
    }
}
