use {async_trait::async_trait, chatrelay_config::CompletionConfig, tracing::debug};

use crate::error::RelayError;

/// Text-completion oracle: one query in, one plain-text answer out.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn fetch_completion(&self, query: &str) -> Result<String, RelayError>;
}

/// Completion service reached with `GET <endpoint>?q=<query>`.
///
/// No retries: a failed attempt is final for that message. Callers enforce
/// their deadline by dropping the future.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    query_param: String,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(RelayError::Network)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            query_param: config.query_param.clone(),
        })
    }

    /// Full request URL for `query`, percent-encoded.
    pub fn request_url(&self, query: &str) -> String {
        let sep = if self.endpoint.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{sep}{}={}",
            self.endpoint,
            urlencoding::encode(&self.query_param),
            urlencoding::encode(query)
        )
    }
}

#[async_trait]
impl CompletionGateway for HttpCompletionClient {
    async fn fetch_completion(&self, query: &str) -> Result<String, RelayError> {
        let url = self.request_url(query);
        debug!(endpoint = %self.endpoint, chars = query.chars().count(), "querying completion service");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(RelayError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status { status });
        }

        let body = response.bytes().await.map_err(RelayError::from_reqwest)?;
        String::from_utf8(body.to_vec()).map_err(RelayError::Decode)
    }
}
