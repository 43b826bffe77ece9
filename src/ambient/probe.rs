use std::time::Duration;
use tracing::debug;

/// Liveness check for a speaker's stream URI.
#[async_trait::async_trait]
pub trait StreamProbe: Send + Sync {
    async fn is_live(&self, uri: &str) -> bool;
}

/// Accepts a URI when a GET answers with an `audio/mpeg` content type.
pub struct HttpStreamProbe {
    client: reqwest::Client,
}

impl HttpStreamProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StreamProbe for HttpStreamProbe {
    async fn is_live(&self, uri: &str) -> bool {
        let response = match self.client.get(uri).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Probe of {} failed: {}", uri, e);
                return false;
            }
        };
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        debug!("Probe of {}: {} {}", uri, response.status(), content_type);
        response.status().is_success() && content_type.starts_with("audio/mpeg")
    }
}
