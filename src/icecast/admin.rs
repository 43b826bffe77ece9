use anyhow::Result;
use roxmltree::Document;
use std::time::Duration;
use tracing::{debug, warn};

use super::StreamServer;
use crate::config::IcecastConfig;
use crate::error::{StreamError, StreamResult};
use crate::store::{AssetId, TagId};

/// Client for the Icecast2 admin API.
pub struct IcecastAdmin {
    client: reqwest::Client,
    base_uri: String,
    username: String,
    password: String,
}

impl IcecastAdmin {
    pub fn new(
        base_uri: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(config: &IcecastConfig) -> Result<Self> {
        Self::new(
            format!("http://{}:{}", config.host, config.port),
            config.admin_username.clone(),
            config.admin_password.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// All mounts the server currently serves.
    pub async fn mounts(&self) -> StreamResult<Vec<String>> {
        let xml = self.get("/admin/listmounts", &[]).await?;
        parse_mounts(&xml)
    }

    pub async fn try_listener_count(&self, mount: &str) -> StreamResult<u32> {
        let xml = self.get("/admin/listclients", &[("mount", mount)]).await?;
        parse_listeners(&xml)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> StreamResult<String> {
        let url = format!("{}{}", self.base_uri, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(StreamError::external)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::ExternalService(format!(
                "GET {} returned {}",
                path, status
            )));
        }
        response.text().await.map_err(StreamError::external)
    }
}

#[async_trait::async_trait]
impl StreamServer for IcecastAdmin {
    async fn try_stream_exists(&self, mount: &str) -> StreamResult<bool> {
        Ok(self.mounts().await?.iter().any(|m| m == mount))
    }

    async fn listener_count(&self, mount: &str) -> u32 {
        match self.try_listener_count(mount).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Listener count for {} failed: {}", mount, e);
                0
            }
        }
    }

    async fn push_metadata(&self, asset_id: AssetId, tags: &[TagId], mount: &str) {
        let song = format_song(asset_id, tags);
        let query = [("mount", mount), ("mode", "updinfo"), ("song", song.as_str())];
        match self.get("/admin/metadata", &query).await {
            Ok(_) => debug!("Pushed metadata to {}: {}", mount, song),
            Err(e) => warn!("Metadata push to {} failed: {}", mount, e),
        }
    }
}

fn format_song(asset_id: AssetId, tags: &[TagId]) -> String {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    format!("asset={}&tags={}", asset_id, tags.join(","))
}

/// Mount names from a `listmounts` response.
pub fn parse_mounts(xml: &str) -> StreamResult<Vec<String>> {
    let doc = Document::parse(xml).map_err(StreamError::external)?;
    Ok(sources(&doc)
        .filter_map(|n| n.attribute("mount"))
        .map(|m| m.to_string())
        .collect())
}

/// Listener count from a `listclients` response.
pub fn parse_listeners(xml: &str) -> StreamResult<u32> {
    let doc = Document::parse(xml).map_err(StreamError::external)?;
    let count = sources(&doc)
        .flat_map(|s| s.children())
        .find(|n| n.is_element() && n.tag_name().name() == "Listeners")
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse::<u32>().ok())
        .unwrap_or(0);
    Ok(count)
}

fn sources<'a>(doc: &'a Document<'a>) -> impl Iterator<Item = roxmltree::Node<'a, 'a>> {
    doc.root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "source")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTMOUNTS: &str = r#"<?xml version="1.0"?>
<icestats>
  <source mount="/stream1.mp3"><listeners>0</listeners></source>
  <source mount="/stream2.ogg"><listeners>3</listeners></source>
</icestats>"#;

    const LISTCLIENTS: &str = r#"<?xml version="1.0"?>
<icestats>
  <source mount="/stream2.ogg">
    <Listeners>3</Listeners>
    <listener id="1"><IP>127.0.0.1</IP></listener>
  </source>
</icestats>"#;

    #[test]
    fn test_parse_mounts() {
        assert_eq!(
            parse_mounts(LISTMOUNTS).unwrap(),
            vec!["/stream1.mp3".to_string(), "/stream2.ogg".to_string()]
        );
    }

    #[test]
    fn test_parse_listeners() {
        assert_eq!(parse_listeners(LISTCLIENTS).unwrap(), 3);
        assert_eq!(parse_listeners("<icestats/>").unwrap(), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_mounts("not xml").is_err());
    }

    #[test]
    fn test_format_song() {
        assert_eq!(format_song(5, &[1, 2]), "asset=5&tags=1,2");
        assert_eq!(format_song(5, &[]), "asset=5&tags=");
    }
}
