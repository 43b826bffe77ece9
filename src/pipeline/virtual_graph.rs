use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{AudioGraph, EnvelopePoint, GraphEvent, SinkConfig, SourceId, SourceKind};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable state of one attached source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub id: SourceId,
    pub kind: SourceKind,
    pub envelope: Vec<EnvelopePoint>,
    pub volume: f64,
    pub pan: f64,
    pub fade_out: Option<Duration>,
    pub added_at: Instant,
}

struct VirtualSource {
    snapshot: SourceSnapshot,
    eos: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    sink: Option<SinkConfig>,
    events: Option<mpsc::Sender<GraphEvent>>,
    sources: HashMap<SourceId, VirtualSource>,
    next_id: SourceId,
    metadata: Vec<String>,
    fail_adds: bool,
}

/// Clock-driven graph that tracks mix state without rendering audio.
///
/// Clip sources report end-of-stream once their duration has elapsed on the
/// tokio clock. Clones share state, so a handle kept outside the session
/// can observe what the session did.
#[derive(Clone, Default)]
pub struct VirtualGraph {
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
}

impl VirtualGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sources(&self) -> Vec<SourceSnapshot> {
        let inner = self.inner.lock().await;
        let mut sources: Vec<SourceSnapshot> =
            inner.sources.values().map(|s| s.snapshot.clone()).collect();
        sources.sort_by_key(|s| s.id);
        sources
    }

    pub async fn source(&self, id: SourceId) -> Option<SourceSnapshot> {
        self.inner
            .lock()
            .await
            .sources
            .get(&id)
            .map(|s| s.snapshot.clone())
    }

    /// Attached clip sources.
    pub async fn clips(&self) -> Vec<SourceSnapshot> {
        self.sources()
            .await
            .into_iter()
            .filter(|s| matches!(s.kind, SourceKind::Clip { .. }))
            .collect()
    }

    /// Attached live stream sources.
    pub async fn streams(&self) -> Vec<SourceSnapshot> {
        self.sources()
            .await
            .into_iter()
            .filter(|s| matches!(s.kind, SourceKind::Stream { .. }))
            .collect()
    }

    pub async fn metadata(&self) -> Vec<String> {
        self.inner.lock().await.metadata.clone()
    }

    pub async fn sink(&self) -> Option<SinkConfig> {
        self.inner.lock().await.sink.clone()
    }

    /// Make every following `add_source` fail.
    pub async fn set_fail_adds(&self, fail: bool) {
        self.inner.lock().await.fail_adds = fail;
    }

    /// Deliver an event as if the graph raised it.
    pub async fn emit(&self, event: GraphEvent) -> Result<()> {
        let tx = self
            .inner
            .lock()
            .await
            .events
            .clone()
            .context("Graph has not been started")?;
        tx.send(event).await.context("Graph event receiver dropped")
    }
}

#[async_trait::async_trait]
impl AudioGraph for VirtualGraph {
    async fn start(&mut self, sink: &SinkConfig) -> Result<mpsc::Receiver<GraphEvent>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Graph already running");
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        {
            let mut inner = self.inner.lock().await;
            inner.sink = Some(sink.clone());
            inner.events = Some(tx.clone());
        }
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Virtual graph started: {} {} @ {} kbit/s",
            sink.mount, sink.format, sink.bitrate
        );
        tx.send(GraphEvent::Playing)
            .await
            .context("Graph event receiver dropped")?;
        Ok(rx)
    }

    async fn add_source(&mut self, kind: SourceKind) -> Result<SourceId> {
        if !self.running.load(Ordering::SeqCst) {
            bail!("Graph is not running");
        }
        let mut inner = self.inner.lock().await;
        if inner.fail_adds {
            bail!("Source could not be linked");
        }
        inner.next_id += 1;
        let id = inner.next_id;

        let eos = match (&kind, inner.events.clone()) {
            (SourceKind::Clip { duration, .. }, Some(tx)) => {
                let duration = *duration;
                Some(tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(GraphEvent::EndOfStream(id)).await;
                }))
            }
            _ => None,
        };

        debug!("Added source {}: {:?}", id, kind);
        inner.sources.insert(
            id,
            VirtualSource {
                snapshot: SourceSnapshot {
                    id,
                    kind,
                    envelope: Vec::new(),
                    volume: 1.0,
                    pan: 0.0,
                    fade_out: None,
                    added_at: Instant::now(),
                },
                eos,
            },
        );
        Ok(id)
    }

    async fn remove_source(&mut self, source: SourceId) -> Result<()> {
        let removed = self.inner.lock().await.sources.remove(&source);
        match removed {
            Some(s) => {
                if let Some(eos) = s.eos {
                    eos.abort();
                }
                debug!("Removed source {}", source);
                Ok(())
            }
            None => bail!("Unknown source {}", source),
        }
    }

    async fn set_envelope(&mut self, source: SourceId, points: Vec<EnvelopePoint>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let s = inner
            .sources
            .get_mut(&source)
            .with_context(|| format!("Unknown source {}", source))?;
        s.snapshot.envelope = points;
        Ok(())
    }

    async fn set_volume(&mut self, source: SourceId, volume: f64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let s = inner
            .sources
            .get_mut(&source)
            .with_context(|| format!("Unknown source {}", source))?;
        s.snapshot.volume = volume;
        Ok(())
    }

    async fn set_pan(&mut self, source: SourceId, pan: f64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let s = inner
            .sources
            .get_mut(&source)
            .with_context(|| format!("Unknown source {}", source))?;
        s.snapshot.pan = pan.clamp(-1.0, 1.0);
        Ok(())
    }

    async fn fade_out(&mut self, source: SourceId, over: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let s = inner
            .sources
            .get_mut(&source)
            .with_context(|| format!("Unknown source {}", source))?;
        s.snapshot.fade_out = Some(over);
        Ok(())
    }

    async fn set_metadata(&mut self, title: &str) -> Result<()> {
        self.inner.lock().await.metadata.push(title.to_string());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for (_, s) in inner.sources.drain() {
            if let Some(eos) = s.eos {
                eos.abort();
            }
        }
        inner.events = None;
        self.running.store(false, Ordering::SeqCst);
        info!("Virtual graph stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AudioFormat;

    fn sink() -> SinkConfig {
        SinkConfig {
            mount: "/stream1.mp3".to_string(),
            format: AudioFormat::Mp3,
            bitrate: 128,
            master_volume: 3.0,
            host: "localhost".to_string(),
            port: 8000,
            source_username: "source".to_string(),
            source_password: "hackme".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clip_reports_end_of_stream() {
        let mut graph = VirtualGraph::new();
        let mut events = graph.start(&sink()).await.unwrap();
        assert_eq!(events.recv().await, Some(GraphEvent::Playing));

        let id = graph
            .add_source(SourceKind::Clip {
                path: "a.wav".into(),
                start: Duration::ZERO,
                duration: Duration::from_secs(3),
            })
            .await
            .unwrap();

        let started = Instant::now();
        assert_eq!(events.recv().await, Some(GraphEvent::EndOfStream(id)));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_add_before_start_fails() {
        let mut graph = VirtualGraph::new();
        assert!(graph.add_source(SourceKind::Silence).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_drops_sources() {
        let mut graph = VirtualGraph::new();
        let _events = graph.start(&sink()).await.unwrap();
        graph.add_source(SourceKind::Silence).await.unwrap();
        assert_eq!(graph.sources().await.len(), 1);

        graph.stop().await.unwrap();
        assert!(!graph.is_running());
        assert!(graph.sources().await.is_empty());
    }
}
