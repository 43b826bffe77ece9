// Live ambient sources mixed by listener proximity
//
// Each speaker is a continuously playing stream whose volume falls off with
// distance. A speaker at volume 0 has no graph source at all; crossing zero
// attaches or detaches it. Changes to an attached source move toward their
// target a fixed step per ramp tick.
//
// Stream probes run in spawned tasks and report back as `ProbeOutcome`s, so
// an unreachable speaker never stalls the session loop.

pub mod probe;

pub use probe::{HttpStreamProbe, StreamProbe};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::listener::ListenerState;
use crate::pipeline::{AudioGraph, SourceId, SourceKind};
use crate::store::{Speaker, SpeakerId};

/// Default wait before a speaker whose streams were both down is probed again.
pub const DEFAULT_PROBE_BACKOFF: Duration = Duration::from_secs(60);

/// Volume of `speaker` as heard by `listener`.
///
/// Full volume inside `min_distance`, `min_volume` beyond `max_distance`,
/// halving with every doubling of distance in between. A listener without a
/// position hears every speaker at full volume.
pub fn compute_volume(speaker: &Speaker, listener: &ListenerState) -> f64 {
    let position = match listener.position() {
        Some(p) => p,
        None => return speaker.max_volume,
    };
    let distance = position.distance_meters(&speaker.location());

    if distance <= speaker.min_distance {
        speaker.max_volume
    } else if distance >= speaker.max_distance {
        speaker.min_volume
    } else {
        let falloff = (distance / speaker.min_distance).log2();
        let volume = speaker.max_volume / 2f64.powf(falloff);
        volume.max(speaker.min_volume).min(speaker.max_volume)
    }
}

/// Current mix state of one speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerLevel {
    pub speaker_id: SpeakerId,
    pub target: f64,
    pub current: f64,
    pub source: Option<SourceId>,
}

/// Result of probing a speaker's streams. `uri` is the first live one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub speaker_id: SpeakerId,
    pub uri: Option<String>,
}

struct Slot {
    speaker: Speaker,
    target: f64,
    current: f64,
    source: Option<SourceId>,
    probing: bool,
    /// Set after a failed probe; no new probe before this instant.
    retry_at: Option<Instant>,
}

impl Slot {
    fn wants_probe(&self, now: Instant) -> bool {
        self.target > 0.0
            && self.source.is_none()
            && !self.probing
            && self.retry_at.map_or(true, |at| now >= at)
    }
}

pub struct AmbientMixer {
    slots: Vec<Slot>,
    listener: ListenerState,
    probe: Arc<dyn StreamProbe>,
    ramp_step: f64,
    probe_backoff: Duration,
    outcomes_tx: mpsc::UnboundedSender<ProbeOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
}

impl AmbientMixer {
    /// Build the mixer and start probing every speaker audible from
    /// `listener`. Speakers are attached as their probes report back.
    pub fn new(
        listener: ListenerState,
        speakers: Vec<Speaker>,
        probe: Arc<dyn StreamProbe>,
        ramp_step: f64,
    ) -> Self {
        info!("Ambient mixer: {} speakers", speakers.len());
        let slots = speakers
            .into_iter()
            .map(|speaker| Slot {
                speaker,
                target: 0.0,
                current: 0.0,
                source: None,
                probing: false,
                retry_at: None,
            })
            .collect();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let mut mixer = Self {
            slots,
            listener: listener.clone(),
            probe,
            ramp_step,
            probe_backoff: DEFAULT_PROBE_BACKOFF,
            outcomes_tx,
            outcomes_rx,
        };
        mixer.retarget(listener);
        mixer
    }

    pub fn with_probe_backoff(mut self, backoff: Duration) -> Self {
        self.probe_backoff = backoff;
        self
    }

    pub fn listener(&self) -> &ListenerState {
        &self.listener
    }

    pub fn levels(&self) -> Vec<SpeakerLevel> {
        self.slots
            .iter()
            .map(|s| SpeakerLevel {
                speaker_id: s.speaker.id,
                target: s.target,
                current: s.current,
                source: s.source,
            })
            .collect()
    }

    pub fn owns(&self, source: SourceId) -> bool {
        self.slots.iter().any(|s| s.source == Some(source))
    }

    /// Probes started and not yet applied.
    pub fn pending_probes(&self) -> usize {
        self.slots.iter().filter(|s| s.probing).count()
    }

    /// Recompute targets for a new listener position.
    ///
    /// Newly audible speakers are probed in the background and attached by
    /// [`on_probe_result`](Self::on_probe_result). Speakers that drop to zero
    /// ramp down and are removed by [`ramp_tick`](Self::ramp_tick).
    pub fn move_listener(&mut self, listener: ListenerState) {
        self.retarget(listener);
    }

    fn retarget(&mut self, listener: ListenerState) {
        self.listener = listener;
        let now = Instant::now();
        for slot in self.slots.iter_mut() {
            slot.target = compute_volume(&slot.speaker, &self.listener);
            debug!("Speaker {} target volume {:.3}", slot.speaker.id, slot.target);

            if slot.wants_probe(now) {
                slot.probing = true;
                spawn_probe(&slot.speaker, self.probe.clone(), self.outcomes_tx.clone());
            }
        }
    }

    /// Wait for the next finished probe.
    pub async fn next_probe(&mut self) -> Option<ProbeOutcome> {
        self.outcomes_rx.recv().await
    }

    /// Attach a probed speaker if it is still audible and unattached.
    pub async fn on_probe_result(&mut self, outcome: ProbeOutcome, graph: &mut dyn AudioGraph) {
        let backoff = self.probe_backoff;
        let slot = match self
            .slots
            .iter_mut()
            .find(|s| s.speaker.id == outcome.speaker_id)
        {
            Some(slot) => slot,
            None => return,
        };
        slot.probing = false;

        let uri = match outcome.uri {
            Some(uri) => uri,
            None => {
                warn!(
                    "Stream {} and its backup are not valid audio/mpeg streams, skipping speaker {} for {:?}",
                    slot.speaker.uri, slot.speaker.id, backoff
                );
                slot.retry_at = Some(Instant::now() + backoff);
                return;
            }
        };
        slot.retry_at = None;
        if slot.target <= 0.0 || slot.source.is_some() {
            debug!("Speaker {} no longer needs a source", slot.speaker.id);
            return;
        }
        attach(slot, uri, graph).await;
    }

    /// Apply probe results until none are outstanding.
    pub async fn settle(&mut self, graph: &mut dyn AudioGraph) {
        while self.pending_probes() > 0 {
            match self.next_probe().await {
                Some(outcome) => self.on_probe_result(outcome, graph).await,
                None => break,
            }
        }
    }

    /// Move attached sources one step toward their targets.
    pub async fn ramp_tick(&mut self, graph: &mut dyn AudioGraph) {
        for slot in self.slots.iter_mut() {
            let source = match slot.source {
                Some(s) => s,
                None => continue,
            };

            if (slot.current - slot.target).abs() > f64::EPSILON {
                let step = self.ramp_step.abs();
                let delta = (slot.target - slot.current).clamp(-step, step);
                slot.current += delta;
                if let Err(e) = graph.set_volume(source, slot.current).await {
                    warn!("Failed to set volume for speaker {}: {:#}", slot.speaker.id, e);
                }
            }

            if slot.target <= 0.0 && slot.current <= f64::EPSILON {
                info!("Speaker {} out of range, removing", slot.speaker.id);
                if let Err(e) = graph.remove_source(source).await {
                    warn!("Failed to remove speaker {}: {:#}", slot.speaker.id, e);
                }
                slot.source = None;
                slot.current = 0.0;
            }
        }
    }

    /// Detach a speaker source that ended or failed. Returns false if the
    /// source is not one of ours.
    pub async fn on_source_ended(&mut self, source: SourceId, graph: &mut dyn AudioGraph) -> bool {
        let slot = match self.slots.iter_mut().find(|s| s.source == Some(source)) {
            Some(slot) => slot,
            None => return false,
        };
        warn!("Speaker {} stream ended", slot.speaker.id);
        if let Err(e) = graph.remove_source(source).await {
            debug!("Source {} already gone: {:#}", source, e);
        }
        slot.source = None;
        slot.current = 0.0;
        true
    }
}

fn spawn_probe(
    speaker: &Speaker,
    probe: Arc<dyn StreamProbe>,
    outcomes: mpsc::UnboundedSender<ProbeOutcome>,
) {
    let speaker_id = speaker.id;
    let primary = speaker.uri.clone();
    let backup = speaker.backup_uri.clone();
    tokio::spawn(async move {
        let uri = if probe.is_live(&primary).await {
            Some(primary)
        } else {
            match backup {
                Some(backup) if probe.is_live(&backup).await => {
                    warn!("Stream {} is not a valid audio/mpeg stream, using backup", primary);
                    Some(backup)
                }
                _ => None,
            }
        };
        // the mixer may be gone by now
        let _ = outcomes.send(ProbeOutcome { speaker_id, uri });
    });
}

async fn attach(slot: &mut Slot, uri: String, graph: &mut dyn AudioGraph) {
    let speaker_id = slot.speaker.id;
    let source = match graph.add_source(SourceKind::Stream { uri: uri.clone() }).await {
        Ok(source) => source,
        Err(e) => {
            warn!("Failed to attach speaker {}: {:#}", speaker_id, e);
            return;
        }
    };
    if let Err(e) = graph.set_volume(source, slot.target).await {
        warn!("Failed to set volume for speaker {}: {:#}", speaker_id, e);
    }
    info!(
        "Attached speaker {} from {} at volume {:.3}",
        speaker_id, uri, slot.target
    );
    slot.source = Some(source);
    slot.current = slot.target;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker() -> Speaker {
        Speaker {
            id: 1,
            project_id: 1,
            latitude: 0.0,
            longitude: 0.0,
            active: true,
            min_distance: 10.0,
            max_distance: 1000.0,
            min_volume: 0.1,
            max_volume: 1.0,
            uri: "http://example.invalid/a.mp3".to_string(),
            backup_uri: None,
        }
    }

    fn listener_at_meters(m: f64) -> ListenerState {
        // One degree of latitude is about 111.195 km.
        ListenerState::at(m / 111_194.93, 0.0)
    }

    #[test]
    fn test_volume_endpoints() {
        let s = speaker();
        assert_eq!(compute_volume(&s, &listener_at_meters(0.0)), 1.0);
        assert_eq!(compute_volume(&s, &listener_at_meters(5.0)), 1.0);
        assert_eq!(compute_volume(&s, &listener_at_meters(2000.0)), 0.1);
    }

    #[test]
    fn test_volume_halves_per_doubling() {
        let s = speaker();
        let v = compute_volume(&s, &listener_at_meters(40.0));
        assert!((v - 0.25).abs() < 1e-3, "got {}", v);
    }

    #[test]
    fn test_volume_monotonic_in_distance() {
        let s = speaker();
        let mut last = f64::INFINITY;
        for m in (0..1500).step_by(7) {
            let v = compute_volume(&s, &listener_at_meters(m as f64));
            assert!(v <= last + 1e-12, "volume rose at {} m", m);
            assert!(v >= s.min_volume && v <= s.max_volume);
            last = v;
        }
    }

    #[test]
    fn test_unknown_listener_hears_max() {
        assert_eq!(compute_volume(&speaker(), &ListenerState::unknown()), 1.0);
    }
}
