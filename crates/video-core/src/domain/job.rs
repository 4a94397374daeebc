//! Job and stage status data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClientFingerprint, JobId};

use super::artifact::ArtifactRef;
use super::params::{BackgroundRemoverParams, BgmParams, PersonDetectorParams, ProsodyParams, TtsParams, VideoQuality};

/// One node of the fixed DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    PersonDetection,
    BackgroundRemoval,
    TtsSynthesis,
    Prosody,
    TalkingHead,
    BgmMix,
}

impl StageKind {
    /// Individual per-stage timeout in seconds.
    #[must_use]
    pub const fn timeout_secs(self) -> u64 {
        match self {
            Self::PersonDetection => 30,
            Self::BackgroundRemoval => 30,
            Self::TtsSynthesis => 30,
            Self::Prosody => 10,
            Self::TalkingHead => 120,
            Self::BgmMix => 15,
        }
    }

    /// Per-stage cache TTL in seconds, `None` meaning never cached (the
    /// final video is never cached).
    #[must_use]
    pub const fn cache_ttl_secs(self) -> Option<u64> {
        match self {
            Self::PersonDetection | Self::BackgroundRemoval => Some(24 * 3600),
            Self::Prosody | Self::TtsSynthesis => Some(3600),
            Self::TalkingHead | Self::BgmMix => None,
        }
    }
}

/// Per-stage lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Cached,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Status record for one stage of one job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub state: StageState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub last_error_kind: Option<String>,
    pub artifact_fingerprint: Option<String>,
}

impl StageStatus {
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            state: StageState::Pending,
            started_at: None,
            ended_at: None,
            attempt_count: 0,
            last_error_kind: None,
            artifact_fingerprint: None,
        }
    }
}

/// Job-level lifecycle state machine:
/// `Submitted -> Running -> {Succeeded, Failed, Cancelled}`. Terminal states
/// are sticky: no subsequent state mutation is observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// All recognized submission-time parameters, bundled so the registry and
/// orchestrator can pass them around as one value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub detector: PersonDetectorParams,
    pub background: BackgroundRemoverParams,
    pub tts: Option<TtsParams>,
    pub prosody: Option<ProsodyParams>,
    pub bgm: Option<BgmParams>,
    pub smoothing: bool,
    pub video_quality: VideoQuality,
}

/// A Job: unique id, submission metadata, current state, per-stage status
/// map, produced-artifact references, cancellation flag, deadline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub submitted_at: DateTime<Utc>,
    pub client: ClientFingerprint,
    pub state: JobState,
    pub stages: BTreeMap<StageKind, StageStatus>,
    pub artifacts: BTreeMap<StageKind, ArtifactRef>,
    pub cancel_requested: bool,
    pub deadline: DateTime<Utc>,
    pub request: JobRequest,
    pub error: Option<crate::error::PipelineError>,
    pub result_url: Option<String>,
}

impl Job {
    /// Create a freshly submitted job with all stages `Pending`.
    #[must_use]
    pub fn new(
        id: JobId,
        client: ClientFingerprint,
        request: JobRequest,
        submitted_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let mut stages = BTreeMap::new();
        for kind in Self::dag_stages(&request) {
            stages.insert(kind, StageStatus::pending());
        }
        Self {
            id,
            submitted_at,
            client,
            state: JobState::Submitted,
            stages,
            artifacts: BTreeMap::new(),
            cancel_requested: false,
            deadline,
            request,
            error: None,
            result_url: None,
        }
    }

    /// The stages this particular request will traverse, honoring the
    /// optional prosody and BGM stages. BackgroundRemoval always runs: the
    /// request carries no field that disables it, only `smoothing`, which
    /// only controls whether the alpha matte it produces is blurred.
    #[must_use]
    pub fn dag_stages(request: &JobRequest) -> Vec<StageKind> {
        let mut stages = vec![StageKind::PersonDetection, StageKind::BackgroundRemoval];
        stages.push(StageKind::TtsSynthesis);
        if request.prosody.is_some() {
            stages.push(StageKind::Prosody);
        }
        stages.push(StageKind::TalkingHead);
        if request.bgm.is_some() {
            stages.push(StageKind::BgmMix);
        }
        stages
    }

    /// Progress percentage derived from succeeded/skipped stage count,
    /// for the status endpoint.
    #[must_use]
    pub fn progress_pct(&self) -> u8 {
        if self.stages.is_empty() {
            return 100;
        }
        let done = self
            .stages
            .values()
            .filter(|s| matches!(s.state, StageState::Succeeded | StageState::Skipped))
            .count();
        ((done * 100) / self.stages.len()) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> JobRequest {
        JobRequest {
            detector: PersonDetectorParams::default(),
            background: BackgroundRemoverParams::default(),
            tts: None,
            prosody: None,
            bgm: None,
            smoothing: true,
            video_quality: VideoQuality::Standard,
        }
    }

    #[test]
    fn terminal_states_are_flagged() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn dag_includes_prosody_only_when_requested() {
        let mut req = sample_request();
        assert!(!Job::dag_stages(&req).contains(&StageKind::Prosody));
        req.prosody = Some(ProsodyParams::Preset(super::super::params::ProsodyPreset::Celebration));
        assert!(Job::dag_stages(&req).contains(&StageKind::Prosody));
    }

    #[test]
    fn progress_pct_is_zero_for_fresh_job() {
        let job = Job::new(
            JobId::new_random(),
            ClientFingerprint::new("c1"),
            sample_request(),
            Utc::now(),
            Utc::now(),
        );
        assert_eq!(job.progress_pct(), 0);
    }
}
