//! Port definitions shared by every component: minimal trait abstractions
//! over external/black-box collaborators, containing only domain types in
//! their signatures (no ML framework or HTTP client types leak through).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::fingerprint::Fingerprint;
use crate::ids::{ModelId, OperatorVersion};

/// Uniform wrapper around one ML/TTS/mixing operation.
///
/// A concrete operator is polymorphic over its own input/param types but
/// shares this capability set: a stable identity for fingerprinting, a
/// cache TTL policy, and a declared GPU cost used by the admission
/// controller before `execute` is ever called.
#[async_trait]
pub trait StageOperator: Send + Sync {
    /// Operator's input type (typically one or more [`crate::domain::ArtifactRef`]s).
    type Input: Send + Sync;
    /// Operator's recognized parameter set.
    type Params: Send + Sync;
    /// Operator's produced value.
    type Output: Send + Sync;

    /// Stable identity used as the first field of the cache fingerprint.
    fn operator_id(&self) -> &'static str;

    /// Algorithm version; bumping invalidates prior cache entries.
    fn version(&self) -> OperatorVersion;

    /// GPU model this operator needs admission for, if any (pure-CPU
    /// operators like NMS post-processing return `None`).
    fn model(&self) -> Option<ModelId>;

    /// Cache TTL for this operator's output, `None` meaning never cached.
    fn cache_ttl_secs(&self) -> Option<u64>;

    /// Compute the stage fingerprint for `(input, params)`.
    fn fingerprint(&self, input: &Self::Input, params: &Self::Params) -> Fingerprint;

    /// Execute the operation. The caller is responsible for admission
    /// (acquiring/releasing a GPU ticket around this call) and for caching
    /// the result; this method performs the operation itself only. `cancel`
    /// must be observed by any internal retry/backoff loop so a cancelled
    /// job does not block for a full retry cycle.
    async fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError>;
}
