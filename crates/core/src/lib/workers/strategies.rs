use crate::challenges::Challenge;
use crate::engine::BundleCandidate;
use ambrosus_node_shared::entities::Bundle;
use tokio::time::Duration;

/// Upload policy: when to tick, how long to shelter, and whether a claimed
/// candidate is worth committing.
pub trait UploadStrategy: Send + Sync {
    fn worker_interval(&self) -> Duration;
    fn storage_periods(&self) -> u64;
    fn should_bundle(&self, candidate: &BundleCandidate) -> bool;
    fn bundling_succeeded(&mut self);
}

/// Default policy: bundle on every tick that claims anything.
#[derive(Debug, Clone)]
pub struct RegularUploadStrategy {
    pub interval: Duration,
    pub storage_periods: u64,
}

impl Default for RegularUploadStrategy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            storage_periods: 1,
        }
    }
}

impl UploadStrategy for RegularUploadStrategy {
    fn worker_interval(&self) -> Duration {
        self.interval
    }

    fn storage_periods(&self) -> u64 {
        self.storage_periods
    }

    fn should_bundle(&self, candidate: &BundleCandidate) -> bool {
        candidate.entry_count() > 0
    }

    fn bundling_succeeded(&mut self) {}
}

/// Challenge participation policy.
pub trait ChallengeStrategy: Send + Sync {
    fn worker_interval(&self) -> Duration;
    /// Seconds a failed challenge stays negatively cached.
    fn retry_timeout(&self) -> u64;
    fn should_fetch_bundle(&self, challenge: &Challenge) -> bool;
    fn should_resolve_challenge(&self, bundle: &Bundle) -> bool;
    fn after_challenge_resolution(&mut self, bundle: &Bundle);
}

/// Default policy: shelter everything that can be fetched.
#[derive(Debug, Clone)]
pub struct AcceptAllChallengeStrategy {
    pub interval: Duration,
    pub retry_timeout: u64,
}

impl Default for AcceptAllChallengeStrategy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            retry_timeout: 600,
        }
    }
}

impl ChallengeStrategy for AcceptAllChallengeStrategy {
    fn worker_interval(&self) -> Duration {
        self.interval
    }

    fn retry_timeout(&self) -> u64 {
        self.retry_timeout
    }

    fn should_fetch_bundle(&self, _challenge: &Challenge) -> bool {
        true
    }

    fn should_resolve_challenge(&self, _bundle: &Bundle) -> bool {
        true
    }

    fn after_challenge_resolution(&mut self, _bundle: &Bundle) {}
}
