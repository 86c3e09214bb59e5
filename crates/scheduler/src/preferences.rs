use parking_lot::RwLock;
use transq_core::{ConcurrencyPolicy, PolicyError, PreferencesSource};

/// In-memory [`PreferencesSource`] the embedding application can update.
///
/// Updates only become visible to admission decisions made afterwards; call
/// `Scheduler::policy_changed` so waiting jobs re-check right away.
#[derive(Debug, Default)]
pub struct SharedPreferences {
    policy: RwLock<ConcurrencyPolicy>,
}

impl SharedPreferences {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Replace the policy after validating it.
    pub fn set(&self, policy: ConcurrencyPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        *self.policy.write() = policy;
        Ok(())
    }
}

impl PreferencesSource for SharedPreferences {
    fn concurrency_policy(&self) -> ConcurrencyPolicy {
        self.policy.read().clone()
    }
}
