//! Runtime configuration for probing, recovery and the status banner.
//!
//! Everything here is plain data. [`GuardConfig::default`] matches what the
//! portfolio page ships with; tests build their own through the `with_*`
//! methods.

use std::time::Duration;

/// Build flavour. Development builds expose the context-loss simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// `wasm-pack build --dev` keeps debug assertions on, release builds don't.
    pub fn from_build() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

/// A denylist entry. Matches when every needle occurs in the renderer string,
/// ignoring ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyRule {
    pub all_of: Vec<String>,
}

impl DenyRule {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all_of: needles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, renderer: &str) -> bool {
        !self.all_of.is_empty() && self.all_of.iter().all(|needle| contains_ignore_case(renderer, needle))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    rules: Vec<DenyRule>,
}

impl Denylist {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: DenyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns the first rule matching `renderer`, if any.
    pub fn find(&self, renderer: &str) -> Option<&DenyRule> {
        self.rules.iter().find(|rule| rule.matches(renderer))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Bounded retry policy for a lost context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    /// Wait before a restore is considered overdue.
    pub recovery_delay: Duration,
    /// Delay before a simulated loss is restored again.
    pub simulated_restore_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            recovery_delay: Duration::from_millis(2000),
            simulated_restore_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BannerTiming {
    /// How long the banner stays up after a loss or an unsupported probe.
    pub problem: Duration,
    /// How long the banner stays up when denylisted hardware is detected.
    pub denylisted: Duration,
}

impl Default for BannerTiming {
    fn default() -> Self {
        Self {
            problem: Duration::from_millis(5000),
            denylisted: Duration::from_millis(8000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub environment: Environment,
    pub denylist: Denylist,
    /// Renderer needles that mark hardware as low-end. Any single match degrades
    /// the quality profile.
    pub low_end: Vec<String>,
    /// Renderer needles identifying software rasterizers.
    pub software: Vec<String>,
    pub recovery: RecoveryPolicy,
    pub banner: BannerTiming,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            environment: Environment::from_build(),
            denylist: Denylist::empty().with_rule(DenyRule::new(["Intel", "UHD Graphics 620"])),
            low_end: ["Intel", "SwiftShader", "llvmpipe", "Microsoft Basic Render Driver"]
                .into_iter()
                .map(String::from)
                .collect(),
            software: ["SwiftShader", "Microsoft Basic Render Driver", "llvmpipe"]
                .into_iter()
                .map(String::from)
                .collect(),
            recovery: RecoveryPolicy::default(),
            banner: BannerTiming::default(),
        }
    }
}

impl GuardConfig {
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_denylist(mut self, denylist: Denylist) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.recovery.max_attempts = max_attempts;
        self
    }

    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery.recovery_delay = delay;
        self
    }

    pub fn is_low_end(&self, renderer: &str) -> bool {
        self.low_end.iter().any(|needle| contains_ignore_case(renderer, needle))
    }

    pub fn is_software(&self, renderer: &str) -> bool {
        self.software.iter().any(|needle| contains_ignore_case(renderer, needle))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rule_needs_every_needle() {
        let config = GuardConfig::default();
        assert!(config.denylist.find("ANGLE (Intel, Intel(R) UHD Graphics 620 Direct3D11)").is_some());
        assert!(config.denylist.find("Intel(R) Iris(R) Xe Graphics").is_none());
        assert!(config.denylist.find("NVIDIA GeForce RTX 3070").is_none());
    }

    #[test]
    fn empty_rule_never_matches() {
        assert!(!DenyRule::new(Vec::<String>::new()).matches("anything"));
    }

    #[test]
    fn matching_ignores_case() {
        let rule = DenyRule::new(["swiftshader"]);
        assert!(rule.matches("Google SwiftShader"));
    }
}
