//! Lifetime profiles and the profile registry.
//!
//! A profile is a `{ stale, revalidate, expire }` policy. Named profiles are
//! registered once at startup through [`ProfileRegistryBuilder`]; the built
//! [`ProfileRegistry`] is immutable and shared by `Arc` with the engine.
//! Inline policies bypass the registry but go through the same validation.

use crate::entry::FreshnessState;
use crate::error::ProfileError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

// ============================================================================
// LIFETIME PROFILE
// ============================================================================

/// Stale / revalidate / expire windows for a cache entry.
///
/// Invariant: `stale <= revalidate <= expire`. `expire == Duration::MAX`
/// means the entry never hard-expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifetimeProfile {
    pub stale: Duration,
    pub revalidate: Duration,
    pub expire: Duration,
    /// When false, entries past `revalidate` are recomputed synchronously
    /// instead of being served while a background refresh runs.
    #[serde(default = "default_background_refresh")]
    pub background_refresh: bool,
}

fn default_background_refresh() -> bool {
    true
}

impl LifetimeProfile {
    /// Marker for "never expires".
    pub const UNBOUNDED: Duration = Duration::MAX;

    /// Create a validated profile.
    pub fn new(
        stale: Duration,
        revalidate: Duration,
        expire: Duration,
    ) -> Result<Self, ProfileError> {
        let profile = Self {
            stale,
            revalidate,
            expire,
            background_refresh: true,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Create a validated profile from whole seconds. `None` expire is unbounded.
    pub fn from_secs(
        stale: u64,
        revalidate: u64,
        expire: Option<u64>,
    ) -> Result<Self, ProfileError> {
        Self::new(
            Duration::from_secs(stale),
            Duration::from_secs(revalidate),
            expire.map(Duration::from_secs).unwrap_or(Self::UNBOUNDED),
        )
    }

    const fn windows(stale: u64, revalidate: u64, expire: Option<u64>) -> Self {
        Self {
            stale: Duration::from_secs(stale),
            revalidate: Duration::from_secs(revalidate),
            expire: match expire {
                Some(secs) => Duration::from_secs(secs),
                None => Self::UNBOUNDED,
            },
            background_refresh: true,
        }
    }

    /// Disable or enable serving stale values past `revalidate`.
    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    /// Check `stale <= revalidate <= expire`.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.stale > self.revalidate {
            return Err(ProfileError::Invalid {
                reason: format!(
                    "stale ({:?}) must not exceed revalidate ({:?})",
                    self.stale, self.revalidate
                ),
            });
        }
        if self.revalidate > self.expire {
            return Err(ProfileError::Invalid {
                reason: format!(
                    "revalidate ({:?}) must not exceed expire ({:?})",
                    self.revalidate, self.expire
                ),
            });
        }
        Ok(())
    }

    pub fn is_unbounded(&self) -> bool {
        self.expire == Self::UNBOUNDED
    }

    /// TTL to hand to the backing store; `None` when unbounded.
    pub fn ttl(&self) -> Option<Duration> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.expire)
        }
    }

    /// Classify an entry of the given age.
    pub fn classify(&self, age: Duration) -> FreshnessState {
        if age < self.stale {
            return FreshnessState::Fresh;
        }
        if !self.is_unbounded() && age >= self.expire {
            return FreshnessState::Expired;
        }
        if self.background_refresh || age < self.revalidate {
            FreshnessState::Stale
        } else {
            FreshnessState::Expired
        }
    }
}

// ============================================================================
// PROFILE REFERENCES AND SPECS
// ============================================================================

/// Profile argument at the call boundary: a registered name or an inline policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRef {
    Named(String),
    Inline(LifetimeProfile),
}

impl ProfileRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl From<&str> for ProfileRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ProfileRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<LifetimeProfile> for ProfileRef {
    fn from(profile: LifetimeProfile) -> Self {
        Self::Inline(profile)
    }
}

/// Serializable profile declaration, in seconds, for host configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    pub stale_secs: u64,
    pub revalidate_secs: u64,
    /// Omitted means the profile never expires.
    #[serde(default)]
    pub expire_secs: Option<u64>,
    #[serde(default = "default_background_refresh")]
    pub background_refresh: bool,
}

impl ProfileSpec {
    pub fn to_profile(&self) -> Result<LifetimeProfile, ProfileError> {
        LifetimeProfile::from_secs(self.stale_secs, self.revalidate_secs, self.expire_secs)
            .map(|p| p.with_background_refresh(self.background_refresh))
    }
}

/// Built-in named profiles, ordered seconds < minutes < hours < days < weeks < max.
pub fn builtin_profiles() -> Vec<(&'static str, LifetimeProfile)> {
    vec![
        ("default", LifetimeProfile::windows(5 * MINUTE, 15 * MINUTE, Some(365 * DAY))),
        ("seconds", LifetimeProfile::windows(1, 5, Some(MINUTE))),
        ("minutes", LifetimeProfile::windows(MINUTE, 5 * MINUTE, Some(HOUR))),
        ("hours", LifetimeProfile::windows(5 * MINUTE, HOUR, Some(DAY))),
        ("days", LifetimeProfile::windows(5 * MINUTE, DAY, Some(WEEK))),
        ("weeks", LifetimeProfile::windows(5 * MINUTE, WEEK, Some(30 * DAY))),
        ("max", LifetimeProfile::windows(5 * MINUTE, 30 * DAY, None)),
    ]
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Startup-time registry builder.
#[derive(Debug, Clone)]
pub struct ProfileRegistryBuilder {
    profiles: HashMap<String, LifetimeProfile>,
}

impl Default for ProfileRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileRegistryBuilder {
    /// Builder pre-populated with the built-in profiles.
    pub fn new() -> Self {
        Self {
            profiles: builtin_profiles()
                .into_iter()
                .map(|(name, profile)| (name.to_string(), profile))
                .collect(),
        }
    }

    /// Builder with no profiles at all.
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Register a named profile.
    ///
    /// Re-registering the same policy under the same name is a no-op.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        policy: LifetimeProfile,
    ) -> Result<&mut Self, ProfileError> {
        policy.validate()?;
        let name = name.into();
        match self.profiles.get(&name) {
            Some(existing) if *existing != policy => Err(ProfileError::Duplicate { name }),
            Some(_) => Ok(self),
            None => {
                self.profiles.insert(name, policy);
                Ok(self)
            }
        }
    }

    /// Replace a profile (built-in or not) with a new policy.
    pub fn override_profile(
        &mut self,
        name: impl Into<String>,
        policy: LifetimeProfile,
    ) -> Result<&mut Self, ProfileError> {
        policy.validate()?;
        self.profiles.insert(name.into(), policy);
        Ok(self)
    }

    /// Register every spec; built-in names are overridden, others must be unique.
    pub fn with_specs(mut self, specs: &[ProfileSpec]) -> Result<Self, ProfileError> {
        let builtin: Vec<&str> = builtin_profiles().into_iter().map(|(n, _)| n).collect();
        for spec in specs {
            let profile = spec.to_profile()?;
            if builtin.contains(&spec.name.as_str()) {
                self.override_profile(spec.name.clone(), profile)?;
            } else {
                self.register(spec.name.clone(), profile)?;
            }
        }
        Ok(self)
    }

    pub fn build(self) -> ProfileRegistry {
        ProfileRegistry {
            profiles: self.profiles,
        }
    }
}

/// Immutable name → profile map.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, LifetimeProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        ProfileRegistryBuilder::new().build()
    }
}

impl ProfileRegistry {
    pub fn builder() -> ProfileRegistryBuilder {
        ProfileRegistryBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Result<LifetimeProfile, ProfileError> {
        self.profiles
            .get(name)
            .copied()
            .ok_or_else(|| ProfileError::Unknown {
                name: name.to_string(),
            })
    }

    /// Resolve a call-site profile argument into a concrete, validated profile.
    pub fn resolve_ref(&self, profile: &ProfileRef) -> Result<LifetimeProfile, ProfileError> {
        match profile {
            ProfileRef::Named(name) => self.resolve(name),
            ProfileRef::Inline(policy) => {
                policy.validate()?;
                Ok(*policy)
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn short() -> LifetimeProfile {
        LifetimeProfile::from_secs(1, 2, Some(3)).expect("valid profile")
    }

    #[test]
    fn test_profile_rejects_stale_after_revalidate() {
        let err = LifetimeProfile::from_secs(10, 5, Some(20)).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { .. }));
    }

    #[test]
    fn test_profile_rejects_revalidate_after_expire() {
        let err = LifetimeProfile::from_secs(1, 30, Some(20)).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { .. }));
    }

    #[test]
    fn test_profile_unbounded_has_no_ttl() {
        let max = LifetimeProfile::from_secs(1, 2, None).expect("valid");
        assert!(max.is_unbounded());
        assert_eq!(max.ttl(), None);
        assert_eq!(short().ttl(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_classify_windows() {
        let p = short();
        assert_eq!(p.classify(Duration::from_millis(500)), FreshnessState::Fresh);
        assert_eq!(p.classify(Duration::from_millis(1500)), FreshnessState::Stale);
        assert_eq!(p.classify(Duration::from_millis(2500)), FreshnessState::Stale);
        assert_eq!(p.classify(Duration::from_secs(3)), FreshnessState::Expired);
    }

    #[test]
    fn test_classify_without_background_refresh() {
        let p = short().with_background_refresh(false);
        assert_eq!(p.classify(Duration::from_millis(1500)), FreshnessState::Stale);
        assert_eq!(p.classify(Duration::from_millis(2500)), FreshnessState::Expired);
    }

    #[test]
    fn test_classify_zero_stale_is_always_refresh_eligible() {
        let p = LifetimeProfile::from_secs(0, 10, Some(20)).expect("valid");
        assert_eq!(p.classify(Duration::ZERO), FreshnessState::Stale);
    }

    #[test]
    fn test_unbounded_never_expires() {
        let p = LifetimeProfile::from_secs(1, 2, None).expect("valid");
        assert_eq!(
            p.classify(Duration::from_secs(10 * 365 * 24 * 3600)),
            FreshnessState::Stale
        );
    }

    #[test]
    fn test_builtins_are_ordered() {
        let registry = ProfileRegistry::default();
        let order = ["seconds", "minutes", "hours", "days", "weeks", "max"];
        let profiles: Vec<LifetimeProfile> = order
            .iter()
            .map(|n| registry.resolve(n).expect("builtin present"))
            .collect();
        for pair in profiles.windows(2) {
            assert!(pair[0].revalidate < pair[1].revalidate);
            assert!(pair[0].expire < pair[1].expire);
        }
        assert!(profiles[5].is_unbounded());
        for (_, profile) in builtin_profiles() {
            profile.validate().expect("builtin satisfies invariant");
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut builder = ProfileRegistryBuilder::empty();
        builder.register("short", short()).expect("register");
        let registry = builder.build();
        assert_eq!(registry.resolve("short").expect("resolve"), short());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_same_policy_is_idempotent() {
        let mut builder = ProfileRegistryBuilder::empty();
        builder.register("short", short()).expect("first");
        builder.register("short", short()).expect("second, same policy");
    }

    #[test]
    fn test_register_duplicate_with_different_policy() {
        let mut builder = ProfileRegistryBuilder::new();
        let other = LifetimeProfile::from_secs(2, 4, Some(6)).expect("valid");
        let err = builder.register("hours", other).unwrap_err();
        assert_eq!(
            err,
            ProfileError::Duplicate {
                name: "hours".to_string()
            }
        );
    }

    #[test]
    fn test_register_invalid_policy() {
        let mut builder = ProfileRegistryBuilder::new();
        let bad = LifetimeProfile {
            stale: Duration::from_secs(9),
            revalidate: Duration::from_secs(1),
            expire: Duration::from_secs(10),
            background_refresh: true,
        };
        assert!(matches!(
            builder.register("bad", bad),
            Err(ProfileError::Invalid { .. })
        ));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ProfileRegistry::default();
        assert!(matches!(
            registry.resolve("fortnightly"),
            Err(ProfileError::Unknown { .. })
        ));
    }

    #[test]
    fn test_resolve_inline_is_validated() {
        let registry = ProfileRegistry::default();
        let bad = LifetimeProfile {
            stale: Duration::from_secs(5),
            revalidate: Duration::from_secs(1),
            expire: Duration::from_secs(10),
            background_refresh: true,
        };
        assert!(registry.resolve_ref(&ProfileRef::Inline(bad)).is_err());
        assert_eq!(
            registry.resolve_ref(&ProfileRef::from(short())).expect("inline"),
            short()
        );
    }

    #[test]
    fn test_specs_override_builtins_and_add_customs() {
        let specs: Vec<ProfileSpec> = serde_json::from_str(
            r#"[
                {"name": "seconds", "stale_secs": 2, "revalidate_secs": 4, "expire_secs": 8},
                {"name": "archive", "stale_secs": 60, "revalidate_secs": 600}
            ]"#,
        )
        .expect("parse specs");
        let registry = ProfileRegistryBuilder::new()
            .with_specs(&specs)
            .expect("apply specs")
            .build();
        assert_eq!(
            registry.resolve("seconds").expect("seconds").stale,
            Duration::from_secs(2)
        );
        assert!(registry.resolve("archive").expect("archive").is_unbounded());
    }

    proptest! {
        #[test]
        fn prop_validated_profiles_classify_monotonically(
            stale in 0u64..100,
            extra_reval in 0u64..100,
            extra_exp in 0u64..100,
            a in 0u64..400,
            b in 0u64..400,
        ) {
            let p = LifetimeProfile::from_secs(stale, stale + extra_reval, Some(stale + extra_reval + extra_exp))
                .expect("constructed to satisfy invariant");
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |s: FreshnessState| match s {
                FreshnessState::Fresh => 0,
                FreshnessState::Stale => 1,
                FreshnessState::Expired => 2,
            };
            prop_assert!(rank(p.classify(Duration::from_secs(lo))) <= rank(p.classify(Duration::from_secs(hi))));
        }
    }
}
