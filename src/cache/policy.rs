//! Refetch policy at three scopes (consumer, endpoint, global) and the rules
//! for merging them.

use std::time::Duration;

use crate::lifecycle::LifecycleSignal;

/// Default grace period before an unused entry is removed.
pub const DEFAULT_KEEP_UNUSED_FOR: Duration = Duration::from_millis(20);

/// Whether subscribing to an already settled entry triggers a refetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefetchOnMount {
  /// Reuse cached data
  #[default]
  Never,
  /// Always refetch on subscribe
  Always,
  /// Refetch when the cached data is older than the given age
  OlderThan(Duration),
}

impl RefetchOnMount {
  pub fn should_refetch(self, age: Option<Duration>) -> bool {
    match self {
      RefetchOnMount::Never => false,
      RefetchOnMount::Always => true,
      RefetchOnMount::OlderThan(max_age) => age.map(|age| age >= max_age).unwrap_or(true),
    }
  }
}

/// Global defaults for every endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
  pub refetch_on_focus: bool,
  pub refetch_on_reconnect: bool,
  pub refetch_on_mount: RefetchOnMount,
  /// `None` disables polling
  pub polling_interval: Option<Duration>,
  /// Grace period between the last unsubscribe and removal
  pub keep_unused_for: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      refetch_on_focus: true,
      refetch_on_reconnect: true,
      refetch_on_mount: RefetchOnMount::Never,
      polling_interval: None,
      keep_unused_for: DEFAULT_KEEP_UNUSED_FOR,
    }
  }
}

/// Endpoint-level defaults. Unset fields fall back to `CacheConfig`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointConfig {
  pub refetch_on_focus: Option<bool>,
  pub refetch_on_reconnect: Option<bool>,
  pub refetch_on_mount: Option<RefetchOnMount>,
  pub polling_interval: Option<Duration>,
  pub keep_unused_for: Option<Duration>,
}

impl EndpointConfig {
  pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
    self.refetch_on_focus = Some(enabled);
    self
  }

  pub fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
    self.refetch_on_reconnect = Some(enabled);
    self
  }

  pub fn refetch_on_mount(mut self, policy: RefetchOnMount) -> Self {
    self.refetch_on_mount = Some(policy);
    self
  }

  pub fn polling_interval(mut self, interval: Duration) -> Self {
    self.polling_interval = Some(interval);
    self
  }

  pub fn keep_unused_for(mut self, grace: Duration) -> Self {
    self.keep_unused_for = Some(grace);
    self
  }

  pub(crate) fn grace_period(&self, global: &CacheConfig) -> Duration {
    self.keep_unused_for.unwrap_or(global.keep_unused_for)
  }

  pub(crate) fn mount_policy(&self, consumer: &Overrides, global: &CacheConfig) -> RefetchOnMount {
    consumer
      .refetch_on_mount
      .or(self.refetch_on_mount)
      .unwrap_or(global.refetch_on_mount)
  }
}

/// Per-consumer overrides supplied at subscribe time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
  pub refetch_on_focus: Option<bool>,
  pub refetch_on_reconnect: Option<bool>,
  pub refetch_on_mount: Option<RefetchOnMount>,
  /// A zero interval explicitly disables polling for this consumer
  pub polling_interval: Option<Duration>,
}

impl Overrides {
  pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
    self.refetch_on_focus = Some(enabled);
    self
  }

  pub fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
    self.refetch_on_reconnect = Some(enabled);
    self
  }

  pub fn refetch_on_mount(mut self, policy: RefetchOnMount) -> Self {
    self.refetch_on_mount = Some(policy);
    self
  }

  pub fn polling_interval(mut self, interval: Duration) -> Self {
    self.polling_interval = Some(interval);
    self
  }
}

/// Policy for one entry after merging all active consumers with the
/// endpoint and global defaults. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePolicy {
  pub refetch_on_focus: bool,
  pub refetch_on_reconnect: bool,
  pub polling_interval: Option<Duration>,
}

impl EffectivePolicy {
  pub fn resolve<'a, I>(consumers: I, endpoint: &EndpointConfig, global: &CacheConfig) -> Self
  where
    I: IntoIterator<Item = &'a Overrides>,
    I::IntoIter: Clone,
  {
    let consumers = consumers.into_iter();
    Self {
      refetch_on_focus: resolve_flag(
        consumers.clone().map(|o| o.refetch_on_focus),
        endpoint.refetch_on_focus,
        global.refetch_on_focus,
      ),
      refetch_on_reconnect: resolve_flag(
        consumers.clone().map(|o| o.refetch_on_reconnect),
        endpoint.refetch_on_reconnect,
        global.refetch_on_reconnect,
      ),
      polling_interval: resolve_interval(
        consumers.map(|o| o.polling_interval),
        endpoint.polling_interval,
        global.polling_interval,
      ),
    }
  }

  pub fn refetch_on(&self, signal: LifecycleSignal) -> bool {
    match signal {
      LifecycleSignal::BecameActive => self.refetch_on_focus,
      LifecycleSignal::Reconnected => self.refetch_on_reconnect,
    }
  }
}

/// Merge a boolean flag across scopes.
///
/// Any explicit `true` from a consumer wins, then any explicit `false`,
/// then the endpoint default, then the global default.
pub fn resolve_flag<I>(consumers: I, endpoint: Option<bool>, global: bool) -> bool
where
  I: IntoIterator<Item = Option<bool>>,
{
  let mut explicit_false = false;
  for value in consumers {
    match value {
      Some(true) => return true,
      Some(false) => explicit_false = true,
      None => {}
    }
  }
  if explicit_false {
    return false;
  }
  endpoint.unwrap_or(global)
}

/// Merge polling intervals: the shortest non-zero consumer interval wins.
///
/// When every consumer that set an interval set zero, polling is off.
pub fn resolve_interval<I>(
  consumers: I,
  endpoint: Option<Duration>,
  global: Option<Duration>,
) -> Option<Duration>
where
  I: IntoIterator<Item = Option<Duration>>,
{
  let mut any_explicit = false;
  let mut shortest: Option<Duration> = None;
  for interval in consumers.into_iter().flatten() {
    any_explicit = true;
    if !interval.is_zero() {
      shortest = Some(shortest.map_or(interval, |s| s.min(interval)));
    }
  }
  if any_explicit {
    return shortest;
  }
  endpoint.or(global).filter(|interval| !interval.is_zero())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_flag_prefers_true_when_consumers_differ() {
    assert!(resolve_flag([Some(false), Some(true), None], Some(false), false));
    assert!(resolve_flag([Some(true), Some(false)], None, false));
  }

  #[test]
  fn test_flag_explicit_false_beats_defaults() {
    assert!(!resolve_flag([None, Some(false)], Some(true), true));
  }

  #[test]
  fn test_flag_falls_back_to_endpoint_then_global() {
    assert!(!resolve_flag([None, None], Some(false), true));
    assert!(resolve_flag([None], None, true));
    assert!(!resolve_flag(std::iter::empty(), None, false));
  }

  #[test]
  fn test_interval_picks_shortest_non_zero() {
    let ms = Duration::from_millis;
    assert_eq!(
      resolve_interval([Some(ms(500)), None, Some(ms(0)), Some(ms(200))], Some(ms(50)), None),
      Some(ms(200))
    );
    assert_eq!(resolve_interval([Some(ms(0))], Some(ms(50)), None), None);
    assert_eq!(resolve_interval([None], Some(ms(50)), Some(ms(10))), Some(ms(50)));
    assert_eq!(resolve_interval([None], None, Some(ms(0))), None);
  }

  #[test]
  fn test_effective_policy_per_signal() {
    let consumers = [
      Overrides::default().refetch_on_focus(false),
      Overrides::default().refetch_on_reconnect(true),
    ];
    let endpoint = EndpointConfig::default().refetch_on_reconnect(false);
    let global = CacheConfig::default();

    let policy = EffectivePolicy::resolve(consumers.iter(), &endpoint, &global);

    assert!(!policy.refetch_on(LifecycleSignal::BecameActive));
    assert!(policy.refetch_on(LifecycleSignal::Reconnected));
    assert_eq!(policy.polling_interval, None);
  }

  #[test]
  fn test_mount_policy_scopes() {
    let global = CacheConfig::default();
    let endpoint = EndpointConfig::default().refetch_on_mount(RefetchOnMount::Always);

    assert_eq!(
      endpoint.mount_policy(&Overrides::default(), &global),
      RefetchOnMount::Always
    );
    assert_eq!(
      endpoint.mount_policy(
        &Overrides::default().refetch_on_mount(RefetchOnMount::Never),
        &global
      ),
      RefetchOnMount::Never
    );
    assert_eq!(
      EndpointConfig::default().mount_policy(&Overrides::default(), &global),
      RefetchOnMount::Never
    );
  }

  #[test]
  fn test_refetch_on_mount_age() {
    let policy = RefetchOnMount::OlderThan(Duration::from_secs(30));
    assert!(!policy.should_refetch(Some(Duration::from_secs(5))));
    assert!(policy.should_refetch(Some(Duration::from_secs(31))));
    assert!(policy.should_refetch(None));
  }
}
