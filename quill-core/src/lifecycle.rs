use crate::error::QuillError;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    NotStarted = 0,
    Started = 1,
    Stopped = 2,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LifecycleState::Started,
            2 => LifecycleState::Stopped,
            _ => LifecycleState::NotStarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validated start/stop transitions, readable lock-free on the hot path.
///
/// `NotStarted -> Started`, `Started -> Stopped`, `Stopped -> Started`.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::NotStarted as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    pub fn start(&self) -> Result<(), QuillError> {
        self.begin_start().map(|_| ())
    }

    /// Move to `Started`, returning the state that was replaced.
    fn begin_start(&self) -> Result<u8, QuillError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if LifecycleState::from_u8(current) == LifecycleState::Started {
                return Err(QuillError::Lifecycle("component already started".into()));
            }
            match self.state.compare_exchange(
                current,
                LifecycleState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Ok(previous),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn stop(&self) -> Result<(), QuillError> {
        self.state
            .compare_exchange(
                LifecycleState::Started as u8,
                LifecycleState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| QuillError::Lifecycle("component not started".into()))
    }

    fn revert_start(&self, previous: u8) {
        let _ = self.state.compare_exchange(
            LifecycleState::Started as u8,
            previous,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `init` right after the transition to `Started`; a failing `init`
/// leaves the lifecycle as it was before the call.
pub fn start_with<F>(lifecycle: &Lifecycle, init: F) -> Result<(), QuillError>
where
    F: FnOnce() -> Result<(), QuillError>,
{
    let previous = lifecycle.begin_start()?;
    if let Err(e) = init() {
        lifecycle.revert_start(previous);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lifecycle_is_not_started() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), LifecycleState::NotStarted);
        assert!(!lc.is_started());
    }

    #[test]
    fn start_then_stop() {
        let lc = Lifecycle::new();
        lc.start().unwrap();
        assert!(lc.is_started());
        lc.stop().unwrap();
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }

    #[test]
    fn double_start_fails() {
        let lc = Lifecycle::new();
        lc.start().unwrap();
        let err = lc.start().unwrap_err();
        assert!(err.to_string().contains("already started"));
    }

    #[test]
    fn stop_before_start_fails() {
        let lc = Lifecycle::new();
        assert!(lc.stop().is_err());
        assert_eq!(lc.state(), LifecycleState::NotStarted);
    }

    #[test]
    fn stopped_component_can_restart() {
        let lc = Lifecycle::new();
        lc.start().unwrap();
        lc.stop().unwrap();
        lc.start().unwrap();
        assert!(lc.is_started());
    }

    #[test]
    fn failed_init_reverts_start() {
        let lc = Lifecycle::new();
        let err = start_with(&lc, || Err(QuillError::Lifecycle("no logger name set".into())));
        assert!(err.is_err());
        assert_eq!(lc.state(), LifecycleState::NotStarted);
        start_with(&lc, || Ok(())).unwrap();
        assert!(lc.is_started());
    }

    #[test]
    fn state_display() {
        assert_eq!(LifecycleState::Started.to_string(), "started");
        assert_eq!(LifecycleState::NotStarted.to_string(), "not_started");
    }
}
