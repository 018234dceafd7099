//! Idle detection.
//!
//! Reads the host's "time since last input" clock and classifies the user as
//! idle or active against a fixed threshold.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod win32;
#[cfg(target_os = "linux")]
mod x11;

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use crate::domain::{ActivityStatus, IdleSample};

#[cfg(target_os = "macos")]
pub use macos::IoKitIdleSource as HostIdleSource;
#[cfg(target_os = "windows")]
pub use win32::LastInputIdleSource as HostIdleSource;
#[cfg(target_os = "linux")]
pub use x11::X11IdleSource as HostIdleSource;

/// Idle time at or above which the user is considered away.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(30);

/// The host could not report when the last input happened.
#[derive(Error, Debug)]
pub enum PlatformQueryError {
    #[error("Display server unavailable: {0}")]
    DisplayUnavailable(String),

    #[error("Idle time query failed: {0}")]
    QueryFailed(String),

    #[error("Idle detection is not supported on this platform")]
    Unsupported,
}

/// A host-level source of "time since last keyboard/mouse input".
pub trait IdleSource: Send {
    /// Elapsed time since the most recent input event.
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError>;
}

impl<S: IdleSource + ?Sized> IdleSource for Box<S> {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        (**self).idle_time()
    }
}

/// Stand-in for platforms without an input-activity API.
#[derive(Debug, Default)]
pub struct UnsupportedIdleSource;

impl IdleSource for UnsupportedIdleSource {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        Err(PlatformQueryError::Unsupported)
    }
}

/// Create the idle source for the platform this binary was built for.
#[cfg(any(target_os = "linux", target_os = "windows", target_os = "macos"))]
pub fn host_source() -> Box<dyn IdleSource> {
    Box::new(HostIdleSource::new())
}

/// Create the idle source for the platform this binary was built for.
#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
pub fn host_source() -> Box<dyn IdleSource> {
    Box::new(UnsupportedIdleSource)
}

/// Classifies the user as idle or active.
///
/// Owns its query source (and whatever buffer or display handle the source
/// reuses between calls). Meant for a single caller.
pub struct IdleDetector<S> {
    source: S,
    last_query: Option<Instant>,
}

impl<S: IdleSource> IdleDetector<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last_query: None,
        }
    }

    /// Time since the last input event.
    ///
    /// Failures are returned as-is; they are never defaulted to idle or active.
    pub fn idle_duration(&mut self) -> Result<Duration, PlatformQueryError> {
        let idle = self.source.idle_time()?;
        self.last_query = Some(Instant::now());
        trace!("Idle for {:?}", idle);
        Ok(idle)
    }

    pub fn sample(&mut self) -> Result<IdleSample, PlatformQueryError> {
        self.idle_duration().map(IdleSample::new)
    }

    pub fn status(&mut self) -> Result<ActivityStatus, PlatformQueryError> {
        self.sample().map(|s| s.status())
    }

    /// True when no input has been seen for at least [`IDLE_THRESHOLD`].
    pub fn is_idle(&mut self) -> Result<bool, PlatformQueryError> {
        self.sample().map(|s| s.is_idle())
    }

    /// When the host was last queried successfully.
    pub fn last_query(&self) -> Option<Instant> {
        self.last_query
    }
}
