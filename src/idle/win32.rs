//! Idle time via the Win32 `GetLastInputInfo` API.

use std::time::Duration;

use windows::Win32::System::SystemInformation::GetTickCount;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

use super::{IdleSource, PlatformQueryError};

/// Idle source backed by `GetLastInputInfo`.
///
/// Holds one `LASTINPUTINFO` buffer that is reused for every query.
pub struct LastInputIdleSource {
    info: LASTINPUTINFO,
}

impl LastInputIdleSource {
    pub fn new() -> Self {
        Self {
            info: LASTINPUTINFO {
                cbSize: u32::try_from(std::mem::size_of::<LASTINPUTINFO>()).unwrap_or(8),
                dwTime: 0,
            },
        }
    }
}

impl Default for LastInputIdleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSource for LastInputIdleSource {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        // SAFETY: `info` is a live LASTINPUTINFO with cbSize initialised.
        let ok = unsafe { GetLastInputInfo(&mut self.info) };
        if !ok.as_bool() {
            let err = windows::core::Error::from_win32();
            return Err(PlatformQueryError::QueryFailed(err.to_string()));
        }

        // Both values are tick counts that wrap every ~49.7 days.
        // SAFETY: no preconditions.
        let now = unsafe { GetTickCount() };
        let idle_ms = now.wrapping_sub(self.info.dwTime);

        Ok(Duration::from_millis(u64::from(idle_ms)))
    }
}
