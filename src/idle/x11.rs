//! Idle time via the X11 `MIT-SCREEN-SAVER` extension.

use std::time::Duration;

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::screensaver::ConnectionExt as ScreensaverConnectionExt;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{IdleSource, PlatformQueryError};

/// Open display plus the root window to query.
struct Display {
    conn: RustConnection,
    root: Window,
}

impl Display {
    fn open() -> Result<Self, PlatformQueryError> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(|e| {
            PlatformQueryError::DisplayUnavailable(format!("{e}. Is DISPLAY set?"))
        })?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| {
                PlatformQueryError::DisplayUnavailable(format!("screen {screen_num} not found"))
            })?;

        debug!("Connected to X11 display (screen {})", screen_num);
        Ok(Self { conn, root })
    }

    fn ms_since_user_input(&self) -> Result<u32, PlatformQueryError> {
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .map_err(|e| PlatformQueryError::QueryFailed(e.to_string()))?
            .reply()
            .map_err(|e| PlatformQueryError::QueryFailed(e.to_string()))?;

        Ok(reply.ms_since_user_input)
    }
}

/// Idle source backed by an X11 display connection.
///
/// The connection is opened lazily and kept between queries. A failed query
/// drops it so the next call reconnects.
#[derive(Default)]
pub struct X11IdleSource {
    display: Option<Display>,
}

impl X11IdleSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdleSource for X11IdleSource {
    fn idle_time(&mut self) -> Result<Duration, PlatformQueryError> {
        let display = match self.display.take() {
            Some(display) => display,
            None => Display::open()?,
        };

        let ms = display.ms_since_user_input()?;
        self.display = Some(display);

        Ok(Duration::from_millis(u64::from(ms)))
    }
}
