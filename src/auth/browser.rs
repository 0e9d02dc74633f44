//! Opening the authorization URL in the user's browser

use std::fmt;

/// Receives the authorization URL built by the flow.
///
/// Implementations must not block; the flow awaits the redirect listener
/// right after calling [`open`](Self::open).
pub trait BrowserOpener: Send + Sync + fmt::Debug {
    fn open(&self, url: &str);
}

/// Prints the URL to stderr and asks the desktop to open it.
///
/// Launch errors are ignored; the user can copy the URL from stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) {
        eprintln!("Open the following URL in your browser to authorize:\n{url}");

        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(url).spawn();
        }
        #[cfg(target_os = "windows")]
        {
            let _ = std::process::Command::new("cmd")
                .args(["/C", "start", "", url])
                .spawn();
        }
    }
}

/// Only prints the URL.  Used for headless sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintOnly;

impl BrowserOpener for PrintOnly {
    fn open(&self, url: &str) {
        eprintln!("Open the following URL in your browser to authorize:\n{url}");
    }
}
