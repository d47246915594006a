//! Chrome launcher
//!
//! Finds a local Chrome, starts it with a throwaway profile and hands out
//! [`CdpDriver`]s, one per tab.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cdp::transport::launch_chrome;
use crate::cdp::{CdpDriver, Connection, Transport};
use crate::error::{Error, Result};
use crate::LaunchConfig;

/// Distinguishes profile directories of browsers launched by one process
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Locate a Chrome or Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

/// Command line for a test browser
fn launch_args(config: &LaunchConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-dev-shm-usage".into(),
        "--disable-background-timer-throttling".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-popup-blocking".into(),
        "--disable-sync".into(),
        "--disable-translate".into(),
        "--password-store=basic".into(),
        "--use-mock-keychain".into(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];
    if config.headless {
        args.push("--headless=new".into());
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

/// A running Chrome instance
pub struct Browser {
    connection: Connection,
    config: LaunchConfig,
    /// Throwaway profile, removed on close
    user_data_dir: PathBuf,
}

impl Browser {
    /// Launch Chrome with `config`
    pub async fn launch(config: LaunchConfig) -> Result<Self> {
        let instance_id = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "settle-profile-{}-{}",
            std::process::id(),
            instance_id
        ));
        let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
        tokio::fs::create_dir_all(&user_data_dir).await?;

        let chrome_path = match &config.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome()?,
        };

        tracing::info!(
            path = %chrome_path.display(),
            headless = config.headless,
            "launching chrome"
        );
        let args = launch_args(&config, &user_data_dir);
        let (child, ws_url) = launch_chrome(&chrome_path, &args).await?;
        let transport = Transport::connect(Some(child), &ws_url).await?;

        Ok(Self {
            connection: Connection::new(transport),
            config,
            user_data_dir,
        })
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Open a tab, navigate it to `url` and return a driver for it
    ///
    /// Navigation is not awaited; follow with a page-load wait.
    pub async fn new_driver(&self, url: &str) -> Result<CdpDriver> {
        let target_id = self
            .connection
            .create_target(
                "about:blank",
                self.config.viewport_width,
                self.config.viewport_height,
            )
            .await?;
        let session = self.connection.attach_to_target(&target_id).await?;
        session.page_enable().await?;
        if url != "about:blank" {
            session.navigate(url).await?;
        }
        tracing::debug!(target = %target_id, url, "tab opened");
        Ok(CdpDriver::new(session))
    }

    /// Close the tab a driver is attached to
    pub async fn close_driver(&self, driver: &CdpDriver) -> Result<()> {
        self.connection
            .close_target(driver.session().target_id())
            .await
    }

    /// Shut Chrome down and remove its profile
    pub async fn close(self) -> Result<()> {
        self.connection.close().await?;
        let _ = tokio::fs::remove_dir_all(&self.user_data_dir).await;
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The transport kills the process; only the profile is left here.
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
    }
}
