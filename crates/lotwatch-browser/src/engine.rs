use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::session::{is_sign_in_url, MarketplaceSession, RawPage, SessionFactory, SignInForm};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launch settings for the chromium engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Fixed user agent; random per session when `None`
    pub user_agent: Option<String>,
    /// Upper bound for one navigation or sign-in
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 800,
            user_agent: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Browser automation engine
pub struct BrowserEngine {
    browser: Browser,
    handler_task: JoinHandle<()>,
    settings: EngineSettings,
}

impl BrowserEngine {
    /// Launch chromium with default settings
    pub async fn new() -> Result<Self> {
        Self::launch(EngineSettings::default()).await
    }

    /// Launch chromium
    pub async fn launch(settings: EngineSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(settings.window_width, settings.window_height)
            .request_timeout(settings.request_timeout);
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        // Drive the CDP connection; events are not consumed
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("browser handler event error: {}", e);
                }
            }
        });

        tracing::info!(
            "Browser launched (headless: {}, window {}x{})",
            settings.headless,
            settings.window_width,
            settings.window_height
        );

        Ok(Self {
            browser,
            handler_task,
            settings,
        })
    }

    /// Close the browser and stop its event handler
    pub async fn close(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        tracing::info!("Browser closed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionFactory for BrowserEngine {
    async fn open_session(&self) -> Result<Box<dyn MarketplaceSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let fingerprint = FingerprintConfig::for_session(self.settings.user_agent.as_deref());
        page.set_user_agent(fingerprint.user_agent.as_str())
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(fingerprint.viewport_width),
            i64::from(fingerprint.viewport_height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        tracing::debug!(
            "Opened browser session ({}x{})",
            fingerprint.viewport_width,
            fingerprint.viewport_height
        );

        Ok(Box::new(ChromeSession {
            page,
            authenticated: false,
            request_timeout: self.settings.request_timeout,
        }))
    }
}

/// One chromium page bound to one worker
struct ChromeSession {
    page: Page,
    authenticated: bool,
    request_timeout: Duration,
}

impl ChromeSession {
    async fn current_url(&self, fallback: &str) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => fallback.to_string(),
        }
    }

    async fn submit_sign_in(&self, form: &SignInForm, identity: &str, secret: &str) -> Result<()> {
        self.page
            .goto(form.url.as_str())
            .await
            .map_err(|e| BrowserError::NavigationError(e.to_string()))?;

        let identity_input = wait_for_element(&self.page, &form.identity_selector).await?;
        identity_input
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        identity_input
            .type_str(identity)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        if let Some(continue_selector) = &form.continue_selector {
            wait_for_element(&self.page, continue_selector)
                .await?
                .click()
                .await
                .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        }

        let secret_input = wait_for_element(&self.page, &form.secret_selector).await?;
        secret_input
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        secret_input
            .type_str(secret)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        wait_for_element(&self.page, &form.submit_selector)
            .await?
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MarketplaceSession for ChromeSession {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn sign_in(&mut self, form: &SignInForm, identity: &str, secret: &str) -> Result<()> {
        tracing::info!("Signing in at {}", form.url);

        timeout(
            self.request_timeout * 2,
            self.submit_sign_in(form, identity, secret),
        )
        .await
        .map_err(|_| BrowserError::Timeout(format!("sign-in at {}", form.url)))??;

        let landed = self.current_url(&form.url).await;
        if is_sign_in_url(&landed) {
            self.authenticated = false;
            return Err(BrowserError::AuthRejected(format!(
                "still on sign-in page after submit: {landed}"
            )));
        }

        self.authenticated = true;
        tracing::info!("Signed in");
        Ok(())
    }

    async fn fetch(&mut self, url: &str) -> Result<RawPage> {
        let started = Instant::now();

        let html = timeout(self.request_timeout, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
            self.page
                .content()
                .await
                .map_err(|e| BrowserError::ChromiumError(e.to_string()))
        })
        .await
        .map_err(|_| BrowserError::Timeout(format!("loading {url}")))??;

        let final_url = self.current_url(url).await;
        tracing::debug!(
            "Fetched {} ({} bytes in {:?})",
            final_url,
            html.len(),
            started.elapsed()
        );

        Ok(RawPage::new(final_url, html))
    }

    async fn capture(&mut self) -> Result<Option<Vec<u8>>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();

        let png = timeout(self.request_timeout, self.page.screenshot(params))
            .await
            .map_err(|_| BrowserError::Timeout("capturing page".to_string()))?
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(Some(png))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        let page = self.page.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

/// Poll until `selector` matches; bounded by the caller's timeout
async fn wait_for_element(page: &Page, selector: &str) -> Result<Element> {
    let started = Instant::now();
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if started.elapsed() > Duration::from_secs(15) {
            return Err(BrowserError::SelectorNotFound(selector.to_string()));
        }
        tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
    }
}
