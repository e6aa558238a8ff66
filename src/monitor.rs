use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{wait_until_ready, PageSource, SourceError};
use crate::parser::PageProcessor;
use crate::registry::Registry;
use crate::store::RegistryStore;

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub settle_delay: Duration,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// Same page as last time.
    Unchanged,
    /// New page whose content never showed up; retried next poll.
    NotReady,
    /// New page processed; number of attributed lines.
    Processed(usize),
    /// New page that failed to process or persist.
    Failed,
    /// Source hiccup; nothing attempted.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub pages: usize,
    pub touched: usize,
    pub failures: usize,
}

/// Polls a page source and runs the page processor once per distinct page.
pub struct Monitor<P, S> {
    source: P,
    processor: PageProcessor<S>,
    registry: Registry,
    opts: MonitorOptions,
    last_seen: Option<String>,
    /// Page that last timed out waiting for content; repeats log quietly.
    stalled: Option<String>,
    stats: MonitorStats,
}

impl<P: PageSource, S: RegistryStore> Monitor<P, S> {
    pub fn new(source: P, processor: PageProcessor<S>, registry: Registry, opts: MonitorOptions) -> Self {
        Self {
            source,
            processor,
            registry,
            opts,
            last_seen: None,
            stalled: None,
            stats: MonitorStats::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn source_mut(&mut self) -> &mut P {
        &mut self.source
    }

    /// Check the navigation id once and process the page if it changed.
    /// Only a fatal source error is returned.
    pub async fn poll_once(&mut self) -> Result<Cycle, SourceError> {
        let url = match self.source.current_navigation_id() {
            Ok(url) => url,
            Err(SourceError::Transient(e)) => {
                warn!("Error during monitoring: {}", e);
                return Ok(Cycle::Skipped);
            }
            Err(e) => return Err(e),
        };
        if self.last_seen.as_deref() == Some(url.as_str()) {
            return Ok(Cycle::Unchanged);
        }

        let retry = self.stalled.as_deref() == Some(url.as_str());
        if retry {
            debug!(url = %url, "retrying page without content");
        } else {
            info!(url = %url, "New page detected");
        }
        if !wait_until_ready(&mut self.source, self.opts.ready_timeout, self.opts.settle_delay).await {
            if !retry {
                warn!(
                    url = %url,
                    "Timeout waiting for content after {} seconds",
                    self.opts.ready_timeout.as_secs()
                );
            }
            self.stalled = Some(url);
            return Ok(Cycle::NotReady);
        }
        self.stalled = None;
        self.last_seen = Some(url.clone());
        self.stats.pages += 1;

        let text = match self.source.visible_text() {
            Ok(t) => t,
            Err(SourceError::Transient(e)) => {
                warn!(url = %url, "Error processing page: {}", e);
                self.stats.failures += 1;
                return Ok(Cycle::Failed);
            }
            Err(e) => return Err(e),
        };

        match self.processor.run(&mut self.registry, &text, &url) {
            Ok(report) => {
                self.stats.touched += report.touched;
                Ok(Cycle::Processed(report.touched))
            }
            Err(e) => {
                warn!(url = %url, "Error processing page: {}", e);
                self.stats.failures += 1;
                Ok(Cycle::Failed)
            }
        }
    }

    /// Poll until `shutdown` resolves or the source fails fatally.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<MonitorStats, SourceError> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                cycle = self.poll_once() => {
                    cycle?;
                }
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.opts.poll_interval) => {}
            }
        }
        info!("Stopping the scraper...");
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::parser::names::DEFAULT_WINDOW;
    use crate::parser::NutritionPatternSet;
    use crate::browser::SnapshotSource;
    use crate::store::{CsvStore, StoreError};

    struct FakeBrowser {
        pages: Vec<(&'static str, &'static str)>,
        current: usize,
        fatal: bool,
    }

    impl FakeBrowser {
        fn new(pages: Vec<(&'static str, &'static str)>) -> Self {
            Self { pages, current: 0, fatal: false }
        }
    }

    impl PageSource for FakeBrowser {
        fn current_navigation_id(&mut self) -> Result<String, SourceError> {
            if self.fatal {
                return Err(SourceError::Fatal("browser closed".into()));
            }
            Ok(self.pages[self.current].0.to_string())
        }

        fn visible_text(&mut self) -> Result<String, SourceError> {
            Ok(self.pages[self.current].1.to_string())
        }

        fn page_markup(&mut self) -> Result<String, SourceError> {
            Ok(format!("<body>{}</body>", self.pages[self.current].1))
        }
    }

    #[derive(Default)]
    struct CountingStore {
        saves: Cell<usize>,
        fail: bool,
    }

    impl RegistryStore for CountingStore {
        fn load(&self) -> Result<Registry, StoreError> {
            Ok(Registry::new())
        }

        fn save(&self, _: &Registry) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Io {
                    path: "memory".into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.saves.set(self.saves.get() + 1);
            Ok(())
        }
    }

    fn opts() -> MonitorOptions {
        MonitorOptions {
            poll_interval: Duration::from_millis(10),
            ready_timeout: Duration::from_millis(300),
            settle_delay: Duration::ZERO,
        }
    }

    fn monitor_with<P: PageSource, S: RegistryStore>(source: P, store: S) -> Monitor<P, S> {
        let processor = PageProcessor::new(NutritionPatternSet::builtin().unwrap(), DEFAULT_WINDOW, store);
        Monitor::new(source, processor, Registry::new(), opts())
    }

    fn monitor(browser: FakeBrowser) -> Monitor<FakeBrowser, CountingStore> {
        monitor_with(browser, CountingStore::default())
    }

    #[tokio::test]
    async fn processes_each_page_once() {
        let mut m = monitor(FakeBrowser::new(vec![
            ("https://shop.example/bar", "Protein Bar\nCalories: 200\nProtein: 10g"),
            ("https://shop.example/about", "About us\nOur story"),
        ]));
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Processed(2));
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Unchanged);

        m.source_mut().current = 1;
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Processed(0));
        assert_eq!(m.registry().len(), 1);
        assert_eq!(m.stats(), MonitorStats { pages: 2, touched: 2, failures: 0 });
    }

    #[tokio::test]
    async fn blank_page_is_retried() {
        let mut m = monitor(FakeBrowser::new(vec![("https://shop.example/slow", "")]));
        assert_eq!(m.poll_once().await.unwrap(), Cycle::NotReady);
        assert_eq!(m.stalled.as_deref(), Some("https://shop.example/slow"));
        assert_eq!(m.poll_once().await.unwrap(), Cycle::NotReady);
        assert_eq!(m.stats().pages, 0);

        m.source_mut().pages[0].1 = "Protein Bar\nCalories: 200";
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Processed(1));
        assert_eq!(m.stalled, None);
    }

    #[tokio::test]
    async fn failed_save_moves_on_to_next_poll() {
        let store = CountingStore { fail: true, ..Default::default() };
        let mut m = monitor_with(
            FakeBrowser::new(vec![("https://shop.example/bar", "Protein Bar\nCalories: 200")]),
            store,
        );
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Failed);
        assert_eq!(m.poll_once().await.unwrap(), Cycle::Unchanged);
        assert_eq!(m.stats(), MonitorStats { pages: 1, touched: 0, failures: 1 });
    }

    #[tokio::test]
    async fn undecodable_capture_keeps_polling() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.txt");
        std::fs::write(&page, b"https://shop.example/cafe\nCaf\xC3").unwrap();
        let mut m = monitor_with(SnapshotSource::new(&page), CsvStore::new(dir.path().join("n.csv")));

        let stats = m.run(tokio::time::sleep(Duration::from_millis(300))).await.unwrap();
        assert_eq!(stats, MonitorStats { pages: 1, touched: 0, failures: 0 });
        assert!(!dir.path().join("n.csv").exists());
    }

    #[tokio::test]
    async fn fatal_source_error_ends_run() {
        let mut browser = FakeBrowser::new(vec![("https://shop.example/", "x")]);
        browser.fatal = true;
        let mut m = monitor(browser);
        let res = m.run(std::future::pending::<()>()).await;
        assert!(matches!(res, Err(SourceError::Fatal(_))));
    }

    #[tokio::test]
    async fn shutdown_stops_loop() {
        let mut m = monitor(FakeBrowser::new(vec![(
            "https://shop.example/bar",
            "Protein Bar\nCalories: 200",
        )]));
        let stats = m.run(tokio::time::sleep(Duration::from_millis(100))).await.unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.touched, 1);
    }
}
