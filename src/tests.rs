#[cfg(test)]
mod integration_tests {
    use crate::browser::{BrowserLauncher, BrowserSession, CapturePage, RasterEncoding, RasterRequest};
    use crate::config::{CaptureOptions, CaptureResult, ClipRegion, Config, OutputFormat, PdfOptions};
    use crate::engine::PageSnapEngine;
    use crate::error::{PageSnapError, Result};
    use crate::progress::{ProgressEvent, ProgressSink};
    use crate::scheduler::CaptureScheduler;
    use crate::storage::InMemoryStorage;
    use crate::transformer::{
        PageTransformer, HIDE_STYLE_SCRIPT, REMOVE_NODES_SCRIPT, SANITIZE_ROUNDS, WATERMARK_SCRIPT,
    };
    use crate::watermark::WATERMARK_ELEMENT_ID;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    /// How a fake page behaves for a given URL
    #[derive(Clone, Default)]
    struct PageBehaviour {
        hang: bool,
        load_time: Option<Duration>,
        ad_banners: usize,
        reinsert_after: Vec<Duration>,
        fail_scripts: bool,
        fail_pdf: bool,
    }

    #[derive(Debug, Clone)]
    struct DomSnapshot {
        url: String,
        ad_banners: usize,
        overlays: Vec<String>,
        removal_rounds: usize,
        hidden_selectors: Vec<String>,
    }

    /// Instrumented browser shared by the launcher, its session and every page
    #[derive(Default)]
    struct Recorder {
        behaviours: HashMap<String, PageBehaviour>,
        fail_launch: bool,
        open: AtomicUsize,
        max_open: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
        session_closed: AtomicBool,
        rasters: Mutex<Vec<(String, RasterRequest)>>,
        pdfs: Mutex<Vec<(String, PdfOptions)>>,
        snapshots: Mutex<Vec<DomSnapshot>>,
    }

    impl Recorder {
        fn with(mut self, url: &str, behaviour: PageBehaviour) -> Self {
            self.behaviours.insert(url.to_string(), behaviour);
            self
        }

        fn snapshot(&self, url: &str) -> DomSnapshot {
            self.snapshots
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.url == url)
                .cloned()
                .unwrap()
        }
    }

    struct FakeLauncher(Arc<Recorder>);

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
            if self.0.fail_launch {
                return Err(PageSnapError::BrowserLaunch(
                    "could not find chrome executable".to_string(),
                ));
            }
            Ok(Arc::new(FakeSession(self.0.clone())))
        }
    }

    struct FakeSession(Arc<Recorder>);

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn new_page(&self) -> Result<Box<dyn CapturePage>> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            let open = self.0.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_open.fetch_max(open, Ordering::SeqCst);
            Ok(Box::new(FakePage::new(self.0.clone())))
        }

        async fn close(&self) {
            self.0.session_closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Dom {
        url: String,
        behaviour: PageBehaviour,
        ad_banners: usize,
        pending: Vec<Instant>,
        overlays: Vec<String>,
        removal_rounds: usize,
        hidden_selectors: Vec<String>,
    }

    impl Dom {
        /// Apply re-insertions that are due by now
        fn settle(&mut self) {
            let now = Instant::now();
            let due = self.pending.iter().filter(|at| **at <= now).count();
            self.pending.retain(|at| *at > now);
            self.ad_banners += due;
        }
    }

    struct FakePage {
        recorder: Arc<Recorder>,
        dom: Mutex<Dom>,
    }

    impl FakePage {
        fn new(recorder: Arc<Recorder>) -> Self {
            Self {
                recorder,
                dom: Mutex::new(Dom::default()),
            }
        }
    }

    #[async_trait]
    impl CapturePage for FakePage {
        async fn goto(&self, url: &str) -> Result<()> {
            let behaviour = self
                .recorder
                .behaviours
                .get(url)
                .cloned()
                .unwrap_or_default();

            // Let sibling tasks interleave
            sleep(Duration::from_millis(10)).await;
            if behaviour.hang {
                std::future::pending::<()>().await;
            }
            if let Some(load_time) = behaviour.load_time {
                sleep(load_time).await;
            }

            let mut dom = self.dom.lock().unwrap();
            let now = Instant::now();
            dom.url = url.to_string();
            dom.ad_banners = behaviour.ad_banners;
            dom.pending = behaviour.reinsert_after.iter().map(|d| now + *d).collect();
            dom.behaviour = behaviour;
            Ok(())
        }

        async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
            let mut dom = self.dom.lock().unwrap();
            if dom.behaviour.fail_scripts {
                return Err(PageSnapError::Transformation(
                    "Uncaught TypeError: document.body is null".to_string(),
                ));
            }

            if script == HIDE_STYLE_SCRIPT {
                // Anything that would break out of a single rule is refused
                let (rejected, accepted): (Vec<String>, Vec<String>) = arg["selectors"]
                    .as_array()
                    .map(|selectors| {
                        selectors
                            .iter()
                            .filter_map(|s| s.as_str().map(str::to_string))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
                    .into_iter()
                    .partition(|selector| selector.contains('{') || selector.contains('}'));
                dom.hidden_selectors = accepted;
                Ok(json!({ "rejected": rejected }))
            } else if script == REMOVE_NODES_SCRIPT {
                dom.settle();
                dom.removal_rounds += 1;
                let targets_banners = arg
                    .as_array()
                    .map(|rules| rules.iter().any(|r| r == ".ad-banner"))
                    .unwrap_or(false);
                let removed = if targets_banners {
                    std::mem::take(&mut dom.ad_banners)
                } else {
                    0
                };
                Ok(json!(removed))
            } else if script == WATERMARK_SCRIPT {
                let id = arg["id"].as_str().unwrap_or_default().to_string();
                dom.overlays.retain(|existing| existing != &id);
                dom.overlays.push(id);
                Ok(json!(true))
            } else {
                Err(PageSnapError::Transformation("unexpected script".to_string()))
            }
        }

        async fn screenshot(&self, request: &RasterRequest) -> Result<Vec<u8>> {
            let url = self.dom.lock().unwrap().url.clone();
            self.recorder
                .rasters
                .lock()
                .unwrap()
                .push((url, request.clone()));

            Ok(match request.encoding {
                RasterEncoding::Png => b"\x89PNG\r\n".to_vec(),
                RasterEncoding::Jpeg => vec![0xFF, 0xD8, 0xFF],
            })
        }

        async fn pdf(&self, options: &PdfOptions) -> Result<Vec<u8>> {
            let (url, fail) = {
                let dom = self.dom.lock().unwrap();
                (dom.url.clone(), dom.behaviour.fail_pdf)
            };
            if fail {
                return Err(PageSnapError::Render("Printing failed".to_string()));
            }
            self.recorder
                .pdfs
                .lock()
                .unwrap()
                .push((url, options.clone()));
            Ok(b"%PDF-1.7".to_vec())
        }

        async fn close(&self) -> Result<()> {
            let snapshot = {
                let mut dom = self.dom.lock().unwrap();
                dom.settle();
                DomSnapshot {
                    url: dom.url.clone(),
                    ad_banners: dom.ad_banners,
                    overlays: dom.overlays.clone(),
                    removal_rounds: dom.removal_rounds,
                    hidden_selectors: dom.hidden_selectors.clone(),
                }
            };
            self.recorder.snapshots.lock().unwrap().push(snapshot);
            self.recorder.open.fetch_sub(1, Ordering::SeqCst);
            self.recorder.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingProgress {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn config(json: &str) -> Config {
        Config::from_json_str(json).unwrap()
    }

    fn scheduler(
        config: &Config,
        recorder: &Arc<Recorder>,
        storage: &Arc<InMemoryStorage>,
    ) -> CaptureScheduler {
        CaptureScheduler::new(
            config,
            Arc::new(FakeLauncher(recorder.clone())),
            storage.clone(),
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_url_single_format() {
        let recorder = Arc::new(Recorder::default());
        let config = config(
            r#"{ "output": { "formats": ["png"], "storage": { "provider": "in-memory" } },
                 "performance": { "maxConcurrency": 1 } }"#,
        );
        let engine =
            PageSnapEngine::with_launcher(config, Arc::new(FakeLauncher(recorder.clone()))).unwrap();

        let results = engine
            .capture(urls(&["https://a.test/page"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        match &results[0] {
            CaptureResult::Saved { url, format, path } => {
                assert_eq!(url, "https://a.test/page");
                assert_eq!(*format, OutputFormat::Png);
                assert!(!path.is_empty());
                assert_eq!(path, "in-memory://a_test_page.png");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let stored = engine.storage().as_in_memory().unwrap();
        assert_eq!(stored.get("a_test_page.png"), Some(b"\x89PNG\r\n".to_vec()));
        assert!(recorder.session_closed.load(Ordering::SeqCst));
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clip_applies_to_raster_only() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "output": { "formats": ["png", "pdf"] } }"#);

        let options = CaptureOptions {
            clip: ClipRegion::from_parts(Some(0.0), Some(0.0), Some(100.0), Some(100.0)),
            pdf_options: Some(PdfOptions {
                landscape: Some(true),
                ..Default::default()
            }),
            jpeg_quality: None,
        };
        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://a.test/page"]), &options)
            .await
            .unwrap();

        let formats: Vec<_> = results
            .iter()
            .map(|r| match r {
                CaptureResult::Saved { format, .. } => *format,
                other => panic!("unexpected failure {:?}", other),
            })
            .collect();
        assert_eq!(formats, vec![OutputFormat::Png, OutputFormat::Pdf]);

        let rasters = recorder.rasters.lock().unwrap();
        assert_eq!(rasters.len(), 1);
        assert!(!rasters[0].1.full_page);
        assert_eq!(rasters[0].1.clip, options.clip);

        let pdfs = recorder.pdfs.lock().unwrap();
        assert_eq!(pdfs.len(), 1);
        assert_eq!(pdfs[0].1.landscape, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_page_without_clip_and_jpeg_mode() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "output": { "formats": ["jpg", "png"] } }"#);

        let options = CaptureOptions {
            jpeg_quality: Some(70),
            ..Default::default()
        };
        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://a.test/"]), &options)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        let rasters = recorder.rasters.lock().unwrap();
        assert_eq!(rasters[0].1.encoding, RasterEncoding::Jpeg);
        assert_eq!(rasters[0].1.quality, Some(70));
        assert!(rasters[0].1.full_page);
        assert_eq!(rasters[1].1.encoding, RasterEncoding::Png);
        assert_eq!(rasters[1].1.quality, None);
        assert!(rasters[1].1.clip.is_none());

        assert!(storage.contains("a_test.jpg"));
        assert!(storage.contains("a_test.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_timeout_is_isolated() {
        let recorder = Arc::new(Recorder::default().with(
            "https://slow.test",
            PageBehaviour {
                hang: true,
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "performance": { "maxConcurrency": 2 } }"#);

        let results = scheduler(&config, &recorder, &storage)
            .capture(
                urls(&["https://slow.test", "https://fast.test"]),
                &CaptureOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        let saved: Vec<_> = results.iter().filter(|r| r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(saved.len(), 1);

        assert_eq!(
            failed[0],
            &CaptureResult::Failed {
                url: "https://slow.test".to_string(),
                error: "Navigation timed out after 60s".to_string(),
            }
        );
        assert_eq!(saved[0].url(), "https://fast.test");

        // The timed-out page is still closed
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 2);
        assert!(recorder.session_closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sanitize_catches_reinserted_nodes() {
        let recorder = Arc::new(Recorder::default().with(
            "https://ads.test",
            PageBehaviour {
                ad_banners: 3,
                reinsert_after: vec![Duration::from_millis(200)],
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "sanitization": { "customRules": [".ad-banner"] } }"#);

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://ads.test"]), &CaptureOptions::default())
            .await
            .unwrap();
        assert!(results[0].is_success());

        let dom = recorder.snapshot("https://ads.test");
        assert_eq!(dom.ad_banners, 0);
        assert_eq!(dom.removal_rounds, SANITIZE_ROUNDS);
        assert_eq!(dom.hidden_selectors, vec![".ad-banner".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_selector_is_hidden_on_its_own() {
        let recorder = Arc::new(Recorder::default().with(
            "https://ads.test",
            PageBehaviour {
                ad_banners: 2,
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(
            r##"{ "sanitization": { "customRules":
                 [".ad-banner", "a} body { display: none", "#cookie-wall"] } }"##,
        );

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://ads.test"]), &CaptureOptions::default())
            .await
            .unwrap();
        assert!(results[0].is_success());

        let dom = recorder.snapshot("https://ads.test");
        assert_eq!(
            dom.hidden_selectors,
            vec![".ad-banner".to_string(), "#cookie-wall".to_string()]
        );
        assert_eq!(dom.ad_banners, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_within_navigation_timeout_succeeds() {
        let recorder = Arc::new(Recorder::default().with(
            "https://slow.test",
            PageBehaviour {
                load_time: Some(Duration::from_secs(45)),
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));

        let started = Instant::now();
        let results = scheduler(&Config::default(), &recorder, &storage)
            .capture(urls(&["https://slow.test"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert!(results[0].is_success());
        assert!(started.elapsed() >= Duration::from_secs(45));
        assert!(started.elapsed() < crate::scheduler::NAVIGATION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sanitize_is_idempotent_and_always_runs_five_rounds() {
        let recorder = Arc::new(Recorder::default());
        let page = FakePage::new(recorder.clone());
        page.goto("https://clean.test").await.unwrap();

        let transformer = PageTransformer::new(Default::default(), Default::default());
        let rules = vec![".ad-banner".to_string()];

        let started = Instant::now();
        transformer.sanitize(&page, &rules).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(page.dom.lock().unwrap().removal_rounds, SANITIZE_ROUNDS);

        transformer.sanitize(&page, &rules).await.unwrap();
        assert_eq!(page.dom.lock().unwrap().removal_rounds, 2 * SANITIZE_ROUNDS);
        assert_eq!(page.dom.lock().unwrap().ad_banners, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sanitize_without_rules_touches_nothing() {
        let recorder = Arc::new(Recorder::default());
        let page = FakePage::new(recorder.clone());
        page.goto("https://clean.test").await.unwrap();

        let transformer = PageTransformer::new(Default::default(), Default::default());
        transformer.sanitize(&page, &[]).await.unwrap();

        let dom = page.dom.lock().unwrap();
        assert_eq!(dom.removal_rounds, 0);
        assert!(dom.hidden_selectors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watermark_replaces_instead_of_stacking() {
        let recorder = Arc::new(Recorder::default());
        let page = FakePage::new(recorder.clone());
        page.goto("https://a.test").await.unwrap();

        let config = config(
            r#"{ "watermark": { "enabled": true, "type": "text",
                 "text": { "content": "DRAFT", "position": "center" } } }"#,
        );
        let transformer = PageTransformer::new(config.sanitization.clone(), config.watermark.clone());

        transformer.apply_watermark(&page, &config.watermark).await.unwrap();
        transformer.apply_watermark(&page, &config.watermark).await.unwrap();

        let tiled = {
            let mut watermark = config.watermark.clone();
            if let Some(text) = watermark.text.as_mut() {
                text.position = crate::config::WatermarkPosition::Tile;
            }
            watermark
        };
        transformer.apply_watermark(&page, &tiled).await.unwrap();

        let dom = page.dom.lock().unwrap();
        assert_eq!(dom.overlays, vec![WATERMARK_ELEMENT_ID.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_watermark_image_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(
            r#"{ "watermark": { "enabled": true, "type": "image",
                 "image": { "source": "/no/such/logo.png" } } }"#,
        );

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://a.test"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        assert!(recorder.snapshot("https://a.test").overlays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transformation_failure_fails_the_url() {
        let recorder = Arc::new(Recorder::default().with(
            "https://broken.test",
            PageBehaviour {
                fail_scripts: true,
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(
            r#"{ "output": { "formats": ["png", "pdf"] },
                 "sanitization": { "customRules": [".ad-banner"] } }"#,
        );

        let results = scheduler(&config, &recorder, &storage)
            .capture(
                urls(&["https://broken.test", "https://ok.test"]),
                &CaptureOptions::default(),
            )
            .await
            .unwrap();

        let broken: Vec<_> = results
            .iter()
            .filter(|r| r.url() == "https://broken.test")
            .collect();
        assert_eq!(broken.len(), 1);
        assert!(matches!(broken[0], CaptureResult::Failed { error, .. } if error.contains("document.body is null")));

        let ok = results.iter().filter(|r| r.url() == "https://ok.test").count();
        assert_eq!(ok, 2);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_keeps_earlier_formats() {
        let recorder = Arc::new(Recorder::default().with(
            "https://a.test",
            PageBehaviour {
                fail_pdf: true,
                ..Default::default()
            },
        ));
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "output": { "formats": ["png", "pdf", "jpg"] } }"#);

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["https://a.test"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], CaptureResult::Saved { format: OutputFormat::Png, .. }));
        assert!(matches!(&results[1], CaptureResult::Failed { error, .. } if error.contains("Printing failed")));
        // jpg was never attempted
        assert_eq!(recorder.rasters.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_svg_is_skipped_with_notice() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let progress = Arc::new(RecordingProgress::default());
        let config = config(r#"{ "output": { "formats": ["svg", "png"] } }"#);

        let results = scheduler(&config, &recorder, &storage)
            .with_progress(progress.clone())
            .capture(urls(&["https://a.test"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], CaptureResult::Saved { format: OutputFormat::Png, .. }));

        let events = progress.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::FormatSkipped { format: OutputFormat::Svg, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Finished { succeeded: 1, failed: 0, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_url_never_opens_a_page() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = Config::default();

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["ftp://files.test/a"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert!(matches!(&results[0], CaptureResult::Failed { error, .. } if error.starts_with("Invalid URL")));
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_targets_are_refused_when_guarded() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = config(r#"{ "security": { "blockPrivateNetworks": true } }"#);

        let results = scheduler(&config, &recorder, &storage)
            .capture(
                urls(&[
                    "http://127.0.0.1:8080/admin",
                    "http://169.254.169.254/latest/meta-data/",
                    "https://93.184.216.34/",
                ]),
                &CaptureOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for refused in ["http://127.0.0.1:8080/admin", "http://169.254.169.254/latest/meta-data/"] {
            let entry = results.iter().find(|r| r.url() == refused).unwrap();
            assert!(
                matches!(entry, CaptureResult::Failed { error, .. } if error.starts_with("Invalid URL")),
                "{entry:?}"
            );
        }
        assert!(results
            .iter()
            .find(|r| r.url() == "https://93.184.216.34/")
            .unwrap()
            .is_success());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_targets_are_captured_by_default() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = Config::default();

        let results = scheduler(&config, &recorder, &storage)
            .capture(urls(&["http://127.0.0.1:8080/admin"]), &CaptureOptions::default())
            .await
            .unwrap();

        assert!(results[0].is_success());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_urls_are_captured_independently() {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(16));
        let config = Config::default();

        let results = scheduler(&config, &recorder, &storage)
            .capture(
                urls(&["https://a.test/x", "https://a.test/x"]),
                &CaptureOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
    }

    async fn assert_concurrency_bound(max_concurrency: usize) {
        let recorder = Arc::new(Recorder::default());
        let storage = Arc::new(InMemoryStorage::new(64));
        let config = config(&format!(
            r#"{{ "output": {{ "formats": ["png", "pdf"] }},
                 "performance": {{ "maxConcurrency": {max_concurrency} }},
                 "sanitization": {{ "customRules": [".ad-banner"] }} }}"#
        ));

        let list: Vec<String> = (0..6).map(|i| format!("https://site{i}.test/")).collect();
        let results = scheduler(&config, &recorder, &storage)
            .capture(list, &CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert!(recorder.max_open.load(Ordering::SeqCst) <= max_concurrency);
        assert_eq!(recorder.max_open.load(Ordering::SeqCst), max_concurrency);
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 6);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 6);
        assert_eq!(recorder.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_of_one_does_not_deadlock() {
        assert_concurrency_bound(1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_of_two() {
        assert_concurrency_bound(2).await;
    }

    #[tokio::test]
    async fn test_launch_failure_is_fatal() {
        let recorder = Arc::new(Recorder {
            fail_launch: true,
            ..Default::default()
        });
        let storage = Arc::new(InMemoryStorage::new(16));

        let err = scheduler(&Config::default(), &recorder, &storage)
            .capture(urls(&["https://a.test"]), &CaptureOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PageSnapError::BrowserLaunch(_)));
        assert!(err.is_fatal());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_engine_rejects_bad_storage_before_capture() {
        let recorder = Arc::new(Recorder::default());

        let unknown = config(r#"{ "output": { "storage": { "provider": "gcs" } } }"#);
        let err = PageSnapEngine::with_launcher(unknown, Arc::new(FakeLauncher(recorder.clone())))
            .err()
            .unwrap();
        assert!(err.is_fatal());

        let no_bucket = config(r#"{ "output": { "storage": { "provider": "s3" } } }"#);
        let err = PageSnapEngine::with_launcher(no_bucket, Arc::new(FakeLauncher(recorder)))
            .err()
            .unwrap();
        assert!(matches!(err, PageSnapError::Configuration(_)));
    }
}
