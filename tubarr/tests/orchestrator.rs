//! End-to-end orchestrator tests.
//!
//! These run the real scheduler, crawl engine, and pipeline against a
//! file-backed SQLite store, with fake implementations of the external
//! downloader, post-processor, login client, and browser cookie store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tubarr::config::AppConfig;
use tubarr::cookies::{AuthClient, Cookie, CookieSource, LoginRequest};
use tubarr::crawl::CrawlMode;
use tubarr::database::repositories::{ChannelRepository, IgnoreRepository, VideoRepository};
use tubarr::database::{init_pool, run_migrations};
use tubarr::domain::{
    ChannelAuth, ChannelRef, ChannelSettings, FilterMode, FilterOp, FilterRule, NewChannel,
    NewChannelUrl,
};
use tubarr::downloader::{Downloader, FetchRequest, ProgressReporter};
use tubarr::postprocess::PostProcessor;
use tubarr::scheduler::{ChannelOutcome, SkipReason};
use tubarr::services::ServiceContainer;
use tubarr::{Error, Result};

/// What the fake lister returns for one channel URL.
#[derive(Clone)]
enum Listing {
    Urls(Vec<&'static str>),
    BotBlocked,
}

/// Scriptable downloader double.
#[derive(Default)]
struct FakeDownloader {
    listings: Mutex<HashMap<String, Listing>>,
    metadata_overrides: Mutex<HashMap<String, serde_json::Value>>,
    list_calls: Mutex<Vec<String>>,
    metadata_fetches: AtomicUsize,
    video_fetches: AtomicUsize,
    video_fetches_started: Arc<AtomicUsize>,
    /// When set, video fetches park until cancellation.
    hang_video_fetch: bool,
}

impl FakeDownloader {
    fn with_listing(self, channel_url: &str, listing: Listing) -> Self {
        self.listings
            .lock()
            .insert(channel_url.to_string(), listing);
        self
    }

    fn with_metadata(self, video_url: &str, metadata: serde_json::Value) -> Self {
        self.metadata_overrides
            .lock()
            .insert(video_url.to_string(), metadata);
        self
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn list_urls(
        &self,
        _cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<Vec<String>> {
        self.list_calls.lock().push(request.url.clone());
        match self.listings.lock().get(&request.url) {
            Some(Listing::Urls(urls)) => Ok(urls.iter().map(|u| u.to_string()).collect()),
            Some(Listing::BotBlocked) => Err(Error::bot_block(request.hostname.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_metadata(
        &self,
        _cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<serde_json::Value> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(metadata) = self.metadata_overrides.lock().get(&request.url) {
            return Ok(metadata.clone());
        }
        let tail = request.url.rsplit('/').next().unwrap_or("video");
        Ok(serde_json::json!({
            "title": format!("video {tail}"),
            "upload_date": "20250601",
        }))
    }

    async fn fetch_video(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        self.video_fetches_started.fetch_add(1, Ordering::SeqCst);

        if self.hang_video_fetch {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }

        progress.report(50.0);
        let dir = request.output_dir.clone().expect("output dir set");
        let stem = request.output_stem.clone().expect("output stem set");
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{stem}.mp4"));
        tokio::fs::write(&path, b"media").await?;
        self.video_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }
}

/// Post-processor double: hands the file back untouched.
#[derive(Default)]
struct FakePostProcessor {
    runs: AtomicUsize,
}

#[async_trait]
impl PostProcessor for FakePostProcessor {
    async fn run(
        &self,
        _cancel: &CancellationToken,
        video: &tubarr::domain::Video,
        _metarr: &tubarr::domain::MetarrArgs,
        _move_ops: &[tubarr::domain::MoveOp],
    ) -> Result<PathBuf> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(video.video_path.clone().expect("video downloaded"))
    }
}

#[derive(Default)]
struct CountingAuthClient {
    logins: AtomicUsize,
}

#[async_trait]
impl AuthClient for CountingAuthClient {
    async fn login(
        &self,
        _cancel: &CancellationToken,
        request: &LoginRequest,
    ) -> Result<Vec<Cookie>> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Cookie::new(
            request.hostname.clone(),
            "session",
            "authed",
        )])
    }
}

struct EmptyCookieSource;

#[async_trait]
impl CookieSource for EmptyCookieSource {
    async fn read_cookies_for_host(
        &self,
        _cancel: &CancellationToken,
        _host: &str,
    ) -> Result<Vec<Cookie>> {
        Ok(Vec::new())
    }
}

struct Harness {
    container: ServiceContainer,
    downloader: Arc<FakeDownloader>,
    postprocessor: Arc<FakePostProcessor>,
    auth_client: Arc<CountingAuthClient>,
    _tmp: TempDir,
}

impl Harness {
    async fn new(downloader: FakeDownloader) -> Harness {
        let tmp = TempDir::new().unwrap();
        let db_url = format!(
            "sqlite:{}?mode=rwc",
            tmp.path().join("test.db").to_string_lossy().replace('\\', "/")
        );
        let pool = init_pool(&db_url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let config = AppConfig {
            cookie_dir: tmp.path().join("cookies"),
            ..AppConfig::default()
        };

        let downloader = Arc::new(downloader);
        let postprocessor = Arc::new(FakePostProcessor::default());
        let auth_client = Arc::new(CountingAuthClient::default());
        let container = ServiceContainer::with_tools(
            pool,
            config,
            downloader.clone(),
            postprocessor.clone(),
            auth_client.clone(),
            Arc::new(EmptyCookieSource),
        )
        .unwrap();

        Harness {
            container,
            downloader,
            postprocessor,
            auth_client,
            _tmp: tmp,
        }
    }

    fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            video_dir: Some(self._tmp.path().join("videos")),
            json_dir: Some(self._tmp.path().join("json")),
            ..Default::default()
        }
    }

    async fn add_channel(&self, name: &str, urls: &[&str], settings: ChannelSettings) -> i64 {
        self.container
            .channel_repo
            .add_channel(&NewChannel {
                name: name.to_string(),
                urls: urls
                    .iter()
                    .map(|u| NewChannelUrl {
                        url: u.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                settings,
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn empty_channel_list_is_a_clean_no_op() {
    let harness = Harness::new(FakeDownloader::default()).await;

    let summary = harness
        .container
        .orchestrator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.processed(), 0);
    assert_eq!(summary.skipped(), 0);
    assert_eq!(summary.failed(), 0);
    assert!(harness.downloader.list_calls.lock().is_empty());
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn paused_channel_is_skipped_and_last_scan_untouched() {
    let harness = Harness::new(FakeDownloader::default()).await;
    let settings = ChannelSettings {
        paused: Some(true),
        crawl_freq: Some(0),
        ..harness.settings()
    };
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], settings)
        .await;

    let summary = harness
        .container
        .orchestrator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped(), 1);
    assert!(matches!(
        summary.channels[0].outcome,
        ChannelOutcome::Skipped(SkipReason::Paused)
    ));

    let channel = harness
        .container
        .channel_repo
        .get_by_ref(&ChannelRef::Id(id))
        .await
        .unwrap();
    assert!(channel.last_scan.is_none());
    assert!(harness.downloader.list_calls.lock().is_empty());
}

#[tokio::test]
async fn already_stored_videos_are_not_enqueued_again() {
    let downloader = FakeDownloader::default().with_listing(
        "https://example.test/u/a",
        Listing::Urls(vec!["https://example.test/v/1", "https://example.test/v/2"]),
    );
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], harness.settings())
        .await;

    // v1 is already known to the store.
    let channel = harness
        .container
        .channel_repo
        .get_by_ref(&ChannelRef::Id(id))
        .await
        .unwrap();
    let existing =
        tubarr::domain::Video::discovered(id, channel.urls[0].id, "https://example.test/v/1");
    harness
        .container
        .video_repo
        .save_video(&existing)
        .await
        .unwrap();

    let summary = harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();

    assert_eq!(summary.processed(), 1);
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 1);

    let videos = harness.container.video_repo.videos_by_channel(id).await.unwrap();
    let finished: Vec<_> = videos.iter().filter(|v| v.finished).collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].url, "https://example.test/v/2");
}

#[tokio::test]
async fn ignore_crawl_records_urls_without_downloading() {
    let downloader = FakeDownloader::default().with_listing(
        "https://example.test/u/a",
        Listing::Urls(vec!["https://example.test/v/1", "https://example.test/v/2"]),
    );
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], harness.settings())
        .await;

    harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Ignore,
        )
        .await
        .unwrap();

    let ignored = harness
        .container
        .ignore_repo
        .list_ignore_urls(id)
        .await
        .unwrap();
    assert_eq!(ignored.len(), 2);
    assert!(harness.container.video_repo.videos_by_channel(id).await.unwrap().is_empty());
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 0);

    // A follow-up download crawl finds nothing new.
    harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();
    assert_eq!(harness.downloader.metadata_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn filter_rejection_is_terminal_and_produces_no_file() {
    let downloader = FakeDownloader::default()
        .with_listing(
            "https://example.test/u/a",
            Listing::Urls(vec!["https://example.test/v/frogs"]),
        )
        .with_metadata(
            "https://example.test/v/frogs",
            serde_json::json!({"title": "Frogs are great", "upload_date": "20250601"}),
        );
    let harness = Harness::new(downloader).await;
    let settings = ChannelSettings {
        filters: Some(vec![FilterRule::new(
            "title",
            FilterOp::Omit,
            "frogs",
            FilterMode::Must,
        )]),
        ..harness.settings()
    };
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], settings)
        .await;

    harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();

    let videos = harness.container.video_repo.videos_by_channel(id).await.unwrap();
    assert_eq!(videos.len(), 1);
    assert!(videos[0].finished);
    assert!(videos[0].was_skipped);
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 0);
    assert_eq!(harness.postprocessor.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bot_block_suppresses_same_host_but_not_other_hosts() {
    let downloader = FakeDownloader::default()
        .with_listing("https://example.test/u/a", Listing::BotBlocked)
        .with_listing("https://example.test/u/b", Listing::Urls(vec![]))
        .with_listing(
            "https://other.test/u/c",
            Listing::Urls(vec!["https://other.test/v/1"]),
        );
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel(
            "demo",
            &[
                "https://example.test/u/a",
                "https://example.test/u/b",
                "https://other.test/u/c",
            ],
            harness.settings(),
        )
        .await;

    let summary = harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();

    // The lister ran for the first URL and the other-host URL, but the
    // second same-host URL was skipped without an external call.
    let calls = harness.downloader.list_calls.lock().clone();
    assert_eq!(
        calls,
        vec![
            "https://example.test/u/a".to_string(),
            "https://other.test/u/c".to_string(),
        ]
    );

    // The block is persisted with its hostname and timestamp.
    let channel = harness
        .container
        .channel_repo
        .get_by_ref(&ChannelRef::Id(id))
        .await
        .unwrap();
    assert_eq!(channel.settings.bot_blocked, Some(true));
    assert!(
        channel
            .settings
            .bot_blocked_hostnames
            .as_ref()
            .unwrap()
            .contains("example.test")
    );

    // The other host proceeded normally.
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 1);
    match &summary.channels[0].outcome {
        ChannelOutcome::Completed(report) => {
            assert_eq!(report.bot_blocked_hosts, vec!["example.test".to_string()]);
            assert_eq!(report.videos_completed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // After unblock the host is eligible again.
    harness
        .container
        .orchestrator
        .unblock(&ChannelRef::Id(id))
        .await
        .unwrap();
    let channel = harness
        .container
        .channel_repo
        .get_by_ref(&ChannelRef::Id(id))
        .await
        .unwrap();
    assert_eq!(channel.settings.bot_blocked, Some(false));
    assert!(channel.settings.bot_blocked_timestamps.is_none());
}

#[tokio::test]
async fn shared_credentials_log_in_once_per_crawl() {
    let downloader = FakeDownloader::default()
        .with_listing("https://example.test/u/a", Listing::Urls(vec![]))
        .with_listing("https://example.test/u/b", Listing::Urls(vec![]));
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel(
            "demo",
            &["https://example.test/u/a", "https://example.test/u/b"],
            harness.settings(),
        )
        .await;

    let auth = ChannelAuth {
        username: "alice".to_string(),
        password: "hunter2".to_string(),
        login_url: "https://example.test/login".to_string(),
    };
    harness
        .container
        .channel_repo
        .add_auth(
            id,
            &[
                ("https://example.test/u/a".to_string(), auth.clone()),
                ("https://example.test/u/b".to_string(), auth),
            ],
        )
        .await
        .unwrap();

    harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();

    // Both URLs resolved cookies; the second hit the cache.
    assert_eq!(harness.auth_client.logins.load(Ordering::SeqCst), 1);
    assert_eq!(harness.downloader.list_calls.lock().len(), 2);
}

#[tokio::test]
async fn manual_url_list_skips_discovery_but_still_dedups() {
    let harness = Harness::new(FakeDownloader::default()).await;
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], harness.settings())
        .await;
    harness
        .container
        .ignore_repo
        .add_ignore_urls(id, &["https://example.test/v/ignored".to_string()])
        .await
        .unwrap();

    harness
        .container
        .orchestrator
        .download_urls(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            vec![
                "https://example.test/v/ignored".to_string(),
                "https://example.test/v/new".to_string(),
            ],
        )
        .await
        .unwrap();

    // No listing call was made and only the non-ignored URL was fetched.
    assert!(harness.downloader.list_calls.lock().is_empty());
    assert_eq!(harness.downloader.video_fetches.load(Ordering::SeqCst), 1);

    let videos = harness.container.video_repo.videos_by_channel(id).await.unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].url, "https://example.test/v/new");
}

#[tokio::test]
async fn concurrent_runs_on_the_same_channel_are_refused() {
    let downloader = FakeDownloader {
        hang_video_fetch: true,
        ..FakeDownloader::default()
    }
    .with_listing(
        "https://example.test/u/a",
        Listing::Urls(vec!["https://example.test/v/1"]),
    );
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], harness.settings())
        .await;

    let cancel = CancellationToken::new();
    let orchestrator = harness.container.orchestrator.clone();
    let first_cancel = cancel.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .crawl_one(&first_cancel, &ChannelRef::Id(id), CrawlMode::Download)
            .await
    });

    // Wait until the first run is inside a video fetch, then contend.
    let started = harness.downloader.video_fetches_started.clone();
    while started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let err = harness
        .container
        .orchestrator
        .crawl_one(&cancel, &ChannelRef::Id(id), CrawlMode::Download)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    cancel.cancel();
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_mid_download_leaves_no_video_finished() {
    let downloader = FakeDownloader {
        hang_video_fetch: true,
        ..FakeDownloader::default()
    }
    .with_listing(
        "https://example.test/u/a",
        Listing::Urls(vec![
            "https://example.test/v/1",
            "https://example.test/v/2",
            "https://example.test/v/3",
        ]),
    );
    let harness = Harness::new(downloader).await;
    let settings = ChannelSettings {
        concurrency: Some(3),
        ..harness.settings()
    };
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], settings)
        .await;

    let cancel = CancellationToken::new();
    let orchestrator = harness.container.orchestrator.clone();
    let crawl_cancel = cancel.clone();
    let crawl = tokio::spawn(async move {
        orchestrator
            .crawl_one(&crawl_cancel, &ChannelRef::Id(id), CrawlMode::Download)
            .await
    });

    // All three videos must be mid-fetch before we cancel.
    let started = harness.downloader.video_fetches_started.clone();
    while started.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(10), crawl)
        .await
        .expect("crawl returned after cancellation")
        .unwrap()
        .unwrap();
    match &summary.channels[0].outcome {
        ChannelOutcome::Completed(report) => {
            assert_eq!(report.videos_completed, 0);
            assert_eq!(report.videos_failed, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Cancelled videos are not persisted as finished; the next crawl will
    // re-discover them.
    let videos = harness.container.video_repo.videos_by_channel(id).await.unwrap();
    assert!(videos.iter().all(|v| !v.finished));
}

#[tokio::test]
async fn colliding_titles_get_numeric_suffixes() {
    let downloader = FakeDownloader::default()
        .with_listing(
            "https://example.test/u/a",
            Listing::Urls(vec!["https://example.test/v/1", "https://example.test/v/2"]),
        )
        .with_metadata(
            "https://example.test/v/1",
            serde_json::json!({"title": "same title", "upload_date": "20250601"}),
        )
        .with_metadata(
            "https://example.test/v/2",
            serde_json::json!({"title": "same title", "upload_date": "20250601"}),
        );
    let harness = Harness::new(downloader).await;
    let id = harness
        .add_channel("demo", &["https://example.test/u/a"], harness.settings())
        .await;

    harness
        .container
        .orchestrator
        .crawl_one(
            &CancellationToken::new(),
            &ChannelRef::Id(id),
            CrawlMode::Download,
        )
        .await
        .unwrap();

    let videos = harness.container.video_repo.videos_by_channel(id).await.unwrap();
    assert_eq!(videos.len(), 2);

    let mut stems: Vec<String> = videos
        .iter()
        .map(|v| {
            v.video_path
                .as_ref()
                .unwrap()
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    stems.sort();
    assert_eq!(stems, vec!["same title".to_string(), "same title (2)".to_string()]);
}
