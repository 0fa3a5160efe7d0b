//! End-to-end runs against a local stand-in for the collection site.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use hermitage_scrape::{
    ConfigError, PartialPolicy, ReplayRenderer, RunState, Scraper, ScrapeError, Settings,
    storage::ANNOTATION_FILE,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

const COLLECTION: &str = "/wps/portal/hermitage/digital-collection/";

/// Detail 1 is complete, 2 has a missing image, 3 lacks an inventory
/// number, 4 answers 500 on its first request, 5 cancels `stop` and never
/// answers.
#[derive(Clone, Default)]
struct Site {
    flaky_hits: Arc<AtomicUsize>,
    stop: CancellationToken,
}

fn detail_html(number: &str, inventory: bool) -> String {
    let inventory_row = if inventory {
        format!("<div><div><p>Inventory Number:</p></div><div><p>ГЭ-{number}</p></div></div>")
    } else {
        String::new()
    };
    format!(
        r#"<html><body>
        <section class="her-data-table">
          <div><div><p>Author:</p></div><div><a href="/a">Hau, Edward</a></div></div>
          <div><div><p>Title:</p></div><div><p>Work {number}</p></div></div>
          {inventory_row}
        </section>
        <section class="her-image"><div><img src="/images/{number}.jpg"></div></section>
        </body></html>"#
    )
}

async fn detail(State(site): State<Site>, UrlPath(number): UrlPath<String>) -> Response {
    if number == "4" && site.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if number == "5" {
        site.stop.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    Html(detail_html(&number, number != "3")).into_response()
}

async fn image(UrlPath(file): UrlPath<String>) -> Response {
    if file == "2.jpg" {
        return StatusCode::NOT_FOUND.into_response();
    }
    format!("jpeg-bytes-{file}").into_response()
}

async fn start_site() -> (Url, Site) {
    let site = Site::default();
    let app = Router::new()
        .route(&format!("{COLLECTION}painting/{{number}}"), get(detail))
        .route("/images/{file}", get(image))
        .with_state(site.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}/")).unwrap(), site)
}

fn site_settings(base: &Url) -> Settings {
    let mut settings = Settings::defaults().unwrap();
    settings.site.base_url = base.clone();
    settings.site.collection_url = base.join(COLLECTION).unwrap();
    settings.fetch.retry_delay_ms = 10;
    settings.fetch.timeout_secs = 5;
    settings
}

fn results_page(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(|n| {
            format!(r#"<div class="her-search-results-row"><a href="{COLLECTION}painting/{n}">Work {n}</a></div>"#)
        })
        .collect()
}

fn search_url(base: &Url) -> String {
    base.join("wps/portal/hermitage/woa-search/?lng=en#meta_author=Hau")
        .unwrap()
        .to_string()
}

fn files(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                std::fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_run_isolates_record_failures() {
    let (base, _site) = start_site().await;
    let settings = site_settings(&base);
    let pages = [results_page(&[1, 2]), results_page(&[2, 3])];
    let renderer = ReplayRenderer::new(pages, &settings.selectors).unwrap();
    let mut scraper = Scraper::new(renderer, settings).unwrap();
    let out = tempfile::tempdir().unwrap();

    let summary = scraper.run(&search_url(&base), out.path()).await.unwrap();

    assert_eq!(summary.links_found, 3);
    let written: Vec<String> = summary.written.iter().map(ToString::to_string).collect();
    assert_eq!(written, vec!["painting_1", "painting_3"]);

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures_of("FetchFailed").count(), 1);
    assert!(summary.failures[0].url.path().ends_with("painting/2"));

    assert_eq!(summary.partial.len(), 1);
    assert_eq!(summary.partial[0].id.to_string(), "painting_3");
    assert_eq!(summary.partial[0].missing, vec!["inventory_nr"]);

    let out_files = files(out.path());
    assert!(!out_files.contains_key("painting_2.json"));
    assert!(!out_files.contains_key("painting_2.jpg"));
    assert_eq!(out_files["painting_1.jpg"], b"jpeg-bytes-1.jpg");
    assert!(out_files.contains_key("failed.txt"));
    assert_eq!(
        out_files[ANNOTATION_FILE],
        b"object_id,tag,image_name\npainting_1,,painting_1.jpg\npainting_3,,painting_3.jpg\n"
    );

    let json: serde_json::Value = serde_json::from_slice(&out_files["painting_1.json"]).unwrap();
    assert_eq!(json["title"], "Work 1");
    assert_eq!(json["author"], "Hau, Edward");
    assert_eq!(json["inventory_nr"], "ГЭ-1");
    assert_eq!(
        json["url"].as_str().unwrap(),
        base.join(&format!("{COLLECTION}painting/1")).unwrap().as_str()
    );
    assert_eq!(json["image_url"].as_str().unwrap(), base.join("images/1.jpg").unwrap().as_str());

    assert_eq!(scraper.state(), RunState::Done);
    assert!(scraper.renderer().is_closed());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (base, _site) = start_site().await;
    let out = tempfile::tempdir().unwrap();

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let settings = site_settings(&base);
        let renderer = ReplayRenderer::new([results_page(&[1, 3])], &settings.selectors).unwrap();
        let mut scraper = Scraper::new(renderer, settings).unwrap();
        let summary = scraper.run(&search_url(&base), out.path()).await.unwrap();
        assert_eq!(summary.written.len(), 2);
        assert!(summary.failures.is_empty());
        snapshots.push(files(out.path()));
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(
        snapshots[1].keys().cloned().collect::<Vec<_>>(),
        vec![
            ANNOTATION_FILE,
            "painting_1.jpg",
            "painting_1.json",
            "painting_3.jpg",
            "painting_3.json"
        ]
    );
}

#[tokio::test]
async fn test_clean_rerun_drops_stale_failure_report() {
    let (base, _site) = start_site().await;
    let out = tempfile::tempdir().unwrap();

    let settings = site_settings(&base);
    let renderer = ReplayRenderer::new([results_page(&[2])], &settings.selectors).unwrap();
    Scraper::new(renderer, settings)
        .unwrap()
        .run(&search_url(&base), out.path())
        .await
        .unwrap();
    assert!(out.path().join("failed.txt").exists());

    let settings = site_settings(&base);
    let renderer = ReplayRenderer::new([results_page(&[1])], &settings.selectors).unwrap();
    Scraper::new(renderer, settings)
        .unwrap()
        .run(&search_url(&base), out.path())
        .await
        .unwrap();
    assert!(!out.path().join("failed.txt").exists());
}

#[tokio::test]
async fn test_skip_policy_reports_partial_record() {
    let (base, _site) = start_site().await;
    let mut settings = site_settings(&base);
    settings.records.partial_policy = PartialPolicy::Skip;
    let renderer = ReplayRenderer::new([results_page(&[3])], &settings.selectors).unwrap();
    let mut scraper = Scraper::new(renderer, settings).unwrap();
    let out = tempfile::tempdir().unwrap();

    let summary = scraper.run(&search_url(&base), out.path()).await.unwrap();

    assert!(summary.written.is_empty());
    assert_eq!(summary.failures_of("PartialRecord").count(), 1);
    assert!(!out.path().join("painting_3.json").exists());
    assert!(!out.path().join("painting_3.jpg").exists());
}

#[tokio::test]
async fn test_transient_fetch_failure_is_retried() {
    let (base, site) = start_site().await;
    let settings = site_settings(&base);
    let renderer = ReplayRenderer::new([results_page(&[4])], &settings.selectors).unwrap();
    let mut scraper = Scraper::new(renderer, settings).unwrap();
    let out = tempfile::tempdir().unwrap();

    let summary = scraper.run(&search_url(&base), out.path()).await.unwrap();

    assert_eq!(site.flaky_hits.load(Ordering::SeqCst), 2);
    assert!(summary.failures.is_empty());
    assert!(out.path().join("painting_4.jpg").is_file());
}

#[tokio::test]
async fn test_no_retries_reports_fetch_failed() {
    let (base, _site) = start_site().await;
    let mut settings = site_settings(&base);
    settings.fetch.retries = 0;
    let renderer = ReplayRenderer::new([results_page(&[4, 1])], &settings.selectors).unwrap();
    let mut scraper = Scraper::new(renderer, settings).unwrap();
    let out = tempfile::tempdir().unwrap();

    let summary = scraper.run(&search_url(&base), out.path()).await.unwrap();

    assert_eq!(summary.failures_of("FetchFailed").count(), 1);
    assert_eq!(summary.written.len(), 1);
    let report = std::fs::read_to_string(out.path().join("failed.txt")).unwrap();
    assert_eq!(report.lines().count(), 1);
    assert!(report.contains("painting/4"));
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_written_records() {
    let (base, site) = start_site().await;
    let settings = site_settings(&base);
    let renderer = ReplayRenderer::new([results_page(&[1, 5, 3])], &settings.selectors).unwrap();
    let mut scraper = Scraper::new(renderer, settings)
        .unwrap()
        .with_cancellation(site.stop.clone());
    let out = tempfile::tempdir().unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        scraper.run(&search_url(&base), out.path()),
    )
    .await
    .expect("cancellation should stop the in-flight fetch")
    .unwrap();

    assert!(summary.cancelled);
    let written: Vec<String> = summary.written.iter().map(ToString::to_string).collect();
    assert_eq!(written, vec!["painting_1"]);
    assert!(summary.failures.is_empty());

    let out_files = files(out.path());
    assert_eq!(
        out_files.keys().cloned().collect::<Vec<_>>(),
        vec![ANNOTATION_FILE, "painting_1.jpg", "painting_1.json"]
    );
    assert_eq!(scraper.state(), RunState::Done);
    assert!(scraper.renderer().is_closed());
}

#[tokio::test]
async fn test_clean_keeps_output_when_search_url_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("painting_1.json"), "{}").unwrap();

    let err = hermitage_scrape::run(
        "https://exmaple.com/wps/portal/hermitage/woa-search/",
        out.path(),
        Settings::defaults().unwrap(),
        true,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ScrapeError::Config(ConfigError::InvalidSearchUrl { .. })));
    assert!(out.path().join("painting_1.json").is_file());
}
