//! Fetch and fallback behaviour against a mock calendar host.

use std::time::Duration;

use availcal_core::availability::{
    AvailabilityError, AvailabilitySource, LiveError, fetch_live, load_availability,
};
use availcal_core::busy::BusyDaySet;
use availcal_core::commands::{FetchErrorPolicy, refresh_snapshot};
use availcal_core::fetch::{FeedSource, FetchError, fetch_feed};
use availcal_core::snapshot::{SnapshotError, read_snapshot, write_snapshot};
use tempfile::tempdir;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ICS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:one@example.com\r\n\
DTSTART;VALUE=DATE:20240301\r\n\
DTEND;VALUE=DATE:20240303\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

fn source(url: String) -> FeedSource {
    FeedSource {
        url,
        relays: vec![],
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn fetches_direct_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private/basic.ics"))
        .and(header_exists("accept"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ICS))
        .expect(1)
        .mount(&server)
        .await;

    let extraction = fetch_live(&source(format!("{}/private/basic.ics", server.uri())))
        .await
        .expect("live extraction");
    assert_eq!(extraction.busy.to_strings(), vec!["2024-03-01", "2024-03-02"]);
}

#[tokio::test]
async fn falls_through_to_relay_when_direct_fails() {
    let server = MockServer::start().await;
    let direct = format!("{}/private/basic.ics", server.uri());

    Mock::given(method("GET"))
        .and(path("/private/basic.ics"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("url", direct.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(ICS))
        .expect(1)
        .mount(&server)
        .await;

    let mut feed = source(direct);
    feed.relays = vec![format!("{}/relay?url={{url}}", server.uri())];

    let body = fetch_feed(&feed).await.expect("relay fetch");
    assert!(body.starts_with("BEGIN:VCALENDAR"));
}

#[tokio::test]
async fn html_answers_are_not_calendars() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>Sign in</body></html>"),
        )
        .mount(&server)
        .await;

    let err = fetch_feed(&source(format!("{}/cal.ics", server.uri())))
        .await
        .expect_err("html is rejected");
    match err {
        FetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 1);
            assert!(last.contains("did not return iCalendar data"), "{last}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_feed_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ICS)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut feed = source(format!("{}/cal.ics", server.uri()));
    feed.timeout = Duration::from_millis(200);

    let err = fetch_live(&feed).await.expect_err("timeout");
    assert!(matches!(err, LiveError::Fetch(FetchError::Timeout(_))), "{err:?}");
}

#[tokio::test]
async fn live_failure_falls_back_to_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let snapshot = temp.path().join("data.json");
    let saved = BusyDaySet::from_strings(["2024-04-05"]).expect("busy");
    write_snapshot(&snapshot, &saved).expect("write snapshot");

    let feed = source(format!("{}/cal.ics", server.uri()));
    let availability = load_availability(Some(&feed), &snapshot)
        .await
        .expect("fallback availability");

    assert_eq!(availability.busy, saved);
    assert_eq!(availability.source, AvailabilitySource::Snapshot(snapshot));
    assert!(availability.extraction.is_none());
}

#[tokio::test]
async fn live_success_ignores_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ICS))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let feed = source(format!("{}/cal.ics", server.uri()));
    let availability = load_availability(Some(&feed), &temp.path().join("absent.json"))
        .await
        .expect("live availability");

    assert_eq!(availability.source, AvailabilitySource::Live);
    assert_eq!(availability.busy.len(), 2);
    assert_eq!(
        availability.extraction.map(|extraction| extraction.outcomes.len()),
        Some(1)
    );
}

#[tokio::test]
async fn no_live_and_no_snapshot_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let feed = source(format!("{}/cal.ics", server.uri()));
    let err = load_availability(Some(&feed), &temp.path().join("absent.json"))
        .await
        .expect_err("no data");

    let AvailabilityError::NoData { live, fallback } = err;
    assert!(live.contains("404"), "{live}");
    assert!(matches!(fallback, SnapshotError::Missing { .. }));
}

#[tokio::test]
async fn offline_reads_snapshot_only() {
    let temp = tempdir().expect("tempdir");
    let err = load_availability(None, &temp.path().join("absent.json"))
        .await
        .expect_err("no data offline");
    assert!(err.to_string().contains("not attempted"));
}

async fn failing_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn failed_refresh_keeps_existing_snapshot() {
    let server = failing_server().await;
    let temp = tempdir().expect("tempdir");
    let snapshot = temp.path().join("data.json");
    let saved = BusyDaySet::from_strings(["2024-04-05", "2024-04-06"]).expect("busy");
    write_snapshot(&snapshot, &saved).expect("write snapshot");
    let before = std::fs::read(&snapshot).expect("read before");

    let feed = source(format!("{}/cal.ics", server.uri()));
    let err = refresh_snapshot(&feed, &snapshot, FetchErrorPolicy::Keep)
        .await
        .expect_err("refresh fails");

    assert!(format!("{err:#}").contains("untouched"), "{err:#}");
    assert_eq!(std::fs::read(&snapshot).expect("read after"), before);
}

#[tokio::test]
async fn failed_refresh_can_write_empty_snapshot() {
    let server = failing_server().await;
    let temp = tempdir().expect("tempdir");
    let snapshot = temp.path().join("data.json");
    let saved = BusyDaySet::from_strings(["2024-04-05"]).expect("busy");
    write_snapshot(&snapshot, &saved).expect("write snapshot");

    let feed = source(format!("{}/cal.ics", server.uri()));
    let busy = refresh_snapshot(&feed, &snapshot, FetchErrorPolicy::Empty)
        .await
        .expect("empty snapshot written");

    assert!(busy.is_empty());
    assert!(read_snapshot(&snapshot).expect("read snapshot").is_empty());
    assert_eq!(
        std::fs::read_to_string(&snapshot).expect("read text").trim(),
        "[]"
    );
}

#[tokio::test]
async fn successful_refresh_replaces_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ICS))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let snapshot = temp.path().join("nested").join("data.json");
    let feed = source(format!("{}/cal.ics", server.uri()));
    refresh_snapshot(&feed, &snapshot, FetchErrorPolicy::Keep)
        .await
        .expect("refresh");

    assert_eq!(
        read_snapshot(&snapshot).expect("read snapshot").to_strings(),
        vec!["2024-03-01", "2024-03-02"]
    );
}
