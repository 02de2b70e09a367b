use std::time::{Duration, Instant};

use crossframe_tester::mock::{MockBrowser, install_widget_fixture};
use crossframe_tester::{
    Activation, Error, FrameActions, FrameHandle, HarnessConfig, HostContext, Location, PageDriver,
    Result, WidgetEvent, WidgetSession, WidgetTarget,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open_session() -> Result<WidgetSession<MockBrowser>> {
    init_tracing();
    WidgetSession::open(
        MockBrowser::widget_fixture()?,
        WidgetTarget::default(),
        HarnessConfig::default(),
    )
}

fn count_of(session: &WidgetSession<MockBrowser>, event_type: &str) -> usize {
    session
        .host()
        .messages()
        .filter(|entry| entry.event_type() == Some(event_type))
        .len()
}

#[test]
fn search_with_results_reports_one_metrics_event() -> Result<()> {
    let session = open_session()?;
    session.search("playwright")?;
    session.expect_visible(".result-item", Some("Playwright Testing Framework"))?;

    let metrics = session.wait_for_search_metrics()?;
    assert_eq!(metrics.query, "playwright");
    assert!(metrics.total_results > 0);
    assert_eq!(count_of(&session, "search-metrics"), 1);
    Ok(())
}

#[test]
fn search_without_results_reports_zero() -> Result<()> {
    let session = open_session()?;
    session.search("xyz")?;
    session.expect_visible(".no-results", Some("No results found"))?;

    let metrics = session.wait_for_search_metrics()?;
    assert_eq!(metrics.query, "xyz");
    assert_eq!(metrics.total_results, 0);
    assert_eq!(count_of(&session, "search-metrics"), 1);
    Ok(())
}

#[test]
fn clicking_a_result_reports_its_id() -> Result<()> {
    let session = open_session()?;
    session.search("playwright")?;
    session.activate_result("Playwright Testing Framework", Activation::Click)?;

    let selected = session.wait_for_result_selected()?;
    assert_eq!(selected.id, 1);
    assert_eq!(count_of(&session, "result-selected"), 1);
    Ok(())
}

#[test]
fn keyboard_activation_reports_its_id() -> Result<()> {
    let session = open_session()?;
    session.search("playwright")?;
    session.activate_result("Playwright Testing Framework", Activation::Keyboard)?;

    let selected = session.wait_for_result_selected()?;
    assert_eq!(selected.id, 1);
    assert_eq!(count_of(&session, "result-selected"), 1);
    Ok(())
}

#[test]
fn host_and_widget_run_on_different_origins() -> Result<()> {
    let session = open_session()?;
    let host_url = session.host().url().unwrap_or_default();
    assert_eq!(Location::parse(&host_url)?.origin(), "http://localhost:8000");
    assert_eq!(session.frame().origin(), "http://localhost:8001");
    assert_eq!(session.frame().current_url(), session.target().widget_url());
    Ok(())
}

#[test]
fn recorder_attached_after_navigation_is_rejected() -> Result<()> {
    init_tracing();
    let mut browser = MockBrowser::widget_fixture()?;
    browser.navigate("http://localhost:8000/host.html")?;
    match HostContext::attach(browser, HarnessConfig::default()) {
        Err(Error::RecorderInstalledLate { url }) => {
            assert_eq!(url, "http://localhost:8000/host.html");
        }
        Err(other) => panic!("expected late install error, got {other}"),
        Ok(_) => panic!("late recorder install was accepted"),
    }
    Ok(())
}

#[test]
fn recorded_messages_keep_their_sender_origin() -> Result<()> {
    let session = open_session()?;
    session.search("iframe")?;
    session.wait_for_search_metrics()?;

    let snapshot = session.host().messages();
    assert!(!snapshot.is_empty());
    assert!(snapshot.iter().all(|entry| entry.origin == "http://localhost:8001"));

    let events = session.widget_events()?;
    assert_eq!(events[0], WidgetEvent::Other(json!({ "type": "widget-ready" })));
    assert_eq!(events[1].event_type(), Some("search-metrics"));
    Ok(())
}

#[test]
fn host_page_still_receives_messages() -> Result<()> {
    let session = open_session()?;
    session.search("trace")?;
    session.wait_for_search_metrics()?;

    let host = session
        .host()
        .driver()
        .top_document()
        .ok_or_else(|| Error::Navigation("host document missing".into()))?;
    // the recorder sees each message before the host page's own listener
    let expected = "Received 2 message(s), last: search-metrics";
    for _ in 0..500 {
        if host.text("#host-status")? == expected {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    host.assert_text("#host-status", expected)?;
    Ok(())
}

#[test]
fn teardown_returns_everything_recorded() -> Result<()> {
    let session = open_session()?;
    session.search("playwright")?;
    session.activate_result("Playwright Trace Viewer", Activation::Click)?;
    session.wait_for_result_selected()?;

    let entries = session.teardown();
    let types: Vec<_> = entries.iter().filter_map(|entry| entry.event_type()).collect();
    assert_eq!(types, ["widget-ready", "search-metrics", "result-selected"]);
    assert_eq!(entries[2].data, json!({ "type": "result-selected", "id": 2 }));
    Ok(())
}

#[test]
fn missing_widget_frame_is_not_found() -> Result<()> {
    init_tracing();
    let target = WidgetTarget {
        widget_origin: "http://localhost:9001".into(),
        ..WidgetTarget::default()
    };
    match WidgetSession::open(MockBrowser::widget_fixture()?, target, HarnessConfig::default()) {
        Err(Error::ContextNotFound { pattern }) => assert!(pattern.contains("9001")),
        Err(other) => panic!("expected missing context, got {other}"),
        Ok(_) => panic!("located a widget that is not embedded"),
    }
    Ok(())
}

#[test]
fn timeout_reports_recent_messages() -> Result<()> {
    init_tracing();
    let mut config = HarnessConfig::default();
    config.set_expect_timeout(Duration::from_millis(150))?;
    let session =
        WidgetSession::open(MockBrowser::widget_fixture()?, WidgetTarget::default(), config)?;
    session.search("sandbox")?;
    session.wait_for_search_metrics()?;

    match session.wait_for_result_selected() {
        Err(err @ Error::WaitTimeout { .. }) => {
            let text = err.to_string();
            assert!(text.contains("result-selected"), "{text}");
            assert!(text.contains("widget-ready"), "{text}");
            assert!(err.is_timeout());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    Ok(())
}

#[test]
fn custom_target_urls_are_honoured() -> Result<()> {
    init_tracing();
    let target = WidgetTarget {
        host_url: "http://127.0.0.1:3000/embed.html".into(),
        widget_origin: "http://127.0.0.1:3001".into(),
        widget_path: "/search/widget.html".into(),
    };
    let mut browser = MockBrowser::new();
    install_widget_fixture(&mut browser, &target)?;
    let session = WidgetSession::open(browser, target, HarnessConfig::default())?;
    session.search("messaging")?;
    let metrics = session.wait_for_search_metrics()?;
    assert_eq!(metrics.total_results, 1);
    assert_eq!(
        session.frame().current_url(),
        "http://127.0.0.1:3001/search/widget.html"
    );
    Ok(())
}

#[test]
fn expect_visible_gives_up_after_action_timeout() -> Result<()> {
    init_tracing();
    let mut config = HarnessConfig::default();
    config.set_action_timeout(Duration::from_millis(60))?;
    let session =
        WidgetSession::open(MockBrowser::widget_fixture()?, WidgetTarget::default(), config)?;
    session.search("playwright")?;

    let started = Instant::now();
    match session.expect_visible(".result-item", Some("Nonexistent Entry")) {
        Err(Error::SelectorNotFound(message)) => {
            assert!(message.contains("not visible within 60ms"), "{message}");
        }
        other => panic!("expected visibility timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(60));
    Ok(())
}

#[test]
fn unbounded_action_timeout_is_accepted() -> Result<()> {
    init_tracing();
    let mut config = HarnessConfig::default();
    config.set_action_timeout(Duration::MAX)?;
    let session =
        WidgetSession::open(MockBrowser::widget_fixture()?, WidgetTarget::default(), config)?;
    session.search("playwright")?;
    session.activate_result("Playwright Testing Framework", Activation::Click)?;
    assert_eq!(session.wait_for_result_selected()?.id, 1);
    Ok(())
}
