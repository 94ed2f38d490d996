use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wpp_admin::error::{Result, WppError};
use wpp_admin::poller::{
    fleet_status, spawn_poller, ConnectionPoller, ConnectionSource, HealthStatus,
};
use wpp_admin::types::{LinkStatus, PhoneNumber};

/// Replays scripted responses; the last one repeats forever.
struct ScriptedSource {
    statuses: Mutex<VecDeque<Result<LinkStatus>>>,
    qrs: Mutex<VecDeque<Result<Option<String>>>>,
    status_calls: Mutex<usize>,
}

fn api_error() -> WppError {
    WppError::Api {
        status: 502,
        message: "bad gateway".into(),
    }
}

fn clone_result<T: Clone>(r: &Result<T>) -> Result<T> {
    match r {
        Ok(v) => Ok(v.clone()),
        Err(WppError::Unauthorized) => Err(WppError::Unauthorized),
        Err(_) => Err(api_error()),
    }
}

fn next<T: Clone>(queue: &Mutex<VecDeque<Result<T>>>) -> Result<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        clone_result(queue.front().expect("scripted response"))
    }
}

impl ScriptedSource {
    fn new(statuses: Vec<Result<LinkStatus>>, qrs: Vec<Result<Option<String>>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            qrs: Mutex::new(qrs.into()),
            status_calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ConnectionSource for ScriptedSource {
    async fn number_status(&self, _number: &PhoneNumber) -> Result<LinkStatus> {
        *self.status_calls.lock().unwrap() += 1;
        next(&self.statuses)
    }

    async fn connect_qr(&self, _number: &PhoneNumber) -> Result<Option<String>> {
        next(&self.qrs)
    }
}

fn phone(raw: &str) -> PhoneNumber {
    PhoneNumber::parse(raw).unwrap()
}

#[tokio::test]
async fn test_blank_qr_means_connected() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Ok(None)],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    assert!(poller.state().connected);
    assert!(poller.state().qr_code.is_none());
    assert!(poller.state().error().is_none());
}

#[tokio::test]
async fn test_qr_present_means_disconnected() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Ok(Some("aGVsbG8=".into()))],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    assert!(!poller.state().connected);
    assert_eq!(poller.state().qr_code.as_deref(), Some("aGVsbG8="));
    assert!(poller.state().last_update.is_some());
}

#[tokio::test]
async fn test_stale_qr_kept_on_error_unless_forced() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Ok(Some("first".into())), Err(api_error()), Err(api_error())],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.refresh_qr(false).await.unwrap();
    poller.refresh_qr(false).await.unwrap();
    assert_eq!(poller.state().qr_code.as_deref(), Some("first"));
    assert!(poller.state().error().is_none());

    poller.refresh_qr(true).await.unwrap();
    assert!(poller.state().qr_code.is_none());
    assert_eq!(poller.state().error(), Some("bad gateway"));
}

#[tokio::test]
async fn test_qr_success_keeps_status_failure() {
    let source = Arc::new(ScriptedSource::new(
        vec![Err(api_error())],
        vec![Ok(Some("qr".into()))],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    assert_eq!(poller.state().qr_code.as_deref(), Some("qr"));
    assert_eq!(poller.state().status_error.as_deref(), Some("bad gateway"));
    assert!(poller.state().qr_error.is_none());
    assert_eq!(poller.state().error(), Some("bad gateway"));
}

#[tokio::test]
async fn test_status_success_keeps_qr_failure() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Err(api_error())],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    assert!(poller.state().status_error.is_none());
    assert_eq!(poller.state().qr_error.as_deref(), Some("bad gateway"));
    assert_eq!(poller.state().error(), Some("bad gateway"));
}

#[tokio::test]
async fn test_error_without_qr_is_reported() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Err(api_error())],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.refresh_qr(false).await.unwrap();
    assert_eq!(poller.state().error(), Some("bad gateway"));
}

#[tokio::test]
async fn test_connected_status_skips_qr_and_clears_it() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected), Ok(LinkStatus::Connected)],
        vec![Ok(Some("qr".into())), Err(api_error())],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    assert_eq!(poller.state().qr_code.as_deref(), Some("qr"));
    poller.tick(false).await.unwrap();
    assert!(poller.state().connected);
    assert!(poller.state().qr_code.is_none());
    assert!(poller.state().error().is_none());
}

#[tokio::test]
async fn test_unauthorized_propagates() {
    let source = Arc::new(ScriptedSource::new(
        vec![Err(WppError::Unauthorized)],
        vec![Ok(None)],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    assert!(matches!(
        poller.tick(false).await,
        Err(WppError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_select_resets_state() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Ok(Some("qr".into()))],
    ));
    let mut poller = ConnectionPoller::new(source, phone("5511999999999"));
    poller.tick(false).await.unwrap();
    poller.select(phone("5511988888888"));
    assert_eq!(poller.state().number.as_str(), "5511988888888");
    assert!(poller.state().qr_code.is_none());
    assert!(poller.state().status.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_poller_fetches_immediately_then_on_interval() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Disconnected)],
        vec![Ok(Some("qr".into()))],
    ));
    let handle = spawn_poller(source.clone(), phone("5511999999999"), Duration::from_secs(5));
    let mut states = handle.state();

    states.changed().await.unwrap();
    assert_eq!(states.borrow().qr_code.as_deref(), Some("qr"));
    assert_eq!(*source.status_calls.lock().unwrap(), 1);

    states.changed().await.unwrap();
    assert_eq!(*source.status_calls.lock().unwrap(), 2);

    handle.select(phone("5511988888888")).await;
    states.changed().await.unwrap();
    assert_eq!(handle.current().number.as_str(), "5511988888888");
    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_polling() {
    let source = Arc::new(ScriptedSource::new(
        vec![Ok(LinkStatus::Connected)],
        vec![Ok(None)],
    ));
    let handle = spawn_poller(source.clone(), phone("5511999999999"), Duration::from_secs(5));
    let mut states = handle.state();
    states.changed().await.unwrap();
    drop(handle);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(*source.status_calls.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poller_exits_on_unauthorized() {
    let source = Arc::new(ScriptedSource::new(
        vec![Err(WppError::Unauthorized)],
        vec![Ok(None)],
    ));
    let handle = spawn_poller(source, phone("5511999999999"), Duration::from_secs(5));
    let mut states = handle.state();
    states.changed().await.unwrap();
    assert!(states.borrow().error().is_some());
    assert!(states.changed().await.is_err());
    tokio::task::yield_now().await;
    assert!(handle.is_finished());
}

struct FleetSource;

#[async_trait]
impl ConnectionSource for FleetSource {
    async fn number_status(&self, number: &PhoneNumber) -> Result<LinkStatus> {
        match number.as_str() {
            "5511999999999" => Ok(LinkStatus::Connected),
            "5511988888888" => Ok(LinkStatus::parse("desconectado")),
            "5511977777777" => Ok(LinkStatus::Connected),
            _ => Err(api_error()),
        }
    }

    async fn connect_qr(&self, _number: &PhoneNumber) -> Result<Option<String>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_fleet_status_counts() {
    let numbers = vec![
        phone("5511999999999"),
        phone("5511988888888"),
        phone("5511977777777"),
        phone("5511966666666"),
    ];
    let report = fleet_status(&FleetSource, &numbers).await.unwrap();
    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.entries[1].status, HealthStatus::Disconnected);
    assert_eq!(report.entries[3].status, HealthStatus::Error);
    assert_eq!(report.entries[3].detail.as_deref(), Some("bad gateway"));
    assert_eq!(report.stats.connected, 2);
    assert_eq!(report.stats.disconnected, 1);
    assert_eq!(report.stats.errors, 1);
    assert!((report.stats.connected_percent - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_fleet_status_empty() {
    let report = fleet_status(&FleetSource, &[]).await.unwrap();
    assert_eq!(report.stats.total, 0);
    assert_eq!(report.stats.connected_percent, 0.0);
}
