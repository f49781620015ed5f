//! Webhook delivery of run summaries

use chrono::{NaiveDate, Utc};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use worldtally::analytics::DayStats;
use worldtally::models::{RunOutcome, RunRecord, RunTrigger};
use worldtally::notifications::{Notifier, NotifyError, RunSummary, WebhookConfig, WebhookNotifier};

fn summary() -> RunSummary {
    RunSummary {
        run: RunRecord {
            id: uuid::Uuid::new_v4(),
            trigger: RunTrigger::Resume,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            had_errors: false,
            outcome: RunOutcome::Completed,
            entities_harvested: 42,
            error: None,
        },
        date: NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
        entities: 40,
        companions: 12,
        day_stats: DayStats::default(),
        report_due: NaiveDate::from_ymd_opt(2024, 7, 2),
    }
}

fn notifier(uri: &str, retries: u32) -> WebhookNotifier {
    WebhookNotifier::new(
        WebhookConfig::new(format!("{uri}/hooks/runs"))
            .with_max_retries(retries)
            .with_retry_base_ms(1),
    )
    .unwrap()
}

#[tokio::test]
async fn test_summary_posted_as_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/runs"))
        .and(header("x-worldtally-event", "run_completed"))
        .and(header_exists("x-worldtally-run"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let summary = summary();
    notifier(&mock_server.uri(), 0)
        .on_run_completed(&summary)
        .await
        .unwrap();

    let received: Vec<Request> = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["date"], "2024-07-03");
    assert_eq!(body["reportDue"], "2024-07-02");
    assert_eq!(body["run"]["trigger"], "resume");
    assert_eq!(body["run"]["id"], summary.run.id.to_string());
}

#[tokio::test]
async fn test_delivery_retried_after_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/runs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hooks/runs"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    notifier(&mock_server.uri(), 2)
        .on_run_completed(&summary())
        .await
        .unwrap();
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_failure_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/runs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("receiver down"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let result = notifier(&mock_server.uri(), 1)
        .on_run_completed(&summary())
        .await;

    match result {
        Err(NotifyError::Rejected(message)) => assert!(message.contains("receiver down")),
        other => panic!("expected rejection, got {other:?}"),
    }
}
