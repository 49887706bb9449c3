mod common;

use common::{backtest_payload, date, init_logging, StubServer};
use quantdesk::backtest_api_client::{ComputeService, HttpComputeService};
use quantdesk::error::{ChatError, ComputationError};
use quantdesk::llm_client::{ChatCompletionsClient, Credentials, LanguageModel, Prompt};
use quantdesk::models::{ComputationRequest, Configuration, StrategyKind, TradeSide};
use serde_json::json;
use std::sync::Arc;

fn request(kind: StrategyKind) -> ComputationRequest {
    ComputationRequest {
        version: 7,
        config: Arc::new(Configuration::new(
            "AAPL",
            date("2024-01-01"),
            date("2024-01-20"),
            kind,
        )),
    }
}

#[tokio::test]
async fn backtest_call_sends_wire_body_and_decodes_result() {
    init_logging();
    let server = StubServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/backtest") => (200, backtest_payload(date("2024-01-01"), 20).to_string()),
        _ => (404, "{}".to_string()),
    });
    let service = HttpComputeService::new(
        reqwest::Client::new(),
        &format!("{}/", server.base_url),
        Some("s3cret".to_string()),
    );

    let result = service
        .run_backtest(&request(StrategyKind::SmaCrossover))
        .await
        .unwrap();
    assert_eq!(result.records.len(), 20);
    assert!(!result.records[0].indicators.contains_key("smaShort"));
    assert!(result.records[2].indicators.contains_key("smaShort"));
    assert_eq!(result.trades[0].side, TradeSide::Buy);
    assert_eq!(result.metrics.trade_count, 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("x-backtest-secret").map(String::as_str),
        Some("s3cret")
    );
    let body = requests[0].json();
    assert_eq!(body["symbol"], "AAPL");
    assert_eq!(body["startDate"], "2024-01-01");
    assert_eq!(body["endDate"], "2024-01-20");
    assert_eq!(body["strategy"], "SMA_CROSSOVER");
    assert_eq!(body["params"]["shortWindow"], 20.0);
    assert_eq!(body["slippage"], 0.001);
}

#[tokio::test]
async fn backtest_failures_map_to_computation_errors() {
    let server = StubServer::start(|req| match req.path.as_str() {
        "/status/backtest" => (502, r#"{"detail":"upstream down"}"#.to_string()),
        "/garbage/backtest" => (200, "not json".to_string()),
        "/empty/backtest" => (200, r#"{"data":[],"trades":[],"metrics":{}}"#.to_string()),
        _ => (404, "{}".to_string()),
    });
    let client = reqwest::Client::new();
    let call = |prefix: &str| {
        HttpComputeService::new(client.clone(), &format!("{}/{}", server.base_url, prefix), None)
    };

    let status = call("status")
        .run_backtest(&request(StrategyKind::Macd))
        .await
        .unwrap_err();
    assert!(matches!(status, ComputationError::Status { status: 502, ref body } if body.contains("upstream")));

    let decode = call("garbage")
        .run_backtest(&request(StrategyKind::Macd))
        .await
        .unwrap_err();
    assert!(matches!(decode, ComputationError::Decode(_)));

    let empty = call("empty")
        .run_backtest(&request(StrategyKind::Macd))
        .await
        .unwrap_err();
    assert!(matches!(empty, ComputationError::EmptyData { .. }));

    assert!(server.requests().iter().all(|req| req.headers.get("x-backtest-secret").is_none()));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let service = HttpComputeService::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
    let err = service
        .run_backtest(&request(StrategyKind::Momentum))
        .await
        .unwrap_err();
    assert!(matches!(err, ComputationError::Transport(_)));
}

#[tokio::test]
async fn symbol_search_returns_matches_or_falls_back() {
    let ok = StubServer::start(|req| {
        assert!(req.path.starts_with("/search?q="));
        (
            200,
            json!([
                { "symbol": "MSFT", "name": "Microsoft Corporation", "type": "Equity", "exchange": "NASDAQ" },
                { "symbol": "", "name": "blank" }
            ])
            .to_string(),
        )
    });
    let matches = HttpComputeService::new(reqwest::Client::new(), &ok.base_url, None)
        .search_symbols("micro")
        .await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].symbol, "MSFT");
    assert_eq!(matches[0].kind, "Equity");

    let failing = StubServer::start(|_| (500, "{}".to_string()));
    let service = HttpComputeService::new(reqwest::Client::new(), &failing.base_url, None);
    let fallback = service.search_symbols(" tsla ").await;
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].symbol, "TSLA");
    assert_eq!(fallback[0].name, "Manual Entry: TSLA");
    assert!(service.search_symbols("not a ticker!").await.is_empty());
    assert!(service.search_symbols("   ").await.is_empty());
}

#[tokio::test]
async fn chat_completions_client_sends_bearer_and_reads_content() {
    let server = StubServer::start(|req| match req.path.as_str() {
        "/v1/chat/completions" => (
            200,
            json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"intent\":\"ACKNOWLEDGE\",\"message\":\"hi\"}" } }]
            })
            .to_string(),
        ),
        _ => (404, "{}".to_string()),
    });
    let client = ChatCompletionsClient::new(
        reqwest::Client::new(),
        &format!("{}/v1/", server.base_url),
        "test-model",
    );
    let prompt = Prompt {
        system: "system text".to_string(),
        user: "user text".to_string(),
    };

    let reply = client
        .complete(&Credentials::new("sk-abc").unwrap(), &prompt)
        .await
        .unwrap();
    assert!(reply.contains("ACKNOWLEDGE"));

    let requests = server.requests();
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer sk-abc")
    );
    let body = requests[0].json();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["temperature"], 0);
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "user text");
}

#[tokio::test]
async fn chat_completions_errors_are_reported() {
    let server = StubServer::start(|req| match req.path.as_str() {
        "/denied/chat/completions" => (401, r#"{"error":"bad key"}"#.to_string()),
        "/garbled/chat/completions" => (200, "<html>gateway</html>".to_string()),
        _ => (200, r#"{"choices":[]}"#.to_string()),
    });
    let prompt = Prompt {
        system: String::new(),
        user: "hello".to_string(),
    };
    let key = Credentials::new("sk-abc").unwrap();

    let denied = ChatCompletionsClient::new(
        reqwest::Client::new(),
        &format!("{}/denied", server.base_url),
        "m",
    )
    .complete(&key, &prompt)
    .await
    .unwrap_err();
    assert!(matches!(denied, ChatError::Transport(_)));

    let garbled = ChatCompletionsClient::new(
        reqwest::Client::new(),
        &format!("{}/garbled", server.base_url),
        "m",
    )
    .complete(&key, &prompt)
    .await
    .unwrap_err();
    assert!(matches!(garbled, ChatError::Parse(_)));

    let empty = ChatCompletionsClient::new(reqwest::Client::new(), &server.base_url, "m")
        .complete(&key, &prompt)
        .await
        .unwrap_err();
    assert!(matches!(empty, ChatError::Parse(_)));
}
