#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use quantdesk::backtest_api_client::ComputeService;
use quantdesk::error::{ChatError, ComputationError};
use quantdesk::llm_client::{Credentials, LanguageModel, Prompt};
use quantdesk::models::{BacktestResult, ComputationRequest};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

/// Compute-service payload with one bar per day from `start`, plus a buy on day 2, a sell on
/// day 5 and a sell on a date outside the series.
pub fn backtest_payload(start: NaiveDate, days: i64) -> Value {
    let data: Vec<Value> = (0..days)
        .map(|offset| {
            let close = 100.0 + offset as f64;
            json!({
                "date": (start + ChronoDuration::days(offset)).to_string(),
                "open": close - 0.5,
                "high": close + 1.0,
                "low": close - 1.0,
                "close": close,
                "volume": 1_000_000,
                "smaShort": if offset < 2 { Value::Null } else { json!(close - 0.2) },
            })
        })
        .collect();
    json!({
        "data": data,
        "trades": [
            { "date": (start + ChronoDuration::days(2)).to_string(), "type": "BUY", "price": 102.0, "reason": "Golden cross" },
            { "date": (start + ChronoDuration::days(5)).to_string(), "type": "SELL", "price": 105.0, "reason": "Death cross" },
            { "date": (start + ChronoDuration::days(days + 30)).to_string(), "type": "SELL", "price": 1.0, "reason": "Outside" }
        ],
        "metrics": {
            "totalReturn": 3.0,
            "finalCapital": 10300.0,
            "initialCapital": 10000.0,
            "maxDrawdown": 1.2,
            "winRate": 100.0,
            "tradeCount": 1,
            "sharpeRatio": 1.4
        }
    })
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

type Handler = dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync;

/// Minimal HTTP/1.1 server on a background thread. Every request is recorded and answered by
/// `handler` with a status code and a JSON body.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown, shutdown_rx) = mpsc::channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let handler: Arc<Handler> = Arc::new(handler);

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = handle_request(stream, handler.as_ref(), &recorded);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        });

        Self {
            base_url,
            requests,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(
    mut stream: std::net::TcpStream,
    handler: &Handler,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    let request = RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    };
    let (status, payload) = handler(&request);
    recorded.lock().unwrap().push(request);

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status < 400 { "OK" } else { "Error" },
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes())
}

/// Compute service that answers every request with `backtest_payload` for the requested
/// range after `delay`, recording each call.
pub struct RecordingCompute {
    pub delay: Duration,
    calls: Mutex<Vec<ComputationRequest>>,
}

impl RecordingCompute {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ComputationRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeService for RecordingCompute {
    async fn run_backtest(
        &self,
        request: &ComputationRequest,
    ) -> Result<BacktestResult, ComputationError> {
        self.calls.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.delay).await;
        let days = (request.config.end_date - request.config.start_date).num_days() + 1;
        serde_json::from_value(backtest_payload(request.config.start_date, days.min(60)))
            .map_err(|err| ComputationError::Decode(err.to_string()))
    }
}

/// Language model that always returns the same reply and counts calls.
pub struct CannedModel {
    reply: String,
    calls: AtomicUsize,
}

impl CannedModel {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CannedModel {
    async fn complete(
        &self,
        _credentials: &Credentials,
        _prompt: &Prompt,
    ) -> Result<String, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}
