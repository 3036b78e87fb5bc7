//! End-to-end tests: a real listener, real sockets and a wiremock upstream.

use std::sync::Arc;
use std::time::Duration;

use apiproxy::cache::{CacheSettings, CachedClient};
use apiproxy::client::{RemoteForwarder, TcpForwarder};
use apiproxy::config::Config;
use apiproxy::dispatch::Dispatcher;
use apiproxy::envelope::{QueryEnvelope, ResponseEnvelope};
use apiproxy::protocol;
use apiproxy::server::{ServerSettings, serve};
use apiproxy::services::open_weather_map;
use apiproxy::upstream::ReqwestTransport;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A running proxy listener.
struct Proxy {
    addr: std::net::SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<apiproxy::Result<()>>,
}

impl Proxy {
    async fn start(config: Config) -> Self {
        let transport = ReqwestTransport::new(config.upstream_timeout()).unwrap();
        let client = CachedClient::new(transport, CacheSettings::default());
        let dispatcher = Dispatcher::new(client, Arc::new(config.clone()))
            .with_settings(config.service_settings());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(
            listener,
            Arc::new(dispatcher),
            config.server_settings(),
            async move {
                let _ = stopped.await;
            },
        ));

        Self {
            addr,
            stop: Some(stop),
            task,
        }
    }

    async fn query(&self, query: &Value) -> ResponseEnvelope {
        let query: QueryEnvelope = serde_json::from_value(query.clone()).unwrap();
        TcpForwarder::new(self.addr).forward(&query).await.unwrap()
    }

    async fn raw(&self, payload: &[u8]) -> ResponseEnvelope {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut answer = Vec::new();
        stream.read_to_end(&mut answer).await.unwrap();
        protocol::decode(&answer).unwrap()
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

async fn weather_upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/onecall"))
        .and(query_param("appid", "OWM-KEY"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                r#"{"current":{"temp":11.2},"hourly":[]}"#,
                "application/json; charset=utf-8",
            ),
        )
        .expect(1)
        .mount(&upstream)
        .await;
    upstream
}

fn config_for(upstream: &MockServer) -> Config {
    Config::parse_json(
        &json!({
            "SERVICES": {
                "open_weather_map": {"api_key": "OWM-KEY", "base_url": upstream.uri()}
            }
        })
        .to_string(),
    )
    .unwrap()
}

#[tokio::test]
async fn should_answer_weather_query_and_cache_it() {
    let upstream = weather_upstream().await;
    let proxy = Proxy::start(config_for(&upstream)).await;
    let query = json!({
        "service": "open_weather_map",
        "lat": "47.6769",
        "lng": "-122.2060",
        "units": "imperial",
    });

    let response = proxy.query(&query).await;
    assert_eq!(response.status_code, 200);
    assert_eq!(response.encoding.as_deref(), Some("utf-8"));
    let body: Value = serde_json::from_str(&response.content.as_text()).unwrap();
    assert!(body.get("current").is_some());

    let cached = proxy.query(&query).await;
    assert_eq!(cached, response);

    proxy.stop().await;
    upstream.verify().await;
}

#[tokio::test]
async fn should_send_sample_weather_key_when_none_is_configured() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/onecall"))
        .and(query_param("appid", open_weather_map::DEFAULT_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"current":{"temp":11.2}}"#,
            "application/json; charset=utf-8",
        ))
        .expect(1)
        .mount(&upstream)
        .await;
    let config = Config::parse_json(
        &json!({"services": {"open_weather_map": {"base_url": upstream.uri()}}}).to_string(),
    )
    .unwrap();
    let proxy = Proxy::start(config).await;

    let response = proxy
        .query(&json!({
            "service": "open_weather_map",
            "lat": "47.6769",
            "lng": "-122.2060",
            "units": "imperial",
        }))
        .await;

    assert_eq!(response.status_code, 200);
    let body: Value = serde_json::from_str(&response.content.as_text()).unwrap();
    assert!(body.get("current").is_some());
    proxy.stop().await;
    upstream.verify().await;
}

#[tokio::test]
async fn should_name_unknown_service() {
    let proxy = Proxy::start(Config::default()).await;

    let response = proxy.query(&json!({"service": "bogus", "query": "ignored"})).await;

    assert_eq!(response.status_code, 401);
    assert_eq!(response.content.as_text(), "Unresolved service name: bogus");
    assert_eq!(response.encoding.as_deref(), Some("utf-8"));
    proxy.stop().await;
}

#[tokio::test]
async fn should_reject_malformed_payloads() {
    let proxy = Proxy::start(Config::default()).await;

    let response = proxy.raw(b"{\"service\": \"bogus\"}").await;

    assert_eq!(response.status_code, -1);
    assert!(response.encoding.is_none());
    proxy.stop().await;
}

#[tokio::test]
async fn should_reject_oversized_payloads() {
    let config = Config::parse_json(r#"{"server": {"max_payload_bytes": 32}}"#).unwrap();
    let proxy = Proxy::start(config).await;

    let query = json!({"service": "api_test_endpoint", "padding": "x".repeat(64)});
    let response = proxy.raw(&protocol::encode(&query).unwrap()).await;

    assert_eq!(response.status_code, -1);
    assert!(response.content.as_text().contains("exceeds the 32 byte limit"));
    proxy.stop().await;
}

#[tokio::test]
async fn should_accept_string_wrapped_queries() {
    use base64::Engine;

    let proxy = Proxy::start(Config::default()).await;
    let wrapped = serde_json::to_string(r#"{"service": "api_test_endpoint", "n": 1}"#).unwrap();
    let payload = base64::engine::general_purpose::STANDARD.encode(wrapped);

    let response = proxy.raw(payload.as_bytes()).await;

    assert_eq!(response.status_code, 200);
    let echoed: Value = serde_json::from_str(&response.content.as_text()).unwrap();
    assert_eq!(echoed["n"], 1);
    proxy.stop().await;
}

#[tokio::test]
async fn should_relay_upstream_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/result"))
        .respond_with(
            ResponseTemplate::new(501).set_body_raw(
                "Wolfram|Alpha did not understand your input",
                "text/plain;charset=utf-8",
            ),
        )
        .expect(2)
        .mount(&upstream)
        .await;
    let config = Config::parse_json(
        &json!({"services": {"wolfram_alpha": {"api_key": "WA", "base_url": upstream.uri()}}})
            .to_string(),
    )
    .unwrap();
    let proxy = Proxy::start(config).await;
    let query = json!({"service": "wolfram_alpha", "query": "i like"});

    let first = proxy.query(&query).await;
    let second = proxy.query(&query).await;

    assert_eq!(first.status_code, 501);
    assert_eq!(first.content.as_text(), "Wolfram|Alpha did not understand your input");
    assert_eq!(second.status_code, 501);
    proxy.stop().await;
    upstream.verify().await;
}

#[tokio::test]
async fn should_report_unreachable_upstream_as_local_error() {
    let config = Config::parse_json(
        r#"{
            "services": {"map_maker": {"base_url": "http://127.0.0.1:9"}},
            "upstream": {"timeout_secs": 2}
        }"#,
    )
    .unwrap();
    let proxy = Proxy::start(config).await;

    let response = proxy.query(&json!({"service": "map_maker", "address": "Kirkland"})).await;

    assert_eq!(response.status_code, -1);
    assert!(response.encoding.is_none());
    proxy.stop().await;
}

#[tokio::test]
async fn should_serve_concurrent_connections() {
    let proxy = Arc::new(Proxy::start(Config::default()).await);

    let mut tasks = Vec::new();
    for n in 0..16 {
        let proxy = Arc::clone(&proxy);
        tasks.push(tokio::spawn(async move {
            proxy
                .query(&json!({"service": "api_test_endpoint", "n": n}))
                .await
        }));
    }

    for (n, task) in tasks.into_iter().enumerate() {
        let response = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status_code, 200);
        let echoed: Value = serde_json::from_str(&response.content.as_text()).unwrap();
        assert_eq!(echoed["n"], n);
    }

    let proxy = Arc::try_unwrap(proxy).ok().unwrap();
    proxy.stop().await;
}

#[test]
fn should_keep_default_server_limits() {
    let settings = ServerSettings::default();
    assert_eq!(settings.max_payload_bytes, protocol::MAX_PAYLOAD_SIZE);
}
