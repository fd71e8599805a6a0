//! ElasticClient HTTP 行为测试 — 用固定响应的本地 TCP 服务模拟索引端
//! Run: cargo test -p register-server --test elastic_client

use std::collections::HashMap;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use register_server::core::Config;
use register_server::sync::elastic::{CountError, ElasticClient};
use register_server::utils::AppError;

/// 起一个对任何请求都返回固定响应的 HTTP 服务，返回 base URL
async fn canned_server(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\n\
                     content-type: application/json\r\n\
                     content-length: {}\r\n\
                     connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    format!("http://{addr}")
}

fn client(base_url: &str) -> ElasticClient {
    let config = Config {
        work_dir: "/tmp".to_string(),
        environment: "test".to_string(),
        elastic_url: base_url.to_string(),
        elastic_timeout_ms: 2000,
        index_prefix: "register_key".to_string(),
        sync_poll_ms: 1000,
        key_afterhandlers: HashMap::new(),
        rollback_retention_days: 7,
    };
    ElasticClient::new(&config).unwrap()
}

#[test]
fn index_name_uses_prefix_and_key() {
    let client = client("http://localhost:9200");
    assert_eq!(client.index_name("k1"), "register_key_k1");
}

/// 文档已不存在时删除不是错误 (目标状态已达成)
#[tokio::test]
async fn delete_doc_tolerates_missing_document() {
    let base = canned_server(
        "404 Not Found",
        r#"{"_index":"register_key_k1","result":"not_found"}"#,
    )
    .await;

    let deleted = client(&base).delete_doc("k1", "record-a").await.unwrap();
    assert!(!deleted);
}

#[tokio::test]
async fn delete_doc_reports_success() {
    let base = canned_server("200 OK", r#"{"result":"deleted"}"#).await;
    let deleted = client(&base).delete_doc("k1", "record-a").await.unwrap();
    assert!(deleted);
}

/// 索引不存在与其它计数失败必须可区分 (reconciler 依赖)
#[tokio::test]
async fn count_distinguishes_missing_index() {
    let base = canned_server(
        "404 Not Found",
        r#"{"error":{"type":"index_not_found_exception","reason":"no such index"},"status":404}"#,
    )
    .await;

    let err = client(&base).count("k1").await.unwrap_err();
    assert!(matches!(err, CountError::IndexNotFound));
}

#[tokio::test]
async fn count_parses_document_count() {
    let base = canned_server("200 OK", r#"{"count":42,"_shards":{"total":1}}"#).await;
    assert_eq!(client(&base).count("k1").await.unwrap(), 42);
}

#[tokio::test]
async fn count_surfaces_other_failures() {
    let base = canned_server(
        "503 Service Unavailable",
        r#"{"error":{"type":"cluster_block_exception","reason":"index read-only"},"status":503}"#,
    )
    .await;

    match client(&base).count("k1").await.unwrap_err() {
        CountError::Other(reason) => assert_eq!(reason, "index read-only"),
        other => panic!("expected Other, got {other:?}"),
    }
}

/// 结构化 ES 错误体展开为可读原因
#[tokio::test]
async fn upsert_failure_unwraps_structured_reason() {
    let base = canned_server(
        "400 Bad Request",
        r#"{"error":{"type":"mapper_parsing_exception","reason":"failed to parse field [age]"},"status":400}"#,
    )
    .await;

    let err = client(&base)
        .upsert_doc("k1", "record-a", &json!({"age": "not-a-number"}))
        .await
        .unwrap_err();
    match err {
        AppError::Sync(message) => assert_eq!(message, "failed to parse field [age]"),
        other => panic!("expected Sync error, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_index_tolerates_missing_index() {
    let base = canned_server(
        "404 Not Found",
        r#"{"error":{"type":"index_not_found_exception"},"status":404}"#,
    )
    .await;
    client(&base).delete_index("k1").await.unwrap();
}
