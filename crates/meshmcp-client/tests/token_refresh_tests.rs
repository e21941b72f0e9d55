//! Token refresh against a local token endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use meshmcp_client::HeaderBuilder;
use meshmcp_core::context::RequestContext;
use meshmcp_core::model::{Connection, ConnectionStatus, ConnectionType, DownstreamToken};
use meshmcp_core::storage::{DownstreamTokenStore, InMemoryStorage};
use meshmcp_core::MeshConfig;
use meshmcp_transport::headers::AUTHORIZATION;

/// Minimal one-shot OAuth token endpoint: answers every POST with a fresh
/// access token and counts the hits.
async fn spawn_token_endpoint(hits: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let hits = hits.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                hits.fetch_add(1, Ordering::SeqCst);
                let body = r#"{"access_token":"refreshed-token","refresh_token":"rt-2","expires_in":3600}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    format!("http://{addr}/token")
}

fn connection() -> Connection {
    Connection {
        id: "conn_oauth".to_string(),
        organization_id: "org-1".to_string(),
        title: "OAuth".to_string(),
        description: None,
        icon: None,
        connection_type: ConnectionType::Http,
        connection_url: Some("https://downstream.example/mcp".to_string()),
        connection_token: Some("static-fallback".to_string()),
        connection_headers: None,
        stdio: None,
        status: ConnectionStatus::Active,
        tools: Vec::new(),
        configuration_state: None,
        configuration_scopes: None,
    }
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_and_upserted() {
    let hits = Arc::new(AtomicUsize::new(0));
    let endpoint = spawn_token_endpoint(hits.clone()).await;

    let store = Arc::new(InMemoryStorage::new());
    let now = Utc::now();
    store
        .upsert(DownstreamToken {
            connection_id: "conn_oauth".to_string(),
            user_id: None,
            access_token: "old-token".to_string(),
            refresh_token: Some("rt-1".to_string()),
            token_endpoint: Some(endpoint),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            scope: Some("mcp".to_string()),
            // Expires in two minutes: inside the five minute refresh leeway.
            expires_at: Some(now + Duration::minutes(2)),
            updated_at: now,
        })
        .await
        .unwrap();

    let builder = HeaderBuilder::new(
        connection(),
        RequestContext::new(),
        MeshConfig::default(),
        store.clone(),
    );
    let snapshot = builder.build().await.unwrap();

    assert_eq!(snapshot.get(AUTHORIZATION), Some("Bearer refreshed-token"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let stored = store.token("conn_oauth", None).expect("token upserted");
    assert_eq!(stored.access_token, "refreshed-token");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-2"));
    assert!(stored.expires_at.unwrap() > now + Duration::minutes(30));
}

#[tokio::test]
async fn test_failed_refresh_deletes_token_and_falls_back() {
    // Endpoint that always refuses.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response =
                    "HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    let store = Arc::new(InMemoryStorage::new());
    let now = Utc::now();
    store
        .upsert(DownstreamToken {
            connection_id: "conn_oauth".to_string(),
            user_id: None,
            access_token: "old-token".to_string(),
            refresh_token: Some("rt-1".to_string()),
            token_endpoint: Some(format!("http://{addr}/token")),
            client_id: None,
            client_secret: None,
            scope: None,
            expires_at: Some(now - Duration::minutes(1)),
            updated_at: now,
        })
        .await
        .unwrap();

    let builder = HeaderBuilder::new(
        connection(),
        RequestContext::new(),
        MeshConfig::default(),
        store.clone(),
    );
    let snapshot = builder.build().await.unwrap();

    // Refresh failed: cached token deleted, static bearer used.
    assert_eq!(snapshot.get(AUTHORIZATION), Some("Bearer static-fallback"));
    assert!(store.token("conn_oauth", None).is_none());
}
