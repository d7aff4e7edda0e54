//! S1 (spec §8): strong reads never cache; bounded reads serve stale data
//! until the event bus's consumer has processed the mutation's
//! invalidation, after which the next bounded read observes the write.

use std::time::Duration;

use serde_json::Value;
use shardmesh::config::Config;
use shardmesh::gateway::auth::AuthContext;
use shardmesh::gateway::{Gateway, SqlRequest};

fn auth(tenant_id: &str) -> AuthContext {
    AuthContext {
        tenant_id: tenant_id.to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
    }
}

async fn sql(gateway: &Gateway, auth: &AuthContext, sql: &str, params: Vec<Value>) -> shardmesh::gateway::SqlResponse {
    gateway
        .execute_sql(auth, SqlRequest { sql: sql.to_string(), params, hints: None }, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn strong_read_never_caches_bounded_read_does() {
    let config = Config::default();
    let (gateway, receiver) = Gateway::bootstrap(&config);
    tokio::spawn(gateway.event_bus.clone().run(receiver, gateway.cache.clone(), 50, Duration::from_millis(50)));

    let auth = auth("t1");
    sql(
        &gateway,
        &auth,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, tenant_id TEXT, name TEXT)",
        vec![],
    )
    .await;
    sql(
        &gateway,
        &auth,
        "INSERT INTO users (id, tenant_id, name) VALUES (1, 't1', 'Ada')",
        vec![],
    )
    .await;

    let strong = sql(&gateway, &auth, "/*+ strong */ SELECT name FROM users WHERE id = 1", vec![]).await;
    assert_eq!(strong.rows[0]["name"], Value::from("Ada"));
    assert_eq!(gateway.cache.len(), 0, "a strong read must never populate the cache");

    let bounded = sql(&gateway, &auth, "/*+ bounded=30000 */ SELECT name FROM users WHERE id = 1", vec![]).await;
    assert_eq!(bounded.rows[0]["name"], Value::from("Ada"));
    assert!(gateway.cache.len() > 0, "a bounded read must write through to the cache");

    sql(&gateway, &auth, "UPDATE users SET name = 'Grace' WHERE id = 1", vec![]).await;

    // Give the event bus's batching consumer a moment to drain the
    // secondary invalidation and issue its prefix-delete.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let after = sql(&gateway, &auth, "/*+ bounded=30000 */ SELECT name FROM users WHERE id = 1", vec![]).await;
    assert_eq!(after.rows[0]["name"], Value::from("Grace"));
}
