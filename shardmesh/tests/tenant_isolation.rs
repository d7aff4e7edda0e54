//! Property 8 (spec §8): every mutation and read carries a tenant id, and
//! one tenant's authenticated context can never read or write rows
//! belonging to another.

use serde_json::Value;
use shardmesh::config::Config;
use shardmesh::gateway::auth::{check_tenant, AuthContext};
use shardmesh::gateway::{Gateway, SqlRequest};

fn auth(tenant_id: &str) -> AuthContext {
    AuthContext {
        tenant_id: tenant_id.to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
    }
}

#[tokio::test]
async fn mutations_and_reads_are_scoped_to_the_caller_tenant() {
    let config = Config::default();
    let (gateway, _receiver) = Gateway::bootstrap(&config);
    let acme = auth("acme");
    let globex = auth("globex");

    gateway
        .execute_sql(
            &acme,
            SqlRequest {
                sql: "CREATE TABLE orders (id INTEGER PRIMARY KEY, tenant_id TEXT, amount INTEGER)".into(),
                params: vec![],
                hints: None,
            },
            None,
        )
        .await
        .unwrap();

    // Both tenants resolve to the same shard under the default single-range
    // policy in this test, so isolation must come from the query itself,
    // not from physical separation.
    gateway
        .execute_sql(
            &acme,
            SqlRequest {
                sql: "INSERT INTO orders (id, tenant_id, amount) VALUES (1, 'acme', 100)".into(),
                params: vec![],
                hints: None,
            },
            None,
        )
        .await
        .unwrap();
    gateway
        .execute_sql(
            &globex,
            SqlRequest {
                sql: "INSERT INTO orders (id, tenant_id, amount) VALUES (2, 'globex', 200)".into(),
                params: vec![],
                hints: None,
            },
            None,
        )
        .await
        .unwrap();

    let acme_rows = gateway
        .execute_sql(
            &acme,
            SqlRequest {
                sql: "/*+ strong */ SELECT amount FROM orders WHERE tenant_id = 'acme'".into(),
                params: vec![],
                hints: None,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(acme_rows.rows.len(), 1);
    assert_eq!(acme_rows.rows[0]["amount"], Value::from(100));

    assert!(check_tenant(&acme, "acme").is_ok());
    assert!(check_tenant(&acme, "globex").is_err());
}
