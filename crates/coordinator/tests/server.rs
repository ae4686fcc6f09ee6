//! End-to-end tests: DAL clients against a coordinator over TCP

use serde_json::json;
use std::sync::Arc;
use txngate_common::{doc, DdlCommand, Filter, TxnStatus};
use txngate_coordinator::{Config, Dispatcher, Publisher, RpcService, Server, TxnManager};
use txngate_dal::Dal;
use txngate_pool::{Pool, PoolConfig};
use txngate_protocol::{reply_code, Reply, CMD_RDB_OPERATION};
use txngate_store::{MemoryStore, Store};

async fn spawn_coordinator(enable: bool) -> (Server, Arc<Pool>) {
    // Reserve a concrete port first so minted tokens carry a dialable
    // processor address rather than the ephemeral ":0" placeholder.
    let listen = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().to_string()
    };
    let config = Config {
        listen,
        enable,
        ..Config::default()
    };
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let publisher = Arc::new(Publisher::new());
    let manager = Arc::new(TxnManager::new(
        store.clone(),
        publisher.clone(),
        config.processor(),
        config.enable,
    ));
    let dispatcher = Arc::new(Dispatcher::new(manager, store));
    let service = Arc::new(RpcService::new(dispatcher, publisher));
    let server = Server::bind(&config, service).await.unwrap();

    let pool = Pool::with_addresses(
        vec![server.local_addr().to_string()],
        PoolConfig::default(),
    );
    (server, pool)
}

#[tokio::test]
async fn transactional_lifecycle_over_tcp() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    dal.table("hosts")
        .insert_one(doc(&[("ip", json!("10.0.0.1"))]))
        .await
        .unwrap();

    let txn = dal.start_transaction("req-1").await.unwrap();
    assert!(txn.token().is_some());

    let info = txn.txn_info().await.unwrap().unwrap();
    assert_eq!(info.txn_id, txn.token().unwrap().txn_id);
    assert_eq!(info.status, TxnStatus::OnProgress);

    txn.table("hosts")
        .insert_one(doc(&[("ip", json!("10.0.0.2"))]))
        .await
        .unwrap();

    // the transaction reads its own write, ambient readers do not
    assert_eq!(txn.table("hosts").count(Filter::new()).await.unwrap(), 2);
    assert_eq!(dal.table("hosts").count(Filter::new()).await.unwrap(), 1);

    txn.commit().await.unwrap();
    assert_eq!(dal.table("hosts").count(Filter::new()).await.unwrap(), 2);

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn abort_discards_transactional_writes() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    let txn = dal.start_transaction("req-1").await.unwrap();
    txn.table("hosts")
        .insert_one(doc(&[("ip", json!("10.0.0.9"))]))
        .await
        .unwrap();
    txn.abort().await.unwrap();

    assert_eq!(dal.table("hosts").count(Filter::new()).await.unwrap(), 0);

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn token_joins_transaction_across_services() {
    let (server, pool_a) = spawn_coordinator(true).await;
    // a second service with its own pool to the same coordinator
    let pool_b = Pool::with_addresses(
        vec![server.local_addr().to_string()],
        PoolConfig::default(),
    );

    let service_a = Dal::new(pool_a.clone());
    let txn_a = service_a.start_transaction("req-join").await.unwrap();

    // the token crosses the service boundary as a metadata header
    let header_value = txn_a.token().unwrap().to_header_value();
    let txn_b = Dal::from_header(pool_b.clone(), &header_value).unwrap();

    txn_b
        .table("hosts")
        .insert_one(doc(&[("ip", json!("10.0.0.3"))]))
        .await
        .unwrap();

    // service A sees B's uncommitted write inside the shared transaction
    assert_eq!(txn_a.table("hosts").count(Filter::new()).await.unwrap(), 1);
    // ambient readers see nothing yet
    assert_eq!(
        service_a.table("hosts").count(Filter::new()).await.unwrap(),
        0
    );

    txn_a.commit().await.unwrap();
    assert_eq!(
        service_a.table("hosts").count(Filter::new()).await.unwrap(),
        1
    );

    pool_a.close().await;
    pool_b.close().await;
    server.shutdown();
}

#[tokio::test]
async fn second_finalize_reports_session_not_found() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    let txn = dal.start_transaction("req-1").await.unwrap();
    txn.commit().await.unwrap();

    let err = txn.commit().await.unwrap_err();
    assert!(err.is_session_not_found());
    let err = txn.abort().await.unwrap_err();
    assert!(err.is_session_not_found());

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn watch_streams_state_change_events() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    let mut watcher = dal.watch().await.unwrap();
    // the subscription rides its own connection; give the server a moment
    // to register it before producing events
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let txn = dal.start_transaction("req-watch").await.unwrap();
    let txn_id = txn.token().unwrap().txn_id;
    txn.commit().await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), watcher.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.txn_id, txn_id);
    assert_eq!(event.status, TxnStatus::Committed);
    assert_eq!(event.request_id, "req-watch");

    watcher.close().await;
    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn unknown_opcode_leaves_connection_usable() {
    let (server, pool) = spawn_coordinator(true).await;

    let reply: Reply = pool
        .call(
            CMD_RDB_OPERATION,
            &json!({"header": {"op_code": "Nonsense"}}),
        )
        .await
        .unwrap();
    assert!(!reply.success);
    assert_eq!(reply.code, reply_code::NOT_SUPPORTED);

    // the same pool keeps working
    let dal = Dal::new(pool.clone());
    assert_eq!(dal.table("hosts").count(Filter::new()).await.unwrap(), 0);

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn ddl_roundtrip() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    dal.ddl("hosts", DdlCommand::CreateCollection).await.unwrap();
    dal.ddl(
        "hosts",
        DdlCommand::CreateIndex {
            name: "by_ip".into(),
            keys: vec!["ip".into()],
            unique: true,
        },
    )
    .await
    .unwrap();
    dal.ddl("hosts", DdlCommand::DropCollection).await.unwrap();

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn disabled_coordinator_passes_operations_through() {
    let (server, pool) = spawn_coordinator(false).await;
    let dal = Dal::new(pool.clone());

    let txn = dal.start_transaction("req-1").await.unwrap();
    // no token minted: the handle stays ambient
    assert!(txn.token().is_none());

    txn.table("hosts")
        .insert_one(doc(&[("ip", json!("10.0.0.4"))]))
        .await
        .unwrap();
    // writes land immediately
    assert_eq!(dal.table("hosts").count(Filter::new()).await.unwrap(), 1);
    // finalize is a harmless no-op
    txn.commit().await.unwrap();

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn find_builder_sorts_projects_and_pages() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    dal.table("hosts")
        .insert(vec![
            doc(&[("ip", json!("10.0.0.3")), ("weight", json!(3))]),
            doc(&[("ip", json!("10.0.0.1")), ("weight", json!(1))]),
            doc(&[("ip", json!("10.0.0.2")), ("weight", json!(2))]),
        ])
        .await
        .unwrap();

    let docs = dal
        .table("hosts")
        .find(Filter::new())
        .sort("weight", true)
        .fields(&["ip"])
        .limit(2)
        .all()
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].get("ip"), Some(&json!("10.0.0.3")));
    assert!(docs[0].get("weight").is_none());

    let one = dal
        .table("hosts")
        .find(doc(&[("ip", json!("10.0.0.2"))]))
        .one()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.get("weight"), Some(&json!(2)));

    pool.close().await;
    server.shutdown();
}

#[tokio::test]
async fn find_and_modify_upserts_through_the_stack() {
    let (server, pool) = spawn_coordinator(true).await;
    let dal = Dal::new(pool.clone());

    let created = dal
        .table("counters")
        .find_and_modify(doc(&[("name", json!("hosts"))]), doc(&[("value", json!(1))]))
        .upsert()
        .return_new()
        .run()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.get("value"), Some(&json!(1)));

    let removed = dal
        .table("counters")
        .find_and_modify(doc(&[("name", json!("hosts"))]), Filter::new())
        .remove()
        .run()
        .await
        .unwrap();
    assert!(removed.is_some());
    assert_eq!(dal.table("counters").count(Filter::new()).await.unwrap(), 0);

    pool.close().await;
    server.shutdown();
}
