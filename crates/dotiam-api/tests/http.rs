// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! End-to-end HTTP behaviour of a master and a replica

use dotiam_api::client::{HttpClient, http_client};
use dotiam_api::{ApiServer, Config, HttpMasterClient};
use dotiam_core::{IamConfig, IamService, InMemoryPubSub, MasterClient, PubSub, SyncTiming};
use dotiam_store::MemoryStore;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Instance {
    addr: SocketAddr,
    service: Arc<IamService>,
}

fn timing() -> SyncTiming {
    SyncTiming {
        heartbeat_interval: Duration::from_millis(100),
        wait_timeout: Duration::from_secs(5),
        stale_window: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
    }
}

async fn spawn(bus: Arc<dyn PubSub>, write_api: Option<String>, shutdown: &CancellationToken) -> Instance {
    let iam = IamConfig {
        write_api: write_api.clone(),
        timing: timing(),
        ..Default::default()
    };
    let master: Option<Arc<dyn MasterClient>> = match &write_api {
        Some(base) => Some(Arc::new(HttpMasterClient::new(base).unwrap())),
        None => None,
    };
    let service = Arc::new(IamService::new(iam.clone(), Arc::new(MemoryStore::new()), bus, master, None).unwrap());
    service.start(shutdown.clone());

    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        max_body_size: 1024 * 1024,
        iam,
    };
    let server = ApiServer::bind(config, service.clone()).await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(shutdown.clone()));

    Instance { addr, service }
}

struct Reply {
    status: StatusCode,
    headers: hyper::HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn sync_version(&self) -> Option<u64> {
        self.headers.get("x-sync-version").map(|v| v.to_str().unwrap().parse().unwrap())
    }
}

async fn call(client: &HttpClient, addr: SocketAddr, method: Method, path: &str, content_type: &str, body: Bytes) -> Reply {
    let request = Request::builder()
        .method(method)
        .uri(format!("http://{}{}", addr, path))
        .header("content-type", content_type)
        .header("x-user", "admin")
        .body(Full::new(body))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let (parts, body) = response.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.collect().await.unwrap().to_bytes(),
    }
}

async fn send(client: &HttpClient, addr: SocketAddr, method: Method, path: &str, body: Value) -> Reply {
    call(client, addr, method, path, "application/json", Bytes::from(body.to_string())).await
}

async fn get(client: &HttpClient, addr: SocketAddr, path: &str) -> Reply {
    call(client, addr, Method::GET, path, "application/json", Bytes::new()).await
}

async fn allowed(client: &HttpClient, addr: SocketAddr, alias: &str, method: &str, path: &str) -> bool {
    let reply = send(client, addr, Method::POST, "/v1/check", json!({ "alias": alias, "method": method, "path": path })).await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.json()["allowed"].as_bool().unwrap()
}

async fn seed(client: &HttpClient, addr: SocketAddr) {
    let permission = send(client, addr, Method::POST, "/v1/permissions", json!({ "name": "test-all", "resources": [{ "path": "/test/**", "methods": ["*"] }] })).await;
    assert_eq!(permission.status, StatusCode::CREATED);
    let permission_id = permission.json()["id"].as_str().unwrap().to_string();

    let role = send(client, addr, Method::POST, "/v1/roles", json!({ "id": "role-test", "name": "role-test", "permission_ids": [permission_id] })).await;
    assert_eq!(role.status, StatusCode::CREATED);

    let user = send(client, addr, Method::POST, "/v1/users", json!({ "alias": ["my-user"], "role_ids": ["role-test"] })).await;
    assert_eq!(user.status, StatusCode::CREATED);
    assert!(user.sync_version().is_some());
    assert_eq!(user.headers.get("x-sync-replication").unwrap(), "acknowledged");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_master_crud_and_checks() {
    let shutdown = CancellationToken::new();
    let master = spawn(Arc::new(InMemoryPubSub::new()), None, &shutdown).await;
    let client = http_client();

    seed(&client, master.addr).await;
    assert!(allowed(&client, master.addr, "my-user", "POST", "/test/example/1234").await);
    assert!(!allowed(&client, master.addr, "my-user", "GET", "/other").await);

    let listed = get(&client, master.addr, "/v1/users?search=MY&limit=10").await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.json()["total"], 1);
    let user_id = listed.json()["items"][0]["id"].as_str().unwrap().to_string();

    let roles = get(&client, master.addr, &format!("/v1/users/{}/roles", user_id)).await;
    assert_eq!(roles.json()[0]["name"], "role-test");

    let reverse = get(&client, master.addr, "/v1/roles?path=/test/a&method=DELETE").await;
    assert_eq!(reverse.json()["total"], 1);

    let deleted = call(&client, master.addr, Method::DELETE, "/v1/roles/role-test", "application/json", Bytes::new()).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert!(!allowed(&client, master.addr, "my-user", "POST", "/test/example/1234").await);

    let version = get(&client, master.addr, "/v1/version").await;
    assert_eq!(version.json()["version"], master.service.version());

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_are_problem_details() {
    let shutdown = CancellationToken::new();
    let master = spawn(Arc::new(InMemoryPubSub::new()), None, &shutdown).await;
    let client = http_client();

    let missing = get(&client, master.addr, "/v1/users/nobody").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.headers.get("content-type").unwrap(), "application/problem+json");
    assert_eq!(missing.json()["instance"], "/v1/users/nobody");

    let unknown = get(&client, master.addr, "/v1/widgets").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let first = send(&client, master.addr, Method::POST, "/v1/users", json!({ "alias": ["ada"] })).await;
    assert_eq!(first.status, StatusCode::CREATED);
    let duplicate = send(&client, master.addr, Method::POST, "/v1/users", json!({ "alias": ["ada"] })).await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.json()["status"], 409);

    let malformed = call(&client, master.addr, Method::POST, "/v1/check", "application/json", Bytes::from_static(b"{")).await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

    let no_directory = call(&client, master.addr, Method::POST, "/v1/directory/sync", "application/json", Bytes::new()).await;
    assert_eq!(no_directory.status, StatusCode::BAD_REQUEST);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replica_forwards_writes_and_serves_reads() {
    let shutdown = CancellationToken::new();
    let bus: Arc<dyn PubSub> = Arc::new(InMemoryPubSub::new());
    let master = spawn(bus.clone(), None, &shutdown).await;
    let replica = spawn(bus, Some(format!("http://{}", master.addr)), &shutdown).await;
    let client = http_client();

    let health = get(&client, replica.addr, "/health").await;
    assert_eq!(health.json()["role"], "replica");

    // Writes sent to the replica land on the master
    seed(&client, replica.addr).await;
    assert_eq!(master.service.repository().find_user_by_alias("my-user").unwrap().map(|u| u.alias), Some(vec!["my-user".to_string()]));

    // and are readable on the replica once the response is back
    assert!(replica.service.version() >= master.service.version());
    assert!(allowed(&client, replica.addr, "my-user", "GET", "/test/x").await);
    let listed = get(&client, replica.addr, "/v1/roles?name=role-test").await;
    assert_eq!(listed.json()["total"], 1);

    let synced = call(&client, replica.addr, Method::POST, "/v1/sync", "application/json", Bytes::new()).await;
    assert_eq!(synced.status, StatusCode::OK);
    assert_eq!(synced.sync_version(), Some(master.service.version()));

    let refused = replica.service.write("admin", &shutdown, |repo, actor| repo.rebuild_alias_index(actor)).await;
    assert!(refused.is_err());

    // Restores go to the master, never to a replica
    let backup = get(&client, master.addr, "/v1/backup").await;
    let before = replica.service.version();
    let restore = call(&client, replica.addr, Method::POST, "/v1/restore", "application/octet-stream", backup.body.clone()).await;
    assert_eq!(restore.status, StatusCode::FORBIDDEN);
    assert_eq!(restore.headers["content-type"], "application/problem+json");
    assert_eq!(replica.service.version(), before);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backup_then_multipart_restore() {
    let shutdown = CancellationToken::new();
    let source = spawn(Arc::new(InMemoryPubSub::new()), None, &shutdown).await;
    let target = spawn(Arc::new(InMemoryPubSub::new()), None, &shutdown).await;
    let client = http_client();

    seed(&client, source.addr).await;
    let backup = get(&client, source.addr, "/v1/backup").await;
    assert_eq!(backup.status, StatusCode::OK);
    assert_eq!(backup.headers.get("x-backup-version").unwrap().to_str().unwrap(), source.service.version().to_string());

    let mut body = Vec::new();
    body.extend_from_slice(b"--BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"iam.bak\"\r\nContent-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(&backup.body);
    body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");

    assert!(!allowed(&client, target.addr, "my-user", "GET", "/test/x").await);
    let restored = call(&client, target.addr, Method::POST, "/v1/restore", "multipart/form-data; boundary=BOUNDARY", Bytes::from(body)).await;
    assert_eq!(restored.status, StatusCode::OK);
    assert!(restored.sync_version().is_some());
    assert!(allowed(&client, target.addr, "my-user", "GET", "/test/x").await);

    let empty = call(&client, target.addr, Method::POST, "/v1/restore", "application/octet-stream", Bytes::new()).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    shutdown.cancel();
}
