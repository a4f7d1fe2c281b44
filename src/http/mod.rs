use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use log::{info, warn};
use serde::Serialize;

use crate::{
    hal::ClientInstance,
    provider::StoreHal,
    snapshot::{decode, SnapshotView},
};

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum ClientsResponse {
    Ok { clients: Vec<SnapshotView> },
    Err(String),
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum ClientResponse {
    Ok(SnapshotView),
    Err(String),
}

async fn get_all_clients(State(hal): State<StoreHal>) -> (StatusCode, Json<ClientsResponse>) {
    let all = match hal.snapshots().all() {
        Ok(all) => all,
        Err(e) => {
            warn!("{e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ClientsResponse::Err("Internal Server Error".to_string())),
            );
        }
    };
    let now = Local::now();
    (
        StatusCode::OK,
        Json(ClientsResponse::Ok {
            clients: all.iter().map(|snapshot| snapshot.view_at(now)).collect(),
        }),
    )
}

async fn get_client(
    State(hal): State<StoreHal>,
    Path(instance): Path<String>,
) -> (StatusCode, Json<ClientResponse>) {
    let instance = match instance.parse::<ClientInstance>() {
        Ok(instance) => instance,
        Err(e) => return (StatusCode::NOT_FOUND, Json(ClientResponse::Err(e))),
    };
    match hal.snapshots().get(instance) {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ClientResponse::Ok(snapshot.view_at(Local::now()))),
        ),
        Err(e) => {
            warn!("{instance}: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ClientResponse::Err("Internal Server Error".to_string())),
            )
        }
    }
}

/// Accepts one raw DHCPv4 message sent or received by the instance's client.
async fn post_message(
    State(hal): State<StoreHal>,
    Path(instance): Path<String>,
    body: Bytes,
) -> StatusCode {
    let Ok(instance) = instance.parse::<ClientInstance>() else {
        return StatusCode::NOT_FOUND;
    };
    let message = match decode(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("{instance}: undecodable message: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };
    match hal.observe(instance, &message) {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(e) => {
            warn!("{instance}: rejected message: {e:#}");
            StatusCode::BAD_REQUEST
        }
    }
}

pub fn router(hal: StoreHal) -> Router {
    Router::new()
        .route("/dhcp4c", get(get_all_clients))
        .route("/dhcp4c/:instance", get(get_client))
        .route("/dhcp4c/:instance/messages", post(post_message))
        .with_state(hal)
}

pub async fn serve(addr: SocketAddr, hal: StoreHal) -> Result<()> {
    info!("listening on {addr}");
    axum::Server::bind(&addr)
        .serve(router(hal).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
fn open_hal() -> (tempfile::TempDir, StoreHal) {
    let dir = tempfile::tempdir().unwrap();
    let tree = crate::db::Db::try_open(dir.path())
        .unwrap()
        .snapshots_tree()
        .unwrap();
    (dir, StoreHal::new(tree))
}

#[cfg(test)]
fn encode(message: &dhcproto::v4::Message) -> Bytes {
    use dhcproto::{Encodable, Encoder};

    let mut buffer = Vec::with_capacity(1024);
    let mut encoder = Encoder::new(&mut buffer);
    message.encode(&mut encoder).unwrap();
    Bytes::from(buffer)
}

#[tokio::test]
async fn post_ack_then_get_test() {
    use crate::{hal::FsmState, snapshot::ack};

    let (_dir, hal) = open_hal();
    let status = post_message(State(hal.clone()), Path("ert".to_string()), encode(&ack())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, Json(response)) = get_client(State(hal.clone()), Path("ert".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    let ClientResponse::Ok(view) = response else {
        panic!("unexpected {response:?}");
    };
    assert_eq!(view.fsm_state, FsmState::Bound);
    assert_eq!(view.lease.unwrap().lease_time, 3600);
}

#[tokio::test]
async fn unknown_instance_test() {
    let (_dir, hal) = open_hal();
    let (status, _) = get_client(State(hal.clone()), Path("voip".to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let status = post_message(State(hal), Path("voip".to_string()), Bytes::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn garbage_message_test() {
    let (_dir, hal) = open_hal();
    let status = post_message(
        State(hal.clone()),
        Path("ecm".to_string()),
        Bytes::from_static(&[1, 2, 3]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(hal.snapshots().get(ClientInstance::Ecm).unwrap().updated_at.is_none());
}

#[tokio::test]
async fn get_all_clients_test() {
    let (_dir, hal) = open_hal();
    let (status, Json(response)) = get_all_clients(State(hal)).await;
    assert_eq!(status, StatusCode::OK);
    let ClientsResponse::Ok { clients } = response else {
        panic!("unexpected {response:?}");
    };
    let instances: Vec<_> = clients.iter().map(|view| view.instance).collect();
    assert_eq!(instances, ClientInstance::ALL.to_vec());
    assert!(clients.iter().all(|view| view.lease.is_none()));
}

#[tokio::test]
async fn rejected_message_test() {
    use dhcproto::v4::{Message, MessageType};

    use crate::snapshot::{ack, message};

    let (_dir, hal) = open_hal();
    let status = post_message(State(hal.clone()), Path("ert".to_string()), encode(&ack())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let mut foreign = message(MessageType::Release);
    foreign.set_chaddr(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    let status = post_message(State(hal.clone()), Path("ert".to_string()), encode(&foreign)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut untyped = Message::default();
    untyped.set_chaddr(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let status = post_message(State(hal.clone()), Path("ert".to_string()), encode(&untyped)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let snapshot = hal.snapshots().get(ClientInstance::Ert).unwrap();
    assert!(snapshot.lease.is_some());
}

#[tokio::test]
async fn oversized_hardware_length_test() {
    use crate::snapshot::ack;

    let (_dir, hal) = open_hal();
    let mut buffer = encode(&ack()).to_vec();
    // hlen
    buffer[2] = 200;
    let status = post_message(State(hal.clone()), Path("ert".to_string()), Bytes::from(buffer)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(hal.snapshots().get(ClientInstance::Ert).unwrap().lease.is_none());
}
