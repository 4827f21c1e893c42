//! End-to-end sessions over a real WebSocket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use realmkeep_server::config::ServerConfig;
use realmkeep_server::error::{NetworkError, RealmkeepError};
use realmkeep_server::game::entity::{Entity, EntityId, EntityKind, PlayerState};
use realmkeep_server::game::geometry::Vector2;
use realmkeep_server::game::realm::{Realm, Region, RegionCoord};
use realmkeep_server::net::handler::ConnectionHandler;
use realmkeep_server::protocol::messages::ViewportUpdate;
use realmkeep_server::protocol::{Frame, Message, MessageType};
use realmkeep_server::store::{GameStore, MemoryBackend};
use realmkeep_server::AppState;

const STEP: Duration = Duration::from_secs(5);

async fn app() -> (Arc<AppState>, EntityId) {
    let config = ServerConfig::default();
    let store = Arc::new(GameStore::new(Arc::new(MemoryBackend::new()), &config.store));
    let realm = store.create_realm(Realm::new("Windvale", 32, 16)).await.unwrap();
    for arx in 0..2 {
        store
            .create_region(Region::new(realm.id(), RegionCoord::new(arx, 0)))
            .await
            .unwrap();
    }
    let player = store
        .create_entity(Entity::new(
            realm.id(),
            Vector2::new(4, 4),
            EntityKind::Player(PlayerState {
                name: "Enjolras".to_string(),
                gender: "male".to_string(),
                body: "light".to_string(),
                health: 100,
                online: false,
                inventory: Vec::new(),
            }),
        ))
        .await
        .unwrap();
    store.save_all().await.unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    (Arc::new(AppState::new(config, store, shutdown_tx)), player.id())
}

/// Accept exactly one connection and run it through the handler
async fn serve_one(state: Arc<AppState>) -> (SocketAddr, JoinHandle<realmkeep_server::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        ConnectionHandler::new(state).handle_websocket(stream, peer).await
    });
    (addr, handle)
}

fn decode(message: WsMessage) -> Frame {
    match message {
        WsMessage::Binary(data) => Frame::decode(&data).unwrap(),
        other => panic!("expected a binary message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_over_websocket() {
    let (state, player_id) = app().await;
    let (addr, server) = serve_one(state.clone()).await;

    let url = format!("ws://{}/?player={}", addr, player_id);
    let (mut ws, _) = tokio::time::timeout(STEP, connect_async(url)).await.unwrap().unwrap();

    let first = tokio::time::timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();
    let realm = decode(first);
    assert_eq!(realm.message_type, MessageType::RealmSnapshot);
    let Message::RealmSnapshot(snapshot) = Message::decode(&realm).unwrap() else {
        panic!("expected a realm snapshot");
    };
    assert_eq!(snapshot.name, "Windvale");
    assert!(state.store.entities().cached(player_id).unwrap().read().player().unwrap().online);

    let viewport = Message::from(ViewportUpdate::new(0, 0, 1, 0)).to_frame(Some(player_id));
    ws.send(WsMessage::Binary(viewport.encode().to_vec())).await.unwrap();
    for expected in [RegionCoord::new(0, 0), RegionCoord::new(1, 0)] {
        let message = tokio::time::timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();
        let Message::RegionSnapshot(region) = Message::decode(&decode(message)).unwrap() else {
            panic!("expected a region snapshot");
        };
        assert_eq!(region.location, expected);
    }

    ws.close(None).await.unwrap();
    let result = tokio::time::timeout(STEP, server).await.unwrap().unwrap();
    assert!(result.is_ok());

    // Close hook ran and was persisted
    let player = state.store.entities().cached(player_id).unwrap();
    assert!(!player.read().player().unwrap().online);
    assert!(!player.is_dirty());
    assert_eq!(state.session_manager.count(), 0);
    assert_eq!(state.bus.topic_count(), 0);
}

#[tokio::test]
async fn test_upgrade_without_player_is_refused() {
    let (state, _) = app().await;
    let (addr, server) = serve_one(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    let result = tokio::time::timeout(STEP, server).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(RealmkeepError::Network(NetworkError::MissingIdentity))
    ));

    // Nothing was sent before the server hung up
    let next = tokio::time::timeout(STEP, ws.next()).await.unwrap();
    assert!(!matches!(next, Some(Ok(WsMessage::Binary(_)))));
    assert_eq!(state.session_manager.count(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let (state, player_id) = app().await;
    let (addr, server) = serve_one(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/?player={}", addr, player_id))
        .await
        .unwrap();
    tokio::time::timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();

    state.shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(STEP, server).await.unwrap().unwrap();
    assert!(result.is_ok());

    let player = state.store.entities().cached(player_id).unwrap();
    assert!(!player.read().player().unwrap().online);
    assert_eq!(state.session_manager.count(), 0);
}
