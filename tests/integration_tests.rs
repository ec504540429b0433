//! Loopback tests: a real listener and simulation, raw TCP clients

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use vehicle_combat::game::world::{SimSettings, World};
use vehicle_combat::net::framing::{read_message, write_message};
use vehicle_combat::net::protocol::{
    decode, encode, CarState, ClientMessage, ClientState, ServerMessage, SessionId,
};
use vehicle_combat::net::{listener, NetError, SessionRegistry};
use vehicle_combat::sim::{ServerSim, SimStats, INBOX_CAPACITY};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: std::net::SocketAddr,
    registry: Arc<SessionRegistry>,
    stop: watch::Sender<bool>,
}

async fn start_server(max_sessions: usize) -> TestServer {
    let registry = Arc::new(SessionRegistry::new(max_sessions));
    let (stop, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let (sim_tx, sim_rx) = mpsc::channel(INBOX_CAPACITY);
    let sim = ServerSim::new(
        World::new(SimSettings::default(), 11),
        sim_rx,
        registry.clone(),
        Arc::new(SimStats::new()),
    );
    tokio::spawn(sim.run(stopped(stop_rx.clone())));

    let game_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = game_listener.local_addr().unwrap();
    tokio::spawn(listener::serve(
        game_listener,
        registry.clone(),
        sim_tx,
        stopped(stop_rx),
    ));

    TestServer {
        addr,
        registry,
        stop,
    }
}

async fn recv(stream: &mut TcpStream) -> ServerMessage {
    let payload = timeout(WAIT, read_message(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    decode(&payload).unwrap()
}

/// Read frames until one satisfies `pick`
async fn recv_until<T>(
    stream: &mut TcpStream,
    mut pick: impl FnMut(&ServerMessage) -> Option<T>,
) -> T {
    loop {
        let msg = recv(stream).await;
        if let Some(found) = pick(&msg) {
            return found;
        }
    }
}

async fn connect(server: &TestServer) -> (TcpStream, SessionId, ServerMessage) {
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let admission = recv(&mut stream).await;
    let id = admission.init.expect("first frame must be the admission").id;
    (stream, id, admission)
}

#[tokio::test]
async fn second_admission_lists_exactly_the_first_car() {
    let server = start_server(8).await;

    let (mut first, first_id, admission) = connect(&server).await;
    assert_eq!(first_id, 0);
    assert_eq!(admission.add_cars, Some(Default::default()));

    let (_second, second_id, admission) = connect(&server).await;
    assert_eq!(second_id, 1);
    let existing = admission.add_cars.unwrap();
    assert_eq!(existing.keys().copied().collect::<Vec<_>>(), vec![first_id]);

    // the first client is told about the newcomer
    let added = recv_until(&mut first, |m| m.add_cars.clone()).await;
    assert_eq!(added.keys().copied().collect::<Vec<_>>(), vec![second_id]);

    let _ = server.stop.send(true);
}

#[tokio::test]
async fn disconnect_is_broadcast_and_id_is_reused() {
    let server = start_server(8).await;

    let (mut first, _, _) = connect(&server).await;
    let (second, second_id, _) = connect(&server).await;
    drop(second);

    let removed = recv_until(&mut first, |m| m.remove_cars.clone()).await;
    assert_eq!(removed, vec![second_id]);

    // wait for the registry to free the slot
    timeout(WAIT, async {
        while server.registry.contains(second_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (_third, third_id, admission) = connect(&server).await;
    assert_eq!(third_id, second_id);
    assert_eq!(admission.add_cars.unwrap().len(), 1);

    let _ = server.stop.send(true);
}

#[tokio::test]
async fn full_server_closes_new_connections() {
    let server = start_server(1).await;
    let (_first, _, _) = connect(&server).await;

    let mut refused = TcpStream::connect(server.addr).await.unwrap();
    let result = timeout(WAIT, read_message(&mut refused)).await.unwrap();
    assert!(matches!(result, Err(NetError::ConnectionClosed)));

    let _ = server.stop.send(true);
}

fn pose(id: SessionId, x: f32, y: f32, a_pos: f32) -> Vec<u8> {
    let msg = ClientMessage::State(ClientState {
        id: Some(id),
        state: CarState {
            pos: [x, y],
            a_pos,
            ..CarState::default()
        },
    });
    encode(&msg).unwrap().to_vec()
}

/// Wait until `stream` sees car `id` near `pos`
async fn wait_for_car(stream: &mut TcpStream, id: SessionId, pos: [f32; 2]) -> CarState {
    recv_until(stream, |m| {
        let car = m.update_cars.as_ref()?.get(&id)?;
        let close = (car.pos[0] - pos[0]).abs() < 1.0 && (car.pos[1] - pos[1]).abs() < 1.0;
        close.then_some(*car)
    })
    .await
}

#[tokio::test]
async fn pushed_state_reaches_other_clients() {
    let server = start_server(8).await;
    let (mut first, first_id, _) = connect(&server).await;
    let (mut second, second_id, _) = connect(&server).await;

    // park the second car in a corner so the two cannot touch
    write_message(&mut second, &pose(second_id, 100.0, 650.0, 0.0))
        .await
        .unwrap();
    wait_for_car(&mut first, second_id, [100.0, 650.0]).await;

    // garbage is dropped without closing the connection
    write_message(&mut first, b"{not json").await.unwrap();
    write_message(&mut first, &pose(first_id, 640.0, 200.0, 1.0))
        .await
        .unwrap();

    let seen = wait_for_car(&mut second, first_id, [640.0, 200.0]).await;
    assert!((seen.a_pos - 1.0).abs() < 0.05);

    let _ = server.stop.send(true);
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let server = start_server(8).await;
    let (mut first, _, _) = connect(&server).await;

    let _ = server.stop.send(true);

    let closed = timeout(WAIT, async {
        loop {
            if let Err(e) = read_message(&mut first).await {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(closed, NetError::ConnectionClosed));
}
