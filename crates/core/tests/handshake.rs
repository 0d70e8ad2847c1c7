//! A full client/server handshake plus a few simulated ticks, run over real
//! loopback TCP sockets rather than in-process mocks, the way
//! `src/transport.rs`'s own unit tests do for a single exchange.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tidewire_core::{
    ClientTransport, DeltaEngine, GameEventBlob, GameLogic, GameStateBlob, InputBlob, InputEntry,
    Packet, PlayerId, ServerSimulationCore, ServerTransport,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(20_500);

fn next_addr() -> SocketAddr {
    let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn wait_for<T>(mut poll: impl FnMut() -> Vec<T>, timeout: Duration) -> Vec<T> {
    let start = std::time::Instant::now();
    loop {
        let got = poll();
        if !got.is_empty() || start.elapsed() > timeout {
            return got;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A game where each player's state is a single counter byte, bumped by one
/// whenever that player submits any non-zero input. Deterministic and
/// trivial to assert on, which is all an integration test over real sockets
/// needs from the game layer.
struct CounterGame;

impl GameLogic for CounterGame {
    fn set_is_server(&mut self, _is_server: bool) {}

    fn init(&mut self, state: &mut GameStateBlob) {
        state.set_bytes(&[0; 8]);
    }

    fn generate_local_input(&self) -> InputBlob {
        InputBlob([1, 0, 0, 0])
    }

    fn simulate_frame(
        &mut self,
        state: &mut GameStateBlob,
        _events: &[GameEventBlob],
        inputs: &HashMap<PlayerId, InputEntry>,
    ) -> Vec<GameEventBlob> {
        let mut bytes = state.as_slice().to_vec();
        for (player_id, entry) in inputs {
            let idx = *player_id as usize;
            if idx < bytes.len() && entry.input.0[0] != 0 {
                bytes[idx] = bytes[idx].wrapping_add(1);
            }
        }
        state.set_bytes(&bytes);
        Vec::new()
    }

    fn compare_states(&self, a: &GameStateBlob, b: &GameStateBlob) -> bool {
        a.as_slice() == b.as_slice()
    }

    fn print_state(&self, _state: &GameStateBlob) {}
}

#[test]
fn client_hello_through_a_few_ticks_over_loopback_tcp() {
    let addr = next_addr();
    let mut server_transport = ServerTransport::bind(addr).unwrap();
    let bound = server_transport.local_addr().unwrap();
    let core = ServerSimulationCore::new(Box::new(CounterGame), DeltaEngine::new());

    let mut client_transport =
        ClientTransport::connect(bound, Duration::from_secs(1)).unwrap();

    let connect_events = wait_for(
        || server_transport.poll().0,
        Duration::from_secs(1),
    );
    assert_eq!(connect_events.len(), 1);

    client_transport
        .send(&Packet::ClientHello {
            client_id: "player-one".to_string(),
        })
        .unwrap();

    let received = wait_for(|| server_transport.poll().1, Duration::from_secs(1));
    assert_eq!(received.len(), 1);
    let handle = received[0].0;
    assert!(matches!(received[0].1, Packet::ClientHello { .. }));

    let player_id: PlayerId = 0;
    server_transport
        .send(
            handle,
            &Packet::ServerAccept {
                player_id: player_id as i32,
                is_reconnection: false,
            },
        )
        .unwrap();
    server_transport
        .send(handle, &Packet::GameStart { player_id })
        .unwrap();
    core.on_player_connected(player_id);

    let accept = wait_for(
        || client_transport.poll().unwrap_or_default(),
        Duration::from_secs(1),
    );
    assert!(accept.iter().any(|p| matches!(p, Packet::ServerAccept { .. })));
    assert!(accept.iter().any(|p| matches!(p, Packet::GameStart { .. })));

    for frame in 0..3u32 {
        client_transport
            .send(&Packet::Input {
                player_id,
                frame,
                input: InputBlob([1, 0, 0, 0]),
            })
            .unwrap();

        let inputs = wait_for(|| server_transport.poll().1, Duration::from_secs(1));
        for (_, packet) in inputs {
            if let Packet::Input {
                player_id,
                frame,
                input,
            } = packet
            {
                core.on_client_input_received(InputEntry {
                    frame,
                    player_id,
                    input,
                });
            }
        }

        let update = core.tick();
        assert_eq!(update.frame, frame + 1);
    }

    let final_state = core.game_state_snapshot();
    assert_eq!(final_state.as_slice()[player_id as usize], 3);
}
