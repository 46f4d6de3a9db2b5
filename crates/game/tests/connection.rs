use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::IVec2;
use tilesync::net::rand_u64;
use tilesync::{
    ClientSession, ConnectError, ConnectionManager, ConnectionState, Entity, EntityBody, Inbound,
    NetworkEndpoint, Packet, PacketType, ReliableChannel, ServerSession, SessionConfig, Sign,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn bind_pair() -> (NetworkEndpoint, NetworkEndpoint, SocketAddr) {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let client_addr: SocketAddr = format!("127.0.0.1:{}", port + 1).parse().unwrap();

    let server = NetworkEndpoint::bind(server_addr).unwrap();
    let mut client = NetworkEndpoint::bind(client_addr).unwrap();
    client.set_remote(server_addr);
    (server, client, server_addr)
}

fn wait_for_packet(
    endpoint: &mut NetworkEndpoint,
    timeout_ms: u64,
) -> Option<Vec<(Packet, SocketAddr)>> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        let received = endpoint.receive().unwrap();
        if !received.is_empty() {
            return Some(received);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn request(username: &str) -> PacketType {
    PacketType::ConnectionRequest {
        client_salt: rand_u64(),
        username: username.into(),
        display_name: username.to_uppercase(),
    }
}

#[test]
fn test_connection_handshake_full_flow() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let mut connections = ConnectionManager::new(32);
    let mut session = ServerSession::new(SessionConfig::default());

    let client_salt = rand_u64();
    client_endpoint
        .send(&Packet::new(PacketType::ConnectionRequest {
            client_salt,
            username: "alice_01".into(),
            display_name: "Alice".into(),
        }))
        .unwrap();

    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    assert_eq!(received.len(), 1);
    let (packet, from_addr) = &received[0];
    let PacketType::ConnectionRequest {
        client_salt: salt,
        username,
        display_name,
    } = &packet.payload
    else {
        panic!("Expected ConnectionRequest");
    };
    assert_eq!(*salt, client_salt);

    let client = connections.get_or_create_pending(*from_addr, *salt).unwrap();
    session
        .approve(client.client_id, username, display_name)
        .unwrap();
    let challenge = PacketType::ConnectionChallenge {
        server_salt: client.server_salt,
        challenge: client.combined_salt(),
    };
    server_endpoint.send_payload(challenge, *from_addr).unwrap();

    let received = wait_for_packet(&mut client_endpoint, 200).expect("No packet received");
    let PacketType::ConnectionChallenge {
        server_salt,
        challenge,
    } = received[0].0.payload
    else {
        panic!("Expected ConnectionChallenge");
    };
    let expected = client_salt ^ server_salt;
    assert_eq!(challenge, expected);
    client_endpoint
        .send(&Packet::new(PacketType::ChallengeResponse {
            combined_salt: expected,
        }))
        .unwrap();

    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::ChallengeResponse { combined_salt } = packet.payload else {
        panic!("Expected ChallengeResponse");
    };
    let client = connections.get_by_addr_mut(from_addr).unwrap();
    assert_eq!(combined_salt, client.combined_salt());
    client.state = ConnectionState::Connected;
    let client_id = client.client_id;
    server_endpoint
        .send_payload(PacketType::ConnectionAccepted { client_id }, *from_addr)
        .unwrap();
    assert!(session.on_connected(client_id));

    let received = wait_for_packet(&mut client_endpoint, 200).expect("No packet received");
    match received[0].0.payload {
        PacketType::ConnectionAccepted { client_id } => assert!(client_id > 0),
        ref other => panic!("Expected ConnectionAccepted, got {:?}", other),
    }

    assert_eq!(connections.connected_count(), 1);
    assert!(session.player_for(client_id).is_some());
}

#[test]
fn test_connection_denied_server_full() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let mut connections = ConnectionManager::new(0);

    client_endpoint
        .send(&Packet::new(request("alice")))
        .unwrap();

    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::ConnectionRequest { client_salt, .. } = packet.payload else {
        panic!("Expected ConnectionRequest");
    };
    let reason = connections
        .get_or_create_pending(*from_addr, client_salt)
        .unwrap_err();
    assert_eq!(reason, ConnectError::ServerFull);
    server_endpoint
        .send_payload(
            PacketType::ConnectionDenied {
                reason: reason.to_string(),
            },
            *from_addr,
        )
        .unwrap();

    let received = wait_for_packet(&mut client_endpoint, 200).expect("No packet received");
    match &received[0].0.payload {
        PacketType::ConnectionDenied { reason } => assert_eq!(reason, "Server full"),
        other => panic!("Expected ConnectionDenied, got {:?}", other),
    }
}

#[test]
fn test_duplicate_username_denied_over_the_wire() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let mut connections = ConnectionManager::new(8);
    let mut session = ServerSession::new(SessionConfig::default());
    session.approve(99, "alice", "Alice").unwrap();
    session.on_connected(99);

    client_endpoint
        .send(&Packet::new(request("alice")))
        .unwrap();

    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::ConnectionRequest {
        client_salt,
        username,
        display_name,
    } = &packet.payload
    else {
        panic!("Expected ConnectionRequest");
    };
    let client_id = connections
        .get_or_create_pending(*from_addr, *client_salt)
        .unwrap()
        .client_id;
    let denied = session
        .approve(client_id, username, display_name)
        .unwrap_err();
    connections.remove(client_id);
    server_endpoint
        .send_payload(
            PacketType::ConnectionDenied {
                reason: denied.to_string(),
            },
            *from_addr,
        )
        .unwrap();

    let received = wait_for_packet(&mut client_endpoint, 200).expect("No packet received");
    match &received[0].0.payload {
        PacketType::ConnectionDenied { reason } => {
            assert_eq!(reason, "player 'alice' already exists")
        }
        other => panic!("Expected ConnectionDenied, got {:?}", other),
    }
    assert_eq!(connections.total_count(), 0);
}

#[test]
fn test_invalid_challenge_response_rejected() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let mut connections = ConnectionManager::new(8);

    client_endpoint
        .send(&Packet::new(request("mallory")))
        .unwrap();
    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::ConnectionRequest { client_salt, .. } = packet.payload else {
        panic!("Expected ConnectionRequest");
    };
    connections
        .get_or_create_pending(*from_addr, client_salt)
        .unwrap();

    client_endpoint
        .send(&Packet::new(PacketType::ChallengeResponse {
            combined_salt: 0xBAD,
        }))
        .unwrap();
    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::ChallengeResponse { combined_salt } = packet.payload else {
        panic!("Expected ChallengeResponse");
    };
    let client = connections.get_by_addr(from_addr).unwrap();
    assert_ne!(combined_salt, client.combined_salt());
    assert_eq!(client.state, ConnectionState::Connecting);
    assert_eq!(connections.connected_count(), 0);
}

#[test]
fn test_ping_pong() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();

    client_endpoint
        .send(&Packet::new(PacketType::Ping { timestamp: 12345 }))
        .unwrap();
    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    let (packet, from_addr) = &received[0];
    let PacketType::Ping { timestamp } = packet.payload else {
        panic!("Expected Ping");
    };
    server_endpoint
        .send_payload(PacketType::Pong { timestamp }, *from_addr)
        .unwrap();

    let received = wait_for_packet(&mut client_endpoint, 200).expect("No packet received");
    assert_eq!(received[0].0.payload, PacketType::Pong { timestamp: 12345 });
}

#[test]
fn test_disconnect_packet() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();

    client_endpoint
        .send(&Packet::new(PacketType::Disconnect {
            reason: "bye".into(),
        }))
        .unwrap();
    let received = wait_for_packet(&mut server_endpoint, 200).expect("No packet received");
    assert_eq!(
        received[0].0.payload,
        PacketType::Disconnect {
            reason: "bye".into()
        }
    );
}

#[test]
fn test_garbage_datagrams_are_rejected() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut server_endpoint = NetworkEndpoint::bind(server_addr).unwrap();
    let raw = std::net::UdpSocket::bind(format!("127.0.0.1:{}", port + 1)).unwrap();

    raw.send_to(&[0xFF; 64], server_addr).unwrap();
    raw.send_to(&[1, 2, 3], server_addr).unwrap();

    let start = Instant::now();
    while server_endpoint.stats().packets_rejected < 2
        && start.elapsed() < Duration::from_millis(200)
    {
        assert!(server_endpoint.receive().unwrap().is_empty());
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(server_endpoint.stats().packets_rejected, 2);
    assert_eq!(server_endpoint.stats().packets_received, 0);
}

#[test]
fn test_pinned_endpoint_drops_strangers() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let stranger_addr: SocketAddr = format!("127.0.0.1:{}", next_port()).parse().unwrap();
    let mut stranger = NetworkEndpoint::bind(stranger_addr).unwrap();
    let client_addr = client_endpoint.local_addr();

    stranger
        .send_payload(PacketType::Pong { timestamp: 1 }, client_addr)
        .unwrap();
    server_endpoint
        .send_payload(PacketType::Pong { timestamp: 2 }, client_addr)
        .unwrap();

    let received = wait_for_packet(&mut client_endpoint, 200).expect("no packet from server");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.payload, PacketType::Pong { timestamp: 2 });

    let start = Instant::now();
    while client_endpoint.stats().packets_rejected < 1
        && start.elapsed() < Duration::from_millis(200)
    {
        assert!(client_endpoint.receive().unwrap().is_empty());
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(client_endpoint.stats().packets_rejected, 1);
}

/// Carries a hail far larger than one datagram over real sockets and checks
/// it reassembles into a replica identical to the server world.
#[test]
fn test_fragmented_hail_over_udp() {
    let (mut server_endpoint, mut client_endpoint, _) = bind_pair();
    let mut session = ServerSession::new(SessionConfig::default());
    for i in 0..200 {
        session
            .spawn(Entity::spawn(
                IVec2::new(i, -i),
                EntityBody::Sign(Sign {
                    text: format!("sign number {}", i),
                }),
            ))
            .unwrap();
    }
    session.approve(1, "alice", "Alice").unwrap();
    session.on_connected(1);

    let client_addr = client_endpoint.local_addr();
    let mut server_channel = ReliableChannel::new(Duration::from_millis(20));
    for outbound in session.drain_outbound() {
        assert_eq!(outbound.connection, 1);
        server_channel.send(&outbound.payload);
    }

    let mut client_channel = ReliableChannel::default();
    let mut client = ClientSession::new("alice", session.config());
    let mut inbound = Vec::new();

    let start = Instant::now();
    while server_channel.unacked_count() > 0 && start.elapsed() < Duration::from_secs(2) {
        for payload in server_channel.outgoing(Instant::now()) {
            server_endpoint.send_payload(payload, client_addr).unwrap();
        }
        thread::sleep(Duration::from_millis(1));

        for (packet, _) in client_endpoint.receive().unwrap() {
            if let PacketType::Reliable {
                sequence,
                last,
                payload,
            } = packet.payload
            {
                for message in client_channel.receive(sequence, last, payload) {
                    inbound.push(client.handle_message(&message).unwrap());
                }
            }
        }
        if let Some(ack) = client_channel.take_ack() {
            client_endpoint.send(&Packet::new(ack)).unwrap();
        }
        thread::sleep(Duration::from_millis(1));

        for (packet, _) in server_endpoint.receive().unwrap() {
            if let PacketType::Ack { next_expected } = packet.payload {
                server_channel.on_ack(next_expected);
            }
        }
    }

    assert_eq!(server_channel.unacked_count(), 0);
    assert_eq!(inbound[0], Inbound::Joined(200));
    assert_eq!(client.world().len(), 201);
    for entity in session.world().entities() {
        assert_eq!(client.world().get(entity.id()), Some(entity));
    }
    assert_eq!(
        client.local_player().map(Entity::id),
        session.player_for(1).map(Entity::id)
    );
}

#[test]
fn test_multiple_clients_connect() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut server_endpoint = NetworkEndpoint::bind(server_addr).unwrap();
    let mut connections = ConnectionManager::new(8);

    let mut clients: Vec<NetworkEndpoint> = (1..=3)
        .map(|offset| {
            let addr: SocketAddr = format!("127.0.0.1:{}", port + offset).parse().unwrap();
            let mut endpoint = NetworkEndpoint::bind(addr).unwrap();
            endpoint.set_remote(server_addr);
            endpoint
        })
        .collect();

    for (i, client) in clients.iter_mut().enumerate() {
        client
            .send(&Packet::new(request(&format!("player{}", i))))
            .unwrap();
    }

    let start = Instant::now();
    while connections.total_count() < 3 && start.elapsed() < Duration::from_millis(500) {
        for (packet, addr) in server_endpoint.receive().unwrap() {
            if let PacketType::ConnectionRequest { client_salt, .. } = packet.payload {
                connections.get_or_create_pending(addr, client_salt).unwrap();
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(connections.total_count(), 3);
    let mut ids = connections.client_ids();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
