//! Integration tests for connection teardown.

use std::net::SocketAddr;
use std::time::Duration;

use microtcp::{
    config::Config,
    connection::{ConnError, Connection},
    packet::{flags, Header, Packet},
    simulator::{SimSocket, Simulator},
    socket::{Datagram, Socket},
    state::ConnectionState,
};

const PEER_ISN: u32 = 9000;

fn fast() -> Config {
    Config {
        ack_timeout: Duration::from_millis(30),
        handshake_timeout: Duration::from_millis(200),
        close_timeout: Duration::from_millis(200),
        ..Config::default()
    }
}

async fn established() -> (Connection<SimSocket>, Connection<SimSocket>) {
    let sim = Simulator::lossless();
    let (a, b) = sim.pair();
    let server_addr = b.local_addr().unwrap();
    let mut client = Connection::with_config(Socket::new(a).unwrap(), fast()).unwrap();
    let mut server = Connection::with_config(Socket::new(b).unwrap(), fast()).unwrap();
    server.bind(server_addr).unwrap();
    let (c, s) = tokio::join!(client.connect(server_addr), server.accept());
    c.unwrap();
    s.unwrap();
    (client, server)
}

/// Connection handshaken with a raw socket.
async fn scripted() -> (Connection<SimSocket>, Socket<SimSocket>, SocketAddr) {
    let sim = Simulator::lossless();
    let (a, b) = sim.pair();
    let mut conn = Connection::with_config(Socket::new(a).unwrap(), fast()).unwrap();
    let peer = Socket::new(b).unwrap();
    let server_addr = peer.local_addr;

    let script = async {
        let (syn, from) = peer.recv_from().await.unwrap();
        let syn_ack =
            Packet::control(PEER_ISN, flags::SYN_ACK, syn.header.seq.wrapping_add(1), 8192);
        peer.send_to(&syn_ack, from).await.unwrap();
        peer.recv_from().await.unwrap();
        from
    };
    let (result, conn_addr) = tokio::join!(conn.connect(server_addr), script);
    result.unwrap();
    (conn, peer, conn_addr)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initiator_close_reaches_closed_on_both_sides() {
    let (mut client, mut server) = established().await;
    let client_seq = client.seq_number();
    let server_seq = server.seq_number();

    let initiator = async {
        client.send(b"goodbye").await.unwrap();
        client.shutdown().await
    };
    let responder = async {
        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = server.recv(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"goodbye");
        assert_eq!(server.state(), ConnectionState::ClosingAsResponder);
        server.shutdown().await
    };
    let (c, s) = tokio::join!(initiator, responder);
    c.expect("initiator teardown failed");
    s.expect("responder teardown failed");

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.state(), ConnectionState::Closed);
    assert!(client.is_released());
    assert!(server.is_released());
    // Data plus one for each FIN.
    assert_eq!(client.seq_number(), client_seq.wrapping_add(7 + 1));
    assert_eq!(server.seq_number(), server_seq.wrapping_add(1));
    assert_eq!(client.ack_number(), server.seq_number());
    assert_eq!(server.ack_number(), client.seq_number());
}

#[tokio::test]
async fn operations_after_close_fail() {
    let (mut client, mut server) = established().await;
    let responder = async {
        let mut buf = [0u8; 8];
        while server.recv(&mut buf).await.unwrap() > 0 {}
        server.shutdown().await.unwrap();
    };
    let (c, ()) = tokio::join!(client.shutdown(), responder);
    c.unwrap();

    assert!(matches!(
        client.send(b"late").await,
        Err(ConnError::BadState(ConnectionState::Closed))
    ));
    let mut buf = [0u8; 8];
    assert!(matches!(
        server.recv(&mut buf).await,
        Err(ConnError::BadState(ConnectionState::Closed))
    ));
    // Closing twice is harmless.
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_without_handshake_releases_transport() {
    let sim = Simulator::lossless();
    let (a, b) = sim.pair();
    let b_addr = b.local_addr().unwrap();

    let mut fresh = Connection::new(Socket::new(a).unwrap());
    fresh.shutdown().await.unwrap();
    assert_eq!(fresh.state(), ConnectionState::Closed);
    assert!(fresh.is_released());

    let mut bound = Connection::new(Socket::new(b).unwrap());
    bound.bind(b_addr).unwrap();
    bound.shutdown().await.unwrap();
    assert_eq!(bound.state(), ConnectionState::Closed);
    assert!(matches!(bound.accept().await, Err(ConnError::BadState(_))));
}

#[tokio::test]
async fn shutdown_of_invalid_connection_reports_it() {
    let sim = Simulator::lossless();
    let (a, _b) = sim.pair();
    let mut conn = Connection::new(Socket::new(a).unwrap());
    conn.bind("10.1.1.1:1".parse().unwrap()).unwrap_err();

    assert!(matches!(conn.shutdown().await, Err(ConnError::Invalid)));
    assert!(conn.is_released());
    assert_eq!(conn.state(), ConnectionState::Invalid);
}

/// Wire-level check of the initiator side, including a stale ACK left over
/// from the data phase.
#[tokio::test]
async fn initiator_sequence_on_the_wire() {
    let (mut conn, peer, conn_addr) = scripted().await;
    let fin_seq = conn.seq_number();
    let peer_next = PEER_ISN + 1;

    let script = async {
        let (fin, _) = peer.recv_from().await.unwrap();
        assert!(fin.header.is(flags::FIN_ACK));
        assert_eq!(fin.header.seq, fin_seq);
        assert_eq!(fin.header.ack, peer_next);

        let stale = Packet::control(peer_next, flags::ACK, fin_seq, 8192);
        peer.send_to(&stale, conn_addr).await.unwrap();
        let fin_ack = Packet::control(peer_next, flags::ACK, fin_seq + 1, 8192);
        peer.send_to(&fin_ack, conn_addr).await.unwrap();
        let own_fin = Packet::control(peer_next, flags::FIN_ACK, fin_seq + 1, 8192);
        peer.send_to(&own_fin, conn_addr).await.unwrap();

        let (last, _) = peer.recv_from().await.unwrap();
        assert!(last.header.is(flags::ACK));
        assert_eq!(last.header.seq, fin_seq + 1);
        assert_eq!(last.header.ack, peer_next + 1);
    };
    let (result, ()) = tokio::join!(conn.shutdown(), script);

    result.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
}

/// The responder acknowledges a FIN straight away and reports end of stream.
#[tokio::test]
async fn peer_fin_ends_the_stream() {
    let (mut conn, peer, conn_addr) = scripted().await;
    let next = PEER_ISN + 1;
    let seq_before = conn.seq_number();

    let script = async {
        let data = Packet {
            header: Header::new(next + 3, flags::ACK, 3, seq_before, 8192),
            payload: b"abc".to_vec(),
        };
        peer.send_to(&data, conn_addr).await.unwrap();
        let fin = Packet::control(next + 3, flags::FIN_ACK, 0, 8192);
        peer.send_to(&fin, conn_addr).await.unwrap();

        let (data_ack, _) = peer.recv_from().await.unwrap();
        assert_eq!(data_ack.header.ack, next + 3);
        let (fin_ack, _) = peer.recv_from().await.unwrap();
        assert!(fin_ack.header.is(flags::ACK));
        assert_eq!(fin_ack.header.ack, next + 4);
    };
    let mut buf = [0u8; 64];
    let (n, ()) = tokio::join!(conn.recv(&mut buf), script);

    assert_eq!(&buf[..n.unwrap()], b"abc");
    assert_eq!(conn.state(), ConnectionState::ClosingAsResponder);
    assert_eq!(conn.recv(&mut buf).await.unwrap(), 0);
    assert!(matches!(
        conn.send(b"no").await,
        Err(ConnError::BadState(ConnectionState::ClosingAsResponder))
    ));
    assert_eq!(conn.seq_number(), seq_before);
}

#[tokio::test]
async fn unexpected_segment_during_close_is_fatal() {
    let (mut conn, peer, conn_addr) = scripted().await;

    let script = async {
        let (fin, _) = peer.recv_from().await.unwrap();
        let wrong = Packet::control(1, flags::SYN, fin.header.seq + 1, 8192);
        peer.send_to(&wrong, conn_addr).await.unwrap();
    };
    let (result, ()) = tokio::join!(conn.shutdown(), script);

    assert!(matches!(result, Err(ConnError::Protocol(_))));
    assert_eq!(conn.state(), ConnectionState::Invalid);
    assert!(conn.is_released());
}

#[tokio::test]
async fn silent_peer_during_close_times_out() {
    let (mut conn, _peer, _) = scripted().await;
    let result = conn.shutdown().await;
    assert!(matches!(result, Err(ConnError::Timeout(_))));
    assert_eq!(conn.state(), ConnectionState::Invalid);
}
