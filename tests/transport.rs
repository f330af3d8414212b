//! 루프백 종단 간 시나리오 테스트
//!
//! 실제 UDP 소켓을 127.0.0.1에 바인딩해 클라이언트/서버 상태 머신을 같은
//! 태스크에서 협력적으로 구동한다. 서버는 `poll_for` 윈도우 동안만 진행하고
//! 클라이언트의 대기 루프가 수면할 때마다 번갈아 실행된다.

use std::time::Duration;

use hero::{Config, Flag, HeroClient, HeroServer, DEFAULT_IDENTITY};

async fn start_server(config: Config) -> (HeroServer, u16) {
    let mut server = HeroServer::new(config);
    server.start(0).await.expect("서버 바인딩");
    let port = server.local_addr().expect("로컬 주소").port();
    (server, port)
}

/// 핸드쉐이크가 끝날 때까지 양쪽을 함께 구동
async fn do_connect(client: &mut HeroClient, server: &mut HeroServer, port: u16) -> bool {
    let (connected, _) = tokio::join!(
        client.connect("127.0.0.1", port),
        server.poll_for(Duration::from_millis(300), |_, _, _, _| {}),
    );
    connected.expect("로컬 소켓 에러 없음")
}

#[tokio::test]
async fn test_handshake_registers_peer() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());

    assert_eq!(server.client_count(), 0);
    assert!(do_connect(&mut client, &mut server, port).await);

    assert!(client.is_connected());
    assert_eq!(server.client_count(), 1);

    // 피어 레코드의 key는 클라이언트가 보낸 CONN requirements와 같다
    let client_port = client.local_addr().expect("클라이언트 주소").port();
    let peer = server.peer("127.0.0.1", client_port).expect("피어 등록");
    assert_eq!(&peer.key[..], &DEFAULT_IDENTITY);
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);

    assert!(client.send(b"hello").await);

    let (reply, _) = tokio::join!(
        client.receive_text(Duration::from_secs(2)),
        server.poll_for(Duration::from_millis(300), |packet, host, port, responder| {
            if packet.flag == Flag::Give {
                let text = packet.payload_text();
                responder.reply(host, port, &format!("Echo: {text}"));
            }
        }),
    );

    assert_eq!(reply.as_deref(), Some("Echo: hello"));

    // 서버는 CONN과 GIVE에 각각 SEEN을, 클라이언트는 에코 GIVE에 SEEN을 보냈다
    assert!(server.stats().acks_sent >= 2);
    assert!(client.stats().acks_sent >= 1);
}

#[tokio::test]
async fn test_large_payload_reassembles() {
    // 조각 사이 간격을 넉넉히 줘서 수신 버퍼 오버플로를 피한다
    let mut client_config = Config::default();
    client_config.fragment_pacing_ms = 5;
    let mut server_config = Config::default();
    server_config.poll_sleep_ms = 1;

    let (mut server, port) = start_server(server_config).await;
    let mut client = HeroClient::new(client_config);
    assert!(do_connect(&mut client, &mut server, port).await);

    let payload = vec![0x41u8; 250_000];

    let mut received: Option<(Flag, Vec<u8>)> = None;
    let (sent, _) = tokio::join!(
        client.send(&payload),
        server.poll_for(Duration::from_millis(800), |packet, _, _, _| {
            received = Some((packet.flag, packet.payload.to_vec()));
        }),
    );
    assert!(sent);
    assert_eq!(client.stats().fragments_sent, 5);

    let (flag, bytes) = received.expect("재조립된 논리 패킷 하나");
    assert_eq!(flag, Flag::Give);
    assert_eq!(bytes.len(), 250_000);
    assert!(bytes.iter().all(|&b| b == 0x41));
}

#[tokio::test]
async fn test_broadcast_reaches_each_client_once() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut first = HeroClient::new(Config::default());
    let mut second = HeroClient::new(Config::default());

    assert!(do_connect(&mut first, &mut server, port).await);
    assert!(do_connect(&mut second, &mut server, port).await);
    assert_eq!(server.client_count(), 2);

    assert_eq!(server.broadcast_text("tick:1").await, 2);

    let reply_a = first.receive_text(Duration::from_secs(1)).await;
    let reply_b = second.receive_text(Duration::from_secs(1)).await;
    assert_eq!(reply_a.as_deref(), Some("tick:1"));
    assert_eq!(reply_b.as_deref(), Some("tick:1"));

    // 각 클라이언트는 정확히 한 번만 받는다
    assert!(first.receive_data(Duration::from_millis(100)).await.is_none());
    assert!(second.receive_data(Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn test_ping_sets_rtt() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);

    let (ok, _) = tokio::join!(
        client.ping(),
        server.poll_for(Duration::from_millis(300), |_, _, _, _| {}),
    );
    assert!(ok);

    let rtt = client.ping_ms().expect("RTT 측정");
    assert!(rtt <= 1000);
}

#[tokio::test]
async fn test_keep_alive_repings_after_interval() {
    let mut client_config = Config::default();
    client_config.keepalive_interval_ms = 50;

    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(client_config);
    assert!(do_connect(&mut client, &mut server, port).await);
    assert!(client.ping_ms().is_none());

    // 핸드쉐이크 이후 keepalive 주기가 이미 지났으므로 첫 keep_alive가 PING을 보낸다
    let (ok, _) = tokio::join!(
        client.keep_alive(),
        server.poll_for(Duration::from_millis(300), |_, _, _, _| {}),
    );
    assert!(ok);
    assert!(client.ping_ms().is_some());

    // 방금 PING을 보냈으므로 주기 안에서는 네트워크를 건드리지 않는다
    let sent_before = client.stats().datagrams_sent;
    assert!(client.keep_alive().await);
    assert_eq!(client.stats().datagrams_sent, sent_before);
}

#[tokio::test]
async fn test_disconnect_removes_peer() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);
    assert_eq!(server.client_count(), 1);

    assert!(client.disconnect());
    assert!(!client.is_connected());

    // 다음 poll에서 STOP이 처리되어 피어가 제거된다
    server.poll_for(Duration::from_millis(200), |_, _, _, _| {}).await;
    assert_eq!(server.client_count(), 0);
}

#[tokio::test]
async fn test_stale_client_cleanup() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);
    assert_eq!(server.client_count(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let removed = server.cleanup_stale_clients(Duration::from_millis(1));
    assert_eq!(removed, 1);
    assert_eq!(server.client_count(), 0);
    assert_eq!(server.stats().peers_evicted, 1);
}

#[tokio::test]
async fn test_command_over_transport() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);

    assert!(client.send_command("MV", &["100.5", "250.3"]).await);

    let mut observed: Option<(String, Vec<String>)> = None;
    server
        .poll_for(Duration::from_millis(300), |packet, _, _, _| {
            observed = Some(hero::command::decode(&packet.payload));
        })
        .await;

    let (mnemonic, args) = observed.expect("커맨드 수신");
    assert_eq!(mnemonic, "MV");
    assert_eq!(args, vec!["100.5", "250.3"]);
}

#[tokio::test]
async fn test_take_request_delivers_resource_id() {
    let (mut server, port) = start_server(Config::default()).await;
    let mut client = HeroClient::new(Config::default());
    assert!(do_connect(&mut client, &mut server, port).await);

    assert!(client.request("/index"));

    let mut observed: Option<(Flag, Vec<u8>)> = None;
    server
        .poll_for(Duration::from_millis(300), |packet, _, _, _| {
            observed = Some((packet.flag, packet.requirements.to_vec()));
        })
        .await;

    let (flag, resource) = observed.expect("TAKE 수신");
    assert_eq!(flag, Flag::Take);
    assert_eq!(resource, b"/index");
}
