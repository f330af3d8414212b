//! HERO 클라이언트
//!
//! - CONN/SEEN 핸드쉐이크와 연결 상태 머신
//! - 수신한 데이터 패킷에 즉시 SEEN 응답
//! - PING/PONG 기반 RTT 측정과 keepalive
//!
//! 모든 대기는 poll 루프 안의 짧은 수면(≤10ms)으로 이뤄지며 백그라운드
//! 태스크를 만들지 않는다.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::command;
use crate::endpoint::{self, Endpoint};
use crate::error::Result;
use crate::fragment::{Fragmenter, Reassembler};
use crate::packet::{Flag, Packet};
use crate::stats::TransportStats;
use crate::{Config, CHUNK_CAPACITY};

/// 클라이언트 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// HERO 클라이언트
pub struct HeroClient {
    config: Config,
    endpoint: Option<Endpoint>,
    server_addr: Option<SocketAddr>,
    state: ClientState,
    seq: u16,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    /// ping 대기 중 classify가 전달 대상으로 분류한 패킷
    pending: VecDeque<Packet>,
    rtt_ms: Option<u64>,
    last_ping: Instant,
    ping_sent_at: Option<Instant>,
    stats: TransportStats,
}

impl HeroClient {
    /// 새 클라이언트 생성. 소켓은 connect에서 바인딩한다.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            endpoint: None,
            server_addr: None,
            state: ClientState::Idle,
            seq: 0,
            fragmenter: Fragmenter::new(),
            reassembler: Reassembler::new(),
            pending: VecDeque::new(),
            rtt_ms: None,
            last_ping: Instant::now(),
            ping_sent_at: None,
            stats: TransportStats::new(),
        }
    }

    fn next_seq(&mut self) -> u16 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }

    /// 서버에 연결
    ///
    /// CONN(requirements=identity)을 보내고 연결 타임아웃 동안 SEEN을
    /// 기다린다. 타임아웃은 `Ok(false)`, 로컬 소켓 에러는 `Err`.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<bool> {
        let server_addr = endpoint::resolve(host, port)?;
        let ep = Endpoint::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        self.endpoint = Some(ep);
        self.server_addr = Some(server_addr);
        self.state = ClientState::Connecting;

        let seq = self.next_seq();
        let conn = Packet::new(
            Flag::Conn,
            seq,
            self.config.identity.clone(),
            Bytes::new(),
        );
        if !self.send_packet(&conn, server_addr) {
            self.state = ClientState::Closed;
            return Ok(false);
        }
        debug!("CONN 전송: {} (seq={})", server_addr, seq);

        let deadline = Instant::now() + self.config.connect_timeout();
        loop {
            while let Some((bytes, addr)) = self.recv_raw() {
                let packet = match Packet::decode(&bytes) {
                    Ok(p) => p,
                    Err(_) => {
                        self.stats.decode_failures += 1;
                        continue;
                    }
                };
                if addr == server_addr && packet.flag == Flag::Seen {
                    self.state = ClientState::Connected;
                    self.last_ping = Instant::now();
                    info!("연결 완료: {}", server_addr);
                    return Ok(true);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.config.poll_sleep()).await;
        }

        warn!("연결 타임아웃: {}", server_addr);
        self.state = ClientState::Closed;
        Ok(false)
    }

    /// 데이터 전송. 연결 상태가 아니면 네트워크를 건드리지 않고 false.
    ///
    /// 청크 용량을 넘는 페이로드는 자동으로 조각화된다.
    pub async fn send(&mut self, payload: &[u8]) -> bool {
        self.send_keyed(payload, &[]).await
    }

    /// 수신자 라우팅 키를 requirements에 실어 데이터 전송
    ///
    /// 조각화 경로에서는 requirements가 비므로 라우팅 키가 실리지 않는다.
    pub async fn send_keyed(&mut self, payload: &[u8], recipient_key: &[u8]) -> bool {
        if self.state != ClientState::Connected {
            return false;
        }
        let Some(addr) = self.server_addr else {
            return false;
        };

        if payload.len() <= CHUNK_CAPACITY {
            let seq = self.next_seq();
            let packet = Packet::new(
                Flag::Give,
                seq,
                Bytes::copy_from_slice(recipient_key),
                Bytes::copy_from_slice(payload),
            );
            return self.send_packet(&packet, addr);
        }

        self.send_fragmented(Flag::Give, payload, addr).await
    }

    /// 텍스트 전송
    pub async fn send_text(&mut self, text: &str) -> bool {
        self.send(text.as_bytes()).await
    }

    /// 커맨드 전송 (니모닉은 레지스트리로 해석)
    pub async fn send_command(&mut self, mnemonic: &str, args: &[&str]) -> bool {
        let bytes = command::encode(mnemonic, args);
        self.send(&bytes).await
    }

    /// 리소스 요청(TAKE). requirements에 리소스 식별자를 싣는다.
    pub fn request(&mut self, resource: &str) -> bool {
        if self.state != ClientState::Connected {
            return false;
        }
        let Some(addr) = self.server_addr else {
            return false;
        };
        let seq = self.next_seq();
        let packet = Packet::new(
            Flag::Take,
            seq,
            Bytes::copy_from_slice(resource.as_bytes()),
            Bytes::new(),
        );
        self.send_packet(&packet, addr)
    }

    async fn send_fragmented(&mut self, flag: Flag, payload: &[u8], addr: SocketAddr) -> bool {
        let packets = match self.fragmenter.split(flag, payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("조각화 실패: {}", e);
                return false;
            }
        };
        debug!("페이로드 {} bytes → {} 조각", payload.len(), packets.len());

        let pacing = self.config.fragment_pacing();
        let mut ok = true;
        for packet in &packets {
            ok &= self.send_packet(packet, addr);
            self.stats.fragments_sent += 1;
            if !pacing.is_zero() {
                sleep(pacing).await;
            }
        }
        ok
    }

    /// 패킷 수신. timeout 동안 poll하며 전달 대상인 첫 패킷을 반환.
    pub async fn receive(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            let swept = self.reassembler.sweep(self.config.reassembly_timeout());
            self.stats.reassembly_timeouts += swept as u64;

            if let Some(packet) = self.try_receive() {
                return Some(packet);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(self.config.poll_sleep()).await;
        }
    }

    /// 대기 없이 수신 큐를 한 번 비운다
    pub fn try_receive(&mut self) -> Option<Packet> {
        if let Some(packet) = self.pending.pop_front() {
            return Some(packet);
        }
        while let Some((bytes, addr)) = self.recv_raw() {
            match Packet::decode(&bytes) {
                Ok(packet) => {
                    if let Some(deliverable) = self.classify(packet, addr) {
                        return Some(deliverable);
                    }
                }
                Err(_) => self.stats.decode_failures += 1,
            }
        }
        None
    }

    /// 데이터 패킷(GIVE/TAKE)만 수신. SEEN 같은 제어 패킷은 건너뛴다.
    pub async fn receive_data(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.receive(remaining).await?;
            if matches!(packet.flag, Flag::Give | Flag::Take) {
                return Some(packet);
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// 텍스트 수신 (데이터 패킷만 대상)
    pub async fn receive_text(&mut self, timeout: Duration) -> Option<String> {
        self.receive_data(timeout).await.map(|p| p.payload_text())
    }

    /// 커맨드 수신 (데이터 패킷만 대상)
    pub async fn receive_command(&mut self, timeout: Duration) -> Option<(String, Vec<String>)> {
        self.receive_data(timeout)
            .await
            .map(|p| command::decode(&p.payload))
    }

    /// 인바운드 패킷 분류. Some이면 호출자에게 전달.
    fn classify(&mut self, packet: Packet, addr: SocketAddr) -> Option<Packet> {
        // FRAG는 먼저 재조립기로. 완성 전까지는 조용히 소비.
        let packet = if packet.flag == Flag::Frag {
            let done = self.reassembler.accept(&packet)?;
            self.stats.messages_reassembled += 1;
            done
        } else {
            packet
        };

        match packet.flag {
            Flag::Pong => {
                if let Some(sent) = self.ping_sent_at.take() {
                    let rtt = sent.elapsed().as_millis() as u64;
                    self.rtt_ms = Some(rtt);
                    debug!("PONG 수신: rtt={}ms", rtt);
                }
                None
            }
            Flag::Ping => {
                // 상대측 keepalive 질의에 응답
                let pong = Packet::control(Flag::Pong, packet.seq);
                self.send_packet(&pong, addr);
                None
            }
            Flag::Conn | Flag::Stop => None,
            // ack는 확인 응답 없이 그대로 전달
            Flag::Seen => Some(packet),
            _ => {
                // 데이터 패킷: 즉시 SEEN 응답 후 전달
                let ack = Packet::control(Flag::Seen, packet.seq);
                if self.send_packet(&ack, addr) {
                    self.stats.acks_sent += 1;
                }
                Some(packet)
            }
        }
    }

    /// PING을 보내고 최대 ping 타임아웃 동안 PONG을 대기. 성공 시 RTT 갱신.
    ///
    /// 대기 중 도착한 다른 전달 대상 패킷은 내부 큐에 쌓여 다음 receive가
    /// 돌려준다.
    pub async fn ping(&mut self) -> bool {
        if self.state != ClientState::Connected {
            return false;
        }
        let Some(addr) = self.server_addr else {
            return false;
        };

        let seq = self.next_seq();
        let sent_at = Instant::now();
        self.ping_sent_at = Some(sent_at);
        self.last_ping = sent_at;
        if !self.send_packet(&Packet::control(Flag::Ping, seq), addr) {
            self.ping_sent_at = None;
            return false;
        }

        let deadline = sent_at + self.config.ping_timeout();
        loop {
            while let Some((bytes, from)) = self.recv_raw() {
                match Packet::decode(&bytes) {
                    Ok(packet) => {
                        if let Some(deliverable) = self.classify(packet, from) {
                            self.pending.push_back(deliverable);
                        }
                    }
                    Err(_) => self.stats.decode_failures += 1,
                }
                if self.ping_sent_at.is_none() {
                    return true; // PONG이 classify에서 처리됨
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.config.poll_sleep()).await;
        }

        self.ping_sent_at = None;
        warn!("PING 타임아웃 (seq={})", seq);
        false
    }

    /// 마지막 PING 이후 keepalive 주기가 지났으면 PING을 다시 보낸다
    pub async fn keep_alive(&mut self) -> bool {
        if self.state != ClientState::Connected {
            return false;
        }
        if self.last_ping.elapsed() < self.config.keepalive_interval() {
            return true;
        }
        self.ping().await
    }

    /// STOP을 보내고 연결 종료. 응답을 기다리지 않는다.
    pub fn disconnect(&mut self) -> bool {
        if self.state != ClientState::Connected {
            self.state = ClientState::Closed;
            return false;
        }
        let Some(addr) = self.server_addr else {
            self.state = ClientState::Closed;
            return false;
        };

        let seq = self.next_seq();
        let ok = self.send_packet(&Packet::control(Flag::Stop, seq), addr);
        self.state = ClientState::Closed;
        info!("연결 종료: seq={}", seq);
        ok
    }

    /// 연결 여부
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// 현재 상태
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// 최근 PING/PONG 왕복 시간 (밀리초)
    pub fn ping_ms(&self) -> Option<u64> {
        self.rtt_ms
    }

    /// 현재 시퀀스 카운터
    pub fn sequence(&self) -> u16 {
        self.seq
    }

    /// 전송 통계
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// 바인딩된 로컬 주소
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().map(Endpoint::local_addr)
    }

    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) -> bool {
        let Some(ep) = self.endpoint.as_ref() else {
            return false;
        };
        let bytes = match packet.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!("인코딩 실패: {}", e);
                return false;
            }
        };
        let ok = ep.send(&bytes, addr);
        if ok {
            self.stats.record_send(bytes.len());
        }
        ok
    }

    fn recv_raw(&mut self) -> Option<(Bytes, SocketAddr)> {
        let (bytes, addr) = self.endpoint.as_ref()?.recv()?;
        self.stats.record_recv(bytes.len());
        Some((bytes, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect_is_refused() {
        let mut client = HeroClient::new(Config::default());
        assert_eq!(client.state(), ClientState::Idle);

        assert!(!client.send(b"data").await);
        assert!(!client.request("/index"));
        assert!(!client.ping().await);
        assert_eq!(client.stats().datagrams_sent, 0);
    }

    #[tokio::test]
    async fn test_connect_timeout_closes() {
        let mut config = Config::default();
        config.connect_timeout_ms = 50;
        let mut client = HeroClient::new(config);

        // 응답할 서버가 없는 포트
        let connected = client.connect("127.0.0.1", 1).await.unwrap();
        assert!(!connected);
        assert_eq!(client.state(), ClientState::Closed);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut client = HeroClient::new(Config::default());
        client.seq = u16::MAX;
        assert_eq!(client.next_seq(), u16::MAX);
        assert_eq!(client.next_seq(), 0);
    }
}
