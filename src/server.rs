//! HERO 서버
//!
//! - `"host:port"` 키 기반 피어 레지스트리
//! - 수신한 모든 데이터 패킷에 SEEN(seq) 응답 (SEEN/PONG은 확인하지 않음)
//! - PING에 PONG 응답, STOP 처리, stale 피어 정리
//!
//! poll은 호출자 주도이며 수신 윈도우 동안만 진행한다. 백그라운드 태스크는
//! 만들지 않는다.

use std::collections::HashMap;
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

/// 서버가 추적하는 원격 피어
#[derive(Debug, Clone)]
pub struct Peer {
    pub host: String,
    pub port: u16,

    /// CONN requirements에서 복사한 피어 식별 바이트
    pub key: Bytes,

    /// 마지막 인바운드 시각
    pub last_seen: Instant,

    /// 마지막 PING 수신 시각
    pub last_ping: Instant,
}

fn peer_key(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// HERO 서버
pub struct HeroServer {
    config: Config,
    endpoint: Option<Endpoint>,
    peers: HashMap<String, Peer>,
    seq: u16,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    running: bool,
    stats: TransportStats,
}

impl HeroServer {
    /// 새 서버 생성. 소켓은 start에서 바인딩한다.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            endpoint: None,
            peers: HashMap::new(),
            seq: 0,
            fragmenter: Fragmenter::new(),
            reassembler: Reassembler::new(),
            running: false,
            stats: TransportStats::new(),
        }
    }

    /// 지정 포트에 바인딩하고 서버 시작. 포트 0이면 OS가 고른다.
    pub async fn start(&mut self, port: u16) -> Result<()> {
        let ep = Endpoint::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        info!("HERO 서버 시작: {}", ep.local_addr());
        self.endpoint = Some(ep);
        self.running = true;
        Ok(())
    }

    /// 서버 정지. 소켓과 피어 레지스트리를 비운다.
    pub fn stop(&mut self) {
        self.running = false;
        self.endpoint = None;
        self.peers.clear();
        info!("HERO 서버 정지");
    }

    /// 기본 수신 윈도우 동안 인바운드를 처리
    pub async fn poll<F>(&mut self, handler: F) -> usize
    where
        F: FnMut(&Packet, &str, u16, &mut Responder<'_>),
    {
        let window = self.config.receive_timeout();
        self.poll_for(window, handler).await
    }

    /// 수신 윈도우 동안 인바운드를 처리. 핸들러에 전달한 패킷 수를 반환.
    ///
    /// CONN/STOP/PING/SEEN/PONG은 내부에서 소비하고 FRAG는 재조립기로
    /// 보낸다. 전달 대상 패킷마다 핸들러가 `(packet, host, port, responder)`로
    /// 호출되며, responder는 호출 동안만 서버의 송신 능력을 빌린다.
    pub async fn poll_for<F>(&mut self, window: Duration, mut handler: F) -> usize
    where
        F: FnMut(&Packet, &str, u16, &mut Responder<'_>),
    {
        if !self.running {
            return 0;
        }

        let deadline = Instant::now() + window;
        let mut delivered = 0;

        loop {
            let swept = self.reassembler.sweep(self.config.reassembly_timeout());
            self.stats.reassembly_timeouts += swept as u64;
            let stale = self.config.peer_stale_timeout();
            self.cleanup_stale_clients(stale);

            while let Some((bytes, addr)) = self.recv_raw() {
                let packet = match Packet::decode(&bytes) {
                    Ok(p) => p,
                    Err(_) => {
                        self.stats.decode_failures += 1;
                        continue;
                    }
                };

                if let Some(deliverable) = self.classify(packet, addr) {
                    delivered += 1;
                    let host = addr.ip().to_string();
                    let Some(ep) = self.endpoint.as_ref() else {
                        break;
                    };
                    let mut responder = Responder {
                        endpoint: ep,
                        seq: &mut self.seq,
                        fragmenter: &mut self.fragmenter,
                        config: &self.config,
                        stats: &mut self.stats,
                    };
                    handler(&deliverable, &host, addr.port(), &mut responder);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.config.poll_sleep()).await;
        }

        delivered
    }

    /// 인바운드 패킷 분류. Some이면 핸들러에 전달.
    fn classify(&mut self, packet: Packet, addr: SocketAddr) -> Option<Packet> {
        let key = peer_key(&addr);

        // FRAG는 먼저 재조립기로. 완성 전까지는 조용히 소비.
        let packet = if packet.flag == Flag::Frag {
            let done = self.reassembler.accept(&packet)?;
            self.stats.messages_reassembled += 1;
            done
        } else {
            packet
        };

        match packet.flag {
            Flag::Conn => {
                let now = Instant::now();
                let peer = Peer {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    key: packet.requirements.clone(),
                    last_seen: now,
                    last_ping: now,
                };
                if self.peers.insert(key.clone(), peer).is_none() {
                    info!(
                        "새 피어 {}: key {} bytes (총 {})",
                        key,
                        packet.requirements.len(),
                        self.peers.len()
                    );
                }
                self.ack(packet.seq, addr);
                None
            }
            Flag::Stop => {
                self.ack(packet.seq, addr);
                if self.peers.remove(&key).is_some() {
                    info!("피어 종료: {} (총 {})", key, self.peers.len());
                }
                None
            }
            Flag::Ping => {
                let now = Instant::now();
                if let Some(peer) = self.peers.get_mut(&key) {
                    peer.last_ping = now;
                    peer.last_seen = now;
                }
                let pong = Packet::control(Flag::Pong, packet.seq);
                self.send_raw(&pong, addr);
                None
            }
            Flag::Seen => {
                // 우리가 보낸 패킷에 대한 ack. 생존 신호로만 취급.
                if let Some(peer) = self.peers.get_mut(&key) {
                    peer.last_seen = Instant::now();
                }
                None
            }
            Flag::Pong => None,
            _ => {
                if let Some(peer) = self.peers.get_mut(&key) {
                    peer.last_seen = Instant::now();
                }
                self.ack(packet.seq, addr);
                Some(packet)
            }
        }
    }

    /// 특정 피어로 전송. 조각화 자동 적용.
    pub async fn send_to(&mut self, host: &str, port: u16, payload: &[u8]) -> bool {
        if !self.running {
            return false;
        }
        let Ok(addr) = endpoint::resolve(host, port) else {
            return false;
        };

        if payload.len() <= CHUNK_CAPACITY {
            let seq = self.next_seq();
            let packet = Packet::new(Flag::Give, seq, Bytes::new(), Bytes::copy_from_slice(payload));
            return self.send_raw(&packet, addr);
        }

        let packets = match self.fragmenter.split(Flag::Give, payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("조각화 실패: {}", e);
                return false;
            }
        };
        debug!("페이로드 {} bytes → {} 조각: {}", payload.len(), packets.len(), addr);

        let pacing = self.config.fragment_pacing();
        let mut ok = true;
        for packet in &packets {
            ok &= self.send_raw(packet, addr);
            self.stats.fragments_sent += 1;
            if !pacing.is_zero() {
                sleep(pacing).await;
            }
        }
        ok
    }

    /// 텍스트 전송
    pub async fn send_text_to(&mut self, host: &str, port: u16, text: &str) -> bool {
        self.send_to(host, port, text.as_bytes()).await
    }

    /// 커맨드 전송
    pub async fn send_command_to(
        &mut self,
        host: &str,
        port: u16,
        mnemonic: &str,
        args: &[&str],
    ) -> bool {
        let bytes = command::encode(mnemonic, args);
        self.send_to(host, port, &bytes).await
    }

    /// 모든 피어에게 전송. 전송에 성공한 피어 수를 반환.
    pub async fn broadcast(&mut self, payload: &[u8]) -> usize {
        let targets: Vec<(String, u16)> = self
            .peers
            .values()
            .map(|p| (p.host.clone(), p.port))
            .collect();

        let mut sent = 0;
        for (host, port) in targets {
            if self.send_to(&host, port, payload).await {
                sent += 1;
            }
        }
        sent
    }

    /// 모든 피어에게 텍스트 전송
    pub async fn broadcast_text(&mut self, text: &str) -> usize {
        self.broadcast(text.as_bytes()).await
    }

    /// 모든 피어에게 커맨드 전송
    pub async fn broadcast_command(&mut self, mnemonic: &str, args: &[&str]) -> usize {
        let bytes = command::encode(mnemonic, args);
        self.broadcast(&bytes).await
    }

    /// last_seen이 timeout보다 오래된 피어를 제거. 제거한 수를 반환.
    pub fn cleanup_stale_clients(&mut self, timeout: Duration) -> usize {
        let before = self.peers.len();
        self.peers.retain(|key, peer| {
            if peer.last_seen.elapsed() > timeout {
                warn!("stale 피어 제거: {} ({:?} 무응답)", key, peer.last_seen.elapsed());
                false
            } else {
                true
            }
        });
        let removed = before - self.peers.len();
        self.stats.peers_evicted += removed as u64;
        removed
    }

    /// 실행 여부
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 연결된 피어 수
    pub fn client_count(&self) -> usize {
        self.peers.len()
    }

    /// 피어 조회
    pub fn peer(&self, host: &str, port: u16) -> Option<&Peer> {
        self.peers.get(&format!("{host}:{port}"))
    }

    /// 피어 순회
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
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

    fn next_seq(&mut self) -> u16 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }

    fn ack(&mut self, seq: u16, addr: SocketAddr) {
        let ack = Packet::control(Flag::Seen, seq);
        if self.send_raw(&ack, addr) {
            self.stats.acks_sent += 1;
        }
    }

    fn send_raw(&mut self, packet: &Packet, addr: SocketAddr) -> bool {
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

/// poll 핸들러에 빌려주는 송신 능력
///
/// 핸들러 호출 동안만 서버의 엔드포인트와 시퀀스 카운터, 조각 생성기를
/// 빌린다. 패킷에 서버 참조를 저장하지 않는다.
pub struct Responder<'a> {
    endpoint: &'a Endpoint,
    seq: &'a mut u16,
    fragmenter: &'a mut Fragmenter,
    config: &'a Config,
    stats: &'a mut TransportStats,
}

impl Responder<'_> {
    /// 임의 피어로 전송. 조각화 자동 적용.
    pub fn send(&mut self, host: &str, port: u16, payload: &[u8]) -> bool {
        let Ok(addr) = endpoint::resolve(host, port) else {
            return false;
        };
        self.send_addr(addr, payload)
    }

    /// 수신한 패킷의 발신자에게 텍스트로 응답
    pub fn reply(&mut self, host: &str, port: u16, text: &str) -> bool {
        self.send(host, port, text.as_bytes())
    }

    /// 텍스트 전송
    pub fn send_text(&mut self, host: &str, port: u16, text: &str) -> bool {
        self.send(host, port, text.as_bytes())
    }

    /// 커맨드 전송
    pub fn send_command(&mut self, host: &str, port: u16, mnemonic: &str, args: &[&str]) -> bool {
        let bytes = command::encode(mnemonic, args);
        self.send(host, port, &bytes)
    }

    fn send_addr(&mut self, addr: SocketAddr, payload: &[u8]) -> bool {
        if payload.len() <= CHUNK_CAPACITY {
            let seq = self.next_seq();
            let packet = Packet::new(Flag::Give, seq, Bytes::new(), Bytes::copy_from_slice(payload));
            return self.send_packet(&packet, addr);
        }

        let Ok(packets) = self.fragmenter.split(Flag::Give, payload) else {
            return false;
        };
        let pacing = self.config.fragment_pacing();
        let mut ok = true;
        for packet in &packets {
            ok &= self.send_packet(packet, addr);
            self.stats.fragments_sent += 1;
            // 동기 핸들러 내부이므로 조각 간격은 블로킹 수면
            if !pacing.is_zero() {
                std::thread::sleep(pacing);
            }
        }
        ok
    }

    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) -> bool {
        let bytes = match packet.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!("인코딩 실패: {}", e);
                return false;
            }
        };
        let ok = self.endpoint.send(&bytes, addr);
        if ok {
            self.stats.record_send(bytes.len());
        }
        ok
    }

    fn next_seq(&mut self) -> u16 {
        let s = *self.seq;
        *self.seq = self.seq.wrapping_add(1);
        s
    }
}
