//! 프로토콜 설정

use std::time::Duration;

use bytes::Bytes;

use crate::DEFAULT_IDENTITY;

/// HERO 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// CONN 전송 후 SEEN 대기 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// receive 기본 poll 윈도우 (밀리초)
    pub receive_timeout_ms: u64,

    /// PING 전송 후 PONG 대기 타임아웃 (밀리초)
    pub ping_timeout_ms: u64,

    /// keepalive 주기 (밀리초)
    /// 마지막 PING 이후 이 시간이 지나면 keep_alive가 다시 PING을 보냄
    pub keepalive_interval_ms: u64,

    /// 재조립 레코드 타임아웃 (밀리초)
    /// 마지막 조각 수신 후 이 시간이 지난 미완성 메시지는 폐기
    pub reassembly_timeout_ms: u64,

    /// 피어 stale 판정 타임아웃 (밀리초)
    pub peer_stale_timeout_ms: u64,

    /// FRAG 패킷 전송 간격 (밀리초)
    /// 0이면 간격 없이 전송
    pub fragment_pacing_ms: u64,

    /// poll 루프 수면 간격 (밀리초, 10 이하 권장)
    pub poll_sleep_ms: u64,

    /// CONN requirements에 싣는 피어 식별 바이트
    pub identity: Bytes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,          // 5초
            receive_timeout_ms: 100,           // 100ms
            ping_timeout_ms: 1000,             // 1초
            keepalive_interval_ms: 5000,       // 5초
            reassembly_timeout_ms: 30_000,     // 30초
            peer_stale_timeout_ms: 30_000,     // 30초
            fragment_pacing_ms: 1,             // 1ms
            poll_sleep_ms: 5,                  // 5ms
            identity: Bytes::from_static(&DEFAULT_IDENTITY),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 실시간 게임 트래픽용 설정
    pub fn realtime() -> Self {
        Self {
            connect_timeout_ms: 2000,
            receive_timeout_ms: 20,
            ping_timeout_ms: 500,
            keepalive_interval_ms: 2000,
            reassembly_timeout_ms: 10_000,
            peer_stale_timeout_ms: 10_000,
            fragment_pacing_ms: 0,             // 최대 속도
            poll_sleep_ms: 1,
            identity: Bytes::from_static(&DEFAULT_IDENTITY),
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            receive_timeout_ms: 250,
            ping_timeout_ms: 2000,
            keepalive_interval_ms: 3000,
            reassembly_timeout_ms: 60_000,
            peer_stale_timeout_ms: 90_000,
            fragment_pacing_ms: 5,             // 수신측 드랍 완화
            poll_sleep_ms: 10,
            identity: Bytes::from_static(&DEFAULT_IDENTITY),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn peer_stale_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_stale_timeout_ms)
    }

    pub fn fragment_pacing(&self) -> Duration {
        Duration::from_millis(self.fragment_pacing_ms)
    }

    pub fn poll_sleep(&self) -> Duration {
        Duration::from_millis(self.poll_sleep_ms)
    }
}
