//! 전송 통계

/// 엔드포인트 단위 전송 카운터
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// 송신 데이터그램 수
    pub datagrams_sent: u64,

    /// 수신 데이터그램 수
    pub datagrams_received: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 송신한 SEEN 수
    pub acks_sent: u64,

    /// 디코딩 실패로 버린 데이터그램 수
    pub decode_failures: u64,

    /// 송신한 FRAG 패킷 수
    pub fragments_sent: u64,

    /// 재조립을 완료한 메시지 수
    pub messages_reassembled: u64,

    /// 재조립 타임아웃으로 버린 메시지 수
    pub reassembly_timeouts: u64,

    /// stale 판정으로 제거한 피어 수
    pub peers_evicted: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 기록
    pub fn record_send(&mut self, bytes: usize) {
        self.datagrams_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// 수신 기록
    pub fn record_recv(&mut self, bytes: usize) {
        self.datagrams_received += 1;
        self.bytes_received += bytes as u64;
    }
}
