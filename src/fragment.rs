//! 조각화 엔진
//!
//! 대용량 페이로드를 FRAG 패킷으로 분할하고, 수신측에서 msg_id 단위로
//! 재조립한다. 원본 플래그는 서브헤더에 실려 재조립 시 복원된다.
//!
//! ## Fragment Sub-header (FRAG 페이로드 선두 7바이트)
//! ```text
//! [msg_id: u16 LE][frag_index: u16 LE][total_frags: u16 LE][original_flag: u8]
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::packet::{Flag, Packet};
use crate::{CHUNK_CAPACITY, FRAG_HEADER_SIZE, PROTOCOL_VERSION};

/// 송신측 조각 생성기
pub struct Fragmenter {
    /// 다음에 쓸 메시지 ID (래핑)
    next_msg_id: u16,
}

impl Fragmenter {
    pub fn new() -> Self {
        Self { next_msg_id: 0 }
    }

    /// 페이로드를 FRAG 패킷들로 분할
    ///
    /// 각 패킷의 seq는 조각 인덱스이며 requirements는 비어 있다.
    /// 조각 수가 u16 범위를 넘으면 실패한다.
    pub fn split(&mut self, original_flag: Flag, payload: &[u8]) -> Result<Vec<Packet>> {
        let total = (payload.len() + CHUNK_CAPACITY - 1) / CHUNK_CAPACITY;
        if total > u16::MAX as usize {
            return Err(Error::PayloadTooLarge { len: payload.len() });
        }

        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        Ok(payload
            .chunks(CHUNK_CAPACITY)
            .enumerate()
            .map(|(idx, chunk)| {
                let mut body = BytesMut::with_capacity(FRAG_HEADER_SIZE + chunk.len());
                body.put_u16_le(msg_id);
                body.put_u16_le(idx as u16);
                body.put_u16_le(total as u16);
                body.put_u8(original_flag as u8);
                body.put_slice(chunk);
                Packet::new(Flag::Frag, idx as u16, Bytes::new(), body.freeze())
            })
            .collect())
    }

    /// 현재 메시지 ID 카운터 (테스트용)
    pub fn current_msg_id(&self) -> u16 {
        self.next_msg_id
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// 재조립 중인 메시지 레코드
struct PartialMessage {
    total: u16,
    original_flag: Flag,
    chunks: HashMap<u16, Bytes>,
    last_update: Instant,
}

/// 수신측 재조립 버퍼
///
/// 엔드포인트당 하나씩 존재하며 레코드는 msg_id로 식별한다.
pub struct Reassembler {
    pending: HashMap<u16, PartialMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// FRAG 패킷 하나를 수용. 메시지가 완성되면 논리 패킷을 반환.
    ///
    /// 반환 패킷은 원본 플래그와 재조립된 페이로드를 가지며 seq는 마지막으로
    /// 수신한 조각의 seq다 (SEEN이 확인하는 값). 완성된 메시지는 정확히 한 번만
    /// 반환되고 레코드는 파기된다. 중복 조각은 기존 바이트를 덮어쓴다.
    pub fn accept(&mut self, frag: &Packet) -> Option<Packet> {
        let payload = &frag.payload;
        if payload.len() < FRAG_HEADER_SIZE {
            return None;
        }

        let msg_id = u16::from_le_bytes([payload[0], payload[1]]);
        let index = u16::from_le_bytes([payload[2], payload[3]]);
        let total = u16::from_le_bytes([payload[4], payload[5]]);
        let original_flag = Flag::try_from(payload[6]).ok()?;

        if total == 0 || index >= total {
            return None;
        }

        let record = self.pending.entry(msg_id).or_insert_with(|| PartialMessage {
            total,
            original_flag,
            chunks: HashMap::new(),
            last_update: Instant::now(),
        });

        // 총 조각 수가 기존 레코드와 다르면 조용히 거부
        if record.total != total {
            return None;
        }

        record
            .chunks
            .insert(index, frag.payload.slice(FRAG_HEADER_SIZE..));
        record.last_update = Instant::now();

        if record.chunks.len() < record.total as usize {
            return None;
        }

        // 모든 인덱스가 모였으므로 순서대로 연결
        let record = self.pending.remove(&msg_id)?;
        let size: usize = record.chunks.values().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(size);
        for idx in 0..record.total {
            data.put_slice(&record.chunks[&idx]);
        }

        debug!(
            "메시지 {} 재조립 완료: {} 조각, {} bytes",
            msg_id,
            record.total,
            data.len()
        );

        Some(Packet {
            flag: record.original_flag,
            version: PROTOCOL_VERSION,
            seq: frag.seq,
            requirements: Bytes::new(),
            payload: data.freeze(),
        })
    }

    /// 타임아웃이 지난 레코드를 파기. 파기한 수를 반환.
    pub fn sweep(&mut self, timeout: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|msg_id, record| {
            if record.last_update.elapsed() > timeout {
                warn!(
                    "메시지 {} 재조립 타임아웃: {}/{} 조각 수신",
                    msg_id,
                    record.chunks.len(),
                    record.total
                );
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }

    /// 재조립 중인 메시지 수
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_bytes(len: usize, value: u8) -> (Fragmenter, Vec<Packet>) {
        let mut fragmenter = Fragmenter::new();
        let payload = vec![value; len];
        let frags = fragmenter.split(Flag::Give, &payload).unwrap();
        (fragmenter, frags)
    }

    #[test]
    fn test_split_chunk_counts() {
        let (_, frags) = split_bytes(250_000, 0x41);
        // 250_000 / 59_993 = 4.17 → 5 조각
        assert_eq!(frags.len(), 5);

        for (idx, frag) in frags.iter().enumerate() {
            assert_eq!(frag.flag, Flag::Frag);
            assert_eq!(frag.seq, idx as u16);
            assert!(frag.requirements.is_empty());
            assert!(frag.payload.len() <= FRAG_HEADER_SIZE + CHUNK_CAPACITY);
        }
    }

    #[test]
    fn test_msg_id_increments() {
        let mut fragmenter = Fragmenter::new();
        fragmenter.split(Flag::Give, &[0u8; CHUNK_CAPACITY + 1]).unwrap();
        fragmenter.split(Flag::Give, &[0u8; CHUNK_CAPACITY + 1]).unwrap();
        assert_eq!(fragmenter.current_msg_id(), 2);
    }

    #[test]
    fn test_reassemble_in_order() {
        let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.split(Flag::Give, &payload).unwrap();

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for frag in &frags {
            result = reassembler.accept(frag);
        }

        let packet = result.expect("재조립 완료");
        assert_eq!(packet.flag, Flag::Give);
        assert_eq!(&packet.payload[..], &payload[..]);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let payload: Vec<u8> = (0..150_000).map(|i| (i % 7) as u8).collect();
        let mut fragmenter = Fragmenter::new();
        let mut frags = fragmenter.split(Flag::Take, &payload).unwrap();
        frags.reverse();

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for frag in &frags {
            assert!(result.is_none());
            result = reassembler.accept(frag);
        }

        let packet = result.expect("순서와 무관하게 재조립");
        assert_eq!(packet.flag, Flag::Take);
        assert_eq!(&packet.payload[..], &payload[..]);
        // seq는 마지막으로 수신한 조각(역순이므로 인덱스 0)의 seq
        assert_eq!(packet.seq, 0);
    }

    #[test]
    fn test_reassemble_one_mebibyte() {
        let payload: Vec<u8> = (0..1_048_576).map(|i| (i % 251) as u8).collect();
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.split(Flag::Give, &payload).unwrap();
        // 1_048_576 / 59_993 = 17.48 → 18 조각
        assert_eq!(frags.len(), 18);

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for frag in &frags {
            result = reassembler.accept(frag);
        }

        let packet = result.expect("재조립 완료");
        assert_eq!(packet.flag, Flag::Give);
        assert_eq!(&packet.payload[..], &payload[..]);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_split_at_capacity_boundaries() {
        for (len, expected) in [
            (CHUNK_CAPACITY * 4 - 1, 4),
            (CHUNK_CAPACITY * 4, 4),
            (CHUNK_CAPACITY * 4 + 1, 5),
        ] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 13) as u8).collect();
            let mut fragmenter = Fragmenter::new();
            let frags = fragmenter.split(Flag::Give, &payload).unwrap();
            assert_eq!(frags.len(), expected);

            let mut reassembler = Reassembler::new();
            let mut result = None;
            for frag in &frags {
                result = reassembler.accept(frag);
            }
            let packet = result.expect("재조립 완료");
            assert_eq!(packet.payload.len(), len);
            assert_eq!(&packet.payload[..], &payload[..]);
        }
    }

    #[test]
    fn test_duplicate_overwrites() {
        let (_, frags) = split_bytes(CHUNK_CAPACITY * 2, 0x55);
        assert_eq!(frags.len(), 2);

        let mut reassembler = Reassembler::new();
        assert!(reassembler.accept(&frags[0]).is_none());
        assert!(reassembler.accept(&frags[0]).is_none()); // 중복은 덮어쓰기
        assert_eq!(reassembler.pending_count(), 1);

        let packet = reassembler.accept(&frags[1]).expect("완성");
        assert_eq!(packet.payload.len(), CHUNK_CAPACITY * 2);
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let (_, frags) = split_bytes(CHUNK_CAPACITY * 3, 0x11);
        let mut reassembler = Reassembler::new();
        assert!(reassembler.accept(&frags[0]).is_none());

        // 같은 msg_id에 총 조각 수를 다르게 선언한 조각
        let mut forged = frags[1].payload.to_vec();
        forged[4..6].copy_from_slice(&9u16.to_le_bytes());
        let forged_packet = Packet::new(Flag::Frag, 1, Bytes::new(), Bytes::from(forged));

        assert!(reassembler.accept(&forged_packet).is_none());

        // 레코드는 원래 선언을 유지한 채 계속 조립된다
        assert!(reassembler.accept(&frags[1]).is_none());
        assert!(reassembler.accept(&frags[2]).is_some());
    }

    #[test]
    fn test_short_frag_payload_ignored() {
        let mut reassembler = Reassembler::new();
        let bogus = Packet::new(Flag::Frag, 0, Bytes::new(), Bytes::from_static(b"abc"));
        assert!(reassembler.accept(&bogus).is_none());
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_sweep_destroys_stale_records() {
        let (_, frags) = split_bytes(CHUNK_CAPACITY * 2, 0x22);
        let mut reassembler = Reassembler::new();
        reassembler.accept(&frags[0]);
        assert_eq!(reassembler.pending_count(), 1);

        std::thread::sleep(Duration::from_millis(5));
        let swept = reassembler.sweep(Duration::from_millis(1));
        assert_eq!(swept, 1);
        assert_eq!(reassembler.pending_count(), 0);

        // 파기 후 남은 조각이 와도 완성되지 않는다
        assert!(reassembler.accept(&frags[1]).is_none());
    }

    #[test]
    fn test_original_flag_preserved() {
        for flag in [Flag::Give, Flag::Take, Flag::Stop] {
            let mut fragmenter = Fragmenter::new();
            let frags = fragmenter.split(flag, &[0u8; CHUNK_CAPACITY + 1]).unwrap();
            let mut reassembler = Reassembler::new();
            let mut result = None;
            for frag in &frags {
                result = reassembler.accept(frag);
            }
            assert_eq!(result.unwrap().flag, flag);
        }
    }
}
