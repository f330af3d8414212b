//! 패킷 구조와 와이어 코덱
//!
//! ## Wire Format
//! ```text
//! [flag: u8][version: u8][seq: u16 BE]
//! [payload_len: u16 BE][requirements_len: u16 BE]
//! [requirements: R bytes][payload: P bytes]
//! ```
//!
//! 인코딩은 결정적이며 바이트 단위로 정확하다. 디코딩한 패킷을 다시
//! 인코딩하면 동일한 바이트가 나온다.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{HEADER_SIZE, PROTOCOL_VERSION};

/// 패킷 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    /// 연결 요청 (requirements = 피어 식별 바이트)
    Conn = 0,
    /// 데이터 전송 (requirements = 수신자 라우팅 키, 선택)
    Give = 1,
    /// 리소스 요청 (requirements = 리소스 식별자, 선택)
    Take = 2,
    /// 수신 확인 (seq = 확인 대상 패킷의 seq)
    Seen = 3,
    /// 연결 종료
    Stop = 4,
    /// 조각 패킷 (페이로드 = 서브헤더 + 조각 데이터)
    Frag = 5,
    /// keepalive 질의
    Ping = 6,
    /// keepalive 응답
    Pong = 7,
}

impl TryFrom<u8> for Flag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Flag::Conn),
            1 => Ok(Flag::Give),
            2 => Ok(Flag::Take),
            3 => Ok(Flag::Seen),
            4 => Ok(Flag::Stop),
            5 => Ok(Flag::Frag),
            6 => Ok(Flag::Ping),
            7 => Ok(Flag::Pong),
            other => Err(Error::UnknownFlag { flag: other }),
        }
    }
}

/// HERO 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 패킷 플래그
    pub flag: Flag,

    /// 프로토콜 버전
    pub version: u8,

    /// 송신자가 부여하는 시퀀스 번호 (2^16 래핑)
    pub seq: u16,

    /// 플래그에 따라 의미가 달라지는 부가 바이트
    pub requirements: Bytes,

    /// 사용자 페이로드
    pub payload: Bytes,
}

impl Packet {
    /// 새 패킷 생성 (버전은 현재 프로토콜 버전)
    pub fn new(flag: Flag, seq: u16, requirements: Bytes, payload: Bytes) -> Self {
        Self {
            flag,
            version: PROTOCOL_VERSION,
            seq,
            requirements,
            payload,
        }
    }

    /// requirements와 페이로드가 없는 제어 패킷 생성
    pub fn control(flag: Flag, seq: u16) -> Self {
        Self::new(flag, seq, Bytes::new(), Bytes::new())
    }

    /// 와이어 길이 (8 + R + P)
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.requirements.len() + self.payload.len()
    }

    /// 패킷을 와이어 바이트로 인코딩
    ///
    /// 길이 필드는 16비트이므로 requirements나 페이로드가 u16 범위를 넘으면
    /// 거부한다. 조각화는 이 위 계층(조각화 엔진)의 몫이다.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.requirements.len() > u16::MAX as usize {
            return Err(Error::RequirementsTooLarge {
                len: self.requirements.len(),
                max: u16::MAX as usize,
            });
        }
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(self.flag as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.seq);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(self.requirements.len() as u16);
        buf.put_slice(&self.requirements);
        buf.put_slice(&self.payload);
        Ok(buf.to_vec())
    }

    /// 와이어 바이트에서 패킷 디코딩
    ///
    /// 부분 패킷은 절대 반환하지 않는다.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::TooSmall {
                len: bytes.len(),
                min: HEADER_SIZE,
            });
        }

        let flag = Flag::try_from(bytes[0])?;
        let version = bytes[1];
        if version != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let seq = u16::from_be_bytes([bytes[2], bytes[3]]);
        let payload_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let req_len = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;

        let declared = HEADER_SIZE + req_len + payload_len;
        if bytes.len() != declared {
            return Err(Error::Truncated {
                declared,
                actual: bytes.len(),
            });
        }

        let requirements = Bytes::copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + req_len]);
        let payload = Bytes::copy_from_slice(&bytes[HEADER_SIZE + req_len..declared]);

        Ok(Self {
            flag,
            version,
            seq,
            requirements,
            payload,
        })
    }

    /// 페이로드를 UTF-8 텍스트로 변환 (lossy)
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
