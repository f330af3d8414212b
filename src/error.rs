//! 에러 타입 정의

use thiserror::Error;

/// HERO 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("패킷이 너무 짧음: {len} bytes (최소 {min})")]
    TooSmall { len: usize, min: usize },

    #[error("패킷 길이 불일치: 선언 {declared} bytes, 실제 {actual} bytes")]
    Truncated { declared: usize, actual: usize },

    #[error("알 수 없는 플래그: {flag:#04X}")]
    UnknownFlag { flag: u8 },

    #[error("프로토콜 버전 불일치: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("유효하지 않은 니모닉 코드: {code:?} (정확히 2글자 필요)")]
    InvalidMnemonic { code: String },

    #[error("주소 해석 실패: {addr}")]
    AddrResolve { addr: String },

    #[error("페이로드가 너무 큼: {len} bytes")]
    PayloadTooLarge { len: usize },

    #[error("requirements가 너무 큼: {len} bytes (최대 {max})")]
    RequirementsTooLarge { len: usize, max: usize },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
