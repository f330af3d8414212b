//! 커맨드 코덱
//!
//! 표준 페이로드 인코딩: 2글자 니모닉 + `|` + `;`로 끝나는 위치 인자들.
//! 예: `MV|100.5;250.3;`
//!
//! `|`와 `;`는 예약 문자다. 인자 안에 이 문자가 필요하면 호출자가 미리
//! 이스케이프해야 한다.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// 프로세스 전역 니모닉 레지스트리 (심볼 이름 → 2글자 코드)
static REGISTRY: RwLock<BTreeMap<String, String>> = RwLock::new(BTreeMap::new());

/// 니모닉 등록. 코드는 정확히 2글자여야 한다. 등록 해제는 없다.
pub fn register(name: &str, code: &str) -> Result<()> {
    if code.chars().count() != 2 {
        return Err(Error::InvalidMnemonic {
            code: code.to_string(),
        });
    }
    REGISTRY.write().insert(name.to_string(), code.to_string());
    Ok(())
}

/// 심볼 이름을 코드로 해석. 미등록 이름은 그대로 반환.
pub fn resolve(name: &str) -> String {
    REGISTRY
        .read()
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

/// 커맨드 인코딩: `mnemonic|arg0;arg1;...;`
///
/// 니모닉은 레지스트리로 해석하며, 마지막 인자를 포함한 모든 인자는
/// `;`로 끝난다.
pub fn encode(mnemonic: &str, args: &[&str]) -> Vec<u8> {
    let code = resolve(mnemonic);
    let args_len: usize = args.iter().map(|a| a.len() + 1).sum();
    let mut out = String::with_capacity(code.len() + 1 + args_len);
    out.push_str(&code);
    out.push('|');
    for arg in args {
        out.push_str(arg);
        out.push(';');
    }
    out.into_bytes()
}

/// 커맨드 디코딩. 절대 실패하지 않는다.
///
/// `|`가 없으면 전체 텍스트와 빈 인자 목록을 반환한다. 마지막 `;` 종결자가
/// 만드는 빈 세그먼트 하나만 제거하므로 빈 문자열 인자도 왕복이 보존된다.
pub fn decode(bytes: &[u8]) -> (String, Vec<String>) {
    let text = String::from_utf8_lossy(bytes);
    match text.split_once('|') {
        None => (text.into_owned(), Vec::new()),
        Some((head, tail)) => {
            let mut args: Vec<String> = tail.split(';').map(str::to_string).collect();
            if args.last().map_or(false, |a| a.is_empty()) {
                args.pop();
            }
            (head.to_string(), args)
        }
    }
}
