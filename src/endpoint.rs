//! 데이터그램 엔드포인트
//!
//! tokio UDP 소켓의 얇은 논블로킹 래퍼. 바이트를 해석하지 않으며
//! 호출 단위 임시 버퍼 외에는 아무것도 소유하지 않는다.

use std::net::{SocketAddr, ToSocketAddrs};

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::MAX_DATAGRAM;

/// 논블로킹 UDP 엔드포인트
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// 소켓 바인딩. 포트 0이면 OS가 포트를 고른다.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        // try_send_to는 writable readiness 획득 이후에만 유효
        socket.writable().await?;
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }

    /// 바인딩된 로컬 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 단일 논블로킹 sendto. OS가 바이트를 받았는지 여부를 반환. 재시도 없음.
    pub fn send(&self, bytes: &[u8], addr: SocketAddr) -> bool {
        self.socket.try_send_to(bytes, addr).is_ok()
    }

    /// 논블로킹 수신. 대기 중인 데이터그램이 없으면 None. 블로킹하지 않는다.
    pub fn recv(&self) -> Option<(Bytes, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, addr)) => Some((Bytes::copy_from_slice(&buf[..len]), addr)),
            Err(_) => None,
        }
    }
}

/// "host:port"를 소켓 주소로 해석 (첫 결과 사용)
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::AddrResolve {
            addr: format!("{host}:{port}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loopback_send_recv() {
        let a = Endpoint::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let b = Endpoint::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        assert!(a.send(b"ping", b.local_addr()));

        // 논블로킹 수신이므로 도착까지 잠깐 poll
        let mut received = None;
        for _ in 0..100 {
            if let Some(got) = b.recv() {
                received = Some(got);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (bytes, from) = received.expect("데이터그램 수신");
        assert_eq!(&bytes[..], b"ping");
        assert_eq!(from, a.local_addr());
    }

    #[tokio::test]
    async fn test_recv_empty_returns_none() {
        let endpoint = Endpoint::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        assert!(endpoint.recv().is_none());
    }

    #[test]
    fn test_resolve() {
        let addr = resolve("127.0.0.1", 9000).unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
