//! HERO 클라이언트 데모
//!
//! 서버에 연결해 메시지를 보내고 에코 응답을 기다린다.
//!
//! 사용법:
//!   cargo run --release --bin hero_client -- [OPTIONS]
//!
//! 예시:
//!   # 기본 서버(127.0.0.1:8080)로 5회 전송
//!   cargo run --release --bin hero_client
//!
//!   # 대용량 페이로드로 조각화 경로 확인
//!   cargo run --release --bin hero_client -- --size 250000

use std::time::Duration;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use hero::{Config, HeroClient};

/// 클라이언트 실행 옵션
struct ClientArgs {
    host: String,
    port: u16,
    count: u32,
    size: usize,
    message: String,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            count: 5,
            size: 0,
            message: "hello from hero client".to_string(),
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    parsed.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    parsed.port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    parsed.count = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--size" => {
                if i + 1 < args.len() {
                    parsed.size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--message" | "-m" => {
                if i + 1 < args.len() {
                    parsed.message = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"HERO Client - 에코 클라이언트 데모

사용법:
  cargo run --release --bin hero_client -- [OPTIONS]

옵션:
  --host <HOST>         서버 호스트 (기본: 127.0.0.1)
  -p, --port <PORT>     서버 포트 (기본: 8080)
  -c, --count <N>       전송 횟수 (기본: 5)
  --size <BYTES>        0보다 크면 해당 크기의 페이로드 전송 (조각화 확인용)
  -m, --message <TEXT>  전송할 텍스트 (기본: "hello from hero client")
  -h, --help            이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    let mut client = HeroClient::new(Config::default());
    info!("서버 {}:{} 연결 시도...", args.host, args.port);

    if !client.connect(&args.host, args.port).await? {
        warn!("연결 실패");
        std::process::exit(1);
    }

    for round in 1..=args.count {
        let ok = if args.size > 0 {
            client.send(&vec![0x41u8; args.size]).await
        } else {
            client.send_text(&format!("{} #{}", args.message, round)).await
        };
        if !ok {
            warn!("전송 실패 (round {})", round);
            continue;
        }

        match client.receive_text(Duration::from_secs(2)).await {
            Some(reply) => {
                let preview: String = reply.chars().take(60).collect();
                info!("응답 #{}: {}", round, preview);
            }
            None => warn!("응답 타임아웃 (round {})", round),
        }

        client.keep_alive().await;
    }

    if client.ping().await {
        info!("rtt: {:?}ms", client.ping_ms());
    }

    let stats = client.stats();
    info!(
        "송신 {} 데이터그램 / 수신 {} 데이터그램 / FRAG {} / ack {}",
        stats.datagrams_sent, stats.datagrams_received, stats.fragments_sent, stats.acks_sent
    );

    client.disconnect();
    Ok(())
}
