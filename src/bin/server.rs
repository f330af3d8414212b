//! HERO 에코 서버 데모
//!
//! 수신한 GIVE 페이로드를 "Echo: ..."로 되돌려준다.
//!
//! 사용법:
//!   cargo run --release --bin hero_server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트(8080)로 실행
//!   cargo run --release --bin hero_server
//!
//!   # 포트와 stale 타임아웃 지정
//!   cargo run --release --bin hero_server -- --port 9000 --stale-timeout 60000

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hero::{Config, Flag, HeroServer};

/// 서버 실행 옵션
struct ServerArgs {
    port: u16,
    config: Config,
    verbose: bool,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            port: 8080,
            config: Config::default(),
            verbose: false,
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    parsed.port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--stale-timeout" => {
                if i + 1 < args.len() {
                    parsed.config.peer_stale_timeout_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"HERO Echo Server - 데이터그램 에코 서버 데모

사용법:
  cargo run --release --bin hero_server -- [OPTIONS]

옵션:
  -p, --port <PORT>         바인드 포트 (기본: 8080)
  --stale-timeout <MS>      피어 stale 타임아웃 밀리초 (기본: 30000)
  -v, --verbose             디버그 로그 출력
  -h, --help                이 도움말 출력
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
    let args = parse_args();

    // 로깅 설정
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut server = HeroServer::new(args.config);
    server.start(args.port).await?;
    info!("포트 {} 대기 중...", args.port);

    loop {
        server
            .poll(|packet, host, port, responder| {
                // SEEN 확인 응답이 아닌 실제 메시지만 에코
                if packet.flag == Flag::Give && !packet.payload.is_empty() {
                    let message = packet.payload_text();
                    info!("수신 {}:{} - {} ({} bytes)", host, port, message, packet.payload.len());
                    responder.reply(host, port, &format!("Echo: {message}"));
                }
            })
            .await;
    }
}
