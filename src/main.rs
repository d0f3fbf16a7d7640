//! 마스터 서버 실행 진입점
//!
//! 환경변수(필수: USERSERVICE_HOST/PORT, INVSERVICE_HOST/PORT)와 CLI
//! 플래그로 설정을 구성해 서버를 띄웁니다.
//!
//! 종료 코드: 0 정상 종료, 1 설정 오류(환경변수 누락, 바인드 실패),
//! 2 치명적 런타임 오류

use clap::Parser;
use std::net::IpAddr;
use tracing::{error, info};

use masterserver::config::{validate_config, MasterServerConfig};
use masterserver::server::MasterServer;
use masterserver::tool::NetworkUtils;

#[derive(Parser, Debug)]
#[command(name = "masterserver")]
#[command(about = "멀티플레이어 슈터 로비/매치메이킹 마스터 서버", long_about = None)]
struct Args {
    /// 바인드 IP 주소 (생략 시 자동 감지)
    #[arg(short = 'i', long = "ip-address")]
    ip_address: Option<IpAddr>,

    /// 마스터 TCP 포트
    #[arg(short = 'p', long = "port-master", default_value_t = 30001)]
    port_master: u16,

    /// 홀펀치 UDP 포트
    #[arg(short = 'P', long = "port-holepunch", default_value_t = 30002)]
    port_holepunch: u16,

    /// 송수신 프레임을 16진수로 로깅
    #[arg(short = 'l', long = "log-packets")]
    log_packets: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let code = run(args).await;
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    // 환경 설정 로드 (필수 변수 없으면 기동 거부)
    let mut config = match MasterServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("설정 오류: {:#}", e);
            return 1;
        }
    };

    config.ip_address = args.ip_address;
    config.port_master = args.port_master;
    config.port_holepunch = args.port_holepunch;
    config.log_packets = args.log_packets;

    if let Err(e) = validate_config(&config) {
        error!("설정 검증 실패: {:#}", e);
        return 1;
    }

    // 바인드 주소 자동 감지 (-i 플래그가 우선)
    if config.ip_address.is_none() {
        let detected = NetworkUtils::detect_local_ip().await;
        info!("바인드 주소 자동 감지: {}", detected);
        config.ip_address = Some(detected);
    }

    info!("=== 마스터 서버 설정 ===");
    info!("바인드 주소: {:?}", config.ip_address);
    info!("마스터 TCP 포트: {}", config.port_master);
    info!("홀펀치 UDP 포트: {}", config.port_holepunch);
    info!("유저 서비스: {}", config.user_service_url);
    info!("인벤토리 서비스: {}", config.inventory_service_url);
    info!("========================");

    let running = match MasterServer::start(config).await {
        Ok(running) => running,
        Err(e) => {
            error!("서버 기동 실패: {:#}", e);
            return 1;
        }
    };

    info!(
        "✅ 마스터 서버 실행 중 (tcp={}, udp={})",
        running.tcp_addr, running.udp_addr
    );

    // 종료 시그널 대기
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("🛑 종료 시그널 수신, 서버를 중지합니다");
            0
        }
        Err(e) => {
            error!("시그널 대기 실패: {}", e);
            2
        }
    }
}
