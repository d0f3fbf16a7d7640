//! 마스터 서버 조립
//!
//! 설정에서 서비스들을 만들어 연결하고 TCP/UDP 리스너를 띄웁니다.
//! 통합 테스트가 임시 포트로 기동할 수 있도록 실제 바인드 주소를
//! 돌려줍니다.

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;
use tracing::info;

use crate::channel::ChannelDirectory;
use crate::config::MasterServerConfig;
use crate::handler::{ConnectionHandler, ServerContext};
use crate::service::{
    ConnectionService, HolepunchService, InventoryService, SessionService, UserService,
};

/// 기동된 마스터 서버 핸들
pub struct RunningMasterServer {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub context: Arc<ServerContext>,
}

/// 마스터 서버
pub struct MasterServer;

impl MasterServer {
    /// 서버 기동: 게이트웨이 조립 → UDP/TCP 바인드 → 수신 루프 시작
    pub async fn start(config: MasterServerConfig) -> Result<RunningMasterServer> {
        let mut config = config;
        let bind_ip = config
            .ip_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        // 홀펀치 UDP 먼저: 로그인 응답에 실제 포트가 실려야 한다
        let udp_socket = UdpSocket::bind((bind_ip, config.port_holepunch))
            .await
            .context("홀펀치 UDP 바인드 실패")?;
        let udp_addr = udp_socket.local_addr()?;
        config.port_holepunch = udp_addr.port();

        let listener = TcpListener::bind((bind_ip, config.port_master))
            .await
            .context("마스터 TCP 바인드 실패")?;
        let tcp_addr = listener.local_addr()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway.timeout_secs))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        let users = Arc::new(UserService::new(
            config.user_service_url.clone(),
            http.clone(),
            &config.gateway,
        ));
        let inventory = Arc::new(InventoryService::new(
            config.inventory_service_url.clone(),
            http,
        ));
        users.pinger().start(config.gateway.ping_interval_secs);
        inventory.pinger().start(config.gateway.ping_interval_secs);

        let sessions = Arc::new(SessionService::new());
        let connections = Arc::new(ConnectionService::new(config.max_connections));
        let directory = Arc::new(ChannelDirectory::with_defaults(&config.channel_server_name));

        let holepunch = HolepunchService::new(udp_socket, sessions.clone());
        holepunch.start();

        let context = Arc::new(ServerContext {
            config,
            connections,
            sessions,
            users,
            inventory,
            directory,
        });

        let handler = ConnectionHandler::new(context.clone());
        tokio::spawn(handler.run_accept_loop(listener));

        info!("🚀 마스터 서버 기동: tcp={} udp={}", tcp_addr, udp_addr);
        Ok(RunningMasterServer { tcp_addr, udp_addr, context })
    }
}
