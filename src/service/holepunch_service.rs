//! 홀펀치 서비스
//!
//! NAT 뒤의 클라이언트가 자신의 외부 `ip:port`를 알 수 있도록,
//! 단일 UDP 소켓으로 도장 찍힌 패킷을 받아 관측된 출처 주소를
//! 돌려줍니다. 소켓 외의 상태는 갖지 않습니다.
//!
//! # 데이터그램 형식
//!
//! ```text
//! 수신: [매직 0x57][userId u32][portId u8][내부 ip u32][내부 port u16]
//! 송신: [매직 0x57][0x01][외부 ip u32][외부 port u16]
//! ```

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::protocol::buffer::{PacketReader, PacketWriter};
use crate::protocol::HOLEPUNCH_SIGNATURE;
use crate::service::session_service::SessionService;
use crate::tool::NetworkUtils;

/// 홀펀치 UDP 엔드포인트
pub struct HolepunchService {
    socket: Arc<UdpSocket>,
    sessions: Arc<SessionService>,
}

impl HolepunchService {
    pub fn new(socket: UdpSocket, sessions: Arc<SessionService>) -> Self {
        Self { socket: Arc::new(socket), sessions }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 수신 루프 시작
    pub fn start(&self) {
        let socket = self.socket.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            info!("홀펀치 UDP 수신 시작");
            let mut buf = [0u8; 64];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        Self::handle_datagram(&socket, &sessions, &buf[..len], source).await;
                    }
                    Err(e) => {
                        warn!("홀펀치 수신 에러: {}", e);
                    }
                }
            }
        });
    }

    async fn handle_datagram(
        socket: &UdpSocket,
        sessions: &SessionService,
        datagram: &[u8],
        source: SocketAddr,
    ) {
        let mut r = PacketReader::new(datagram);

        let Ok(signature) = r.read_u8() else { return };
        if signature != HOLEPUNCH_SIGNATURE {
            debug!("홀펀치 매직 불일치 [{}]: 0x{:02x}", source, signature);
            return;
        }

        let (Ok(user_id), Ok(_port_id)) = (r.read_u32(), r.read_u8()) else {
            debug!("홀펀치 데이터그램 손상 [{}]", source);
            return;
        };
        // 내부 주소 필드는 선택적: 구버전 클라이언트는 보내지 않는다
        let local_ip = r.read_u32().unwrap_or(0);
        let local_port = r.read_u16().unwrap_or(0);

        let Some(external_ip) = NetworkUtils::ipv4_of(&source) else {
            debug!("홀펀치 IPv6 출처 무시 [{}]", source);
            return;
        };
        let external_ip = NetworkUtils::ipv4_to_u32(&external_ip);
        let external_port = source.port();

        // 세션이 있으면 피어 교환용 주소를 갱신 (엔드포인트 자체는 무상태)
        if let Some(session) = sessions.get(user_id) {
            session.set_external_net(external_ip, external_port).await;
            if local_ip != 0 {
                session.set_local_net(local_ip, local_port).await;
            }
        }

        let mut w = PacketWriter::new();
        w.write_u8(HOLEPUNCH_SIGNATURE)
            .write_u8(1)
            .write_u32(external_ip)
            .write_u16(external_port);

        if let Err(e) = socket.send_to(&w.into_bytes(), source).await {
            warn!("홀펀치 응답 실패 [{}]: {}", source, e);
        } else {
            debug!("홀펀치 응답 [{}] user={}", source, user_id);
        }
    }
}
