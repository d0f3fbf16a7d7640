//! 로그인 핸들러
//!
//! Version/Login/Heartbeat 경로를 처리합니다. 로그인 성공 시 클라이언트가
//! 관찰하는 송신 순서는 고정 계약입니다:
//! UserStart → UserInfo(full) → Inventory(items) → Favorite(cosmetics)
//! → Unlock(원장) → Favorite(loadouts) → Option(buymenu) → ChannelList

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::handler::ServerContext;
use crate::protocol::outbound;
use crate::service::connection_service::{Connection, PacketSink};
use crate::service::session_service::Session;
use crate::tool::NetworkUtils;

pub struct LoginHandler {
    context: Arc<ServerContext>,
}

impl LoginHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// Version 교환: 해시를 되돌려준다
    pub async fn handle_version(
        &self,
        connection: &Arc<Connection>,
        _launcher: u8,
        client_hash: &str,
    ) -> Result<()> {
        connection
            .send(&outbound::version_reply(false, client_hash))
            .await
    }

    /// 로그인 처리
    ///
    /// 성공 시 세션을 반환합니다. 실패(`Ok(None)`)는 자격 증명 거부 또는
    /// 서비스 장애이며, 호출자는 소켓을 닫습니다 — 클라이언트에는 끊긴
    /// 소켓이 유일한 부정 신호입니다.
    pub async fn handle_login(
        &self,
        connection: &Arc<Connection>,
        username: &str,
        password: &str,
    ) -> Result<Option<Arc<Session>>> {
        let user_id = match self.context.users.validate_credentials(username, password).await {
            Ok(id) => id,
            Err(e) => {
                // 서비스 다운은 일반 자격 증명 실패처럼 보이게 한다
                warn!("자격 증명 검증 불가 ({}): {}", username, e);
                return Ok(None);
            }
        };
        if user_id == 0 {
            info!("로그인 거부: {}", username);
            return Ok(None);
        }

        let user = match self.context.users.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("유저 {} 스냅샷 없음", user_id);
                return Ok(None);
            }
            Err(e) => {
                warn!("유저 {} 조회 실패: {}", user_id, e);
                return Ok(None);
            }
        };

        let external_ip = NetworkUtils::ipv4_of(&connection.remote_addr())
            .map(|ip| NetworkUtils::ipv4_to_u32(&ip))
            .unwrap_or(0);

        // 단일 세션 규칙: 같은 userId의 기존 연결을 닫는다
        let (session, prior_connection) = self.context.sessions.create(
            user_id,
            user.user_name.clone(),
            connection.clone(),
            external_ip,
        );
        if let Some(prior) = prior_connection {
            prior.close().await;
        }

        connection
            .send(&outbound::user_start(
                user_id,
                &user.user_name,
                &user.player_name,
                self.context.config.port_holepunch,
            ))
            .await?;
        connection.send(&outbound::user_info_full(&user)).await?;

        if let Err(e) = self.send_inventory_projections(connection, user_id).await {
            warn!("유저 {} 인벤토리 전송 실패: {}", user_id, e);
            self.context.sessions.remove_if_owner(user_id, connection.id());
            return Ok(None);
        }

        let entries = self.context.directory.entries().await;
        connection.send(&outbound::channel_list(&entries)).await?;

        info!("✅ 유저 {} ({}) 로그인 완료", user_id, user.user_name);
        Ok(Some(session))
    }

    /// 인벤토리 투영 4종 전송. 순서는 클라이언트가 관찰하는 계약이다
    async fn send_inventory_projections(
        &self,
        connection: &Arc<Connection>,
        user_id: u32,
    ) -> Result<()> {
        let inventory = &self.context.inventory;

        let items = inventory.get_items(user_id).await?;
        connection.send(&outbound::inventory_items(&items)).await?;

        let cosmetics = inventory.get_cosmetics(user_id).await?;
        connection.send(&outbound::favorite_cosmetics(&cosmetics)).await?;

        // 해금 원장은 코스메틱과 로드아웃 사이에 바이트 그대로 나간다
        connection.send(&outbound::unlock_ledger()).await?;

        let loadouts = inventory.get_loadouts(user_id).await?;
        connection.send(&outbound::favorite_loadouts(&loadouts)).await?;

        let buy_menu = inventory.get_buy_menu(user_id).await?;
        connection.send(&outbound::option_buy_menu(&buy_menu)).await?;

        Ok(())
    }

    /// 하트비트: 세션 생존 시각만 갱신하며 응답은 보내지 않는다
    /// (응답 프레임은 클라이언트가 추적하는 시퀀스를 어긋나게 한다)
    pub async fn handle_heartbeat(&self, session: &Arc<Session>) {
        session.touch_heartbeat().await;
    }

    /// TCP 측 홀펀치 핸드셰이크: 내부 주소를 기록하고 관측 주소를 응답
    pub async fn handle_udp_handshake(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        local_ip: u32,
        local_port: u16,
    ) -> Result<()> {
        session.set_local_net(local_ip, local_port).await;

        let remote = connection.remote_addr();
        let observed_ip = NetworkUtils::ipv4_of(&remote)
            .map(|ip| NetworkUtils::ipv4_to_u32(&ip))
            .unwrap_or(0);
        connection
            .send(&outbound::udp_observed(observed_ip, remote.port()))
            .await
    }
}
