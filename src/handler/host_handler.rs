//! 호스트 핸들러
//!
//! 선출된 호스트가 매치 진행에 필요한 다른 멤버의 인벤토리 투영을
//! 서버 경유로 받아가는 중계와 게임 종료 통지를 처리합니다.
//!
//! 중계 권한 체인: (a) 요청자 세션 존재 → (b) 요청자가 방에 있음 →
//! (c) 대상 세션 존재 → (d) 요청자가 그 방의 호스트 → (e) 대상이 같은
//! 방의 멤버. 전부 통과해야만 게이트웨이 조회가 일어나며, 실패는 경고
//! 로그 후 무응답 드롭입니다 (연결은 유지).

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::channel::room::Room;
use crate::handler::{close_failed_sinks, ServerContext};
use crate::protocol::inbound::HostRequest;
use crate::protocol::outbound;
use crate::service::connection_service::{Connection, PacketSink};
use crate::service::session_service::Session;

pub struct HostHandler {
    context: Arc<ServerContext>,
}

impl HostHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub async fn handle_host_request(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        request: HostRequest,
    ) -> Result<()> {
        match request {
            HostRequest::OnGameEnd => self.handle_game_end(session).await,
            HostRequest::SetInventory { target_user_id } => {
                self.relay_projection(connection, session, target_user_id, Projection::Inventory)
                    .await
            }
            HostRequest::SetLoadout { target_user_id } => {
                self.relay_projection(connection, session, target_user_id, Projection::Loadout)
                    .await
            }
            HostRequest::SetBuyMenu { target_user_id } => {
                self.relay_projection(connection, session, target_user_id, Projection::BuyMenu)
                    .await
            }
        }
    }

    /// 게임 종료: 호스트만, 게임 중에만
    async fn handle_game_end(&self, session: &Arc<Session>) -> Result<()> {
        let Some(room) = self.room_of(session).await else {
            warn!("유저 {} 게임 종료 거부: 방에 없음", session.user_id);
            return Ok(());
        };

        let result = {
            let mut room = room.lock().await;
            if !room.is_host(session.user_id) {
                warn!("유저 {} 게임 종료 거부: 호스트 아님", session.user_id);
                return Ok(());
            }
            room.end_game().await
        };

        match result {
            Ok(failed) => close_failed_sinks(failed).await,
            Err(e) => warn!("유저 {} 게임 종료 거부: {}", session.user_id, e),
        }
        Ok(())
    }

    /// 대상 멤버의 인벤토리 투영을 호스트 연결로 전달
    async fn relay_projection(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        target_user_id: u32,
        projection: Projection,
    ) -> Result<()> {
        // (b) 요청자가 방에 있음
        let Some(room) = self.room_of(session).await else {
            warn!("유저 {} 호스트 중계 거부: 방에 없음", session.user_id);
            return Ok(());
        };

        // (c) 대상 세션 존재
        if self.context.sessions.get(target_user_id).is_none() {
            warn!(
                "유저 {} 호스트 중계 거부: 대상 {} 세션 없음",
                session.user_id, target_user_id
            );
            return Ok(());
        }

        // (d) 요청자가 호스트, (e) 대상이 같은 방의 멤버
        {
            let room = room.lock().await;
            if !room.is_host(session.user_id) {
                warn!("유저 {} 호스트 중계 거부: 호스트 아님", session.user_id);
                return Ok(());
            }
            if !room.is_member(target_user_id) {
                warn!(
                    "유저 {} 호스트 중계 거부: 대상 {} 은 같은 방이 아님",
                    session.user_id, target_user_id
                );
                return Ok(());
            }
        }

        // 권한 체인 전체를 통과한 뒤에만 게이트웨이 조회
        let packet = match projection {
            Projection::Inventory => match self.context.inventory.get_items(target_user_id).await {
                Ok(items) => outbound::host_set_inventory(target_user_id, &items),
                Err(e) => {
                    warn!("대상 {} 아이템 조회 실패, 중계 드롭: {}", target_user_id, e);
                    return Ok(());
                }
            },
            Projection::Loadout => match self.context.inventory.get_loadouts(target_user_id).await {
                Ok(loadouts) => outbound::host_set_loadout(target_user_id, &loadouts),
                Err(e) => {
                    warn!("대상 {} 로드아웃 조회 실패, 중계 드롭: {}", target_user_id, e);
                    return Ok(());
                }
            },
            Projection::BuyMenu => match self.context.inventory.get_buy_menu(target_user_id).await {
                Ok(menu) => outbound::host_set_buy_menu(target_user_id, &menu),
                Err(e) => {
                    warn!("대상 {} 구매 메뉴 조회 실패, 중계 드롭: {}", target_user_id, e);
                    return Ok(());
                }
            },
        };

        connection.send(&packet).await
    }

    async fn room_of(&self, session: &Arc<Session>) -> Option<Arc<Mutex<Room>>> {
        let room_id = session.current_room_id();
        if room_id == 0 {
            return None;
        }
        let (server_index, channel_index) = session.current_channel().await?;
        let channel = self.context.directory.get_channel(server_index, channel_index)?;
        channel.get_room(room_id).await
    }
}

enum Projection {
    Inventory,
    Loadout,
    BuyMenu,
}
