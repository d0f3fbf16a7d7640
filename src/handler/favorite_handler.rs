//! 즐겨찾기/옵션 핸들러
//!
//! 로드아웃, 코스메틱, 구매 메뉴의 쓰기를 인벤토리 서비스로 write-through
//! 합니다. 성공 시 응답은 없습니다 — 응답 프레임을 추가하면 클라이언트가
//! 추적하는 시퀀스 카운터가 어긋납니다.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handler::ServerContext;
use crate::protocol::inbound::{FavoriteRequest, OptionRequest};
use crate::service::session_service::Session;

pub struct FavoriteHandler {
    context: Arc<ServerContext>,
}

impl FavoriteHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub async fn handle_favorite_request(
        &self,
        session: &Arc<Session>,
        request: FavoriteRequest,
    ) -> Result<()> {
        let user_id = session.user_id;
        let result = match request {
            FavoriteRequest::SetLoadout { loadout_id, weapon_slot, item_id } => {
                debug!(
                    "유저 {} 로드아웃 변경: loadout={} slot={} item={}",
                    user_id, loadout_id, weapon_slot, item_id
                );
                self.context
                    .inventory
                    .set_loadout_weapon(user_id, loadout_id, weapon_slot, item_id)
                    .await
            }
            FavoriteRequest::SetCosmetics { cosmetic_slot, item_id } => {
                debug!(
                    "유저 {} 코스메틱 변경: slot={} item={}",
                    user_id, cosmetic_slot, item_id
                );
                self.context
                    .inventory
                    .set_cosmetic_slot(user_id, cosmetic_slot, item_id)
                    .await
            }
        };

        if let Err(e) = result {
            // 다음 요청이 자연스럽게 재시도한다: 핸들러 안에서는 재시도 없음
            warn!("유저 {} 즐겨찾기 쓰기 실패: {}", user_id, e);
        }
        Ok(())
    }

    pub async fn handle_option_request(
        &self,
        session: &Arc<Session>,
        request: OptionRequest,
    ) -> Result<()> {
        let user_id = session.user_id;
        match request {
            OptionRequest::SetBuyMenu { menu_index, items } => {
                debug!(
                    "유저 {} 구매 메뉴 변경: menu={} ({}개)",
                    user_id,
                    menu_index,
                    items.len()
                );
                if let Err(e) = self
                    .context
                    .inventory
                    .set_buy_menu(user_id, menu_index, &items)
                    .await
                {
                    warn!("유저 {} 구매 메뉴 쓰기 실패: {}", user_id, e);
                }
            }
        }
        Ok(())
    }
}
