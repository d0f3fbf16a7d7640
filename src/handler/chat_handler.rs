//! 채팅 핸들러
//!
//! 방 채팅은 발신자의 방 멤버에게, 채널 채팅은 발신자가 보고 있는
//! 채널의 구독자에게 발신자 이름을 붙여 중계합니다.

use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use crate::handler::{close_failed_sinks, ServerContext};
use crate::protocol::outbound;
use crate::protocol::ChatKind;
use crate::service::connection_service::Connection;
use crate::service::session_service::Session;

pub struct ChatHandler {
    context: Arc<ServerContext>,
}

impl ChatHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub async fn handle_chat(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        kind: ChatKind,
        message: &str,
    ) -> Result<()> {
        if message.is_empty() {
            return Ok(());
        }
        let packet = outbound::chat(kind, &session.user_name, message);

        match kind {
            ChatKind::Room => {
                let room_id = session.current_room_id();
                if room_id == 0 {
                    warn!("유저 {} 방 채팅 거부: 방에 없음", session.user_id);
                    return Ok(());
                }
                let Some((server_index, channel_index)) = session.current_channel().await else {
                    return Ok(());
                };
                let Some(channel) =
                    self.context.directory.get_channel(server_index, channel_index)
                else {
                    return Ok(());
                };
                let Some(room) = channel.get_room(room_id).await else {
                    return Ok(());
                };

                let failed = {
                    let room = room.lock().await;
                    room.relay_chat(session.user_id, &packet).await
                };
                close_failed_sinks(failed).await;
            }
            ChatKind::Channel => {
                let Some((server_index, channel_index)) = session.current_channel().await else {
                    warn!("유저 {} 채널 채팅 거부: 채널 미선택", session.user_id);
                    return Ok(());
                };
                let Some(channel) =
                    self.context.directory.get_channel(server_index, channel_index)
                else {
                    return Ok(());
                };
                channel.relay_to_browsers(&packet, connection.id()).await;
            }
        }
        Ok(())
    }
}
