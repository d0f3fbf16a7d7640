//! 방/채널 핸들러
//!
//! 채널 목록, 방 목록, 방 생성/입장/퇴장과 방 안의 상태 변경 요청을
//! 처리합니다. 권한/상태 위반은 경고 로그 후 드롭하며 소켓은 유지합니다.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::channel::room::{RemoveOutcome, RoomError};
use crate::channel::Channel;
use crate::handler::{close_failed_sinks, ServerContext};
use crate::protocol::inbound::{RoomCreateOptions, RoomRequest};
use crate::protocol::outbound;
use crate::service::connection_service::{Connection, PacketSink};
use crate::service::session_service::Session;

pub struct RoomHandler {
    context: Arc<ServerContext>,
}

impl RoomHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// 채널 목록 요청
    pub async fn handle_request_channels(&self, connection: &Arc<Connection>) -> Result<()> {
        let entries = self.context.directory.entries().await;
        connection.send(&outbound::channel_list(&entries)).await
    }

    /// 방 목록 요청: 채널 선택 + 방 목록 구독 시작
    pub async fn handle_request_room_list(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        server_index: u8,
        channel_index: u8,
    ) -> Result<()> {
        let Some(channel) = self.context.directory.get_channel(server_index, channel_index)
        else {
            warn!(
                "유저 {} 없는 채널 요청: server={} channel={}",
                session.user_id, server_index, channel_index
            );
            return Ok(());
        };

        session.set_current_channel(server_index, channel_index).await;
        channel.add_browser(connection.clone()).await;

        let entries = channel.room_list_entries().await;
        connection.send(&outbound::room_list(&entries)).await
    }

    /// Room 하위 요청 라우팅
    pub async fn handle_room_request(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        request: RoomRequest,
    ) -> Result<()> {
        match request {
            RoomRequest::Create(options) => self.create_room(connection, session, options).await,
            RoomRequest::Join { room_id } => self.join_room(connection, session, room_id).await,
            RoomRequest::Leave => {
                self.depart_room(session).await;
                Ok(())
            }
            RoomRequest::ToggleReady => {
                self.with_room(session, "toggleReady", move |room, user_id| async move {
                    let mut room = room.lock().await;
                    room.toggle_ready(user_id).await.map(|(_, failed)| failed)
                })
                .await
            }
            RoomRequest::Start => self.start_game(session).await,
            RoomRequest::UpdateSettings(update) => {
                self.with_room(session, "updateSettings", move |room, user_id| async move {
                    let mut room = room.lock().await;
                    room.update_settings(user_id, &update).await
                })
                .await
            }
            RoomRequest::SetUserTeam { team } => {
                self.with_room(session, "setUserTeam", move |room, user_id| async move {
                    let mut room = room.lock().await;
                    room.set_user_team(user_id, team).await
                })
                .await
            }
            RoomRequest::SetCountdown { start, count } => {
                self.with_room(session, "setCountdown", move |room, user_id| async move {
                    let mut room = room.lock().await;
                    room.set_countdown(user_id, start, count).await
                })
                .await
            }
            RoomRequest::ConnectionFailure => {
                self.with_room(session, "connectionFailure", move |room, user_id| async move {
                    let mut room = room.lock().await;
                    room.connection_failure(user_id).await
                })
                .await
            }
        }
    }

    async fn create_room(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        options: RoomCreateOptions,
    ) -> Result<()> {
        if session.is_in_room() {
            warn!("유저 {} 방 생성 거부: 이미 방에 있음", session.user_id);
            return Ok(());
        }
        let Some(channel) = self.current_channel(session).await else {
            warn!("유저 {} 방 생성 거부: 채널 미선택", session.user_id);
            return Ok(());
        };

        let room = channel
            .create_room(
                &options,
                session.user_id,
                session.user_name.clone(),
                connection.clone(),
            )
            .await;

        let snapshot = {
            let room = room.lock().await;
            session.set_current_room_id(room.id);
            room.snapshot()
        };
        connection.send(&outbound::room_create_and_join(&snapshot)).await
    }

    async fn join_room(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        room_id: u16,
    ) -> Result<()> {
        if session.is_in_room() {
            warn!("유저 {} 방 입장 거부: 이미 방에 있음", session.user_id);
            return Ok(());
        }
        let Some(channel) = self.current_channel(session).await else {
            warn!("유저 {} 방 입장 거부: 채널 미선택", session.user_id);
            return Ok(());
        };
        let Some(room) = channel.get_room(room_id).await else {
            warn!("유저 {} 없는 방 {} 입장 시도", session.user_id, room_id);
            return Ok(());
        };

        let result = {
            let mut room = room.lock().await;
            room.add_user(
                session.user_id,
                session.user_name.clone(),
                connection.clone(),
            )
            .await
        };

        match result {
            Ok(failed) => {
                session.set_current_room_id(room_id);
                close_failed_sinks(failed).await;
                channel.notify_browsers().await;
            }
            Err(RoomError::RoomFull) => {
                warn!("유저 {} 방 {} 입장 거부: 정원 초과", session.user_id, room_id);
            }
            Err(e) => {
                warn!("유저 {} 방 {} 입장 실패: {}", session.user_id, room_id, e);
            }
        }
        Ok(())
    }

    /// 게임 시작: 호스트(요청자)의 외부 주소를 함께 알린다
    async fn start_game(&self, session: &Arc<Session>) -> Result<()> {
        let net = session.external_net().await;
        self.with_room(session, "start", move |room, user_id| async move {
            let mut room = room.lock().await;
            room.start_game(user_id, net.external_ip, net.external_port).await
        })
        .await
    }

    /// 방 퇴장 처리 (명시적 Leave와 연결 종료 공용 경로)
    ///
    /// 호스트 승계 브로드캐스트는 Room이, 빈 방 삭제와 구독자 알림은
    /// 채널이 수행합니다.
    pub async fn depart_room(&self, session: &Arc<Session>) {
        let room_id = session.current_room_id();
        if room_id == 0 {
            return;
        }
        let Some(channel) = self.current_channel(session).await else {
            session.set_current_room_id(0);
            return;
        };
        let Some(room) = channel.get_room(room_id).await else {
            session.set_current_room_id(0);
            return;
        };

        let (outcome, failed) = {
            let mut room = room.lock().await;
            room.remove_user(session.user_id).await
        };
        session.set_current_room_id(0);
        close_failed_sinks(failed).await;

        match outcome {
            RemoveOutcome::Empty => {
                channel.remove_room_if_empty(room_id).await;
            }
            RemoveOutcome::Removed { new_host } => {
                if let Some(host) = new_host {
                    info!("방 {} 호스트 승계: {} → {}", room_id, session.user_id, host);
                }
                channel.notify_browsers().await;
            }
            RemoveOutcome::NotMember => {}
        }
    }

    async fn current_channel(&self, session: &Arc<Session>) -> Option<Arc<Channel>> {
        let (server_index, channel_index) = session.current_channel().await?;
        self.context.directory.get_channel(server_index, channel_index)
    }

    /// 방 필요 요청의 공통 앞부분: 방 조회 → 작업 → 실패 연결 정리
    async fn with_room<F, Fut>(
        &self,
        session: &Arc<Session>,
        operation: &str,
        run: F,
    ) -> Result<()>
    where
        F: FnOnce(Arc<tokio::sync::Mutex<crate::channel::room::Room>>, u32) -> Fut,
        Fut: std::future::Future<
            Output = Result<Vec<Arc<dyn PacketSink>>, RoomError>,
        >,
    {
        let room_id = session.current_room_id();
        if room_id == 0 {
            warn!("유저 {} {} 거부: 방에 없음", session.user_id, operation);
            return Ok(());
        }
        let Some(channel) = self.current_channel(session).await else {
            warn!("유저 {} {} 거부: 채널 미선택", session.user_id, operation);
            return Ok(());
        };
        let Some(room) = channel.get_room(room_id).await else {
            warn!("유저 {} {} 거부: 방 {} 없음", session.user_id, operation, room_id);
            session.set_current_room_id(0);
            return Ok(());
        };

        match run(room, session.user_id).await {
            Ok(failed) => close_failed_sinks(failed).await,
            Err(e) => {
                warn!("유저 {} {} 거부: {}", session.user_id, operation, e);
            }
        }
        Ok(())
    }
}
