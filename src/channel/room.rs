//! 로비 방 상태 머신
//!
//! 멤버십, 준비 상태, 카운트다운, 호스트 승계, 브로드캐스트를 담당합니다.
//! 방 하나는 하나의 상호 배제 영역입니다: 모든 변이와 브로드캐스트 순회는
//! 바깥의 `Mutex<Room>`이 직렬화하며, 송신 실패로 끊어야 할 연결은
//! 호출자에게 돌려주어 브로드캐스트 도중의 재귀 제거를 막습니다.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::inbound::{RoomCreateOptions, RoomSettingsUpdate};
use crate::protocol::outbound::{self, RoomListEntry, RoomMemberEntry, RoomSnapshot};
use crate::protocol::OutPacket;
use crate::service::connection_service::PacketSink;

/// 멤버 준비 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoomReadyStatus {
    NotReady = 0,
    Ready = 1,
    InGame = 2,
}

/// 방 설정 전체
///
/// 생성 시 명시하지 않은 값의 기본값은 클라이언트가 기대하는 값과
/// 정확히 일치해야 합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    pub room_name: String,
    pub game_mode_id: u8,
    pub map_id: u8,
    pub win_limit: u8,
    pub kill_limit: u16,
    pub start_money: u16,
    pub force_camera: u8,
    pub next_map_enabled: u8,
    pub change_teams: u8,
    pub enable_bots: u8,
    pub difficulty: u8,
    pub respawn_time: u8,
    pub team_balance: u8,
    pub weapon_restrictions: u8,
    pub hltv_enabled: u8,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            room_name: String::new(),
            game_mode_id: 0,
            map_id: 1,
            win_limit: 10,
            kill_limit: 150,
            start_money: 16000,
            force_camera: 1,
            next_map_enabled: 0,
            change_teams: 0,
            enable_bots: 0,
            difficulty: 0,
            respawn_time: 3,
            team_balance: 0,
            weapon_restrictions: 0,
            hltv_enabled: 0,
        }
    }
}

impl RoomSettings {
    /// diff 적용
    pub fn apply(&mut self, update: &RoomSettingsUpdate) {
        if let Some(v) = &update.room_name {
            self.room_name = v.clone();
        }
        if let Some(v) = update.game_mode_id {
            self.game_mode_id = v;
        }
        if let Some(v) = update.map_id {
            self.map_id = v;
        }
        if let Some(v) = update.win_limit {
            self.win_limit = v;
        }
        if let Some(v) = update.kill_limit {
            self.kill_limit = v;
        }
        if let Some(v) = update.start_money {
            self.start_money = v;
        }
        if let Some(v) = update.force_camera {
            self.force_camera = v;
        }
        if let Some(v) = update.next_map_enabled {
            self.next_map_enabled = v;
        }
        if let Some(v) = update.change_teams {
            self.change_teams = v;
        }
        if let Some(v) = update.enable_bots {
            self.enable_bots = v;
        }
        if let Some(v) = update.difficulty {
            self.difficulty = v;
        }
        if let Some(v) = update.respawn_time {
            self.respawn_time = v;
        }
        if let Some(v) = update.team_balance {
            self.team_balance = v;
        }
        if let Some(v) = update.weapon_restrictions {
            self.weapon_restrictions = v;
        }
        if let Some(v) = update.hltv_enabled {
            self.hltv_enabled = v;
        }
    }
}

/// 방 작업 에러 (권한/상태 위반은 로그 후 드롭 대상)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("방이 가득 찼습니다")]
    RoomFull,

    #[error("방 멤버가 아닙니다: {0}")]
    NotMember(u32),

    #[error("호스트가 아닙니다: {0}")]
    NotHost(u32),

    #[error("모든 멤버가 준비되지 않았습니다")]
    NotAllReady,

    #[error("게임이 이미 진행 중입니다")]
    AlreadyInGame,

    #[error("진행 중인 게임이 없습니다")]
    NotInGame,
}

/// 방 멤버 (입장 순서 유지: 첫 입장 = 인덱스 0)
pub struct RoomMember {
    pub user_id: u32,
    pub user_name: String,
    pub sink: Arc<dyn PacketSink>,
    pub team: u8,
    pub ready: RoomReadyStatus,
}

/// 유저 제거 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// 제거 대상이 멤버가 아니었음
    NotMember,
    /// 방이 비었음: 채널이 삭제해야 함
    Empty,
    /// 방 유지. 호스트가 바뀌었으면 새 호스트 id
    Removed { new_host: Option<u32> },
}

/// 로비 방
pub struct Room {
    pub id: u16,
    pub settings: RoomSettings,
    pub host_user_id: u32,
    members: Vec<RoomMember>,
    pub in_game: bool,
    countdown: Option<u8>,
}

impl Room {
    /// 방 생성: 호스트가 첫 멤버
    pub fn new(
        id: u16,
        options: &RoomCreateOptions,
        host_user_id: u32,
        host_user_name: String,
        host_sink: Arc<dyn PacketSink>,
    ) -> Self {
        let mut settings = RoomSettings {
            room_name: if options.room_name.is_empty() {
                format!("Room #{}", id)
            } else {
                options.room_name.clone()
            },
            ..RoomSettings::default()
        };
        settings.game_mode_id = options.game_mode_id;
        settings.map_id = options.map_id;
        settings.enable_bots = options.enable_bots;

        Self {
            id,
            settings,
            host_user_id,
            members: vec![RoomMember {
                user_id: host_user_id,
                user_name: host_user_name,
                sink: host_sink,
                team: 0,
                ready: RoomReadyStatus::NotReady,
            }],
            in_game: false,
            countdown: None,
        }
    }

    /// 봇 방은 16인, 일반 방은 32인
    pub fn max_players(&self) -> u8 {
        if self.settings.enable_bots != 0 {
            16
        } else {
            32
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_free_slots(&self) -> bool {
        self.members.len() < self.max_players() as usize
    }

    pub fn is_member(&self, user_id: u32) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_host(&self, user_id: u32) -> bool {
        self.host_user_id == user_id
    }

    pub fn countdown(&self) -> Option<u8> {
        self.countdown
    }

    fn member_mut(&mut self, user_id: u32) -> Result<&mut RoomMember, RoomError> {
        self.members
            .iter_mut()
            .find(|m| m.user_id == user_id)
            .ok_or(RoomError::NotMember(user_id))
    }

    /// 호스트 제외 전원이 Ready인지
    fn all_guests_ready(&self) -> bool {
        self.members
            .iter()
            .all(|m| m.user_id == self.host_user_id || m.ready == RoomReadyStatus::Ready)
    }

    /// 브로드캐스트: 멤버 목록을 스냅샷한 뒤 순회 송신
    ///
    /// 실패한 연결은 여기서 건드리지 않고 모아서 반환합니다.
    /// 호출자는 방 잠금을 놓은 뒤에 닫아야 합니다.
    pub async fn broadcast(&self, packet: &OutPacket) -> Vec<Arc<dyn PacketSink>> {
        let sinks: Vec<Arc<dyn PacketSink>> =
            self.members.iter().map(|m| m.sink.clone()).collect();

        let mut failed = Vec::new();
        for sink in sinks {
            if let Err(e) = sink.send(packet).await {
                warn!("방 {} 브로드캐스트 실패: {}", self.id, e);
                failed.push(sink);
            }
        }
        failed
    }

    /// 특정 멤버 제외 브로드캐스트
    async fn broadcast_except(
        &self,
        packet: &OutPacket,
        excluded_user_id: u32,
    ) -> Vec<Arc<dyn PacketSink>> {
        let sinks: Vec<Arc<dyn PacketSink>> = self
            .members
            .iter()
            .filter(|m| m.user_id != excluded_user_id)
            .map(|m| m.sink.clone())
            .collect();

        let mut failed = Vec::new();
        for sink in sinks {
            if let Err(e) = sink.send(packet).await {
                warn!("방 {} 브로드캐스트 실패: {}", self.id, e);
                failed.push(sink);
            }
        }
        failed
    }

    /// 유저 입장
    ///
    /// 기존 멤버에게 입장 알림을, 새 유저에게 방 전체 상태를 보냅니다.
    pub async fn add_user(
        &mut self,
        user_id: u32,
        user_name: String,
        sink: Arc<dyn PacketSink>,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if !self.has_free_slots() {
            return Err(RoomError::RoomFull);
        }

        // 간단한 교대 배정: 팀 선택은 이후 setUserTeam으로
        let team = (self.members.len() % 2) as u8;

        let join_notice = outbound::room_player_join(user_id, &user_name, team);
        let mut failed = self.broadcast(&join_notice).await;

        self.members.push(RoomMember {
            user_id,
            user_name,
            sink: sink.clone(),
            team,
            ready: RoomReadyStatus::NotReady,
        });

        let snapshot_packet = outbound::room_create_and_join(&self.snapshot());
        if let Err(e) = sink.send(&snapshot_packet).await {
            warn!("방 {} 입장 상태 전송 실패 (user {}): {}", self.id, user_id, e);
            failed.push(sink);
        }

        debug!("유저 {} 방 {} 입장 ({}명)", user_id, self.id, self.members.len());
        Ok(failed)
    }

    /// 유저 제거
    ///
    /// 비면 `Empty`를 반환하고 (채널이 삭제), 호스트가 나가면 남은 목록의
    /// 인덱스 0 멤버가 새 호스트가 됩니다 (입장 순서 FIFO).
    pub async fn remove_user(&mut self, user_id: u32) -> (RemoveOutcome, Vec<Arc<dyn PacketSink>>) {
        let Some(index) = self.members.iter().position(|m| m.user_id == user_id) else {
            return (RemoveOutcome::NotMember, Vec::new());
        };
        self.members.remove(index);

        if self.members.is_empty() {
            return (RemoveOutcome::Empty, Vec::new());
        }

        let mut failed = self
            .broadcast(&outbound::room_player_leave(user_id))
            .await;

        let new_host = if self.host_user_id == user_id {
            let elected = self.members[0].user_id;
            self.host_user_id = elected;
            failed.extend(self.broadcast(&outbound::room_set_host(elected)).await);
            debug!("방 {} 호스트 승계: {}", self.id, elected);
            Some(elected)
        } else {
            None
        };

        (RemoveOutcome::Removed { new_host }, failed)
    }

    /// 준비 상태 토글 (NotReady ↔ Ready)
    pub async fn toggle_ready(
        &mut self,
        user_id: u32,
    ) -> Result<(RoomReadyStatus, Vec<Arc<dyn PacketSink>>), RoomError> {
        if self.in_game {
            return Err(RoomError::AlreadyInGame);
        }

        let member = self.member_mut(user_id)?;
        member.ready = match member.ready {
            RoomReadyStatus::Ready => RoomReadyStatus::NotReady,
            _ => RoomReadyStatus::Ready,
        };
        let status = member.ready;

        let failed = self
            .broadcast(&outbound::room_set_player_ready(user_id, status))
            .await;
        Ok((status, failed))
    }

    /// 팀 변경
    pub async fn set_user_team(
        &mut self,
        user_id: u32,
        team: u8,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if self.in_game {
            return Err(RoomError::AlreadyInGame);
        }

        let member = self.member_mut(user_id)?;
        member.team = team;

        Ok(self
            .broadcast(&outbound::room_set_user_team(user_id, team))
            .await)
    }

    /// 설정 변경 (호스트 전용, 게임 중 불가)
    pub async fn update_settings(
        &mut self,
        requester: u32,
        update: &RoomSettingsUpdate,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if !self.is_host(requester) {
            return Err(RoomError::NotHost(requester));
        }
        if self.in_game {
            return Err(RoomError::AlreadyInGame);
        }

        self.settings.apply(update);
        Ok(self
            .broadcast(&outbound::room_update_settings(update))
            .await)
    }

    /// 카운트다운 진행/중지 (호스트 전용)
    pub async fn set_countdown(
        &mut self,
        requester: u32,
        start: bool,
        count: u8,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if !self.is_host(requester) {
            return Err(RoomError::NotHost(requester));
        }
        if self.in_game {
            return Err(RoomError::AlreadyInGame);
        }

        if start {
            if !self.all_guests_ready() {
                return Err(RoomError::NotAllReady);
            }
            self.countdown = Some(count);
        } else {
            self.countdown = None;
        }

        Ok(self.broadcast(&outbound::room_countdown(start, count)).await)
    }

    /// 게임 시작 (호스트 전용, 전원 준비 필요)
    ///
    /// 멤버들이 접속할 호스트 외부 주소를 함께 알립니다.
    pub async fn start_game(
        &mut self,
        requester: u32,
        host_external_ip: u32,
        host_external_port: u16,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if !self.is_host(requester) {
            return Err(RoomError::NotHost(requester));
        }
        if self.in_game {
            return Err(RoomError::AlreadyInGame);
        }
        if !self.all_guests_ready() {
            return Err(RoomError::NotAllReady);
        }

        self.in_game = true;
        self.countdown = None;
        for member in &mut self.members {
            member.ready = RoomReadyStatus::InGame;
        }

        debug!("방 {} 게임 시작 (host {})", self.id, requester);
        Ok(self
            .broadcast(&outbound::room_game_start(
                self.host_user_id,
                host_external_ip,
                host_external_port,
            ))
            .await)
    }

    /// 게임 종료: 전원 NotReady로 복귀
    pub async fn end_game(&mut self) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        if !self.in_game {
            return Err(RoomError::NotInGame);
        }

        self.in_game = false;
        for member in &mut self.members {
            member.ready = RoomReadyStatus::NotReady;
        }

        debug!("방 {} 게임 종료", self.id);
        Ok(self.broadcast(&outbound::room_game_end()).await)
    }

    /// 호스트에 접속하지 못한 멤버를 로비 상태로 복귀
    pub async fn connection_failure(
        &mut self,
        user_id: u32,
    ) -> Result<Vec<Arc<dyn PacketSink>>, RoomError> {
        let member = self.member_mut(user_id)?;
        member.ready = RoomReadyStatus::NotReady;

        warn!("유저 {} 방 {} 호스트 접속 실패, 로비 복귀", user_id, self.id);
        Ok(self
            .broadcast(&outbound::room_set_player_ready(user_id, RoomReadyStatus::NotReady))
            .await)
    }

    /// 채팅 중계 (발신자 제외)
    pub async fn relay_chat(
        &self,
        sender_user_id: u32,
        packet: &OutPacket,
    ) -> Vec<Arc<dyn PacketSink>> {
        self.broadcast_except(packet, sender_user_id).await
    }

    /// 신규 입장자용 전체 상태 스냅샷
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id,
            host_user_id: self.host_user_id,
            settings: self.settings.clone(),
            max_players: self.max_players(),
            members: self
                .members
                .iter()
                .map(|m| RoomMemberEntry {
                    user_id: m.user_id,
                    user_name: m.user_name.clone(),
                    team: m.team,
                    ready: m.ready,
                })
                .collect(),
        }
    }

    /// 방 목록 항목
    pub fn list_entry(&self) -> RoomListEntry {
        RoomListEntry {
            room_id: self.id,
            room_name: self.settings.room_name.clone(),
            host_user_id: self.host_user_id,
            game_mode_id: self.settings.game_mode_id,
            map_id: self.settings.map_id,
            player_count: self.members.len() as u8,
            max_players: self.max_players(),
            in_game: self.in_game,
        }
    }
}
