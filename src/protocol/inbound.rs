//! 수신 패킷 해석
//!
//! opcode별 본문을 타입 있는 요청으로 해석합니다.
//! 알 수 없는 opcode는 `None`으로 반환되어 핸들러가 로그 후 버립니다.

use crate::protocol::buffer::PacketReader;
use crate::protocol::PacketId;
use crate::tool::error::CodecError;

/// 방 설정 변경 diff
///
/// 와이어 상에서는 u16 플래그 워드 뒤에 플래그 순서대로 존재하는
/// 필드만 이어집니다. 필드 순서는 플래그 비트 순서와 같습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSettingsUpdate {
    pub room_name: Option<String>,
    pub game_mode_id: Option<u8>,
    pub map_id: Option<u8>,
    pub win_limit: Option<u8>,
    pub kill_limit: Option<u16>,
    pub start_money: Option<u16>,
    pub force_camera: Option<u8>,
    pub next_map_enabled: Option<u8>,
    pub change_teams: Option<u8>,
    pub enable_bots: Option<u8>,
    pub difficulty: Option<u8>,
    pub respawn_time: Option<u8>,
    pub team_balance: Option<u8>,
    pub weapon_restrictions: Option<u8>,
    pub hltv_enabled: Option<u8>,
}

const FLAG_ROOM_NAME: u16 = 1 << 0;
const FLAG_GAME_MODE: u16 = 1 << 1;
const FLAG_MAP: u16 = 1 << 2;
const FLAG_WIN_LIMIT: u16 = 1 << 3;
const FLAG_KILL_LIMIT: u16 = 1 << 4;
const FLAG_START_MONEY: u16 = 1 << 5;
const FLAG_FORCE_CAMERA: u16 = 1 << 6;
const FLAG_NEXT_MAP: u16 = 1 << 7;
const FLAG_CHANGE_TEAMS: u16 = 1 << 8;
const FLAG_ENABLE_BOTS: u16 = 1 << 9;
const FLAG_DIFFICULTY: u16 = 1 << 10;
const FLAG_RESPAWN_TIME: u16 = 1 << 11;
const FLAG_TEAM_BALANCE: u16 = 1 << 12;
const FLAG_WEAPON_RESTRICTIONS: u16 = 1 << 13;
const FLAG_HLTV: u16 = 1 << 14;

impl RoomSettingsUpdate {
    pub fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        let flags = r.read_u16()?;
        let mut update = RoomSettingsUpdate::default();
        if flags & FLAG_ROOM_NAME != 0 {
            update.room_name = Some(r.read_string()?);
        }
        if flags & FLAG_GAME_MODE != 0 {
            update.game_mode_id = Some(r.read_u8()?);
        }
        if flags & FLAG_MAP != 0 {
            update.map_id = Some(r.read_u8()?);
        }
        if flags & FLAG_WIN_LIMIT != 0 {
            update.win_limit = Some(r.read_u8()?);
        }
        if flags & FLAG_KILL_LIMIT != 0 {
            update.kill_limit = Some(r.read_u16()?);
        }
        if flags & FLAG_START_MONEY != 0 {
            update.start_money = Some(r.read_u16()?);
        }
        if flags & FLAG_FORCE_CAMERA != 0 {
            update.force_camera = Some(r.read_u8()?);
        }
        if flags & FLAG_NEXT_MAP != 0 {
            update.next_map_enabled = Some(r.read_u8()?);
        }
        if flags & FLAG_CHANGE_TEAMS != 0 {
            update.change_teams = Some(r.read_u8()?);
        }
        if flags & FLAG_ENABLE_BOTS != 0 {
            update.enable_bots = Some(r.read_u8()?);
        }
        if flags & FLAG_DIFFICULTY != 0 {
            update.difficulty = Some(r.read_u8()?);
        }
        if flags & FLAG_RESPAWN_TIME != 0 {
            update.respawn_time = Some(r.read_u8()?);
        }
        if flags & FLAG_TEAM_BALANCE != 0 {
            update.team_balance = Some(r.read_u8()?);
        }
        if flags & FLAG_WEAPON_RESTRICTIONS != 0 {
            update.weapon_restrictions = Some(r.read_u8()?);
        }
        if flags & FLAG_HLTV != 0 {
            update.hltv_enabled = Some(r.read_u8()?);
        }
        Ok(update)
    }

    /// 브로드캐스트용 재인코딩 (수신과 동일한 플래그 배치)
    pub fn encode(&self, w: &mut crate::protocol::buffer::PacketWriter) {
        let mut flags = 0u16;
        if self.room_name.is_some() {
            flags |= FLAG_ROOM_NAME;
        }
        if self.game_mode_id.is_some() {
            flags |= FLAG_GAME_MODE;
        }
        if self.map_id.is_some() {
            flags |= FLAG_MAP;
        }
        if self.win_limit.is_some() {
            flags |= FLAG_WIN_LIMIT;
        }
        if self.kill_limit.is_some() {
            flags |= FLAG_KILL_LIMIT;
        }
        if self.start_money.is_some() {
            flags |= FLAG_START_MONEY;
        }
        if self.force_camera.is_some() {
            flags |= FLAG_FORCE_CAMERA;
        }
        if self.next_map_enabled.is_some() {
            flags |= FLAG_NEXT_MAP;
        }
        if self.change_teams.is_some() {
            flags |= FLAG_CHANGE_TEAMS;
        }
        if self.enable_bots.is_some() {
            flags |= FLAG_ENABLE_BOTS;
        }
        if self.difficulty.is_some() {
            flags |= FLAG_DIFFICULTY;
        }
        if self.respawn_time.is_some() {
            flags |= FLAG_RESPAWN_TIME;
        }
        if self.team_balance.is_some() {
            flags |= FLAG_TEAM_BALANCE;
        }
        if self.weapon_restrictions.is_some() {
            flags |= FLAG_WEAPON_RESTRICTIONS;
        }
        if self.hltv_enabled.is_some() {
            flags |= FLAG_HLTV;
        }

        w.write_u16(flags);
        if let Some(v) = &self.room_name {
            w.write_string(v);
        }
        if let Some(v) = self.game_mode_id {
            w.write_u8(v);
        }
        if let Some(v) = self.map_id {
            w.write_u8(v);
        }
        if let Some(v) = self.win_limit {
            w.write_u8(v);
        }
        if let Some(v) = self.kill_limit {
            w.write_u16(v);
        }
        if let Some(v) = self.start_money {
            w.write_u16(v);
        }
        if let Some(v) = self.force_camera {
            w.write_u8(v);
        }
        if let Some(v) = self.next_map_enabled {
            w.write_u8(v);
        }
        if let Some(v) = self.change_teams {
            w.write_u8(v);
        }
        if let Some(v) = self.enable_bots {
            w.write_u8(v);
        }
        if let Some(v) = self.difficulty {
            w.write_u8(v);
        }
        if let Some(v) = self.respawn_time {
            w.write_u8(v);
        }
        if let Some(v) = self.team_balance {
            w.write_u8(v);
        }
        if let Some(v) = self.weapon_restrictions {
            w.write_u8(v);
        }
        if let Some(v) = self.hltv_enabled {
            w.write_u8(v);
        }
    }
}

/// 방 생성 요청 옵션 (명시하지 않은 설정은 서버 기본값)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCreateOptions {
    pub room_name: String,
    pub game_mode_id: u8,
    pub map_id: u8,
    pub enable_bots: u8,
}

/// Room opcode 하위 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRequest {
    Create(RoomCreateOptions),
    Join { room_id: u16 },
    Leave,
    ToggleReady,
    Start,
    UpdateSettings(RoomSettingsUpdate),
    SetUserTeam { team: u8 },
    SetCountdown { start: bool, count: u8 },
    ConnectionFailure,
}

/// Host opcode 하위 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRequest {
    OnGameEnd,
    SetInventory { target_user_id: u32 },
    SetLoadout { target_user_id: u32 },
    SetBuyMenu { target_user_id: u32 },
}

/// Favorite opcode 하위 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteRequest {
    SetLoadout { loadout_id: u8, weapon_slot: u8, item_id: u32 },
    SetCosmetics { cosmetic_slot: u8, item_id: u32 },
}

/// Option opcode 하위 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionRequest {
    SetBuyMenu { menu_index: u8, items: Vec<u32> },
}

/// 채팅 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Room,
    Channel,
}

impl ChatKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ChatKind::Room),
            1 => Some(ChatKind::Channel),
            _ => None,
        }
    }
}

/// 해석된 수신 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPacket {
    Version { launcher: u8, client_hash: String },
    Login { username: String, password: String },
    Heartbeat,
    RequestChannels,
    RequestRoomList { server_index: u8, channel_index: u8 },
    Room(RoomRequest),
    Chat { kind: ChatKind, message: String },
    Host(HostRequest),
    Udp { local_ip: u32, local_port: u16 },
    Option(OptionRequest),
    Favorite(FavoriteRequest),
}

impl InboundPacket {
    /// opcode와 페이로드에서 요청 해석
    ///
    /// 알 수 없는 opcode/하위 타입은 `Ok(None)` — 연결을 끊지 않고
    /// 프레임만 버리는 드롭 대상입니다.
    pub fn parse(packet_type: u8, payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let Some(id) = PacketId::from_u8(packet_type) else {
            return Ok(None);
        };
        let mut r = PacketReader::new(payload);

        let packet = match id {
            PacketId::Version => InboundPacket::Version {
                launcher: r.read_u8()?,
                client_hash: r.read_string()?,
            },
            PacketId::Login => InboundPacket::Login {
                username: r.read_string()?,
                password: r.read_string()?,
            },
            PacketId::Heartbeat => InboundPacket::Heartbeat,
            PacketId::RequestChannels => InboundPacket::RequestChannels,
            PacketId::RequestRoomList => InboundPacket::RequestRoomList {
                server_index: r.read_u8()?,
                channel_index: r.read_u8()?,
            },
            PacketId::Room => match Self::parse_room(&mut r)? {
                Some(req) => InboundPacket::Room(req),
                None => return Ok(None),
            },
            PacketId::Chat => {
                let kind_byte = r.read_u8()?;
                let Some(kind) = ChatKind::from_u8(kind_byte) else {
                    return Ok(None);
                };
                InboundPacket::Chat { kind, message: r.read_string()? }
            }
            PacketId::Host => match Self::parse_host(&mut r)? {
                Some(req) => InboundPacket::Host(req),
                None => return Ok(None),
            },
            PacketId::Udp => InboundPacket::Udp {
                local_ip: r.read_u32()?,
                local_port: r.read_u16()?,
            },
            PacketId::Option => {
                let sub = r.read_u8()?;
                match sub {
                    0 => {
                        let menu_index = r.read_u8()?;
                        let items = r.read_array(|r| r.read_u32())?;
                        InboundPacket::Option(OptionRequest::SetBuyMenu { menu_index, items })
                    }
                    _ => return Ok(None),
                }
            }
            PacketId::Favorite => {
                let sub = r.read_u8()?;
                match sub {
                    0 => InboundPacket::Favorite(FavoriteRequest::SetLoadout {
                        loadout_id: r.read_u8()?,
                        weapon_slot: r.read_u8()?,
                        item_id: r.read_u32()?,
                    }),
                    1 => InboundPacket::Favorite(FavoriteRequest::SetCosmetics {
                        cosmetic_slot: r.read_u8()?,
                        item_id: r.read_u32()?,
                    }),
                    _ => return Ok(None),
                }
            }
            // 서버 송신 전용 opcode가 수신되면 드롭
            PacketId::ChannelList
            | PacketId::UserStart
            | PacketId::RoomList
            | PacketId::Inventory
            | PacketId::Unlock
            | PacketId::UserInfo => return Ok(None),
        };

        Ok(Some(packet))
    }

    fn parse_room(r: &mut PacketReader) -> Result<Option<RoomRequest>, CodecError> {
        let sub = r.read_u8()?;
        let req = match sub {
            0 => RoomRequest::Create(RoomCreateOptions {
                room_name: r.read_string()?,
                game_mode_id: r.read_u8()?,
                map_id: r.read_u8()?,
                enable_bots: r.read_u8()?,
            }),
            1 => RoomRequest::Join { room_id: r.read_u16()? },
            2 => RoomRequest::Leave,
            3 => RoomRequest::ToggleReady,
            4 => RoomRequest::Start,
            5 => RoomRequest::UpdateSettings(RoomSettingsUpdate::decode(r)?),
            6 => RoomRequest::SetUserTeam { team: r.read_u8()? },
            7 => {
                let action = r.read_u8()?;
                if action == 1 {
                    RoomRequest::SetCountdown { start: true, count: r.read_u8()? }
                } else {
                    RoomRequest::SetCountdown { start: false, count: 0 }
                }
            }
            8 => RoomRequest::ConnectionFailure,
            _ => return Ok(None),
        };
        Ok(Some(req))
    }

    fn parse_host(r: &mut PacketReader) -> Result<Option<HostRequest>, CodecError> {
        let sub = r.read_u8()?;
        let req = match sub {
            0 => HostRequest::OnGameEnd,
            1 => HostRequest::SetInventory { target_user_id: r.read_u32()? },
            2 => HostRequest::SetLoadout { target_user_id: r.read_u32()? },
            3 => HostRequest::SetBuyMenu { target_user_id: r.read_u32()? },
            _ => return Ok(None),
        };
        Ok(Some(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::PacketWriter;

    #[test]
    fn test_parse_login() {
        let mut w = PacketWriter::new();
        w.write_string("alice").write_string("pw");
        let packet = InboundPacket::parse(PacketId::Login as u8, &w.into_bytes())
            .expect("해석")
            .expect("로그인");
        assert_eq!(
            packet,
            InboundPacket::Login { username: "alice".into(), password: "pw".into() }
        );
    }

    #[test]
    fn test_parse_version() {
        let mut w = PacketWriter::new();
        w.write_u8(1).write_string("6246015");
        let packet = InboundPacket::parse(PacketId::Version as u8, &w.into_bytes())
            .expect("해석")
            .expect("버전");
        assert_eq!(
            packet,
            InboundPacket::Version { launcher: 1, client_hash: "6246015".into() }
        );
    }

    #[test]
    fn test_parse_room_create() {
        let mut w = PacketWriter::new();
        w.write_u8(0).write_string("my room").write_u8(2).write_u8(4).write_u8(1);
        let packet = InboundPacket::parse(PacketId::Room as u8, &w.into_bytes())
            .expect("해석")
            .expect("방 생성");
        match packet {
            InboundPacket::Room(RoomRequest::Create(opts)) => {
                assert_eq!(opts.room_name, "my room");
                assert_eq!(opts.game_mode_id, 2);
                assert_eq!(opts.map_id, 4);
                assert_eq!(opts.enable_bots, 1);
            }
            other => panic!("잘못된 해석: {:?}", other),
        }
    }

    #[test]
    fn test_parse_host_set_loadout() {
        let mut w = PacketWriter::new();
        w.write_u8(2).write_u32(42);
        let packet = InboundPacket::parse(PacketId::Host as u8, &w.into_bytes())
            .expect("해석")
            .expect("호스트");
        assert_eq!(
            packet,
            InboundPacket::Host(HostRequest::SetLoadout { target_user_id: 42 })
        );
    }

    #[test]
    fn test_settings_update_round_trip() {
        let update = RoomSettingsUpdate {
            room_name: Some("renamed".into()),
            kill_limit: Some(99),
            enable_bots: Some(1),
            ..Default::default()
        };

        let mut w = PacketWriter::new();
        update.encode(&mut w);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        let decoded = RoomSettingsUpdate::decode(&mut r).expect("디코드");
        assert_eq!(decoded, update);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_unknown_opcode_dropped() {
        assert_eq!(InboundPacket::parse(200, &[1, 2, 3]).expect("해석"), None);
    }

    #[test]
    fn test_unknown_room_subtype_dropped() {
        assert_eq!(
            InboundPacket::parse(PacketId::Room as u8, &[99]).expect("해석"),
            None
        );
    }

    #[test]
    fn test_server_only_opcode_dropped() {
        assert_eq!(
            InboundPacket::parse(PacketId::UserStart as u8, &[0; 8]).expect("해석"),
            None
        );
    }

    #[test]
    fn test_truncated_login_is_error() {
        // username 길이만 있고 본문 없음
        assert!(InboundPacket::parse(PacketId::Login as u8, &[5]).is_err());
    }
}
