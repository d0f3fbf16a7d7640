//! 송신 패킷 생성
//!
//! opcode별 응답/알림 프레임 본문을 생성합니다. 필드 순서가 곧 와이어
//! 계약이므로 이 파일의 인코딩 순서를 바꾸면 클라이언트와 어긋납니다.

use crate::channel::room::{RoomReadyStatus, RoomSettings};
use crate::protocol::buffer::PacketWriter;
use crate::protocol::inbound::RoomSettingsUpdate;
use crate::protocol::{ChatKind, OutPacket, PacketId};
use crate::service::gateway_service::{BuyMenu, Cosmetics, InventoryItem, Loadout, User};

/// 로그인 과정에서 코스메틱과 로드아웃 사이에 전송되는 아이템 해금 원장.
/// 구조는 해석하지 않고 바이트 그대로 내보낸다.
const UNLOCK_LEDGER: &[u8] = include_bytes!("unlock.bin");

/// Room 알림 하위 타입
#[repr(u8)]
enum RoomNotice {
    CreateAndJoin = 0,
    PlayerJoin = 1,
    PlayerLeave = 2,
    SetPlayerReady = 3,
    UpdateSettings = 4,
    SetHost = 5,
    Countdown = 6,
    GameStart = 7,
    GameEnd = 8,
    SetUserTeam = 9,
}

/// 채널 목록 항목 (와이어 DTO)
#[derive(Debug, Clone)]
pub struct ChannelServerEntry {
    pub server_id: u8,
    pub name: String,
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone)]
pub struct ChannelEntry {
    pub channel_id: u8,
    pub name: String,
    pub room_count: u16,
}

/// 방 목록 항목 (와이어 DTO)
#[derive(Debug, Clone)]
pub struct RoomListEntry {
    pub room_id: u16,
    pub room_name: String,
    pub host_user_id: u32,
    pub game_mode_id: u8,
    pub map_id: u8,
    pub player_count: u8,
    pub max_players: u8,
    pub in_game: bool,
}

/// 방 전체 상태 스냅샷 (신규 입장자에게 전송)
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: u16,
    pub host_user_id: u32,
    pub settings: RoomSettings,
    pub max_players: u8,
    pub members: Vec<RoomMemberEntry>,
}

#[derive(Debug, Clone)]
pub struct RoomMemberEntry {
    pub user_id: u32,
    pub user_name: String,
    pub team: u8,
    pub ready: RoomReadyStatus,
}

pub fn version_reply(bad_hash: bool, server_hash: &str) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(bad_hash as u8).write_string(server_hash);
    OutPacket::new(PacketId::Version, w.into_bytes())
}

pub fn user_start(user_id: u32, user_name: &str, player_name: &str, holepunch_port: u16) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u32(user_id)
        .write_string(user_name)
        .write_string(player_name)
        .write_u16(holepunch_port);
    OutPacket::new(PacketId::UserStart, w.into_bytes())
}

/// 전체 필드 업데이트 (로그인 직후 1회)
pub fn user_info_full(user: &User) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u32(user.user_id)
        .write_u32(0xFFFF_FFFF) // full-update 플래그
        .write_string(&user.player_name)
        .write_u16(user.level)
        .write_u64(user.cur_exp)
        .write_u64(user.max_exp)
        .write_u8(user.rank)
        .write_u8(user.vip_level)
        .write_u32(user.wins)
        .write_u32(user.kills)
        .write_u32(user.deaths)
        .write_u32(user.assists)
        .write_u16(user.avatar);
    OutPacket::new(PacketId::UserInfo, w.into_bytes())
}

pub fn inventory_items(items: &[InventoryItem]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u16(items.len() as u16);
    for item in items {
        w.write_u32(item.item_id).write_u16(item.count);
    }
    OutPacket::new(PacketId::Inventory, w.into_bytes())
}

pub fn favorite_cosmetics(c: &Cosmetics) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(1); // SetCosmetics
    for slot in [c.ct, c.ter, c.head, c.glove, c.back, c.steps, c.card, c.spray] {
        w.write_u32(slot);
    }
    OutPacket::new(PacketId::Favorite, w.into_bytes())
}

pub fn favorite_loadouts(loadouts: &[Loadout]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(0); // SetLoadout
    w.write_u8(loadouts.len() as u8);
    for l in loadouts {
        w.write_u8(l.loadout_id)
            .write_u32(l.primary)
            .write_u32(l.secondary)
            .write_u32(l.melee)
            .write_u32(l.grenade);
    }
    OutPacket::new(PacketId::Favorite, w.into_bytes())
}

pub fn option_buy_menu(menu: &BuyMenu) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(0); // SetBuyMenu
    w.write_u8(menu.submenus.len() as u8);
    for submenu in &menu.submenus {
        w.write_u8(submenu.index);
        w.write_u8(submenu.items.len() as u8);
        for item in &submenu.items {
            w.write_u32(*item);
        }
    }
    OutPacket::new(PacketId::Option, w.into_bytes())
}

pub fn unlock_ledger() -> OutPacket {
    OutPacket::new(PacketId::Unlock, UNLOCK_LEDGER.to_vec())
}

pub fn channel_list(servers: &[ChannelServerEntry]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(servers.len() as u8);
    for server in servers {
        w.write_u8(server.server_id).write_string(&server.name);
        w.write_u8(server.channels.len() as u8);
        for channel in &server.channels {
            w.write_u8(channel.channel_id)
                .write_string(&channel.name)
                .write_u16(channel.room_count);
        }
    }
    OutPacket::new(PacketId::ChannelList, w.into_bytes())
}

pub fn room_list(rooms: &[RoomListEntry]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u16(rooms.len() as u16);
    for room in rooms {
        w.write_u16(room.room_id)
            .write_string(&room.room_name)
            .write_u32(room.host_user_id)
            .write_u8(room.game_mode_id)
            .write_u8(room.map_id)
            .write_u8(room.player_count)
            .write_u8(room.max_players)
            .write_u8(room.in_game as u8);
    }
    OutPacket::new(PacketId::RoomList, w.into_bytes())
}

fn write_settings(w: &mut PacketWriter, s: &RoomSettings) {
    w.write_string(&s.room_name)
        .write_u8(s.game_mode_id)
        .write_u8(s.map_id)
        .write_u8(s.win_limit)
        .write_u16(s.kill_limit)
        .write_u16(s.start_money)
        .write_u8(s.force_camera)
        .write_u8(s.next_map_enabled)
        .write_u8(s.change_teams)
        .write_u8(s.enable_bots)
        .write_u8(s.difficulty)
        .write_u8(s.respawn_time)
        .write_u8(s.team_balance)
        .write_u8(s.weapon_restrictions)
        .write_u8(s.hltv_enabled);
}

pub fn room_create_and_join(snapshot: &RoomSnapshot) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::CreateAndJoin as u8);
    w.write_u16(snapshot.room_id).write_u32(snapshot.host_user_id);
    write_settings(&mut w, &snapshot.settings);
    w.write_u8(snapshot.max_players);
    w.write_u8(snapshot.members.len() as u8);
    for member in &snapshot.members {
        w.write_u32(member.user_id)
            .write_string(&member.user_name)
            .write_u8(member.team)
            .write_u8(member.ready as u8);
    }
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_player_join(user_id: u32, user_name: &str, team: u8) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::PlayerJoin as u8)
        .write_u32(user_id)
        .write_string(user_name)
        .write_u8(team);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_player_leave(user_id: u32) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::PlayerLeave as u8).write_u32(user_id);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_set_player_ready(user_id: u32, ready: RoomReadyStatus) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::SetPlayerReady as u8)
        .write_u32(user_id)
        .write_u8(ready as u8);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_update_settings(update: &RoomSettingsUpdate) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::UpdateSettings as u8);
    update.encode(&mut w);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_set_host(user_id: u32) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::SetHost as u8).write_u32(user_id);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_countdown(in_progress: bool, count: u8) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::Countdown as u8)
        .write_u8(in_progress as u8)
        .write_u8(count);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

/// 게임 시작 알림: 멤버들이 접속할 호스트의 외부 주소 포함
pub fn room_game_start(host_user_id: u32, host_ip: u32, host_port: u16) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::GameStart as u8)
        .write_u32(host_user_id)
        .write_u32(host_ip)
        .write_u16(host_port);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_game_end() -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::GameEnd as u8);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn room_set_user_team(user_id: u32, team: u8) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(RoomNotice::SetUserTeam as u8)
        .write_u32(user_id)
        .write_u8(team);
    OutPacket::new(PacketId::Room, w.into_bytes())
}

pub fn chat(kind: ChatKind, sender_name: &str, message: &str) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(kind as u8)
        .write_string(sender_name)
        .write_string(message);
    OutPacket::new(PacketId::Chat, w.into_bytes())
}

/// TCP 측 홀펀치 핸드셰이크 응답: 관측된 외부 주소
pub fn udp_observed(external_ip: u32, external_port: u16) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u32(external_ip).write_u16(external_port);
    OutPacket::new(PacketId::Udp, w.into_bytes())
}

/// 호스트 중계: 대상 유저의 보유 아이템
pub fn host_set_inventory(target_user_id: u32, items: &[InventoryItem]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(1).write_u32(target_user_id);
    w.write_u16(items.len() as u16);
    for item in items {
        w.write_u32(item.item_id).write_u16(item.count);
    }
    OutPacket::new(PacketId::Host, w.into_bytes())
}

/// 호스트 중계: 대상 유저의 로드아웃
pub fn host_set_loadout(target_user_id: u32, loadouts: &[Loadout]) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(2).write_u32(target_user_id);
    w.write_u8(loadouts.len() as u8);
    for l in loadouts {
        w.write_u8(l.loadout_id)
            .write_u32(l.primary)
            .write_u32(l.secondary)
            .write_u32(l.melee)
            .write_u32(l.grenade);
    }
    OutPacket::new(PacketId::Host, w.into_bytes())
}

/// 호스트 중계: 대상 유저의 구매 메뉴
pub fn host_set_buy_menu(target_user_id: u32, menu: &BuyMenu) -> OutPacket {
    let mut w = PacketWriter::new();
    w.write_u8(3).write_u32(target_user_id);
    w.write_u8(menu.submenus.len() as u8);
    for submenu in &menu.submenus {
        w.write_u8(submenu.index);
        w.write_u8(submenu.items.len() as u8);
        for item in &submenu.items {
            w.write_u32(*item);
        }
    }
    OutPacket::new(PacketId::Host, w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::PacketReader;

    #[test]
    fn test_unlock_ledger_is_byte_identical() {
        let packet = unlock_ledger();
        assert_eq!(packet.id, PacketId::Unlock);
        assert_eq!(packet.payload.len(), 770);
        assert_eq!(packet.payload, UNLOCK_LEDGER);
    }

    #[test]
    fn test_user_start_layout() {
        let packet = user_start(42, "alice", "playerAlice", 30002);
        assert_eq!(packet.id, PacketId::UserStart);

        let mut r = PacketReader::new(&packet.payload);
        assert_eq!(r.read_u32().expect("id"), 42);
        assert_eq!(r.read_string().expect("name"), "alice");
        assert_eq!(r.read_string().expect("player"), "playerAlice");
        assert_eq!(r.read_u16().expect("port"), 30002);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_room_set_host_layout() {
        let packet = room_set_host(7);
        let mut r = PacketReader::new(&packet.payload);
        assert_eq!(r.read_u8().expect("sub"), 5);
        assert_eq!(r.read_u32().expect("host"), 7);
    }

    #[test]
    fn test_channel_list_layout() {
        let servers = vec![ChannelServerEntry {
            server_id: 1,
            name: "Master".into(),
            channels: vec![
                ChannelEntry { channel_id: 1, name: "Channel 1".into(), room_count: 3 },
                ChannelEntry { channel_id: 2, name: "Channel 2".into(), room_count: 0 },
            ],
        }];
        let packet = channel_list(&servers);

        let mut r = PacketReader::new(&packet.payload);
        assert_eq!(r.read_u8().expect("서버 수"), 1);
        assert_eq!(r.read_u8().expect("서버 id"), 1);
        assert_eq!(r.read_string().expect("이름"), "Master");
        assert_eq!(r.read_u8().expect("채널 수"), 2);
        assert_eq!(r.read_u8().expect("채널 id"), 1);
        assert_eq!(r.read_string().expect("채널 이름"), "Channel 1");
        assert_eq!(r.read_u16().expect("방 수"), 3);
    }

    #[test]
    fn test_cosmetics_has_eight_slots() {
        let packet = favorite_cosmetics(&Cosmetics {
            ct: 1, ter: 2, head: 3, glove: 4, back: 5, steps: 6, card: 7, spray: 8,
        });
        // 하위 타입 1바이트 + 8슬롯 × u32
        assert_eq!(packet.payload.len(), 1 + 8 * 4);
        assert_eq!(packet.payload[0], 1);
    }
}
