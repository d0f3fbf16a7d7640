//! 로비 채널 트리
//!
//! 채널 서버 → 채널 → 방의 3단계 계층입니다. 채널은 방 맵과 방 목록
//! 구독자(browser)를 관리하며, 빈 방을 지우고 구독자에게 목록 변경을
//! 밀어줍니다. 방 id는 채널 서버 수명 내에서 단조 증가하며 재사용되지
//! 않습니다.

pub mod room;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::inbound::RoomCreateOptions;
use crate::protocol::outbound::{self, ChannelEntry, ChannelServerEntry, RoomListEntry};
use crate::service::connection_service::PacketSink;
use room::Room;

/// 채널: 방 컨테이너 + 방 목록 구독자
pub struct Channel {
    pub index: u8,
    pub name: String,
    rooms: Mutex<HashMap<u16, Arc<Mutex<Room>>>>,
    /// 채널 서버 단위로 공유되는 방 id 할당기
    room_id_alloc: Arc<AtomicU16>,
    browsers: Mutex<HashMap<Uuid, Arc<dyn PacketSink>>>,
}

impl Channel {
    fn new(index: u8, name: String, room_id_alloc: Arc<AtomicU16>) -> Self {
        Self {
            index,
            name,
            rooms: Mutex::new(HashMap::new()),
            room_id_alloc,
            browsers: Mutex::new(HashMap::new()),
        }
    }

    /// 방 생성: 호스트가 첫 멤버로 들어간 방을 등록
    pub async fn create_room(
        &self,
        options: &RoomCreateOptions,
        host_user_id: u32,
        host_user_name: String,
        host_sink: Arc<dyn PacketSink>,
    ) -> Arc<Mutex<Room>> {
        let room_id = self.room_id_alloc.fetch_add(1, Ordering::AcqRel);
        let room = Arc::new(Mutex::new(Room::new(
            room_id,
            options,
            host_user_id,
            host_user_name,
            host_sink,
        )));

        self.rooms.lock().await.insert(room_id, room.clone());
        info!("채널 {} 방 {} 생성 (host {})", self.index, room_id, host_user_id);

        self.notify_browsers().await;
        room
    }

    pub async fn get_room(&self, room_id: u16) -> Option<Arc<Mutex<Room>>> {
        self.rooms.lock().await.get(&room_id).cloned()
    }

    /// 빈 방 제거. 제거했으면 구독자에게 목록을 다시 밀어준다
    pub async fn remove_room_if_empty(&self, room_id: u16) -> bool {
        let removed = {
            let mut rooms = self.rooms.lock().await;
            let is_empty = match rooms.get(&room_id) {
                Some(room) => room.lock().await.member_count() == 0,
                None => false,
            };
            if is_empty {
                rooms.remove(&room_id);
            }
            is_empty
        };

        if removed {
            info!("채널 {} 빈 방 {} 삭제", self.index, room_id);
            self.notify_browsers().await;
        }
        removed
    }

    pub async fn room_count(&self) -> u16 {
        self.rooms.lock().await.len() as u16
    }

    pub async fn room_list_entries(&self) -> Vec<RoomListEntry> {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.lock().await.values().cloned().collect();
        let mut entries = Vec::with_capacity(rooms.len());
        for room in rooms {
            entries.push(room.lock().await.list_entry());
        }
        entries.sort_by_key(|entry| entry.room_id);
        entries
    }

    /// 방 목록 구독 시작 (방 목록 요청 시점)
    pub async fn add_browser(&self, sink: Arc<dyn PacketSink>) {
        self.browsers.lock().await.insert(sink.sink_id(), sink);
    }

    pub async fn remove_browser(&self, connection_id: Uuid) {
        self.browsers.lock().await.remove(&connection_id);
    }

    /// 구독자 전원에게 채팅/알림 패킷 전달 (발신자 제외)
    pub async fn relay_to_browsers(
        &self,
        packet: &crate::protocol::OutPacket,
        excluded: Uuid,
    ) {
        let sinks: Vec<Arc<dyn PacketSink>> = self
            .browsers
            .lock()
            .await
            .values()
            .filter(|sink| sink.sink_id() != excluded)
            .cloned()
            .collect();

        for sink in sinks {
            if let Err(e) = sink.send(packet).await {
                warn!("채널 {} 중계 실패: {}", self.index, e);
                self.remove_browser(sink.sink_id()).await;
                sink.close().await;
            }
        }
    }

    /// 구독자 전원에게 최신 방 목록 전송
    pub async fn notify_browsers(&self) {
        let sinks: Vec<Arc<dyn PacketSink>> =
            self.browsers.lock().await.values().cloned().collect();
        if sinks.is_empty() {
            return;
        }

        let packet = outbound::room_list(&self.room_list_entries().await);
        for sink in sinks {
            if let Err(e) = sink.send(&packet).await {
                debug!("채널 {} 방 목록 전송 실패: {}", self.index, e);
                self.remove_browser(sink.sink_id()).await;
                sink.close().await;
            }
        }
    }
}

/// 채널 서버: 이름 붙은 채널 묶음
pub struct ChannelServer {
    pub id: u8,
    pub name: String,
    pub channels: Vec<Arc<Channel>>,
}

impl ChannelServer {
    pub fn new(id: u8, name: String, channel_count: u8) -> Self {
        // 방 id는 서버 수명 내 단조 증가, 0은 "방 없음"으로 예약
        let room_id_alloc = Arc::new(AtomicU16::new(1));
        let channels = (1..=channel_count)
            .map(|index| {
                Arc::new(Channel::new(
                    index,
                    format!("{} Channel {}", name, index),
                    room_id_alloc.clone(),
                ))
            })
            .collect();

        Self { id, name, channels }
    }

    pub fn get_channel(&self, channel_index: u8) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|channel| channel.index == channel_index)
            .cloned()
    }
}

/// 로그인 시 클라이언트에 광고되는 로비 트리의 루트
pub struct ChannelDirectory {
    pub servers: Vec<Arc<ChannelServer>>,
}

impl ChannelDirectory {
    pub fn new(servers: Vec<Arc<ChannelServer>>) -> Self {
        Self { servers }
    }

    /// 기본 구성: 채널 서버 1개, 채널 5개
    pub fn with_defaults(server_name: &str) -> Self {
        Self::new(vec![Arc::new(ChannelServer::new(1, server_name.to_string(), 5))])
    }

    pub fn get_server(&self, server_id: u8) -> Option<Arc<ChannelServer>> {
        self.servers
            .iter()
            .find(|server| server.id == server_id)
            .cloned()
    }

    pub fn get_channel(&self, server_id: u8, channel_index: u8) -> Option<Arc<Channel>> {
        self.get_server(server_id)?.get_channel(channel_index)
    }

    /// 채널 목록 열거 (serverId, channelId, 이름, 방 수)
    pub async fn entries(&self) -> Vec<ChannelServerEntry> {
        let mut servers = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            let mut channels = Vec::with_capacity(server.channels.len());
            for channel in &server.channels {
                channels.push(ChannelEntry {
                    channel_id: channel.index,
                    name: channel.name.clone(),
                    room_count: channel.room_count().await,
                });
            }
            servers.push(ChannelServerEntry {
                server_id: server.id,
                name: server.name.clone(),
                channels,
            });
        }
        servers
    }

    /// 연결 종료 시 모든 채널의 구독자 목록에서 제거
    pub async fn remove_browser_everywhere(&self, connection_id: Uuid) {
        for server in &self.servers {
            for channel in &server.channels {
                channel.remove_browser(connection_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OutPacket, PacketId};
    use anyhow::Result;
    use async_trait::async_trait;

    struct NullSink {
        id: Uuid,
        sent: Mutex<Vec<OutPacket>>,
    }

    impl NullSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { id: Uuid::new_v4(), sent: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl PacketSink for NullSink {
        fn sink_id(&self) -> Uuid {
            self.id
        }

        async fn send(&self, packet: &OutPacket) -> Result<()> {
            self.sent.lock().await.push(packet.clone());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn options() -> RoomCreateOptions {
        RoomCreateOptions {
            room_name: String::new(),
            game_mode_id: 0,
            map_id: 1,
            enable_bots: 0,
        }
    }

    #[tokio::test]
    async fn test_room_ids_monotonic_across_channels() {
        let server = ChannelServer::new(1, "Master".into(), 2);
        let channel_a = server.get_channel(1).expect("채널 1");
        let channel_b = server.get_channel(2).expect("채널 2");

        let first = channel_a
            .create_room(&options(), 1, "a".into(), NullSink::new())
            .await;
        let second = channel_b
            .create_room(&options(), 2, "b".into(), NullSink::new())
            .await;

        let first_id = first.lock().await.id;
        let second_id = second.lock().await.id;
        assert_eq!(first_id, 1);
        // 서버 수명 내 단조 증가: 다른 채널이어도 재사용 없음
        assert_eq!(second_id, 2);
    }

    #[tokio::test]
    async fn test_empty_room_gc_and_browser_notify() {
        let server = ChannelServer::new(1, "Master".into(), 1);
        let channel = server.get_channel(1).expect("채널");

        let browser = NullSink::new();
        channel.add_browser(browser.clone()).await;

        let room = channel
            .create_room(&options(), 1, "host".into(), NullSink::new())
            .await;
        let room_id = room.lock().await.id;
        assert_eq!(channel.room_count().await, 1);

        // 비우고 GC
        let (outcome, _) = room.lock().await.remove_user(1).await;
        assert_eq!(outcome, room::RemoveOutcome::Empty);
        assert!(channel.remove_room_if_empty(room_id).await);
        assert_eq!(channel.room_count().await, 0);
        assert!(channel.get_room(room_id).await.is_none());

        // 구독자는 생성/삭제 때마다 RoomList를 받는다
        let lists: Vec<OutPacket> = browser
            .sent
            .lock()
            .await
            .iter()
            .filter(|p| p.id == PacketId::RoomList)
            .cloned()
            .collect();
        assert_eq!(lists.len(), 2);
        // 마지막 목록은 비어 있어야 한다 (count u16 == 0)
        assert_eq!(&lists[1].payload[..2], &[0, 0]);
    }

    #[tokio::test]
    async fn test_nonempty_room_is_not_collected() {
        let server = ChannelServer::new(1, "Master".into(), 1);
        let channel = server.get_channel(1).expect("채널");

        let room = channel
            .create_room(&options(), 1, "host".into(), NullSink::new())
            .await;
        let room_id = room.lock().await.id;

        assert!(!channel.remove_room_if_empty(room_id).await);
        assert_eq!(channel.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_directory_enumeration() {
        let directory = ChannelDirectory::with_defaults("Master");
        let entries = directory.entries().await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_id, 1);
        assert_eq!(entries[0].channels.len(), 5);
        assert!(entries[0].channels.iter().all(|c| c.room_count == 0));

        let channel = directory.get_channel(1, 3).expect("채널 3");
        channel
            .create_room(&options(), 1, "h".into(), NullSink::new())
            .await;

        let entries = directory.entries().await;
        assert_eq!(entries[0].channels[2].room_count, 1);
        assert!(directory.get_channel(2, 1).is_none());
    }
}
