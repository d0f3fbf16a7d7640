//! 세션 레지스트리
//!
//! 로그인에 성공한 유저의 인메모리 존재를 관리합니다.
//! 세션은 소유 연결이 살아있는 동안에만 존재하며, 같은 userId의
//! 두 번째 로그인은 기존 연결을 닫습니다 (단일 세션 규칙).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::service::connection_service::PacketSink;

/// 피어 투 피어 접속용 외부/내부 주소
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExternalNet {
    pub external_ip: u32,
    pub external_port: u16,
    pub local_ip: u32,
    pub local_port: u16,
}

/// 로그인 유저 한 명의 세션
pub struct Session {
    pub user_id: u32,
    pub user_name: String,
    pub connection: Arc<dyn PacketSink>,
    external_net: Mutex<ExternalNet>,
    /// (채널 서버 인덱스, 채널 인덱스). 채널 미선택 시 None
    current_channel: Mutex<Option<(u8, u8)>>,
    /// 0 = 방 없음
    current_room_id: AtomicU16,
    last_heartbeat: Mutex<Instant>,
}

impl Session {
    fn new(user_id: u32, user_name: String, connection: Arc<dyn PacketSink>, external_ip: u32) -> Self {
        Self {
            user_id,
            user_name,
            connection,
            external_net: Mutex::new(ExternalNet {
                external_ip,
                ..ExternalNet::default()
            }),
            current_channel: Mutex::new(None),
            current_room_id: AtomicU16::new(0),
            last_heartbeat: Mutex::new(Instant::now()),
        }
    }

    pub async fn external_net(&self) -> ExternalNet {
        *self.external_net.lock().await
    }

    /// TCP 측 홀펀치 핸드셰이크로 알게 된 내부 주소 기록
    pub async fn set_local_net(&self, local_ip: u32, local_port: u16) {
        let mut net = self.external_net.lock().await;
        net.local_ip = local_ip;
        net.local_port = local_port;
    }

    /// UDP 홀펀치로 관측된 외부 주소 기록
    pub async fn set_external_net(&self, external_ip: u32, external_port: u16) {
        let mut net = self.external_net.lock().await;
        net.external_ip = external_ip;
        net.external_port = external_port;
    }

    pub async fn current_channel(&self) -> Option<(u8, u8)> {
        *self.current_channel.lock().await
    }

    pub async fn set_current_channel(&self, server_index: u8, channel_index: u8) {
        *self.current_channel.lock().await = Some((server_index, channel_index));
    }

    pub fn current_room_id(&self) -> u16 {
        self.current_room_id.load(Ordering::Acquire)
    }

    pub fn set_current_room_id(&self, room_id: u16) {
        self.current_room_id.store(room_id, Ordering::Release);
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room_id() != 0
    }

    pub async fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    pub async fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock().await
    }
}

/// 세션 레지스트리
///
/// 프로세스 전역 userId → Session 맵입니다.
pub struct SessionService {
    sessions: DashMap<u32, Arc<Session>>,
}

impl SessionService {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// 세션 생성 (자격 증명 검증은 호출자 책임)
    ///
    /// 같은 userId의 기존 세션이 있으면 교체하고, 닫아야 할 기존 연결을
    /// 반환합니다. 호출자는 그 연결을 `close()` 해야 합니다.
    pub fn create(
        &self,
        user_id: u32,
        user_name: String,
        connection: Arc<dyn PacketSink>,
        external_ip: u32,
    ) -> (Arc<Session>, Option<Arc<dyn PacketSink>>) {
        let session = Arc::new(Session::new(user_id, user_name, connection, external_ip));
        let prior = self
            .sessions
            .insert(user_id, session.clone())
            .map(|old| old.connection.clone());

        if prior.is_some() {
            info!("유저 {} 중복 로그인: 기존 연결을 종료합니다", user_id);
        } else {
            debug!("유저 {} 세션 생성", user_id);
        }
        (session, prior)
    }

    pub fn get(&self, user_id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&user_id).map(|entry| entry.value().clone())
    }

    /// 연결 종료 시 세션 제거
    ///
    /// 단일 세션 규칙으로 교체된 옛 연결의 뒷정리가 새 세션을 지우지 않도록
    /// 소유 연결이 일치할 때만 제거합니다.
    pub fn remove_if_owner(&self, user_id: u32, connection_id: Uuid) -> Option<Arc<Session>> {
        let owned = self
            .sessions
            .get(&user_id)
            .map(|entry| entry.connection.sink_id() == connection_id)
            .unwrap_or(false);

        if owned {
            self.sessions.remove(&user_id).map(|(_, session)| {
                debug!("유저 {} 세션 제거", user_id);
                session
            })
        } else {
            None
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutPacket;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// 소켓 없는 기록용 sink
    struct StubSink {
        id: Uuid,
        closed: AtomicBool,
    }

    impl StubSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { id: Uuid::new_v4(), closed: AtomicBool::new(false) })
        }
    }

    #[async_trait]
    impl PacketSink for StubSink {
        fn sink_id(&self) -> Uuid {
            self.id
        }

        async fn send(&self, _packet: &OutPacket) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_single_session_rule() {
        let service = SessionService::new();
        let first = StubSink::new();
        let second = StubSink::new();

        let (_, prior) = service.create(42, "alice".into(), first.clone(), 0);
        assert!(prior.is_none());

        let (_, prior) = service.create(42, "alice".into(), second.clone(), 0);
        let prior = prior.expect("기존 연결이 반환되어야 한다");
        assert_eq!(prior.sink_id(), first.id);
        assert_eq!(service.count(), 1);

        // 새 세션의 소유 연결은 두 번째 sink
        let session = service.get(42).expect("세션");
        assert_eq!(session.connection.sink_id(), second.id);
    }

    #[tokio::test]
    async fn test_remove_only_by_owner() {
        let service = SessionService::new();
        let first = StubSink::new();
        let second = StubSink::new();

        service.create(42, "alice".into(), first.clone(), 0);
        service.create(42, "alice".into(), second.clone(), 0);

        // 교체된 옛 연결의 정리는 새 세션을 지우지 못한다
        assert!(service.remove_if_owner(42, first.id).is_none());
        assert_eq!(service.count(), 1);

        assert!(service.remove_if_owner(42, second.id).is_some());
        assert_eq!(service.count(), 0);
    }

    #[tokio::test]
    async fn test_room_and_channel_bookkeeping() {
        let service = SessionService::new();
        let sink = StubSink::new();
        let (session, _) = service.create(7, "bob".into(), sink, 0x0a000001);

        assert!(!session.is_in_room());
        session.set_current_room_id(3);
        assert!(session.is_in_room());
        assert_eq!(session.current_room_id(), 3);

        assert_eq!(session.current_channel().await, None);
        session.set_current_channel(1, 2).await;
        assert_eq!(session.current_channel().await, Some((1, 2)));

        let net = session.external_net().await;
        assert_eq!(net.external_ip, 0x0a000001);
    }
}
