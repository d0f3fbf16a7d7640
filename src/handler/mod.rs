//! 핸들러 레이어
//!
//! 패킷 타입 → 동작 라우팅을 담당합니다. 핸들러 실패는 로그 후 프레임
//! 드롭이 원칙이고, 프로토콜이 복구 불가(매직 불일치, 헤더 손상, 중복
//! 로그인)일 때만 소켓을 닫습니다.

pub mod chat_handler;
pub mod connection_handler;
pub mod favorite_handler;
pub mod host_handler;
pub mod login_handler;
pub mod room_handler;

pub use connection_handler::ConnectionHandler;

use std::sync::Arc;

use crate::channel::ChannelDirectory;
use crate::config::MasterServerConfig;
use crate::service::connection_service::PacketSink;
use crate::service::{ConnectionService, InventoryService, SessionService, UserService};

/// 핸들러가 공유하는 프로세스 전역 컨텍스트
///
/// 기동 시 한 번 조립되어 모든 연결 태스크에 전달됩니다.
/// 전역 싱글턴 대신 명시적 컨텍스트 객체를 씁니다.
pub struct ServerContext {
    pub config: MasterServerConfig,
    pub connections: Arc<ConnectionService>,
    pub sessions: Arc<SessionService>,
    pub users: Arc<UserService>,
    pub inventory: Arc<InventoryService>,
    pub directory: Arc<ChannelDirectory>,
}

/// 브로드캐스트 중 송신이 실패한 연결들의 뒷정리
///
/// 여기서는 닫기만 한다: 실제 방/세션 제거는 각 연결의 수신 루프가
/// 종료되면서 자신의 정리 절차로 수행한다 (브로드캐스트 도중 재귀
/// 제거 금지).
pub async fn close_failed_sinks(failed: Vec<Arc<dyn PacketSink>>) {
    for sink in failed {
        sink.close().await;
    }
}
