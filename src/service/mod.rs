//! 마스터 서버 서비스 레이어
//!
//! 연결 관리, 세션 레지스트리, 외부 서비스 게이트웨이, 홀펀치 엔드포인트 등
//! 핵심 서비스를 정의합니다.
//!
//! # 서비스 구조
//!
//! ```text
//! Service Layer
//! ├── ConnectionService (TCP 연결 관리)
//! │   ├── 프레임 송신 + 시퀀스 카운터
//! │   ├── 연결 등록/해제
//! │   └── 연결 통계
//! ├── SessionService (로그인 세션 레지스트리)
//! │   ├── userId → Session
//! │   └── 단일 세션 규칙
//! ├── GatewayService (외부 HTTP 서비스)
//! │   ├── 유저 서비스 클라이언트 + LRU 캐시
//! │   ├── 인벤토리 서비스 클라이언트
//! │   └── 생존 핑
//! └── HolepunchService (UDP NAT 통과 보조)
//! ```

pub mod connection_service;
pub mod gateway_service;
pub mod holepunch_service;
pub mod session_service;

pub use connection_service::{Connection, ConnectionService, ConnectionStats, PacketSink};
pub use gateway_service::{GatewayConfig, InventoryService, ServicePinger, UserService};
pub use holepunch_service::HolepunchService;
pub use session_service::{Session, SessionService};
