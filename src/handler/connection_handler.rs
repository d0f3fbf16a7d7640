//! 연결 핸들러
//!
//! 소켓별 수신 루프와 상태 머신을 소유합니다.
//!
//! # 상태 머신
//!
//! ```text
//! Connected ──Version──▶ Identified ──Login──▶ Authenticated ──▶ Closed
//! ```
//!
//! - Connected: Version 교환만 허용, 그 외는 소켓 종료
//! - Identified: Login만 의미 있음, Heartbeat 허용
//! - Authenticated: 전체 패킷 허용 (핸들러 수준 권한 검사),
//!   하트비트 제한 시간 내 수신 필요
//!
//! 같은 연결의 프레임은 도착 순서대로 처리되며 두 핸들러가 동시에 돌지
//! 않습니다 (수신 루프가 곧 실행 컨텍스트). 게이트웨이 호출 중에도 다른
//! 연결의 핸들러는 계속 진행됩니다.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::handler::chat_handler::ChatHandler;
use crate::handler::favorite_handler::FavoriteHandler;
use crate::handler::host_handler::HostHandler;
use crate::handler::login_handler::LoginHandler;
use crate::handler::room_handler::RoomHandler;
use crate::handler::ServerContext;
use crate::protocol::{Frame, FrameAssembler, InboundPacket};
use crate::service::connection_service::{Connection, PacketSink};
use crate::service::session_service::Session;
use crate::tool::SimpleUtils;

/// 소켓 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Identified,
    Authenticated,
}

/// 프레임 처리 결과
enum Flow {
    Continue,
    Close,
}

/// 연결 핸들러
pub struct ConnectionHandler {
    context: Arc<ServerContext>,
    login: LoginHandler,
    room: RoomHandler,
    host: HostHandler,
    favorite: FavoriteHandler,
    chat: ChatHandler,
}

impl ConnectionHandler {
    pub fn new(context: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            login: LoginHandler::new(context.clone()),
            room: RoomHandler::new(context.clone()),
            host: HostHandler::new(context.clone()),
            favorite: FavoriteHandler::new(context.clone()),
            chat: ChatHandler::new(context.clone()),
            context,
        })
    }

    /// accept 루프: 연결마다 태스크를 하나씩 띄운다
    pub async fn run_accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("새 연결: {}", addr);
                    let handler = self.clone();
                    tokio::spawn(async move {
                        handler.handle_socket(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("연결 수락 실패: {}", e);
                }
            }
        }
    }

    /// 소켓 하나의 전체 수명: 등록 → 수신 루프 → 해제 처리
    pub async fn handle_socket(&self, stream: TcpStream, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let connection = Arc::new(Connection::new(
            write_half,
            addr,
            self.context.config.log_packets,
        ));

        if self.context.connections.register(connection.clone()).await.is_err() {
            // 수용량 초과: 그대로 끊는다
            connection.close().await;
            return;
        }

        let mut owner: Option<u32> = None;
        if let Err(e) = self.connection_loop(&connection, read_half, &mut owner).await {
            debug!("연결 [{}] 종료 사유: {}", addr, e);
        }

        connection.close().await;
        self.process_disconnect(&connection, owner).await;
        debug!("연결 해제 완료: {}", addr);
    }

    /// 수신 루프: 바이트 누적 → 프레임 조립 → 상태 머신 디스패치
    async fn connection_loop(
        &self,
        connection: &Arc<Connection>,
        mut read_half: OwnedReadHalf,
        owner: &mut Option<u32>,
    ) -> Result<()> {
        let mut assembler = FrameAssembler::new();
        let mut state = ConnectionState::Connected;
        let mut buf = [0u8; 4096];

        loop {
            // 로그인 전에는 핸드셰이크 제한, 이후에는 하트비트 제한
            let deadline_secs = if state == ConnectionState::Authenticated {
                self.context.config.heartbeat_timeout_secs
            } else {
                self.context.config.handshake_timeout_secs
            };

            let read = tokio::select! {
                // 단일 세션 교체/브로드캐스트 실패로 외부에서 닫힌 경우
                _ = connection.closed() => return Ok(()),
                r = timeout(Duration::from_secs(deadline_secs), read_half.read(&mut buf)) => r,
            };

            let n = match read {
                Err(_) => {
                    info!(
                        "연결 [{}] 제한 시간 초과 ({}초)",
                        connection.remote_addr(),
                        deadline_secs
                    );
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(n)) => n,
            };

            if self.context.config.log_packets {
                debug!(
                    "수신 [{}] {}",
                    connection.remote_addr(),
                    SimpleUtils::bytes_to_hex(&buf[..n])
                );
            }

            assembler.push(&buf[..n]);
            loop {
                match assembler.next_frame() {
                    Ok(Some(frame)) => {
                        match self.dispatch(connection, &mut state, owner, frame).await? {
                            Flow::Continue => {}
                            Flow::Close => return Ok(()),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // 헤더 손상은 복구 불가: 소켓을 닫는다
                        warn!("연결 [{}] 프레임 손상: {}", connection.remote_addr(), e);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// 상태 머신 + 패킷 타입 라우팅
    async fn dispatch(
        &self,
        connection: &Arc<Connection>,
        state: &mut ConnectionState,
        owner: &mut Option<u32>,
        frame: Frame,
    ) -> Result<Flow> {
        let packet = match InboundPacket::parse(frame.packet_type, &frame.payload) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                // 알 수 없는 opcode: 프레임만 버린다
                warn!(
                    "연결 [{}] 알 수 없는 패킷 드롭: type={}",
                    connection.remote_addr(),
                    frame.packet_type
                );
                return Ok(Flow::Continue);
            }
            Err(e) => {
                // 본문 해석 실패: 헤더는 정상이므로 프레임만 버린다
                warn!(
                    "연결 [{}] 본문 해석 실패 (type={}): {}",
                    connection.remote_addr(),
                    frame.packet_type,
                    e
                );
                return Ok(Flow::Continue);
            }
        };

        match *state {
            ConnectionState::Connected => match packet {
                InboundPacket::Version { launcher, client_hash } => {
                    self.login.handle_version(connection, launcher, &client_hash).await?;
                    *state = ConnectionState::Identified;
                    Ok(Flow::Continue)
                }
                other => {
                    warn!(
                        "연결 [{}] Version 이전의 패킷: {:?}",
                        connection.remote_addr(),
                        other
                    );
                    Ok(Flow::Close)
                }
            },

            ConnectionState::Identified => match packet {
                InboundPacket::Login { username, password } => {
                    match self.login.handle_login(connection, &username, &password).await? {
                        Some(session) => {
                            *owner = Some(session.user_id);
                            *state = ConnectionState::Authenticated;
                            Ok(Flow::Continue)
                        }
                        None => Ok(Flow::Close),
                    }
                }
                InboundPacket::Heartbeat => Ok(Flow::Continue),
                other => {
                    warn!(
                        "연결 [{}] 로그인 이전의 패킷: {:?}",
                        connection.remote_addr(),
                        other
                    );
                    Ok(Flow::Close)
                }
            },

            ConnectionState::Authenticated => {
                let Some(session) = self.session_of(connection, *owner) else {
                    // 단일 세션 규칙으로 교체된 좀비 연결
                    return Ok(Flow::Close);
                };
                self.dispatch_authenticated(connection, &session, packet).await
            }
        }
    }

    async fn dispatch_authenticated(
        &self,
        connection: &Arc<Connection>,
        session: &Arc<Session>,
        packet: InboundPacket,
    ) -> Result<Flow> {
        match packet {
            InboundPacket::Version { .. } | InboundPacket::Login { .. } => {
                // 같은 연결의 중복 로그인은 프로토콜 위반
                warn!("유저 {} 중복 로그인 시도, 연결 종료", session.user_id);
                Ok(Flow::Close)
            }
            InboundPacket::Heartbeat => {
                self.login.handle_heartbeat(session).await;
                Ok(Flow::Continue)
            }
            InboundPacket::RequestChannels => {
                self.room.handle_request_channels(connection).await?;
                Ok(Flow::Continue)
            }
            InboundPacket::RequestRoomList { server_index, channel_index } => {
                self.room
                    .handle_request_room_list(connection, session, server_index, channel_index)
                    .await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Room(request) => {
                self.room.handle_room_request(connection, session, request).await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Chat { kind, message } => {
                self.chat.handle_chat(connection, session, kind, &message).await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Host(request) => {
                self.host.handle_host_request(connection, session, request).await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Udp { local_ip, local_port } => {
                self.login
                    .handle_udp_handshake(connection, session, local_ip, local_port)
                    .await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Option(request) => {
                self.favorite.handle_option_request(session, request).await?;
                Ok(Flow::Continue)
            }
            InboundPacket::Favorite(request) => {
                self.favorite.handle_favorite_request(session, request).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// 이 연결이 소유한 세션 조회 (교체된 연결이면 None)
    fn session_of(&self, connection: &Arc<Connection>, owner: Option<u32>) -> Option<Arc<Session>> {
        let user_id = owner?;
        let session = self.context.sessions.get(user_id)?;
        if session.connection.sink_id() == connection.id() {
            Some(session)
        } else {
            None
        }
    }

    /// 연결 해제의 후처리
    ///
    /// 소유자가 있으면 세션을 지우고, 방에 있었으면 퇴장 경로(호스트 승계,
    /// 빈 방 삭제 포함)를 태운다. 진행 중이던 게이트웨이 호출은 이 시점에
    /// 이미 끝나 있다 (같은 태스크에서 순차 실행되므로) — 방이 반쯤 변경된
    /// 채로 남지 않는다.
    async fn process_disconnect(&self, connection: &Arc<Connection>, owner: Option<u32>) {
        self.context
            .directory
            .remove_browser_everywhere(connection.id())
            .await;

        if let Some(user_id) = owner {
            if let Some(session) = self.context.sessions.remove_if_owner(user_id, connection.id())
            {
                self.room.depart_room(&session).await;
                info!("유저 {} 연결 해제", user_id);
            }
        }

        self.context.connections.unregister(connection.id()).await;
    }
}
