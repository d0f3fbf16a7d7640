//! 연결 서비스
//!
//! TCP 소켓별 송신 상태(시퀀스 카운터 포함)와 프로세스 전역 연결 등록을
//! 담당합니다. 수신 루프는 handler 레이어가 소유합니다.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::OutPacket;
use crate::tool::SimpleUtils;

/// 패킷 송신 시 수신자 추상화
///
/// 방/세션 레이어는 소켓 대신 이 트레이트를 바라봅니다.
/// 테스트에서는 기록용 구현으로 대체합니다.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// 연결 식별자
    fn sink_id(&self) -> Uuid;

    /// 패킷 한 개 송신. 실패는 연결이 깨진 것으로 간주됩니다.
    async fn send(&self, packet: &OutPacket) -> Result<()>;

    /// 소켓 강제 종료. 수신 루프가 EOF를 보고 정리 절차를 밟습니다.
    async fn close(&self);
}

impl std::fmt::Debug for dyn PacketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PacketSink({})", self.sink_id())
    }
}

/// 송신 절반 + 방향별 시퀀스 카운터
struct SequencedWriter {
    writer: BufWriter<OwnedWriteHalf>,
    sequence: u8,
}

/// 개별 TCP 연결의 송신 측 상태
///
/// 시퀀스는 쓰기 성공 후 증가하며 255 다음은 0입니다. 같은 뮤텍스 아래에
/// 있으므로 프레임 순서와 시퀀스 순서는 항상 일치합니다.
pub struct Connection {
    id: Uuid,
    remote_addr: SocketAddr,
    writer: Mutex<SequencedWriter>,
    close_signal: Notify,
    log_packets: bool,
}

impl Connection {
    pub fn new(write_half: OwnedWriteHalf, remote_addr: SocketAddr, log_packets: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            writer: Mutex::new(SequencedWriter {
                writer: BufWriter::new(write_half),
                sequence: 0,
            }),
            close_signal: Notify::new(),
            log_packets,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// `close()` 호출까지 대기. 수신 루프가 select로 함께 기다립니다.
    pub async fn closed(&self) {
        self.close_signal.notified().await;
    }
}

#[async_trait]
impl PacketSink for Connection {
    fn sink_id(&self) -> Uuid {
        self.id
    }

    async fn send(&self, packet: &OutPacket) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let frame = packet.to_frame(guard.sequence);

        if self.log_packets {
            debug!(
                "송신 [{}] seq={} {}",
                self.remote_addr,
                guard.sequence,
                SimpleUtils::bytes_to_hex(&frame)
            );
        }

        guard.writer.write_all(&frame).await?;
        guard.writer.flush().await?;
        guard.sequence = guard.sequence.wrapping_add(1);
        Ok(())
    }

    async fn close(&self) {
        // notify_one은 대기자가 없어도 허가를 남겨, 이후의 closed() 호출이
        // 즉시 깨어난다
        self.close_signal.notify_one();
        let mut guard = self.writer.lock().await;
        if let Err(e) = guard.writer.shutdown().await {
            debug!("소켓 종료 중 무시된 에러 [{}]: {}", self.remote_addr, e);
        }
    }
}

/// 연결 통계
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub current_connections: u32,
    pub peak_connections: u32,
}

/// 연결 서비스
///
/// 살아있는 연결 전체의 등록부입니다. 최대 연결 수를 넘는 accept는
/// 거절됩니다.
pub struct ConnectionService {
    connections: DashMap<Uuid, Arc<Connection>>,
    stats: Mutex<ConnectionStats>,
    max_connections: u32,
}

impl ConnectionService {
    pub fn new(max_connections: u32) -> Self {
        Self {
            connections: DashMap::new(),
            stats: Mutex::new(ConnectionStats::default()),
            max_connections,
        }
    }

    /// 연결 등록. 수용량 초과면 에러
    pub async fn register(&self, connection: Arc<Connection>) -> Result<()> {
        if self.connections.len() >= self.max_connections as usize {
            warn!(
                "최대 연결 수 초과: {}/{}",
                self.connections.len(),
                self.max_connections
            );
            return Err(anyhow!("서버가 가득 참"));
        }

        self.connections.insert(connection.id(), connection);

        let mut stats = self.stats.lock().await;
        stats.total_connections += 1;
        stats.current_connections += 1;
        stats.peak_connections = stats.peak_connections.max(stats.current_connections);
        Ok(())
    }

    /// 연결 해제
    pub async fn unregister(&self, connection_id: Uuid) {
        if self.connections.remove(&connection_id).is_some() {
            let mut stats = self.stats.lock().await;
            stats.current_connections = stats.current_connections.saturating_sub(1);
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OutPacket, PacketId, FrameAssembler};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("바인드");
        let addr = listener.local_addr().expect("주소");
        let client = TcpStream::connect(addr).await.expect("접속");
        let (server, _) = listener.accept().await.expect("수락");
        (server, client)
    }

    #[tokio::test]
    async fn test_send_increments_sequence() {
        let (server, mut client) = socket_pair().await;
        let peer = server.peer_addr().expect("peer");
        let (_read, write) = server.into_split();
        let conn = Connection::new(write, peer, false);

        for _ in 0..3 {
            conn.send(&OutPacket::new(PacketId::Heartbeat, vec![]))
                .await
                .expect("송신");
        }

        let mut buf = vec![0u8; 64];
        let n = client.read(&mut buf).await.expect("수신");
        let mut assembler = FrameAssembler::new();
        assembler.push(&buf[..n]);

        for expected_seq in 0u8..3 {
            let frame = assembler.next_frame().expect("프레임").expect("완성");
            assert_eq!(frame.sequence, expected_seq);
        }
    }

    #[tokio::test]
    async fn test_register_capacity() {
        let service = ConnectionService::new(1);
        let (server_a, _client_a) = socket_pair().await;
        let (server_b, _client_b) = socket_pair().await;

        let peer_a = server_a.peer_addr().expect("peer");
        let conn_a = Arc::new(Connection::new(server_a.into_split().1, peer_a, false));
        let peer_b = server_b.peer_addr().expect("peer");
        let conn_b = Arc::new(Connection::new(server_b.into_split().1, peer_b, false));

        assert!(service.register(conn_a.clone()).await.is_ok());
        assert!(service.register(conn_b).await.is_err());

        service.unregister(conn_a.id()).await;
        assert_eq!(service.count(), 0);

        let stats = service.stats().await;
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.peak_connections, 1);
        assert_eq!(stats.current_connections, 0);
    }

    #[tokio::test]
    async fn test_close_signals_peer_eof() {
        let (server, mut client) = socket_pair().await;
        let peer = server.peer_addr().expect("peer");
        let conn = Connection::new(server.into_split().1, peer, false);

        conn.close().await;

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.expect("EOF 수신");
        assert_eq!(n, 0);
    }
}
