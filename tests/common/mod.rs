//! 통합 테스트 공용 도구
//!
//! - 유저/인벤토리 서비스를 흉내내는 미니 HTTP 스텁
//! - 프레임 단위로 주고받는 테스트 클라이언트

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use masterserver::protocol::buffer::PacketWriter;
use masterserver::protocol::{Frame, FrameAssembler, OutPacket, PacketId};

/// 스텁이 받은 HTTP 요청 한 건
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub body: String,
}

/// 스텁 요청 기록 (write-through 검증용)
pub type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

/// 유저+인벤토리 서비스를 한 포트로 흉내내는 HTTP 스텁
///
/// 계정: alice=42, bob=43, charlie=44, dave=45. 비밀번호 "wrong"은 거부.
/// 받은 요청은 전부 기록되어 쓰기 경유를 검증할 수 있다.
pub async fn spawn_stub_services() -> (SocketAddr, RequestLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("스텁 바인드");
    let addr = listener.local_addr().expect("스텁 주소");
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));

    let accept_log = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(handle_http_connection(stream, accept_log.clone()));
        }
    });

    (addr, log)
}

async fn handle_http_connection(mut stream: TcpStream, log: RequestLog) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // 헤더 끝까지 수신
        let header_end = loop {
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            let mut chunk = [0u8; 2048];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let mut chunk = [0u8; 2048];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
        buf.drain(..header_end + content_length);

        let request_line = head.lines().next().unwrap_or("").to_string();
        log.lock()
            .expect("요청 기록 잠금")
            .push(RecordedRequest { request_line: request_line.clone(), body: body.clone() });

        let (status, reply) = route(&request_line, &body);

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            status,
            reply.len(),
            reply
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn user_id_of(name: &str) -> u32 {
    match name {
        "alice" => 42,
        "bob" => 43,
        "charlie" => 44,
        "dave" => 45,
        _ => 0,
    }
}

fn route(request_line: &str, body: &str) -> (&'static str, String) {
    // POST /users/check
    if request_line.starts_with("POST") && request_line.contains("/users/check") {
        if body.contains("wrong") {
            return ("200 OK", r#"{"userId":0}"#.to_string());
        }
        for name in ["alice", "bob", "charlie", "dave"] {
            if body.contains(name) {
                return ("200 OK", format!(r#"{{"userId":{}}}"#, user_id_of(name)));
            }
        }
        return ("200 OK", r#"{"userId":0}"#.to_string());
    }

    // GET /users/{id}
    if request_line.starts_with("GET") && request_line.contains("/users/") {
        for (name, id) in [("alice", 42u32), ("bob", 43), ("charlie", 44), ("dave", 45)] {
            if request_line.contains(&format!("/users/{}", id)) {
                let user = serde_json::json!({
                    "userId": id,
                    "userName": name,
                    "playerName": format!("player{}", capitalize(name)),
                    "level": 30,
                    "avatar": 5,
                    "curExp": 1000,
                    "maxExp": 2000,
                    "rank": 10,
                    "vipLevel": 0,
                    "wins": 100,
                    "kills": 500,
                    "deaths": 400,
                    "assists": 50
                });
                return ("200 OK", user.to_string());
            }
        }
        return ("404 Not Found", String::new());
    }

    if request_line.contains("/ping") {
        return ("200 OK", String::new());
    }

    // 인벤토리 읽기
    if request_line.starts_with("GET") && request_line.contains("/inventory/") {
        if request_line.contains("/items") {
            return ("200 OK", r#"[{"itemId":5101,"count":1},{"itemId":5245,"count":3}]"#.into());
        }
        if request_line.contains("/cosmetics") {
            return (
                "200 OK",
                r#"{"ct":1047,"ter":1048,"head":0,"glove":0,"back":0,"steps":0,"card":0,"spray":42001}"#
                    .into(),
            );
        }
        if request_line.contains("/loadouts") {
            return (
                "200 OK",
                r#"[{"loadoutId":0,"primary":5245,"secondary":5337,"melee":5365,"grenade":4}]"#.into(),
            );
        }
        if request_line.contains("/buymenu") {
            return (
                "200 OK",
                r#"{"submenus":[{"index":0,"items":[5337,5356]},{"index":1,"items":[5245]}]}"#.into(),
            );
        }
    }

    // 인벤토리 쓰기
    if request_line.starts_with("PUT") && request_line.contains("/inventory/") {
        return ("200 OK", String::new());
    }

    ("404 Not Found", String::new())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// 프레임 단위 송수신 테스트 클라이언트
pub struct TestClient {
    stream: TcpStream,
    assembler: FrameAssembler,
    sequence: u8,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("서버 접속");
        Self {
            stream,
            assembler: FrameAssembler::new(),
            sequence: 0,
        }
    }

    /// 클라이언트 측 시퀀스로 프레임 송신
    pub async fn send(&mut self, id: PacketId, payload: Vec<u8>) {
        let frame = OutPacket::new(id, payload).to_frame(self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        self.stream.write_all(&frame).await.expect("프레임 송신");
    }

    /// 임의 opcode 바이트로 프레임 송신 (알 수 없는 opcode 테스트용)
    pub async fn send_raw_opcode(&mut self, opcode: u8, payload: Vec<u8>) {
        let body_length = (payload.len() + 1) as u16;
        let mut frame = vec![0x55, self.sequence];
        frame.extend_from_slice(&body_length.to_le_bytes());
        frame.push(opcode);
        frame.extend_from_slice(&payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.stream.write_all(&frame).await.expect("프레임 송신");
    }

    /// 프레임 하나 수신 (기본 2초 제한)
    pub async fn recv_frame(&mut self) -> Frame {
        self.try_recv_frame(Duration::from_secs(2))
            .await
            .expect("프레임 수신 제한 시간 초과")
    }

    /// 제한 시간 내 프레임 수신 시도. 시간 초과면 None
    pub async fn try_recv_frame(&mut self, limit: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if let Some(frame) = self.assembler.next_frame().expect("프레임 조립") {
                return Some(frame);
            }
            let mut chunk = [0u8; 4096];
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => panic!("서버가 연결을 닫았습니다"),
                Ok(Ok(n)) => self.assembler.push(&chunk[..n]),
                Ok(Err(e)) => panic!("수신 에러: {}", e),
                Err(_) => return None,
            }
        }
    }

    /// 밀린 프레임을 비운다: quiet 동안 아무것도 안 오면 멈춘다
    pub async fn drain(&mut self, quiet: Duration) {
        while self.try_recv_frame(quiet).await.is_some() {}
    }

    /// 서버가 소켓을 닫을 때까지 대기 (EOF 확인)
    pub async fn expect_eof(&mut self) {
        let mut chunk = [0u8; 1024];
        loop {
            match tokio::time::timeout(Duration::from_secs(3), self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return,
                Ok(Ok(_)) => continue, // 닫히기 전 잔여 프레임은 무시
                Ok(Err(_)) => return,  // RST도 닫힘으로 본다
                Err(_) => panic!("EOF 대기 제한 시간 초과"),
            }
        }
    }

    /// 특정 타입의 Room 알림(하위 타입 일치)을 받을 때까지 다른 프레임은 건너뛴다
    pub async fn expect_room_notice(&mut self, subtype: u8) -> Frame {
        loop {
            let frame = self.recv_frame().await;
            if frame.packet_type == PacketId::Room as u8 && frame.payload[0] == subtype {
                return frame;
            }
        }
    }

    /// 특정 패킷 타입을 받을 때까지 다른 프레임은 건너뛴다
    pub async fn expect_packet(&mut self, id: PacketId) -> Frame {
        loop {
            let frame = self.recv_frame().await;
            if frame.packet_type == id as u8 {
                return frame;
            }
        }
    }

    /// Version + Login 핸드셰이크 수행 후 로그인 송신 프레임들을 소비
    pub async fn login(&mut self, username: &str, password: &str) {
        self.send_version().await;
        let version_reply = self.recv_frame().await;
        assert_eq!(version_reply.packet_type, PacketId::Version as u8);

        let mut w = PacketWriter::new();
        w.write_string(username).write_string(password);
        self.send(PacketId::Login, w.into_bytes()).await;

        // 로그인 시퀀스: UserStart → UserInfo → Inventory → Favorite(코스메틱)
        // → Unlock → Favorite(로드아웃) → Option → ChannelList
        for expected in [
            PacketId::UserStart,
            PacketId::UserInfo,
            PacketId::Inventory,
            PacketId::Favorite,
            PacketId::Unlock,
            PacketId::Favorite,
            PacketId::Option,
            PacketId::ChannelList,
        ] {
            let frame = self.recv_frame().await;
            assert_eq!(
                frame.packet_type, expected as u8,
                "로그인 시퀀스 불일치: {:?} 기대", expected
            );
        }
    }

    pub async fn send_version(&mut self) {
        let mut w = PacketWriter::new();
        w.write_u8(1).write_string("6246015");
        self.send(PacketId::Version, w.into_bytes()).await;
    }

    /// 방 목록 요청 (채널 선택)
    pub async fn request_room_list(&mut self, server: u8, channel: u8) -> Frame {
        let mut w = PacketWriter::new();
        w.write_u8(server).write_u8(channel);
        self.send(PacketId::RequestRoomList, w.into_bytes()).await;
        self.expect_packet(PacketId::RoomList).await
    }

    pub async fn create_room(&mut self, name: &str) -> Frame {
        let mut w = PacketWriter::new();
        w.write_u8(0).write_string(name).write_u8(0).write_u8(1).write_u8(0);
        self.send(PacketId::Room, w.into_bytes()).await;
        self.expect_room_notice(0).await
    }

    pub async fn join_room(&mut self, room_id: u16) -> Frame {
        let mut w = PacketWriter::new();
        w.write_u8(1).write_u16(room_id);
        self.send(PacketId::Room, w.into_bytes()).await;
        self.expect_room_notice(0).await
    }

    pub async fn leave_room(&mut self) {
        self.send(PacketId::Room, vec![2]).await;
    }

    pub async fn toggle_ready(&mut self) -> Frame {
        self.send(PacketId::Room, vec![3]).await;
        self.expect_room_notice(3).await
    }

    pub async fn start_game(&mut self) -> Frame {
        self.send(PacketId::Room, vec![4]).await;
        self.expect_room_notice(7).await
    }

    /// 채팅 송신 (kind 0 = 방, 1 = 채널)
    pub async fn send_chat(&mut self, kind: u8, message: &str) {
        let mut w = PacketWriter::new();
        w.write_u8(kind).write_string(message);
        self.send(PacketId::Chat, w.into_bytes()).await;
    }

    /// 로드아웃 슬롯 변경 (응답 없음)
    pub async fn set_favorite_loadout(&mut self, loadout_id: u8, weapon_slot: u8, item_id: u32) {
        let mut w = PacketWriter::new();
        w.write_u8(0).write_u8(loadout_id).write_u8(weapon_slot).write_u32(item_id);
        self.send(PacketId::Favorite, w.into_bytes()).await;
    }

    /// 코스메틱 슬롯 변경 (응답 없음)
    pub async fn set_favorite_cosmetics(&mut self, cosmetic_slot: u8, item_id: u32) {
        let mut w = PacketWriter::new();
        w.write_u8(1).write_u8(cosmetic_slot).write_u32(item_id);
        self.send(PacketId::Favorite, w.into_bytes()).await;
    }

    /// 구매 메뉴 한 칸 교체 (응답 없음)
    pub async fn set_buy_menu(&mut self, menu_index: u8, items: &[u32]) {
        let mut w = PacketWriter::new();
        w.write_u8(0).write_u8(menu_index).write_u16(items.len() as u16);
        for item in items {
            w.write_u32(*item);
        }
        self.send(PacketId::Option, w.into_bytes()).await;
    }
}
