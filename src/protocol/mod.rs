//! 와이어 프로토콜 정의
//!
//! 클라이언트와 서버 간 TCP 통신에 사용하는 프레임 형식을 정의합니다.
//!
//! # 프레임 구조
//!
//! ```text
//! [매직 0x55][시퀀스 1바이트][본문 길이 u16 LE][패킷 타입 1바이트][페이로드]
//! ```
//!
//! 본문 길이는 패킷 타입 바이트를 포함합니다. 시퀀스는 방향별 순번이며
//! 서버 송신 측은 쓰기 이후 증가, 255 다음은 0으로 되돌아갑니다.

use bytes::{Buf, BytesMut};

use crate::tool::error::CodecError;

pub mod buffer;
pub mod inbound;
pub mod outbound;

pub use inbound::{
    ChatKind, FavoriteRequest, HostRequest, InboundPacket, OptionRequest, RoomRequest,
};

/// 프레임 매직 바이트
pub const PACKET_SIGNATURE: u8 = 0x55;
/// 홀펀치 데이터그램 매직 바이트
pub const HOLEPUNCH_SIGNATURE: u8 = 0x57;
/// 프레임 헤더 크기 (매직 + 시퀀스 + 길이)
pub const HEADER_SIZE: usize = 4;
/// 본문 최대 크기
pub const MAX_BODY_LENGTH: usize = 65535;

/// 패킷 타입 (opcode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    Version = 0,
    Login = 3,
    ChannelList = 5,
    RequestRoomList = 7,
    RequestChannels = 10,
    Heartbeat = 15,
    Room = 65,
    Chat = 67,
    Host = 68,
    Udp = 70,
    Option = 76,
    Favorite = 77,
    UserStart = 150,
    RoomList = 151,
    Inventory = 152,
    Unlock = 153,
    UserInfo = 157,
}

impl PacketId {
    /// opcode 바이트에서 패킷 타입 변환. 알 수 없는 값은 None (프레임 드롭 대상)
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PacketId::Version),
            3 => Some(PacketId::Login),
            5 => Some(PacketId::ChannelList),
            7 => Some(PacketId::RequestRoomList),
            10 => Some(PacketId::RequestChannels),
            15 => Some(PacketId::Heartbeat),
            65 => Some(PacketId::Room),
            67 => Some(PacketId::Chat),
            68 => Some(PacketId::Host),
            70 => Some(PacketId::Udp),
            76 => Some(PacketId::Option),
            77 => Some(PacketId::Favorite),
            150 => Some(PacketId::UserStart),
            151 => Some(PacketId::RoomList),
            152 => Some(PacketId::Inventory),
            153 => Some(PacketId::Unlock),
            157 => Some(PacketId::UserInfo),
            _ => None,
        }
    }
}

/// 송신 패킷 (opcode + 페이로드)
///
/// 시퀀스 번호는 연결별 카운터가 프레임 생성 시점에 채웁니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPacket {
    pub id: PacketId,
    pub payload: Vec<u8>,
}

impl OutPacket {
    pub fn new(id: PacketId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// 시퀀스를 박아 완성된 프레임 바이트를 생성
    pub fn to_frame(&self, sequence: u8) -> Vec<u8> {
        let body_length = self.payload.len() + 1; // opcode 포함
        let mut frame = Vec::with_capacity(HEADER_SIZE + body_length);
        frame.push(PACKET_SIGNATURE);
        frame.push(sequence);
        frame.extend_from_slice(&(body_length as u16).to_le_bytes());
        frame.push(self.id as u8);
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// 수신 프레임 (조립 완료분)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u8,
    pub packet_type: u8,
    pub payload: Vec<u8>,
}

/// 수신 바이트 재조립기
///
/// TCP 스트림 조각을 누적해 완성된 프레임 단위로 잘라냅니다.
/// 매직 불일치, 본문 길이 초과, 빈 본문은 복구 불가 에러로 보고합니다.
#[derive(Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    /// 수신 바이트 추가
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 완성된 프레임이 있으면 잘라서 반환
    ///
    /// * `Ok(Some(frame))` - 프레임 하나 완성
    /// * `Ok(None)` - 추가 바이트 대기
    /// * `Err(..)` - 헤더 손상, 호출자는 소켓을 닫아야 함
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if self.buf[0] != PACKET_SIGNATURE {
            return Err(CodecError::BadMagic(self.buf[0]));
        }

        let body_length = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
        if body_length > MAX_BODY_LENGTH {
            return Err(CodecError::OversizedBody(body_length));
        }
        if body_length == 0 {
            return Err(CodecError::EmptyBody);
        }

        if self.buf.len() < HEADER_SIZE + body_length {
            return Ok(None);
        }

        let sequence = self.buf[1];
        let packet_type = self.buf[4];
        let payload = self.buf[HEADER_SIZE + 1..HEADER_SIZE + body_length].to_vec();
        self.buf.advance(HEADER_SIZE + body_length);

        Ok(Some(Frame { sequence, packet_type, payload }))
    }
}
