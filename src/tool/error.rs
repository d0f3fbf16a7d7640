//! 공통 에러 타입 정의
//!
//! 마스터 서버의 도메인 에러를 체계적으로 분류합니다.
//! 외부 서비스 에러는 "서비스 다운"과 "엔티티 없음"을 절대 혼동하지 않습니다.

use thiserror::Error;

/// 외부 서비스 게이트웨이 에러
///
/// 유저 서비스/인벤토리 서비스 호출에서 발생하는 에러입니다.
/// `Unavailable`은 서비스 장애, `NotFound`는 정상 응답 속의 "없음"입니다.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("서비스 응답 없음: {0}")]
    Unavailable(String),

    #[error("요청 시간 초과: {0}")]
    Timeout(String),

    #[error("HTTP 상태 오류: {status} ({context})")]
    Status { status: u16, context: String },

    #[error("엔티티를 찾을 수 없습니다: {0}")]
    NotFound(String),

    #[error("페이로드 역직렬화 실패: {0}")]
    Decode(String),
}

impl GatewayError {
    /// 서비스 장애성 에러 여부 (핑 재확인 트리거 대상)
    pub fn is_outage(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout(_))
    }

    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(format!("{}: {}", service, err))
        } else if err.is_connect() {
            GatewayError::Unavailable(format!("{}: {}", service, err))
        } else if err.is_decode() {
            GatewayError::Decode(format!("{}: {}", service, err))
        } else {
            GatewayError::Unavailable(format!("{}: {}", service, err))
        }
    }
}

/// 프로토콜 코덱 에러
///
/// 프레임 조립/해석 단계에서 발생합니다. 헤더 손상(`BadMagic`,
/// `OversizedBody`, `EmptyBody`)은 복구 불가라 소켓 종료로 이어지고,
/// 본문 해석 에러는 해당 프레임만 버립니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("잘못된 매직 바이트: 0x{0:02x}")]
    BadMagic(u8),

    #[error("본문 길이 초과: {0}바이트")]
    OversizedBody(usize),

    #[error("본문이 잘렸습니다: {needed}바이트 필요, {remaining}바이트 남음")]
    Truncated { needed: usize, remaining: usize },

    #[error("빈 본문 (패킷 타입 없음)")]
    EmptyBody,

    #[error("잘못된 문자열 인코딩")]
    BadString,

    #[error("알 수 없는 하위 타입: {0}")]
    UnknownSubType(u8),
}

impl CodecError {
    /// 소켓을 끊어야 하는 복구 불가 에러 여부 (헤더 손상 계열)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::BadMagic(_) | CodecError::OversizedBody(_) | CodecError::EmptyBody
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_outage_classification() {
        assert!(GatewayError::Unavailable("user".into()).is_outage());
        assert!(GatewayError::Timeout("inventory".into()).is_outage());
        assert!(!GatewayError::NotFound("user 42".into()).is_outage());
        assert!(!GatewayError::Status { status: 500, context: "x".into() }.is_outage());
    }

    #[test]
    fn test_codec_fatal_classification() {
        // 헤더 손상 계열은 전부 소켓 종료 대상이다
        assert!(CodecError::BadMagic(0x41).is_fatal());
        assert!(CodecError::OversizedBody(70000).is_fatal());
        assert!(CodecError::EmptyBody.is_fatal());
        assert!(!CodecError::Truncated { needed: 4, remaining: 1 }.is_fatal());
        assert!(!CodecError::BadString.is_fatal());
        assert!(!CodecError::UnknownSubType(99).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::BadMagic(0x41);
        assert!(err.to_string().contains("0x41"));
    }
}
