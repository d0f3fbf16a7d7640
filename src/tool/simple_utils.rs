//! 간단한 공통 유틸리티

/// 간단한 데이터 유틸리티
pub struct SimpleUtils;

impl SimpleUtils {
    /// 현재 타임스탬프 (초)
    pub fn current_timestamp() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// 바이트를 16진수로 변환
    ///
    /// `--log-packets` 프레임 덤프에 사용됩니다.
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
