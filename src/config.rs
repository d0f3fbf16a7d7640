//! 마스터 서버 환경 설정 모듈
//!
//! .env 파일과 환경변수에서 설정을 로드합니다. 유저/인벤토리 서비스
//! 주소는 필수이며, 없으면 기동을 거부합니다 (종료 코드 1).

use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, warn};

use crate::service::gateway_service::GatewayConfig;

/// 마스터 서버 설정 구조체
#[derive(Debug, Clone)]
pub struct MasterServerConfig {
    /// TCP/UDP 바인드 주소 (None이면 자동 감지)
    pub ip_address: Option<IpAddr>,
    /// 마스터 TCP 포트
    pub port_master: u16,
    /// 홀펀치 UDP 포트
    pub port_holepunch: u16,
    /// 송수신 프레임 16진수 로깅
    pub log_packets: bool,
    /// 최대 동시 연결 수
    pub max_connections: u32,
    /// 유저 서비스 베이스 URL
    pub user_service_url: String,
    /// 인벤토리 서비스 베이스 URL
    pub inventory_service_url: String,
    /// 게이트웨이 동작 파라미터
    pub gateway: GatewayConfig,
    /// 로그인 이후 하트비트 제한 (초)
    pub heartbeat_timeout_secs: u64,
    /// 로그인 핸드셰이크 제한 (초)
    pub handshake_timeout_secs: u64,
    /// 채널 서버 이름
    pub channel_server_name: String,
}

impl MasterServerConfig {
    /// 환경변수에서 설정을 로드합니다.
    ///
    /// 로드 순서:
    /// 1. 현재/상위 디렉토리의 .env 파일
    /// 2. 시스템 환경변수
    ///
    /// `USERSERVICE_HOST`, `USERSERVICE_PORT`, `INVSERVICE_HOST`,
    /// `INVSERVICE_PORT`는 필수입니다.
    pub fn from_env() -> Result<Self> {
        Self::load_env_file();

        let user_host = require_env("USERSERVICE_HOST")?;
        let user_port: u16 = require_env("USERSERVICE_PORT")?
            .parse()
            .context("USERSERVICE_PORT 파싱 실패")?;
        let inv_host = require_env("INVSERVICE_HOST")?;
        let inv_port: u16 = require_env("INVSERVICE_PORT")?
            .parse()
            .context("INVSERVICE_PORT 파싱 실패")?;

        let config = Self {
            ip_address: None,
            port_master: 30001,
            port_holepunch: 30002,
            log_packets: false,
            max_connections: 1000,
            user_service_url: format!("http://{}:{}", user_host, user_port),
            inventory_service_url: format!("http://{}:{}", inv_host, inv_port),
            gateway: GatewayConfig::default(),
            heartbeat_timeout_secs: 60,
            handshake_timeout_secs: 10,
            channel_server_name: "Master Server".to_string(),
        };

        info!("마스터 서버 설정 로드 완료: {:?}", config);
        Ok(config)
    }

    /// .env 파일을 로드합니다.
    fn load_env_file() {
        let env_paths = [".env", "../.env"];

        let mut loaded = false;
        for path in env_paths {
            if Path::new(path).exists() && dotenv::from_filename(path).is_ok() {
                info!(".env 파일 로드 성공: {}", path);
                loaded = true;
                break;
            }
        }

        if !loaded {
            warn!(".env 파일을 찾을 수 없습니다. 시스템 환경변수를 사용합니다.");
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("필수 환경변수 누락: {}", key))
}

/// 설정 검증 유틸리티
pub fn validate_config(config: &MasterServerConfig) -> Result<()> {
    if config.port_master == 0 {
        bail!("유효하지 않은 마스터 포트 번호: {}", config.port_master);
    }
    if config.port_holepunch == 0 {
        bail!("유효하지 않은 홀펀치 포트 번호: {}", config.port_holepunch);
    }
    if config.port_master == config.port_holepunch {
        // TCP/UDP라 겹쳐도 바인드는 되지만 운영 혼동을 막는다
        warn!("마스터 포트와 홀펀치 포트가 같습니다: {}", config.port_master);
    }
    if config.user_service_url.is_empty() || config.inventory_service_url.is_empty() {
        bail!("서비스 URL이 비어있습니다");
    }
    if config.max_connections == 0 {
        bail!("최대 연결 수는 0일 수 없습니다");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 환경변수를 건드리는 테스트는 병렬 실행 간섭을 피하려 한 함수에 모은다
    #[test]
    fn test_from_env_requires_service_authorities() {
        std::env::remove_var("USERSERVICE_HOST");
        std::env::remove_var("USERSERVICE_PORT");
        std::env::remove_var("INVSERVICE_HOST");
        std::env::remove_var("INVSERVICE_PORT");

        let err = MasterServerConfig::from_env().expect_err("필수 변수 없이는 실패");
        assert!(err.to_string().contains("USERSERVICE_HOST"));

        std::env::set_var("USERSERVICE_HOST", "127.0.0.1");
        std::env::set_var("USERSERVICE_PORT", "8080");
        std::env::set_var("INVSERVICE_HOST", "127.0.0.1");
        std::env::set_var("INVSERVICE_PORT", "8081");

        let config = MasterServerConfig::from_env().expect("로드");
        assert_eq!(config.user_service_url, "http://127.0.0.1:8080");
        assert_eq!(config.inventory_service_url, "http://127.0.0.1:8081");
        assert_eq!(config.port_master, 30001);
        assert_eq!(config.port_holepunch, 30002);
        assert!(validate_config(&config).is_ok());

        std::env::remove_var("USERSERVICE_HOST");
        std::env::remove_var("USERSERVICE_PORT");
        std::env::remove_var("INVSERVICE_HOST");
        std::env::remove_var("INVSERVICE_PORT");
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = MasterServerConfig {
            ip_address: None,
            port_master: 0,
            port_holepunch: 30002,
            log_packets: false,
            max_connections: 100,
            user_service_url: "http://127.0.0.1:8080".into(),
            inventory_service_url: "http://127.0.0.1:8081".into(),
            gateway: GatewayConfig::default(),
            heartbeat_timeout_secs: 60,
            handshake_timeout_secs: 10,
            channel_server_name: "Master Server".into(),
        };
        assert!(validate_config(&config).is_err());
    }
}
