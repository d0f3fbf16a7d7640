//! 네트워크 유틸리티
//!
//! IP 주소 파싱, 포트 검증, 바인드 주소 자동 감지 기능을 제공합니다.

use anyhow::{anyhow, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// 네트워크 유틸리티
pub struct NetworkUtils;

impl NetworkUtils {
    /// IP 주소 문자열 파싱
    pub fn parse_ip(ip_str: &str) -> Result<IpAddr> {
        ip_str
            .parse::<IpAddr>()
            .map_err(|e| anyhow!("IP 주소 파싱 실패: {} ({})", ip_str, e))
    }

    /// 포트 번호 검증
    pub fn validate_port(port: u16) -> Result<u16> {
        match port {
            0 => Err(anyhow!("포트 0은 사용할 수 없습니다")),
            1..=1023 => {
                warn!("시스템 포트 사용: {} (권한 필요 가능)", port);
                Ok(port)
            }
            _ => Ok(port),
        }
    }

    /// 로컬 바인드 주소 자동 감지
    ///
    /// 외부로 향하는 기본 경로의 로컬 주소를 UDP 라우트 프로브로 알아냅니다.
    /// 실제 패킷은 전송하지 않습니다. 실패 시 루프백으로 내려갑니다.
    pub async fn detect_local_ip() -> IpAddr {
        match Self::route_probe().await {
            Ok(ip) => {
                debug!("로컬 IP 자동 감지: {}", ip);
                ip
            }
            Err(e) => {
                warn!("로컬 IP 감지 실패, 루프백 사용: {}", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    async fn route_probe() -> Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        // connect는 경로 선택만 하며 데이터그램을 보내지 않는다
        socket.connect("8.8.8.8:80").await?;
        Ok(socket.local_addr()?.ip())
    }

    /// IPv4 주소를 리틀엔디언 u32로 변환 (와이어 인코딩용)
    pub fn ipv4_to_u32(ip: &Ipv4Addr) -> u32 {
        u32::from(*ip)
    }

    /// 소켓 주소에서 IPv4 추출 (IPv6이면 None)
    pub fn ipv4_of(addr: &SocketAddr) -> Option<Ipv4Addr> {
        match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_parsing() {
        let ipv4 = NetworkUtils::parse_ip("192.168.1.1").expect("IPv4 파싱 실패");
        let ipv6 = NetworkUtils::parse_ip("::1").expect("IPv6 파싱 실패");

        assert!(matches!(ipv4, IpAddr::V4(_)));
        assert!(matches!(ipv6, IpAddr::V6(_)));
        assert!(NetworkUtils::parse_ip("not-an-ip").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert!(NetworkUtils::validate_port(30001).is_ok());
        assert!(NetworkUtils::validate_port(0).is_err());
        assert!(NetworkUtils::validate_port(65535).is_ok());
    }

    #[test]
    fn test_ipv4_conversion() {
        let ip: Ipv4Addr = "1.2.3.4".parse().expect("파싱 실패");
        assert_eq!(NetworkUtils::ipv4_to_u32(&ip), 0x01020304);
    }

    #[test]
    fn test_ipv4_of_socket_addr() {
        let addr: SocketAddr = "10.0.0.1:30001".parse().expect("파싱 실패");
        assert_eq!(
            NetworkUtils::ipv4_of(&addr),
            Some("10.0.0.1".parse::<Ipv4Addr>().expect("파싱 실패"))
        );
    }

    #[tokio::test]
    async fn test_detect_local_ip_never_panics() {
        // 환경에 따라 감지 주소는 다르지만 항상 값이 나와야 한다
        let ip = NetworkUtils::detect_local_ip().await;
        assert!(matches!(ip, IpAddr::V4(_) | IpAddr::V6(_)));
    }
}
