//! 외부 서비스 게이트웨이
//!
//! 유저 서비스와 인벤토리 서비스(둘 다 프로세스 밖 HTTP)를 중계합니다.
//!
//! - 생존 핑이 읽기를 게이트합니다: 서비스가 죽은 것으로 알려지면
//!   호출자를 타임아웃시키는 대신 즉시 `Unavailable`을 돌려줍니다.
//! - 요청 에러는 해당 서비스의 `check_now()`를 트리거합니다.
//! - `getUser`는 15초 TTL / 100개 한도의 LRU 캐시를 거칩니다.
//!   인벤토리 읽기는 캐시하지 않습니다 (서비스가 외부에서 변경 가능).
//! - "서비스 다운"(`Err`)과 "엔티티 없음"(`Ok(None)`)은 구분됩니다.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

use crate::tool::error::GatewayError;

/// 게이트웨이 동작 파라미터
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP 호출 타임아웃 (초)
    pub timeout_secs: u64,
    /// 생존 핑 주기 (초)
    pub ping_interval_secs: u64,
    /// 유저 캐시 TTL (초)
    pub cache_ttl_secs: u64,
    /// 유저 캐시 용량
    pub cache_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            ping_interval_secs: 15,
            cache_ttl_secs: 15,
            cache_capacity: 100,
        }
    }
}

/// 유저 서비스가 내려주는 유저 스냅샷 (메모리상 불변)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: u32,
    pub user_name: String,
    pub player_name: String,
    pub level: u16,
    pub avatar: u16,
    pub cur_exp: u64,
    pub max_exp: u64,
    pub rank: u8,
    pub vip_level: u8,
    pub wins: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl User {
    pub fn is_vip(&self) -> bool {
        self.vip_level > 0
    }
}

/// 보유 아이템 한 개
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub item_id: u32,
    pub count: u16,
}

/// 코스메틱 8슬롯
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cosmetics {
    pub ct: u32,
    pub ter: u32,
    pub head: u32,
    pub glove: u32,
    pub back: u32,
    pub steps: u32,
    pub card: u32,
    pub spray: u32,
}

/// 이름 붙은 로드아웃 한 벌
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loadout {
    pub loadout_id: u8,
    pub primary: u32,
    pub secondary: u32,
    pub melee: u32,
    pub grenade: u32,
}

/// 구매 메뉴
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyMenu {
    pub submenus: Vec<BuySubMenu>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuySubMenu {
    pub index: u8,
    pub items: Vec<u32>,
}

/// 생존 핑
///
/// 서비스별 백그라운드 태스크가 고정 주기로 /ping을 호출하고,
/// 요청 에러 시 `check_now()`로 즉시 재확인합니다.
/// 값 자체가 가벼운 핸들이라 복제해서 태스크로 넘깁니다.
#[derive(Clone)]
pub struct ServicePinger {
    service_name: &'static str,
    ping_url: String,
    http: reqwest::Client,
    alive: Arc<AtomicBool>,
}

impl ServicePinger {
    pub fn new(service_name: &'static str, base_url: &str, http: reqwest::Client) -> Self {
        Self {
            service_name,
            ping_url: format!("{}/ping", base_url),
            http,
            // 낙관적 시작: 첫 핑 전에도 요청이 막히지 않는다
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 즉시 1회 핑
    pub async fn check_now(&self) -> bool {
        let alive = match self.http.get(&self.ping_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };

        let was_alive = self.alive.swap(alive, Ordering::AcqRel);
        if was_alive && !alive {
            warn!("{} 서비스 응답 없음", self.service_name);
        } else if !was_alive && alive {
            info!("{} 서비스 복구됨", self.service_name);
        }
        alive
    }

    /// 주기 핑 태스크 시작
    pub fn start(&self, ping_interval_secs: u64) {
        let pinger = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(ping_interval_secs));
            loop {
                tick.tick().await;
                pinger.check_now().await;
            }
        });
    }

    /// 요청 에러 후속 처리: 장애성 에러면 백그라운드 재확인
    fn note_error(&self, err: &GatewayError) {
        if err.is_outage() {
            let pinger = self.clone();
            tokio::spawn(async move {
                pinger.check_now().await;
            });
        }
    }

    fn gate(&self) -> Result<(), GatewayError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(GatewayError::Unavailable(format!(
                "{} 서비스 다운 상태로 표시됨",
                self.service_name
            )))
        }
    }
}

/// TTL + 용량 제한 LRU 유저 캐시
struct UserCache {
    inner: Mutex<UserCacheInner>,
    ttl: Duration,
    capacity: usize,
}

struct UserCacheInner {
    map: HashMap<u32, (User, Instant)>,
    /// 뒤쪽이 최근 사용
    order: VecDeque<u32>,
}

impl UserCache {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(UserCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    async fn get(&self, user_id: u32) -> Option<User> {
        let mut inner = self.inner.lock().await;
        let entry = inner.map.get(&user_id).map(|(user, at)| (user.clone(), *at));
        match entry {
            Some((user, fetched_at)) if fetched_at.elapsed() < self.ttl => {
                inner.order.retain(|id| *id != user_id);
                inner.order.push_back(user_id);
                Some(user)
            }
            Some(_) => {
                // TTL 만료: 다음 읽기가 재조회한다
                inner.map.remove(&user_id);
                inner.order.retain(|id| *id != user_id);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, user: User) {
        let mut inner = self.inner.lock().await;
        let user_id = user.user_id;
        inner.map.insert(user_id, (user, Instant::now()));
        inner.order.retain(|id| *id != user_id);
        inner.order.push_back(user_id);

        while inner.map.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            } else {
                break;
            }
        }
    }

    async fn invalidate(&self, user_id: u32) {
        let mut inner = self.inner.lock().await;
        inner.map.remove(&user_id);
        inner.order.retain(|id| *id != user_id);
    }
}

#[derive(Serialize)]
struct CheckCredentialsRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckCredentialsReply {
    user_id: u32,
}

/// 유저 서비스 클라이언트
pub struct UserService {
    base_url: String,
    http: reqwest::Client,
    pinger: ServicePinger,
    cache: UserCache,
}

impl UserService {
    pub fn new(base_url: String, http: reqwest::Client, config: &GatewayConfig) -> Self {
        let pinger = ServicePinger::new("user", &base_url, http.clone());
        Self {
            base_url,
            http,
            pinger,
            cache: UserCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_capacity,
            ),
        }
    }

    pub fn pinger(&self) -> &ServicePinger {
        &self.pinger
    }

    /// 자격 증명 검증. 0 = 거부
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<u32, GatewayError> {
        self.pinger.gate()?;

        let url = format!("{}/users/check", self.base_url);
        let result = self
            .http
            .post(&url)
            .json(&CheckCredentialsRequest { username, password })
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest("user", e));

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.pinger.note_error(&e);
                return Err(e);
            }
        };

        match response.status().as_u16() {
            200 => {
                let reply: CheckCredentialsReply = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Decode(e.to_string()))?;
                Ok(reply.user_id)
            }
            401 | 403 | 404 => Ok(0),
            status => Err(GatewayError::Status {
                status,
                context: "users/check".into(),
            }),
        }
    }

    /// 유저 스냅샷 조회 (캐시 경유)
    pub async fn get_user(&self, user_id: u32) -> Result<Option<User>, GatewayError> {
        if let Some(cached) = self.cache.get(user_id).await {
            debug!("유저 {} 캐시 적중", user_id);
            return Ok(Some(cached));
        }

        let url = format!("{}/users/{}", self.base_url, user_id);
        match self.fetch_user(&url).await? {
            Some(user) => {
                self.cache.insert(user.clone()).await;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// 이름으로 유저 조회
    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, GatewayError> {
        let url = format!("{}/users/byname/{}", self.base_url, name);
        match self.fetch_user(&url).await? {
            Some(user) => {
                self.cache.insert(user.clone()).await;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// 변경이 생긴 userId의 캐시 무효화
    pub async fn invalidate(&self, user_id: u32) {
        self.cache.invalidate(user_id).await;
    }

    async fn fetch_user(&self, url: &str) -> Result<Option<User>, GatewayError> {
        self.pinger.gate()?;

        let result = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest("user", e));

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.pinger.note_error(&e);
                return Err(e);
            }
        };

        match response.status().as_u16() {
            200 => {
                let user: User = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::Decode(e.to_string()))?;
                Ok(Some(user))
            }
            404 => Ok(None),
            status => Err(GatewayError::Status { status, context: url.to_string() }),
        }
    }
}

/// 인벤토리 서비스 클라이언트
///
/// 읽기는 무캐시 read-through, 쓰기는 write-through입니다.
pub struct InventoryService {
    base_url: String,
    http: reqwest::Client,
    pinger: ServicePinger,
}

impl InventoryService {
    pub fn new(base_url: String, http: reqwest::Client) -> Self {
        let pinger = ServicePinger::new("inventory", &base_url, http.clone());
        Self { base_url, http, pinger }
    }

    pub fn pinger(&self) -> &ServicePinger {
        &self.pinger
    }

    pub async fn get_items(&self, user_id: u32) -> Result<Vec<InventoryItem>, GatewayError> {
        self.get_json(&format!("{}/inventory/{}/items", self.base_url, user_id))
            .await
    }

    pub async fn get_cosmetics(&self, user_id: u32) -> Result<Cosmetics, GatewayError> {
        self.get_json(&format!("{}/inventory/{}/cosmetics", self.base_url, user_id))
            .await
    }

    pub async fn get_loadouts(&self, user_id: u32) -> Result<Vec<Loadout>, GatewayError> {
        self.get_json(&format!("{}/inventory/{}/loadouts", self.base_url, user_id))
            .await
    }

    pub async fn get_buy_menu(&self, user_id: u32) -> Result<BuyMenu, GatewayError> {
        self.get_json(&format!("{}/inventory/{}/buymenu", self.base_url, user_id))
            .await
    }

    /// 로드아웃 슬롯에 무기 지정
    pub async fn set_loadout_weapon(
        &self,
        user_id: u32,
        loadout_id: u8,
        weapon_slot: u8,
        item_id: u32,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            loadout_id: u8,
            weapon_slot: u8,
            item_id: u32,
        }
        self.put_json(
            &format!("{}/inventory/{}/loadout", self.base_url, user_id),
            &Body { loadout_id, weapon_slot, item_id },
        )
        .await
    }

    /// 코스메틱 슬롯 지정
    pub async fn set_cosmetic_slot(
        &self,
        user_id: u32,
        cosmetic_slot: u8,
        item_id: u32,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            cosmetic_slot: u8,
            item_id: u32,
        }
        self.put_json(
            &format!("{}/inventory/{}/cosmetics", self.base_url, user_id),
            &Body { cosmetic_slot, item_id },
        )
        .await
    }

    /// 구매 메뉴 한 칸 교체
    pub async fn set_buy_menu(
        &self,
        user_id: u32,
        menu_index: u8,
        items: &[u32],
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            menu_index: u8,
            items: &'a [u32],
        }
        self.put_json(
            &format!("{}/inventory/{}/buymenu", self.base_url, user_id),
            &Body { menu_index, items },
        )
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, GatewayError> {
        self.pinger.gate()?;

        let result = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest("inventory", e));

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.pinger.note_error(&e);
                return Err(e);
            }
        };

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string())),
            404 => Err(GatewayError::NotFound(url.to_string())),
            status => Err(GatewayError::Status { status, context: url.to_string() }),
        }
    }

    async fn put_json<B: Serialize>(&self, url: &str, body: &B) -> Result<(), GatewayError> {
        self.pinger.gate()?;

        let result = self
            .http
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest("inventory", e));

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.pinger.note_error(&e);
                return Err(e);
            }
        };

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::Status {
                status: response.status().as_u16(),
                context: url.to_string(),
            })
        }
    }
}
