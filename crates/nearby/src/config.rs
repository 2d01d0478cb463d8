use crate::ServiceType;
use std::env;
use std::time::Duration;

/// Default bound on how long a browser waits for an invitation to be answered
pub const DEFAULT_INVITE_TIMEOUT_SECS: u64 = 10;

const DEFAULT_DISPLAY_NAME: &str = "nearby-peer";

#[derive(Debug, Clone)]
pub struct NearbyConfig {
    /// Service identifier both roles discover each other under
    pub service_type: ServiceType,
    /// Human-readable name given to every fresh identity
    pub display_name: String,
    pub invite_timeout: Duration,
    /// Optional cap on connecting+connected peers an advertiser accepts
    pub max_peers: Option<usize>,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            invite_timeout: Duration::from_secs(DEFAULT_INVITE_TIMEOUT_SECS),
            max_peers: None,
        }
    }
}

impl NearbyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let max_peers = match env::var("NEARBY_MAX_PEERS") {
            Ok(value) => Some(value.parse()?),
            Err(_) => None,
        };

        Ok(NearbyConfig {
            service_type: ServiceType::new(
                env::var("NEARBY_SERVICE_TYPE").unwrap_or_else(|_| ServiceType::default().into()),
            )?,
            display_name: env::var("NEARBY_DISPLAY_NAME")
                .or_else(|_| env::var("HOSTNAME"))
                .unwrap_or_else(|_| DEFAULT_DISPLAY_NAME.to_string()),
            invite_timeout: Duration::from_secs(
                env::var("NEARBY_INVITE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_INVITE_TIMEOUT_SECS.to_string())
                    .parse()?,
            ),
            max_peers,
        })
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    pub fn with_invite_timeout(mut self, invite_timeout: Duration) -> Self {
        self.invite_timeout = invite_timeout;
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = Some(max_peers);
        self
    }
}
