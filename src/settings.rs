use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.90 Safari/537.36 Edg/89.0.774.54";

/// Immutable configuration shared by the login core and every service client.
///
/// Every field has the production default, so `Settings::default()` is enough for real use.
/// Tests point the URLs at a local mock server instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base of the CAS gateway, without a trailing slash, e.g. `https://uis.nwpu.edu.cn/cas`.
    pub cas_url: String,
    pub user_agent: String,
    /// Upper bound on hops followed in a single redirect chain.
    pub max_redirects: usize,
    pub services: ServiceUrls,
}

/// Base URL of each downstream service, without a trailing slash.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceUrls {
    pub bus: String,
    pub classroom: String,
    pub ecampus: String,
    pub ecampus_portal: String,
    pub ecampus_authx: String,
    pub mail: String,
    pub market: String,
    pub edu: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cas_url: "https://uis.nwpu.edu.cn/cas".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 32,
            services: ServiceUrls::default(),
        }
    }
}

impl Default for ServiceUrls {
    fn default() -> Self {
        ServiceUrls {
            bus: "https://hq-bus.nwpu.edu.cn".to_string(),
            classroom: "https://idle-classroom.nwpu.edu.cn".to_string(),
            ecampus: "https://ecampus.nwpu.edu.cn".to_string(),
            ecampus_portal: "https://portal-service.nwpu.edu.cn".to_string(),
            ecampus_authx: "https://authx-service.nwpu.edu.cn".to_string(),
            mail: "https://mail.nwpu.edu.cn".to_string(),
            market: "https://secondhand-market.nwpu.edu.cn".to_string(),
            edu: "https://jwxt.nwpu.edu.cn".to_string(),
        }
    }
}

impl Settings {
    /// Layers an optional YAML/TOML/JSON file (extension inferred) and `NWPU_*` environment
    /// variables over the defaults. Nested keys use `__`, e.g. `NWPU_SERVICES__MAIL`.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        Self::from_config(&Self::layers(path)?)
    }

    /// The layered sources `load` reads, for callers that keep their own keys next to these.
    pub fn layers(path: &str) -> Result<config::Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("NWPU").separator("__"))
            .build()
    }

    /// Unknown keys, such as a `login` table, are ignored.
    pub fn from_config(config: &config::Config) -> Result<Self, config::ConfigError> {
        config.clone().try_deserialize()
    }

    /// Builds `<cas>/<path>`.
    pub fn cas(&self, path: &str) -> String {
        crate::utils::concat_url(&self.cas_url, path)
    }
}
