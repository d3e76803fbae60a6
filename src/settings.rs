use super::*;

/// TOML config file structure. Every field is optional; the resolved
/// [`Settings`] fills in defaults and applies CLI overrides on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub pool_id: Option<u32>,
    pub hostname: Option<String>,
    pub bind: Option<IpAddr>,
    pub workers: Option<usize>,
    pub pool: Option<PoolSection>,
    pub daemon: Option<DaemonSection>,
    pub report: Option<ReportSection>,
    pub ports: Option<Vec<PortSettings>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub address: Option<String>,
    pub target_time: Option<u64>,
    pub retarget_time: Option<u64>,
    pub variance_percent: Option<f64>,
    pub max_change_percent: Option<f64>,
    pub min_difficulty: Option<u64>,
    pub max_difficulty: Option<u64>,
    pub miner_timeout: Option<u64>,
    pub nicehash_difficulty: Option<u64>,
    pub ban: Option<BanSettings>,
    pub trust: Option<TrustSettings>,
    pub banned_addresses: Option<Vec<String>>,
    pub exchange_addresses: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSection {
    pub url: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSection {
    pub url: Option<String>,
    pub auth_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BanSettings {
    pub enabled: bool,
    pub threshold: u64,
    pub percent: f64,
}

impl Default for BanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 30,
            percent: 25.0,
        }
    }
}

/// One listening port. The TLS flag selects an externally-wrapped
/// transport; hidden ports are excluded from nothing but operator dashboards
/// downstream, so both flags ride along into pool-status reports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortSettings {
    pub port: u16,
    pub difficulty: u64,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Resolved configuration: defaults, then config file, then CLI options.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pool_id: u32,
    pub hostname: String,
    pub bind: IpAddr,
    pub workers: usize,
    pub pool_address: String,
    pub target_time: Duration,
    pub retarget_time: Duration,
    pub variance_percent: f64,
    pub max_change_percent: f64,
    pub min_difficulty: u64,
    pub max_difficulty: u64,
    pub miner_timeout: Duration,
    pub nicehash_difficulty: u64,
    pub ban: BanSettings,
    pub trust: TrustSettings,
    pub banned_addresses: Vec<String>,
    pub exchange_addresses: Vec<String>,
    pub daemon_url: String,
    pub poll_interval: Duration,
    pub report_url: Option<String>,
    pub report_auth_key: Option<String>,
    pub ports: Vec<PortSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_id: 0,
            hostname: "localhost".into(),
            bind: IpAddr::from([0, 0, 0, 0]),
            workers: num_cpus::get(),
            pool_address: String::new(),
            target_time: Duration::from_secs(60),
            retarget_time: Duration::from_secs(60),
            variance_percent: 30.0,
            max_change_percent: 25.0,
            min_difficulty: 100,
            max_difficulty: 100_000_000,
            miner_timeout: Duration::from_secs(900),
            nicehash_difficulty: 400_000,
            ban: BanSettings::default(),
            trust: TrustSettings::default(),
            banned_addresses: Vec::new(),
            exchange_addresses: Vec::new(),
            daemon_url: "http://127.0.0.1:18081".into(),
            poll_interval: Duration::from_millis(300),
            report_url: None,
            report_auth_key: None,
            ports: vec![PortSettings {
                port: 3333,
                difficulty: 1000,
                pool_type: PoolType::Pplns,
                tls: false,
                hidden: false,
                description: None,
            }],
        }
    }
}

impl Settings {
    pub fn load(options: Options) -> Result<Self> {
        let config = match &options.config {
            Some(path) => toml::from_str(&fs::read_to_string(path).with_context(|| {
                format!("failed to read config file `{}`", path.display())
            })?)
            .with_context(|| format!("failed to parse config file `{}`", path.display()))?,
            None => Config::default(),
        };

        Ok(Self::merge(config, options))
    }

    fn merge(config: Config, options: Options) -> Self {
        let mut settings = Settings::default();

        let pool = config.pool.unwrap_or_default();
        let daemon = config.daemon.unwrap_or_default();
        let report = config.report.unwrap_or_default();

        if let Some(pool_id) = config.pool_id {
            settings.pool_id = pool_id;
        }
        if let Some(hostname) = config.hostname {
            settings.hostname = hostname;
        }
        if let Some(bind) = config.bind {
            settings.bind = bind;
        }
        if let Some(workers) = config.workers {
            settings.workers = workers;
        }
        if let Some(address) = pool.address {
            settings.pool_address = address;
        }
        if let Some(target_time) = pool.target_time {
            settings.target_time = Duration::from_secs(target_time);
        }
        if let Some(retarget_time) = pool.retarget_time {
            settings.retarget_time = Duration::from_secs(retarget_time);
        }
        if let Some(variance_percent) = pool.variance_percent {
            settings.variance_percent = variance_percent;
        }
        if let Some(max_change_percent) = pool.max_change_percent {
            settings.max_change_percent = max_change_percent;
        }
        if let Some(min_difficulty) = pool.min_difficulty {
            settings.min_difficulty = min_difficulty;
        }
        if let Some(max_difficulty) = pool.max_difficulty {
            settings.max_difficulty = max_difficulty;
        }
        if let Some(miner_timeout) = pool.miner_timeout {
            settings.miner_timeout = Duration::from_secs(miner_timeout);
        }
        if let Some(nicehash_difficulty) = pool.nicehash_difficulty {
            settings.nicehash_difficulty = nicehash_difficulty;
        }
        if let Some(ban) = pool.ban {
            settings.ban = ban;
        }
        if let Some(trust) = pool.trust {
            settings.trust = trust;
        }
        if let Some(banned_addresses) = pool.banned_addresses {
            settings.banned_addresses = banned_addresses;
        }
        if let Some(exchange_addresses) = pool.exchange_addresses {
            settings.exchange_addresses = exchange_addresses;
        }
        if let Some(url) = daemon.url {
            settings.daemon_url = url;
        }
        if let Some(poll_interval_ms) = daemon.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(poll_interval_ms);
        }
        settings.report_url = report.url;
        settings.report_auth_key = report.auth_key;
        if let Some(ports) = config.ports {
            settings.ports = ports;
        }

        // CLI options win over the file.
        if let Some(bind) = options.bind {
            settings.bind = bind;
        }
        if let Some(workers) = options.workers {
            settings.workers = workers;
        }
        if let Some(address) = options.address {
            settings.pool_address = address;
        }
        if let Some(daemon_url) = options.daemon_url {
            settings.daemon_url = daemon_url;
        }

        settings
    }

    pub fn retarget(&self) -> Retarget {
        Retarget {
            target_time: self.target_time,
            variance_percent: self.variance_percent,
            max_change_percent: self.max_change_percent,
            min_difficulty: Difficulty::new(self.min_difficulty),
            max_difficulty: Difficulty::new(self.max_difficulty),
        }
    }
}
