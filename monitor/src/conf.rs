//! Configuration surface for monitor tooling.
use std::time::Duration;

use anyhow::Context as AnyContext;
use anyhow::Result;
use url::Url;

const ENV_STORAGE_CONNECT: &str = "APMON_STORAGE_CONNECT";
const ENV_APPNAME: &str = "APMON_APPNAME";
const ENV_REFRESH_INTERVAL: &str = "APMON_REFRESH_INTERVAL";

/// Settings for a monitor process watching one or more applications.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MonitorConf {
    /// Connection URL of the metrics storage.
    pub storage: StorageConnect,

    /// Application names to watch.
    pub applications: Vec<String>,

    /// Interval between metric refreshes.
    pub refresh_interval: Duration,
}

impl MonitorConf {
    /// Load the configuration from the `APMON_*` environment variables.
    pub fn from_env() -> Result<MonitorConf> {
        let storage = std::env::var(ENV_STORAGE_CONNECT)
            .with_context(|| format!("{} is required", ENV_STORAGE_CONNECT))?;
        let applications = std::env::var(ENV_APPNAME)
            .with_context(|| format!("{} is required", ENV_APPNAME))?;
        let refresh = std::env::var(ENV_REFRESH_INTERVAL).ok();
        MonitorConf::parse(&storage, &applications, refresh.as_deref())
    }

    /// Build the configuration from raw setting values.
    pub fn parse(
        storage: &str,
        applications: &str,
        refresh_interval: Option<&str>,
    ) -> Result<MonitorConf> {
        let storage = StorageConnect::parse(storage)?;
        let applications = applications
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        let refresh_interval = match refresh_interval {
            None => MonitorConf::default_refresh_interval(),
            Some(value) => humantime::parse_duration(value)
                .with_context(|| format!("invalid {}", ENV_REFRESH_INTERVAL))?,
        };
        Ok(MonitorConf {
            storage,
            applications,
            refresh_interval,
        })
    }

    fn default_refresh_interval() -> Duration {
        Duration::from_secs(1)
    }
}

/// Parsed metrics storage connection URL.
///
/// The reference form is `redis://host:port/dbnum` with optional `pool`,
/// `max_retries` and `idle_cons` query parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageConnect {
    /// URL scheme selecting the store driver.
    pub scheme: String,

    /// Store address in `host:port` form.
    pub addr: String,

    /// Password from the URL user info, when set.
    pub password: Option<String>,

    /// Database number from the URL path.
    pub db: i64,

    /// Connection pool size.
    pub pool: Option<usize>,

    /// Maximum number of retries per operation.
    pub max_retries: Option<usize>,

    /// Minimum number of idle connections to keep.
    pub idle_conns: Option<usize>,
}

impl StorageConnect {
    /// Parse a storage connection URL.
    pub fn parse(connect_url: &str) -> Result<StorageConnect> {
        let url = Url::parse(connect_url)
            .with_context(|| format!("invalid storage URL '{}'", connect_url))?;
        let host = url
            .host_str()
            .with_context(|| format!("storage URL '{}' has no host", connect_url))?;
        let addr = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let db = url
            .path()
            .trim_matches('/')
            .parse()
            .unwrap_or(0);
        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
        let number = |key: &str| query.get(key).and_then(|value| value.parse().ok());
        Ok(StorageConnect {
            scheme: url.scheme().to_string(),
            addr,
            password: url.password().map(String::from),
            db,
            pool: number("pool"),
            max_retries: number("max_retries"),
            idle_conns: number("idle_cons"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::MonitorConf;
    use super::StorageConnect;

    #[test]
    fn conf_defaults() {
        let conf = MonitorConf::parse("redis://127.0.0.1:6379/0", "counter", None).unwrap();
        assert_eq!(conf.applications, vec!["counter"]);
        assert_eq!(conf.refresh_interval, Duration::from_secs(1));
    }

    #[test]
    fn conf_many_applications() {
        let conf =
            MonitorConf::parse("redis://127.0.0.1/2", "counter, rss-reader", Some("250ms")).unwrap();
        assert_eq!(conf.applications, vec!["counter", "rss-reader"]);
        assert_eq!(conf.refresh_interval, Duration::from_millis(250));
        assert_eq!(conf.storage.db, 2);
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(StorageConnect::parse("not a url").is_err());
    }

    #[test]
    fn storage_url_options() {
        let storage = StorageConnect::parse(
            "redis://:secret@10.0.0.5:6390/3?pool=10&max_retries=4&idle_cons=2",
        )
        .unwrap();
        assert_eq!(storage.scheme, "redis");
        assert_eq!(storage.addr, "10.0.0.5:6390");
        assert_eq!(storage.password.as_deref(), Some("secret"));
        assert_eq!(storage.db, 3);
        assert_eq!(storage.pool, Some(10));
        assert_eq!(storage.max_retries, Some(4));
        assert_eq!(storage.idle_conns, Some(2));
    }
}
