//! Command-line configuration.
//!
//! [`Config::add_options`] registers the `--ts-mon-*` options on a [`getopts::Options`], and
//! [`Config::from_matches`] turns the parsed matches into a [`Config`] that can assemble a [`StateBuilder`].
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use getopts::{Matches, Options};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    monitor::{DiskMonitor, Monitor, MonitorError, NullMonitor},
    state::{FlushMode, ParseFlushModeError, StateBuilder},
    target::Target,
};

/// Default location of the machine-wide configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/chrome-infra/ts-mon.json";

const FILE_ENDPOINT_SCHEME: &str = "file://";

/// Errors that can occur while building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The flush mode is not one of `all`, `manual` or `auto`.
    #[error(transparent)]
    InvalidFlushMode(#[from] ParseFlushModeError),

    /// A numeric option could not be parsed.
    #[error("invalid value '{value}' for --{option}")]
    InvalidNumber {
        /// Name of the option.
        option: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The target type is not `device` or `task`.
    #[error("invalid target type '{0}' (expected 'device' or 'task')")]
    InvalidTargetType(String),

    /// A required option was not given.
    #[error("--{0} must be provided")]
    MissingOption(&'static str),

    /// The machine config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The machine config file is not valid JSON.
    #[error("failed to parse config file {}: {source}", path.display())]
    Json {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The machine config file is valid JSON but not an object.
    #[error("config file {} does not contain a JSON object", path.display())]
    NotAnObject {
        /// Path of the file.
        path: PathBuf,
    },

    /// The endpoint has no built-in monitor. Supply one with [`StateBuilder::with_monitor`].
    #[error("unsupported endpoint '{0}'")]
    UnsupportedEndpoint(String),

    /// The monitor for the endpoint could not be created.
    #[error("failed to create monitor: {0}")]
    Monitor(#[from] MonitorError),
}

/// Kind of target the process reports as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetType {
    /// A network device (the default).
    #[default]
    Device,
    /// A task of a service's job.
    Task,
}

/// Identity derived from the host's fully-qualified domain name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    /// First label of the FQDN.
    pub hostname: String,
    /// Second label of the FQDN, or empty.
    pub region: String,
    /// Digits following a trailing `-a`, `-c` or `-m` in the hostname, or empty.
    pub network: String,
}

impl HostInfo {
    /// Parses a fully-qualified domain name such as `slave1-a1.reg.tld`.
    pub fn from_fqdn(fqdn: &str) -> Self {
        let fqdn = fqdn.trim();
        let mut labels = fqdn.split('.');
        let hostname = labels.next().unwrap_or_default().to_string();
        let region = labels.next().unwrap_or_default().to_string();
        let network = network_of(&hostname).unwrap_or_default().to_string();
        Self { hostname, region, network }
    }
}

fn network_of(hostname: &str) -> Option<&str> {
    let (_, suffix) = hostname.rsplit_once('-')?;
    let digits = suffix.strip_prefix(['a', 'c', 'm'])?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Reads the machine-wide JSON configuration.
///
/// A missing file is treated as an empty configuration.
///
/// # Errors
///
/// Fails if the file exists but cannot be read, is not valid JSON, or is not a JSON object.
pub fn load_machine_config<P: AsRef<Path>>(path: P) -> Result<Map<String, Value>, ConfigError> {
    let path = path.as_ref();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No machine config file found.");
            return Ok(Map::new());
        }
        Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
    };

    match serde_json::from_str(&contents) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject { path: path.to_path_buf() }),
        Err(source) => Err(ConfigError::Json { path: path.to_path_buf(), source }),
    }
}

/// Monitoring configuration of a process.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Where collections are sent. `None` discards them.
    pub endpoint: Option<String>,
    /// Path of the credentials used by remote monitors.
    pub credentials: Option<String>,
    /// When values are sent.
    pub flush_mode: FlushMode,
    /// Interval between automatic flushes.
    pub flush_interval: Duration,
    /// Default target of every metric.
    pub target: Target,
    /// Prefix prepended to metric names, if not the default.
    pub metric_name_prefix: Option<String>,
}

impl Config {
    /// Registers every `--ts-mon-*` option.
    pub fn add_options(opts: &mut Options) {
        opts.optopt(
            "",
            "ts-mon-config-file",
            &format!("path to a JSON config file with default values (default: {DEFAULT_CONFIG_FILE})"),
            "PATH",
        );
        opts.optopt("", "ts-mon-endpoint", "url to send monitoring metrics to (file:// writes to a local file)", "URL");
        opts.optopt("", "ts-mon-credentials", "path to credentials for the monitoring endpoint", "PATH");
        opts.optopt("", "ts-mon-flush", "metric push behavior: all, manual or auto (default: auto)", "MODE");
        opts.optopt("", "ts-mon-flush-interval-secs", "seconds between automatic flushes (default: 60)", "SECONDS");
        opts.optopt("", "ts-mon-target-type", "the type of target being monitored: device or task", "TYPE");
        opts.optopt("", "ts-mon-device-hostname", "name of this device (default: first label of the FQDN)", "NAME");
        opts.optopt("", "ts-mon-device-region", "name of the region this device lives in", "REGION");
        opts.optopt("", "ts-mon-device-role", "role of the device (default: default)", "ROLE");
        opts.optopt("", "ts-mon-device-network", "name of the network this device is connected to", "NETWORK");
        opts.optopt("", "ts-mon-task-service-name", "name of the service being monitored", "NAME");
        opts.optopt("", "ts-mon-task-job-name", "name of this job instance of the task", "NAME");
        opts.optopt("", "ts-mon-task-region", "name of the region in which this task is running", "REGION");
        opts.optopt("", "ts-mon-task-hostname", "name of the host on which this task is running", "NAME");
        opts.optopt("", "ts-mon-task-number", "number (e.g. for replication) of this task (default: 0)", "NUMBER");
        opts.optopt("", "ts-mon-metric-name-prefix", "metric name prefix for all metrics", "PREFIX");
    }

    /// Builds a configuration from parsed options.
    ///
    /// `fqdn` is the host's fully-qualified domain name, used for target defaults. Options that are absent fall back
    /// to the machine config file, then to built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails if an option is malformed, a required task option is missing, or the machine config file is invalid.
    pub fn from_matches(matches: &Matches, fqdn: &str) -> Result<Self, ConfigError> {
        let config_file = matches.opt_str("ts-mon-config-file").unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        let machine_config = load_machine_config(&config_file)?;
        let from_machine_config = |key: &str| machine_config.get(key).and_then(Value::as_str).map(str::to_string);

        let endpoint =
            matches.opt_str("ts-mon-endpoint").or_else(|| from_machine_config("endpoint")).filter(|e| !e.is_empty());
        let credentials = matches.opt_str("ts-mon-credentials").or_else(|| from_machine_config("credentials"));

        let flush_mode = matches.opt_str("ts-mon-flush").as_deref().unwrap_or("auto").parse()?;
        let flush_interval = Duration::from_secs(parse_number(matches, "ts-mon-flush-interval-secs", 60)?);

        let target_type = match matches.opt_str("ts-mon-target-type").as_deref() {
            None | Some("device") => TargetType::Device,
            Some("task") => TargetType::Task,
            Some(other) => return Err(ConfigError::InvalidTargetType(other.to_string())),
        };

        let host = HostInfo::from_fqdn(fqdn);
        let target = match target_type {
            TargetType::Device => Target::device(
                matches.opt_str("ts-mon-device-region").unwrap_or_else(|| host.region.clone()),
                matches.opt_str("ts-mon-device-role").unwrap_or_else(|| "default".to_string()),
                matches.opt_str("ts-mon-device-network").unwrap_or_else(|| host.network.clone()),
                matches.opt_str("ts-mon-device-hostname").unwrap_or_else(|| host.hostname.clone()),
            ),
            TargetType::Task => Target::task(
                matches.opt_str("ts-mon-task-service-name").ok_or(ConfigError::MissingOption("ts-mon-task-service-name"))?,
                matches.opt_str("ts-mon-task-job-name").ok_or(ConfigError::MissingOption("ts-mon-task-job-name"))?,
                matches.opt_str("ts-mon-task-region").unwrap_or_else(|| host.region.clone()),
                matches.opt_str("ts-mon-task-hostname").unwrap_or_else(|| host.hostname.clone()),
                parse_number(matches, "ts-mon-task-number", 0)?,
            ),
        };

        Ok(Self {
            endpoint,
            credentials,
            flush_mode,
            flush_interval,
            target,
            metric_name_prefix: matches.opt_str("ts-mon-metric-name-prefix"),
        })
    }

    /// Creates the monitor for the configured endpoint.
    ///
    /// No endpoint discards everything, and a `file://PATH` endpoint appends to `PATH`.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::UnsupportedEndpoint`] for any other endpoint, and if the file cannot be opened.
    pub fn monitor(&self) -> Result<Arc<dyn Monitor>, ConfigError> {
        match self.endpoint.as_deref() {
            None => Ok(Arc::new(NullMonitor)),
            Some(endpoint) => match endpoint.strip_prefix(FILE_ENDPOINT_SCHEME) {
                Some(path) => Ok(Arc::new(DiskMonitor::new(path)?)),
                None => Err(ConfigError::UnsupportedEndpoint(endpoint.to_string())),
            },
        }
    }

    /// Returns a [`StateBuilder`] configured with this configuration's monitor, target and flush settings.
    ///
    /// # Errors
    ///
    /// Fails like [`Config::monitor`].
    pub fn state_builder(&self) -> Result<StateBuilder, ConfigError> {
        let mut builder = StateBuilder::new()
            .with_monitor(self.monitor()?)
            .with_target(self.target.clone())
            .with_flush_mode(self.flush_mode)
            .with_flush_interval(self.flush_interval);
        if let Some(prefix) = &self.metric_name_prefix {
            builder = builder.with_metric_name_prefix(prefix.clone());
        }
        Ok(builder)
    }
}

fn parse_number<T: std::str::FromStr>(matches: &Matches, option: &'static str, default: T) -> Result<T, ConfigError> {
    match matches.opt_str(option) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber { option, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use getopts::Options;

    use super::{load_machine_config, Config, ConfigError, HostInfo};
    use crate::{state::FlushMode, target::Target};

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let mut opts = Options::new();
        Config::add_options(&mut opts);
        let mut args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        args.push("--ts-mon-config-file".to_string());
        args.push("/nonexistent/ts-mon.json".to_string());
        let matches = opts.parse(&args).unwrap();
        Config::from_matches(&matches, "slave1-a1.reg.tld")
    }

    #[test]
    fn host_info() {
        assert_eq!(
            HostInfo::from_fqdn("slave1-a1.reg.tld"),
            HostInfo { hostname: "slave1-a1".into(), region: "reg".into(), network: "1".into() }
        );
        assert_eq!(HostInfo::from_fqdn("vm12-m42.golo"), HostInfo {
            hostname: "vm12-m42".into(),
            region: "golo".into(),
            network: "42".into(),
        });
        assert_eq!(HostInfo::from_fqdn("foo"), HostInfo { hostname: "foo".into(), ..Default::default() });
        assert_eq!(HostInfo::from_fqdn("build-x1.reg").network, "");
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.endpoint, None);
        assert_eq!(config.flush_mode, FlushMode::Auto);
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert_eq!(config.target, Target::device("reg", "default", "1", "slave1-a1"));
        assert_eq!(config.metric_name_prefix, None);
    }

    #[test]
    fn task_target() {
        let config = parse(&[
            "--ts-mon-target-type",
            "task",
            "--ts-mon-task-service-name",
            "svc",
            "--ts-mon-task-job-name",
            "job",
            "--ts-mon-task-number",
            "3",
        ])
        .unwrap();
        assert_eq!(config.target, Target::task("svc", "job", "reg", "slave1-a1", 3));

        assert!(matches!(
            parse(&["--ts-mon-target-type", "task", "--ts-mon-task-job-name", "job"]),
            Err(ConfigError::MissingOption("ts-mon-task-service-name"))
        ));
    }

    #[test]
    fn invalid_options() {
        assert!(matches!(parse(&["--ts-mon-flush", "often"]), Err(ConfigError::InvalidFlushMode(_))));
        assert!(matches!(
            parse(&["--ts-mon-flush-interval-secs", "soon"]),
            Err(ConfigError::InvalidNumber { option: "ts-mon-flush-interval-secs", .. })
        ));
        assert!(matches!(parse(&["--ts-mon-target-type", "robot"]), Err(ConfigError::InvalidTargetType(_))));
    }

    #[test]
    fn machine_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_machine_config(dir.path().join("missing.json")).unwrap();
        assert!(missing.is_empty());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(load_machine_config(&bad), Err(ConfigError::Json { .. })));

        let list = dir.path().join("list.json");
        fs::write(&list, "[1, 2]").unwrap();
        assert!(matches!(load_machine_config(&list), Err(ConfigError::NotAnObject { .. })));

        let good = dir.path().join("good.json");
        let out = dir.path().join("out.txt");
        fs::write(&good, format!(r#"{{"endpoint": "file://{}", "credentials": "/creds.json"}}"#, out.display()))
            .unwrap();

        let mut opts = Options::new();
        Config::add_options(&mut opts);
        let matches = opts.parse(["--ts-mon-config-file", good.to_str().unwrap()]).unwrap();
        let config = Config::from_matches(&matches, "host").unwrap();
        assert_eq!(config.endpoint, Some(format!("file://{}", out.display())));
        assert_eq!(config.credentials.as_deref(), Some("/creds.json"));
        assert!(config.monitor().is_ok());

        let matches =
            opts.parse(["--ts-mon-config-file", good.to_str().unwrap(), "--ts-mon-endpoint", "https://x"]).unwrap();
        let config = Config::from_matches(&matches, "host").unwrap();
        assert!(matches!(config.monitor(), Err(ConfigError::UnsupportedEndpoint(_))));
    }

    #[test]
    fn state_builder() {
        let config = parse(&["--ts-mon-flush", "manual", "--ts-mon-metric-name-prefix", "/custom/"]).unwrap();
        let state = config.state_builder().unwrap().build().unwrap();
        assert_eq!(state.flush_mode(), FlushMode::Manual);
        assert_eq!(state.metric_name_prefix(), "/custom/");
        assert_eq!(state.target(), Some(Target::device("reg", "default", "1", "slave1-a1")));
        assert!(state.flush().is_ok());
    }
}
