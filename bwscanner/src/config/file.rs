//! INI configuration file model.
//!
//! `ConfigFile` is the in-memory form of `<home>/config.ini`. Every key has
//! a default, so a partial file only overrides what it names. Relative paths
//! resolve against the home directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, Properties};

use super::error::ConfigError;
use super::validate::validate;

/// Name of the configuration file inside the home directory.
pub const CONFIG_FILENAME: &str = "config.ini";

/// Default home directory name under the user's home.
pub const DEFAULT_HOME_DIRNAME: &str = ".bwscanner";

/// Returns the default home directory (`~/.bwscanner`).
pub fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIRNAME)
}

/// `[general]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralSettings {
    /// Validity window of results, in days.
    pub data_period: u32,
    /// Per-request timeout during probing, in seconds.
    pub http_timeout: f64,
    /// Path build timeout, in whole seconds.
    pub circuit_timeout: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_period: 5,
            http_timeout: 10.0,
            circuit_timeout: 60,
        }
    }
}

/// `[scanner]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    pub nickname: String,
    pub num_rtts: u32,
    pub num_downloads: u32,
    pub initial_read_request: u64,
    pub min_download_size: u64,
    pub max_download_size: u64,
    pub download_toofast: f64,
    pub download_min: f64,
    pub download_target: f64,
    pub download_max: f64,
    pub measurement_threads: usize,
    /// Absolute budget for the download phase of one probe, in seconds.
    pub transfer_timeout: f64,
    /// Wait between cycles that found nothing to measure, in seconds.
    pub idle_interval: u64,
    /// Wait after a cycle in which no measurement succeeded, in seconds.
    pub failure_pause: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            nickname: "IDidntEditTheConfig".to_string(),
            num_rtts: 10,
            num_downloads: 5,
            initial_read_request: 16 * 1024,
            min_download_size: 1,
            max_download_size: 1024 * 1024 * 1024,
            download_toofast: 1.0,
            download_min: 5.0,
            download_target: 6.0,
            download_max: 10.0,
            measurement_threads: 3,
            transfer_timeout: 300.0,
            idle_interval: 60,
            failure_pause: 60,
        }
    }
}

/// `[relayprioritizer]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PrioritizerSettings {
    pub measure_authorities: bool,
    pub fraction_relays: f64,
    pub min_relays: usize,
}

impl Default for PrioritizerSettings {
    fn default() -> Self {
        Self {
            measure_authorities: false,
            fraction_relays: 0.05,
            min_relays: 50,
        }
    }
}

/// `[cleanup]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupSettings {
    pub stale_days: u32,
    pub rotten_days: u32,
    /// Seconds between retention passes while scanning.
    pub interval: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            stale_days: 10,
            rotten_days: 90,
            interval: 3600,
        }
    }
}

/// `[paths]` section, already resolved against the home directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSettings {
    pub datadir: PathBuf,
    pub v3bw_fname: PathBuf,
    pub started_filepath: PathBuf,
    pub relays_file: PathBuf,
}

impl PathSettings {
    fn under(home: &Path) -> Self {
        Self {
            datadir: home.join("datadir"),
            v3bw_fname: home.join("v3bw"),
            started_filepath: home.join("scanner_started"),
            relays_file: home.join("relays.json"),
        }
    }
}

/// `[destinations]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationSettings {
    pub urls: Vec<String>,
    pub socks_proxy: Option<String>,
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            urls: vec!["https://example.com/bwscanner.bin".to_string()],
            socks_proxy: Some("socks5h://127.0.0.1:9050".to_string()),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub to_file: bool,
    pub directory: PathBuf,
}

impl LoggingSettings {
    fn under(home: &Path) -> Self {
        Self {
            level: "info".to_string(),
            to_file: false,
            directory: home.join("log"),
        }
    }
}

/// The complete scanner configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub home: PathBuf,
    pub general: GeneralSettings,
    pub scanner: ScannerSettings,
    pub prioritizer: PrioritizerSettings,
    pub cleanup: CleanupSettings,
    pub paths: PathSettings,
    pub destinations: DestinationSettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::with_home(default_home_dir())
    }
}

impl ConfigFile {
    /// Default configuration rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            general: GeneralSettings::default(),
            scanner: ScannerSettings::default(),
            prioritizer: PrioritizerSettings::default(),
            cleanup: CleanupSettings::default(),
            paths: PathSettings::under(&home),
            destinations: DestinationSettings::default(),
            logging: LoggingSettings::under(&home),
            home,
        }
    }

    /// Path of the configuration file for `home`.
    pub fn path_in(home: &Path) -> PathBuf {
        home.join(CONFIG_FILENAME)
    }

    /// Returns true if `home` holds a configuration file.
    pub fn is_initialized(home: &Path) -> bool {
        Self::path_in(home).is_file()
    }

    /// Load and validate `<home>/config.ini`.
    pub fn load_from(home: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(home);
        if !path.is_file() {
            return Err(ConfigError::NotInitialized {
                home: home.to_path_buf(),
                path,
            });
        }
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(home, &text).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse { path, reason },
            other => other,
        })?;
        tracing::debug!(home = %home.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse INI text on top of the defaults for `home`, then validate.
    pub fn parse(home: &Path, text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: Self::path_in(home),
            reason: e.to_string(),
        })?;

        let mut config = Self::with_home(home);
        let mut errors = Vec::new();

        {
            let mut s = SectionReader::new(&ini, "general", &mut errors);
            s.check_keys(&["data_period", "http_timeout", "circuit_timeout"]);
            s.read("data_period", &mut config.general.data_period);
            s.read("http_timeout", &mut config.general.http_timeout);
            s.read("circuit_timeout", &mut config.general.circuit_timeout);
        }
        {
            let sc = &mut config.scanner;
            let mut s = SectionReader::new(&ini, "scanner", &mut errors);
            s.check_keys(&[
                "nickname",
                "num_rtts",
                "num_downloads",
                "initial_read_request",
                "min_download_size",
                "max_download_size",
                "download_toofast",
                "download_min",
                "download_target",
                "download_max",
                "measurement_threads",
                "transfer_timeout",
                "idle_interval",
                "failure_pause",
            ]);
            s.read_string("nickname", &mut sc.nickname);
            s.read("num_rtts", &mut sc.num_rtts);
            s.read("num_downloads", &mut sc.num_downloads);
            s.read("initial_read_request", &mut sc.initial_read_request);
            s.read("min_download_size", &mut sc.min_download_size);
            s.read("max_download_size", &mut sc.max_download_size);
            s.read("download_toofast", &mut sc.download_toofast);
            s.read("download_min", &mut sc.download_min);
            s.read("download_target", &mut sc.download_target);
            s.read("download_max", &mut sc.download_max);
            s.read("measurement_threads", &mut sc.measurement_threads);
            s.read("transfer_timeout", &mut sc.transfer_timeout);
            s.read("idle_interval", &mut sc.idle_interval);
            s.read("failure_pause", &mut sc.failure_pause);
        }
        {
            let p = &mut config.prioritizer;
            let mut s = SectionReader::new(&ini, "relayprioritizer", &mut errors);
            s.check_keys(&["measure_authorities", "fraction_relays", "min_relays"]);
            s.read_bool("measure_authorities", &mut p.measure_authorities);
            s.read("fraction_relays", &mut p.fraction_relays);
            s.read("min_relays", &mut p.min_relays);
        }
        {
            let c = &mut config.cleanup;
            let mut s = SectionReader::new(&ini, "cleanup", &mut errors);
            s.check_keys(&["stale_days", "rotten_days", "interval"]);
            s.read("stale_days", &mut c.stale_days);
            s.read("rotten_days", &mut c.rotten_days);
            s.read("interval", &mut c.interval);
        }
        {
            let p = &mut config.paths;
            let mut s = SectionReader::new(&ini, "paths", &mut errors);
            s.check_keys(&["datadir", "v3bw_fname", "started_filepath", "relays_file"]);
            s.read_path(home, "datadir", &mut p.datadir);
            s.read_path(home, "v3bw_fname", &mut p.v3bw_fname);
            s.read_path(home, "started_filepath", &mut p.started_filepath);
            s.read_path(home, "relays_file", &mut p.relays_file);
        }
        {
            let d = &mut config.destinations;
            let mut s = SectionReader::new(&ini, "destinations", &mut errors);
            s.check_keys(&["urls", "socks_proxy"]);
            if let Some(urls) = s.value("urls") {
                d.urls = urls
                    .split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect();
            }
            if let Some(proxy) = s.value("socks_proxy") {
                let proxy = proxy.trim();
                d.socks_proxy = (!proxy.is_empty()).then(|| proxy.to_string());
            }
        }
        {
            let l = &mut config.logging;
            let mut s = SectionReader::new(&ini, "logging", &mut errors);
            s.check_keys(&["level", "to_file", "directory"]);
            s.read_string("level", &mut l.level);
            s.read_bool("to_file", &mut l.to_file);
            s.read_path(home, "directory", &mut l.directory);
        }

        errors.extend(validate(&config));
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }

    /// Render this configuration as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        let g = &self.general;
        ini.with_section(Some("general"))
            .set("data_period", g.data_period.to_string())
            .set("http_timeout", g.http_timeout.to_string())
            .set("circuit_timeout", g.circuit_timeout.to_string());

        let s = &self.scanner;
        ini.with_section(Some("scanner"))
            .set("nickname", s.nickname.clone())
            .set("num_rtts", s.num_rtts.to_string())
            .set("num_downloads", s.num_downloads.to_string())
            .set("initial_read_request", s.initial_read_request.to_string())
            .set("min_download_size", s.min_download_size.to_string())
            .set("max_download_size", s.max_download_size.to_string())
            .set("download_toofast", s.download_toofast.to_string())
            .set("download_min", s.download_min.to_string())
            .set("download_target", s.download_target.to_string())
            .set("download_max", s.download_max.to_string())
            .set("measurement_threads", s.measurement_threads.to_string())
            .set("transfer_timeout", s.transfer_timeout.to_string())
            .set("idle_interval", s.idle_interval.to_string())
            .set("failure_pause", s.failure_pause.to_string());

        let p = &self.prioritizer;
        ini.with_section(Some("relayprioritizer"))
            .set(
                "measure_authorities",
                if p.measure_authorities { "on" } else { "off" },
            )
            .set("fraction_relays", p.fraction_relays.to_string())
            .set("min_relays", p.min_relays.to_string());

        let c = &self.cleanup;
        ini.with_section(Some("cleanup"))
            .set("stale_days", c.stale_days.to_string())
            .set("rotten_days", c.rotten_days.to_string())
            .set("interval", c.interval.to_string());

        let paths = &self.paths;
        ini.with_section(Some("paths"))
            .set("datadir", paths.datadir.to_string_lossy())
            .set("v3bw_fname", paths.v3bw_fname.to_string_lossy())
            .set("started_filepath", paths.started_filepath.to_string_lossy())
            .set("relays_file", paths.relays_file.to_string_lossy());

        let d = &self.destinations;
        ini.with_section(Some("destinations"))
            .set("urls", d.urls.join(", "))
            .set("socks_proxy", d.socks_proxy.clone().unwrap_or_default());

        let l = &self.logging;
        ini.with_section(Some("logging"))
            .set("level", l.level.clone())
            .set("to_file", if l.to_file { "on" } else { "off" })
            .set("directory", l.directory.to_string_lossy());

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Write this configuration to `<home>/config.ini`.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::path_in(&self.home);
        fs::create_dir_all(&self.home).map_err(|source| ConfigError::Io {
            path: self.home.clone(),
            source,
        })?;
        fs::write(&path, self.to_ini_string()).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Reads typed values from one INI section, collecting errors.
struct SectionReader<'a> {
    name: &'static str,
    props: Option<&'a Properties>,
    errors: &'a mut Vec<String>,
}

impl<'a> SectionReader<'a> {
    fn new(ini: &'a Ini, name: &'static str, errors: &'a mut Vec<String>) -> Self {
        Self {
            name,
            props: ini.section(Some(name)),
            errors,
        }
    }

    fn value(&self, key: &str) -> Option<&'a str> {
        self.props.and_then(|p| p.get(key))
    }

    fn check_keys(&mut self, known: &[&str]) {
        let Some(props) = self.props else { return };
        for (key, value) in props.iter() {
            if !known.contains(&key) {
                self.errors
                    .push(format!("{}/{} ({}): Unknown key", self.name, key, value));
            }
        }
    }

    fn read<T: FromStr>(&mut self, key: &str, target: &mut T) {
        if let Some(raw) = self.value(key) {
            match raw.trim().parse::<T>() {
                Ok(v) => *target = v,
                Err(_) => self.errors.push(format!(
                    "{}/{} ({}): Not a valid {}",
                    self.name,
                    key,
                    raw,
                    type_label::<T>()
                )),
            }
        }
    }

    fn read_string(&mut self, key: &str, target: &mut String) {
        if let Some(raw) = self.value(key) {
            *target = raw.trim().to_string();
        }
    }

    fn read_bool(&mut self, key: &str, target: &mut bool) {
        if let Some(raw) = self.value(key) {
            match parse_bool(raw) {
                Some(v) => *target = v,
                None => self.errors.push(format!(
                    "{}/{} ({}): Not a valid boolean string",
                    self.name, key, raw
                )),
            }
        }
    }

    fn read_path(&mut self, home: &Path, key: &str, target: &mut PathBuf) {
        if let Some(raw) = self.value(key) {
            let raw = raw.trim();
            if raw.is_empty() {
                self.errors
                    .push(format!("{}/{} (): Cannot be empty", self.name, key));
            } else {
                *target = resolve_path(home, raw);
            }
        }
    }
}

fn type_label<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    if name == "f64" || name == "f32" {
        "float"
    } else {
        "integer"
    }
}

/// Parses booleans the way INI users expect (`on`, `yes`, `true`, `1`, ...).
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_path(home: &Path, raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(user_home) = dirs::home_dir() {
            return user_home.join(rest);
        }
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_under_home() {
        let config = ConfigFile::with_home("/srv/scan");
        assert_eq!(config.paths.datadir, PathBuf::from("/srv/scan/datadir"));
        assert_eq!(config.paths.v3bw_fname, PathBuf::from("/srv/scan/v3bw"));
        assert_eq!(config.general.data_period, 5);
        assert_eq!(config.scanner.num_downloads, 5);
        assert!(!config.prioritizer.measure_authorities);
    }

    #[test]
    fn test_parse_empty_text_gives_defaults() {
        let config = ConfigFile::parse(Path::new("/srv/scan"), "").unwrap();
        assert_eq!(config, ConfigFile::with_home("/srv/scan"));
    }

    #[test]
    fn test_parse_overrides() {
        let text = "\
[general]
data_period = 3
http_timeout = 2.5

[scanner]
nickname = Scanner01
measurement_threads = 8

[relayprioritizer]
measure_authorities = on
fraction_relays = 0.1

[paths]
datadir = results
v3bw_fname = /var/lib/bw/v3bw

[destinations]
urls = https://a.example/f.bin, http://b.example/f.bin
socks_proxy =
";
        let config = ConfigFile::parse(Path::new("/srv/scan"), text).unwrap();
        assert_eq!(config.general.data_period, 3);
        assert_eq!(config.general.http_timeout, 2.5);
        assert_eq!(config.scanner.nickname, "Scanner01");
        assert_eq!(config.scanner.measurement_threads, 8);
        assert!(config.prioritizer.measure_authorities);
        assert_eq!(config.prioritizer.fraction_relays, 0.1);
        assert_eq!(config.paths.datadir, PathBuf::from("/srv/scan/results"));
        assert_eq!(config.paths.v3bw_fname, PathBuf::from("/var/lib/bw/v3bw"));
        assert_eq!(config.destinations.urls.len(), 2);
        assert_eq!(config.destinations.socks_proxy, None);
    }

    #[test]
    fn test_parse_collects_type_errors_and_unknown_keys() {
        let text = "\
[general]
data_period = soon
colour = blue

[relayprioritizer]
measure_authorities = maybe
";
        let errors = match ConfigFile::parse(Path::new("/h"), text) {
            Err(ConfigError::Invalid { errors }) => errors,
            other => panic!("expected Invalid, got {:?}", other),
        };
        assert!(errors.iter().any(|e| e.contains("data_period") && e.contains("integer")));
        assert!(errors.iter().any(|e| e.contains("colour") && e.contains("Unknown key")));
        assert!(errors.iter().any(|e| e.contains("measure_authorities")));
    }

    #[test]
    fn test_parse_rejects_unrepresentable_values() {
        let text = "\
[general]
http_timeout = inf
data_period = 4000000000

[scanner]
transfer_timeout = 1e300
";
        let errors = match ConfigFile::parse(Path::new("/h"), text) {
            Err(ConfigError::Invalid { errors }) => errors,
            other => panic!("expected Invalid, got {:?}", other),
        };
        assert!(errors.iter().any(|e| e.starts_with("general/http_timeout")));
        assert!(errors.iter().any(|e| e.starts_with("general/data_period")));
        assert!(errors.iter().any(|e| e.starts_with("scanner/transfer_timeout")));
    }

    #[test]
    fn test_round_trip_through_ini_text() {
        let mut config = ConfigFile::with_home("/srv/scan");
        config.scanner.nickname = "RoundTrip".to_string();
        config.cleanup.stale_days = 12;
        config.scanner.failure_pause = 90;
        let text = config.to_ini_string();
        let parsed = ConfigFile::parse(Path::new("/srv/scan"), &text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        assert!(!ConfigFile::is_initialized(&home));
        assert!(matches!(
            ConfigFile::load_from(&home),
            Err(ConfigError::NotInitialized { .. })
        ));

        let config = ConfigFile::with_home(&home);
        config.save().unwrap();
        assert!(ConfigFile::is_initialized(&home));
        assert_eq!(ConfigFile::load_from(&home).unwrap(), config);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("sure"), None);
    }
}
