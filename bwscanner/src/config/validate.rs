//! Range and cross-key checks for a parsed configuration.

use std::fmt::Display;
use std::sync::OnceLock;

use regex::Regex;

use super::file::ConfigFile;

/// Largest accepted validity window, in days.
pub(crate) const MAX_DATA_PERIOD_DAYS: u32 = 3650;

/// Largest accepted value for any option given in fractional seconds.
pub(crate) const MAX_SECONDS: f64 = 86_400.0;

fn nickname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,19}$").expect("static regex"))
}

/// Collects one message per bad value; an empty list means the config is usable.
pub(crate) fn validate(config: &ConfigFile) -> Vec<String> {
    let mut errors = Vec::new();
    let g = &config.general;
    check_range(
        &mut errors,
        "general",
        "data_period",
        g.data_period,
        1,
        MAX_DATA_PERIOD_DAYS,
    );
    check_min(&mut errors, "general", "circuit_timeout", g.circuit_timeout, 1);
    check_seconds(&mut errors, "general", "http_timeout", g.http_timeout);

    let s = &config.scanner;
    if !nickname_pattern().is_match(&s.nickname) {
        errors.push(format!(
            "scanner/nickname ({}): Must be 1-19 alphanumeric characters",
            s.nickname
        ));
    }
    check_range(&mut errors, "scanner", "num_rtts", s.num_rtts, 1, 100);
    check_range(&mut errors, "scanner", "num_downloads", s.num_downloads, 1, 100);
    check_min(&mut errors, "scanner", "initial_read_request", s.initial_read_request, 1);
    check_min(&mut errors, "scanner", "min_download_size", s.min_download_size, 1);
    check_min(&mut errors, "scanner", "max_download_size", s.max_download_size, 1);
    check_min(&mut errors, "scanner", "measurement_threads", s.measurement_threads, 1);
    check_min(&mut errors, "scanner", "idle_interval", s.idle_interval, 1);
    check_min(&mut errors, "scanner", "failure_pause", s.failure_pause, 1);
    for (key, value) in [
        ("download_toofast", s.download_toofast),
        ("download_min", s.download_min),
        ("download_target", s.download_target),
        ("download_max", s.download_max),
    ] {
        if !(value >= 0.001) {
            errors.push(format!("scanner/{} ({}): Cannot be less than 0.001", key, value));
        } else if !(value <= MAX_SECONDS) {
            errors.push(format!(
                "scanner/{} ({}): Cannot be greater than {}",
                key, value, MAX_SECONDS
            ));
        }
    }
    check_seconds(&mut errors, "scanner", "transfer_timeout", s.transfer_timeout);

    if !(s.download_toofast < s.download_min
        && s.download_min <= s.download_target
        && s.download_target <= s.download_max)
    {
        errors.push(format!(
            "scanner/download_* ({}, {}, {}, {}): Must satisfy toofast < min <= target <= max",
            s.download_toofast, s.download_min, s.download_target, s.download_max
        ));
    }
    if s.max_download_size < s.min_download_size {
        errors.push(format!(
            "scanner/max_download_size ({}): Cannot be smaller than min_download_size ({})",
            s.max_download_size, s.min_download_size
        ));
    } else if s.initial_read_request < s.min_download_size
        || s.initial_read_request > s.max_download_size
    {
        errors.push(format!(
            "scanner/initial_read_request ({}): Must be within [{}, {}]",
            s.initial_read_request, s.min_download_size, s.max_download_size
        ));
    }

    let p = &config.prioritizer;
    if !(0.0..=1.0).contains(&p.fraction_relays) {
        errors.push(format!(
            "relayprioritizer/fraction_relays ({}): Must be within [0.0, 1.0]",
            p.fraction_relays
        ));
    }
    check_min(&mut errors, "relayprioritizer", "min_relays", p.min_relays, 1);

    let c = &config.cleanup;
    check_min(&mut errors, "cleanup", "stale_days", c.stale_days, 1);
    check_min(&mut errors, "cleanup", "rotten_days", c.rotten_days, 1);
    check_min(&mut errors, "cleanup", "interval", c.interval, 1);
    if c.rotten_days <= c.stale_days {
        errors.push(format!(
            "cleanup/rotten_days ({}): Must be greater than stale_days ({})",
            c.rotten_days, c.stale_days
        ));
    }

    let d = &config.destinations;
    if d.urls.is_empty() {
        errors.push("destinations/urls (): At least one destination is required".to_string());
    }
    for url in &d.urls {
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                if parsed.host_str().is_none() {
                    errors.push(format!(
                        "destinations/urls ({}): Does not appear to contain a hostname",
                        url
                    ));
                }
            }
            Ok(_) => errors.push(format!(
                "destinations/urls ({}): Must start with http:// or https://",
                url
            )),
            Err(e) => errors.push(format!("destinations/urls ({}): Not a valid url ({})", url, e)),
        }
    }
    if let Some(proxy) = &d.socks_proxy {
        if let Err(e) = reqwest::Url::parse(proxy) {
            errors.push(format!(
                "destinations/socks_proxy ({}): Not a valid url ({})",
                proxy, e
            ));
        }
    }

    errors
}

fn check_min<T: PartialOrd + Display>(
    errors: &mut Vec<String>,
    section: &str,
    key: &str,
    value: T,
    minimum: T,
) {
    if value < minimum {
        errors.push(format!(
            "{}/{} ({}): Cannot be less than {}",
            section, key, value, minimum
        ));
    }
}

fn check_range<T: PartialOrd + Display>(
    errors: &mut Vec<String>,
    section: &str,
    key: &str,
    value: T,
    minimum: T,
    maximum: T,
) {
    if value > maximum {
        errors.push(format!(
            "{}/{} ({}): Cannot be greater than {}",
            section, key, value, maximum
        ));
    } else {
        check_min(errors, section, key, value, minimum);
    }
}

/// A duration in fractional seconds: positive, finite and at most a day.
fn check_seconds(errors: &mut Vec<String>, section: &str, key: &str, value: f64) {
    if !(value > 0.0) {
        errors.push(format!("{}/{} ({}): Must be greater than 0", section, key, value));
    } else if !(value <= MAX_SECONDS) {
        errors.push(format!(
            "{}/{} ({}): Cannot be greater than {}",
            section, key, value, MAX_SECONDS
        ));
    }
}
