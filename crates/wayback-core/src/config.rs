use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// How the poll loop treats in-flight handlers when it is cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Return right away; dispatched handlers finish on their own.
    Detach,
    /// Wait up to the given duration for dispatched handlers before returning.
    Drain(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitHubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
}

/// Typed configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Mastodon
    pub mastodon_server: String,
    pub mastodon_client_key: String,
    pub mastodon_client_secret: String,
    pub mastodon_access_token: String,
    pub mastodon_visibility: String,

    // Poll loop
    pub fetch_interval: Duration,
    pub clear_interval: Duration,
    pub grace_delay: Duration,
    pub pool_size: usize,
    pub shutdown: ShutdownMode,

    // Outlets
    pub github: Option<GitHubConfig>,

    // Archiving
    pub ia_enabled: bool,
    pub ia_endpoint: String,
    pub archive_timeout: Duration,
}

const VISIBILITIES: [&str; 4] = ["public", "unlisted", "private", "direct"];

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process env in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup: &lookup };

        // Required: all four Mastodon credentials.
        let mastodon_server = vars.required("WAYBACK_MASTODON_SERVER")?;
        let mastodon_client_key = vars.required("WAYBACK_MASTODON_KEY")?;
        let mastodon_client_secret = vars.required("WAYBACK_MASTODON_SECRET")?;
        let mastodon_access_token = vars.required("WAYBACK_MASTODON_TOKEN")?;

        let mastodon_server = mastodon_server.trim_end_matches('/').to_string();
        if !mastodon_server.starts_with("http://") && !mastodon_server.starts_with("https://") {
            return Err(Error::Config(format!(
                "WAYBACK_MASTODON_SERVER must be an http(s) URL, got {mastodon_server}"
            )));
        }

        let mastodon_visibility = vars
            .str("WAYBACK_MASTODON_VISIBILITY")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "public".to_string());
        if !VISIBILITIES.contains(&mastodon_visibility.as_str()) {
            return Err(Error::Config(format!(
                "WAYBACK_MASTODON_VISIBILITY must be one of {}",
                VISIBILITIES.join(", ")
            )));
        }

        // Intervals (milliseconds), zero falls back to the default.
        let fetch_interval = vars.millis("WAYBACK_MASTODON_FETCH_INTERVAL", 5_000);
        let clear_interval = vars.millis("WAYBACK_MASTODON_CLEAR_INTERVAL", 600_000);
        let grace_delay = Duration::from_millis(vars.u64("WAYBACK_MASTODON_GRACE").unwrap_or(1_000));

        let pool_size = vars.usize("WAYBACK_POOLING_SIZE").unwrap_or(3).max(1);

        let shutdown = match vars.u64("WAYBACK_SHUTDOWN_DRAIN") {
            Some(ms) if ms > 0 => ShutdownMode::Drain(Duration::from_millis(ms)),
            _ => ShutdownMode::Detach,
        };

        // GitHub is enabled only with the full token/owner/repo triple.
        let github = match (
            vars.non_empty("WAYBACK_GITHUB_TOKEN"),
            vars.non_empty("WAYBACK_GITHUB_OWNER"),
            vars.non_empty("WAYBACK_GITHUB_REPO"),
        ) {
            (Some(token), Some(owner), Some(repo)) => Some(GitHubConfig { token, owner, repo }),
            _ => None,
        };

        let ia_enabled = vars.bool("WAYBACK_ENABLE_IA").unwrap_or(true);
        let ia_endpoint = vars
            .non_empty("WAYBACK_IA_ENDPOINT")
            .unwrap_or_else(|| "https://web.archive.org".to_string())
            .trim_end_matches('/')
            .to_string();
        if !ia_enabled {
            return Err(Error::Config(
                "no archiving backend enabled (set WAYBACK_ENABLE_IA=true)".to_string(),
            ));
        }

        let archive_timeout = Duration::from_secs(vars.u64("WAYBACK_TIMEOUT").unwrap_or(120).max(1));

        Ok(Self {
            mastodon_server,
            mastodon_client_key,
            mastodon_client_secret,
            mastodon_access_token,
            mastodon_visibility,
            fetch_interval,
            clear_interval,
            grace_delay,
            pool_size,
            shutdown,
            github,
            ia_enabled,
            ia_endpoint,
            archive_timeout,
        })
    }

    pub fn publish_to_github(&self) -> bool {
        self.github.is_some()
    }
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn str(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.str(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.non_empty(key)
            .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.str(key).map(|s| {
            matches!(
                s.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse::<u64>().ok())
    }

    fn usize(&self, key: &str) -> Option<usize> {
        self.str(key).and_then(|s| s.trim().parse::<usize>().ok())
    }

    fn millis(&self, key: &str, default_ms: u64) -> Duration {
        let ms = self.u64(key).filter(|v| *v > 0).unwrap_or(default_ms);
        Duration::from_millis(ms)
    }
}

/// Export `.env` entries that the process environment does not already set.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

/// `KEY=value` lines, optionally prefixed with `export`. Quoted values are
/// taken literally; unquoted ones lose a trailing ` # comment`.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, raw) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return None;
            }
            Some((key.to_string(), dotenv_value(raw.trim())))
        })
        .collect()
}

fn dotenv_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("WAYBACK_MASTODON_SERVER", "https://mastodon.example/"),
        ("WAYBACK_MASTODON_KEY", "key"),
        ("WAYBACK_MASTODON_SECRET", "secret"),
        ("WAYBACK_MASTODON_TOKEN", "token"),
    ];

    #[test]
    fn dotenv_lines_are_parsed_with_quotes_exports_and_comments() {
        let contents = "\
# mastodon
WAYBACK_MASTODON_SERVER=https://mastodon.example
export WAYBACK_MASTODON_TOKEN = \"tok # not a comment\"
WAYBACK_POOLING_SIZE=5 # workers
WAYBACK_IA_ENDPOINT='https://ia.example'
not a pair
=missing-key
";
        assert_eq!(
            parse_dotenv(contents),
            vec![
                ("WAYBACK_MASTODON_SERVER".to_string(), "https://mastodon.example".to_string()),
                ("WAYBACK_MASTODON_TOKEN".to_string(), "tok # not a comment".to_string()),
                ("WAYBACK_POOLING_SIZE".to_string(), "5".to_string()),
                ("WAYBACK_IA_ENDPOINT".to_string(), "https://ia.example".to_string()),
            ]
        );
    }

    #[test]
    fn defaults_apply_with_only_required_vars() {
        let cfg = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(cfg.mastodon_server, "https://mastodon.example");
        assert_eq!(cfg.mastodon_visibility, "public");
        assert_eq!(cfg.fetch_interval, Duration::from_secs(5));
        assert_eq!(cfg.clear_interval, Duration::from_secs(600));
        assert_eq!(cfg.grace_delay, Duration::from_secs(1));
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.shutdown, ShutdownMode::Detach);
        assert!(cfg.github.is_none());
        assert!(cfg.ia_enabled);
        assert_eq!(cfg.ia_endpoint, "https://web.archive.org");
    }

    #[test]
    fn missing_mastodon_token_is_a_config_error() {
        let err = Config::from_lookup(lookup(&REQUIRED[..3])).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("WAYBACK_MASTODON_TOKEN")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = ("WAYBACK_MASTODON_KEY", "   ");
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn github_requires_token_owner_and_repo() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WAYBACK_GITHUB_TOKEN", "ghp"));
        pairs.push(("WAYBACK_GITHUB_OWNER", "wabarc"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(!cfg.publish_to_github());

        pairs.push(("WAYBACK_GITHUB_REPO", "archives"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            cfg.github,
            Some(GitHubConfig {
                token: "ghp".to_string(),
                owner: "wabarc".to_string(),
                repo: "archives".to_string(),
            })
        );
    }

    #[test]
    fn drain_and_pool_size_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WAYBACK_SHUTDOWN_DRAIN", "2500"));
        pairs.push(("WAYBACK_POOLING_SIZE", "0"));
        pairs.push(("WAYBACK_MASTODON_FETCH_INTERVAL", "250"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            cfg.shutdown,
            ShutdownMode::Drain(Duration::from_millis(2500))
        );
        assert_eq!(cfg.pool_size, 1);
        assert_eq!(cfg.fetch_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_visibility_and_disabled_archiver() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WAYBACK_MASTODON_VISIBILITY", "everyone"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WAYBACK_ENABLE_IA", "false"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
