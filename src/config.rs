#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::video_cache::DEFAULT_YT_DLP;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_MEDIA_ROOT: &str = "/tmp/youtubevids";
pub const DEFAULT_RESPONSE_CACHE_DIR: &str = "/tmp/newtube-proxy-cache";
pub const DEFAULT_PROXY_PORT: u16 = 5000;
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub media_root: PathBuf,
    pub response_cache_dir: PathBuf,
    pub www_root: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub fetch_timeout: Duration,
    /// Contact sent upstream in the `From` header.
    pub from: Option<String>,
    pub yt_dlp: PathBuf,
}

/// Values given on the command line; they win over the environment and the
/// env file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub media_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub response_cache_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<ProxyConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config(&file_vars, env_var_string, overrides)
}

fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<ProxyConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let path_setting = |cli: Option<PathBuf>, key: &str| {
        cli.filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup(key).map(PathBuf::from))
    };

    let media_root = path_setting(overrides.media_root, "MEDIA_ROOT")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
    let response_cache_dir = path_setting(overrides.response_cache_dir, "RESPONSE_CACHE_DIR")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RESPONSE_CACHE_DIR));
    let www_root = path_setting(overrides.www_root, "WWW_ROOT");

    let port = match overrides.port {
        Some(port) => port,
        None => match lookup("NEWTUBE_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("NEWTUBE_PORT is not a port number: {raw:?}"))?,
            None => DEFAULT_PROXY_PORT,
        },
    };
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("NEWTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_PROXY_HOST.to_string());
    let timeout_secs = match lookup("NEWTUBE_FETCH_TIMEOUT_SECS") {
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .with_context(|| {
                format!("NEWTUBE_FETCH_TIMEOUT_SECS must be a positive integer: {raw:?}")
            })?,
        None => DEFAULT_FETCH_TIMEOUT_SECS,
    };

    Ok(ProxyConfig {
        media_root,
        response_cache_dir,
        www_root,
        host,
        port,
        fetch_timeout: Duration::from_secs(timeout_secs),
        from: lookup("NEWTUBE_FROM"),
        yt_dlp: lookup("NEWTUBE_YT_DLP")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP)),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// Loads a dotenv-style file. A file that does not exist contributes nothing.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading settings from {}", path.display()));
        }
    };
    Ok(content.lines().filter_map(parse_env_line).collect())
}

/// One `NAME=value` assignment. `export` prefixes, blank lines and `#`
/// comments are accepted; quoted values are taken literally, unquoted ones
/// end at a ` #` comment.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("export")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map_or(line, str::trim_start);
    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let value = value.trim();
    let value = match value.chars().next() {
        Some(quote @ ('"' | '\'')) => match value[1..].find(quote) {
            Some(end) => &value[1..=end],
            None => value,
        },
        _ => value
            .find(" #")
            .map_or(value, |comment| value[..comment].trim_end()),
    };
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> ProxyConfig {
        let file = make_env(contents);
        let vars = read_env_file(file.path()).unwrap();
        build_config(&vars, |_| None, ConfigOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_apply_to_empty_env() {
        let config = config_from("");
        assert_eq!(config.media_root, PathBuf::from(DEFAULT_MEDIA_ROOT));
        assert_eq!(
            config.response_cache_dir,
            PathBuf::from(DEFAULT_RESPONSE_CACHE_DIR)
        );
        assert_eq!(config.www_root, None);
        assert_eq!(config.host, DEFAULT_PROXY_HOST);
        assert_eq!(config.port, DEFAULT_PROXY_PORT);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.from, None);
        assert_eq!(config.yt_dlp, PathBuf::from("yt-dlp"));
    }

    #[test]
    fn file_values_are_read() {
        let config = config_from(
            "MEDIA_ROOT=\"/yt\"\nWWW_ROOT=\"/www\"\nNEWTUBE_PORT=\"4242\"\n\
             NEWTUBE_FETCH_TIMEOUT_SECS=5\nNEWTUBE_FROM=ops@example.com\n\
             NEWTUBE_YT_DLP=/opt/yt-dlp\nRESPONSE_CACHE_DIR=/cache\n",
        );
        assert_eq!(config.media_root, PathBuf::from("/yt"));
        assert_eq!(config.www_root, Some(PathBuf::from("/www")));
        assert_eq!(config.port, 4242);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.from.as_deref(), Some("ops@example.com"));
        assert_eq!(config.yt_dlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(config.response_cache_dir, PathBuf::from("/cache"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_env("MEDIA_ROOT=\"/file\"\n").path()).unwrap();
        let config = build_config(
            &vars,
            |key| (key == "MEDIA_ROOT").then(|| "/env".to_string()),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.media_root, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("MEDIA_ROOT".to_string(), "/file-media".to_string());
        vars.insert("WWW_ROOT".to_string(), "/file-www".to_string());
        vars.insert("NEWTUBE_HOST".to_string(), "file-host".to_string());
        vars.insert("NEWTUBE_PORT".to_string(), "7000".to_string());

        let overrides = ConfigOverrides {
            media_root: Some(PathBuf::from("/override-media")),
            port: Some(9000),
            host: Some("override-host".into()),
            ..ConfigOverrides::default()
        };
        let config = build_config(
            &vars,
            |key| match key {
                "WWW_ROOT" => Some("/env-www".to_string()),
                "NEWTUBE_PORT" => Some("8000".to_string()),
                _ => None,
            },
            overrides,
        )
        .unwrap();

        assert_eq!(config.media_root, PathBuf::from("/override-media"));
        assert_eq!(config.www_root, Some(PathBuf::from("/env-www")));
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "override-host");
    }

    #[test]
    fn blank_values_fall_through() {
        let vars = read_env_file(make_env("NEWTUBE_HOST=\"  \"\nWWW_ROOT=\n").path()).unwrap();
        let config = build_config(
            &vars,
            |_| None,
            ConfigOverrides {
                host: Some("   ".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_PROXY_HOST);
        assert_eq!(config.www_root, None);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        for contents in [
            "NEWTUBE_PORT=nope\n",
            "NEWTUBE_PORT=70000\n",
            "NEWTUBE_FETCH_TIMEOUT_SECS=0\n",
            "NEWTUBE_FETCH_TIMEOUT_SECS=soon\n",
        ] {
            let vars = read_env_file(make_env(contents).path()).unwrap();
            assert!(
                build_config(&vars, |_| None, ConfigOverrides::default()).is_err(),
                "{contents}"
            );
        }
    }

    #[test]
    fn env_lines_are_parsed_one_at_a_time() {
        let parsed = parse_env_line;
        assert_eq!(
            parsed("export NEWTUBE_PORT=8080"),
            Some(("NEWTUBE_PORT".into(), "8080".into()))
        );
        assert_eq!(
            parsed("  NEWTUBE_HOST = \"0.0.0.0\"  "),
            Some(("NEWTUBE_HOST".into(), "0.0.0.0".into()))
        );
        assert_eq!(
            parsed("NEWTUBE_FROM='me@example.com' # contact"),
            Some(("NEWTUBE_FROM".into(), "me@example.com".into()))
        );
        assert_eq!(
            parsed("WWW_ROOT=/srv/www # static pages"),
            Some(("WWW_ROOT".into(), "/srv/www".into()))
        );
        assert_eq!(
            parsed("MEDIA_ROOT=\"/media/with # hash\""),
            Some(("MEDIA_ROOT".into(), "/media/with # hash".into()))
        );
        assert_eq!(
            parsed("exported=1"),
            Some(("exported".into(), "1".into()))
        );
        assert_eq!(parsed("# NEWTUBE_PORT=1"), None);
        assert_eq!(parsed(""), None);
        assert_eq!(parsed("no assignment here"), None);
        assert_eq!(parsed("BAD NAME=1"), None);
        assert_eq!(parsed("=orphan"), None);
    }

    #[test]
    fn unreadable_env_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_env_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("reading settings from"));
    }

    #[test]
    fn missing_env_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_config_reads_the_given_file() {
        let file = make_env("NEWTUBE_YT_DLP=/usr/local/bin/yt-dlp-test\n");
        let config = resolve_config(ConfigOverrides {
            env_path: Some(file.path().to_path_buf()),
            ..ConfigOverrides::default()
        })
        .unwrap();
        if env::var_os("NEWTUBE_YT_DLP").is_none() {
            assert_eq!(config.yt_dlp, PathBuf::from("/usr/local/bin/yt-dlp-test"));
        }
    }
}
