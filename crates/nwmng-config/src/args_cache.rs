// ── Startup argument cache ──
//
// Transport arguments given on one run are remembered for the next: the
// cache is merged under the command-line flags, checked, and rewritten
// every startup.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::ConfigError;

const HEADER: &str = "\
########################################################################
# nwmng startup argument cache
#   - Rewritten on every start; flags given on the command line win
#   - One `key = value` per line, `#` starts a comment
#   - Encryption = 1 selects the socket transport, 0 the serial port
########################################################################
";

/// Keys understood in the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
pub enum ArgKey {
    #[strum(serialize = "Encryption")]
    Encryption,
    #[strum(serialize = "Port")]
    Port,
    #[strum(serialize = "Baud Rate")]
    BaudRate,
    #[strum(serialize = "Socket Server")]
    SocketServer,
    #[strum(serialize = "Socket Client")]
    SocketClient,
    #[strum(serialize = "Socket Encryption")]
    SocketEncryption,
}

impl ArgKey {
    /// Whether the key applies to the selected transport.
    fn active(self, encrypted: bool) -> bool {
        match self {
            Self::Encryption => true,
            Self::Port | Self::BaudRate => !encrypted,
            Self::SocketServer | Self::SocketClient | Self::SocketEncryption => encrypted,
        }
    }
}

/// Transport arguments, each optional until merged with the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjArgs {
    /// `true` selects the secure (socket) transport.
    pub encrypted: Option<bool>,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub sock_server: Option<PathBuf>,
    pub sock_client: Option<PathBuf>,
    pub sock_encrypted: Option<bool>,
}

/// A complete, checked transport selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Serial {
        port: String,
        baud_rate: u32,
    },
    Socket {
        server: PathBuf,
        client: PathBuf,
        encrypted: bool,
    },
}

fn parse_flag(line: usize, text: &str) -> Result<bool, ConfigError> {
    match text {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ConfigError::Format {
            line,
            reason: format!("expected 0 or 1, got '{other}'"),
        }),
    }
}

/// Parse cache text into `key -> (line number, value)`.
fn parse(text: &str) -> Result<HashMap<ArgKey, (usize, String)>, ConfigError> {
    let mut entries = HashMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(ConfigError::Format {
                line,
                reason: "expected `key = value`".into(),
            });
        };
        match ArgKey::from_str(key.trim()) {
            Ok(key) => {
                entries.insert(key, (line, value.trim().to_owned()));
            }
            Err(_) => warn!(line, key = key.trim(), "unknown argument cache key ignored"),
        }
    }
    Ok(entries)
}

impl ProjArgs {
    /// Fill every argument the command line left unset from the cache
    /// text. Cached values of the inactive transport are ignored.
    pub fn merge(&self, cached: &str) -> Result<Self, ConfigError> {
        let entries = parse(cached)?;
        let mut merged = self.clone();

        if merged.encrypted.is_none() {
            if let Some((line, value)) = entries.get(&ArgKey::Encryption) {
                merged.encrypted = Some(parse_flag(*line, value)?);
            }
        }
        let Some(encrypted) = merged.encrypted else {
            return Ok(merged);
        };

        for (key, (line, value)) in &entries {
            if !key.active(encrypted) {
                debug!(key = %key, "cached argument of inactive transport ignored");
                continue;
            }
            match key {
                ArgKey::Encryption => {}
                ArgKey::Port => {
                    merged.port.get_or_insert_with(|| value.clone());
                }
                ArgKey::BaudRate => {
                    if merged.baud_rate.is_none() {
                        let rate = value.parse().map_err(|_| ConfigError::Format {
                            line: *line,
                            reason: format!("'{value}' is not a baud rate"),
                        })?;
                        merged.baud_rate = Some(rate);
                    }
                }
                ArgKey::SocketServer => {
                    merged.sock_server.get_or_insert_with(|| PathBuf::from(value));
                }
                ArgKey::SocketClient => {
                    merged.sock_client.get_or_insert_with(|| PathBuf::from(value));
                }
                ArgKey::SocketEncryption => {
                    if merged.sock_encrypted.is_none() {
                        merged.sock_encrypted = Some(parse_flag(*line, value)?);
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Check the merged arguments describe a usable transport.
    pub fn validate(&self) -> Result<Transport, ConfigError> {
        let missing = |field: &str, reason: &str| ConfigError::Validation {
            field: field.into(),
            reason: reason.into(),
        };
        match self.encrypted {
            None => Err(missing("mode", "secure or insecure mode must be given")),
            Some(true) => Ok(Transport::Socket {
                server: self
                    .sock_server
                    .clone()
                    .ok_or_else(|| missing("socket server", "required in secure mode"))?,
                client: self
                    .sock_client
                    .clone()
                    .ok_or_else(|| missing("socket client", "required in secure mode"))?,
                encrypted: self.sock_encrypted.unwrap_or(true),
            }),
            Some(false) => {
                let port = self
                    .port
                    .clone()
                    .ok_or_else(|| missing("port", "required in insecure mode"))?;
                match self.baud_rate {
                    Some(rate) if rate > 0 => Ok(Transport::Serial {
                        port,
                        baud_rate: rate,
                    }),
                    _ => Err(missing("baud rate", "a non-zero baud rate is required in insecure mode")),
                }
            }
        }
    }

    fn value(&self, key: ArgKey) -> Option<String> {
        let flag = |b: bool| String::from(if b { "1" } else { "0" });
        match key {
            ArgKey::Encryption => self.encrypted.map(flag),
            ArgKey::Port => self.port.clone(),
            ArgKey::BaudRate => self.baud_rate.map(|r| r.to_string()),
            ArgKey::SocketServer => self.sock_server.as_ref().map(|p| p.display().to_string()),
            ArgKey::SocketClient => self.sock_client.as_ref().map(|p| p.display().to_string()),
            ArgKey::SocketEncryption => self.sock_encrypted.map(flag),
        }
    }

    /// Cache file contents: the header, then every set argument of the
    /// active transport.
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        let encrypted = self.encrypted.unwrap_or(false);
        for key in ArgKey::iter().filter(|k| k.active(encrypted)) {
            if let Some(value) = self.value(key) {
                let _ = writeln!(out, "{key} = {value}");
            }
        }
        out
    }
}

/// Write `contents` to `path` through a temporary sibling and a rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Merge `cli` with the cache at `path`, check the result and rewrite the
/// cache. A missing cache file counts as empty.
pub fn sync(path: &Path, cli: &ProjArgs) -> Result<Transport, ConfigError> {
    let cached = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let merged = cli.merge(&cached)?;
    let transport = merged.validate()?;
    write_atomic(path, &merged.render())?;
    debug!(path = %path.display(), "argument cache rewritten");
    Ok(transport)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn serial() -> ProjArgs {
        ProjArgs {
            encrypted: Some(false),
            port: Some("/dev/ttyACM0".into()),
            baud_rate: Some(115_200),
            ..ProjArgs::default()
        }
    }

    #[test]
    fn cli_flags_override_cached_lines() {
        let cached = "Encryption = 0\nPort = /dev/ttyUSB1\nBaud Rate = 9600\n";
        let cli = ProjArgs {
            port: Some("/dev/ttyACM0".into()),
            ..ProjArgs::default()
        };
        let merged = cli.merge(cached).unwrap();
        assert_eq!(merged.encrypted, Some(false));
        assert_eq!(merged.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(merged.baud_rate, Some(9600));
    }

    #[test]
    fn inactive_transport_values_are_ignored() {
        let cached = "Encryption = 1\nPort = /dev/ttyUSB1\nSocket Server = /tmp/srv\nSocket Client = /tmp/clt\n";
        let merged = ProjArgs::default().merge(cached).unwrap();
        assert_eq!(merged.port, None);
        assert_eq!(
            merged.validate().unwrap(),
            Transport::Socket {
                server: "/tmp/srv".into(),
                client: "/tmp/clt".into(),
                encrypted: true,
            }
        );
    }

    #[test]
    fn line_without_separator_is_a_format_error() {
        let err = ProjArgs::default().merge("# header\nPort /dev/tty\n").unwrap_err();
        assert!(matches!(err, ConfigError::Format { line: 2, .. }));
    }

    #[test]
    fn sanity_check_per_mode() {
        assert!(ProjArgs::default().validate().is_err());

        let mut args = serial();
        args.baud_rate = Some(0);
        assert!(matches!(args.validate(), Err(ConfigError::Validation { .. })));

        let secure = ProjArgs {
            encrypted: Some(true),
            sock_server: Some("/tmp/srv".into()),
            ..ProjArgs::default()
        };
        assert!(secure.validate().is_err());

        assert_eq!(
            serial().validate().unwrap(),
            Transport::Serial {
                port: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
            }
        );
    }

    #[test]
    fn sync_rewrites_cache_for_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("args.cache");

        sync(&path, &serial()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("####"));
        assert!(text.contains("Encryption = 0\n"));
        assert!(text.contains("Baud Rate = 115200\n"));
        assert!(!path.with_extension("tmp").exists());

        // Nothing on the command line: everything comes from the cache.
        let transport = sync(&path, &ProjArgs::default()).unwrap();
        assert_eq!(
            transport,
            Transport::Serial {
                port: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
            }
        );
    }
}
