use std::fmt;

/// Errors from loading, parsing, or saving the port→target mapping file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    InvalidPort(String),
    InvalidTarget(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "I/O error: {}", err),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {}", err),
            ConfigError::InvalidPort(s) => write!(f, "invalid port: '{}'", s),
            ConfigError::InvalidTarget(s) => write!(f, "invalid target address: '{}'", s),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced within a single proxy session (spec.md §7's error table).
#[derive(Debug)]
pub enum ProxyError {
    /// Dialing the backend failed or timed out.
    BackendDial(std::io::Error),
    /// A read or write on the backend socket failed.
    BackendIo(std::io::Error),
    /// The session's local port has no entry in the mapping.
    ConfigLookup(u16),
    /// The mapping store could not be read at all.
    ConfigSnapshot(ConfigError),
    /// The SSH transport itself failed (key exchange, channel protocol, ...).
    SshIo(russh::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::BackendDial(err) => write!(f, "backend dial failed: {}", err),
            ProxyError::BackendIo(err) => write!(f, "backend I/O error: {}", err),
            ProxyError::ConfigLookup(port) => write!(f, "no mapping for port {}", port),
            ProxyError::ConfigSnapshot(err) => write!(f, "config snapshot failed: {}", err),
            ProxyError::SshIo(err) => write!(f, "SSH transport error: {}", err),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::BackendDial(err) | ProxyError::BackendIo(err) => Some(err),
            ProxyError::ConfigSnapshot(err) => Some(err),
            ProxyError::SshIo(err) => Some(err),
            ProxyError::ConfigLookup(_) => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::BackendIo(err)
    }
}

impl From<russh::Error> for ProxyError {
    fn from(err: russh::Error) -> Self {
        ProxyError::SshIo(err)
    }
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::ConfigSnapshot(err)
    }
}

impl ProxyError {
    /// The single human-readable line written to the SSH channel before
    /// close, for the kinds that are diagnosable to the user (spec.md §6).
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            ProxyError::BackendDial(err) => {
                Some(format!("tts-proxy: could not reach backend: {}\r\n", err))
            }
            ProxyError::ConfigLookup(port) => Some(format!(
                "tts-proxy: no backend configured for port {}\r\n",
                port
            )),
            ProxyError::ConfigSnapshot(err) => {
                Some(format!("tts-proxy: configuration unavailable: {}\r\n", err))
            }
            ProxyError::BackendIo(_) => None,
            ProxyError::SshIo(_) => None,
        }
    }
}
