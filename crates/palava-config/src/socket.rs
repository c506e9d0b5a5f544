//! Bridge endpoint addresses.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Where the bridge listens: `tcp://host:port` or `unix:///path/to.sock`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum SocketEndpoint {
    /// Unix domain socket.
    Unix {
        /// Socket file.
        path: Utf8PathBuf,
    },
    /// TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port; zero binds an ephemeral port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Unix socket at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// TCP socket on `host:port`.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket file of a Unix endpoint.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        if let Self::Unix { path } = self {
            Some(path.as_path())
        } else {
            None
        }
    }

    /// Creates the directory holding a Unix socket, private to the current
    /// user when it has to be created. Does nothing for TCP endpoints or when
    /// the directory already exists.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the socket path has no parent
    /// or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let directory = path
            .parent()
            .ok_or_else(|| SocketPreparationError::NoParent {
                path: path.to_owned(),
            })?;
        if directory.as_str().is_empty() || directory.is_dir() {
            return Ok(());
        }
        private_dir_builder()
            .create(directory)
            .or_else(|error| match error.kind() {
                io::ErrorKind::AlreadyExists if directory.is_dir() => Ok(()),
                _ => Err(error),
            })
            .map_err(|source| SocketPreparationError::Directory {
                path: directory.to_owned(),
                source,
            })
    }
}

fn private_dir_builder() -> DirBuilder {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    builder
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(formatter, "unix://{path}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(text).map_err(|source| SocketParseError::Url {
            endpoint: text.to_owned(),
            source,
        })?;
        let missing = |part| SocketParseError::Incomplete {
            endpoint: text.to_owned(),
            part,
        };
        match url.scheme() {
            "tcp" => {
                let host = url.host_str().ok_or_else(|| missing("host"))?;
                let port = url.port().ok_or_else(|| missing("port"))?;
                Ok(Self::tcp(host.trim_start_matches('[').trim_end_matches(']'), port))
            }
            "unix" => match url.path() {
                "" | "/" => Err(missing("path")),
                path => Ok(Self::unix(path)),
            },
            scheme => Err(SocketParseError::Scheme {
                endpoint: text.to_owned(),
                scheme: scheme.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for SocketEndpoint {
    type Error = SocketParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<SocketEndpoint> for String {
    fn from(endpoint: SocketEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Endpoint text that does not describe a bridge endpoint.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Not a URL at all.
    #[error("'{endpoint}' is not an endpoint URL: {source}")]
    Url {
        /// Text as given.
        endpoint: String,
        /// URL parser failure.
        #[source]
        source: url::ParseError,
    },
    /// Neither `tcp` nor `unix`.
    #[error("'{endpoint}' uses unsupported scheme '{scheme}' (expected tcp or unix)")]
    Scheme {
        /// Text as given.
        endpoint: String,
        /// Scheme found.
        scheme: String,
    },
    /// A required part of the address is absent.
    #[error("'{endpoint}' has no {part}")]
    Incomplete {
        /// Text as given.
        endpoint: String,
        /// Missing part.
        part: &'static str,
    },
}

/// The directory for a Unix socket could not be made ready.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path is a bare root.
    #[error("socket path '{path}' has no parent directory")]
    NoParent {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// Creating the directory failed.
    #[error("cannot create socket directory '{path}': {source}")]
    Directory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Filesystem failure.
        #[source]
        source: io::Error,
    },
}
