pub mod url {
    //!
    //! Queue URLs.  Three forms are accepted:
    //!
    //! *  `fmq://host:port/abs/path` - absolute path, optional host/port.
    //! *  `fmq:///abs/path` - absolute path on the local host.
    //! *  `fmqp://host::rel/path` - path relative to the server's data
    //! directory.
    //!
    //! The host and port are informational only; the server always opens
    //! the queue on its own file system.
    //!
    use std::fmt;
    use std::path::{Path, PathBuf};
    use thiserror::Error;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum UrlError {
        #[error("url '{0}' has no protocol")]
        NoProtocol(String),
        #[error("unsupported protocol '{0}', must be fmq or fmqp")]
        BadProtocol(String),
        #[error("url '{0}' has no file path")]
        NoPath(String),
        #[error("invalid port '{0}'")]
        BadPort(String),
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FmqUrl {
        pub protocol: String,
        pub host: Option<String>,
        pub port: Option<u16>,
        pub path: String,
    }

    impl FmqUrl {
        pub fn parse(url: &str) -> Result<FmqUrl, UrlError> {
            let url = url.trim();
            let sep = url
                .find("://")
                .ok_or_else(|| UrlError::NoProtocol(url.to_string()))?;
            let protocol = &url[..sep];
            if protocol != "fmq" && protocol != "fmqp" {
                return Err(UrlError::BadProtocol(protocol.to_string()));
            }
            let rest = &url[sep + 3..];

            let (location, path) = if let Some(dc) = rest.find("::") {
                (&rest[..dc], &rest[dc + 2..])
            } else if let Some(slash) = rest.find('/') {
                (&rest[..slash], &rest[slash..])
            } else {
                return Err(UrlError::NoPath(url.to_string()));
            };
            if path.is_empty() || path == "/" {
                return Err(UrlError::NoPath(url.to_string()));
            }

            let (host, port) = match location.rfind(':') {
                Some(colon) => {
                    let port_str = &location[colon + 1..];
                    let port = port_str
                        .parse::<u16>()
                        .map_err(|_| UrlError::BadPort(port_str.to_string()))?;
                    (&location[..colon], Some(port))
                }
                None => (location, None),
            };
            Ok(FmqUrl {
                protocol: protocol.to_string(),
                host: if host.is_empty() {
                    None
                } else {
                    Some(host.to_string())
                },
                port,
                path: path.to_string(),
            })
        }

        pub fn is_relative(&self) -> bool {
            !Path::new(&self.path).is_absolute()
        }

        ///
        /// The file system path of the queue; relative paths are taken
        /// relative to `data_dir`.
        ///
        pub fn resolve(&self, data_dir: &Path) -> PathBuf {
            if self.is_relative() {
                data_dir.join(&self.path)
            } else {
                PathBuf::from(&self.path)
            }
        }
    }

    impl fmt::Display for FmqUrl {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}://", self.protocol)?;
            if let Some(host) = &self.host {
                write!(f, "{}", host)?;
            }
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
            if self.is_relative() {
                write!(f, "::")?;
            }
            write!(f, "{}", self.path)
        }
    }

    #[cfg(test)]
    mod url_test {
        use super::*;

        #[test]
        fn absolute_with_host() {
            let url = FmqUrl::parse("fmq://datahost:5520/data/fmq/radar").unwrap();
            assert_eq!("fmq", url.protocol);
            assert_eq!(Some(String::from("datahost")), url.host);
            assert_eq!(Some(5520), url.port);
            assert_eq!("/data/fmq/radar", url.path);
            assert_eq!(
                PathBuf::from("/data/fmq/radar"),
                url.resolve(Path::new("/elsewhere"))
            );
        }
        #[test]
        fn local_absolute() {
            let url = FmqUrl::parse("fmq:///tmp/q").unwrap();
            assert_eq!(None, url.host);
            assert_eq!(None, url.port);
            assert_eq!("/tmp/q", url.path);
            assert_eq!("fmq:///tmp/q", url.to_string());
        }
        #[test]
        fn relative_to_data_dir() {
            let url = FmqUrl::parse("fmqp://localhost::fmq/radar").unwrap();
            assert!(url.is_relative());
            assert_eq!(Some(String::from("localhost")), url.host);
            assert_eq!(
                PathBuf::from("/data/fmq/radar"),
                url.resolve(Path::new("/data"))
            );
            assert_eq!("fmqp://localhost::fmq/radar", url.to_string());
        }
        #[test]
        fn rejects() {
            assert_eq!(
                UrlError::BadProtocol(String::from("http")),
                FmqUrl::parse("http://host/x").unwrap_err()
            );
            assert!(matches!(
                FmqUrl::parse("/tmp/q"),
                Err(UrlError::NoProtocol(_))
            ));
            assert!(matches!(FmqUrl::parse("fmq://host"), Err(UrlError::NoPath(_))));
            assert!(matches!(FmqUrl::parse("fmq:///"), Err(UrlError::NoPath(_))));
            assert!(matches!(FmqUrl::parse("fmqp://host::"), Err(UrlError::NoPath(_))));
            assert_eq!(
                UrlError::BadPort(String::from("http")),
                FmqUrl::parse("fmq://host:http/x").unwrap_err()
            );
        }
    }
}
