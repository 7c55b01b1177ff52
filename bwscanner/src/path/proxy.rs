//! SOCKS-proxied HTTP paths.
//!
//! The overlay client exposes a SOCKS proxy. Every measurement gets its own
//! `reqwest` client whose proxy username is the hop list (target first,
//! then the helper exit), so each measurement travels on an isolated
//! session that the overlay client attaches to a path over exactly those
//! hops. Nothing is shared between relays.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::{
    choose_exit, BoxFuture, CircuitHops, MeasurementPath, PathBuilder, PathError, TransportError,
};
use crate::relay::Relay;

/// Password half of the per-relay isolation credentials.
pub const ISOLATION_PASSWORD: &str = "bwscanner";

/// Settings for [`ProxyPathBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPathConfig {
    /// Candidate destination URLs; one is picked at random per path.
    pub destinations: Vec<String>,
    /// SOCKS proxy of the overlay client. `None` connects directly.
    pub socks_proxy: Option<String>,
    /// Smallest acceptable destination resource, usually the largest
    /// download the prober may ask for.
    pub min_content_length: u64,
    /// Timeout applied to each HTTP request on the path.
    pub http_timeout: Duration,
}

/// Builds [`HttpPath`]s through the overlay client's SOCKS proxy.
#[derive(Debug)]
pub struct ProxyPathBuilder {
    destinations: Vec<Url>,
    proxy: Option<Url>,
    min_content_length: u64,
    http_timeout: Duration,
}

impl ProxyPathBuilder {
    pub fn new(config: ProxyPathConfig) -> Result<Self, PathError> {
        if config.destinations.is_empty() {
            return Err(PathError::InvalidConfig(
                "no destinations configured".to_string(),
            ));
        }
        let destinations = config
            .destinations
            .iter()
            .map(|d| {
                Url::parse(d)
                    .map_err(|e| PathError::InvalidConfig(format!("destination {}: {}", d, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let proxy = config
            .socks_proxy
            .as_deref()
            .map(|p| {
                Url::parse(p).map_err(|e| PathError::InvalidConfig(format!("proxy {}: {}", p, e)))
            })
            .transpose()?;

        Ok(Self {
            destinations,
            proxy,
            min_content_length: config.min_content_length,
            http_timeout: config.http_timeout,
        })
    }

    fn client_for(&self, relay: &Relay, hops: &CircuitHops) -> Result<Client, PathError> {
        let builder = Client::builder()
            .timeout(self.http_timeout)
            .user_agent(format!("bwscanner/{}", crate::VERSION));
        let builder = match &self.proxy {
            Some(proxy) => {
                let url = isolated_proxy_url(proxy, hops);
                let proxy = reqwest::Proxy::all(url.as_str())
                    .map_err(|e| PathError::InvalidConfig(format!("proxy: {}", e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };
        builder.build().map_err(|e| PathError::Failed {
            fingerprint: relay.fingerprint.clone(),
            reason: format!("client setup: {}", e),
        })
    }

    fn pick_destination(&self) -> Url {
        let index = rand::rng().random_range(0..self.destinations.len());
        self.destinations[index].clone()
    }

    /// HEAD the destination over the new path; returns its content length.
    async fn check_destination(
        &self,
        client: &Client,
        url: &Url,
        relay: &Relay,
    ) -> Result<u64, PathError> {
        let response = client
            .head(url.clone())
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
            .map_err(|e| PathError::Failed {
                fingerprint: relay.fingerprint.clone(),
                reason: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(PathError::DestinationUnusable {
                url: url.to_string(),
                reason: format!("HEAD returned {}", response.status()),
            });
        }
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| PathError::DestinationUnusable {
                url: url.to_string(),
                reason: "missing Content-Length".to_string(),
            })?;
        if length < self.min_content_length {
            return Err(PathError::DestinationUnusable {
                url: url.to_string(),
                reason: format!(
                    "content length {} below required {}",
                    length, self.min_content_length
                ),
            });
        }
        Ok(length)
    }
}

impl PathBuilder for ProxyPathBuilder {
    fn build<'a>(
        &'a self,
        relay: &'a Relay,
        relays: &'a [Relay],
    ) -> BoxFuture<'a, Result<Box<dyn MeasurementPath>, PathError>> {
        Box::pin(async move {
            let url = self.pick_destination();
            let port = url.port_or_known_default().ok_or_else(|| {
                PathError::DestinationUnusable {
                    url: url.to_string(),
                    reason: "no port".to_string(),
                }
            })?;
            let hops = choose_exit(relay, relays, port)?;
            let client = self.client_for(relay, &hops)?;
            let content_length = self.check_destination(&client, &url, relay).await?;
            debug!(relay = %relay, url = %url, content_length, "Destination usable");
            Ok(Box::new(HttpPath {
                client,
                url,
                content_length,
                http_timeout: self.http_timeout,
                hops,
            }) as Box<dyn MeasurementPath>)
        })
    }
}

/// A path that fetches byte ranges of one HTTP resource.
#[derive(Debug)]
pub struct HttpPath {
    client: Client,
    url: Url,
    content_length: u64,
    http_timeout: Duration,
    hops: CircuitHops,
}

impl MeasurementPath for HttpPath {
    fn destination_url(&self) -> &str {
        self.url.as_str()
    }

    fn content_length(&self) -> u64 {
        self.content_length
    }

    fn fetch_range(&self, start: u64, len: u64) -> BoxFuture<'_, Result<u64, TransportError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .get(self.url.clone())
                .header(RANGE, range_header(start, len))
                .header(ACCEPT_ENCODING, "identity")
                .send()
                .await
                .map_err(|e| TransportError::from_reqwest(e, self.http_timeout))?;

            let status = response.status();
            if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
                return Err(TransportError::Status(status.as_u16()));
            }

            // A server that ignores the range sends the whole body; stop at `len`.
            let mut received = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TransportError::from_reqwest(e, self.http_timeout))?
            {
                received += chunk.len() as u64;
                if received >= len {
                    break;
                }
            }
            Ok(received.min(len))
        })
    }

    fn hops(&self) -> Option<&CircuitHops> {
        Some(&self.hops)
    }
}

/// Proxy URL carrying the per-measurement isolation credentials.
pub(crate) fn isolated_proxy_url(proxy: &Url, hops: &CircuitHops) -> Url {
    let mut url = proxy.clone();
    // Only fails for cannot-be-a-base URLs, which reqwest rejects anyway.
    let _ = url.set_username(&hops.to_path_spec());
    let _ = url.set_password(Some(ISOLATION_PASSWORD));
    url
}

/// `Range` header value for `len` bytes at `start` (end inclusive).
pub(crate) fn range_header(start: u64, len: u64) -> String {
    format!("bytes={}-{}", start, start + len.max(1) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP server: HEAD answers with `status` and `total` as the
    /// length, GET answers 206 with the requested range filled with zeros.
    async fn serve(status: &'static str, total: u64) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf).to_string();
                    let response = if request.starts_with("HEAD") {
                        format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            status, total
                        )
                        .into_bytes()
                    } else {
                        let range = request
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("range: bytes=").map(str::to_string))
                            .unwrap();
                        let (a, b) = range.split_once('-').unwrap();
                        let len = b.trim().parse::<u64>().unwrap() - a.parse::<u64>().unwrap() + 1;
                        let mut bytes = format!(
                            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            len
                        )
                        .into_bytes();
                        bytes.extend(std::iter::repeat(0u8).take(len as usize));
                        bytes
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    fn builder(url: String, min_content_length: u64) -> ProxyPathBuilder {
        ProxyPathBuilder::new(ProxyPathConfig {
            destinations: vec![url],
            socks_proxy: None,
            min_content_length,
            http_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn relay() -> Relay {
        Relay::new("EE".repeat(20), "relay1", "10.0.0.5").with_bandwidth(1000)
    }

    /// A helper exit for [`relay`] that reaches any port.
    fn helper() -> Relay {
        Relay::new("FF".repeat(20), "exit1", "10.0.0.6")
            .with_bandwidth(1500)
            .with_exit_policy("accept 1-65535".parse().unwrap())
    }

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(0, 1), "bytes=0-0");
        assert_eq!(range_header(100, 500), "bytes=100-599");
    }

    #[test]
    fn test_isolation_credentials_carry_hops() {
        let proxy = Url::parse("socks5h://127.0.0.1:9050").unwrap();
        let hops = CircuitHops {
            target: "ABCDEF".into(),
            exit: "012345".into(),
        };
        let url = isolated_proxy_url(&proxy, &hops);
        assert_eq!(url.username(), "ABCDEF,012345");
        assert_eq!(url.password(), Some(ISOLATION_PASSWORD));
        assert_eq!(url.host_str(), Some("127.0.0.1"));
    }

    #[test]
    fn test_new_rejects_empty_or_bad_destinations() {
        let mut config = ProxyPathConfig {
            destinations: vec![],
            socks_proxy: None,
            min_content_length: 1,
            http_timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            ProxyPathBuilder::new(config.clone()),
            Err(PathError::InvalidConfig(_))
        ));
        config.destinations = vec!["not a url".to_string()];
        assert!(matches!(
            ProxyPathBuilder::new(config),
            Err(PathError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_build_and_fetch_range() {
        let addr = serve("200 OK", 4096).await;
        let builder = builder(format!("http://{}/file", addr), 1024);

        let (relay, relays) = (relay(), vec![relay(), helper()]);
        let path = builder.build(&relay, &relays).await.unwrap();
        assert_eq!(path.content_length(), 4096);
        assert_eq!(path.fetch_range(100, 500).await.unwrap(), 500);
        let hops = path.hops().unwrap();
        assert_eq!(hops.target, relay.fingerprint);
        assert_eq!(hops.exit, relays[1].fingerprint);
    }

    #[tokio::test]
    async fn test_build_without_helper_exit_fails() {
        let addr = serve("200 OK", 4096).await;
        let builder = builder(format!("http://{}/file", addr), 1024);

        let relay = relay();
        let err = builder.build(&relay, &[relay.clone()]).await.err().unwrap();
        assert!(matches!(err, PathError::NoExit { .. }), "{}", err);
        assert_eq!(err.status(), crate::store::ProbeStatus::BuildError);
    }

    #[tokio::test]
    async fn test_small_destination_is_unusable() {
        let addr = serve("200 OK", 100).await;
        let builder = builder(format!("http://{}/file", addr), 1024);

        let (relay, relays) = (relay(), vec![helper()]);
        let err = builder.build(&relay, &relays).await.err().unwrap();
        assert!(matches!(err, PathError::DestinationUnusable { .. }), "{}", err);
    }

    #[tokio::test]
    async fn test_non_200_destination_is_unusable() {
        let addr = serve("404 Not Found", 4096).await;
        let builder = builder(format!("http://{}/file", addr), 1024);

        let (relay, relays) = (relay(), vec![helper()]);
        let err = builder.build(&relay, &relays).await.err().unwrap();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_build() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let builder = builder(format!("http://{}/file", addr), 1);

        let (relay, relays) = (relay(), vec![helper()]);
        let err = builder.build(&relay, &relays).await.err().unwrap();
        assert!(matches!(err, PathError::Failed { .. }), "{}", err);
        assert_eq!(err.status(), crate::store::ProbeStatus::BuildError);
    }
}
