use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Error, Debug)]
#[error("invalid endpoint url: {0}")]
pub struct EndpointError(#[from] url::ParseError);

/// Where the daemon lives and how to authenticate to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub api_version: String,
    pub token: Option<String>,
}

impl Endpoint {
    fn base(&self, scheme: &str) -> Result<Url, EndpointError> {
        Ok(Url::parse(&format!(
            "{}://{}:{}/api/{}/",
            scheme, self.host, self.port, self.api_version
        ))?)
    }

    fn http_scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    fn ws_scheme(&self) -> &'static str {
        if self.tls {
            "wss"
        } else {
            "ws"
        }
    }

    pub fn api_base(&self) -> Result<Url, EndpointError> {
        self.base(self.http_scheme())
    }

    /// Historical console snapshot, fetched once per subscription.
    pub fn console_buffer(&self, target: Uuid) -> Result<Url, EndpointError> {
        Ok(self
            .api_base()?
            .join(&format!("instance/{}/console/buffer", target))?)
    }

    /// Fire-and-forget command input.
    pub fn console_command(&self, target: Uuid) -> Result<Url, EndpointError> {
        Ok(self.api_base()?.join(&format!("instance/{}/console", target))?)
    }

    /// Live console channel. The bearer credential travels in the query
    /// string because the upgrade request carries no auth header.
    pub fn console_stream(&self, target: Uuid) -> Result<Url, EndpointError> {
        let mut url = self
            .base(self.ws_scheme())?
            .join(&format!("instance/{}/console/stream", target))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut()
                .append_pair("token", &format!("Bearer {}", token));
        }
        Ok(url)
    }

    /// Live performance channel.
    pub fn monitor(&self, target: Uuid) -> Result<Url, EndpointError> {
        Ok(self
            .base(self.ws_scheme())?
            .join(&format!("monitor/{}", target))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(tls: bool, token: Option<&str>) -> Endpoint {
        Endpoint {
            host: "daemon.lan".into(),
            port: 16662,
            tls,
            api_version: "v1".into(),
            token: token.map(String::from),
        }
    }

    fn target() -> Uuid {
        Uuid::parse_str("3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b").unwrap()
    }

    #[test]
    fn http_endpoints() {
        let ep = endpoint(false, None);
        assert_eq!(
            ep.console_buffer(target()).unwrap().as_str(),
            "http://daemon.lan:16662/api/v1/instance/3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b/console/buffer"
        );
        assert_eq!(
            ep.console_command(target()).unwrap().as_str(),
            "http://daemon.lan:16662/api/v1/instance/3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b/console"
        );
    }

    #[test]
    fn stream_carries_bearer_token() {
        let url = endpoint(true, Some("abc123"))
            .console_stream(target())
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(
            url.path(),
            "/api/v1/instance/3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b/console/stream"
        );
        let token: Vec<_> = url.query_pairs().collect();
        assert_eq!(token.len(), 1);
        assert_eq!(token[0].0, "token");
        assert_eq!(token[0].1, "Bearer abc123");
    }

    #[test]
    fn monitor_uses_plain_ws() {
        let url = endpoint(false, Some("abc")).monitor(target()).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://daemon.lan:16662/api/v1/monitor/3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b"
        );
    }

    #[test]
    fn bad_host_is_an_error() {
        let mut ep = endpoint(false, None);
        ep.host = "bad host".into();
        assert!(ep.api_base().is_err());
    }
}
