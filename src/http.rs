use crate::fetch::FetchError;
use crate::proxy::ProxyCredential;
use reqwest::{Client, Proxy, header};
use std::{collections::HashMap, future::Future, time::Duration};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: FetchMethod::Get,
            url: url.into(),
            body: None,
            timeout,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>, timeout: Duration) -> Self {
        Self {
            method: FetchMethod::Post,
            url: url.into(),
            body: Some(body),
            timeout,
        }
    }
}

/// One HTTP exchange. Retries and proxy selection live above this seam.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyCredential>,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// reqwest-backed transport with one pooled client per proxy plus a direct client.
///
/// Clients are keyed by the whole credential: providers hand out many sessions on a
/// single host:port that differ only in username or password.
pub struct ReqwestTransport {
    direct: Client,
    proxied: HashMap<ProxyCredential, Client>,
}

impl ReqwestTransport {
    pub fn new(
        pool: &[ProxyCredential],
        user_agent: &str,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let direct = build_client(user_agent, connect_timeout, None)?;
        let mut proxied = HashMap::with_capacity(pool.len());
        for credential in pool {
            proxied.insert(
                credential.clone(),
                build_client(user_agent, connect_timeout, Some(credential))?,
            );
        }
        Ok(Self { direct, proxied })
    }

    fn client_for(&self, proxy: Option<&ProxyCredential>) -> Result<&Client, FetchError> {
        match proxy {
            None => Ok(&self.direct),
            Some(credential) => self.proxied.get(credential).ok_or_else(|| {
                FetchError::Network(format!("no client configured for proxy {credential}"))
            }),
        }
    }
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyCredential>,
    ) -> Result<Vec<u8>, FetchError> {
        let client = self.client_for(proxy)?;
        let builder = match request.method {
            FetchMethod::Get => client.get(&request.url),
            FetchMethod::Post => client
                .post(&request.url)
                .header(header::CONTENT_TYPE, "text/plain;charset=utf-8")
                .body(request.body.clone().unwrap_or_default()),
        };
        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub fn build_client(
    user_agent: &str,
    connect_timeout: Duration,
    proxy: Option<&ProxyCredential>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout);
    if let Some(credential) = proxy {
        let proxy = Proxy::all(credential.endpoint())?
            .basic_auth(&credential.username, &credential.password);
        builder = builder.proxy(proxy);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_client_per_proxy() {
        let pool = vec![
            ProxyCredential::parse("proxy.example.com:10001:user:pass:a", 0).unwrap(),
            ProxyCredential::parse("proxy.example.com:10002:user:pass:b", 1).unwrap(),
        ];
        let transport = ReqwestTransport::new(&pool, DEFAULT_USER_AGENT, Duration::from_secs(10)).unwrap();
        assert_eq!(transport.proxied.len(), 2);
        assert!(transport.client_for(Some(&pool[1])).is_ok());
        assert!(transport.client_for(None).is_ok());

        let stranger = ProxyCredential::parse("other.example.com:1:u:p", 0).unwrap();
        assert!(matches!(
            transport.client_for(Some(&stranger)),
            Err(FetchError::Network(_))
        ));
    }

    #[test]
    fn sessions_on_one_endpoint_get_their_own_clients() {
        let pool = vec![
            ProxyCredential::parse("gate.example.com:7000:user-session-1:pass", 0).unwrap(),
            ProxyCredential::parse("gate.example.com:7000:user-session-2:pass", 1).unwrap(),
        ];
        let transport =
            ReqwestTransport::new(&pool, DEFAULT_USER_AGENT, Duration::from_secs(10)).unwrap();
        assert_eq!(transport.proxied.len(), 2);
        let first = transport.client_for(Some(&pool[0])).unwrap();
        let second = transport.client_for(Some(&pool[1])).unwrap();
        assert!(!std::ptr::eq(first, second));

        let other_password =
            ProxyCredential::parse("gate.example.com:7000:user-session-1:other", 0).unwrap();
        assert!(transport.client_for(Some(&other_password)).is_err());
    }
}
