//! Rotating outbound proxies for the crawler.
//!
//! The pool is built explicitly, refreshed on demand or by a background task
//! owned by whoever called [`ProxyPool::spawn_refresher`], and torn down with
//! [`ProxyPool::shutdown`].

use reqwest::{Client, Proxy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::error::CrawlError;

struct Refresher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ProxyPool {
    list_url: String,
    fetcher: Client,
    request_timeout: Duration,
    clients: RwLock<Vec<(String, Client)>>,
    cursor: AtomicUsize,
    refresher: Mutex<Option<Refresher>>,
}

impl ProxyPool {
    /// Builds the pool and performs the first refresh.
    pub async fn init(list_url: &str, request_timeout: Duration) -> Result<Arc<Self>, CrawlError> {
        Url::parse(list_url)?;
        let fetcher = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()?;

        let pool = Arc::new(Self {
            list_url: list_url.to_string(),
            fetcher,
            request_timeout,
            clients: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            refresher: Mutex::new(None),
        });
        pool.refresh().await?;
        Ok(pool)
    }

    /// Re-downloads the proxy list and swaps in one client per proxy. An empty
    /// or unreachable list leaves the previous set in place.
    pub async fn refresh(&self) -> Result<usize, CrawlError> {
        let response = self.fetcher.get(&self.list_url).send().await?;
        if !response.status().is_success() {
            return Err(CrawlError::UnexpectedResponse {
                message: format!("proxy list returned status {}", response.status()),
            });
        }
        let body = response.text().await?;

        let mut clients = Vec::new();
        for proxy in parse_proxy_list(&body) {
            match self.build_client(&proxy) {
                Ok(client) => clients.push((proxy, client)),
                Err(e) => warn!(proxy = %proxy, error = %e, "Skipping unusable proxy"),
            }
        }

        let count = clients.len();
        if count == 0 {
            warn!(url = %self.list_url, "Proxy list was empty; keeping previous proxies");
            return Ok(self.len());
        }

        if let Ok(mut current) = self.clients.write() {
            *current = clients;
        }
        info!(count, "Refreshed proxy pool");
        Ok(count)
    }

    fn build_client(&self, proxy: &str) -> Result<Client, CrawlError> {
        Ok(Client::builder()
            .proxy(Proxy::all(proxy)?)
            .connect_timeout(Duration::from_secs(10))
            .timeout(self.request_timeout)
            .build()?)
    }

    /// Next proxied client, round-robin. `None` when the pool is empty.
    pub fn next_client(&self) -> Option<Client> {
        let clients = self.clients.read().ok()?;
        if clients.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % clients.len();
        debug!(proxy = %clients[index].0, "Using proxy");
        Some(clients[index].1.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refreshes every `every` until [`ProxyPool::shutdown`] is called. A
    /// second call replaces nothing and returns false.
    pub fn spawn_refresher(self: &Arc<Self>, every: Duration) -> bool {
        let Ok(mut slot) = self.refresher.lock() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }

        let (stop, mut stopped) = watch::channel(false);
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = pool.refresh().await {
                            warn!(error = %e, "Background proxy refresh failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("Proxy refresher stopped");
        });

        *slot = Some(Refresher { stop, handle });
        true
    }

    /// Stops the background refresher and waits for it to exit.
    pub async fn shutdown(&self) {
        let refresher = self.refresher.lock().ok().and_then(|mut slot| slot.take());
        if let Some(Refresher { stop, handle }) = refresher {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Proxy refresher task panicked");
            }
        }
    }
}

/// One proxy per line (`host:port` or a full URL); blank lines and `#`
/// comments are ignored.
pub fn parse_proxy_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let candidate = if line.contains("://") {
                line.to_string()
            } else {
                format!("http://{line}")
            };
            Url::parse(&candidate)
                .ok()
                .filter(|url| url.host_str().is_some())
                .map(|_| candidate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_list() {
        let body = "\n# rotating pool\n10.0.0.1:8080\nsocks5://10.0.0.2:1080\n  \nhttp://\n";
        assert_eq!(
            parse_proxy_list(body),
            vec!["http://10.0.0.1:8080", "socks5://10.0.0.2:1080"]
        );
    }

    #[tokio::test]
    async fn test_init_rejects_bad_url() {
        let err = ProxyPool::init("not a url", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CrawlError::UrlError { .. }));
    }
}
