//! Shared HTTP clients, one per model endpoint.
//!
//! Every participant of a team usually talks to the same endpoint, so the
//! group chat reuses a single `reqwest::Client` (and its connection pool)
//! per base URL instead of paying DNS and TLS setup on every turn.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    /// Global cache of HTTP clients indexed by base URL.
    static ref CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client is configured with:
/// - up to 16 idle connections per host
/// - 90-second idle timeout for persistent connections
/// - TCP keepalive every 60 seconds
/// - 30-second connection timeout
///
/// Request timeouts are not set here; callers bound each model call with
/// their own configured timeout.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    let mut pool = match CLIENT_POOL.lock() {
        Ok(pool) => pool,
        Err(poisoned) => poisoned.into_inner(),
    };
    pool.entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

/// Number of distinct base URLs with a pooled client.
pub fn pooled_endpoints() -> usize {
    match CLIENT_POOL.lock() {
        Ok(pool) => pool.len(),
        Err(poisoned) => poisoned.into_inner().len(),
    }
}

fn create_pooled_client() -> reqwest::Client {
    match reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            log::warn!(
                "http_client_pool::create_pooled_client(): falling back to default client: {}",
                e
            );
            reqwest::Client::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(url: &str) -> bool {
        CLIENT_POOL.lock().unwrap().contains_key(url)
    }

    #[test]
    fn test_client_pool_reuses_entries() {
        let url = "https://api.openai.com";
        let _client1 = get_or_create_client(url);
        let _client2 = get_or_create_client(url);
        assert!(contains(url));

        let local = "http://localhost:11434";
        let _client3 = get_or_create_client(local);
        assert!(contains(local));
        // other tests share the pool
        assert!(pooled_endpoints() >= 2);
    }
}
