use std::sync::{Arc, OnceLock};

use lmrelay_provider_core::RelayError;
use wreq::Proxy;

struct SharedClient {
    proxy: Option<String>,
    client: Arc<wreq::Client>,
}

static SHARED_CLIENT: OnceLock<SharedClient> = OnceLock::new();

/// Connection pooling only works if every request goes through the same
/// client, so the proxy is fixed at first use.
pub(crate) fn shared_client(proxy: Option<&str>) -> Result<Arc<wreq::Client>, RelayError> {
    let proxy_owned = proxy.map(|value| value.to_string());
    if let Some(shared) = SHARED_CLIENT.get() {
        if shared.proxy != proxy_owned {
            return Err(RelayError::InvalidRequest(
                "proxy mismatch: only a single global proxy is supported".to_string(),
            ));
        }
        return Ok(shared.client.clone());
    }

    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = proxy {
        let proxy = Proxy::all(proxy_url).map_err(|err| RelayError::Network(err.to_string()))?;
        builder = builder.proxy(proxy);
    }

    let client = builder
        .build()
        .map_err(|err| RelayError::Network(err.to_string()))?;
    let shared = SharedClient {
        proxy: proxy_owned,
        client: Arc::new(client),
    };
    let _ = SHARED_CLIENT.set(shared);
    match SHARED_CLIENT.get() {
        Some(shared) => Ok(shared.client.clone()),
        None => Err(RelayError::Network(
            "shared client initialization raced".to_string(),
        )),
    }
}
