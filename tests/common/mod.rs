use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use wiremock::MockServer;

use autoauth::auth::browser::BrowserOpener;
use autoauth::transport::http::ReqwestTransport;
use autoauth::{
    AuthorizationFlow, ClientCredentials, FlowConfig, GenericProvider, ProviderAdapter,
    ProviderEndpoints,
};

/// Plays the user: approves every authorization request by following the
/// redirect with a fixed code and the state it was given.
#[derive(Debug)]
pub struct ApprovingBrowser {
    code: String,
    echo_state: bool,
    urls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ApprovingBrowser {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            echo_state: true,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Redirects with a `state` that was never issued.
    pub fn forging_state(code: &str) -> Self {
        Self {
            echo_state: false,
            ..Self::new(code)
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl BrowserOpener for ApprovingBrowser {
    fn open(&self, url: &str) {
        self.urls.lock().push(url.to_string());

        let authorize = url::Url::parse(url).expect("authorization URL");
        let param = |key: &str| {
            authorize
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };
        let redirect_uri = param("redirect_uri").expect("redirect_uri param");
        let state = if self.echo_state {
            param("state").expect("state param")
        } else {
            "forged".to_string()
        };

        let mut redirect = url::Url::parse(&redirect_uri).expect("redirect URI");
        redirect
            .query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &state);

        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            let _ = client.get(redirect).send().await;
        });
    }
}

#[allow(dead_code)]
pub fn generic_provider(server: &MockServer) -> Arc<dyn ProviderAdapter> {
    let endpoints = ProviderEndpoints::new(
        &format!("{}/authorize", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .expect("mock endpoints");
    Arc::new(GenericProvider::new(endpoints))
}

/// Talks to the mock server without any environment proxy.
#[allow(dead_code)]
pub fn direct_transport() -> Arc<ReqwestTransport> {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Arc::new(ReqwestTransport::with_client(client))
}

#[allow(dead_code)]
pub fn flow_for(server: &MockServer, browser: Arc<dyn BrowserOpener>) -> AuthorizationFlow {
    AuthorizationFlow::builder(
        generic_provider(server),
        ClientCredentials::new("test-client-id", ""),
    )
    .config(FlowConfig {
        scope: Some("openid email".to_string()),
        callback_timeout: Some(std::time::Duration::from_secs(10)),
        ..FlowConfig::default()
    })
    .transport(direct_transport())
    .browser(browser)
    .build()
    .expect("flow")
}

#[allow(dead_code)]
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}
