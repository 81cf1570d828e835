use crate::error::{ApiError, Result};
use crate::model::{Account, AdjacencyMap, Identity};
use crate::policy::{Action, ErrorEntry, ErrorPolicy};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Most sub-calls one `execute` request may carry. Protocol constant.
pub const API_LIST_THRESHOLD: usize = 25;

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Observes every backoff sleep as `(attempt, delay)`.
pub type BackoffCallback = Arc<dyn Fn(u32, Duration) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_version: String,
    pub timeout_secs: u64,
    /// Seconds; the n-th retry waits `backoff_factor * 2^n`
    pub backoff_factor: f64,
    /// Total attempts per call, first one included
    pub max_attempts: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_version: "5.154".to_string(),
            timeout_secs: 10,
            backoff_factor: 0.09,
            max_attempts: 5,
        }
    }
}

/// Why one attempt failed, after consulting the error policy.
enum Failure {
    Api { entry: ErrorEntry, message: String },
    /// Non-success HTTP status listed as retryable
    Status(u16),
    Network(reqwest::Error),
    Fatal(ApiError),
}

/// Client bound to a single account. Not meant to be shared between
/// concurrent callers; concurrency comes from owning several accounts.
pub struct ApiClient {
    client: Client,
    account: Account,
    policy: Arc<ErrorPolicy>,
    options: ClientOptions,
    backoff_callback: Option<BackoffCallback>,
}

impl ApiClient {
    pub fn new(account: Account, policy: Arc<ErrorPolicy>, options: ClientOptions) -> Result<Self> {
        let timeout = Duration::from_secs(options.timeout_secs.max(1));
        let client = Client::builder()
            .user_agent(concat!("Tendril/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self {
            client,
            account,
            policy,
            options,
            backoff_callback: None,
        })
    }

    pub fn with_backoff_callback(mut self, callback: BackoffCallback) -> Self {
        self.backoff_callback = Some(callback);
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Resolve screen names (or numeric ids given as text) to identities.
    pub async fn resolve_identities(&self, names: &[String]) -> Result<Vec<Identity>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        info!("Resolving {} screen names", names.len());
        let params = vec![("user_ids", names.join(","))];
        let Some(response) = self.call("users.get", params).await? else {
            return Ok(Vec::new());
        };

        let users = response
            .as_array()
            .ok_or_else(|| resolution_error("users.get", "response"))?;

        users
            .iter()
            .map(|user| {
                user.get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| resolution_error("users.get", "response[].id"))
            })
            .collect()
    }

    /// Fetch the friend lists of up to [`API_LIST_THRESHOLD`] identities in
    /// one `execute` round-trip.
    pub async fn fetch_adjacency(&self, ids: &[Identity]) -> Result<AdjacencyMap> {
        if ids.len() > API_LIST_THRESHOLD {
            return Err(ApiError::BudgetExceeded {
                size: ids.len(),
                limit: API_LIST_THRESHOLD,
            });
        }

        let mut adjacency: AdjacencyMap = ids.iter().map(|id| (*id, Vec::new())).collect();
        if ids.is_empty() {
            return Ok(adjacency);
        }

        debug!("Fetching adjacency for {} identities", ids.len());
        let params = vec![
            ("code", adjacency_script(ids)),
            ("func_v", "1".to_string()),
        ];
        let Some(response) = self.call("execute", params).await? else {
            return Ok(adjacency);
        };

        let rows: Vec<(Identity, Option<Vec<Identity>>)> = serde_json::from_value(response)
            .map_err(|_| resolution_error("execute", "response[][id, items]"))?;

        for (id, friends) in rows {
            adjacency.insert(id, friends.unwrap_or_default());
        }

        Ok(adjacency)
    }

    /// Issue `method`, retrying per the error policy. `Ok(None)` means the
    /// call was skipped.
    async fn call(
        &self,
        method: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<Option<Value>> {
        let url = self.account.method_url(method)?;
        params.push(("access_token", self.account.access_token.clone()));
        params.push(("v", self.options.api_version.clone()));

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let last = match self.send_once(&url, &params, method).await {
                Ok(response) => return Ok(Some(response)),
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::Network(source)) => match self.policy.network_action() {
                    Action::Retry => source.to_string(),
                    Action::Skip => {
                        warn!("Skipping {} after network failure: {}", method, source);
                        return Ok(None);
                    }
                    Action::Break => {
                        return Err(ApiError::Transport {
                            method: method.to_string(),
                            source,
                        });
                    }
                },
                Err(Failure::Status(status)) => format!("HTTP {}", status),
                Err(Failure::Api { entry, message }) => match entry.action {
                    Action::Retry => format!("error {} ({})", entry.code, message),
                    Action::Skip => {
                        warn!(
                            "Skipping {}: error {} ({}) -- {}",
                            method, entry.code, entry.description, message
                        );
                        return Ok(None);
                    }
                    Action::Break => {
                        return Err(ApiError::Break {
                            method: method.to_string(),
                            code: entry.code,
                            status: entry.status,
                            message,
                        });
                    }
                },
            };

            if attempt >= self.options.max_attempts {
                return Err(ApiError::RetriesExhausted {
                    method: method.to_string(),
                    attempts: attempt,
                    last,
                });
            }

            let delay = self.backoff_delay(attempt);
            debug!("Retry {} -- {}; waiting {:?}", method, last, delay);
            if let Some(ref callback) = self.backoff_callback {
                callback(attempt, delay);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        params: &[(&'static str, String)],
        method: &str,
    ) -> std::result::Result<Value, Failure> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .query(params)
            .send()
            .await
            .map_err(Failure::Network)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(Failure::Network)?;
        let envelope: Option<Value> = serde_json::from_str(&body).ok();

        // The API reports most errors inside a 200 response
        if let Some(error) = envelope.as_ref().and_then(|v| v.get("error")) {
            let code = error.get("error_code").and_then(Value::as_i64);
            let message = error
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            debug!("Response api code: {:?} (HTTP {})", code, status);

            return Err(match code.and_then(|c| self.policy.lookup(c)) {
                Some(entry) => Failure::Api {
                    entry: entry.clone(),
                    message,
                },
                None => Failure::Fatal(ApiError::Unhandled {
                    method: method.to_string(),
                    code,
                    status,
                    message,
                }),
            });
        }

        if !(200..300).contains(&status) {
            return Err(if self.policy.retries_status(status) {
                Failure::Status(status)
            } else {
                Failure::Fatal(ApiError::Unhandled {
                    method: method.to_string(),
                    code: None,
                    status,
                    message: body.chars().take(200).collect(),
                })
            });
        }

        let mut envelope =
            envelope.ok_or_else(|| Failure::Fatal(resolution_error(method, "response")))?;

        if let Some(errors) = envelope.get("execute_errors").and_then(Value::as_array) {
            for error in errors {
                let code = error.get("error_code").and_then(Value::as_i64);
                let message = error
                    .get("error_msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                warn!("{} partial failure: {:?} {}", method, code, message);
            }
        }

        envelope
            .get_mut("response")
            .map(Value::take)
            .ok_or_else(|| Failure::Fatal(resolution_error(method, "response")))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.options.backoff_factor * 2f64.powi(exponent)).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
    }
}

fn resolution_error(method: &str, key: &str) -> ApiError {
    ApiError::Resolution {
        method: method.to_string(),
        key: key.to_string(),
    }
}

/// Server-side script that loops `friends.get` over `ids` and returns
/// `[[id, items], ...]`, with `[]` for users whose friends are unavailable.
fn adjacency_script(ids: &[Identity]) -> String {
    let list = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"var ids = [{list}];
var i = 0;
var res = [];
while (i < ids.length) {{
    var friends = API.friends.get({{"user_id": ids[i]}});
    if (friends.items == null) {{
        res.push([ids[i], []]);
    }} else {{
        res.push([ids[i], friends.items]);
    }}
    i = i + 1;
}}
return res;"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn test_client(server: &MockServer) -> ApiClient {
        let account = Account::new(format!("{}/method/", server.uri()), "test-token");
        let policy = Arc::new(ErrorPolicy::builtin().unwrap());
        let options = ClientOptions {
            backoff_factor: 0.005,
            max_attempts: 4,
            timeout_secs: 5,
            ..ClientOptions::default()
        };
        ApiClient::new(account, policy, options).unwrap()
    }

    fn api_error(code: i64, msg: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "error": { "error_code": code, "error_msg": msg }
        }))
    }

    fn recorded_backoffs(client: ApiClient) -> (ApiClient, Arc<StdMutex<Vec<Duration>>>) {
        let sleeps = Arc::new(StdMutex::new(Vec::new()));
        let sleeps_clone = sleeps.clone();
        let client = client.with_backoff_callback(Arc::new(move |_attempt, delay| {
            sleeps_clone.lock().unwrap().push(delay);
        }));
        (client, sleeps)
    }

    #[tokio::test]
    async fn test_resolve_identities() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .and(query_param("user_ids", "durov,id2"))
            .and(query_param("access_token", "test-token"))
            .and(query_param("v", "5.154"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [
                    { "id": 1, "first_name": "Pavel" },
                    { "id": 2, "first_name": "Alexandra" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let ids = client
            .resolve_identities(&["durov".to_string(), "id2".to_string()])
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resolve_identities_missing_response_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.resolve_identities(&["durov".to_string()]).await;

        assert!(matches!(result, Err(ApiError::Resolution { .. })));
    }

    #[tokio::test]
    async fn test_fetch_adjacency_fills_missing_and_null_items() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .and(query_param("func_v", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [[1, [2, 3]], [2, null]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let adjacency = client.fetch_adjacency(&[1, 2, 3]).await.unwrap();

        assert_eq!(adjacency.len(), 3);
        assert_eq!(adjacency[&1], vec![2, 3]);
        assert!(adjacency[&2].is_empty());
        assert!(adjacency[&3].is_empty());
    }

    #[tokio::test]
    async fn test_fetch_adjacency_tolerates_execute_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [[7, [8]], [9, null]],
                "execute_errors": [
                    { "method": "friends.get", "error_code": 30, "error_msg": "This profile is private" }
                ]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let adjacency = client.fetch_adjacency(&[7, 9]).await.unwrap();

        assert_eq!(adjacency[&7], vec![8]);
        assert!(adjacency[&9].is_empty());
    }

    #[tokio::test]
    async fn test_fetch_adjacency_rejects_oversized_batch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let ids: Vec<Identity> = (0..=API_LIST_THRESHOLD as i64).collect();
        let result = client.fetch_adjacency(&ids).await;

        assert!(matches!(
            result,
            Err(ApiError::BudgetExceeded { size, limit }) if size == API_LIST_THRESHOLD + 1 && limit == API_LIST_THRESHOLD
        ));
    }

    #[tokio::test]
    async fn test_retry_twice_then_succeed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(api_error(6, "Too many requests per second"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [{ "id": 42 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, sleeps) = recorded_backoffs(test_client(&server));
        let ids = client.resolve_identities(&["u42".to_string()]).await.unwrap();

        assert_eq!(ids, vec![42]);
        let sleeps = sleeps.lock().unwrap();
        assert_eq!(sleeps.len(), 2, "expected exactly two backoff sleeps");
        assert!(sleeps[0] < sleeps[1], "backoff must grow: {:?}", *sleeps);
        assert_eq!(sleeps[0], Duration::from_secs_f64(0.005 * 2.0));
        assert_eq!(sleeps[1], Duration::from_secs_f64(0.005 * 4.0));
    }

    #[tokio::test]
    async fn test_retry_on_http_status_without_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [{ "id": 5 }]
            })))
            .mount(&server)
            .await;

        let (client, sleeps) = recorded_backoffs(test_client(&server));
        let ids = client.resolve_identities(&["u5".to_string()]).await.unwrap();

        assert_eq!(ids, vec![5]);
        assert_eq!(sleeps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(api_error(6, "Too many requests per second"))
            .expect(4)
            .mount(&server)
            .await;

        let (client, sleeps) = recorded_backoffs(test_client(&server));
        let result = client.fetch_adjacency(&[1]).await;

        assert!(matches!(
            result,
            Err(ApiError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(sleeps.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_skip_returns_empty_and_is_repeatable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(api_error(30, "This profile is private"))
            .expect(2)
            .mount(&server)
            .await;

        let (client, sleeps) = recorded_backoffs(test_client(&server));

        for _ in 0..2 {
            let adjacency = client.fetch_adjacency(&[10, 11]).await.unwrap();
            assert_eq!(adjacency.len(), 2);
            assert!(adjacency.values().all(Vec::is_empty));
        }
        assert!(sleeps.lock().unwrap().is_empty(), "skip must not back off");
    }

    #[tokio::test]
    async fn test_break_aborts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(api_error(5, "User authorization failed: invalid access_token"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.fetch_adjacency(&[1]).await.unwrap_err();

        assert!(err.is_break());
        assert!(matches!(err, ApiError::Break { code: 5, status: 401, .. }));
    }

    #[tokio::test]
    async fn test_unmapped_code_is_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(api_error(4242, "Something new"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.resolve_identities(&["x".to_string()]).await;

        assert!(matches!(
            result,
            Err(ApiError::Unhandled { code: Some(4242), .. })
        ));
    }

    #[tokio::test]
    async fn test_unmapped_http_status_is_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.resolve_identities(&["x".to_string()]).await;

        assert!(matches!(
            result,
            Err(ApiError::Unhandled { code: None, status: 404, .. })
        ));
    }

    fn client_with(endpoint: String, policy: ErrorPolicy, backoff_factor: f64) -> ApiClient {
        let options = ClientOptions {
            backoff_factor,
            max_attempts: 3,
            timeout_secs: 2,
            ..ClientOptions::default()
        };
        ApiClient::new(Account::new(endpoint, "test-token"), Arc::new(policy), options).unwrap()
    }

    #[tokio::test]
    async fn test_network_break_aborts() {
        // Reserve a free port and release it so connections are refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/method/", listener.local_addr().unwrap());
        drop(listener);

        let policy = ErrorPolicy::from_toml("[transport]\nnetwork = \"break\"\n").unwrap();
        let (client, sleeps) = recorded_backoffs(client_with(endpoint, policy, 0.005));
        let err = client.resolve_identities(&["durov".to_string()]).await.unwrap_err();

        assert!(err.is_break(), "expected a break, got {:?}", err);
        assert!(matches!(err, ApiError::Transport { .. }));
        assert!(sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_backoff_factor_does_not_sleep() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(api_error(6, "Too many requests per second"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/method/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [[1, [2]]]
            })))
            .mount(&server)
            .await;

        let endpoint = format!("{}/method/", server.uri());
        let policy = ErrorPolicy::builtin().unwrap();
        let (client, sleeps) = recorded_backoffs(client_with(endpoint, policy, -1.0));
        let adjacency = client.fetch_adjacency(&[1]).await.unwrap();

        assert_eq!(adjacency[&1], vec![2]);
        assert_eq!(*sleeps.lock().unwrap(), vec![Duration::ZERO]);
    }

    #[tokio::test]
    async fn test_backoff_delay_is_bounded() {
        let endpoint = "http://127.0.0.1:9/method/".to_string();

        let client = client_with(endpoint.clone(), ErrorPolicy::builtin().unwrap(), 1.0);
        assert_eq!(client.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(client.backoff_delay(u32::MAX), MAX_BACKOFF);

        let client = client_with(endpoint.clone(), ErrorPolicy::builtin().unwrap(), f64::NAN);
        assert_eq!(client.backoff_delay(1), Duration::ZERO);

        let client = client_with(endpoint, ErrorPolicy::builtin().unwrap(), f64::INFINITY);
        assert_eq!(client.backoff_delay(1), MAX_BACKOFF);
    }

    #[test]
    fn test_adjacency_script_embeds_ids() {
        let script = adjacency_script(&[3, 1, 4]);
        assert!(script.starts_with("var ids = [3,1,4];"));
        assert!(script.contains("API.friends.get"));
    }
}
