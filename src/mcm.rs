use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const PAGE_SIZE: usize = 750;
const PAGE_SIZE_DEBUG: usize = 75;

/// A request in McM. Fields that are read or written are typed, everything
/// else is kept in `extra` so an update sends the full document back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McmRequest {
    #[serde(default)]
    pub prepid: String,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub member_of_campaign: String,
    #[serde(default)]
    pub member_of_chain: Vec<String>,
    #[serde(default)]
    pub flown_with: String,
    #[serde(default)]
    pub pilot: Value,
    #[serde(default)]
    pub process_string: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub total_events: i64,
    #[serde(default)]
    pub completed_events: i64,
    #[serde(default)]
    pub output_dataset: Vec<String>,
    #[serde(default)]
    pub interested_pwg: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub generator_parameters: Vec<GeneratorParameters>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl McmRequest {
    /// Pilot flag is a bool in current McM but a string in old documents.
    pub fn is_pilot(&self) -> bool {
        match &self.pilot {
            Value::Bool(flag) => *flag,
            Value::String(text) => !text.is_empty() && !text.eq_ignore_ascii_case("false"),
            Value::Number(number) => number.as_f64().unwrap_or(0.0) != 0.0,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorParameters {
    #[serde(default)]
    pub cross_section: f64,
    #[serde(default)]
    pub negative_weights_fraction: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainedRequest {
    #[serde(default)]
    pub prepid: String,
    #[serde(default)]
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub request_parameters: FlowParameters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowParameters {
    #[serde(default)]
    pub process_string: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McmCampaign {
    #[serde(default)]
    pub prepid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McmUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope {
    #[serde(default)]
    results: Value,
}

/// Subset of the McM REST API used here. A trait so sync runs can be tested
/// against a canned implementation.
#[async_trait]
pub trait McmApi: Send + Sync {
    async fn get_request(&self, prepid: &str) -> Result<Option<McmRequest>>;
    async fn get_chained_request(&self, prepid: &str) -> Result<Option<ChainedRequest>>;
    async fn get_flow(&self, name: &str) -> Result<Option<Flow>>;
    async fn get_campaign(&self, name: &str) -> Result<Option<McmCampaign>>;
    async fn search_requests(&self, query: &[(&str, &str)]) -> Result<Vec<McmRequest>>;
    async fn search_chained_requests(&self, query: &[(&str, &str)]) -> Result<Vec<ChainedRequest>>;
    async fn get_all_users(&self) -> Result<Vec<McmUser>>;
    async fn update_request(&self, request: &McmRequest) -> Result<bool>;
}

pub struct McmClient {
    http: Client,
    base_url: String,
    cookie: Option<String>,
    page_size: usize,
}

impl McmClient {
    pub fn new(base_url: &str, cookie: Option<String>, debug: bool) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie,
            page_size: if debug { PAGE_SIZE_DEBUG } else { PAGE_SIZE },
        }
    }

    /// GET with up to three attempts and exponential backoff. Client errors
    /// are never retried.
    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.http.get(&url);
            if let Some(cookie) = &self.cookie {
                request = request.header(reqwest::header::COOKIE, cookie);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(%url, "mcm get");
                        return Ok(response.json().await?);
                    }
                    if status.is_client_error() {
                        return Err(anyhow!("GET {url} returned {status}"));
                    }
                    warn!(%url, %status, attempt, "mcm get failed");
                }
                Err(err) => {
                    warn!(%url, error = %err, attempt, "mcm get failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        Err(anyhow!("GET {url} failed after {MAX_ATTEMPTS} attempts"))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.http.post(&url).json(body);
            if let Some(cookie) = &self.cookie {
                request = request.header(reqwest::header::COOKIE, cookie);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    if status.is_client_error() {
                        return Err(anyhow!("POST {url} returned {status}"));
                    }
                    warn!(%url, %status, attempt, "mcm post failed");
                }
                Err(err) => {
                    warn!(%url, error = %err, attempt, "mcm post failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        Err(anyhow!("POST {url} failed after {MAX_ATTEMPTS} attempts"))
    }

    async fn fetch_one<T>(&self, database: &str, object_id: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let envelope: ResultsEnvelope = serde_json::from_value(
            self.get_json(&format!("restapi/{database}/get/{object_id}"))
                .await?,
        )?;
        match envelope.results {
            Value::Null | Value::Bool(false) => Ok(None),
            results => Ok(Some(serde_json::from_value(results)?)),
        }
    }

    /// Paged search over a McM database. Pages are fetched until a short page
    /// marks the end.
    async fn search<T>(&self, database: &str, query: &[(&str, &str)]) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut results = Vec::new();
        let mut page = 0;
        loop {
            let mut path = format!(
                "search/?db_name={database}&limit={}&page={page}",
                self.page_size
            );
            for (key, value) in query {
                path.push_str(&format!("&{key}={value}"));
            }

            let envelope: ResultsEnvelope =
                serde_json::from_value(self.get_json(&path).await?)?;
            let page_results: Vec<T> = match envelope.results {
                Value::Array(_) => serde_json::from_value(envelope.results)?,
                _ => Vec::new(),
            };

            let count = page_results.len();
            results.extend(page_results);
            if count < self.page_size {
                break;
            }

            page += 1;
        }

        Ok(results)
    }
}

#[async_trait]
impl McmApi for McmClient {
    async fn get_request(&self, prepid: &str) -> Result<Option<McmRequest>> {
        self.fetch_one("requests", prepid).await
    }

    async fn get_chained_request(&self, prepid: &str) -> Result<Option<ChainedRequest>> {
        self.fetch_one("chained_requests", prepid).await
    }

    async fn get_flow(&self, name: &str) -> Result<Option<Flow>> {
        self.fetch_one("flows", name).await
    }

    async fn get_campaign(&self, name: &str) -> Result<Option<McmCampaign>> {
        self.fetch_one("campaigns", name).await
    }

    async fn search_requests(&self, query: &[(&str, &str)]) -> Result<Vec<McmRequest>> {
        self.search("requests", query).await
    }

    async fn search_chained_requests(&self, query: &[(&str, &str)]) -> Result<Vec<ChainedRequest>> {
        self.search("chained_requests", query).await
    }

    async fn get_all_users(&self) -> Result<Vec<McmUser>> {
        let envelope: ResultsEnvelope =
            serde_json::from_value(self.get_json("restapi/users/get_all").await?)?;
        match envelope.results {
            Value::Array(_) => Ok(serde_json::from_value(envelope.results)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn update_request(&self, request: &McmRequest) -> Result<bool> {
        let body = serde_json::to_value(request)?;
        let response = self.post_json("restapi/requests/update", &body).await?;
        Ok(response
            .get("results")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}
