use anyhow::Result;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

use crate::mcm::McmApi;

/// Cross section lookup result. `cross_section` is -1.0 when nothing was
/// found anywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossSection {
    pub cross_section: f64,
    pub negative_weights_fraction: f64,
}

impl Default for CrossSection {
    fn default() -> Self {
        Self {
            cross_section: -1.0,
            negative_weights_fraction: 0.0,
        }
    }
}

pub struct XsdbClient {
    http: Client,
    base_url: String,
}

impl XsdbClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Search XSDB by DAS dataset name and return the last matching record.
    async fn search_last(&self, dataset: &str) -> Result<Option<Value>> {
        let url = format!("{}/api/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "DAS": dataset }))
            .send()
            .await?
            .error_for_status()?;
        let mut results: Vec<Value> = response.json().await?;
        Ok(results.pop())
    }
}

fn as_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Look up the cross section of a dataset, first in XSDB, then in the
/// generator parameters of a matching generator-level request in McM.
/// Failures are logged and yield the default value.
pub async fn lookup_cross_section(
    xsdb: &XsdbClient,
    mcm: &dyn McmApi,
    dataset: &str,
) -> CrossSection {
    match xsdb.search_last(dataset).await {
        Ok(Some(record)) => {
            if let (Some(cross_section), Some(negative)) = (
                as_float(record.get("cross_section")),
                as_float(record.get("fraction_negative_weight")),
            ) {
                return CrossSection {
                    cross_section,
                    negative_weights_fraction: negative,
                };
            }
        }
        Ok(None) => {}
        Err(err) => {
            warn!(dataset, error = %err, "xsdb search failed");
        }
    }

    // First campaign pattern with any results wins, even if the requests
    // turn out to carry no generator parameters.
    for campaign in ["*LHE*", "*GEN*", "*GS*", "*FS*"] {
        let query = [("dataset_name", dataset), ("member_of_campaign", campaign)];
        match mcm.search_requests(&query).await {
            Ok(requests) if !requests.is_empty() => {
                if let Some(parameters) = requests
                    .last()
                    .and_then(|request| request.generator_parameters.first())
                {
                    return CrossSection {
                        cross_section: parameters.cross_section,
                        negative_weights_fraction: parameters.negative_weights_fraction,
                    };
                }
                warn!(dataset, campaign, "generator request without generator parameters");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(dataset, campaign, error = %err, "mcm generator request lookup failed");
                break;
            }
        }
    }

    CrossSection::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm::{GeneratorParameters, McmRequest};
    use crate::sync::testing::{search_key, CannedMcm};

    fn generator_request(cross_section: f64, negative: f64) -> McmRequest {
        McmRequest {
            generator_parameters: vec![GeneratorParameters {
                cross_section,
                negative_weights_fraction: negative,
                ..GeneratorParameters::default()
            }],
            ..McmRequest::default()
        }
    }

    #[tokio::test]
    async fn falls_back_to_mcm_generator_parameters() {
        // Unreachable XSDB, no *LHE* results: the *GEN* search answers, with
        // the last matching request winning.
        let xsdb = XsdbClient::new("http://localhost:0");
        let mut mcm = CannedMcm::default();
        mcm.searches.insert(
            search_key(&[
                ("dataset_name", "TT_TuneCP5"),
                ("member_of_campaign", "*GEN*"),
            ]),
            vec![
                generator_request(1.0, 0.1),
                generator_request(6077.22, 0.004),
            ],
        );

        let found = lookup_cross_section(&xsdb, &mcm, "TT_TuneCP5").await;
        assert_eq!(found.cross_section, 6077.22);
        assert_eq!(found.negative_weights_fraction, 0.004);
    }

    #[tokio::test]
    async fn generator_request_without_parameters_stops_the_scan() {
        let xsdb = XsdbClient::new("http://localhost:0");
        let mut mcm = CannedMcm::default();
        mcm.searches.insert(
            search_key(&[
                ("dataset_name", "TT_TuneCP5"),
                ("member_of_campaign", "*LHE*"),
            ]),
            vec![McmRequest::default()],
        );
        mcm.searches.insert(
            search_key(&[
                ("dataset_name", "TT_TuneCP5"),
                ("member_of_campaign", "*GEN*"),
            ]),
            vec![generator_request(6077.22, 0.004)],
        );

        let found = lookup_cross_section(&xsdb, &mcm, "TT_TuneCP5").await;
        assert_eq!(found, CrossSection::default());
    }

    #[tokio::test]
    async fn missing_everywhere_yields_the_unknown_marker() {
        let xsdb = XsdbClient::new("http://localhost:0");
        let mcm = CannedMcm::default();

        let found = lookup_cross_section(&xsdb, &mcm, "TT_TuneCP5").await;
        assert_eq!(found.cross_section, -1.0);
        assert_eq!(found.negative_weights_fraction, 0.0);
    }
}
