use std::collections::{HashMap, HashSet};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mcm::{ChainedRequest, McmApi, McmRequest};
use crate::models::{NewSample, Sample, SampleSync};
use crate::schema::{campaigns, samples, tags};
use crate::utils::{chained_request_to_steps, merge_sets, sorted_dedup};

const SAVE_DELAY: Duration = Duration::from_millis(10);

/// Values of one processing step of a chain, with defaults for steps the
/// chain does not have or McM no longer knows.
#[derive(Debug, Clone, Default)]
struct StepValues {
    priority: i64,
    total_events: i64,
    done_events: i64,
    status: String,
    output: String,
    processing_string: String,
}

/// Walks all requests in tracked campaigns and with tracked tags, splits
/// their chained requests into steps and mirrors them into the samples
/// table. Interested PWGs and tags are reconciled with McM on the way.
pub struct SampleUpdater<'a> {
    mcm: &'a dyn McmApi,
    update_timestamp: i64,
    updated_prepids: HashSet<String>,
    steps: HashMap<String, StepValues>,
    flows: HashMap<String, String>,
}

impl<'a> SampleUpdater<'a> {
    pub fn new(mcm: &'a dyn McmApi) -> Self {
        Self {
            mcm,
            update_timestamp: Utc::now().timestamp(),
            updated_prepids: HashSet::new(),
            steps: HashMap::new(),
            flows: HashMap::new(),
        }
    }

    pub async fn run(&mut self, conn: &mut PgConnection) -> Result<()> {
        let campaign_names: Vec<String> = campaigns::table
            .select(campaigns::name)
            .order(campaigns::name.asc())
            .load(conn)?;
        debug!(count = campaign_names.len(), "campaigns to update");
        self.update_requests(conn, "member_of_campaign", &campaign_names)
            .await?;

        let tag_names: Vec<String> = tags::table
            .select(tags::name)
            .order(tags::name.asc())
            .load(conn)?;
        debug!(count = tag_names.len(), "tags to update");
        self.update_requests(conn, "tags", &tag_names).await?;

        self.cleanup(conn)?;
        Ok(())
    }

    /// One pass over all requests matching `attribute` in any of `values`.
    /// Failures are logged per request, the pass continues.
    async fn update_requests(
        &mut self,
        conn: &mut PgConnection,
        attribute: &str,
        values: &[String],
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        self.steps.clear();
        self.flows.clear();
        self.updated_prepids.clear();
        let query = values.join(",");
        info!(attribute, query, "updating requests");
        let requests = self.mcm.search_requests(&[(attribute, &query)]).await?;
        info!(count = requests.len(), attribute, "fetched requests");
        for (index, mut request) in requests.into_iter().enumerate() {
            let prepid = request.prepid.clone();
            if self.updated_prepids.contains(&prepid) {
                info!(prepid, "already updated");
                continue;
            }

            let start = Instant::now();
            if let Err(err) = self.process_request(conn, &mut request).await {
                error!(prepid, error = %err, "failed to process request");
                continue;
            }
            info!(
                index = index + 1,
                prepid,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "processed request"
            );
        }

        Ok(())
    }

    /// Expand a root request into one sample row per chained request.
    async fn process_request(
        &mut self,
        conn: &mut PgConnection,
        request: &mut McmRequest,
    ) -> Result<()> {
        let prepid = request.prepid.clone();
        if request.dataset_name.is_empty() {
            warn!(prepid, "no dataset name");
            return Ok(());
        }
        if request.is_pilot() || request.process_string.eq_ignore_ascii_case("pilot") {
            info!(prepid, "skipping pilot");
            return Ok(());
        }
        if !request.flown_with.is_empty() {
            debug!(prepid, "not a root request");
            return Ok(());
        }

        let mut chains: Vec<ChainedRequest> = if request.member_of_chain.is_empty() {
            // A request outside any chain still makes one sample row.
            vec![ChainedRequest {
                prepid: String::new(),
                chain: vec![prepid.clone()],
            }]
        } else {
            let mut chains = Vec::new();
            for chain_prepid in &request.member_of_chain {
                if let Some(chain) = self.mcm.get_chained_request(chain_prepid).await? {
                    chains.push(chain);
                }
            }
            chains
        };
        chains.retain(|chain| chain.chain.first() == Some(&prepid));
        if chains.is_empty() {
            return Ok(());
        }

        let existing: Vec<Sample> = samples::table
            .filter(samples::root.eq(&prepid))
            .load(conn)?;
        let root_processing_string = self.processing_string(request).await?;
        let root_output = request.output_dataset.last().cloned().unwrap_or_default();
        let mut request_tags = sorted_dedup(request.tags.clone());
        let mut request_pwgs = sorted_dedup(request.interested_pwg.clone());
        let mut synced = false;

        for chain in &chains {
            debug!(chained_request = chain.prepid, "processing chain");
            let steps = chained_request_to_steps(chain);
            let miniaod_prepid = steps.miniaod.unwrap_or_default();
            let nanoaod_prepid = steps.nanoaod.unwrap_or_default();
            let miniaod = self.step_values(&miniaod_prepid).await?;
            let nanoaod = self.step_values(&nanoaod_prepid).await?;
            let existing_sample = existing
                .iter()
                .find(|sample| sample.chained_request == chain.prepid);
            if let Some(sample) = existing_sample {
                if !synced {
                    synced = self.sync_with_mcm(sample, request).await;
                    request_tags = sorted_dedup(request.tags.clone());
                    request_pwgs = sorted_dedup(request.interested_pwg.clone());
                }
            }

            let candidate = SampleSync {
                campaign: request.member_of_campaign.clone(),
                dataset: request.dataset_name.clone(),
                root_priority: request.priority,
                root_total_events: request.total_events,
                root_done_events: request.completed_events,
                root_status: request.status.clone(),
                root_output: root_output.clone(),
                root_processing_string: root_processing_string.clone(),
                miniaod: miniaod_prepid.clone(),
                miniaod_priority: miniaod.priority,
                miniaod_total_events: miniaod.total_events,
                miniaod_done_events: miniaod.done_events,
                miniaod_status: miniaod.status.clone(),
                miniaod_output: miniaod.output.clone(),
                miniaod_processing_string: miniaod.processing_string.clone(),
                nanoaod: nanoaod_prepid.clone(),
                nanoaod_priority: nanoaod.priority,
                nanoaod_total_events: nanoaod.total_events,
                nanoaod_done_events: nanoaod.done_events,
                nanoaod_status: nanoaod.status.clone(),
                nanoaod_output: nanoaod.output.clone(),
                nanoaod_processing_string: nanoaod.processing_string.clone(),
                tags: request_tags.clone(),
                ref_tags: request_tags.clone(),
                pwgs: request_pwgs.clone(),
                ref_pwgs: request_pwgs.clone(),
                updated: self.update_timestamp,
            };

            match existing_sample {
                Some(sample) => {
                    if SampleSync::from(sample) == candidate {
                        // Nothing changed since the row was last written,
                        // commonly the tag pass revisiting the campaign pass.
                        continue;
                    }
                    diesel::update(samples::table.find(sample.id))
                        .set(&candidate)
                        .execute(conn)?;
                }
                None => {
                    diesel::insert_into(samples::table)
                        .values(new_sample(&candidate, &chain.prepid, &prepid))
                        .execute(conn)?;
                }
            }

            for step_prepid in [&prepid, &miniaod_prepid, &nanoaod_prepid] {
                if !step_prepid.is_empty() {
                    self.updated_prepids.insert(step_prepid.clone());
                }
            }
            sleep(SAVE_DELAY).await;
        }

        Ok(())
    }

    /// Reconcile tags and interested PWGs of one root request between the
    /// local sample and McM. Returns whether McM is in sync afterwards; a
    /// failed push leaves the merged values on `request` so the local row
    /// still gets them.
    async fn sync_with_mcm(&self, sample: &Sample, request: &mut McmRequest) -> bool {
        let reference_tags = sorted_dedup(sample.ref_tags.clone());
        let local_tags = sorted_dedup(sample.tags.clone());
        let remote_tags = sorted_dedup(request.tags.clone());
        let reference_pwgs = sorted_dedup(sample.ref_pwgs.clone());
        let local_pwgs = sorted_dedup(sample.pwgs.clone());
        let remote_pwgs = sorted_dedup(request.interested_pwg.clone());

        if local_tags == reference_tags
            && remote_tags == reference_tags
            && local_pwgs == reference_pwgs
            && remote_pwgs == reference_pwgs
        {
            debug!(prepid = request.prepid, "no changes");
            return true;
        }

        let new_tags = merge_sets(&sample.ref_tags, &sample.tags, &request.tags);
        let new_pwgs = merge_sets(&sample.ref_pwgs, &sample.pwgs, &request.interested_pwg);
        let mut push = false;
        if new_tags != remote_tags {
            info!(
                prepid = request.prepid,
                remote = remote_tags.join(","),
                local = local_tags.join(","),
                merged = new_tags.join(","),
                "updating tags"
            );
            request.tags = new_tags;
            push = true;
        }
        if new_pwgs != remote_pwgs {
            info!(
                prepid = request.prepid,
                remote = remote_pwgs.join(","),
                local = local_pwgs.join(","),
                merged = new_pwgs.join(","),
                "updating interested pwgs"
            );
            request.interested_pwg = new_pwgs;
            push = true;
        }
        if !push {
            return true;
        }

        match self.mcm.update_request(request).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(prepid = request.prepid, "update not successful");
                false
            }
            Err(err) => {
                warn!(prepid = request.prepid, error = %err, "update failed");
                false
            }
        }
    }

    /// Step values for a prepid, from the cache or McM. Missing requests
    /// fall back to defaults so a dangling chain still produces a row.
    async fn step_values(&mut self, prepid: &str) -> Result<StepValues> {
        if let Some(values) = self.steps.get(prepid) {
            return Ok(values.clone());
        }

        let values = if prepid.is_empty() {
            StepValues::default()
        } else {
            match self.mcm.get_request(prepid).await? {
                Some(request) => {
                    let processing_string = self.processing_string(&request).await?;
                    StepValues {
                        priority: request.priority,
                        total_events: request.total_events.max(0),
                        done_events: request.completed_events.max(0),
                        status: request.status,
                        output: request.output_dataset.last().cloned().unwrap_or_default(),
                        processing_string,
                    }
                }
                None => {
                    error!(prepid, "could not find request in mcm");
                    StepValues::default()
                }
            }
        };

        self.steps.insert(prepid.to_string(), values.clone());
        Ok(values)
    }

    /// Processing string of a request, prefixed with the one of the flow it
    /// was flown with.
    async fn processing_string(&mut self, request: &McmRequest) -> Result<String> {
        let mut parts = Vec::new();
        if !request.flown_with.is_empty() {
            let flow_string = match self.flows.get(&request.flown_with) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self
                        .mcm
                        .get_flow(&request.flown_with)
                        .await?
                        .map(|flow| flow.request_parameters.process_string)
                        .unwrap_or_default();
                    self.flows
                        .insert(request.flown_with.clone(), fetched.clone());
                    fetched
                }
            };
            parts.push(flow_string);
        }

        parts.push(request.process_string.clone());
        Ok(parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_"))
    }

    /// Drop any sample that was not written during this run. Samples of
    /// removed campaigns and tags disappear here.
    fn cleanup(&self, conn: &mut PgConnection) -> Result<()> {
        info!("cleaning up");
        let deleted =
            diesel::delete(samples::table.filter(samples::updated.lt(self.update_timestamp)))
                .execute(conn)?;
        info!(deleted, "removed stale samples");
        Ok(())
    }
}

fn new_sample(candidate: &SampleSync, chained_request: &str, root: &str) -> NewSample {
    NewSample {
        id: Uuid::new_v4(),
        campaign: candidate.campaign.clone(),
        chained_request: chained_request.to_string(),
        dataset: candidate.dataset.clone(),
        root: root.to_string(),
        root_priority: candidate.root_priority,
        root_total_events: candidate.root_total_events,
        root_done_events: candidate.root_done_events,
        root_status: candidate.root_status.clone(),
        root_output: candidate.root_output.clone(),
        root_processing_string: candidate.root_processing_string.clone(),
        miniaod: candidate.miniaod.clone(),
        miniaod_priority: candidate.miniaod_priority,
        miniaod_total_events: candidate.miniaod_total_events,
        miniaod_done_events: candidate.miniaod_done_events,
        miniaod_status: candidate.miniaod_status.clone(),
        miniaod_output: candidate.miniaod_output.clone(),
        miniaod_processing_string: candidate.miniaod_processing_string.clone(),
        nanoaod: candidate.nanoaod.clone(),
        nanoaod_priority: candidate.nanoaod_priority,
        nanoaod_total_events: candidate.nanoaod_total_events,
        nanoaod_done_events: candidate.nanoaod_done_events,
        nanoaod_status: candidate.nanoaod_status.clone(),
        nanoaod_output: candidate.nanoaod_output.clone(),
        nanoaod_processing_string: candidate.nanoaod_processing_string.clone(),
        tags: candidate.tags.clone(),
        ref_tags: candidate.ref_tags.clone(),
        pwgs: candidate.pwgs.clone(),
        ref_pwgs: candidate.ref_pwgs.clone(),
        updated: candidate.updated,
    }
}
