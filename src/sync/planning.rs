use anyhow::Result;
use diesel::prelude::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mcm::{McmApi, McmRequest};
use crate::models::{FutureCampaign, FutureCampaignEntry, NewFutureCampaignEntry};
use crate::schema::{future_campaign_entries, future_campaigns};
use crate::utils::{
    clean_split, get_chain_tag, get_short_name, merge_sets, pick_chained_requests, sorted_dedup,
};
use crate::xsdb::{lookup_cross_section, XsdbClient};

/// Prefills fresh future campaigns from their reference campaigns in McM and
/// keeps the entries of prefilled ones linked to reference and target
/// requests, reconciling interested PWGs on the way.
pub struct PlanningUpdater<'a> {
    mcm: &'a dyn McmApi,
    xsdb: &'a XsdbClient,
}

impl<'a> PlanningUpdater<'a> {
    pub fn new(mcm: &'a dyn McmApi, xsdb: &'a XsdbClient) -> Self {
        Self { mcm, xsdb }
    }

    pub async fn run(&self, conn: &mut PgConnection) -> Result<()> {
        self.prefill_campaigns(conn).await?;
        self.update_campaigns(conn).await?;
        Ok(())
    }

    /// Fill newly created future campaigns with one entry per reference
    /// request and chain tag. The whole campaign is written in one
    /// transaction together with the prefilled flag, so an interrupted run
    /// starts the campaign over instead of duplicating entries.
    async fn prefill_campaigns(&self, conn: &mut PgConnection) -> Result<()> {
        let campaigns: Vec<FutureCampaign> = future_campaigns::table
            .filter(future_campaigns::prefilled.eq(false))
            .order(future_campaigns::name.asc())
            .load(conn)?;
        for campaign in campaigns {
            let entries = self.build_entries(&campaign).await?;
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                diesel::insert_into(future_campaign_entries::table)
                    .values(&entries)
                    .execute(conn)?;
                diesel::update(future_campaigns::table.find(campaign.id))
                    .set(future_campaigns::prefilled.eq(true))
                    .execute(conn)?;
                Ok(())
            })?;
            info!(
                campaign = campaign.name,
                entries = entries.len(),
                "prefilled campaign"
            );
        }

        Ok(())
    }

    async fn build_entries(
        &self,
        campaign: &FutureCampaign,
    ) -> Result<Vec<NewFutureCampaignEntry>> {
        let references = clean_split(&campaign.reference);
        info!(
            campaign = campaign.name,
            references = references.join(","),
            "prefilling campaign"
        );
        let campaign_exists = self.mcm.get_campaign(&campaign.name).await?.is_some();
        info!(
            campaign = campaign.name,
            exists = campaign_exists,
            "campaign in mcm"
        );

        let mut entries = Vec::new();
        for reference in &references {
            let requests = self
                .mcm
                .search_requests(&[("member_of_campaign", reference)])
                .await?;
            info!(
                reference,
                count = requests.len(),
                "requests in reference campaign"
            );
            for request in requests {
                let dataset = request.dataset_name.clone();
                debug!(prepid = request.prepid, dataset, "processing request");
                let chain_tags = self.chain_tags(&request).await?;
                let cross_section = lookup_cross_section(self.xsdb, self.mcm, &dataset).await;
                for chain_tag in chain_tags {
                    let mut entry = NewFutureCampaignEntry {
                        id: Uuid::new_v4(),
                        campaign_id: campaign.id,
                        short_name: get_short_name(&dataset),
                        dataset: dataset.clone(),
                        chain_tag: chain_tag.clone(),
                        events: request.total_events,
                        cross_section: cross_section.cross_section,
                        interested_pwgs: normalized_pwgs(&request.interested_pwg),
                        ref_interested_pwgs: Vec::new(),
                        comment: String::new(),
                        fragment: String::new(),
                        in_reference: request.prepid.clone(),
                        in_target: String::new(),
                    };
                    if campaign_exists {
                        if let Some(target) = self
                            .request_in_campaign(&campaign.name, &dataset, &chain_tag)
                            .await?
                        {
                            entry.in_target = target.prepid;
                            entry.ref_interested_pwgs = normalized_pwgs(&target.interested_pwg);
                        }
                    }

                    info!(
                        short_name = entry.short_name,
                        dataset = entry.dataset,
                        chain_tag = entry.chain_tag,
                        "inserting entry"
                    );
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }

    /// Relink entries of prefilled campaigns to requests in McM and
    /// reconcile interested PWGs with the target request. Failures are
    /// logged per entry, the pass continues.
    async fn update_campaigns(&self, conn: &mut PgConnection) -> Result<()> {
        let campaigns: Vec<FutureCampaign> = future_campaigns::table
            .filter(future_campaigns::prefilled.eq(true))
            .order(future_campaigns::name.asc())
            .load(conn)?;
        for campaign in campaigns {
            let references = clean_split(&campaign.reference);
            info!(
                campaign = campaign.name,
                references = references.join(","),
                "updating campaign"
            );
            let entries: Vec<FutureCampaignEntry> = future_campaign_entries::table
                .filter(future_campaign_entries::campaign_id.eq(campaign.id))
                .load(conn)?;
            info!(count = entries.len(), "entries to update");
            for entry in &entries {
                if let Err(err) = self.update_entry(conn, &campaign, &references, entry).await {
                    error!(dataset = entry.dataset, error = %err, "failed to update entry");
                }
            }
        }

        Ok(())
    }

    async fn update_entry(
        &self,
        conn: &mut PgConnection,
        campaign: &FutureCampaign,
        references: &[String],
        entry: &FutureCampaignEntry,
    ) -> Result<()> {
        let mut in_reference = entry.in_reference.clone();
        let mut in_target = entry.in_target.clone();
        let mut interested_pwgs = normalized_pwgs(&entry.interested_pwgs);
        let mut ref_interested_pwgs = normalized_pwgs(&entry.ref_interested_pwgs);
        debug!(
            dataset = entry.dataset,
            chain_tag = entry.chain_tag,
            in_reference,
            in_target,
            "updating entry"
        );

        if in_reference.is_empty() {
            for reference in references {
                if let Some(request) = self
                    .request_in_campaign(reference, &entry.dataset, &entry.chain_tag)
                    .await?
                {
                    in_reference = request.prepid;
                    break;
                }
            }
        }

        if in_target.is_empty() {
            if let Some(request) = self
                .request_in_campaign(&campaign.name, &entry.dataset, &entry.chain_tag)
                .await?
            {
                in_target = request.prepid;
            }
        }

        if !in_target.is_empty() {
            match self.mcm.get_request(&in_target).await? {
                Some(mut target) => {
                    let remote = normalized_pwgs(&target.interested_pwg);
                    let merged = merge_sets(&ref_interested_pwgs, &interested_pwgs, &remote);
                    if merged != remote {
                        info!(
                            prepid = in_target,
                            remote = remote.join(","),
                            local = interested_pwgs.join(","),
                            merged = merged.join(","),
                            "updating interested pwgs"
                        );
                        target.interested_pwg = merged.clone();
                        match self.mcm.update_request(&target).await {
                            Ok(true) => {}
                            Ok(false) => warn!(prepid = in_target, "update not successful"),
                            Err(err) => {
                                warn!(prepid = in_target, error = %err, "update failed");
                            }
                        }
                    }
                    // The merged set becomes the new reference copy; a failed
                    // push is retried next run because the remote still
                    // differs from it.
                    interested_pwgs = merged.clone();
                    ref_interested_pwgs = merged;
                }
                None => {
                    warn!(prepid = in_target, "target request not found");
                }
            }
        }

        if in_reference == entry.in_reference
            && in_target == entry.in_target
            && interested_pwgs == entry.interested_pwgs
            && ref_interested_pwgs == entry.ref_interested_pwgs
        {
            return Ok(());
        }

        diesel::update(future_campaign_entries::table.find(entry.id))
            .set((
                future_campaign_entries::in_reference.eq(in_reference),
                future_campaign_entries::in_target.eq(in_target),
                future_campaign_entries::interested_pwgs.eq(interested_pwgs),
                future_campaign_entries::ref_interested_pwgs.eq(ref_interested_pwgs),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Chain tags of the selected chains of a request, a single empty tag
    /// for a request outside any chain.
    async fn chain_tags(&self, request: &McmRequest) -> Result<Vec<String>> {
        if request.member_of_chain.is_empty() {
            return Ok(vec![String::new()]);
        }

        let mut chains = Vec::new();
        for prepid in &request.member_of_chain {
            if let Some(chain) = self.mcm.get_chained_request(prepid).await? {
                chains.push(chain);
            }
        }

        Ok(pick_chained_requests(chains)
            .iter()
            .map(|chain| get_chain_tag(&chain.prepid))
            .collect())
    }

    /// First request of a campaign with the given dataset that is member of
    /// a chain with the given tag.
    async fn request_in_campaign(
        &self,
        campaign: &str,
        dataset: &str,
        chain_tag: &str,
    ) -> Result<Option<McmRequest>> {
        let requests = self
            .mcm
            .search_requests(&[("member_of_campaign", campaign), ("dataset_name", dataset)])
            .await?;
        for request in requests {
            if request
                .member_of_chain
                .iter()
                .any(|chain| get_chain_tag(chain) == chain_tag)
            {
                return Ok(Some(request));
            }
        }

        Ok(None)
    }
}

/// Uppercase, deduplicate and sort a PWG list.
fn normalized_pwgs(pwgs: &[String]) -> Vec<String> {
    sorted_dedup(pwgs.iter().map(|pwg| pwg.trim().to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm::ChainedRequest;
    use crate::sync::testing::{search_key, CannedMcm};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn request(prepid: &str, chains: &[&str]) -> McmRequest {
        McmRequest {
            prepid: prepid.to_string(),
            member_of_chain: strings(chains),
            ..McmRequest::default()
        }
    }

    #[tokio::test]
    async fn request_in_campaign_matches_by_chain_tag() {
        let mut mcm = CannedMcm::default();
        mcm.searches.insert(
            search_key(&[
                ("member_of_campaign", "Run3Summer23"),
                ("dataset_name", "TT_TuneCP5"),
            ]),
            vec![
                request(
                    "B2G-Run3Summer23wmLHEGS-00001",
                    &["B2G-chain_Run3Summer23wmLHEGS_flowRun3Summer23DRPremix_x-00001"],
                ),
                request(
                    "B2G-Run3Summer23wmLHEGS-00002",
                    &["B2G-chain_Run3Summer23wmLHEGS_flowRun3Summer23DIGIFastSim_x-00001"],
                ),
                request(
                    "B2G-Run3Summer23wmLHEGS-00003",
                    &["B2G-chain_Run3Summer23wmLHEGS-00001"],
                ),
            ],
        );
        let xsdb = XsdbClient::new("http://localhost:0");
        let updater = PlanningUpdater::new(&mcm, &xsdb);

        let premix = updater
            .request_in_campaign("Run3Summer23", "TT_TuneCP5", "Premix")
            .await
            .unwrap();
        assert_eq!(premix.unwrap().prepid, "B2G-Run3Summer23wmLHEGS-00001");

        let fastsim = updater
            .request_in_campaign("Run3Summer23", "TT_TuneCP5", "FastSim")
            .await
            .unwrap();
        assert_eq!(fastsim.unwrap().prepid, "B2G-Run3Summer23wmLHEGS-00002");

        let classical = updater
            .request_in_campaign("Run3Summer23", "TT_TuneCP5", "Classical")
            .await
            .unwrap();
        assert_eq!(classical.unwrap().prepid, "B2G-Run3Summer23wmLHEGS-00003");

        let missing = updater
            .request_in_campaign("Run3Summer23", "TT_TuneCP5", "NoSuchTag")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn chainless_requests_never_match_a_tag() {
        let mut mcm = CannedMcm::default();
        mcm.searches.insert(
            search_key(&[
                ("member_of_campaign", "Run3Summer23"),
                ("dataset_name", "TT_TuneCP5"),
            ]),
            vec![request("B2G-Run3Summer23wmLHEGS-00001", &[])],
        );
        let xsdb = XsdbClient::new("http://localhost:0");
        let updater = PlanningUpdater::new(&mcm, &xsdb);

        let hit = updater
            .request_in_campaign("Run3Summer23", "TT_TuneCP5", "")
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn chain_tags_follow_the_picked_chains() {
        let mut mcm = CannedMcm::default();
        // Two nano versions of the same mini campaign, only the highest one
        // contributes a tag.
        mcm.chained_requests.insert(
            "chain-v1".to_string(),
            ChainedRequest {
                prepid: "B2G-chain_Run3DIGI_flowMiniAOD_flowNanoAODv11-00001".to_string(),
                chain: strings(&[
                    "B2G-Run3wmLHEGS-00001",
                    "B2G-Run3MiniAODv4-00001",
                    "B2G-Run3NanoAODv11-00001",
                ]),
            },
        );
        mcm.chained_requests.insert(
            "chain-v2".to_string(),
            ChainedRequest {
                prepid: "B2G-chain_Run3DIGIFastSim_flowMiniAOD_flowNanoAODv12-00001".to_string(),
                chain: strings(&[
                    "B2G-Run3wmLHEGS-00001",
                    "B2G-Run3MiniAODv4-00002",
                    "B2G-Run3NanoAODv12-00001",
                ]),
            },
        );
        let xsdb = XsdbClient::new("http://localhost:0");
        let updater = PlanningUpdater::new(&mcm, &xsdb);

        let tagged = request("B2G-Run3wmLHEGS-00001", &["chain-v1", "chain-v2"]);
        assert_eq!(
            updater.chain_tags(&tagged).await.unwrap(),
            vec!["FastSim".to_string()]
        );

        let chainless = request("B2G-Run3wmLHEGS-00002", &[]);
        assert_eq!(
            updater.chain_tags(&chainless).await.unwrap(),
            vec![String::new()]
        );
    }

    #[test]
    fn pwgs_are_uppercased_and_sorted() {
        assert_eq!(
            normalized_pwgs(&strings(&["exo", "B2G", " exo ", "SUS"])),
            vec!["B2G", "EXO", "SUS"]
        );
        assert!(normalized_pwgs(&[]).is_empty());
    }
}
