use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Insertable)]
#[diesel(table_name = campaigns)]
pub struct NewCampaign {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tags)]
pub struct NewTag {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = samples)]
pub struct Sample {
    pub id: Uuid,
    pub campaign: String,
    pub chained_request: String,
    pub dataset: String,
    pub root: String,
    pub root_priority: i64,
    pub root_total_events: i64,
    pub root_done_events: i64,
    pub root_status: String,
    pub root_output: String,
    pub root_processing_string: String,
    pub miniaod: String,
    pub miniaod_priority: i64,
    pub miniaod_total_events: i64,
    pub miniaod_done_events: i64,
    pub miniaod_status: String,
    pub miniaod_output: String,
    pub miniaod_processing_string: String,
    pub nanoaod: String,
    pub nanoaod_priority: i64,
    pub nanoaod_total_events: i64,
    pub nanoaod_done_events: i64,
    pub nanoaod_status: String,
    pub nanoaod_output: String,
    pub nanoaod_processing_string: String,
    pub tags: Vec<String>,
    pub ref_tags: Vec<String>,
    pub pwgs: Vec<String>,
    pub ref_pwgs: Vec<String>,
    pub notes: String,
    pub updated: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = samples)]
pub struct NewSample {
    pub id: Uuid,
    pub campaign: String,
    pub chained_request: String,
    pub dataset: String,
    pub root: String,
    pub root_priority: i64,
    pub root_total_events: i64,
    pub root_done_events: i64,
    pub root_status: String,
    pub root_output: String,
    pub root_processing_string: String,
    pub miniaod: String,
    pub miniaod_priority: i64,
    pub miniaod_total_events: i64,
    pub miniaod_done_events: i64,
    pub miniaod_status: String,
    pub miniaod_output: String,
    pub miniaod_processing_string: String,
    pub nanoaod: String,
    pub nanoaod_priority: i64,
    pub nanoaod_total_events: i64,
    pub nanoaod_done_events: i64,
    pub nanoaod_status: String,
    pub nanoaod_output: String,
    pub nanoaod_processing_string: String,
    pub tags: Vec<String>,
    pub ref_tags: Vec<String>,
    pub pwgs: Vec<String>,
    pub ref_pwgs: Vec<String>,
    pub updated: i64,
}

/// Columns owned by the McM synchronization. Notes are user input and are
/// never written here.
#[derive(Debug, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = samples)]
pub struct SampleSync {
    pub campaign: String,
    pub dataset: String,
    pub root_priority: i64,
    pub root_total_events: i64,
    pub root_done_events: i64,
    pub root_status: String,
    pub root_output: String,
    pub root_processing_string: String,
    pub miniaod: String,
    pub miniaod_priority: i64,
    pub miniaod_total_events: i64,
    pub miniaod_done_events: i64,
    pub miniaod_status: String,
    pub miniaod_output: String,
    pub miniaod_processing_string: String,
    pub nanoaod: String,
    pub nanoaod_priority: i64,
    pub nanoaod_total_events: i64,
    pub nanoaod_done_events: i64,
    pub nanoaod_status: String,
    pub nanoaod_output: String,
    pub nanoaod_processing_string: String,
    pub tags: Vec<String>,
    pub ref_tags: Vec<String>,
    pub pwgs: Vec<String>,
    pub ref_pwgs: Vec<String>,
    pub updated: i64,
}

impl From<&Sample> for SampleSync {
    fn from(sample: &Sample) -> Self {
        Self {
            campaign: sample.campaign.clone(),
            dataset: sample.dataset.clone(),
            root_priority: sample.root_priority,
            root_total_events: sample.root_total_events,
            root_done_events: sample.root_done_events,
            root_status: sample.root_status.clone(),
            root_output: sample.root_output.clone(),
            root_processing_string: sample.root_processing_string.clone(),
            miniaod: sample.miniaod.clone(),
            miniaod_priority: sample.miniaod_priority,
            miniaod_total_events: sample.miniaod_total_events,
            miniaod_done_events: sample.miniaod_done_events,
            miniaod_status: sample.miniaod_status.clone(),
            miniaod_output: sample.miniaod_output.clone(),
            miniaod_processing_string: sample.miniaod_processing_string.clone(),
            nanoaod: sample.nanoaod.clone(),
            nanoaod_priority: sample.nanoaod_priority,
            nanoaod_total_events: sample.nanoaod_total_events,
            nanoaod_done_events: sample.nanoaod_done_events,
            nanoaod_status: sample.nanoaod_status.clone(),
            nanoaod_output: sample.nanoaod_output.clone(),
            nanoaod_processing_string: sample.nanoaod_processing_string.clone(),
            tags: sample.tags.clone(),
            ref_tags: sample.ref_tags.clone(),
            pwgs: sample.pwgs.clone(),
            ref_pwgs: sample.ref_pwgs.clone(),
            updated: sample.updated,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub fullname: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = action_history)]
pub struct ActionHistoryEntry {
    pub id: Uuid,
    pub username: String,
    pub prepid: String,
    pub action: String,
    pub value: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = action_history)]
pub struct NewActionHistoryEntry {
    pub id: Uuid,
    pub username: String,
    pub prepid: String,
    pub action: String,
    pub value: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = future_campaigns)]
pub struct FutureCampaign {
    pub id: Uuid,
    pub name: String,
    pub reference: String,
    pub prefilled: bool,
    #[serde(skip_serializing)]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = future_campaigns)]
pub struct NewFutureCampaign {
    pub id: Uuid,
    pub name: String,
    pub reference: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = future_campaign_entries)]
#[diesel(belongs_to(FutureCampaign, foreign_key = campaign_id))]
pub struct FutureCampaignEntry {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub short_name: String,
    pub dataset: String,
    pub chain_tag: String,
    pub events: i64,
    pub cross_section: f64,
    pub interested_pwgs: Vec<String>,
    pub ref_interested_pwgs: Vec<String>,
    pub comment: String,
    pub fragment: String,
    pub in_reference: String,
    pub in_target: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = future_campaign_entries)]
pub struct NewFutureCampaignEntry {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub short_name: String,
    pub dataset: String,
    pub chain_tag: String,
    pub events: i64,
    pub cross_section: f64,
    pub interested_pwgs: Vec<String>,
    pub ref_interested_pwgs: Vec<String>,
    pub comment: String,
    pub fragment: String,
    pub in_reference: String,
    pub in_target: String,
}
