use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::mcm::ChainedRequest;

/// Physics working groups that are allowed on samples and planning entries.
pub const PWGS: [&str; 22] = [
    "B2G", "BPH", "BTV", "EGM", "EXO", "FSQ", "HCA", "HGC", "HIG", "HIN", "JME", "L1T", "LUM",
    "MUO", "PPD", "PPS", "SMP", "SUS", "TAU", "TOP", "TRK", "TSG",
];

static CAMPAIGN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_*-]{3,30}$").expect("campaign name regex"));

static TAG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,50}$").expect("tag name regex"));

pub fn valid_campaign_name(name: &str) -> bool {
    CAMPAIGN_NAME_RE.is_match(name)
}

pub fn valid_tag_name(name: &str) -> bool {
    TAG_NAME_RE.is_match(name)
}

pub fn valid_pwg(pwg: &str) -> bool {
    PWGS.contains(&pwg)
}

/// Split a comma separated string and keep only non-empty trimmed values.
pub fn clean_split(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplicate and sort a list of strings.
pub fn sorted_dedup<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let set: BTreeSet<String> = items.into_iter().collect();
    set.into_iter().collect()
}

/// Parse a number that may carry a k/M/G suffix, e.g. "15k" or "1.5M".
/// Any other trailing non-digit characters are ignored.
pub fn parse_number(raw: &str) -> Option<i64> {
    let mut multiplier = 1f64;
    let mut value = raw.trim();
    while let Some(last) = value.chars().last() {
        if last.is_ascii_digit() {
            break;
        }
        match last.to_ascii_lowercase() {
            'k' => multiplier *= 1_000.0,
            'm' => multiplier *= 1_000_000.0,
            'g' => multiplier *= 1_000_000_000.0,
            _ => {}
        }
        value = &value[..value.len() - last.len_utf8()];
    }

    let number: f64 = value.parse().ok()?;
    Some((number * multiplier) as i64)
}

/// Short display name of a full dataset name, e.g. "TTTo2L2Nu_..._powheg-pythia8"
/// becomes "TTbar NLO PH+P8".
pub fn get_short_name(name: &str) -> String {
    let first_token = name.split('_').next().unwrap_or(name);
    let mut short_name = if name.contains("GluGluToH") || name.contains("GluGluH") {
        "GluGluToH".to_string()
    } else if name.contains("TTTo") {
        "TTbar".to_string()
    } else if name.contains("GluGluToPseudoScalarH") {
        "GluGluToPseudoScalarH".to_string()
    } else if name.contains("VBFHiggs") {
        "VBFHiggs".to_string()
    } else if name.contains("ZHiggs") {
        "ZHiggs".to_string()
    } else if name.contains("WHiggs") {
        "WHiggs".to_string()
    } else if name.contains("GluGluToMaxmixH") {
        "GluGluToMaxmixH".to_string()
    } else if name.contains("GluGluToContin") {
        "GluGluToContin".to_string()
    } else if name.contains("DiPhotonJets") {
        "DiPhotonJets".to_string()
    } else if name.contains("JJH") {
        "JJHiggs".to_string()
    } else if name.contains("GluGluToBulkGraviton") {
        "GluGluToBulkGraviton".to_string()
    } else if name.contains("BulkGraviton") {
        "BulkGraviton".to_string()
    } else if first_token == "b" {
        "bbbar4l".to_string()
    } else if first_token == "ST" {
        "SingleTop".to_string()
    } else if first_token == "QCD" && name.contains("Flat") && !name.contains("herwig") {
        "Flat QCD P8".to_string()
    } else if first_token == "QCD" && name.contains("Flat") && name.contains("herwig") {
        "Flat QCD H7".to_string()
    } else if first_token == "QCD" && name.contains("_Pt_") {
        "QCD P8".to_string()
    } else {
        first_token.to_string()
    };

    if name.contains("madgraphMLM") {
        short_name.push_str(" LO MG+P8");
    } else if name.contains("FxFx") || name.contains("amcatnlo") {
        short_name.push_str(" NLO MG+P8");
    } else if name.contains("powheg") && name.contains("pythia8") {
        short_name.push_str(" NLO PH+P8");
    } else if name.contains("sherpa") {
        short_name.push_str(" Sherpa");
    } else if name.contains("madgraph") {
        short_name.push_str(" LO MG+P8");
    }

    for diboson in ["WW", "WZ", "ZZ", "ZW"] {
        if short_name.starts_with(diboson) {
            short_name = format!("VV{}", &short_name[2..]);
            break;
        }
    }

    short_name
}

/// Chain tag of a chained request name: whatever follows DIGI (or DR) in the
/// campaign part, "Classical" if there is nothing to extract.
pub fn get_chain_tag(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    let marker = if name.contains("DIGI") {
        Some("DIGI")
    } else if name.contains("DR") {
        Some("DR")
    } else {
        None
    };

    if let Some(marker) = marker {
        if let Some(tag) = tag_after_marker(name, marker) {
            if !tag.is_empty() {
                return tag;
            }
        }
    }

    "Classical".to_string()
}

fn tag_after_marker(name: &str, marker: &str) -> Option<String> {
    let campaign_part = name.split('-').nth(1)?;
    let after = campaign_part.split(marker).nth(1)?;
    Some(after.split('_').next().unwrap_or_default().to_string())
}

/// Version of a MiniAOD or NanoAOD request, e.g. "v2" for a prepid ending in
/// "MiniAODv2". A prepid with an AOD step but no version digit is "v1".
pub fn get_xaod_version(prepid: &str) -> String {
    if prepid.is_empty() {
        return String::new();
    }

    let lowered = prepid.to_lowercase();
    if !lowered.contains("aod") {
        return String::new();
    }

    let after = lowered.rsplit("aod").next().unwrap_or_default();
    let stripped = after.trim_start_matches(|c| matches!(c, 'a' | 'p' | 'v'));
    let digits: String = stripped
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        "v1".to_string()
    } else {
        format!("v{digits}")
    }
}

#[derive(Debug, Default, Clone)]
pub struct ChainSteps {
    pub plhe: Option<String>,
    pub gs: Option<String>,
    pub miniaod: Option<String>,
    pub nanoaod: Option<String>,
    pub dr: Option<String>,
}

/// Split a chained request into its step prepids. A later chain member of the
/// same step overwrites an earlier one.
pub fn chained_request_to_steps(chained_request: &ChainedRequest) -> ChainSteps {
    let mut steps = ChainSteps::default();
    for prepid in &chained_request.chain {
        if prepid.contains("pLHE") {
            steps.plhe = Some(prepid.clone());
        } else if prepid.contains("GS") {
            steps.gs = Some(prepid.clone());
        } else if prepid.contains("MiniAOD") {
            steps.miniaod = Some(prepid.clone());
        } else if prepid.contains("NanoAOD") {
            steps.nanoaod = Some(prepid.clone());
        } else if prepid.contains("DR") {
            steps.dr = Some(prepid.clone());
        }
    }

    steps
}

/// Out of chained requests sharing a root, keep per MiniAOD campaign only the
/// chains of the highest NanoAOD campaign. Chains without both a MiniAOD and
/// a NanoAOD step are always kept.
pub fn pick_chained_requests(chained_requests: Vec<ChainedRequest>) -> Vec<ChainedRequest> {
    let mut selected = Vec::new();
    let mut tree: BTreeMap<String, BTreeMap<String, Vec<ChainedRequest>>> = BTreeMap::new();
    for chained_request in chained_requests {
        let steps = chained_request_to_steps(&chained_request);
        let (mini, nano) = match (steps.miniaod, steps.nanoaod) {
            (Some(mini), Some(nano)) => (mini, nano),
            _ => {
                selected.push(chained_request);
                continue;
            }
        };

        let mini_campaign = mini.split('-').nth(1).unwrap_or_default().to_string();
        let nano_campaign = nano.split('-').nth(1).unwrap_or_default().to_string();
        tree.entry(mini_campaign)
            .or_default()
            .entry(nano_campaign)
            .or_default()
            .push(chained_request);
    }

    for (_, nano_campaigns) in tree {
        if let Some((_, chains)) = nano_campaigns.into_iter().last() {
            selected.extend(chains);
        }
    }

    selected
}

/// Three way set merge: an element added by either side is kept, an element
/// removed by either side is dropped. A removal beats a concurrent addition.
pub fn merge_sets(reference: &[String], set_one: &[String], set_two: &[String]) -> Vec<String> {
    let reference: BTreeSet<&String> = reference.iter().collect();
    let set_one: BTreeSet<&String> = set_one.iter().collect();
    let set_two: BTreeSet<&String> = set_two.iter().collect();
    let one_added: BTreeSet<&String> = set_one.difference(&reference).copied().collect();
    let two_added: BTreeSet<&String> = set_two.difference(&reference).copied().collect();
    let one_removed: BTreeSet<&String> = reference.difference(&set_one).copied().collect();
    let two_removed: BTreeSet<&String> = reference.difference(&set_two).copied().collect();
    let added: BTreeSet<&String> = one_added.union(&two_added).copied().collect();
    let removed: BTreeSet<&String> = one_removed.union(&two_removed).copied().collect();
    reference
        .union(&added)
        .filter(|element| !removed.contains(**element))
        .map(|element| (*element).clone())
        .collect()
}
