mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, envelope_response, new_sample, TestApp};
use serde_json::{json, Value};

async fn seed_fixture(app: &TestApp) -> Result<()> {
    let mut tt = new_sample(
        "Run3Summer23wmLHEGS",
        "TTTo2L2Nu_TuneCP5_13p6TeV_powheg-pythia8",
        "B2G-Run3Summer23wmLHEGS-00001",
    );
    tt.chained_request = "B2G-chain_Run3Summer23wmLHEGS_flowRun3Summer23DRPremix-00001".to_string();
    tt.miniaod = "B2G-Run3Summer23MiniAODv4-00001".to_string();
    tt.nanoaod = "B2G-Run3Summer23NanoAODv12-00001".to_string();
    tt.tags = vec!["NanoAODv12".to_string(), "Orphan".to_string()];
    tt.pwgs = vec!["B2G".to_string()];

    let mut dy = new_sample(
        "Run3Summer23wmLHEGS",
        "DYJetsToLL_M-50_TuneCP5_13p6TeV_madgraphMLM-pythia8",
        "SMP-Run3Summer23wmLHEGS-00002",
    );
    dy.pwgs = vec!["SMP".to_string()];

    let wz = new_sample(
        "Run3Summer22EEwmLHEGS",
        "WZ_TuneCP5_13p6TeV_pythia8",
        "SMP-Run3Summer22EEwmLHEGS-00001",
    );

    app.insert_samples(vec![tt, dy, wz]).await
}

#[tokio::test]
async fn sample_queries_filter_and_enrich() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.user_token("viewer", "Sample Viewer", "user").await?;

    // Only this one of the sample tags exists in the tags table.
    let created = app
        .put_json("/api/tags/create", &json!({ "name": "NanoAODv12" }), Some(&token))
        .await?;
    assert_eq!(created.status(), StatusCode::OK);
    seed_fixture(&app).await?;

    let by_campaign = app
        .get("/api/samples/get?campaign=Run3Summer23wmLHEGS", Some(&token))
        .await?;
    assert_eq!(by_campaign.status(), StatusCode::OK);
    let rows = envelope_response(by_campaign.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 2);

    // Ordered by short name, so DY comes before TTbar.
    assert_eq!(rows[0]["short_name"], "DYJetsToLL LO MG+P8");
    assert_eq!(rows[0]["chain_tag"], "");
    assert_eq!(rows[0]["miniaod_version"], "");
    assert_eq!(rows[0]["tags"], json!([]));

    assert_eq!(rows[1]["short_name"], "TTbar NLO PH+P8");
    assert_eq!(rows[1]["chain_tag"], "Premix");
    assert_eq!(rows[1]["miniaod_version"], "v4");
    assert_eq!(rows[1]["nanoaod_version"], "v12");
    assert_eq!(rows[1]["tags"], json!(["NanoAODv12"]));

    let by_tag = app
        .get("/api/samples/get?tags=NanoAODv12", Some(&token))
        .await?;
    let rows = envelope_response(by_tag.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["dataset"], "TTTo2L2Nu_TuneCP5_13p6TeV_powheg-pythia8");

    let by_pwg = app.get("/api/samples/get?pwgs=SMP", Some(&token)).await?;
    let rows = envelope_response(by_pwg.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["root"], "SMP-Run3Summer23wmLHEGS-00002");

    let by_dataset = app
        .get("/api/samples/get?dataset=*2l2nu*", Some(&token))
        .await?;
    let rows = envelope_response(by_dataset.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["short_name"], "TTbar NLO PH+P8");

    // Diboson datasets collapse into a VV short name.
    let other_campaign = app
        .get("/api/samples/get?campaign=Run3Summer22EEwmLHEGS", Some(&token))
        .await?;
    let rows = envelope_response(other_campaign.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["short_name"], "VV");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sample_queries_need_at_least_one_filter() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.user_token("viewer", "Sample Viewer", "user").await?;
    seed_fixture(&app).await?;

    let unfiltered = app.get("/api/samples/get", Some(&token)).await?;
    assert_eq!(unfiltered.status(), StatusCode::OK);
    let body = body_to_vec(unfiltered.into_body()).await?;
    let parsed: Value = serde_json::from_slice(&body)?;
    assert_eq!(parsed["success"], json!(false));
    assert_eq!(parsed["message"], "No campaign or tag specified");
    assert_eq!(parsed["response"], json!([]));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn dataset_lists_can_be_uploaded_as_files() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.user_token("viewer", "Sample Viewer", "user").await?;
    seed_fixture(&app).await?;

    let listed = app
        .upload_file(
            "/api/samples/get",
            "file",
            "datasets.txt",
            b"TTTo2L2Nu_TuneCP5_13p6TeV_powheg-pythia8\nNoSuchDataset\n",
            &token,
        )
        .await?;
    assert_eq!(listed.status(), StatusCode::OK);
    let rows = envelope_response(listed.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["dataset"], "TTTo2L2Nu_TuneCP5_13p6TeV_powheg-pythia8");

    let wrong_field = app
        .upload_file("/api/samples/get", "upload", "datasets.txt", b"whatever", &token)
        .await?;
    assert_eq!(wrong_field.status(), StatusCode::OK);
    let body = body_to_vec(wrong_field.into_body()).await?;
    let parsed: Value = serde_json::from_slice(&body)?;
    assert_eq!(parsed["success"], json!(false));
    assert_eq!(parsed["message"], "No file");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sample_updates_fan_out_to_the_whole_chain() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.user_token("editor", "Sample Editor", "user").await?;

    let created = app
        .put_json("/api/tags/create", &json!({ "name": "Tracking" }), Some(&token))
        .await?;
    assert_eq!(created.status(), StatusCode::OK);

    let mut chain_a = new_sample("ChainCampaign", "ChainDataset", "B2G-ChainCampaign-00001");
    chain_a.chained_request = "B2G-chain_A-00001".to_string();
    let mut chain_b = new_sample("ChainCampaign", "ChainDataset", "B2G-ChainCampaign-00001");
    chain_b.chained_request = "B2G-chain_A_flowMini-00001".to_string();
    let other = new_sample("ChainCampaign", "OtherDataset", "B2G-ChainCampaign-00002");
    app.insert_samples(vec![chain_a, chain_b, other]).await?;

    // Both samples of the chain pick up the tag.
    let add_tag = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00001",
                "action": "add_tag",
                "value": "Tracking"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(add_tag.status(), StatusCode::OK);
    let rows = envelope_response(add_tag.into_body()).await?;
    let rows = rows.as_array().expect("updated rows are an array");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["tags"], json!(["Tracking"]));
        assert_eq!(row["pwgs"], json!([]));
        assert_eq!(row["notes"], "");
    }

    let history = app.get("/api/system/history", Some(&token)).await?;
    let entries = envelope_response(history.into_body()).await?;
    let entries = entries.as_array().expect("history is an array");
    assert_eq!(entries[0]["action"], "add tag");
    assert_eq!(entries[0]["prepid"], "B2G-ChainCampaign-00001");
    assert_eq!(entries[0]["value"], "Tracking");

    // A tag that is not in the tags table is ignored.
    let unknown_tag = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00001",
                "action": "add_tag",
                "value": "Ghost"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(unknown_tag.into_body()).await?;
    assert_eq!(rows, json!([]));

    // PWGs are uppercased on the way in, invalid ones are skipped.
    let add_pwg = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00002",
                "action": "add_pwg",
                "value": "exo"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(add_pwg.into_body()).await?;
    let rows = rows.as_array().expect("updated rows are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["pwgs"], json!(["EXO"]));

    let invalid_pwg = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00002",
                "action": "add_pwg",
                "value": "XYZ"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(invalid_pwg.into_body()).await?;
    assert_eq!(rows, json!([]));

    let set_notes = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00002",
                "action": "set_notes",
                "value": "Needs extension"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(set_notes.into_body()).await?;
    let rows = rows.as_array().expect("updated rows are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["notes"], "Needs extension");

    // Setting the same notes again changes nothing.
    let same_notes = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00002",
                "action": "set_notes",
                "value": "Needs extension"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(same_notes.into_body()).await?;
    assert_eq!(rows, json!([]));

    let remove_tag = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00001",
                "action": "remove_tag",
                "value": "Tracking"
            }),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(remove_tag.into_body()).await?;
    let rows = rows.as_array().expect("updated rows are an array");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["tags"], json!([]));
    }

    // A batch touches every listed chain in one request.
    let batch = app
        .post_json(
            "/api/samples/update",
            &json!([
                { "prepid": "B2G-ChainCampaign-00001", "action": "add_pwg", "value": "smp" },
                { "prepid": "B2G-ChainCampaign-00002", "action": "add_pwg", "value": "top" }
            ]),
            Some(&token),
        )
        .await?;
    let rows = envelope_response(batch.into_body()).await?;
    let rows = rows.as_array().expect("updated rows are an array");
    assert_eq!(rows.len(), 3);

    let final_state = app
        .get("/api/samples/get?campaign=ChainCampaign&pwgs=EXO", Some(&token))
        .await?;
    let rows = envelope_response(final_state.into_body()).await?;
    let rows = rows.as_array().expect("samples are an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["pwgs"], json!(["EXO", "TOP"]));
    assert_eq!(rows[0]["notes"], "Needs extension");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sample_updates_require_a_known_user() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.anonymous_token("stranger")?;

    let refused = app
        .post_json(
            "/api/samples/update",
            &json!({
                "prepid": "B2G-ChainCampaign-00001",
                "action": "add_tag",
                "value": "Tracking"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}
