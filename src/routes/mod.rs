use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth, state::AppState};

pub mod campaigns;
pub mod health;
pub mod oauth;
pub mod planning;
pub mod samples;
pub mod search;
pub mod system;
pub mod tags;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let system_routes = Router::new()
        .route("/user_info", get(system::user_info))
        .route("/history", get(system::all_history))
        .route("/history/:username", get(system::user_history));

    let campaigns_routes = Router::new()
        .route("/create", put(campaigns::create_campaign))
        .route("/get_all", get(campaigns::get_campaigns))
        .route("/delete/:name", delete(campaigns::delete_campaign));

    let tags_routes = Router::new()
        .route("/create", put(tags::create_tag))
        .route("/get_all", get(tags::get_tags))
        .route("/delete/:tag", delete(tags::delete_tag));

    let samples_routes = Router::new()
        .route(
            "/get",
            get(samples::get_samples).post(samples::get_samples_from_file),
        )
        .route("/update", post(samples::update_samples));

    let planning_routes = Router::new()
        .route("/create", put(planning::create_future_campaign))
        .route("/get_all", get(planning::get_future_campaigns))
        .route("/get/:name", get(planning::get_future_campaign))
        .route("/get/:name/:pwg", get(planning::get_future_campaign_for_pwg))
        .route("/update", post(planning::update_future_campaign))
        .route("/delete", delete(planning::delete_future_campaign))
        .route("/add_entry", post(planning::add_entry))
        .route("/update_entry", post(planning::update_entry))
        .route("/delete_entry", delete(planning::delete_entry));

    let oauth_routes = Router::new()
        .route("/auth", get(oauth::login))
        .route("/callback", get(oauth::callback))
        .route("/logout", get(oauth::logout));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/system", system_routes)
        .nest("/api/campaigns", campaigns_routes)
        .nest("/api/tags", tags_routes)
        .nest("/api/samples", samples_routes)
        .nest("/api/planning", planning_routes)
        .route("/api/search", get(search::search))
        .layer(middleware::from_fn_with_state(
            protected_state,
            auth::authenticate,
        ));

    Router::new()
        .merge(protected_routes)
        .nest("/api/oauth2", oauth_routes)
        .route("/api/public/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 16))
}
