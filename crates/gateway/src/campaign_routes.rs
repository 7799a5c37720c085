//! Campaign creation and the status-polling endpoints.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use {
    parley_campaigns::{CampaignView, CreateCampaign},
    parley_store::{Campaign, CampaignAnalytics},
    serde_json::{Value, json},
};

use crate::{error::ApiResult, server::AppState};

/// Returns as soon as the campaign is stored; dispatch continues in the
/// background and is observed by polling.
pub async fn create_campaign(
    State(state): State<AppState>,
    payload: Result<Json<CreateCampaign>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let campaign = state.gateway.campaigns.create(request).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "campaign": campaign }))))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignView>> {
    Ok(Json(state.gateway.campaigns.get(&id).await?))
}

pub async fn campaign_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignAnalytics>> {
    Ok(Json(state.gateway.campaigns.analytics(&id).await?))
}

pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.gateway.campaigns.pause(&id).await?))
}

pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.gateway.campaigns.resume(&id).await?))
}
