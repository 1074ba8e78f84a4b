use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::admin::MAX_ANALYTICS_DAYS;
use super::{AdType, ClientMeta, ConfigPatch, ImpressionReport, ImpressionStatus, PlacementIds, Platform};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/ads")
            .route("/check-should-show-ad", web::post().to(check_should_show_ad))
            .route("/log-impression", web::post().to(log_ad_impression))
            .route("/user-stats", web::get().to(get_user_ad_stats))
            .route("/configure-features", web::get().to(list_feature_ads))
            .route("/configure-features", web::post().to(configure_feature_ads))
            .route("/analytics", web::get().to(get_ad_analytics))
            .route("/initialize-features", web::post().to(initialize_feature_configs)),
    );
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::ValidationError(format!("{} is required", field)))
}

fn parse_field<T>(value: Option<String>, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = super::types::UnknownVariant>,
{
    match value {
        Some(v) => v.parse().map_err(|e: super::types::UnknownVariant| {
            AppError::ValidationError(e.to_string())
        }),
        None => Ok(default),
    }
}

/// First `X-Forwarded-For` hop if present, else the peer address.
fn client_meta(req: &HttpRequest) -> ClientMeta {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    ClientMeta {
        ip_address: forwarded.or_else(|| req.peer_addr().map(|addr| addr.ip().to_string())),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckAdRequest {
    pub feature_name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckAdResponse {
    pub success: bool,
    pub should_show: bool,
    pub reason: String,
    pub reason_code: String,
    pub ad_type: Option<AdType>,
    pub placement_ids: Option<PlacementIds>,
}

pub async fn check_should_show_ad(
    user: AuthenticatedUser,
    req: web::Json<CheckAdRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    let feature_name = required(req.feature_name, "feature_name")?;
    let platform = parse_field(req.platform, Platform::Ios)?;

    let decision = state
        .ad_manager
        .check_should_show_ad(user.user_id, &feature_name, platform)
        .await;

    Ok(HttpResponse::Ok().json(CheckAdResponse {
        success: true,
        should_show: decision.should_show(),
        reason: decision.reason(),
        reason_code: decision.reason_code().to_string(),
        ad_type: decision.ad_type(),
        placement_ids: decision.placement_ids().cloned(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogImpressionRequest {
    pub feature_name: Option<String>,
    pub ad_type: Option<String>,
    pub platform: Option<String>,
    pub status: Option<String>,
}

pub async fn log_ad_impression(
    user: AuthenticatedUser,
    http: HttpRequest,
    req: web::Json<LogImpressionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    let feature = required(req.feature_name, "feature_name")?;
    let ad_type: AdType = required(req.ad_type, "ad_type")?
        .parse()
        .map_err(|e: super::types::UnknownVariant| AppError::ValidationError(e.to_string()))?;
    let platform = parse_field(req.platform, Platform::Ios)?;
    let status = parse_field(req.status, ImpressionStatus::Shown)?;

    let report = ImpressionReport {
        feature,
        ad_type,
        platform,
        status,
        client: client_meta(&http),
    };

    match state.ad_manager.log_ad_impression(user.user_id, report).await {
        Some(entry) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("Ad {} logged successfully", status),
            "log_id": entry.id,
        }))),
        None => Err(AppError::InternalError("Failed to log impression".into())),
    }
}

pub async fn get_user_ad_stats(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let stats = state.ad_manager.user_stats(user.user_id).await.map_err(|e| {
        error!("Error loading ad stats for user {}: {}", user.user_id, e);
        AppError::DatabaseError(e)
    })?;

    let mut body = serde_json::to_value(&stats)
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    body["success"] = serde_json::Value::Bool(true);
    Ok(HttpResponse::Ok().json(body))
}

pub async fn list_feature_ads(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    user.require_staff()?;
    let features = state.ad_manager.list_feature_configs().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "features": features,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConfigureFeatureRequest {
    pub feature_name: Option<String>,
    #[serde(flatten)]
    pub patch: ConfigPatch,
}

pub async fn configure_feature_ads(
    user: AuthenticatedUser,
    req: web::Json<ConfigureFeatureRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    user.require_staff()?;
    let req = req.into_inner();
    let feature_name = required(req.feature_name, "feature_name")?;
    req.patch.validate().map_err(AppError::ValidationError)?;

    let (config, created) = state
        .ad_manager
        .configure_feature(&feature_name, req.patch)
        .await?;
    info!("Feature ad config for {} saved by {}", config.feature_name, user.user_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": if created { "Feature ad config created" } else { "Feature ad config updated" },
        "config": config,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<u32>,
    pub feature: Option<String>,
}

pub async fn get_ad_analytics(
    user: AuthenticatedUser,
    query: web::Query<AnalyticsQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    user.require_staff()?;
    let query = query.into_inner();
    let days = query.days.unwrap_or(7);
    if days > MAX_ANALYTICS_DAYS {
        return Err(AppError::ValidationError(format!(
            "days must be at most {}",
            MAX_ANALYTICS_DAYS
        )));
    }
    let feature = query.feature.filter(|f| !f.is_empty());
    let analytics = state.ad_manager.analytics(days, feature).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "analytics": analytics,
    })))
}

pub async fn initialize_feature_configs(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    user.require_staff()?;
    let created = state.ad_manager.initialize_feature_configs().await?;
    let total = super::admin::default_feature_configs(chrono::Utc::now()).len();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Initialized {} feature configs", created),
        "total_features": total,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_client_meta_prefers_forwarded_for() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "198.51.100.4, 10.0.0.1"))
            .insert_header((header::USER_AGENT, "QuizApp/2.3"))
            .peer_addr("10.0.0.9:5555".parse().unwrap())
            .to_http_request();

        let meta = client_meta(&req);
        assert_eq!(meta.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(meta.user_agent, "QuizApp/2.3");
    }

    #[test]
    fn test_client_meta_falls_back_to_peer() {
        let req = TestRequest::default()
            .peer_addr("10.0.0.9:5555".parse().unwrap())
            .to_http_request();

        let meta = client_meta(&req);
        assert_eq!(meta.ip_address.as_deref(), Some("10.0.0.9"));
        assert_eq!(meta.user_agent, "");
    }

    #[test]
    fn test_required_and_parse_field() {
        assert!(required(Some("  ".into()), "feature_name").is_err());
        assert_eq!(required(Some(" daily_quiz ".into()), "feature_name").unwrap(), "daily_quiz");
        assert_eq!(parse_field::<Platform>(None, Platform::Ios).unwrap(), Platform::Ios);
        assert!(matches!(
            parse_field::<ImpressionStatus>(Some("viewed".into()), ImpressionStatus::Shown),
            Err(AppError::ValidationError(_))
        ));
    }
}
