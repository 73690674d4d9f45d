use crate::boleto_store::{BoletoFilters, BoletoStore};
use crate::config::Config;
use crate::errors::AppError;
use crate::links::{validar_competencia, LinkService};
use crate::models::*;
use crate::sga_client::{SgaClient, SgaError};
use crate::sync::SyncService;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// In-flight synchronization guard, keyed by cliente id.
    pub sync_in_flight: Cache<Uuid, i64>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "boleto-sync-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/boletos/sincronizar
///
/// Triggers a synchronization for one cliente and date range. Missing dates
/// default to the current month; both must be real `DD/MM/YYYY` dates.
pub async fn sincronizar_boletos(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SincronizarRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (padrao_inicial, padrao_final) = periodo_mes_atual();
    let data_inicial = req.data_vencimento_inicial.unwrap_or(padrao_inicial);
    let data_final = req.data_vencimento_final.unwrap_or(padrao_final);

    if !validar_formato_data(&data_inicial) {
        return Err(AppError::BadRequest(
            "data_vencimento_inicial must be a valid DD/MM/YYYY date".to_string(),
        ));
    }
    if !validar_formato_data(&data_final) {
        return Err(AppError::BadRequest(
            "data_vencimento_final must be a valid DD/MM/YYYY date".to_string(),
        ));
    }

    let codigo_situacao = req.codigo_situacao_boleto.unwrap_or_else(|| "2".to_string());

    let sync = SyncService::new(
        state.db.clone(),
        state.config.clone(),
        state.sync_in_flight.clone(),
    );
    let estatisticas = sync
        .sincronizar(req.cliente_id, &data_inicial, &data_final, &codigo_situacao)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Sincronização concluída",
        "periodo": {
            "data_inicial": data_inicial,
            "data_final": data_final,
        },
        "estatisticas": estatisticas,
    })))
}

/// GET /api/boletos
///
/// Lists reconciled boletos for a cliente with optional filters.
pub async fn listar_boletos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListBoletosQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cliente_id = params
        .cliente_id
        .ok_or_else(|| AppError::BadRequest("cliente_id parameter is required".to_string()))?;

    let data_inicial = parse_optional_date(params.data_vencimento_inicial.as_deref(), "data_vencimento_inicial")?;
    let data_final = parse_optional_date(params.data_vencimento_final.as_deref(), "data_vencimento_final")?;

    let store = BoletoStore::new(state.db.clone());
    let page = store
        .list_boletos(&BoletoFilters {
            cliente_id,
            consultor_id: params.consultor_id,
            situacao_boleto: params.situacao_boleto,
            data_vencimento_inicial: data_inicial,
            data_vencimento_final: data_final,
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(50),
        })
        .await?;

    let mut body = serde_json::to_value(page)
        .map_err(|e| AppError::InternalError(format!("failed to serialize listing: {}", e)))?;
    body["success"] = json!(true);
    Ok(Json(body))
}

/// GET /api/boletos/:id
pub async fn buscar_boleto(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = BoletoStore::new(state.db.clone());
    let boleto = store
        .get_boleto(id)
        .await?
        .ok_or_else(|| AppError::NotFound("boleto not found".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": boleto,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EscopoQuery {
    pub cliente_id: Option<Uuid>,
    pub consultor_id: Option<Uuid>,
}

/// GET /api/boletos/detalhe/:nosso_numero
///
/// Proxies the SGA single-record detail and persists the lazily populated
/// payment fields (PIX payload and PDF link) on the stored boleto.
pub async fn detalhe_boleto(
    State(state): State<Arc<AppState>>,
    Path(nosso_numero): Path<String>,
    Query(params): Query<EscopoQuery>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let cliente_id = params
        .cliente_id
        .ok_or_else(|| AppError::BadRequest("cliente_id parameter is required".to_string()))?;

    let cliente = sqlx::query_as::<_, Cliente>(
        "SELECT id, nome, token_bearer, url_base_api, ativo, logo_url FROM clientes WHERE id = $1 AND ativo = true",
    )
    .bind(cliente_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("cliente not found".to_string()))?;

    let store = BoletoStore::new(state.db.clone());
    if !store
        .boleto_exists(cliente_id, &nosso_numero, params.consultor_id)
        .await?
    {
        return Err(AppError::NotFound(
            "boleto not found for this cliente".to_string(),
        ));
    }

    let sga = SgaClient::new(
        cliente.url_base_api,
        cliente.token_bearer,
        Duration::from_secs(state.config.sga_timeout_secs),
    )?;
    let resposta = sga.buscar_boleto_por_nosso_numero(&nosso_numero).await?;

    let Some(item) = resposta.first() else {
        return Err(AppError::NotFound("boleto not found in SGA".to_string()));
    };

    let pix_copia_cola = item
        .get("pix")
        .and_then(|p| p.get("copia_cola"))
        .and_then(|v| v.as_str());
    let link_boleto = item
        .get("link_boleto")
        .and_then(|v| v.as_str())
        .or_else(|| item.get("short_link").and_then(|v| v.as_str()));

    store
        .update_payment_fields(cliente_id, &nosso_numero, pix_copia_cola, link_boleto)
        .await?;

    Ok(Json(resposta))
}

/// GET /api/boletos/pdf/:nosso_numero
///
/// Streams the externally hosted boleto PDF back verbatim with an attachment
/// header. Pure pass-through; the bytes are not inspected.
pub async fn pdf_boleto(
    State(state): State<Arc<AppState>>,
    Path(nosso_numero): Path<String>,
    Query(params): Query<EscopoQuery>,
) -> Result<impl IntoResponse, AppError> {
    let cliente_id = params
        .cliente_id
        .ok_or_else(|| AppError::BadRequest("cliente_id parameter is required".to_string()))?;

    let store = BoletoStore::new(state.db.clone());
    let pdf_url = store
        .link_boleto(cliente_id, &nosso_numero, params.consultor_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound("boleto or PDF link not found".to_string())
        })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| AppError::InternalError(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .get(&pdf_url)
        .send()
        .await
        .map_err(|e| AppError::Upstream(SgaError::Connection(e.to_string())))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(AppError::Upstream(SgaError::Unexpected(format!(
            "PDF host answered HTTP {}",
            response.status()
        ))));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/pdf")
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(SgaError::Connection(e.to_string())))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"boleto-{}.pdf\"", nosso_numero),
            ),
        ],
        bytes,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ResumoQuery {
    pub cliente_id: Option<Uuid>,
}

/// GET /api/boletos/consultor/:consultor_id/resumo
pub async fn resumo_consultor(
    State(state): State<Arc<AppState>>,
    Path(consultor_id): Path<Uuid>,
    Query(params): Query<ResumoQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cliente_id = params
        .cliente_id
        .ok_or_else(|| AppError::BadRequest("cliente_id parameter is required".to_string()))?;

    let store = BoletoStore::new(state.db.clone());
    let resumo = store.consultor_resumo(cliente_id, consultor_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": resumo,
    })))
}

/// GET /api/links-consultor
pub async fn listar_links(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListLinksQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cliente_id = params
        .cliente_id
        .ok_or_else(|| AppError::BadRequest("cliente_id parameter is required".to_string()))?;

    let links = LinkService::new(state.db.clone(), state.config.app_base_url.clone())
        .listar_links(cliente_id, params.competencia.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": links,
    })))
}

/// POST /api/links-consultor/gerar
///
/// Issues (or idempotently re-confirms) the public links for every
/// consultant with boletos in the competência.
pub async fn gerar_links(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GerarLinksRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !validar_competencia(&req.competencia) {
        return Err(AppError::BadRequest(
            "competencia must be in MM/YYYY format".to_string(),
        ));
    }

    let links = LinkService::new(state.db.clone(), state.config.app_base_url.clone())
        .gerar_links_para_competencia(req.cliente_id, &req.competencia)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Links gerados/atualizados",
        "data": links,
    })))
}

/// GET /api/consultor-link/:slug — public, the slug is the capability.
pub async fn resolver_link(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolved = LinkService::new(state.db.clone(), state.config.app_base_url.clone())
        .resolver_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound("invalid or expired link".to_string()))?;

    let mut body = serde_json::to_value(resolved)
        .map_err(|e| AppError::InternalError(format!("failed to serialize link: {}", e)))?;
    body["success"] = json!(true);
    Ok(Json(body))
}

/// GET /api/consultor-link/s/:short_code — public short-form resolution.
pub async fn resolver_short_code(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolved = LinkService::new(state.db.clone(), state.config.app_base_url.clone())
        .resolver_short_code(&short_code)
        .await?
        .ok_or_else(|| AppError::NotFound("invalid or expired link".to_string()))?;

    let mut body = serde_json::to_value(resolved)
        .map_err(|e| AppError::InternalError(format!("failed to serialize link: {}", e)))?;
    body["success"] = json!(true);
    Ok(Json(body))
}

/// Parses an optional `DD/MM/YYYY` filter, erroring on malformed input.
fn parse_optional_date(
    value: Option<&str>,
    field: &str,
) -> Result<Option<chrono::NaiveDate>, AppError> {
    match value {
        None => Ok(None),
        Some(raw) => parse_br_date(raw).map(Some).ok_or_else(|| {
            AppError::BadRequest(format!("{} must be a valid DD/MM/YYYY date", field))
        }),
    }
}
