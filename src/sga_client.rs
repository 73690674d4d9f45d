use crate::models::SgaBoleto;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Default page size for the paginated search. Large on purpose: SGA pages
/// are cheap to transfer compared to the per-request round trip.
pub const DEFAULT_PAGE_SIZE: u32 = 3000;

/// Budget for the single-record detail lookup, which is much smaller than a
/// full page.
const DETAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed failures from the SGA API. None of these are retried here; retry
/// policy belongs to the synchronization orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgaError {
    /// 401 from the upstream: invalid or expired bearer token.
    InvalidToken,
    /// 403 from the upstream.
    Forbidden,
    /// 404 from the upstream: misconfigured endpoint or unknown record.
    NotFound,
    /// 5xx from the upstream.
    Server(u16),
    /// Network-level failure (connect, timeout, DNS).
    Connection(String),
    /// Any other unexpected status or undecodable body.
    Unexpected(String),
}

impl fmt::Display for SgaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SgaError::InvalidToken => write!(f, "invalid or expired bearer token"),
            SgaError::Forbidden => write!(f, "access denied by the SGA API"),
            SgaError::NotFound => write!(f, "SGA endpoint or record not found"),
            SgaError::Server(status) => write!(f, "SGA internal error (HTTP {})", status),
            SgaError::Connection(msg) => write!(f, "could not reach the SGA API: {}", msg),
            SgaError::Unexpected(msg) => write!(f, "unexpected SGA response: {}", msg),
        }
    }
}

impl std::error::Error for SgaError {}

/// Parameters for the paginated due-date search.
#[derive(Debug, Clone)]
pub struct PeriodoParams {
    pub codigo_situacao_boleto: String,
    /// Inclusive start, `DD/MM/YYYY`.
    pub data_vencimento_inicial: String,
    /// Inclusive end, `DD/MM/YYYY`.
    pub data_vencimento_final: String,
}

/// One normalized page from the SGA paginated search.
#[derive(Debug)]
pub struct SgaPage {
    pub boletos: Vec<SgaBoleto>,
    pub total_registros: u64,
    pub pagina_corrente: u64,
    pub numero_paginas: u64,
}

impl SgaPage {
    fn empty() -> Self {
        Self {
            boletos: Vec::new(),
            total_registros: 0,
            pagina_corrente: 1,
            numero_paginas: 0,
        }
    }
}

/// Client for the SGA billing API of one cliente.
///
/// Credentials and base endpoint come from the cliente record, so instances
/// are built per synchronization invocation rather than at startup.
#[derive(Clone)]
pub struct SgaClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
}

impl SgaClient {
    /// Creates a new `SgaClient`.
    ///
    /// `timeout` is the per-request budget for page searches; it should be
    /// generous (minutes) because upstream pages can be large.
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self, SgaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SgaError::Unexpected(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Overrides the page size used by `buscar_todos_boletos`.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetches one page of boletos for the period.
    ///
    /// `inicio_paginacao` is a zero-based page offset. The response is
    /// normalized: the API may answer with a bare object or a single-element
    /// array wrapping it, and may omit fields entirely.
    pub async fn buscar_boletos_periodo(
        &self,
        params: &PeriodoParams,
        inicio_paginacao: u64,
    ) -> Result<SgaPage, SgaError> {
        let endpoint = format!("{}/listar/boleto-associado/periodo", self.base_url);

        let body = json!({
            "codigo_situacao_boleto": params.codigo_situacao_boleto,
            "data_vencimento_inicial": params.data_vencimento_inicial,
            "data_vencimento_final": params.data_vencimento_final,
            "inicio_paginacao": inicio_paginacao,
            "quantidade_por_pagina": self.page_size,
        });

        tracing::debug!(
            "SGA page request: {} (page {}, size {})",
            endpoint,
            inicio_paginacao,
            self.page_size
        );

        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| SgaError::Unexpected(format!("failed to parse page body: {}", e)))?;

        let page = normalize_page(data);
        tracing::debug!(
            "SGA page response: {} records, page {}/{}",
            page.boletos.len(),
            page.pagina_corrente,
            page.numero_paginas
        );
        Ok(page)
    }

    /// Fetches every boleto in the period, transparently walking pages.
    ///
    /// Stops when the reported total-pages count is exhausted or a page comes
    /// back empty; the latter guards against inconsistent upstream totals.
    pub async fn buscar_todos_boletos(
        &self,
        params: &PeriodoParams,
    ) -> Result<Vec<SgaBoleto>, SgaError> {
        let mut todos = Vec::new();
        let mut pagina_atual: u64 = 0;
        let mut total_paginas: u64 = 1;

        while pagina_atual < total_paginas {
            let page = self.buscar_boletos_periodo(params, pagina_atual).await?;

            if page.boletos.is_empty() {
                break;
            }
            todos.extend(page.boletos);

            total_paginas = page.numero_paginas.max(1);
            pagina_atual += 1;

            tracing::info!(
                "SGA pagination progress: {}/{} pages, {} boletos collected",
                pagina_atual,
                total_paginas,
                todos.len()
            );
        }

        Ok(todos)
    }

    /// Fetches the full detail of one boleto by its nosso número.
    ///
    /// Returns the normalized array shape the SGA uses for this endpoint;
    /// callers pick the payment fields (PIX payload, PDF link) out of it.
    pub async fn buscar_boleto_por_nosso_numero(
        &self,
        nosso_numero: &str,
    ) -> Result<Vec<Value>, SgaError> {
        let endpoint = format!("{}/buscar/boleto/{}", self.base_url, nosso_numero);

        let response = self
            .client
            .get(&endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .timeout(DETAIL_TIMEOUT)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| SgaError::Unexpected(format!("failed to parse detail body: {}", e)))?;

        Ok(match data {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }
}

/// Maps a non-success HTTP status to a typed error.
fn classify_status(status: u16) -> SgaError {
    match status {
        401 => SgaError::InvalidToken,
        403 => SgaError::Forbidden,
        404 => SgaError::NotFound,
        s if s >= 500 => SgaError::Server(s),
        s => SgaError::Unexpected(format!("HTTP {}", s)),
    }
}

/// Maps reqwest transport failures to a typed error.
fn classify_transport_error(err: reqwest::Error) -> SgaError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        SgaError::Connection(err.to_string())
    } else {
        SgaError::Unexpected(err.to_string())
    }
}

/// Normalizes the irregular page shape into `SgaPage`.
///
/// The API may return `[{...}]`, `{...}`, `[]` or a body without `boletos`;
/// everything that is not a well-formed page collapses to an empty one.
fn normalize_page(data: Value) -> SgaPage {
    let obj = match data {
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return SgaPage::empty(),
        },
        other => other,
    };

    let Some(raw_boletos) = obj.get("boletos").and_then(|b| b.as_array()) else {
        tracing::warn!("SGA page without 'boletos' field, treating as empty");
        return SgaPage::empty();
    };

    let mut boletos = Vec::with_capacity(raw_boletos.len());
    for raw in raw_boletos {
        match SgaBoleto::from_value(raw) {
            Ok(boleto) => boletos.push(boleto),
            Err(e) => tracing::warn!("skipping malformed SGA record: {}", e),
        }
    }

    SgaPage {
        boletos,
        total_registros: flex_u64(obj.get("total_registros")),
        pagina_corrente: flex_u64(obj.get("pagina_corrente")).max(1),
        numero_paginas: flex_u64(obj.get("numero_paginas")),
    }
}

/// Reads a count that the API sometimes sends as a string.
fn flex_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_accepts_bare_object() {
        let page = normalize_page(json!({
            "boletos": [{"nosso_numero": "1"}],
            "total_registros": 1,
            "pagina_corrente": 1,
            "numero_paginas": 1
        }));
        assert_eq!(page.boletos.len(), 1);
        assert_eq!(page.numero_paginas, 1);
    }

    #[test]
    fn normalize_unwraps_single_element_array() {
        let page = normalize_page(json!([{
            "boletos": [{"nosso_numero": "1"}, {"nosso_numero": "2"}],
            "total_registros": "2",
            "numero_paginas": "1"
        }]));
        assert_eq!(page.boletos.len(), 2);
        assert_eq!(page.total_registros, 2);
        assert_eq!(page.pagina_corrente, 1);
    }

    #[test]
    fn normalize_collapses_invalid_shapes_to_empty() {
        assert!(normalize_page(json!([])).boletos.is_empty());
        assert!(normalize_page(json!(null)).boletos.is_empty());
        assert!(normalize_page(json!({"sem_boletos": true})).boletos.is_empty());
        assert_eq!(normalize_page(json!([])).numero_paginas, 0);
    }

    #[test]
    fn status_classification_matches_taxonomy() {
        assert_eq!(classify_status(401), SgaError::InvalidToken);
        assert_eq!(classify_status(403), SgaError::Forbidden);
        assert_eq!(classify_status(404), SgaError::NotFound);
        assert_eq!(classify_status(503), SgaError::Server(503));
        assert!(matches!(classify_status(418), SgaError::Unexpected(_)));
    }

    #[test]
    fn client_creation() {
        let client = SgaClient::new(
            "https://sga.example.com/".to_string(),
            "token".to_string(),
            Duration::from_secs(180),
        );
        assert!(client.is_ok());
    }
}
