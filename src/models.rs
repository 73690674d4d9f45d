use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Database rows
// ---------------------------------------------------------------------------

/// Tenant record. Owned by the external CRUD surface; read-only here.
#[derive(Debug, Clone, FromRow)]
pub struct Cliente {
    pub id: Uuid,
    pub nome: String,
    pub token_bearer: String,
    pub url_base_api: String,
    pub ativo: bool,
    pub logo_url: Option<String>,
}

/// Field consultant. `id_consultor_sga` is the join key against the
/// `codigo_voluntario` reported by the SGA API, unique per cliente.
#[derive(Debug, Clone, FromRow)]
pub struct Consultor {
    pub id: Uuid,
    pub cliente_id: Uuid,
    pub nome: String,
    pub id_consultor_sga: String,
    pub ativo: bool,
}

/// A billing slip reconciled from the SGA API, ready for upsert.
/// Natural key: (cliente_id, nosso_numero).
#[derive(Debug, Clone)]
pub struct NewBoleto {
    pub cliente_id: Uuid,
    pub consultor_id: Uuid,
    pub nosso_numero: String,
    pub linha_digitavel: String,
    pub valor_boleto: BigDecimal,
    pub nome_associado: String,
    pub cpf_associado: String,
    pub celular: String,
    pub data_vencimento: Option<NaiveDate>,
    pub situacao_boleto: String,
    pub modelo_veiculo: String,
    pub placa_veiculo: String,
    pub mes_referente: String,
    pub dados_completos: Value,
}

// ---------------------------------------------------------------------------
// SGA upstream records
// ---------------------------------------------------------------------------

/// One vehicle attached to an SGA billing record. `raw` keeps the untyped
/// payload for the `dados_completos` snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SgaVeiculo {
    #[serde(default)]
    pub situacao_veiculo: String,
    #[serde(default, deserialize_with = "flex_string")]
    pub codigo_voluntario: String,
    #[serde(default)]
    pub modelo: String,
    #[serde(default)]
    pub placa: String,
    #[serde(skip)]
    pub raw: Value,
}

/// One billing record as returned by the SGA paginated search, normalized
/// into a single well-typed shape at the client boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct SgaBoleto {
    #[serde(default, deserialize_with = "flex_string")]
    pub nosso_numero: String,
    #[serde(default)]
    pub linha_digitavel: String,
    #[serde(default, deserialize_with = "flex_decimal")]
    pub valor_boleto: BigDecimal,
    #[serde(default)]
    pub nome_associado: String,
    #[serde(default)]
    pub cpf: String,
    #[serde(default)]
    pub celular: String,
    #[serde(default)]
    pub data_vencimento: String,
    #[serde(default)]
    pub situacao_boleto: String,
    #[serde(default)]
    pub mes_referente: String,
    #[serde(default)]
    pub veiculos: Vec<SgaVeiculo>,
    #[serde(skip)]
    pub raw: Value,
}

impl SgaBoleto {
    /// Parses a raw record, keeping the original JSON (record and per-vehicle)
    /// alongside the typed fields.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let mut boleto: SgaBoleto = serde_json::from_value(value.clone())?;
        boleto.raw = value.clone();
        if let Some(raw_vehicles) = value.get("veiculos").and_then(|v| v.as_array()) {
            for (veiculo, raw) in boleto.veiculos.iter_mut().zip(raw_vehicles) {
                veiculo.raw = raw.clone();
            }
        }
        Ok(boleto)
    }
}

/// Accepts a JSON string or number and normalizes it to a string.
/// The SGA API is inconsistent about `nosso_numero` and consultant codes.
fn flex_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Accepts a JSON string or number and parses it as a decimal amount.
/// Unparseable values collapse to zero, matching the upstream contract.
fn flex_decimal<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return Ok(BigDecimal::from(0)),
    };
    Ok(BigDecimal::from_str(text.trim()).unwrap_or_else(|_| BigDecimal::from(0)))
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SincronizarRequest {
    pub cliente_id: Uuid,
    pub data_vencimento_inicial: Option<String>,
    pub data_vencimento_final: Option<String>,
    pub codigo_situacao_boleto: Option<String>,
}

/// One per-record failure captured during the reconciliation loop.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecordError {
    pub nosso_numero: String,
    pub erro: String,
}

/// Statistics accumulated over one synchronization invocation.
#[derive(Debug, Default, Serialize)]
pub struct SyncStats {
    pub total_processados: u64,
    pub total_inseridos: u64,
    pub total_atualizados: u64,
    pub total_sem_veiculos: u64,
    pub total_situacao_recusada: u64,
    pub total_consultor_nao_encontrado: u64,
    pub erros: Vec<SyncRecordError>,
    pub links_gerados: Vec<IssuedLink>,
}

#[derive(Debug, Deserialize)]
pub struct ListBoletosQuery {
    pub cliente_id: Option<Uuid>,
    pub consultor_id: Option<Uuid>,
    pub situacao_boleto: Option<String>,
    pub data_vencimento_inicial: Option<String>,
    pub data_vencimento_final: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConsultorRef {
    pub id: Uuid,
    pub nome: String,
    pub id_consultor_sga: String,
}

#[derive(Debug, Serialize)]
pub struct BoletoListItem {
    pub id: Uuid,
    pub consultor: ConsultorRef,
    pub nosso_numero: String,
    pub linha_digitavel: String,
    pub valor_boleto: BigDecimal,
    pub nome_associado: String,
    pub cpf_associado: String,
    pub celular: String,
    pub data_vencimento: Option<NaiveDate>,
    pub situacao_boleto: String,
    pub modelo_veiculo: String,
    pub placa_veiculo: String,
    pub mes_referente: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BoletoPage {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub logo_url: Option<String>,
    pub boletos: Vec<BoletoListItem>,
}

#[derive(Debug, Serialize)]
pub struct ClienteRef {
    pub id: Uuid,
    pub nome: String,
}

#[derive(Debug, Serialize)]
pub struct BoletoDetail {
    pub id: Uuid,
    pub cliente: ClienteRef,
    pub consultor: ConsultorRef,
    pub nosso_numero: String,
    pub linha_digitavel: String,
    pub valor_boleto: BigDecimal,
    pub nome_associado: String,
    pub cpf_associado: String,
    pub celular: String,
    pub data_vencimento: Option<NaiveDate>,
    pub situacao_boleto: String,
    pub modelo_veiculo: String,
    pub placa_veiculo: String,
    pub mes_referente: String,
    pub dados_completos: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate view of a consultant's boletos for one cliente.
#[derive(Debug, Serialize)]
pub struct ConsultorResumo {
    pub consultor_id: Uuid,
    pub total_boletos: i64,
    pub valor_total: BigDecimal,
    pub total_abertos: i64,
    pub total_vencidos: i64,
    pub total_pagos: i64,
}

#[derive(Debug, Deserialize)]
pub struct GerarLinksRequest {
    pub cliente_id: Uuid,
    pub competencia: String,
}

/// A public link issued (or re-confirmed) for one consultant and period.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    pub consultor_id: Uuid,
    pub nome_consultor: String,
    pub competencia: String,
    pub slug: String,
    pub short_code: String,
    pub url_completa: String,
    pub url_curta: String,
}

/// Identity behind a resolved slug or short code.
#[derive(Debug, Serialize)]
pub struct ResolvedLink {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub cliente_id: Uuid,
    pub consultor_id: Uuid,
    pub competencia: String,
    pub nome_consultor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_completa: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkListItem {
    pub id: Uuid,
    pub consultor_id: Uuid,
    pub nome_consultor: String,
    pub competencia: String,
    pub slug: String,
    pub short_code: Option<String>,
    pub url_completa: Option<String>,
    pub url_curta: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListLinksQuery {
    pub cliente_id: Option<Uuid>,
    pub competencia: Option<String>,
}

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

/// Validates a `DD/MM/YYYY` string as a real calendar date.
pub fn validar_formato_data(data: &str) -> bool {
    parse_br_date(data).is_some()
}

/// Parses a `DD/MM/YYYY` string, rejecting impossible dates (e.g. 31/02).
pub fn parse_br_date(data: &str) -> Option<NaiveDate> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());
    if !re.is_match(data) {
        return None;
    }
    NaiveDate::parse_from_str(data, "%d/%m/%Y").ok()
}

/// Normalizes an upstream due date to a calendar date.
///
/// Accepts `YYYY-MM-DD` or `DD/MM/YYYY`; empty strings and the upstream
/// `0000-00-00` sentinel map to `None`.
pub fn normalizar_data_vencimento(data: &str) -> Option<NaiveDate> {
    if data.is_empty() || data == "0000-00-00" {
        return None;
    }
    NaiveDate::parse_from_str(data, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_br_date(data))
}

/// First and last day of the current month, formatted `DD/MM/YYYY`.
pub fn periodo_mes_atual() -> (String, String) {
    let hoje = Utc::now().date_naive();
    let primeiro = hoje.with_day(1).unwrap_or(hoje);
    let ultimo = if hoje.month() == 12 {
        NaiveDate::from_ymd_opt(hoje.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(hoje.year(), hoje.month() + 1, 1)
    }
    .and_then(|d| d.pred_opt())
    .unwrap_or(hoje);
    (
        primeiro.format("%d/%m/%Y").to_string(),
        ultimo.format("%d/%m/%Y").to_string(),
    )
}

/// Keeps only ASCII digits; used to normalize CPF values.
pub fn somente_digitos(valor: &str) -> String {
    valor.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_br_date_accepts_real_dates_only() {
        assert!(validar_formato_data("28/02/2026"));
        assert!(validar_formato_data("31/12/2025"));
        assert!(!validar_formato_data("31/02/2026"));
        assert!(!validar_formato_data("2026-02-01"));
        assert!(!validar_formato_data("1/2/2026"));
        assert!(!validar_formato_data(""));
    }

    #[test]
    fn due_date_normalization_handles_both_formats_and_sentinels() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(normalizar_data_vencimento("2026-02-28"), Some(expected));
        assert_eq!(normalizar_data_vencimento("28/02/2026"), Some(expected));
        assert_eq!(normalizar_data_vencimento("0000-00-00"), None);
        assert_eq!(normalizar_data_vencimento(""), None);
        assert_eq!(normalizar_data_vencimento("garbage"), None);
    }

    #[test]
    fn sga_boleto_parses_numeric_nosso_numero_and_string_amount() {
        let value = json!({
            "nosso_numero": 123456,
            "linha_digitavel": "0001",
            "valor_boleto": "150.50",
            "nome_associado": "Fulano",
            "cpf": "123.456.789-01",
            "veiculos": [
                {"situacao_veiculo": "ATIVO", "codigo_voluntario": 10, "modelo": "Gol", "placa": "ABC1D23"}
            ]
        });

        let boleto = SgaBoleto::from_value(&value).unwrap();
        assert_eq!(boleto.nosso_numero, "123456");
        assert_eq!(boleto.valor_boleto, BigDecimal::from_str("150.50").unwrap());
        assert_eq!(boleto.veiculos.len(), 1);
        assert_eq!(boleto.veiculos[0].codigo_voluntario, "10");
        assert_eq!(boleto.veiculos[0].raw["placa"], "ABC1D23");
        assert_eq!(boleto.raw["nosso_numero"], 123456);
    }

    #[test]
    fn sga_boleto_tolerates_missing_fields() {
        let boleto = SgaBoleto::from_value(&json!({})).unwrap();
        assert!(boleto.nosso_numero.is_empty());
        assert!(boleto.veiculos.is_empty());
        assert_eq!(boleto.valor_boleto, BigDecimal::from(0));
    }

    #[test]
    fn cpf_normalization_strips_punctuation() {
        assert_eq!(somente_digitos("123.456.789-01"), "12345678901");
        assert_eq!(somente_digitos(""), "");
    }
}
