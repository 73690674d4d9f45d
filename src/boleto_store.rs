use crate::errors::AppError;
use crate::models::{
    BoletoDetail, BoletoListItem, BoletoPage, ClienteRef, ConsultorRef, ConsultorResumo, NewBoleto,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

/// Whether an upsert created a new row or refreshed an existing one.
/// Used for statistics only, never for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
}

/// Filters for the boleto listing. `cliente_id` is mandatory.
#[derive(Debug)]
pub struct BoletoFilters {
    pub cliente_id: Uuid,
    pub consultor_id: Option<Uuid>,
    pub situacao_boleto: Option<String>,
    pub data_vencimento_inicial: Option<NaiveDate>,
    pub data_vencimento_final: Option<NaiveDate>,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct BoletoListRow {
    id: Uuid,
    nosso_numero: String,
    linha_digitavel: String,
    valor_boleto: BigDecimal,
    nome_associado: String,
    cpf_associado: String,
    celular: String,
    data_vencimento: Option<NaiveDate>,
    situacao_boleto: String,
    modelo_veiculo: String,
    placa_veiculo: String,
    mes_referente: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    consultor_id: Uuid,
    consultor_nome: String,
    id_consultor_sga: String,
}

/// Durable storage for reconciled boletos, keyed by (cliente, nosso número).
pub struct BoletoStore {
    pool: PgPool,
}

impl BoletoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or updates a boleto by its natural key.
    ///
    /// The update path overwrites every mutable business field plus the raw
    /// snapshot and refreshes `updated_at`; the natural key itself never
    /// changes. `(xmax = 0)` distinguishes a fresh insert from an update.
    pub async fn upsert_boleto(&self, boleto: &NewBoleto) -> Result<MergeOutcome, AppError> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO boletos (
                cliente_id, consultor_id, nosso_numero, linha_digitavel, valor_boleto,
                nome_associado, cpf_associado, celular, data_vencimento, situacao_boleto,
                modelo_veiculo, placa_veiculo, mes_referente, dados_completos
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (cliente_id, nosso_numero)
            DO UPDATE SET
                consultor_id = EXCLUDED.consultor_id,
                linha_digitavel = EXCLUDED.linha_digitavel,
                valor_boleto = EXCLUDED.valor_boleto,
                nome_associado = EXCLUDED.nome_associado,
                cpf_associado = EXCLUDED.cpf_associado,
                celular = EXCLUDED.celular,
                data_vencimento = EXCLUDED.data_vencimento,
                situacao_boleto = EXCLUDED.situacao_boleto,
                modelo_veiculo = EXCLUDED.modelo_veiculo,
                placa_veiculo = EXCLUDED.placa_veiculo,
                mes_referente = EXCLUDED.mes_referente,
                dados_completos = EXCLUDED.dados_completos,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(boleto.cliente_id)
        .bind(boleto.consultor_id)
        .bind(&boleto.nosso_numero)
        .bind(&boleto.linha_digitavel)
        .bind(&boleto.valor_boleto)
        .bind(&boleto.nome_associado)
        .bind(&boleto.cpf_associado)
        .bind(&boleto.celular)
        .bind(boleto.data_vencimento)
        .bind(&boleto.situacao_boleto)
        .bind(&boleto.modelo_veiculo)
        .bind(&boleto.placa_veiculo)
        .bind(&boleto.mes_referente)
        .bind(&boleto.dados_completos)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            MergeOutcome::Inserted
        } else {
            MergeOutcome::Updated
        })
    }

    /// Lists boletos for a cliente with optional filters.
    ///
    /// Stable order: due date descending, then creation time descending.
    /// The cliente's logo reference is included for presentation.
    pub async fn list_boletos(&self, filters: &BoletoFilters) -> Result<BoletoPage, AppError> {
        let mut count_query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM boletos b WHERE b.cliente_id = ");
        count_query.push_bind(filters.cliente_id);
        push_filters(&mut count_query, filters);

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let limit = filters.limit.clamp(1, 500);
        let page = filters.page.max(1);
        let offset = (page - 1) * limit;

        let mut list_query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            SELECT b.id, b.nosso_numero, b.linha_digitavel, b.valor_boleto,
                   b.nome_associado, b.cpf_associado, b.celular, b.data_vencimento,
                   b.situacao_boleto, b.modelo_veiculo, b.placa_veiculo, b.mes_referente,
                   b.created_at, b.updated_at,
                   c.id AS consultor_id, c.nome AS consultor_nome, c.id_consultor_sga
            FROM boletos b
            INNER JOIN consultores c ON b.consultor_id = c.id
            WHERE b.cliente_id = "#,
        );
        list_query.push_bind(filters.cliente_id);
        push_filters(&mut list_query, filters);
        list_query.push(" ORDER BY b.data_vencimento DESC, b.created_at DESC LIMIT ");
        list_query.push_bind(limit);
        list_query.push(" OFFSET ");
        list_query.push_bind(offset);

        let rows: Vec<BoletoListRow> = list_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let logo_url: Option<String> =
            sqlx::query_scalar("SELECT logo_url FROM clientes WHERE id = $1")
                .bind(filters.cliente_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        let boletos = rows
            .into_iter()
            .map(|row| BoletoListItem {
                id: row.id,
                consultor: ConsultorRef {
                    id: row.consultor_id,
                    nome: row.consultor_nome,
                    id_consultor_sga: row.id_consultor_sga,
                },
                nosso_numero: row.nosso_numero,
                linha_digitavel: row.linha_digitavel,
                valor_boleto: row.valor_boleto,
                nome_associado: row.nome_associado,
                cpf_associado: row.cpf_associado,
                celular: row.celular,
                data_vencimento: row.data_vencimento,
                situacao_boleto: row.situacao_boleto,
                modelo_veiculo: row.modelo_veiculo,
                placa_veiculo: row.placa_veiculo,
                mes_referente: row.mes_referente,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect();

        Ok(BoletoPage {
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
            logo_url,
            boletos,
        })
    }

    /// Fetches one boleto by id with consultor and cliente display names.
    pub async fn get_boleto(&self, id: Uuid) -> Result<Option<BoletoDetail>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT b.*, c.nome AS consultor_nome, c.id_consultor_sga, cl.nome AS cliente_nome
            FROM boletos b
            INNER JOIN consultores c ON b.consultor_id = c.id
            INNER JOIN clientes cl ON b.cliente_id = cl.id
            WHERE b.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(BoletoDetail {
            id: row.try_get("id")?,
            cliente: ClienteRef {
                id: row.try_get("cliente_id")?,
                nome: row.try_get("cliente_nome")?,
            },
            consultor: ConsultorRef {
                id: row.try_get("consultor_id")?,
                nome: row.try_get("consultor_nome")?,
                id_consultor_sga: row.try_get("id_consultor_sga")?,
            },
            nosso_numero: row.try_get("nosso_numero")?,
            linha_digitavel: row.try_get("linha_digitavel")?,
            valor_boleto: row.try_get("valor_boleto")?,
            nome_associado: row.try_get("nome_associado")?,
            cpf_associado: row.try_get("cpf_associado")?,
            celular: row.try_get("celular")?,
            data_vencimento: row.try_get("data_vencimento")?,
            situacao_boleto: row.try_get("situacao_boleto")?,
            modelo_veiculo: row.try_get("modelo_veiculo")?,
            placa_veiculo: row.try_get("placa_veiculo")?,
            mes_referente: row.try_get("mes_referente")?,
            dados_completos: row.try_get("dados_completos")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Persists the lazily fetched payment fields (PIX payload and PDF link).
    pub async fn update_payment_fields(
        &self,
        cliente_id: Uuid,
        nosso_numero: &str,
        pix_copia_cola: Option<&str>,
        link_boleto: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE boletos
            SET pix_copia_cola = $1, link_boleto = $2, updated_at = now()
            WHERE cliente_id = $3 AND nosso_numero = $4
            "#,
        )
        .bind(pix_copia_cola)
        .bind(link_boleto)
        .bind(cliente_id)
        .bind(nosso_numero)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Checks that a boleto exists for the cliente, optionally scoped to a
    /// consultor (used by the public-facing detail and PDF routes).
    pub async fn boleto_exists(
        &self,
        cliente_id: Uuid,
        nosso_numero: &str,
        consultor_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT 1 FROM boletos WHERE cliente_id = ");
        query.push_bind(cliente_id);
        query.push(" AND nosso_numero = ");
        query.push_bind(nosso_numero);
        if let Some(consultor_id) = consultor_id {
            query.push(" AND consultor_id = ");
            query.push_bind(consultor_id);
        }

        let found: Option<i32> = query
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Returns the stored PDF link for a boleto, if any.
    pub async fn link_boleto(
        &self,
        cliente_id: Uuid,
        nosso_numero: &str,
        consultor_id: Option<Uuid>,
    ) -> Result<Option<String>, AppError> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT link_boleto FROM boletos WHERE cliente_id = ");
        query.push_bind(cliente_id);
        query.push(" AND nosso_numero = ");
        query.push_bind(nosso_numero);
        if let Some(consultor_id) = consultor_id {
            query.push(" AND consultor_id = ");
            query.push_bind(consultor_id);
        }

        let link: Option<Option<String>> = query
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await?;
        Ok(link.flatten())
    }

    /// Status breakdown of one consultant's boletos for a cliente.
    pub async fn consultor_resumo(
        &self,
        cliente_id: Uuid,
        consultor_id: Uuid,
    ) -> Result<ConsultorResumo, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_boletos,
                COALESCE(SUM(valor_boleto), 0) AS valor_total,
                COUNT(*) FILTER (WHERE situacao_boleto = 'ABERTO') AS total_abertos,
                COUNT(*) FILTER (WHERE situacao_boleto = 'VENCIDO') AS total_vencidos,
                COUNT(*) FILTER (WHERE situacao_boleto = 'PAGO') AS total_pagos
            FROM boletos
            WHERE cliente_id = $1 AND consultor_id = $2
            "#,
        )
        .bind(cliente_id)
        .bind(consultor_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ConsultorResumo {
            consultor_id,
            total_boletos: row.try_get("total_boletos")?,
            valor_total: row.try_get("valor_total")?,
            total_abertos: row.try_get("total_abertos")?,
            total_vencidos: row.try_get("total_vencidos")?,
            total_pagos: row.try_get("total_pagos")?,
        })
    }
}

/// Appends the optional listing filters shared by the count and page queries.
fn push_filters(query: &mut QueryBuilder<'_, sqlx::Postgres>, filters: &BoletoFilters) {
    if let Some(consultor_id) = filters.consultor_id {
        query.push(" AND b.consultor_id = ");
        query.push_bind(consultor_id);
    }
    if let Some(situacao) = &filters.situacao_boleto {
        query.push(" AND b.situacao_boleto = ");
        query.push_bind(situacao.clone());
    }
    if let Some(inicio) = filters.data_vencimento_inicial {
        query.push(" AND b.data_vencimento >= ");
        query.push_bind(inicio);
    }
    if let Some(fim) = filters.data_vencimento_final {
        query.push(" AND b.data_vencimento <= ");
        query.push_bind(fim);
    }
}
