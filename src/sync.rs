use crate::boleto_store::{BoletoStore, MergeOutcome};
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::filter::avaliar_boleto;
use crate::links::{competencia_de_data, LinkService};
use crate::models::{Cliente, Consultor, SyncRecordError, SyncStats};
use crate::sga_client::{PeriodoParams, SgaClient};
use moka::future::Cache;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Sequences one synchronization invocation for one cliente and date range:
/// validate, configure, fetch, reconcile, publish links, report.
pub struct SyncService {
    pool: PgPool,
    config: Config,
    /// Per-cliente single-flight guard. Two overlapping syncs for the same
    /// cliente would race on the natural key and on short-code allocation,
    /// so the second one is rejected up front.
    in_flight: Cache<Uuid, i64>,
}

impl SyncService {
    pub fn new(pool: PgPool, config: Config, in_flight: Cache<Uuid, i64>) -> Self {
        Self {
            pool,
            config,
            in_flight,
        }
    }

    /// Runs one synchronization. Dates are `DD/MM/YYYY`, already validated at
    /// the HTTP boundary.
    pub async fn sincronizar(
        &self,
        cliente_id: Uuid,
        data_inicial: &str,
        data_final: &str,
        codigo_situacao: &str,
    ) -> Result<SyncStats, AppError> {
        // The entry API makes the claim atomic: only the caller that
        // created the entry proceeds, even for simultaneous triggers.
        let claim = self
            .in_flight
            .entry(cliente_id)
            .or_insert_with(async { chrono::Utc::now().timestamp() })
            .await;
        if !claim.is_fresh() {
            return Err(AppError::SyncInProgress(format!(
                "a synchronization for cliente {} is already running",
                cliente_id
            )));
        }

        let result = self
            .executar(cliente_id, data_inicial, data_final, codigo_situacao)
            .await;

        self.in_flight.invalidate(&cliente_id).await;
        result
    }

    async fn executar(
        &self,
        cliente_id: Uuid,
        data_inicial: &str,
        data_final: &str,
        codigo_situacao: &str,
    ) -> Result<SyncStats, AppError> {
        tracing::info!(
            "starting boleto sync for cliente {} ({} to {}, situacao {})",
            cliente_id,
            data_inicial,
            data_final,
            codigo_situacao
        );

        // 1. Validate cliente.
        let cliente = sqlx::query_as::<_, Cliente>(
            "SELECT id, nome, token_bearer, url_base_api, ativo, logo_url FROM clientes WHERE id = $1",
        )
        .bind(cliente_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("cliente {} not found", cliente_id)))?;

        if !cliente.ativo {
            return Err(AppError::BadRequest(format!(
                "cliente {} is inactive",
                cliente_id
            )));
        }

        // 2. Active consultants, keyed by their SGA code.
        let consultores = sqlx::query_as::<_, Consultor>(
            r#"
            SELECT id, cliente_id, nome, id_consultor_sga, ativo
            FROM consultores
            WHERE cliente_id = $1 AND ativo = true
            "#,
        )
        .bind(cliente_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load active consultants")?;

        if consultores.is_empty() {
            return Err(AppError::BadRequest(
                "no active consultants found for this cliente".to_string(),
            ));
        }

        let consultores_map: HashMap<String, Consultor> = consultores
            .into_iter()
            .map(|c| (c.id_consultor_sga.clone(), c))
            .collect();
        tracing::info!("{} active consultants loaded", consultores_map.len());

        // 3. Accepted vehicle-status set; defaults to ATIVO when unconfigured.
        let situacoes_aceitas: Vec<String> = sqlx::query_scalar(
            "SELECT situacoes_veiculo_aceitas FROM configuracoes_filtro WHERE cliente_id = $1",
        )
        .bind(cliente_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load filter configuration for cliente {}", cliente_id))?
        .unwrap_or_else(|| vec!["ATIVO".to_string()]);
        tracing::info!("accepted vehicle statuses: {:?}", situacoes_aceitas);

        // 4. Fetch the full record set. Upstream errors are fatal for this
        // invocation; there is no automatic retry.
        let sga = SgaClient::new(
            cliente.url_base_api.clone(),
            cliente.token_bearer.clone(),
            Duration::from_secs(self.config.sga_timeout_secs),
        )?
        .with_page_size(self.config.sga_page_size);

        let params = PeriodoParams {
            codigo_situacao_boleto: codigo_situacao.to_string(),
            data_vencimento_inicial: data_inicial.to_string(),
            data_vencimento_final: data_final.to_string(),
        };
        let boletos = sga.buscar_todos_boletos(&params).await?;
        tracing::info!("{} boletos received from SGA", boletos.len());

        // 5. Reconcile. Per-record failures are counted and skipped; the
        // rest of the batch keeps going.
        let store = BoletoStore::new(self.pool.clone());
        let mut stats = SyncStats::default();

        for boleto in &boletos {
            stats.total_processados += 1;

            let avaliacao =
                avaliar_boleto(cliente_id, boleto, &situacoes_aceitas, &consultores_map);

            if avaliacao.sem_veiculos {
                stats.total_sem_veiculos += 1;
                continue;
            }
            stats.total_situacao_recusada += avaliacao.situacao_recusada;
            stats.total_consultor_nao_encontrado += avaliacao.consultor_nao_encontrado;

            for novo in &avaliacao.elegiveis {
                match store.upsert_boleto(novo).await {
                    Ok(MergeOutcome::Inserted) => stats.total_inseridos += 1,
                    Ok(MergeOutcome::Updated) => stats.total_atualizados += 1,
                    Err(e) => {
                        tracing::error!(
                            "failed to upsert boleto {}: {}",
                            novo.nosso_numero,
                            e
                        );
                        stats.erros.push(SyncRecordError {
                            nosso_numero: novo.nosso_numero.clone(),
                            erro: e.to_string(),
                        });
                    }
                }
            }
        }

        // 6. Publish links for the billing period derived from the start
        // date. Soft dependency: failure is logged and reported as zero
        // links, not as a failed sync.
        match competencia_de_data(data_inicial) {
            Some(competencia) => {
                let link_service =
                    LinkService::new(self.pool.clone(), self.config.app_base_url.clone());
                match link_service
                    .gerar_links_para_competencia(cliente_id, &competencia)
                    .await
                {
                    Ok(links) => stats.links_gerados = links,
                    Err(e) => {
                        tracing::error!(
                            "link issuance failed for competencia {}: {}",
                            competencia,
                            e
                        );
                    }
                }
            }
            None => {
                tracing::error!(
                    "could not derive competencia from start date {}",
                    data_inicial
                );
            }
        }

        tracing::info!(
            "sync finished for cliente {}: {} processed, {} inserted, {} updated, {} errors, {} links",
            cliente_id,
            stats.total_processados,
            stats.total_inseridos,
            stats.total_atualizados,
            stats.erros.len(),
            stats.links_gerados.len()
        );

        Ok(stats)
    }
}
