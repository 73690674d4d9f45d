use crate::errors::AppError;
use crate::models::{IssuedLink, LinkListItem, ResolvedLink};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Fixed 32-symbol alphabet for short codes. Visually ambiguous characters
/// (0/O, 1/l) are excluded. 32 divides 256, so a byte modulo draw is
/// unbiased.
pub const SHORT_CODE_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";
pub const SHORT_CODE_LEN: usize = 6;

/// Collision probability per attempt is astronomically low; the cap exists
/// to fail explicitly instead of spinning on a persistent store failure.
const MAX_SHORT_CODE_ATTEMPTS: u32 = 32;

/// Generates the opaque public token for a link: 16 random bytes (128 bits)
/// hex-encoded. Generated once per link, never rotated.
pub fn gerar_slug() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generates one short-code candidate. Uniqueness is enforced by the store.
pub fn gerar_short_code() -> String {
    let mut bytes = [0u8; SHORT_CODE_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| SHORT_CODE_ALPHABET[(*b as usize) % SHORT_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Derives the billing period `MM/YYYY` from a `DD/MM/YYYY` date.
pub fn competencia_de_data(data_inicial: &str) -> Option<String> {
    if crate::models::parse_br_date(data_inicial).is_none() {
        return None;
    }
    let mut parts = data_inicial.splitn(3, '/');
    let _dia = parts.next()?;
    let mes = parts.next()?;
    let ano = parts.next()?;
    Some(format!("{}/{}", mes, ano))
}

/// Validates a `MM/YYYY` billing-period label.
pub fn validar_competencia(competencia: &str) -> bool {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^(0[1-9]|1[0-2])/\d{4}$").unwrap());
    re.is_match(competencia)
}

/// Issues and resolves consultant-scoped public links.
///
/// A link identifies a (cliente, consultor, competência) triple; the slug
/// and short code are capability tokens, so resolution is unauthenticated.
pub struct LinkService {
    pool: PgPool,
    base_url: String,
}

impl LinkService {
    pub fn new(pool: PgPool, base_url: String) -> Self {
        Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url_completa(&self, slug: &str) -> String {
        format!("{}/app/?token={}", self.base_url, slug)
    }

    fn url_curta(&self, short_code: &str) -> String {
        format!("{}/app/s/{}", self.base_url, short_code)
    }

    /// Ensures every consultant with at least one boleto in the competência
    /// has exactly one link for it.
    ///
    /// Idempotent: existing links keep their slug and short code; only
    /// bookkeeping timestamps are refreshed and a missing short code is
    /// backfilled. Consultants with zero boletos in the period get no link.
    pub async fn gerar_links_para_competencia(
        &self,
        cliente_id: Uuid,
        competencia: &str,
    ) -> Result<Vec<IssuedLink>, AppError> {
        let consultores = sqlx::query(
            r#"
            SELECT DISTINCT b.consultor_id, c.nome AS nome_consultor
            FROM boletos b
            INNER JOIN consultores c ON c.id = b.consultor_id
            WHERE b.cliente_id = $1 AND b.mes_referente = $2
            "#,
        )
        .bind(cliente_id)
        .bind(competencia)
        .fetch_all(&self.pool)
        .await?;

        let mut links = Vec::with_capacity(consultores.len());
        for row in consultores {
            let consultor_id: Uuid = row.try_get("consultor_id")?;
            let nome_consultor: String = row.try_get("nome_consultor")?;

            let link = self
                .ensure_link(cliente_id, consultor_id, competencia)
                .await?;

            links.push(IssuedLink {
                consultor_id,
                nome_consultor,
                competencia: competencia.to_string(),
                url_completa: self.url_completa(&link.slug),
                url_curta: self.url_curta(&link.short_code),
                slug: link.slug,
                short_code: link.short_code,
            });
        }

        tracing::info!(
            "links ensured for cliente {} competencia {}: {}",
            cliente_id,
            competencia,
            links.len()
        );
        Ok(links)
    }

    /// Finds or creates the link for one (cliente, consultor, competência).
    async fn ensure_link(
        &self,
        cliente_id: Uuid,
        consultor_id: Uuid,
        competencia: &str,
    ) -> Result<LinkTokens, AppError> {
        let existente = sqlx::query(
            r#"
            SELECT id, slug, short_code
            FROM links_consultor
            WHERE cliente_id = $1 AND consultor_id = $2 AND competencia = $3
            "#,
        )
        .bind(cliente_id)
        .bind(consultor_id)
        .bind(competencia)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existente {
            let id: Uuid = row.try_get("id")?;
            let slug: String = row.try_get("slug")?;
            let short_code: Option<String> = row.try_get("short_code")?;

            let short_code = match short_code {
                Some(code) => {
                    // Re-issuance only refreshes bookkeeping.
                    sqlx::query(
                        "UPDATE links_consultor SET updated_at = now() WHERE id = $1",
                    )
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                    code
                }
                None => self.backfill_short_code(id).await?,
            };

            return Ok(LinkTokens { slug, short_code });
        }

        self.insert_link(cliente_id, consultor_id, competencia).await
    }

    /// Inserts a brand-new link, retrying with fresh randomness when the
    /// short-code unique constraint rejects a collision.
    async fn insert_link(
        &self,
        cliente_id: Uuid,
        consultor_id: Uuid,
        competencia: &str,
    ) -> Result<LinkTokens, AppError> {
        let slug = gerar_slug();

        for _ in 0..MAX_SHORT_CODE_ATTEMPTS {
            let short_code = gerar_short_code();
            let result = sqlx::query(
                r#"
                INSERT INTO links_consultor
                    (cliente_id, consultor_id, competencia, slug, short_code, url_completa)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(cliente_id)
            .bind(consultor_id)
            .bind(competencia)
            .bind(&slug)
            .bind(&short_code)
            .bind(self.url_completa(&slug))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    return Ok(LinkTokens { slug, short_code });
                }
                Err(e) if constraint_name(&e) == Some("links_consultor_short_code_unique") => {
                    tracing::warn!("short code collision on {}, retrying", short_code);
                    continue;
                }
                Err(e) if constraint_name(&e) == Some("links_consultor_escopo_unique") => {
                    // A concurrent issuance won the race; reuse its tokens.
                    let row = sqlx::query(
                        r#"
                        SELECT slug, short_code
                        FROM links_consultor
                        WHERE cliente_id = $1 AND consultor_id = $2 AND competencia = $3
                        "#,
                    )
                    .bind(cliente_id)
                    .bind(consultor_id)
                    .bind(competencia)
                    .fetch_one(&self.pool)
                    .await?;
                    let short_code: Option<String> = row.try_get("short_code")?;
                    return Ok(LinkTokens {
                        slug: row.try_get("slug")?,
                        short_code: short_code.unwrap_or_default(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InternalError(
            "short code allocation exhausted retry budget".to_string(),
        ))
    }

    /// Assigns a short code to a pre-existing link that lacks one.
    async fn backfill_short_code(&self, link_id: Uuid) -> Result<String, AppError> {
        for _ in 0..MAX_SHORT_CODE_ATTEMPTS {
            let short_code = gerar_short_code();
            let result = sqlx::query(
                "UPDATE links_consultor SET short_code = $1, updated_at = now() WHERE id = $2",
            )
            .bind(&short_code)
            .bind(link_id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return Ok(short_code),
                Err(e) if constraint_name(&e) == Some("links_consultor_short_code_unique") => {
                    tracing::warn!("short code collision on backfill, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InternalError(
            "short code allocation exhausted retry budget".to_string(),
        ))
    }

    /// Resolves a slug to the identity behind it. Public path.
    pub async fn resolver_slug(&self, slug: &str) -> Result<Option<ResolvedLink>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT l.cliente_id, l.consultor_id, l.competencia, l.url_completa,
                   c.nome AS nome_consultor, cl.logo_url
            FROM links_consultor l
            INNER JOIN consultores c ON c.id = l.consultor_id
            INNER JOIN clientes cl ON cl.id = l.cliente_id
            WHERE l.slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ResolvedLink {
            slug: None,
            cliente_id: row.try_get("cliente_id")?,
            consultor_id: row.try_get("consultor_id")?,
            competencia: row.try_get("competencia")?,
            nome_consultor: row.try_get("nome_consultor")?,
            url_completa: row.try_get("url_completa")?,
            logo_url: row.try_get("logo_url")?,
        }))
    }

    /// Resolves a short code to its slug and identity. Public path.
    pub async fn resolver_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<ResolvedLink>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT l.slug, l.cliente_id, l.consultor_id, l.competencia,
                   c.nome AS nome_consultor, cl.logo_url
            FROM links_consultor l
            INNER JOIN consultores c ON c.id = l.consultor_id
            INNER JOIN clientes cl ON cl.id = l.cliente_id
            WHERE l.short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ResolvedLink {
            slug: row.try_get("slug")?,
            cliente_id: row.try_get("cliente_id")?,
            consultor_id: row.try_get("consultor_id")?,
            competencia: row.try_get("competencia")?,
            nome_consultor: row.try_get("nome_consultor")?,
            url_completa: None,
            logo_url: row.try_get("logo_url")?,
        }))
    }

    /// Lists a cliente's links, optionally scoped to one competência.
    pub async fn listar_links(
        &self,
        cliente_id: Uuid,
        competencia: Option<&str>,
    ) -> Result<Vec<LinkListItem>, AppError> {
        let mut query: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            r#"
            SELECT l.id, l.consultor_id, l.competencia, l.slug, l.short_code,
                   l.url_completa, l.created_at, c.nome AS nome_consultor
            FROM links_consultor l
            INNER JOIN consultores c ON c.id = l.consultor_id
            WHERE l.cliente_id = "#,
        );
        query.push_bind(cliente_id);
        if let Some(competencia) = competencia {
            query.push(" AND l.competencia = ");
            query.push_bind(competencia.to_string());
        }
        query.push(" ORDER BY l.competencia DESC, c.nome");

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in rows {
            let short_code: Option<String> = row.try_get("short_code")?;
            links.push(LinkListItem {
                id: row.try_get("id")?,
                consultor_id: row.try_get("consultor_id")?,
                nome_consultor: row.try_get("nome_consultor")?,
                competencia: row.try_get("competencia")?,
                slug: row.try_get("slug")?,
                url_completa: row.try_get("url_completa")?,
                url_curta: short_code.as_deref().map(|c| self.url_curta(c)),
                short_code,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(links)
    }
}

struct LinkTokens {
    slug: String,
    short_code: String,
}

/// Extracts the violated constraint name from a database error, if any.
fn constraint_name(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn slug_is_128_bits_of_hex() {
        let slug = gerar_slug();
        assert_eq!(slug.len(), 32);
        assert!(slug.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(gerar_slug(), slug);
    }

    #[test]
    fn short_code_uses_restricted_alphabet() {
        assert_eq!(SHORT_CODE_ALPHABET.len(), 32);
        for _ in 0..200 {
            let code = gerar_short_code();
            assert_eq!(code.len(), SHORT_CODE_LEN);
            assert!(code.bytes().all(|b| SHORT_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains('0'));
            assert!(!code.contains('1'));
            assert!(!code.contains('l'));
            assert!(!code.contains('o'));
        }
    }

    #[test]
    fn short_codes_rarely_collide() {
        let codes: HashSet<String> = (0..1000).map(|_| gerar_short_code()).collect();
        // 32^6 possible codes; 1000 draws colliding would indicate broken randomness.
        assert!(codes.len() > 990);
    }

    #[test]
    fn competencia_derived_from_start_date() {
        assert_eq!(
            competencia_de_data("01/02/2026"),
            Some("02/2026".to_string())
        );
        assert_eq!(competencia_de_data("2026-02-01"), None);
        assert_eq!(competencia_de_data("31/02/2026"), None);
        assert_eq!(competencia_de_data(""), None);
    }

    #[test]
    fn competencia_format_validation() {
        assert!(validar_competencia("02/2026"));
        assert!(validar_competencia("12/1999"));
        assert!(!validar_competencia("13/2026"));
        assert!(!validar_competencia("00/2026"));
        assert!(!validar_competencia("2/2026"));
        assert!(!validar_competencia("02-2026"));
    }
}
