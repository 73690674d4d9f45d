use crate::models::{normalizar_data_vencimento, somente_digitos, Consultor, NewBoleto, SgaBoleto};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of evaluating one SGA record against the cliente's filters.
///
/// A record may yield zero, one, or multiple upserts: each vehicle on the
/// record is evaluated independently.
#[derive(Debug, Default)]
pub struct Avaliacao {
    /// One upsert candidate per eligible vehicle.
    pub elegiveis: Vec<NewBoleto>,
    /// Record carried no vehicles at all.
    pub sem_veiculos: bool,
    /// Vehicles whose status is outside the accepted set.
    pub situacao_recusada: u64,
    /// Vehicles whose consultant code matched no active consultant.
    pub consultor_nao_encontrado: u64,
}

/// Evaluates one billing record.
///
/// `situacoes_aceitas` is the cliente's accepted vehicle-status set and
/// `consultores` maps `id_consultor_sga` to the cliente's active consultants.
pub fn avaliar_boleto(
    cliente_id: Uuid,
    boleto: &SgaBoleto,
    situacoes_aceitas: &[String],
    consultores: &HashMap<String, Consultor>,
) -> Avaliacao {
    let mut avaliacao = Avaliacao::default();

    if boleto.veiculos.is_empty() {
        avaliacao.sem_veiculos = true;
        return avaliacao;
    }

    for veiculo in &boleto.veiculos {
        if !situacoes_aceitas.contains(&veiculo.situacao_veiculo) {
            avaliacao.situacao_recusada += 1;
            continue;
        }

        let Some(consultor) = consultores.get(&veiculo.codigo_voluntario) else {
            avaliacao.consultor_nao_encontrado += 1;
            continue;
        };

        avaliacao.elegiveis.push(NewBoleto {
            cliente_id,
            consultor_id: consultor.id,
            nosso_numero: boleto.nosso_numero.clone(),
            linha_digitavel: boleto.linha_digitavel.clone(),
            valor_boleto: boleto.valor_boleto.clone(),
            nome_associado: boleto.nome_associado.clone(),
            cpf_associado: somente_digitos(&boleto.cpf),
            celular: boleto.celular.clone(),
            data_vencimento: normalizar_data_vencimento(&boleto.data_vencimento),
            situacao_boleto: boleto.situacao_boleto.clone(),
            modelo_veiculo: veiculo.modelo.clone(),
            placa_veiculo: veiculo.placa.clone(),
            mes_referente: boleto.mes_referente.clone(),
            dados_completos: json!({ "boleto": boleto.raw, "veiculo": veiculo.raw }),
        });
    }

    // The natural key is on the record, not the vehicle, so two eligible
    // vehicles pointing at different consultants will overwrite each other
    // (last one wins). Upstream data like this is ambiguous; flag it.
    let consultores_distintos = {
        let mut ids: Vec<Uuid> = avaliacao.elegiveis.iter().map(|b| b.consultor_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    };
    if consultores_distintos > 1 {
        tracing::warn!(
            "boleto {} maps to {} distinct consultants; last eligible vehicle wins",
            boleto.nosso_numero,
            consultores_distintos
        );
    }

    avaliacao
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consultor(codigo: &str) -> Consultor {
        Consultor {
            id: Uuid::new_v4(),
            cliente_id: Uuid::new_v4(),
            nome: format!("Consultor {}", codigo),
            id_consultor_sga: codigo.to_string(),
            ativo: true,
        }
    }

    fn mapa(codigos: &[&str]) -> HashMap<String, Consultor> {
        codigos
            .iter()
            .map(|c| (c.to_string(), consultor(c)))
            .collect()
    }

    fn boleto_com_veiculos(veiculos: serde_json::Value) -> SgaBoleto {
        SgaBoleto::from_value(&json!({
            "nosso_numero": "555",
            "linha_digitavel": "0001",
            "valor_boleto": "100.00",
            "nome_associado": "Fulano",
            "cpf": "123.456.789-01",
            "data_vencimento": "15/02/2026",
            "situacao_boleto": "ABERTO",
            "mes_referente": "02/2026",
            "veiculos": veiculos
        }))
        .unwrap()
    }

    #[test]
    fn record_without_vehicles_is_rejected_outright() {
        let boleto = boleto_com_veiculos(json!([]));
        let avaliacao = avaliar_boleto(
            Uuid::new_v4(),
            &boleto,
            &["ATIVO".to_string()],
            &mapa(&["10"]),
        );
        assert!(avaliacao.sem_veiculos);
        assert!(avaliacao.elegiveis.is_empty());
    }

    #[test]
    fn vehicle_status_outside_accepted_set_is_counted() {
        let boleto = boleto_com_veiculos(json!([
            {"situacao_veiculo": "INATIVO", "codigo_voluntario": "10"}
        ]));
        let avaliacao = avaliar_boleto(
            Uuid::new_v4(),
            &boleto,
            &["ATIVO".to_string()],
            &mapa(&["10"]),
        );
        assert_eq!(avaliacao.situacao_recusada, 1);
        assert!(avaliacao.elegiveis.is_empty());
    }

    #[test]
    fn unknown_consultant_code_is_counted() {
        let boleto = boleto_com_veiculos(json!([
            {"situacao_veiculo": "ATIVO", "codigo_voluntario": "99"}
        ]));
        let avaliacao = avaliar_boleto(
            Uuid::new_v4(),
            &boleto,
            &["ATIVO".to_string()],
            &mapa(&["10", "20"]),
        );
        assert_eq!(avaliacao.consultor_nao_encontrado, 1);
        assert!(avaliacao.elegiveis.is_empty());
    }

    #[test]
    fn eligible_vehicle_yields_normalized_upsert() {
        let cliente_id = Uuid::new_v4();
        let consultores = mapa(&["10"]);
        let boleto = boleto_com_veiculos(json!([
            {"situacao_veiculo": "ATIVO", "codigo_voluntario": "10", "modelo": "Gol", "placa": "ABC1D23"}
        ]));

        let avaliacao = avaliar_boleto(cliente_id, &boleto, &["ATIVO".to_string()], &consultores);
        assert_eq!(avaliacao.elegiveis.len(), 1);

        let novo = &avaliacao.elegiveis[0];
        assert_eq!(novo.cliente_id, cliente_id);
        assert_eq!(novo.consultor_id, consultores["10"].id);
        assert_eq!(novo.cpf_associado, "12345678901");
        assert_eq!(
            novo.data_vencimento,
            chrono::NaiveDate::from_ymd_opt(2026, 2, 15)
        );
        assert_eq!(novo.modelo_veiculo, "Gol");
        assert_eq!(novo.dados_completos["veiculo"]["placa"], "ABC1D23");
        assert_eq!(novo.dados_completos["boleto"]["nosso_numero"], "555");
    }

    #[test]
    fn one_record_may_yield_multiple_upserts() {
        let boleto = boleto_com_veiculos(json!([
            {"situacao_veiculo": "ATIVO", "codigo_voluntario": "10"},
            {"situacao_veiculo": "ATIVO", "codigo_voluntario": "20"},
            {"situacao_veiculo": "SUSPENSO", "codigo_voluntario": "10"}
        ]));
        let avaliacao = avaliar_boleto(
            Uuid::new_v4(),
            &boleto,
            &["ATIVO".to_string()],
            &mapa(&["10", "20"]),
        );
        assert_eq!(avaliacao.elegiveis.len(), 2);
        assert_eq!(avaliacao.situacao_recusada, 1);
    }
}
