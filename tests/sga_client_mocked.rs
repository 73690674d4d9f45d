/// Integration tests for the SGA client with a mocked upstream.
/// Exercises pagination, response-shape normalization and error
/// classification without hitting a real SGA installation.
use boleto_sync_api::sga_client::{PeriodoParams, SgaClient, SgaError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params() -> PeriodoParams {
    PeriodoParams {
        codigo_situacao_boleto: "2".to_string(),
        data_vencimento_inicial: "01/02/2026".to_string(),
        data_vencimento_final: "28/02/2026".to_string(),
    }
}

fn client(uri: String) -> SgaClient {
    SgaClient::new(uri, "test_token".to_string(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetches_single_page_from_bare_object_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boletos": [
                {"nosso_numero": "100", "veiculos": []},
                {"nosso_numero": "101", "veiculos": []}
            ],
            "total_registros": 2,
            "pagina_corrente": 1,
            "numero_paginas": 1
        })))
        .mount(&mock_server)
        .await;

    let boletos = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap();

    assert_eq!(boletos.len(), 2);
    assert_eq!(boletos[0].nosso_numero, "100");
}

#[tokio::test]
async fn unwraps_single_element_array_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "boletos": [{"nosso_numero": "100"}],
            "total_registros": "1",
            "numero_paginas": "1"
        }])))
        .mount(&mock_server)
        .await;

    let boletos = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap();

    assert_eq!(boletos.len(), 1);
}

#[tokio::test]
async fn walks_multiple_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .and(body_partial_json(json!({"inicio_paginacao": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boletos": [{"nosso_numero": "1"}],
            "total_registros": 2,
            "pagina_corrente": 1,
            "numero_paginas": 2
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .and(body_partial_json(json!({"inicio_paginacao": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boletos": [{"nosso_numero": "2"}],
            "total_registros": 2,
            "pagina_corrente": 2,
            "numero_paginas": 2
        })))
        .mount(&mock_server)
        .await;

    let boletos = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap();

    assert_eq!(boletos.len(), 2);
    assert_eq!(boletos[1].nosso_numero, "2");
}

#[tokio::test]
async fn stops_on_empty_page_despite_overreported_totals() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .and(body_partial_json(json!({"inicio_paginacao": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boletos": [{"nosso_numero": "1"}],
            "numero_paginas": 50
        })))
        .mount(&mock_server)
        .await;

    // Every later page is empty even though the upstream claims 50 pages.
    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boletos": [],
            "numero_paginas": 50
        })))
        .mount(&mock_server)
        .await;

    let boletos = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap();

    // One real page plus the defensive stop; no 50-request walk.
    assert_eq!(boletos.len(), 1);
}

#[tokio::test]
async fn empty_array_response_yields_no_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let boletos = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap();
    assert!(boletos.is_empty());
}

#[tokio::test]
async fn classifies_auth_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let err = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap_err();
    assert_eq!(err, SgaError::InvalidToken);
}

#[tokio::test]
async fn classifies_server_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listar/boleto-associado/periodo"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = client(mock_server.uri())
        .buscar_todos_boletos(&params())
        .await
        .unwrap_err();
    assert_eq!(err, SgaError::Server(503));
}

#[tokio::test]
async fn classifies_connection_failure() {
    // Nothing listens here; the connect itself fails.
    let client = SgaClient::new(
        "http://127.0.0.1:9".to_string(),
        "token".to_string(),
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.buscar_todos_boletos(&params()).await.unwrap_err();
    assert!(matches!(err, SgaError::Connection(_)));
}

#[tokio::test]
async fn detail_lookup_normalizes_object_to_array() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/buscar/boleto/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nosso_numero": "555",
            "pix": {"copia_cola": "000201..."},
            "link_boleto": "https://sga.example.com/pdf/555"
        })))
        .mount(&mock_server)
        .await;

    let resposta = client(mock_server.uri())
        .buscar_boleto_por_nosso_numero("555")
        .await
        .unwrap();

    assert_eq!(resposta.len(), 1);
    assert_eq!(resposta[0]["pix"]["copia_cola"], "000201...");
}

#[tokio::test]
async fn detail_lookup_maps_404_to_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/buscar/boleto/999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let err = client(mock_server.uri())
        .buscar_boleto_por_nosso_numero("999")
        .await
        .unwrap_err();
    assert_eq!(err, SgaError::NotFound);
}
