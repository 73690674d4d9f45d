/// Property-based tests using proptest.
/// Invariants over short codes, billing-period derivation and date parsing.
use boleto_sync_api::links::{
    competencia_de_data, gerar_short_code, gerar_slug, validar_competencia, SHORT_CODE_ALPHABET,
    SHORT_CODE_LEN,
};
use boleto_sync_api::models::{
    normalizar_data_vencimento, parse_br_date, somente_digitos, validar_formato_data,
};
use proptest::prelude::*;

// Property: date parsing should never panic
proptest! {
    #[test]
    fn date_validation_never_panics(data in "\\PC*") {
        let _ = validar_formato_data(&data);
        let _ = normalizar_data_vencimento(&data);
        let _ = competencia_de_data(&data);
    }

    #[test]
    fn valid_dates_round_trip_through_both_formats(y in 1990i32..=2099, m in 1u32..=12, d in 1u32..=28) {
        let br = format!("{:02}/{:02}/{:04}", d, m, y);
        let iso = format!("{:04}-{:02}-{:02}", y, m, d);

        let from_br = normalizar_data_vencimento(&br);
        let from_iso = normalizar_data_vencimento(&iso);
        prop_assert!(from_br.is_some());
        prop_assert_eq!(from_br, from_iso);
    }

    #[test]
    fn competencia_is_month_and_year_of_start_date(y in 1990i32..=2099, m in 1u32..=12, d in 1u32..=28) {
        let data = format!("{:02}/{:02}/{:04}", d, m, y);
        let competencia = competencia_de_data(&data).unwrap();
        prop_assert_eq!(&competencia, &format!("{:02}/{:04}", m, y));
        prop_assert!(validar_competencia(&competencia));
    }

    #[test]
    fn malformed_dates_are_rejected(data in "[0-9]{1,8}") {
        // Without the DD/MM/YYYY shape nothing should parse.
        prop_assert!(parse_br_date(&data).is_none());
        prop_assert!(competencia_de_data(&data).is_none());
    }
}

// Property: CPF normalization keeps digits only, in order
proptest! {
    #[test]
    fn digit_normalization_preserves_digit_order(cpf in "[0-9]{11}") {
        let formatted = format!("{}.{}.{}-{}", &cpf[0..3], &cpf[3..6], &cpf[6..9], &cpf[9..11]);
        prop_assert_eq!(somente_digitos(&formatted), cpf);
    }
}

// Property: short codes and slugs
proptest! {
    #[test]
    fn short_codes_always_use_restricted_alphabet(_i in 0..100u32) {
        let code = gerar_short_code();
        prop_assert_eq!(code.len(), SHORT_CODE_LEN);
        prop_assert!(code.bytes().all(|b| SHORT_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn slugs_are_always_32_hex_chars(_i in 0..100u32) {
        let slug = gerar_slug();
        prop_assert_eq!(slug.len(), 32);
        prop_assert!(slug.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn short_code_alphabet_excludes_ambiguous_symbols() {
    for forbidden in [b'0', b'O', b'1', b'l', b'I'] {
        assert!(!SHORT_CODE_ALPHABET.contains(&forbidden));
    }
    assert_eq!(SHORT_CODE_ALPHABET.len(), 32);
}
