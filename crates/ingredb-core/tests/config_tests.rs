use std::path::Path;

use ingredb_core::config::{resolve_with_base, Config};

#[test]
fn defaults_apply_without_any_file() {
    let settings = Config::from_toml_str("").settings().expect("settings");
    assert_eq!(settings.retrieval.max_sql_results, 6);
    assert_eq!(settings.retrieval.max_semantic_results, 5);
    assert_eq!(settings.retrieval.hybrid_overfetch, 10);
    assert_eq!(settings.safety.max_query_len, 5000);
    assert!(settings.safety.allowed_tables.iter().any(|t| t == "cosmetic_csv"));
    assert_eq!(settings.llm.model, "phi3");
}

#[test]
fn toml_overrides_single_keys_and_keeps_the_rest() {
    let config = Config::from_toml_str(
        r#"
        [retrieval]
        max_sql_results = 10

        [llm]
        model = "llama3"
        "#,
    );
    let settings = config.settings().expect("settings");
    assert_eq!(settings.retrieval.max_sql_results, 10);
    assert_eq!(settings.retrieval.max_semantic_results, 5, "untouched key keeps default");
    assert_eq!(settings.llm.model, "llama3");
    assert_eq!(config.get::<String>("llm.base_url").expect("base_url"), "http://localhost:11434");
}

#[test]
fn zero_caps_are_rejected() {
    let config = Config::from_toml_str("[retrieval]\nmax_semantic_results = 0\n");
    let err = config.settings().expect_err("zero cap must fail validation");
    assert!(err.to_string().contains("greater than zero"), "{err}");
}

#[test]
fn relative_paths_resolve_against_base() {
    let tmp = tempfile::tempdir().expect("tmp");
    let resolved = resolve_with_base(tmp.path(), "data/cosmetic_csv.db");
    assert_eq!(resolved, tmp.path().join("data/cosmetic_csv.db"));
    let absolute = resolve_with_base(tmp.path(), "/var/lib/ingredb.db");
    assert_eq!(absolute, Path::new("/var/lib/ingredb.db"));
}
