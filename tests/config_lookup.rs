// tests/config_lookup.rs
use digest_curator::candidate::{ClaimSeverity, SourceTier};
use digest_curator::config::{CuratorConfig, ENV_CONFIG_PATH, ENV_RULES_PATH, ENV_TIERS_PATH};
use digest_curator::rules::RuleBook;
use digest_curator::tiers::TierTable;
use std::{env, fs};

fn clear_env() {
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_TIERS_PATH);
    env::remove_var(ENV_RULES_PATH);
}

#[serial_test::serial]
#[test]
fn curator_config_env_then_fallbacks_then_defaults() {
    // isolate CWD so the repo's own config/ is not read
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) nothing → defaults
    let cfg = CuratorConfig::load_default().unwrap();
    assert_eq!(cfg, CuratorConfig::default());

    // 2) ./config/curator.toml
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("curator.toml"),
        "output_dir = \"artifacts\"\n[gate]\nmax_age_hours = 36\n[chronology]\nmax_delta = 250000\n",
    )
    .unwrap();
    let cfg = CuratorConfig::load_default().unwrap();
    assert_eq!(cfg.gate.max_age_hours, 36);
    assert_eq!(cfg.chronology.max_delta, 250_000);
    assert_eq!(cfg.output_dir, std::path::PathBuf::from("artifacts"));

    // 3) env wins
    let p_env = tmp.path().join("override.json");
    fs::write(&p_env, r#"{"distribution": {"default_region": "GB"}}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let cfg = CuratorConfig::load_default().unwrap();
    assert_eq!(cfg.distribution.default_region, "GB");
    assert_eq!(cfg.gate.max_age_hours, 48);

    // 4) env pointing nowhere is an error, not a silent default
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(CuratorConfig::load_default().is_err());
    clear_env();

    // 5) the freshness ceiling cannot be loosened
    fs::write(cfg_dir.join("curator.toml"), "[gate]\nmax_age_hours = 72\n").unwrap();
    let err = CuratorConfig::load_default().unwrap_err();
    assert!(format!("{err:#}").contains("ceiling"));

    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn tier_overrides_and_rules_load_from_config_dir() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    let seed = TierTable::load_default().unwrap();
    assert_eq!(seed.classify("Gazette Weekly", None).tier, SourceTier::Unknown);
    let book = RuleBook::load_default().unwrap();
    assert_eq!(book, RuleBook::default());

    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("tiers.json"),
        r#"{"overrides": {"Gazette Weekly": "Tier2"}, "domains": {"gazette.example": "Gazette Weekly"}}"#,
    )
    .unwrap();
    fs::write(
        cfg_dir.join("scoring_rules.json"),
        r#"{"claims": {"extraordinary": {"any_word": ["alien landing"]}}}"#,
    )
    .unwrap();

    let tiers = TierTable::load_default().unwrap();
    let info = tiers.classify("", Some("https://www.gazette.example/story"));
    assert_eq!(info.tier, SourceTier::Tier2);
    assert!(info.ga_eligible);
    // seed entries survive the merge
    assert_eq!(tiers.classify("Reuters", None).tier, SourceTier::Tier1);

    let book = RuleBook::load_default().unwrap();
    assert_eq!(
        book.claims.assess("Alien landing confirmed").0,
        ClaimSeverity::Extraordinary
    );
    assert_eq!(book.claims.assess("Coup attempt fails").0, ClaimSeverity::Ordinary);
    // omitted tables keep their built-in values
    assert_eq!(book.scoring, RuleBook::default().scoring);

    // env wins over config/
    let p_env = tmp.path().join("rules.json");
    fs::write(&p_env, r#"{}"#).unwrap();
    env::set_var(ENV_RULES_PATH, p_env.display().to_string());
    assert_eq!(RuleBook::load_default().unwrap(), RuleBook::default());
    clear_env();

    env::set_current_dir(&old).unwrap();
}
