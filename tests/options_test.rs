use cabwatch::extractor::ExtractorKind;
use cabwatch::options::{Cli, ConfigFile, Product, Settings, defaults};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["cabwatch"];
    argv.extend_from_slice(args);
    Cli::parse_from(argv)
}

#[test]
fn test_defaults_without_arguments() {
    let settings = Settings::resolve(&parse(&[]), &ConfigFile::default()).unwrap();

    assert_eq!(settings.state_file, PathBuf::from("locations.json"));
    assert_eq!(settings.output_dir, PathBuf::from("products"));
    assert_eq!(settings.workers, 5);
    assert_eq!(settings.user_agent, "Windows Dlp Manager");
    assert_eq!(settings.probe_timeout, Duration::from_secs(30));
    assert_eq!(settings.download_timeout, Duration::from_secs(60));
    assert_eq!(settings.extract_timeout, Duration::from_secs(300));
    assert_eq!(settings.extractor, ExtractorKind::Auto);
    assert!(settings.archive_endpoint.is_none());
    assert!(settings.log_file.is_none());

    let names: Vec<&str> = settings.products.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Win10", "Win11"]);
    assert_eq!(
        settings.products[0].url,
        "https://go.microsoft.com/fwlink/?LinkId=841361"
    );
    assert_eq!(
        settings.products[1].url,
        "https://go.microsoft.com/fwlink/?LinkId=2156292"
    );
}

#[test]
fn test_cli_arguments() {
    let cli = parse(&[
        "-s",
        "state/seen.json",
        "-o",
        "out",
        "-w",
        "8",
        "-t",
        "120",
        "--extract-timeout",
        "10",
        "--extractor",
        "cabextract",
        "--archive",
        "-p",
        "Server=https://example.com/fwlink?id=1",
    ]);
    let settings = Settings::resolve(&cli, &ConfigFile::default()).unwrap();

    assert_eq!(settings.state_file, PathBuf::from("state/seen.json"));
    assert_eq!(settings.output_dir, PathBuf::from("out"));
    assert_eq!(settings.workers, 8);
    assert_eq!(settings.download_timeout, Duration::from_secs(120));
    assert_eq!(settings.extract_timeout, Duration::from_secs(10));
    assert_eq!(settings.extractor, ExtractorKind::Cabextract);
    assert_eq!(
        settings.archive_endpoint.as_deref(),
        Some(defaults::ARCHIVE_ENDPOINT)
    );
    assert_eq!(
        settings.products,
        vec![Product::new("Server", "https://example.com/fwlink?id=1").unwrap()]
    );
}

#[test]
fn test_repeated_product_keeps_last_definition() {
    let cli = parse(&[
        "-p",
        "Win10=https://example.com/one",
        "-p",
        "Win11=https://example.com/two",
        "-p",
        "Win10=https://example.com/three",
    ]);
    let settings = Settings::resolve(&cli, &ConfigFile::default()).unwrap();

    assert_eq!(settings.products.len(), 2);
    assert_eq!(settings.products[0].name, "Win10");
    assert_eq!(settings.products[0].url, "https://example.com/three");
    assert_eq!(settings.products[1].url, "https://example.com/two");
}

#[test]
fn test_invalid_product_is_rejected() {
    assert!(Cli::try_parse_from(["cabwatch", "-p", "no-equals-sign"]).is_err());
    assert!(Cli::try_parse_from(["cabwatch", "-p", "=https://example.com"]).is_err());
    assert!(Cli::try_parse_from(["cabwatch", "-p", "Win10=ftp://example.com/x"]).is_err());
    assert!(Cli::try_parse_from(["cabwatch", "-p", "Win10=not a url"]).is_err());
}

#[test]
fn test_workers_range_is_enforced() {
    assert!(Cli::try_parse_from(["cabwatch", "-w", "0"]).is_err());
    assert!(Cli::try_parse_from(["cabwatch", "-w", "65"]).is_err());
    assert!(Cli::try_parse_from(["cabwatch", "-w", "64"]).is_ok());
}

#[test]
fn test_config_file_deserialization_valid_toml() {
    let toml_str = r#"
state_file = "/var/lib/cabwatch/locations.json"
output_dir = "/srv/catalogs"
workers = 3
user_agent = "MyAgent/1.0"
probe_timeout = 5
download_timeout = 90
extract_timeout = 600
extractor = "expand"
archive = true
archive_endpoint = "https://archive.example/save/"
log_file = "/var/log/cabwatch.log"

[products]
Win10 = "https://example.com/win10"
Win11 = "https://example.com/win11"
"#;

    let config: ConfigFile = toml::from_str(toml_str).expect("Failed to parse TOML");

    assert_eq!(config.state_file.as_deref(), Some("/var/lib/cabwatch/locations.json"));
    assert_eq!(config.output_dir.as_deref(), Some("/srv/catalogs"));
    assert_eq!(config.workers, Some(3));
    assert_eq!(config.user_agent.as_deref(), Some("MyAgent/1.0"));
    assert_eq!(config.probe_timeout, Some(5));
    assert_eq!(config.download_timeout, Some(90));
    assert_eq!(config.extract_timeout, Some(600));
    assert_eq!(config.extractor, Some(ExtractorKind::Expand));
    assert_eq!(config.archive, Some(true));
    assert_eq!(config.archive_endpoint.as_deref(), Some("https://archive.example/save/"));
    assert_eq!(config.log_file.as_deref(), Some("/var/log/cabwatch.log"));
    assert_eq!(config.products.as_ref().map(|p| p.len()), Some(2));
}

#[test]
fn test_config_file_rejects_unknown_keys() {
    assert!(toml::from_str::<ConfigFile>("concurrency_limit = 4").is_err());
}

#[test]
fn test_config_values_apply_when_cli_is_silent() {
    let config: ConfigFile = toml::from_str(
        r#"
workers = 2
archive = true
archive_endpoint = "https://archive.example/save/"
extractor = "expand"

[products]
Preview = "https://example.com/preview"
"#,
    )
    .unwrap();

    let settings = Settings::resolve(&parse(&[]), &config).unwrap();

    assert_eq!(settings.workers, 2);
    assert_eq!(settings.extractor, ExtractorKind::Expand);
    assert_eq!(
        settings.archive_endpoint.as_deref(),
        Some("https://archive.example/save/")
    );
    assert_eq!(
        settings.products,
        vec![Product::new("Preview", "https://example.com/preview").unwrap()]
    );
}

#[test]
fn test_cli_arguments_override_config_values() {
    let config: ConfigFile = toml::from_str(
        r#"
workers = 2
state_file = "from-config.json"
user_agent = "ConfigAgent"

[products]
Preview = "https://example.com/preview"
"#,
    )
    .unwrap();
    let cli = parse(&[
        "-w",
        "7",
        "-s",
        "from-cli.json",
        "-p",
        "Win10=https://example.com/win10",
    ]);

    let settings = Settings::resolve(&cli, &config).unwrap();

    assert_eq!(settings.workers, 7);
    assert_eq!(settings.state_file, PathBuf::from("from-cli.json"));
    assert_eq!(settings.user_agent, "ConfigAgent");
    assert_eq!(settings.products.len(), 1);
    assert_eq!(settings.products[0].name, "Win10");
}

#[test]
fn test_config_workers_zero_is_rejected() {
    let config: ConfigFile = toml::from_str("workers = 0").unwrap();
    assert!(Settings::resolve(&parse(&[]), &config).is_err());
}

#[test]
fn test_config_workers_above_maximum_is_rejected() {
    let config: ConfigFile = toml::from_str("workers = 65").unwrap();
    let err = Settings::resolve(&parse(&[]), &config).unwrap_err();
    assert!(err.contains("between 1 and 64"), "got: {}", err);

    let config: ConfigFile = toml::from_str("workers = 64").unwrap();
    let settings = Settings::resolve(&parse(&[]), &config).unwrap();
    assert_eq!(settings.workers, 64);
}

#[test]
fn test_config_invalid_product_url_is_rejected() {
    let config: ConfigFile = toml::from_str("[products]\nWin10 = \"nope\"").unwrap();
    assert!(Settings::resolve(&parse(&[]), &config).is_err());
}

#[test]
fn test_config_archive_disabled_ignores_endpoint() {
    let config: ConfigFile =
        toml::from_str(r#"archive_endpoint = "https://archive.example/save/""#).unwrap();
    let settings = Settings::resolve(&parse(&[]), &config).unwrap();

    assert!(settings.archive_endpoint.is_none());
}

#[test]
fn test_cli_archive_endpoint_enables_archiving() {
    let cli = parse(&["--archive-endpoint", "https://archive.example/save/"]);
    let settings = Settings::resolve(&cli, &ConfigFile::default()).unwrap();

    assert_eq!(
        settings.archive_endpoint.as_deref(),
        Some("https://archive.example/save/")
    );
}

#[test]
fn test_config_file_load_existing_path() {
    let mut tmp = NamedTempFile::new().expect("Failed to create temp file");
    writeln!(tmp, "workers = 9\ndownload_timeout = 30").expect("Failed to write temp file");

    let path = tmp.path().to_path_buf();
    let config = ConfigFile::load(Some(&path)).expect("Failed to load config");

    assert_eq!(config.workers, Some(9));
    assert_eq!(config.download_timeout, Some(30));
    assert!(config.user_agent.is_none());
}

#[test]
fn test_config_file_load_nonexistent_path() {
    let path = PathBuf::from("/tmp/nonexistent_cabwatch_config_12345.toml");
    let err = ConfigFile::load(Some(&path)).unwrap_err();

    assert!(err.contains("not found"), "Error should mention 'not found', got: {}", err);
}

#[test]
fn test_config_file_load_invalid_toml() {
    let mut tmp = NamedTempFile::new().expect("Failed to create temp file");
    writeln!(tmp, "workers = [").unwrap();

    let path = tmp.path().to_path_buf();
    let err = ConfigFile::load(Some(&path)).unwrap_err();

    assert!(err.contains("Failed to parse"), "got: {}", err);
}
