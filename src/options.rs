use crate::extractor::ExtractorKind;
use crate::utils::expand_path;
use clap::{Parser, ValueHint, value_parser};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default values used throughout the project.
pub mod defaults {
    /// Number of work items downloaded and extracted in parallel.
    pub const WORKERS: u8 = 5;

    /// Upper bound for `workers`, from the CLI or the config file.
    pub const MAX_WORKERS: u8 = 64;

    /// Timeout for the redirect probe, in seconds.
    pub const PROBE_TIMEOUT: u64 = 30;

    /// Timeout for a single archive download, in seconds.
    pub const DOWNLOAD_TIMEOUT: u64 = 60;

    /// Hard wall-clock limit for the external extraction tool, in seconds.
    pub const EXTRACT_TIMEOUT: u64 = 300;

    /// Timeout for the web archive "save" request, in seconds.
    pub const ARCHIVE_TIMEOUT: u64 = 30;

    /// The user agent Windows Update itself sends. Plain library agents get filtered.
    pub const USER_AGENT: &str = "Windows Dlp Manager";

    pub const STATE_FILE: &str = "locations.json";
    pub const OUTPUT_DIR: &str = "products";

    /// Config file picked up from the current directory when `--config` is not given.
    pub const CONFIG_FILE: &str = ".cabwatch.toml";

    pub const ARCHIVE_ENDPOINT: &str = "http://web.archive.org/save/";

    /// Tracked products and their fixed redirect origins.
    pub const PRODUCTS: &[(&str, &str)] = &[
        ("Win10", "https://go.microsoft.com/fwlink/?LinkId=841361"),
        ("Win11", "https://go.microsoft.com/fwlink/?LinkId=2156292"),
    ];
}

/// A tracked product: a name and the short link that redirects to its current catalog CAB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: String,
    pub url: String,
}

impl Product {
    pub fn new(name: &str, url: &str) -> Result<Self, String> {
        if name.trim().is_empty() {
            return Err(String::from("Invalid product: the name must not be empty"));
        }
        let parsed = Url::parse(url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("Invalid URL '{}': only http and https are supported", url));
        }
        Ok(Product {
            name: name.trim().to_string(),
            url: url.to_string(),
        })
    }
}

/// Parses a `NAME=URL` pair given on the command line.
fn parse_product(value: &str) -> Result<Product, String> {
    match value.split_once('=') {
        Some((name, url)) => Product::new(name, url.trim()),
        None => Err(format!(
            "'{}' is not a valid product. Expected the format `NAME=URL`",
            value
        )),
    }
}

#[derive(Debug, Parser)]
#[command(version, about, term_width = 80)]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        help = "Path to a TOML config file. Defaults to `.cabwatch.toml` in the current directory, if present",
        value_hint = ValueHint::FilePath,
        value_parser = value_parser!(PathBuf)
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 's',
        long,
        help = "JSON file recording every redirect target seen so far [default: locations.json]",
        value_hint = ValueHint::FilePath
    )]
    pub state_file: Option<String>,

    #[arg(
        short = 'o',
        long,
        help = "Directory where the extracted catalogs are stored, one subdirectory per product [default: products]",
        value_hint = ValueHint::DirPath
    )]
    pub output_dir: Option<String>,

    #[arg(
        short = 'w',
        long,
        help = "Number of archives downloaded and extracted in parallel [default: 5]",
        value_parser = value_parser!(u8).range(1..=defaults::MAX_WORKERS as i64)
    )]
    pub workers: Option<u8>,

    #[arg(
        long,
        help = "Custom User-Agent header to be used in requests [default: Windows Dlp Manager]"
    )]
    pub user_agent: Option<String>,

    #[arg(
        long,
        help = "Timeout (in seconds) for resolving a product's redirect [default: 30]",
        value_parser = value_parser!(u64).range(1..=600)
    )]
    pub probe_timeout: Option<u64>,

    #[arg(
        short = 't',
        long,
        help = "Timeout (in seconds) for downloading a single archive [default: 60]",
        value_parser = value_parser!(u64).range(1..=3600)
    )]
    pub download_timeout: Option<u64>,

    #[arg(
        long,
        help = "Time limit (in seconds) for the external extraction tool [default: 300]",
        value_parser = value_parser!(u64).range(1..=3600)
    )]
    pub extract_timeout: Option<u64>,

    #[arg(
        short = 'p',
        long = "product",
        value_name = "NAME=URL",
        help = "Track a product redirect link. Can be repeated; replaces the built-in Win10/Win11 links",
        value_parser = parse_product
    )]
    pub products: Vec<Product>,

    #[arg(
        short = 'x',
        long,
        value_enum,
        help = "Extraction tool to use. `auto` picks `expand` on Windows and `cabextract` elsewhere [default: auto]"
    )]
    pub extractor: Option<ExtractorKind>,

    #[arg(
        short = 'a',
        long,
        help = "Submit every archive URL to the web archive before downloading it"
    )]
    pub archive: bool,

    #[arg(
        long,
        help = "The web archive \"save\" endpoint; the archive URL is appended to it. Implies --archive",
        value_hint = ValueHint::Url
    )]
    pub archive_endpoint: Option<String>,

    #[arg(
        long,
        help = "Write log output to this file instead of stderr",
        value_hint = ValueHint::FilePath
    )]
    pub log_file: Option<String>,
}

/// Values read from a TOML config file. Every key is optional; CLI arguments take priority.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub state_file: Option<String>,
    pub output_dir: Option<String>,
    pub workers: Option<u8>,
    pub user_agent: Option<String>,
    pub probe_timeout: Option<u64>,
    pub download_timeout: Option<u64>,
    pub extract_timeout: Option<u64>,
    pub extractor: Option<ExtractorKind>,
    pub archive: Option<bool>,
    pub archive_endpoint: Option<String>,
    pub log_file: Option<String>,
    pub products: Option<BTreeMap<String, String>>,
}

impl ConfigFile {
    /// Loads the config file.
    ///
    /// With an explicit `path` the file must exist. Without one, `.cabwatch.toml` in the
    /// current directory is used when present, otherwise an empty config is returned.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, String> {
        let path = match path {
            Some(path) if !path.exists() => {
                return Err(format!("Config file not found: {}", path.display()));
            }
            Some(path) => path.clone(),
            None => {
                let path = PathBuf::from(defaults::CONFIG_FILE);
                if !path.exists() {
                    return Ok(ConfigFile::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
    }
}

/// The effective, immutable run configuration.
///
/// Built once at startup from the CLI arguments, the config file and the built-in
/// defaults (in that order of priority), then handed to every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub products: Vec<Product>,
    pub state_file: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub user_agent: String,
    pub probe_timeout: Duration,
    pub download_timeout: Duration,
    pub extract_timeout: Duration,
    pub archive_timeout: Duration,
    /// The web archive endpoint, only set when archiving is enabled.
    pub archive_endpoint: Option<String>,
    pub extractor: ExtractorKind,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            products: default_products(),
            state_file: PathBuf::from(defaults::STATE_FILE),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            workers: defaults::WORKERS as usize,
            user_agent: defaults::USER_AGENT.to_string(),
            probe_timeout: Duration::from_secs(defaults::PROBE_TIMEOUT),
            download_timeout: Duration::from_secs(defaults::DOWNLOAD_TIMEOUT),
            extract_timeout: Duration::from_secs(defaults::EXTRACT_TIMEOUT),
            archive_timeout: Duration::from_secs(defaults::ARCHIVE_TIMEOUT),
            archive_endpoint: None,
            extractor: ExtractorKind::Auto,
            log_file: None,
        }
    }
}

fn default_products() -> Vec<Product> {
    defaults::PRODUCTS
        .iter()
        .map(|(name, url)| Product {
            name: name.to_string(),
            url: url.to_string(),
        })
        .collect()
}

impl Settings {
    /// Merges CLI arguments over config file values over defaults.
    pub fn resolve(cli: &Cli, config: &ConfigFile) -> Result<Self, String> {
        let base = Settings::default();

        let workers = cli.workers.or(config.workers).unwrap_or(defaults::WORKERS);
        if !(1..=defaults::MAX_WORKERS).contains(&workers) {
            return Err(format!(
                "workers must be between 1 and {}, got {}",
                defaults::MAX_WORKERS,
                workers
            ));
        }

        let products = if !cli.products.is_empty() {
            dedup_products(cli.products.clone())
        } else if let Some(products) = &config.products {
            products
                .iter()
                .map(|(name, url)| Product::new(name, url))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            base.products
        };

        // An endpoint given on the command line is a request to archive.
        let archive =
            cli.archive || cli.archive_endpoint.is_some() || config.archive.unwrap_or(false);
        let archive_endpoint = archive.then(|| {
            cli.archive_endpoint
                .clone()
                .or_else(|| config.archive_endpoint.clone())
                .unwrap_or_else(|| defaults::ARCHIVE_ENDPOINT.to_string())
        });

        let seconds = |cli: Option<u64>, config: Option<u64>, default: Duration| {
            cli.or(config)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Ok(Settings {
            products,
            state_file: cli
                .state_file
                .as_deref()
                .or(config.state_file.as_deref())
                .map(expand_path)
                .unwrap_or(base.state_file),
            output_dir: cli
                .output_dir
                .as_deref()
                .or(config.output_dir.as_deref())
                .map(expand_path)
                .unwrap_or(base.output_dir),
            workers: workers as usize,
            user_agent: cli
                .user_agent
                .clone()
                .or_else(|| config.user_agent.clone())
                .unwrap_or(base.user_agent),
            probe_timeout: seconds(cli.probe_timeout, config.probe_timeout, base.probe_timeout),
            download_timeout: seconds(
                cli.download_timeout,
                config.download_timeout,
                base.download_timeout,
            ),
            extract_timeout: seconds(
                cli.extract_timeout,
                config.extract_timeout,
                base.extract_timeout,
            ),
            archive_timeout: base.archive_timeout,
            archive_endpoint,
            extractor: cli.extractor.or(config.extractor).unwrap_or(base.extractor),
            log_file: cli
                .log_file
                .as_deref()
                .or(config.log_file.as_deref())
                .map(expand_path),
        })
    }
}

/// Keeps the last definition of each product name, in first-seen order.
fn dedup_products(products: Vec<Product>) -> Vec<Product> {
    let mut unique: Vec<Product> = Vec::with_capacity(products.len());
    for product in products {
        match unique.iter_mut().find(|p| p.name == product.name) {
            Some(existing) => *existing = product,
            None => unique.push(product),
        }
    }
    unique
}
