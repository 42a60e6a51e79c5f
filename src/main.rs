use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use cabwatch::coordinator::{Pipeline, build_work_items, process_all};
use cabwatch::extractor::{is_windows, select_extractor};
use cabwatch::options::{Cli, ConfigFile, Settings};
use cabwatch::resolver::resolve_locations;
use cabwatch::storage::LocationStore;
use cabwatch::{logging, network};
use clap::Parser;
use console::style;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // Parse terminal arguments.
    let options = Cli::parse();

    // Load config file and resolve the effective settings (CLI args take priority).
    let settings = ConfigFile::load(options.config.as_ref())
        .and_then(|config| Settings::resolve(&options, &config))
        .unwrap_or_else(|e| {
            eprintln!("{} {}", style("[ERROR]").red(), e);
            std::process::exit(1);
        });
    let settings = Arc::new(settings);

    logging::init_logging(settings.log_file.as_deref())?;

    // Build the HTTP clients.
    let probe_client = network::build_probe_client(&settings)?;
    let download_client = network::build_download_client(&settings)?;

    // Pick up new redirect targets and persist them before downloading anything.
    let store = LocationStore::new(settings.state_file.clone());
    let mut record = store.load();
    resolve_locations(
        &settings.products,
        &mut record,
        &probe_client,
        settings.probe_timeout,
    )
    .await;
    store.save(&record)?;

    // Download and extract every known archive.
    let pipeline = Arc::new(Pipeline {
        client: download_client,
        extractor: select_extractor(settings.extractor, is_windows),
        settings: Arc::clone(&settings),
    });
    let summary = process_all(build_work_items(&record), pipeline).await;

    summary.show_text_report();

    Ok(ExitCode::SUCCESS)
}
