use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use console::style;
use esri_layer_dump::{DumperOptions, DumperState, LayerDumper, OutputFormat};
use indicatif::{ProgressBar, ProgressStyle};

/// Exhaustively paginate an Esri Feature/Map Service layer and write it
/// out as newline-delimited GeoJSON (or raw Esri-JSON) features.
///
/// This binary owns none of the pagination logic; it is the "external
/// collaborator" the core leaves out: argument parsing, file writing,
/// and progress display.
#[derive(Parser)]
#[clap(name = "esri_layer_dump", about = "Dump every feature of an Esri Map/Feature Service layer")]
struct Cli {
    /// URL of the layer to dump, e.g. https://host/arcgis/rest/services/Foo/MapServer/0
    url: String,

    /// Path to write newline-delimited features to.
    #[clap(long, short = 'o')]
    output: String,

    /// Comma-separated list of fields to request. Defaults to all fields.
    #[clap(long)]
    fields: Option<String>,

    /// Output spatial reference.
    #[clap(long, default_value = "4326")]
    out_sr: String,

    /// Prefix every outgoing request with this proxy URL.
    #[clap(long)]
    proxy: Option<String>,

    /// Row offset to resume a RESULT_OFFSET dump from.
    #[clap(long, default_value_t = 0)]
    start_with: i64,

    /// Decimal digits of coordinate precision to request.
    #[clap(long, default_value_t = 7)]
    geometry_precision: u32,

    /// Force one of the OID-based pagination modes even if the server
    /// advertises offset pagination.
    #[clap(long)]
    paginate_oid: bool,

    /// Upper bound on how many records to request per page.
    #[clap(long, default_value_t = 1000)]
    max_page_size: i64,

    /// Send every query as a GET instead of a POST.
    #[clap(long)]
    use_only_get: bool,

    /// Seconds to sleep every `requests_to_pause` requests.
    #[clap(long, default_value_t = 10)]
    pause_seconds: u64,

    /// How many requests to issue before pausing.
    #[clap(long, default_value_t = 5)]
    requests_to_pause: u32,

    /// How many times to retry a transport failure before giving up.
    #[clap(long, default_value_t = 5)]
    num_of_retry: u32,

    /// Emit raw Esri-JSON features instead of converting to GeoJSON.
    #[clap(long)]
    esrijson: bool,

    /// Load resumable state from this file (written by a prior,
    /// interrupted run) instead of probing the server's capabilities.
    #[clap(long)]
    resume_from: Option<String>,

    /// Persist resumable state to this file after every yielded feature.
    #[clap(long)]
    save_state_to: Option<String>,

    /// Per-request timeout, in seconds.
    #[clap(long, default_value_t = 30)]
    timeout_seconds: u64,
}

fn build_options(cli: &Cli) -> Result<DumperOptions, Box<dyn Error>> {
    let mut options = DumperOptions::new(cli.url.clone())
        .with_out_sr(cli.out_sr.clone())
        .with_start_with(cli.start_with)
        .with_geometry_precision(cli.geometry_precision)
        .with_paginate_oid(cli.paginate_oid)
        .with_max_page_size(cli.max_page_size)
        .with_use_only_get(cli.use_only_get)
        .with_pause_seconds(cli.pause_seconds)
        .with_requests_to_pause(cli.requests_to_pause)
        .with_num_of_retry(cli.num_of_retry)
        .with_timeout(Duration::from_secs(cli.timeout_seconds))
        .with_output_format(if cli.esrijson { OutputFormat::EsriJson } else { OutputFormat::GeoJson });

    if let Some(fields) = &cli.fields {
        options = options.with_fields(fields.split(',').map(str::trim).map(str::to_owned).collect());
    }
    if let Some(proxy) = &cli.proxy {
        options = options.with_proxy(proxy.clone());
    }
    if let Some(path) = &cli.resume_from {
        let raw = std::fs::read_to_string(path)?;
        let (state, _metadata) = DumperState::decode(&raw)?;
        options = options.with_state(state);
    }

    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let started = Utc::now();

    let options = build_options(&cli)?;
    let mut dumper = LayerDumper::open(options).await?;
    log::info!("Selected strategy: {}", dumper.state().describe());

    let mut output_file = File::create(&cli.output)?;
    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));

    let mut feature_count: u64 = 0;
    while let Some(feature) = dumper.next().await? {
        writeln!(&mut output_file, "{}", feature)?;
        feature_count += 1;
        if feature_count % 100 == 0 {
            progress.set_message(format!("{} features — {}", feature_count, dumper.state().describe()));
            progress.tick();
        }
        if let Some(path) = &cli.save_state_to {
            let encoded = dumper.encode_state(serde_json::json!({ "url": cli.url }))?;
            std::fs::write(path, encoded)?;
        }
    }
    progress.finish_with_message(format!("done: {} features", feature_count));

    let elapsed = Utc::now().signed_duration_since(started);
    println!("{} Wrote {} features to {} in {} ms", style("✓").green(), feature_count, cli.output, elapsed.num_milliseconds());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_splits_comma_separated_fields() {
        let cli = Cli::parse_from(["esri_layer_dump", "http://example.com/0", "-o", "out.geojsonl", "--fields", "NAME, OBJECTID"]);
        let options = build_options(&cli).unwrap();
        assert_eq!(options.fields(), Some(&["NAME".to_owned(), "OBJECTID".to_owned()][..]));
    }

    #[test]
    fn build_options_defaults_output_format_to_geojson() {
        let cli = Cli::parse_from(["esri_layer_dump", "http://example.com/0", "-o", "out.geojsonl"]);
        let options = build_options(&cli).unwrap();
        assert_eq!(options.output_format(), OutputFormat::GeoJson);
    }

    #[test]
    fn build_options_honors_esrijson_flag() {
        let cli = Cli::parse_from(["esri_layer_dump", "http://example.com/0", "-o", "out.geojsonl", "--esrijson"]);
        let options = build_options(&cli).unwrap();
        assert_eq!(options.output_format(), OutputFormat::EsriJson);
    }
}
