//! Ondisk: list the files of a dataset that are replicated on disk.
//!
//! Ondisk asks a Rucio replica catalog which files of a dataset have an
//! available replica at some non-tape site, optionally restricted by an
//! allow list or a block list of sites. The result is printed as a listing
//! or saved as a pickled file list for Python consumers.
//!
//! # Modules
//!
//! - [`catalog`]: the catalog client seam and its Rucio implementation
//! - [`config`]: catalog client configuration and host discovery
//! - [`enumerate`]: dataset to block resolution
//! - [`aggregate`]: batched replica queries, site filtering, and counting
//! - [`output`]: listing and pickle output
//! - [`error`]: Error types for ondisk operations

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod output;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use aggregate::{HostedFiles, SiteFilter};
pub use catalog::CatalogClient;
pub use error::OndiskError;

/// Find all available files (those hosted on disk) for a given dataset.
#[derive(Parser)]
#[command(name = "ondisk")]
#[command(version, author, about)]
struct Cli {
    /// Dataset to query.
    dataset: String,

    /// Allow only these sites.
    #[arg(short, long, num_args = 0.., value_name = "SITE", conflicts_with = "block")]
    allow: Option<Vec<String>>,

    /// Block these sites.
    #[arg(short, long, num_args = 0.., value_name = "SITE")]
    block: Option<Vec<String>>,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    outfile: Option<PathBuf>,

    /// Catalog account [default: current user].
    #[arg(short, long)]
    user: Option<String>,

    /// Print extra information (site list).
    #[arg(short, long)]
    verbose: bool,

    /// Catalog scope of the dataset.
    #[arg(long, default_value = "cms")]
    scope: String,

    /// Blocks per replica request.
    #[arg(long, default_value_t = aggregate::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Catalog client config file (rucio.cfg).
    #[arg(long, env = "RUCIO_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog client home; the config is read from <home>/etc/rucio.cfg.
    #[arg(long, env = "RUCIO_HOME")]
    rucio_home: Option<PathBuf>,
}

/// Run the ondisk CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), OndiskError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Reject bad options before any network activity.
    let filter = SiteFilter::new(cli.allow, cli.block)?;
    if cli.batch_size == 0 {
        return Err(OndiskError::InvalidBatchSize(cli.batch_size));
    }

    let account = cli.user.unwrap_or_else(whoami::username);
    let source = config::ConfigSource {
        config_file: cli.config,
        rucio_home: cli.rucio_home,
    };
    let client_config = config::load_client_config(&source, &account)?;
    let client = catalog::RucioClient::connect(&client_config)?;

    let hosted = find_hosted_files(&client, &cli.scope, &cli.dataset, &filter, cli.batch_size)?;

    if cli.verbose {
        eprint!("{}", hosted.site_summary());
    }

    match cli.outfile {
        Some(path) => {
            output::save_file_list(&path, &hosted.files)?;
            println!("Saved into file {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            output::write_listing(&mut lock, &hosted.files)?;
            lock.flush()?;
        }
    }

    Ok(())
}

/// Enumerate `dataset` and aggregate its disk replicas.
///
/// This is the whole query pipeline without any presentation.
pub fn find_hosted_files<C>(
    client: &C,
    scope: &str,
    dataset: &str,
    filter: &SiteFilter,
    batch_size: usize,
) -> Result<HostedFiles, OndiskError>
where
    C: CatalogClient + ?Sized,
{
    let blocks = enumerate::list_dataset_blocks(client, scope, dataset)?;
    aggregate::aggregate_replicas(client, scope, &blocks, filter, batch_size)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info,ondisk=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Standard output carries the listing, so diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    debug!(version = env!("CARGO_PKG_VERSION"), "ondisk starting");
}
