use clap::{Parser, ValueEnum};
use phylo_topology_validator::catalog::CatalogExpectation;
use phylo_topology_validator::io::{read_nexus_trees, write_report_tsv};
use phylo_topology_validator::signature::SplitEncoding;
use phylo_topology_validator::validator::{validate_with, ValidationReport, ValidatorConfig};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn, Level};

/// Validate exhaustive catalogs of tree topologies stored as NEXUS tree lists:
/// classify trees as bifurcating or multifurcating, check leaf counts and
/// report every pair of trees with the same topology.
#[derive(Parser, Debug)]
#[command(name = "topology-validator", version, about = "Find duplicate topologies in NEXUS tree catalogs")]
struct Args {
    /// NEXUS tree files to validate, one catalog per file (.gz accepted)
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Directory for TSV duplicate reports, one per input file
    #[arg(short = 'o', long = "report-dir")]
    report_dir: Option<PathBuf>,

    /// Gzip-compress the TSV reports
    #[arg(long = "gzip", default_value_t = false)]
    gzip: bool,

    /// How internal edges are compared: bipartition (unrooted) | clade (rooted).
    /// Defaults to clade with --multifurcating, bipartition otherwise
    #[arg(long = "encoding", value_enum)]
    encoding: Option<EncodingArg>,

    /// Compare tree counts with the size of an exhaustive catalog
    #[arg(long = "catalog", default_value_t = false)]
    catalog: bool,

    /// The catalog also holds multifurcating trees (compared as rooted clades)
    #[arg(long = "multifurcating", alias = "multi", default_value_t = false)]
    multifurcating: bool,

    /// Worker threads for signature computation (0 = one per core)
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    threads: usize,

    /// Inspect trees on the calling thread only
    #[arg(long = "sequential", default_value_t = false)]
    sequential: bool,

    /// Quiet mode: only warnings and errors on stderr
    #[arg(short = 'q', long = "quiet", default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: include debug messages
    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EncodingArg { Bipartition, Clade }

impl From<EncodingArg> for SplitEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Bipartition => SplitEncoding::Bipartition,
            EncodingArg::Clade => SplitEncoding::Clade,
        }
    }
}

// Exit codes, worst one wins across input files
const EXIT_FINDINGS: i32 = 1;
const EXIT_UNREADABLE: i32 = 2;
const EXIT_PRECONDITION: i32 = 3;
const EXIT_WRITE: i32 = 4;

fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if args.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global() {
            warn!("Could not size the thread pool: {e}");
        }
    }

    let config = ValidatorConfig {
        encoding: resolve_encoding(args.encoding, args.multifurcating),
        parallel: !args.sequential,
    };
    info!("Comparing trees by {:?} encoding", config.encoding);

    let exit_code = args
        .inputs
        .iter()
        .map(|input| match validate_file(input, &args, &config) {
            Ok(true) => 0,
            Ok(false) => EXIT_FINDINGS,
            Err(code) => code,
        })
        .max()
        .unwrap_or(0);

    std::process::exit(exit_code);
}

/// Bipartitions merge rooted multifurcating trees that differ only at the
/// root, so multifurcating catalogs default to clades.
fn resolve_encoding(explicit: Option<EncodingArg>, multifurcating: bool) -> SplitEncoding {
    match (explicit, multifurcating) {
        (Some(arg), _) => arg.into(),
        (None, true) => SplitEncoding::Clade,
        (None, false) => SplitEncoding::Bipartition,
    }
}

fn init_tracing(args: &Args) {
    let level = if args.quiet {
        Level::WARN
    } else if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Validate one file. `Ok(true)` means nothing was found.
fn validate_file(input: &Path, args: &Args, config: &ValidatorConfig) -> Result<bool, i32> {
    let t0 = Instant::now();
    let collection = read_nexus_trees(input).map_err(|e| {
        error!("{e}");
        EXIT_UNREADABLE
    })?;
    if collection.is_empty() {
        error!("No trees parsed from {}.", input.display());
        return Err(EXIT_UNREADABLE);
    }
    let read_s = t0.elapsed().as_secs_f64();
    info!(
        "Loaded {} trees with {} taxa from {} in {read_s:.3}s",
        collection.len(),
        collection.universe.len(),
        input.display()
    );

    let t1 = Instant::now();
    let report = validate_with(&collection.trees, &collection.universe, config).map_err(|e| {
        error!("Cannot validate {}: {e}", input.display());
        EXIT_PRECONDITION
    })?;
    let check_s = t1.elapsed().as_secs_f64();
    info!(
        "Validated {} trees in {check_s:.3}s: {} bifurcating, {} multifurcating",
        report.total_count, report.bifurcating_count, report.multifurcating_count
    );

    let names = collection.names();
    log_duplicates(input, &names, &report);

    let mut clean = report.is_clean();
    if args.catalog && !check_catalog(&report, args.multifurcating) {
        clean = false;
    }

    if let Some(dir) = &args.report_dir {
        let out = report_path(dir, input, args.gzip);
        let t2 = Instant::now();
        if let Err(e) = write_report_tsv(&out, &names, &report) {
            error!("Failed to write report {}: {e}", out.display());
            return Err(EXIT_WRITE);
        }
        info!("Writing to {} {:.3}s", out.display(), t2.elapsed().as_secs_f64());
    }

    Ok(clean)
}

fn log_duplicates(input: &Path, names: &[String], report: &ValidationReport) {
    let pairs = report.duplicate_pairs();
    if pairs.is_empty() {
        info!("No duplicates found in {}.", input.display());
        return;
    }
    for (a, b) in &pairs {
        warn!("Duplicate found: {} ({a}) is identical to {} ({b})", names[*a], names[*b]);
    }
    warn!(
        "{} duplicate pairs in {} groups found in {}.",
        pairs.len(),
        report.duplicate_groups.len(),
        input.display()
    );
}

/// Returns false when the catalog is incomplete or over-full.
fn check_catalog(report: &ValidationReport, multifurcating: bool) -> bool {
    let Some(expectation) = CatalogExpectation::for_leaves(report.universe_size, multifurcating) else {
        warn!("No catalog size known for {} taxa", report.universe_size);
        return true;
    };

    let check = expectation.check(report);
    if check.is_complete() {
        info!("Catalog complete: {} trees as expected", expectation.total());
    } else {
        warn!(
            "Catalog mismatch: expected {} bifurcating and {} multifurcating, found {} and {}",
            expectation.bifurcating,
            expectation.multifurcating,
            check.observed_bifurcating,
            check.observed_multifurcating
        );
    }
    check.is_complete()
}

/// `n4/trees.nex` → `<dir>/n4_trees.duplicates.tsv`
fn report_path(dir: &Path, input: &Path, gzip: bool) -> PathBuf {
    let file_name = input.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = file_name.trim_end_matches(".gz");
    let stem = Path::new(stem)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trees".to_string());

    let name = match input.parent().and_then(|p| p.file_name()) {
        Some(parent) => format!("{}_{stem}", parent.to_string_lossy()),
        None => stem,
    };
    let ext = if gzip { "tsv.gz" } else { "tsv" };
    dir.join(format!("{name}.duplicates.{ext}"))
}
