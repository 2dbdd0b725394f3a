//! Histoseal: secure-aggregation rehearsal.
//!
//! Runs a complete session between one label-holding party and several
//! feature-holding parties in one process. The all-gather collective is
//! simulated by concatenating buffers. Every decoded histogram is checked
//! against a direct local computation and a JSON summary is printed.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use histoseal::adapters::build_scheme;
use histoseal::adapters::sanitize::SanitizingMakeWriter;
use histoseal::domain::config::{PASSPHRASE_ENV, PASSPHRASE_KEY, SALT_KEY, SCHEME_KEY};
use histoseal::domain::kdf::generate_salt;
use histoseal::domain::{LedgerStats, ProcessorConfig, SchemeKind, SessionDiagnostics};
use histoseal::{HistogramAggregator, NodePartition, Params, Processor, SecureProcessor};

const USAGE: &str = "Usage: histoseal [--parties N] [--rows N] [--features N] [--bins N] \
[--rounds N] [--scheme plaintext|aes-gcm] [--seed N]";

/// Fraction of slots left missing in the synthetic layout.
const MISSING_RATE: f64 = 0.1;

#[derive(Debug, Clone)]
struct Options {
    parties: usize,
    rows: usize,
    features: usize,
    bins: usize,
    rounds: usize,
    scheme: SchemeKind,
    seed: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            parties: 3,
            rows: 256,
            features: 4,
            bins: 16,
            rounds: 3,
            scheme: SchemeKind::Plaintext,
            seed: 42,
        }
    }
}

impl Options {
    fn parse() -> Result<Option<Self>> {
        let mut options = Self::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            if arg == "-h" || arg == "--help" {
                println!("{USAGE}");
                return Ok(None);
            }
            let value = args
                .next()
                .with_context(|| format!("{arg} needs a value\n{USAGE}"))?;
            match arg.as_str() {
                "--parties" => options.parties = parse_count(&arg, &value)?,
                "--rows" => options.rows = parse_count(&arg, &value)?,
                "--features" => options.features = parse_count(&arg, &value)?,
                "--bins" => options.bins = parse_count(&arg, &value)?,
                "--rounds" => options.rounds = parse_count(&arg, &value)?,
                "--scheme" => options.scheme = value.parse()?,
                "--seed" => {
                    options.seed = value
                        .parse()
                        .with_context(|| format!("invalid --seed {value}"))?;
                }
                _ => bail!("Unknown arg: {arg}\n{USAGE}"),
            }
        }

        if options.parties < 2 {
            bail!("--parties must be at least 2 (one label holder, one feature holder)");
        }
        if options.rows > i32::MAX as usize {
            bail!("--rows must fit in a 32-bit row index");
        }
        Ok(Some(options))
    }
}

fn parse_count(arg: &str, value: &str) -> Result<usize> {
    let n: usize = value
        .parse()
        .with_context(|| format!("invalid {arg} {value}"))?;
    if n == 0 {
        bail!("{arg} must be positive");
    }
    Ok(n)
}

/// Quantization layout of one party.
struct Layout {
    cuts: Vec<u32>,
    slots: Vec<i32>,
}

impl Layout {
    fn random(rng: &mut ChaCha8Rng, rows: usize, features: usize, bins: usize) -> Result<Self> {
        let cuts = (0..=features)
            .map(|f| u32::try_from(f * bins))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("--features x --bins overflows the bin index")?;

        let mut slots = Vec::with_capacity(rows * features);
        for _ in 0..rows {
            for &offset in &cuts[..features] {
                if rng.gen_bool(MISSING_RATE) {
                    slots.push(-1);
                } else {
                    let bin = offset + rng.gen_range(0..bins as u32);
                    slots.push(i32::try_from(bin).context("bin index overflows i32")?);
                }
            }
        }
        Ok(Self { cuts, slots })
    }

    fn total_bins(&self) -> usize {
        self.cuts.last().copied().unwrap_or(0) as usize
    }

    /// Per-node histograms computed directly, node-major.
    fn histograms(&self, nodes: &NodePartition, gh: &[f64]) -> Vec<f64> {
        let n_features = self.cuts.len() - 1;
        let total_bins = self.total_bins();
        let mut out = Vec::with_capacity(nodes.len() * 2 * total_bins);

        for rows in nodes.values() {
            let mut hist = vec![0.0; 2 * total_bins];
            for &row in rows {
                let row = row as usize;
                for &slot in &self.slots[row * n_features..(row + 1) * n_features] {
                    if let Ok(bin) = usize::try_from(slot) {
                        hist[2 * bin] += gh[2 * row];
                        hist[2 * bin + 1] += gh[2 * row + 1];
                    }
                }
            }
            out.extend(hist);
        }
        out
    }
}

#[derive(serde::Serialize)]
struct PartySummary {
    party: usize,
    role: &'static str,
    diagnostics: SessionDiagnostics,
    buffers: LedgerStats,
}

#[derive(serde::Serialize)]
struct Summary {
    scheme: SchemeKind,
    parties: usize,
    rows: usize,
    features: usize,
    bins: usize,
    rounds: usize,
    aggregation_max_abs_error: f64,
    histogram_max_abs_error: f64,
    party_summaries: Vec<PartySummary>,
}

fn max_abs_error(actual: &[f64], expected: &[f64]) -> Result<f64> {
    if actual.len() != expected.len() {
        bail!(
            "decoded {} values, expected {}",
            actual.len(),
            expected.len()
        );
    }
    Ok(actual
        .iter()
        .zip(expected)
        .map(|(a, e)| (a - e).abs())
        .fold(0.0, f64::max))
}

fn session_params(scheme: SchemeKind) -> Params {
    let mut params = Params::new();
    params.insert(SCHEME_KEY.to_string(), scheme.as_str().to_string());

    if scheme == SchemeKind::AesGcm {
        if std::env::var(PASSPHRASE_ENV).is_err() {
            let mut secret = Zeroizing::new([0u8; 32]);
            OsRng.fill_bytes(&mut secret[..]);
            params.insert(
                PASSPHRASE_KEY.to_string(),
                general_purpose::STANDARD.encode(&secret[..]),
            );
        }
        params.insert(SALT_KEY.to_string(), generate_salt());
    }
    params
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout carries the JSON summary, so logs default to stderr.
    let log_mode = std::env::var("HISTOSEAL_LOG_MODE").unwrap_or_else(|_| "auto".to_string());

    let (writer, guard) = match log_mode.as_str() {
        "file" => {
            let log_file = std::env::var("HISTOSEAL_LOG_FILE")
                .unwrap_or_else(|_| "histoseal.log".to_string());

            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                // Best-effort: don't fail startup just because the directory is missing.
                let _ = std::fs::create_dir_all(parent);
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .with_context(|| format!("cannot open log file {log_file}"))?;
            tracing_appender::non_blocking(file)
        }
        "stdout" => tracing_appender::non_blocking(std::io::stdout()),
        // auto / stderr
        _ => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let Some(options) = Options::parse()? else {
        return Ok(());
    };
    let _guard = init_logging()?;

    tracing::info!(
        parties = options.parties,
        rows = options.rows,
        scheme = %options.scheme,
        "Starting secure aggregation rehearsal"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let params = session_params(options.scheme);
    let config = ProcessorConfig::from_params(&params)?;

    // Party 0 holds the labels; every other party holds features.
    let mut layouts = Vec::with_capacity(options.parties);
    let mut processors = Vec::with_capacity(options.parties);
    for party in 0..options.parties {
        let layout = Layout::random(&mut rng, options.rows, options.features, options.bins)?;
        let mut processor = SecureProcessor::new();
        processor
            .initialize(true, params.clone())
            .with_context(|| format!("party {party}: initialize"))?;
        processor.init_aggregation_context(&layout.cuts, &layout.slots)?;
        layouts.push(layout);
        processors.push(processor);
    }

    // The label holder answers each feature holder separately.
    let mut responders = (1..options.parties)
        .map(|_| build_scheme(&config).map(HistogramAggregator::new))
        .collect::<histoseal::Result<Vec<_>>>()?;
    let merger = HistogramAggregator::new(build_scheme(&config)?);

    let mut aggregation_error: f64 = 0.0;
    let mut histogram_error: f64 = 0.0;

    for round in 0..options.rounds {
        let _span = tracing::info_span!("round", round).entered();

        let gh: Vec<f64> = (0..options.rows)
            .flat_map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(0.0..1.0)])
            .collect();

        let (label, feature_holders) = processors
            .split_first_mut()
            .context("no parties")?;
        let broadcast = label.process_gh_pairs(&gh)?;
        for holder in feature_holders.iter_mut() {
            let decoded = holder.handle_gh_pairs(broadcast.as_bytes())?;
            holder.free_buffer(decoded);
        }
        label.free_buffer(broadcast);

        // Row-level aggregation: each feature holder asks the label holder.
        for (i, holder) in feature_holders.iter_mut().enumerate() {
            let mut nodes = NodePartition::new();
            for row in 0..options.rows {
                let node = rng.gen_range(0..3) * 2 + 1;
                nodes.entry(node).or_default().push(row as i32);
            }

            let request = holder.process_aggregation(&nodes)?;
            let response = responders[i].respond(request.as_bytes())?;
            holder.free_buffer(request);

            let sums = holder.handle_aggregation(&response)?;
            let expected = layouts[i + 1].histograms(&nodes, &gh);
            aggregation_error = aggregation_error.max(max_abs_error(&sums, &expected)?);
        }

        // Whole-histogram path: every party contributes, everyone decodes.
        let mut gathered = Vec::new();
        let mut expected = vec![0.0; 2 * layouts[0].total_bins()];
        for processor in &mut processors {
            let local: Vec<f64> = expected.iter().map(|_| rng.gen_range(0.0..1.0)).collect();
            for (e, v) in expected.iter_mut().zip(&local) {
                *e += v;
            }
            let encoded = processor.process_histograms(&local)?;
            gathered.extend_from_slice(encoded.as_bytes());
            processor.free_buffer(encoded);
        }

        let merged = merger.merge_histograms(&gathered)?;
        for processor in &mut processors {
            let values = processor.handle_histograms(&merged)?;
            histogram_error = histogram_error.max(max_abs_error(&values, &expected)?);
        }

        tracing::info!(aggregation_error, histogram_error, "Round complete");
    }

    let mut party_summaries = Vec::with_capacity(processors.len());
    for (party, processor) in processors.iter_mut().enumerate() {
        processor.shutdown();
        party_summaries.push(PartySummary {
            party,
            role: if party == 0 { "label" } else { "features" },
            diagnostics: processor.diagnostics(),
            buffers: processor.buffer_stats(),
        });
    }

    let leaked: usize = party_summaries.iter().map(|p| p.buffers.outstanding).sum();
    if leaked > 0 {
        tracing::warn!(leaked, "Buffers were not released");
    }

    let summary = Summary {
        scheme: options.scheme,
        parties: options.parties,
        rows: options.rows,
        features: options.features,
        bins: options.bins,
        rounds: options.rounds,
        aggregation_max_abs_error: aggregation_error,
        histogram_max_abs_error: histogram_error,
        party_summaries,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!("Rehearsal complete.");
    Ok(())
}
