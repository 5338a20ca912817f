use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, error::ErrorKind};

use crate::agreement::{AgreementReport, write_disagreements_csv};
use crate::balance::{balance_by_feature, write_balanced};
use crate::config::LedgerConfig;
use crate::constants::balance::DEFAULT_FEATURE;
use crate::log::LogStore;
use crate::rating::Metric;
use crate::reconcile::ReconcileOptions;
use crate::scheduler::ScheduleOutcome;
use crate::session::Session;
use crate::sheet::{LocalCsvSheets, PacingConfig, SheetClient};
use crate::source::{Corpus, CorpusSource, CsvCorpusSource};
use crate::types::RaterId;

#[derive(Debug, Parser)]
#[command(
    name = "rater_ledger",
    disable_help_subcommand = true,
    about = "Allocate conversations to raters and track their ratings",
    long_about = "Hand out conversations to human raters through per-rater sheets, pull completed ratings back into the allocation log, and measure inter-rater agreement.",
    after_help = "Settings are read from --config (JSON) when given; individual flags override the file."
)]
/// CLI for `rater_ledger`.
///
/// Common usage:
/// - Allocate two conversations: `rater_ledger --corpus data/ schedule alice 2`
/// - Pull ratings back: `rater_ledger update alice`
/// - Agreement on every metric: `rater_ledger agreement`
struct LedgerCli {
    #[arg(
        long,
        value_name = "PATH",
        global = true,
        help = "JSON configuration file"
    )]
    config: Option<PathBuf>,
    #[arg(
        long = "corpus",
        value_name = "PATH",
        global = true,
        help = "Corpus CSV file or directory, repeat as needed in load order"
    )]
    corpus: Vec<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        global = true,
        help = "Allocation log file (or directory for the default file name)"
    )]
    log: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        global = true,
        help = "Rater registry JSON file"
    )]
    registry: Option<PathBuf>,
    #[arg(
        long = "sheets-root",
        value_name = "DIR",
        global = true,
        help = "Directory that relative sheet addresses resolve against"
    )]
    sheets_root: Option<PathBuf>,
    #[arg(long, global = true, help = "Seed of the global conversation order")]
    seed: Option<u64>,
    #[arg(
        long = "no-pacing",
        global = true,
        help = "Disable pauses between sheet requests"
    )]
    no_pacing: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate the next N conversations to a rater.
    Schedule {
        rater_id: RaterId,
        #[arg(value_name = "N")]
        n: usize,
    },
    /// Pull a rater's sheet values back into the allocation log.
    Update {
        rater_id: RaterId,
        #[arg(long = "skip-done", help = "Do not re-read rows already marked done")]
        skip_done: bool,
    },
    /// Report agreement statistics across raters.
    Agreement {
        #[arg(long, value_parser = parse_metric, help = "Single metric (default: all)")]
        metric: Option<Metric>,
        #[arg(
            long = "rater",
            value_name = "RATER_ID",
            help = "Rater to compare, repeat as needed (default: every registered rater)"
        )]
        raters: Vec<RaterId>,
    },
    /// List rows on which raters disagree.
    Disagreements {
        #[arg(long, value_parser = parse_metric)]
        metric: Metric,
        #[arg(long = "rater", value_name = "RATER_ID")]
        raters: Vec<RaterId>,
        #[arg(long, value_name = "PATH", help = "Write the table as CSV instead of printing it")]
        out: Option<PathBuf>,
    },
    /// Show allocation progress per rater.
    Status { rater_id: Option<RaterId> },
    /// Balance winning and awry conversations on a numeric feature.
    Balance {
        #[arg(long, default_value = DEFAULT_FEATURE)]
        feature: String,
        #[arg(
            long = "features",
            value_name = "PATH",
            help = "Per-conversation feature table to balance instead of the corpus (repeatable)"
        )]
        tables: Vec<PathBuf>,
        #[arg(long, value_name = "DIR", default_value = "output")]
        out: PathBuf,
    },
}

/// Run the `rater_ledger` command line with `args_iter` (program name excluded).
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let Some(cli) =
        parse_cli::<LedgerCli, _>(std::iter::once("rater_ledger".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    let config = resolve_config(&cli)?;

    if let Command::Balance {
        feature,
        tables,
        out,
    } = &cli.command
    {
        return run_balance(&config, tables, feature, out, config.seed);
    }

    let sheets = LocalCsvSheets::new(&config.sheets_root);
    let mut session = Session::from_config(&config, sheets)?;
    run_session_command(&mut session, cli.command)
}

fn resolve_config(cli: &LedgerCli) -> Result<LedgerConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_json_file(path)?,
        None => LedgerConfig::default(),
    };
    if !cli.corpus.is_empty() {
        config.corpus = cli.corpus.clone();
    }
    if let Some(log) = &cli.log {
        config.log = log.clone();
    }
    if let Some(registry) = &cli.registry {
        config.registry = registry.clone();
    }
    if let Some(root) = &cli.sheets_root {
        config.sheets_root = root.clone();
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.no_pacing {
        config.pacing = PacingConfig::unpaced();
    }
    Ok(config)
}

fn run_session_command<C, L>(
    session: &mut Session<C, L>,
    command: Command,
) -> Result<(), Box<dyn Error>>
where
    C: SheetClient,
    L: LogStore,
{
    match command {
        Command::Schedule { rater_id, n } => match session.schedule(&rater_id, n)? {
            ScheduleOutcome::Allocated(batch) if batch.is_empty() => {
                println!("No new conversations left for '{rater_id}'.");
            }
            ScheduleOutcome::Allocated(batch) => {
                let (first, last) = batch.row_range().unwrap_or_default();
                println!(
                    "Allocated {} conversations ({} messages) to '{}' at rows {}-{} of {}",
                    batch.conversations.len(),
                    batch.messages.len(),
                    rater_id,
                    first,
                    last,
                    batch.sheet
                );
            }
            ScheduleOutcome::Conflict {
                rater_id,
                outstanding,
            } => {
                println!(
                    "Warning: '{rater_id}' still has {outstanding} rows to rate; nothing allocated."
                );
            }
        },
        Command::Update {
            rater_id,
            skip_done,
        } => {
            let report = session.reconcile_with(&rater_id, ReconcileOptions { skip_done })?;
            println!(
                "{}: scanned={} updated={} completed={} missing={}",
                report.rater_id,
                report.scanned,
                report.updated,
                report.completed,
                report.missing.len()
            );
            for message_id in &report.missing {
                println!("  missing on sheet: {message_id}");
            }
        }
        Command::Agreement { metric, raters } => {
            let raters = resolve_raters(session, raters);
            let reports = match metric {
                Some(metric) => vec![session.compute_agreement(metric, &raters)?],
                None => session.agreement_summary(&raters)?,
            };
            print_agreement(&reports);
        }
        Command::Disagreements {
            metric,
            raters,
            out,
        } => {
            let raters = resolve_raters(session, raters);
            let disagreements = session.find_disagreements(metric, &raters)?;
            match out {
                Some(path) => {
                    write_disagreements_csv(&path, &raters, &disagreements)?;
                    println!(
                        "Wrote {} disagreements on {} to {}",
                        disagreements.len(),
                        metric,
                        path.display()
                    );
                }
                None => {
                    println!("--- {metric}: {} disagreements ---", disagreements.len());
                    for disagreement in &disagreements {
                        println!(
                            "row {} [{}] {}",
                            disagreement.row, disagreement.message_id, disagreement.text
                        );
                        for (rater, label) in &disagreement.labels {
                            let label = if label.is_empty() { "<blank>" } else { label };
                            println!("  - {rater}: {label}");
                        }
                    }
                }
            }
        }
        Command::Status { rater_id } => {
            if let Some(rater) = &rater_id {
                session.sheet_for(rater)?;
            }
            println!("--- allocation status ---");
            for (rater, progress) in session.progress() {
                if rater_id.as_ref().is_some_and(|wanted| *wanted != rater) {
                    continue;
                }
                println!(
                    "{rater}: conversations={} allocated={} done={}",
                    progress.conversations, progress.allocated, progress.done
                );
            }
        }
        Command::Balance { .. } => {}
    }
    Ok(())
}

fn run_balance(
    config: &LedgerConfig,
    tables: &[PathBuf],
    feature: &str,
    out: &Path,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let sources: Vec<CsvCorpusSource> = if tables.is_empty() {
        config.validate()?;
        config.corpus.iter().map(CsvCorpusSource::new).collect()
    } else {
        tables
            .iter()
            .map(|path| CsvCorpusSource::new(path).feature_table())
            .collect()
    };
    let sources: Vec<&dyn CorpusSource> = sources
        .iter()
        .map(|source| source as &dyn CorpusSource)
        .collect();
    let corpus = Corpus::load(&sources)?;
    let sample = balance_by_feature(&corpus, feature, seed)?;
    write_balanced(out, &sample)?;
    let (winning, awry) = sample.summaries();
    println!(
        "Balanced '{}': {} winning / {} awry conversations (skipped {})",
        sample.feature,
        sample.winning.len(),
        sample.awry.len(),
        sample.skipped
    );
    for (name, stats) in [("winning", winning), ("awry", awry)] {
        if let Some(stats) = stats {
            println!(
                "  {name}: mean={:.3} median={} min={} max={}",
                stats.mean, stats.median, stats.min, stats.max
            );
        }
    }
    println!("Wrote results to {}", out.display());
    Ok(())
}

fn resolve_raters<C: SheetClient, L: LogStore>(
    session: &Session<C, L>,
    raters: Vec<RaterId>,
) -> Vec<RaterId> {
    if raters.is_empty() {
        session.registry().raters().cloned().collect()
    } else {
        raters
    }
}

fn print_agreement(reports: &[AgreementReport]) {
    let Some(first) = reports.first() else {
        return;
    };
    println!(
        "--- agreement over rows {}-{} ({} raters) ---",
        first.first_row,
        first.last_row,
        first.raters.len()
    );
    for report in reports {
        println!(
            "{}: observed={} unanimous={} fleiss={} cohen={}",
            report.metric,
            format_stat(report.observed),
            format_stat(report.unanimous),
            format_stat(report.fleiss_kappa),
            format_stat(report.cohen_kappa)
        );
    }
}

fn format_stat(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.4}"))
        .unwrap_or_else(|| "undefined".to_string())
}

fn parse_metric(raw: &str) -> Result<Metric, String> {
    raw.parse::<Metric>().map_err(|err| err.to_string())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
