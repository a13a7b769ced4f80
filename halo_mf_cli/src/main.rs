use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use halo_mf::{
    AbundanceForm, MassFunction, MassFunctionRow, ModelConfig, PowerLawCosmology, ShethTormen,
    Tinker,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Halo mass function and bias tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tabulate mass, nu, f(nu) and bias(nu) over the model's mass grid
    Table(TableArgs),
    /// Evaluate the model at individual masses or nu values
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// JSON model configuration (halo, tinker, cosmology, redshift, ...)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Abundance form
    #[arg(long, value_enum, default_value_t = ModelOpt::ShethTormen)]
    model: ModelOpt,

    /// Override the configured redshift
    #[arg(long)]
    redshift: Option<f64>,

    /// Enable debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct TableArgs {
    #[command(flatten)]
    common: ModelArgs,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "mass_function.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Table format
    #[arg(long, value_enum, default_value_t = FormatOpt::Text)]
    format: FormatOpt,
}

#[derive(Parser, Debug)]
struct QueryArgs {
    #[command(flatten)]
    common: ModelArgs,

    /// Halo mass in M_sun (repeatable)
    #[arg(long = "mass")]
    masses: Vec<f64>,

    /// Peak height nu (repeatable)
    #[arg(long = "nu")]
    nus: Vec<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModelOpt {
    ShethTormen,
    Tinker,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatOpt {
    Text,
    Csv,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Table(args) => args.common.verbose,
        Command::Query(args) => args.common.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Table(args) => handle_table(args),
        Command::Query(args) => handle_query(args),
    }
}

fn load_config(args: &ModelArgs) -> Result<ModelConfig> {
    let mut config = match &args.config {
        Some(path) => ModelConfig::from_path(path)
            .with_context(|| format!("failed to load model config {}", path.display()))?,
        None => ModelConfig::default(),
    };
    if let Some(z) = args.redshift {
        config.options.redshift = z;
    }
    config
        .cosmology
        .validate()
        .context("invalid cosmology in model config")?;
    debug!(?config, "model configuration");
    Ok(config)
}

fn build_model<F: AbundanceForm>(
    config: &ModelConfig,
    form: F,
) -> Result<MassFunction<PowerLawCosmology, F>> {
    let name = form.name();
    MassFunction::with_options(config.cosmology, form, &config.halo, &config.options)
        .with_context(|| format!("failed to build {name} mass function"))
}

fn handle_table(args: TableArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    match args.common.model {
        ModelOpt::ShethTormen => write_table(&build_model(&config, ShethTormen)?, &args),
        ModelOpt::Tinker => write_table(&build_model(&config, Tinker::new(config.tinker))?, &args),
    }
}

fn write_table<F: AbundanceForm>(
    model: &MassFunction<PowerLawCosmology, F>,
    args: &TableArgs,
) -> Result<()> {
    if is_stdout(&args.output) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        emit_table(model, args.format, &mut handle, &mut io::stderr())?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = BufWriter::new(file);
        emit_table(model, args.format, &mut writer, &mut io::stdout())
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!(path = %args.output.display(), "table written");
    }
    Ok(())
}

/// Summary line first, then the table.
fn emit_table<F: AbundanceForm, W: Write, S: Write>(
    model: &MassFunction<PowerLawCosmology, F>,
    format: FormatOpt,
    table: &mut W,
    summary: &mut S,
) -> Result<()> {
    writeln!(summary, "{}", model.summary_line())?;
    summary.flush()?;
    write_format(model, format, table)?;
    table.flush()?;
    Ok(())
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn write_format<F: AbundanceForm, W: Write>(
    model: &MassFunction<PowerLawCosmology, F>,
    format: FormatOpt,
    writer: &mut W,
) -> Result<()> {
    match format {
        FormatOpt::Text => model.write_to(writer)?,
        FormatOpt::Csv => write_csv_rows(&model.rows()?, writer)?,
        FormatOpt::Json => {
            serde_json::to_writer_pretty(&mut *writer, &model.rows()?)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn write_csv_rows<W: Write>(rows: &[MassFunctionRow], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn handle_query(args: QueryArgs) -> Result<()> {
    if args.masses.is_empty() && args.nus.is_empty() {
        return Err(anyhow!("no query points supplied; pass --mass or --nu"));
    }
    let config = load_config(&args.common)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match args.common.model {
        ModelOpt::ShethTormen => {
            query_points(&build_model(&config, ShethTormen)?, &args, &mut handle)?
        }
        ModelOpt::Tinker => query_points(
            &build_model(&config, Tinker::new(config.tinker))?,
            &args,
            &mut handle,
        )?,
    }
    handle.flush()?;
    Ok(())
}

fn query_points<F: AbundanceForm, W: Write>(
    model: &MassFunction<PowerLawCosmology, F>,
    args: &QueryArgs,
    writer: &mut W,
) -> Result<()> {
    writeln!(writer, "nu mass f_nu bias_nu")?;
    for &mass in &args.masses {
        let nu = model
            .nu(mass)
            .with_context(|| format!("mass {mass:e} is outside the model range"))?;
        write_point(model, nu, mass, writer)?;
    }
    for &nu in &args.nus {
        let mass = model
            .mass(nu)
            .with_context(|| format!("nu {nu} is outside the model range"))?;
        write_point(model, nu, mass, writer)?;
    }
    Ok(())
}

fn write_point<F: AbundanceForm, W: Write>(
    model: &MassFunction<PowerLawCosmology, F>,
    nu: f64,
    mass: f64,
    writer: &mut W,
) -> Result<()> {
    let f = model.f_nu(nu)?;
    let bias = model.bias_nu(nu)?;
    writeln!(writer, "{nu:.6} {mass:.6e} {f:.6e} {bias:.6}")?;
    Ok(())
}
