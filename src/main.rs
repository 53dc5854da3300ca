//! pgferry CLI Entry Point
//!
//! Two subcommands:
//! - `dump` - write a database, schema or single object as a SQL script,
//!   or one table as CSV/TSV
//! - `import` - replay a SQL script (or a JSON rows document) under the
//!   import policy
//!
//! The command report is one JSON envelope. It goes to stdout, except for a
//! dump written to stdout, whose report goes to stderr. Logs go to stderr.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flate2::read::GzDecoder;
use pgferry::{
    export_rows, load_with_precedence, resolve_profile, run_dump, ConnectionConfig, DelimitedFormatter, Driver,
    DumpOptions, DumpScope, DumpSink, ErrorEnvelope, ErrorMode, FerryError, ImportOptions, ImportRunner,
    ImportScope, ImportSession, InsertFormat, Metadata, ObjectKind, RunProfile, ScriptedDriver, Subject,
    SuccessEnvelope,
};
use serde::Serialize;
use tracing::Level;

/// pgferry - PostgreSQL dump and restore
#[derive(Parser)]
#[command(name = "pgferry")]
#[command(about = "Dependency-ordered PostgreSQL dumps and policy-driven imports")]
#[command(version)]
struct Cli {
    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a database, a schema or one object
    Dump(DumpArgs),

    /// Replay a dump script against a server
    Import(ImportArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// Named profile from .pgferry/config.json or ~/.config/pgferry/profiles.json
    #[arg(long)]
    profile: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    database: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Sql,
    Csv,
    Tsv,
}

#[derive(Args)]
struct DumpArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Dump this schema only (the schema of --table/--object otherwise)
    #[arg(long)]
    schema: Option<String>,

    /// Dump this table only
    #[arg(long, conflicts_with = "object")]
    table: Option<String>,

    /// Dump one object of this kind (view, function, sequence, type, ...)
    #[arg(long, requires = "name")]
    object: Option<String>,

    /// Name of the --object
    #[arg(long)]
    name: Option<String>,

    /// Oid of the --object (functions, aggregates, triggers, rules)
    #[arg(long)]
    oid: Option<String>,

    #[arg(long, value_enum, default_value = "sql")]
    format: OutputFormat,

    /// Compress the output with gzip
    #[arg(long)]
    gzip: bool,

    /// Output file (stdout when omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Drop each object before creating it
    #[arg(long)]
    clean: bool,

    #[arg(long)]
    if_not_exists: bool,

    /// Write role definitions before the schemas
    #[arg(long)]
    roles: bool,

    /// Include system roles
    #[arg(long)]
    all_roles: bool,

    #[arg(long)]
    no_comments: bool,

    #[arg(long, conflicts_with = "structure_only")]
    data_only: bool,

    #[arg(long)]
    structure_only: bool,

    /// Data statements: copy, multi or single
    #[arg(long)]
    insert_format: Option<String>,

    /// Rows per multi-row INSERT
    #[arg(long)]
    batch_size: Option<usize>,

    /// Rows per cursor fetch
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// SQL script (or JSON rows document with --json-table); `-` for stdin,
    /// `.gz` files are decompressed
    file: PathBuf,

    /// Read FILE as a JSON rows document and insert into this table
    #[arg(long)]
    json_table: Option<String>,

    /// Run against an in-memory driver and report what would execute
    #[arg(long)]
    dry_run: bool,

    /// Server version assumed by --dry-run
    #[arg(long, default_value = "14.0")]
    server_version: f64,

    /// Import level: server, database or schema
    #[arg(long, default_value = "database")]
    scope: String,

    /// Target schema of a schema-level import
    #[arg(long)]
    target_schema: Option<String>,

    #[arg(long)]
    allow_drops: bool,

    #[arg(long)]
    ownership: bool,

    #[arg(long)]
    rights: bool,

    #[arg(long)]
    roles: bool,

    #[arg(long)]
    tablespaces: bool,

    #[arg(long)]
    no_schema_create: bool,

    /// Truncate each table before its first data statement
    #[arg(long)]
    truncate: bool,

    #[arg(long)]
    no_data: bool,

    /// On a failed statement: abort or continue
    #[arg(long)]
    error_mode: Option<String>,

    /// Execute statements that change the importing role in place
    #[arg(long)]
    no_defer_self: bool,

    /// Log every statement before executing it
    #[arg(long)]
    verbose_statements: bool,

    /// Bytes read per parser chunk
    #[arg(long)]
    chunk_size: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    let (command, result) = match cli.command {
        Commands::Dump(args) => ("dump", run_dump_command(args)),
        Commands::Import(args) => ("import", run_import_command(args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let envelope = match e.downcast_ref::<FerryError>() {
                Some(err) => ErrorEnvelope::from_error(command, err),
                None => ErrorEnvelope::new(command, pgferry::ErrorInfo::new("INTERNAL_ERROR", format!("{e:#}"))),
            };
            tracing::error!(error = %format!("{e:#}"), "{command} failed");
            print_json(&mut io::stdout(), &envelope);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            let _ = writeln!(out, "{json}");
        }
        Err(e) => eprintln!("could not serialize the command report: {e}"),
    }
}

/// Profile named by `--profile`, else the registry default, else an empty one
fn load_profile(name: Option<&str>) -> pgferry::Result<RunProfile> {
    if name.is_some() {
        return resolve_profile(name);
    }
    let registry = load_with_precedence()?;
    if registry.default.is_some() {
        Ok(registry.profile(None)?.clone())
    } else {
        Ok(RunProfile::default())
    }
}

impl ConnectionArgs {
    /// Flags first, profile values for whatever the flags leave unset
    fn resolve(&self, profile: &RunProfile) -> pgferry::Result<ConnectionConfig> {
        let flags = ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        };
        Ok(flags.or(profile.resolve_connection()?))
    }
}

#[cfg(feature = "postgres")]
fn connect(config: &ConnectionConfig) -> pgferry::Result<Box<dyn Driver>> {
    Ok(Box::new(pgferry::PostgresDriver::connect(config)?))
}

#[cfg(not(feature = "postgres"))]
fn connect(_config: &ConnectionConfig) -> pgferry::Result<Box<dyn Driver>> {
    Err(FerryError::connection_failed("pgferry was built without the postgres feature"))
}

impl DumpArgs {
    fn options(&self, profile: &RunProfile) -> anyhow::Result<DumpOptions> {
        let mut options = profile.dump.clone();
        options.clean |= self.clean;
        options.if_not_exists |= self.if_not_exists;
        options.roles |= self.roles;
        options.all_roles |= self.all_roles;
        options.data_only |= self.data_only;
        options.structure_only |= self.structure_only;
        if self.no_comments {
            options.include_comments = false;
        }
        if let Some(name) = &self.insert_format {
            options.insert_format = InsertFormat::parse(name)
                .ok_or_else(|| FerryError::invalid_input(format!("unknown insert format '{name}'")))?;
        }
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size.max(1);
        }
        if self.chunk_size.is_some() {
            options.chunk_size = self.chunk_size;
        }
        Ok(options)
    }

    fn scope(&self) -> anyhow::Result<DumpScope> {
        let schema = self.schema.clone().unwrap_or_else(|| "public".to_string());
        if let Some(table) = &self.table {
            return Ok(DumpScope::Object(ObjectKind::Table, Subject::new(schema, table.as_str())));
        }
        if let Some(kind_name) = &self.object {
            let kind = ObjectKind::parse(kind_name)
                .ok_or_else(|| FerryError::invalid_input(format!("unknown object kind '{kind_name}'")))?;
            let mut subject = Subject::new(schema, self.name.clone().unwrap_or_default());
            if let Some(oid) = &self.oid {
                subject = subject.with_oid(oid.as_str());
            }
            return Ok(DumpScope::Object(kind, subject));
        }
        Ok(match &self.schema {
            Some(name) => DumpScope::Schema(name.clone()),
            None => DumpScope::Database,
        })
    }
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("could not create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

#[derive(Serialize)]
struct ExportReport {
    table: String,
    rows: u64,
}

fn run_dump_command(args: DumpArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let profile = load_profile(args.connection.profile.as_deref())?;
    let options = args.options(&profile)?;
    let config = args.connection.resolve(&profile)?;

    let mut driver = connect(&config)?;
    let version = driver.server_version();
    let mut sink = DumpSink::new(open_output(args.output.as_deref())?, args.gzip);

    let data = match args.format {
        OutputFormat::Sql => {
            let scope = args.scope()?;
            let report = run_dump(driver.as_mut(), &mut sink, options, &scope)?;
            serde_json::to_value(report)?
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let table = args
                .table
                .as_deref()
                .ok_or_else(|| FerryError::invalid_input("--format csv/tsv needs --table"))?;
            let schema = args.schema.as_deref().unwrap_or("public");
            let mut formatter = if args.format == OutputFormat::Csv {
                DelimitedFormatter::csv(&mut sink)
            } else {
                DelimitedFormatter::tsv(&mut sink)
            };
            let rows = export_rows(driver.as_mut(), schema, table, options.chunk_size, &mut formatter)?;
            formatter.into_inner()?;
            serde_json::to_value(ExportReport { table: format!("{schema}.{table}"), rows })?
        }
    };
    sink.finish()?.flush()?;

    let envelope = SuccessEnvelope::new(
        "dump",
        data,
        Metadata::new(started.elapsed().as_millis() as u64).with_server_version(version),
    );
    if args.output.is_some() {
        print_json(&mut io::stdout(), &envelope);
    } else {
        print_json(&mut io::stderr(), &envelope);
    }
    Ok(())
}

impl ImportArgs {
    fn options(&self, profile: &RunProfile) -> anyhow::Result<ImportOptions> {
        let mut options = profile.import.clone();
        options.allow_drops |= self.allow_drops;
        options.ownership |= self.ownership;
        options.rights |= self.rights;
        options.roles |= self.roles;
        options.tablespaces |= self.tablespaces;
        options.truncate |= self.truncate;
        options.verbose |= self.verbose_statements;
        if self.no_schema_create {
            options.schema_create = false;
        }
        if self.no_data {
            options.data = false;
        }
        if self.no_defer_self {
            options.defer_self = false;
        }
        if let Some(name) = &self.error_mode {
            options.error_mode = ErrorMode::parse(name)
                .ok_or_else(|| FerryError::invalid_input(format!("unknown error mode '{name}'")))?;
        }
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        Ok(options)
    }

    fn session(&self) -> anyhow::Result<ImportSession> {
        let scope = match self.scope.to_ascii_lowercase().as_str() {
            "server" => ImportScope::Server,
            "database" => ImportScope::Database,
            "schema" => ImportScope::Schema,
            other => return Err(FerryError::invalid_input(format!("unknown import scope '{other}'")).into()),
        };
        if scope == ImportScope::Schema && self.target_schema.is_none() {
            return Err(FerryError::invalid_input("--scope schema needs --target-schema").into());
        }
        Ok(ImportSession::new(scope, self.target_schema.clone()))
    }

    fn open_input(&self) -> anyhow::Result<Box<dyn Read>> {
        let reader: Box<dyn Read> = if self.file.as_os_str() == "-" {
            Box::new(io::stdin())
        } else {
            let file = File::open(&self.file).with_context(|| format!("could not open {}", self.file.display()))?;
            Box::new(BufReader::new(file))
        };
        if self.file.extension().is_some_and(|ext| ext == "gz") {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(reader)
        }
    }
}

#[derive(Serialize)]
struct DryRunReport {
    #[serde(flatten)]
    report: pgferry::ImportReport,
    /// Statements that would have been sent to the server
    would_execute: Vec<String>,
}

fn run_import_command(args: ImportArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let profile = load_profile(args.connection.profile.as_deref())?;
    let options = args.options(&profile)?;
    let session = args.session()?;
    let input = args.open_input()?;

    if args.dry_run {
        let mut driver = ScriptedDriver::new(args.server_version);
        let report = import_into(&mut driver, options, session, input, args.json_table.as_deref())?;
        let data = DryRunReport { report, would_execute: driver.executed().to_vec() };
        let envelope = SuccessEnvelope::new("import", data, Metadata::new(started.elapsed().as_millis() as u64));
        print_json(&mut io::stdout(), &envelope);
        return Ok(());
    }

    let config = args.connection.resolve(&profile)?;
    let mut driver = connect(&config)?;
    let version = driver.server_version();
    let report = import_into(driver.as_mut(), options, session, input, args.json_table.as_deref())?;

    let envelope = SuccessEnvelope::new(
        "import",
        report,
        Metadata::new(started.elapsed().as_millis() as u64).with_server_version(version),
    );
    print_json(&mut io::stdout(), &envelope);
    Ok(())
}

fn import_into(
    driver: &mut dyn Driver,
    options: ImportOptions,
    session: ImportSession,
    input: Box<dyn Read>,
    json_table: Option<&str>,
) -> pgferry::Result<pgferry::ImportReport> {
    let mut runner = ImportRunner::new(driver, options, session)?;
    match json_table {
        Some(table) => runner.import_json(input, table)?,
        None => runner.import_sql(input)?,
    }
    runner.finish()
}
