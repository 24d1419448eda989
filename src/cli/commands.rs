// CLI surface: thin adapters between the command line and the sheet service.
// All document mutations are local-first - they edit the state file and
// nothing else. Only `create` and `sync` talk to the remote API.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use crate::core::sheet::{
    CellValue, DataRow, FormatKind, OpKind, SheetService, SyncError,
};
use crate::infra::sheets::SheetsApiClient;
use crate::infra::state::JsonStateStore;

#[derive(Parser)]
#[command(name = "sheetsync", about = "Local-first section-based spreadsheet sync")]
pub struct Cli {
    /// Path of the JSON state file.
    #[arg(long, global = true, default_value = "sheet_state.json")]
    pub state: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new remote spreadsheet and initialize the state file.
    Create {
        /// Spreadsheet title.
        title: String,
    },
    /// Set the merged title line.
    SetTitle {
        text: String,
        /// Display style tag.
        #[arg(long, default_value = "banner")]
        style: String,
    },
    /// Append a label/value line to the summary section.
    AddSummary {
        label: String,
        value: String,
        #[arg(long, value_enum, default_value = "plain")]
        format: FormatArg,
    },
    /// Declare the data columns (must happen before any rows).
    SetHeader {
        #[arg(required = true, num_args = 1..)]
        columns: Vec<String>,
    },
    /// Append a data record as key=value pairs.
    AddRow {
        #[arg(required = true, num_args = 1..)]
        fields: Vec<String>,
    },
    /// Update matching records: --where key=value --set key=value.
    UpdateRows {
        #[arg(long = "where", required = true)]
        matches: Vec<String>,
        #[arg(long = "set", required = true)]
        sets: Vec<String>,
    },
    /// Append a footer line.
    AddFooter { text: String },
    /// Drop all data rows (required before re-declaring the header).
    ClearData,
    /// Print records matching key=value criteria.
    Find {
        #[arg(required = true, num_args = 1..)]
        criteria: Vec<String>,
    },
    /// Print document metadata and section counts.
    Show,
    /// Print the operations the next sync would send, without sending them.
    Plan,
    /// Push local changes to the remote spreadsheet.
    Sync,
    /// Print the spreadsheet URL.
    Url,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Plain,
    Currency,
    Percentage,
}

impl From<FormatArg> for FormatKind {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Plain => FormatKind::Plain,
            FormatArg::Currency => FormatKind::Currency,
            FormatArg::Percentage => FormatKind::Percentage,
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = JsonStateStore::new(&cli.state);

    if let Command::Create { title } = &cli.command {
        let api = SheetsApiClient::from_env().await?;
        let service = SheetService::create_new(&api, store, title).await?;
        println!("created {}", service.url().unwrap_or_default());
        println!("state file: {}", cli.state.display());
        return Ok(());
    }

    let mut service = SheetService::open(store).await.with_context(|| {
        format!(
            "cannot load state file {}; run `create` first",
            cli.state.display()
        )
    })?;

    match cli.command {
        Command::Create { .. } => unreachable!("handled above"),
        Command::SetTitle { text, style } => {
            service.set_title_with_style(text, style);
            service.save().await?;
        }
        Command::AddSummary {
            label,
            value,
            format,
        } => {
            service.add_summary_row(label, CellValue::infer(&value), format.into());
            service.save().await?;
        }
        Command::SetHeader { columns } => {
            service.set_header(columns)?;
            service.save().await?;
        }
        Command::AddRow { fields } => {
            service.add_data_row(parse_record(&fields)?)?;
            service.save().await?;
        }
        Command::UpdateRows { matches, sets } => {
            let touched =
                service.update_data_rows(&parse_record(&matches)?, parse_record(&sets)?)?;
            service.save().await?;
            println!("updated {} row(s)", touched);
        }
        Command::AddFooter { text } => {
            service.add_footer_line(text);
            service.save().await?;
        }
        Command::ClearData => {
            service.clear_data();
            service.save().await?;
        }
        Command::Find { criteria } => {
            let rows = service.find_data_rows(&parse_record(&criteria)?);
            if rows.is_empty() {
                println!("no matching rows");
            }
            for row in rows {
                let fields: Vec<String> = row
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect();
                println!("{}", fields.join("  "));
            }
        }
        Command::Show => {
            let stats = service.stats();
            let meta = service.document().meta();
            println!("spreadsheet: {}", service.url().unwrap_or_else(|| "(not created)".into()));
            println!("worksheet:   {}", service.document().worksheet());
            println!(
                "last synced: {}",
                meta.last_synced
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
            println!(
                "sections: {}  total rows: {}  data rows: {}",
                stats.sections, stats.total_rows, stats.data_rows
            );
        }
        Command::Plan => {
            let ops = service.pending_ops();
            if ops.is_empty() {
                println!("nothing to sync");
            }
            for op in ops {
                let verb = match op.kind {
                    OpKind::Write => "write",
                    OpKind::Clear => "clear",
                };
                println!(
                    "{:<5} {:<8} {} ({} rows)",
                    verb,
                    op.section.name(),
                    op.range.a1(),
                    op.row_count()
                );
            }
        }
        Command::Sync => {
            let api = SheetsApiClient::from_env().await?;
            match service.sync(&api).await {
                Ok(stats) => {
                    println!(
                        "synced {} section(s), {} data row(s) updated",
                        stats.sections_synced.len(),
                        stats.rows_updated
                    );
                    for (section, rows) in &stats.rows_by_section {
                        println!("  {:<8} {} rows", section, rows);
                    }
                }
                Err(SyncError::Partial {
                    confirmed,
                    attempted,
                    message,
                }) => {
                    // The confirmed prefix is already reflected in memory but
                    // deliberately not persisted; re-running `sync` resumes
                    // from the last persisted snapshot.
                    bail!(
                        "partial sync: {} of {} operations confirmed ({}); re-run `sync` to retry",
                        confirmed,
                        attempted,
                        message
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
        Command::Url => match service.url() {
            Some(url) => println!("{}", url),
            None => bail!("no spreadsheet exists yet; run `create` first"),
        },
    }

    Ok(())
}

/// Parse `key=value` tokens into a record, inferring scalar types the same
/// way the engine does.
fn parse_record(fields: &[String]) -> anyhow::Result<DataRow> {
    let mut record = DataRow::new();
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            bail!("expected key=value, got '{}'", field);
        };
        record.insert(key.to_string(), CellValue::infer(value));
    }
    Ok(record)
}
