// diffctl: operator tool for the sqldbdiff metadata store. Inspects task and
// chunk state and clears the failed-record log that blocks a rerun.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use sqldbdiff::meta::MetaStore;
use sqldbdiff::{logger, Result, DIFF_MODE};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Metadata store database file.
    #[arg(long, default_value = "sqldbdiff_meta.db")]
    meta: PathBuf,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List wait and part tables for a schema.
    Tasks {
        #[arg(long)]
        schema: String,
        #[arg(long, default_value = DIFF_MODE)]
        mode: String,
    },
    /// List surviving chunks for one table.
    Chunks {
        #[arg(long)]
        schema: String,
        #[arg(long)]
        table: String,
    },
    /// Show or clear failed records in the error log.
    Errors {
        #[arg(long)]
        schema: String,
        #[arg(long, default_value = DIFF_MODE)]
        mode: String,
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> Result<()> {
    if std::env::args().len() == 1 {
        Args::command().print_help()?;
        eprintln!();
        std::process::exit(1);
    }
    let args = Args::parse();
    logger::set_debug(args.debug);

    let store = MetaStore::open(&args.meta)?;
    match args.command {
        Command::Tasks { schema, mode } => {
            let schema = schema.to_uppercase();
            let wait = store.list_wait(&schema, &mode)?;
            let part = store.list_part(&schema, &mode)?;
            println!("wait ({}):", wait.len());
            for t in wait {
                println!("  {}", t);
            }
            println!("part ({}):", part.len());
            for t in part {
                println!("  {}", t);
            }
        }
        Command::Chunks { schema, table } => {
            let chunks = store.list_chunks(&schema.to_uppercase(), &table.to_uppercase())?;
            for c in &chunks {
                println!("{}", c.describe());
            }
            println!("total: {}", chunks.len());
        }
        Command::Errors {
            schema,
            mode,
            clear,
        } => {
            let schema = schema.to_uppercase();
            if clear {
                let n = store.clear_errors(&schema, &mode)?;
                println!("cleared {} records from table_error_detail", n);
            } else {
                for r in store.list_errors(&schema, &mode)? {
                    println!("{} [{}] {} ({})", r.table, r.info_source, r.error, r.created_at);
                }
                println!("failed total: {}", store.count_errors(&schema, &mode)?);
            }
        }
    }
    Ok(())
}
