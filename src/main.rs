use clap::{Parser, Subcommand};
use docs_rag::Result;
use docs_rag::commands::{
    DraftArgs, ask, draft, list_documents, rebuild, search, show_config, show_status,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "A knowledge base over a remote document library for grounded answers and reply drafts")]
#[command(version)]
struct Cli {
    /// Use this configuration directory instead of the default
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
    /// Crawl the document library and rebuild the knowledge base
    Rebuild,
    /// Show the knowledge base status
    Status,
    /// List the indexed source documents
    Documents,
    /// Retrieve the chunks most relevant to a query
    Search {
        query: String,
        /// Number of chunks to retrieve
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Answer a question from the knowledge base
    Ask {
        question: String,
        /// Conversation so far, as plain text
        #[arg(long)]
        history: Option<String>,
    },
    /// Draft a reply to an incoming message read from a file or stdin
    Draft {
        /// Sender of the incoming message
        #[arg(long = "from")]
        sender: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "email")]
        platform: String,
        /// Name of the person replying
        #[arg(long)]
        name: Option<String>,
        /// Read the message body from this file instead of stdin
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// A previous message written by the user, to imitate its style. Repeatable.
        #[arg(long = "style-example")]
        style_examples: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Config { show: _, init } => {
            show_config(config_dir, init)?;
        }
        Commands::Rebuild => {
            rebuild(config_dir).await?;
        }
        Commands::Status => {
            show_status(config_dir).await?;
        }
        Commands::Documents => {
            list_documents(config_dir).await?;
        }
        Commands::Search { query, k } => {
            search(config_dir, &query, k).await?;
        }
        Commands::Ask { question, history } => {
            ask(config_dir, &question, history.as_deref()).await?;
        }
        Commands::Draft {
            sender,
            subject,
            platform,
            name,
            body_file,
            style_examples,
        } => {
            let args = DraftArgs {
                sender,
                subject,
                platform,
                user_name: name,
                body_file,
                style_files: style_examples,
            };
            draft(config_dir, args).await?;
        }
    }

    Ok(())
}
