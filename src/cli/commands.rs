use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "convlog")]
#[command(author, version, about = "Conversation logging and caching for LLM agents", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to config/$CONFIG_ENV)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a single conversation turn
    Log {
        #[arg(short, long)]
        session: String,

        #[arg(short, long)]
        message: String,

        #[arg(short, long)]
        response: String,

        #[arg(short = 'k', long)]
        skill: Option<String>,

        /// Processing time in seconds
        #[arg(short = 't', long)]
        processing_time: Option<f64>,

        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Show the most recent turns of a session
    History {
        session: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show a session's aggregate summary
    Summary { session: String },

    /// Show global statistics
    Stats {
        /// Only count turns from the last N days
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Show one conversation by id
    Show { conversation_id: String },

    /// Log a canned greeting turn under a fresh session
    TestLog,

    /// Log turns from a JSON-lines file
    Import {
        file: String,

        #[arg(short, long, default_value = "5")]
        concurrency: usize,
    },
}
