//! CLI module for taxrag
//!
//! Provides command-line interface parsing for the taxrag-server binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use crate::types::{AgentKind, QueryComplexity};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// taxrag - multi-agent tax research server
///
/// Plans a research query, dispatches retrieval agents in parallel, fuses
/// their evidence and streams a cited answer.
#[derive(Parser, Debug)]
#[command(
    name = "taxrag-server",
    version,
    about = "taxrag - multi-agent retrieval and synthesis for tax research",
    long_about = "Plans a research query, dispatches regulation, case law, precedent, expert\n\
                  and web search agents in parallel, fuses their evidence under a quality gate\n\
                  and streams a cited answer.\n\n\
                  Run without arguments to start the server.",
    after_help = "EXAMPLES:\n    \
                  taxrag-server                                  # Start the server (reads taxrag.toml)\n    \
                  taxrag-server --config my.toml serve           # Use a custom config file\n    \
                  taxrag-server query \"Is boot taxable in a 1031 exchange?\"\n    \
                  taxrag-server config --validate                # Check the configuration"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        default_value = "taxrag.toml",
        env = "TAXRAG_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one research query and print the answer
    Query {
        /// The research question
        text: String,

        /// Skip classification and use this complexity
        #[arg(long)]
        complexity: Option<QueryComplexity>,

        /// Restrict retrieval to these agents (comma separated)
        #[arg(long, value_delimiter = ',')]
        agents: Vec<AgentKind>,

        /// Disable the external web search agent
        #[arg(long)]
        no_web: bool,

        /// Print raw stream events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },

    /// List the agents the server would register
    Agents,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
