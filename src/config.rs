use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::export::ExportFormat;
use crate::models::MissingPlayerPolicy;
use crate::pipeline::ChatExtractor;
use crate::player::ExternalPlayerFactory;

pub const DEFAULT_BACKEND: &str = "wows-replay-events";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 64;

/// World of Warships replay chat viewer
#[derive(Parser, Debug)]
#[command(name = "wowschat", version, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the web viewer (default)
    Serve(ServeOptions),
    /// Extract the chat log of one replay without starting the viewer
    Extract {
        /// Path to the .wowsreplay file
        file: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Text)]
        format: ExportFormat,
        /// Output file or directory (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve(ServeOptions::default())
    }
}

/// How replays get decoded
#[derive(Args, Debug, Clone)]
pub struct BackendOptions {
    /// Replay backend program that decodes battle payloads
    #[arg(long, env = "WOWSCHAT_BACKEND", default_value = DEFAULT_BACKEND, global = true)]
    pub backend: String,

    /// Extra argument passed to the backend before --version (repeatable)
    #[arg(long = "backend-arg", value_name = "ARG", allow_hyphen_values = true, global = true)]
    pub backend_args: Vec<String>,

    /// What to do with messages from players missing in the post-battle roster
    #[arg(long, value_enum, default_value_t = MissingPlayerPolicy::Drop, global = true)]
    pub missing_players: MissingPlayerPolicy,

    /// Directory for temporary replay copies (system temp dir when omitted)
    #[arg(long, global = true)]
    pub temp_dir: Option<PathBuf>,
}

impl BackendOptions {
    pub fn extractor(&self) -> ChatExtractor {
        let factory = ExternalPlayerFactory {
            program: self.backend.clone(),
            args: self.backend_args.clone(),
        };
        ChatExtractor::new(Arc::new(factory), self.missing_players)
            .with_temp_dir(self.temp_dir.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeOptions {
    /// Port for the web viewer
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    pub max_upload_mb: usize,

    /// Do not open the browser on start
    #[arg(long)]
    pub no_browser: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            no_browser: false,
        }
    }
}

impl ServeOptions {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Browser URL; wildcard binds are reached through localhost
    pub fn url(&self) -> String {
        let host = match self.bind.as_str() {
            "0.0.0.0" | "::" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}
