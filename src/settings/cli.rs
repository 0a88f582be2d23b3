use super::Parser;

#[derive(Parser, Debug)]
pub struct Cli {
    /// Settings file to load instead of the build-profile default.
    #[arg(long)]
    pub settings: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}
