use super::Parser;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", about = "Authentication and session service")]
pub struct Cli {
    /// Path to a settings TOML file.
    #[arg(long)]
    pub settings: Option<String>,
}
