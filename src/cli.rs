use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "pshost", about = "Run a fixed PowerShell pipeline through an embedded host", version)]
pub struct Cli {
    /// Engine executable (auto|pwsh|powershell|<path>). Overrides PSHOST_ENGINE.
    #[arg(long)]
    pub engine: Option<String>,

    /// Exit without waiting for a key press.
    #[arg(long = "no-wait")]
    pub no_wait: bool,

    /// Print the script the engine would run and exit.
    #[arg(long = "print-script")]
    pub print_script: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
