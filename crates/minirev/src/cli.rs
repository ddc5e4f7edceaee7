//! CLI surface: `minirev [-h] [-n NAME]`.

use clap::Parser;

/// Device-side daemon for a reverse port-forwarding multiplexer.
#[derive(Parser, Debug)]
#[command(name = "minirev", version, about = "Reverse port-forwarding multiplexer daemon")]
pub struct Cli {
    /// Abstract-namespace UNIX socket name the controller connects to.
    #[arg(short = 'n', long = "name", default_value = "minirev")]
    pub name: String,
}
