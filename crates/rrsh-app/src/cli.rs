use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rrsh")]
#[command(version)]
#[command(about = "Reverse remote shell")]
pub struct Cli {
    /// Log extra information to standard error
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Listen for a client connection
    Server {
        /// Address (default: any) and port (default: 32254) to listen on
        #[arg(value_name = "[ADDRESS][:[PORT]]", default_value = "")]
        address: String,
        /// Keep listening after a client disconnects
        #[arg(short, long)]
        keep_open: bool,
    },
    /// Run a command and connect it to a server
    Client {
        /// Address and port (default: 32254) to connect to
        #[arg(value_name = "[ADDRESS][:[PORT]]")]
        address: String,
        /// Command to run (default: login shell)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}
