use clap::Parser;
use thrum_cli::{Cli, exit_codes, run};

fn main() {
    // clap exits 2 on bad usage by default; the daemon's contract is 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE
            } else {
                exit_codes::OK // --help / --version
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_codes::USAGE);
        }
    }
}
