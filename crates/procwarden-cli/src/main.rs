// procwarden CLI entry point

use clap::Parser;
use procwarden_cli::logging::{init_logging, VerbosityLevel};
use procwarden_cli::output::OutputStyle;
use procwarden_cli::{commands, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbosity = init_logging(cli.verbose, cli.quiet);
    let style = OutputStyle::default();

    let code = match commands::dispatch(cli.command, &style).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style.error(&e.user_message()));
            if verbosity == VerbosityLevel::Verbose {
                eprintln!("{}", e.technical_details());
            }
            1
        }
    };

    std::process::exit(code);
}
