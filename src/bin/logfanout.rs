use clap::Parser;
use logfanout::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::execute_serve(args).await?,
        Commands::Tail(args) => commands::execute_tail(args).await?,
    }

    Ok(())
}
