use anyhow::Result;
use av_cli::{init_tracing, Cli, Commands, Parser};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Generate(args) => args.run().await,
        Commands::Show(args) => args.run().await,
    }
}
