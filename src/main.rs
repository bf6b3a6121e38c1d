use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = tapwire::cli::Cli::parse();
    if let Err(e) = tapwire::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
