use clap::Parser;
use sentiment_ingest::Logger;
use sentiment_ingest::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(err) => {
            Logger::new_quiet().error(&err.to_string());
            std::process::exit(2);
        }
    };

    if let Err(err) = runner.run().await {
        Logger::new_quiet().error(&err.to_string());
        std::process::exit(1);
    }
}
