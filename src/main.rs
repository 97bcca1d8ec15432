// src/main.rs

use exmake::{cli, logging};

#[tokio::main]
async fn main() {
    let args = match cli::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logging::init_logging(args.loud) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    std::process::exit(exmake::run(args).await);
}
