//! weft benchmark driver.

mod conv;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "weft-bench")]
#[command(version, about = "weft benchmark driver", long_about = None)]
struct Cli {
    /// Benchmark iterations
    #[arg(short = 'i', long, value_parser = clap::value_parser!(i64).range(1..))]
    iter: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark convolution
    Conv(conv::ConvArgs),
}

fn main() {
    env_logger::init();

    let args = Cli::parse();

    println!("weft benchmark started...");

    let result = match args.command {
        Commands::Conv(conv_args) => conv::execute(&conv_args, args.iter),
    };

    match result {
        Ok(()) => println!("weft benchmark finished."),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
