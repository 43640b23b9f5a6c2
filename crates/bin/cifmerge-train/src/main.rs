use clap::Parser;

use crate::experiment::builder::TrainBuilder;

mod experiment;
mod models;

#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
struct CliArgs {
    #[arg(short = 'c', long, value_name = "CONFIG_FILE")]
    config: String,

    /// Initial learning rate, overriding the configuration file.
    #[arg(long)]
    lr: Option<f64>,

    /// Resume from the checkpoint named in the configuration file.
    #[arg(short = 'r', long)]
    resume: bool,
}

fn main() {
    let args = CliArgs::parse();
    let start = std::time::Instant::now();
    let mut builder = TrainBuilder::new(&args.config)
        .with_learning_rate(args.lr)
        .with_resume(args.resume);
    let trainer = builder
        .build()
        .unwrap_or_else(|e| panic!("Error while preparing training: {}", e));
    let best_acc = trainer
        .run()
        .unwrap_or_else(|e| panic!("Error during training: {}", e));
    let elapsed = start.elapsed();
    println!(
        "Training finished in {} s with best test accuracy {:.2}%.",
        elapsed.as_secs(),
        best_acc
    );
}
