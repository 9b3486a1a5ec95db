use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{plan, run, steps};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "relpipe")]
#[command(version = VERSION)]
#[command(about = "Configurable release pipeline driven by conventional commits")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the release pipeline
    Run(run::RunArgs),
    /// Validate the pipeline and show what each step would do
    Plan(plan::PlanArgs),
    /// List the available step kinds
    Steps(steps::StepsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);

    if let Err(err) = &json_result {
        eprintln!("relpipe: {}", err.message);
    }
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("relpipe: {}", err.message);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
