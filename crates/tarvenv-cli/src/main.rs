use clap::Parser;
use color_eyre::Result;
use serde_json::json;

mod cli;
mod dispatch;

use cli::TarvenvCli;
use dispatch::{dispatch, CommandOutcome, CommandStatus};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = TarvenvCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let outcome = dispatch(&cli.command)?;
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = [
        "tarvenv",
        "tarvenv_core",
        "tarvenv_sandbox",
        "tarvenv_archive",
        "tarvenv_wheel",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &TarvenvCli, outcome: &CommandOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();

    if cli.json {
        let payload = json!({
            "status": outcome.status.as_str(),
            "message": outcome.message,
            "details": outcome.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if outcome.status == CommandStatus::Ok {
        if !cli.quiet {
            println!("{}", outcome.message);
            for line in &outcome.lines {
                println!("{line}");
            }
        }
    } else {
        eprintln!("error: {}", outcome.message);
        for line in &outcome.lines {
            eprintln!("{line}");
        }
    }

    Ok(code)
}
