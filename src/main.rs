use std::error::Error;

use tracing_subscriber::EnvFilter;

use cpuprobe::app::{self, Config, OutputFormat, Report};

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}\n\n{}", app::usage());
            std::process::exit(1);
        }
    };
    if config.help {
        println!("{}", app::usage());
        return Ok(());
    }

    let dispatcher = app::dispatcher_for(&config);
    let report = Report::collect(&dispatcher, app::cpu_brand(&config.cpuinfo_path));
    match config.format {
        OutputFormat::Text => println!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CPUPROBE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
