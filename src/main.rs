#[macro_use]
extern crate log;

use fhir_sequencer::app::validator::StructuralValidator;
use fhir_sequencer::app::App;
use fhir_sequencer::configuration::command_line::{LogLevel, Opt};
use fhir_sequencer::configuration::manifest::Manifest;
use fhir_sequencer::connection::callback::CallbackServer;
use fhir_sequencer::connection::BlockingClient;
use fhir_sequencer::reporter::Report;
use fhir_sequencer::sequences;
use log::LevelFilter;
use signal_hook::{iterator::Signals, SIGINT};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use std::{path::PathBuf, process::exit, thread};
use structopt::StructOpt;

fn main() {
    let options = Opt::from_args();

    if let Err(err) = init_logging(
        options.logging.unwrap_or(LogLevel::Info).into(),
        &options.log_output_file,
    ) {
        eprintln!("Failed to initialise logging: {}", err);
        exit(2);
    }

    match Signals::new(&[SIGINT]) {
        Ok(signals) => {
            thread::spawn(move || {
                for sig in signals.forever() {
                    info!("Received signal {:?}, stopping", sig);
                    exit(130);
                }
            });
        }
        Err(err) => warn!("Cannot register signal handler: {}", err),
    }

    let manifest = match Manifest::from(options.file.clone()) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to load manifest file configuration {}", e);
            exit(2);
        }
    };
    debug!("Initiated configuration {:#?}", manifest);

    match run(&options, &manifest) {
        Ok(true) => exit(0),
        Ok(false) => exit(1),
        Err(message) => {
            error!("{}", message);
            exit(2);
        }
    }
}

/// Returns whether every required test passed.
fn run(options: &Opt, manifest: &Manifest) -> Result<bool, String> {
    let registry = sequences::registry().map_err(|e| e.to_string())?;
    let client = BlockingClient::new(manifest.timeout).map_err(|e| e.to_string())?;
    let selection = manifest.selection(&options.sequence);
    let (app, completed) = App::new(
        manifest,
        registry,
        selection,
        Arc::new(client),
        Arc::new(StructuralValidator),
    )
    .map_err(|e| e.to_string())?;
    let app = Arc::new(app.with_confirmation(options.confirm));

    let server = if options.serve {
        let server = CallbackServer::start(app.clone(), manifest.callback.bind)
            .map_err(|e| format!("Cannot start callback listener: {}", e))?;
        Some(server)
    } else {
        None
    };

    app.run();

    let mut results = Vec::new();
    if server.is_some() {
        while app.pending() > 0 {
            match completed.recv_timeout(Duration::from_millis(500)) {
                Ok(result) => results.push(result),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    } else if app.pending() > 0 {
        warn!("Runs are waiting for callbacks; start with --serve to receive them");
    }
    results.extend(completed.try_iter());

    if let Some(server) = server {
        server.stop();
    }

    let report = Report::new(app.name(), results, app.coordinator().pending());
    report.log_summary();
    if let Some(path) = options.report.as_ref().or_else(|| manifest.report.as_ref()) {
        report.save_into_file(path).map_err(|e| e.to_string())?;
    }
    Ok(report.succeeded())
}

fn init_logging(level: LevelFilter, output: &Option<PathBuf>) -> Result<(), fern::InitError> {
    let mut dispatcher = fern::Dispatch::new()
        // Perform allocation-free log formatting
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}:{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record
                    .line()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "".to_owned()),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(log_file) = output {
        dispatcher = dispatcher.chain(fern::log_file(log_file)?)
    }
    dispatcher.apply()?;
    info!("Logging level {} enabled", level);
    Ok(())
}
