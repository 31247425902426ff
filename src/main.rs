use clap::{Arg, Command};
use log::LevelFilter;
use mailtrace::headers::header_block;
use mailtrace::validation::{validate_detection, validate_receiving_chain};
use mailtrace::{EspDetector, EspRegistry, HeaderAnalyzer};
use serde::Serialize;
use std::io::Read;
use std::process;

#[derive(Serialize)]
struct Report {
    #[serde(flatten)]
    analysis: mailtrace::EmailAnalysis,
    chain_validation: mailtrace::ChainValidation,
    detection_validation: mailtrace::DetectionValidation,
}

fn main() {
    let matches = Command::new("mailtrace")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Email header analyzer: receiving chain reconstruction and ESP detection")
        .arg(
            Arg::new("message")
                .value_name("FILE")
                .help("Raw message or header block to analyze (stdin if omitted)"),
        )
        .arg(
            Arg::new("sender")
                .short('s')
                .long("sender")
                .value_name("ADDRESS")
                .help("Sender address (falls back to the From header)"),
        )
        .arg(
            Arg::new("esp-config")
                .long("esp-config")
                .value_name("FILE")
                .help("YAML file with additional ESP definitions"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write the built-in ESP registry as a starter YAML file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("compact")
                .long("compact")
                .help("Emit compact JSON instead of pretty-printed")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        if let Err(e) = EspRegistry::builtin().to_file(path) {
            eprintln!("Error writing ESP registry: {e}");
            process::exit(1);
        }
        println!("ESP registry written to: {path}");
        return;
    }

    let raw = match read_input(matches.get_one::<String>("message")) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error reading input: {e}");
            process::exit(1);
        }
    };

    let mut detector = match EspDetector::builtin() {
        Ok(detector) => detector,
        Err(e) => {
            eprintln!("Error building ESP detector: {e}");
            process::exit(1);
        }
    };

    if let Some(path) = matches.get_one::<String>("esp-config") {
        match EspRegistry::from_file(path) {
            Ok(registry) => {
                for definition in registry.definitions {
                    if let Err(e) = detector.add_definition(definition) {
                        eprintln!("Error loading ESP definition: {e}");
                        process::exit(1);
                    }
                }
            }
            Err(e) => {
                eprintln!("Error loading ESP config: {e}");
                process::exit(1);
            }
        }
    }

    let block = header_block(&raw);
    let sender = match matches.get_one::<String>("sender") {
        Some(sender) => sender.clone(),
        None => mailtrace::parse_headers(block)
            .first("from")
            .unwrap_or_default()
            .to_string(),
    };

    let analyzer = HeaderAnalyzer::new(detector);
    let analysis = analyzer.analyze(block, &sender);

    let report = Report {
        chain_validation: validate_receiving_chain(&analysis.receiving_chain),
        detection_validation: validate_detection(&analysis.detection),
        analysis,
    };

    let output = if matches.get_flag("compact") {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    };

    match output {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing report: {e}");
            process::exit(1);
        }
    }
}

fn read_input(path: Option<&String>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}
