use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use facelabel::{
    ApplicationState, Config, ConsoleLabelSink, FaceApiClient, FileImageSource, Point3,
    RecognitionPipeline, RunOutcome, SharedApplicationState,
};

const TIP_TEXT: &str = "Point the camera at a person; each image is analysed in turn.";

struct Args {
    config_path: Option<PathBuf>,
    images: Vec<PathBuf>,
    anchor: Point3,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: None,
        images: Vec::new(),
        anchor: Point3::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facelabel {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                parsed.config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--image" | "-i" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--image requires a path argument");
                };
                parsed.images.push(PathBuf::from(value));
                i += 1;
            }
            "--anchor" | "-a" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--anchor requires x,y,z");
                };
                parsed.anchor = value.parse().map_err(anyhow::Error::msg)?;
                i += 1;
            }
            other => {
                print_help();
                bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    if parsed.images.is_empty() {
        print_help();
        bail!("at least one --image is required");
    }

    Ok(parsed)
}

fn print_help() {
    println!(
        r#"facelabel - label faces in captured images with registered names

USAGE:
    facelabel --image PATH [--image PATH ...] [OPTIONS]

OPTIONS:
    --image, -i PATH    Captured image to analyse (repeatable, run in order)
    --anchor, -a X,Y,Z  Label anchor position (default 0,0,0)
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACELABEL_CONFIG               Path to config file (overrides default location)
    FACELABEL_SUBSCRIPTION_KEY     Face service subscription key
    FACELABEL_LOG                  Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facelabel/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = facelabel::logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let client = FaceApiClient::from_config(&config.service)?;
    let sink = Arc::new(ConsoleLabelSink::stdout());
    let pipeline = RecognitionPipeline::from_config(client, sink, &config);

    let app_state = SharedApplicationState::new(ApplicationState::TipPanelState);
    println!("{}", TIP_TEXT);
    app_state.set(ApplicationState::FaceRecognitionState);

    let mut failures = 0;
    for image in &args.images {
        let source = FileImageSource::new(image);
        tracing::info!(path = %image.display(), "Starting recognition");

        match pipeline.run(&source, args.anchor).await {
            RunOutcome::Finished(report) if report.is_success() => {}
            RunOutcome::Finished(_) | RunOutcome::Busy => failures += 1,
        }
    }

    app_state.set(ApplicationState::TipPanelState);

    if failures > 0 {
        bail!("{} of {} images were not fully recognised", failures, args.images.len());
    }
    Ok(())
}
