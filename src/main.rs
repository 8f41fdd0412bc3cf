use std::io::{BufRead, Write};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use clap::Parser;

use touchwatch::*;

#[derive(Parser, Debug)]
#[command(about = "Camera-based touch detector with an audio alarm")]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "touchwatch.yaml")]
    config: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    log::info!(
        "starting camera {} ({}x{} @ {} fps)",
        config.camera.input,
        config.camera.width,
        config.camera.height,
        config.camera.fps
    );
    let camera: Arc<dyn FrameSource> =
        Arc::new(Camera::start(&config.camera).context("starting camera")?);

    log::info!("loading embedding model {}", config.model.path);
    let embedder: Arc<dyn Embedder> = Arc::new(
        OnnxEmbedder::load(&config.model, config.camera.width, config.camera.height)
            .context("loading embedding model")?,
    );

    let classifier: Arc<Mutex<dyn Classifier>> = Arc::new(Mutex::new(Knn::default()));
    let cue = Cue::start(&config.cue).context("starting cue player")?;
    let busy = Busy::new();

    let trainer = Trainer::new(
        &config.training,
        camera.clone(),
        embedder.clone(),
        classifier.clone(),
        busy.clone(),
    );

    println!(
        "touchwatch ready; labels: {} (active: {})",
        label_list(&config.labels),
        config.detection.active_label
    );
    print_help();

    let mut detector: Option<Detector> = None;
    let mut printer: Option<thread::JoinHandle<()>> = None;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("train") => {
                let Some(name) = parts.next() else {
                    println!("usage: train <label>");
                    continue;
                };
                let label = Label::new(name);
                if !config.labels.contains(&label) {
                    println!(
                        "unknown label {:?} (configured: {})",
                        name,
                        label_list(&config.labels)
                    );
                    continue;
                }

                match trainer.run_batch(&label, |done, total| {
                    print!("\rtraining {}: {}%", name, done * 100 / total);
                    std::io::stdout().flush().ok();
                }) {
                    Ok(()) => println!("\ntraining done for {:?}", name),
                    Err(e) => println!("\ntraining failed: {}", e),
                }
            }

            Some("run") => {
                if detector.as_ref().map(Detector::is_running).unwrap_or(false) {
                    println!("detector already running, stop it first");
                    continue;
                }
                // Join any halted session before starting over.
                detector = None;
                if let Some(hnd) = printer.take() {
                    hnd.join().ok();
                }

                match Detector::start(
                    &config.detection,
                    camera.clone(),
                    embedder.clone(),
                    classifier.clone(),
                    cue.requests(),
                    &busy,
                ) {
                    Ok(mut started) => {
                        let verdicts = started.take_receiver().unwrap();
                        printer = Some(thread::spawn(move || print_verdicts(verdicts)));
                        detector = Some(started);
                        println!("detector running");
                    }
                    Err(e) => println!("failed to start detector: {}", e),
                }
            }

            Some("stop") => {
                match detector.take() {
                    Some(mut running) => {
                        running.stop();
                        println!("detector stopped");
                    }
                    None => println!("detector is not running"),
                }
                if let Some(hnd) = printer.take() {
                    hnd.join().ok();
                }
            }

            Some("status") => {
                let counts = classifier.lock().unwrap().counts();
                if counts.is_empty() {
                    println!("no examples trained yet");
                } else {
                    for (label, n) in counts {
                        println!("  {}: {} examples", label, n);
                    }
                }
                let running = detector.as_ref().map(Detector::is_running).unwrap_or(false);
                println!(
                    "detector: {}",
                    if running { "running" } else { "stopped" }
                );
            }

            Some("labels") => {
                println!(
                    "labels: {} (active: {}, threshold: {})",
                    label_list(&config.labels),
                    config.detection.active_label,
                    config.detection.threshold
                );
            }

            Some("help") => print_help(),

            Some("quit") | Some("exit") => break,

            Some(other) => println!("unknown command {:?}, try help", other),

            None => {}
        }
    }

    Ok(())
}

fn label_list(labels: &[Label]) -> String {
    labels
        .iter()
        .map(Label::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_help() {
    println!("commands:");
    println!("  train <label>   capture a training batch for <label>");
    println!("  run             start the detection loop");
    println!("  stop            stop the detection loop");
    println!("  status          show example counts and loop state");
    println!("  labels          show configured labels");
    println!("  quit            exit");
}

/// Prints verdict transitions until the loop ends.
fn print_verdicts(verdicts: Receiver<Verdict>) {
    let mut last_active = None;
    for verdict in verdicts {
        if last_active != Some(verdict.active) {
            if verdict.active {
                println!("[{}] ACTIVE ({:.2})", verdict.label, verdict.confidence);
            } else {
                println!("[{}] clear ({:.2})", verdict.label, verdict.confidence);
            }
            last_active = Some(verdict.active);
        }
    }
}
