use std::path::{Path, PathBuf};
use std::process::ExitCode;

use gridexpansion::{Problem, render, synth};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USAGE: &str = "usage:
  gridexpansion <problem.json> [out_dir]
  gridexpansion demo [seed] [width] [height] [n_labels] [n_threads] [out_dir]";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let Some(first) = args.get(1) else {
        return Err(USAGE.to_string());
    };

    let (problem, out_dir, observed) = if first == "demo" {
        let seed: u64 = parse_arg(args, 2, 42)?;
        let width: usize = parse_arg(args, 3, 256)?;
        let height: usize = parse_arg(args, 4, 256)?;
        let n_labels: usize = parse_arg(args, 5, 5)?;
        let n_threads: usize = parse_arg(args, 6, 1)?;
        let out_dir = args
            .get(7)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("artifacts"));

        eprintln!(
            "Denoising {}x{} demo with seed={}, labels={}, threads={}",
            width, height, seed, n_labels, n_threads
        );
        let mut scene = synth::denoising(seed, width, height, n_labels).map_err(|e| e.to_string())?;
        scene.problem.n_threads = Some(n_threads);
        (scene.problem, out_dir, Some(scene.observed))
    } else {
        let text = std::fs::read_to_string(first).map_err(|e| format!("cannot read {}: {}", first, e))?;
        let problem = Problem::from_json(&text).map_err(|e| e.to_string())?;
        let out_dir = args
            .get(2)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("artifacts"));
        eprintln!(
            "Solving {}x{} problem with {} labels from {}",
            problem.width(),
            problem.height(),
            problem.n_labels(),
            first
        );
        (problem, out_dir, None)
    };

    std::fs::create_dir_all(&out_dir).map_err(|e| format!("cannot create {}: {}", out_dir.display(), e))?;

    let (solution, timings) = gridexpansion::solve(&problem).map_err(|e| e.to_string())?;

    eprintln!("\nTimings:");
    for t in &timings {
        eprintln!("  {:20} {:8.1} ms", t.name, t.ms);
    }
    let out = &solution.outcome;
    eprintln!(
        "\n{:?} after {} passes: energy {:.4} -> {:.4}, {} moves, {} site changes",
        out.status, out.passes, out.initial_energy, out.energy, out.accepted_moves, out.changed_sites
    );

    let labels_path = out_dir.join("labels.json");
    let json = serde_json::json!({
        "label": solution.label_columns(),
        "outcome": out,
    });
    std::fs::write(&labels_path, json.to_string())
        .map_err(|e| format!("cannot write {}: {}", labels_path.display(), e))?;
    eprintln!("Saved {}", labels_path.display());

    let (w, h) = (solution.labels.w, solution.labels.h);
    save_png(&out_dir, "labels.png", &render::render_labels(&solution.labels, solution.n_labels), w, h)?;
    save_png(&out_dir, "energy.png", &render::render_energy(&solution.site_energy), w, h)?;
    if let Some(observed) = observed {
        save_png(&out_dir, "observed.png", &render::render_intensity(&observed), w, h)?;
    }

    eprintln!("\nDone.");
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], i: usize, default: T) -> Result<T, String> {
    match args.get(i) {
        Some(s) => s.parse().map_err(|_| format!("invalid argument {}: {:?}\n{}", i, s, USAGE)),
        None => Ok(default),
    }
}

fn save_png(dir: &Path, name: &str, rgba: &[u8], w: usize, h: usize) -> Result<(), String> {
    let path = dir.join(name);
    image::save_buffer(&path, rgba, w as u32, h as u32, image::ColorType::Rgba8)
        .map_err(|e| format!("cannot save {}: {}", path.display(), e))?;
    eprintln!("Saved {}", path.display());
    Ok(())
}
