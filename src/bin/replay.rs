//! Offline replay of a saved optimization log.
//!
//! Prints the per-frame statistics table the UI would show during playback,
//! lists any data-quality warnings and optionally writes the final frame as
//! SVG.
//!
//! Usage: replay <log.json> [--svg out.svg]

use quantum_route_viz::iteration::ReplayLog;
use quantum_route_viz::render::{render_svg, RenderOptions};
use quantum_route_viz::stats::{self, FrameStats};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut input: Option<String> = None;
    let mut svg_out: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--svg" => {
                if i + 1 < args.len() {
                    svg_out = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: replay <log.json> [--svg out.svg]");
                println!();
                println!("Options:");
                println!("      --svg FILE   Write the final frame as SVG");
                return;
            }
            other => input = Some(other.to_string()),
        }
        i += 1;
    }

    let Some(input) = input else {
        eprintln!("Usage: replay <log.json> [--svg out.svg]");
        std::process::exit(2);
    };

    let (log, issues) = match ReplayLog::from_path(&input) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load {}: {}", input, e);
            std::process::exit(1);
        }
    };

    let frames = &log.response.iterations;
    println!("Replay: {}", input);
    println!("Scenario: {}  nodes: {}  start: {}", log.scenario, log.nodes.len(), log.start_node_id);
    println!("Summary: {}", log.response.summary);
    println!();

    println!(
        "{:>5} {:>8} {:>12} {:>12} {:>10} {:>10} {:>4}",
        "frame", "step", "current", "best", "distance", "tunnels", "T"
    );
    println!("{}", "-".repeat(67));
    for k in 0..frames.len() {
        if let Some(s) = FrameStats::at(frames, &log.nodes, k) {
            println!(
                "{:>5} {:>8} {:>12.2} {:>12.2} {:>10.2} {:>10} {:>4}",
                k,
                s.step,
                s.current_energy,
                s.best_energy,
                s.current_distance,
                s.cumulative_tunneling,
                if s.tunneling { "*" } else { "" }
            );
        }
    }
    println!();

    println!("Improvement: {:.1}%", stats::improvement_percent(frames));
    match stats::convergence_step(frames) {
        Some(step) => println!("Converged at step: {}", step),
        None => println!("Converged at step: n/a"),
    }
    println!(
        "Final: best energy {:.2}, {} iterations, {} tunneling events",
        log.response.final_result.best_energy,
        log.response.final_result.total_iterations,
        log.response.final_result.tunneling_events
    );
    println!("Explanation: {}", log.response.explanation);

    if !issues.is_empty() {
        println!();
        println!("Data-quality warnings ({}):", issues.len());
        for issue in &issues {
            match serde_json::to_string(issue) {
                Ok(json) => println!("  {}", json),
                Err(_) => println!("  {:?}", issue),
            }
        }
    }

    if let Some(path) = svg_out {
        let options = RenderOptions {
            start_node_id: Some(log.start_node_id),
            ..Default::default()
        };
        let svg = render_svg(&log.nodes, frames.last(), &options);
        if let Err(e) = std::fs::write(&path, svg) {
            eprintln!("Failed to write {}: {}", path, e);
            std::process::exit(1);
        }
        println!();
        println!("✓ Saved {}", path);
    }
}
