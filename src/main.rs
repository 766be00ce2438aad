use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use flowgrid::aggregate::AggregatedBucket;
use flowgrid::config::{self, AppConfig};
use flowgrid::discovery::Discovery;
use flowgrid::event::DetectionEvent;
use flowgrid::eventlog::read_jsonl;
use flowgrid::logging;
use flowgrid::merge::GridGeometry;
use flowgrid::monitor::{Monitor, BUCKETS_FILE, EVENTS_FILE};

#[derive(Parser)]
#[command(name = "flowgrid", version)]
#[command(about = "Multi-camera people-flow monitor — MJPEG grid compositing + directional counts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover sources, start stream workers, run until Ctrl-C
    Run {
        #[arg(long)] data_dir: Option<String>,
        #[arg(long)] subnet:   Option<String>,
    },

    /// One-shot tiered sweep of the configured source ports
    Discover {
        #[arg(long)] subnet: Option<String>,
        #[arg(long)] json:   bool,
    },

    /// Show recent detection events
    Recent {
        #[arg(short, long)] slot: Option<usize>,
        #[arg(short, long, default_value = "20")] limit: usize,
        #[arg(long)] json: bool,
    },

    /// Show recent minute rollups
    Buckets {
        #[arg(short, long)] slot: Option<usize>,
        #[arg(short, long, default_value = "20")] limit: usize,
        #[arg(long)] json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut cfg = config::load_config().unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        config::default_config()
    });

    match cli.command {
        Command::Run { data_dir, subnet } => {
            if let Some(dir) = data_dir { cfg.storage.data_dir   = dir; }
            if let Some(s)   = subnet   { cfg.discovery.subnet   = Some(s); }
            print_startup_info(&cfg);

            let monitor = Monitor::new(cfg)?;
            let findings = monitor.discover_and_connect().await;
            if findings.is_empty() {
                tracing::warn!("no sources found; canvas shows placeholders until one appears");
            }

            tokio::signal::ctrl_c().await?;
            monitor.shutdown();
        }

        Command::Discover { subnet, json } => {
            if let Some(s) = subnet { cfg.discovery.subnet = Some(s); }
            let discovery = Discovery::new(cfg.sources.ports.clone(), cfg.discovery.clone());
            let findings = discovery.run(|_| {}).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&findings)?);
            } else if findings.is_empty() {
                println!("No sources found on ports {:?}.", cfg.sources.ports);
            } else {
                println!("{:<6} {:<18} {:<10} {}", "Port", "Address", "Tier", "Slot");
                println!("{}", "─".repeat(44));
                for f in &findings {
                    let slot = cfg.sources.ports.iter().position(|&p| p == f.port)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!("{:<6} {:<18} {:<10} {}", f.port, f.address, f.tier.as_str(), slot);
                }
            }
        }

        Command::Recent { slot, limit, json } => {
            let path = PathBuf::from(&cfg.storage.data_dir).join(EVENTS_FILE);
            let (mut events, malformed) = read_jsonl::<DetectionEvent>(&path)?;
            if malformed > 0 {
                tracing::warn!("skipped {} malformed lines in {}", malformed, path.display());
            }
            if let Some(s) = slot {
                events.retain(|e| e.slot == s);
            }
            let recent: Vec<_> = events.into_iter().rev().take(limit).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&recent)?);
            } else if recent.is_empty() {
                println!("No events recorded.");
            } else {
                println!("{:<20} {:<5} {:<10} {}", "Time", "Slot", "Direction", "Detection");
                println!("{}", "─".repeat(64));
                for e in &recent {
                    println!("{:<20} {:<5} {:<10} {}",
                        e.timestamp.format("%Y-%m-%dT%H:%M:%S"),
                        e.slot,
                        e.direction.map(|d| d.as_str()).unwrap_or(""),
                        e.detection_id);
                }
            }
        }

        Command::Buckets { slot, limit, json } => {
            let path = PathBuf::from(&cfg.storage.data_dir).join(BUCKETS_FILE);
            let (mut buckets, malformed) = read_jsonl::<AggregatedBucket>(&path)?;
            if malformed > 0 {
                tracing::warn!("skipped {} malformed lines in {}", malformed, path.display());
            }
            if let Some(s) = slot {
                buckets.retain(|b| b.slot == s);
            }
            let recent: Vec<_> = buckets.into_iter().rev().take(limit).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&recent)?);
            } else if recent.is_empty() {
                println!("No rollups recorded.");
            } else {
                println!("{:<20} {:<5} {:>6} {:>6} {:>8} {:>6} {:>7}",
                    "Bucket", "Slot", "Right", "Left", "Unknown", "Total", "Unique");
                println!("{}", "─".repeat(64));
                for b in &recent {
                    println!("{:<20} {:<5} {:>6} {:>6} {:>8} {:>6} {:>7}",
                        b.bucket_start.format("%Y-%m-%dT%H:%M:%S"),
                        b.slot, b.right_count, b.left_count,
                        b.unknown_count, b.total_count, b.unique_detections);
                }
            }
        }
    }
    Ok(())
}

fn print_startup_info(cfg: &AppConfig) {
    let geometry = GridGeometry::new(cfg.slot_count(), cfg.merge.cell_width, cfg.merge.cell_height);
    let (canvas_w, canvas_h) = geometry.canvas_size();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║            FLOWGRID MONITOR                              ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("  Sources:   {} slots on ports {:?}", cfg.slot_count(), cfg.sources.ports);
    println!("  Canvas:    {}x{} ({}x{} cells of {}x{})",
        canvas_w, canvas_h, geometry.cols, geometry.rows,
        cfg.merge.cell_width, cfg.merge.cell_height);
    println!("  Detector:  confidence >= {:.2}, pass every {} ms",
        cfg.detector.confidence_threshold, cfg.detector.pass_interval_millis);
    println!("  Storage:   {} (retention {} min)", cfg.storage.data_dir, cfg.storage.retention_minutes);
    println!("╚══════════════════════════════════════════════════════════╝");
}
