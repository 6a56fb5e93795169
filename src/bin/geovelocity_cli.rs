use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

use geovelocity::config::Config;
use geovelocity::detection::{DetectionPipeline, TravelClassifier};
use geovelocity::geolocation::{LocationCache, MaxMindResolver};
use geovelocity::models::LoginEvent;
use geovelocity::output::{DetectionRecord, OutputFormat, OutputHandler};
use geovelocity::persistence::{EventStore, SqliteEventStore};

/// Geovelocity command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "geovelocity", about = "Impossible-travel detection CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Run a single login through detection and print the result
    Detect {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[structopt(short, long)]
        user: String,
        #[structopt(short, long)]
        ip: String,
        /// Unix timestamp of the login; defaults to now
        #[structopt(short, long)]
        timestamp: Option<i64>,
        /// Event identifier; generated from user and timestamp if omitted
        #[structopt(short, long)]
        event_id: Option<String>,
    },
    /// Run every login in a JSON-lines file through detection, in file order
    Replay {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// File with one login event per line
        #[structopt(short, long)]
        file: PathBuf,
        /// json, jsonl or console
        #[structopt(long, default_value = "console")]
        format: String,
        /// Write results here instead of stdout
        #[structopt(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the stored logins of a user, newest first
    History {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[structopt(short, long)]
        user: String,
        #[structopt(short, long, default_value = "20")]
        limit: usize,
    },
}

fn open_store(config: &Config) -> Result<SqliteEventStore, Box<dyn std::error::Error>> {
    Ok(SqliteEventStore::new(&config.storage.database_file)?)
}

fn build_pipeline(config: &Config) -> Result<DetectionPipeline, Box<dyn std::error::Error>> {
    let resolver = MaxMindResolver::new(&config.geoip.database_path)?;
    let cache = Arc::new(LocationCache::new(Arc::new(resolver)));
    let mut pipeline = DetectionPipeline::new(cache, Arc::new(open_store(config)?))
        .with_classifier(TravelClassifier::with_threshold(config.detection.speed_threshold_mph));
    if let Some(limit) = config.detection.request_timeout() {
        pipeline = pipeline.with_timeout(limit);
    }
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Detect { config, user, ip, timestamp, event_id } => {
            let config = Config::load(&config)?;
            let pipeline = build_pipeline(&config)?;

            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let event_id = event_id.unwrap_or_else(|| format!("cli-{}-{}", user, timestamp));
            let event = LoginEvent::new(user, ip, timestamp, event_id);

            match pipeline.detect(&event).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    eprintln!("Detection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Cli::Replay { config, file, format, output } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let config = Config::load(&config)?;
            let pipeline = build_pipeline(&config)?;
            let mut handler = OutputHandler::new(OutputFormat::from_str(&format), output)?;

            let reader = BufReader::new(File::open(&file)?);
            let (mut processed, mut suspicious, mut failed) = (0usize, 0usize, 0usize);

            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: LoginEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Skipping line {}: {}", index + 1, e);
                        failed += 1;
                        continue;
                    }
                };

                processed += 1;
                match pipeline.detect(&event).await {
                    Ok(result) => {
                        if result.is_suspicious() {
                            suspicious += 1;
                        }
                        handler.write_record(&DetectionRecord {
                            event: &event,
                            result: Some(&result),
                            error: None,
                        })?;
                    }
                    Err(e) => {
                        failed += 1;
                        handler.write_record(&DetectionRecord {
                            event: &event,
                            result: None,
                            error: Some(e.to_string()),
                        })?;
                    }
                }
            }
            handler.flush()?;

            eprintln!(
                "Processed {} login(s): {} suspicious, {} failed",
                processed, suspicious, failed
            );
        }
        Cli::History { config, user, limit } => {
            let config = Config::load(&config)?;
            let store = open_store(&config)?;
            let events = store.events_for_user(&user, limit)?;

            println!("{} stored login(s) for {}:\n", events.len(), user);
            for event in &events {
                let when = chrono::DateTime::from_timestamp(event.timestamp, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| event.timestamp.to_string());
                println!(
                    "  {}  IP: {}, Location: ({:.4}, {:.4}) r={}km, Event: {}",
                    when,
                    event.ip,
                    event.location.latitude,
                    event.location.longitude,
                    event.location.accuracy_radius,
                    event.event_id
                );
            }
        }
    }

    Ok(())
}
