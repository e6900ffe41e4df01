//! `trackrec` - CLI for trackrecorder
//!
//! This binary inspects the crash-recovery backup left by the recording
//! engine, replays position logs offline, and manages configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use trackrecorder::cli::{BackupCommand, Cli, Command, ConfigCommand, ReplayCommand};
use trackrecorder::replay::load_positions;
use trackrecorder::{
    init_logging, replay, BackupSnapshot, BackupStore, Config, RecoverableSession, SqliteStore,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    // Execute the command
    match cli.command {
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Backup(backup_cmd) => handle_backup(&config, &backup_cmd),
        Command::Replay(replay_cmd) => handle_replay(&config, &replay_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

/// Open the backup database, or `None` if it was never created.
fn open_store(config: &Config) -> anyhow::Result<Option<Arc<SqliteStore>>> {
    let path = config.database_path();
    if !path.exists() {
        return Ok(None);
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening backup database {}", path.display()))?;
    Ok(Some(Arc::new(store)))
}

fn open_backup(config: &Config) -> anyhow::Result<Option<BackupStore>> {
    Ok(open_store(config)?
        .map(|store| BackupStore::new(store, config.storage.backup_key.clone())))
}

fn load_snapshot(config: &Config) -> anyhow::Result<Option<BackupSnapshot>> {
    match open_backup(config)? {
        Some(backup) => Ok(backup.load().context("reading backup")?),
        None => Ok(None),
    }
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let slot = match &store {
        Some(store) => store
            .slots()
            .context("listing stored slots")?
            .into_iter()
            .find(|slot| slot.key == config.storage.backup_key),
        None => None,
    };
    let snapshot = match store {
        Some(store) => BackupStore::new(store, config.storage.backup_key.clone())
            .load()
            .context("reading backup")?,
        None => None,
    };
    let recoverable = snapshot.as_ref().and_then(RecoverableSession::from_snapshot);

    if json {
        let status = serde_json::json!({
            "config_path": Config::default_config_path(),
            "database_path": config.database_path(),
            "backup_key": config.storage.backup_key,
            "backup_bytes": slot.as_ref().map(|s| s.size_bytes),
            "backup_written_at": slot.as_ref().and_then(|s| s.updated_at),
            "recoverable_session": recoverable,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("trackrec status");
    println!("---------------");
    println!("Config:        {}", Config::default_config_path().display());
    println!("Database:      {}", config.database_path().display());
    println!("Backup key:    {}", config.storage.backup_key);
    if let Some(slot) = &slot {
        let written = slot
            .updated_at
            .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
        println!("Backup size:   {} bytes (written {written})", slot.size_bytes);
    }
    println!();
    match recoverable {
        Some(session) => {
            println!("Recoverable session found:");
            print_session(&session);
        }
        None => println!("No recoverable session."),
    }
    Ok(())
}

fn print_session(session: &RecoverableSession) {
    println!("  Track:         {}", session.track_id);
    println!("  Saved at:      {}", session.saved_at.to_rfc3339());
    println!("  Points:        {}", session.point_count);
    println!("  Unsent points: {}", session.pending_count);
    println!(
        "  Distance:      {:.1} m",
        session.stats.total_distance_meters
    );
    println!("  Duration:      {:.0} s", session.stats.duration_seconds);
}

fn handle_backup(config: &Config, cmd: &BackupCommand) -> anyhow::Result<()> {
    match cmd {
        BackupCommand::Show { json } => {
            let Some(snapshot) = load_snapshot(config)? else {
                println!("No backup stored.");
                return Ok(());
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }

            println!("Backup snapshot");
            println!("===============");
            println!("  State:         {}", snapshot.tracking_state);
            println!("  Next sequence: {}", snapshot.sequence_num);
            println!(
                "  Activity:      {} ({:.0}%)",
                snapshot.activity.activity,
                snapshot.activity.confidence * 100.0
            );
            match RecoverableSession::from_snapshot(&snapshot) {
                Some(session) => print_session(&session),
                None => println!("  Track:         {} (no points)", snapshot.track_id),
            }
        }
        BackupCommand::Dismiss { yes } => {
            if !*yes {
                println!("This permanently deletes any unsent points in the backup.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            match open_backup(config)? {
                Some(backup) => {
                    backup.clear().context("clearing backup")?;
                    println!("Backup cleared.");
                }
                None => println!("No backup stored."),
            }
        }
    }
    Ok(())
}

fn handle_replay(config: &Config, cmd: &ReplayCommand) -> anyhow::Result<()> {
    let min_distance = cmd
        .min_distance
        .unwrap_or(config.filter.min_distance_meters);
    if !min_distance.is_finite() || min_distance <= 0.0 {
        bail!("--min-distance must be a positive number");
    }

    let positions = load_positions(&cmd.file)
        .with_context(|| format!("reading positions from {}", cmd.file.display()))?;
    let summary = replay(
        &positions,
        min_distance,
        config.activity.window_size,
        config.activity.thresholds,
    );

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let stats = &summary.stats;
    println!("Replay of {}", cmd.file.display());
    println!("-----------");
    println!("Samples:       {}", summary.samples);
    println!("Admitted:      {}", summary.admitted);
    println!("Rejected:      {} (closer than {min_distance} m)", summary.rejected);
    println!("Distance:      {:.1} m", stats.total_distance_meters);
    println!("Duration:      {:.0} s", stats.duration_seconds);
    println!("Avg speed:     {:.2} m/s", stats.avg_speed_mps);
    println!("Max speed:     {:.2} m/s", stats.max_speed_mps);
    println!(
        "Elevation:     +{:.0} m / -{:.0} m",
        stats.elevation_gain_m, stats.elevation_loss_m
    );
    println!(
        "Activity:      {} ({:.0}%)",
        summary.final_activity.activity,
        summary.final_activity.confidence * 100.0
    );
    for (activity, count) in &summary.activity_counts {
        println!("  {activity:<12} {count}");
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                let thresholds = &config.activity.thresholds;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Filter]");
                println!(
                    "  Min distance (m):    {}",
                    config.filter.min_distance_meters
                );
                println!();
                println!("[Sync]");
                println!("  Interval (s):        {}", config.sync.interval_secs);
                println!("  Batch size:          {}", config.sync.max_points_per_batch);
                println!("  Upload timeout (s):  {}", config.sync.flush_timeout_secs);
                println!(
                    "  Backoff (s):         {}..{}",
                    config.sync.backoff_base_secs, config.sync.backoff_max_secs
                );
                println!();
                println!("[Activity]");
                println!("  Window size:         {}", config.activity.window_size);
                println!(
                    "  Thresholds (m/s):    {} / {} / {} / {}",
                    thresholds.stationary_max,
                    thresholds.walking_max,
                    thresholds.hiking_max,
                    thresholds.biking_max
                );
                println!();
                println!("[Geolocation]");
                println!("  Timeout (s):         {}", config.geolocation.timeout_secs);
                println!("  High accuracy:       {}", config.geolocation.high_accuracy);
                println!();
                println!("[Storage]");
                println!(
                    "  Database path:       {}",
                    config.database_path().display()
                );
                println!("  Backup key:          {}", config.storage.backup_key);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
