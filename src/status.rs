// System status display: DB file, credential pool health, monitored groups.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use colored::Colorize;
use std::path::Path;

use crate::config::Config;
use crate::credentials::{now_millis, Credential, CredentialPool};

/// Display system status to the terminal.
pub async fn show(config: &Config) -> Result<()> {
    if !Path::new(&config.db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `crowdstats init` to set up the database.");
        return Ok(());
    }

    let store = crate::db::open(&config.db_path)?;
    let pool = CredentialPool::new(store.clone());
    pool.load().await?;

    // Database file size
    let file_size = std::fs::metadata(&config.db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", config.db_path, file_size);

    // Credential pool
    let credentials = pool.list().await?;
    let written = match store.record_info(crate::credentials::RECORD_KEY).await? {
        Some(info) => format!(
            "{} by {}",
            info.updated_at,
            info.written_by.as_deref().unwrap_or("unknown")
        ),
        None => "never".to_string(),
    };
    println!(
        "Credentials: {} in pool (record written {})",
        credentials.len(),
        written
    );
    if credentials.is_empty() {
        println!(
            "  {}",
            "Polling starts after the first Facebook login (or `crowdstats tokens add`)".dimmed()
        );
    } else {
        print_credentials(&credentials);
    }

    // Monitored groups
    match config.load_crowds() {
        Ok(crowds) => {
            let groups = crowds.groups()?;
            println!(
                "Monitored groups: {} across {} crowds ({})",
                groups.len(),
                crowds.crowds.len(),
                config.crowds_file.display()
            );
            for g in &groups {
                println!(
                    "  {:<32} id {:<20} every {}s{}",
                    g.label(),
                    g.id,
                    g.refresh_secs,
                    if g.user_photos { ", with pictures" } else { "" }
                );
            }
        }
        Err(e) => {
            println!("Monitored groups: {}", format!("{e:#}").red());
        }
    }

    Ok(())
}

/// One line per credential, in rotation order.
pub fn print_credentials(credentials: &[Credential]) {
    let now = now_millis();
    println!(
        "  {:<4} {:<10} {:<24} {:<18} {:<18} Failures",
        "#", "Token", "Name", "Expires", "Last success"
    );
    println!("  {}", "-".repeat(86));

    for (i, c) in credentials.iter().enumerate() {
        let expires = if c.is_expired(now) {
            "expired".red().to_string()
        } else {
            format_millis(c.expires_at_millis)
        };
        let failures = match c.consecutive_failures {
            0 => "0".green().to_string(),
            n if n < 5 => n.to_string().yellow().to_string(),
            n => n.to_string().red().bold().to_string(),
        };
        println!(
            "  {:<4} {:<10} {:<24} {:<18} {:<18} {}",
            format!("{}.", i + 1),
            c.masked_token(),
            truncate(&c.name, 24),
            expires,
            format_millis(c.last_successful),
            failures,
        );
    }
}

fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "invalid".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
