//! pawscan-cli — ops frontend for the Pawscan HTTP API
//!
//! # Subcommands
//! - `analyze <image>`              — upload a photo and print the scan result
//! - `status <scan-id>`             — poll a scan's age-progression status
//! - `regenerate <scan-id>`         — reset and re-dispatch age progression
//! - `correct <scan-id> <breed>`    — record a human breed correction
//! - `reteach <correction-id>`      — re-run a failed teaching step
//! - `health`                       — show server health

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8790";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "pawscan-cli",
    version,
    about = "Pawscan breed analysis — CLI frontend for the HTTP API"
)]
struct Cli {
    /// Pawscan HTTP server URL (overrides PAWSCAN_HTTP_URL env var)
    #[arg(long, env = "PAWSCAN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a dog photo for breed analysis
    Analyze {
        /// Path to the image file
        image: PathBuf,
    },

    /// Show a scan's age-progression status
    Status {
        /// Scan identifier
        scan_id: String,
    },

    /// Reset and re-dispatch a scan's age progression
    Regenerate {
        /// Scan identifier
        scan_id: String,
    },

    /// Record a human breed correction
    Correct {
        /// Scan identifier
        scan_id: String,
        /// The corrected breed name
        breed: String,
    },

    /// Re-run the teaching step for a correction
    Reteach {
        /// Correction identifier
        correction_id: String,
    },

    /// Show Pawscan server health
    Health,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScanResponse {
    id: String,
    breed: String,
    confidence: f64,
    verification: String,
    method: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    simulations: Simulations,
}

#[derive(Debug, Deserialize)]
struct Simulations {
    #[serde(rename = "1_years")]
    one_year: Option<String>,
    #[serde(rename = "3_years")]
    three_years: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CorrectionResponse {
    correction_id: String,
    teaching: String,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::blocking::Client::new();

    match &cli.command {
        Commands::Analyze { image } => analyze(&client, &cli, image),
        Commands::Status { scan_id } => status(&client, &cli, scan_id),
        Commands::Regenerate { scan_id } => regenerate(&client, &cli, scan_id),
        Commands::Correct { scan_id, breed } => correct(&client, &cli, scan_id, breed),
        Commands::Reteach { correction_id } => reteach(&client, &cli, correction_id),
        Commands::Health => health(&client, &cli),
    }
}

fn check(response: reqwest::blocking::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .context("Server returned a non-JSON response")?;

    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        bail!("{} — {}", status, message);
    }
    Ok(body)
}

fn analyze(client: &reqwest::blocking::Client, cli: &Cli, image: &PathBuf) -> Result<()> {
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let part = reqwest::blocking::multipart::Part::file(image)
        .with_context(|| format!("Failed to read {}", image.display()))?
        .file_name(file_name);
    let form = reqwest::blocking::multipart::Form::new().part("image", part);

    let body = check(
        client
            .post(format!("{}/scans", cli.server))
            .multipart(form)
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let scan: ScanResponse = serde_json::from_value(body)?;
    println!("Scan:       {}", scan.id);
    println!("Breed:      {}", scan.breed);
    println!("Confidence: {:.1}%", scan.confidence);
    println!("Method:     {} ({})", scan.method, scan.verification);
    if let Some(description) = scan.description {
        println!("\n{}", description);
    }
    Ok(())
}

fn status(client: &reqwest::blocking::Client, cli: &Cli, scan_id: &str) -> Result<()> {
    let body = check(
        client
            .get(format!("{}/scans/{}/status", cli.server, scan_id))
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let status: StatusResponse = serde_json::from_value(body)?;
    println!("Status:  {}", status.status);
    println!(
        "1 year:  {}",
        status.simulations.one_year.as_deref().unwrap_or("—")
    );
    println!(
        "3 years: {}",
        status.simulations.three_years.as_deref().unwrap_or("—")
    );
    Ok(())
}

fn regenerate(client: &reqwest::blocking::Client, cli: &Cli, scan_id: &str) -> Result<()> {
    let body = check(
        client
            .post(format!("{}/scans/{}/regenerate", cli.server, scan_id))
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Age progression re-queued for {}", scan_id);
    }
    Ok(())
}

fn correct(
    client: &reqwest::blocking::Client,
    cli: &Cli,
    scan_id: &str,
    breed: &str,
) -> Result<()> {
    let body = check(
        client
            .post(format!("{}/scans/{}/correct", cli.server, scan_id))
            .json(&serde_json::json!({ "breed": breed }))
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let correction: CorrectionResponse = serde_json::from_value(body)?;
    println!("Correction saved: {}", correction.correction_id);
    if correction.teaching == "ok" {
        println!("Classifier teaching: ok");
    } else {
        println!(
            "Classifier teaching failed — run `pawscan-cli reteach {}` later",
            correction.correction_id
        );
    }
    Ok(())
}

fn reteach(client: &reqwest::blocking::Client, cli: &Cli, correction_id: &str) -> Result<()> {
    let body = check(
        client
            .post(format!("{}/corrections/{}/reteach", cli.server, correction_id))
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        let teaching = body["teaching"].as_str().unwrap_or("unknown");
        println!("Teaching: {}", teaching);
    }
    Ok(())
}

fn health(client: &reqwest::blocking::Client, cli: &Cli) -> Result<()> {
    let body = check(
        client
            .get(format!("{}/health", cli.server))
            .send()
            .context("Failed to reach the Pawscan server")?,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Status: {}", body["status"].as_str().unwrap_or("unknown"));
        if let Some(pg) = body["postgresql"].as_str() {
            println!("PostgreSQL: {}", pg);
        }
    }
    Ok(())
}
