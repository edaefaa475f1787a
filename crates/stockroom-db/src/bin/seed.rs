//! # Seed Data Generator
//!
//! Populates a local store with sample items, staff and checkout history for
//! development.
//!
//! ## Usage
//! ```bash
//! # Seed 200 items (default)
//! cargo run -p stockroom-db --bin seed
//!
//! # Custom amount and database path
//! cargo run -p stockroom-db --bin seed -- --count 1000 --db ./data/stockroom.db
//! ```
//!
//! The database path falls back to `STOCKROOM_DB_PATH`, then
//! `./stockroom_dev.db`. Every seeded write goes through the repositories,
//! so the pending operation queue fills up exactly as it would on a device.

use std::env;

use stockroom_core::{Item, ItemStatus, Staff};
use stockroom_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Item categories and base names for realistic test data.
const CATEGORIES: &[(&str, &str, &[&str])] = &[
    (
        "LAP",
        "Laptops",
        &["ThinkPad T14", "MacBook Air", "Latitude 5440", "EliteBook 840"],
    ),
    (
        "PWR",
        "Power Tools",
        &["Cordless Drill", "Impact Driver", "Circular Saw", "Angle Grinder"],
    ),
    (
        "AV",
        "Audio Visual",
        &["Projector", "Wireless Mic", "HDMI Switcher", "Conference Camera"],
    ),
    (
        "MEA",
        "Measurement",
        &["Laser Level", "Multimeter", "Tape Measure", "Thermal Camera"],
    ),
    (
        "SAF",
        "Safety",
        &["Harness", "Hard Hat", "Gas Detector", "First Aid Kit"],
    ),
];

const LOCATIONS: &[&str] = &["Cage A", "Cage B", "Shelf 3", "IT Closet", "Van 2"];

const STAFF: &[(&str, &str)] = &[
    ("Alex Morgan", "IT"),
    ("Sam Rivera", "Facilities"),
    ("Jordan Lee", "Workshop"),
    ("Casey Kim", "Events"),
    ("Taylor Singh", "Workshop"),
    ("Robin Okafor", "Facilities"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug,sqlx=warn")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path =
        env::var("STOCKROOM_DB_PATH").unwrap_or_else(|_| String::from("./stockroom_dev.db"));

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockroom Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of items to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockroom_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, items = count, "Seeding local store");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.items().count(None).await?;
    if existing > 0 {
        warn!(existing, "Database already has items, skipping seed");
        return Ok(());
    }

    let start = std::time::Instant::now();

    // Staff first so checkouts can reference them
    let mut staff = Vec::with_capacity(STAFF.len());
    for (name, department) in STAFF {
        let email = format!("{}@stockroom.example", name.to_lowercase().replace(' ', "."));
        staff.push(db.staff().insert(&Staff::new(*name, *department).with_email(email)).await?);
    }

    let mut items = Vec::with_capacity(count);
    for seed in 0..count {
        let item = generate_item(seed);
        match db.items().insert(&item).await {
            Ok(item) => items.push(item),
            Err(e) => warn!(name = %item.name, error = %e, "Failed to insert item"),
        }
    }

    // Check every seventh available item out, return every other one
    let mut checkouts = 0;
    for (n, item) in items.iter().enumerate().filter(|(n, _)| n % 7 == 0) {
        if item.status != ItemStatus::Available {
            continue;
        }
        let member = &staff[n % staff.len()];
        let log = db
            .checkout_logs()
            .check_out(&item.id, &member.id, None, None)
            .await?;
        if n % 2 == 0 {
            db.checkout_logs().check_in(&log.id).await?;
        }
        checkouts += 1;
    }

    let queued = db.pending().count().await?;
    info!(
        staff = staff.len(),
        items = items.len(),
        checkouts,
        queued,
        elapsed = ?start.elapsed(),
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

/// Generates a single item with realistic data.
fn generate_item(seed: usize) -> Item {
    let (code, category, names) = CATEGORIES[seed % CATEGORIES.len()];
    let name = names[(seed / CATEGORIES.len()) % names.len()];
    let unit = seed / (CATEGORIES.len() * names.len()) + 1;

    let mut item = Item::new(format!("{name} #{unit}"), category)
        .with_barcode(format!("{code}-{seed:06}"))
        .with_location(LOCATIONS[seed % LOCATIONS.len()]);

    // A handful of items are out of service
    if seed % 23 == 5 {
        item.status = ItemStatus::Maintenance;
    } else if seed % 41 == 7 {
        item.status = ItemStatus::Retired;
    }

    item
}
