use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use time::{Duration, OffsetDateTime};

use spendlog::{PasswordHash, ValidatedPassword, initialize_db, open_db};

/// A utility for creating a demo database for the spendlog API server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,

    /// How many days of sample expenses to create, ending today.
    #[arg(long, default_value_t = 60)]
    days: i64,
}

/// Sample expenses as (category slug, amount, description), cycled over the days.
const SAMPLE_EXPENSES: [(&str, f64, &str); 8] = [
    ("food", 12.5, "Lunch"),
    ("transport", 3.2, "Bus fare"),
    ("food", 54.1, "Groceries"),
    ("entertainment", 18.0, "Cinema"),
    ("utilities", 89.99, "Power bill"),
    ("shopping", 42.0, "Shoes"),
    ("health", 25.0, "Pharmacy"),
    ("other", 7.5, "Gift wrap"),
];

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = open_db(output_path)?;

    initialize_db(&conn)?;

    println!("Creating demo user 'demo' with the password 'demo123'...");

    let password_hash = PasswordHash::new(
        ValidatedPassword::new_unchecked("demo123"),
        PasswordHash::DEFAULT_COST,
    )?;
    let now = OffsetDateTime::now_utc();

    conn.execute(
        "INSERT INTO users (name, email, password, currency, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            "demo",
            "demo@example.com",
            password_hash.to_string(),
            "USD",
            now.unix_timestamp(),
        ),
    )?;
    let user_id = conn.last_insert_rowid();

    println!("Creating {} days of sample expenses...", args.days);

    let mut insert = conn.prepare(
        "INSERT INTO expenses (user_id, category_id, amount, description, date, created_at, updated_at)
         SELECT ?1, id, ?2, ?3, ?4, ?5, ?5 FROM categories WHERE slug = ?6",
    )?;

    for day in 0..args.days.max(0) {
        let (slug, amount, description) = SAMPLE_EXPENSES[day as usize % SAMPLE_EXPENSES.len()];
        let date = (now - Duration::days(day)).date();

        insert.execute((
            user_id,
            amount,
            description,
            date.to_string(),
            now.unix_timestamp(),
            slug,
        ))?;
    }

    println!("Success!");

    Ok(())
}
