use clap::{Parser, Subcommand};
use ratingdb::{run_backfill, Store};
use std::process;

/// RatingDB CLI — interact with a RatingDB data store from the command line
#[derive(Parser)]
#[command(name = "ratingdb", version, about)]
struct Cli {
    /// Path to the data directory (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get a business document with its rating aggregate
    GetBusiness {
        /// Business ID
        biz_id: String,
    },

    /// List all business documents
    ListBusinesses,

    /// Get a single review
    GetReview {
        /// Business ID
        biz_id: String,
        /// Review ID
        review_id: String,
    },

    /// List all reviews of a business
    ListReviews {
        /// Business ID
        biz_id: String,
    },

    /// Create or replace a review (fires the aggregation trigger)
    PutReview {
        /// Business ID
        biz_id: String,
        /// Review ID
        review_id: String,
        /// Field values (e.g. --field rating=5 --field text="Great place")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Insert a review with an auto-generated ID
    InsertReview {
        /// Business ID
        biz_id: String,
        /// Field values (e.g. --field rating=5)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a review (fires the aggregation trigger)
    DeleteReview {
        /// Business ID
        biz_id: String,
        /// Review ID
        review_id: String,
    },

    /// Recompute every business aggregate from its reviews
    Backfill,

    /// Show collection stats
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(&cli.data_dir)?;

    match cli.command {
        Command::GetBusiness { biz_id } => {
            let doc = store
                .business(&biz_id)?
                .ok_or_else(|| format!("Business not found: {biz_id}"))?;
            print_output(&serde_json::to_value(&doc)?);
        }

        Command::ListBusinesses => {
            let docs = store.list_businesses()?;
            print_output(&serde_json::to_value(&docs)?);
        }

        Command::GetReview { biz_id, review_id } => {
            let doc = store
                .get_review(&biz_id, &review_id)?
                .ok_or_else(|| format!("Review not found: {biz_id}/{review_id}"))?;
            print_output(&serde_json::to_value(&doc)?);
        }

        Command::ListReviews { biz_id } => {
            let docs = store.list_reviews(&biz_id)?;
            print_output(&serde_json::to_value(&docs)?);
        }

        Command::PutReview {
            biz_id,
            review_id,
            fields,
        } => {
            store.put_review(&biz_id, &review_id, fields_to_value(&fields))?;
            print_output(&serde_json::json!({ "ok": true, "id": review_id }));
        }

        Command::InsertReview { biz_id, fields } => {
            let id = store.insert_review(&biz_id, fields_to_value(&fields))?;
            print_output(&serde_json::json!({ "ok": true, "id": id }));
        }

        Command::DeleteReview { biz_id, review_id } => {
            store.delete_review(&biz_id, &review_id)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": review_id }));
        }

        Command::Backfill => {
            let summary = run_backfill(&store)?;
            print_output(&serde_json::json!({
                "ok": true,
                "businesses": summary.businesses,
            }));
        }

        Command::Status => {
            let status = store.status()?;
            print_output(&status);
        }
    }

    Ok(())
}

fn print_output(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("ERROR:{e}"),
    }
}

fn fields_to_value(fields: &[(String, String)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Try to parse as JSON first (numbers, booleans, null), else keep the string
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    serde_json::Value::Object(map)
}
