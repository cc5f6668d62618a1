//! Status command handler

use anyhow::{Context, Result};

use stashdb_core::{BlobStore, Config, DocumentStore, Repository};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show<D: DocumentStore, B: BlobStore>(
    repo: &Repository<D, B>,
    config: &Config,
    output: &Output,
) -> Result<()> {
    let stats = repo.stats().context("Failed to read repository stats")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "collection": config.collection,
                    "database": config.database_path(),
                    "blob_dir": config.blob_dir(),
                    "counts": {
                        "documents": stats.documents,
                        "blobs": stats.blobs,
                        "blob_bytes": stats.blob_bytes
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", stats.documents);
        }
        OutputFormat::Human => {
            println!("stashdb Status");
            println!("==============");
            println!();
            println!("Storage:");
            println!("  Database:   {}", config.database_path().display());
            println!("  Blobs:      {}", config.blob_dir().display());
            println!("  Collection: {}", config.collection);
            println!();
            println!("Contents:");
            println!("  Documents: {}", stats.documents);
            println!("  Blobs:     {} ({})", stats.blobs, human_size(stats.blob_bytes));
        }
    }

    Ok(())
}

/// Format a byte count with a binary unit
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_show_on_empty_repository() {
        let repo = Repository::in_memory();
        let output = Output::new(OutputFormat::Quiet);
        show(&repo, &Config::default(), &output).unwrap();
    }
}
