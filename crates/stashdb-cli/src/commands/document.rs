//! Document command handlers

use std::io::Read;

use anyhow::{bail, Context, Result};

use stashdb_core::{
    wire, BlobStore, Document, DocumentId, DocumentStore, Filter, Projection, Repository,
};

use crate::output::{Output, OutputFormat};

/// Read a JSON document from a file, or stdin for `-`
fn read_document(file: &str) -> Result<Document> {
    let content = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read document from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?
    };

    wire::from_str(&content).with_context(|| format!("Invalid document JSON in {}", file))
}

fn parse_filter(filter: Option<&str>) -> Result<Filter> {
    match filter {
        Some(json) => Filter::from_json_str(json).context("Invalid --filter"),
        None => Ok(Filter::new()),
    }
}

/// Save a document
///
/// With `source`, the record is merged by `item` according to the kind of
/// file it came from instead of being saved whole.
pub fn put<D: DocumentStore, B: BlobStore>(
    repo: &Repository<D, B>,
    file: &str,
    source: Option<&str>,
    output: &Output,
) -> Result<()> {
    let doc = read_document(file)?;

    if let Some(ext) = source {
        if !repo
            .save_by_source(&doc, ext)
            .context("Failed to save document")?
        {
            bail!("Unsupported source kind '{}'. Use .xml, .jpg or .tiff.", ext);
        }
        output.success(&format!("Saved {} record", ext.trim_start_matches('.')));
        return Ok(());
    }

    let receipt = repo.save_one(&doc).context("Failed to save document")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "id": receipt.id.to_hex(),
                    "blob_handles": receipt
                        .blob_handles
                        .iter()
                        .map(|h| h.to_hex())
                        .collect::<Vec<_>>(),
                    "insertion_date": receipt.insertion_date.to_rfc3339(),
                })
            );
        }
        OutputFormat::Quiet => println!("{}", receipt.id),
        OutputFormat::Human => {
            output.success(&format!(
                "Saved document {} ({} blob(s))",
                receipt.id,
                receipt.blob_handles.len()
            ));
        }
    }

    Ok(())
}

/// Query documents
pub fn get<D: DocumentStore, B: BlobStore>(
    repo: &Repository<D, B>,
    filter: Option<&str>,
    fields: &[String],
    hydrate: bool,
    output: &Output,
) -> Result<()> {
    let filter = parse_filter(filter)?;
    let projection = if fields.is_empty() {
        None
    } else {
        Some(Projection::new(fields.iter().cloned()))
    };

    let loaded = repo
        .load_many(&filter, projection.as_ref(), hydrate)
        .context("Failed to load documents")?;
    output.print_loaded(&loaded);

    Ok(())
}

/// Delete a document and its blobs
pub fn delete<D: DocumentStore, B: BlobStore>(
    repo: &Repository<D, B>,
    id: &str,
    output: &Output,
) -> Result<()> {
    let id: DocumentId = id
        .parse()
        .with_context(|| format!("Invalid document ID: {}", id))?;

    if repo.delete_one(&id).context("Failed to delete document")? {
        output.success(&format!("Deleted document {}", id));
    } else {
        output.message(&format!("No document with ID {}", id));
    }

    Ok(())
}

/// List distinct values of a field
pub fn distinct<D: DocumentStore, B: BlobStore>(
    repo: &Repository<D, B>,
    field: &str,
    filter: Option<&str>,
    output: &Output,
) -> Result<()> {
    let filter = parse_filter(filter)?;
    let values = repo
        .distinct(field, &filter)
        .context("Failed to list distinct values")?;
    output.print_values(&values);
    Ok(())
}
