use anyhow::Result;

use crate::catalog::MediaCatalog;
use crate::cli::OutputFormat;
use crate::platform::Classification;

/// Render a catalog the way the CLI prints it
pub fn render_catalog(
    catalog: &MediaCatalog,
    classification: &Classification,
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&catalog.summary())?),
        OutputFormat::Text => Ok(format_as_text(catalog, classification)),
    }
}

fn format_as_text(catalog: &MediaCatalog, classification: &Classification) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Title: {}\n",
        catalog.title.as_deref().unwrap_or("(untitled)")
    ));
    out.push_str(&format!(
        "Platform: {}{}\n",
        classification.platform,
        if classification.allowed {
            ""
        } else {
            " (not on allowlist)"
        }
    ));
    out.push_str("Formats:\n");

    for encoding in &catalog.encodings {
        out.push_str(&format!(
            "  {:<12} {:<15} {:<5} {:<26} {}\n",
            encoding.id,
            encoding.resolution_label,
            encoding.container,
            encoding.note(),
            encoding.formatted_size().unwrap_or_else(|| "-".to_string())
        ));
    }
    out
}

/// Print a catalog to the console
pub fn print_catalog(
    catalog: &MediaCatalog,
    classification: &Classification,
    format: &OutputFormat,
) -> Result<()> {
    println!("{}", render_catalog(catalog, classification, format)?.trim_end());
    Ok(())
}
