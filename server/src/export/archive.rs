//! Archive Assembly
//!
//! Packages a rendered dataset into an in-memory zip: one file per present
//! domain, an optional human-readable README, and the avatar image when one
//! exists. Grows the archive purely from the dataset; nothing here touches
//! the network.

use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use chrono::Utc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::transform::{present_sections, transform_section};
use super::types::{ExportDataset, ExportFormat};

/// Map a declared image content type to a file extension.
fn image_extension(content_type: &str) -> &str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin"),
    }
}

/// Build the export zip archive in memory.
pub fn build_archive(
    dataset: &ExportDataset,
    format: ExportFormat,
    include_readme: bool,
    profile_image: Option<(Vec<u8>, String)>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut zip = ZipWriter::new(Cursor::new(&mut buf));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let sections = present_sections(dataset);

    for (section, value) in &sections {
        let rendered = transform_section(section, value, format)?;
        zip.start_file(format!("{section}.{}", format.extension()), options)?;
        zip.write_all(rendered.as_bytes())
            .with_context(|| format!("writing {section} into archive"))?;
    }

    if include_readme {
        let mut readme = format!(
            "Stride data export\n\
             ==================\n\
             \n\
             User: {}\n\
             Generated: {}\n\
             Format: {}\n\
             \n\
             Contents:\n",
            dataset.user_id,
            dataset.generated_at.to_rfc3339(),
            format.extension(),
        );
        for (section, value) in &sections {
            let count = value.as_array().map_or(1, Vec::len);
            readme.push_str(&format!("  - {section}.{}: {count} record(s)\n", format.extension()));
        }
        readme.push_str(&format!(
            "\nPackaged at {} by the Stride privacy service.\n",
            Utc::now().to_rfc3339()
        ));

        zip.start_file("README.txt", options)?;
        zip.write_all(readme.as_bytes())
            .context("writing README into archive")?;
    }

    if let Some((bytes, content_type)) = profile_image {
        let name = format!("profile_image.{}", image_extension(&content_type));
        zip.start_file(name, options)?;
        zip.write_all(&bytes).context("writing profile image into archive")?;
    }

    zip.finish()?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    fn dataset() -> ExportDataset {
        ExportDataset {
            user_id: "user-1".into(),
            generated_at: "2026-08-04T00:00:00Z".parse().unwrap(),
            profile: Some(json!({"display_name": "Ada"})),
            activity_sessions: Some(vec![json!({"sport": "run"})]),
            consents: Some(vec![]),
            settings: None,
            billing: None,
            storage_files: None,
            analytics: None,
        }
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn one_file_per_present_domain() {
        let bytes = build_archive(&dataset(), ExportFormat::Json, false, None).unwrap();
        let names = entry_names(&bytes);
        assert_eq!(
            names,
            vec!["profile.json", "activity_sessions.json", "consents.json"]
        );
    }

    #[test]
    fn readme_and_image_are_optional_extras() {
        let image = (vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg".to_string());
        let bytes = build_archive(&dataset(), ExportFormat::Csv, true, Some(image)).unwrap();
        let names = entry_names(&bytes);

        assert!(names.contains(&"README.txt".to_string()));
        assert!(names.contains(&"profile_image.jpg".to_string()));
        assert!(names.contains(&"activity_sessions.csv".to_string()));
    }

    #[test]
    fn unknown_image_type_falls_back_to_bin() {
        let image = (vec![1, 2, 3], "application/x-strange".to_string());
        let bytes = build_archive(&dataset(), ExportFormat::Json, false, Some(image)).unwrap();
        assert!(entry_names(&bytes).contains(&"profile_image.bin".to_string()));
    }

    #[test]
    fn archive_entries_hold_the_rendered_sections() {
        let bytes = build_archive(&dataset(), ExportFormat::Json, false, None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("profile.json")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["display_name"], "Ada");
    }
}
