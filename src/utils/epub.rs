use anyhow::{anyhow, Context, Result};
use epub::doc::EpubDoc;
use log::debug;
use std::path::{Path, PathBuf};

const TEXT_WIDTH: usize = 500;

/// Item ids that hold front matter rather than story text.
fn is_front_matter(id: &str) -> bool {
    matches!(id, "title" | "colophon" | "contents" | "toc" | "nav" | "cover")
}

fn is_html(mimetype: &str) -> bool {
    matches!(mimetype, "application/xhtml+xml" | "text/html")
}

/// Flattens an epub into plain text, one chapter after another in spine order.
pub async fn epub_to_text(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_chapters(&path)).await?
}

fn read_chapters(path: &Path) -> Result<String> {
    let mut doc = EpubDoc::new(path)
        .with_context(|| format!("Failed to open epub {}", path.display()))?;

    let mut chapters = Vec::new();
    loop {
        if let Some(id) = doc.get_current_id() {
            if is_front_matter(&id) {
                debug!("Skipping front matter item {}", id);
            } else if let Some((content, mimetype)) = doc.get_current_str() {
                if is_html(&mimetype) {
                    let text = html2text::from_read(content.as_bytes(), TEXT_WIDTH)
                        .map_err(|e| anyhow!("Failed to convert chapter {}: {}", id, e))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        chapters.push(text.to_string());
                    }
                } else {
                    debug!("Skipping non-HTML item {} ({})", id, mimetype);
                }
            }
        }
        if !doc.go_next() {
            break;
        }
    }

    if chapters.is_empty() {
        return Err(anyhow!("No readable chapters in {}", path.display()));
    }
    Ok(chapters.join("\n\n"))
}
