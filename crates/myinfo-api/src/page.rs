use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use myinfo_core::{build_page, Document};

use crate::user_data::write_atomically;

pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/my_info_page.html");

/// Template text from `path`, or the built-in template.
///
/// # Errors
/// Returns an error when a configured template cannot be read.
pub fn load_template(path: Option<&Path>) -> Result<Cow<'static, str>> {
    match path {
        Some(path) => fs::read_to_string(path)
            .map(Cow::Owned)
            .with_context(|| format!("page template not readable at {}", path.display())),
        None => Ok(Cow::Borrowed(DEFAULT_TEMPLATE)),
    }
}

/// Render `document` into the template and write the page to `output`.
///
/// The page is composed in memory first and written atomically, so a failure
/// never leaves a partial file behind.
///
/// # Errors
/// Returns an error when the template is unreadable, lacks the info-list
/// region, or the output cannot be written.
pub fn write_page(document: &Document, template_path: Option<&Path>, output: &Path) -> Result<()> {
    let template = load_template(template_path)?;
    let page = build_page(document, &template)?;
    write_atomically(output, page.as_bytes())?;
    tracing::info!(path = %output.display(), entries = document.len(), "static page written");
    Ok(())
}
