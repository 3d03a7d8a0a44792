use std::fs;

use tracing::info;

use crate::config::OutputFile;
use crate::template::{self, Template};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to render the template: {0}")]
    RenderError(#[from] template::Error),

    #[error("Unable to write {path}: {source}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Renders the template and replaces whatever is at the output location.
pub fn write(output: &OutputFile, template: &Template) -> Result<(), Error> {
    let file_contents = template.to_json()?;
    fs::write(&output.location, file_contents).map_err(|source| Error::WriteError {
        path: output.location.display().to_string(),
        source,
    })?;

    info!("Template written to {}", output.location.display());
    return Ok(());
}
