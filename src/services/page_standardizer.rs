//! Turns uploaded files into an ordered list of page images with known dimensions.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use image::{ImageFormat, ImageReader};
use thiserror::Error;

use crate::schemas::page::{Page, UploadedFile};
use crate::services::pdf_rasterizer::PdfRasterizer;

const PDF_MIME: &str = "application/pdf";
const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum StandardizeError {
    #[error("no files were uploaded")]
    NoFiles,
    #[error("unsupported file type {mime_type} for {file_name}")]
    UnsupportedType { file_name: String, mime_type: String },
    #[error("PDF files and images cannot be mixed in one submission")]
    MixedInput,
    #[error("submission has {count} pages, the limit is {limit}")]
    TooManyPages { count: usize, limit: usize },
    #[error("none of the uploaded PDF files could be converted")]
    NoPages,
    #[error("could not read image {file_name}")]
    UnreadableImage { file_name: String },
}

struct RawPage {
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

#[derive(Clone)]
pub(crate) struct PageStandardizer {
    rasterizer: Arc<dyn PdfRasterizer>,
    max_pages: usize,
}

impl PageStandardizer {
    pub(crate) fn new(rasterizer: Arc<dyn PdfRasterizer>, max_pages: usize) -> Self {
        Self { rasterizer, max_pages }
    }

    pub(crate) async fn standardize(&self, files: Vec<UploadedFile>) -> Result<Vec<Page>, StandardizeError> {
        if files.is_empty() {
            return Err(StandardizeError::NoFiles);
        }

        let mut pdf_count = 0usize;
        let files: Vec<UploadedFile> = files
            .into_iter()
            .map(|file| {
                let mime_type = normalize_mime(&file.mime_type, &file.file_name);
                if mime_type == PDF_MIME {
                    pdf_count += 1;
                } else if !IMAGE_MIMES.contains(&mime_type.as_str()) {
                    return Err(StandardizeError::UnsupportedType {
                        file_name: file.file_name.clone(),
                        mime_type: file.mime_type.clone(),
                    });
                }
                Ok(UploadedFile { mime_type, ..file })
            })
            .collect::<Result<_, _>>()?;

        if pdf_count > 0 && pdf_count < files.len() {
            return Err(StandardizeError::MixedInput);
        }

        let raw_pages = if pdf_count > 0 {
            self.rasterize_all(&files).await?
        } else {
            files
                .into_iter()
                .map(|file| RawPage { file_name: file.file_name, mime_type: file.mime_type, bytes: file.bytes })
                .collect()
        };

        if raw_pages.len() > self.max_pages {
            return Err(StandardizeError::TooManyPages { count: raw_pages.len(), limit: self.max_pages });
        }

        let pages = measure_pages(raw_pages).await?;
        metrics::counter!("pages_standardized_total").increment(pages.len() as u64);
        tracing::info!(pages = pages.len(), pdf_files = pdf_count, "Standardized uploaded files");
        Ok(pages)
    }

    /// Each PDF converts independently; a failing file contributes no pages.
    async fn rasterize_all(&self, files: &[UploadedFile]) -> Result<Vec<RawPage>, StandardizeError> {
        let results = join_all(files.iter().map(|file| self.rasterizer.rasterize(file))).await;

        let mut raw_pages = Vec::new();
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(pages) => raw_pages.extend(pages.into_iter().map(|page| RawPage {
                    file_name: file.file_name.clone(),
                    mime_type: page.mime_type,
                    bytes: page.bytes,
                })),
                Err(err) => {
                    metrics::counter!("pdf_conversion_failures_total").increment(1);
                    tracing::error!(file_name = %file.file_name, error = %err, "PDF conversion failed");
                }
            }
        }

        if raw_pages.is_empty() {
            return Err(StandardizeError::NoPages);
        }
        Ok(raw_pages)
    }
}

/// Reads image headers concurrently; results are matched back by position.
async fn measure_pages(raw_pages: Vec<RawPage>) -> Result<Vec<Page>, StandardizeError> {
    let handles: Vec<_> = raw_pages
        .into_iter()
        .map(|raw| {
            tokio::task::spawn_blocking(move || {
                let dimensions = image_dimensions(&raw.bytes);
                (raw, dimensions)
            })
        })
        .collect();

    let mut pages = Vec::with_capacity(handles.len());
    for (index, joined) in join_all(handles).await.into_iter().enumerate() {
        let (raw, dimensions) = joined.map_err(|err| {
            tracing::error!(page_index = index, error = %err, "Dimension task failed");
            StandardizeError::UnreadableImage { file_name: format!("page {index}") }
        })?;
        let (width, height) = dimensions.map_err(|err| {
            tracing::warn!(file_name = %raw.file_name, error = %err, "Failed to read image header");
            StandardizeError::UnreadableImage { file_name: raw.file_name.clone() }
        })?;

        pages.push(Page {
            index,
            image: raw.bytes,
            mime_type: raw.mime_type,
            width,
            height,
            original_file_name: raw.file_name,
            original_upload_index: index,
        });
    }
    Ok(pages)
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("Failed to guess image format")?
        .into_dimensions()
        .context("Failed to read image dimensions")
}

fn normalize_mime(mime_type: &str, file_name: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "" | "application/octet-stream" => {
            let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
            match extension.as_deref() {
                Some("jpg" | "jpeg") => "image/jpeg".to_string(),
                Some("png") => "image/png".to_string(),
                Some("webp") => "image/webp".to_string(),
                Some("pdf") => PDF_MIME.to_string(),
                _ => lowered,
            }
        }
        _ => lowered,
    }
}

/// Rotates a page clockwise by a multiple of 90 degrees, re-encoding it as PNG.
pub(crate) async fn rotate_page(page: Page, degrees: i32) -> Result<Page> {
    let quarter_turns = degrees.rem_euclid(360) / 90;
    if quarter_turns == 0 || degrees.rem_euclid(90) != 0 {
        return Ok(page);
    }

    let index = page.index;
    let bytes = page.image.clone();
    let (image, width, height) = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, u32, u32)> {
        let decoded = image::load_from_memory(&bytes).context("Failed to decode page for rotation")?;
        let rotated = match quarter_turns {
            1 => decoded.rotate90(),
            2 => decoded.rotate180(),
            _ => decoded.rotate270(),
        };
        let mut encoded = Cursor::new(Vec::new());
        rotated.write_to(&mut encoded, ImageFormat::Png).context("Failed to encode rotated page")?;
        Ok((encoded.into_inner(), rotated.width(), rotated.height()))
    })
    .await
    .context("Rotation task panicked")??;

    tracing::debug!(page_index = index, degrees, "Rotated page");
    Ok(Page { image, width, height, mime_type: "image/png".to_string(), ..page })
}
