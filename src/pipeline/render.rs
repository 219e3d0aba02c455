//! Document rasterisation: PDF bytes → ordered [`RasterPage`]s via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local state
//! and blocks for the whole render. `tokio::task::spawn_blocking` moves the
//! work to the blocking pool so the runtime's worker threads keep serving the
//! upload futures of other runs.
//!
//! ## Caps
//!
//! The page count is checked right after the document opens, before a single
//! page is rendered: an over-long document is rejected with
//! [`IngestError::TooManyPages`], never truncated. Each page is rendered with
//! its longest edge capped at `max_rendered_pixels`.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::input::{self, StagedDocument};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment override for the pdfium library location.
pub const PDFIUM_PATH_ENV: &str = "PAGECAST_PDFIUM_PATH";

/// One rasterised page, 1-based, owned by the pipeline run.
pub struct RasterPage {
    pub page_num: usize,
    pub image: DynamicImage,
}

impl std::fmt::Debug for RasterPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterPage")
            .field("page_num", &self.page_num)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Turns document bytes into ordered raster pages.
///
/// The orchestrator only talks to this trait, so tests can substitute a
/// rasterizer that synthesises pages without a pdfium library.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Rasterise every page of `document`, in document order, numbered from 1.
    async fn rasterize(
        &self,
        document: &[u8],
        episode_id: &str,
    ) -> Result<Vec<RasterPage>, IngestError>;
}

/// Production rasterizer backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_rendered_pixels: u32,
    max_pages: usize,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_rendered_pixels: config.max_rendered_pixels,
            max_pages: config.max_pages,
            password: config.password.clone(),
            library_path: config.pdfium_library_path.clone(),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &[u8],
        episode_id: &str,
    ) -> Result<Vec<RasterPage>, IngestError> {
        // Validation and staging happen before the engine is bound, so a
        // non-PDF upload fails fast even on hosts without libpdfium.
        let staged = input::stage_document(document, episode_id)?;
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&staged))
            .await
            .map_err(|e| IngestError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    /// Blocking implementation of page rendering.
    ///
    /// `staged` is borrowed for the whole call and dropped by the caller's
    /// closure afterwards, removing the temp dir on every path.
    fn rasterize_blocking(&self, staged: &StagedDocument) -> Result<Vec<RasterPage>, IngestError> {
        let pdfium = bind_pdfium(self.library_path.as_deref())?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_file(staged.path(), password)
            .map_err(|e| classify_load_error(&format!("{:?}", e), password.is_some()))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        check_page_count(total_pages, self.max_pages)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut results = Vec::with_capacity(total_pages);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                IngestError::DocumentInvalid {
                    reason: format!("page {} could not be rendered: {:?}", idx + 1, e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            results.push(RasterPage {
                page_num: idx + 1,
                image,
            });
        }

        Ok(results)
    }
}

/// Enforce the empty-document and page-cap rules.
pub fn check_page_count(total_pages: usize, max_pages: usize) -> Result<(), IngestError> {
    if total_pages == 0 {
        return Err(IngestError::EmptyDocument);
    }
    if total_pages > max_pages {
        return Err(IngestError::TooManyPages {
            pages: total_pages,
            max: max_pages,
        });
    }
    Ok(())
}

/// Map a pdfium load failure onto a validation error with a useful reason.
fn classify_load_error(detail: &str, password_given: bool) -> IngestError {
    let reason = if detail.contains("Password") || detail.contains("password") {
        if password_given {
            "wrong password for encrypted document".to_string()
        } else {
            "document is encrypted and requires a password".to_string()
        }
    } else {
        format!("corrupt or unreadable PDF: {detail}")
    };
    IngestError::DocumentInvalid { reason }
}

/// Bind pdfium from an explicit path, [`PDFIUM_PATH_ENV`], or the system loader.
///
/// A path may name the library file itself or the directory containing it.
fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, IngestError> {
    let from_env = std::env::var(PDFIUM_PATH_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let bindings = match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| IngestError::EngineUnavailable(e.to_string()))?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            check_page_count(0, 10),
            Err(IngestError::EmptyDocument)
        ));
    }

    #[test]
    fn page_cap_is_explicit_rejection() {
        match check_page_count(11, 10) {
            Err(IngestError::TooManyPages { pages, max }) => {
                assert_eq!(pages, 11);
                assert_eq!(max, 10);
            }
            other => panic!("expected TooManyPages, got {other:?}"),
        }
        assert!(check_page_count(10, 10).is_ok());
    }

    #[test]
    fn password_errors_are_explained() {
        let e = classify_load_error("PdfiumLibraryInternalError(PasswordError)", false);
        assert!(e.to_string().contains("requires a password"));
        let e = classify_load_error("PdfiumLibraryInternalError(PasswordError)", true);
        assert!(e.to_string().contains("wrong password"));
        let e = classify_load_error("PdfiumLibraryInternalError(FormatError)", false);
        assert!(e.to_string().contains("corrupt"));
    }

    #[tokio::test]
    async fn non_pdf_fails_before_binding_engine() {
        let rasterizer = PdfiumRasterizer::from_config(&IngestConfig::default());
        let err = rasterizer
            .rasterize(b"definitely not a pdf", "ep-1")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DocumentInvalid { .. }));
    }
}
