//! Page engine boundary
//!
//! Everything behind this trait (fetching, parsing, layout, script) is
//! somebody else's subsystem; the renderer page drives it synchronously
//! and turns its answers into protocol traffic. The default engine is a
//! deterministic stand-in good enough to exercise every page operation.

use url::Url;

use crate::messages::{LoadError, Rect};

/// Result of a successful load: the document the engine now displays.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub url: String,
    pub title: String,
    pub source: String,
}

/// The renderer's view of a content engine. One instance per page, driven
/// from the renderer's dispatch thread.
pub trait PageEngine: Send {
    /// Load `url` and replace the current document. Errors surface as
    /// failed loads, never as channel faults.
    fn load(&mut self, url: &Url) -> Result<LoadedPage, LoadError>;

    /// Evaluate script against the current document. `None` means the
    /// script threw or there is no document.
    fn evaluate(&mut self, script: &str) -> Option<String>;

    /// Serialized source of the current document.
    fn document_source(&self) -> Option<String>;

    /// Textual dump of the layout tree.
    fn render_tree(&self) -> Option<String>;

    /// Paint `rect` of the document as tightly packed RGBA rows.
    fn paint(&self, rect: &Rect) -> Vec<u8>;
}

/// Self-contained engine with predictable behavior: loads synthesize a
/// document from the URL (hosts under `.test` ending in `unreachable`
/// fail), evaluation echoes the script, painting fills with a color
/// derived from the document URL.
pub struct DefaultPageEngine {
    document: Option<LoadedPage>,
}

impl DefaultPageEngine {
    pub fn new() -> Self {
        Self { document: None }
    }

    fn fill_color(&self) -> [u8; 4] {
        let Some(document) = &self.document else {
            return [255, 255, 255, 255];
        };
        // Stable per-URL color so repaints are comparable in tests.
        let mut hash: u32 = 2166136261;
        for byte in document.url.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(16777619);
        }
        [
            (hash >> 16) as u8,
            (hash >> 8) as u8,
            hash as u8,
            255,
        ]
    }
}

impl Default for DefaultPageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PageEngine for DefaultPageEngine {
    fn load(&mut self, url: &Url) -> Result<LoadedPage, LoadError> {
        if url.host_str().is_some_and(|host| host == "unreachable.test") {
            return Err(LoadError {
                code: -1001,
                description: "could not connect to host".into(),
                url: url.to_string(),
            });
        }
        let title = url
            .host_str()
            .map(str::to_owned)
            .unwrap_or_else(|| url.to_string());
        let document = LoadedPage {
            url: url.to_string(),
            title: title.clone(),
            source: format!("<html><head><title>{title}</title></head><body></body></html>"),
        };
        self.document = Some(document.clone());
        Ok(document)
    }

    fn evaluate(&mut self, script: &str) -> Option<String> {
        self.document.as_ref()?;
        if script.contains("throw") {
            return None;
        }
        Some(format!("evaluated:{script}"))
    }

    fn document_source(&self) -> Option<String> {
        self.document.as_ref().map(|document| document.source.clone())
    }

    fn render_tree(&self) -> Option<String> {
        let document = self.document.as_ref()?;
        Some(format!(
            "RenderView\n  RenderBlock {{html}}\n    RenderBlock {{body}} [{}]\n",
            document.url
        ))
    }

    fn paint(&self, rect: &Rect) -> Vec<u8> {
        let color = self.fill_color();
        let count = rect.width as usize * rect.height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&color);
        }
        pixels
    }
}
