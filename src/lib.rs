mod cascade;
mod debug;
mod dom;
mod error;
mod export;
mod extract;
mod perf;
mod selector;
mod types;
mod viewport;

pub use cascade::{
    InlineSummary, collect_internal_stylesheets, embed_stylesheets, inline, inline_styles,
};
pub use dom::{
    Attribute, Document, Element, NodeId, NodeKind, SVG_NS, XLINK_NS, parse_style_declarations,
    serialize_style_declarations,
};
pub use error::{CssError, DocumentError, ExtractError, IconizeError, OracleError, TransformError};
pub use export::{
    BoundingBoxOracle, ExportOptions, ExportReport, Fragment, QueryAllOracle, StaticOracle,
    export_fragments, parse_id_list, parse_query_all,
};
pub use extract::extract;
pub use selector::{SelectorPattern, Specificity, parse_selector_list, select};
pub use types::{BoundingBox, format_number};
pub use viewport::{
    Align, AxisAlign, Length, LengthUnit, MeetOrSlice, PreserveAspectRatio, TransformOp, ViewBox,
    ViewportSpec, compute_transform, transform_to_string, viewport_transform,
};

use debug::DebugLogger;
use export::ExportContext;
use perf::{PerfLogger, timed};
use std::sync::Arc;

/// Configured pipeline: external stylesheets, export options and logging.
pub struct Iconizer {
    stylesheets: Vec<String>,
    export_options: ExportOptions,
    parallel: bool,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

#[derive(Clone)]
pub struct IconizerBuilder {
    stylesheets: Vec<String>,
    export_options: ExportOptions,
    parallel: bool,
    debug_path: Option<std::path::PathBuf>,
    perf_path: Option<std::path::PathBuf>,
}

impl Iconizer {
    pub fn builder() -> IconizerBuilder {
        IconizerBuilder::new()
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.flush();
        }
    }

    pub fn stylesheets(&self) -> &[String] {
        &self.stylesheets
    }

    pub fn export_options(&self) -> &ExportOptions {
        &self.export_options
    }

    /// Inlines the configured stylesheets, then the document's own `<style>`
    /// blocks, into `style` attributes and drops the `<style>` elements.
    pub fn inline(&self, document: &mut Document) -> Result<InlineSummary, IconizeError> {
        let result = timed(self.perf.as_deref(), "cascade", None, || {
            cascade::inline_styles_with_log(document, &self.stylesheets, self.debug.as_deref())
        });
        self.emit_debug_summary("inline");
        Ok(result?)
    }

    /// Gathers the configured and internal stylesheets into a single
    /// `<style>` block at the top of `<defs>`. The combined text is parsed
    /// first, so a malformed sheet leaves the document untouched.
    pub fn stylize(&self, document: &mut Document) -> Result<(), IconizeError> {
        let mut sheets = self.stylesheets.clone();
        sheets.extend(collect_internal_stylesheets(document));
        let checked = cascade::check_stylesheets(&sheets, self.debug.as_deref());
        if checked.is_ok() {
            embed_stylesheets(document, &sheets);
        }
        self.emit_debug_summary("stylize");
        checked?;
        Ok(())
    }

    /// Cuts one fragment per id. Styles are inlined on the working tree
    /// first; `document` is put back exactly as it was before returning.
    pub fn export(
        &self,
        document: &mut Document,
        ids: &[String],
        oracle: &dyn BoundingBoxOracle,
    ) -> Result<ExportReport, IconizeError> {
        let result = self.export_inner(document, ids, oracle);
        self.emit_debug_summary("export");
        result
    }

    fn export_inner(
        &self,
        document: &mut Document,
        ids: &[String],
        oracle: &dyn BoundingBoxOracle,
    ) -> Result<ExportReport, IconizeError> {
        let ctx = ExportContext {
            debug: self.debug.as_deref(),
            perf: self.perf.as_deref(),
            parallel: self.parallel,
        };
        if self.stylesheets.is_empty() && !cascade::has_style_elements(document) {
            return export::export_with_context(document, ids, &self.export_options, oracle, ctx);
        }

        let stash = document.clone();
        let result = timed(ctx.perf, "cascade", None, || {
            cascade::inline_styles_with_log(document, &self.stylesheets, ctx.debug)
        })
        .map_err(IconizeError::from)
        .and_then(|_| {
            export::export_with_context(document, ids, &self.export_options, oracle, ctx)
        });
        *document = stash;
        result
    }
}

impl IconizerBuilder {
    pub fn new() -> Self {
        Self {
            stylesheets: Vec::new(),
            export_options: ExportOptions::default(),
            parallel: true,
            debug_path: None,
            perf_path: None,
        }
    }

    // External stylesheet text; sheets added earlier take precedence.
    pub fn stylesheet(mut self, css: impl Into<String>) -> Self {
        self.stylesheets.push(css.into());
        self
    }

    pub fn stylesheets<I, S>(mut self, sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stylesheets.extend(sheets.into_iter().map(Into::into));
        self
    }

    pub fn export_options(mut self, options: ExportOptions) -> Self {
        self.export_options = options;
        self
    }

    // Fan out per-id extraction on the rayon pool (default: on).
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    // Enable debug logging to a JSONL file for cascade/extraction inspection.
    pub fn debug_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    // Enable performance logging to a JSONL file for timing/counter inspection.
    pub fn perf_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Iconizer, IconizeError> {
        let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&self.export_options.width) || blank(&self.export_options.height) {
            return Err(IconizeError::InvalidConfiguration(
                "export width/height must not be blank".to_string(),
            ));
        }
        if let Some(par) = self.export_options.preserve_aspect_ratio.as_deref() {
            PreserveAspectRatio::parse(par)?;
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let perf = if let Some(path) = self.perf_path {
            Some(Arc::new(PerfLogger::new(path)?))
        } else {
            None
        };
        Ok(Iconizer {
            stylesheets: self.stylesheets,
            export_options: self.export_options,
            parallel: self.parallel,
            debug,
            perf,
        })
    }
}

impl Default for IconizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SHEET: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20" viewBox="0 0 20 10">
<style>.hot { fill: red; }</style>
<defs><marker id="m"><path d="M0 0"/></marker></defs>
<rect id="a" class="hot" marker-end="url(#m)" width="4" height="4"/>
<circle id="b" class="hot" r="2"/>
</svg>"#;

    fn temp_log_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("iconbleed_{tag}_{nanos}.jsonl"))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    fn oracle() -> StaticOracle {
        StaticOracle::new()
            .with_box("a", BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_box("b", BoundingBox::new(-4.0, -4.0, 8.0, 8.0))
    }

    #[test]
    fn export_inlines_styles_and_leaves_document_unchanged() {
        let debug_path = temp_log_path("debug");
        let iconizer = Iconizer::builder()
            .stylesheet("circle { stroke: red; }")
            .debug_log(&debug_path)
            .build()
            .expect("build");
        let mut doc = Document::parse(SHEET).expect("parse");
        let before = doc.to_xml();

        let report = iconizer.export(&mut doc, &ids(&["a", "b"]), &oracle()).expect("export");
        assert_eq!(doc.to_xml(), before);
        assert_eq!(report.fragments.len(), 2);

        let a = &report.fragments[0];
        assert_eq!(a.id, "a");
        let a_doc = &a.document;
        assert!(a_doc.elements_by_tag("style").is_empty());
        assert!(a_doc.element_by_id(a_doc.root(), "m").is_some());
        assert!(a_doc.element_by_id(a_doc.root(), "b").is_none());
        let rect = a_doc.element_by_id(a_doc.root(), "a").expect("rect");
        assert_eq!(a_doc.attribute(rect, "style"), Some("fill: red"));
        assert_eq!(a_doc.attribute(a_doc.root(), "transform"), Some("scale(2 2)"));
        assert_eq!(a_doc.attribute(a_doc.root(), "viewBox"), Some("0 0 8 8"));

        let b_doc = &report.fragments[1].document;
        let circle = b_doc.element_by_id(b_doc.root(), "b").expect("circle");
        assert_eq!(b_doc.attribute(circle, "style"), Some("fill: red; stroke: red"));
        assert!(b_doc.elements_by_tag("defs").is_empty());

        let log = std::fs::read_to_string(&debug_path).expect("read debug log");
        assert!(log.contains("\"type\":\"css.inline\""));
        assert!(log.contains("\"type\":\"export.bbox\",\"id\":\"a\",\"view_box\":\"0 0 8 8\""));
        assert!(log.contains("\"type\":\"debug.summary\",\"context\":\"export\""));
        let _ = std::fs::remove_file(debug_path);
    }

    #[test]
    fn failed_export_restores_styles_too() {
        let iconizer = Iconizer::builder().parallel(false).build().expect("build");
        let mut doc = Document::parse(SHEET).expect("parse");
        let before = doc.to_xml();
        let partial = StaticOracle::new().with_box("a", BoundingBox::new(0.0, 0.0, 8.0, 8.0));
        let err = iconizer
            .export(&mut doc, &ids(&["a", "b"]), &partial)
            .expect_err("missing box");
        assert!(matches!(err, IconizeError::Oracle(OracleError::MissingIds(_))));
        assert_eq!(doc.to_xml(), before);
    }

    #[test]
    fn inline_uses_configured_sheets_first() {
        let iconizer = Iconizer::builder()
            .stylesheets(["#b { fill: red; }"])
            .build()
            .expect("build");
        let mut doc = Document::parse(SHEET).expect("parse");
        let summary = iconizer.inline(&mut doc).expect("inline");
        assert_eq!(summary.rules, 2);
        assert_eq!(summary.removed_style_elements, 1);
        let circle = doc.element_by_id(doc.root(), "b").expect("circle");
        assert_eq!(doc.attribute(circle, "style"), Some("fill: red"));
    }

    #[test]
    fn stylize_merges_sheets_into_defs() {
        let iconizer = Iconizer::builder()
            .stylesheet("circle { p: v1; }")
            .build()
            .expect("build");
        let mut doc = Document::parse(SHEET).expect("parse");
        iconizer.stylize(&mut doc).expect("stylize");
        let styles = doc.elements_by_tag("style");
        assert_eq!(styles.len(), 1);
        let defs = doc.elements_by_tag("defs")[0];
        assert_eq!(doc.element_children(defs)[0], styles[0]);
        assert_eq!(
            doc.text_content(styles[0]),
            "\ncircle { p: v1; }\n.hot { fill: red; }\n"
        );
    }

    #[test]
    fn stylize_rejects_malformed_css_without_changes() {
        let iconizer = Iconizer::builder()
            .stylesheet("..broken { fill: red; }")
            .build()
            .expect("build");
        let mut doc = Document::parse(SHEET).expect("parse");
        let before = doc.to_xml();
        let err = iconizer.stylize(&mut doc).expect_err("malformed");
        assert!(matches!(err, IconizeError::Css(CssError::Malformed(_))));
        assert_eq!(doc.to_xml(), before);
    }

    #[test]
    fn perf_log_records_spans() {
        let perf_path = temp_log_path("perf");
        {
            let iconizer = Iconizer::builder()
                .perf_log(&perf_path)
                .build()
                .expect("build");
            let mut doc = Document::parse(SHEET).expect("parse");
            iconizer.export(&mut doc, &ids(&["a"]), &oracle()).expect("export");
        }
        let log = std::fs::read_to_string(&perf_path).expect("read perf log");
        assert!(log.contains("\"name\":\"cascade\""));
        assert!(log.contains("\"name\":\"export.fragment\",\"subject\":\"a\""));
        let stem = perf_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let _ = std::fs::remove_file(perf_path.with_file_name(format!("{stem}_hot.log")));
        let _ = std::fs::remove_file(perf_path);
    }

    #[test]
    fn build_rejects_bad_options() {
        let err = Iconizer::builder()
            .export_options(ExportOptions {
                width: Some(" ".to_string()),
                ..ExportOptions::default()
            })
            .build()
            .err()
            .expect("blank width");
        assert!(matches!(err, IconizeError::InvalidConfiguration(_)));

        let err = Iconizer::builder()
            .export_options(ExportOptions {
                preserve_aspect_ratio: Some("sideways".to_string()),
                ..ExportOptions::default()
            })
            .build()
            .err()
            .expect("bad aspect ratio");
        assert!(matches!(
            err,
            IconizeError::Transform(TransformError::InvalidAspectRatio(_))
        ));

        let missing_dir = std::env::temp_dir()
            .join("iconbleed_missing_dir_for_logs")
            .join("debug.jsonl");
        let err = Iconizer::builder()
            .debug_log(missing_dir)
            .build()
            .err()
            .expect("unwritable log");
        assert!(matches!(err, IconizeError::Io(_)));
    }
}
