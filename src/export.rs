//! Export coordination: normalize the root viewport, ask the bounding-box
//! oracle where each object sits, and cut one cropped fragment per id.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::debug::DebugLogger;
use crate::dom::Document;
use crate::error::{ExtractError, IconizeError, OracleError};
use crate::extract::extract_with_log;
use crate::perf::{PerfLogger, timed};
use crate::types::{BoundingBox, format_number};
use crate::viewport::{transform_to_string, viewport_transform};

/// Source of rendered geometry. Implementations usually shell out to a
/// vector-graphics tool; the document passed in is already normalized, so
/// boxes are in the root's user units.
pub trait BoundingBoxOracle: Sync {
    fn bounding_boxes(
        &self,
        document: &Document,
        ids: &[String],
    ) -> Result<HashMap<String, BoundingBox>, OracleError>;
}

/// Fixed boxes supplied up front.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    boxes: HashMap<String, BoundingBox>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_box(mut self, id: impl Into<String>, bbox: BoundingBox) -> Self {
        self.boxes.insert(id.into(), bbox);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, bbox: BoundingBox) {
        self.boxes.insert(id.into(), bbox);
    }
}

impl From<HashMap<String, BoundingBox>> for StaticOracle {
    fn from(boxes: HashMap<String, BoundingBox>) -> Self {
        Self { boxes }
    }
}

impl BoundingBoxOracle for StaticOracle {
    fn bounding_boxes(
        &self,
        _document: &Document,
        ids: &[String],
    ) -> Result<HashMap<String, BoundingBox>, OracleError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.boxes.get(id).map(|bbox| (id.clone(), *bbox)))
            .collect())
    }
}

/// Boxes read from a `query-all` listing: one `id,x,y,width,height` line per
/// object, as printed by Inkscape's `--query-all`.
#[derive(Debug, Clone)]
pub struct QueryAllOracle {
    listing: String,
}

impl QueryAllOracle {
    pub fn new(listing: impl Into<String>) -> Self {
        Self {
            listing: listing.into(),
        }
    }
}

impl BoundingBoxOracle for QueryAllOracle {
    fn bounding_boxes(
        &self,
        _document: &Document,
        ids: &[String],
    ) -> Result<HashMap<String, BoundingBox>, OracleError> {
        let mut all = parse_query_all(&self.listing)?;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        all.retain(|id, _| wanted.contains(id.as_str()));
        Ok(all)
    }
}

/// Parses a `query-all` listing. Blank lines are skipped; the first entry for
/// an id wins.
pub fn parse_query_all(listing: &str) -> Result<HashMap<String, BoundingBox>, OracleError> {
    let mut out = HashMap::new();
    for (line_no, line) in listing.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Split from the right so ids may contain commas.
        let fields: Vec<&str> = line.rsplitn(5, ',').collect();
        let [height, width, y, x, id] = fields[..] else {
            return Err(OracleError::Malformed(format!(
                "line {}: expected id,x,y,width,height",
                line_no + 1
            )));
        };
        let number = |raw: &str| {
            raw.trim().parse::<f64>().map_err(|_| {
                OracleError::Malformed(format!("line {}: {:?} is not a number", line_no + 1, raw))
            })
        };
        let bbox = BoundingBox::new(number(x)?, number(y)?, number(width)?, number(height)?);
        out.entry(id.trim().to_string()).or_insert(bbox);
    }
    Ok(out)
}

/// Ids one per line, as in an id file. Blank lines and surrounding
/// whitespace are dropped.
pub fn parse_id_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Attributes forced onto every exported root. Values are copied verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub width: Option<String>,
    pub height: Option<String>,
    pub preserve_aspect_ratio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: String,
    pub document: Document,
}

impl Fragment {
    pub fn to_xml(&self) -> String {
        self.document.to_xml()
    }

    pub fn to_xml_pretty(&self) -> String {
        self.document.to_xml_pretty()
    }
}

/// Result of a batch. Ids the oracle knew but the document lacked land in
/// `failures`; every other id yields a fragment, in request order.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub fragments: Vec<Fragment>,
    pub failures: Vec<ExtractError>,
}

#[derive(Clone, Copy, Default)]
pub(crate) struct ExportContext<'a> {
    pub debug: Option<&'a DebugLogger>,
    pub perf: Option<&'a PerfLogger>,
    pub parallel: bool,
}

/// Exports one fragment per id. The root's attributes are restored before
/// returning, whether the batch succeeded or not.
pub fn export_fragments(
    document: &mut Document,
    ids: &[String],
    options: &ExportOptions,
    oracle: &dyn BoundingBoxOracle,
) -> Result<ExportReport, IconizeError> {
    export_with_context(document, ids, options, oracle, ExportContext::default())
}

pub(crate) fn export_with_context(
    document: &mut Document,
    ids: &[String],
    options: &ExportOptions,
    oracle: &dyn BoundingBoxOracle,
    ctx: ExportContext<'_>,
) -> Result<ExportReport, IconizeError> {
    if ids.is_empty() {
        return Err(IconizeError::InvalidConfiguration(
            "no object ids to export".to_string(),
        ));
    }

    let root = document.root();
    let snapshot = document.attributes(root).to_vec();
    let result = normalize_and_export(document, ids, options, oracle, ctx);
    document.set_attributes(root, snapshot);
    if let Some(debug) = ctx.debug {
        debug.log_event(
            "export.restore",
            &[("ok", if result.is_ok() { "true" } else { "false" })],
        );
    }
    result
}

fn normalize_and_export(
    document: &mut Document,
    ids: &[String],
    options: &ExportOptions,
    oracle: &dyn BoundingBoxOracle,
    ctx: ExportContext<'_>,
) -> Result<ExportReport, IconizeError> {
    normalize_viewport(document, ctx.debug)?;

    let normalized: &Document = document;
    let boxes = timed(ctx.perf, "export.oracle", None, || {
        oracle.bounding_boxes(normalized, ids)
    })?;
    let boxes = checked_boxes(ids, &boxes)?;
    if let Some(debug) = ctx.debug {
        for (id, bbox) in ids.iter().zip(&boxes) {
            debug.log_event(
                "export.bbox",
                &[("id", id.as_str()), ("view_box", bbox.to_view_box().as_str())],
            );
        }
    }

    let cut = |(id, bbox): (&String, &BoundingBox)| {
        timed(ctx.perf, "export.fragment", Some(id.as_str()), || {
            cut_fragment(normalized, id, *bbox, options, ctx.debug)
        })
    };
    let results: Vec<Result<Fragment, ExtractError>> = if ctx.parallel {
        ids.par_iter().zip(boxes.par_iter()).map(cut).collect()
    } else {
        ids.iter().zip(boxes.iter()).map(cut).collect()
    };

    let mut report = ExportReport::default();
    for result in results {
        match result {
            Ok(fragment) => report.fragments.push(fragment),
            Err(err) => report.failures.push(err),
        }
    }
    if let Some(perf) = ctx.perf {
        perf.log_counts(
            "export",
            None,
            &[
                ("fragments", report.fragments.len() as u64),
                ("failures", report.failures.len() as u64),
            ],
        );
    }
    Ok(report)
}

// Moves the root's viewBox mapping into its transform so that every fragment
// can carry its own viewBox.
fn normalize_viewport(
    document: &mut Document,
    debug: Option<&DebugLogger>,
) -> Result<(), IconizeError> {
    let root = document.root();
    let ops = viewport_transform(
        document.attribute(root, "width"),
        document.attribute(root, "height"),
        document.attribute(root, "viewBox"),
        document.attribute(root, "preserveAspectRatio"),
    )?;
    let mut transform = transform_to_string(&ops);
    if !ops.is_empty() {
        if let Some(existing) = document
            .attribute(root, "transform")
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            transform.push(' ');
            transform.push_str(existing);
        }
        document.set_attribute(root, "transform", transform.clone());
        document.remove_attribute(root, "viewBox");
        document.remove_attribute(root, "preserveAspectRatio");
    }
    if let Some(debug) = debug {
        debug.log_event("viewport.normalize", &[("prepended", transform.as_str())]);
    }
    Ok(())
}

// Boxes in request order, or the first reason the batch cannot proceed.
fn checked_boxes(
    ids: &[String],
    boxes: &HashMap<String, BoundingBox>,
) -> Result<Vec<BoundingBox>, OracleError> {
    let mut missing: Vec<String> = Vec::new();
    for id in ids {
        if !boxes.contains_key(id) && !missing.contains(id) {
            missing.push(id.clone());
        }
    }
    if !missing.is_empty() {
        return Err(OracleError::MissingIds(missing));
    }
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let bbox = boxes[id];
        if !bbox.is_valid() {
            return Err(OracleError::InvalidBox {
                id: id.clone(),
                reason: format!(
                    "extent {}x{} must be finite and positive",
                    format_number(bbox.width),
                    format_number(bbox.height)
                ),
            });
        }
        out.push(bbox);
    }
    Ok(out)
}

fn cut_fragment(
    normalized: &Document,
    id: &str,
    bbox: BoundingBox,
    options: &ExportOptions,
    debug: Option<&DebugLogger>,
) -> Result<Fragment, ExtractError> {
    let mut clone = normalized.clone();
    extract_with_log(&mut clone, id, debug)?;

    let root = clone.root();
    clone.set_attribute(root, "viewBox", bbox.to_view_box());
    clone.remove_attribute(root, "width");
    clone.remove_attribute(root, "height");
    if options.width.is_none() && options.height.is_none() {
        clone.set_attribute(root, "width", format_number(bbox.width));
        clone.set_attribute(root, "height", format_number(bbox.height));
    }
    if let Some(width) = &options.width {
        clone.set_attribute(root, "width", width.as_str());
    }
    if let Some(height) = &options.height {
        clone.set_attribute(root, "height", height.as_str());
    }
    if let Some(par) = &options.preserve_aspect_ratio {
        clone.set_attribute(root, "preserveAspectRatio", par.as_str());
    }

    Ok(Fragment {
        id: id.to_string(),
        document: clone.compacted(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;

    const SHEET: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"><rect id="o1" x="5" y="5" width="10" height="20"/><circle id="o2" r="3"/></svg>"#;

    fn parse(text: &str) -> Document {
        Document::parse(text).expect("parse svg")
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    fn root_attr(doc: &Document, name: &str) -> Option<String> {
        doc.attribute(doc.root(), name).map(|v| v.to_string())
    }

    #[test]
    fn crops_to_bounding_box() {
        let mut doc = parse(SHEET);
        let oracle = StaticOracle::new().with_box("o1", BoundingBox::new(5.0, 5.0, 10.0, 20.0));
        let report = export_fragments(&mut doc, &ids(&["o1"]), &ExportOptions::default(), &oracle)
            .expect("export");
        assert!(report.failures.is_empty());
        let fragment = &report.fragments[0];
        assert_eq!(fragment.id, "o1");
        assert_eq!(root_attr(&fragment.document, "viewBox").as_deref(), Some("5 5 10 20"));
        assert_eq!(root_attr(&fragment.document, "width").as_deref(), Some("10"));
        assert_eq!(root_attr(&fragment.document, "height").as_deref(), Some("20"));
        assert!(fragment.document.element_by_id(fragment.document.root(), "o2").is_none());
        assert!(fragment.to_xml().contains("<rect id=\"o1\""));
    }

    #[test]
    fn explicit_options_replace_box_size() {
        let mut doc = parse(SHEET);
        let oracle = StaticOracle::new().with_box("o1", BoundingBox::new(5.0, 5.0, 10.0, 20.0));
        let options = ExportOptions {
            width: Some("64".to_string()),
            height: None,
            preserve_aspect_ratio: Some("xMinYMin".to_string()),
        };
        let report = export_fragments(&mut doc, &ids(&["o1"]), &options, &oracle).expect("export");
        let fragment = &report.fragments[0].document;
        assert_eq!(root_attr(fragment, "width").as_deref(), Some("64"));
        assert_eq!(root_attr(fragment, "height"), None);
        assert_eq!(root_attr(fragment, "preserveAspectRatio").as_deref(), Some("xMinYMin"));
    }

    #[test]
    fn missing_id_aborts_batch_and_restores_root() {
        let mut doc = parse(SHEET);
        let before = doc.to_xml();
        let oracle = StaticOracle::new().with_box("o1", BoundingBox::new(5.0, 5.0, 10.0, 20.0));
        let err = export_fragments(
            &mut doc,
            &ids(&["o1", "o2"]),
            &ExportOptions::default(),
            &oracle,
        )
        .expect_err("missing id");
        match err {
            IconizeError::Oracle(OracleError::MissingIds(missing)) => {
                assert_eq!(missing, vec!["o2".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(doc.to_xml(), before);
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let mut doc = parse(SHEET);
        let oracle = StaticOracle::new().with_box("o1", BoundingBox::new(0.0, 0.0, 0.0, 4.0));
        let err = export_fragments(&mut doc, &ids(&["o1"]), &ExportOptions::default(), &oracle)
            .expect_err("invalid box");
        assert!(matches!(
            err,
            IconizeError::Oracle(OracleError::InvalidBox { ref id, .. }) if id == "o1"
        ));
    }

    struct NormalizedOracle;

    impl BoundingBoxOracle for NormalizedOracle {
        fn bounding_boxes(
            &self,
            document: &Document,
            ids: &[String],
        ) -> Result<HashMap<String, BoundingBox>, OracleError> {
            let root = document.root();
            assert_eq!(document.attribute(root, "viewBox"), None);
            assert_eq!(
                document.attribute(root, "transform"),
                Some("translate(-52 -65) scale(5 5) rotate(5)")
            );
            Ok(ids
                .iter()
                .map(|id| (id.clone(), BoundingBox::new(0.0, 0.0, 4.0, 4.0)))
                .collect())
        }
    }

    #[test]
    fn viewport_is_normalized_then_restored() {
        let source = r#"<svg xmlns="http://www.w3.org/2000/svg" width="21" height="10" viewBox="11 13 3 2" transform="rotate(5)" preserveAspectRatio="xMidYMid"><rect id="o1"/><rect id="o2"/></svg>"#;
        let mut doc = parse(source);
        let before = doc.to_xml();
        let report = export_fragments(
            &mut doc,
            &ids(&["o1", "o2"]),
            &ExportOptions::default(),
            &NormalizedOracle,
        )
        .expect("export");
        assert_eq!(doc.to_xml(), before);
        assert_eq!(report.fragments.len(), 2);
        let fragment = &report.fragments[1].document;
        assert_eq!(
            root_attr(fragment, "transform").as_deref(),
            Some("translate(-52 -65) scale(5 5) rotate(5)")
        );
        assert_eq!(root_attr(fragment, "preserveAspectRatio"), None);
        assert_eq!(root_attr(fragment, "viewBox").as_deref(), Some("0 0 4 4"));
    }

    #[test]
    fn undeterminable_viewport_aborts_batch() {
        let source = r#"<svg xmlns="http://www.w3.org/2000/svg" width="2em" viewBox="0 0 3 2"><rect id="o1"/></svg>"#;
        let mut doc = parse(source);
        let before = doc.to_xml();
        let oracle = StaticOracle::new().with_box("o1", BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let err = export_fragments(&mut doc, &ids(&["o1"]), &ExportOptions::default(), &oracle)
            .expect_err("bad viewport");
        assert!(matches!(
            err,
            IconizeError::Transform(TransformError::SizeUndetermined)
        ));
        assert_eq!(doc.to_xml(), before);
    }

    #[test]
    fn stale_oracle_id_fails_alone() {
        let mut doc = parse(SHEET);
        let oracle = StaticOracle::new()
            .with_box("o1", BoundingBox::new(5.0, 5.0, 10.0, 20.0))
            .with_box("gone", BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let report = export_fragments(
            &mut doc,
            &ids(&["gone", "o1"]),
            &ExportOptions::default(),
            &oracle,
        )
        .expect("export");
        assert_eq!(report.fragments.len(), 1);
        assert_eq!(report.fragments[0].id, "o1");
        assert_eq!(report.failures, vec![ExtractError::IdNotFound("gone".to_string())]);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let oracle = StaticOracle::new()
            .with_box("o1", BoundingBox::new(5.0, 5.0, 10.0, 20.0))
            .with_box("o2", BoundingBox::new(-3.0, -3.0, 6.0, 6.0));
        let request = ids(&["o2", "o1"]);
        let options = ExportOptions::default();
        let mut doc = parse(SHEET);
        let sequential = export_fragments(&mut doc, &request, &options, &oracle).expect("export");
        let parallel = export_with_context(
            &mut doc,
            &request,
            &options,
            &oracle,
            ExportContext {
                parallel: true,
                ..ExportContext::default()
            },
        )
        .expect("export");
        let render = |report: &ExportReport| {
            report
                .fragments
                .iter()
                .map(|f| (f.id.clone(), f.to_xml()))
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&sequential), render(&parallel));
        assert_eq!(parallel.fragments[0].id, "o2");
    }

    #[test]
    fn empty_request_is_a_configuration_error() {
        let mut doc = parse(SHEET);
        let err = export_fragments(&mut doc, &[], &ExportOptions::default(), &StaticOracle::new())
            .expect_err("empty");
        assert!(matches!(err, IconizeError::InvalidConfiguration(_)));
    }

    #[test]
    fn query_all_listing_keeps_requested_ids() {
        let doc = parse(SHEET);
        let oracle = QueryAllOracle::new("svg1,0,0,100,100\n\no1,5,5,10,20\no2,0,0,6,6\n");
        let boxes = oracle
            .bounding_boxes(&doc, &ids(&["o1", "absent"]))
            .expect("boxes");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes["o1"], BoundingBox::new(5.0, 5.0, 10.0, 20.0));
    }

    #[test]
    fn query_all_rejects_garbage() {
        assert!(matches!(
            parse_query_all("o1,5,5,ten,20"),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_query_all("o1,5,5"),
            Err(OracleError::Malformed(_))
        ));
        let boxes = parse_query_all("a,b,1,2,3,4").expect("comma in id");
        assert!(boxes.contains_key("a,b"));
    }

    #[test]
    fn id_list_skips_blank_lines() {
        assert_eq!(parse_id_list("a\n\n  b \r\nc"), ids(&["a", "b", "c"]));
    }
}
