//! Resolves stylesheet rules into per-element `style` attributes so that the
//! extracted fragments no longer depend on a shared `<style>` block.

use std::collections::HashMap;

use lightningcss::printer::PrinterOptions;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use lightningcss::traits::ToCss;

use crate::debug::DebugLogger;
use crate::dom::{Document, NodeId, parse_style_declarations, serialize_style_declarations};
use crate::error::CssError;
use crate::selector::{SelectorPattern, Specificity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InlineSummary {
    /// Style rules parsed from the combined stylesheet text.
    pub rules: usize,
    /// Elements whose `style` attribute gained at least one declaration.
    pub styled_elements: usize,
    pub removed_style_elements: usize,
}

#[derive(Debug, Clone)]
struct StyleRule {
    // Printed selector text alongside its lowered form.
    selectors: Vec<(String, SelectorPattern)>,
    declarations: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct SelectorBinding {
    selector: String,
    specificity: Specificity,
    rule: usize,
}

/// Inlines `stylesheets` (lowest precedence last) into every matching
/// element, then removes all `<style>` elements.
pub fn inline(document: &mut Document, stylesheets: &[String]) -> Result<InlineSummary, CssError> {
    inline_with_log(document, stylesheets, None)
}

/// Inlines the caller's stylesheets followed by the document's own `<style>`
/// contents.
pub fn inline_styles(
    document: &mut Document,
    external: &[String],
) -> Result<InlineSummary, CssError> {
    inline_styles_with_log(document, external, None)
}

pub(crate) fn inline_styles_with_log(
    document: &mut Document,
    external: &[String],
    debug: Option<&DebugLogger>,
) -> Result<InlineSummary, CssError> {
    let mut sheets = external.to_vec();
    sheets.extend(collect_internal_stylesheets(document));
    inline_with_log(document, &sheets, debug)
}

pub(crate) fn inline_with_log(
    document: &mut Document,
    stylesheets: &[String],
    debug: Option<&DebugLogger>,
) -> Result<InlineSummary, CssError> {
    let css = stylesheets.join("\n");
    let rules = parse_rules(&css, debug)?;

    let root = document.root();
    let mut bindings: HashMap<NodeId, Vec<SelectorBinding>> = HashMap::new();
    for (rule_idx, rule) in rules.iter().enumerate() {
        for (selector, pattern) in &rule.selectors {
            if let Some(debug) = debug {
                debug.log_event("css.rule", &[("selector", selector.as_str())]);
            }
            let specificity = pattern.specificity();
            for node in document.elements(root) {
                if !pattern.matches(document, node) {
                    continue;
                }
                let bound = bindings.entry(node).or_default();
                match bound.iter_mut().find(|b| b.selector == *selector) {
                    Some(existing) => existing.rule = rule_idx,
                    None => bound.push(SelectorBinding {
                        selector: selector.clone(),
                        specificity,
                        rule: rule_idx,
                    }),
                }
            }
        }
    }

    let mut styled_elements = 0usize;
    for node in document.elements(root) {
        let Some(bound) = bindings.get_mut(&node) else {
            continue;
        };
        // Stable: equal specificity keeps discovery order.
        bound.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        let mut declarations = document
            .attribute(node, "style")
            .map(parse_style_declarations)
            .unwrap_or_default();
        let before = declarations.len();
        for binding in bound.iter() {
            for (property, value) in &rules[binding.rule].declarations {
                if declarations.iter().any(|(existing, _)| existing == property) {
                    continue;
                }
                declarations.push((property.clone(), value.clone()));
            }
        }
        if declarations.len() > before {
            document.set_attribute(node, "style", serialize_style_declarations(&declarations));
            styled_elements += 1;
        }
    }

    let removed_style_elements = remove_style_elements(document);
    let summary = InlineSummary {
        rules: rules.len(),
        styled_elements,
        removed_style_elements,
    };
    if let Some(debug) = debug {
        debug.log_event(
            "css.inline",
            &[
                ("rules", summary.rules.to_string().as_str()),
                ("styled_elements", summary.styled_elements.to_string().as_str()),
                (
                    "removed_style_elements",
                    summary.removed_style_elements.to_string().as_str(),
                ),
            ],
        );
    }
    Ok(summary)
}

fn parse_rules(css: &str, debug: Option<&DebugLogger>) -> Result<Vec<StyleRule>, CssError> {
    let sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|err| CssError::Malformed(err.to_string()))?;

    let mut out = Vec::new();
    let mut skipped = 0u64;
    for rule in &sheet.rules.0 {
        let CssRule::Style(style) = rule else {
            skipped += 1;
            continue;
        };
        let mut selectors = Vec::new();
        for selector in style.selectors.0.iter() {
            let text = selector
                .to_css_string(PrinterOptions::default())
                .map_err(|err| CssError::Malformed(err.to_string()))?;
            selectors.push((text, SelectorPattern::from_parsed(selector)));
        }
        let mut declarations = Vec::new();
        for property in &style.declarations.declarations {
            let value = property
                .value_to_css_string(PrinterOptions::default())
                .map_err(|err| CssError::Malformed(err.to_string()))?;
            declarations.push((property.property_id().name().to_string(), value));
        }
        for property in &style.declarations.important_declarations {
            let value = property
                .value_to_css_string(PrinterOptions::default())
                .map_err(|err| CssError::Malformed(err.to_string()))?;
            declarations.push((
                property.property_id().name().to_string(),
                format!("{value} !important"),
            ));
        }
        out.push(StyleRule {
            selectors,
            declarations,
        });
    }

    if let Some(debug) = debug {
        debug.log_event(
            "css.parse",
            &[
                ("bytes", css.len().to_string().as_str()),
                ("rules", out.len().to_string().as_str()),
            ],
        );
        debug.increment("css.at_rule_skipped", skipped);
    }
    Ok(out)
}

/// Parses `stylesheets` without applying them; returns the style rule count.
pub(crate) fn check_stylesheets(
    stylesheets: &[String],
    debug: Option<&DebugLogger>,
) -> Result<usize, CssError> {
    parse_rules(&stylesheets.join("\n"), debug).map(|rules| rules.len())
}

fn remove_style_elements(document: &mut Document) -> usize {
    let styles = document.elements_by_tag("style");
    for node in &styles {
        document.detach(*node);
    }
    styles.len()
}

/// Text of every `<style>` element in document order.
pub fn collect_internal_stylesheets(document: &Document) -> Vec<String> {
    document
        .elements_by_tag("style")
        .into_iter()
        .map(|node| strip_cdata_wrapper(&document.text_content(node)).to_string())
        .filter(|css| !css.trim().is_empty())
        .collect()
}

// Some tools escape the CDATA section, leaving the markers in the text.
fn strip_cdata_wrapper(css: &str) -> &str {
    let trimmed = css.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
        .unwrap_or(trimmed)
}

/// Replaces every `<style>` element with a single one holding `stylesheets`,
/// placed first in the first `<defs>` (created under the root when missing).
pub fn embed_stylesheets(document: &mut Document, stylesheets: &[String]) {
    remove_style_elements(document);

    let root = document.root();
    let prefix = document
        .element(root)
        .and_then(|el| el.name.split_once(':'))
        .map(|(prefix, _)| format!("{prefix}:"))
        .unwrap_or_default();
    let defs = match document.elements_by_tag("defs").first() {
        Some(defs) => *defs,
        None => {
            let defs = document.create_element(format!("{prefix}defs"));
            document.prepend(root, defs);
            defs
        }
    };

    let style = document.create_element(format!("{prefix}style"));
    document.set_attribute(style, "type", "text/css");
    let text = document.create_cdata(format!("\n{}\n", stylesheets.join("\n")));
    document.append(style, text);
    document.prepend(defs, style);
}

pub(crate) fn has_style_elements(document: &Document) -> bool {
    !document.elements_by_tag("style").is_empty()
}
