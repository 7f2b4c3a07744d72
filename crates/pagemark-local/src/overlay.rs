//! In-page navigation bar over the markers of one highlight run.

use crate::anchor::{marker_kind, MARK_CLASS};
use pagemark_core::{ElementSpec, Filter, HostDocument, MatchKind, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const BAR_CLASS: &str = "pagemark-bar";
pub const ACTIVE_CLASS: &str = "active";

const NAV_CLASS: &str = "pagemark-nav";
const NAV_BUTTON_CLASS: &str = "pagemark-nav-btn";
const COUNTER_CLASS: &str = "pagemark-counter";
const MODE_CLASS: &str = "pagemark-mode";
const MODE_BUTTON_CLASS: &str = "pagemark-mode-btn";
const CLOSE_CLASS: &str = "pagemark-close";

/// Styles for markers and the bar, for hosts that render the document.
pub const STYLESHEET: &str = r#"
.pagemark-mark { background: #fff3a0; color: inherit; border-radius: 2px; padding: 0 1px; }
.pagemark-word { background: #ffe066; }
.pagemark-sentence { background: #fff3a0; }
.pagemark-content { background: #d3f9d8; }
.pagemark-mark.active { outline: 2px solid #f08c00; background: #ffc078; }
.pagemark-bar { position: fixed; top: 12px; right: 12px; z-index: 2147483647; display: flex;
  gap: 8px; align-items: center; padding: 6px 10px; background: #212529; color: #f8f9fa;
  border-radius: 8px; font: 13px/1.4 system-ui, sans-serif; box-shadow: 0 4px 16px rgba(0,0,0,.3); }
.pagemark-nav, .pagemark-mode { display: flex; gap: 4px; align-items: center; }
.pagemark-bar button { background: #343a40; color: inherit; border: 0; border-radius: 4px;
  padding: 2px 8px; cursor: pointer; }
.pagemark-mode-btn.active { background: #f08c00; color: #212529; }
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Live controller for one injected bar.
///
/// The marker list is captured once at injection. Closing consumes the controller.
pub struct Overlay<D: HostDocument> {
    highlights: Vec<(D::Node, MatchKind)>,
    current: usize,
    filter: Filter,
    bar: D::Node,
    counter: D::Node,
    buttons: Vec<(Filter, D::Node)>,
}

impl<D: HostDocument> std::fmt::Debug for Overlay<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("highlights", &self.highlights.len())
            .field("current", &self.current)
            .field("filter", &self.filter)
            .finish()
    }
}

fn element<D: HostDocument>(doc: &mut D, spec: ElementSpec, text: &str) -> Result<D::Node> {
    let node = doc.create_element(&spec);
    if !text.is_empty() {
        doc.set_text_content(node, text)?;
    }
    Ok(node)
}

fn remove_bars<D: HostDocument>(doc: &mut D) -> usize {
    let bars = doc.elements_with_class(doc.body(), BAR_CLASS);
    for bar in &bars {
        doc.remove(*bar);
    }
    bars.len()
}

impl<D: HostDocument> Overlay<D> {
    /// Index the document's markers and attach a fresh bar, replacing any earlier one.
    ///
    /// Returns `None` (and attaches nothing) when the document has no markers.
    pub fn inject(doc: &mut D) -> Result<Option<Self>> {
        remove_bars(doc);
        let highlights: Vec<(D::Node, MatchKind)> = doc
            .elements_with_class(doc.body(), MARK_CLASS)
            .into_iter()
            .map(|n| (n, marker_kind(&*doc, n)))
            .collect();
        if highlights.is_empty() {
            debug!("no markers, bar not injected");
            return Ok(None);
        }

        let mut counts: BTreeMap<MatchKind, usize> = BTreeMap::new();
        for (_, kind) in &highlights {
            *counts.entry(*kind).or_insert(0) += 1;
        }

        let bar = element(doc, ElementSpec::new("div").class(BAR_CLASS), "")?;

        let nav = element(doc, ElementSpec::new("div").class(NAV_CLASS), "")?;
        let prev = element(
            doc,
            ElementSpec::new("button")
                .class(NAV_BUTTON_CLASS)
                .attr("data-dir", "prev"),
            "▲",
        )?;
        let counter = element(
            doc,
            ElementSpec::new("span").class(COUNTER_CLASS),
            &format!("1 of {}", highlights.len()),
        )?;
        let next = element(
            doc,
            ElementSpec::new("button")
                .class(NAV_BUTTON_CLASS)
                .attr("data-dir", "next"),
            "▼",
        )?;
        for child in [prev, counter, next] {
            doc.append_child(nav, child)?;
        }

        let mode = element(doc, ElementSpec::new("div").class(MODE_CLASS), "")?;
        let mut buttons = Vec::with_capacity(4);
        let all = element(
            doc,
            ElementSpec::new("button")
                .class(MODE_BUTTON_CLASS)
                .class(ACTIVE_CLASS)
                .attr("data-filter", Filter::All.as_str()),
            "All",
        )?;
        buttons.push((Filter::All, all));
        for (kind, count) in &counts {
            let button = element(
                doc,
                ElementSpec::new("button")
                    .class(MODE_BUTTON_CLASS)
                    .attr("data-filter", kind.as_str()),
                &format!("{}:{count}", kind.short_label()),
            )?;
            buttons.push((Filter::from(*kind), button));
        }
        for (_, button) in &buttons {
            doc.append_child(mode, *button)?;
        }

        let close = element(doc, ElementSpec::new("button").class(CLOSE_CLASS), "✕")?;
        for child in [nav, mode, close] {
            doc.append_child(bar, child)?;
        }
        let body = doc.body();
        doc.append_child(body, bar)?;

        let mut overlay = Self {
            highlights,
            current: 0,
            filter: Filter::All,
            bar,
            counter,
            buttons,
        };
        overlay.go_to(doc, 0)?;
        Ok(Some(overlay))
    }

    fn filtered(&self) -> Vec<D::Node> {
        self.highlights
            .iter()
            .filter(|(_, kind)| self.filter.admits(*kind))
            .map(|(n, _)| *n)
            .collect()
    }

    fn clear_active(&self, doc: &mut D) -> Result<()> {
        for (n, _) in &self.highlights {
            doc.remove_class(*n, ACTIVE_CLASS)?;
        }
        Ok(())
    }

    /// Jump to `index` in the filtered view, wrapping at both ends.
    fn go_to(&mut self, doc: &mut D, index: isize) -> Result<()> {
        let filtered = self.filtered();
        if filtered.is_empty() {
            self.current = 0;
            self.clear_active(doc)?;
            return doc.set_text_content(self.counter, "0 of 0");
        }
        let len = filtered.len();
        let index = if index < 0 {
            len - 1
        } else if index as usize >= len {
            0
        } else {
            index as usize
        };
        self.current = index;
        self.clear_active(doc)?;
        let target = filtered[index];
        doc.add_class(target, ACTIVE_CLASS)?;
        doc.scroll_into_view(target);
        doc.set_text_content(self.counter, &format!("{} of {len}", index + 1))
    }

    pub fn navigate(&mut self, doc: &mut D, direction: Direction) -> Result<()> {
        let step = match direction {
            Direction::Next => 1,
            Direction::Prev => -1,
        };
        self.go_to(doc, self.current as isize + step)
    }

    pub fn set_filter(&mut self, doc: &mut D, filter: Filter) -> Result<()> {
        for (f, button) in &self.buttons {
            if *f == filter {
                doc.add_class(*button, ACTIVE_CLASS)?;
            } else {
                doc.remove_class(*button, ACTIVE_CLASS)?;
            }
        }
        self.filter = filter;
        self.current = 0;
        debug!(filter = %filter, "filter changed");
        self.go_to(doc, 0)
    }

    /// Unwrap every captured marker and detach the bar.
    pub fn close(self, doc: &mut D) -> Result<()> {
        for (n, _) in &self.highlights {
            if let Err(e) = doc.unwrap(*n) {
                warn!(error = %e, "marker already gone");
            }
        }
        doc.remove(self.bar);
        Ok(())
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    /// Position in the filtered view and its length; `(0, 0)` when the view is empty.
    pub fn position(&self) -> (usize, usize) {
        let len = self.filtered().len();
        if len == 0 {
            (0, 0)
        } else {
            (self.current, len)
        }
    }

    /// The active marker, if the filtered view is non-empty.
    pub fn active(&self) -> Option<D::Node> {
        self.filtered().get(self.current).copied()
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    pub fn bar(&self) -> D::Node {
        self.bar
    }

    pub fn counter_text(&self, doc: &D) -> String {
        doc.text_content(self.counter)
    }

    /// Filters offered by the bar, in display order.
    pub fn filters(&self) -> Vec<Filter> {
        self.buttons.iter().map(|(f, _)| *f).collect()
    }
}

/// Remove every marker and bar from `doc`, with or without a live controller.
///
/// Returns the number of markers unwrapped.
pub fn clear<D: HostDocument>(doc: &mut D) -> Result<usize> {
    remove_bars(doc);
    let marks = doc.elements_with_class(doc.body(), MARK_CLASS);
    for m in &marks {
        doc.unwrap(*m)?;
    }
    Ok(marks.len())
}
