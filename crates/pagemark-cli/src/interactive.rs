//! Line-driven browsing of a live overlay.

use anyhow::Result;
use pagemark_core::{Filter, HostDocument};
use pagemark_local::{Direction, Overlay};
use std::io::{BufRead, Write};

const HELP: &str = "commands: next, prev, filter <all|word|sentence|content>, close, quit";

fn show<D: HostDocument, W: Write>(doc: &D, overlay: &Overlay<D>, out: &mut W) -> Result<()> {
    let counter = overlay.counter_text(doc);
    match overlay.active() {
        Some(node) => writeln!(out, "[{}] {counter}: {}", overlay.filter(), doc.text_content(node))?,
        None => writeln!(out, "[{}] {counter}", overlay.filter())?,
    }
    Ok(())
}

/// Run commands from `input` against `overlay` until `quit`, `close` or end of input.
///
/// Returns the overlay if it is still attached.
pub fn run<D, R, W>(
    doc: &mut D,
    mut overlay: Overlay<D>,
    input: R,
    out: &mut W,
) -> Result<Option<Overlay<D>>>
where
    D: HostDocument,
    R: BufRead,
    W: Write,
{
    writeln!(out, "{HELP}")?;
    show(doc, &overlay, out)?;
    for line in input.lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        match cmd.to_ascii_lowercase().as_str() {
            "next" | "n" => overlay.navigate(doc, Direction::Next)?,
            "prev" | "p" => overlay.navigate(doc, Direction::Prev)?,
            "filter" | "f" => {
                let Some(arg) = words.next() else {
                    writeln!(out, "filter needs one of: all, word, sentence, content")?;
                    continue;
                };
                match arg.parse::<Filter>() {
                    Ok(filter) => overlay.set_filter(doc, filter)?,
                    Err(e) => {
                        writeln!(out, "{e}")?;
                        continue;
                    }
                }
            }
            "close" => {
                overlay.close(doc)?;
                writeln!(out, "closed")?;
                return Ok(None);
            }
            "quit" | "q" => return Ok(Some(overlay)),
            "help" | "?" => {
                writeln!(out, "{HELP}")?;
                continue;
            }
            other => {
                writeln!(out, "unknown command: {other} ({HELP})")?;
                continue;
            }
        }
        show(doc, &overlay, out)?;
    }
    Ok(Some(overlay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagemark_core::{Match, MatchKind};
    use pagemark_local::{anchor_matches, Dom};

    fn marked() -> (Dom, Overlay<Dom>) {
        let mut doc =
            Dom::parse("<p>Rust is fast. Rust is safe.</p><p>Memory safety without GC.</p>");
        let body = doc.body();
        let matches = [
            Match::new("Rust", MatchKind::Word),
            Match::new("Memory safety without GC.", MatchKind::Sentence),
        ];
        anchor_matches(&mut doc, body, matches.iter());
        let overlay = Overlay::inject(&mut doc).unwrap().unwrap();
        (doc, overlay)
    }

    fn drive(doc: &mut Dom, overlay: Overlay<Dom>, script: &str) -> (Option<Overlay<Dom>>, String) {
        let mut out = Vec::new();
        let left = run(doc, overlay, script.as_bytes(), &mut out).unwrap();
        (left, String::from_utf8(out).unwrap())
    }

    #[test]
    fn navigates_and_filters() {
        let (mut doc, overlay) = marked();
        let (left, out) = drive(&mut doc, overlay, "next\nnext\nnext\nfilter sentence\nquit\n");
        let lines: Vec<&str> = out.lines().skip(1).collect();
        assert_eq!(lines[0], "[all] 1 of 3: Rust");
        assert_eq!(lines[1], "[all] 2 of 3: Rust");
        assert_eq!(lines[2], "[all] 3 of 3: Memory safety without GC.");
        assert_eq!(lines[3], "[all] 1 of 3: Rust");
        assert_eq!(lines[4], "[sentence] 1 of 1: Memory safety without GC.");
        assert_eq!(lines.len(), 5);
        assert!(left.is_some());
    }

    #[test]
    fn close_restores_the_page() {
        let (mut doc, overlay) = marked();
        let (left, out) = drive(&mut doc, overlay, "prev\nclose\nnext\n");
        assert!(left.is_none());
        assert!(out.contains("[all] 3 of 3: Memory safety without GC."), "{out}");
        assert!(out.trim_end().ends_with("closed"), "{out}");
        assert!(!doc.to_html().unwrap().contains("<mark"));
    }

    #[test]
    fn reports_bad_input_and_keeps_going() {
        let (mut doc, overlay) = marked();
        let (left, out) = drive(&mut doc, overlay, "jump\nfilter\nfilter bogus\n\n");
        assert!(out.contains("unknown command: jump"), "{out}");
        assert!(out.contains("filter needs one of"), "{out}");
        assert!(out.contains("bogus"), "{out}");
        assert!(left.is_some());
    }
}
