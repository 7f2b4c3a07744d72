use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

fn pagemark() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pagemark"));
    cmd.env_remove("PAGEMARK_ENV_FILE");
    cmd
}

fn json(out: &[u8]) -> serde_json::Value {
    serde_json::from_slice(out).expect("parse json")
}

#[test]
fn chunk_renders_page_text_and_respects_size() {
    let out = pagemark()
        .args(["chunk", "--chunk-size", "80", "--chunk-overlap", "10", "--file"])
        .arg(fixture("coffee.html"))
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    assert_eq!(v["kind"].as_str(), Some("chunk"));
    let chunks = v["chunks"].as_array().unwrap();
    assert!(chunks.len() > 1, "{v}");
    assert_eq!(v["count"].as_u64(), Some(chunks.len() as u64));
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c["index"].as_u64(), Some(i as u64));
        assert!(c["chars"].as_u64().unwrap() <= 80, "{c}");
    }
    let all: String = chunks
        .iter()
        .map(|c| c["text"].as_str().unwrap())
        .collect();
    assert!(all.contains("Coffee notes"));
    assert!(!all.contains("var espresso"), "script text leaked: {all}");
}

#[test]
fn chunk_reads_plain_text_from_stdin() {
    pagemark()
        .args(["chunk", "--plain", "--output", "text"])
        .write_stdin("first paragraph\n\nsecond paragraph")
        .assert()
        .success()
        .stdout(predicate::str::contains("--- chunk 0"))
        .stdout(predicate::str::contains("first paragraph\n\nsecond paragraph"));
}

#[test]
fn mark_then_clear_round_trips_the_page() {
    let tmp = tempfile::tempdir().unwrap();
    let marked = tmp.path().join("out").join("marked.html");
    let out = pagemark()
        .args(["mark", "--file"])
        .arg(fixture("coffee.html"))
        .arg("--matches")
        .arg(fixture("coffee_matches.json"))
        .arg("--out")
        .arg(&marked)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v = json(&out.stdout);
    assert_eq!(v["kind"].as_str(), Some("mark"));
    assert_eq!(v["matches"].as_u64(), Some(3));
    assert_eq!(v["anchor"]["found"].as_u64(), Some(2));
    assert_eq!(v["anchor"]["markers"].as_u64(), Some(3));
    assert_eq!(v["counter"].as_str(), Some("1 of 3"));
    assert_eq!(v["filters"], serde_json::json!(["all", "word", "sentence"]));
    assert!(v.get("html").is_none());

    let html = std::fs::read_to_string(&marked).unwrap();
    assert_eq!(html.matches("<mark").count(), 3, "{html}");
    assert!(html.contains("pagemark-bar"));
    assert!(html.contains("pagemark-style"));
    assert!(html.contains("var espresso = 1;"));

    let cleaned = tmp.path().join("cleaned.html");
    let out = pagemark()
        .args(["clear", "--file"])
        .arg(&marked)
        .arg("--out")
        .arg(&cleaned)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(json(&out.stdout)["removed"].as_u64(), Some(3));
    let html = std::fs::read_to_string(&cleaned).unwrap();
    assert!(!html.contains("<mark"));
    assert!(!html.contains("pagemark-bar"));
    assert!(!html.contains("pagemark-style"));
    assert!(html.contains("A good espresso has a thick crema."));
}

#[test]
fn mark_accepts_bare_arrays_and_prints_html_without_out() {
    let tmp = tempfile::tempdir().unwrap();
    let matches = tmp.path().join("m.json");
    std::fs::write(&matches, r#"["thick crema"]"#).unwrap();
    pagemark()
        .args(["mark", "--output", "text", "--matches"])
        .arg(&matches)
        .write_stdin("<p>A good espresso has a thick crema.</p>")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"<mark class="pagemark-mark pagemark-sentence active" data-type="sentence">thick crema</mark>"#,
        ));
}

#[test]
fn clear_without_markers_is_a_no_op() {
    let out = pagemark()
        .args(["clear", "--file"])
        .arg(fixture("coffee.html"))
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    assert_eq!(v["removed"].as_u64(), Some(0));
    assert!(v["html"].as_str().unwrap().contains("Filter coffee is brewed slowly."));
}
