//! End-to-end tests for the `stencil` binary.

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use stencil::test_utils::TemplateFixture;

fn stencil(fixture: &TemplateFixture) -> Command {
    let mut cmd = Command::cargo_bin("stencil").unwrap();
    cmd.current_dir(fixture.root())
        .env_remove("STENCIL_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--template-dir")
        .arg(fixture.template_dir())
        .arg("--cache-dir")
        .arg(fixture.cache_dir());
    cmd
}

#[test]
fn test_render_prints_output() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "Hello {{ name }}, {{ items|length }} items")?;

    stencil(&fixture)
        .args(["render", "page", "--var", "name=<Ada>", "--var", "items=[1,2,3]"])
        .assert()
        .success()
        .stdout("Hello &lt;Ada&gt;, 3 items");
    Ok(())
}

#[test]
fn test_render_with_vars_file() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ a }}-{{ b }}")?;
    let vars = fixture.root().join("vars.json");
    fs::write(&vars, r#"{"a": "x", "b": "y"}"#)?;

    stencil(&fixture)
        .arg("render")
        .arg("page")
        .arg("--vars-file")
        .arg(&vars)
        .args(["--var", "b=z"])
        .assert()
        .success()
        .stdout("x-z");
    Ok(())
}

#[test]
fn test_render_uses_config_file() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fs::create_dir_all(fixture.root().join("views"))?;
    fs::write(fixture.root().join("views/page.html"), "{{ h }}")?;
    fs::write(
        fixture.root().join("stencil.toml"),
        "template_dir = \"views\"\ncache_dir = \"build/cache\"\nauto_escape = false\n",
    )?;

    let mut cmd = Command::cargo_bin("stencil")?;
    cmd.current_dir(fixture.root())
        .env_remove("STENCIL_CONFIG")
        .args(["render", "page", "--var", "h=<b>"])
        .assert()
        .success()
        .stdout("<b>");
    assert!(fixture.root().join("build/cache").is_dir());
    Ok(())
}

#[test]
fn test_missing_template_fails_with_suggestion() -> Result<()> {
    let fixture = TemplateFixture::new()?;

    stencil(&fixture)
        .args(["render", "nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Template 'nope' not found"))
        .stderr(predicate::str::contains("suggestion"));
    Ok(())
}

#[test]
fn test_unknown_filter_reports_suggestion() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ name|lowr }}")?;

    stencil(&fixture)
        .args(["render", "page"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown filter 'lowr'"))
        .stderr(predicate::str::contains("- lower"));
    Ok(())
}

#[test]
fn test_render_error_prints_nothing_to_stdout() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "partial {% for x in n %}{{ x }}{% endfor %}")?;

    stencil(&fixture)
        .args(["render", "page", "--var", "n=5"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Cannot iterate over number"));
    Ok(())
}

#[test]
fn test_strict_flag() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "[{{ ghost }}]")?;

    stencil(&fixture).args(["render", "page"]).assert().success().stdout("[]");
    stencil(&fixture)
        .args(["render", "page", "--strict"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
    Ok(())
}

#[test]
fn test_compile_prints_program_and_dependencies() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "{% block b %}{% endblock %}")?;
    fixture.write("page.html", "{% extends 'base' %}{% block b %}x{% endblock %}")?;

    stencil(&fixture)
        .args(["compile", "page"])
        .assert()
        .success()
        .stdout(predicate::str::contains("base.html"))
        .stdout(predicate::str::contains("\"version\":1"));

    stencil(&fixture)
        .args(["compile", "page", "--code-only"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
    Ok(())
}

#[test]
fn test_cache_list_and_clear() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "x")?;

    stencil(&fixture)
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached templates"));

    stencil(&fixture).args(["render", "page"]).assert().success();

    stencil(&fixture)
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("page.html"))
        .stdout(predicate::str::contains("0 dependencies"));

    stencil(&fixture)
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 cached template(s)"));

    stencil(&fixture)
        .args(["--quiet", "cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    Ok(())
}
