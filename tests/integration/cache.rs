//! Compile cache behavior across renders and environments.

use anyhow::Result;
use serde_json::json;
use std::fs;
use std::time::{Duration, SystemTime};
use stencil::templating::{CacheKey, Environment, Lookup, TemplateCache};
use stencil::test_utils::TemplateFixture;

#[test]
fn test_unchanged_template_compiles_once() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "[{% block b %}{% endblock %}]")?;
    fixture.write("page.html", "{% extends 'base' %}{% block b %}{{ n }}{% endblock %}")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({"n": 1}))?, "[1]");
    assert_eq!(env.render("page", &json!({"n": 2}))?, "[2]");
    assert_eq!(env.render("page", &json!({"n": 3}))?, "[3]");

    let stats = env.stats();
    assert_eq!(stats.compiles, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);

    let mut other = fixture.environment()?;
    assert_eq!(other.render("page", &json!({"n": 4}))?, "[4]");
    assert_eq!(other.stats().compiles, 0);
    Ok(())
}

#[test]
fn test_dependency_change_is_picked_up() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "<{% block b %}{% endblock %}>")?;
    fixture.write("page.html", "{% extends 'base' %}{% block b %}x{% endblock %}")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "<x>");

    fixture.update("base.html", "({% block b %}{% endblock %})")?;
    assert_eq!(env.render("page", &json!({}))?, "(x)");
    assert_eq!(env.stats().compiles, 2);

    assert_eq!(env.render("page", &json!({}))?, "(x)");
    assert_eq!(env.stats().compiles, 2);
    assert_eq!(env.cache().entries()?.len(), 2);
    Ok(())
}

#[test]
fn test_new_include_becomes_dependency() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "plain")?;
    fixture.write("part.html", "P")?;

    let mut env = fixture.environment()?;
    let compiled = env.compile("page")?;
    assert!(compiled.dependencies.is_empty());

    fixture.update("page.html", "with {% include 'part' %}")?;
    let compiled = env.compile("page")?;
    assert_eq!(compiled.dependencies.len(), 1);

    fixture.update("part.html", "Q")?;
    assert_eq!(env.render("page", &json!({}))?, "with Q");
    Ok(())
}

#[test]
fn test_shadowing_include_is_picked_up() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("emails/welcome.html", "[{% include 'footer' %}]")?;
    fixture.write("footer.html", "global")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("emails/welcome", &json!({}))?, "[global]");

    let local = fixture.write("emails/footer.html", "local")?.canonicalize()?;
    assert_eq!(env.render("emails/welcome", &json!({}))?, "[local]");
    assert_eq!(env.compile("emails/welcome")?.dependencies, vec![local]);
    assert_eq!(env.stats().compiles, 2);
    Ok(())
}

#[test]
fn test_shadowing_parent_is_picked_up() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("layout.html", "G{% block b %}{% endblock %}")?;
    fixture.write("admin/page.html", "{% extends 'layout' %}{% block b %}!{% endblock %}")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("admin/page", &json!({}))?, "G!");

    fixture.write("admin/layout.html", "A{% block b %}{% endblock %}")?;
    assert_eq!(env.render("admin/page", &json!({}))?, "A!");
    Ok(())
}

#[test]
fn test_entry_files_and_metadata() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    let source = fixture.write("page.html", "{% include 'part' %}")?.canonicalize()?;
    let part = fixture.write("part.html", "p")?.canonicalize()?;

    let mut env = fixture.environment()?;
    let compiled = env.compile("page")?;

    let entries = env.cache().entries()?;
    assert_eq!(entries.len(), 1);
    let (key, metadata) = &entries[0];
    assert_eq!(metadata.source, source);
    assert_eq!(metadata.dependencies, vec![part]);
    assert!(metadata.is_fresh());

    let code = fs::read_to_string(env.cache().code_path(key))?;
    assert_eq!(code, compiled.code);
    assert!(env.cache().meta_path(key).exists());
    Ok(())
}

#[test]
fn test_key_changes_with_modification_time() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    let source = fixture.write("page.html", "x")?;

    let before = CacheKey::compute(&source, &[], "salt")?;
    assert_eq!(before, CacheKey::compute(&source, &[], "salt")?);
    assert_ne!(before, CacheKey::compute(&source, &[], "other")?);

    fixture.set_modified(&source, SystemTime::now() - Duration::from_secs(60))?;
    assert_ne!(before, CacheKey::compute(&source, &[], "salt")?);
    Ok(())
}

#[test]
fn test_stale_entry_is_evicted_and_replaced() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    let source = fixture.write("page.html", "v")?;

    let mut env = fixture.environment()?;
    env.render("page", &json!({}))?;

    // A file newer than the recorded compile time makes the entry stale
    // without changing its key.
    let entries = env.cache().entries()?;
    let key = entries[0].0.clone();
    let meta_path = env.cache().meta_path(&key);
    let mut meta: serde_json::Value = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
    meta["compiled_at"] = json!("2001-01-01T00:00:00Z");
    fs::write(&meta_path, meta.to_string())?;

    let cache = TemplateCache::new(fixture.cache_dir())?;
    assert!(matches!(cache.lookup(&key), Lookup::Stale));

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "v");
    assert_eq!(env.stats().stale, 1);
    assert!(matches!(env.cache().lookup(&key), Lookup::Fresh { .. }));
    assert!(source.exists());
    Ok(())
}

#[test]
fn test_configuration_changes_key() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ h }}")?;

    let mut escaped = fixture.environment()?;
    assert_eq!(escaped.render("page", &json!({"h": "<"}))?, "&lt;");

    let mut raw = Environment::new(fixture.config().with_auto_escape(false))?;
    assert_eq!(raw.render("page", &json!({"h": "<"}))?, "<");
    assert_eq!(raw.stats().compiles, 1);
    assert_eq!(raw.cache().entries()?.len(), 2);
    Ok(())
}

#[test]
fn test_clear_removes_everything() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("a.html", "a")?;
    fixture.write("b.html", "b")?;

    let mut env = fixture.environment()?;
    env.render("a", &json!({}))?;
    env.render("b", &json!({}))?;
    assert_eq!(env.cache().entries()?.len(), 2);

    assert_eq!(env.cache().clear()?, 2);
    assert!(env.cache().entries()?.is_empty());

    assert_eq!(env.render("a", &json!({}))?, "a");
    assert_eq!(env.stats().compiles, 3);
    Ok(())
}
