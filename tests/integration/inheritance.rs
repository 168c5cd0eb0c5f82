//! Template inheritance, inclusion and cycle detection.

use anyhow::Result;
use serde_json::json;
use stencil::core::EngineError;
use stencil::templating::{CompileError, CompileErrorKind};
use stencil::test_utils::TemplateFixture;

fn compile_error(err: EngineError) -> CompileError {
    match err {
        EngineError::Compile(e) => e,
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn test_child_overrides_parent_block() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write(
        "base.html",
        "<title>{% block title %}Site{% endblock %}</title><main>{% block body %}default{% endblock %}</main>",
    )?;
    fixture.write(
        "page.html",
        "{% extends 'base' %}ignored text{% block title %}{{ name }} - {% parent %}{% endblock %}",
    )?;

    let mut env = fixture.environment()?;
    let compiled = env.compile("page")?;
    assert_eq!(compiled.dependencies, vec![fixture.template_dir().join("base.html").canonicalize()?]);

    let out = env.render("page", &json!({"name": "Home"}))?;
    assert_eq!(out, "<title>Home - Site</title><main>default</main>");
    Ok(())
}

#[test]
fn test_three_level_chain() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("g.html", "[{% block b %}G{% endblock %}]")?;
    fixture.write("p.html", "{% extends 'g' %}{% block b %}P{% parent %}{% endblock %}")?;
    fixture.write("c.html", "{% extends 'p' %}{% block b %}C{% parent %}{% endblock %}")?;

    let mut env = fixture.environment()?;
    let compiled = env.compile("c")?;
    assert_eq!(compiled.dependencies.len(), 2);
    assert_eq!(env.render("c", &json!({}))?, "[CPG]");
    Ok(())
}

#[test]
fn test_include_inlines_and_records_dependency() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "<p>{% include 'partials/footer' %}</p>")?;
    fixture.write("partials/footer.html", "(c) {{ year }}")?;

    let mut env = fixture.environment()?;
    let compiled = env.compile("page")?;
    assert_eq!(compiled.dependencies.len(), 1);
    assert!(compiled.dependencies[0].ends_with("partials/footer.html"));
    assert_eq!(env.render("page", &json!({"year": 2024}))?, "<p>(c) 2024</p>");
    Ok(())
}

#[test]
fn test_include_inside_child_block() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "<{% block body %}{% endblock %}>")?;
    fixture.write("page.html", "{% extends 'base' %}{% block body %}{% include 'part' %}{% endblock %}")?;
    fixture.write("part.html", "inc")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "<inc>");
    assert_eq!(env.compile("page")?.dependencies.len(), 2);
    Ok(())
}

#[test]
fn test_missing_include_is_compile_error() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{% include 'missing' %}")?;

    let mut env = fixture.environment()?;
    let err = env.render("page", &json!({})).unwrap_err();
    let err = compile_error(err);
    assert!(err.path.as_deref().is_some_and(|p| p.ends_with("page.html")));
    assert!(matches!(
        err.kind(),
        CompileErrorKind::TemplateNotFound { name, .. } if name == "missing"
    ));
    assert!(env.cache().entries()?.is_empty());
    Ok(())
}

#[test]
fn test_include_cycle_is_detected() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("a.html", "A{% include 'b' %}")?;
    fixture.write("b.html", "B{% include 'a' %}")?;

    let mut env = fixture.environment()?;
    let err = env.render("a", &json!({})).unwrap_err();
    match compile_error(err).kind() {
        CompileErrorKind::CircularDependency { path, chain } => {
            assert!(path.ends_with("a.html"));
            assert_eq!(chain.len(), 3);
            assert_eq!(chain.first(), chain.last());
        }
        other => panic!("unexpected kind {other:?}"),
    }
    Ok(())
}

#[test]
fn test_cycle_through_extends_and_include() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "{% include 'page' %}{% block b %}{% endblock %}")?;
    fixture.write("page.html", "{% extends 'base' %}{% block b %}x{% endblock %}")?;

    let mut env = fixture.environment()?;
    let err = env.render("page", &json!({})).unwrap_err();
    assert!(compile_error(err).is_circular_dependency());
    Ok(())
}

#[test]
fn test_repeated_include_is_not_a_cycle() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{% include 'dot' %}{% include 'dot' %}")?;
    fixture.write("dot.html", ".")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "..");
    assert_eq!(env.compile("page")?.dependencies.len(), 1);
    Ok(())
}
