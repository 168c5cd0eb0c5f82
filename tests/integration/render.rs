//! Rendering behavior through the public `Environment` API.

use anyhow::Result;
use serde_json::json;
use stencil::core::EngineError;
use stencil::templating::{CompileErrorKind, Environment, RenderErrorKind};
use stencil::test_utils::TemplateFixture;

#[test]
fn test_escape_and_raw() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ html }}|{{ html|raw }}")?;

    let mut env = fixture.environment()?;
    let out = env.render("page", &json!({"html": "<b>&</b>"}))?;
    assert_eq!(out, "&lt;b&gt;&amp;&lt;/b&gt;|<b>&</b>");
    Ok(())
}

#[test]
fn test_auto_escape_disabled() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ html }}")?;

    let mut env = Environment::new(fixture.config().with_auto_escape(false))?;
    assert_eq!(env.render("page", &json!({"html": "<i>"}))?, "<i>");
    Ok(())
}

#[test]
fn test_filter_chain_applies_left_to_right() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ word|upper|length }} {{ word|upper }}")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({"word": "ab"}))?, "2 AB");
    Ok(())
}

#[test]
fn test_unknown_filter_suggests_close_name() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "line one\n{{ name|uper }}")?;

    let mut env = fixture.environment()?;
    let err = env.render("page", &json!({"name": "x"})).unwrap_err();
    let EngineError::Compile(compile) = err else {
        panic!("expected compile error, got {err:?}");
    };
    match compile.kind() {
        CompileErrorKind::UnknownFilter {
            name,
            line,
            suggestions,
        } => {
            assert_eq!(name, "uper");
            assert_eq!(*line, 2);
            assert!(suggestions.contains(&"upper".to_string()));
        }
        other => panic!("unexpected kind {other:?}"),
    }
    Ok(())
}

#[test]
fn test_conditionals_and_loops() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write(
        "list.html",
        "{% if items %}<ul>{% foreach items as item %}<li>{{ loop.index }}:{{ item.name }}</li>{% endforeach %}</ul>{% else %}empty{% endif %}",
    )?;

    let mut env = fixture.environment()?;
    let out = env.render("list", &json!({"items": [{"name": "a"}, {"name": "b"}]}))?;
    assert_eq!(out, "<ul><li>1:a</li><li>2:b</li></ul>");

    assert_eq!(env.render("list", &json!({"items": []}))?, "empty");
    Ok(())
}

#[test]
fn test_key_value_loops() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write(
        "map.html",
        "{% foreach scores as name => score %}{{ name }}={{ score }};{% endforeach %}|{% for k, v in scores %}{{ k }}{% endfor %}",
    )?;

    let mut env = fixture.environment()?;
    let out = env.render("map", &json!({"scores": {"ann": 3, "bob": 5}}))?;
    assert_eq!(out, "ann=3;bob=5;|annbob");
    Ok(())
}

#[test]
fn test_elseif_and_comparisons() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write(
        "grade.html",
        "{% if score >= 90 %}A{% elseif score >= 80 %}B{% else %}C{% endif %}",
    )?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("grade", &json!({"score": 95}))?, "A");
    assert_eq!(env.render("grade", &json!({"score": 85}))?, "B");
    assert_eq!(env.render("grade", &json!({"score": 10}))?, "C");
    Ok(())
}

#[test]
fn test_comments_and_literal_sections() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write(
        "page.html",
        "a{# hidden {{ x }} #}b{% literal %}{{ shown }}{% endliteral %}",
    )?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "ab{{ shown }}");
    Ok(())
}

#[test]
fn test_render_error_produces_no_output() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "before {% foreach count as n %}{{ n }}{% endforeach %} after")?;

    let mut env = fixture.environment()?;
    let err = env.render("page", &json!({"count": 3})).unwrap_err();
    let EngineError::Render(render) = err else {
        panic!("expected render error, got {err:?}");
    };
    assert!(matches!(render.kind(), RenderErrorKind::NotIterable { found: "number", .. }));
    Ok(())
}

#[test]
fn test_strict_variables_suggest_names() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "{{ usr }}")?;

    let mut env = Environment::new(fixture.config().with_strict_variables(true))?;
    let err = env.render("page", &json!({"user": "x"})).unwrap_err();
    let EngineError::Render(render) = err else {
        panic!("expected render error, got {err:?}");
    };
    match render.kind() {
        RenderErrorKind::UndefinedVariable { name, suggestions } => {
            assert_eq!(name, "usr");
            assert_eq!(suggestions, &vec!["user".to_string()]);
        }
        other => panic!("unexpected kind {other:?}"),
    }
    Ok(())
}

#[test]
fn test_script_spans_are_stripped() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("page.html", "a<?php echo 1; ?>b<% x %>c")?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({}))?, "abc");
    Ok(())
}

#[test]
fn test_render_str_uses_registry() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    let mut env = fixture.environment()?;
    env.registry_mut()
        .add("shout", |v| Ok(json!(format!("{}!", stencil::templating::filters::stringify(v)))));

    assert_eq!(env.render_str("{{ greeting|shout }}", &json!({"greeting": "hi"}))?, "hi!");
    Ok(())
}

#[test]
fn test_non_ascii_names_in_tags() -> Result<()> {
    let fixture = TemplateFixture::new()?;
    fixture.write("base.html", "<{% block título %}base{% endblock %}>")?;
    fixture.write(
        "page.html",
        "{% extends 'base' %}{% block título %}{{ café|upper }} ü{% endblock %}",
    )?;

    let mut env = fixture.environment()?;
    assert_eq!(env.render("page", &json!({"café": "crème"}))?, "<CRÈME ü>");
    Ok(())
}
