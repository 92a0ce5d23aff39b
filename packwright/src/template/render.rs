//! Template rendering.
//!
//! Two reference forms are recognised: `${field}` and `{{ .Field }}`. A
//! literal `${` is written as `$${`.

use super::BuildContext;
use crate::errors::RenderError;

/// Renders `template` against `ctx`.
///
/// # Errors
///
/// Returns a [`RenderError`] for unterminated or empty references and for
/// references to fields the context does not define.
pub fn render(template: &str, ctx: &BuildContext) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut consumed = 0;

    while let Some(pos) = rest.find(|c: char| c == '$' || c == '{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let advance = if tail.starts_with("$${") {
            out.push_str("${");
            pos + 3
        } else if tail.starts_with("${") {
            let (key, len) = reference(template, consumed + pos, &tail[2..], "}")?;
            out.push_str(&resolve(key, ctx)?);
            pos + 2 + len
        } else if tail.starts_with("{{") {
            let (key, len) = reference(template, consumed + pos, &tail[2..], "}}")?;
            out.push_str(&resolve(key.trim_start_matches('.').trim(), ctx)?);
            pos + 2 + len
        } else {
            // Lone `$` or `{`; both are one byte.
            out.push_str(&tail[..1]);
            pos + 1
        };

        consumed += advance;
        rest = &rest[advance..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Returns true if `text` contains something `render` would substitute.
#[must_use]
pub fn contains_reference(text: &str) -> bool {
    text.contains("${") || text.contains("{{")
}

/// Splits a reference body off `after_open`, returning the trimmed key and
/// the number of bytes consumed including the closer.
fn reference<'a>(
    template: &str,
    offset: usize,
    after_open: &'a str,
    closer: &str,
) -> Result<(&'a str, usize), RenderError> {
    let close = after_open
        .find(closer)
        .ok_or_else(|| RenderError::Unterminated {
            template: template.to_string(),
            offset,
        })?;
    let key = after_open[..close].trim();
    if key.is_empty() {
        return Err(RenderError::EmptyReference {
            template: template.to_string(),
        });
    }
    Ok((key, close + closer.len()))
}

fn resolve(key: &str, ctx: &BuildContext) -> Result<String, RenderError> {
    ctx.lookup(key).ok_or_else(|| RenderError::undefined(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx() -> BuildContext {
        BuildContext::new()
            .with_source("ami-123")
            .with_region("eu-west-1")
            .with_build_name("web")
    }

    #[test]
    fn test_dollar_reference() {
        assert_eq!(render("built-from-${source}", &ctx()).unwrap(), "built-from-ami-123");
    }

    #[test]
    fn test_go_style_reference() {
        assert_eq!(
            render("{{ .SourceAMI }} in {{.BuildRegion}}", &ctx()).unwrap(),
            "ami-123 in eu-west-1"
        );
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(render("cost $${not_a_ref}", &ctx()).unwrap(), "cost ${not_a_ref}");
    }

    #[test]
    fn test_lone_delimiters_pass_through() {
        assert_eq!(render("price $5 {x}", &ctx()).unwrap(), "price $5 {x}");
    }

    #[test]
    fn test_unicode_around_references() {
        assert_eq!(render("é-${build_name}-ü", &ctx()).unwrap(), "é-web-ü");
    }

    #[test]
    fn test_undefined_field() {
        let err = render("${nope}", &ctx()).unwrap_err();
        assert_eq!(err, RenderError::undefined("nope"));
    }

    #[test]
    fn test_unterminated_reports_offset() {
        let err = render("abc ${source", &ctx()).unwrap_err();
        assert!(matches!(err, RenderError::Unterminated { offset: 4, .. }));

        assert!(matches!(
            render("{{ .Region }", &ctx()),
            Err(RenderError::Unterminated { offset: 0, .. })
        ));
    }

    #[test]
    fn test_empty_reference() {
        assert!(matches!(
            render("x ${ } y", &ctx()),
            Err(RenderError::EmptyReference { .. })
        ));
    }

    #[test]
    fn test_contains_reference() {
        assert!(contains_reference("${a}"));
        assert!(contains_reference("{{a}}"));
        assert!(!contains_reference("plain"));
    }

    proptest! {
        #[test]
        fn prop_text_without_references_is_unchanged(text in "[a-zA-Z0-9 _.:/=+-]{0,64}") {
            prop_assert_eq!(render(&text, &ctx()).unwrap(), text);
        }
    }
}
