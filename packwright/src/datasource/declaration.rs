//! Datasource declarations as they appear in a build configuration.

use super::spec::AttrType;
use crate::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use crate::errors::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").ok());

const BAD_IDENTIFIER_DETAIL: &str =
    "A name must start with a letter or underscore and may contain only letters, digits, underscores, and dashes.";

/// Returns true if `name` is a valid type or declaration name.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

/// Identity of a declaration: `data.<type>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasourceRef {
    /// Datasource type, selects the plugin.
    pub kind: String,
    /// Declaration name, unique within the type.
    pub name: String,
}

impl DatasourceRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Splits `data.<type>.<name>[.<attr>...]` into the reference and the
    /// attribute path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no `data.` prefix or lacks a type or
    /// name.
    pub fn parse_path(path: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let invalid = || ConfigError::invalid_field("$ref", format!("'{path}' is not a data.<type>.<name> reference"));
        let rest = path.strip_prefix("data.").ok_or_else(invalid)?;
        let mut parts = rest.split('.');
        let kind = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let attrs: Vec<String> = parts.map(str::to_string).collect();
        if attrs.iter().any(String::is_empty) {
            return Err(invalid());
        }
        Ok((Self::new(kind, name), attrs))
    }
}

impl fmt::Display for DatasourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data.{}.{}", self.kind, self.name)
    }
}

impl FromStr for DatasourceRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse_path(s)? {
            (r, attrs) if attrs.is_empty() => Ok(r),
            _ => Err(ConfigError::invalid_field(
                "depends_on",
                format!("'{s}' must name a declaration, not an attribute"),
            )),
        }
    }
}

impl TryFrom<String> for DatasourceRef {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasourceRef> for String {
    fn from(value: DatasourceRef) -> Self {
        value.to_string()
    }
}

/// A reference to another declaration's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefExpr {
    /// `data.<type>.<name>[.<attr>...]`
    #[serde(rename = "$ref")]
    pub path: String,
}

/// A value that is not known until apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnknownExpr {
    /// The type the value will have.
    #[serde(rename = "$unknown")]
    pub ty: AttrType,
}

/// An attribute value in a declaration body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    /// `{"$ref": "data.t.n.attr"}`
    Reference(RefExpr),
    /// `{"$unknown": "string"}`
    Unknown(UnknownExpr),
    /// Any other JSON value.
    Literal(serde_json::Value),
}

impl Expr {
    /// Creates a reference expression.
    #[must_use]
    pub fn reference(path: impl Into<String>) -> Self {
        Self::Reference(RefExpr { path: path.into() })
    }

    /// Creates an unknown value of type `ty`.
    #[must_use]
    pub const fn unknown(ty: AttrType) -> Self {
        Self::Unknown(UnknownExpr { ty })
    }

    /// Creates a literal.
    #[must_use]
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }
}

/// A `data "<type>" "<name>"` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceDeclaration {
    /// Datasource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Declaration name.
    pub name: String,
    /// Explicit dependencies, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<DatasourceRef>,
    /// Configuration passed to the plugin.
    #[serde(default)]
    pub body: BTreeMap<String, Expr>,
    /// Where the block was declared.
    #[serde(default)]
    pub range: Option<SourceRange>,
}

impl DatasourceDeclaration {
    /// Creates a declaration with an empty body.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            depends_on: Vec::new(),
            body: BTreeMap::new(),
            range: None,
        }
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, dep: DatasourceRef) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Sets a body attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.body.insert(name.into(), expr);
        self
    }

    /// Sets the source range.
    #[must_use]
    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Returns the declaration's identity.
    #[must_use]
    pub fn reference(&self) -> DatasourceRef {
        DatasourceRef::new(&self.kind, &self.name)
    }

    /// Returns declared dependencies plus every declaration the body
    /// references.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic for each malformed body reference.
    pub fn dependencies(&self) -> Result<BTreeSet<DatasourceRef>, Diagnostics> {
        let mut deps: BTreeSet<DatasourceRef> = self.depends_on.iter().cloned().collect();
        let mut diags = Diagnostics::new();
        for (attr, expr) in &self.body {
            if let Expr::Reference(ref r) = *expr {
                match DatasourceRef::parse_path(&r.path) {
                    Ok((dep, _)) => {
                        deps.insert(dep);
                    }
                    Err(e) => diags.push(
                        Diagnostic::error("Invalid reference")
                            .with_detail(format!("Attribute \"{attr}\" of {}: {e}", self.reference()))
                            .with_subject(self.range.clone()),
                    ),
                }
            }
        }
        if diags.is_empty() {
            Ok(deps)
        } else {
            Err(diags)
        }
    }

    /// Checks the type and name against identifier syntax.
    #[must_use]
    pub fn validate_identifiers(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if !is_valid_identifier(&self.kind) {
            diags.push(
                Diagnostic::error("Invalid data source name")
                    .with_detail(BAD_IDENTIFIER_DETAIL)
                    .with_subject(self.range.clone()),
            );
        }
        if !is_valid_identifier(&self.name) {
            diags.push(
                Diagnostic::error("Invalid data resource name")
                    .with_detail(BAD_IDENTIFIER_DETAIL)
                    .with_subject(self.range.clone()),
            );
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("http"));
        assert!(is_valid_identifier("image-iteration"));
        assert!(is_valid_identifier("_private2"));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_invalid_identifiers_reported_separately() {
        let decl = DatasourceDeclaration::new("bad type", "bad.name");
        let diags = decl.validate_identifiers();
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["Invalid data source name", "Invalid data resource name"]);
    }

    #[test]
    fn test_parse_path() {
        let (r, attrs) = DatasourceRef::parse_path("data.http.a.body.id").unwrap();
        assert_eq!(r, DatasourceRef::new("http", "a"));
        assert_eq!(attrs, vec!["body", "id"]);
        assert!(DatasourceRef::parse_path("var.region").is_err());
        assert!(DatasourceRef::parse_path("data.http").is_err());
        assert!(DatasourceRef::parse_path("data.http.a..x").is_err());
    }

    #[test]
    fn test_ref_serde_as_string() {
        let r: DatasourceRef = serde_json::from_value(json!("data.http.a")).unwrap();
        assert_eq!(r.to_string(), "data.http.a");
        assert_eq!(serde_json::to_value(&r).unwrap(), json!("data.http.a"));
        assert!(serde_json::from_value::<DatasourceRef>(json!("data.http.a.body")).is_err());
    }

    #[test]
    fn test_expr_forms() {
        let body: BTreeMap<String, Expr> = serde_json::from_value(json!({
            "url": "https://example.com",
            "id": {"$ref": "data.http.a.id"},
            "region": {"$unknown": "string"},
            "labels": {"os": "linux"}
        }))
        .unwrap();

        assert_eq!(body["url"], Expr::literal("https://example.com"));
        assert_eq!(body["id"], Expr::reference("data.http.a.id"));
        assert_eq!(body["region"], Expr::unknown(AttrType::String));
        assert_eq!(body["labels"], Expr::literal(json!({"os": "linux"})));
    }

    #[test]
    fn test_dependencies_union_declared_and_body() {
        let decl = DatasourceDeclaration::new("http", "c")
            .depends_on(DatasourceRef::new("http", "a"))
            .with_attr("id", Expr::reference("data.http.b.id"))
            .with_attr("again", Expr::reference("data.http.a"));

        let deps: Vec<String> = decl
            .dependencies()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(deps, vec!["data.http.a", "data.http.b"]);
    }

    #[test]
    fn test_malformed_body_reference() {
        let decl = DatasourceDeclaration::new("http", "c").with_attr("id", Expr::reference("http.b"));
        let diags = decl.dependencies().unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(diags.to_string().contains("data.http.c"));
    }
}
