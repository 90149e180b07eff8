//! Validation of generation-service replies.
//!
//! A reply is accepted only as a whole: the JSON shape, the mandatory files,
//! every file path, and the manifest must all check out. Nothing from a
//! rejected reply reaches the disk.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::errors::GenerationError;
use crate::util::extract_json_object;
use crate::workspace::{FileSet, validate_relative_path};

/// Application entry point every generated project must contain.
pub const ENTRY_POINT: &str = "App.js";
/// Package descriptor every generated project must contain.
pub const MANIFEST: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub dependencies: BTreeMap<String, String>,
}

/// A validated generation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedApp {
    pub file_set: FileSet,
    pub app_name: String,
    pub requirements: Vec<String>,
    pub manifest: Manifest,
}

impl GeneratedApp {
    /// Android application id derived from the manifest name, e.g.
    /// `GeneratedCalculator` → `com.generatedcalculator`.
    pub fn app_identifier(&self) -> String {
        let mut segment: String = self
            .manifest
            .name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if segment.chars().next().is_none_or(|c| c.is_ascii_digit()) {
            segment.insert_str(0, "app");
        }
        format!("com.{}", segment)
    }
}

fn malformed(msg: impl Into<String>) -> GenerationError {
    GenerationError::MalformedResponse(msg.into())
}

/// Parse and validate the text of a generation reply.
pub fn parse_generation(text: &str) -> Result<GeneratedApp, GenerationError> {
    let json = extract_json_object(text).ok_or_else(|| malformed("no JSON object in reply"))?;
    let value: Value = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(malformed("reply is not a JSON object"));
    };

    let files = root
        .get("files")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing or invalid 'files'"))?;
    let app_name = root
        .get("appName")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| malformed("missing or invalid 'appName'"))?
        .to_string();
    let requirements = parse_requirements(&root)?;
    let file_set = parse_files(files)?;

    let missing: Vec<String> = [ENTRY_POINT, MANIFEST]
        .into_iter()
        .filter(|path| {
            file_set
                .get(path)
                .is_none_or(|content| content.as_bytes().is_empty())
        })
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(GenerationError::IncompleteResponse { missing });
    }

    let manifest_text = file_set
        .get(MANIFEST)
        .and_then(|content| content.as_text())
        .ok_or_else(|| GenerationError::InvalidManifest("not valid UTF-8".to_string()))?;
    let manifest = parse_manifest(manifest_text)?;

    Ok(GeneratedApp {
        file_set,
        app_name,
        requirements,
        manifest,
    })
}

fn parse_requirements(root: &Map<String, Value>) -> Result<Vec<String>, GenerationError> {
    let list = root
        .get("requirements")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing or invalid 'requirements'"))?;
    list.iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed("'requirements' must be a list of strings"))
        })
        .collect()
}

fn parse_files(files: &Map<String, Value>) -> Result<FileSet, GenerationError> {
    let mut set = FileSet::new();
    for (path, content) in files {
        let Some(text) = content.as_str() else {
            return Err(malformed(format!("file '{}' is not a string", path)));
        };
        validate_relative_path(path)
            .map_err(|_| malformed(format!("unsafe file path '{}'", path)))?;
        set.insert(path.clone(), text.to_string());
    }
    Ok(set)
}

/// Parse `package.json`; it must declare a non-empty name and a dependency
/// object.
pub fn parse_manifest(text: &str) -> Result<Manifest, GenerationError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| GenerationError::InvalidManifest(e.to_string()))?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| GenerationError::InvalidManifest("missing 'name'".to_string()))?
        .to_string();
    let dependencies = value
        .get("dependencies")
        .and_then(Value::as_object)
        .ok_or_else(|| GenerationError::InvalidManifest("missing 'dependencies'".to_string()))?
        .iter()
        .map(|(dep, version)| {
            let version = match version {
                Value::String(v) => v.clone(),
                other => other.to_string(),
            };
            (dep.clone(), version)
        })
        .collect();

    Ok(Manifest { name, dependencies })
}

/// Outcome of the security review pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityVerdict {
    Safe,
    Issues(Vec<String>),
}

/// Interpret the reviewer's reply: `SAFE` (any case, optional trailing
/// period) passes; anything else is a list of issues.
pub fn parse_security_verdict(text: &str) -> SecurityVerdict {
    let trimmed = text.trim();
    if trimmed.trim_end_matches('.').eq_ignore_ascii_case("safe") {
        return SecurityVerdict::Safe;
    }
    if trimmed.is_empty() {
        return SecurityVerdict::Issues(vec!["empty security review reply".to_string()]);
    }

    let parsed = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
        extract_json_object(trimmed).and_then(|json| serde_json::from_str(json).ok())
    });
    let issues = match parsed {
        Some(value) => issues_from_value(&value),
        None => vec![trimmed.to_string()],
    };
    if issues.is_empty() {
        SecurityVerdict::Issues(vec![trimmed.to_string()])
    } else {
        SecurityVerdict::Issues(issues)
    }
}

fn issues_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(issue_text).collect(),
        Value::Object(map) => match map.get("issues") {
            Some(Value::Array(items)) => items.iter().map(issue_text).collect(),
            _ => vec![value.to_string()],
        },
        other => vec![issue_text(other)],
    }
}

fn issue_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["description", "issue", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(files: Value) -> String {
        json!({
            "files": files,
            "appName": "Calculator",
            "requirements": ["react", "react-native"],
        })
        .to_string()
    }

    fn calculator_manifest() -> String {
        json!({
            "name": "GeneratedCalculator",
            "dependencies": { "react": "18.2.0", "react-native": "0.72.0" }
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_reply_inside_prose() {
        let text = format!(
            "Here is your app:\n```json\n{}\n```",
            reply(json!({
                "App.js": "export default () => null;",
                "package.json": calculator_manifest(),
                "src/theme.js": "export const dark = true;"
            }))
        );
        let app = parse_generation(&text).unwrap();
        assert_eq!(app.app_name, "Calculator");
        assert_eq!(app.file_set.len(), 3);
        assert_eq!(app.manifest.name, "GeneratedCalculator");
        assert_eq!(app.manifest.dependencies.len(), 2);
        assert_eq!(app.app_identifier(), "com.generatedcalculator");
    }

    #[test]
    fn test_missing_manifest_is_incomplete() {
        let text = reply(json!({ "App.js": "x" }));
        assert_eq!(
            parse_generation(&text).unwrap_err(),
            GenerationError::IncompleteResponse {
                missing: vec!["package.json".to_string()]
            }
        );
    }

    #[test]
    fn test_missing_shape_fields_are_malformed() {
        for text in [
            "not json at all",
            r#"{"appName": "x", "requirements": []}"#,
            r#"{"files": {}, "requirements": []}"#,
            r#"{"files": {}, "appName": "x"}"#,
            r#"{"files": {"App.js": 42}, "appName": "x", "requirements": []}"#,
        ] {
            assert!(
                matches!(
                    parse_generation(text),
                    Err(GenerationError::MalformedResponse(_))
                ),
                "expected malformed for {}",
                text
            );
        }
    }

    #[test]
    fn test_traversal_path_rejects_whole_reply() {
        let text = reply(json!({
            "App.js": "x",
            "package.json": calculator_manifest(),
            "../../etc/cron.d/evil": "* * * * * root rm -rf /"
        }));
        assert!(matches!(
            parse_generation(&text),
            Err(GenerationError::MalformedResponse(msg)) if msg.contains("unsafe")
        ));
    }

    #[test]
    fn test_invalid_manifest() {
        let no_deps = reply(json!({ "App.js": "x", "package.json": r#"{"name":"A"}"# }));
        assert!(matches!(
            parse_generation(&no_deps),
            Err(GenerationError::InvalidManifest(_))
        ));
        let not_json = reply(json!({ "App.js": "x", "package.json": "name: A" }));
        assert!(matches!(
            parse_generation(&not_json),
            Err(GenerationError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_app_identifier_sanitises_name() {
        let mut app = parse_generation(&reply(json!({
            "App.js": "x",
            "package.json": calculator_manifest()
        })))
        .unwrap();
        app.manifest.name = "@acme/My-App 2".to_string();
        assert_eq!(app.app_identifier(), "com.acmemyapp2");
        app.manifest.name = "2048".to_string();
        assert_eq!(app.app_identifier(), "com.app2048");
    }

    #[test]
    fn test_security_verdict_safe_variants() {
        assert_eq!(parse_security_verdict("SAFE"), SecurityVerdict::Safe);
        assert_eq!(parse_security_verdict("  safe.\n"), SecurityVerdict::Safe);
    }

    #[test]
    fn test_security_verdict_issue_shapes() {
        assert_eq!(
            parse_security_verdict(r#"["uses eval", "stores token in AsyncStorage"]"#),
            SecurityVerdict::Issues(vec![
                "uses eval".into(),
                "stores token in AsyncStorage".into()
            ])
        );
        assert_eq!(
            parse_security_verdict(r#"{"issues": [{"description": "reads contacts"}]}"#),
            SecurityVerdict::Issues(vec!["reads contacts".into()])
        );
        assert_eq!(
            parse_security_verdict("Found problems: {\"severity\": \"high\"}"),
            SecurityVerdict::Issues(vec![r#"{"severity":"high"}"#.into()])
        );
        assert_eq!(
            parse_security_verdict("The app sends location to a third party."),
            SecurityVerdict::Issues(vec!["The app sends location to a third party.".into()])
        );
    }
}
