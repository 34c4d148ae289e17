use adapter::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Column-level reshaping applied between parse and apply.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    Direct,
    Uppercase,
    Lowercase,
    Trim,
    Cast,
    /// Substitute `parameters.default_value` when the source is null.
    Default,
    /// Anything unrecognized passes the source value through.
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransformRule {
    pub source_column: String,
    pub target_column: String,
    pub transformation_type: TransformationType,
    /// Names an external transformation function; set when the rule is
    /// served by the transformation service rather than a builtin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

/// External named transformations, resolved by the embedding process.
#[async_trait::async_trait]
pub trait TransformationService: Send + Sync {
    async fn transform(&self, function_name: &str, input: &str) -> anyhow::Result<String>;
}

/// Run the ordered rules over one payload. Rules without output leave the
/// input untouched: an empty rule set returns the original map.
pub async fn apply_transformations(
    rules: &[TransformRule],
    input: &Row,
    service: Option<&dyn TransformationService>,
) -> Row {
    let mut output = Row::new();

    for rule in rules {
        let source = input.get(&rule.source_column).cloned().unwrap_or(Value::Null);
        let value = match &rule.transformation_name {
            Some(name) if !is_builtin(name) => {
                named_transform(service, name, &rule.source_column, source).await
            }
            _ => builtin_transform(rule, source),
        };
        output.insert(rule.target_column.clone(), value);
    }

    if output.is_empty() {
        input.clone()
    } else {
        output
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "direct" | "uppercase" | "lowercase" | "trim" | "cast" | "default"
    )
}

async fn named_transform(
    service: Option<&dyn TransformationService>,
    name: &str,
    source_column: &str,
    source: Value,
) -> Value {
    let Some(service) = service else {
        tracing::warn!(name, source_column, "no transformation service; passing value through");
        return source;
    };
    let input = match &source {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match service.transform(name, &input).await {
        Ok(output) => Value::String(output),
        Err(error) => {
            tracing::warn!(
                name,
                source_column,
                %error,
                "transformation service failed; falling back to source value"
            );
            source
        }
    }
}

fn builtin_transform(rule: &TransformRule, source: Value) -> Value {
    match rule.transformation_type {
        TransformationType::Direct | TransformationType::Unknown => source,
        TransformationType::Uppercase => map_string(source, |s| s.to_uppercase()),
        TransformationType::Lowercase => map_string(source, |s| s.to_lowercase()),
        TransformationType::Trim => map_string(source, |s| s.trim().to_string()),
        TransformationType::Cast => cast_value(rule, source),
        TransformationType::Default => {
            if source.is_null() {
                rule.parameters
                    .get("default_value")
                    .cloned()
                    .unwrap_or(Value::Null)
            } else {
                source
            }
        }
    }
}

fn map_string(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn cast_value(rule: &TransformRule, source: Value) -> Value {
    let target = rule
        .parameters
        .get("target_type")
        .and_then(Value::as_str)
        .unwrap_or("string");
    let cast: Option<Value> = match target {
        "string" => match &source {
            Value::String(_) | Value::Null => None,
            other => Some(Value::String(other.to_string())),
        },
        "int" | "integer" | "bigint" => match &source {
            Value::Number(n) => n
                .as_i64()
                .map(Value::from)
                .or_else(|| n.as_f64().map(|f| Value::from(f as i64))),
            Value::String(s) => s.parse::<i64>().ok().map(Value::from),
            Value::Bool(b) => Some(Value::from(*b as i64)),
            _ => None,
        },
        "float" | "double" => match &source {
            Value::Number(_) => None,
            Value::String(s) => s.parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        "boolean" | "bool" => match &source {
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => Some(Value::Bool(n.as_f64() != Some(0.0))),
            _ => None,
        },
        other => {
            tracing::warn!(target = other, "unrecognized cast target; passing through");
            None
        }
    };
    cast.unwrap_or(source)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn rule(
        source: &str,
        target: &str,
        transformation_type: TransformationType,
        parameters: &[(&str, Value)],
    ) -> TransformRule {
        TransformRule {
            source_column: source.to_string(),
            target_column: target.to_string(),
            transformation_type,
            transformation_name: None,
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn case_trim_and_default_rules() {
        let rules = vec![
            rule("name", "NAME", TransformationType::Uppercase, &[]),
            rule("email", "email", TransformationType::Lowercase, &[]),
            rule(
                "note",
                "note",
                TransformationType::Default,
                &[("default_value", json!("n/a"))],
            ),
        ];
        let input = row(&[
            ("name", json!("Ada")),
            ("email", json!("A@X")),
            ("note", json!(null)),
        ]);
        let output = apply_transformations(&rules, &input, None).await;
        assert_eq!(
            output,
            row(&[
                ("NAME", json!("ADA")),
                ("email", json!("a@x")),
                ("note", json!("n/a")),
            ])
        );
    }

    #[tokio::test]
    async fn empty_rules_return_input_unchanged() {
        let input = row(&[("a", json!(1))]);
        assert_eq!(apply_transformations(&[], &input, None).await, input);
    }

    #[tokio::test]
    async fn cast_rules() {
        let rules = vec![
            rule("n", "n", TransformationType::Cast, &[("target_type", json!("int"))]),
            rule("f", "f", TransformationType::Cast, &[("target_type", json!("string"))]),
            rule("b", "b", TransformationType::Cast, &[("target_type", json!("bool"))]),
        ];
        let input = row(&[
            ("n", json!("42")),
            ("f", json!(1.5)),
            ("b", json!("yes")),
        ]);
        let output = apply_transformations(&rules, &input, None).await;
        assert_eq!(output.get("n"), Some(&json!(42)));
        assert_eq!(output.get("f"), Some(&json!("1.5")));
        assert_eq!(output.get("b"), Some(&json!(true)));
    }

    struct Failing;

    #[async_trait::async_trait]
    impl TransformationService for Failing {
        async fn transform(&self, _name: &str, _input: &str) -> anyhow::Result<String> {
            anyhow::bail!("service unavailable")
        }
    }

    struct Reversing;

    #[async_trait::async_trait]
    impl TransformationService for Reversing {
        async fn transform(&self, _name: &str, input: &str) -> anyhow::Result<String> {
            Ok(input.chars().rev().collect())
        }
    }

    #[tokio::test]
    async fn named_transformations_delegate_and_fall_back() {
        let mut named = rule("v", "v", TransformationType::Direct, &[]);
        named.transformation_name = Some("reverse".to_string());
        let input = row(&[("v", json!("abc"))]);

        let output = apply_transformations(&[named.clone()], &input, Some(&Reversing)).await;
        assert_eq!(output.get("v"), Some(&json!("cba")));

        // Service failure falls back to the source value.
        let output = apply_transformations(&[named], &input, Some(&Failing)).await;
        assert_eq!(output.get("v"), Some(&json!("abc")));
    }

    #[test]
    fn unknown_transformation_type_deserializes() {
        let parsed: TransformationType = serde_json::from_str(r#""sprocket""#).unwrap();
        assert_eq!(parsed, TransformationType::Unknown);
    }
}
