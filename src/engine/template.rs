use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Replaces `{name}` tokens with values from `context`. Unknown names are
/// left exactly as written.
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn render(template: &str, context: &Value) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                match context.get(&caps[1]) {
                    Some(value) => display_value(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitutes_known_variables() {
        let rendered = TemplateRenderer::render(
            "Hola {nombre}, ¿sigues interesado en {producto} por ${precio}?",
            &json!({"nombre": "Ana", "producto": "la bici", "precio": 1500}),
        );
        assert_eq!(rendered, "Hola Ana, ¿sigues interesado en la bici por $1500?");
    }

    #[test]
    fn test_unknown_variables_stay_literal() {
        assert_eq!(TemplateRenderer::render("Hola {x}", &json!({})), "Hola {x}");
        assert_eq!(
            TemplateRenderer::render("{a} y {b}", &json!({"a": "uno"})),
            "uno y {b}"
        );
    }

    #[test]
    fn test_text_without_tokens_is_unchanged() {
        let text = "Sin variables { aquí } ni {}";
        assert_eq!(TemplateRenderer::render(text, &json!({})), text);
        assert_eq!(TemplateRenderer::render(text, &json!({"x": 1})), text);
    }

    #[test]
    fn test_value_forms() {
        let context = json!({"vip": true, "nada": null, "tags": ["a", "b"]});
        assert_eq!(
            TemplateRenderer::render("{vip}|{nada}|{tags}", &context),
            "true||[\"a\",\"b\"]"
        );
    }

    #[test]
    fn test_substituted_values_are_not_rendered_again() {
        let rendered = TemplateRenderer::render("{a}", &json!({"a": "{b}", "b": "x"}));
        assert_eq!(rendered, "{b}");
    }

    #[test]
    fn test_non_object_context() {
        assert_eq!(TemplateRenderer::render("Hola {nombre}", &Value::Null), "Hola {nombre}");
    }
}
