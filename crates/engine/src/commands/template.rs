/// `--format` 模板
/// 
/// 支持 `{{ .Field }}`、`{{.A.B}}`、`{{ . }}` 与 `{{ json .Field }}`；
/// 映射按 `map[k:v]` 输出，与 Go 模板的默认格式一致。

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

pub struct Template {
    parts: Vec<Part>,
}

enum Part {
    Text(String),
    Field { path: Vec<String>, json: bool },
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.replace("\\t", "\t").replace("\\n", "\n");
        let mut parts = Vec::new();
        let mut rest = raw.as_str();

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                bail!("template: unclosed action in {:?}", raw);
            };
            parts.push(Self::parse_action(after[..end].trim())?);
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Ok(Self { parts })
    }

    fn parse_action(action: &str) -> Result<Part> {
        let (json, field) = match action.strip_prefix("json ") {
            Some(field) => (true, field.trim()),
            None => (false, action),
        };
        let Some(path) = field.strip_prefix('.') else {
            bail!("template: unsupported action {:?}", action);
        };
        let path = path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Part::Field { path, json })
    }

    pub fn render<T: Serialize>(&self, item: &T) -> Result<String> {
        let value = serde_json::to_value(item)?;
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Field { path, json } => {
                    let field = path.iter().try_fold(&value, |current, key| current.get(key));
                    match (field, json) {
                        (Some(field), true) => out.push_str(&serde_json::to_string(field)?),
                        (Some(field), false) => out.push_str(&go_format(field)),
                        (None, _) => bail!(
                            "template: can't evaluate field {}",
                            path.join(".")
                        ),
                    }
                }
            }
        }
        Ok(out)
    }
}

/// 按 Go 模板的默认方式格式化
fn go_format(value: &Value) -> String {
    match value {
        Value::Null => "<no value>".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(go_format).collect();
            format!("[{}]", items.join(" "))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let entries: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", k, go_format(v)))
                .collect();
            format!("map[{}]", entries.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::Volume;
    use serde_json::json;

    #[test]
    fn test_fields_and_maps() {
        let mut v = Volume::new("testvol", "local");
        v.labels.insert("foo".to_string(), "bar".to_string());
        v.labels.insert("a".to_string(), "b".to_string());

        let t = Template::parse("{{ .Name }}\\t{{.Driver}}").unwrap();
        assert_eq!(t.render(&v).unwrap(), "testvol\tlocal");

        let t = Template::parse("{{ .Options }}").unwrap();
        assert_eq!(t.render(&v).unwrap(), "map[]");

        let t = Template::parse("{{ .Labels }}").unwrap();
        assert_eq!(t.render(&v).unwrap(), "map[a:b foo:bar]");
    }

    #[test]
    fn test_json_and_nested() {
        let value = json!({"Name": "x", "Status": {"Size": 3}});
        let t = Template::parse("{{json .Status}} {{ .Status.Size }}").unwrap();
        assert_eq!(t.render(&value).unwrap(), r#"{"Size":3} 3"#);
    }

    #[test]
    fn test_errors() {
        assert!(Template::parse("{{ .Name").is_err());
        assert!(Template::parse("{{ Name }}").is_err());
        let t = Template::parse("{{ .Missing }}").unwrap();
        assert!(t.render(&json!({"Name": "x"})).is_err());
    }
}
