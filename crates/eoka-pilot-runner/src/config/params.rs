use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Values supplied on the command line with `-P key=value`.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `key=value` pairs. Later pairs win.
    pub fn from_args(args: &[String]) -> Result<Self> {
        args.iter().try_fold(Self::new(), |params, arg| {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            if key.trim().is_empty() {
                return Err(Error::Config(format!("invalid param '{}', empty key", arg)));
            }
            Ok(params.set(key.trim(), value))
        })
    }
}

/// A `params:` entry in a goal file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamDef {
    #[serde(default)]
    pub required: bool,
    pub default: Option<String>,
    pub description: Option<String>,
}

fn lookup(name: &str, params: &Params, defs: &HashMap<String, ParamDef>) -> Result<Option<String>> {
    if let Some(v) = params.get(name) {
        return Ok(Some(v.to_string()));
    }
    match defs.get(name) {
        Some(ParamDef { default: Some(d), .. }) => Ok(Some(d.clone())),
        Some(ParamDef { required: true, .. }) => Err(Error::Config(format!(
            "missing required parameter: {}",
            name
        ))),
        Some(_) => Ok(Some(String::new())),
        // Undeclared: leave the placeholder alone.
        None => Ok(None),
    }
}

/// Expand `${name}` placeholders in one string.
pub fn substitute(
    template: &str,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("${") {
        let Some(len) = rest[open + 2..].find('}') else {
            break;
        };
        let name = &rest[open + 2..open + 2 + len];
        let placeholder = &rest[open..open + 3 + len];

        out.push_str(&rest[..open]);
        match lookup(name.trim(), params, defs)? {
            Some(value) => out.push_str(&value),
            None => out.push_str(placeholder),
        }
        rest = &rest[open + 3 + len..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Expand placeholders in every string of a YAML tree. The `params:`
/// section itself is skipped so definitions keep their literal text.
pub fn substitute_value(
    value: &mut serde_yaml::Value,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => *s = substitute(s, params, defs)?,
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                if k.as_str() == Some("params") {
                    continue;
                }
                substitute_value(v, params, defs)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(entries: &[(&str, ParamDef)]) -> HashMap<String, ParamDef> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_substitute_supplied_values() {
        let params = Params::new().set("a", "1").set("b", "2");
        let out = substitute("${a} + ${b} = 3", &params, &HashMap::new()).unwrap();
        assert_eq!(out, "1 + 2 = 3");
    }

    #[test]
    fn test_substitute_default_and_optional() {
        let d = defs(&[
            (
                "site",
                ParamDef {
                    default: Some("example.com".into()),
                    ..Default::default()
                },
            ),
            ("suffix", ParamDef::default()),
        ]);
        let out = substitute("https://${site}/${suffix}", &Params::new(), &d).unwrap();
        assert_eq!(out, "https://example.com/");
    }

    #[test]
    fn test_substitute_required_missing() {
        let d = defs(&[(
            "user",
            ParamDef {
                required: true,
                ..Default::default()
            },
        )]);
        let err = substitute("log in as ${user}", &Params::new(), &d).unwrap_err();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_undeclared_and_unterminated_left_alone() {
        let out = substitute("${HOME} and ${open", &Params::new(), &HashMap::new()).unwrap();
        assert_eq!(out, "${HOME} and ${open");
    }

    #[test]
    fn test_params_from_args() {
        let args = vec!["user=alice".to_string(), "q=a=b".to_string()];
        let params = Params::from_args(&args).unwrap();
        assert_eq!(params.get("user"), Some("alice"));
        assert_eq!(params.get("q"), Some("a=b"));

        assert!(Params::from_args(&["novalue".to_string()]).is_err());
        assert!(Params::from_args(&["=x".to_string()]).is_err());
    }
}
