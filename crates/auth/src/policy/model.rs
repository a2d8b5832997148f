//! Textual policy model, in casbin's PERM format.
//!
//! ```text
//! [request_definition]  r = sub, obj, act
//! [policy_definition]   p = sub, obj, act
//! [role_definition]     g = _, _            (optional, enables g())
//! [policy_effect]       e = some(where (p.eft == allow))
//! [matchers]            m = <expression>
//! ```
//!
//! Rules are allow-only, so the effect must be the allow-override one.

use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter};

use super::{PolicyError, casbin_error};

/// The built-in model: role inheritance plus `*` wildcards on every field.
pub const DEFAULT_MODEL: &str = r#"[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = (p.sub == "*" || g(r.sub, p.sub)) && (p.obj == "*" || r.obj == p.obj) && (p.act == "*" || r.act == p.act)
"#;

const ALLOW_OVERRIDE: &str = "some(where(p.eft==allow))";

#[derive(Debug, Clone)]
pub struct PolicyModel {
    text: String,
    matcher: String,
}

impl PolicyModel {
    /// Parse and check `text`, including one evaluation of its matcher
    /// against an empty rule set.
    pub async fn parse(text: &str) -> Result<Self, PolicyError> {
        let missing = |what: &str| PolicyError::Model(format!("missing {what}"));

        for (section, key, what) in [("request_definition", "r", "request"), ("policy_definition", "p", "policy")] {
            let def = entry(text, section, key).ok_or_else(|| missing(&format!("[{section}] {key}")))?;
            let fields: Vec<&str> = def.split(',').map(str::trim).collect();
            if fields.len() != 3 || fields.iter().any(|f| f.is_empty()) {
                return Err(PolicyError::Model(format!(
                    "{what} definition must name exactly three fields, got `{def}`"
                )));
            }
        }

        if let Some(g) = entry(text, "role_definition", "g") {
            let arity: Vec<&str> = g.split(',').map(str::trim).collect();
            if arity != ["_", "_"] {
                return Err(PolicyError::Model(format!("role definition must be `_, _`, got `{g}`")));
            }
        }

        let effect = entry(text, "policy_effect", "e").ok_or_else(|| missing("[policy_effect] e"))?;
        let compact: String = effect.chars().filter(|c| !c.is_whitespace()).collect();
        if compact != ALLOW_OVERRIDE {
            return Err(PolicyError::Model(format!("unsupported policy effect `{effect}`")));
        }

        let matcher = entry(text, "matchers", "m").ok_or_else(|| missing("[matchers] m"))?;

        let model = Self {
            text: text.to_string(),
            matcher: matcher.to_string(),
        };

        let scratch = Enforcer::new(model.compile().await?, MemoryAdapter::default())
            .await
            .map_err(casbin_error)?;
        scratch.enforce(("", "", "")).map_err(|e| match casbin_error(e) {
            PolicyError::Store(msg) => PolicyError::Matcher(msg),
            other => other,
        })?;

        Ok(model)
    }

    /// Parse `text`, falling back to [`DEFAULT_MODEL`] when it is blank.
    pub async fn from_config(text: &str) -> Result<Self, PolicyError> {
        if text.trim().is_empty() {
            Self::parse(DEFAULT_MODEL).await
        } else {
            Self::parse(text).await
        }
    }

    /// A fresh casbin model; each enforcer owns its own.
    pub(crate) async fn compile(&self) -> Result<DefaultModel, PolicyError> {
        DefaultModel::from_str(&self.text).await.map_err(casbin_error)
    }

    pub fn matcher_source(&self) -> &str {
        &self.matcher
    }
}

/// Value of `key = value` inside `[section]`.
fn entry<'a>(text: &'a str, section: &str, key: &str) -> Option<&'a str> {
    let mut current = None;
    for line in text.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = Some(name.trim());
            continue;
        }
        if current != Some(section) {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                return Some(v.trim());
            }
        }
    }
    None
}
