//! Policy variable tokens and substitution (§4.6, §4.8)

use std::fmt;

/// A `${...}` token recognised inside a resource pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyVariable {
    /// `${iot:Connection.Thing.ThingName}`
    ThingName,
    /// `${iot:Connection.Thing.Attributes[<key>]}`
    ThingAttribute(String),
}

impl fmt::Display for PolicyVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyVariable::ThingName => write!(f, "${{iot:Connection.Thing.ThingName}}"),
            PolicyVariable::ThingAttribute(key) => {
                write!(f, "${{iot:Connection.Thing.Attributes[{key}]}}")
            }
        }
    }
}

impl PolicyVariable {
    /// Parse a single `${...}` token body (without the surrounding `${` `}`).
    pub fn parse(token: &str) -> Option<Self> {
        if token == "iot:Connection.Thing.ThingName" {
            return Some(PolicyVariable::ThingName);
        }
        let prefix = "iot:Connection.Thing.Attributes[";
        if let Some(rest) = token.strip_prefix(prefix) {
            if let Some(key) = rest.strip_suffix(']') {
                if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Some(PolicyVariable::ThingAttribute(key.to_string()));
                }
            }
        }
        None
    }
}

/// Find every `${...}` token in `resource`, returning `Err` with the raw
/// inner text of the first token that is not a recognised [`PolicyVariable`].
pub fn extract_variables(resource: &str) -> std::result::Result<Vec<PolicyVariable>, String> {
    let mut result = Vec::new();
    let mut rest = resource;
    while let Some(start) = rest.find("${") {
        let after_open = &rest[start + 2..];
        let end = after_open
            .find('}')
            .ok_or_else(|| format!("unterminated variable in resource {resource:?}"))?;
        let inner = &after_open[..end];
        match PolicyVariable::parse(inner) {
            Some(var) => result.push(var),
            None => return Err(inner.to_string()),
        }
        rest = &after_open[end + 1..];
    }
    Ok(result)
}

/// Substitute every recognised variable in `resource` using `thing_name` and
/// `attribute` (keyed lookup for `Attributes[k]`). Returns `None` if any
/// variable cannot be resolved (per §4.8, aborts matching for this
/// permission only, not the whole request).
pub fn substitute(
    resource: &str,
    thing_name: Option<&str>,
    attribute: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let mut result = String::new();
    let mut rest = resource;
    loop {
        match rest.find("${") {
            None => {
                result.push_str(rest);
                break;
            }
            Some(start) => {
                result.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                let end = after_open.find('}')?;
                let inner = &after_open[..end];
                let replacement = match PolicyVariable::parse(inner)? {
                    PolicyVariable::ThingName => thing_name?.to_string(),
                    PolicyVariable::ThingAttribute(key) => attribute(&key)?,
                };
                result.push_str(&replacement);
                rest = &after_open[end + 1..];
            }
        }
    }
    Some(result)
}
