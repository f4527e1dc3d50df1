// src/preprocess/directive.rs

//! Parsing of `#@` directive lines.

/// Prefix that marks a script line as a directive.
pub const MARKER: &str = "#@";

/// One parsed directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    IfEquals { left: String, right: String },
    IfNotEquals { left: String, right: String },
    IfOs { name: String },
    IfNotOs { name: String },
    Foreach { key: String, path: String },
    /// `#@- text`: a templated body line of the open foreach.
    Item { text: String },
    End,
    Set { name: String, value: String },
    Add { name: String, value: String },
    SetInMap { map: String, path: String, value: String },
    ImportJson { key: String, json: String },
    ImportJsonExec { key: String, command: String },
    ExportToJson { map: String, var: String },
    ExportToYaml { map: String, var: String },
    VarToFile { var: String, path: String },
    Var { name: String, command: String },
}

impl Directive {
    /// Whether this directive opens a region closed by `#@end`.
    pub fn opens_region(&self) -> bool {
        matches!(
            self,
            Directive::IfEquals { .. }
                | Directive::IfNotEquals { .. }
                | Directive::IfOs { .. }
                | Directive::IfNotOs { .. }
                | Directive::Foreach { .. }
        )
    }
}

/// Parse a directive line.
///
/// Returns `None` for literal lines and `Some(Err(..))` for malformed or
/// unknown directives.
pub fn parse(line: &str) -> Option<Result<Directive, String>> {
    let body = line.trim_start().strip_prefix(MARKER)?;

    // `#@- text` needs no separating space.
    if let Some(text) = body.strip_prefix('-') {
        return Some(Ok(Directive::Item {
            text: text.strip_prefix(' ').unwrap_or(text).to_string(),
        }));
    }

    let body = body.trim();
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let directive = match name {
        "end" => Ok(Directive::End),
        "if-equals" => two(name, rest).map(|(left, right)| Directive::IfEquals { left, right }),
        "if-not-equals" => {
            two(name, rest).map(|(left, right)| Directive::IfNotEquals { left, right })
        }
        "if-os" => one(name, rest).map(|name| Directive::IfOs { name }),
        "if-not-os" => one(name, rest).map(|name| Directive::IfNotOs { name }),
        "foreach" => {
            let (key, path) = head_and_tail(rest);
            if key.is_empty() {
                Err(format!("'{name}' needs a data map key"))
            } else {
                Ok(Directive::Foreach { key, path })
            }
        }
        "set" => two(name, rest).map(|(name, value)| Directive::Set { name, value }),
        "add" => two(name, rest).map(|(name, value)| Directive::Add { name, value }),
        "set-in-map" => three(name, rest).map(|(map, path, value)| Directive::SetInMap {
            map,
            path,
            value,
        }),
        "import-json" => two(name, rest).map(|(key, json)| Directive::ImportJson { key, json }),
        "import-json-exec" => {
            two(name, rest).map(|(key, command)| Directive::ImportJsonExec { key, command })
        }
        "export-to-json" => two(name, rest).map(|(map, var)| Directive::ExportToJson { map, var }),
        "export-to-yaml" => two(name, rest).map(|(map, var)| Directive::ExportToYaml { map, var }),
        "var-to-file" => two(name, rest).map(|(var, path)| Directive::VarToFile { var, path }),
        "var" => two(name, rest).map(|(name, command)| Directive::Var { name, command }),
        "" => Err("empty directive".to_string()),
        other => Err(format!("unknown directive '{other}'")),
    };
    Some(directive)
}

/// First whitespace-separated word and the (possibly empty) remainder.
fn head_and_tail(s: &str) -> (String, String) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head.to_string(), tail.trim().to_string()),
        None => (s.to_string(), String::new()),
    }
}

fn one(directive: &str, rest: &str) -> Result<String, String> {
    if rest.is_empty() {
        return Err(format!("'{directive}' needs an argument"));
    }
    Ok(rest.to_string())
}

/// One word, then everything else as the second argument.
fn two(directive: &str, rest: &str) -> Result<(String, String), String> {
    let (first, second) = head_and_tail(rest);
    if first.is_empty() || second.is_empty() {
        return Err(format!("'{directive}' needs two arguments"));
    }
    Ok((first, second))
}

fn three(directive: &str, rest: &str) -> Result<(String, String, String), String> {
    let (first, tail) = head_and_tail(rest);
    let (second, third) = head_and_tail(&tail);
    if first.is_empty() || second.is_empty() || third.is_empty() {
        return Err(format!("'{directive}' needs three arguments"));
    }
    Ok((first, second, third))
}
