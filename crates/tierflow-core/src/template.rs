//! Template expansion
//!
//! Topology files are rendered with Tera before they are parsed, so any value
//! can come from a variable, a `.env` file or a whitelisted environment variable.

use crate::error::{Result, TopologyError};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// Environment variable prefixes visible to templates
pub const ALLOWED_ENV_PREFIXES: &[&str] = &["TIERFLOW_", "CI_", "APP_"];

/// Variable context
pub type Variables = HashMap<String, serde_json::Value>;

pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// Whether a variable is defined
    pub fn has_variable(&self, key: &str) -> bool {
        self.context.contains_key(key)
    }

    /// Add environment variables carrying one of [`ALLOWED_ENV_PREFIXES`]
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if ALLOWED_ENV_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }

        info!(
            env_var_count = count,
            "Added filtered environment variables"
        );
    }

    /// Load `KEY=VALUE` lines from a `.env` file
    ///
    /// Unlike process environment variables, every key of the file is accepted.
    #[tracing::instrument(skip(self))]
    pub fn add_env_file_variables(&mut self, env_file_path: &Path) -> Result<()> {
        let content =
            std::fs::read_to_string(env_file_path).map_err(|e| TopologyError::IoError {
                path: env_file_path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut count = 0;
        for (key, value) in parse_env_lines(&content) {
            debug!(key = %key, "Adding variable from .env file");
            self.context.insert(key, &serde_json::Value::String(value));
            count += 1;
        }

        info!(
            env_file = %env_file_path.display(),
            variable_count = count,
            "Loaded variables from .env file"
        );

        Ok(())
    }

    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| TopologyError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| TopologyError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            TopologyError::TemplateRenderError(message) => TopologyError::TemplateError {
                file: path.to_path_buf(),
                line: None,
                message,
            },
            other => other,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), strip_quotes(value.trim()).to_string()))
        })
        .collect()
}

/// Extract the top-level `variables { ... }` blocks of a file
///
/// Blocks are located with a regex so that `{{ ... }}` placeholders elsewhere
/// in the file do not have to be valid KDL yet.
pub fn extract_variables(kdl_content: &str) -> Result<Variables> {
    extract_global_variables(kdl_content)
}

/// Extract global variables plus those of `stage`; stage values win
pub fn extract_variables_with_stage(kdl_content: &str, stage: Option<&str>) -> Result<Variables> {
    let mut all_vars = extract_global_variables(kdl_content)?;

    if let Some(stage_name) = stage {
        all_vars.extend(extract_stage_variables(kdl_content, stage_name)?);
    }

    Ok(all_vars)
}

/// Only the variables of `stage "<name>" { variables { ... } }`
pub fn extract_stage_variables(kdl_content: &str, stage_name: &str) -> Result<Variables> {
    let pattern = format!(
        r#"(?s)stage\s+["']{}["']\s*\{{"#,
        regex::escape(stage_name)
    );
    let stage_re = compile(&pattern)?;

    let mut stage_vars = HashMap::new();
    for mat in stage_re.find_iter(kdl_content) {
        if let Some(end) = find_matching_brace(kdl_content, mat.end() - 1) {
            stage_vars.extend(extract_variables_from_content(
                &kdl_content[mat.end()..end],
            )?);
        }
    }

    Ok(stage_vars)
}

fn extract_global_variables(kdl_content: &str) -> Result<Variables> {
    let stage_re = compile(r#"(?s)stage\s+["'][^"']+["']\s*\{"#)?;

    // blank out every stage block before looking for variables
    let mut global_content = String::with_capacity(kdl_content.len());
    let mut last_end = 0;
    for mat in stage_re.find_iter(kdl_content) {
        if mat.start() < last_end {
            continue;
        }
        if let Some(end) = find_matching_brace(kdl_content, mat.end() - 1) {
            global_content.push_str(&kdl_content[last_end..mat.start()]);
            last_end = end + 1;
        }
    }
    global_content.push_str(&kdl_content[last_end..]);

    extract_variables_from_content(&global_content)
}

fn extract_variables_from_content(content: &str) -> Result<Variables> {
    let re = compile(r"(?s)variables\s*\{(?P<content>.*?)\}")?;

    let mut all_vars = HashMap::new();

    for cap in re.captures_iter(content) {
        let Some(var_content) = cap.name("content") else {
            continue;
        };
        let wrapped = format!("extracted {{\n{}\n}}", var_content.as_str());
        let doc: kdl::KdlDocument = wrapped.parse().map_err(|e| {
            TopologyError::InvalidConfig(format!("failed to parse variables block: {}", e))
        })?;

        if let Some(node) = doc.nodes().first()
            && let Some(children) = node.children()
        {
            for var_node in children.nodes() {
                if let Some(entry) = var_node.entries().first() {
                    all_vars.insert(
                        var_node.name().value().to_string(),
                        kdl_value_to_json(entry.value()),
                    );
                }
            }
        }
    }

    Ok(all_vars)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| TopologyError::InvalidConfig(format!("invalid regex '{}': {}", pattern, e)))
}

/// Position of the `}` closing the brace at `open_pos`, skipping string contents
fn find_matching_brace(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if bytes.get(open_pos) != Some(&b'{') {
        return None;
    }

    let mut depth = 1;
    let mut in_string = false;
    let mut escape_next = false;

    for (pos, &c) in bytes.iter().enumerate().skip(open_pos + 1) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            b'\\' => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Flatten a Tera error chain, naming the undefined variable when there is one
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "undefined variable `{}`\nhint: define it in a variables block or a .env file",
            var_name
        );
    }

    full_error
}

fn kdl_value_to_json(value: &kdl::KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(|n| serde_json::Value::Number(n.into()))
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}
