//! Tool catalog types and the local tool backend.
//!
//! The catalog serialization, an array of `{type:"function", function:{...}}`
//! entries, is the shape every LLM vendor adapter consumes. Local tools are
//! JSON catalog files plus [`ToolExecutor`] implementations; [`ShellTool`]
//! shells out to an external CLI and captures stdout/stderr/exit code.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tokio::process::Command;
use walkdir::WalkDir;

/// One catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Entry type; always "function".
    #[serde(rename = "type")]
    pub kind: String,
    /// The function declaration.
    pub function: ToolFunction,
}

impl Tool {
    /// Wrap a function declaration into a catalog entry.
    #[must_use]
    pub fn function(function: ToolFunction) -> Self {
        Self {
            kind: "function".to_string(),
            function,
        }
    }
}

/// Function declaration within a catalog entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Function name, unique within a catalog.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Human/model-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Parameter schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

/// Parameter schema of a function declaration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Schema type, normally "object".
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Required parameter names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Parameter name to property schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Property>,
}

/// One parameter's schema: declared type, description, and enum only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Declared type string.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

/// One concrete tool invocation: name, arguments, and (after execution) the
/// rendered result text. Transient; never persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name.
    pub name: String,
    /// String-keyed arguments with arbitrary JSON values.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Result text, populated after execution.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
}

impl FunctionCall {
    /// Create a call with the given arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            result: String::new(),
        }
    }

    /// Build a call from a raw arguments value, which must be a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if `arguments` is not an object.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Result<Self> {
        let name = name.into();
        match arguments {
            Value::Object(map) => Ok(Self::new(name, map)),
            Value::Null => Ok(Self::new(name, Map::new())),
            other => anyhow::bail!("arguments for tool '{name}' are not an object: {other}"),
        }
    }

    /// String argument by key.
    #[must_use]
    pub fn string_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Render the results of one turn's tool calls into a single aggregated
/// prompt block, so the model reasons over them jointly rather than one at
/// a time.
#[must_use]
pub fn render_collective_exec(calls: &[FunctionCall]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} tool call(s) completed. Use the combined results below to answer the original request.",
        calls.len()
    );
    for (index, call) in calls.iter().enumerate() {
        let arguments =
            serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}] tool: {}", index + 1, call.name);
        let _ = writeln!(out, "    arguments: {arguments}");
        let _ = writeln!(out, "    result: {}", call.result);
    }
    out
}

/// Load every `*.json` catalog file under `dir` (recursively) and merge
/// their entries.
///
/// # Errors
///
/// Returns an error if a file cannot be read or parsed.
pub fn load_tool_catalog(dir: impl AsRef<Path>) -> Result<Vec<Tool>> {
    let mut all = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).sort_by_file_name() {
        let entry = entry.context("failed to walk tool catalog directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let tools: Vec<Tool> = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!("loaded {} tool(s) from {}", tools.len(), path.display());
        all.extend(tools);
    }
    Ok(all)
}

/// Serialize a catalog for session storage.
#[must_use]
pub fn serialize_catalog(tools: &[Tool]) -> Vec<u8> {
    serde_json::to_vec(tools).unwrap_or_else(|_| b"[]".to_vec())
}

/// Captured output of one shell execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Captured stdout.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    /// Captured stderr.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// Process exit code.
    #[serde(default, rename = "exitcode")]
    pub exit_code: i32,
}

impl ExecOutput {
    /// Render for feeding back into the conversation.
    #[must_use]
    pub fn render(&self) -> String {
        format!("out: {}\nerr: {}\n", self.stdout, self.stderr)
    }
}

/// Run `program` with a whitespace-split argument string, capturing
/// stdout/stderr/exit code.
///
/// # Errors
///
/// Returns an error only if the process cannot be started; a non-zero exit
/// is reported through [`ExecOutput::exit_code`].
pub async fn exec_tool(program: &str, args: &str) -> Result<ExecOutput> {
    let argv: Vec<&str> = args.split_whitespace().collect();
    let output = Command::new(program)
        .args(&argv)
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// A locally-executable tool satisfying the same "name → result text"
/// contract as remote tools. Failures are rendered into the result text,
/// never raised.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Catalog name this executor answers to.
    fn name(&self) -> &str;

    /// Execute the call and render its result.
    async fn execute(&self, call: &FunctionCall) -> String;
}

/// Local tool backend that shells out to an external CLI. The argument
/// string is taken from one configured call argument.
pub struct ShellTool {
    name: String,
    program: String,
    argument_key: String,
}

impl ShellTool {
    /// A shell tool named `name` running `program`, with its argument
    /// string taken from the `argument_key` call argument.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        argument_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            argument_key: argument_key.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for ShellTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, call: &FunctionCall) -> String {
        let args = call.string_argument(&self.argument_key).unwrap_or_default();
        match exec_tool(&self.program, args).await {
            Ok(output) if output.exit_code == 0 => output.render(),
            Ok(output) => format!(
                "Error: {} exited with status {}\n{}",
                self.program,
                output.exit_code,
                output.render()
            ),
            Err(e) => format!("Error running {}: {e}", self.program),
        }
    }
}
