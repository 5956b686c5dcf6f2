// src/core/filters/functions.rs

use super::{FilterError, Halt, Invocation, text_of};
use crate::core::{paths::expand_path, session::RenderContext};
use minijinja::{Environment, Value};
use std::{env, fs, path::Path};

const DEBUG_BANNER: &str = "=== DEBUG ===";

/// `value | print`: echoes the value to stdout and passes it on.
pub fn print_filter(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    println!("{}", invocation.input_text());
    Ok(invocation.input)
}

/// `value | debug`: shows the value and stops the run successfully.
pub fn debug(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    println!("{}", invocation.input_text());
    println!("{}", DEBUG_BANNER);
    Err(Halt::Debug.into())
}

/// `print(values...)`
pub fn print(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let line = invocation.args.iter().map(text_of).collect::<Vec<_>>().join(" ");
    println!("{}", line);
    Ok(Value::from(""))
}

/// `fail(message)`
pub fn fail(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let message = invocation
        .arg_or_option(0, "message")
        .map(text_of)
        .unwrap_or_else(|| "template called fail()".to_string());
    Err(FilterError::Failed(message))
}

/// `cd(path)`
pub fn cd(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let raw = invocation.required_text(0, "path")?;
    let target = expand_path(&raw)?;
    env::set_current_dir(&target).map_err(|e| FilterError::file("change directory to", &raw, e))?;
    log::debug!("Working directory is now '{}'", target.display());
    Ok(Value::from(""))
}

/// `load_config(path)`: parses a `.json` or `.toml` file into a nested mapping.
pub fn load_config(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let raw = invocation.required_text(0, "path")?;
    let path = expand_path(&raw)?;
    let content = fs::read_to_string(&path).map_err(|e| FilterError::file("read", &raw, e))?;
    parse_config(&path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<Value, FilterError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let parsed: serde_json::Value = serde_json::from_str(content)?;
        Ok(Value::from_serialize(&parsed))
    } else {
        let parsed: toml::Table = toml::from_str(content)?;
        Ok(Value::from_serialize(&parsed))
    }
}

/// `eval(expression, **vars)`
///
/// Only available with `allow_eval = true`. The expression sees `vars` and nothing else.
pub fn eval(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    if !context.settings.config.render.allow_eval {
        return Err(FilterError::EvalDisabled);
    }
    let source = invocation.required_text(0, "expression")?;
    let env = Environment::new();
    let expression = env.compile_expression(&source)?;
    Ok(expression.eval(&invocation.options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        confirm::tests::ScriptedOperator,
        filters::tests::{call, context_with, invoke},
    };
    use tempfile::tempdir;

    #[test]
    fn test_print_filter_passes_value_through() {
        let context = context_with(ScriptedOperator::default());
        let value = invoke(&context, "print", "shown", &[], &[]).unwrap();
        assert_eq!(value.as_str(), Some("shown"));
    }

    #[test]
    fn test_print_function_renders_nothing() {
        let context = context_with(ScriptedOperator::default());
        let value = call(&context, "print", &["a", "b"], &[]).unwrap();
        assert_eq!(value.as_str(), Some(""));
    }

    #[test]
    fn test_debug_halts() {
        let context = context_with(ScriptedOperator::default());
        let err = invoke(&context, "debug", "state", &[], &[]).unwrap_err();
        assert!(matches!(err, FilterError::Halt(Halt::Debug)));
    }

    #[test]
    fn test_fail_carries_the_message() {
        let context = context_with(ScriptedOperator::default());
        let err = call(&context, "fail", &["missing input"], &[]).unwrap_err();
        assert_eq!(err.to_string(), "missing input");
    }

    #[test]
    fn test_load_config_reads_toml_and_json() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let toml_path = dir.path().join("app.toml");
        let json_path = dir.path().join("app.json");
        fs::write(&toml_path, "[server]\nport = 8080\n").unwrap();
        fs::write(&json_path, r#"{"server": {"port": 9090}}"#).unwrap();
        let context = context_with(ScriptedOperator::default());

        // --- Execute ---
        let toml_arg = toml_path.display().to_string();
        let json_arg = json_path.display().to_string();
        let from_toml = call(&context, "load_config", &[&toml_arg], &[]).unwrap();
        let from_json = call(&context, "load_config", &[&json_arg], &[]).unwrap();

        // --- Assert ---
        let port = |v: &Value| v.get_attr("server").unwrap().get_attr("port").unwrap();
        assert_eq!(port(&from_toml), Value::from(8080));
        assert_eq!(port(&from_json), Value::from(9090));
    }

    #[test]
    fn test_cd_to_missing_directory_fails() {
        let context = context_with(ScriptedOperator::default());
        let err = call(&context, "cd", &["/no/such/dir/anywhere"], &[]).unwrap_err();
        assert!(err.to_string().contains("/no/such/dir/anywhere"));
    }

    #[test]
    fn test_eval_is_disabled_by_default() {
        let context = context_with(ScriptedOperator::default());
        let err = call(&context, "eval", &["1 + 1"], &[]).unwrap_err();
        assert!(matches!(err, FilterError::EvalDisabled));
    }

    #[test]
    fn test_eval_sees_only_its_vars() {
        let mut context = context_with(ScriptedOperator::default());
        context.settings.config.render.allow_eval = true;

        let vars = [("x", Value::from(20)), ("y", Value::from("ab"))];
        let value = call(&context, "eval", &["x * 2 + y | length"], &vars).unwrap();

        assert_eq!(value, Value::from(42));
    }
}
