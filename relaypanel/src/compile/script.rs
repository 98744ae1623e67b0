use crate::compile::logs::LogSink;
use crate::config::ScriptError;
use base64::Engine;
use relayapi::ScriptLogKind;
use rquickjs::convert::Coerced;
use rquickjs::function::{Async, Rest};
use rquickjs::{
    async_with, AsyncContext, AsyncRuntime, Ctx, FromJs, Function, Object, Promise, Value,
};
use serde_yaml::Mapping;
use std::collections::HashMap;
use thiserror::Error;

/// Glue evaluated before the user source: a fetch wrapper over the host
/// `__fetch` primitive and the `main` trampoline used by the engine.
const PRELUDE: &str = r#"
globalThis.fetch = async (url, options) => {
    const raw = await __fetch(String(url), JSON.stringify(options ?? {}));
    const resp = JSON.parse(raw);
    if (resp.error !== undefined) {
        throw new Error("fetch failed: " + resp.error);
    }
    const body = resp.body;
    return {
        url: String(url),
        status: resp.status,
        ok: resp.status >= 200 && resp.status < 300,
        headers: resp.headers,
        text: async () => body,
        json: async () => JSON.parse(body),
    };
};
globalThis.__invoke = async (text) => globalThis.main(JSON.parse(text));
"#;

/// A fail-open execution outcome: the override is skipped and the reason goes
/// to its log, never to the caller.
#[derive(Debug, Error)]
pub enum ScriptFailure {
    #[error("main is not defined or not a function")]
    MissingMain,
    #[error("{0}")]
    Exception(String),
    #[error("main returned {0}, expected a configuration object")]
    NotObject(&'static str),
    #[error("result conversion failed: {0}")]
    Convert(String),
}

pub enum ScriptOutput {
    Document(Mapping),
    Failure(ScriptFailure),
}

/// One sandboxed execution of an imperative override.
///
/// The context exposes exactly: `console.{log,info,error,debug}`, `fetch`,
/// `yaml.parse`/`yaml.stringify`, `b64e`/`b64d` and `Buffer`. No filesystem
/// or process access exists inside the sandbox.
pub struct ScriptEngine<'a> {
    name: &'a str,
    source: &'a str,
    sink: LogSink,
}

impl<'a> ScriptEngine<'a> {
    pub fn new(name: &'a str, source: &'a str, sink: LogSink) -> Self {
        Self { name, source, sink }
    }

    /// Run the script's `main` against `doc`. Only sandbox construction
    /// problems surface as `Err`; everything the script itself does wrong is
    /// reported as a `ScriptFailure`.
    pub async fn run(&self, doc: &Mapping) -> Result<ScriptOutput, ScriptError> {
        let sandbox = |e: String| ScriptError::Sandbox(self.name.to_string(), e);
        let input = match serde_json::to_string(doc) {
            Ok(text) => text,
            Err(e) => {
                return Ok(ScriptOutput::Failure(ScriptFailure::Convert(e.to_string())));
            }
        };
        let runtime = AsyncRuntime::new().map_err(|e| sandbox(e.to_string()))?;
        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| sandbox(e.to_string()))?;

        let source = self.source.to_string();
        let sink = self.sink.clone();
        let outcome: Result<Result<String, ScriptFailure>, String> =
            async_with!(context => |ctx| {
                execute(ctx, &source, input, sink).await
            })
            .await;

        let json = match outcome.map_err(sandbox)? {
            Ok(json) => json,
            Err(failure) => return Ok(ScriptOutput::Failure(failure)),
        };
        let parsed: serde_json::Value = match serde_json::from_str(&json) {
            Ok(v) => v,
            Err(e) => return Ok(ScriptOutput::Failure(ScriptFailure::Convert(e.to_string()))),
        };
        match serde_yaml::to_value(parsed) {
            Ok(serde_yaml::Value::Mapping(doc)) => Ok(ScriptOutput::Document(doc)),
            Ok(_) => Ok(ScriptOutput::Failure(ScriptFailure::NotObject("a value"))),
            Err(e) => Ok(ScriptOutput::Failure(ScriptFailure::Convert(e.to_string()))),
        }
    }
}

/// Body of one execution; runs entirely inside the context scope.
///
/// Outer `Err` is a sandbox-level fault and aborts the compilation; the inner
/// result is the fail-open script outcome.
async fn execute<'js>(
    ctx: Ctx<'js>,
    source: &str,
    input: String,
    sink: LogSink,
) -> Result<Result<String, ScriptFailure>, String> {
    install_capabilities(&ctx, &sink).map_err(|e| e.to_string())?;
    ctx.eval::<(), _>(PRELUDE.as_bytes())
        .map_err(|e| format!("prelude: {}", e))?;

    if let Err(e) = ctx.eval::<(), _>(source.as_bytes()) {
        return Ok(Err(ScriptFailure::Exception(error_text(&ctx, e))));
    }
    let main: Value = ctx
        .globals()
        .get("main")
        .map_err(|e| format!("globals: {}", e))?;
    if !main.is_function() {
        return Ok(Err(ScriptFailure::MissingMain));
    }
    let invoke: Function = ctx
        .globals()
        .get("__invoke")
        .map_err(|e| format!("globals: {}", e))?;
    let promise = match invoke.call::<_, Promise>((input.as_str(),)) {
        Ok(promise) => promise,
        Err(e) => return Ok(Err(ScriptFailure::Exception(error_text(&ctx, e)))),
    };
    let settled: Value = match promise.into_future().await {
        Ok(value) => value,
        Err(e) => return Ok(Err(ScriptFailure::Exception(error_text(&ctx, e)))),
    };
    if !is_document(&settled) {
        return Ok(Err(ScriptFailure::NotObject(js_type_name(&settled))));
    }
    match ctx.json_stringify(settled) {
        Ok(Some(text)) => match text.to_string() {
            Ok(json) => Ok(Ok(json)),
            Err(e) => Ok(Err(ScriptFailure::Convert(e.to_string()))),
        },
        Ok(None) => Ok(Err(ScriptFailure::Convert("result is undefined".into()))),
        Err(e) => Ok(Err(ScriptFailure::Convert(error_text(&ctx, e)))),
    }
}

fn install_capabilities<'js>(ctx: &Ctx<'js>, sink: &LogSink) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let console = Object::new(ctx.clone())?;
    for (name, kind) in [
        ("log", ScriptLogKind::Log),
        ("info", ScriptLogKind::Info),
        ("error", ScriptLogKind::Error),
        ("debug", ScriptLogKind::Debug),
    ] {
        let sink = sink.clone();
        console.set(
            name,
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                let line = args
                    .iter()
                    .map(|v| render_value(&ctx, v))
                    .collect::<Vec<_>>()
                    .join(" ");
                sink.push(kind, line);
            })?,
        )?;
    }
    globals.set("console", console)?;

    globals.set("__fetch", Function::new(ctx.clone(), Async(host_fetch))?)?;

    let yaml = Object::new(ctx.clone())?;
    yaml.set(
        "parse",
        Function::new(
            ctx.clone(),
            |ctx: Ctx<'js>, text: String| -> rquickjs::Result<Value<'js>> {
                let value: serde_yaml::Value = serde_yaml::from_str(&text)
                    .map_err(|e| throw(&ctx, format!("yaml.parse: {}", e)))?;
                let json = serde_json::to_string(&value)
                    .map_err(|e| throw(&ctx, format!("yaml.parse: {}", e)))?;
                ctx.json_parse(json)
            },
        )?,
    )?;
    yaml.set(
        "stringify",
        Function::new(
            ctx.clone(),
            |ctx: Ctx<'js>, value: Value<'js>| -> rquickjs::Result<String> {
                let json = ctx
                    .json_stringify(value)?
                    .ok_or_else(|| throw(&ctx, "yaml.stringify: value is undefined".into()))?
                    .to_string()?;
                let parsed: serde_json::Value = serde_json::from_str(&json)
                    .map_err(|e| throw(&ctx, format!("yaml.stringify: {}", e)))?;
                serde_yaml::to_string(&parsed)
                    .map_err(|e| throw(&ctx, format!("yaml.stringify: {}", e)))
            },
        )?,
    )?;
    globals.set("yaml", yaml)?;

    globals.set(
        "b64e",
        Function::new(ctx.clone(), |text: Coerced<String>| -> String {
            base64::engine::general_purpose::STANDARD.encode(text.0.as_bytes())
        })?,
    )?;
    globals.set(
        "b64d",
        Function::new(
            ctx.clone(),
            |ctx: Ctx<'js>, text: String| -> rquickjs::Result<String> {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .map_err(|e| throw(&ctx, format!("b64d: {}", e)))?;
                String::from_utf8(bytes).map_err(|e| throw(&ctx, format!("b64d: {}", e)))
            },
        )?,
    )?;

    let buffer = Object::new(ctx.clone())?;
    buffer.set(
        "from",
        Function::new(
            ctx.clone(),
            |ctx: Ctx<'js>,
             text: Coerced<String>|
             -> rquickjs::Result<rquickjs::TypedArray<'js, u8>> {
                rquickjs::TypedArray::new(ctx, text.0.into_bytes())
            },
        )?,
    )?;
    buffer.set(
        "text",
        Function::new(
            ctx.clone(),
            |ctx: Ctx<'js>, bytes: rquickjs::TypedArray<'js, u8>| -> rquickjs::Result<String> {
                let bytes = bytes
                    .as_bytes()
                    .ok_or_else(|| throw(&ctx, "Buffer.text: buffer is detached".into()))?;
                Ok(String::from_utf8_lossy(bytes).to_string())
            },
        )?,
    )?;
    globals.set("Buffer", buffer)?;
    Ok(())
}

fn throw(ctx: &Ctx<'_>, message: String) -> rquickjs::Error {
    rquickjs::Exception::throw_message(ctx, &message)
}

/// Render one logged value: Error-like values as `name: message\nstack`,
/// everything else JSON-stringified with string coercion as a last resort.
fn render_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if value.type_of() == rquickjs::Type::Exception {
        if let Some(obj) = value.as_object() {
            let name: String = obj.get("name").unwrap_or_else(|_| "Error".to_string());
            let message: String = obj.get("message").unwrap_or_default();
            let stack: String = obj.get("stack").unwrap_or_default();
            return format!("{}: {}\n{}", name, message, stack);
        }
    }
    if let Ok(Some(text)) = ctx.json_stringify(value.clone()) {
        if let Ok(text) = text.to_string() {
            return text;
        }
    }
    Coerced::<String>::from_js(ctx, value.clone())
        .map(|c| c.0)
        .unwrap_or_else(|_| "undefined".to_string())
}

fn error_text(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if matches!(error, rquickjs::Error::Exception) {
        let caught = ctx.catch();
        render_value(ctx, &caught)
    } else {
        error.to_string()
    }
}

fn is_document(value: &Value<'_>) -> bool {
    value.is_object() && !value.is_array() && !value.is_function()
}

fn js_type_name(value: &Value<'_>) -> &'static str {
    if value.is_array() {
        "an array"
    } else if value.is_null() {
        "null"
    } else if value.is_undefined() {
        "undefined"
    } else if value.is_function() {
        "a function"
    } else {
        "a non-object value"
    }
}

#[derive(serde::Deserialize, Default)]
struct FetchOptions {
    method: Option<String>,
    headers: Option<HashMap<String, String>>,
    body: Option<String>,
}

/// Host side of the sandboxed `fetch`. Network failures are reported through
/// the payload so the JS wrapper can raise them as ordinary exceptions.
async fn host_fetch(url: String, options: String) -> String {
    match fetch_impl(&url, &options).await {
        Ok(payload) => payload.to_string(),
        Err(reason) => serde_json::json!({ "error": reason }).to_string(),
    }
}

async fn fetch_impl(url: &str, options: &str) -> Result<serde_json::Value, String> {
    let options: FetchOptions = serde_json::from_str(options).map_err(|e| e.to_string())?;
    let method = match options.method.as_deref() {
        None => reqwest::Method::GET,
        Some(m) => {
            reqwest::Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())?
        }
    };
    let client = reqwest::Client::builder().build().map_err(|e| e.to_string())?;
    let mut request = client.request(method, url);
    for (key, value) in options.headers.unwrap_or_default() {
        request = request.header(&key, &value);
    }
    if let Some(body) = options.body {
        request = request.body(body);
    }
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let mut headers = serde_json::Map::new();
    for (key, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
    }
    let body = response.text().await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "status": status,
        "headers": headers,
        "body": body,
    }))
}
