//! JavaScript injected into a webview so its invoke hook talks to this server.

/// Names the generated script binds to inside the webview.
#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Global property the webview runtime calls with `(command, args)`.
    pub hook: String,
    /// Expression evaluating to the current window label.
    pub label_expr: String,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            hook: "__TAURI_POST_MESSAGE__".to_string(),
            label_expr: "window.__TAURI__.__currentWindow.label".to_string(),
        }
    }
}

/// Script that defines `window[hook]` as a POST to
/// `http://localhost:{port}/{label}/{command}`, then calls
/// `window[args.callback]` with the parsed body on 200 and
/// `window[args.error]` otherwise (including when the body is not JSON).
pub fn initialization_script(port: u16, options: &ScriptOptions) -> String {
    format!(
        r#"
Object.defineProperty(window, '{hook}', {{
  value: (command, args) => {{
    const url = 'http://localhost:{port}/' + {label} + '/' + command;
    fetch(url, {{
      method: 'POST',
      headers: {{ 'Content-Type': 'application/json' }},
      body: JSON.stringify(args),
    }})
      .then((res) => res.text().then((text) => {{
        let value;
        let ok = res.status === 200;
        try {{
          value = JSON.parse(text);
        }} catch (e) {{
          value = e;
          ok = false;
        }}
        window[ok ? args.callback : args.error](value);
      }}))
      .catch((e) => window[args.error](e));
  }},
}});
"#,
        hook = options.hook,
        port = port,
        label = options.label_expr,
    )
}
