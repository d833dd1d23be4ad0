//! Google Chrome on macOS, driven through `osascript`.
//!
//! Scripts reach the page through Chrome's `execute javascript` verb. Native
//! input for the file chooser goes through System Events, which is why the
//! window is pinned to a fixed size at open: the click offset is in screen
//! coordinates.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::{collections::HashSet, path::Path, process::Stdio, sync::Mutex, time::Duration};
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::{debug, info, warn};

use super::{DriverError, SessionDriver, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
    /// Screen offset of the upload drop zone inside a window of this size.
    pub click_x: u32,
    pub click_y: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 900,
            click_x: 640,
            click_y: 420,
        }
    }
}

pub struct OsaScriptDriver {
    browser: String,
    geometry: WindowGeometry,
    call_timeout: Duration,
    program: String,
    args: Vec<String>,
    closed: Mutex<HashSet<String>>,
}

impl OsaScriptDriver {
    pub fn new(browser: impl Into<String>, geometry: WindowGeometry, call_timeout: Duration) -> Self {
        Self {
            browser: browser.into(),
            geometry,
            call_timeout,
            program: "osascript".into(),
            args: vec!["-".into()],
            closed: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    fn with_interpreter(mut self, program: &str, args: &[&str]) -> Self {
        self.program = program.into();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Feeds `source` to the interpreter on stdin. Spawn, write and wait all
    /// share one `call_timeout`; the child is killed when it expires.
    async fn run(&self, operation: &'static str, source: &str) -> Result<String, DriverError> {
        let call = async {
            let mut child = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| failure(operation, err.to_string()))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(source.as_bytes())
                    .await
                    .map_err(|err| failure(operation, err.to_string()))?;
            }

            child
                .wait_with_output()
                .await
                .map_err(|err| failure(operation, err.to_string()))
        };

        let output = timeout(self.call_timeout, call)
            .await
            .map_err(|_| DriverError::Timeout {
                operation,
                seconds: self.call_timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(operation, stderr.trim().to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = stdout.trim_end_matches(['\n', '\r']);
        Ok(if value == "missing value" {
            String::new()
        } else {
            value.to_string()
        })
    }

    fn app(&self) -> Result<String, DriverError> {
        applescript_literal(&self.browser)
    }
}

#[async_trait]
impl SessionDriver for OsaScriptDriver {
    async fn open(&self, target_url: &str) -> Result<SessionHandle, DriverError> {
        let app = self.app()?;
        let url = applescript_literal(target_url)?;
        let create = format!(
            r#"tell application {app}
    activate
    set newWindow to make new window
    return id of newWindow
end tell"#
        );
        let raw = self.run("open", &create).await?;
        let id = window_id(&raw)
            .map_err(|_| DriverError::Open(format!("unexpected window id `{raw}`")))?;
        let handle = SessionHandle::new(id.to_string());

        // The window exists from here on; a failed setup must not leak it.
        let configure = format!(
            r#"tell application {app}
    set bounds of window id {id} to {{0, 0, {width}, {height}}}
    set URL of active tab of window id {id} to {url}
end tell"#,
            width = self.geometry.width,
            height = self.geometry.height,
        );
        if let Err(err) = self.run("open", &configure).await {
            warn!(target = "stager.driver", window = id, error = %err, "session_setup_failed");
            self.close(&handle).await;
            return Err(err);
        }
        info!(target = "stager.driver", window = id, url = %target_url, "session_opened");
        Ok(handle)
    }

    async fn evaluate(&self, handle: &SessionHandle, script: &str) -> Result<String, DriverError> {
        let source = format!(
            r#"tell application {app}
    execute active tab of window id {id} javascript "{js}"
end tell"#,
            app = self.app()?,
            id = window_id(handle.id())?,
            js = wrap_script(script),
        );
        self.run("evaluate", &source).await
    }

    async fn upload_file(&self, handle: &SessionHandle, path: &Path) -> Result<(), DriverError> {
        let path = path
            .to_str()
            .ok_or_else(|| DriverError::NativeInput("path is not valid UTF-8".into()))?;
        let source = format!(
            r#"tell application {app}
    activate
    set index of window id {id} to 1
end tell
delay 0.5
tell application "System Events"
    tell process {app}
        set frontmost to true
        click at {{{x}, {y}}}
    end tell
    delay 1.5
    keystroke "g" using {{command down, shift down}}
    delay 1.0
    keystroke {path}
    delay 0.5
    key code 36
    delay 1.0
    key code 36
end tell"#,
            app = self.app()?,
            id = window_id(handle.id())?,
            x = self.geometry.click_x,
            y = self.geometry.click_y,
            path = applescript_literal(path)?,
        );
        debug!(target = "stager.driver", session = %handle.id(), "native_upload_sequence");
        self.run("upload", &source).await.map(|_| ())
    }

    async fn close(&self, handle: &SessionHandle) {
        {
            let Ok(mut closed) = self.closed.lock() else {
                return;
            };
            if !closed.insert(handle.id().to_string()) {
                return;
            }
        }
        let Ok(id) = window_id(handle.id()) else {
            return;
        };
        let source = match self.app() {
            Ok(app) => format!("tell application {app} to close window id {id}"),
            Err(_) => return,
        };
        match self.run("close", &source).await {
            Ok(_) => info!(target = "stager.driver", window = id, "session_closed"),
            Err(err) => warn!(target = "stager.driver", window = id, error = %err, "session_close_failed"),
        }
    }
}

fn failure(operation: &'static str, message: String) -> DriverError {
    match operation {
        "open" => DriverError::Open(message),
        "upload" => DriverError::NativeInput(message),
        _ => DriverError::Script(message),
    }
}

fn window_id(raw: &str) -> Result<u64, DriverError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| DriverError::Script(format!("invalid window id `{raw}`")))
}

/// Quotes `value` as an AppleScript string literal.
///
/// Control characters are rejected outright; a newline would end the
/// statement and a stray one in a typed path would submit the dialog early.
fn applescript_literal(value: &str) -> Result<String, DriverError> {
    if value.chars().any(char::is_control) {
        return Err(DriverError::Script(
            "control characters are not allowed in AppleScript literals".into(),
        ));
    }
    Ok(format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

/// Ships `script` as base64 and evaluates it in the page. The wrapper only
/// contains characters that survive an AppleScript double-quoted literal.
fn wrap_script(script: &str) -> String {
    let encoded = BASE64.encode(script.as_bytes());
    format!(
        "(function(){{var b=atob('{encoded}');var u=new Uint8Array(b.length);\
for(var i=0;i<b.length;i++){{u[i]=b.charCodeAt(i);}}\
var r=(0,eval)(new TextDecoder('utf-8').decode(u));\
return (r===undefined||r===null)?'':String(r);}})()"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_escapes_quotes_and_backslashes() {
        let lit = applescript_literal(r#"/Users/me/My "Best" \ Chair.jpg"#).expect("literal");
        assert_eq!(lit, r#""/Users/me/My \"Best\" \\ Chair.jpg""#);
    }

    #[test]
    fn literal_rejects_control_characters() {
        assert!(applescript_literal("/tmp/a\nb.jpg").is_err());
        assert!(applescript_literal("tab\there").is_err());
    }

    #[test]
    fn wrapped_script_is_transport_safe() {
        let script = "var s = \"quoted\";\n\t'single' + `tick` \\ end\r\n";
        let wrapped = wrap_script(script);
        assert!(!wrapped.contains('"'));
        assert!(!wrapped.contains('\\'));
        assert!(!wrapped.chars().any(char::is_control));
        let encoded = BASE64.encode(script.as_bytes());
        assert!(wrapped.contains(&encoded));
    }

    #[test]
    fn window_ids_must_be_numeric() {
        assert_eq!(window_id(" 1842 ").expect("id"), 1842);
        assert!(window_id("1 to quit").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_write_is_bounded_by_call_timeout() {
        let driver = OsaScriptDriver::new(
            "Google Chrome",
            WindowGeometry::default(),
            Duration::from_millis(200),
        )
        .with_interpreter("sh", &["-c", "sleep 5"]);
        let source = "x".repeat(1 << 20);
        let started = std::time::Instant::now();
        let err = driver.run("evaluate", &source).await.expect_err("stalled");
        assert!(matches!(
            err,
            DriverError::Timeout {
                operation: "evaluate",
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interpreter_output_is_trimmed() {
        let driver = OsaScriptDriver::new(
            "Google Chrome",
            WindowGeometry::default(),
            Duration::from_secs(5),
        )
        .with_interpreter("cat", &[]);
        assert_eq!(driver.run("evaluate", "complete\n").await.expect("run"), "complete");
        assert_eq!(driver.run("evaluate", "missing value\n").await.expect("run"), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_operation_failure() {
        let driver = OsaScriptDriver::new(
            "Google Chrome",
            WindowGeometry::default(),
            Duration::from_secs(5),
        )
        .with_interpreter("sh", &["-c", "cat >/dev/null; echo denied >&2; exit 3"]);
        let err = driver.run("upload", "keystroke").await.expect_err("exit 3");
        match err {
            DriverError::NativeInput(message) => assert_eq!(message, "denied"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failures_map_to_operation() {
        assert!(matches!(failure("open", "x".into()), DriverError::Open(_)));
        assert!(matches!(failure("upload", "x".into()), DriverError::NativeInput(_)));
        assert!(matches!(failure("evaluate", "x".into()), DriverError::Script(_)));
    }
}
